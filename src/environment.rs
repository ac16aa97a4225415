//! Bridge between a process group and the environment it runs in
//!
//! A parallel session is set up explicitly: build a [`Fabric`] for the
//! process group, attach one [`Context`] per rank, and hand each rank its
//! context. The [`run`] and [`run_with_threading`] harnesses do exactly
//! that with one OS thread per rank and are how the tests (and most
//! programs) enter parallel execution:
//!
//! ```
//! use groupcomm::traits::*;
//!
//! groupcomm::run(4, |ctx| {
//!     let world = ctx.world();
//!     println!("rank {} of {}", world.rank(), world.size());
//! })
//! .unwrap();
//! ```
//!
//! There is no hidden process-global session: everything a rank may do runs
//! through the `Context` it was handed, and the session ends when the last
//! context is dropped.

use std::sync::Arc;
use std::thread;

use log::debug;

use crate::error::Error;
use crate::fabric::Fabric;
use crate::topology::{Rank, WorldCommunicator};

/// Describes the various levels of multithreading that can be supported by
/// a communication substrate.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Threading {
    /// All processes partaking in the computation are single-threaded.
    Single,
    /// Processes may be multi-threaded, but communication functions will
    /// only ever be called from the main thread.
    Funneled,
    /// Processes may be multi-threaded, but calls to communication
    /// functions will not be made concurrently. The user is responsible
    /// for serializing the calls.
    Serialized,
    /// Processes may be multi-threaded with no restrictions on the use of
    /// communication functions from the threads.
    Multiple,
}

/// One rank's attachment to a fabric
///
/// The context pins the rank's identity within the process group for the
/// session's duration and is the only way to obtain the world
/// communicator. Dropping the last context of a fabric finalizes the
/// session; dropping a context mid-panic marks the session dead so that
/// peers blocked on the vanished rank fail instead of hanging.
pub struct Context {
    fabric: Arc<Fabric>,
    rank: Rank,
    threading: Threading,
}

impl Context {
    /// Attaches to `fabric` as `rank`, negotiating `threading`.
    ///
    /// The fabric's mailboxes are internally synchronized, so every level
    /// is grantable; the level is recorded and reported back through
    /// [`threading_support`](Context::threading_support). Fails if `rank`
    /// is outside the fabric's process group.
    pub fn attach(fabric: Arc<Fabric>, rank: Rank, threading: Threading) -> Result<Context, Error> {
        if rank < 0 || rank >= fabric.size() {
            return Err(Error::RankOutOfRange {
                rank,
                size: fabric.size(),
            });
        }
        fabric.attach();
        debug!("rank {} attached with {:?} threading", rank, threading);
        Ok(Context {
            fabric,
            rank,
            threading,
        })
    }

    /// The 'world communicator'
    ///
    /// Contains all processes initially partaking in the computation. Each
    /// call returns a fresh communicator value; all of them share the
    /// world's message space.
    pub fn world(&self) -> WorldCommunicator {
        WorldCommunicator::new(Arc::clone(&self.fabric), self.rank)
    }

    /// This rank within the full process group.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of ranks in the full process group.
    pub fn size(&self) -> Rank {
        self.fabric.size()
    }

    /// Level of multithreading support granted at attachment.
    pub fn threading_support(&self) -> Threading {
        self.threading
    }

    /// The underlying fabric, for assembling communicators by hand.
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.fabric.detach(thread::panicking());
    }
}

/// Runs `f` once per rank on a process group of `size` ranks, with
/// single-threaded ranks.
///
/// Equivalent to: `run_with_threading(size, Threading::Single, f)`,
/// discarding the granted threading level.
pub fn run<F>(size: Rank, f: F) -> Result<(), Error>
where
    F: Fn(Context) + Send + Sync,
{
    run_with_threading(size, Threading::Single, f).map(|_| ())
}

/// Runs `f` once per rank on a process group of `size` ranks, requesting a
/// level of multithreading support.
///
/// Spawns one OS thread per rank, hands each a [`Context`] attached to a
/// shared fresh [`Fabric`], and joins them all. Returns the granted
/// threading level, which with this substrate is always the requested one.
///
/// A panicking rank propagates its panic out of this call once the
/// remaining ranks have stopped, which they do as soon as they block on
/// the dead session.
pub fn run_with_threading<F>(size: Rank, threading: Threading, f: F) -> Result<Threading, Error>
where
    F: Fn(Context) + Send + Sync,
{
    let fabric = Fabric::new(size)?;
    let contexts = (0..size)
        .map(|rank| Context::attach(Arc::clone(&fabric), rank, threading))
        .collect::<Result<Vec<_>, _>>()?;
    thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = contexts
            .into_iter()
            .map(|ctx| {
                thread::Builder::new()
                    .name(format!("rank-{}", ctx.rank()))
                    .spawn_scoped(scope, move || f(ctx))
                    .expect("failed to spawn rank thread")
            })
            .collect();
        for handle in handles {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    });
    Ok(threading)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threading_levels_are_ordered() {
        assert!(Threading::Single < Threading::Funneled);
        assert!(Threading::Funneled < Threading::Serialized);
        assert!(Threading::Serialized < Threading::Multiple);
        let max = [Threading::Funneled, Threading::Multiple, Threading::Single]
            .into_iter()
            .max();
        assert_eq!(max, Some(Threading::Multiple));
    }

    #[test]
    fn attach_rejects_foreign_ranks() {
        let fabric = Fabric::new(2).unwrap();
        assert!(Context::attach(Arc::clone(&fabric), 2, Threading::Single).is_err());
        assert!(Context::attach(Arc::clone(&fabric), -1, Threading::Single).is_err());
        let ctx = Context::attach(fabric, 1, Threading::Single).unwrap();
        assert_eq!(ctx.rank(), 1);
        assert_eq!(ctx.size(), 2);
    }

    #[test]
    fn granted_threading_is_reported() {
        let granted = run_with_threading(2, Threading::Multiple, |ctx| {
            assert_eq!(ctx.threading_support(), Threading::Multiple);
        })
        .unwrap();
        assert_eq!(granted, Threading::Multiple);
    }
}
