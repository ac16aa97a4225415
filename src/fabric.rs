//! The in-process messaging substrate
//!
//! A [`Fabric`] is the shared state of one process group: one mailbox per
//! member, a counter handing out fresh communication contexts, and the
//! bookkeeping that detects a torn-down peer. Ranks run as OS threads and
//! exchange [`Envelope`]s through the mailboxes; everything above this module
//! (communicators, datatypes, requests, collectives) is substrate-agnostic
//! and only talks to the fabric through the posting/matching calls here.
//!
//! Delivery is eager: a send copies its payload into the destination mailbox
//! and returns. Messages between the same (sender, receiver, tag, context)
//! quadruple are matched in posting order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, trace};
use smallvec::SmallVec;

use crate::error::Error;
use crate::topology::Rank;
use crate::Tag;

/// Identifies one independent message space. Traffic never crosses contexts.
pub(crate) type ContextId = u64;

/// The context of the world communicator.
pub(crate) const WORLD_CONTEXT: ContextId = 0;

// Reserved tags for library-internal traffic. User tags are non-negative and
// the any-tag wildcard never matches a negative tag.
pub(crate) const TAG_BARRIER: Tag = -1;
pub(crate) const TAG_BCAST: Tag = -2;
pub(crate) const TAG_REDUCE: Tag = -3;
pub(crate) const TAG_SPLIT: Tag = -4;
pub(crate) const TAG_DUP: Tag = -5;

/// Payload bytes; scalar messages stay inline.
pub(crate) type PayloadBytes = SmallVec<[u8; 64]>;

/// One message sitting in a mailbox.
pub(crate) struct Envelope {
    pub context: ContextId,
    /// Rank of the sender within the communicator the message was sent on.
    pub source: Rank,
    pub tag: Tag,
    pub data: PayloadBytes,
}

impl Envelope {
    fn matches(&self, context: ContextId, source: Option<Rank>, tag: Option<Tag>) -> bool {
        self.context == context
            && source.map_or(true, |s| s == self.source)
            // The wildcard is reserved for user messages.
            && tag.map_or(self.tag >= 0, |t| t == self.tag)
    }
}

struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Mailbox {
            queue: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }
}

/// Shared substrate state of one process group.
///
/// Created once per simulated parallel session, then shared (via `Arc`) by
/// every [`Context`](crate::environment::Context) attached to it.
pub struct Fabric {
    size: Rank,
    mailboxes: Box<[Mailbox]>,
    next_context: AtomicU64,
    attached: AtomicUsize,
    aborted: AtomicBool,
}

impl Fabric {
    /// Builds the substrate for a group of `size` ranks.
    ///
    /// Fails with `Error::InvalidArgument` for a non-positive size.
    pub fn new(size: Rank) -> Result<Arc<Fabric>, Error> {
        if size < 1 {
            return Err(Error::invalid_argument(1, "fabric size must be at least 1"));
        }
        debug!("fabric initialized for {} ranks", size);
        Ok(Arc::new(Fabric {
            size,
            mailboxes: (0..size).map(|_| Mailbox::new()).collect(),
            next_context: AtomicU64::new(WORLD_CONTEXT + 1),
            attached: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        }))
    }

    /// Number of ranks in the full process group.
    pub fn size(&self) -> Rank {
        self.size
    }

    /// Hands out `count` fresh context ids, returning the first.
    pub(crate) fn allocate_contexts(&self, count: u64) -> ContextId {
        self.next_context.fetch_add(count, Ordering::Relaxed)
    }

    /// Hands out one fresh message-space id, for assembling a
    /// [`GroupHandle`](crate::topology::GroupHandle) by hand. The id must be
    /// shared with every other member of the assembled group.
    pub fn allocate_context(&self) -> u64 {
        self.allocate_contexts(1)
    }

    pub(crate) fn attach(&self) {
        self.attached.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn detach(&self, panicking: bool) {
        if panicking {
            self.abort();
        }
        if self.attached.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("fabric finalized");
        }
    }

    /// Marks the fabric dead and wakes every blocked waiter, which then
    /// panics instead of waiting forever for a peer that is gone.
    pub(crate) fn abort(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            debug!("fabric aborted, waking blocked ranks");
            for mailbox in self.mailboxes.iter() {
                self.arrive(mailbox);
            }
        }
    }

    fn arrive(&self, mailbox: &Mailbox) {
        // Touch the lock so sleeping waiters cannot miss the notification.
        drop(mailbox.queue.lock().unwrap());
        mailbox.arrived.notify_all();
    }

    fn check_live(&self) {
        if self.aborted.load(Ordering::SeqCst) {
            panic!("a peer rank terminated while a blocking operation was pending");
        }
    }

    /// Deposits an envelope into `dest`'s mailbox.
    pub(crate) fn post(&self, dest: usize, envelope: Envelope) {
        trace!(
            "post: ctx {} src {} tag {} -> world {} ({} bytes)",
            envelope.context,
            envelope.source,
            envelope.tag,
            dest,
            envelope.data.len()
        );
        let mailbox = &self.mailboxes[dest];
        mailbox.queue.lock().unwrap().push_back(envelope);
        mailbox.arrived.notify_all();
    }

    /// Takes the first matching envelope out of `world`'s mailbox, blocking
    /// until one arrives.
    pub(crate) fn take(
        &self,
        world: usize,
        context: ContextId,
        source: Option<Rank>,
        tag: Option<Tag>,
    ) -> Envelope {
        let mailbox = &self.mailboxes[world];
        let mut queue = mailbox.queue.lock().unwrap();
        loop {
            if let Some(pos) = queue.iter().position(|e| e.matches(context, source, tag)) {
                let envelope = queue.remove(pos).unwrap();
                trace!(
                    "take: ctx {} src {} tag {} at world {} ({} bytes)",
                    envelope.context,
                    envelope.source,
                    envelope.tag,
                    world,
                    envelope.data.len()
                );
                return envelope;
            }
            self.check_live();
            queue = mailbox.arrived.wait(queue).unwrap();
        }
    }

    /// Non-blocking variant of [`take`](Fabric::take).
    pub(crate) fn try_take(
        &self,
        world: usize,
        context: ContextId,
        source: Option<Rank>,
        tag: Option<Tag>,
    ) -> Option<Envelope> {
        self.check_live();
        let mut queue = self.mailboxes[world].queue.lock().unwrap();
        queue
            .iter()
            .position(|e| e.matches(context, source, tag))
            .map(|pos| queue.remove(pos).unwrap())
    }

    /// Envelope metadata of the first matching pending message, without
    /// consuming it. Blocks until a match is pending.
    pub(crate) fn peek(
        &self,
        world: usize,
        context: ContextId,
        source: Option<Rank>,
        tag: Option<Tag>,
    ) -> (Rank, Tag, usize) {
        let mailbox = &self.mailboxes[world];
        let mut queue = mailbox.queue.lock().unwrap();
        loop {
            if let Some(e) = queue.iter().find(|e| e.matches(context, source, tag)) {
                return (e.source, e.tag, e.data.len());
            }
            self.check_live();
            queue = mailbox.arrived.wait(queue).unwrap();
        }
    }

    /// Non-blocking variant of [`peek`](Fabric::peek).
    pub(crate) fn try_peek(
        &self,
        world: usize,
        context: ContextId,
        source: Option<Rank>,
        tag: Option<Tag>,
    ) -> Option<(Rank, Tag, usize)> {
        self.check_live();
        let queue = self.mailboxes[world].queue.lock().unwrap();
        queue
            .iter()
            .find(|e| e.matches(context, source, tag))
            .map(|e| (e.source, e.tag, e.data.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn envelope(context: ContextId, source: Rank, tag: Tag, byte: u8) -> Envelope {
        Envelope {
            context,
            source,
            tag,
            data: smallvec![byte],
        }
    }

    #[test]
    fn matching_is_fifo_per_source_and_tag() {
        let fabric = Fabric::new(1).unwrap();
        fabric.post(0, envelope(WORLD_CONTEXT, 0, 7, 1));
        fabric.post(0, envelope(WORLD_CONTEXT, 0, 7, 2));
        let first = fabric.take(0, WORLD_CONTEXT, Some(0), Some(7));
        let second = fabric.take(0, WORLD_CONTEXT, Some(0), Some(7));
        assert_eq!(first.data[0], 1);
        assert_eq!(second.data[0], 2);
    }

    #[test]
    fn wildcard_tag_skips_internal_traffic() {
        let fabric = Fabric::new(1).unwrap();
        fabric.post(0, envelope(WORLD_CONTEXT, 0, TAG_BCAST, 9));
        fabric.post(0, envelope(WORLD_CONTEXT, 0, 0, 1));
        let user = fabric.take(0, WORLD_CONTEXT, None, None);
        assert_eq!(user.tag, 0);
        // Internal messages stay matchable by their explicit tag.
        let internal = fabric.try_take(0, WORLD_CONTEXT, Some(0), Some(TAG_BCAST));
        assert!(internal.is_some());
    }

    #[test]
    fn contexts_partition_traffic() {
        let fabric = Fabric::new(1).unwrap();
        let other = fabric.allocate_contexts(1);
        fabric.post(0, envelope(other, 0, 0, 5));
        assert!(fabric.try_take(0, WORLD_CONTEXT, None, None).is_none());
        assert_eq!(fabric.try_take(0, other, None, None).unwrap().data[0], 5);
    }

    #[test]
    fn peek_does_not_consume() {
        let fabric = Fabric::new(1).unwrap();
        fabric.post(0, envelope(WORLD_CONTEXT, 0, 3, 8));
        let (source, tag, bytes) = fabric.peek(0, WORLD_CONTEXT, None, None);
        assert_eq!((source, tag, bytes), (0, 3, 1));
        assert!(fabric.try_take(0, WORLD_CONTEXT, Some(0), Some(3)).is_some());
    }

    #[test]
    fn invalid_size_is_rejected() {
        assert!(Fabric::new(0).is_err());
    }
}
