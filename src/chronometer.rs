//! Wall-clock profiling of communication operations
//!
//! [`Stopwatch`] accumulates total time and call count for one concern;
//! [`MultiTimer`] is a label-keyed dictionary of stopwatches, lazily
//! creating one per label, and is usable entirely on its own. The
//! [`Chronometer`] builds on both: attached to a communicator, it times
//! every communication operation under the operation's label (`"send"`,
//! `"recv"`, `"probe"`, `"isend"`, `"irecv"`, `"barrier"`, `"bcast"`,
//! `"reduce"`, `"allreduce"`) while activated.
//!
//! A communicator holds its profiler only weakly: dropping the
//! `Chronometer` detaches it from every communicator it was registered
//! with, and an attached but deactivated profiler records nothing.
//!
//! Measurements run through an internal lock. The lock is uncontended in
//! the common one-communicator-per-thread layout, and it keeps attached
//! communicators usable from whatever thread owns them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::topology::traits::*;

/// Accumulates wall-clock time over repeated start/stop cycles.
#[derive(Clone, Debug, Default)]
pub struct Stopwatch {
    started: Option<Instant>,
    total: Duration,
    calls: u64,
}

impl Stopwatch {
    /// A stopped stopwatch with no time on it.
    pub fn new() -> Stopwatch {
        Stopwatch::default()
    }

    /// Starts a measurement. Starting a running stopwatch has no effect.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Stops the current measurement and returns its duration.
    ///
    /// # Panics
    ///
    /// Panics if the stopwatch is not running.
    pub fn stop(&mut self) -> Duration {
        let started = self.started.take().expect("stopwatch was not started");
        let delta = started.elapsed();
        self.record(delta);
        delta
    }

    /// Whether a measurement is in progress.
    pub fn is_measuring(&self) -> bool {
        self.started.is_some()
    }

    /// Folds an externally measured duration into the statistics.
    pub fn record(&mut self, delta: Duration) {
        self.total += delta;
        self.calls += 1;
    }

    /// Accumulated time over all completed measurements.
    pub fn total_time(&self) -> Duration {
        self.total
    }

    /// Mean time per completed measurement; zero when nothing was measured.
    pub fn mean_time(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total / self.calls as u32
        }
    }

    /// Number of completed measurements.
    pub fn nb_calls(&self) -> u64 {
        self.calls
    }
}

impl fmt::Display for Stopwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time per call : {:?}\t number of calls : {}\t total time : {:?}",
            self.mean_time(),
            self.calls,
            self.total
        )
    }
}

/// A dictionary of stopwatches keyed by label
///
/// Labels are created lazily on first access, so call sites never have to
/// pre-register the concerns they time.
#[derive(Debug, Default)]
pub struct MultiTimer {
    timers: HashMap<String, Stopwatch>,
}

impl MultiTimer {
    /// An empty dictionary.
    pub fn new() -> MultiTimer {
        MultiTimer::default()
    }

    /// The stopwatch for `label`, created stopped and empty on first use.
    pub fn timer(&mut self, label: &str) -> &mut Stopwatch {
        if !self.timers.contains_key(label) {
            self.timers.insert(label.to_owned(), Stopwatch::new());
        }
        self.timers.get_mut(label).unwrap()
    }

    /// The stopwatch for `label`, if it was ever used.
    pub fn get(&self, label: &str) -> Option<&Stopwatch> {
        self.timers.get(label)
    }

    /// Removes the stopwatch for `label`.
    pub fn remove(&mut self, label: &str) -> Option<Stopwatch> {
        self.timers.remove(label)
    }

    /// Number of labels measured so far.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether nothing was measured yet.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Iterates over `(label, stopwatch)` pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Stopwatch)> {
        let mut items: Vec<_> = self.timers.iter().collect();
        items.sort_by(|a, b| a.0.cmp(b.0));
        items.into_iter().map(|(label, timer)| (label.as_str(), timer))
    }

    /// Aggregate over every label: total call count and accumulated time.
    pub fn summary(&self) -> Stopwatch {
        let mut summary = Stopwatch::new();
        for timer in self.timers.values() {
            summary.total += timer.total;
            summary.calls += timer.calls;
        }
        summary
    }
}

impl fmt::Display for MultiTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, timer) in self.iter() {
            writeln!(f, "\t\t [ {} ] => {}", label, timer)?;
        }
        Ok(())
    }
}

pub(crate) struct ChronoShared {
    active: AtomicBool,
    timers: Mutex<MultiTimer>,
}

/// Measures one operation; folds the elapsed time into the shared timer
/// dictionary on drop.
pub(crate) struct ProfileGuard {
    shared: Arc<ChronoShared>,
    label: &'static str,
    begun: Instant,
}

impl ProfileGuard {
    pub(crate) fn begin(shared: Arc<ChronoShared>, label: &'static str) -> Option<ProfileGuard> {
        if !shared.active.load(Ordering::Relaxed) {
            return None;
        }
        Some(ProfileGuard {
            shared,
            label,
            begun: Instant::now(),
        })
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        let delta = self.begun.elapsed();
        self.shared.timers.lock().unwrap().timer(self.label).record(delta);
    }
}

/// A profiler for the communication operations of communicators
///
/// Attach it to one or more communicators with
/// [`attach`](Chronometer::attach), switch measurement on with
/// [`activate`](Chronometer::activate), and read the per-operation report
/// through `Display` or [`with_timers`](Chronometer::with_timers). A fresh
/// chronometer is deactivated.
///
/// # Examples
/// See `tests/chronometer.rs`
pub struct Chronometer {
    shared: Arc<ChronoShared>,
}

impl Default for Chronometer {
    fn default() -> Self {
        Chronometer::new()
    }
}

impl Chronometer {
    /// A detached, deactivated chronometer.
    pub fn new() -> Chronometer {
        Chronometer {
            shared: Arc::new(ChronoShared {
                active: AtomicBool::new(false),
                timers: Mutex::new(MultiTimer::new()),
            }),
        }
    }

    /// Registers this chronometer as the communicator's profiler,
    /// displacing any previously attached one. The communicator keeps only
    /// a weak reference; dropping the chronometer detaches it.
    pub fn attach<C: Communicator + ?Sized>(&self, comm: &C) {
        comm.as_handle().set_profiler(&self.shared);
    }

    /// Removes whatever profiler is attached to the communicator.
    pub fn detach<C: Communicator + ?Sized>(comm: &C) {
        comm.as_handle().clear_profiler();
    }

    /// Switches measurement on.
    pub fn activate(&self) {
        self.shared.active.store(true, Ordering::Relaxed);
    }

    /// Switches measurement off without detaching; accumulated statistics
    /// are kept.
    pub fn deactivate(&self) {
        self.shared.active.store(false, Ordering::Relaxed);
    }

    /// Whether measurement is switched on.
    pub fn is_activated(&self) -> bool {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Runs `f` over the accumulated timer dictionary.
    pub fn with_timers<R>(&self, f: impl FnOnce(&MultiTimer) -> R) -> R {
        f(&self.shared.timers.lock().unwrap())
    }
}

impl fmt::Display for Chronometer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timers = self.shared.timers.lock().unwrap();
        writeln!(f, "---------------->")?;
        writeln!(f, "\t Communication Details : ")?;
        writeln!(f, "\t ===================== ")?;
        write!(f, "{}", timers)?;
        writeln!(f, "\t Communication Summaries : ")?;
        writeln!(f, "\t =======================")?;
        writeln!(f, "\t\t {}", timers.summary())?;
        write!(f, "<----------------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stopwatch_accumulates() {
        let mut watch = Stopwatch::new();
        assert_eq!(watch.nb_calls(), 0);
        assert_eq!(watch.mean_time(), Duration::ZERO);
        watch.start();
        assert!(watch.is_measuring());
        // Starting twice must not reset the running measurement.
        watch.start();
        thread::sleep(Duration::from_millis(1));
        let delta = watch.stop();
        assert!(delta >= Duration::from_millis(1));
        assert_eq!(watch.nb_calls(), 1);
        assert_eq!(watch.total_time(), watch.mean_time());
        watch.record(Duration::from_secs(1));
        assert_eq!(watch.nb_calls(), 2);
        assert!(watch.total_time() >= Duration::from_secs(1));
    }

    #[test]
    #[should_panic]
    fn stopping_an_idle_stopwatch_panics() {
        Stopwatch::new().stop();
    }

    #[test]
    fn multitimer_creates_labels_lazily() {
        let mut timers = MultiTimer::new();
        assert!(timers.is_empty());
        timers.timer("io").record(Duration::from_millis(3));
        timers.timer("io").record(Duration::from_millis(5));
        timers.timer("compute").record(Duration::from_millis(2));
        assert_eq!(timers.len(), 2);
        assert_eq!(timers.get("io").unwrap().nb_calls(), 2);
        assert!(timers.get("absent").is_none());
        let summary = timers.summary();
        assert_eq!(summary.nb_calls(), 3);
        assert_eq!(summary.total_time(), Duration::from_millis(10));
    }

    #[test]
    fn guard_records_only_when_activated() {
        let chrono = Chronometer::new();
        assert!(ProfileGuard::begin(Arc::clone(&chrono.shared), "send").is_none());
        chrono.activate();
        drop(ProfileGuard::begin(Arc::clone(&chrono.shared), "send").unwrap());
        chrono.deactivate();
        assert!(ProfileGuard::begin(Arc::clone(&chrono.shared), "send").is_none());
        chrono.with_timers(|timers| {
            assert_eq!(timers.get("send").unwrap().nb_calls(), 1);
        });
    }

    #[test]
    fn report_lists_labels_and_summary() {
        let chrono = Chronometer::new();
        chrono.activate();
        drop(ProfileGuard::begin(Arc::clone(&chrono.shared), "bcast").unwrap());
        let report = format!("{}", chrono);
        assert!(report.contains("[ bcast ]"));
        assert!(report.contains("Communication Summaries"));
    }
}
