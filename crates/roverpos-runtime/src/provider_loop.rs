//! [`ProviderLoop`] – one polling loop per sensor stream.
//!
//! Each iteration:
//!
//! 1. **Poll** the provider with a short timeout so shutdown is noticed
//!    promptly.
//! 2. **Get** the sample.
//! 3. **Receive** it on the chain head and run the chain to completion.
//!
//! # Error policy
//!
//! | Source | Error | Loop |
//! |---|---|---|
//! | provider | `Validation` | drop the sample, continue |
//! | provider | `Io` | stop |
//! | chain | `Validation` / `Serialization` | drop the sample, continue |
//! | chain | `Io` (a sink closed itself) | continue while the head is open |
//! | either | `ContractViolation` | stop |
//!
//! Whatever the reason for stopping, the provider and then the chain head
//! are closed before the loop returns.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use roverpos_filters::DataFilter;
use roverpos_hal::DataProvider;
use roverpos_types::RoverError;
use tracing::{debug, error, info, info_span, trace, warn};

/// How long one `poll` may block before the loop re-checks its flags.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LoopCounters {
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of a loop's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopStats {
    /// Samples taken from the provider.
    pub received: u64,
    /// Samples the chain head accepted.
    pub forwarded: u64,
    /// Samples discarded: malformed, rejected by the chain, or arriving
    /// while paused.
    pub dropped: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// LoopControl
// ─────────────────────────────────────────────────────────────────────────────

/// Cross-thread switches of one or more [`ProviderLoop`]s.
#[derive(Debug, Clone, Default)]
pub struct LoopControl {
    shutdown: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl LoopControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop at its next poll.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Keep polling but discard every sample.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Read-only view of one loop's counters.
#[derive(Debug, Clone, Default)]
pub struct LoopMonitor {
    counters: Arc<LoopCounters>,
}

impl LoopMonitor {
    pub fn snapshot(&self) -> LoopStats {
        LoopStats {
            received: self.counters.received.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

fn count(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ─────────────────────────────────────────────────────────────────────────────
// LoopExit
// ─────────────────────────────────────────────────────────────────────────────

/// Why a loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// [`LoopControl::shutdown`] was called.
    Shutdown,
    /// The provider can never produce another sample.
    Exhausted,
    /// Every filter in the chain is gone.
    ChainClosed,
    /// The provider failed.
    ProviderFailed(RoverError),
    /// A filter was misused; a programming error.
    ContractViolation(RoverError),
}

// ─────────────────────────────────────────────────────────────────────────────
// ProviderLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one [`DataProvider`] into one filter chain.
pub struct ProviderLoop<T> {
    stream: String,
    provider: Box<dyn DataProvider<T>>,
    head: Box<dyn DataFilter<T>>,
    poll_timeout: Duration,
    control: LoopControl,
    monitor: LoopMonitor,
}

impl<T: 'static> ProviderLoop<T> {
    pub fn new(
        stream: impl Into<String>,
        provider: Box<dyn DataProvider<T>>,
        head: Box<dyn DataFilter<T>>,
    ) -> Self {
        Self {
            stream: stream.into(),
            provider,
            head,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            control: LoopControl::new(),
            monitor: LoopMonitor::default(),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Share switches with other loops, e.g. one pause for every stream.
    pub fn with_control(mut self, control: LoopControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    pub fn monitor(&self) -> LoopMonitor {
        self.monitor.clone()
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Run on the current thread until the loop stops.
    pub fn run(mut self) -> LoopExit {
        let span = info_span!("provider_loop", stream = %self.stream, provider = self.provider.id());
        let _enter = span.enter();
        info!("loop started");

        let exit = self.run_until_stopped();

        self.provider.close();
        self.head.close();
        let stats = self.monitor.snapshot();
        info!(
            received = stats.received,
            forwarded = stats.forwarded,
            dropped = stats.dropped,
            ?exit,
            "loop stopped"
        );
        exit
    }

    /// Run on a dedicated OS thread named after the stream.
    pub fn spawn(self) -> io::Result<LoopHandle>
    where
        T: Send,
    {
        let control = self.control.clone();
        let monitor = self.monitor.clone();
        let stream = self.stream.clone();
        let join = thread::Builder::new()
            .name(format!("loop-{stream}"))
            .spawn(move || self.run())?;
        Ok(LoopHandle {
            stream,
            control,
            monitor,
            join,
        })
    }

    fn run_until_stopped(&mut self) -> LoopExit {
        let counters = Arc::clone(&self.monitor.counters);
        loop {
            if self.control.is_shutdown() {
                return LoopExit::Shutdown;
            }
            if self.head.is_closed() {
                warn!("chain head closed");
                return LoopExit::ChainClosed;
            }
            if !self.provider.poll(self.poll_timeout) {
                if self.provider.is_exhausted() {
                    return LoopExit::Exhausted;
                }
                continue;
            }

            let sample = match self.provider.get() {
                Ok(sample) => sample,
                Err(e) if !e.is_fatal_for_loop() => {
                    count(&counters.received);
                    count(&counters.dropped);
                    warn!(error = %e, "malformed sample dropped");
                    continue;
                }
                Err(e @ RoverError::ContractViolation(_)) => {
                    error!(error = %e, "provider contract violated");
                    return LoopExit::ContractViolation(e);
                }
                Err(e) => {
                    if self.provider.is_exhausted() {
                        return LoopExit::Exhausted;
                    }
                    error!(error = %e, "provider failed");
                    return LoopExit::ProviderFailed(e);
                }
            };
            count(&counters.received);

            if self.control.is_paused() {
                count(&counters.dropped);
                trace!(timestamp = sample.timestamp(), "paused, sample discarded");
                continue;
            }

            match self.head.receive(&sample) {
                Ok(()) => count(&counters.forwarded),
                Err(e @ RoverError::ContractViolation(_)) => {
                    error!(error = %e, "filter contract violated");
                    return LoopExit::ContractViolation(e);
                }
                Err(e @ RoverError::Io { .. }) => {
                    // The failing sink closed itself; its siblings already
                    // saw the sample.
                    count(&counters.forwarded);
                    warn!(error = %e, "sink failed");
                }
                Err(e) => {
                    count(&counters.dropped);
                    debug!(error = %e, "sample rejected by chain");
                }
            }
        }
    }
}

/// A loop running on its own thread.
pub struct LoopHandle {
    stream: String,
    control: LoopControl,
    monitor: LoopMonitor,
    join: JoinHandle<LoopExit>,
}

impl LoopHandle {
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    pub fn stats(&self) -> LoopStats {
        self.monitor.snapshot()
    }

    /// Counters that outlive [`join`](Self::join).
    pub fn monitor(&self) -> LoopMonitor {
        self.monitor.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to stop.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Io`] if the loop thread panicked.
    pub fn join(self) -> Result<LoopExit, RoverError> {
        self.join
            .join()
            .map_err(|_| RoverError::io(format!("loop-{}", self.stream), "loop thread panicked"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
