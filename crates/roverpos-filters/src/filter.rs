//! The [`DataFilter`] contract and the plumbing every filter shares.
//!
//! # Lifecycle
//!
//! A filter starts **Open** and moves to **Closed** exactly once. Closing
//! releases whatever the filter owns and closes its downstream filters in
//! registration order. `receive` on a closed filter is a
//! [`RoverError::ContractViolation`]; a second `close` is a no-op.
//!
//! # Errors from `receive`
//!
//! | Error | Meaning | Filter state afterwards |
//! |---|---|---|
//! | `Validation` | sample malformed, dropped | open |
//! | `Io` | a sink failed | that sink closed itself |
//! | `ContractViolation` | misuse of a closed filter | unchanged |

use roverpos_types::{RoverError, TimestampedValue};
use tracing::{debug, warn};

/// One node of the processing graph, consuming `T`.
pub trait DataFilter<T>: Send {
    /// Identifier used to find and detach branches, and in logs.
    fn name(&self) -> &str;

    /// Process one value and forward the results downstream.
    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError>;

    /// Release resources and close downstream. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

impl<T, F: DataFilter<T> + ?Sized> DataFilter<T> for Box<F> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        (**self).receive(data)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Downstream
// ────────────────────────────────────────────────────────────────────────────

/// The ordered set of filters a filter forwards its output to.
pub struct Downstream<O> {
    filters: Vec<Box<dyn DataFilter<O>>>,
}

impl<O> Downstream<O> {
    pub fn new() -> Self {
        Self { filters: Vec::new() }
    }

    pub fn add(&mut self, filter: Box<dyn DataFilter<O>>) {
        self.filters.push(filter);
    }

    /// Detach the first filter called `name`. The caller decides whether to
    /// close it.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn DataFilter<O>>> {
        let index = self.filters.iter().position(|f| f.name() == name)?;
        Some(self.filters.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f.name() == name)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Deliver `data` to every open filter in registration order.
    ///
    /// A failing branch does not stop delivery to its siblings; the first
    /// error is returned once every branch has been offered the value. A
    /// contract violation is returned immediately. Branches that are closed
    /// afterwards are dropped from the set.
    pub fn send(&mut self, data: &TimestampedValue<O>) -> Result<(), RoverError> {
        let mut first_error = None;
        for filter in self.filters.iter_mut() {
            if filter.is_closed() {
                continue;
            }
            match filter.receive(data) {
                Ok(()) => {}
                Err(e @ RoverError::ContractViolation(_)) => return Err(e),
                Err(e) => {
                    warn!(filter = filter.name(), error = %e, "downstream filter failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.prune();
        first_error.map_or(Ok(()), Err)
    }

    /// Close every filter in registration order.
    pub fn close(&mut self) {
        for filter in self.filters.iter_mut() {
            filter.close();
        }
    }

    fn prune(&mut self) {
        self.filters.retain(|f| {
            let keep = !f.is_closed();
            if !keep {
                debug!(filter = f.name(), "closed filter detached");
            }
            keep
        });
    }
}

impl<O> Default for Downstream<O> {
    fn default() -> Self {
        Self::new()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FilterCore
// ────────────────────────────────────────────────────────────────────────────

/// Name, open/closed state and downstream set; embedded by every concrete
/// filter that forwards values of type `O`.
pub struct FilterCore<O> {
    name: String,
    closed: bool,
    pub downstream: Downstream<O>,
}

impl<O> FilterCore<O> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            closed: false,
            downstream: Downstream::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// `Err(ContractViolation)` once closed; call first in `receive`.
    pub fn ensure_open(&self) -> Result<(), RoverError> {
        if self.closed {
            return Err(RoverError::ContractViolation(format!(
                "receive on closed filter '{}'",
                self.name
            )));
        }
        Ok(())
    }

    pub fn send(&mut self, data: &TimestampedValue<O>) -> Result<(), RoverError> {
        self.downstream.send(data)
    }

    /// Mark closed and close downstream. `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.downstream.close();
        debug!(filter = %self.name, "filter closed");
        true
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Chain
// ────────────────────────────────────────────────────────────────────────────

/// Attaching downstream filters. Implemented by every filter that forwards
/// values of type `O`.
pub trait Chain<O>: Sized {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<O>>);

    /// Builder form of [`add_downstream`](Self::add_downstream).
    fn then<F: DataFilter<O> + 'static>(mut self, next: F) -> Self {
        self.add_downstream(Box::new(next));
        self
    }

    /// Builder form taking an already boxed filter.
    fn then_boxed(mut self, next: Box<dyn DataFilter<O>>) -> Self {
        self.add_downstream(next);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureFilter;

    #[test]
    fn send_reaches_every_branch_in_order() {
        let mut downstream = Downstream::new();
        let a = CaptureFilter::<u32>::new("a");
        let b = CaptureFilter::<u32>::new("b");
        let (ra, rb) = (a.received(), b.received());
        downstream.add(Box::new(a));
        downstream.add(Box::new(b));

        downstream.send(&TimestampedValue::new(7, 1.0)).unwrap();

        assert_eq!(ra.lock().unwrap().len(), 1);
        assert_eq!(rb.lock().unwrap().len(), 1);
    }

    #[test]
    fn failing_branch_does_not_starve_siblings() {
        let mut downstream = Downstream::new();
        let failing = CaptureFilter::<u32>::failing("disk", RoverError::io("disk", "full"));
        let healthy = CaptureFilter::<u32>::new("healthy");
        let received = healthy.received();
        downstream.add(Box::new(failing));
        downstream.add(Box::new(healthy));

        let result = downstream.send(&TimestampedValue::new(1, 0.0));

        assert!(matches!(result, Err(RoverError::Io { .. })));
        assert_eq!(received.lock().unwrap().len(), 1);
        // The I/O failure closed the sink, so it is detached.
        assert_eq!(downstream.len(), 1);
        assert!(!downstream.contains("disk"));
    }

    #[test]
    fn remove_detaches_by_name() {
        let mut downstream = Downstream::<u32>::new();
        downstream.add(Box::new(CaptureFilter::new("keep")));
        downstream.add(Box::new(CaptureFilter::new("drop")));

        let removed = downstream.remove("drop").unwrap();
        assert_eq!(removed.name(), "drop");
        assert!(downstream.remove("drop").is_none());
        assert_eq!(downstream.len(), 1);
    }

    #[test]
    fn core_rejects_receive_after_close() {
        let mut core = FilterCore::<u32>::new("core");
        assert!(core.ensure_open().is_ok());
        assert!(core.close());
        assert!(!core.close());
        assert!(matches!(core.ensure_open(), Err(RoverError::ContractViolation(_))));
    }

    #[test]
    fn close_propagates_to_branches() {
        let mut core = FilterCore::<u32>::new("core");
        let branch = CaptureFilter::<u32>::new("branch");
        let closed = branch.closed_flag();
        core.downstream.add(Box::new(branch));

        core.close();
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
