//! One filter fed from several polling loops.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use roverpos_types::{RoverError, TimestampedValue};
use tracing::debug;

use crate::filter::DataFilter;

struct Inner<F> {
    filter: F,
    open_handles: usize,
}

/// A reference-counted handle to a filter behind a mutex.
///
/// Every clone is an independent handle that can sit at the end of a
/// different chain. The lock is held for one `receive`, so the wrapped
/// filter sees one value at a time. Closing a handle closes only that
/// handle; the wrapped filter closes with the last one.
pub struct SharedFilter<F> {
    name: String,
    inner: Arc<Mutex<Inner<F>>>,
    closed: bool,
}

impl<F> SharedFilter<F> {
    pub fn new<T>(filter: F) -> Self
    where
        F: DataFilter<T>,
    {
        Self {
            name: filter.name().to_string(),
            inner: Arc::new(Mutex::new(Inner {
                filter,
                open_handles: 1,
            })),
            closed: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<F>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles still open, this one included.
    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    /// A closed handle that does not count towards `open_handles`.
    ///
    /// Its clones are ordinary open handles, so it can be kept by code that
    /// hands out new handles later without keeping the wrapped filter alive.
    pub fn factory(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: Arc::clone(&self.inner),
            closed: true,
        }
    }

    /// Run `f` against the wrapped filter under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut F) -> R) -> R {
        f(&mut self.lock().filter)
    }
}

impl<F> Clone for SharedFilter<F> {
    fn clone(&self) -> Self {
        self.lock().open_handles += 1;
        Self {
            name: self.name.clone(),
            inner: Arc::clone(&self.inner),
            closed: false,
        }
    }
}

impl<T, F: DataFilter<T>> DataFilter<T> for SharedFilter<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        if self.closed {
            return Err(RoverError::ContractViolation(format!(
                "receive on closed handle of '{}'",
                self.name
            )));
        }
        self.lock().filter.receive(data)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut inner = self.lock();
        inner.open_handles = inner.open_handles.saturating_sub(1);
        if inner.open_handles == 0 {
            inner.filter.close();
            debug!(filter = %self.name, "last shared handle closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed || self.lock().filter.is_closed()
    }
}
