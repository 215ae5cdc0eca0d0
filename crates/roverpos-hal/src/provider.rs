//! The [`DataProvider`] contract.

use std::time::Duration;

use roverpos_types::{RoverError, TimestampedValue};

/// A blocking source of timestamped samples.
///
/// The polling loop calls [`poll`](Self::poll) with a short timeout so it
/// can notice shutdown requests, then [`get`](Self::get) once data is
/// available.
pub trait DataProvider<T>: Send {
    /// Stable identifier used in logs, e.g. `"imu"`.
    fn id(&self) -> &str;

    /// `true` iff a sample is available within `timeout`. Never consumes.
    fn poll(&mut self, timeout: Duration) -> bool;

    /// Block until the next sample is available and return it.
    ///
    /// # Errors
    ///
    /// - [`RoverError::Io`] when the underlying device or file fails.
    /// - [`RoverError::Validation`] when a single sample is malformed; the
    ///   provider stays usable.
    fn get(&mut self) -> Result<TimestampedValue<T>, RoverError>;

    /// Release the underlying device or file. Idempotent.
    fn close(&mut self);

    /// `true` once the source can never produce another sample (a replay
    /// that reached end of file). Live sources never exhaust.
    fn is_exhausted(&self) -> bool {
        false
    }
}

impl<T, P: DataProvider<T> + ?Sized> DataProvider<T> for Box<P> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        (**self).poll(timeout)
    }

    fn get(&mut self) -> Result<TimestampedValue<T>, RoverError> {
        (**self).get()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}
