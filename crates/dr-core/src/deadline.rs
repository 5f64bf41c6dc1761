//! Deadline-bounded workers for calls that may hang.
//!
//! Model invocations and search-provider calls run on their own tokio task so
//! a stalled call can be abandoned without touching the caller's state. The
//! caller blocks on whichever comes first: the worker's result or the timeout.

use std::future::Future;
use std::time::Duration;

use crate::Error;

/// Result of a call raced against its deadline.
#[derive(Debug)]
pub enum Deadline<T> {
    Completed(T),
    TimedOut(Duration),
}

impl<T> Deadline<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Deadline::TimedOut(_))
    }
}

/// Run `future` on an isolated task, aborting it once `timeout` elapses.
///
/// A worker that panics or is cancelled externally surfaces as
/// [`Error::Unknown`]; a timeout is a normal [`Deadline::TimedOut`] outcome.
pub async fn run_with_deadline<F, T>(timeout: Duration, future: F) -> Result<Deadline<T>, Error>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(future);

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(value)) => Ok(Deadline::Completed(value)),
        Ok(Err(e)) => Err(Error::Unknown(format!("Worker task failed: {}", e))),
        Err(_) => {
            handle.abort();
            Ok(Deadline::TimedOut(timeout))
        }
    }
}
