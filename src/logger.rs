//! Logging hooks for session operations.
//!
//! A [`Session`](crate::Session) reports through an injected [`SessionLogger`]
//! rather than any process-wide state.  Every public session operation passes
//! through [`instrument`], so entry, exit, timing and failures are reported the
//! same way for all of them.  The hosting application decides where the
//! records go; [`TracingLogger`] forwards them to `tracing` and the host
//! installs the subscriber.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::observability::{SESSION_REQUEST_DURATION, SESSION_REQUEST_ERRORS, SESSION_REQUESTS};
use crate::types::StreamEvent;

/// A trait for logging session operations.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Mutex;
/// use std::time::Duration;
/// use revchat::{Error, SessionLogger, StreamEvent};
///
/// #[derive(Default)]
/// struct Tally {
///     failures: Mutex<Vec<String>>,
/// }
///
/// impl SessionLogger for Tally {
///     fn operation_started(&self, _: &str, _: &str) {}
///
///     fn operation_finished(&self, operation: &str, _: Duration, error: Option<&Error>) {
///         if let Some(error) = error {
///             self.failures.lock().unwrap().push(format!("{operation}: {error}"));
///         }
///     }
///
///     fn stream_event(&self, _: &StreamEvent) {}
///
///     fn skipped_line(&self, _: &str, _: &str) {}
/// }
/// ```
pub trait SessionLogger: Send + Sync {
    /// Called when an operation begins.  `detail` describes its arguments.
    fn operation_started(&self, operation: &str, detail: &str);

    /// Called when an operation ends, with its outcome.
    ///
    /// For `ask` this fires once the request is accepted; the answer stream
    /// reports its own end as the `ask_stream` operation.
    fn operation_finished(&self, operation: &str, elapsed: Duration, error: Option<&Error>);

    /// Called instead of `operation_finished` when the caller abandons an
    /// operation, e.g. drops an answer stream before its end.
    fn operation_cancelled(&self, operation: &str, elapsed: Duration) {
        let _ = (operation, elapsed);
    }

    /// Called for each event decoded from an answer stream.
    fn stream_event(&self, event: &StreamEvent);

    /// Called when a stream line is dropped because it is not JSON.
    fn skipped_line(&self, line: &str, reason: &str);
}

/// Forwards session records to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl SessionLogger for TracingLogger {
    fn operation_started(&self, operation: &str, detail: &str) {
        tracing::info!(operation, detail, "entering");
    }

    fn operation_finished(&self, operation: &str, elapsed: Duration, error: Option<&Error>) {
        let elapsed = elapsed.as_secs_f64();
        match error {
            Some(error) => tracing::error!(operation, elapsed, %error, "failed"),
            None => tracing::info!(operation, elapsed, "exiting"),
        }
    }

    fn operation_cancelled(&self, operation: &str, elapsed: Duration) {
        tracing::warn!(operation, elapsed = elapsed.as_secs_f64(), "cancelled");
    }

    fn stream_event(&self, event: &StreamEvent) {
        tracing::debug!(
            conversation_id = %event.conversation_id,
            parent_id = %event.parent_id,
            len = event.message_text.len(),
            "received message"
        );
    }

    fn skipped_line(&self, line: &str, reason: &str) {
        tracing::warn!(line, reason, "skipping stream line");
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl SessionLogger for NoopLogger {
    fn operation_started(&self, _: &str, _: &str) {}

    fn operation_finished(&self, _: &str, _: Duration, _: Option<&Error>) {}

    fn stream_event(&self, _: &StreamEvent) {}

    fn skipped_line(&self, _: &str, _: &str) {}
}

/// Run `operation` with entry/exit logging, timing and request metrics.
pub(crate) async fn instrument<R, F>(
    logger: &dyn SessionLogger,
    operation: &'static str,
    detail: &str,
    fut: F,
) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    logger.operation_started(operation, detail);
    SESSION_REQUESTS.click();
    let started = Instant::now();
    let result = fut.await;
    finish(logger, operation, started, result)
}

/// [`instrument`] for operations that never touch the network.
pub(crate) fn instrument_sync<R>(
    logger: &dyn SessionLogger,
    operation: &'static str,
    detail: &str,
    f: impl FnOnce() -> Result<R>,
) -> Result<R> {
    logger.operation_started(operation, detail);
    SESSION_REQUESTS.click();
    let started = Instant::now();
    let result = f();
    finish(logger, operation, started, result)
}

fn finish<R>(
    logger: &dyn SessionLogger,
    operation: &'static str,
    started: Instant,
    result: Result<R>,
) -> Result<R> {
    let elapsed = started.elapsed();
    SESSION_REQUEST_DURATION.add(elapsed.as_secs_f64());
    if result.is_err() {
        SESSION_REQUEST_ERRORS.click();
    }
    logger.operation_finished(operation, elapsed, result.as_ref().err());
    result
}
