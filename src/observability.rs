use biometrics::{Collector, Counter, Moments};

pub(crate) static SESSION_REQUESTS: Counter = Counter::new("revchat.session.requests");
pub(crate) static SESSION_REQUEST_ERRORS: Counter =
    Counter::new("revchat.session.request_errors");
pub(crate) static SESSION_REQUEST_DURATION: Moments =
    Moments::new("revchat.session.request_duration_seconds");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("revchat.stream.events");
pub(crate) static STREAM_SKIPPED_LINES: Counter = Counter::new("revchat.stream.skipped_lines");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("revchat.stream.errors");
pub(crate) static STREAM_CANCELLED: Counter = Counter::new("revchat.stream.cancelled");
pub(crate) static STREAM_DURATION: Moments = Moments::new("revchat.stream.duration_seconds");

pub(crate) static STATE_COMMITS: Counter = Counter::new("revchat.state.commits");
pub(crate) static STATE_LOOKUPS: Counter = Counter::new("revchat.state.lookups");
pub(crate) static STATE_ROLLBACKS: Counter = Counter::new("revchat.state.rollbacks");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SESSION_REQUESTS);
    collector.register_counter(&SESSION_REQUEST_ERRORS);
    collector.register_moments(&SESSION_REQUEST_DURATION);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_SKIPPED_LINES);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_CANCELLED);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&STATE_COMMITS);
    collector.register_counter(&STATE_LOOKUPS);
    collector.register_counter(&STATE_ROLLBACKS);
}
