//! Observability subsystem
//!
//! - Structured logging (JSON)
//! - Typed lifecycle events
//! - Bulk pool counters
//!
//! Observability is read-only: nothing here feeds back into scheduling
//! or admission decisions.
//!
//! # Usage
//!
//! ```ignore
//! use aerotx::observability::{log_event_with_fields, Event, Logger, Severity};
//!
//! Logger::set_min_severity(Severity::Trace);
//! log_event_with_fields(Event::BulkRunBegin, &[("workers", "8")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{BulkMetrics, MetricsSnapshot};

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

/// Whether `event` would currently be written
///
/// Used to skip field formatting for silent trace events.
pub fn event_enabled(event: Event) -> bool {
    Logger::enabled(event.severity())
}
