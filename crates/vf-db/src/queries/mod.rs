//! Database query modules.

pub mod jobs;
pub mod videos;

use chrono::{DateTime, SecondsFormat, Utc};
use vf_core::VideoStatus;

/// Timestamp format used for every stored time.
///
/// Fixed-width so `scheduled_for <= ?` comparisons order correctly as text.
pub(crate) fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now() -> String {
    timestamp(Utc::now())
}

/// Render `statuses` as the body of a SQL `IN (...)` list.
///
/// Values come from [`VideoStatus::as_str`], never from user input.
pub(crate) fn status_list(statuses: &[VideoStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}
