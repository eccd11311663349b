//! Logging for the read path.
//!
//! All events use `tracing` with target "tablet_scan" and carry an `event`
//! field for filtering plus a `component` naming the emitting layer.
//!
//! The crate never initializes a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: "reader", "acquire", "segment", "convert" or "store"
//! - Use `%` for Display, `?` for Debug formatting
//! - Per-row events are never logged; per-segment events go to debug

/// Target for all read-path log events.
pub(crate) const SCAN_TARGET: &str = "tablet_scan";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "reader",
///     event = "reader_init",
///     tablet = config.tablet(),
///     producers = producers.len(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::SCAN_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::SCAN_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::SCAN_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_warn;
