//! Quiet-mode aware logging. When SCRIPTBOX_QUIET=1 (e.g. embedded in a chat
//! backend or a benchmark), suppress info-level host messages.
//! Uses `tracing::info!` so output is captured by the tracing subscriber.

#[macro_export]
macro_rules! info_log {
    ($($arg:tt)*) => {{
        if !$crate::log::is_quiet() {
            tracing::info!($($arg)*);
        }
    }};
}

pub fn is_quiet() -> bool {
    scriptbox_core::config::ObservabilityConfig::from_env().quiet
}
