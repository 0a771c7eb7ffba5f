//! Typed configuration structs, grouped by concern.
//!
//! Loaded from environment variables with a single fallback logic.

use super::env_keys::{observability as obv_keys, sandbox as sb_keys};
use super::loader::{env_bool, env_optional, env_or, env_parse};

/// Default wall-clock timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default memory ceiling in MB
pub const DEFAULT_MAX_MEMORY_MB: u64 = 256;

/// Default CPU-time ceiling in seconds
pub const DEFAULT_MAX_CPU_SECS: u64 = 30;

/// Default maximum length of a user request accepted by the input pre-filter
pub const DEFAULT_MAX_INPUT_CHARS: usize = 10_000;

/// Execution defaults for the sandbox host
#[derive(Debug, Clone)]
pub struct SandboxDefaults {
    pub timeout_secs: u64,
    pub max_memory_mb: u64,
    pub max_cpu_secs: u64,
    /// Raw isolation policy string; parsed by the sandbox crate.
    pub isolation: String,
    pub hard_memory: bool,
    pub max_input_chars: usize,
}

impl SandboxDefaults {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            timeout_secs: env_parse(sb_keys::SCRIPTBOX_TIMEOUT_SECS, &[])
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            max_memory_mb: env_parse(sb_keys::SCRIPTBOX_MAX_MEMORY_MB, &[])
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_MEMORY_MB),
            max_cpu_secs: env_parse(sb_keys::SCRIPTBOX_MAX_CPU_SECS, &[])
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_CPU_SECS),
            isolation: env_or(sb_keys::SCRIPTBOX_ISOLATION, &[], || "auto".to_string()),
            hard_memory: env_bool(sb_keys::SCRIPTBOX_HARD_MEMORY, &[], false),
            max_input_chars: env_parse(sb_keys::SCRIPTBOX_MAX_INPUT_CHARS, &[])
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_INPUT_CHARS),
        }
    }
}

/// Observability: quiet, log_level, log_json, audit_log, security_events_log
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
    pub security_events_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self {
                quiet: env_bool(obv_keys::SCRIPTBOX_QUIET, &[], false),
                log_level: env_or(obv_keys::SCRIPTBOX_LOG_LEVEL, &[], || {
                    "scriptbox=info".to_string()
                }),
                log_json: env_bool(obv_keys::SCRIPTBOX_LOG_JSON, &[], false),
                audit_log: env_optional(obv_keys::SCRIPTBOX_AUDIT_LOG, &[]),
                security_events_log: env_optional(obv_keys::SCRIPTBOX_SECURITY_EVENTS_LOG, &[]),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_defaults_are_positive() {
        let d = SandboxDefaults::from_env();
        assert!(d.timeout_secs > 0);
        assert!(d.max_memory_mb > 0);
        assert!(d.max_cpu_secs > 0);
        assert!(d.max_input_chars > 0);
    }
}
