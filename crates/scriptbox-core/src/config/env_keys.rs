//! Environment variable key constants.

/// Execution limits and isolation
pub mod sandbox {
    pub const SCRIPTBOX_TIMEOUT_SECS: &str = "SCRIPTBOX_TIMEOUT_SECS";
    pub const SCRIPTBOX_MAX_MEMORY_MB: &str = "SCRIPTBOX_MAX_MEMORY_MB";
    pub const SCRIPTBOX_MAX_CPU_SECS: &str = "SCRIPTBOX_MAX_CPU_SECS";

    /// Isolation policy: "auto" (default), "in-process", "subprocess".
    pub const SCRIPTBOX_ISOLATION: &str = "SCRIPTBOX_ISOLATION";

    /// Require OS-enforced memory limits (forces the subprocess strategy under "auto").
    pub const SCRIPTBOX_HARD_MEMORY: &str = "SCRIPTBOX_HARD_MEMORY";

    pub const SCRIPTBOX_MAX_INPUT_CHARS: &str = "SCRIPTBOX_MAX_INPUT_CHARS";
}

/// Logging and audit
pub mod observability {
    pub const SCRIPTBOX_QUIET: &str = "SCRIPTBOX_QUIET";

    pub const SCRIPTBOX_LOG_LEVEL: &str = "SCRIPTBOX_LOG_LEVEL";

    pub const SCRIPTBOX_LOG_JSON: &str = "SCRIPTBOX_LOG_JSON";

    pub const SCRIPTBOX_AUDIT_LOG: &str = "SCRIPTBOX_AUDIT_LOG";

    pub const SCRIPTBOX_SECURITY_EVENTS_LOG: &str = "SCRIPTBOX_SECURITY_EVENTS_LOG";
}
