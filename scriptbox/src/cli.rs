use clap::{Parser, Subcommand};

/// scriptbox - run untrusted analysis scripts in a restricted sandbox
#[derive(Parser, Debug)]
#[command(name = "scriptbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate and run a script, printing the outcome as JSON
    Run {
        /// Path to the script. Use "-" to read from stdin
        #[arg(value_name = "SCRIPT")]
        script: String,

        /// Load a JSON array of records as table NAME (repeatable)
        #[arg(long = "dataset", value_name = "NAME=PATH")]
        datasets: Vec<String>,

        /// Capability name the dataset catalog is bound to
        #[arg(long, value_name = "NAME", default_value = "pl")]
        bind_as: String,

        /// Execution timeout in seconds (default: from env or 30)
        #[arg(long)]
        timeout: Option<u64>,

        /// Maximum memory limit in MB (default: from env or 256)
        #[arg(long)]
        max_memory: Option<u64>,

        /// CPU-time limit in seconds (default: from env or 30)
        #[arg(long)]
        max_cpu: Option<u64>,

        /// Isolation policy: auto, in-process or subprocess (default: from env or auto)
        #[arg(long)]
        isolation: Option<String>,

        /// Require OS-enforced memory limits (selects the subprocess strategy under auto)
        #[arg(long, default_value = "false")]
        hard_memory: bool,

        /// Append audit records to this JSONL file
        #[arg(long, value_name = "PATH", env = "SCRIPTBOX_AUDIT_LOG")]
        audit_log: Option<String>,
    },

    /// Statically validate a script without running it
    Validate {
        /// Path to the script. Use "-" to read from stdin
        #[arg(value_name = "SCRIPT")]
        script: String,
    },

    /// Pre-filter raw user text before code is generated for it
    CheckInput {
        /// The user's request text. Use "-" to read from stdin
        #[arg(value_name = "TEXT")]
        text: String,
    },
}
