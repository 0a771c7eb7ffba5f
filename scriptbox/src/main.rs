mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

use scriptbox_core::config::load_dotenv;
use scriptbox_core::observability;

fn main() -> Result<()> {
    load_dotenv();
    observability::init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            script,
            datasets,
            bind_as,
            timeout,
            max_memory,
            max_cpu,
            isolation,
            hard_memory,
            audit_log,
        } => {
            if audit_log.is_some() {
                observability::set_audit_log_path(audit_log);
            }
            let options = commands::run::RunOptions {
                datasets,
                bind_as,
                timeout,
                max_memory,
                max_cpu,
                isolation,
                hard_memory,
            };
            let report = commands::run::run_script(&script, &options)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            commands::run::exit_code(&report.outcome)
        }
        Commands::Validate { script } => {
            let verdict = commands::validate::validate_script(&script)?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if verdict.accepted {
                0
            } else {
                2
            }
        }
        Commands::CheckInput { text } => {
            let verdict = commands::input::check_input(&text)?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if verdict.accepted {
                0
            } else {
                2
            }
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
