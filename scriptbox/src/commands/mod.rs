//! CLI commands. Each returns plain data; `main` prints it as JSON.
//!
//!   run         — validate + execute a script file against optional datasets
//!   validate    — static validation only
//!   input       — pre-filter for raw user text

pub mod input;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use std::io::Read;

/// Read a script or text argument; "-" means stdin.
pub(crate) fn read_source(path: &str) -> Result<String> {
    if path == "-" {
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .context("failed to read stdin")?;
        return Ok(s);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read script {}", path))
}
