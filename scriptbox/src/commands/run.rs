//! `scriptbox run`: execute a script file against optional JSON datasets.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use scriptbox_sandbox::capability::{registry_entry, Catalog};
use scriptbox_sandbox::{
    CapabilityBindings, ExecutionHost, ExecutionOutcome, ExecutionReport, ExecutionRequest,
    HostOptions, IsolationPolicy, ResourceLimits,
};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub datasets: Vec<String>,
    pub bind_as: String,
    pub timeout: Option<u64>,
    pub max_memory: Option<u64>,
    pub max_cpu: Option<u64>,
    pub isolation: Option<String>,
    pub hard_memory: bool,
}

pub fn run_script(script: &str, options: &RunOptions) -> Result<ExecutionReport> {
    let source = super::read_source(script)?;
    let bindings = load_bindings(&options.datasets, &options.bind_as)?;
    let limits = ResourceLimits::from_env().with_cli_overrides(
        options.timeout,
        options.max_memory,
        options.max_cpu,
    );
    let request = ExecutionRequest::new(source, bindings, limits)?;

    let mut host_options = HostOptions::from_env();
    if let Some(policy) = &options.isolation {
        host_options.policy = policy.parse::<IsolationPolicy>()?;
    }
    host_options.hard_memory |= options.hard_memory;

    tracing::debug!(
        script = %script,
        policy = %host_options.policy,
        hard_memory = host_options.hard_memory,
        "Running script"
    );
    Ok(ExecutionHost::new(host_options).submit_detailed(request))
}

/// Process exit code for an outcome: 0 success, 2 rejected, 1 otherwise.
pub fn exit_code(outcome: &ExecutionOutcome) -> i32 {
    match outcome {
        ExecutionOutcome::Success { .. } => 0,
        ExecutionOutcome::ValidationRejected { .. } => 2,
        _ => 1,
    }
}

/// Split `NAME=PATH`.
fn parse_dataset(spec: &str) -> Result<(String, PathBuf)> {
    let (name, path) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("dataset must be NAME=PATH, got '{}'", spec))?;
    let name = name.trim();
    if name.is_empty() || path.trim().is_empty() {
        bail!("dataset must be NAME=PATH, got '{}'", spec);
    }
    Ok((name.to_string(), PathBuf::from(path.trim())))
}

/// Load every dataset into one catalog bound as `bind_as`. No datasets, no
/// binding.
fn load_bindings(datasets: &[String], bind_as: &str) -> Result<CapabilityBindings> {
    if datasets.is_empty() {
        return Ok(CapabilityBindings::new());
    }
    if registry_entry(bind_as).is_none() {
        bail!("'{}' is not a registered capability name", bind_as);
    }
    let mut catalog = Catalog::new();
    for spec in datasets {
        let (name, path) = parse_dataset(spec)?;
        catalog
            .load_json_file(&name, &path)
            .with_context(|| format!("failed to load dataset '{}'", name))?;
        tracing::debug!(dataset = %name, path = %path.display(), "Loaded dataset");
    }
    Ok(CapabilityBindings::new().with(bind_as, Arc::new(catalog))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptbox_sandbox::Value;
    use std::fs;

    fn options(datasets: Vec<String>) -> RunOptions {
        RunOptions {
            datasets,
            bind_as: "pl".to_string(),
            isolation: Some("in-process".to_string()),
            timeout: Some(10),
            ..RunOptions::default()
        }
    }

    #[test]
    fn test_parse_dataset() {
        let (name, path) = parse_dataset("sales=data/sales.json").unwrap();
        assert_eq!(name, "sales");
        assert_eq!(path, PathBuf::from("data/sales.json"));
        assert!(parse_dataset("sales").is_err());
        assert!(parse_dataset("=x.json").is_err());
        assert!(parse_dataset("sales=").is_err());
    }

    #[test]
    fn test_unknown_binding_name() {
        let err = load_bindings(&["t=x.json".to_string()], "numpy").unwrap_err();
        assert!(err.to_string().contains("not a registered capability name"));
    }

    #[test]
    fn test_run_script_with_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("sales.json");
        fs::write(
            &data,
            r#"[{"region": "north", "amount": 10}, {"region": "south", "amount": 5}]"#,
        )
        .unwrap();
        let script = dir.path().join("report.py");
        fs::write(&script, "result = pl.count('sales')\n").unwrap();

        let report = run_script(
            script.to_str().unwrap(),
            &options(vec![format!("sales={}", data.display())]),
        )
        .unwrap();
        assert_eq!(report.outcome.value(), Some(&Value::Int(2)));
        assert_eq!(exit_code(&report.outcome), 0);
    }

    #[test]
    fn test_run_rejected_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("bad.py");
        fs::write(&script, "import subprocess\n").unwrap();
        let report = run_script(script.to_str().unwrap(), &options(vec![])).unwrap();
        assert_eq!(exit_code(&report.outcome), 2);
    }

    #[test]
    fn test_missing_inputs_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_script(
            dir.path().join("nope.py").to_str().unwrap(),
            &options(vec![])
        )
        .is_err());

        let script = dir.path().join("ok.py");
        fs::write(&script, "result = 1\n").unwrap();
        let err = run_script(
            script.to_str().unwrap(),
            &options(vec![format!("t={}", dir.path().join("missing.json").display())]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to load dataset 't'"));
    }

    #[test]
    fn test_zero_limit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ok.py");
        fs::write(&script, "result = 1\n").unwrap();
        let mut opts = options(vec![]);
        opts.max_memory = Some(0);
        assert!(run_script(script.to_str().unwrap(), &opts).is_err());
    }
}
