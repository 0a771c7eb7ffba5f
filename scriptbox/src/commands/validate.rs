//! `scriptbox validate`: static validation only; nothing is executed.

use anyhow::Result;
use scriptbox_sandbox::security;
use scriptbox_sandbox::ValidationVerdict;

pub fn validate_script(script: &str) -> Result<ValidationVerdict> {
    let source = super::read_source(script)?;
    let verdict = security::validate(&source);
    if let Some(reason) = &verdict.reason {
        tracing::info!(script = %script, reason = %reason, "Script rejected");
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok.py");
        std::fs::write(&ok, "result = [x for x in range(3)]\n").unwrap();
        assert!(validate_script(ok.to_str().unwrap()).unwrap().accepted);

        let bad = dir.path().join("bad.py");
        std::fs::write(&bad, "x = open('/etc/passwd')\n").unwrap();
        let verdict = validate_script(bad.to_str().unwrap()).unwrap();
        assert_eq!(
            verdict.reason.as_deref(),
            Some("Call to 'open' is not allowed for security reasons")
        );
    }
}
