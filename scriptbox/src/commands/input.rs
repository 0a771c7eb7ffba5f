//! `scriptbox check-input`: pre-filter raw user text.

use anyhow::Result;
use scriptbox_sandbox::{check_user_input, ValidationVerdict};

pub fn check_input(text: &str) -> Result<ValidationVerdict> {
    let text = if text == "-" {
        super::read_source(text)?
    } else {
        text.to_string()
    };
    Ok(check_user_input(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_input() {
        assert!(check_input("average price per district").unwrap().accepted);
        assert!(!check_input("run exec(payload)").unwrap().accepted);
    }
}
