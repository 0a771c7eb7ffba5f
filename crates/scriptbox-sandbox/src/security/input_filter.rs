//! Pre-filter for the raw user request, applied before any code is generated.
//!
//! Heuristic only: the static validator stays authoritative for scripts.

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

use super::rules::SUSPICIOUS_INPUT_PATTERNS;
use super::types::ValidationVerdict;
use scriptbox_core::config::schema::DEFAULT_MAX_INPUT_CHARS;

static PATTERN_RES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

/// One regex per suspicious literal, tolerating whitespace around `(` and `.`.
fn pattern_regexes() -> &'static [(&'static str, Regex)] {
    PATTERN_RES.get_or_init(|| {
        SUSPICIOUS_INPUT_PATTERNS
            .iter()
            .filter_map(|pattern| match pattern_regex(pattern) {
                Ok(re) => Some((*pattern, re)),
                Err(e) => {
                    tracing::error!(pattern = %pattern, error = %e, "Skipping input pattern");
                    None
                }
            })
            .collect()
    })
}

fn pattern_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::new();
    for c in pattern.chars() {
        match c {
            '(' => re.push_str(r"\s*\("),
            '.' => re.push_str(r"\s*\.\s*"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    Regex::new(&re)
}

/// Checks `text` with the default length cap.
pub fn check_input(text: &str) -> ValidationVerdict {
    check_input_with_limit(text, DEFAULT_MAX_INPUT_CHARS)
}

/// Checks `text`, rejecting it when longer than `max_chars` characters.
pub fn check_input_with_limit(text: &str, max_chars: usize) -> ValidationVerdict {
    if text.trim().is_empty() {
        return ValidationVerdict::rejected("Input cannot be empty");
    }
    if text.chars().count() > max_chars {
        return ValidationVerdict::rejected(format!(
            "Input is too long (max {} characters)",
            max_chars
        ));
    }
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    for (pattern, re) in pattern_regexes() {
        if re.is_match(&normalized) {
            tracing::warn!(pattern = %pattern, "Suspicious pattern detected in user input");
            return ValidationVerdict::rejected(format!(
                "Input contains potentially dangerous pattern: '{}'",
                pattern
            ));
        }
    }
    ValidationVerdict::accepted()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(text: &str) -> Option<String> {
        check_input(text).reason
    }

    #[test]
    fn test_ordinary_requests_pass() {
        assert!(check_input("Show the average population per city as a bar chart").accepted);
        assert!(check_input("evaluate the exec summary").accepted);
    }

    #[test]
    fn test_every_pattern_compiles() {
        assert_eq!(pattern_regexes().len(), SUSPICIOUS_INPUT_PATTERNS.len());
        assert!(pattern_regex("os.system").unwrap().is_match("os . system"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(reason(""), Some("Input cannot be empty".to_string()));
        assert_eq!(reason(" \n\t "), Some("Input cannot be empty".to_string()));
    }

    #[test]
    fn test_length_cap_counts_characters() {
        let at_limit = "é".repeat(10_000);
        assert!(check_input(&at_limit).accepted);
        assert_eq!(
            reason(&"a".repeat(10_001)),
            Some("Input is too long (max 10000 characters)".to_string())
        );
        assert_eq!(
            check_input_with_limit("hello", 3).reason,
            Some("Input is too long (max 3 characters)".to_string())
        );
    }

    #[test]
    fn test_suspicious_patterns() {
        assert_eq!(
            reason("please run eval('2+2')"),
            Some("Input contains potentially dangerous pattern: 'eval('".to_string())
        );
        assert_eq!(
            reason("call os.system on it"),
            Some("Input contains potentially dangerous pattern: 'os.system'".to_string())
        );
        assert_eq!(
            reason("use __import__ please"),
            Some("Input contains potentially dangerous pattern: '__import__'".to_string())
        );
    }

    #[test]
    fn test_matching_is_case_and_spacing_insensitive() {
        assert!(!check_input("EXEC (code)").accepted);
        assert!(!check_input("Subprocess . run").accepted);
        assert!(!check_input("os .popen('ls')").accepted);
    }

    #[test]
    fn test_fullwidth_forms_are_normalized() {
        // Fullwidth "ｅｖａｌ（" folds to "eval(" under NFKC.
        assert!(!check_input("ｅｖａｌ（1）").accepted);
    }
}
