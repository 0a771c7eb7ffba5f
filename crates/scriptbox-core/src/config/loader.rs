//! Environment variable loading with a single fallback chain.

use std::env;
use std::str::FromStr;

/// Load `.env` from the current directory into the process environment
/// (existing variables are never overwritten). Runs once per process.
pub fn load_dotenv() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let path = env::current_dir()
            .map(|d| d.join(".env"))
            .unwrap_or_else(|_| std::path::PathBuf::from(".env"));
        if let Ok(content) = std::fs::read_to_string(&path) {
            for (key, value) in parse_dotenv(&content) {
                if env::var(&key).is_err() {
                    #[allow(unsafe_code)]
                    unsafe {
                        env::set_var(&key, &value);
                    }
                }
            }
        }
    });
}

/// Parse `KEY=VALUE` lines; `#` comments, blank lines and surrounding quotes are handled.
fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(eq_pos) = line.find('=') else {
            continue;
        };
        let key = line[..eq_pos].trim();
        let mut value = line[eq_pos + 1..].trim();
        // Strip inline comment (# not inside quotes)
        if let Some(hash_pos) = value.find('#') {
            let before_hash = value[..hash_pos].trim_end();
            if !before_hash.contains('"') && !before_hash.contains('\'') {
                value = before_hash;
            }
        }
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        if !key.is_empty() {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    pairs
}

/// Read the primary variable or the first set alias; fall back to `default`.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default)
}

/// Read the primary variable or an alias; empty values count as unset.
pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .and_then(|s| {
            let s = s.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        })
}

/// Boolean variable: 0/false/no/off are false, any other value is true.
pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    let v = env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()));
    match v.as_deref() {
        Some(s) => !matches!(
            s.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => default,
    }
}

/// Parse a variable into `T`; unparsable values are logged and ignored.
pub fn env_parse<T: FromStr>(primary: &str, aliases: &[&str]) -> Option<T> {
    let raw = env_optional(primary, aliases)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", primary, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(unsafe_code)]
    fn set(key: &str, value: &str) {
        unsafe { env::set_var(key, value) };
    }

    #[test]
    fn test_env_or_prefers_primary_then_alias() {
        set("SCRIPTBOX_TEST_OR_ALIAS", "from-alias");
        assert_eq!(
            env_or("SCRIPTBOX_TEST_OR_MISSING", &["SCRIPTBOX_TEST_OR_ALIAS"], || "d".into()),
            "from-alias"
        );
        set("SCRIPTBOX_TEST_OR_PRIMARY", "from-primary");
        assert_eq!(
            env_or("SCRIPTBOX_TEST_OR_PRIMARY", &["SCRIPTBOX_TEST_OR_ALIAS"], || "d".into()),
            "from-primary"
        );
        assert_eq!(env_or("SCRIPTBOX_TEST_OR_NONE", &[], || "d".into()), "d");
    }

    #[test]
    fn test_env_optional_treats_blank_as_unset() {
        set("SCRIPTBOX_TEST_BLANK", "   ");
        assert_eq!(env_optional("SCRIPTBOX_TEST_BLANK", &[]), None);
    }

    #[test]
    fn test_env_bool_values() {
        set("SCRIPTBOX_TEST_BOOL_OFF", "off");
        set("SCRIPTBOX_TEST_BOOL_ON", "yes");
        assert!(!env_bool("SCRIPTBOX_TEST_BOOL_OFF", &[], true));
        assert!(env_bool("SCRIPTBOX_TEST_BOOL_ON", &[], false));
        assert!(env_bool("SCRIPTBOX_TEST_BOOL_UNSET", &[], true));
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        set("SCRIPTBOX_TEST_PARSE_OK", "42");
        set("SCRIPTBOX_TEST_PARSE_BAD", "forty-two");
        assert_eq!(env_parse::<u64>("SCRIPTBOX_TEST_PARSE_OK", &[]), Some(42));
        assert_eq!(env_parse::<u64>("SCRIPTBOX_TEST_PARSE_BAD", &[]), None);
    }

    #[test]
    fn test_parse_dotenv_lines() {
        let pairs = parse_dotenv(
            "# comment\nA=1\nB = \"two words\"\nC=3 # trailing\n\nnot a pair\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two words".to_string()),
                ("C".to_string(), "3".to_string()),
            ]
        );
    }
}
