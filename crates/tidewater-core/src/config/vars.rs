//! Environment variable interpolation for config files.
//!
//! Supported syntax:
//! - `$VAR` or `${VAR}`: substitute the value, error if unset
//! - `${VAR:-default}`: use default if VAR is unset OR empty
//! - `${VAR-default}`: use default only if VAR is unset (empty is kept)
//! - `$$`: literal `$`
//!
//! Connection strings and warehouse credentials usually arrive this way, so
//! values containing newlines are rejected to keep a variable from injecting
//! extra YAML keys.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::error::{ConfigError, EnvInterpolationSnafu};

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # escaped dollar
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # 1: braced name
            (?:
                (:?-)                  # 2: default operator
                ([^}]*)                # 3: default value
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # 4: bare name
        ",
    )
    .expect("interpolation pattern is valid")
});

/// Interpolate variables from the process environment.
///
/// Every missing or invalid variable is reported in one error so a broken
/// deployment can be fixed in a single pass.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate variables using an arbitrary lookup.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "$$" {
            return "$".to_string();
        }

        let name = caps
            .get(1)
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let operator = caps.get(2).map(|m| m.as_str());
        let default = caps.get(3).map(|m| m.as_str());

        match lookup(name) {
            Some(value) if value.contains('\n') || value.contains('\r') => {
                errors.push(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
                whole.to_string()
            }
            Some(value) if value.is_empty() && operator == Some(":-") => {
                default.unwrap_or_default().to_string()
            }
            Some(value) => value,
            None => match default {
                Some(default) => default.to_string(),
                None => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    whole.to_string()
                }
            },
        }
    });

    if errors.is_empty() {
        Ok(text.into_owned())
    } else {
        EnvInterpolationSnafu {
            message: errors.join("\n"),
        }
        .fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn render(input: &str, vars: &[(&str, &str)]) -> Result<String, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        interpolate_with(input, |name| vars.get(name).cloned())
    }

    #[test]
    fn test_braced_and_bare_variables() {
        let out = render(
            "url: postgres://${PG_USER}@$PG_HOST:5432/bank",
            &[("PG_USER", "etl"), ("PG_HOST", "db.internal")],
        )
        .unwrap();
        assert_eq!(out, "url: postgres://etl@db.internal:5432/bank");
    }

    #[test]
    fn test_colon_default_applies_to_empty_values() {
        let out = render("port: ${RS_PORT:-5439}", &[("RS_PORT", "")]).unwrap();
        assert_eq!(out, "port: 5439");
    }

    #[test]
    fn test_dash_default_keeps_empty_values() {
        let out = render("token: '${TOKEN-none}'", &[("TOKEN", "")]).unwrap();
        assert_eq!(out, "token: ''");

        let out = render("token: '${TOKEN-none}'", &[]).unwrap();
        assert_eq!(out, "token: 'none'");
    }

    #[test]
    fn test_escaped_dollar() {
        let out = render("password: pa$$word", &[]).unwrap();
        assert_eq!(out, "password: pa$word");
    }

    #[test]
    fn test_all_missing_variables_are_reported() {
        let err = render("a: ${FIRST}\nb: $SECOND", &[]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'FIRST' is not set"));
        assert!(message.contains("'SECOND' is not set"));
    }

    #[test]
    fn test_newline_injection_rejected() {
        let err = render("secret: ${SECRET}", &[("SECRET", "x\nextra: true")]).unwrap_err();
        assert!(err.to_string().contains("contains newlines"));
    }

    #[test]
    fn test_process_environment_lookup() {
        // PATH is set in every test environment we run under.
        let out = interpolate("path: ${PATH}").unwrap();
        assert!(!out.contains("${PATH}"));
    }
}
