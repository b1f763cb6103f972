//! Environment variable expansion for config files.
//!
//! Recognized forms:
//! - `$VAR` / `${VAR}`: value of VAR, error when unset
//! - `${VAR:-fallback}`: fallback when VAR is unset or empty
//! - `${VAR-fallback}`: fallback only when VAR is unset
//! - `$$`: a literal `$`

use std::env;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::ConfigError;

static VAR_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{ (?P<braced>[A-Za-z_][A-Za-z0-9_]*) (?: (?P<op>:?-) (?P<fallback>[^}]*) )? \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("variable reference pattern is valid")
});

/// Expand every variable reference in `input`.
///
/// All unresolved references are reported together so a config author sees
/// the full list of missing variables in one run.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    let mut problems = Vec::new();

    let expanded = VAR_REFERENCE.replace_all(input, |caps: &Captures| match expand(caps) {
        Ok(value) => value,
        Err(problem) => {
            problems.push(problem);
            caps[0].to_string()
        }
    });

    if problems.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(ConfigError::EnvInterpolation {
            message: problems.join("\n"),
        })
    }
}

fn expand(caps: &Captures) -> Result<String, String> {
    if &caps[0] == "$$" {
        return Ok("$".to_string());
    }

    let name = caps
        .name("braced")
        .or_else(|| caps.name("bare"))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let empty_counts_as_unset = caps.name("op").is_some_and(|op| op.as_str() == ":-");
    let fallback = caps.name("fallback").map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        Ok(value) if value.is_empty() && empty_counts_as_unset => {
            Ok(fallback.unwrap_or_default().to_string())
        }
        Ok(value) => Ok(value),
        Err(_) => fallback
            .map(str::to_string)
            .ok_or_else(|| format!("environment variable '{name}' is not set")),
    }
}
