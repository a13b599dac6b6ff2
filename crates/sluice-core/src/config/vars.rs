//! Environment variable interpolation for config files.
//!
//! Supports the following syntax:
//! - `$VAR` or `${VAR}` - substitute with env var value, error if missing
//! - `${VAR:-default}` - use default if VAR is unset OR empty
//! - `${VAR-default}` - use default only if VAR is unset (empty is OK)
//! - `$$` - escape sequence for literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # escaped dollar
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # 1: braced name
            (?:(:?-)([^}]*))?          # 2: default operator, 3: default value
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # 4: bare name
        ",
    )
    .expect("Invalid regex pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Any errors encountered during interpolation.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    /// Returns true if there were no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
///
/// All errors are accumulated so every missing variable is reported at once.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| match resolve(caps) {
            Ok(value) => value,
            Err(message) => {
                errors.push(message);
                caps[0].to_string()
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(caps: &Captures) -> Result<String, String> {
    if &caps[0] == "$$" {
        return Ok("$".to_string());
    }

    let name = caps
        .get(1)
        .or_else(|| caps.get(4))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let operator = caps.get(2).map(|m| m.as_str());
    let default = caps.get(3).map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains('\n') || value.contains('\r') => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        Ok(value) if value.is_empty() && operator == Some(":-") => {
            Ok(default.unwrap_or_default().to_string())
        }
        Ok(value) => Ok(value),
        Err(_) => default
            .map(str::to_string)
            .ok_or_else(|| format!("environment variable '{name}' is not set")),
    }
}
