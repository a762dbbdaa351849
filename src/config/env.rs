//! `${NAME}` / `${NAME:-default}` substitution in configuration strings

use super::ConfigError;

/// Replace variable references in `text` using the process environment
pub fn substitute_env_vars(text: &str) -> Result<String, ConfigError> {
    substitute_with(text, |name| std::env::var(name).ok())
}

/// Replace variable references in `text`, resolving names through `lookup`.
///
/// `${NAME}` requires the variable to be set. `${NAME:-default}` falls back
/// to `default` when it is unset. Anything that is not a well-formed
/// reference is copied through unchanged.
pub fn substitute_with<F>(text: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let inner = &after[..end];
        let (name, default) = match inner.find(":-") {
            Some(split) => (&inner[..split], Some(&inner[split + 2..])),
            None => (inner, None),
        };

        if name.is_empty() || name.contains(':') {
            // Not a reference; keep the literal and continue after `${`
            out.push_str("${");
            rest = after;
            continue;
        }

        match (lookup(name), default) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => return Err(ConfigError::MissingVariable(name.to_string())),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
