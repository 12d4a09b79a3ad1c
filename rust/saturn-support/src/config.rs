// saturn-support: generic TOML-plus-environment configuration loading.
//
// Any binary in the fleet (worker, autoscaler) loads a TOML file and then
// lets `SATURN_<KEY>`-style environment variables override individual
// top-level settings, mirroring the layered file/env convention used
// throughout the rest of the fleet's tooling.

use crate::error::{SupportError, SupportResult};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::env;

/// Load and parse a TOML config file into `T`.
pub fn load_toml<T: DeserializeOwned>(path: &str) -> SupportResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SupportError::Config(format!("failed to read {}: {}", path, e)))?;
    toml::from_str(&content)
        .map_err(|e| SupportError::Config(format!("failed to parse {}: {}", path, e)))
}

/// Collect every environment variable with the given prefix (e.g.
/// `SATURN_`), stripped of the prefix and lowercased, for callers that
/// want to splice overrides into a config struct field by field.
pub fn env_overrides(prefix: &str) -> BTreeMap<String, String> {
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .map(|rest| (rest.to_lowercase(), value))
        })
        .collect()
}

/// Read a single environment variable, falling back to `default` when unset
/// or unparsable. Used for the handful of top-level settings (worker id,
/// bind address, ...) that don't warrant a whole config file.
pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_strips_prefix_and_lowercases() {
        env::set_var("SATURN_MAX_CONCURRENT_TASKS", "10");
        let overrides = env_overrides("SATURN_");
        assert_eq!(
            overrides.get("max_concurrent_tasks"),
            Some(&"10".to_string())
        );
        env::remove_var("SATURN_MAX_CONCURRENT_TASKS");
    }

    #[test]
    fn env_or_falls_back_on_missing_var() {
        env::remove_var("SATURN_NONEXISTENT_KEY");
        let value: u32 = env_or("SATURN_NONEXISTENT_KEY", 42);
        assert_eq!(value, 42);
    }
}
