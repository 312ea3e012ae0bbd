// Environment variable loading

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;

/// Prefix used for Trellis settings in the environment
pub const DEFAULT_PREFIX: &str = "TRELLIS";

/// Environment variable loader.
///
/// With a prefix, only `PREFIX_*` variables are read and the prefix is
/// stripped. Keys are lowercased and a double underscore separates sections,
/// so `TRELLIS_SERVER__PORT` becomes `server.port`.
#[derive(Debug, Clone, Default)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Loader for `TRELLIS_*` variables
    pub fn trellis() -> Self {
        Self::new(Some(DEFAULT_PREFIX.to_string()))
    }

    /// Load matching variables from the process environment
    pub fn load(&self) -> Result<HashMap<String, String>> {
        Ok(self.load_from(env::vars()))
    }

    /// Load matching variables from an explicit set of pairs
    pub fn load_from<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| self.config_key(&key).map(|key| (key, value)))
            .collect()
    }

    fn config_key(&self, var: &str) -> Option<String> {
        let key = match &self.prefix {
            Some(prefix) => var.strip_prefix(prefix.as_str())?.strip_prefix('_')?,
            None => var,
        };
        if key.is_empty() {
            return None;
        }
        Some(key.to_lowercase().replace("__", "."))
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };

        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_prefix_and_sections() {
        let loader = EnvLoader::trellis();
        let loaded = loader.load_from(vars(&[
            ("TRELLIS_SERVER__PORT", "9000"),
            ("TRELLIS_CONTAINER__AUTOWIRE_SINGLE_IMPL", "false"),
            ("TRELLISX_IGNORED", "1"),
            ("PATH", "/usr/bin"),
        ]));

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("server.port"), Some(&"9000".to_string()));
        assert_eq!(
            loaded.get("container.autowire_single_impl"),
            Some(&"false".to_string())
        );
    }

    #[test]
    fn test_without_prefix() {
        let loader = EnvLoader::default();
        let loaded = loader.load_from(vars(&[("HOME", "/root")]));
        assert_eq!(loaded.get("home"), Some(&"/root".to_string()));
    }

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::new(None);
        assert_eq!(loader.load_var_or("NONEXISTENT_VAR_12345", "default"), "default");
    }

    #[test]
    fn test_env_loader_missing_var() {
        let loader = EnvLoader::trellis();
        assert!(loader.load_var("MISSING_VAR_67890").is_err());
    }
}
