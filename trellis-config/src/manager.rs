// Layered configuration store

use crate::app_config::AppConfig;
use crate::validation::Validate;
use crate::{ConfigError, ConfigLoader, EnvLoader, FileFormat, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trellis_core::logging::debug;

/// Configuration manager.
///
/// Holds one JSON value tree. Files are merged into it section by section and
/// environment variables override single keys. Keys are dotted paths such as
/// `server.port`.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    root: Arc<RwLock<Value>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            root: Arc::new(RwLock::new(Value::Object(Map::new()))),
            env_prefix: None,
        }
    }

    /// Manager reading `PREFIX_*` environment variables
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: Some(prefix.into()),
            ..Self::new()
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge a file, detecting its format from the extension
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.load_file_as(path, FileFormat::from_path(path)?)
    }

    pub fn load_file_as(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::new(format).load_file(path)?;
        debug!(path = %path.display(), format = ?format, "Loaded configuration file");
        self.merge_value(data);
        Ok(())
    }

    /// Merge an already parsed document
    pub fn merge_value(&self, data: Value) {
        deep_merge(&mut self.root.write(), data);
    }

    /// Override keys from the process environment
    pub fn load_env(&self) -> Result<()> {
        let vars = EnvLoader::new(self.env_prefix.clone()).load()?;
        self.apply_env(vars);
        Ok(())
    }

    /// Override keys from explicit `(dotted key, raw value)` pairs
    pub fn apply_env<I>(&self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut root = self.root.write();
        for (key, value) in vars {
            insert_path(&mut root, &key, parse_scalar(&value));
        }
    }

    /// Load a `.env` file into the process environment, then read it
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                // A missing .env is not an error
                dotenvy::dotenv().ok();
            }
        }
        self.load_env()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| ConfigError::SerializationError(e.to_string()))?;
        insert_path(&mut self.root.write(), key, value);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let root = self.root.read();
        let value = lookup(&root, key).ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value.clone()).map_err(|e| ConfigError::DeserializationError(format!("{}: {}", key, e)))
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        self.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        lookup(&self.root.read(), key).is_some()
    }

    /// Top-level section names, sorted
    pub fn keys(&self) -> Vec<String> {
        let root = self.root.read();
        let mut keys: Vec<String> = root
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Merge every value of `other` into this manager
    pub fn merge(&self, other: &ConfigManager) {
        let data = other.root.read().clone();
        self.merge_value(data);
    }

    /// Deserialize the whole tree
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T> {
        let root = self.root.read().clone();
        serde_json::from_value(root).map_err(|e| ConfigError::DeserializationError(e.to_string()))
    }

    /// Deserialize the whole tree and validate it
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let config: T = self.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The runtime settings held by this manager
    pub fn app_config(&self) -> Result<AppConfig> {
        self.load_validated()
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder collecting configuration sources, applied in order: files, `.env`,
/// then the environment
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    prefix: Option<String>,
    files: Vec<PathBuf>,
    optional_files: Vec<PathBuf>,
    dotenv: Option<Option<PathBuf>>,
    env: bool,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// A file that is skipped when it does not exist
    pub fn optional_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.optional_files.push(path.into());
        self
    }

    /// Read `.env` (or the given file) before the environment
    pub fn dotenv(mut self, path: Option<PathBuf>) -> Self {
        self.dotenv = Some(path);
        self.env = true;
        self
    }

    pub fn env(mut self) -> Self {
        self.env = true;
        self
    }

    pub fn build(self) -> Result<ConfigManager> {
        let manager = match self.prefix {
            Some(prefix) => ConfigManager::with_prefix(prefix),
            None => ConfigManager::new(),
        };

        for path in &self.files {
            manager.load_file(path)?;
        }
        for path in self.optional_files.iter().filter(|path| path.exists()) {
            manager.load_file(path)?;
        }

        match &self.dotenv {
            Some(path) => manager.load_dotenv(path.as_deref())?,
            None if self.env => manager.load_env()?,
            None => {}
        }

        Ok(manager)
    }
}

fn lookup<'v>(root: &'v Value, key: &str) -> Option<&'v Value> {
    key.split('.').try_fold(root, |node, part| node.as_object()?.get(part))
}

fn insert_path(root: &mut Value, key: &str, value: Value) {
    let mut sections: Vec<&str> = key.split('.').collect();
    let Some(leaf) = sections.pop() else {
        return;
    };

    let mut node = root;
    for section in sections {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(section.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(leaf.to_string(), value);
    }
}

fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Environment values are strings; numbers and booleans are recognised
fn parse_scalar(raw: &str) -> Value {
    if let Ok(value) = raw.parse::<bool>() {
        return Value::Bool(value);
    }
    if let Ok(value) = raw.parse::<i64>() {
        return Value::from(value);
    }
    if let Ok(value) = raw.parse::<f64>() {
        if value.is_finite() {
            return Value::from(value);
        }
    }
    Value::String(raw.to_string())
}
