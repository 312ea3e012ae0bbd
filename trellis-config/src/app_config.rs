// Typed runtime settings

use crate::validation::{ConfigValidator, Validate};
use crate::{ConfigError, ConfigLoader, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trellis_core::logging::{LogConfig, LogFormat, LogLevel, LogOutput, Rotation};
use trellis_core::{ContainerOptions, ExplicitBean, GatewayConfig};

const LOG_OUTPUTS: &[&str] = &["stdout", "stderr", "file", "rolling"];
const ROTATIONS: &[&str] = &["minutely", "hourly", "daily", "never"];

/// Settings for a Trellis application.
///
/// Every section is optional; missing values take the same defaults as the
/// corresponding core types.
///
/// ```toml
/// [server]
/// port = 9000
///
/// [container]
/// autowire_single_impl = false
///
/// [[beans]]
/// id = "store"
/// type = "app::MemoryStore"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub container: ContainerSection,
    pub logging: LoggingSection,
    pub beans: Vec<BeanEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub static_root: PathBuf,
    pub sequential: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        let gateway = GatewayConfig::default();
        Self {
            host: gateway.host,
            port: gateway.port,
            static_root: gateway.static_root,
            sequential: gateway.sequential,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSection {
    pub autowire_single_impl: bool,
}

impl Default for ContainerSection {
    fn default() -> Self {
        let options = ContainerOptions::default();
        Self {
            autowire_single_impl: options.autowire_single_impl,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: String,
    /// `stdout`, `stderr`, `file` or `rolling`
    pub output: String,
    pub file: Option<String>,
    pub directory: Option<String>,
    pub prefix: String,
    pub rotation: String,
    pub env_filter: Option<String>,
    pub spans: bool,
    pub thread_ids: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output: "stdout".to_string(),
            file: None,
            directory: None,
            prefix: "trellis.log".to_string(),
            rotation: "daily".to_string(),
            env_filter: None,
            spans: true,
            thread_ids: false,
        }
    }
}

/// An explicit bean definition: `id` is bound to the registered type `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeanEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl AppConfig {
    /// Load and validate a JSON, TOML or `.env` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let value = ConfigLoader::auto(path)?.load_file(path)?;
        Self::from_value(value)
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new(self.server.port)
            .host(self.server.host.clone())
            .static_root(self.server.static_root.clone())
            .sequential(self.server.sequential)
    }

    pub fn container_options(&self) -> ContainerOptions {
        ContainerOptions {
            autowire_single_impl: self.container.autowire_single_impl,
        }
    }

    pub fn explicit_beans(&self) -> Vec<ExplicitBean> {
        self.beans
            .iter()
            .map(|bean| ExplicitBean::new(bean.id.as_str(), bean.type_name.as_str()))
            .collect()
    }

    pub fn log_config(&self) -> Result<LogConfig> {
        let logging = &self.logging;
        let level = LogLevel::parse(&logging.level)
            .ok_or_else(|| invalid("logging.level", &logging.level))?;
        let format = LogFormat::parse(&logging.format)
            .ok_or_else(|| invalid("logging.format", &logging.format))?;

        let output = match logging.output.to_ascii_lowercase().as_str() {
            "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            "file" => LogOutput::File(
                logging
                    .file
                    .clone()
                    .ok_or_else(|| missing("logging.file", "file output"))?,
            ),
            "rolling" => LogOutput::RollingFile {
                directory: logging
                    .directory
                    .clone()
                    .ok_or_else(|| missing("logging.directory", "rolling output"))?,
                prefix: logging.prefix.clone(),
                rotation: parse_rotation(&logging.rotation)?,
            },
            other => return Err(invalid("logging.output", other)),
        };

        let mut config = LogConfig::new()
            .level(level)
            .format(format)
            .output(output)
            .with_spans(logging.spans)
            .with_thread_ids(logging.thread_ids);
        if let Some(filter) = &logging.env_filter {
            config = config.with_env_filter(filter.clone());
        }
        Ok(config)
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.server.host, "server.host")?;
        ConfigValidator::not_empty(&self.server.static_root.to_string_lossy(), "server.static_root")?;

        let ignore_case = |a: &str, b: &str| a.eq_ignore_ascii_case(b);
        ConfigValidator::one_of(
            &self.logging.level,
            &["trace", "debug", "info", "warn", "warning", "error"],
            "logging.level",
            ignore_case,
        )?;
        ConfigValidator::one_of(
            &self.logging.format,
            &["json", "plain", "pretty", "compact"],
            "logging.format",
            ignore_case,
        )?;
        ConfigValidator::one_of(&self.logging.output, LOG_OUTPUTS, "logging.output", ignore_case)?;
        ConfigValidator::one_of(&self.logging.rotation, ROTATIONS, "logging.rotation", ignore_case)?;

        for (i, bean) in self.beans.iter().enumerate() {
            ConfigValidator::not_empty(&bean.id, &format!("beans[{}].id", i))?;
            ConfigValidator::not_empty(&bean.type_name, &format!("beans[{}].type", i))?;
        }
        Ok(())
    }
}

fn parse_rotation(name: &str) -> Result<Rotation> {
    match name.to_ascii_lowercase().as_str() {
        "minutely" => Ok(Rotation::Minutely),
        "hourly" => Ok(Rotation::Hourly),
        "daily" => Ok(Rotation::Daily),
        "never" => Ok(Rotation::Never),
        other => Err(invalid("logging.rotation", other)),
    }
}

fn invalid(field: &str, value: &str) -> ConfigError {
    ConfigError::ValidationError(format!("{} has an unknown value '{}'", field, value))
}

fn missing(field: &str, needed_for: &str) -> ConfigError {
    ConfigError::ValidationError(format!("{} is required for {}", field, needed_for))
}
