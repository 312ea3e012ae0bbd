// Configuration management for Trellis applications
// File, environment and .env sources feeding the runtime settings

pub mod app_config;
pub mod env;
pub mod error;
pub mod loader;
pub mod manager;
pub mod validation;

pub use app_config::{AppConfig, BeanEntry, ContainerSection, LoggingSection, ServerSection};
pub use env::{DEFAULT_PREFIX, EnvLoader};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use manager::{ConfigBuilder, ConfigManager};
pub use validation::{ConfigValidator, Validate};
