// Trellis - a component container and reflective HTTP dispatcher for Rust
//
// Components are described once, wired by the container and exposed over HTTP
// through controller routes.

// Re-export core functionality
pub use trellis_core::*;

pub use trellis_config as config;
pub use trellis_config::{AppConfig, ConfigManager};

// Runtime and serialization crates that applications build handlers with
pub use serde;
pub use serde_json;
pub use tokio;

use trellis_core::logging::{info, warn};

/// Bootstrap an application from `index` with the settings in `config`.
///
/// Explicit beans and container options come from the configuration, as does
/// the gateway's listener address and static root.
pub fn bootstrap(index: &MetadataIndex, config: &AppConfig) -> Result<Application, Error> {
    let explicit = config.explicit_beans();
    if !explicit.is_empty() {
        info!(beans = explicit.len(), "Applying explicit bean definitions");
    }
    if !config.container.autowire_single_impl {
        warn!("autowire_single_impl is off; ambiguous dependencies resolve to the first implementation");
    }

    Application::bootstrap(index, explicit, config.container_options(), config.gateway_config())
}

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        AppConfig, Application, Arguments, BeanContainer, ComponentDescriptor, ConfigManager, Error, GatewayConfig,
        HttpMethod, HttpResponse, HttpStatus, MetadataIndex, RequestContext, RouteSpec, Wiring, bootstrap,
        register_component,
    };
    pub use crate::logging::{LogConfig, debug, error, info, trace, warn};
}
