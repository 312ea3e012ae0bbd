// Core library for the Trellis runtime
// Component metadata, the bean container, routing and the request pipeline

pub mod application;
pub mod binding;
pub mod container;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod logging;
pub mod metadata;
pub mod routing;
pub mod static_files;
pub mod status;

// Re-export commonly used types
pub use application::{Application, GatewayConfig};
pub use binding::{Arguments, BindingSource, ParamType, ParameterBindingSpec};
pub use container::{
    BeanContainer, BeanDefinitions, BeanInstance, CONTROLLERS_GROUP, ContainerBuilder, ContainerOptions,
    ExplicitBean,
};
pub use dispatcher::{DispatchOutcome, DispatchPhase, RequestDispatcher};
pub use error::Error;
pub use http::{HttpMethod, HttpResponse, RequestContext};
pub use metadata::{
    BeanObject, ComponentBuilder, ComponentDescriptor, ComponentKind, ComponentRegistration, MetadataIndex, TypeRef,
    Wiring,
};
pub use routing::{PathPattern, RouteDeclaration, RouteDescriptor, RouteSpec, RouteTable};
pub use static_files::StaticFiles;
pub use status::HttpStatus;

// Used by `register_component!`
#[doc(hidden)]
pub use inventory;
