// Routing system for controller handlers

use crate::binding::{BindingSource, ParamType, ParameterBindingSpec};
use crate::logging::{debug, warn};
use crate::metadata::{BeanObject, HookFn, MetadataIndex};
use crate::{Arguments, Error, HttpMethod, RequestContext};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A type-erased handler: the controller bean, its bound arguments and the request
pub type HandlerFn =
    Arc<dyn Fn(&BeanObject, &mut Arguments, &mut RequestContext) -> Result<(), Error> + Send + Sync>;

/// Builder for one route of a controller
#[derive(Debug, Clone)]
pub struct RouteSpec {
    method: HttpMethod,
    pattern: String,
    name: Option<String>,
    params: Vec<ParameterBindingSpec>,
    cors: bool,
}

impl RouteSpec {
    pub fn new(method: HttpMethod, pattern: impl Into<String>) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            name: None,
            params: Vec::new(),
            cors: false,
        }
    }

    pub fn get(pattern: impl Into<String>) -> Self {
        Self::new(HttpMethod::GET, pattern)
    }

    pub fn post(pattern: impl Into<String>) -> Self {
        Self::new(HttpMethod::POST, pattern)
    }

    pub fn put(pattern: impl Into<String>) -> Self {
        Self::new(HttpMethod::PUT, pattern)
    }

    pub fn delete(pattern: impl Into<String>) -> Self {
        Self::new(HttpMethod::DELETE, pattern)
    }

    pub fn patch(pattern: impl Into<String>) -> Self {
        Self::new(HttpMethod::PATCH, pattern)
    }

    /// Handler method name, used in logs and error messages
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bind a `{name}` placeholder of the pattern
    pub fn path<T: Any>(self, name: impl Into<String>) -> Self {
        self.param(name, BindingSource::Path, ParamType::of::<T>())
    }

    /// Bind a query string value
    pub fn query<T: Any>(self, name: impl Into<String>) -> Self {
        self.param(name, BindingSource::Query, ParamType::of::<T>())
    }

    /// Bind the raw body as text
    pub fn body(self, name: impl Into<String>) -> Self {
        self.param(name, BindingSource::RawBody, ParamType::String)
    }

    /// Bind the body deserialized from JSON
    pub fn json<T: DeserializeOwned + Send + 'static>(self, name: impl Into<String>) -> Self {
        self.param(name, BindingSource::JsonBody, ParamType::json::<T>())
    }

    /// Declare that the handler receives the request context
    pub fn context(self) -> Self {
        self.param("context", BindingSource::Context, ParamType::Context)
    }

    /// Allow cross-origin requests on this route
    pub fn cors(mut self) -> Self {
        self.cors = true;
        self
    }

    fn param(mut self, name: impl Into<String>, source: BindingSource, target: ParamType) -> Self {
        self.params.push(ParameterBindingSpec::new(name, source, target));
        self
    }

    pub(crate) fn into_declaration(self, handler: HandlerFn) -> RouteDeclaration {
        let name = self
            .name
            .unwrap_or_else(|| format!("{} {}", self.method, self.pattern));
        RouteDeclaration {
            method: self.method,
            pattern: self.pattern,
            name,
            params: self.params.into(),
            cors: self.cors,
            handler,
        }
    }
}

/// A route as declared on its controller
#[derive(Clone)]
pub struct RouteDeclaration {
    pub method: HttpMethod,
    pub pattern: String,
    pub name: String,
    pub params: Arc<[ParameterBindingSpec]>,
    pub cors: bool,
    pub handler: HandlerFn,
}

impl fmt::Debug for RouteDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDeclaration")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("cors", &self.cors)
            .finish()
    }
}

/// One `/`-separated piece of a compiled pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

impl Segment {
    fn parse(segment: &str) -> Self {
        // `{name}` anywhere in the segment turns the whole segment into a capture
        if let Some(open) = segment.find('{') {
            if let Some(len) = segment[open + 1..].find('}') {
                if len > 0 {
                    return Segment::Placeholder(segment[open + 1..open + 1 + len].to_string());
                }
            }
        }
        Segment::Literal(segment.to_string())
    }

    fn matches(&self, part: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == part,
            Segment::Placeholder(_) => !part.is_empty(),
        }
    }
}

/// A URL pattern compiled into per-segment matchers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            segments: pattern.split('/').map(Segment::parse).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path.split('/');
        let mut count = 0;
        for part in parts.by_ref() {
            match self.segments.get(count) {
                Some(segment) if segment.matches(part) => count += 1,
                _ => return false,
            }
        }
        count == self.segments.len()
    }

    /// Placeholder values keyed by name, or `None` if `path` does not match
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        if !self.matches(path) {
            return None;
        }
        let params = self
            .segments
            .iter()
            .zip(path.split('/'))
            .filter_map(|(segment, part)| match segment {
                Segment::Placeholder(name) => Some((name.clone(), part.to_string())),
                Segment::Literal(_) => None,
            })
            .collect();
        Some(params)
    }
}

/// A compiled route bound to its controller
#[derive(Clone)]
pub struct RouteDescriptor {
    pub method: HttpMethod,
    pub pattern: PathPattern,
    /// Bean identifier of the owning controller
    pub controller: String,
    /// `Controller.method`
    pub handler_name: String,
    pub params: Arc<[ParameterBindingSpec]>,
    pub cors: bool,
    pub handler: HandlerFn,
    pub before: Option<HookFn>,
    pub after: Option<HookFn>,
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("controller", &self.controller)
            .field("handler", &self.handler_name)
            .field("params", &self.params)
            .field("cors", &self.cors)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// Every route of every controller, in declaration order
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteDescriptor>>,
}

impl RouteTable {
    /// Compile the routes of every indexed controller
    pub fn build(index: &MetadataIndex) -> Self {
        let mut routes = Vec::new();

        for (controller, route) in index.route_methods() {
            let meta = controller.controller_meta();
            let handler_name = format!("{}.{}", controller.short_name(), route.name);
            let pattern = PathPattern::compile(&route.pattern);

            for param in route.params.iter() {
                if !param.target.is_supported() {
                    warn!(
                        handler = %handler_name,
                        parameter = %param.name,
                        type_name = param.target.type_name(),
                        "Parameter type cannot be bound, requests to this route will fail"
                    );
                }
                if param.source == BindingSource::Path
                    && !pattern.placeholders().any(|name| name == param.name)
                {
                    warn!(
                        handler = %handler_name,
                        parameter = %param.name,
                        pattern = %route.pattern,
                        "Path parameter has no placeholder in the pattern"
                    );
                }
            }

            debug!(
                method = %route.method,
                pattern = %route.pattern,
                handler = %handler_name,
                "Mapped route"
            );

            routes.push(Arc::new(RouteDescriptor {
                method: route.method,
                pattern,
                controller: controller.id().to_string(),
                handler_name,
                params: route.params.clone(),
                cors: route.cors || meta.cors,
                handler: route.handler.clone(),
                before: meta.before.clone(),
                after: meta.after.clone(),
            }));
        }

        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[Arc<RouteDescriptor>] {
        &self.routes
    }

    /// First route declared for `method` whose pattern matches `path`
    pub fn match_route(&self, method: &str, path: &str) -> Option<&Arc<RouteDescriptor>> {
        let method = HttpMethod::from_str(method)?;
        self.routes
            .iter()
            .find(|route| route.method == method && route.pattern.matches(path))
    }

    /// Placeholder values of `path` for an already matched `route`
    pub fn extract_params(route: &RouteDescriptor, path: &str) -> Result<HashMap<String, String>, Error> {
        route.pattern.captures(path).ok_or_else(|| {
            Error::Internal(format!(
                "path {} does not match route {}",
                path,
                route.pattern.as_str()
            ))
        })
    }
}
