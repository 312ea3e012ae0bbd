//! Per-request dispatch pipeline.
//!
//! For a matched route the dispatcher resolves the controller bean, binds the
//! handler parameters, runs the before hook, adds the CORS header when enabled,
//! invokes the handler and finally the after hook. Any failure on that path,
//! panics included, ends as a `500` response; nothing escapes to the gateway.

use crate::binding::bind;
use crate::container::BeanContainer;
use crate::logging::{error, trace};
use crate::routing::{RouteDescriptor, RouteTable};
use crate::{Error, HttpStatus, RequestContext};
use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Body written for every failed request
pub const INTERNAL_ERROR_BODY: &str = "500 Internal Server Error";

pub const CORS_HEADER: &str = "Access-Control-Allow-Origin";

/// Stage of the pipeline a request is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Routing,
    ResolveController,
    Binding,
    BeforeHook,
    Invoking,
    AfterHook,
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchPhase::Routing => "routing",
            DispatchPhase::ResolveController => "resolve_controller",
            DispatchPhase::Binding => "binding",
            DispatchPhase::BeforeHook => "before_hook",
            DispatchPhase::Invoking => "invoking",
            DispatchPhase::AfterHook => "after_hook",
        };
        f.write_str(name)
    }
}

/// What happened to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion
    Responded,
    /// The pipeline failed in the given phase; the response is a 500
    Failed(DispatchPhase),
    /// No route matched; the context is untouched
    Unhandled,
}

/// Runs matched requests against controller beans
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    container: Arc<BeanContainer>,
    routes: Arc<RouteTable>,
}

impl RequestDispatcher {
    pub fn new(container: Arc<BeanContainer>, routes: Arc<RouteTable>) -> Self {
        Self { container, routes }
    }

    pub fn container(&self) -> &Arc<BeanContainer> {
        &self.container
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Dispatch one request
    pub fn dispatch(&self, ctx: &mut RequestContext) -> DispatchOutcome {
        let Some(route) = self.routes.match_route(&ctx.method, &ctx.path).cloned() else {
            trace!(method = %ctx.method, path = %ctx.path, "No route matched");
            return DispatchOutcome::Unhandled;
        };

        let mut phase = DispatchPhase::Routing;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(&route, ctx, &mut phase)));

        match result {
            Ok(Ok(())) => return DispatchOutcome::Responded,
            Ok(Err(err)) => log_failure(&route, ctx, phase, &err),
            Err(payload) => {
                let err = Error::HandlerPanicked(panic_message(payload.as_ref()));
                log_failure(&route, ctx, phase, &err);
            }
        }

        if route.cors {
            ctx.force_header(CORS_HEADER, "*");
        }
        ctx.replace_body(HttpStatus::InternalServerError);
        DispatchOutcome::Failed(phase)
    }

    fn run(&self, route: &RouteDescriptor, ctx: &mut RequestContext, phase: &mut DispatchPhase) -> Result<(), Error> {
        *phase = DispatchPhase::ResolveController;
        let bean = self.container.resolve(&route.controller)?;

        *phase = DispatchPhase::Binding;
        ctx.path_params = RouteTable::extract_params(route, &ctx.path)?;
        let mut args = bind(&route.handler_name, &route.params, &ctx.path_params, ctx)?;

        *phase = DispatchPhase::BeforeHook;
        if let Some(before) = &route.before {
            before(bean.object(), ctx)?;
        }

        if route.cors {
            ctx.add_header(CORS_HEADER, "*")?;
        }

        *phase = DispatchPhase::Invoking;
        trace!(handler = %route.handler_name, args = args.len(), "Invoking handler");
        (route.handler)(bean.object(), &mut args, ctx)?;

        *phase = DispatchPhase::AfterHook;
        if let Some(after) = &route.after {
            after(bean.object(), ctx)?;
        }
        Ok(())
    }
}

fn log_failure(route: &RouteDescriptor, ctx: &RequestContext, phase: DispatchPhase, err: &Error) {
    let mut chain = Vec::new();
    let mut source = StdError::source(err);
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }

    error!(
        phase = %phase,
        wiring = err.is_fatal(),
        handler = %route.handler_name,
        method = %ctx.method,
        path = %ctx.path,
        error = %err,
        sources = ?chain,
        backtrace = %Backtrace::capture(),
        "Request failed"
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
