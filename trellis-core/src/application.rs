// Application bootstrapper and HTTP server

use crate::container::{BeanContainer, CONTROLLERS_GROUP, ContainerOptions, ExplicitBean};
use crate::dispatcher::{DispatchOutcome, INTERNAL_ERROR_BODY, RequestDispatcher};
use crate::logging::{Instrument, Span, debug, error, info, info_span, warn};
use crate::metadata::MetadataIndex;
use crate::routing::RouteTable;
use crate::static_files::{DEFAULT_STATIC_ROOT, StaticFiles};
use crate::{Error, HttpResponse, RequestContext};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

/// Listener settings for the HTTP gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Directory unmatched requests are served from
    pub static_root: PathBuf,
    /// Serve one connection at a time instead of a task per connection
    pub sequential: bool,
}

impl GatewayConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = root.into();
        self
    }

    pub fn sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            static_root: PathBuf::from(DEFAULT_STATIC_ROOT),
            sequential: false,
        }
    }
}

/// The main application struct
#[derive(Debug)]
pub struct Application {
    container: Arc<BeanContainer>,
    dispatcher: RequestDispatcher,
    static_files: StaticFiles,
    config: GatewayConfig,
}

impl Application {
    /// Build the container and route table from `index` and wire up the gateway.
    ///
    /// Every controller is resolved eagerly, so wiring errors surface here rather
    /// than on the first request.
    pub fn bootstrap(
        index: &MetadataIndex,
        explicit: Vec<ExplicitBean>,
        options: ContainerOptions,
        config: GatewayConfig,
    ) -> Result<Self, Error> {
        info!(components = index.len(), "Bootstrapping Trellis application");

        let container = BeanContainer::builder(index)
            .explicit(explicit)
            .options(options)
            .controllers_group()
            .build()?;

        Self::from_container(Arc::new(container), index, config)
    }

    /// Bootstrap with scanned definitions only and default container options
    pub fn create(index: &MetadataIndex, config: GatewayConfig) -> Result<Self, Error> {
        Self::bootstrap(index, Vec::new(), ContainerOptions::default(), config)
    }

    /// Wire the gateway around an existing container
    pub fn from_container(
        container: Arc<BeanContainer>,
        index: &MetadataIndex,
        config: GatewayConfig,
    ) -> Result<Self, Error> {
        let controllers = match container.group_members(CONTROLLERS_GROUP) {
            Some(_) => container.resolve_group(CONTROLLERS_GROUP)?.len(),
            None => 0,
        };

        let routes = Arc::new(RouteTable::build(index));
        info!(
            controllers,
            routes = routes.len(),
            static_root = %config.static_root.display(),
            "Application bootstrap complete"
        );

        Ok(Self {
            dispatcher: RequestDispatcher::new(container.clone(), routes),
            container,
            static_files: StaticFiles::new(config.static_root.clone()),
            config,
        })
    }

    pub fn container(&self) -> &Arc<BeanContainer> {
        &self.container
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Handle one request synchronously: dispatch, then static fallback, then 404
    pub fn handle(&self, mut ctx: RequestContext) -> HttpResponse {
        match self.dispatcher.dispatch(&mut ctx) {
            DispatchOutcome::Responded | DispatchOutcome::Failed(_) => ctx.into_response(),
            DispatchOutcome::Unhandled => match self.static_files.serve(&ctx.path) {
                Ok(Some(response)) => response,
                Ok(None) => StaticFiles::not_found(),
                Err(err) => {
                    error!(path = %ctx.path, error = %err, "Failed to read static file");
                    internal_error()
                }
            },
        }
    }

    /// Bind the configured address and serve until the process exits
    pub async fn listen(self) -> Result<(), Error> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        info!(
            addr = %listener.local_addr()?,
            sequential = self.config.sequential,
            "Server listening"
        );

        let sequential = self.config.sequential;
        let app = Arc::new(self);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "Failed to accept connection");
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let app = app.clone();

            let connection = async move {
                let service = service_fn(move |req: Request<IncomingBody>| {
                    let app = app.clone();
                    async move { handle_request(req, app).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(peer = %peer, error = %err, "Error serving connection");
                }
            };

            if sequential {
                connection.await;
            } else {
                tokio::spawn(connection);
            }
        }
    }
}

/// Handle an incoming HTTP request
async fn handle_request(
    req: Request<IncomingBody>,
    app: Arc<Application>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let span = info_span!(
        "request",
        id = %Uuid::new_v4(),
        method = %req.method(),
        path = %req.uri().path()
    );

    async move {
        let target = req
            .uri()
            .path_and_query()
            .map(|target| target.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        let mut ctx = RequestContext::new(req.method().as_str(), target);

        for (name, value) in req.headers() {
            if let Ok(value) = value.to_str() {
                ctx.headers.insert(name.to_string(), value.to_string());
            }
        }

        let body = req.collect().await?.to_bytes();
        let ctx = ctx.with_body(body.to_vec());

        let span = Span::current();
        let response = match tokio::task::spawn_blocking(move || span.in_scope(|| app.handle(ctx))).await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "Dispatch task failed");
                internal_error()
            }
        };

        debug!(status = response.status, bytes = response.body.len(), "Request completed");
        Ok(to_hyper_response(response))
    }
    .instrument(span)
    .await
}

fn internal_error() -> HttpResponse {
    HttpResponse::internal_server_error().with_body(INTERNAL_ERROR_BODY.as_bytes().to_vec())
}

fn to_hyper_response(response: HttpResponse) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(Bytes::from(response.body)));
    *out.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (key, value) in response.headers {
        match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().insert(name, value);
            }
            _ => warn!(header = %key, "Dropping invalid response header"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_builder() {
        let config = GatewayConfig::new(9000)
            .host("0.0.0.0")
            .static_root("/srv/www")
            .sequential(true);

        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.static_root, PathBuf::from("/srv/www"));
        assert!(config.sequential);
        assert_eq!(GatewayConfig::default().static_root, PathBuf::from("./public/"));
    }

    #[test]
    fn test_hyper_response_conversion() {
        let response = HttpResponse::not_found()
            .with_header("Content-Type", "text/plain")
            .with_header("bad header", "x")
            .with_body(b"gone".to_vec());

        let out = to_hyper_response(response);
        assert_eq!(out.status(), StatusCode::NOT_FOUND);
        assert_eq!(out.headers().get("content-type").unwrap(), "text/plain");
        assert_eq!(out.headers().len(), 1);
    }

    #[test]
    fn test_unmatched_request_without_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let index = MetadataIndex::default();
        let app = Application::create(&index, GatewayConfig::default().static_root(dir.path())).unwrap();

        let response = app.handle(RequestContext::new("GET", "/item/list"));
        assert_eq!(response.status, 404);
        assert_eq!(response.text(), "404 not found!");
    }
}
