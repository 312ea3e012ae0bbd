// HTTP request context and response types

use crate::logging::warn;
use crate::{Error, HttpStatus};
use serde::Serialize;
use std::collections::HashMap;

/// HTTP methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

impl HttpMethod {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::GET),
            "POST" => Some(HttpMethod::POST),
            "PUT" => Some(HttpMethod::PUT),
            "DELETE" => Some(HttpMethod::DELETE),
            "PATCH" => Some(HttpMethod::PATCH),
            "HEAD" => Some(HttpMethod::HEAD),
            "OPTIONS" => Some(HttpMethod::OPTIONS),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finished HTTP response handed back to the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(HttpStatus::Ok.code())
    }

    pub fn not_found() -> Self {
        Self::new(HttpStatus::NotFound.code())
    }

    pub fn internal_server_error() -> Self {
        Self::new(HttpStatus::InternalServerError.code())
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Body as UTF-8 text, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Per-request record shared by the gateway, the dispatcher and the handler.
///
/// A context is created for one request and dropped once the response is sent.
/// The response side buffers its body; once a handler writes body bytes the
/// headers are frozen and [`RequestContext::add_header`] fails.
#[derive(Debug)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
    body: Vec<u8>,
    response: HttpResponse,
    body_started: bool,
}

impl RequestContext {
    /// Create a context for `method` and a request target.
    ///
    /// A query string on the target is split off and decoded; when a key repeats,
    /// the first value wins.
    pub fn new(method: impl Into<String>, target: impl AsRef<str>) -> Self {
        let target = target.as_ref();
        let (path, query_params) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query_string(query)),
            None => (target, HashMap::new()),
        };

        Self {
            method: method.into(),
            path: path.to_string(),
            headers: HashMap::new(),
            query_params,
            path_params: HashMap::new(),
            body: Vec::new(),
            response: HttpResponse::ok(),
            body_started: false,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Raw request body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get a path parameter by name
    pub fn param(&self, name: &str) -> Option<&String> {
        self.path_params.get(name)
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }

    pub fn header(&self, name: &str) -> Option<&String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    // Response side

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn set_status(&mut self, status: HttpStatus) {
        self.response.status = status.code();
    }

    pub fn set_status_code(&mut self, status: u16) {
        self.response.status = status;
    }

    /// Add a response header. Fails once body bytes have been written.
    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
        let key = key.into();
        if self.body_started {
            return Err(Error::HeadersSent(key));
        }
        self.response.headers.insert(key, value.into());
        Ok(())
    }

    pub fn response_header(&self, name: &str) -> Option<&String> {
        self.response
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn response_body(&self) -> &[u8] {
        &self.response.body
    }

    pub fn headers_sent(&self) -> bool {
        self.body_started
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.body_started = true;
        self.response.body.extend_from_slice(bytes);
    }

    pub fn write_text(&mut self, text: &str) {
        self.write_bytes(text.as_bytes());
    }

    /// Serialize `value` as JSON and append it to the body
    pub fn write_json<T: Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let bytes = serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))?;
        if !self.body_started {
            self.add_header("Content-Type", "application/json")?;
        }
        self.write_bytes(&bytes);
        Ok(())
    }

    /// Set a response header even after the body started. Used by the runtime
    /// when it rewrites a failed response.
    pub(crate) fn force_header(&mut self, key: &str, value: &str) {
        self.response.headers.insert(key.to_string(), value.to_string());
    }

    /// Replace whatever the handler produced with `status` and its status line
    /// as a text body. Headers already set are kept apart from the content type.
    pub(crate) fn replace_body(&mut self, status: HttpStatus) {
        self.response.status = status.code();
        self.force_header("Content-Type", "text/plain; charset=utf-8");
        self.response.body.clear();
        self.write_text(&status.to_string());
    }

    pub fn into_response(self) -> HttpResponse {
        self.response
    }
}

/// Parse a query string into a map of decoded parameters. An undecodable
/// query is logged and treated as empty.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let pairs: Vec<(String, String)> = match serde_urlencoded::from_str(query) {
        Ok(pairs) => pairs,
        Err(err) => {
            warn!(query, error = %err, "Ignoring malformed query string");
            Vec::new()
        }
    };
    let mut params = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        params.entry(key).or_insert(value);
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_is_split_from_path() {
        let ctx = RequestContext::new("GET", "/item/list?page=2&name=john%20doe");
        assert_eq!(ctx.path, "/item/list");
        assert_eq!(ctx.query("page"), Some(&"2".to_string()));
        assert_eq!(ctx.query("name"), Some(&"john doe".to_string()));
    }

    #[test]
    fn test_repeated_query_key_keeps_first() {
        let ctx = RequestContext::new("GET", "/tags?tag=rust&tag=web");
        assert_eq!(ctx.query("tag"), Some(&"rust".to_string()));
    }

    #[test]
    fn test_query_decoding_is_lenient() {
        let ctx = RequestContext::new("GET", "/search?q=%zz&flag&name=a+b");
        assert_eq!(ctx.query("q"), Some(&"%zz".to_string()));
        assert_eq!(ctx.query("flag"), Some(&String::new()));
        assert_eq!(ctx.query("name"), Some(&"a b".to_string()));
    }

    #[test]
    fn test_headers_frozen_after_body_write() {
        let mut ctx = RequestContext::new("GET", "/");
        ctx.add_header("X-Before", "1").unwrap();
        ctx.write_text("hello");
        let err = ctx.add_header("X-After", "2").unwrap_err();
        assert!(matches!(err, Error::HeadersSent(name) if name == "X-After"));
        assert_eq!(ctx.response_header("x-before"), Some(&"1".to_string()));
    }

    #[test]
    fn test_write_json_sets_content_type() {
        let mut ctx = RequestContext::new("GET", "/");
        ctx.write_json(&vec!["a", "b"]).unwrap();
        assert_eq!(ctx.response_body(), br#"["a","b"]"#);
        assert_eq!(
            ctx.response_header("Content-Type"),
            Some(&"application/json".to_string())
        );
    }

    #[test]
    fn test_replace_body_keeps_headers() {
        let mut ctx = RequestContext::new("GET", "/");
        ctx.add_header("Access-Control-Allow-Origin", "*").unwrap();
        ctx.write_text("partial");
        ctx.replace_body(HttpStatus::InternalServerError);

        let response = ctx.into_response();
        assert_eq!(response.status, 500);
        assert_eq!(response.text(), "500 Internal Server Error");
        assert_eq!(
            response.headers.get("Access-Control-Allow-Origin"),
            Some(&"*".to_string())
        );
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(HttpMethod::from_str("get"), Some(HttpMethod::GET));
        assert_eq!(HttpMethod::from_str("BREW"), None);
        assert_eq!(HttpMethod::DELETE.to_string(), "DELETE");
    }
}
