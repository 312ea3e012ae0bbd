//! Static file fallback for requests no route claims.
//!
//! Files are looked up under a root directory (`./public/` by default). Only
//! regular files are served; directories and anything resolving outside the
//! root are treated as missing. The `Content-Type` is taken from the extension.

use crate::logging::{debug, warn};
use crate::{Error, HttpResponse};
use std::path::{Component, Path, PathBuf};

/// Default directory static files are served from
pub const DEFAULT_STATIC_ROOT: &str = "./public/";

/// Body of the response when neither a route nor a file matched
pub const NOT_FOUND_BODY: &str = "404 not found!";

/// Look up the MIME type for a path by its extension
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Serves files from a root directory
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file response for `request_path`, or `None` if there is no such file
    pub fn serve(&self, request_path: &str) -> Result<Option<HttpResponse>, Error> {
        let Some(path) = self.resolve_path(request_path) else {
            return Ok(None);
        };

        let body = std::fs::read(&path)?;
        debug!(path = %path.display(), bytes = body.len(), "Serving static file");
        let response = HttpResponse::ok()
            .with_header("Content-Type", mime_type(&path))
            .with_body(body);
        Ok(Some(response))
    }

    /// 404 response used when nothing matched
    pub fn not_found() -> HttpResponse {
        HttpResponse::not_found()
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(NOT_FOUND_BODY.as_bytes().to_vec())
    }

    fn resolve_path(&self, request_path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(request_path).ok()?;
        let relative = Path::new(decoded.trim_start_matches('/'));

        // Reject `..` and absolute components before touching the filesystem
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            warn!(path = request_path, "Rejected static path outside the root");
            return None;
        }

        let full_path = self.root.join(relative);
        let canonical_root = self.root.canonicalize().ok()?;
        let canonical_path = full_path.canonicalize().ok()?;

        // Symlinks may still point elsewhere
        if !canonical_path.starts_with(&canonical_root) {
            warn!(path = request_path, "Rejected static path outside the root");
            return None;
        }

        canonical_path.is_file().then_some(canonical_path)
    }
}

impl Default for StaticFiles {
    fn default() -> Self {
        Self::new(DEFAULT_STATIC_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_detection() {
        assert_eq!(mime_type(Path::new("app.js")), "application/javascript");
        assert_eq!(mime_type(Path::new("INDEX.HTML")), "text/html; charset=utf-8");
        assert_eq!(mime_type(Path::new("logo.png")), "image/png");
        assert_eq!(mime_type(Path::new("data.bin")), "application/octet-stream");
        assert_eq!(mime_type(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn test_serves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body {}").unwrap();

        let files = StaticFiles::new(dir.path());
        let response = files.serve("/css/site.css").unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"body {}");
        assert_eq!(response.headers.get("Content-Type"), Some(&"text/css".to_string()));
    }

    #[test]
    fn test_missing_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();

        let files = StaticFiles::new(dir.path());
        assert!(files.serve("/nope.txt").unwrap().is_none());
        assert!(files.serve("/assets").unwrap().is_none());
    }

    #[test]
    fn test_rejects_traversal() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("public");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "secret").unwrap();

        let files = StaticFiles::new(&root);
        assert!(files.serve("/../secret.txt").unwrap().is_none());
        assert!(files.serve("/%2e%2e/secret.txt").unwrap().is_none());
    }

    #[test]
    fn test_not_found_body() {
        let response = StaticFiles::not_found();
        assert_eq!(response.status, 404);
        assert_eq!(response.text(), NOT_FOUND_BODY);
    }
}
