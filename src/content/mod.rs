//! Document-root content resolution.
//!
//! # Responsibilities
//! - Map a request path onto a file under the document root
//! - Refuse anything that could escape the root
//! - Pick a status and `Content-Type` for what was found
//!
//! # Design Decisions
//! - Resolution does I/O and is kept apart from the pure response builder;
//!   it produces a status plus [`Payload`] that the builder turns into bytes
//! - Paths are percent-decoded, then checked segment by segment: any `..`
//!   or NUL is refused before touching the filesystem
//! - Directories are served through their `index.html`; there are no listings
//! - Symbolic links are followed only while their target stays under the root

use std::io;
use std::path::{Path, PathBuf};

use crate::http::request::{Method, Request};
use crate::http::response::Payload;
use crate::http::status::StatusCode;

/// File served for a directory.
pub const INDEX_FILE: &str = "index.html";

/// Value of the `Allow` header on 405 responses.
pub const ALLOWED_METHODS: &str = "GET, HEAD";

/// Outcome of resolving one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub status: StatusCode,
    pub payload: Payload,
}

impl Resolved {
    fn ok(payload: Payload) -> Self {
        Self {
            status: StatusCode::OK,
            payload,
        }
    }

    fn error(status: StatusCode) -> Self {
        Self {
            status,
            payload: Payload::status_text(status),
        }
    }
}

/// The directory clients are served from.
#[derive(Debug, Clone)]
pub struct DocumentRoot {
    root: PathBuf,
}

impl DocumentRoot {
    /// The root is canonicalized when possible so links can be checked
    /// against it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve `request` to a status and payload.
    pub async fn resolve(&self, request: &Request) -> Resolved {
        match request.method() {
            Method::Get | Method::Head => {}
            _ => {
                return Resolved {
                    status: StatusCode::METHOD_NOT_ALLOWED,
                    payload: Payload::status_text(StatusCode::METHOD_NOT_ALLOWED)
                        .with_header("Allow", ALLOWED_METHODS),
                }
            }
        }

        let relative = match sanitize(request.path()) {
            Ok(relative) => relative,
            Err(status) => return Resolved::error(status),
        };

        let mut path = self.root.join(&relative);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => path.push(INDEX_FILE),
            Ok(_) => {}
            Err(e) => return self.io_failure(&path, e),
        }

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Resolved::error(StatusCode::NOT_FOUND),
            Err(e) => return self.io_failure(&path, e),
        }

        // symlinks may point anywhere; the real file must still be under the root
        match tokio::fs::canonicalize(&path).await {
            Ok(real) if real.starts_with(&self.root) => {}
            Ok(real) => {
                tracing::debug!(path = %path.display(), real = %real.display(), "Link escapes document root");
                return Resolved::error(StatusCode::FORBIDDEN);
            }
            Err(e) => return self.io_failure(&path, e),
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => Resolved::ok(Payload::new(content_type_for(&path), bytes)),
            Err(e) => self.io_failure(&path, e),
        }
    }

    fn io_failure(&self, path: &Path, err: io::Error) -> Resolved {
        let status = match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => StatusCode::NOT_FOUND,
            io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            _ => {
                tracing::error!(path = %path.display(), error = %err, "Failed to read content");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Resolved::error(status)
    }
}

/// Turn a request path into a relative filesystem path.
///
/// Fails with 400 for paths that are not origin-form or not valid
/// percent-encoded UTF-8, and 403 for `..` segments or NUL bytes.
pub fn sanitize(path: &str) -> Result<PathBuf, StatusCode> {
    if !path.starts_with('/') {
        return Err(StatusCode::BAD_REQUEST);
    }
    let decoded = percent_decode(path).ok_or(StatusCode::BAD_REQUEST)?;
    let decoded = String::from_utf8(decoded).map_err(|_| StatusCode::BAD_REQUEST)?;
    if decoded.contains('\0') {
        return Err(StatusCode::FORBIDDEN);
    }

    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StatusCode::FORBIDDEN),
            // a decoded backslash is a separator on some platforms
            s if s.contains('\\') => return Err(StatusCode::FORBIDDEN),
            s => relative.push(s),
        }
    }
    Ok(relative)
}

fn percent_decode(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}

/// Media type for `path`, chosen by extension. Text types get an explicit
/// UTF-8 charset.
pub fn content_type_for(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_().as_str() == "text" && mime.get_param("charset").is_none() {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Version;

    fn get(target: &str) -> Request {
        Request::new(Method::Get, target, Version::Http11)
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "plain").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs").join("a b.css"), "body{}").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        dir
    }

    #[tokio::test]
    async fn serves_files_with_content_type() {
        let dir = fixture();
        let root = DocumentRoot::new(dir.path());

        let resolved = root.resolve(&get("/notes.txt")).await;
        assert_eq!(resolved.status, StatusCode::OK);
        assert_eq!(resolved.payload.bytes(), b"plain");
        assert_eq!(resolved.payload.content_type(), Some("text/plain; charset=utf-8"));

        let resolved = root.resolve(&get("/docs/a%20b.css?v=2")).await;
        assert_eq!(resolved.status, StatusCode::OK);
        assert_eq!(resolved.payload.content_type(), Some("text/css; charset=utf-8"));
    }

    #[tokio::test]
    async fn directory_serves_index() {
        let dir = fixture();
        let root = DocumentRoot::new(dir.path());

        let resolved = root.resolve(&get("/")).await;
        assert_eq!(resolved.status, StatusCode::OK);
        assert_eq!(resolved.payload.bytes(), b"<h1>home</h1>");

        let resolved = root.resolve(&get("/empty/")).await;
        assert_eq!(resolved.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_is_404() {
        let dir = fixture();
        let root = DocumentRoot::new(dir.path());
        assert_eq!(root.resolve(&get("/nope.html")).await.status, StatusCode::NOT_FOUND);
        assert_eq!(root.resolve(&get("/notes.txt/x")).await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_is_forbidden() {
        let dir = fixture();
        let root = DocumentRoot::new(dir.path().join("docs"));

        for target in ["/../notes.txt", "/%2e%2e/notes.txt", "/docs/..%2Fnotes.txt", "/a%00b"] {
            let resolved = root.resolve(&get(target)).await;
            assert_eq!(resolved.status, StatusCode::FORBIDDEN, "{}", target);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn links_outside_the_root_are_forbidden() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let dir = fixture();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("leak.txt")).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("elsewhere")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("notes.txt"), dir.path().join("alias.txt")).unwrap();
        let root = DocumentRoot::new(dir.path());

        assert_eq!(root.resolve(&get("/leak.txt")).await.status, StatusCode::FORBIDDEN);
        assert_eq!(root.resolve(&get("/elsewhere/secret.txt")).await.status, StatusCode::FORBIDDEN);

        let resolved = root.resolve(&get("/alias.txt")).await;
        assert_eq!(resolved.status, StatusCode::OK);
        assert_eq!(resolved.payload.bytes(), b"plain");
    }

    #[tokio::test]
    async fn other_methods_are_405_with_allow() {
        let dir = fixture();
        let root = DocumentRoot::new(dir.path());
        let request = Request::new(Method::Post, "/", Version::Http11);

        let resolved = root.resolve(&request).await;
        assert_eq!(resolved.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resolved.payload.bytes(), b"405 Method Not Allowed\n");
    }

    #[test]
    fn sanitize_rejects_bad_encoding_and_forms() {
        assert_eq!(sanitize("/a%zz"), Err(StatusCode::BAD_REQUEST));
        assert_eq!(sanitize("/a%4"), Err(StatusCode::BAD_REQUEST));
        assert_eq!(sanitize("*"), Err(StatusCode::BAD_REQUEST));
        assert_eq!(sanitize("/./a//b/"), Ok(PathBuf::from("a").join("b")));
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        assert_eq!(content_type_for(Path::new("x.unknownext")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("X.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("site/index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("data.json")), "application/json");
    }
}
