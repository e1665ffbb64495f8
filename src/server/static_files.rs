//! Static file responder for requests that no proxy rule claims.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::config::StaticConfig;
use crate::http::mime;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Outcome of mapping a request path onto the static root.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolved {
    File(PathBuf),
    NotFound,
    Forbidden,
    BadRequest,
}

#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    index: String,
    spa_fallback: bool,
}

impl StaticFiles {
    pub fn new(config: StaticConfig) -> Self {
        Self {
            root: config.root,
            index: config.index,
            spa_fallback: config.spa_fallback,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn serve(&self, req: &Request) -> Response {
        if !matches!(req.method, Method::GET | Method::HEAD) {
            return Response::method_not_allowed();
        }

        let path = match self.resolve(&req.path).await {
            Resolved::File(path) => path,
            Resolved::NotFound => return Response::not_found(),
            Resolved::Forbidden => {
                tracing::warn!(path = %req.path, "Rejected path outside static root");
                return Response::forbidden();
            }
            Resolved::BadRequest => return Response::bad_request(),
        };

        match tokio::fs::read(&path).await {
            Ok(contents) => ResponseBuilder::new(StatusCode::Ok)
                .header("Content-Type", mime::from_path(&path))
                .header("Cache-Control", "no-cache")
                .body(contents)
                .build(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Response::not_found(),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read static file");
                Response::internal_error()
            }
        }
    }

    /// Map a request target onto a file under the root.
    pub async fn resolve(&self, request_path: &str) -> Resolved {
        let path = request_path
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        let Some(decoded) = percent_decode(path) else {
            return Resolved::BadRequest;
        };

        let mut candidate = self.root.clone();
        let mut last_segment = "";
        for segment in decoded.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Resolved::Forbidden,
                s if s.contains(['\\', '\0']) => return Resolved::Forbidden,
                s => {
                    candidate.push(s);
                    last_segment = s;
                }
            }
        }

        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.is_dir() => {
                let index = candidate.join(&self.index);
                if is_file(&index).await {
                    return Resolved::File(index);
                }
            }
            Ok(_) => return Resolved::File(candidate),
            Err(_) => {}
        }

        // History API fallback for client-side routes, not for missing assets
        if self.spa_fallback && !last_segment.contains('.') {
            let index = self.root.join(&self.index);
            if is_file(&index).await {
                tracing::trace!(path = %request_path, "Serving SPA fallback");
                return Resolved::File(index);
            }
        }

        Resolved::NotFound
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Decode `%XX` escapes. `None` on malformed escapes or invalid UTF-8.
pub fn percent_decode(input: &str) -> Option<String> {
    // urlencoding passes `%zz` through untouched, so malformed escapes are caught here
    let well_formed = input.match_indices('%').all(|(i, _)| {
        input
            .as_bytes()
            .get(i + 1..i + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    });
    if !well_formed {
        return None;
    }

    urlencoding::decode(input).ok().map(Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decode_handles_escapes() {
        assert_eq!(percent_decode("/a%20b").as_deref(), Some("/a b"));
        assert_eq!(percent_decode("/%2e%2e/x").as_deref(), Some("/../x"));
        assert_eq!(percent_decode("/bad%zz"), None);
        assert_eq!(percent_decode("/trunc%2"), None);
        assert_eq!(percent_decode("/%ff"), None);
    }
}
