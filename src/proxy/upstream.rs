//! Upstream connection and request forwarding
//!
//! This module carries out a `ForwardDecision`: it connects to the rule's
//! target, sends the request with the rewritten path and returns the
//! upstream response. Failures are turned into gateway responses and are
//! never retried.

use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::engine::ForwardDecision;
use crate::proxy::rule::target_authority;
use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::{Host, Url};

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Upper bound on upstream response headers
const MAX_RESPONSE_HEADER_BYTES: usize = 64 * 1024;

/// Headers that only apply to a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "Upgrade",
];

/// Runtime forwarding failures.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream {target} unavailable: {source}")]
    UpstreamUnavailable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream {target} did not respond within {elapsed:?}")]
    Timeout { target: String, elapsed: Duration },

    #[error("invalid response from upstream {target}: {reason}")]
    InvalidResponse { target: String, reason: String },
}

impl ProxyError {
    /// Status returned to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Timeout { .. } => StatusCode::GatewayTimeout,
            ProxyError::UpstreamUnavailable { .. } | ProxyError::InvalidResponse { .. } => {
                StatusCode::BadGateway
            }
        }
    }
}

/// Handles proxying requests to upstream servers
#[derive(Debug, Clone)]
pub struct ProxyHandler {
    /// Connection timeout duration
    connection_timeout: Duration,

    /// Request timeout duration
    request_timeout: Duration,
}

impl ProxyHandler {
    /// Create a new proxy handler
    pub fn new(connection_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            request_timeout,
        }
    }

    /// Forward a request according to `decision`.
    ///
    /// Always yields a response; upstream failures become 502 or 504.
    pub async fn forward(&self, request: &Request, decision: &ForwardDecision) -> Response {
        match self.try_forward(request, decision).await {
            Ok(response) => {
                tracing::info!(
                    target_url = %decision.target,
                    status = response.status.as_u16(),
                    method = %request.method,
                    path = %request.path,
                    upstream_path = %decision.rewritten_path,
                    "Request forwarded"
                );
                response
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    method = %request.method,
                    path = %request.path,
                    "Failed to proxy request"
                );
                Self::error_response(&e)
            }
        }
    }

    /// Forward a request, surfacing failures as `ProxyError`.
    pub async fn try_forward(
        &self,
        request: &Request,
        decision: &ForwardDecision,
    ) -> Result<Response, ProxyError> {
        let target = decision.target.as_str().to_string();

        // Connect to upstream with timeout
        let stream = timeout(self.connection_timeout, connect(&decision.target))
            .await
            .map_err(|_| ProxyError::Timeout {
                target: target.clone(),
                elapsed: self.connection_timeout,
            })?
            .map_err(|source| ProxyError::UpstreamUnavailable {
                target: target.clone(),
                source,
            })?;

        tracing::trace!(target_url = %target, "Connected to upstream");

        // Forward request and get response with timeout
        timeout(
            self.request_timeout,
            self.send_request_and_receive_response(stream, request, decision),
        )
        .await
        .map_err(|_| ProxyError::Timeout {
            target: target.clone(),
            elapsed: self.request_timeout,
        })?
        .map_err(|e| match e.downcast::<std::io::Error>() {
            Ok(source) => ProxyError::UpstreamUnavailable {
                target: target.clone(),
                source,
            },
            Err(e) => ProxyError::InvalidResponse {
                target: target.clone(),
                reason: format!("{:#}", e),
            },
        })
    }

    /// Send request to upstream and receive response
    async fn send_request_and_receive_response(
        &self,
        mut stream: TcpStream,
        request: &Request,
        decision: &ForwardDecision,
    ) -> Result<Response> {
        let request_bytes = self.build_http_request(request, decision);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        tracing::trace!("Request sent to upstream");

        read_http_response(&mut stream, request.method).await
    }

    /// Build HTTP request bytes to send upstream
    ///
    /// Note: This method is made public for integration testing purposes
    pub fn build_http_request(&self, request: &Request, decision: &ForwardDecision) -> Vec<u8> {
        let mut buffer = Vec::new();

        let path = upstream_path(&decision.target, &decision.rewritten_path);
        buffer.extend_from_slice(
            format!("{} {} {}\r\n", request.method, path, request.version).as_bytes(),
        );

        // Remove hop-by-hop headers
        let mut headers: HashMap<String, String> = request
            .headers
            .iter()
            .filter(|(k, _)| !HOP_BY_HOP_HEADERS.iter().any(|h| k.eq_ignore_ascii_case(h)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let client_host = request.header("Host").map(str::to_string);
        headers.retain(|k, _| !k.eq_ignore_ascii_case("Host"));

        let host = match client_host {
            Some(host) if !decision.change_origin => host,
            _ => target_authority(&decision.target),
        };
        headers.insert("Host".to_string(), host);

        if !request.body.is_empty() && request.header("Content-Length").is_none() {
            headers.insert("Content-Length".to_string(), request.body.len().to_string());
        }

        // One request per upstream connection
        headers.insert("Connection".to_string(), "close".to_string());

        // Write headers
        for (key, value) in &headers {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        // End of headers
        buffer.extend_from_slice(b"\r\n");

        // Body (if present)
        if !request.body.is_empty() {
            buffer.extend_from_slice(&request.body);
        }

        buffer
    }

    /// Handle proxy errors and return appropriate HTTP responses
    pub fn error_response(error: &ProxyError) -> Response {
        let body = match error {
            ProxyError::Timeout { .. } => {
                "504 Gateway Timeout\r\n\r\nThe upstream server did not respond in time."
            }
            ProxyError::UpstreamUnavailable { .. } => {
                "502 Bad Gateway\r\n\r\nFailed to connect to upstream server."
            }
            ProxyError::InvalidResponse { .. } => {
                "502 Bad Gateway\r\n\r\nThe upstream server sent an invalid response."
            }
        };

        Response::text(error.status(), body.as_bytes().to_vec())
    }
}

/// Open a connection to the target's host and port.
///
/// IP literals are connected to directly; `host_str` would hand the
/// resolver a bracketed `[::1]` for IPv6 targets.
async fn connect(target: &Url) -> std::io::Result<TcpStream> {
    let port = target.port_or_known_default().unwrap_or(80);
    match target.host() {
        Some(Host::Ipv4(addr)) => TcpStream::connect((addr, port)).await,
        Some(Host::Ipv6(addr)) => TcpStream::connect((addr, port)).await,
        Some(Host::Domain(domain)) => TcpStream::connect((domain, port)).await,
        None => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "target has no host",
        )),
    }
}

/// Join the target's own path with the rewritten request path.
///
/// The result always starts with `/`: an empty rewrite maps to the target
/// path (or `/`), and a relative one such as `extra` is joined with a slash.
pub fn upstream_path(target: &Url, rewritten: &str) -> String {
    let base = target.path().trim_end_matches('/');

    if rewritten.is_empty() {
        return if base.is_empty() { "/".to_string() } else { base.to_string() };
    }

    if rewritten.starts_with('/') {
        format!("{}{}", base, rewritten)
    } else if rewritten.starts_with('?') {
        let base = if base.is_empty() { "/" } else { base };
        format!("{}{}", base, rewritten)
    } else {
        format!("{}/{}", base, rewritten)
    }
}

/// Read HTTP response from upstream
async fn read_http_response(stream: &mut TcpStream, method: Method) -> Result<Response> {
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    // Read response headers
    loop {
        let n = stream.read_buf(&mut buffer).await?;

        if n == 0 {
            anyhow::bail!("Connection closed before complete response received");
        }

        // Check if we've received complete headers (look for \r\n\r\n)
        if let Some(headers_end) = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
        {
            let headers_bytes = buffer.split_to(headers_end + 4);
            let (status, mut headers) = parse_response_headers(&headers_bytes)?;

            let body = if method == Method::HEAD || status.is_bodiless() {
                Vec::new()
            } else if is_chunked(&headers) {
                let raw = read_to_end(stream, &mut buffer).await?;
                headers.retain(|k, _| !k.eq_ignore_ascii_case("Content-Length"));
                decode_chunked(&raw)?
            } else {
                read_response_body(stream, &mut buffer, &headers).await?
            };

            // Framing is re-established for the client connection
            headers.retain(|k, _| !HOP_BY_HOP_HEADERS.iter().any(|h| k.eq_ignore_ascii_case(h)));

            let response = ResponseBuilder::new(status)
                .headers(headers)
                .body(body)
                .build();

            return Ok(response);
        }

        // Prevent unbounded header growth
        if buffer.len() > MAX_RESPONSE_HEADER_BYTES {
            anyhow::bail!("Response headers too large");
        }
    }
}

/// Parse response headers
fn parse_response_headers(headers_bytes: &[u8]) -> Result<(StatusCode, HashMap<String, String>)> {
    let headers_str = std::str::from_utf8(headers_bytes)
        .context("Invalid UTF-8 in response headers")?;

    let mut lines = headers_str.lines();

    // Parse status line
    let status_line = lines.next().context("Empty response")?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();

    if parts.len() < 2 || !parts[0].starts_with("HTTP/") {
        anyhow::bail!("Invalid status line: {}", status_line);
    }

    let status_code: u16 = parts[1].parse()
        .context("Invalid status code")?;

    // Parse headers
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.insert(
                key.trim().to_string(),
                value.trim().to_string(),
            );
        }
    }

    Ok((StatusCode::from_u16(status_code), headers))
}

fn is_chunked(headers: &HashMap<String, String>) -> bool {
    headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("Transfer-Encoding") && v.to_ascii_lowercase().contains("chunked")
    })
}

/// Read response body based on Content-Length
async fn read_response_body(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    headers: &HashMap<String, String>,
) -> Result<Vec<u8>> {
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| v.parse::<usize>().context("Invalid Content-Length"))
        .transpose()?;

    let Some(content_length) = content_length else {
        // No Content-Length, read until connection closes
        return read_to_end(stream, buffer).await;
    };

    if content_length == 0 {
        return Ok(Vec::new());
    }

    let mut body = Vec::with_capacity(content_length);

    // Use existing buffer data first
    let from_buffer = buffer.len().min(content_length);
    body.extend_from_slice(&buffer[..from_buffer]);
    buffer.advance(from_buffer);

    // Read remaining bytes
    let mut chunk = [0u8; BUFFER_SIZE];
    while body.len() < content_length {
        let to_read = (content_length - body.len()).min(BUFFER_SIZE);
        let n = stream.read(&mut chunk[..to_read]).await?;

        if n == 0 {
            anyhow::bail!("Connection closed before complete body received");
        }

        body.extend_from_slice(&chunk[..n]);
    }

    Ok(body)
}

async fn read_to_end(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<Vec<u8>> {
    let mut body = buffer.split().to_vec();
    stream.read_to_end(&mut body).await?;
    Ok(body)
}

/// Decode a complete `Transfer-Encoding: chunked` body.
///
/// Chunk extensions and trailers are discarded.
pub fn decode_chunked(raw: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(raw.len());
    let mut rest = raw;

    loop {
        let line_end = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .context("Truncated chunk size line")?;
        let size_line = std::str::from_utf8(&rest[..line_end]).context("Invalid chunk size line")?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .with_context(|| format!("Invalid chunk size {:?}", size_hex))?;
        rest = &rest[line_end + 2..];

        if size == 0 {
            return Ok(body);
        }

        if rest.len() < size + 2 {
            anyhow::bail!("Truncated chunk");
        }
        body.extend_from_slice(&rest[..size]);
        rest = &rest[size + 2..];
    }
}
