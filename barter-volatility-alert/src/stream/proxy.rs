//! HTTP `CONNECT` tunnelling for the outbound feed connection.

use crate::error::StreamError;
use base64::Engine;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;
use url::Url;

/// Upper bound on the proxy's response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Open a TCP tunnel to `target` through the HTTP proxy at `proxy`.
///
/// The returned stream is positioned right after the proxy's response head, ready for the
/// TLS / WebSocket handshake with `target`.
pub async fn tunnel(proxy: &Url, target: &Url) -> Result<TcpStream, StreamError> {
    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| StreamError::Proxy(format!("proxy url has no host: {proxy}")))?;
    let proxy_port = proxy
        .port_or_known_default()
        .ok_or_else(|| StreamError::Proxy(format!("proxy url has no port: {proxy}")))?;
    let authority = authority(target)?;

    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(|error| StreamError::Proxy(format!("connect {proxy_host}:{proxy_port}: {error}")))?;

    stream
        .write_all(connect_request(&authority, proxy).as_bytes())
        .await
        .map_err(|error| StreamError::Proxy(error.to_string()))?;

    let head = read_response_head(&mut stream).await?;
    match parse_status(&head) {
        Some(status) if (200..300).contains(&status) => {
            debug!(%authority, status, "proxy tunnel established");
            Ok(stream)
        }
        Some(status) => Err(StreamError::Proxy(format!(
            "CONNECT {authority} refused with status {status}"
        ))),
        None => Err(StreamError::Proxy(format!(
            "malformed proxy response: {:?}",
            head.lines().next().unwrap_or_default()
        ))),
    }
}

/// `host:port` of the tunnel target.
fn authority(target: &Url) -> Result<String, StreamError> {
    let host = target.host_str().ok_or_else(|| StreamError::Url {
        url: target.to_string(),
        reason: "missing host".to_string(),
    })?;
    let port = target.port_or_known_default().ok_or_else(|| StreamError::Url {
        url: target.to_string(),
        reason: "missing port".to_string(),
    })?;
    Ok(format!("{host}:{port}"))
}

fn connect_request(authority: &str, proxy: &Url) -> String {
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");

    if !proxy.username().is_empty() {
        let credentials = format!("{}:{}", proxy.username(), proxy.password().unwrap_or_default());
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        request.push_str(&format!("Proxy-Authorization: Basic {encoded}\r\n"));
    }

    request.push_str("\r\n");
    request
}

/// Read up to and including the blank line terminating the response head.
///
/// Reads byte by byte so nothing belonging to the tunnelled stream is consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<String, StreamError> {
    let mut head = Vec::with_capacity(128);

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(StreamError::Proxy("proxy response head too large".to_string()));
        }
        let byte = stream
            .read_u8()
            .await
            .map_err(|error| StreamError::Proxy(format!("reading proxy response: {error}")))?;
        head.push(byte);
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Status code of an HTTP response head, eg/ `HTTP/1.1 200 Connection established`.
fn parse_status(head: &str) -> Option<u16> {
    let mut status_line = head.lines().next()?.split_whitespace();
    match status_line.next() {
        Some(version) if version.starts_with("HTTP/") => status_line.next()?.parse().ok(),
        _ => None,
    }
}
