//! WebSocket handshake implementation (RFC 6455 Section 4).
//!
//! This module builds, parses and validates the HTTP Upgrade exchange and
//! negotiates the subprotocol. Reading the HTTP head off the transport is done by
//! [`read_http_head`], which leaves any bytes that follow the head (early frames
//! from the peer) in the caller's buffer.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::protocol::mask::MaskGenerator;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version spoken.
pub const WS_VERSION: u8 = 13;

/// Parse HTTP headers from an iterator of lines into a case-insensitive HashMap.
///
/// Headers listed in `security_headers` may appear at most once.
///
/// # Errors
/// Returns `Error::InvalidHandshake` if a security-critical header is duplicated.
fn parse_headers<'a, I>(lines: I, security_headers: &[&str]) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name_lower = name.trim().to_ascii_lowercase();

            if security_headers.contains(&name_lower.as_str()) && headers.contains_key(&name_lower)
            {
                return Err(Error::InvalidHandshake(format!(
                    "Duplicate header: {}",
                    name.trim()
                )));
            }

            headers.insert(name_lower, value.trim().to_string());
        }
    }

    Ok(headers)
}

/// Validate that a header name or value does not contain CR or LF characters.
///
/// # Errors
/// Returns `Error::InvalidHeaderValue` if the value contains `\r` or `\n`.
fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

fn require_upgrade_headers(headers: &HashMap<String, String>) -> Result<()> {
    let upgrade = headers
        .get("upgrade")
        .ok_or_else(|| Error::InvalidHandshake("Missing Upgrade header".into()))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Upgrade header: {upgrade}"
        )));
    }

    let connection = headers
        .get("connection")
        .ok_or_else(|| Error::InvalidHandshake("Missing Connection header".into()))?;
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(Error::InvalidHandshake(format!(
            "Invalid Connection header: {connection}"
        )));
    }
    Ok(())
}

/// Computes the Sec-WebSocket-Accept value from the initiator's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsengine::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// A fresh Sec-WebSocket-Key: 16 random bytes, base64 encoded.
#[must_use]
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    if getrandom::getrandom(&mut nonce).is_err() {
        let mut masks = MaskGenerator::new();
        for chunk in nonce.chunks_exact_mut(4) {
            chunk.copy_from_slice(&masks.next_key());
        }
    }
    BASE64.encode(nonce)
}

/// Trim each candidate, drop empty ones and duplicates, keep first-seen order.
#[must_use]
pub fn normalize_protocols<S: AsRef<str>>(candidates: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let name = candidate.as_ref().trim();
        if !name.is_empty() && !out.iter().any(|p| p == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Pick the first protocol in the initiator's `offered` order that the acceptor
/// `supported`. `None` when the lists do not intersect.
#[must_use]
pub fn select_subprotocol<S: AsRef<str>>(offered: &[String], supported: &[S]) -> Option<String> {
    offered
        .iter()
        .find(|candidate| supported.iter().any(|s| s.as_ref().trim() == candidate.as_str()))
        .cloned()
}

/// WebSocket handshake request, as sent by the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The request path (e.g., "/chat").
    pub path: String,
    /// The Host header value.
    pub host: String,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// The Sec-WebSocket-Version (should be 13).
    pub version: u8,
    /// The Sec-WebSocket-Protocol candidates in preference order.
    pub protocols: Vec<String>,
    /// Additional headers, in the order they are written.
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Build an initiator request with a fresh key.
    ///
    /// Candidate protocols are normalized with [`normalize_protocols`].
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if the host, path, a protocol or an
    /// additional header contains CR or LF.
    pub fn new<S: AsRef<str>>(
        host: &str,
        path: &str,
        protocols: &[S],
        headers: &[(String, String)],
    ) -> Result<Self> {
        validate_header_value("Host", host)?;
        validate_header_value("path", path)?;
        let protocols = normalize_protocols(protocols);
        for proto in &protocols {
            validate_header_value("Sec-WebSocket-Protocol", proto)?;
            if proto.contains(',') {
                return Err(Error::InvalidHeaderValue {
                    header: "Sec-WebSocket-Protocol".into(),
                    reason: format!("protocol name {proto:?} contains a comma"),
                });
            }
        }
        for (name, value) in headers {
            validate_header_value(name, name)?;
            validate_header_value(name, value)?;
        }

        Ok(Self {
            path: if path.is_empty() { "/".into() } else { path.into() },
            host: host.into(),
            key: generate_key(),
            version: WS_VERSION,
            protocols,
            headers: headers.to_vec(),
        })
    }

    /// Write the HTTP request to a buffer.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Version: {}\r\n", self.version).as_bytes());
        if !self.protocols.is_empty() {
            buf.extend_from_slice(
                format!("Sec-WebSocket-Protocol: {}\r\n", self.protocols.join(", ")).as_bytes(),
            );
        }
        for (name, value) in &self.headers {
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
    }

    /// Parse a WebSocket handshake request from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The request line is malformed or missing.
    /// - The HTTP method is not `GET`.
    /// - The HTTP version is not `HTTP/1.1`.
    /// - Any required headers are missing: `Upgrade`, `Connection`, `Host`, `Sec-WebSocket-Key`, `Sec-WebSocket-Version`.
    /// - The `Upgrade` header is not `websocket`.
    /// - The `Connection` header does not contain `upgrade`.
    /// - The `Sec-WebSocket-Version` is not a valid integer.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        // "GET /path HTTP/1.1"
        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(Error::InvalidHandshake("Invalid request line".into()));
        }
        if parts[0] != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {}",
                parts[0]
            )));
        }
        if parts[2] != "HTTP/1.1" {
            return Err(Error::InvalidHandshake(format!(
                "Expected HTTP/1.1, got {}",
                parts[2]
            )));
        }

        let mut headers = parse_headers(
            lines,
            &[
                "host",
                "upgrade",
                "connection",
                "sec-websocket-key",
                "sec-websocket-version",
            ],
        )?;
        require_upgrade_headers(&headers)?;

        let host = headers
            .remove("host")
            .ok_or_else(|| Error::InvalidHandshake("Missing Host header".into()))?;
        let key = headers
            .remove("sec-websocket-key")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Key header".into()))?;
        let version_str = headers.remove("sec-websocket-version").ok_or_else(|| {
            Error::InvalidHandshake("Missing Sec-WebSocket-Version header".into())
        })?;
        let version: u8 = version_str
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid version: {version_str}")))?;

        let protocols = headers
            .remove("sec-websocket-protocol")
            .map(|p| normalize_protocols(p.split(',').collect::<Vec<_>>().as_slice()))
            .unwrap_or_default();

        headers.remove("upgrade");
        headers.remove("connection");
        let mut extra: Vec<(String, String)> = headers.into_iter().collect();
        extra.sort();

        Ok(Self {
            path: parts[1].to_string(),
            host,
            key,
            version,
            protocols,
            headers: extra,
        })
    }

    /// Validate the handshake request according to RFC 6455.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The WebSocket version is not 13.
    /// - The `Sec-WebSocket-Key` is not valid Base64.
    /// - The decoded `Sec-WebSocket-Key` is not exactly 16 bytes.
    /// - The `Host` header is empty.
    pub fn validate(&self) -> Result<()> {
        if self.version != WS_VERSION {
            return Err(Error::InvalidHandshake(format!(
                "Unsupported WebSocket version: {} (expected 13)",
                self.version
            )));
        }

        match BASE64.decode(&self.key) {
            Ok(decoded) if decoded.len() == 16 => {}
            Ok(decoded) => {
                return Err(Error::InvalidHandshake(format!(
                    "Sec-WebSocket-Key must be 16 bytes, got {}",
                    decoded.len()
                )));
            }
            Err(_) => {
                return Err(Error::InvalidHandshake(
                    "Invalid Sec-WebSocket-Key: not valid Base64".into(),
                ));
            }
        }

        if self.host.is_empty() {
            return Err(Error::InvalidHandshake(
                "Host header cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Look up an additional header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// WebSocket handshake response, as sent by the acceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// The selected Sec-WebSocket-Protocol (optional).
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Answer a validated request, selecting a subprotocol from `supported`.
    #[must_use]
    pub fn accept<S: AsRef<str>>(req: &HandshakeRequest, supported: &[S]) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
            protocol: select_subprotocol(&req.protocols, supported),
        }
    }

    /// Write the HTTP response to a buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if the protocol contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());

        if let Some(ref proto) = self.protocol {
            validate_header_value("Sec-WebSocket-Protocol", proto)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {proto}\r\n").as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Parse a WebSocket handshake response from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8.
    /// - The response is empty or the status line is missing.
    /// - The status code is not `101 Switching Protocols`.
    /// - Any required headers are missing: `Upgrade`, `Connection`, `Sec-WebSocket-Accept`.
    /// - The `Upgrade` header is not `websocket`.
    /// - The `Connection` header does not contain `upgrade`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.lines();

        // "HTTP/1.1 101 Switching Protocols"
        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        let mut status = status_line.split_whitespace();
        if status.next() != Some("HTTP/1.1") || status.next() != Some("101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let mut headers = parse_headers(
            lines,
            &["upgrade", "connection", "sec-websocket-accept", "sec-websocket-protocol"],
        )?;
        require_upgrade_headers(&headers)?;

        let accept = headers
            .remove("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?;
        let protocol = headers
            .remove("sec-websocket-protocol")
            .filter(|p| !p.is_empty());

        Ok(Self { accept, protocol })
    }

    /// Check this response against the request that produced it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the accept token does not match the
    /// request key, or the selected protocol was never offered.
    pub fn verify(&self, req: &HandshakeRequest) -> Result<()> {
        if self.accept != compute_accept_key(&req.key) {
            return Err(Error::InvalidHandshake(
                "Sec-WebSocket-Accept does not match the request key".into(),
            ));
        }
        if let Some(ref proto) = self.protocol {
            if !req.protocols.iter().any(|p| p == proto) {
                return Err(Error::InvalidHandshake(format!(
                    "Acceptor selected a protocol that was not offered: {proto}"
                )));
            }
        }
        Ok(())
    }
}

/// Response sent by an acceptor that refuses the upgrade.
pub fn write_rejection(buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"HTTP/1.1 400 Bad Request\r\n");
    buf.extend_from_slice(format!("Sec-WebSocket-Version: {WS_VERSION}\r\n").as_bytes());
    buf.extend_from_slice(b"Content-Length: 0\r\n\r\n");
}

/// Read one HTTP head (through the blank line) from `io`.
///
/// Bytes are accumulated in `buf`; on success the head is split off and
/// returned, and whatever followed it stays in `buf`.
///
/// # Errors
///
/// - `Error::HandshakeTooLarge` if no complete head fits in `limit` bytes
/// - `Error::TransportError` on I/O failure or end of stream
pub async fn read_http_head<R>(io: &mut R, buf: &mut BytesMut, limit: usize) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut scanned: usize = 0;
    loop {
        if let Some(pos) = find_head_end(&buf[scanned.saturating_sub(3)..]) {
            let end = scanned.saturating_sub(3) + pos + 4;
            if end > limit {
                return Err(Error::HandshakeTooLarge {
                    size: end,
                    max: limit,
                });
            }
            return Ok(buf.split_to(end));
        }
        scanned = buf.len();
        if scanned > limit {
            return Err(Error::HandshakeTooLarge {
                size: scanned,
                max: limit,
            });
        }

        buf.reserve(1024);
        if io.read_buf(buf).await? == 0 {
            return Err(Error::TransportError(
                "connection closed during handshake".into(),
            ));
        }
    }
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}
