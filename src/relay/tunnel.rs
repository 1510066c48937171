// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP CONNECT tunnelling through the relay.
//!
//! The relay is reached over TCP, or TLS when the endpoint is secure. A
//! `CONNECT` request names the real destination and carries the API key in
//! `Proxy-Authorization`. Once the relay answers `200`, the socket becomes a
//! raw tunnel, upgraded to TLS for secure destinations.
//!
//! Any other status is handed back to the caller as-is: the relay socket is
//! dropped and a [`ReplayStream`] replays the bytes the relay sent, so the
//! caller sees the relay's error response instead of a broken connection.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use url::Url;

use super::error::RelayError;
use super::target::RequestTarget;

/// Upper bound on the relay's response head.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

const TLS_PORT: u16 = 443;

/// Any bidirectional async byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Boxed stream returned by connects.
pub type BoxedIo = Box<dyn AsyncStream>;

/// Relay address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    /// Connect to the relay itself over TLS
    pub secure: bool,
}

impl ProxyEndpoint {
    /// Accepts `https://host[:port]`, `http://host[:port]` or bare
    /// `host:port`. A bare address is secure when its port is 443.
    pub fn parse(address: &str) -> Result<Self, RelayError> {
        let address = address.trim();
        if address.contains("://") {
            let url = Url::parse(address).map_err(|e| RelayError::InvalidProxy(e.to_string()))?;
            let secure = match url.scheme() {
                "https" => true,
                "http" => false,
                other => {
                    return Err(RelayError::InvalidProxy(format!("unsupported scheme {other}")))
                }
            };
            let host = url
                .host_str()
                .ok_or_else(|| RelayError::InvalidProxy(format!("{address} has no host")))?;
            return Ok(Self {
                host: host.to_string(),
                port: url.port().unwrap_or(if secure { TLS_PORT } else { 80 }),
                secure,
            });
        }

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| RelayError::InvalidProxy(format!("{address} has no port")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| RelayError::InvalidProxy(format!("invalid port in {address}")))?;
        if host.is_empty() {
            return Err(RelayError::InvalidProxy(format!("{address} has no host")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            secure: port == TLS_PORT,
        })
    }

    /// `host:port`.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The `CONNECT` request head for `target`.
pub fn connect_request(target: &RequestTarget, proxy_authorization: &str) -> String {
    format!(
        "CONNECT {} HTTP/1.1\r\nHost: {}\r\nProxy-Authorization: {}\r\nConnection: close\r\n\r\n",
        target.authority(),
        target.host_header(),
        proxy_authorization
    )
}

/// Status code from an HTTP response head.
fn parse_status(head: &[u8]) -> Option<u16> {
    let line_end = head.iter().position(|&b| b == b'\n').unwrap_or(head.len());
    let line = std::str::from_utf8(&head[..line_end]).ok()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Result of a CONNECT attempt.
pub struct Tunnel {
    status: u16,
    stream: BoxedIo,
}

impl Tunnel {
    /// Status code of the relay's `CONNECT` response.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The relay accepted the tunnel.
    pub fn is_established(&self) -> bool {
        self.status == 200
    }

    /// Tunnel stream, or a [`ReplayStream`] when the relay refused.
    pub fn into_stream(self) -> BoxedIo {
        self.stream
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel").field("status", &self.status).finish_non_exhaustive()
    }
}

/// Opens CONNECT tunnels to one relay.
#[derive(Clone)]
pub struct ConnectTunnel {
    proxy: ProxyEndpoint,
    proxy_authorization: String,
    proxy_tls: Arc<ClientConfig>,
}

impl ConnectTunnel {
    /// `proxy_tls` is used for the hop to the relay when it is secure.
    pub fn new(
        proxy: ProxyEndpoint,
        proxy_authorization: impl Into<String>,
        proxy_tls: Arc<ClientConfig>,
    ) -> Self {
        Self {
            proxy,
            proxy_authorization: proxy_authorization.into(),
            proxy_tls,
        }
    }

    /// Relay address.
    pub fn proxy(&self) -> &ProxyEndpoint {
        &self.proxy
    }

    /// Value sent as `Proxy-Authorization`.
    pub fn proxy_authorization(&self) -> &str {
        &self.proxy_authorization
    }

    /// Open a tunnel to `target`. With `destination_tls` the tunnel is
    /// upgraded to TLS for the destination host once the relay accepts.
    pub async fn establish(
        &self,
        target: &RequestTarget,
        destination_tls: Option<Arc<ClientConfig>>,
    ) -> Result<Tunnel, RelayError> {
        let address = self.proxy.authority();
        let tcp = TcpStream::connect(&address)
            .await
            .map_err(|source| RelayError::ProxyConnect {
                address: address.clone(),
                source,
            })?;

        let proxy_stream: BoxedIo = if self.proxy.secure {
            let server_name = server_name(&self.proxy.host)?;
            let tls = TlsConnector::from(self.proxy_tls.clone())
                .connect(server_name, tcp)
                .await
                .map_err(|e| RelayError::Tls(format!("relay {address}: {e}")))?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        let mut reader = BufReader::new(proxy_stream);
        reader
            .write_all(connect_request(target, &self.proxy_authorization).as_bytes())
            .await?;
        reader.flush().await?;

        let head = read_response_head(&mut reader).await?;
        let status = parse_status(&head).ok_or_else(|| {
            RelayError::Handshake(format!(
                "unparseable relay response: {}",
                String::from_utf8_lossy(&head).lines().next().unwrap_or_default()
            ))
        })?;

        if status != 200 {
            warn!(
                status,
                target = %target.authority(),
                relay = %address,
                "Relay refused CONNECT, replaying its response"
            );
            let mut replay = head;
            replay.extend_from_slice(reader.buffer());
            return Ok(Tunnel {
                status,
                stream: Box::new(ReplayStream::new(replay)),
            });
        }

        debug!(target = %target.authority(), relay = %address, "CONNECT tunnel established");

        let stream: BoxedIo = match destination_tls {
            Some(config) => {
                let tls = TlsConnector::from(config)
                    .connect(server_name(&target.host)?, reader)
                    .await
                    .map_err(|e| RelayError::Tls(format!("{}: {e}", target.host)))?;
                Box::new(tls)
            }
            None => Box::new(reader),
        };

        Ok(Tunnel { status, stream })
    }
}

/// TLS server name for `host`, unbracketing IPv6 literals.
pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>, RelayError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(bare.to_string())
        .map_err(|e| RelayError::Tls(format!("invalid server name {host}: {e}")))
}

/// Read up to and including the blank line ending the response head. Stops
/// early at EOF.
async fn read_response_head<R>(reader: &mut R) -> Result<Vec<u8>, RelayError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        let read = reader.read_until(b'\n', &mut head).await?;
        if read == 0 {
            if head.is_empty() {
                return Err(RelayError::Handshake(
                    "relay closed the connection without responding".to_string(),
                ));
            }
            return Ok(head);
        }
        if head.ends_with(b"\r\n\r\n") || head == b"\r\n" {
            return Ok(head);
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(RelayError::Handshake(format!(
                "relay response head exceeds {MAX_RESPONSE_HEAD} bytes"
            )));
        }
    }
}

/// Replays a fixed buffer to readers and discards writes.
#[derive(Debug)]
pub struct ReplayStream {
    data: Vec<u8>,
    position: usize,
}

impl ReplayStream {
    /// Stream yielding `data`, then EOF.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }
}

impl AsyncRead for ReplayStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let remaining = &self.data[self.position..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        self.position += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ReplayStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
