// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outbound relay interception.
//!
//! Outgoing HTTPS requests whose destination matches a decryption domain are
//! tunnelled through the relay with `CONNECT`, authenticated with the API
//! key. Everything else connects directly. Relayed TLS is validated against
//! the relay CA on top of the web PKI roots.
//!
//! Two ways in:
//!
//! - [`OutboundRelay::connect`] returns a ready stream for a destination
//! - [`OutboundRelay::reqwest_client`] builds a `reqwest` client whose proxy
//!   and trust settings apply the same routing

pub mod ca;
pub mod config;
pub mod error;
pub mod filter;
pub mod target;
pub mod tunnel;

pub use ca::{CaCertificate, CertificateSource, RelayCaStore};
pub use config::{RelayConfigCache, RelayConfigSource, RelayOutboundConfig};
pub use error::RelayError;
pub use filter::DecryptionDomainFilter;
pub use target::{RequestOptions, RequestTarget};
pub use tunnel::{BoxedIo, ConnectTunnel, ProxyEndpoint, ReplayStream, Tunnel};

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderValue;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::Url;

use crate::config::SdkConfig;
use crate::targets::parse_targets;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Routing decision for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    Relay {
        proxy: ProxyEndpoint,
        proxy_authorization: String,
    },
}

/// An open connection to a destination.
pub enum OutboundConnection {
    Direct(BoxedIo),
    Relayed(Tunnel),
}

impl OutboundConnection {
    /// True when the connection goes through the relay.
    pub fn is_relayed(&self) -> bool {
        matches!(self, OutboundConnection::Relayed(_))
    }

    /// The underlying byte stream.
    pub fn into_stream(self) -> BoxedIo {
        match self {
            OutboundConnection::Direct(stream) => stream,
            OutboundConnection::Relayed(tunnel) => tunnel.into_stream(),
        }
    }
}

impl std::fmt::Debug for OutboundConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundConnection::Direct(_) => f.write_str("Direct"),
            OutboundConnection::Relayed(tunnel) => f.debug_tuple("Relayed").field(tunnel).finish(),
        }
    }
}

/// Routes outbound connections directly or through the relay.
pub struct OutboundRelay {
    filter: DecryptionDomainFilter,
    tunnel: ConnectTunnel,
    ca: Arc<RelayCaStore>,
    direct_tls: Arc<ClientConfig>,
    debug_requests: bool,
}

impl OutboundRelay {
    /// `relay_config`, when given, adds the polled destination domains to the
    /// configured decryption domains.
    pub fn new(
        config: &SdkConfig,
        ca_source: Arc<dyn CertificateSource>,
        relay_config: Option<RelayConfigCache>,
    ) -> Result<Self, RelayError> {
        let proxy = ProxyEndpoint::parse(&config.relay_url)?;
        let direct_tls = Arc::new(ca::client_config_with_roots(ca::webpki_root_store())?);
        let ca = Arc::new(RelayCaStore::new(ca_source, &config.ca_hosts)?);

        let filter = DecryptionDomainFilter::new(
            parse_targets(config.decryption_domains.iter().map(String::as_str)),
            relay_config,
        );

        Ok(Self {
            filter,
            tunnel: ConnectTunnel::new(proxy, config.api_key.clone(), direct_tls.clone()),
            ca,
            direct_tls,
            debug_requests: config.debug_requests,
        })
    }

    pub fn filter(&self) -> &DecryptionDomainFilter {
        &self.filter
    }

    /// Relay CA trust store.
    pub fn ca_store(&self) -> &Arc<RelayCaStore> {
        &self.ca
    }

    /// Only secure destinations are relayed.
    pub fn route(&self, target: &RequestTarget) -> Route {
        let intercept = target.secure && self.filter.should_intercept(target);

        if self.debug_requests {
            debug!(
                host = %target.host,
                path = %target.path,
                intercepted = intercept,
                "Outbound request routed"
            );
        }

        if intercept {
            Route::Relay {
                proxy: self.tunnel.proxy().clone(),
                proxy_authorization: self.proxy_authorization().to_string(),
            }
        } else {
            Route::Direct
        }
    }

    /// Connect to `target`, through the relay when it is routed there.
    pub async fn connect(&self, target: &RequestTarget) -> Result<OutboundConnection, RelayError> {
        match self.route(target) {
            Route::Relay { .. } => {
                let trust = self.ca.ensure_fresh().await?;
                let tunnel = self.tunnel.establish(target, Some(trust)).await?;
                Ok(OutboundConnection::Relayed(tunnel))
            }
            Route::Direct => {
                let stream = TcpStream::connect(target.authority()).await?;
                if !target.secure {
                    return Ok(OutboundConnection::Direct(Box::new(stream)));
                }
                let server_name = tunnel::server_name(&target.host)?;
                let tls = TlsConnector::from(self.direct_tls.clone())
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| RelayError::Tls(format!("{}: {e}", target.host)))?;
                Ok(OutboundConnection::Direct(Box::new(tls)))
            }
        }
    }

    /// Trust config for relayed TLS, fetching the relay CA when stale.
    pub async fn client_config(&self) -> Result<Arc<ClientConfig>, RelayError> {
        self.ca.ensure_fresh().await
    }

    /// A `reqwest` proxy that sends matching destinations to the relay.
    pub fn reqwest_proxy(&self) -> Result<reqwest::Proxy, RelayError> {
        let endpoint = self.tunnel.proxy();
        let scheme = if endpoint.secure { "https" } else { "http" };
        let proxy_url = Url::parse(&format!("{scheme}://{}", endpoint.authority()))
            .map_err(|e| RelayError::InvalidProxy(e.to_string()))?;
        let auth = HeaderValue::from_str(self.proxy_authorization())
            .map_err(|e| RelayError::InvalidProxy(format!("API key is not a valid header: {e}")))?;

        let filter = self.filter.clone();
        let debug_requests = self.debug_requests;
        let proxy = reqwest::Proxy::custom(move |url| {
            let target = RequestTarget::from_url(url).ok()?;
            let intercept = target.secure && filter.should_intercept(&target);
            if debug_requests {
                debug!(host = %target.host, path = %target.path, intercepted = intercept, "Outbound request routed");
            }
            intercept.then(|| proxy_url.clone())
        });

        Ok(proxy.custom_http_auth(auth))
    }

    /// A `reqwest` client routed through [`Self::reqwest_proxy`] that trusts
    /// the relay CA.
    pub async fn reqwest_client(&self) -> Result<reqwest::Client, RelayError> {
        let trust = self.ca.ensure_fresh().await?;
        reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .proxy(self.reqwest_proxy()?)
            .use_preconfigured_tls((*trust).clone())
            .build()
            .map_err(|e| RelayError::Tls(format!("failed to build HTTP client: {e}")))
    }

    fn proxy_authorization(&self) -> &str {
        self.tunnel.proxy_authorization()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use async_trait::async_trait;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    struct TestCa;

    #[async_trait]
    impl CertificateSource for TestCa {
        async fn fetch_certificate(&self, _host: &str) -> Result<Vec<u8>, ApiError> {
            Ok(include_bytes!("testdata/relay_ca.pem").to_vec())
        }
    }

    fn relay(config: SdkConfig) -> OutboundRelay {
        OutboundRelay::new(&config, Arc::new(TestCa), None).unwrap()
    }

    fn target(url: &str) -> RequestTarget {
        RequestTarget::parse(url).unwrap()
    }

    #[test]
    fn routes_matching_secure_destinations_to_relay() {
        let relay = relay(
            SdkConfig::new("sk_test")
                .with_decryption_domains(vec!["api.stripe.com".to_string()]),
        );

        match relay.route(&target("https://api.stripe.com/v1/charges")) {
            Route::Relay {
                proxy,
                proxy_authorization,
            } => {
                assert_eq!(proxy.authority(), "relay.evervault.com:443");
                assert!(proxy.secure);
                assert_eq!(proxy_authorization, "sk_test");
            }
            Route::Direct => panic!("expected relay route"),
        }

        assert_eq!(relay.route(&target("https://api.github.com/")), Route::Direct);
        assert_eq!(relay.route(&target("http://api.stripe.com/")), Route::Direct);
    }

    #[test]
    fn invalid_relay_address_is_rejected() {
        let config = SdkConfig::new("k").with_relay_url("relay-without-port");
        assert!(matches!(
            OutboundRelay::new(&config, Arc::new(TestCa), None),
            Err(RelayError::InvalidProxy(_))
        ));
    }

    #[test]
    fn reqwest_proxy_builds() {
        let relay = relay(
            SdkConfig::new("sk_test")
                .with_decryption_domains(vec!["api.stripe.com".to_string()]),
        );
        assert!(relay.reqwest_proxy().is_ok());

        let bad_key = relay_with_key("bad\nkey");
        assert!(bad_key.reqwest_proxy().is_err());
    }

    fn relay_with_key(key: &str) -> OutboundRelay {
        relay(SdkConfig::new(key))
    }

    #[tokio::test]
    async fn relayed_connect_sends_api_key_and_surfaces_refusal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut head = String::new();
            while !head.ends_with("\r\n\r\n") {
                if reader.read_line(&mut head).await.unwrap() == 0 {
                    break;
                }
            }
            reader
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                .await
                .unwrap();
            head
        });

        let relay = relay(
            SdkConfig::new("sk_test")
                .with_relay_url(format!("127.0.0.1:{port}"))
                .with_decryption_domains(vec!["api.stripe.com".to_string()]),
        );

        let connection = relay
            .connect(&target("https://api.stripe.com/v1/charges"))
            .await
            .unwrap();
        assert!(connection.is_relayed());
        match &connection {
            OutboundConnection::Relayed(tunnel) => assert_eq!(tunnel.status(), 403),
            OutboundConnection::Direct(_) => unreachable!(),
        }

        let mut replayed = String::new();
        connection.into_stream().read_to_string(&mut replayed).await.unwrap();
        assert_eq!(replayed, "HTTP/1.1 403 Forbidden\r\n\r\n");

        let head = server.await.unwrap();
        assert!(head.starts_with("CONNECT api.stripe.com:443 HTTP/1.1\r\n"));
        assert!(head.contains("Proxy-Authorization: sk_test\r\n"));
        assert!(relay.ca_store().certificate().is_some());
    }

    #[tokio::test]
    async fn unmatched_destination_connects_directly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
        });

        let relay = relay(SdkConfig::new("sk_test"));
        let connection = relay
            .connect(&target(&format!("http://127.0.0.1:{port}/")))
            .await
            .unwrap();
        assert!(!connection.is_relayed());

        let mut greeting = String::new();
        connection.into_stream().read_to_string(&mut greeting).await.unwrap();
        assert_eq!(greeting, "hello");
        assert!(relay.ca_store().certificate().is_none());
    }
}
