// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP client for the remote collaborators.
//!
//! ## Endpoints
//!
//! | Method | Path | Used by |
//! |--------|------|---------|
//! | GET | `{api}/cages/key` | [`TeamKeySource`] |
//! | GET | `{api}/v2/relay-outbound` | [`RelayConfigSource`] |
//! | GET | `https://{ca_host}/` | [`CertificateSource`] |
//! | GET | `https://{name}.{app}.{enclave_host}/.well-known/attestation` | [`AttestationDocSource`] |
//!
//! Requests to the API carry the `Api-Key` header. 401 and 403 map to
//! [`ApiError::Unauthorized`] and [`ApiError::Forbidden`].

mod error;

pub use error::ApiError;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::attestation::docs::AttestationDocSource;
use crate::config::SdkConfig;
use crate::crypto::client::TeamKeySource;
use crate::crypto::curves::CurveName;
use crate::relay::ca::CertificateSource;
use crate::relay::config::{RelayConfigSource, RelayOutboundConfig, RelayOutboundResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const API_KEY_HEADER: &str = "Api-Key";

/// Response header overriding the relay config poll interval, in seconds.
pub const POLL_INTERVAL_HEADER: &str = "X-Poll-Interval";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamKeyResponse {
    key: Option<String>,
    ecdh_key: Option<String>,
    ecdh_p256_key: Option<String>,
}

impl TeamKeyResponse {
    /// Curve-specific key when present, else the generic `key`.
    fn select(self, curve: CurveName) -> Option<String> {
        let specific = match curve {
            CurveName::Secp256k1 => self.ecdh_key,
            CurveName::Prime256v1 => self.ecdh_p256_key,
        };
        specific.or(self.key)
    }
}

#[derive(Debug, Deserialize)]
struct AttestationDocResponse {
    attestation_doc: String,
}

/// HTTP client for the key, relay config, CA and attestation endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    api_key: String,
    api_url: String,
    app_id: Option<String>,
    enclave_hostname: String,
}

impl ApiClient {
    /// Client for `config.api_url`, authenticated with the API key.
    pub fn new(config: &SdkConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            enclave_hostname: config.enclave_hostname.clone(),
        })
    }

    /// Endpoint serving the team public keys.
    pub fn team_key_url(&self) -> String {
        format!("{}/cages/key", self.api_url)
    }

    /// Endpoint serving the relay outbound config.
    pub fn relay_config_url(&self) -> String {
        format!("{}/v2/relay-outbound", self.api_url)
    }

    /// Attestation endpoint for enclave service `name`.
    pub fn attestation_doc_url(&self, name: &str) -> Result<String, ApiError> {
        let app_id = self
            .app_id
            .as_deref()
            .ok_or_else(|| ApiError::MissingConfig("app id".to_string()))?;
        Ok(format!(
            "https://{name}.{}.{}/.well-known/attestation",
            app_id.replace('_', "-"),
            self.enclave_hostname
        ))
    }

    async fn get(&self, url: &str, authenticated: bool) -> Result<Response, ApiError> {
        let mut request = self.http.get(url);
        if authenticated {
            request = request.header(API_KEY_HEADER, &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Request(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "API response");
        if !status.is_success() {
            return Err(ApiError::from_status(status, url));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.get(url, true)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("GET {url} invalid JSON: {e}")))
    }
}

#[async_trait]
impl TeamKeySource for ApiClient {
    async fn fetch_team_key(&self, curve: CurveName) -> Result<String, ApiError> {
        let url = self.team_key_url();
        let response: TeamKeyResponse = self.get_json(&url).await?;
        response
            .select(curve)
            .ok_or_else(|| ApiError::InvalidResponse(format!("no {curve} key in response")))
    }
}

#[async_trait]
impl RelayConfigSource for ApiClient {
    async fn fetch_relay_config(&self) -> Result<RelayOutboundConfig, ApiError> {
        let url = self.relay_config_url();
        let response = self.get(&url, true).await?;

        let header_interval = response
            .headers()
            .get(POLL_INTERVAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok());

        let body: RelayOutboundResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("GET {url} invalid JSON: {e}")))?;

        Ok(RelayOutboundConfig::from_response(body, header_interval))
    }
}

#[async_trait]
impl CertificateSource for ApiClient {
    async fn fetch_certificate(&self, host: &str) -> Result<Vec<u8>, ApiError> {
        let url = format!("https://{host}/");
        let bytes = self
            .get(&url, false)
            .await?
            .bytes()
            .await
            .map_err(|e| ApiError::Request(format!("GET {url} body failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl AttestationDocSource for ApiClient {
    async fn fetch_attestation_doc(&self, name: &str) -> Result<String, ApiError> {
        let url = self.attestation_doc_url(name)?;
        let response: AttestationDocResponse = self.get_json(&url).await?;
        Ok(response.attestation_doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        let config = SdkConfig::new("key")
            .with_api_url("https://api.example.com/")
            .with_app_id("app_7f3a_b2")
            .with_enclave_hostname("enclave.example.com");
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn endpoint_urls() {
        let client = client();
        assert_eq!(client.team_key_url(), "https://api.example.com/cages/key");
        assert_eq!(
            client.relay_config_url(),
            "https://api.example.com/v2/relay-outbound"
        );
        assert_eq!(
            client.attestation_doc_url("payments").unwrap(),
            "https://payments.app-7f3a-b2.enclave.example.com/.well-known/attestation"
        );
    }

    #[test]
    fn attestation_url_needs_app_id() {
        let client = ApiClient::new(&SdkConfig::new("key")).unwrap();
        assert!(matches!(
            client.attestation_doc_url("payments"),
            Err(ApiError::MissingConfig(_))
        ));
    }

    #[test]
    fn team_key_selection_prefers_curve_specific_key() {
        let parse = |body: &str| serde_json::from_str::<TeamKeyResponse>(body).unwrap();

        let body = r#"{"key":"generic","ecdhKey":"k1","ecdhP256Key":"p256"}"#;
        assert_eq!(parse(body).select(CurveName::Secp256k1).as_deref(), Some("k1"));
        assert_eq!(parse(body).select(CurveName::Prime256v1).as_deref(), Some("p256"));

        let legacy = r#"{"key":"generic"}"#;
        assert_eq!(parse(legacy).select(CurveName::Prime256v1).as_deref(), Some("generic"));
        assert!(parse("{}").select(CurveName::Secp256k1).is_none());
    }
}
