// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! rustls hook for attested enclave connections.
//!
//! Enclave hosts present certificates that are bound to an attestation
//! document rather than issued by a public CA. For hostnames under the
//! enclave base domain, [`AttestedServerVerifier`] replaces chain validation
//! with [`verify_connection`]. Every other hostname goes through the normal
//! web PKI verifier. Handshake signatures are always checked with the ring
//! provider.
//!
//! A failed check starts a background reload of that service's document, so
//! a redeployed enclave is accepted on the next handshake instead of after
//! the next poll.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use super::docs::AttestationDocCache;
use super::pcrs::PcrManager;
use super::verify::{service_name_from_hostname, verify_connection, AttestationVerifier};
use crate::relay::ca::webpki_root_store;
use crate::relay::RelayError;

/// Server certificate verifier that attests enclave hosts.
pub struct AttestedServerVerifier {
    enclave_suffix: String,
    pcrs: PcrManager,
    docs: AttestationDocCache,
    verifier: Arc<dyn AttestationVerifier>,
    webpki: Arc<WebPkiServerVerifier>,
    provider: Arc<CryptoProvider>,
}

impl AttestedServerVerifier {
    /// Attest hosts under `enclave_hostname`, e.g. `cage.example.com`.
    pub fn new(
        enclave_hostname: &str,
        pcrs: PcrManager,
        docs: AttestationDocCache,
        verifier: Arc<dyn AttestationVerifier>,
    ) -> Result<Self, RelayError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let webpki =
            WebPkiServerVerifier::builder_with_provider(Arc::new(webpki_root_store()), provider.clone())
                .build()
                .map_err(|e| RelayError::Tls(format!("web PKI verifier: {e}")))?;

        Ok(Self {
            enclave_suffix: format!(".{}", enclave_hostname.trim_start_matches('.')),
            pcrs,
            docs,
            verifier,
            webpki,
            provider,
        })
    }

    /// True for hostnames under the enclave base domain.
    pub fn is_enclave_host(&self, hostname: &str) -> bool {
        hostname.ends_with(&self.enclave_suffix)
    }

    /// Client config using this verifier.
    pub fn into_client_config(self) -> Result<ClientConfig, RelayError> {
        let provider = self.provider.clone();
        Ok(ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| RelayError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(self))
            .with_no_client_auth())
    }
}

impl fmt::Debug for AttestedServerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestedServerVerifier")
            .field("enclave_suffix", &self.enclave_suffix)
            .finish_non_exhaustive()
    }
}

impl ServerCertVerifier for AttestedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let ServerName::DnsName(dns) = server_name {
            let hostname = dns.as_ref();
            if self.is_enclave_host(hostname) {
                return match verify_connection(
                    hostname,
                    end_entity.as_ref(),
                    &self.pcrs,
                    &self.docs,
                    self.verifier.as_ref(),
                ) {
                    Ok(()) => Ok(ServerCertVerified::assertion()),
                    Err(e) => {
                        if let Some(name) = service_name_from_hostname(hostname) {
                            self.docs.reload_in_background(name);
                        }
                        Err(rustls::Error::General(e.to_string()))
                    }
                };
            }
        }

        self.webpki
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
