// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLS configuration for websocket dials and recent-log HTTP fetches.

use std::sync::Arc;

use reqwest::ClientBuilder;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::debug;

use crate::config::TlsOptions;
use crate::error::ConsumerError;

/// Creates a reqwest client builder.
///
/// With a TLS configuration the client trusts exactly what the websocket
/// connector trusts; without one (plain `ws` endpoints fetch over plain HTTP)
/// reqwest's own rustls setup is used.
pub(crate) fn create_reqwest_client_builder(tls: Option<&ClientConfig>) -> ClientBuilder {
    match tls {
        Some(config) => reqwest::Client::builder().use_preconfigured_tls(config.clone()),
        None => reqwest::Client::builder().use_rustls_tls(),
    }
}

/// Builds a rustls client configuration on the ring provider.
///
/// Native roots are loaded when verification is on; with `skip_verify` any
/// server certificate is accepted but handshake signatures are still checked.
pub(crate) fn client_config(options: TlsOptions) -> Result<ClientConfig, ConsumerError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|err| ConsumerError::Tls(err.to_string()))?;

    if options.skip_verify {
        debug!("TLS certificate verification disabled for traffic controller connections");
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            .with_no_client_auth());
    }

    let mut root_cert_store = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    for err in &native_certs.errors {
        debug!("Failed to load native certificate: {err}");
    }
    let mut valid_count = 0;
    for cert in native_certs.certs {
        match root_cert_store.add(cert) {
            Ok(()) => valid_count += 1,
            Err(err) => {
                debug!("Failed to parse certificate: {:?}", err);
            }
        }
    }
    if valid_count == 0 {
        return Err(ConsumerError::Tls(
            "no valid certificates found in native root store".to_string(),
        ));
    }

    Ok(builder
        .with_root_certificates(root_cert_store)
        .with_no_client_auth())
}

/// Verifier that trusts every server certificate.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
