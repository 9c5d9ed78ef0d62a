//! TLS plumbing for both edges.
//!
//! Server side: the client-facing HTTPS listener with the wildcard
//! certificate. Client side: the trust configurations used when dialing
//! backends — the CA bundle fetched at startup for routes and the
//! resolution API, and a verification-disabled config reserved for the
//! default-backend branch.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::error::{GateError, GateResult};

/// HTTPS listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// HTTPS listener address
    #[serde(default = "default_tls_bind")]
    pub bind: SocketAddr,
    /// Wildcard certificate chain (PEM)
    pub cert_path: Option<String>,
    /// Private key (PEM)
    pub key_path: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_tls_bind(),
            cert_path: None,
            key_path: None,
        }
    }
}

fn default_tls_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 443))
}

/// Manager for the client-facing TLS termination.
pub struct TlsManager {
    config: TlsConfig,
    server_config: Option<Arc<ServerConfig>>,
}

impl TlsManager {
    pub fn new(config: TlsConfig) -> Self {
        Self {
            config,
            server_config: None,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind
    }

    /// Load the certificate chain and key and build the server config.
    pub fn initialize(&mut self) -> GateResult<()> {
        if !self.config.enabled {
            debug!("TLS is disabled");
            return Ok(());
        }

        let cert_path = self
            .config
            .cert_path
            .as_ref()
            .ok_or_else(|| GateError::config("tls cert_path not provided"))?;
        let key_path = self
            .config
            .key_path
            .as_ref()
            .ok_or_else(|| GateError::config("tls key_path not provided"))?;

        let (certs, key) = load_certificate_and_key(cert_path, key_path)?;
        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| GateError::tls(format!("failed to build TLS server config: {}", e)))?;

        self.server_config = Some(Arc::new(server_config));
        info!(bind = %self.config.bind, "TLS termination initialized");
        Ok(())
    }

    pub fn acceptor(&self) -> Option<TlsAcceptor> {
        self.server_config
            .as_ref()
            .map(|cfg| TlsAcceptor::from(Arc::clone(cfg)))
    }
}

fn load_certificate_and_key<P: AsRef<Path>>(
    cert_path: P,
    key_path: P,
) -> GateResult<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_file = File::open(cert_path.as_ref())
        .map_err(|e| GateError::tls(format!("cannot open certificate file: {}", e)))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|e| GateError::tls(format!("cannot parse certificate file: {}", e)))?;
    if certs.is_empty() {
        return Err(GateError::tls("certificate file holds no certificates"));
    }

    let key_file = File::open(key_path.as_ref())
        .map_err(|e| GateError::tls(format!("cannot open key file: {}", e)))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| GateError::tls(format!("cannot parse key file: {}", e)))?
        .ok_or_else(|| GateError::tls("key file holds no private key"))?;

    Ok((certs, key))
}

/// Client config trusting exactly the given PEM bundle.
pub fn client_config_from_ca<P: AsRef<Path>>(ca_path: P) -> GateResult<ClientConfig> {
    let file = File::open(ca_path.as_ref())
        .map_err(|e| GateError::tls(format!("cannot open CA bundle: {}", e)))?;
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
        let cert = cert.map_err(|e| GateError::tls(format!("cannot parse CA bundle: {}", e)))?;
        roots
            .add(cert)
            .map_err(|e| GateError::tls(format!("cannot add CA certificate: {}", e)))?;
    }
    if roots.is_empty() {
        return Err(GateError::tls("CA bundle holds no certificates"));
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Client config with an empty trust store. Usable for plain-HTTP targets;
/// any TLS handshake through it fails closed.
pub fn empty_roots_client_config() -> ClientConfig {
    ClientConfig::builder()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth()
}

/// Client config that skips certificate verification. Only the
/// default-backend branch uses this; that backend is expected to sit
/// on-box behind the gateway.
pub fn insecure_client_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerification))
        .with_no_client_auth()
}

/// Parse the server name for SNI; owned so it can cross await points.
pub fn server_name(host: &str) -> GateResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| GateError::tls(format!("invalid SNI host {}: {}", host, e)))
}

#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
