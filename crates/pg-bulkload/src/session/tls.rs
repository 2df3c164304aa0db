//! TLS for PostgreSQL sessions.
//!
//! `ssl_mode` follows libpq's names. `require` encrypts without trusting the
//! certificate chain; handshake signatures are still checked. The two verify
//! modes check the chain against the bundled webpki roots.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use crate::error::{LoadError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    Disable,
    /// Encrypted, certificate chain not verified.
    #[default]
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    pub fn requires_tls(&self) -> bool {
        *self != SslMode::Disable
    }
}

impl FromStr for SslMode {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        [
            SslMode::Disable,
            SslMode::Require,
            SslMode::VerifyCa,
            SslMode::VerifyFull,
        ]
        .into_iter()
        .find(|mode| mode.as_str() == wanted)
        .ok_or_else(|| {
            LoadError::Config(format!(
                "unknown ssl_mode '{}' (expected disable, require, verify-ca or verify-full)",
                s
            ))
        })
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn webpki_roots() -> Arc<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(roots)
}

/// Connector for the pool. `None` for `disable`.
pub fn make_connector(mode: SslMode) -> Result<Option<MakeRustlsConnect>> {
    if !mode.requires_tls() {
        return Ok(None);
    }
    Ok(Some(MakeRustlsConnect::new(client_config(mode)?)))
}

/// rustls client configuration for a TLS mode.
pub fn client_config(mode: SslMode) -> Result<ClientConfig> {
    match mode {
        SslMode::Disable => Err(LoadError::Config(
            "ssl_mode=disable has no TLS configuration".into(),
        )),
        SslMode::Require => {
            warn!("ssl_mode=require: the server certificate chain is not verified");
            let verifier = ChainUnchecked::new()?;
            Ok(ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
                .with_no_client_auth())
        }
        // rustls always checks the host name, so verify-ca is as strict as verify-full
        SslMode::VerifyCa | SslMode::VerifyFull => {
            debug!("ssl_mode={}: verifying against webpki roots", mode);
            Ok(ClientConfig::builder()
                .with_root_certificates(webpki_roots())
                .with_no_client_auth())
        }
    }
}

/// Skips chain and host checks but delegates signature checks to webpki.
#[derive(Debug)]
struct ChainUnchecked {
    signatures: Arc<WebPkiServerVerifier>,
}

impl ChainUnchecked {
    fn new() -> Result<Self> {
        let signatures = WebPkiServerVerifier::builder(webpki_roots())
            .build()
            .map_err(|e| LoadError::Config(format!("building TLS verifier: {}", e)))?;
        Ok(Self { signatures })
    }
}

impl ServerCertVerifier for ChainUnchecked {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.signatures.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.signatures.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.signatures.supported_verify_schemes()
    }
}
