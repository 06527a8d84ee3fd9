use std::sync::{Arc, OnceLock};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, SignatureScheme,
};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector as RustlsConnector};

use crate::{addr::Fingerprint, error::Error, key::EndpointKey, request::TlsVerify};

/// Memoized default TLS client configs, built once per process the first
/// time they're needed: at most one verified and one unverified config
/// regardless of how many dialers use them.
static VERIFIED_DEFAULT: OnceLock<Arc<ClientConfig>> = OnceLock::new();
static UNVERIFIED_DEFAULT: OnceLock<Arc<ClientConfig>> = OnceLock::new();

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn verified_default() -> Arc<ClientConfig> {
    VERIFIED_DEFAULT
        .get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                ClientConfig::builder_with_provider(provider())
                    .with_safe_default_protocol_versions()
                    .expect("ring provider supports the default TLS protocol versions")
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

fn unverified_default() -> Arc<ClientConfig> {
    UNVERIFIED_DEFAULT
        .get_or_init(|| {
            let config = ClientConfig::builder_with_provider(provider())
                .with_safe_default_protocol_versions()
                .expect("ring provider supports the default TLS protocol versions")
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

/// Accepts any certificate chain. Used only when a request explicitly asks
/// for unverified TLS or supplies a fingerprint (in which case the
/// fingerprint check below substitutes for trust-store verification).
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
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
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

/// Picks which `ClientConfig` governs a given dial: an explicit context
/// wins outright; a fingerprint implies "skip trust-store verification,
/// check the digest instead"; otherwise fall back to the dialer's own
/// configured default, or the process-wide verified default.
pub fn select_config(policy: &TlsVerify, connector_default: Option<&Arc<ClientConfig>>) -> Arc<ClientConfig> {
    match policy {
        TlsVerify::Context(ctx) => ctx.clone(),
        TlsVerify::Disabled | TlsVerify::Fingerprint(_) => unverified_default(),
        TlsVerify::Unspecified => connector_default.cloned().unwrap_or_else(verified_default),
    }
}

/// Wrap an already-connected TCP stream in TLS, verifying against `config`
/// and then, if `policy` pins a fingerprint, checking the leaf
/// certificate's SHA-256 digest.
pub async fn handshake(
    stream: TcpStream,
    server_name: &str,
    config: Arc<ClientConfig>,
    policy: &TlsVerify,
    key: &EndpointKey,
) -> Result<TlsStream<TcpStream>, Error> {
    let name = ServerName::try_from(server_name.to_owned()).map_err(|e| Error::ssl(key, e))?;
    let connector = RustlsConnector::from(config);
    let tls = connector.connect(name, stream).await.map_err(|e| classify_handshake_error(key, e))?;

    if let TlsVerify::Fingerprint(expected) = policy {
        check_fingerprint(&tls, expected, key)?;
    }

    Ok(tls)
}

/// `tokio_rustls::TlsConnector::connect` reports every rustls failure as
/// a plain `io::Error` wrapping the original `rustls::Error`. Certificate
/// rejections (expired, wrong name, untrusted issuer, ...) are a distinct
/// error kind from the rest of the handshake (alerts, version mismatch,
/// I/O failure) and get their own `ConnectorCertificateError`, per the
/// dial's error-routing rule; everything else stays `ConnectorSSLError`.
fn classify_handshake_error(key: &EndpointKey, err: std::io::Error) -> Error {
    let is_certificate_error = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|rustls_err| matches!(rustls_err, rustls::Error::InvalidCertificate(_)));
    if is_certificate_error {
        Error::certificate(key, err)
    } else {
        Error::ssl(key, err)
    }
}

fn check_fingerprint(tls: &TlsStream<TcpStream>, expected: &Fingerprint, key: &EndpointKey) -> Result<(), Error> {
    let (_, session) = tls.get_ref();
    let chain = session
        .peer_certificates()
        .ok_or_else(|| Error::certificate(key, "no peer certificate presented"))?;
    let leaf = chain
        .first()
        .ok_or_else(|| Error::certificate(key, "empty peer certificate chain"))?;

    match expected.check(leaf.as_ref()) {
        Ok(()) => Ok(()),
        Err(actual) => Err(Error::FingerprintMismatch {
            expected: expected.0,
            actual,
            host: key.host().to_string(),
            port: key.port(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_policy_falls_back_to_verified_default() {
        let a = select_config(&TlsVerify::Unspecified, None);
        let b = verified_default();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn disabled_policy_uses_unverified_default() {
        let a = select_config(&TlsVerify::Disabled, None);
        let b = unverified_default();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn verified_default_is_memoized() {
        let a = verified_default();
        let b = verified_default();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn certificate_rejections_route_to_connector_certificate_error() {
        let key = EndpointKey::new(true, "example.com", 443);
        let cause = rustls::Error::InvalidCertificate(rustls::CertificateError::Expired);
        let io_err = std::io::Error::new(std::io::ErrorKind::InvalidData, cause);
        let err = classify_handshake_error(&key, io_err);
        assert!(matches!(err, Error::ConnectorCertificateError(..)));
    }

    #[test]
    fn other_handshake_failures_route_to_connector_ssl_error() {
        let key = EndpointKey::new(true, "example.com", 443);
        let cause = rustls::Error::General("handshake failed".into());
        let io_err = std::io::Error::new(std::io::ErrorKind::InvalidData, cause);
        let err = classify_handshake_error(&key, io_err);
        assert!(matches!(err, Error::ConnectorSSLError(..)));
    }

    #[test]
    fn an_io_error_with_no_rustls_source_routes_to_connector_ssl_error() {
        let key = EndpointKey::new(true, "example.com", 443);
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = classify_handshake_error(&key, io_err);
        assert!(matches!(err, Error::ConnectorSSLError(..)));
    }
}
