use std::{error::Error as StdError, fmt};

use crate::key::EndpointKey;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors produced by the pool and its dialers.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// `acquire` was called after the pool was closed.
    ConnectorClosed,
    /// A generic socket/OS failure while dialing `key`.
    ConnectorError(EndpointKey, BoxError),
    /// Failure dialing the proxy itself for `key`.
    ProxyConnectionError(EndpointKey, BoxError),
    /// TLS handshake failure for `key`.
    ConnectorSSLError(EndpointKey, BoxError),
    /// Certificate validation failure for `key`.
    ConnectorCertificateError(EndpointKey, BoxError),
    /// The proxy answered a CONNECT with a non-200 status.
    HttpProxyError {
        status: u16,
        message: String,
        headers: http::HeaderMap,
    },
    /// SHA-256 certificate pinning failed.
    FingerprintMismatch {
        expected: [u8; 32],
        actual: [u8; 32],
        host: String,
        port: u16,
    },
    /// Invalid construction-time configuration.
    ConfigurationError(String),
}

impl Error {
    pub(crate) fn connector<E>(key: &EndpointKey, cause: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error::ConnectorError(key.clone(), cause.into())
    }

    pub(crate) fn proxy_connection<E>(key: &EndpointKey, cause: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error::ProxyConnectionError(key.clone(), cause.into())
    }

    pub(crate) fn ssl<E>(key: &EndpointKey, cause: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error::ConnectorSSLError(key.clone(), cause.into())
    }

    pub(crate) fn certificate<E>(key: &EndpointKey, cause: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error::ConnectorCertificateError(key.clone(), cause.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectorClosed => f.write_str("connector is closed"),
            Error::ConnectorError(key, cause) => {
                write!(f, "error connecting to {key:?}: {cause}")
            }
            Error::ProxyConnectionError(key, cause) => {
                write!(f, "error connecting to proxy for {key:?}: {cause}")
            }
            Error::ConnectorSSLError(key, cause) => {
                write!(f, "TLS handshake error for {key:?}: {cause}")
            }
            Error::ConnectorCertificateError(key, cause) => {
                write!(f, "certificate error for {key:?}: {cause}")
            }
            Error::HttpProxyError {
                status, message, ..
            } => {
                write!(f, "proxy responded {status} {message} to CONNECT")
            }
            Error::FingerprintMismatch { host, port, .. } => {
                write!(f, "certificate fingerprint mismatch for {host}:{port}")
            }
            Error::ConfigurationError(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::ConnectorError(_, cause)
            | Error::ProxyConnectionError(_, cause)
            | Error::ConnectorSSLError(_, cause)
            | Error::ConnectorCertificateError(_, cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}
