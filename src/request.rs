use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::{addr::Fingerprint, key::EndpointKey};

/// How a single request wants its TLS handshake verified: no preference,
/// verification on or off, a pinned `Fingerprint`, or an explicit context.
#[derive(Clone)]
pub enum TlsVerify {
    /// No preference; fall through to the dialer's configured default.
    Unspecified,
    /// Skip certificate verification entirely.
    Disabled,
    /// Skip verification but pin the peer certificate's SHA-256 digest.
    Fingerprint(Fingerprint),
    /// Use this exact client config, bypassing the dialer's default.
    Context(std::sync::Arc<rustls::ClientConfig>),
}

/// Minimal transport bound required to drive a CONNECT exchange: whatever
/// the dialer already produced for the proxy leg.
pub trait ConnectIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConnectIo for T {}

/// Read-only view of the caller's request: endpoint, TLS policy, and proxy
/// target. The dialer serializes and sends the CONNECT request itself
/// (`connect::proxy::dial_proxy`) rather than delegating to the request
/// object, since this crate owns the proxy transport outright and never
/// hands it back to the caller mid-dial — there's no multi-owner socket to
/// coordinate a `send` callback around.
pub trait ConnectRequest: Send + Sync + 'static {
    fn url(&self) -> &Url;
    fn host(&self) -> &str;
    fn port(&self) -> u16;
    fn is_tls(&self) -> bool;
    fn tls_policy(&self) -> TlsVerify;
    fn proxy(&self) -> Option<&Url>;
    fn proxy_auth(&self) -> Option<&str>;
    fn proxy_headers(&self) -> Option<&http::HeaderMap>;
    fn connection_key(&self) -> EndpointKey;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use http::HeaderMap;

    use super::*;

    pub struct FakeRequest {
        pub url: Url,
        pub proxy: Option<Url>,
        pub tls: TlsVerify,
    }

    impl FakeRequest {
        pub fn new(url: &str) -> Self {
            FakeRequest {
                url: Url::parse(url).unwrap(),
                proxy: None,
                tls: TlsVerify::Unspecified,
            }
        }
    }

    impl ConnectRequest for Arc<FakeRequest> {
        fn url(&self) -> &Url {
            &self.url
        }
        fn host(&self) -> &str {
            self.url.host_str().unwrap_or_default()
        }
        fn port(&self) -> u16 {
            self.url.port_or_known_default().unwrap_or(80)
        }
        fn is_tls(&self) -> bool {
            self.url.scheme() == "https"
        }
        fn tls_policy(&self) -> TlsVerify {
            self.tls.clone()
        }
        fn proxy(&self) -> Option<&Url> {
            self.proxy.as_ref()
        }
        fn proxy_auth(&self) -> Option<&str> {
            None
        }
        fn proxy_headers(&self) -> Option<&HeaderMap> {
            None
        }
        fn connection_key(&self) -> EndpointKey {
            EndpointKey::new(self.is_tls(), self.host(), self.port())
        }
    }
}
