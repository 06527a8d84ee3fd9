use std::{fmt, hash::Hash, sync::Arc};

use url::Url;

/// The equivalence class under which connections may be reused.
///
/// Two keys compare equal iff every field is equal. Building one is cheap:
/// `host` and `proxy` are reference counted so cloning a key never touches
/// the heap.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    is_tls: bool,
    host: Arc<str>,
    port: u16,
    proxy: Option<Arc<Url>>,
    proxy_auth_hash: Option<u64>,
    proxy_headers_hash: Option<u64>,
}

impl EndpointKey {
    /// Build a key for a direct (non-proxied) endpoint.
    pub fn new(is_tls: bool, host: impl Into<Arc<str>>, port: u16) -> Self {
        EndpointKey {
            is_tls,
            host: host.into(),
            port,
            proxy: None,
            proxy_auth_hash: None,
            proxy_headers_hash: None,
        }
    }

    /// Attach proxy fields to this key.
    pub fn with_proxy(
        mut self,
        proxy: Arc<Url>,
        proxy_auth_hash: Option<u64>,
        proxy_headers_hash: Option<u64>,
    ) -> Self {
        self.proxy = Some(proxy);
        self.proxy_auth_hash = proxy_auth_hash;
        self.proxy_headers_hash = proxy_headers_hash;
        self
    }

    pub fn is_tls(&self) -> bool {
        self.is_tls
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_deref()
    }

    /// Drop the proxy fields, producing the key used to pool the connection
    /// that results from a CONNECT tunnel (the proxy is no longer part of
    /// the endpoint's identity once the tunnel is established).
    pub fn without_proxy(&self) -> Self {
        EndpointKey {
            is_tls: self.is_tls,
            host: self.host.clone(),
            port: self.port,
            proxy: None,
            proxy_auth_hash: None,
            proxy_headers_hash: None,
        }
    }
}

impl fmt::Debug for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointKey")
            .field("is_tls", &self.is_tls)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("proxy", &self.proxy.as_ref().map(|p| p.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_hash_equal() {
        use std::{
            collections::hash_map::DefaultHasher,
            hash::{Hash, Hasher},
        };

        let a = EndpointKey::new(true, "example.com", 443);
        let b = EndpointKey::new(true, "example.com", 443);
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        a.hash(&mut ha);
        let mut hb = DefaultHasher::new();
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn proxy_fields_distinguish_keys() {
        let proxy = Arc::new(Url::parse("http://proxy:3128").unwrap());
        let a = EndpointKey::new(true, "example.com", 443);
        let b = a.clone().with_proxy(proxy, None, None);
        assert_ne!(a, b);
    }

    #[test]
    fn without_proxy_clears_proxy_fields() {
        let proxy = Arc::new(Url::parse("http://proxy:3128").unwrap());
        let a = EndpointKey::new(true, "target", 443).with_proxy(proxy, Some(1), Some(2));
        let tunneled = a.without_proxy();
        assert!(tunneled.proxy().is_none());
        assert_eq!(tunneled.host(), "target");
    }
}
