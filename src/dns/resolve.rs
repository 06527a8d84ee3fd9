use std::{future::Future, net::IpAddr, pin::Pin, sync::Arc};

use crate::{addr::AddressFamily, error::BoxError};

/// A boxed iterator of resolved addresses, as returned by a [`Resolve`]
/// implementation. Boxed rather than generic so `Resolve` stays
/// object-safe.
pub type Addrs = Box<dyn Iterator<Item = IpAddr> + Send>;

/// The pending result of a single `resolve` call.
pub type Resolving = Pin<Box<dyn Future<Output = Result<Addrs, BoxError>> + Send>>;

/// Performs the actual system/library DNS lookup. An external collaborator:
/// this crate only caches and rotates what a `Resolve` implementation
/// returns, it never implements the lookup mechanics itself (no
/// `hickory-resolver` or `getaddrinfo` call lives in this crate).
pub trait Resolve: Send + Sync {
    fn resolve(&self, host: &str, family: AddressFamily) -> Resolving;
}

/// A type-erased resolver, so `DnsCache` and the connectors don't need to
/// be generic over the concrete `Resolve` implementation.
pub type DynResolver = Arc<dyn Resolve>;

/// Resolves a fixed set of hosts to statically configured addresses,
/// falling back to another resolver otherwise. Mirrors the `local_hosts`
/// override some HTTP clients layer over their real resolver.
pub struct WithOverrides {
    inner: DynResolver,
    overrides: std::collections::HashMap<String, Vec<IpAddr>>,
}

impl WithOverrides {
    pub fn new(inner: DynResolver, overrides: std::collections::HashMap<String, Vec<IpAddr>>) -> Self {
        WithOverrides { inner, overrides }
    }
}

impl Resolve for WithOverrides {
    fn resolve(&self, host: &str, family: AddressFamily) -> Resolving {
        if let Some(addrs) = self.overrides.get(host) {
            let addrs: Vec<IpAddr> = addrs.iter().copied().filter(|a| family.matches(*a)).collect();
            return Box::pin(async move { Ok(Box::new(addrs.into_iter()) as Addrs) });
        }
        self.inner.resolve(host, family)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub struct StaticResolver(pub Vec<IpAddr>);

    impl Resolve for StaticResolver {
        fn resolve(&self, _host: &str, family: AddressFamily) -> Resolving {
            let addrs: Vec<IpAddr> = self.0.iter().copied().filter(|a| family.matches(*a)).collect();
            Box::pin(async move { Ok(Box::new(addrs.into_iter()) as Addrs) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{test_support::StaticResolver, *};

    #[tokio::test]
    async fn overrides_take_priority_over_inner_resolver() {
        let inner: DynResolver = Arc::new(StaticResolver(vec!["10.0.0.1".parse().unwrap()]));
        let mut overrides = std::collections::HashMap::new();
        overrides.insert("example.com".to_string(), vec!["127.0.0.1".parse().unwrap()]);
        let resolver = WithOverrides::new(inner, overrides);

        let addrs: Vec<IpAddr> = resolver
            .resolve("example.com", AddressFamily::Any)
            .await
            .unwrap()
            .collect();
        assert_eq!(addrs, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn non_overridden_host_falls_through() {
        let inner: DynResolver = Arc::new(StaticResolver(vec!["10.0.0.1".parse().unwrap()]));
        let resolver = WithOverrides::new(inner, std::collections::HashMap::new());

        let addrs: Vec<IpAddr> = resolver
            .resolve("example.com", AddressFamily::Any)
            .await
            .unwrap()
            .collect();
        assert_eq!(addrs, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
    }
}
