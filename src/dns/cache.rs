use std::{collections::VecDeque, net::IpAddr, sync::Arc, time::Duration};

use ahash::AHashMap;
use tokio::time::Instant;

use crate::{
    addr::{AddrRecord, AddressFamily},
    dns::{gate::ResolverGate, resolve::DynResolver},
    error::Error,
    trace::Trace,
};

struct Entry {
    addrs: VecDeque<IpAddr>,
    resolved_at: Instant,
}

/// Caches resolved addresses per `(host, family)`, rotating the order
/// handed out on each lookup so repeated dials spread load across the
/// resolved set rather than hammering the first address returned.
///
/// Expiry and single-flight resolution are layered on top of a plain
/// [`Resolve`](crate::dns::resolve::Resolve): this type owns the TTL and
/// rotation bookkeeping, [`ResolverGate`] owns coalescing concurrent
/// lookups into one.
pub struct DnsCache {
    gate: ResolverGate,
    ttl: Option<Duration>,
    entries: crate::sync::Mutex<AHashMap<(String, AddressFamily), Entry>>,
}

impl DnsCache {
    pub fn new(resolver: DynResolver, ttl: Option<Duration>) -> Self {
        DnsCache {
            gate: ResolverGate::new(resolver),
            ttl,
            entries: crate::sync::Mutex::new(AHashMap::default()),
        }
    }

    /// Resolve `host` for `family`, returning the full address set in
    /// rotated order and advancing the rotation by one for next time. A
    /// literal IP address is returned directly without consulting the
    /// cache or resolver.
    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        family: AddressFamily,
        trace: &Trace,
    ) -> Result<Vec<AddrRecord>, Error> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![AddrRecord {
                hostname: host.to_string(),
                host: ip,
                port,
                family,
                proto: 0,
                flags: 0,
            }]);
        }

        let key = (host.to_string(), family);
        {
            let mut guard = self.entries.lock();
            if let Some(entry) = guard.get_mut(&key) {
                if !self.expired(entry) {
                    trace.dns_cache_hit(host).await;
                    return Ok(rotate_and_snapshot(entry, host, port, family));
                }
                guard.remove(&key);
            }
        }

        trace.dns_cache_miss(host).await;
        let addrs = self
            .gate
            .resolve(host, family, trace)
            .await
            .map_err(|cause| Error::connector(&crate::key::EndpointKey::new(false, host, port), SharedCause(cause)))?;

        let mut guard = self.entries.lock();
        let entry = guard.entry(key).or_insert_with(|| Entry {
            addrs: addrs.iter().copied().collect(),
            resolved_at: Instant::now(),
        });
        Ok(rotate_and_snapshot(entry, host, port, family))
    }

    fn expired(&self, entry: &Entry) -> bool {
        match self.ttl {
            Some(ttl) => Instant::now().checked_duration_since(entry.resolved_at).unwrap_or(Duration::ZERO) > ttl,
            None => false,
        }
    }

    /// Drop the cached entry for a single `(host, port)` pair, forcing the
    /// next dial to re-resolve. `port` only discriminates in logging; the
    /// cache itself is keyed on host and family.
    pub fn clear_host(&self, host: &str) {
        let mut guard = self.entries.lock();
        guard.retain(|(cached_host, _), _| cached_host != host);
    }

    /// Drop every cached entry.
    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }
}

fn rotate_and_snapshot(entry: &mut Entry, host: &str, port: u16, family: AddressFamily) -> Vec<AddrRecord> {
    let snapshot: Vec<AddrRecord> = entry
        .addrs
        .iter()
        .map(|ip| AddrRecord {
            hostname: host.to_string(),
            host: *ip,
            port,
            family,
            proto: 0,
            flags: 0,
        })
        .collect();
    if let Some(front) = entry.addrs.pop_front() {
        entry.addrs.push_back(front);
    }
    snapshot
}

#[derive(Debug)]
struct SharedCause(Arc<crate::error::BoxError>);

impl std::fmt::Display for SharedCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SharedCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resolve::test_support::StaticResolver;

    fn addrs(ips: &[&str]) -> Vec<IpAddr> {
        ips.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn literal_ip_bypasses_resolution() {
        let cache = DnsCache::new(Arc::new(StaticResolver(vec![])), None);
        let resolved = cache
            .resolve("127.0.0.1", 80, AddressFamily::Any, &Trace::new())
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].host, "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn repeated_lookups_rotate_address_order() {
        let resolver = StaticResolver(addrs(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]));
        let cache = DnsCache::new(Arc::new(resolver), None);
        let trace = Trace::new();

        let first = cache.resolve("example.com", 80, AddressFamily::Any, &trace).await.unwrap();
        let second = cache.resolve("example.com", 80, AddressFamily::Any, &trace).await.unwrap();

        assert_eq!(first[0].host, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(second[0].host, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(second.len(), 3);
    }

    #[tokio::test]
    async fn expired_entry_triggers_a_fresh_lookup() {
        tokio::time::pause();
        let resolver = StaticResolver(addrs(&["10.0.0.1"]));
        let cache = DnsCache::new(Arc::new(resolver), Some(Duration::from_secs(1)));
        let trace = Trace::new();

        cache.resolve("example.com", 80, AddressFamily::Any, &trace).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let resolved = cache.resolve("example.com", 80, AddressFamily::Any, &trace).await.unwrap();
        assert_eq!(resolved[0].host, "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn clear_host_forces_rerender() {
        let resolver = StaticResolver(addrs(&["10.0.0.1"]));
        let cache = DnsCache::new(Arc::new(resolver), None);
        let trace = Trace::new();
        cache.resolve("example.com", 80, AddressFamily::Any, &trace).await.unwrap();
        cache.clear_host("example.com");
        assert!(cache.entries.lock().is_empty());
    }
}
