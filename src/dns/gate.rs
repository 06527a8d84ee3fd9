use std::{future::Future, net::IpAddr, pin::Pin, sync::Arc};

use ahash::AHashMap;
use futures_util::future::{FutureExt, Shared};
use tracing::trace;

use crate::{
    addr::AddressFamily,
    dns::resolve::DynResolver,
    error::BoxError,
    trace::Trace,
};

type SharedLookup = Shared<Pin<Box<dyn Future<Output = Result<Arc<Vec<IpAddr>>, Arc<BoxError>>> + Send>>>;

/// Coalesces concurrent lookups for the same `(host, family)` into a single
/// in-flight resolution, so N callers racing to resolve the same host
/// issue one lookup rather than N.
///
/// Built on [`Shared`]: if the task that started a lookup is cancelled,
/// every other waiter still holds a clone of the same future and drives it
/// to completion independently, so one dial's cancellation never cancels
/// another's coalesced resolution.
pub struct ResolverGate {
    resolver: DynResolver,
    inflight: crate::sync::Mutex<AHashMap<(String, AddressFamily), SharedLookup>>,
}

impl ResolverGate {
    pub fn new(resolver: DynResolver) -> Self {
        ResolverGate {
            resolver,
            inflight: crate::sync::Mutex::new(AHashMap::default()),
        }
    }

    pub async fn resolve(
        &self,
        host: &str,
        family: AddressFamily,
        trace: &Trace,
    ) -> Result<Arc<Vec<IpAddr>>, Arc<BoxError>> {
        let key = (host.to_string(), family);
        let fut = {
            let mut guard = self.inflight.lock();
            match guard.get(&key) {
                Some(fut) => fut.clone(),
                None => {
                    let resolver = self.resolver.clone();
                    let host_owned = host.to_string();
                    let boxed: Pin<Box<dyn Future<Output = Result<Arc<Vec<IpAddr>>, Arc<BoxError>>> + Send>> =
                        Box::pin(async move {
                            resolver
                                .resolve(&host_owned, family)
                                .await
                                .map(|addrs| Arc::new(addrs.collect::<Vec<_>>()))
                                .map_err(Arc::new)
                        });
                    let shared = boxed.shared();
                    guard.insert(key.clone(), shared.clone());
                    shared
                }
            }
        };

        trace.dns_resolvehost_start(host).await;
        let result = fut.await;
        trace.dns_resolvehost_end(host).await;

        // Always evict: a cached error would otherwise stick around and be
        // replayed to callers who arrive after the failure.
        self.inflight.lock().remove(&key);
        if result.is_err() {
            trace!(host, "dns single-flight lookup failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dns::resolve::{Addrs, Resolve, Resolving};

    struct CountingResolver {
        calls: Arc<AtomicUsize>,
    }

    impl Resolve for CountingResolver {
        fn resolve(&self, _host: &str, _family: AddressFamily) -> Resolving {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(Box::new(vec!["127.0.0.1".parse::<IpAddr>().unwrap()].into_iter()) as Addrs)
            })
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_for_same_host_are_coalesced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(ResolverGate::new(Arc::new(CountingResolver { calls: calls.clone() })));

        let g1 = gate.clone();
        let g2 = gate.clone();
        let (a, b) = tokio::join!(
            g1.resolve("example.com", AddressFamily::Any, &Trace::new()),
            g2.resolve("example.com", AddressFamily::Any, &Trace::new()),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelling_one_waiter_does_not_cancel_the_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(ResolverGate::new(Arc::new(CountingResolver { calls: calls.clone() })));

        let g1 = gate.clone();
        let first = tokio::spawn(async move { g1.resolve("example.com", AddressFamily::Any, &Trace::new()).await });
        tokio::task::yield_now().await;
        first.abort();

        let second = gate
            .resolve("example.com", AddressFamily::Any, &Trace::new())
            .await;
        assert!(second.is_ok());
    }
}
