use std::{future::Future, pin::Pin, sync::Arc};

type Hook = dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;
type HostHook = dyn Fn(&str) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

/// Optional instrumentation callbacks, fired at pool and dialer lifecycle
/// points. Every hook defaults to a no-op; set only the ones a caller wants
/// observed. None of these influence pool or dialer behavior.
#[derive(Clone, Default)]
pub struct Trace {
    queued_start: Option<Arc<Hook>>,
    queued_end: Option<Arc<Hook>>,
    create_start: Option<Arc<Hook>>,
    create_end: Option<Arc<Hook>>,
    reuse_conn: Option<Arc<Hook>>,
    dns_cache_hit: Option<Arc<HostHook>>,
    dns_cache_miss: Option<Arc<HostHook>>,
    dns_resolvehost_start: Option<Arc<HostHook>>,
    dns_resolvehost_end: Option<Arc<HostHook>>,
}

macro_rules! plain_hook {
    ($setter:ident, $field:ident) => {
        pub fn $setter<F, Fut>(mut self, hook: F) -> Self
        where
            F: Fn() -> Fut + Send + Sync + 'static,
            Fut: Future<Output = ()> + Send + 'static,
        {
            self.$field = Some(Arc::new(move || Box::pin(hook())));
            self
        }
    };
}

macro_rules! host_hook {
    ($setter:ident, $field:ident) => {
        pub fn $setter<F, Fut>(mut self, hook: F) -> Self
        where
            F: Fn(&str) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = ()> + Send + 'static,
        {
            self.$field = Some(Arc::new(move |host| Box::pin(hook(host))));
            self
        }
    };
}

impl Trace {
    pub fn new() -> Self {
        Trace::default()
    }

    plain_hook!(on_queued_start, queued_start);
    plain_hook!(on_queued_end, queued_end);
    plain_hook!(on_create_start, create_start);
    plain_hook!(on_create_end, create_end);
    plain_hook!(on_reuse_conn, reuse_conn);
    host_hook!(on_dns_cache_hit, dns_cache_hit);
    host_hook!(on_dns_cache_miss, dns_cache_miss);
    host_hook!(on_dns_resolvehost_start, dns_resolvehost_start);
    host_hook!(on_dns_resolvehost_end, dns_resolvehost_end);

    pub(crate) async fn queued_start(&self) {
        if let Some(hook) = &self.queued_start {
            hook().await;
        }
    }

    pub(crate) async fn queued_end(&self) {
        if let Some(hook) = &self.queued_end {
            hook().await;
        }
    }

    pub(crate) async fn create_start(&self) {
        if let Some(hook) = &self.create_start {
            hook().await;
        }
    }

    pub(crate) async fn create_end(&self) {
        if let Some(hook) = &self.create_end {
            hook().await;
        }
    }

    pub(crate) async fn reuse_conn(&self) {
        if let Some(hook) = &self.reuse_conn {
            hook().await;
        }
    }

    pub(crate) async fn dns_cache_hit(&self, host: &str) {
        if let Some(hook) = &self.dns_cache_hit {
            hook(host).await;
        }
    }

    pub(crate) async fn dns_cache_miss(&self, host: &str) {
        if let Some(hook) = &self.dns_cache_miss {
            hook(host).await;
        }
    }

    pub(crate) async fn dns_resolvehost_start(&self, host: &str) {
        if let Some(hook) = &self.dns_resolvehost_start {
            hook(host).await;
        }
    }

    pub(crate) async fn dns_resolvehost_end(&self, host: &str) {
        if let Some(hook) = &self.dns_resolvehost_end {
            hook(host).await;
        }
    }
}

impl std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trace").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn unset_hooks_are_no_ops() {
        let trace = Trace::new();
        trace.queued_start().await;
        trace.dns_cache_hit("example.com").await;
    }

    #[tokio::test]
    async fn set_hook_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let trace = Trace::new().on_create_start(move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });
        trace.create_start().await;
        trace.create_start().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn host_hook_receives_host() {
        let seen = Arc::new(std::sync::Mutex::new(String::new()));
        let seen2 = seen.clone();
        let trace = Trace::new().on_dns_resolvehost_start(move |host| {
            let seen2 = seen2.clone();
            let host = host.to_owned();
            async move {
                *seen2.lock().unwrap() = host;
            }
        });
        trace.dns_resolvehost_start("example.com").await;
        assert_eq!(*seen.lock().unwrap(), "example.com");
    }
}
