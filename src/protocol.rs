use std::{future::Future, pin::Pin};

/// The pooled object itself: an external collaborator. The pool only ever
/// observes these four predicates/operations — it never inspects the
/// protocol's wire state.
pub trait Protocol: Send + 'static {
    /// Whether the underlying transport is still connected.
    fn is_connected(&self) -> bool;

    /// Set by the response codec when the peer indicated it will close the
    /// connection; checked by `release` to decide idle-pool vs. discard.
    fn should_close(&self) -> bool;

    /// Mark this protocol so that a subsequent `release` must discard it
    /// rather than return it to the idle list, regardless of
    /// `should_close`. Idempotent.
    fn force_close(&self);

    /// Close the underlying transport. Must be idempotent and safe to call
    /// more than once (the reaper and a `Handle::close` may race to call
    /// it for the same protocol).
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
