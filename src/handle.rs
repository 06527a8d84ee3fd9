//! The leased-connection handle returned by a checkout.
//!
//! `Handle` is defined alongside [`crate::pool::Pool`] rather than here,
//! since its release path reaches directly into the pool's idle/waiter
//! bookkeeping; this module re-exports it at the path callers expect.

pub use crate::pool::{Handle, Lease, Permit};
