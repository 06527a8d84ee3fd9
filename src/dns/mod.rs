//! DNS caching with round-robin rotation and single-flight resolution.

pub mod cache;
pub mod gate;
pub mod resolve;

pub use cache::DnsCache;
pub use resolve::{Addrs, DynResolver, Resolve, Resolving};
