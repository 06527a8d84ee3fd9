//! Connection pool and dialer for an HTTP client.
//!
//! This crate owns the parts of an HTTP client that sit below request
//! framing: a keyed connection pool with idle reuse and a background
//! reaper, a DNS cache with round-robin rotation and single-flight
//! resolution, and dialers for direct TCP, HTTP-CONNECT-tunneled TLS,
//! Unix-domain sockets, and (on Windows, behind the `named-pipe` feature)
//! named pipes.
//!
//! It deliberately does not know how to speak HTTP: request/response
//! framing, retries, load balancing, prefetching, and HTTP/2 multiplexing
//! all live in the embedding client, which implements [`Protocol`] for
//! its own connection type and [`ConnectRequest`] for its own request
//! type.
//!
//! ```ignore
//! let pool: Pool<MyConn, EndpointKey> = Pool::new(pool::Config::default())?;
//! let dns = DnsCache::new(resolver, Some(Duration::from_secs(10)));
//! let key = req.connection_key();
//! match pool.acquire(&key, &trace).await? {
//!     Lease::Reused(conn) => pool.adopt_reused(key, conn),
//!     Lease::Permit(permit) => {
//!         // If `dial` or `handshake` returns early via `?`, dropping
//!         // `permit` here releases its reservation and wakes a waiter.
//!         let (io, _connected) = connect::dial(&req, &dns, &tcp_config, None, &trace).await?;
//!         let conn = MyConn::handshake(io).await?;
//!         pool.adopt(permit, conn)
//!     }
//! };
//! ```

pub mod addr;
pub mod connect;
pub mod dns;
pub mod error;
pub mod handle;
pub mod key;
pub mod pool;
pub mod protocol;
pub mod request;
mod sync;
pub mod trace;

pub use addr::{AddrRecord, AddressFamily, Fingerprint};
pub use error::Error;
pub use handle::{Handle, Lease, Permit};
pub use key::EndpointKey;
pub use pool::{Config, Pool};
pub use protocol::Protocol;
pub use request::{ConnectIo, ConnectRequest, TlsVerify};
pub use trace::Trace;
