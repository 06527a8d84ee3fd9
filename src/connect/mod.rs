//! Dialers: turn a resolved address (or a proxy hop) into a connected,
//! optionally TLS-wrapped transport. What's built here is handed to the
//! embedding HTTP client to speak its own protocol over; this crate never
//! reads or writes anything but the CONNECT tunnel preamble.

#[cfg(all(windows, feature = "named-pipe"))]
pub mod pipe;
pub mod proxy;
pub mod tcp;
pub mod tls;
#[cfg(unix)]
pub mod unix;

use std::{net::SocketAddr, pin::Pin, sync::Arc};

use rustls::ClientConfig;

use crate::{
    addr::AddrRecord,
    dns::DnsCache,
    error::Error,
    key::EndpointKey,
    request::{ConnectIo, ConnectRequest},
    trace::Trace,
};

/// Metadata describing the connection just established, independent of
/// its transport type.
///
/// `pool_key` is the key the caller should pass to [`crate::pool::Pool`]
/// when adopting this connection. It's usually just `req.connection_key()`,
/// but a CONNECT-tunneled dial returns the tunneled key instead (proxy
/// fields cleared) since the proxy is no longer part of the resulting
/// connection's identity once the tunnel is up — see
/// [`crate::key::EndpointKey::without_proxy`].
///
/// `force_close` is set for a plain (non-CONNECT) proxy connection: proxy
/// keep-alive behavior is unreliable enough that this crate never reuses
/// one, regardless of what the proxy's response headers claim. The caller
/// should call `Protocol::force_close` on the handshaked connection before
/// adopting it into the pool whenever this is `true`.
#[derive(Debug, Clone)]
pub struct Connected {
    pub pool_key: EndpointKey,
    pub remote_addr: Option<SocketAddr>,
    pub alpn: Option<Vec<u8>>,
    pub force_close: bool,
}

/// A type-erased, already-connected transport: plain TCP, TLS over TCP,
/// a Unix socket, or (on Windows) a named pipe.
pub type BoxedIo = Pin<Box<dyn ConnectIo>>;

/// Top-level dial entrypoint: resolve `req`'s target (or its proxy, if
/// one is set), dial it, and attach TLS if the request calls for it.
/// Unix-domain and named-pipe dialing bypass DNS/TCP entirely; see
/// [`unix::dial_unix`] and [`pipe::dial_pipe`] for those paths.
///
/// Brackets the whole attempt with `create_start`/`create_end`, matching
/// the points the pool's own `acquire` would fire them around a dial it
/// delegated to its caller (see `pool::Pool::acquire`'s doc example).
pub async fn dial<R: ConnectRequest>(
    req: &R,
    dns: &DnsCache,
    tcp_config: &tcp::TcpConnectorConfig,
    tls_default: Option<&Arc<ClientConfig>>,
    trace: &Trace,
) -> Result<(BoxedIo, Connected), Error> {
    trace.create_start().await;
    let result = dial_inner(req, dns, tcp_config, tls_default, trace).await;
    trace.create_end().await;
    result
}

async fn dial_inner<R: ConnectRequest>(
    req: &R,
    dns: &DnsCache,
    tcp_config: &tcp::TcpConnectorConfig,
    tls_default: Option<&Arc<ClientConfig>>,
    trace: &Trace,
) -> Result<(BoxedIo, Connected), Error> {
    let key = req.connection_key();

    if let Some(proxy_url) = req.proxy() {
        let proxy_host = proxy_url
            .host_str()
            .ok_or_else(|| Error::proxy_connection(&key, "proxy URL has no host"))?;
        let proxy_port = proxy_url.port_or_known_default().unwrap_or(80);
        let proxy_addrs = resolve(dns, proxy_host, proxy_port, trace).await?;
        return proxy::dial_proxy(req, proxy_url, &proxy_addrs, tcp_config, tls_default).await;
    }

    let addrs = resolve(dns, req.host(), req.port(), trace).await?;
    if !req.is_tls() {
        let tcp = tcp::dial_direct(&addrs, tcp_config, &key).await?;
        let remote_addr = addrs.first().map(AddrRecord::socket_addr);
        return Ok((
            Box::pin(tcp) as BoxedIo,
            Connected {
                pool_key: key,
                remote_addr,
                alpn: None,
                force_close: false,
            },
        ));
    }

    // TLS: each candidate address gets its own connect-then-handshake
    // attempt, so a fingerprint mismatch or handshake failure on one
    // address falls through to the next rather than failing the whole
    // dial outright (the pinning check can only run after a handshake,
    // so it can't be folded into `tcp::dial_direct`'s plain-TCP loop).
    let policy = req.tls_policy();
    let config = tls::select_config(&policy, tls_default);
    let mut last_err = None;
    for addr in &addrs {
        let tcp = match tcp::dial_one(addr, tcp_config).await {
            Ok(tcp) => tcp,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };
        match tls::handshake(tcp, &addr.hostname, config.clone(), &policy, &key).await {
            Ok(stream) => {
                return Ok((
                    Box::pin(stream) as BoxedIo,
                    Connected {
                        pool_key: key,
                        remote_addr: Some(addr.socket_addr()),
                        alpn: None,
                        force_close: false,
                    },
                ));
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::connector(&key, "no addresses to connect to")))
}

async fn resolve(dns: &DnsCache, host: &str, port: u16, trace: &Trace) -> Result<Vec<AddrRecord>, Error> {
    dns.resolve(host, port, crate::addr::AddressFamily::Any, trace).await
}
