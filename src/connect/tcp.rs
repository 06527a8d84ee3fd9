use std::time::Duration;

use socket2::{Domain, Protocol as SockProto, Socket, Type};
use tokio::net::{TcpSocket, TcpStream};

use crate::{addr::AddrRecord, error::Error, key::EndpointKey};

/// Socket-level tuning applied to every direct TCP dial. `None`/`0` leave
/// the platform default in place.
#[derive(Debug, Clone, Default)]
pub struct TcpConnectorConfig {
    pub connect_timeout: Option<Duration>,
    pub nodelay: bool,
    pub keepalive: Option<Duration>,
    pub local_addr_v4: Option<std::net::Ipv4Addr>,
    pub local_addr_v6: Option<std::net::Ipv6Addr>,
}

/// Dial each candidate address in `addrs` in order, returning the first
/// successful connection. Intentionally sequential, not happy-eyeballs:
/// address-family racing and fallback ordering are a load-balancing
/// concern this crate leaves to its caller.
pub async fn dial_direct(addrs: &[AddrRecord], config: &TcpConnectorConfig, key: &EndpointKey) -> Result<TcpStream, Error> {
    let mut last_err = None;
    for addr in addrs {
        match dial_one(addr, config).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::connector(key, "no addresses to connect to")))
}

/// Connect a single candidate address. `pub(crate)` so the combined
/// TCP+TLS dial in `connect::dial` can retry the TLS handshake (and any
/// fingerprint check) per address rather than only per connection.
pub(crate) async fn dial_one(addr: &AddrRecord, config: &TcpConnectorConfig) -> Result<TcpStream, Error> {
    let key = EndpointKey::new(false, addr.hostname.clone(), addr.port);
    let domain = if addr.host.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(SockProto::TCP)).map_err(|e| Error::connector(&key, e))?;
    socket.set_nonblocking(true).map_err(|e| Error::connector(&key, e))?;

    if config.nodelay {
        socket.set_nodelay(true).map_err(|e| Error::connector(&key, e))?;
    }
    if let Some(keepalive) = config.keepalive {
        let conf = socket2::TcpKeepalive::new().with_time(keepalive);
        socket.set_tcp_keepalive(&conf).map_err(|e| Error::connector(&key, e))?;
    }
    match (addr.host, config.local_addr_v4, config.local_addr_v6) {
        (std::net::IpAddr::V4(_), Some(local), _) => socket
            .bind(&std::net::SocketAddr::new(local.into(), 0).into())
            .map_err(|e| Error::connector(&key, e))?,
        (std::net::IpAddr::V6(_), _, Some(local)) => socket
            .bind(&std::net::SocketAddr::new(local.into(), 0).into())
            .map_err(|e| Error::connector(&key, e))?,
        _ => {}
    }

    // `TcpSocket` can't be built directly from a tuned `socket2::Socket`,
    // so hand the fd/SOCKET across. Safe because `into_raw_fd`/
    // `into_raw_socket` relinquishes ownership to the value constructed
    // from it.
    #[cfg(unix)]
    let socket = unsafe {
        use std::os::unix::io::{FromRawFd, IntoRawFd};
        TcpSocket::from_raw_fd(socket.into_raw_fd())
    };
    #[cfg(windows)]
    let socket = unsafe {
        use std::os::windows::io::{FromRawSocket, IntoRawSocket};
        TcpSocket::from_raw_socket(socket.into_raw_socket())
    };

    let connect = socket.connect(addr.socket_addr());
    let stream = match config.connect_timeout {
        Some(timeout) => tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| Error::connector(&key, "connect timed out"))?
            .map_err(|e| Error::connector(&key, e))?,
        None => connect.await.map_err(|e| Error::connector(&key, e))?,
    };
    Ok(stream)
}
