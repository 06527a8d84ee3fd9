use std::sync::Arc;

use http::HeaderMap;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::{
    addr::AddrRecord,
    connect::{
        tcp::{self, TcpConnectorConfig},
        tls, BoxedIo, Connected,
    },
    error::Error,
    key::EndpointKey,
    request::{ConnectRequest, TlsVerify},
};

/// Dial `req`'s target through an HTTP(S) proxy.
///
/// For a plain-HTTP target the proxy connection itself is handed back
/// as-is: the caller issues an absolute-form request over it, same as any
/// other HTTP proxy hop, and no CONNECT is needed. For an HTTPS target, a
/// `CONNECT host:port` is sent first; once the proxy answers `200`, the
/// same socket is reused (no dup/close dance — this crate owns the
/// connection outright) and wrapped fresh in TLS to the real target.
pub async fn dial_proxy<R: ConnectRequest>(
    req: &R,
    proxy_url: &Url,
    proxy_addrs: &[AddrRecord],
    tcp_config: &TcpConnectorConfig,
    tls_default: Option<&Arc<ClientConfig>>,
) -> Result<(BoxedIo, Connected), Error> {
    let key = req.connection_key();
    let proxy_tcp = tcp::dial_direct(proxy_addrs, tcp_config, &key).await?;

    if proxy_url.scheme() == "https" {
        let proxy_host = proxy_url
            .host_str()
            .ok_or_else(|| Error::proxy_connection(&key, "proxy URL has no host"))?;
        let proxy_config = tls::select_config(&TlsVerify::Unspecified, tls_default);
        let mut tls_io = tls::handshake(proxy_tcp, proxy_host, proxy_config, &TlsVerify::Unspecified, &key).await?;

        send_connect(&mut tls_io, req, &key).await?;

        let (inner_tcp, _session) = tls_io.into_inner();
        finish(inner_tcp, req, &key, tls_default).await
    } else {
        let mut io = proxy_tcp;
        send_connect(&mut io, req, &key).await?;
        finish(io, req, &key, tls_default).await
    }
}

/// Wrap the now-tunneled (or, for a plain HTTP target, still-bare) proxy
/// socket for the caller. A CONNECT tunnel pools under the tunneled key
/// (the proxy is no longer part of the resulting connection's identity);
/// a plain HTTP-over-proxy connection keeps the original key — it's still
/// this exact proxy hop — but is marked `force_close` since proxy
/// keep-alive is unreliable enough to never pool.
async fn finish<R: ConnectRequest>(
    tcp: tokio::net::TcpStream,
    req: &R,
    key: &EndpointKey,
    tls_default: Option<&Arc<ClientConfig>>,
) -> Result<(BoxedIo, Connected), Error> {
    if req.is_tls() {
        let policy = req.tls_policy();
        let config = tls::select_config(&policy, tls_default);
        let tls = tls::handshake(tcp, req.host(), config, &policy, key).await?;
        Ok((
            Box::pin(tls) as BoxedIo,
            Connected {
                pool_key: key.without_proxy(),
                remote_addr: None,
                alpn: None,
                force_close: false,
            },
        ))
    } else {
        Ok((
            Box::pin(tcp) as BoxedIo,
            Connected {
                pool_key: key.clone(),
                remote_addr: None,
                alpn: None,
                force_close: true,
            },
        ))
    }
}

/// Only sent for an HTTPS target: a bare-proxy HTTP request is the
/// caller's job to frame, same as any direct connection.
async fn send_connect<IO, R>(io: &mut IO, req: &R, key: &EndpointKey) -> Result<(), Error>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    R: ConnectRequest,
{
    if !req.is_tls() {
        return Ok(());
    }

    let host = req.host();
    let port = req.port();
    let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if let Some(auth) = req.proxy_auth() {
        request.push_str("Proxy-Authorization: ");
        request.push_str(auth);
        request.push_str("\r\n");
    }
    if let Some(headers) = req.proxy_headers() {
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                request.push_str(name.as_str());
                request.push_str(": ");
                request.push_str(value);
                request.push_str("\r\n");
            }
        }
    }
    request.push_str("\r\n");

    io.write_all(request.as_bytes())
        .await
        .map_err(|e| Error::proxy_connection(key, e))?;
    io.flush().await.map_err(|e| Error::proxy_connection(key, e))?;

    let (status, reason, headers) = read_response(io, key).await?;
    if status != 200 {
        return Err(Error::HttpProxyError {
            status,
            message: reason,
            headers,
        });
    }
    Ok(())
}

/// Read the CONNECT response's status line and header block, up to and
/// including the blank line that terminates it. Reads the whole block as
/// one buffer rather than stopping at the status line's own `\r\n`: a
/// header-less response (`HTTP/1.1 200 ...\r\n\r\n`) only has a single
/// extra `\r\n` left after the status line, not a second independent
/// blank line, so scanning for `\r\n\r\n` across the full buffer is what
/// correctly terminates on it instead of blocking for more input that
/// will never come.
async fn read_response<IO: AsyncRead + Unpin>(io: &mut IO, key: &EndpointKey) -> Result<(u16, String, HeaderMap), Error> {
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        let n = io.read(&mut byte).await.map_err(|e| Error::proxy_connection(key, e))?;
        if n == 0 {
            return Err(Error::proxy_connection(key, "proxy closed connection before CONNECT response"));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
        if buf.len() > 16384 {
            return Err(Error::proxy_connection(key, "CONNECT response headers too long"));
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let mut parts = status_line.trim_end().splitn(3, ' ');
    let _version = parts.next();
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::proxy_connection(key, "malformed CONNECT status line"))?;
    let reason = parts.next().unwrap_or("").to_string();

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.trim().as_bytes()),
            http::HeaderValue::from_str(value.trim()),
        ) else {
            continue;
        };
        headers.append(name, value);
    }

    Ok((status, reason, headers))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    #[tokio::test]
    async fn status_200_parses_as_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await.unwrap();
            // Keep the socket open past the write, the way a real proxy
            // would while the tunnel stays up: a header-block reader that
            // waits for EOF (rather than the `\r\n\r\n` terminator) would
            // hang here instead of returning.
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let key = EndpointKey::new(true, "example.com", 443);
        let (status, _, headers) = tokio::time::timeout(Duration::from_secs(1), read_response(&mut client, &key))
            .await
            .expect("read_response hung waiting past the blank line")
            .unwrap();
        assert_eq!(status, 200);
        assert!(headers.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn non_200_status_is_rejected_by_send_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nX-Proxy-Realm: corp\r\n\r\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let req = crate::request::test_support::FakeRequest::new("https://example.com");
        let req = std::sync::Arc::new(req);
        let key = EndpointKey::new(true, "example.com", 443);
        let err = tokio::time::timeout(Duration::from_secs(1), send_connect(&mut client, &req, &key))
            .await
            .expect("send_connect hung on a headers-bearing 407")
            .unwrap_err();
        match err {
            Error::HttpProxyError { status: 407, headers, .. } => {
                assert_eq!(headers.get("x-proxy-realm").unwrap(), "corp");
            }
            other => panic!("expected HttpProxyError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_http_via_proxy_is_force_closed_and_keeps_its_key() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let req = crate::request::test_support::FakeRequest::new("http://example.com");
        let req = std::sync::Arc::new(req);
        let key = EndpointKey::new(false, "proxy.example.com", 8080);

        let (_, connected) = finish(client, &req, &key, None).await.unwrap();
        assert!(connected.force_close);
        assert_eq!(connected.pool_key, key);
    }
}
