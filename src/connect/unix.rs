//! Unix-domain socket dialer. No DNS, no TLS: a fixed path replaces
//! host/port.

#![cfg(unix)]

use std::path::{Path, PathBuf};

use tokio::net::UnixStream;

use crate::{error::Error, key::EndpointKey};

/// Configuration for a Unix-domain socket dialer: every dial connects to
/// the same fixed `path`, there is no per-request addressing.
#[derive(Debug, Clone)]
pub struct UnixConnectorConfig {
    pub path: PathBuf,
}

impl UnixConnectorConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        UnixConnectorConfig { path: path.into() }
    }
}

pub async fn dial_unix(config: &UnixConnectorConfig) -> Result<UnixStream, Error> {
    dial_path(&config.path).await
}

async fn dial_path(path: &Path) -> Result<UnixStream, Error> {
    let key = EndpointKey::new(false, path.to_string_lossy().into_owned(), 0);
    UnixStream::connect(path).await.map_err(|e| Error::connector(&key, e))
}

#[cfg(test)]
mod tests {
    use tokio::net::UnixListener;

    use super::*;

    #[tokio::test]
    async fn dials_a_listening_socket() {
        let dir = tempdir();
        let path = dir.join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let config = UnixConnectorConfig::new(&path);
        let stream = dial_unix(&config).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn missing_socket_is_an_error() {
        let dir = tempdir();
        let path = dir.join("does-not-exist.sock");
        let config = UnixConnectorConfig::new(&path);
        let err = dial_unix(&config).await.unwrap_err();
        assert!(matches!(err, Error::ConnectorError(..)));
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("wreq-connect-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }
}
