//! Windows named-pipe dialer. Only compiled when the `named-pipe` feature
//! is enabled, and only meaningful on a Windows `tokio` runtime, which
//! always runs on IOCP.

#![cfg(all(windows, feature = "named-pipe"))]

use std::time::Duration;

use tokio::{net::windows::named_pipe::ClientOptions, time::sleep};

use crate::{error::Error, key::EndpointKey};

const BUSY_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration for a named-pipe dialer: every dial connects to the same
/// fixed pipe path (e.g. `\\.\pipe\mypipe`).
#[derive(Debug, Clone)]
pub struct PipeConnectorConfig {
    pub path: String,
    pub busy_retry_timeout: Duration,
}

impl PipeConnectorConfig {
    pub fn new(path: impl Into<String>) -> Self {
        PipeConnectorConfig {
            path: path.into(),
            busy_retry_timeout: Duration::from_secs(5),
        }
    }
}

pub async fn dial_pipe(config: &PipeConnectorConfig) -> Result<tokio::net::windows::named_pipe::NamedPipeClient, Error> {
    let key = EndpointKey::new(false, config.path.clone(), 0);
    let deadline = tokio::time::Instant::now() + config.busy_retry_timeout;
    loop {
        match ClientOptions::new().open(&config.path) {
            Ok(client) => return Ok(client),
            Err(e) if e.raw_os_error() == Some(windows_sys_error_pipe_busy()) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::connector(&key, e));
                }
                sleep(BUSY_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(Error::connector(&key, e)),
        }
    }
}

/// `ERROR_PIPE_BUSY` (231), hand-coded to avoid pulling in `windows-sys`
/// for a single constant.
fn windows_sys_error_pipe_busy() -> i32 {
    231
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_busy_constant_matches_win32() {
        assert_eq!(windows_sys_error_pipe_busy(), 231);
    }
}
