use std::process::Child;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rsmanager::config::Settings;
use crate::rsmanager::{Error, Result};

/// How hard to try before declaring a member dead on arrival.
#[derive(Debug, Copy, Clone)]
pub struct ReadinessPolicy {
    pub attempts: u32,
    pub interval: Duration,
    pub connect_timeout: Duration,
}

impl ReadinessPolicy {
    pub fn new(conf: &Settings) -> Self {
        Self{
            attempts: conf.ready_attempts,
            interval: conf.ready_interval(),
            connect_timeout: conf.connect_timeout(),
        }
    }
}

/// Returns true if something accepts TCP connections on (host, port).
/// The connection is closed straight away.
pub async fn is_reachable(host: &str, port: u16, connect_timeout: Duration) -> bool {
    match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(host, port, %e, "not reachable");
            false
        },
        Err(_) => false,
    }
}

/// Wait until the freshly spawned child accepts connections on port.
/// Fails if the child exits first, the attempts run out, or cancel fires.
pub async fn wait_ready(
    child: &mut Child,
    host: &str,
    port: u16,
    policy: &ReadinessPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let address = format!("{}:{}", host, port);
    for attempt in 1..=policy.attempts {
        if let Some(status) = child.try_wait()? {
            warn!(%address, %status, "member exited before it was ready");
            return Err(Error::launch(&address, format!("process exited with {}", status)));
        }
        if is_reachable(host, port, policy.connect_timeout).await {
            debug!(%address, attempt, "member is ready");
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled()),
            _ = sleep(policy.interval) => {},
        }
    }
    warn!(%address, attempts = policy.attempts, "member never became reachable");
    Err(Error::launch(&address, format!("not reachable after {} attempts", policy.attempts)))
}
