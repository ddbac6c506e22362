use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::rsmanager::admin::AdminClient;
use crate::rsmanager::config::{Settings, Signal};
use crate::rsmanager::launcher::spawn;
use crate::rsmanager::nodes::NodeStore;
use crate::rsmanager::process::{self, Termination};
use crate::rsmanager::readiness::{wait_ready, ReadinessPolicy};
use crate::rsmanager::topology::TopologyMonitor;
use crate::rsmanager::Result;

/// How members are stopped: signal first, SIGKILL after grace.
#[derive(Debug, Copy, Clone)]
pub struct KillPolicy {
    pub signal: Signal,
    pub grace: Duration,
}

impl KillPolicy {
    pub fn new(conf: &Settings) -> Self {
        Self{
            signal: conf.kill_signal,
            grace: conf.kill_grace(),
        }
    }
}

/// Kill the processes of addresses and mark them killed in nodes.
/// Processes that are already gone, and nodes already killed, count as killed.
/// Addresses we never launched are skipped. Keeps going past a process that won't die,
/// returning the first such error once the rest are dealt with.
pub async fn kill(nodes: &mut NodeStore, addresses: &[String], policy: &KillPolicy) -> Result<Vec<String>> {
    let mut killed = Vec::with_capacity(addresses.len());
    let mut first_err = None;
    for address in addresses {
        let (pid, cmd) = match nodes.get(address) {
            Some(node) => match node.pid {
                Some(pid) => (pid, node.cmd.clone()),
                None => {
                    debug!(%address, "already killed");
                    killed.push(address.clone());
                    continue;
                },
            },
            None => {
                warn!(%address, "not a member we launched, skipping");
                continue;
            },
        };

        info!(%address, pid, "killing member");
        let termination = if process::is_running_command(pid, &cmd) {
            process::terminate(pid, policy.signal, policy.grace).await
        } else {
            // gone, or the pid now belongs to something else. Reap it in case it's our zombie.
            process::has_exited(pid);
            Ok(Termination::AlreadyDead)
        };
        match termination {
            Ok(how) => {
                info!(%address, pid, termination = %how, "killed");
                nodes.mark_killed(address);
                killed.push(address.clone());
            },
            Err(e) => {
                error!(%address, pid, %e, "could not kill member");
                first_err.get_or_insert(e);
            },
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(killed),
    }
}

/// Kill every member with a running process.
pub async fn kill_all(nodes: &mut NodeStore, policy: &KillPolicy) -> Result<Vec<String>> {
    let live = nodes.live_addresses();
    kill(nodes, &live, policy).await
}

pub async fn kill_primary<A: AdminClient>(nodes: &mut NodeStore, monitor: &TopologyMonitor<'_, A>, policy: &KillPolicy) -> Result<Vec<String>> {
    let primary = monitor.primary(&nodes.live_addresses()).await?;
    kill(nodes, &primary, policy).await
}

pub async fn kill_random_secondary<A: AdminClient>(nodes: &mut NodeStore, monitor: &TopologyMonitor<'_, A>, policy: &KillPolicy) -> Result<Vec<String>> {
    let secondary = monitor.random_secondary(&nodes.live_addresses()).await?;
    kill(nodes, &secondary, policy).await
}

pub async fn kill_all_secondaries<A: AdminClient>(nodes: &mut NodeStore, monitor: &TopologyMonitor<'_, A>, policy: &KillPolicy) -> Result<Vec<String>> {
    let secondaries = monitor.secondaries(&nodes.live_addresses()).await?;
    kill(nodes, &secondaries, policy).await
}

/// Relaunch killed or crashed members with the command they were started with and wait for them.
/// Returns the members that came back. Members whose process is still running are skipped.
/// One that doesn't become ready is killed again and left out, the others are still attempted.
pub async fn restart(
    nodes: &mut NodeStore,
    addresses: &[String],
    readiness: &ReadinessPolicy,
    policy: &KillPolicy,
    cancel: &CancellationToken,
) -> Vec<String> {
    let mut restarted = Vec::with_capacity(addresses.len());
    for address in addresses {
        if cancel.is_cancelled() {
            break;
        }
        let node = match nodes.get(address) {
            Some(node) => match node.pid {
                Some(pid) if process::is_running_command(pid, &node.cmd) => {
                    warn!(%address, pid, "member is still running, not restarting");
                    continue;
                },
                Some(pid) => {
                    // died without us, reap it in case it's our zombie
                    info!(%address, pid, "member exited on its own");
                    process::has_exited(pid);
                    node.clone()
                },
                None => node.clone(),
            },
            None => {
                warn!(%address, "not a member we launched, cannot restart");
                continue;
            },
        };

        let mut child = match spawn(address, &node.cmd, &node.logpath) {
            Ok(child) => child,
            Err(e) => {
                error!(%address, %e, "could not restart member");
                continue;
            },
        };
        let pid = child.id();
        nodes.mark_restarted(address, pid);

        match wait_ready(&mut child, &node.host, node.port, readiness, cancel).await {
            Ok(()) => {
                info!(%address, pid, "restarted");
                restarted.push(address.clone());
            },
            Err(e) => {
                error!(%address, pid, %e, "restarted member never became ready");
                if let Err(e) = kill(nodes, std::slice::from_ref(address), policy).await {
                    error!(%address, %e, "could not clean up member");
                }
            },
        }
    }
    restarted
}

/// Ask the current primary, if there is one, to step down. Doesn't wait for a new primary.
pub async fn stepdown<A: AdminClient>(nodes: &NodeStore, monitor: &TopologyMonitor<'_, A>) -> Result<Vec<String>> {
    let primary = monitor.primary(&nodes.live_addresses()).await?;
    if let Some(address) = primary.first() {
        // Servers before 4.2 close every connection on stepdown, so an error here is expected
        if let Err(e) = monitor.admin().step_down(address).await {
            info!(%address, %e, "stepdown reported an error");
        }
    } else {
        warn!("no primary to step down");
    }
    Ok(primary)
}
