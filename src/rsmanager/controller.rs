use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use strum::Display;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::rsmanager::admin::{AdminClient, MemberStatus, ReplicaGroupConfig};
use crate::rsmanager::config::{Settings, MAX_MEMBERS};
use crate::rsmanager::fault::{self, KillPolicy};
use crate::rsmanager::launcher::launch_member;
use crate::rsmanager::nodes::NodeStore;
use crate::rsmanager::readiness::{wait_ready, ReadinessPolicy};
use crate::rsmanager::topology::{ExpectedShape, TopologyMonitor};
use crate::rsmanager::{Error, Result};

/// Where the controller is in bringing the replica set up or down.
#[derive(Display, Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    Empty,
    Launching,
    AwaitingReady,
    Initiating,
    AwaitingTopology,
    Running,
    Stopping,
}

/// What a successful start hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub primary: String,
    pub set_name: String,
}

/// Controller owns the node store for one invocation and runs every operation against it,
/// saving it to the state file after anything that changes it.
pub struct Controller<A: AdminClient> {
    conf: Settings,
    admin: A,
    nodes: NodeStore,
    phase: Phase,
    cancel: CancellationToken,
}

impl<A: AdminClient> Controller<A> {
    /// Create a controller, picking up the members a previous invocation left in the state file.
    pub fn new(conf: Settings, admin: A, cancel: CancellationToken) -> Self {
        let nodes = NodeStore::load(&conf.state_file);
        Self::with_nodes(conf, admin, nodes, cancel)
    }

    pub fn with_nodes(conf: Settings, admin: A, nodes: NodeStore, cancel: CancellationToken) -> Self {
        let phase = if nodes.live_count() > 0 { Phase::Running } else { Phase::Empty };
        Self{ conf, admin, nodes, phase, cancel }
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn settings(&self) -> &Settings {
        &self.conf
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    pub fn monitor(&self) -> TopologyMonitor<'_, A> {
        TopologyMonitor::new(&self.admin, self.conf.topology_poll_interval())
    }

    pub fn save(&self) -> Result<()> {
        self.nodes.save(&self.conf.state_file)
    }

    fn set_phase(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "phase change");
        self.phase = phase;
    }

    /// Launch members processes, initiate them as a replica set and wait until it has
    /// one primary, the arbiter if requested, and secondaries for the rest.
    /// If fresh, old data and logs are deleted first.
    ///
    /// All or nothing: if anything fails every member started so far is killed.
    pub async fn start(&mut self, members: u32, arbiter: bool, fresh: bool) -> Result<Started> {
        if members == 0 || members > MAX_MEMBERS {
            return Err(Error::new(format!("number of members must be between 1 and {}", MAX_MEMBERS)));
        }
        let live = self.nodes.live_count();
        if live > 0 {
            return Err(Error::new(format!("{} members from a previous start are still running, stop them first", live)));
        }
        let hosts = (0..members).map(|i| self.conf.member_address(i)).collect::<Result<Vec<_>>>()?;
        let config = ReplicaGroupConfig::new(&self.conf.set_name, hosts, arbiter)?;
        let shape = ExpectedShape::new(members as usize, arbiter);

        let span = info_span!("start", members, arbiter, set_name = %config.name);
        async move {
            if fresh {
                self.wipe()?;
            }
            // killed nodes from an earlier run are replaced by this one
            self.nodes.clear();

            let started_at = Instant::now();
            match self.bring_up(&config, &shape).await {
                Ok(primary) => {
                    self.set_phase(Phase::Running);
                    self.save()?;
                    info!(%primary, "started {} members in {} seconds", members, started_at.elapsed().as_secs());
                    Ok(Started{ primary, set_name: config.name.clone() })
                },
                Err(e) => {
                    error!(%e, phase = %self.phase, "start failed, killing started members");
                    self.teardown().await;
                    self.set_phase(Phase::Empty);
                    if let Err(e) = self.save() {
                        error!(%e, "could not save node info");
                    }
                    Err(e)
                },
            }
        }.instrument(span).await
    }

    async fn bring_up(&mut self, config: &ReplicaGroupConfig, shape: &ExpectedShape) -> Result<String> {
        let readiness = ReadinessPolicy::new(&self.conf);
        for index in 0..config.members.len() as u32 {
            self.set_phase(Phase::Launching);
            let mut launched = launch_member(&self.conf, index)?;
            self.nodes.insert(launched.address.clone(), launched.node.clone());

            self.set_phase(Phase::AwaitingReady);
            wait_ready(&mut launched.child, &launched.node.host, launched.node.port, &readiness, &self.cancel).await?;
        }

        self.set_phase(Phase::Initiating);
        self.admin.initiate(config.seed(), config).await?;

        self.set_phase(Phase::AwaitingTopology);
        let seeds = self.nodes.live_addresses();
        let snapshot = self.monitor()
            .await_shape(&seeds, shape, self.conf.topology_timeout(), &self.cancel)
            .await?;
        snapshot.primary().first().cloned().ok_or_else(|| Error::new("replica set has no primary"))
    }

    /// Kill whatever start managed to launch and forget about it.
    async fn teardown(&mut self) {
        let policy = KillPolicy::new(&self.conf);
        if let Err(e) = fault::kill_all(&mut self.nodes, &policy).await {
            error!(%e, "could not kill every member");
        }
        self.forget_killed();
    }

    /// Drop killed nodes from the store, keeping any that are somehow still running.
    fn forget_killed(&mut self) {
        for address in self.nodes.addresses() {
            if !self.nodes.contains(&address) {
                self.nodes.remove(&address);
            }
        }
    }

    fn wipe(&self) -> Result<()> {
        for dir in [&self.conf.dbpath, &self.conf.logpath] {
            info!(dir = %dir.display(), "removing");
            remove_tree(dir)?;
        }
        Ok(())
    }

    /// Kill every member process and empty the store.
    pub async fn stop(&mut self) -> Result<Vec<String>> {
        let span = info_span!("stop", members = self.nodes.live_count());
        async move {
            self.set_phase(Phase::Stopping);
            let policy = KillPolicy::new(&self.conf);
            let result = fault::kill_all(&mut self.nodes, &policy).await;
            self.forget_killed();
            let phase = if self.nodes.is_empty() { Phase::Empty } else { Phase::Running };
            self.set_phase(phase);
            self.save()?;
            result
        }.instrument(span).await
    }

    /// Kill the given members.
    pub async fn kill(&mut self, addresses: &[String]) -> Result<Vec<String>> {
        let policy = KillPolicy::new(&self.conf);
        let result = fault::kill(&mut self.nodes, addresses, &policy).await;
        self.save()?;
        result
    }

    pub async fn kill_primary(&mut self) -> Result<Vec<String>> {
        let policy = KillPolicy::new(&self.conf);
        let monitor = TopologyMonitor::new(&self.admin, self.conf.topology_poll_interval());
        let result = fault::kill_primary(&mut self.nodes, &monitor, &policy).await;
        self.save()?;
        result
    }

    pub async fn kill_random_secondary(&mut self) -> Result<Vec<String>> {
        let policy = KillPolicy::new(&self.conf);
        let monitor = TopologyMonitor::new(&self.admin, self.conf.topology_poll_interval());
        let result = fault::kill_random_secondary(&mut self.nodes, &monitor, &policy).await;
        self.save()?;
        result
    }

    pub async fn kill_all_secondaries(&mut self) -> Result<Vec<String>> {
        let policy = KillPolicy::new(&self.conf);
        let monitor = TopologyMonitor::new(&self.admin, self.conf.topology_poll_interval());
        let result = fault::kill_all_secondaries(&mut self.nodes, &monitor, &policy).await;
        self.save()?;
        result
    }

    /// Restart killed members, returning those that came back.
    pub async fn restart(&mut self, addresses: &[String]) -> Result<Vec<String>> {
        let readiness = ReadinessPolicy::new(&self.conf);
        let policy = KillPolicy::new(&self.conf);
        let restarted = fault::restart(&mut self.nodes, addresses, &readiness, &policy, &self.cancel).await;
        self.save()?;
        Ok(restarted)
    }

    pub async fn stepdown(&self) -> Result<Vec<String>> {
        fault::stepdown(&self.nodes, &self.monitor()).await
    }

    /// Member names and states as the replica set reports them.
    pub async fn status(&self) -> Result<Vec<MemberStatus>> {
        self.admin.status(&self.nodes.live_addresses()).await
    }
}

fn remove_tree(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != IoErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
