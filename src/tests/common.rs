use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::Path;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex};

use crate::rsmanager::admin::{AdminClient, MemberStatus, ReplicaGroupConfig};
use crate::rsmanager::config::{parse_config, Settings};
use crate::rsmanager::{Error, Result};

pub const TEST_HOST: &str = "127.0.0.1";
/// Stands in for mongod: ignores the arguments appended to it, stays up until signalled.
pub const FAKE_MONGOD: &str = "sleep 30 & trap 'kill $!; exit 0' INT TERM; wait";
pub static LISTEN_PORT: AtomicU16 = AtomicU16::new(21017);

/// Bind count consecutive ports on localhost. The listeners never accept, but connects
/// to them succeed, which is all the readiness probe checks.
pub fn listeners(count: u16) -> (u16, Vec<Option<TcpListener>>) {
    for _ in 0..20 {
        let base = LISTEN_PORT.fetch_add(count, Relaxed);
        let bound: Vec<_> = (0..count)
            .map(|i| TcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), base + i)))
            .collect();
        if bound.iter().all(|r| r.is_ok()) {
            return (base, bound.into_iter().map(|r| r.ok()).collect());
        }
    }
    panic!("couldn't find {} free consecutive ports", count);
}

/// A port nothing listens on.
pub fn free_port() -> u16 {
    let (port, _) = listeners(1);
    port
}

pub fn settings(dir: &Path, base_port: u16) -> Settings {
    settings_with_mongod(dir, base_port, &format!(r#"["sh", "-c", "{}", "mongod"]"#, FAKE_MONGOD))
}

/// FAKE_MONGOD started through env, which execs it, so the process ends up running a tail of its command.
pub fn wrapped_mongod() -> String {
    format!(r#"["env", "sh", "-c", "{}", "mongod"]"#, FAKE_MONGOD)
}

/// Like settings, with mongod given as a yaml sequence, e.g. to run the fake through a wrapper.
pub fn settings_with_mongod(dir: &Path, base_port: u16, mongod: &str) -> Settings {
    let yaml = format!(r#"
hostname: {host}
port: {port}
dbpath: {dir}/data
logpath: {dir}/log
state_file: {dir}/nodes.json
mongod: {mongod}
ready_attempts: 8
ready_interval_ms: 25
connect_timeout_ms: 100
topology_poll_interval_ms: 10
topology_timeout_seconds: 2
kill_grace_seconds: 2
"#, host = TEST_HOST, port = base_port, dir = dir.display(), mongod = mongod);
    parse_config(&yaml, None).expect("invalid test config")
}

/// The member states the fake reports.
const STARTUP: i32 = 0;
const DOWN: i32 = 8;

#[derive(Default)]
struct FakeState {
    config: Option<ReplicaGroupConfig>,
    primary: Option<String>,
    down: HashSet<String>,
    initiate_calls: u32,
    stepdowns: Vec<String>,
    reject_initiate: bool,
    never_elect: bool,
    unreachable_polls: u32,
    fatal_status: bool,
}

/// An in-process replica set: remembers the initiated config and runs a trivial election,
/// the first data bearing member that isn't down (and didn't just step down) is primary.
/// Tests tell it which members they killed with mark_down.
#[derive(Clone, Default)]
pub struct FakeReplicaSet {
    state: Arc<Mutex<FakeState>>,
}

impl FakeReplicaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_initiate(&self) {
        self.state.lock().unwrap().reject_initiate = true;
    }

    pub fn never_elect(&self) {
        self.state.lock().unwrap().never_elect = true;
    }

    pub fn unreachable_for(&self, polls: u32) {
        self.state.lock().unwrap().unreachable_polls = polls;
    }

    pub fn fail_status(&self) {
        self.state.lock().unwrap().fatal_status = true;
    }

    pub fn mark_down(&self, addresses: &[String]) {
        self.state.lock().unwrap().down.extend(addresses.iter().cloned());
    }

    pub fn mark_up(&self, addresses: &[String]) {
        let mut state = self.state.lock().unwrap();
        for address in addresses {
            state.down.remove(address);
        }
    }

    pub fn initiate_calls(&self) -> u32 {
        self.state.lock().unwrap().initiate_calls
    }

    pub fn stepdowns(&self) -> Vec<String> {
        self.state.lock().unwrap().stepdowns.clone()
    }

    pub fn config(&self) -> Option<ReplicaGroupConfig> {
        self.state.lock().unwrap().config.clone()
    }
}

impl FakeState {
    fn elect(&mut self, excluding: Option<&str>) {
        let config = match &self.config {
            Some(config) => config,
            None => return,
        };
        if let Some(primary) = &self.primary {
            if !self.down.contains(primary) && excluding != Some(primary.as_str()) {
                return;
            }
        }
        self.primary = config.members.iter()
            .filter(|m| !m.arbiter_only && !self.down.contains(&m.host) && excluding != Some(m.host.as_str()))
            .map(|m| m.host.clone())
            .next();
    }
}

impl AdminClient for FakeReplicaSet {
    async fn initiate(&self, seed: &str, config: &ReplicaGroupConfig) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.initiate_calls += 1;
        if state.reject_initiate {
            return Err(Error::command("replSetInitiate", 93, "Replica set configuration is invalid".to_string()));
        }
        if state.config.is_some() {
            return Err(Error::command("replSetInitiate", 23, "already initialized".to_string()));
        }
        assert_eq!(seed, config.seed());
        state.config = Some(config.clone());
        Ok(())
    }

    async fn status(&self, seeds: &[String]) -> Result<Vec<MemberStatus>> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable_polls > 0 {
            state.unreachable_polls -= 1;
            return Err(Error::unreachable("connection refused"));
        }
        if state.fatal_status {
            return Err(Error::command("replSetGetStatus", 13, "not authorized".to_string()));
        }
        if seeds.iter().all(|s| state.down.contains(s)) {
            return Err(Error::unreachable("every seed is down"));
        }
        if state.config.is_none() {
            return Err(Error::command("replSetGetStatus", 94, "no replset config has been received".to_string()));
        }
        if !state.never_elect {
            state.elect(None);
        }
        let config = state.config.as_ref().unwrap();
        Ok(config.members.iter().map(|m| {
            let (code, text) = if state.down.contains(&m.host) {
                (DOWN, "(not reachable/healthy)")
            } else if state.never_elect {
                (STARTUP, "STARTUP")
            } else if m.arbiter_only {
                (7, "ARBITER")
            } else if state.primary.as_deref() == Some(m.host.as_str()) {
                (1, "PRIMARY")
            } else {
                (2, "SECONDARY")
            };
            MemberStatus{ name: m.host.clone(), state: code, state_str: text.to_string() }
        }).collect())
    }

    async fn step_down(&self, primary: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.stepdowns.push(primary.to_string());
        state.elect(Some(primary));
        Ok(())
    }
}
