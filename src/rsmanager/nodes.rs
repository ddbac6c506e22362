use std::collections::BTreeMap;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::rsmanager::process;
use crate::rsmanager::Result;

/// One launched member process.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// pid of the running process, None once it has been killed (the node is kept for restart)
    pub pid: Option<u32>,
    /// cmd is the exact command line, replayed by restart
    pub cmd: Vec<String>,
    pub logpath: PathBuf,
    pub host: String,
    pub port: u16,
    /// started_at is when the current process was spawned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// NodeStore maps member addresses (host:port) to the processes we launched for them.
/// It's owned by the controller for one invocation and mirrored to the state file
/// so the next invocation can still find (and kill) those processes.
///
/// There is no locking: two invocations against the same state file at once will
/// trample each other. One operator, one host.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct NodeStore {
    nodes: BTreeMap<String, Node>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from path. A missing file is an empty store,
    /// a corrupt one is logged and also treated as empty so the tool stays usable.
    /// Nodes with a pid that can't name a single process are loaded as killed.
    pub fn load(path: &Path) -> Self {
        info!(path = %path.display(), "loading node info");
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                info!("no prior node info");
                return Self::new();
            },
            Err(e) => {
                error!(%e, path = %path.display(), "could not read node info, continuing without it");
                return Self::new();
            },
        };
        match serde_json::from_str::<NodeStore>(&text) {
            Ok(mut store) => {
                for (address, node) in store.nodes.iter_mut() {
                    if let Some(pid) = node.pid.filter(|pid| !process::is_valid_pid(*pid)) {
                        warn!(%address, pid, "invalid pid in node info, treating the member as killed");
                        node.pid = None;
                    }
                }
                info!(nodes = store.len(), "loaded node info");
                store
            },
            Err(e) => {
                error!(%e, path = %path.display(), "malformed node info, continuing without it");
                Self::new()
            },
        }
    }

    /// Save the store to path, atomically replacing whatever was there.
    pub fn save(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), nodes = self.len(), "saving node info");
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(path)?;
        debug!("saved node info");
        Ok(())
    }

    /// Record a freshly launched process, replacing any previous entry for the address.
    pub fn insert(&mut self, address: String, node: Node) {
        self.nodes.insert(address, node);
    }

    pub fn get(&self, address: &str) -> Option<&Node> {
        self.nodes.get(address)
    }

    /// contains is true if address has a running (not killed) process.
    pub fn contains(&self, address: &str) -> bool {
        self.nodes.get(address).map_or(false, Node::is_running)
    }

    /// Mark the node killed, keeping its command for restart. Returns the old pid.
    pub fn mark_killed(&mut self, address: &str) -> Option<u32> {
        self.nodes.get_mut(address).and_then(|node| node.pid.take())
    }

    /// Record the process that replaced a killed node.
    pub fn mark_restarted(&mut self, address: &str, pid: u32) {
        if let Some(node) = self.nodes.get_mut(address) {
            node.pid = Some(pid);
            node.started_at = Some(Utc::now());
        }
    }

    pub fn remove(&mut self, address: &str) -> Option<Node> {
        self.nodes.remove(address)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Addresses of every node, running or killed.
    pub fn addresses(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Addresses of the nodes with a running process.
    pub fn live_addresses(&self) -> Vec<String> {
        self.nodes.iter()
            .filter(|(_, node)| node.is_running())
            .map(|(address, _)| address.clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.nodes.values().filter(|node| node.is_running()).count()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }
}
