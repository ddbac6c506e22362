use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize};

use crate::rsmanager::config::enums::{CommandLine, Signal};
use crate::rsmanager::common::{expand_home, local_hostname};
use crate::rsmanager::{Error, Result};

// Things that are not configurable, but might be one day
pub const MAX_MEMBERS: u32 = 50;
pub const KILL_POLL_INTERVAL_MS: u64 = 50;
pub const STEPDOWN_SECONDS: u32 = 60;

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// config_path is the path of the loaded config file, None for the built-in defaults
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
    /// hostname members bind to and are addressed by. Defaults to the name of this host.
    #[serde(default)]
    pub hostname: String,
    /// port of the first member, member i listens on port + i. Default 27017.
    #[serde(default = "default_port")]
    pub port: u16,
    /// set_name is the replica set name passed to --replSet. Default repl0.
    #[serde(default = "default_set_name")]
    pub set_name: String,
    /// dbpath is the root of the member data directories (dbpath/db0, dbpath/db1, ...)
    #[serde(default = "default_dbpath")]
    pub dbpath: PathBuf,
    /// logpath is the directory holding member log files (logpath/db0.log, ...)
    #[serde(default = "default_logpath")]
    pub logpath: PathBuf,
    /// mongod is the server program, optionally with leading arguments.
    #[serde(default = "default_mongod")]
    pub mongod: CommandLine,
    /// shell is the mongo shell used for administrative commands, mongosh or the legacy mongo.
    #[serde(default = "default_shell")]
    pub shell: CommandLine,
    /// state_file records the launched members between invocations. Default nodes.json.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// oplog_size_mb keeps startup fast. Default 5.
    #[serde(default = "default_oplog_size_mb")]
    pub oplog_size_mb: u32,
    /// legacy_flags passes the fast-start flags old (pre 3.6) mongod versions understand:
    /// --journal --nohttpinterface --noprealloc --smallfiles --nssize 1. Default false.
    #[serde(default)]
    pub legacy_flags: bool,
    /// extra_args are appended to every mongod command line
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// ready_attempts is how many times we try to connect to a new member. Default 40.
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,
    /// ready_interval_ms is the pause between connection attempts. Default 250.
    #[serde(default = "default_ready_interval_ms")]
    pub ready_interval_ms: u64,
    /// connect_timeout_ms bounds a single connection attempt. Default 250.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// topology_poll_interval_ms is the pause between replica set status queries. Default 2000.
    #[serde(default = "default_topology_poll_interval_ms")]
    pub topology_poll_interval_ms: u64,
    /// topology_timeout_seconds bounds waiting for the replica set to converge. Default 300, 0 waits forever.
    #[serde(default = "default_topology_timeout_seconds")]
    pub topology_timeout_seconds: u64,
    /// kill_signal is sent first when killing a member. Default SIGINT.
    #[serde(default)]
    pub kill_signal: Signal,
    /// kill_grace_seconds is how long a member gets to exit before it's sent SIGKILL. Default 10.
    #[serde(default = "default_kill_grace_seconds")]
    pub kill_grace_seconds: u64,
    /// shell_timeout_seconds bounds a single administrative command. Default 10.
    #[serde(default = "default_shell_timeout_seconds")]
    pub shell_timeout_seconds: u64,
}

const fn default_port() -> u16 { 27017 }
fn default_set_name() -> String { "repl0".to_string() }
fn default_dbpath() -> PathBuf { PathBuf::from("~/data/replica_set") }
fn default_logpath() -> PathBuf { PathBuf::from("~/log/replica_set") }
fn default_mongod() -> CommandLine { CommandLine::new("mongod") }
fn default_shell() -> CommandLine { CommandLine::new("mongosh") }
fn default_state_file() -> PathBuf { PathBuf::from("nodes.json") }
const fn default_oplog_size_mb() -> u32 { 5 }
const fn default_ready_attempts() -> u32 { 40 }
const fn default_ready_interval_ms() -> u64 { 250 }
const fn default_connect_timeout_ms() -> u64 { 250 }
const fn default_topology_poll_interval_ms() -> u64 { 2000 }
const fn default_topology_timeout_seconds() -> u64 { 300 }
const fn default_kill_grace_seconds() -> u64 { 10 }
const fn default_shell_timeout_seconds() -> u64 { 10 }

impl Settings {
    pub(crate) fn load(&mut self, path: Option<PathBuf>) -> Result<()> {
        self.config_path = path;
        if self.hostname.is_empty() {
            self.hostname = local_hostname()?;
        }
        self.dbpath = expand_home(&self.dbpath);
        self.logpath = expand_home(&self.logpath);
        self.state_file = expand_home(&self.state_file);
        if self.port == 0 {
            return Err(Error::new("port cannot be 0"));
        }
        if self.set_name.is_empty() {
            return Err(Error::new("set_name cannot be empty"));
        }
        if self.mongod.argv().is_empty() {
            return Err(Error::new("mongod command cannot be empty"));
        }
        if self.shell.argv().is_empty() {
            return Err(Error::new("shell command cannot be empty"));
        }
        if self.ready_attempts == 0 {
            return Err(Error::new("ready_attempts cannot be 0"));
        }
        if self.oplog_size_mb == 0 {
            self.oplog_size_mb = default_oplog_size_mb();
        }
        if self.topology_poll_interval_ms == 0 {
            self.topology_poll_interval_ms = default_topology_poll_interval_ms();
        }
        Ok(())
    }

    /// The address of member i, as it appears in the replica set config.
    pub fn member_address(&self, index: u32) -> Result<String> {
        Ok(format!("{}:{}", self.hostname, self.member_port(index)?))
    }

    pub fn member_port(&self, index: u32) -> Result<u16> {
        u16::try_from(self.port as u32 + index)
            .map_err(|_| Error::new(format!("member {} would need a port above 65535", index)))
    }

    pub fn member_dbpath(&self, index: u32) -> PathBuf {
        self.dbpath.join(format!("db{}", index))
    }

    pub fn member_logpath(&self, index: u32) -> PathBuf {
        self.logpath.join(format!("db{}.log", index))
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn topology_poll_interval(&self) -> Duration {
        Duration::from_millis(self.topology_poll_interval_ms)
    }

    /// None means wait forever.
    pub fn topology_timeout(&self) -> Option<Duration> {
        match self.topology_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_seconds)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_seconds)
    }
}
