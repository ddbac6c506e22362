use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::rsmanager::admin::{AdminClient, CommandReply, MemberStatus, ReplicaGroupConfig};
use crate::rsmanager::common::split_address;
use crate::rsmanager::config::{Settings, STEPDOWN_SECONDS};
use crate::rsmanager::{Error, Result};

/// AdminClient that runs each command through the mongo shell (mongosh, or the legacy mongo),
/// printing the reply document as JSON. Both shells throw or return ok: 0 on failure,
/// the script folds the former into the latter.
pub struct MongoShell {
    shell: Vec<String>,
    timeout: Duration,
}

impl MongoShell {
    pub fn new(conf: &Settings) -> Self {
        Self{
            shell: conf.shell.argv(),
            timeout: conf.shell_timeout(),
        }
    }

    fn script(command: &Value) -> String {
        format!(
            "var r; try {{ r = db.adminCommand({}); }} catch (e) {{ r = {{ok: 0, errmsg: String(e.message || e), code: e.code}}; }} print(JSON.stringify(r));",
            command)
    }

    /// Run command against the member at address. Failing to get any reply at all is Unreachable.
    pub async fn run_command(&self, address: &str, command: &Value) -> Result<CommandReply> {
        let (host, port) = split_address(address)?;
        let (program, leading) = self.shell.split_first()
            .ok_or_else(|| Error::new("shell command is empty"))?;
        debug!(%address, %command, "running admin command");
        let output = Command::new(program)
            .args(leading)
            .arg("--quiet")
            .arg("--host").arg(host)
            .arg("--port").arg(port.to_string())
            .arg("--eval").arg(Self::script(command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match timeout(self.timeout, output).await {
            Ok(result) => result.map_err(|e| Error::new(format!("could not run {}: {}", program, e)))?,
            Err(_) => return Err(Error::unreachable(format!("{} timed out after {:?}", address, self.timeout))),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        // The shell may print warnings before our line, the reply is the last JSON object
        let reply = stdout.lines().rev().find(|line| line.trim_start().starts_with('{'));
        match reply {
            Some(line) => Ok(serde_json::from_str(line.trim())?),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = stderr.lines().chain(stdout.lines()).filter(|l| !l.trim().is_empty()).last()
                    .unwrap_or("no output").trim().to_string();
                Err(Error::unreachable(format!("{} ({}): {}", address, output.status, reason)))
            },
        }
    }
}

impl AdminClient for MongoShell {
    async fn initiate(&self, seed: &str, config: &ReplicaGroupConfig) -> Result<()> {
        info!(%seed, set_name = %config.name, members = config.members.len(), "initiating replica set");
        let command = json!({ "replSetInitiate": config });
        self.run_command(seed, &command).await?.check("replSetInitiate")?;
        Ok(())
    }

    async fn status(&self, seeds: &[String]) -> Result<Vec<MemberStatus>> {
        let command = json!({ "replSetGetStatus": 1 });
        let mut last_err = None;
        for seed in seeds {
            match self.run_command(seed, &command).await {
                Ok(reply) => return Ok(reply.check("replSetGetStatus")?.members),
                Err(e) if e.is_transient() => {
                    debug!(%seed, %e, "member not answering, trying the next");
                    last_err = Some(e);
                },
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::unreachable("no members tracked")))
    }

    async fn step_down(&self, primary: &str) -> Result<()> {
        info!(%primary, "asking primary to step down");
        let command = json!({ "replSetStepDown": STEPDOWN_SECONDS });
        self.run_command(primary, &command).await?.check("replSetStepDown")?;
        Ok(())
    }
}
