use std::fs::{self, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use chrono::Utc;
use tracing::{info, debug};

use crate::rsmanager::config::Settings;
use crate::rsmanager::nodes::Node;
use crate::rsmanager::{Error, Result};

/// A member process that has been spawned but not yet probed.
#[derive(Debug)]
pub struct Launched {
    pub address: String,
    pub node: Node,
    pub child: Child,
}

/// Build the command line for member index: port base+index, data in dbpath/db<index>,
/// logging to logpath/db<index>.log, with small resource settings so startup is fast.
pub fn member_command(conf: &Settings, index: u32) -> Result<Vec<String>> {
    let port = conf.member_port(index)?;
    let mut cmd = conf.mongod.argv();
    cmd.extend([
        "--dbpath".to_string(), conf.member_dbpath(index).to_string_lossy().into_owned(),
        "--port".to_string(), port.to_string(),
        "--replSet".to_string(), conf.set_name.clone(),
        "--logpath".to_string(), conf.member_logpath(index).to_string_lossy().into_owned(),
        // 5MB oplog instead of 5% of the disk
        "--oplogSize".to_string(), conf.oplog_size_mb.to_string(),
    ]);
    if conf.legacy_flags {
        cmd.extend(["--journal", "--nohttpinterface", "--noprealloc", "--smallfiles", "--nssize", "1"]
            .iter().map(|s| s.to_string()));
    } else {
        let bind_ip = match conf.hostname.as_str() {
            "localhost" | "127.0.0.1" => "localhost".to_string(),
            host => format!("localhost,{}", host),
        };
        cmd.extend(["--bind_ip".to_string(), bind_ip, "--wiredTigerCacheSizeGB".to_string(), "0.25".to_string()]);
    }
    cmd.extend(conf.extra_args.iter().cloned());
    Ok(cmd)
}

/// Create the data and log directories for member index and spawn it.
pub fn launch_member(conf: &Settings, index: u32) -> Result<Launched> {
    let address = conf.member_address(index)?;
    let port = conf.member_port(index)?;
    fs::create_dir_all(conf.member_dbpath(index))?;
    let logpath = conf.member_logpath(index);
    if let Some(dir) = logpath.parent() {
        fs::create_dir_all(dir)?;
    }
    let cmd = member_command(conf, index)?;
    let child = spawn(&address, &cmd, &logpath)?;
    let node = Node{
        pid: Some(child.id()),
        cmd,
        logpath,
        host: conf.hostname.clone(),
        port,
        started_at: Some(Utc::now()),
    };
    Ok(Launched{ address, node, child })
}

/// Spawn cmd as an independent process: its own process group (so ^C aimed at us doesn't
/// reach it) with stdout and stderr appended to a .out file next to logpath.
pub fn spawn(address: &str, cmd: &[String], logpath: &Path) -> Result<Child> {
    let (program, args) = cmd.split_first()
        .ok_or_else(|| Error::launch(address, "empty command"))?;
    info!(%address, "starting {}", cmd.join(" "));
    let out_path = logpath.with_extension("out");
    let out = OpenOptions::new().create(true).append(true).open(&out_path)?;
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(out.try_clone()?)
        .stderr(out)
        .process_group(0)
        .spawn()
        .map_err(|e| Error::launch(address, e))?;
    debug!(%address, pid = child.id(), out = %out_path.display(), "spawned");
    Ok(child)
}
