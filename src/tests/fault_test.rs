use std::path::PathBuf;
use std::time::Duration;

use test_env_log::test;
use tokio_util::sync::CancellationToken;

use crate::rsmanager::admin::{AdminClient, ReplicaGroupConfig};
use crate::rsmanager::config::{Settings, Signal};
use crate::rsmanager::fault::{self, KillPolicy};
use crate::rsmanager::launcher::{launch_member, spawn};
use crate::rsmanager::nodes::{Node, NodeStore};
use crate::rsmanager::process::{self, Termination};
use crate::rsmanager::readiness::ReadinessPolicy;
use crate::rsmanager::topology::TopologyMonitor;
use crate::tests::common::{self, FakeReplicaSet};

fn launch(conf: &Settings, count: u32) -> NodeStore {
    let mut nodes = NodeStore::new();
    for i in 0..count {
        let launched = launch_member(conf, i).unwrap();
        nodes.insert(launched.address, launched.node);
    }
    nodes
}

fn pid_of(nodes: &NodeStore, address: &str) -> Option<u32> {
    nodes.get(address).and_then(|node| node.pid)
}

#[test(tokio::test)]
async fn test_kill_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _listeners) = common::listeners(2);
    let conf = common::settings(dir.path(), port);
    let policy = KillPolicy::new(&conf);
    let mut nodes = launch(&conf, 2);
    let first = conf.member_address(0).unwrap();
    let second = conf.member_address(1).unwrap();
    let pid = pid_of(&nodes, &first).unwrap();
    let cmd = nodes.get(&first).unwrap().cmd.clone();
    assert!(process::is_running_command(pid, &cmd));

    let killed = fault::kill(&mut nodes, &[first.clone()], &policy).await.unwrap();
    assert_eq!(killed, vec![first.clone()]);
    assert_eq!(pid_of(&nodes, &first), None);
    assert!(!process::is_running_command(pid, &cmd));
    assert!(process::has_exited(pid));
    assert!(nodes.contains(&second));

    // killing it again is not an error
    let killed = fault::kill(&mut nodes, &[first.clone()], &policy).await.unwrap();
    assert_eq!(killed, vec![first]);

    fault::kill_all(&mut nodes, &policy).await.unwrap();
    assert_eq!(nodes.live_count(), 0);
    assert_eq!(nodes.len(), 2);
}

#[test(tokio::test)]
async fn test_kill_skips_unknown_members() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _listeners) = common::listeners(1);
    let conf = common::settings(dir.path(), port);
    let policy = KillPolicy::new(&conf);
    let mut nodes = launch(&conf, 1);
    let address = conf.member_address(0).unwrap();

    let killed = fault::kill(&mut nodes, &["nowhere:1".to_string(), address.clone()], &policy).await.unwrap();
    assert_eq!(killed, vec![address]);
    assert_eq!(nodes.len(), 1);
}

#[test(tokio::test)]
async fn test_kill_member_that_already_died() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _listeners) = common::listeners(1);
    let conf = common::settings(dir.path(), port);
    let policy = KillPolicy::new(&conf);
    let mut nodes = launch(&conf, 1);
    let address = conf.member_address(0).unwrap();
    let pid = pid_of(&nodes, &address).unwrap();

    assert_eq!(process::terminate(pid, Signal::SigKill, Duration::from_secs(2)).await.unwrap(), Termination::Exited);
    let killed = fault::kill(&mut nodes, &[address.clone()], &policy).await.unwrap();
    assert_eq!(killed, vec![address.clone()]);
    assert!(!nodes.contains(&address));
}

#[test(tokio::test)]
async fn test_terminate_escalates_to_sigkill() {
    let dir = tempfile::tempdir().unwrap();
    let logpath = dir.path().join("stubborn.log");
    let cmd: Vec<String> = ["sh", "-c", "trap '' INT TERM; while :; do sleep 1; done"]
        .iter().map(|s| s.to_string()).collect();
    let child = spawn("stubborn:1", &cmd, &logpath).unwrap();
    let pid = child.id();
    // give the shell time to install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let how = process::terminate(pid, Signal::SigInt, Duration::from_millis(300)).await.unwrap();
    assert_eq!(how, Termination::Killed);
    assert!(process::has_exited(pid));
}

#[test(tokio::test)]
async fn test_restart_killed_member() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _listeners) = common::listeners(2);
    let conf = common::settings(dir.path(), port);
    let policy = KillPolicy::new(&conf);
    let readiness = ReadinessPolicy::new(&conf);
    let mut nodes = launch(&conf, 2);
    let address = conf.member_address(1).unwrap();
    let old_pid = pid_of(&nodes, &address).unwrap();

    fault::kill(&mut nodes, &[address.clone()], &policy).await.unwrap();
    let restarted = fault::restart(&mut nodes, &[address.clone()], &readiness, &policy, &CancellationToken::new()).await;
    assert_eq!(restarted, vec![address.clone()]);

    let node = nodes.get(&address).unwrap();
    let new_pid = node.pid.unwrap();
    assert_ne!(new_pid, old_pid);
    assert!(process::is_running_command(new_pid, &node.cmd));
    assert_eq!(nodes.live_count(), 2);

    fault::kill_all(&mut nodes, &policy).await.unwrap();
}

#[test(tokio::test)]
async fn test_restart_member_that_crashed() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _listeners) = common::listeners(1);
    let conf = common::settings(dir.path(), port);
    let policy = KillPolicy::new(&conf);
    let readiness = ReadinessPolicy::new(&conf);
    let mut nodes = launch(&conf, 1);
    let address = conf.member_address(0).unwrap();
    let old_pid = pid_of(&nodes, &address).unwrap();

    // dies behind our back, the store still has its pid
    assert!(process::send_signal(old_pid, libc::SIGKILL).unwrap());
    for _ in 0..100 {
        if process::has_exited(old_pid) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pid_of(&nodes, &address), Some(old_pid));

    let restarted = fault::restart(&mut nodes, &[address.clone()], &readiness, &policy, &CancellationToken::new()).await;
    assert_eq!(restarted, vec![address.clone()]);
    let node = nodes.get(&address).unwrap();
    let new_pid = node.pid.unwrap();
    assert_ne!(new_pid, old_pid);
    assert!(process::is_running_command(new_pid, &node.cmd));

    fault::kill_all(&mut nodes, &policy).await.unwrap();
}

#[test(tokio::test)]
async fn test_kill_member_started_through_wrapper() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _listeners) = common::listeners(1);
    let conf = common::settings_with_mongod(dir.path(), port, &common::wrapped_mongod());
    let policy = KillPolicy::new(&conf);
    let readiness = ReadinessPolicy::new(&conf);
    let mut nodes = launch(&conf, 1);
    let address = conf.member_address(0).unwrap();
    let pid = pid_of(&nodes, &address).unwrap();
    // let env exec the shell
    tokio::time::sleep(Duration::from_millis(200)).await;

    // still running, so restart leaves it alone
    assert!(fault::restart(&mut nodes, &[address.clone()], &readiness, &policy, &CancellationToken::new()).await.is_empty());
    assert_eq!(pid_of(&nodes, &address), Some(pid));

    assert_eq!(fault::kill(&mut nodes, &[address.clone()], &policy).await.unwrap(), vec![address]);
    assert!(process::has_exited(pid));
}

#[test(tokio::test)]
async fn test_restart_skips_running_and_unknown_members() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _listeners) = common::listeners(1);
    let conf = common::settings(dir.path(), port);
    let policy = KillPolicy::new(&conf);
    let readiness = ReadinessPolicy::new(&conf);
    let mut nodes = launch(&conf, 1);
    let address = conf.member_address(0).unwrap();
    let pid = pid_of(&nodes, &address);

    let requested = vec![address.clone(), "nowhere:1".to_string()];
    let restarted = fault::restart(&mut nodes, &requested, &readiness, &policy, &CancellationToken::new()).await;
    assert!(restarted.is_empty());
    assert_eq!(pid_of(&nodes, &address), pid);

    fault::kill_all(&mut nodes, &policy).await.unwrap();
}

#[test(tokio::test)]
async fn test_restart_member_that_never_gets_ready() {
    let dir = tempfile::tempdir().unwrap();
    let (port, listeners) = common::listeners(1);
    let conf = common::settings(dir.path(), port);
    let policy = KillPolicy::new(&conf);
    let readiness = ReadinessPolicy::new(&conf);
    let mut nodes = launch(&conf, 1);
    let address = conf.member_address(0).unwrap();

    fault::kill(&mut nodes, &[address.clone()], &policy).await.unwrap();
    drop(listeners);
    let restarted = fault::restart(&mut nodes, &[address.clone()], &readiness, &policy, &CancellationToken::new()).await;
    assert!(restarted.is_empty());
    // the failed attempt was cleaned up, the member can still be restarted later
    assert_eq!(pid_of(&nodes, &address), None);
    assert_eq!(nodes.len(), 1);
}

#[test(tokio::test)]
async fn test_kill_all_secondaries() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _listeners) = common::listeners(3);
    let conf = common::settings(dir.path(), port);
    let policy = KillPolicy::new(&conf);
    let mut nodes = launch(&conf, 3);
    let fake = FakeReplicaSet::new();
    let config = ReplicaGroupConfig::new(&conf.set_name, nodes.addresses(), false).unwrap();
    fake.initiate(config.seed(), &config).await.unwrap();
    let monitor = TopologyMonitor::new(&fake, conf.topology_poll_interval());

    let primary = conf.member_address(0).unwrap();
    let mut killed = fault::kill_all_secondaries(&mut nodes, &monitor, &policy).await.unwrap();
    killed.sort();
    assert_eq!(killed, vec![conf.member_address(1).unwrap(), conf.member_address(2).unwrap()]);
    assert_eq!(nodes.live_addresses(), vec![primary]);

    fault::kill_all(&mut nodes, &policy).await.unwrap();
}

#[test(tokio::test)]
async fn test_stepdown_asks_the_primary() {
    let mut nodes = NodeStore::new();
    let hosts: Vec<String> = (0..3).map(|i| format!("h:{}", 27017 + i)).collect();
    for (i, host) in hosts.iter().enumerate() {
        // never signalled, the pids don't have to exist
        nodes.insert(host.clone(), Node{
            pid: Some(4_000_000 + i as u32),
            cmd: vec!["mongod".to_string()],
            logpath: PathBuf::from("/nonexistent/db.log"),
            host: "h".to_string(),
            port: 27017 + i as u16,
            started_at: None,
        });
    }
    let fake = FakeReplicaSet::new();
    let monitor = TopologyMonitor::new(&fake, Duration::from_millis(5));

    // no replica set yet, so no primary
    assert!(fault::stepdown(&nodes, &monitor).await.unwrap().is_empty());
    assert!(fake.stepdowns().is_empty());

    let config = ReplicaGroupConfig::new("rs", hosts.clone(), false).unwrap();
    fake.initiate(config.seed(), &config).await.unwrap();
    assert_eq!(fault::stepdown(&nodes, &monitor).await.unwrap(), vec![hosts[0].clone()]);
    assert_eq!(fake.stepdowns(), vec![hosts[0].clone()]);
    assert_eq!(monitor.primary(&nodes.live_addresses()).await.unwrap(), vec![hosts[1].clone()]);
}
