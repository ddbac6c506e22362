use std::io;
use std::time::Duration;

use strum::Display;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::rsmanager::config::{Signal, KILL_POLL_INTERVAL_MS};
use crate::rsmanager::{Error, Result};

/// How a process went away.
#[derive(Display, Debug, Copy, Clone, Eq, PartialEq)]
pub enum Termination {
    /// it was gone before we signalled it
    AlreadyDead,
    /// it exited after the requested signal
    Exited,
    /// it had to be sent SIGKILL
    Killed,
}

/// pid 0 and anything past i32::MAX would address a process group (or everything) rather than one process.
pub fn is_valid_pid(pid: u32) -> bool {
    pid != 0 && pid <= i32::MAX as u32
}

fn raw_pid(pid: u32) -> Result<libc::pid_t> {
    if is_valid_pid(pid) {
        Ok(pid as libc::pid_t)
    } else {
        Err(Error::new(format!("{} is not a valid pid", pid)))
    }
}

/// Send sig to pid. Returns false if there is no such process.
pub fn send_signal(pid: u32, sig: libc::c_int) -> Result<bool> {
    let raw = raw_pid(pid)?;
    let ret = unsafe { libc::kill(raw, sig) };
    if ret == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        _ => Err(err.into()),
    }
}

/// Returns true once pid has exited. Reaps it if it's our child, so it doesn't linger as a zombie.
/// An invalid pid never names a process of ours, so it counts as exited.
pub fn has_exited(pid: u32) -> bool {
    let raw = match raw_pid(pid) {
        Ok(raw) => raw,
        Err(_) => return true,
    };
    let mut status: libc::c_int = 0;
    let ret = unsafe { libc::waitpid(raw, &mut status, libc::WNOHANG) };
    if ret > 0 {
        return true;
    }
    if ret == 0 {
        return false;
    }
    // ECHILD: started by an earlier invocation, all we can do is check it still exists
    let ret = unsafe { libc::kill(raw, 0) };
    ret != 0 && io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
}

/// Checks that pid is still running cmd, so we never signal a recycled pid.
/// Wrappers like env or numactl exec the server, so the live command line only has to be
/// a tail of cmd. Only linux exposes the command line, elsewhere we trust the pid.
pub fn is_running_command(pid: u32, cmd: &[String]) -> bool {
    if !is_valid_pid(pid) {
        return false;
    }
    if !cfg!(target_os = "linux") {
        return !has_exited(pid);
    }
    match std::fs::read(format!("/proc/{}/cmdline", pid)) {
        Ok(raw) => {
            let args: Vec<&[u8]> = raw.split(|b| *b == 0).filter(|a| !a.is_empty()).collect();
            !args.is_empty() && args.len() <= cmd.len()
                && args.iter().rev().zip(cmd.iter().rev()).all(|(a, c)| *a == c.as_bytes())
        },
        Err(_) => false,
    }
}

async fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if has_exited(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(KILL_POLL_INTERVAL_MS)).await;
    }
}

/// Stop pid: send signal, wait up to grace for it to exit, then SIGKILL and wait up to grace again.
pub async fn terminate(pid: u32, signal: Signal, grace: Duration) -> Result<Termination> {
    debug!(pid, %signal, "killing pid");
    if !send_signal(pid, signal.as_raw())? {
        return Ok(Termination::AlreadyDead);
    }
    if wait_for_exit(pid, grace).await {
        return Ok(Termination::Exited);
    }
    if signal == Signal::SigKill {
        return Err(Error::new(format!("pid {} did not exit after SIGKILL", pid)));
    }

    warn!(pid, ?grace, "process ignored {}, sending SIGKILL", signal);
    if !send_signal(pid, libc::SIGKILL)? {
        return Ok(Termination::Exited);
    }
    if wait_for_exit(pid, grace).await {
        Ok(Termination::Killed)
    } else {
        Err(Error::new(format!("pid {} did not exit after SIGKILL", pid)))
    }
}
