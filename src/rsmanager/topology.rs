use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rsmanager::admin::{AdminClient, MemberStatus};
use crate::rsmanager::{Error, Result};

/// Member state codes from replSetGetStatus. These are fixed by the server.
pub const STATE_PRIMARY: i32 = 1;
pub const STATE_SECONDARY: i32 = 2;
pub const STATE_ARBITER: i32 = 7;

/// The role a member reported. Anything else (STARTUP, RECOVERING, DOWN, ...) is Other.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Role {
    Primary,
    Secondary,
    Arbiter,
    Other(i32),
}

impl Role {
    pub fn from_state(state: i32) -> Self {
        match state {
            STATE_PRIMARY => Role::Primary,
            STATE_SECONDARY => Role::Secondary,
            STATE_ARBITER => Role::Arbiter,
            other => Role::Other(other),
        }
    }

    pub fn state(&self) -> i32 {
        match self {
            Role::Primary => STATE_PRIMARY,
            Role::Secondary => STATE_SECONDARY,
            Role::Arbiter => STATE_ARBITER,
            Role::Other(state) => *state,
        }
    }
}

/// Members grouped by role from a single status query. Never stored, poll again instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    roles: BTreeMap<Role, Vec<String>>,
}

impl TopologySnapshot {
    pub fn from_members(members: &[MemberStatus]) -> Self {
        let mut roles = BTreeMap::<Role, Vec<String>>::new();
        for member in members {
            roles.entry(Role::from_state(member.state)).or_default().push(member.name.clone());
        }
        Self{ roles }
    }

    pub fn members(&self, role: Role) -> &[String] {
        self.roles.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn primary(&self) -> &[String] {
        self.members(Role::Primary)
    }

    pub fn secondaries(&self) -> &[String] {
        self.members(Role::Secondary)
    }

    pub fn arbiters(&self) -> &[String] {
        self.members(Role::Arbiter)
    }

    pub fn matches(&self, shape: &ExpectedShape) -> bool {
        self.primary().len() == shape.primaries
            && self.secondaries().len() == shape.secondaries
            && self.arbiters().len() == shape.arbiters
    }
}

impl Display for TopologySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "primary={:?} secondaries={:?} arbiters={:?}", self.primary(), self.secondaries(), self.arbiters())?;
        for (role, names) in &self.roles {
            if let Role::Other(state) = role {
                write!(f, " state{}={:?}", state, names)?;
            }
        }
        Ok(())
    }
}

/// The role counts a healthy replica set of a given size should report.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ExpectedShape {
    pub primaries: usize,
    pub secondaries: usize,
    pub arbiters: usize,
}

impl ExpectedShape {
    /// One primary, the arbiter if requested, everyone else a secondary.
    pub fn new(members: usize, arbiter: bool) -> Self {
        let arbiters = if arbiter { 1 } else { 0 };
        Self{
            primaries: 1,
            secondaries: members.saturating_sub(1 + arbiters),
            arbiters,
        }
    }
}

impl Display for ExpectedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} primary, {} secondaries, {} arbiters", self.primaries, self.secondaries, self.arbiters)
    }
}

/// The outcome of one status query.
#[derive(Debug)]
pub enum TopologyPoll {
    Observed(TopologySnapshot),
    /// nobody answered, or the set isn't ready yet. Worth asking again.
    Transient(Error),
    /// asking again won't help
    Fatal(Error),
}

/// Asks the replica set (through whichever tracked member answers) who holds which role.
pub struct TopologyMonitor<'a, A: AdminClient> {
    admin: &'a A,
    poll_interval: Duration,
}

impl<'a, A: AdminClient> TopologyMonitor<'a, A> {
    pub fn new(admin: &'a A, poll_interval: Duration) -> Self {
        Self{ admin, poll_interval }
    }

    pub fn admin(&self) -> &'a A {
        self.admin
    }

    pub async fn poll(&self, seeds: &[String]) -> TopologyPoll {
        match self.admin.status(seeds).await {
            Ok(members) => TopologyPoll::Observed(TopologySnapshot::from_members(&members)),
            Err(e) if e.is_transient() => TopologyPoll::Transient(e),
            Err(e) => TopologyPoll::Fatal(e),
        }
    }

    /// Like poll, but a transient failure is logged and observes nobody.
    pub async fn snapshot(&self, seeds: &[String]) -> Result<TopologySnapshot> {
        match self.poll(seeds).await {
            TopologyPoll::Observed(snapshot) => Ok(snapshot),
            TopologyPoll::Transient(e) => {
                warn!(%e, "could not get replica set status");
                Ok(TopologySnapshot::default())
            },
            TopologyPoll::Fatal(e) => Err(e),
        }
    }

    pub async fn members_in_role(&self, seeds: &[String], role: Role) -> Result<Vec<String>> {
        Ok(self.snapshot(seeds).await?.members(role).to_vec())
    }

    pub async fn primary(&self, seeds: &[String]) -> Result<Vec<String>> {
        self.members_in_role(seeds, Role::Primary).await
    }

    pub async fn secondaries(&self, seeds: &[String]) -> Result<Vec<String>> {
        self.members_in_role(seeds, Role::Secondary).await
    }

    pub async fn arbiters(&self, seeds: &[String]) -> Result<Vec<String>> {
        self.members_in_role(seeds, Role::Arbiter).await
    }

    /// A uniformly chosen secondary, or nothing if there are none.
    pub async fn random_secondary(&self, seeds: &[String]) -> Result<Vec<String>> {
        let secondaries = self.secondaries(seeds).await?;
        Ok(secondaries.choose(&mut rand::thread_rng()).cloned().into_iter().collect())
    }

    /// Poll until the set reports shape. Gives up with NotConverged (carrying the last
    /// snapshot seen) once timeout passes, or with Cancelled. timeout None waits forever.
    pub async fn await_shape(
        &self,
        seeds: &[String],
        shape: &ExpectedShape,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<TopologySnapshot> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let mut last = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::cancelled()),
                _ = sleep(self.poll_interval) => {},
            }

            match self.poll(seeds).await {
                TopologyPoll::Observed(snapshot) => {
                    if snapshot.matches(shape) {
                        info!(elapsed = ?started.elapsed(), %snapshot, "replica set converged");
                        return Ok(snapshot);
                    }
                    debug!(%snapshot, expected = %shape, "waiting for replica set");
                    last = Some(snapshot);
                },
                TopologyPoll::Transient(e) => debug!(%e, "replica set not answering yet"),
                TopologyPoll::Fatal(e) => return Err(e),
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::not_converged(shape.to_string(), last));
                }
            }
        }
    }
}
