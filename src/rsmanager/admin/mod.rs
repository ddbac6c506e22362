mod config;
mod reply;
mod shell;

pub use self::config::{ReplicaGroupConfig, MemberConfig};
pub use self::reply::{CommandReply, MemberStatus};
pub use self::shell::MongoShell;

use crate::rsmanager::Result;

/// The administrative command channel to the members of the replica set.
/// Replication itself is the server's business, we only bootstrap it and watch it.
#[allow(async_fn_in_trait)]
pub trait AdminClient {
    /// Send replSetInitiate with config to seed. Errors if the server rejects it.
    async fn initiate(&self, seed: &str, config: &ReplicaGroupConfig) -> Result<()>;

    /// Ask the first member of seeds that answers for replSetGetStatus.
    /// Errors are classified with Error::is_transient.
    async fn status(&self, seeds: &[String]) -> Result<Vec<MemberStatus>>;

    /// Ask primary to step down. The server may drop the connection while doing so.
    async fn step_down(&self, primary: &str) -> Result<()>;
}
