use serde::Serialize;

use crate::rsmanager::{Error, Result};

/// The replica set config document submitted with replSetInitiate.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReplicaGroupConfig {
    #[serde(rename = "_id")]
    pub name: String,
    pub version: u32,
    pub members: Vec<MemberConfig>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MemberConfig {
    #[serde(rename = "_id")]
    pub id: u32,
    pub host: String,
    #[serde(rename = "arbiterOnly", skip_serializing_if = "std::ops::Not::not")]
    pub arbiter_only: bool,
}

impl ReplicaGroupConfig {
    /// Build the initial (version 1) config. If arbiter is set the last member is the arbiter,
    /// which needs at least one other member to hold the data.
    pub fn new(name: &str, hosts: Vec<String>, arbiter: bool) -> Result<Self> {
        if hosts.is_empty() {
            return Err(Error::new("a replica set needs at least one member"));
        }
        if arbiter && hosts.len() < 2 {
            return Err(Error::new("an arbiter needs at least one data bearing member"));
        }
        let last = hosts.len() - 1;
        let members = hosts.into_iter().enumerate().map(|(i, host)| MemberConfig{
            id: i as u32,
            host,
            arbiter_only: arbiter && i == last,
        }).collect();
        Ok(Self{
            name: name.to_string(),
            version: 1,
            members,
        })
    }

    /// The member that gets the replSetInitiate command.
    pub fn seed(&self) -> &str {
        &self.members[0].host
    }

    pub fn arbiter(&self) -> Option<&str> {
        self.members.iter().find(|m| m.arbiter_only).map(|m| m.host.as_str())
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.host.as_str())
    }
}
