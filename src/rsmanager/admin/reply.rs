use serde::Deserialize;

use crate::rsmanager::{Error, Result};

/// The parts of a command reply document we look at.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct CommandReply {
    #[serde(default)]
    pub ok: f64,
    #[serde(default)]
    pub errmsg: Option<String>,
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub members: Vec<MemberStatus>,
}

/// One entry of replSetGetStatus.members
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MemberStatus {
    pub name: String,
    pub state: i32,
    #[serde(rename = "stateStr", default)]
    pub state_str: String,
}

impl CommandReply {
    /// Turn an ok: 0 reply into an error for command.
    pub fn check(self, command: &str) -> Result<Self> {
        if self.ok >= 1.0 {
            return Ok(self);
        }
        let msg = self.errmsg.clone().unwrap_or_else(|| "no error message".to_string());
        Err(Error::command(command, self.code.unwrap_or(0), msg))
    }
}
