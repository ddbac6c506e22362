use serde::{Deserialize};
use strum::{Display, EnumString};

/// Signal used to stop member processes.
#[derive(Deserialize, Display, EnumString, Debug, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Signal {
    SigInt,
    SigTerm,
    SigKill,
    SigHup,
}

impl Signal {
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            Signal::SigInt => libc::SIGINT,
            Signal::SigTerm => libc::SIGTERM,
            Signal::SigKill => libc::SIGKILL,
            Signal::SigHup => libc::SIGHUP,
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        // mongod shuts down cleanly on SIGINT
        Signal::SigInt
    }
}

/// A program plus any leading arguments, e.g. `mongod` or `[numactl, --interleave=all, mongod]`.
/// A single string is split on whitespace.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Argv(Vec<String>),
}

impl CommandLine {
    pub fn new(line: &str) -> Self {
        CommandLine::Line(line.to_string())
    }

    pub fn argv(&self) -> Vec<String> {
        match self {
            CommandLine::Line(s) => s.split_whitespace().map(str::to_string).collect(),
            CommandLine::Argv(v) => v.clone(),
        }
    }
}
