use std::fmt::Display;
use std::{fmt, io, result};

use crate::rsmanager::topology::TopologySnapshot;

/// Server error codes that mean "not ready yet" rather than "never going to work".
/// NotYetInitialized, InterruptedAtShutdown, ShutdownInProgress, PrimarySteppedDown,
/// NotWritablePrimary, NotPrimaryNoSecondaryOk, NotPrimaryOrSecondary, InterruptedDueToReplStateChange.
const TRANSIENT_SERVER_CODES: &[i32] = &[94, 11600, 91, 189, 10107, 13435, 13436, 11602];

#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

/// A command the server answered with ok: 0.
#[derive(Debug)]
pub struct CommandError {
    pub command: String,
    pub code: i32,
    pub msg: String,
}

#[derive(Debug)]
pub enum ErrorKind {
    Cancelled,
    StringError(String),
    IOError(io::Error),
    JSONError(serde_json::Error),
    YAMLError(serde_yaml::Error),
    /// a member process exited or never became reachable
    LaunchError { address: String, reason: String },
    /// no member answered an administrative command
    Unreachable(String),
    CommandError(CommandError),
    /// the replica set did not reach the requested shape before the deadline
    NotConverged { expected: String, last: Option<TopologySnapshot> },
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Self::from_kind(ErrorKind::StringError(s.to_string()))
    }

    pub fn cancelled() -> Self {
        Self::from_kind(ErrorKind::Cancelled)
    }

    pub fn launch<S: ToString>(address: &str, reason: S) -> Self {
        Self::from_kind(ErrorKind::LaunchError {
            address: address.to_string(),
            reason: reason.to_string(),
        })
    }

    pub fn unreachable<S: ToString>(s: S) -> Self {
        Self::from_kind(ErrorKind::Unreachable(s.to_string()))
    }

    pub fn command(command: &str, code: i32, msg: String) -> Self {
        Self::from_kind(ErrorKind::CommandError(CommandError {
            command: command.to_string(),
            code,
            msg,
        }))
    }

    pub fn not_converged(expected: String, last: Option<TopologySnapshot>) -> Self {
        Self::from_kind(ErrorKind::NotConverged { expected, last })
    }

    fn from_kind(kind: ErrorKind) -> Self {
        Error {
            err: Box::new(kind),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    /// is_transient is true for failures that polling again may get past:
    /// nobody answering yet, or the server reporting it isn't ready.
    pub fn is_transient(&self) -> bool {
        match self.kind() {
            ErrorKind::Unreachable(_) => true,
            ErrorKind::CommandError(e) => TRANSIENT_SERVER_CODES.contains(&e.code),
            _ => false,
        }
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::from_kind(ErrorKind::StringError(String::from(err)))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::from_kind(ErrorKind::StringError(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::from_kind(ErrorKind::IOError(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::from_kind(ErrorKind::JSONError(err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::from_kind(ErrorKind::YAMLError(err))
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::from(err.error)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        std::fmt::Display::fmt(&self.err, f)
    }
}

impl Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} failed with code {}: {}", self.command, self.code, self.msg)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Cancelled => f.write_str("operation cancelled"),
            ErrorKind::StringError(s) => f.write_str(&s),
            ErrorKind::IOError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::JSONError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::YAMLError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::LaunchError { address, reason } => write!(f, "could not launch {}: {}", address, reason),
            ErrorKind::Unreachable(s) => write!(f, "no member reachable: {}", s),
            ErrorKind::CommandError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::NotConverged { expected, last } => match last {
                Some(snapshot) => write!(f, "replica set did not reach {} (last seen {})", expected, snapshot),
                None => write!(f, "replica set did not reach {} (no status observed)", expected),
            },
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}
