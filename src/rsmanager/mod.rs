pub mod common;
pub mod config;
pub mod nodes;
pub mod process;
pub mod launcher;
pub mod readiness;
pub mod admin;
pub mod topology;
pub mod fault;
pub mod controller;

pub use common::{Error, ErrorKind, Result};
