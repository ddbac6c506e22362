pub mod rsmanager;
#[cfg(test)]
mod tests;

pub use crate::rsmanager::*;

use std::io;

use tokio::runtime::{Runtime, Builder};
use tracing_subscriber::FmtSubscriber;
use tracing::Level;


pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than max_level will be written to stderr,
        // stdout is left for command output.
        .with_max_level(max_level)
        .with_writer(io::stderr)
        // completes the builder.
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {}", e);
    }
}

/// One invocation does one thing at a time, a single thread runtime is all it needs.
pub fn init_runtime() -> io::Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
}
