mod errors;
mod util;

pub use self::errors::{Error, ErrorKind, CommandError, Result};
pub use self::util::*;
