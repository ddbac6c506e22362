mod config;
mod enums;
mod load;

pub use config::*;
pub use enums::*;
pub use load::{load_config, parse_config, CONFIG_NAME, DEFAULT_CONFIG};
