use std::path::{Path, PathBuf};
use tracing::{info_span, info, debug};
use std::env;
use std::borrow::Cow;
use regex::{Regex, Captures};

use crate::rsmanager::{Error, Result};
use crate::rsmanager::config::config;

pub const CONFIG_NAME: &str = "rsmanager.yaml";

/// Used when there is no config file. Keeps the environment knobs the old scripts had.
pub const DEFAULT_CONFIG: &str = "\
dbpath: ${DBPATH:~/data/replica_set}
logpath: ${LOGPATH:~/log/replica_set}
port: ${DBPORT:27017}
mongod: ${MONGOD:mongod}
set_name: ${SETNAME:repl0}
shell: ${MONGO_SHELL:mongosh}
";

/// Load configuration settings from rsmanager.yaml
/// Searching in order:
/// 1) config_path, if given (it's an error if it doesn't exist)
/// 2) Current directory
/// 3) Any parent directory of the current directory, up to root
/// 4) ~/.config/rsmanager/
/// 5) ~/.rsmanager.yaml
/// 6) /etc/rsmanager/
/// If none is found, DEFAULT_CONFIG is used.
///
/// This replaces ${ENV_VAR[:DEFAULT]} parameters in the yaml file with values from the environment
/// variable, if set, otherwise, optionally with the given default value after the :
pub fn load_config(config_path: Option<&Path>) -> Result<config::Settings> {
    let _span = info_span!("loading config file").entered();
    let found = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(CONFIG_NAME),
    };
    let raw_yaml = match &found {
        Some(path) => {
            info!(config_path = %path.to_string_lossy(), "found config file");
            std::fs::read_to_string(path)?
        },
        None => {
            info!("no config file, using defaults");
            DEFAULT_CONFIG.to_string()
        },
    };
    parse_config(&raw_yaml, found)
}

/// Parse settings from yaml text, substituting environment variables first.
pub fn parse_config(raw_yaml: &str, path: Option<PathBuf>) -> Result<config::Settings> {
    let yaml_text = replace_env_vars(raw_yaml)?;
    let mut settings: config::Settings = serde_yaml::from_str(&yaml_text)?;
    settings.load(path)?;
    Ok(settings)
}

fn find_config_file(config_name: &str) -> Option<PathBuf> {
    // Check the current directory or any of its parents for config_name
    if let Ok(start) = env::current_dir() {
        let mut dir = start.as_path();
        loop {
            debug!("checking for config file in {}", dir.to_string_lossy());
            let fp = Path::join(dir, config_name);
            if fp.exists() {
                return Some(fp);
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    // HOME is required to be set on POSIX systems, but if it's not set we'll try ~/
    let home = env::var("HOME").unwrap_or_else(|_| "~/".to_string());
    let candidates = [
        Path::new(&home).join(".config/rsmanager").join(config_name),
        Path::new(&home).join(".".to_string() + config_name),
        Path::new("/etc/rsmanager").join(config_name),
    ];
    for conf_path in candidates {
        debug!("checking for config file in {}", conf_path.to_string_lossy());
        if conf_path.exists() {
            return Some(conf_path);
        }
    }
    None
}

pub(crate) fn replace_env_vars(raw_yaml: &str) -> Result<Cow<str>> {
    // We only call this function once and then never again, so don't keep the regex
    let re_var = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)(?::([^}]+?))?\}").map_err(Error::new)?;

    let mut errors = Vec::<String>::new();

    let replaced_text = re_var.replace_all(raw_yaml, |caps: &Captures| {
        match env::var(&caps[1]) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = caps.get(2) {
                    let s = default.as_str();
                    if let Some(msg) = s.strip_prefix('?') {
                        errors.push(msg.to_string());
                        String::new()
                    } else {
                        s.to_string()
                    }
                } else {
                    errors.push(format!("environment variable {} is required but not defined", &caps[1]));
                    String::new()
                }
            }
        }
    });

    if errors.is_empty() {
        Ok(replaced_text)
    } else {
        Err(Error::new(errors.join("\n")))
    }
}
