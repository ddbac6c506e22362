use std::env;
use std::ffi::CStr;
use std::io;
use std::path::{Path, PathBuf};

use crate::rsmanager::common::Result;

/// Expand a leading `~/` to $HOME. Other paths are returned unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        // HOME is required to be set on POSIX systems, if it's not we leave the path alone
        if let Ok(home) = env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    path.to_path_buf()
}

/// Returns the name of this host as reported by gethostname(2).
pub fn local_hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return Err(io::Error::last_os_error().into());
    }
    // gethostname may not nul terminate on truncation
    buf[buf.len() - 1] = 0;
    let name = unsafe { CStr::from_ptr(buf.as_ptr() as *const libc::c_char) };
    Ok(name.to_string_lossy().into_owned())
}

/// Split "host:port" into its parts.
pub fn split_address(address: &str) -> Result<(&str, u16)> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse() {
            Ok(port) => Ok((host, port)),
            Err(e) => Err(format!("address {} has an invalid port: {}", address, e).into()),
        },
        _ => Err(format!("address {} is not of the form host:port", address).into()),
    }
}
