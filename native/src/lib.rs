//! Named-pipe enumeration and change detection.
//!
//! [`enumerate_pipes`] lists the pipes of a host once. [`PipeWatcher`] polls a
//! host on a timer and reports pipes that appeared, changed or disappeared.

pub mod config;
pub mod enumerator;
pub mod error;
pub mod hints;
pub mod logging;
pub mod model;
pub mod security;
pub mod watcher;

pub use config::{WatchConfig, DEFAULT_REFRESH_INTERVAL, LOCAL_HOST};
pub use enumerator::{NativeSource, PipeIter, PipeSource};
pub use error::{PipeError, Result};
pub use hints::hint_for;
pub use model::{AccessRule, PipeRights, PipeSnapshot, SecurityInfo};
pub use watcher::{PipeWatcher, WatchBatch, WatchEvent};

use log::debug;

/// List the pipes of `host` once, one snapshot per name.
///
/// Fails as a whole when the namespace cannot be opened or read; security
/// lookups that fail only blank the affected pipe's security.
pub fn enumerate_pipes(host: &str, include_security: bool) -> Result<Vec<PipeSnapshot>> {
    let host = config::normalize_host(host);
    let pipes = enumerator::collect_unique(enumerator::enumerate(&host, include_security)?)?;
    debug!("[ENUM] {} pipes on {}", pipes.len(), host);
    Ok(pipes)
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(get_version(), env!("CARGO_PKG_VERSION"));
    }

    #[cfg(not(windows))]
    #[test]
    fn enumeration_is_unavailable_off_windows() {
        match enumerate_pipes("", false) {
            Err(PipeError::NamespaceUnavailable { host, .. }) => assert_eq!(host, "."),
            other => panic!("unexpected result: {:?}", other.map(|p| p.len())),
        }
    }

    #[cfg(windows)]
    #[test]
    fn local_enumeration_is_deduplicated() {
        let pipes = enumerate_pipes(".", false).unwrap();
        let mut names: Vec<&str> = pipes.iter().map(|p| p.name()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
