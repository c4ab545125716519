// Pipe namespace enumeration.

pub mod dir_buffer;
#[cfg(windows)]
mod win32;

pub use dir_buffer::{DirEntries, DirEntry};

use crate::error::Result;
use crate::model::{os_pipe_path, PipeSnapshot, SecurityInfo};
use crate::security::security_or_default;
use std::collections::HashMap;

/// Size of the buffer handed to each directory query.
pub const QUERY_BUFFER_LENGTH: usize = 0x0010_0000; // 1MB

/// Lazy sequence of pipes as reported by the OS, duplicates included.
pub type PipeIter<'a> = Box<dyn Iterator<Item = Result<PipeSnapshot>> + Send + 'a>;

/// Source of pipe listings for a host.
///
/// Every call performs a fresh query.
pub trait PipeSource: Send + Sync {
    fn pipes(&self, host: &str, include_security: bool) -> Result<PipeIter<'_>>;
}

/// Reads the live namespace of the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSource;

impl PipeSource for NativeSource {
    fn pipes(&self, host: &str, include_security: bool) -> Result<PipeIter<'_>> {
        enumerate(host, include_security)
    }
}

/// Enumerate the pipes of `host` (`.` for the local machine).
#[cfg(windows)]
pub fn enumerate(host: &str, include_security: bool) -> Result<PipeIter<'static>> {
    let reader = win32::NamespaceReader::open(host, include_security)?;
    Ok(Box::new(reader))
}

#[cfg(not(windows))]
pub fn enumerate(host: &str, _include_security: bool) -> Result<PipeIter<'static>> {
    Err(crate::error::PipeError::unsupported(host))
}

/// Build the snapshot of a parsed directory entry.
pub fn snapshot_from_entry(host: &str, entry: DirEntry, include_security: bool) -> PipeSnapshot {
    let security = if include_security {
        security_or_default(host, &os_pipe_path(host, &entry.name))
    } else {
        SecurityInfo::default()
    };
    PipeSnapshot::new(
        host,
        entry.name,
        entry.max_instances,
        entry.current_instances,
        security,
    )
}

/// Drain a listing into one snapshot per name.
///
/// Names keep the position of their first occurrence and the value of their
/// last one.
pub fn collect_unique<I>(pipes: I) -> Result<Vec<PipeSnapshot>>
where
    I: IntoIterator<Item = Result<PipeSnapshot>>,
{
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<PipeSnapshot> = Vec::new();
    for pipe in pipes {
        let pipe = pipe?;
        match positions.get(pipe.name()) {
            Some(&index) => unique[index] = pipe,
            None => {
                positions.insert(pipe.name().to_string(), unique.len());
                unique.push(pipe);
            }
        }
    }
    Ok(unique)
}
