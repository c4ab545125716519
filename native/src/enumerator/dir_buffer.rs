// Bounds-checked reader for FILE_DIRECTORY_INFORMATION batches.

use crate::error::{PipeError, Result};

const NEXT_ENTRY_OFFSET: usize = 0;
const END_OF_FILE: usize = 40;
const ALLOCATION_SIZE: usize = 48;
const FILE_NAME_LENGTH: usize = 60;

/// Offset of the variable-length name from the start of an entry.
pub const FILE_NAME_OFFSET: usize = 64;

/// One raw entry of a pipe directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Maximum instances; `-1` when unlimited.
    pub max_instances: i32,
    /// Currently open instances.
    pub current_instances: u32,
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn malformed(offset: usize, reason: &'static str) -> PipeError {
    PipeError::MalformedBuffer { offset, reason }
}

/// Iterator over the entries chained inside one query batch.
///
/// `buf` must be limited to the number of bytes the OS actually wrote.
/// The first inconsistency is returned as an error and ends the iteration.
pub struct DirEntries<'a> {
    buf: &'a [u8],
    cursor: Option<usize>,
}

impl<'a> DirEntries<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            cursor: if buf.is_empty() { None } else { Some(0) },
            buf,
        }
    }

    fn parse_at(&self, offset: usize) -> Result<(Option<DirEntry>, Option<usize>)> {
        let header_end = offset
            .checked_add(FILE_NAME_OFFSET)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| malformed(offset, "entry header exceeds buffer"))?;
        let header = &self.buf[offset..header_end];

        let next = read_u32(header, NEXT_ENTRY_OFFSET).unwrap_or(0) as usize;
        let current_instances = read_u32(header, END_OF_FILE).unwrap_or(0);
        let max_instances = read_u32(header, ALLOCATION_SIZE).unwrap_or(0) as i32;
        let name_len = read_u32(header, FILE_NAME_LENGTH).unwrap_or(0) as usize;

        if name_len % 2 != 0 {
            return Err(malformed(offset, "odd file name length"));
        }
        let name_end = header_end
            .checked_add(name_len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| malformed(offset, "file name exceeds buffer"))?;

        let next_offset = match next {
            0 => None,
            n => {
                let target = offset
                    .checked_add(n)
                    .filter(|t| *t < self.buf.len())
                    .ok_or_else(|| malformed(offset, "next entry offset exceeds buffer"))?;
                Some(target)
            }
        };

        if name_len == 0 {
            return Ok((None, next_offset));
        }

        let units: Vec<u16> = self.buf[header_end..name_end]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let entry = DirEntry {
            name: String::from_utf16_lossy(&units),
            max_instances,
            current_instances,
        };
        Ok((Some(entry), next_offset))
    }
}

impl Iterator for DirEntries<'_> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let offset = self.cursor.take()?;
            match self.parse_at(offset) {
                Ok((entry, next)) => {
                    self.cursor = next;
                    match entry {
                        Some(entry) => return Some(Ok(entry)),
                        None => log::debug!("[ENUM] Skipping unnamed entry at offset {}", offset),
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
