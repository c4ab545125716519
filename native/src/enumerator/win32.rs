// NT directory queries over `\\host\pipe\`.

use super::{snapshot_from_entry, DirEntries, DirEntry, QUERY_BUFFER_LENGTH};
use crate::error::{PipeError, Result};
use crate::model::PipeSnapshot;
use log::{debug, trace};
use std::ffi::c_void;
use windows::core::HSTRING;
use windows::Wdk::Storage::FileSystem::{FileDirectoryInformation, NtQueryDirectoryFile};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_GENERIC_READ, FILE_SHARE_READ, OPEN_EXISTING,
};
use windows::Win32::System::IO::IO_STATUS_BLOCK;

/// Open namespace handle plus the query buffer; both released on drop.
pub(super) struct NamespaceReader {
    handle: HANDLE,
    host: String,
    include_security: bool,
    // u64 storage keeps the buffer aligned for the directory records.
    buffer: Vec<u64>,
    pending: std::vec::IntoIter<Result<DirEntry>>,
    restart_scan: bool,
    done: bool,
}

// The handle is owned exclusively by the reader.
unsafe impl Send for NamespaceReader {}

impl NamespaceReader {
    pub(super) fn open(host: &str, include_security: bool) -> Result<Self> {
        let root = HSTRING::from(format!(r"\\{}\pipe\", host));
        let handle = unsafe {
            CreateFileW(
                &root,
                FILE_GENERIC_READ.0,
                FILE_SHARE_READ,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES(0),
                None,
            )
        }
        .map_err(|e| PipeError::NamespaceUnavailable {
            host: host.to_string(),
            code: e.code().0,
            message: e.message().to_string(),
        })?;

        debug!("[ENUM] Opened pipe namespace of {}", host);

        Ok(Self {
            handle,
            host: host.to_string(),
            include_security,
            buffer: vec![0u64; QUERY_BUFFER_LENGTH / 8],
            pending: Vec::new().into_iter(),
            restart_scan: true,
            done: false,
        })
    }

    /// Fetch the next batch; returns false once the namespace is exhausted.
    fn query_batch(&mut self) -> bool {
        let mut status_block = IO_STATUS_BLOCK::default();
        let status = unsafe {
            NtQueryDirectoryFile(
                self.handle,
                None,
                None,
                None,
                &mut status_block,
                self.buffer.as_mut_ptr() as *mut c_void,
                QUERY_BUFFER_LENGTH as u32,
                FileDirectoryInformation,
                false,
                None,
                self.restart_scan,
            )
        };
        self.restart_scan = false;

        if status.is_err() {
            trace!("[ENUM] Directory query ended with status {:#x}", status.0);
            return false;
        }

        let received = status_block.Information.min(QUERY_BUFFER_LENGTH);
        if received == 0 {
            return false;
        }

        let bytes =
            unsafe { std::slice::from_raw_parts(self.buffer.as_ptr() as *const u8, received) };
        let batch: Vec<Result<DirEntry>> = DirEntries::new(bytes).collect();
        trace!("[ENUM] Batch of {} entries ({} bytes)", batch.len(), received);
        self.pending = batch.into_iter();
        true
    }
}

impl Iterator for NamespaceReader {
    type Item = Result<PipeSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            match self.pending.next() {
                Some(Ok(entry)) => {
                    return Some(Ok(snapshot_from_entry(
                        &self.host,
                        entry,
                        self.include_security,
                    )))
                }
                Some(Err(e)) => {
                    // A malformed batch cannot be resumed reliably.
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    if !self.query_batch() {
                        self.done = true;
                    }
                }
            }
        }
    }
}

impl Drop for NamespaceReader {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}
