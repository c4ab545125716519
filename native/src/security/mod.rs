// Security descriptor translation into comparable values.

#[cfg(windows)]
mod win32;

use crate::error::Result;
use crate::model::{AccessRule, PipeRights, SecurityInfo};

pub const ACCESS_ALLOWED_ACE_TYPE: u8 = 0;
pub const ACCESS_DENIED_ACE_TYPE: u8 = 1;

/// One ACE as read from a DACL, principal already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAce {
    pub ace_type: u8,
    /// Display name of the trustee; empty when the SID could not be resolved.
    pub principal: String,
    pub mask: u32,
}

/// Turn a DACL's entries into access rules, keeping their order.
///
/// Entries that are neither allow nor deny, and entries without a resolvable
/// principal, produce no rule.
pub fn normalize_aces<I>(aces: I) -> Vec<AccessRule>
where
    I: IntoIterator<Item = RawAce>,
{
    aces.into_iter()
        .filter_map(|ace| {
            let allows = match ace.ace_type {
                ACCESS_ALLOWED_ACE_TYPE => true,
                ACCESS_DENIED_ACE_TYPE => false,
                other => {
                    log::trace!("[SECURITY] Skipping ACE of type {}", other);
                    return None;
                }
            };
            if ace.principal.is_empty() {
                return None;
            }
            Some(AccessRule {
                principal: ace.principal,
                allows,
                rights: PipeRights::from_mask(ace.mask),
            })
        })
        .collect()
}

/// Read owner, group and DACL of the pipe at `os_path` (`\\host\pipe\name`).
///
/// `host` is used to resolve account names on remote machines.
#[cfg(windows)]
pub fn query_security(host: &str, os_path: &str) -> Result<SecurityInfo> {
    win32::query_security(host, os_path)
}

#[cfg(not(windows))]
pub fn query_security(_host: &str, os_path: &str) -> Result<SecurityInfo> {
    Err(crate::error::PipeError::SecurityQuery {
        path: os_path.to_string(),
        code: 50, // ERROR_NOT_SUPPORTED
    })
}

/// Like [`query_security`], but failures degrade to an empty descriptor.
pub fn security_or_default(host: &str, os_path: &str) -> SecurityInfo {
    match query_security(host, os_path) {
        Ok(info) => info,
        Err(e) => {
            log::debug!("[SECURITY] {}", e);
            SecurityInfo::default()
        }
    }
}
