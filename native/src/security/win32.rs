// Win32 side of the security translator.

use super::{normalize_aces, RawAce, ACCESS_ALLOWED_ACE_TYPE, ACCESS_DENIED_ACE_TYPE};
use crate::error::{PipeError, Result};
use crate::model::SecurityInfo;
use log::trace;
use std::ffi::c_void;
use windows::core::{HSTRING, PCWSTR, PWSTR};
use windows::Win32::Foundation::{LocalFree, ERROR_SUCCESS, HLOCAL};
use windows::Win32::Security::Authorization::{GetNamedSecurityInfoW, SE_FILE_OBJECT};
use windows::Win32::Security::{
    GetAce, LookupAccountSidW, ACCESS_ALLOWED_ACE, ACE_HEADER, ACL, DACL_SECURITY_INFORMATION,
    GROUP_SECURITY_INFORMATION, OWNER_SECURITY_INFORMATION, PSECURITY_DESCRIPTOR, PSID,
    SID_NAME_USE,
};

/// Descriptor allocated by the system, released with `LocalFree` on drop.
struct LocalDescriptor(PSECURITY_DESCRIPTOR);

impl Drop for LocalDescriptor {
    fn drop(&mut self) {
        if !self.0 .0.is_null() {
            unsafe {
                let _ = LocalFree(Some(HLOCAL(self.0 .0)));
            }
        }
    }
}

pub(super) fn query_security(host: &str, os_path: &str) -> Result<SecurityInfo> {
    let path = HSTRING::from(os_path);
    let mut owner = PSID::default();
    let mut group = PSID::default();
    let mut dacl: *mut ACL = std::ptr::null_mut();
    let mut descriptor = PSECURITY_DESCRIPTOR::default();

    let status = unsafe {
        GetNamedSecurityInfoW(
            &path,
            SE_FILE_OBJECT,
            OWNER_SECURITY_INFORMATION | GROUP_SECURITY_INFORMATION | DACL_SECURITY_INFORMATION,
            Some(&mut owner),
            Some(&mut group),
            Some(&mut dacl),
            None,
            &mut descriptor,
        )
    };
    // Owner, group and DACL point into the descriptor; keep it alive until
    // translation is done.
    let _guard = LocalDescriptor(descriptor);

    if status != ERROR_SUCCESS {
        return Err(PipeError::SecurityQuery {
            path: os_path.to_string(),
            code: status.0,
        });
    }

    let system = lookup_system(host);
    let owner = account_name(system.as_ref(), owner);
    let group = account_name(system.as_ref(), group);
    let rules = if dacl.is_null() {
        Vec::new()
    } else {
        normalize_aces(read_dacl(system.as_ref(), dacl))
    };

    Ok(SecurityInfo::new(owner, group, rules))
}

fn lookup_system(host: &str) -> Option<HSTRING> {
    if host == "." || host.is_empty() {
        None
    } else {
        Some(HSTRING::from(host))
    }
}

fn read_dacl(system: Option<&HSTRING>, dacl: *mut ACL) -> Vec<RawAce> {
    let count = unsafe { (*dacl).AceCount } as u32;
    let mut aces = Vec::with_capacity(count as usize);

    for index in 0..count {
        let mut ace: *mut c_void = std::ptr::null_mut();
        if unsafe { GetAce(dacl, index, &mut ace) }.is_err() || ace.is_null() {
            trace!("[SECURITY] GetAce failed at index {}", index);
            continue;
        }

        let ace_type = unsafe { (*(ace as *const ACE_HEADER)).AceType };
        if ace_type != ACCESS_ALLOWED_ACE_TYPE && ace_type != ACCESS_DENIED_ACE_TYPE {
            aces.push(RawAce {
                ace_type,
                principal: String::new(),
                mask: 0,
            });
            continue;
        }

        // Allowed and denied ACEs share the same layout.
        let body = ace as *const ACCESS_ALLOWED_ACE;
        let (mask, sid) = unsafe {
            (
                (*body).Mask,
                PSID(std::ptr::addr_of!((*body).SidStart) as *mut c_void),
            )
        };

        aces.push(RawAce {
            ace_type,
            principal: account_name(system, sid).unwrap_or_default(),
            mask,
        });
    }

    aces
}

/// Resolve a SID to `DOMAIN\name`, or `name` when the domain is empty.
fn account_name(system: Option<&HSTRING>, sid: PSID) -> Option<String> {
    if sid.0.is_null() {
        return None;
    }

    let system = system.map_or(PCWSTR::null(), |s| PCWSTR(s.as_ptr()));
    let mut name_len = 0u32;
    let mut domain_len = 0u32;
    let mut sid_use = SID_NAME_USE::default();

    // Sizing call; expected to fail with ERROR_INSUFFICIENT_BUFFER.
    let _ = unsafe {
        LookupAccountSidW(
            system,
            sid,
            None,
            &mut name_len,
            None,
            &mut domain_len,
            &mut sid_use,
        )
    };
    if name_len == 0 {
        return None;
    }

    let mut name = vec![0u16; name_len as usize];
    let mut domain = vec![0u16; domain_len.max(1) as usize];
    domain_len = domain.len() as u32;

    unsafe {
        LookupAccountSidW(
            system,
            sid,
            Some(PWSTR(name.as_mut_ptr())),
            &mut name_len,
            Some(PWSTR(domain.as_mut_ptr())),
            &mut domain_len,
            &mut sid_use,
        )
    }
    .ok()?;

    let name = String::from_utf16_lossy(&name[..name_len as usize]);
    let domain = String::from_utf16_lossy(&domain[..domain_len as usize]);
    if name.is_empty() {
        None
    } else if domain.is_empty() {
        Some(name)
    } else {
        Some(format!(r"{}\{}", domain, name))
    }
}
