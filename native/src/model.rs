use crate::hints::hint_for;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Access rights defined for pipe objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipeRights(u32);

impl PipeRights {
    pub const READ_DATA: u32 = 0x0000_0001;
    pub const WRITE_DATA: u32 = 0x0000_0002;
    pub const CREATE_NEW_INSTANCE: u32 = 0x0000_0004;
    pub const READ_EXTENDED_ATTRIBUTES: u32 = 0x0000_0008;
    pub const WRITE_EXTENDED_ATTRIBUTES: u32 = 0x0000_0010;
    pub const READ_ATTRIBUTES: u32 = 0x0000_0080;
    pub const WRITE_ATTRIBUTES: u32 = 0x0000_0100;
    pub const DELETE: u32 = 0x0001_0000;
    pub const READ_PERMISSIONS: u32 = 0x0002_0000;
    pub const CHANGE_PERMISSIONS: u32 = 0x0004_0000;
    pub const TAKE_OWNERSHIP: u32 = 0x0008_0000;
    pub const SYNCHRONIZE: u32 = 0x0010_0000;
    pub const ACCESS_SYSTEM_SECURITY: u32 = 0x0100_0000;

    /// Union of every bit with a defined meaning.
    pub const DEFINED: u32 = 0x011F_019F;

    const NAMES: [(u32, &'static str); 13] = [
        (Self::READ_DATA, "ReadData"),
        (Self::WRITE_DATA, "WriteData"),
        (Self::CREATE_NEW_INSTANCE, "CreateNewInstance"),
        (Self::READ_EXTENDED_ATTRIBUTES, "ReadExtendedAttributes"),
        (Self::WRITE_EXTENDED_ATTRIBUTES, "WriteExtendedAttributes"),
        (Self::READ_ATTRIBUTES, "ReadAttributes"),
        (Self::WRITE_ATTRIBUTES, "WriteAttributes"),
        (Self::DELETE, "Delete"),
        (Self::READ_PERMISSIONS, "ReadPermissions"),
        (Self::CHANGE_PERMISSIONS, "ChangePermissions"),
        (Self::TAKE_OWNERSHIP, "TakeOwnership"),
        (Self::SYNCHRONIZE, "Synchronize"),
        (Self::ACCESS_SYSTEM_SECURITY, "AccessSystemSecurity"),
    ];

    /// Build from a raw ACE mask, clearing undefined bits.
    pub fn from_mask(mask: u32) -> Self {
        Self(mask & Self::DEFINED)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `bits` is granted.
    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    /// Names of the set rights, lowest bit first.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for PipeRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("None");
        }
        f.write_str(&self.names().join(", "))
    }
}

/// One allow or deny entry lifted from a DACL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRule {
    pub principal: String,
    pub allows: bool,
    pub rights: PipeRights,
}

impl AccessRule {
    pub fn new(principal: impl Into<String>, allows: bool, rights: PipeRights) -> Self {
        Self {
            principal: principal.into(),
            allows,
            rights,
        }
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.allows { "Allow" } else { "Deny" };
        write!(f, "{} for {}: {}", verb, self.principal, self.rights)
    }
}

/// Owner, group and ordered access rules of a pipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SecurityInfo {
    pub owner: String,
    pub group: String,
    pub rules: Vec<AccessRule>,
}

impl SecurityInfo {
    /// Missing owner or group become empty strings.
    pub fn new(owner: Option<String>, group: Option<String>, rules: Vec<AccessRule>) -> Self {
        Self {
            owner: owner.unwrap_or_default(),
            group: group.unwrap_or_default(),
            rules,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_empty() && self.group.is_empty() && self.rules.is_empty()
    }
}

/// Point-in-time state of one pipe instance.
///
/// Snapshots are never mutated: a changed pipe shows up as a new value that
/// compares unequal to the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipeSnapshot {
    host: String,
    name: String,
    path: String,
    max_connections: i32,
    active_connections: u32,
    hint: String,
    security: SecurityInfo,
}

impl PipeSnapshot {
    /// `max_connections` value reported for pipes without an instance limit.
    pub const UNLIMITED: i32 = -1;

    pub fn new(
        host: impl Into<String>,
        name: impl Into<String>,
        max_connections: i32,
        active_connections: u32,
        security: SecurityInfo,
    ) -> Self {
        let host = host.into();
        let name = name.into();
        debug_assert!(!host.is_empty() && !name.is_empty());
        Self {
            path: pipe_path(&host, &name),
            hint: hint_for(&name).to_string(),
            host,
            name,
            max_connections,
            active_connections,
            security,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn max_connections(&self) -> i32 {
        self.max_connections
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_connections == Self::UNLIMITED
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    pub fn security(&self) -> &SecurityInfo {
        &self.security
    }

    /// Path usable with OS file APIs (`\\host\pipe\name`).
    pub fn os_path(&self) -> String {
        os_pipe_path(&self.host, &self.name)
    }
}

impl fmt::Display for PipeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Identity path of a pipe, `\\host\name`.
pub fn pipe_path(host: &str, name: &str) -> String {
    format!(r"\\{}\{}", host, name)
}

pub fn os_pipe_path(host: &str, name: &str) -> String {
    format!(r"\\{}\pipe\{}", host, name)
}
