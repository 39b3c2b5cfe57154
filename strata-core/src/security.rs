use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Group that every method is granted to during bootstrap.
pub const ADMIN_GROUP: &str = "admin";
/// Uid of the built-in superuser principal.
pub const SUPERUSER_ID: i64 = 1;

/// Permission bits checked on fields and methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Permission(u8);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const READ: Permission = Permission(1);
    pub const WRITE: Permission = Permission(1 << 1);
    pub const EXECUTE: Permission = Permission(1 << 2);
    pub const ALL: Permission = Permission(0b111);

    pub fn contains(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Permission::READ) {
            names.push("read");
        }
        if self.contains(Permission::WRITE) {
            names.push("write");
        }
        if self.contains(Permission::EXECUTE) {
            names.push("execute");
        }
        if names.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", names.join("|"))
    }
}

/// Per-group permission bits of a field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessControlList {
    groups: BTreeMap<String, Permission>,
}

impl AccessControlList {
    /// ACL granting read and write to the administrative group.
    pub fn with_admin() -> Self {
        let mut acl = Self::default();
        acl.grant(ADMIN_GROUP, Permission::READ | Permission::WRITE);
        acl
    }

    pub fn grant(&mut self, group: &str, permission: Permission) {
        let entry = self.groups.entry(group.to_owned()).or_default();
        *entry = *entry | permission;
    }

    /// Merge another ACL's grants into this one.
    pub fn absorb(&mut self, other: &AccessControlList) {
        for (group, permission) in &other.groups {
            self.grant(group, *permission);
        }
    }

    pub fn permission_of(&self, group: &str) -> Permission {
        self.groups.get(group).copied().unwrap_or_default()
    }

    pub fn allows(&self, principal: &Principal, permission: Permission) -> bool {
        principal
            .groups()
            .any(|group| self.permission_of(group).contains(permission))
    }
}

/// The acting user of an environment and its group memberships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    uid: i64,
    groups: BTreeSet<String>,
}

impl Principal {
    pub fn new<I, S>(uid: i64, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            uid,
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn superuser() -> Self {
        Self::new(SUPERUSER_ID, [ADMIN_GROUP])
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(String::as_str)
    }

    pub fn is_member(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// True when the principal belongs to one of the method's execute groups.
    pub fn can_execute(&self, method_groups: &BTreeSet<String>) -> bool {
        method_groups.iter().any(|group| self.groups.contains(group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_acl_allows_superuser_only() {
        let acl = AccessControlList::with_admin();
        assert!(acl.allows(&Principal::superuser(), Permission::READ));
        assert!(acl.allows(&Principal::superuser(), Permission::WRITE));
        let guest = Principal::new(7, ["guest"]);
        assert!(!acl.allows(&guest, Permission::READ));
    }

    #[test]
    fn grants_accumulate_bits() {
        let mut acl = AccessControlList::default();
        acl.grant("sales", Permission::READ);
        acl.grant("sales", Permission::WRITE);
        assert_eq!(
            acl.permission_of("sales"),
            Permission::READ | Permission::WRITE
        );
        assert_eq!(acl.permission_of("sales").to_string(), "read|write");
    }
}
