//! Privilege checker contract for `RESET PERSIST`

use parking_lot::RwLock;
use std::collections::HashSet;

/// The account issuing a statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Session {
    pub user: String,
    pub host: String,
}

impl Session {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Session {
            user: user.into(),
            host: host.into(),
        }
    }
}

/// Removal privileges are separate for static and dynamic records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistAction {
    RemoveStatic,
    RemoveDynamic,
}

/// External privilege checker
pub trait PrivilegeChecker: Send + Sync {
    /// `scope` is the variable name, or `"*"` for reset-all
    fn authorize(&self, session: &Session, action: PersistAction, scope: &str) -> bool;
}

/// Grants everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PrivilegeChecker for AllowAll {
    fn authorize(&self, _session: &Session, _action: PersistAction, _scope: &str) -> bool {
        true
    }
}

/// Explicit per-user grants, independent of scope
#[derive(Debug, Default)]
pub struct StaticPrivileges {
    grants: RwLock<HashSet<(String, PersistAction)>>,
}

impl StaticPrivileges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user: &str, action: PersistAction) {
        self.grants.write().insert((user.to_string(), action));
    }

    pub fn revoke(&self, user: &str, action: PersistAction) {
        self.grants.write().remove(&(user.to_string(), action));
    }
}

impl PrivilegeChecker for StaticPrivileges {
    fn authorize(&self, session: &Session, action: PersistAction, _scope: &str) -> bool {
        self.grants
            .read()
            .contains(&(session.user.clone(), action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_privileges() {
        let privileges = StaticPrivileges::new();
        let admin = Session::new("admin", "localhost");
        assert!(!privileges.authorize(&admin, PersistAction::RemoveDynamic, "x"));

        privileges.grant("admin", PersistAction::RemoveDynamic);
        assert!(privileges.authorize(&admin, PersistAction::RemoveDynamic, "x"));
        assert!(!privileges.authorize(&admin, PersistAction::RemoveStatic, "x"));

        privileges.revoke("admin", PersistAction::RemoveDynamic);
        assert!(!privileges.authorize(&admin, PersistAction::RemoveDynamic, "x"));
    }
}
