//! Permission tiers and path allow-lists.
//!
//! A tier grants a default capability set; `unsafe` capabilities only take
//! effect once the user has approved the plugin. Filesystem access is
//! further restricted to an allow-list of path prefixes, which
//! user-approved unsafe plugins may bypass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::manifest::PluginPermissions;
use crate::PluginError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionTier {
    Safe,
    Restricted,
    Unsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ModifyBuffers,
    RegisterKeybindings,
    FileSystem,
    Network,
    SystemCalls,
    EditorFull,
}

impl Capability {
    /// Capabilities that additionally require explicit user approval.
    fn requires_approval(self) -> bool {
        matches!(
            self,
            Capability::Network | Capability::SystemCalls | Capability::EditorFull
        )
    }
}

#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub tier: PermissionTier,
    permissions: HashSet<Capability>,
    allowed_paths: Vec<PathBuf>,
    pub user_approved: bool,
}

impl SecurityPolicy {
    pub fn for_tier(tier: PermissionTier) -> Self {
        let mut permissions = HashSet::from([Capability::ModifyBuffers, Capability::RegisterKeybindings]);
        if matches!(tier, PermissionTier::Restricted | PermissionTier::Unsafe) {
            permissions.insert(Capability::FileSystem);
        }
        if tier == PermissionTier::Unsafe {
            permissions.insert(Capability::Network);
            permissions.insert(Capability::SystemCalls);
            permissions.insert(Capability::EditorFull);
        }
        Self {
            tier,
            permissions,
            allowed_paths: Vec::new(),
            user_approved: false,
        }
    }

    /// Map manifest permissions onto a tier: everything dangerous is
    /// unsafe, filesystem-only is restricted, anything else is safe.
    pub fn tier_for(permissions: &PluginPermissions) -> PermissionTier {
        if permissions.network_access
            || permissions.system_calls
            || permissions.editor_full_access
        {
            PermissionTier::Unsafe
        } else if permissions.file_system_access {
            PermissionTier::Restricted
        } else {
            PermissionTier::Safe
        }
    }

    pub fn from_permissions(permissions: &PluginPermissions) -> Self {
        let mut policy = Self::for_tier(Self::tier_for(permissions));
        for dir in &permissions.allowed_directories {
            policy.allow_path(PathBuf::from(dir));
        }
        policy
    }

    pub fn allow_path(&mut self, path: PathBuf) {
        self.allowed_paths.push(path);
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        if !self.permissions.contains(&capability) {
            return false;
        }
        !capability.requires_approval() || self.user_approved
    }

    /// True iff the tier permits filesystem access and `path` sits under an
    /// allowed prefix. A user-approved unsafe plugin skips the allow-list.
    pub fn can_access_path(&self, path: &Path) -> bool {
        if !self.permissions.contains(&Capability::FileSystem) {
            return false;
        }
        if self.tier == PermissionTier::Unsafe && self.user_approved {
            return true;
        }
        self.allowed_paths
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }
}

/// Reject path strings that try to escape their sandbox before they ever
/// reach a syscall.
pub fn validate_path_string(path: &str) -> Result<(), PluginError> {
    for needle in ["..", "~", "//"] {
        if path.contains(needle) {
            return Err(PluginError::SecurityViolation(format!(
                "path `{}` contains `{}`",
                path, needle
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn perms(fs: bool, net: bool, sys: bool) -> PluginPermissions {
        PluginPermissions {
            file_system_access: fs,
            network_access: net,
            system_calls: sys,
            ..PluginPermissions::default()
        }
    }

    #[test]
    fn test_tier_mapping() {
        assert_eq!(
            SecurityPolicy::tier_for(&perms(true, true, true)),
            PermissionTier::Unsafe
        );
        assert_eq!(
            SecurityPolicy::tier_for(&perms(false, true, false)),
            PermissionTier::Unsafe
        );
        assert_eq!(
            SecurityPolicy::tier_for(&perms(true, false, false)),
            PermissionTier::Restricted
        );
        assert_eq!(
            SecurityPolicy::tier_for(&perms(false, false, false)),
            PermissionTier::Safe
        );
    }

    #[test]
    fn test_safe_tier_grants_only_editor_basics() {
        let policy = SecurityPolicy::for_tier(PermissionTier::Safe);
        assert!(policy.has_capability(Capability::ModifyBuffers));
        assert!(policy.has_capability(Capability::RegisterKeybindings));
        assert!(!policy.has_capability(Capability::FileSystem));
        assert!(!policy.has_capability(Capability::Network));
    }

    #[test]
    fn test_unsafe_capabilities_need_approval() {
        let mut policy = SecurityPolicy::for_tier(PermissionTier::Unsafe);
        assert!(!policy.has_capability(Capability::Network));
        assert!(!policy.has_capability(Capability::SystemCalls));
        // filesystem is a restricted-tier grant, not approval-gated
        assert!(policy.has_capability(Capability::FileSystem));

        policy.user_approved = true;
        assert!(policy.has_capability(Capability::Network));
        assert!(policy.has_capability(Capability::EditorFull));
    }

    #[test]
    fn test_can_access_path() {
        let mut policy = SecurityPolicy::for_tier(PermissionTier::Restricted);
        policy.allow_path(PathBuf::from("/tmp/grim"));

        assert!(policy.can_access_path(Path::new("/tmp/grim/notes.txt")));
        assert!(policy.can_access_path(Path::new("/tmp/grim")));
        assert!(!policy.can_access_path(Path::new("/etc/passwd")));
        // prefix match is path-component based
        assert!(!policy.can_access_path(Path::new("/tmp/grimoire/x")));

        let safe = SecurityPolicy::for_tier(PermissionTier::Safe);
        assert!(!safe.can_access_path(Path::new("/tmp/grim/notes.txt")));
    }

    #[test]
    fn test_unsafe_approved_bypasses_allow_list() {
        let mut policy = SecurityPolicy::for_tier(PermissionTier::Unsafe);
        assert!(!policy.can_access_path(Path::new("/etc/passwd")));
        policy.user_approved = true;
        assert!(policy.can_access_path(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_path_string_validation() {
        assert!(validate_path_string("plugins/data").is_ok());
        for bad in ["../escape", "~/home", "a//b"] {
            assert!(matches!(
                validate_path_string(bad),
                Err(PluginError::SecurityViolation(_))
            ));
        }
    }
}
