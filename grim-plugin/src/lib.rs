//! Plugin runtime: discovery, manifests, permission tiers, dependency
//! resolution, the sandboxed script host, and the manager that binds
//! plugin-registered commands, keymaps and event handlers to the editor.

pub mod graph;
pub mod host;
pub mod manager;
pub mod manifest;
pub mod native;
pub mod paths;
pub mod security;
pub mod watch;

pub use graph::DependencyGraph;
pub use host::{
    ActionCallbacks, CommandAction, CompiledPlugin, CompiledScript, EventAction, ExecutionStats,
    KeymapAction, NullVm, PluginHost, SandboxConfig, SandboxViolation, ScriptVm, ThemeAction,
};
pub use manager::{DiscoveredPlugin, PluginKind, PluginManager};
pub use manifest::{PluginManifest, PluginPermissions};
pub use security::{Capability, PermissionTier, SecurityPolicy};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin `{0}` not found")]
    PluginNotFound(String),
    #[error("plugin `{0}` is already loaded")]
    PluginAlreadyLoaded(String),
    #[error("command `{0}` not found")]
    CommandNotFound(String),
    #[error("invalid plugin format: {0}")]
    InvalidPluginFormat(String),
    #[error("plugin `{0}` failed to load: {1}")]
    PluginLoadFailed(String, String),
    #[error("security violation: {0}")]
    SecurityViolation(String),
    #[error("circular dependency: {0}")]
    CircularDependency(String),
    #[error("plugin `{1}` requires missing dependency `{0}`")]
    MissingDependency(String, String),
}
