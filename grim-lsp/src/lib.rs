//! LSP client stack: Content-Length framed transports, a JSON-RPC client
//! with per-request correlation, and the per-language server manager.

pub mod client;
pub mod jsonrpc;
pub mod registry;
pub mod transport;

pub use client::{Client, LspResponse, PublishDiagnostics, RequestKind};
pub use registry::{ServerManager, ServerProcess};
pub use transport::TransportError;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid message")]
    InvalidMessage,
    #[error("initialization timed out")]
    InitializationFailed,
    #[error("language server `{0}` is already running")]
    ServerAlreadyRunning(String),
    #[error("failed to spawn `{0}`: {1}")]
    ProcessSpawnFailed(String, String),
    #[error("failed to parse: {0}")]
    Parse(#[from] serde_json::Error),
}
