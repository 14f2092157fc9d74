//! Transport abstraction over remote hosts.
//!
//! A transport is an established session against one host that can execute
//! commands and move files. The engine only talks to the trait; the SSH
//! implementation lives in [`ssh`].

pub mod ssh;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::host::Host;

/// Errors produced by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("file transfer failed: {0}")]
    TransferFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one remote execution.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ExecOutput {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Metadata of a remote file after a transfer.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: String,
    pub size: u64,
}

/// Sudo request carried alongside a command.
#[derive(Debug, Clone)]
pub enum SudoRequest {
    /// Run as the connecting user.
    None,
    /// Command text already composed with sudo, no password needed.
    Without,
    /// Command text already composed with sudo, feed this password on stdin.
    WithPassword(String),
}

/// An established session against one host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a command and collect its output.
    async fn exec(&self, command: &str, sudo: &SudoRequest)
        -> Result<ExecOutput, TransportError>;

    /// Write `content` to `path`, creating or replacing the file.
    async fn upload(&self, content: &[u8], path: &str) -> Result<FileMeta, TransportError>;

    /// Read the contents of `path`. Missing files map to
    /// [`TransportError::NotFound`].
    async fn download(&self, path: &str) -> Result<Vec<u8>, TransportError>;

    /// Remove `path`.
    async fn delete_file(&self, path: &str) -> Result<(), TransportError>;

    /// Whether `path` exists.
    async fn path_exists(&self, path: &str) -> Result<bool, TransportError>;

    /// Close the session. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Factory opening transports for hosts.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a session against a host, failing after `timeout`.
    async fn connect(
        &self,
        host: &Host,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}
