//! SSH transport built on russh.
//!
//! One [`SshTransport`] wraps one authenticated session against a host.
//! Commands run over fresh channels so a single session can serve a whole
//! flight plan; file operations go through an SFTP subsystem channel opened
//! per operation.

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::ChannelMsg;
use russh_keys::key::PublicKey;
use russh_sftp::client::SftpSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::{ExecOutput, FileMeta, SudoRequest, Transport, TransportError, TransportFactory};
use crate::host::{AuthMode, Host};

/// Accepts any server key. Host key pinning is left to the surrounding
/// deployment; the engine targets hosts it provisioned itself.
struct ClientHandler;

#[async_trait]
impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH session against one host.
pub struct SshTransport {
    handle: RwLock<Option<Handle<ClientHandler>>>,
    host_name: String,
}

impl SshTransport {
    /// Open a session and authenticate according to the host record.
    pub async fn connect(host: &Host, timeout: Duration) -> Result<Self, TransportError> {
        let address = host
            .address()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        let addr = format!("{}:{}", address, host.ssh_port);

        let mut config = russh::client::Config::default();
        config.inactivity_timeout = Some(timeout);
        let config = Arc::new(config);

        let socket = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("failed to connect to {addr}: {e}"))
            })?;
        socket
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectionFailed(format!("TCP_NODELAY failed: {e}")))?;

        let mut session = russh::client::connect_stream(config, socket, ClientHandler)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("SSH handshake failed: {e}")))?;

        Self::authenticate(&mut session, host).await?;
        debug!(host = %host.reference, addr = %addr, "SSH session established");

        Ok(Self {
            handle: RwLock::new(Some(session)),
            host_name: host.name.clone(),
        })
    }

    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        host: &Host,
    ) -> Result<(), TransportError> {
        match host.auth_mode {
            AuthMode::Password => {
                let password = host.ssh_password.as_ref().ok_or_else(|| {
                    TransportError::AuthenticationFailed("no SSH password set".into())
                })?;
                let ok = session
                    .authenticate_password(host.ssh_username.as_str(), password.expose())
                    .await
                    .map_err(|e| {
                        TransportError::AuthenticationFailed(format!(
                            "password authentication failed: {e}"
                        ))
                    })?;
                if !ok {
                    return Err(TransportError::AuthenticationFailed(
                        "password rejected by server".into(),
                    ));
                }
            }
            AuthMode::Key => {
                let key = host.ssh_key.as_ref().ok_or_else(|| {
                    TransportError::AuthenticationFailed("no SSH key set".into())
                })?;
                // The stored password doubles as the key passphrase.
                let passphrase = host.ssh_password.as_ref().map(|p| p.expose().to_string());
                let key_pair = russh_keys::decode_secret_key(key.expose(), passphrase.as_deref())
                    .map_err(|e| {
                        TransportError::AuthenticationFailed(format!("invalid SSH key: {e}"))
                    })?;
                let ok = session
                    .authenticate_publickey(host.ssh_username.as_str(), Arc::new(key_pair))
                    .await
                    .map_err(|e| {
                        TransportError::AuthenticationFailed(format!(
                            "key authentication failed: {e}"
                        ))
                    })?;
                if !ok {
                    return Err(TransportError::AuthenticationFailed(
                        "key rejected by server".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn open_sftp(&self) -> Result<SftpSession, TransportError> {
        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::TransferFailed(format!("failed to open channel: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| TransportError::TransferFailed(format!("SFTP subsystem failed: {e}")))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransportError::TransferFailed(format!("SFTP session failed: {e}")))
    }

    fn split_lines(bytes: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(bytes);
        text.lines().map(|l| l.to_string()).collect()
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn exec(
        &self,
        command: &str,
        sudo: &SudoRequest,
    ) -> Result<ExecOutput, TransportError> {
        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::ExecutionFailed(format!("failed to open channel: {e}")))?;
        drop(handle_guard);

        channel
            .exec(true, command)
            .await
            .map_err(|e| TransportError::ExecutionFailed(format!("exec failed: {e}")))?;

        if let SudoRequest::WithPassword(password) = sudo {
            let data = format!("{password}\n");
            let mut cursor = tokio::io::BufReader::new(data.as_bytes());
            channel.data(&mut cursor).await.map_err(|e| {
                TransportError::ExecutionFailed(format!("failed to write sudo password: {e}"))
            })?;
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } => {
                    if ext == 1 {
                        stderr.extend_from_slice(data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                ChannelMsg::Eof => {}
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        let _ = channel.eof().await;

        let status = exit_code.unwrap_or(i32::MAX);
        trace!(host = %self.host_name, status, "command completed");
        Ok(ExecOutput {
            status,
            stdout: Self::split_lines(&stdout),
            stderr: Self::split_lines(&stderr),
        })
    }

    async fn upload(&self, content: &[u8], path: &str) -> Result<FileMeta, TransportError> {
        let sftp = self.open_sftp().await?;
        let mut remote_file = sftp.create(path).await.map_err(|e| {
            TransportError::TransferFailed(format!("failed to create {path}: {e}"))
        })?;
        remote_file.write_all(content).await.map_err(|e| {
            TransportError::TransferFailed(format!("failed to write {path}: {e}"))
        })?;
        remote_file.shutdown().await.map_err(|e| {
            TransportError::TransferFailed(format!("failed to flush {path}: {e}"))
        })?;
        Ok(FileMeta {
            path: path.to_string(),
            size: content.len() as u64,
        })
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let sftp = self.open_sftp().await?;
        match sftp.try_exists(path).await {
            Ok(true) => {}
            _ => return Err(TransportError::NotFound(path.to_string())),
        }
        let mut remote_file = sftp
            .open(path)
            .await
            .map_err(|e| TransportError::TransferFailed(format!("failed to open {path}: {e}")))?;
        let mut content = Vec::new();
        remote_file.read_to_end(&mut content).await.map_err(|e| {
            TransportError::TransferFailed(format!("failed to read {path}: {e}"))
        })?;
        Ok(content)
    }

    async fn delete_file(&self, path: &str) -> Result<(), TransportError> {
        let sftp = self.open_sftp().await?;
        sftp.remove_file(path).await.map_err(|e| {
            TransportError::TransferFailed(format!("failed to remove {path}: {e}"))
        })
    }

    async fn path_exists(&self, path: &str) -> Result<bool, TransportError> {
        let sftp = self.open_sftp().await?;
        match sftp.try_exists(path).await {
            Ok(exists) => Ok(exists),
            Err(e) => {
                debug!(path, error = %e, "existence check failed");
                Ok(false)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let handle = self.handle.write().await.take();
        if let Some(handle) = handle {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "closed by engine", "en")
                .await;
            debug!(host = %self.host_name, "SSH session closed");
        }
        Ok(())
    }
}

/// Opens [`SshTransport`] sessions.
#[derive(Default)]
pub struct SshTransportFactory;

impl SshTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for SshTransportFactory {
    async fn connect(
        &self,
        host: &Host,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = SshTransport::connect(host, timeout).await?;
        Ok(Arc::new(transport))
    }
}
