//! Shared test fixtures: an in-memory transport and engine setup helpers.

// Each integration test binary compiles this module separately and uses a
// different subset of the helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flightdeck::host::{AuthMode, Host};
use flightdeck::prelude::*;
use flightdeck::transport::{
    ExecOutput, FileMeta, SudoRequest, Transport, TransportError, TransportFactory,
};

/// Scripted in-memory transport. Commands match against configured rules in
/// order; unmatched commands succeed with empty output.
#[derive(Default)]
pub struct FakeTransport {
    rules: Mutex<Vec<(String, ExecOutput)>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    pub executed: Mutex<Vec<(String, bool)>>,
    /// Artificial latency per exec, to widen concurrency windows.
    pub exec_delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            exec_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Commands containing `needle` produce `output`.
    pub fn stub(&self, needle: &str, output: ExecOutput) {
        self.rules.lock().push((needle.to_string(), output));
    }

    pub fn stub_status(&self, needle: &str, status: i32) {
        self.stub(
            needle,
            ExecOutput {
                status,
                stdout: Vec::new(),
                stderr: Vec::new(),
            },
        );
    }

    pub fn seed_file(&self, path: &str, content: &[u8]) {
        self.files.lock().insert(path.to_string(), content.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.executed.lock().iter().map(|(c, _)| c.clone()).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn exec(
        &self,
        command: &str,
        sudo: &SudoRequest,
    ) -> std::result::Result<ExecOutput, TransportError> {
        if let Some(delay) = self.exec_delay {
            tokio::time::sleep(delay).await;
        }
        let with_password = matches!(sudo, SudoRequest::WithPassword(_));
        self.executed
            .lock()
            .push((command.to_string(), with_password));
        let rules = self.rules.lock();
        for (needle, output) in rules.iter() {
            if command.contains(needle.as_str()) {
                return Ok(output.clone());
            }
        }
        Ok(ExecOutput::default())
    }

    async fn upload(&self, content: &[u8], path: &str) -> std::result::Result<FileMeta, TransportError> {
        self.files.lock().insert(path.to_string(), content.to_vec());
        Ok(FileMeta {
            path: path.to_string(),
            size: content.len() as u64,
        })
    }

    async fn download(&self, path: &str) -> std::result::Result<Vec<u8>, TransportError> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(path.to_string()))
    }

    async fn delete_file(&self, path: &str) -> std::result::Result<(), TransportError> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| TransportError::NotFound(path.to_string()))
    }

    async fn path_exists(&self, path: &str) -> std::result::Result<bool, TransportError> {
        Ok(self.files.lock().contains_key(path))
    }

    async fn close(&self) -> std::result::Result<(), TransportError> {
        Ok(())
    }
}

/// Factory handing out one shared [`FakeTransport`].
pub struct FakeTransportFactory {
    pub transport: Arc<FakeTransport>,
    pub fail_connect: Mutex<bool>,
}

impl FakeTransportFactory {
    pub fn new(transport: Arc<FakeTransport>) -> Self {
        Self {
            transport,
            fail_connect: Mutex::new(false),
        }
    }

    pub fn set_fail_connect(&self, fail: bool) {
        *self.fail_connect.lock() = fail;
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn connect(
        &self,
        _host: &Host,
        _timeout: Duration,
    ) -> std::result::Result<Arc<dyn Transport>, TransportError> {
        if *self.fail_connect.lock() {
            return Err(TransportError::ConnectionFailed(
                "connection refused".to_string(),
            ));
        }
        Ok(self.transport.clone())
    }
}

/// Install a test subscriber once so `RUST_LOG` controls test output.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn reference(s: &str) -> Reference {
    Reference::new(s).unwrap()
}

pub fn test_host(r: &str) -> Host {
    let mut host = Host::new(reference(r), format!("Host {r}"));
    host.ipv4_address = Some("10.0.0.1".into());
    host.ssh_username = "doge".into();
    host.ssh_password = Some("wow".into());
    host.auth_mode = AuthMode::Password;
    host
}

/// Engine wired to a shared fake transport, with one registered host.
pub fn test_engine() -> (Engine, Arc<FakeTransport>) {
    engine_with_transport(Arc::new(FakeTransport::new()))
}

pub fn engine_with_transport(transport: Arc<FakeTransport>) -> (Engine, Arc<FakeTransport>) {
    init_tracing();
    let factory = Arc::new(FakeTransportFactory::new(transport.clone()));
    let engine = Engine::builder().transport_factory(factory).build();
    engine.inventory.upsert(test_host("h1"));
    (engine, transport)
}

pub fn shell_command(r: &str, code: &str) -> Command {
    Command::new(reference(r), format!("Command {r}"), CommandAction::Shell).with_code(code)
}
