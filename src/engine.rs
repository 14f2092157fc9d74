//! Engine façade tying the registries, renderer and transports together.
//!
//! Construction goes through [`EngineBuilder`]; command execution lives in
//! the runner module and plan interpretation in the interpreter module,
//! both as `impl Engine` blocks.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::command::{CommandRegistry, FileTemplateRegistry};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::host::{HostStatus, Inventory};
use crate::interpreter::PlanOptions;
use crate::log::LogBook;
use crate::plan::PlanRegistry;
use crate::reference::Reference;
use crate::render::Renderer;
use crate::secrets::{InMemorySecretStore, SecretStore};
use crate::status::{self, join_lines, CommandOutcome};
use crate::transport::ssh::SshTransportFactory;
use crate::transport::TransportFactory;
use crate::vars::VariableStore;

/// The automation engine.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub inventory: Inventory,
    pub commands: CommandRegistry,
    pub plans: PlanRegistry,
    pub file_templates: FileTemplateRegistry,
    pub variables: VariableStore,
    pub(crate) secrets: Arc<dyn SecretStore>,
    pub logs: LogBook,
    pub(crate) renderer: Renderer,
    pub(crate) transports: Arc<dyn TransportFactory>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    secrets: Option<Arc<dyn SecretStore>>,
    transports: Option<Arc<dyn TransportFactory>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            secrets: None,
            transports: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(store);
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(factory);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            config: self.config,
            inventory: Inventory::new(),
            commands: CommandRegistry::new(),
            plans: PlanRegistry::new(),
            file_templates: FileTemplateRegistry::new(),
            variables: VariableStore::new(),
            secrets: self
                .secrets
                .unwrap_or_else(|| Arc::new(InMemorySecretStore::new())),
            logs: LogBook::new(),
            renderer: Renderer::new(),
            transports: self
                .transports
                .unwrap_or_else(|| Arc::new(SshTransportFactory::new())),
        }
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Options for connectivity tests.
#[derive(Debug, Clone)]
pub struct TestConnectionOptions {
    /// Connect timeout override.
    pub timeout: Option<Duration>,
    /// Run the probe shell command after connecting.
    pub try_command: bool,
    /// Exercise upload, download and delete with a probe file.
    pub try_file_ops: bool,
    /// Surface failures as errors instead of structured outcomes.
    pub raise_on_error: bool,
}

impl Default for TestConnectionOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            try_command: false,
            try_file_ops: false,
            raise_on_error: false,
        }
    }
}

impl Engine {
    /// Probe connectivity to a host.
    ///
    /// With `raise_on_error` unset, transport failures come back as a
    /// structured outcome carrying the connection error sentinel; otherwise
    /// they surface as errors for interactive callers.
    pub async fn test_connection(
        &self,
        host_ref: &Reference,
        options: TestConnectionOptions,
    ) -> Result<CommandOutcome> {
        let host = self.inventory.get(host_ref)?;
        host.validate()?;
        let timeout = options.timeout.unwrap_or_else(|| self.config.connect_timeout());

        let transport = match self.transports.connect(&host, timeout).await {
            Ok(t) => t,
            Err(e) => {
                warn!(host = %host_ref, error = %e, "connection test failed");
                if options.raise_on_error {
                    return Err(Error::connection(&host.name, e.to_string()));
                }
                return Ok(CommandOutcome::failed(
                    status::SSH_CONNECTION_ERROR,
                    e.to_string(),
                ));
            }
        };

        let mut outcome = CommandOutcome::ok(Some("Connection successful".to_string()));

        if options.try_command {
            match transport
                .exec(&self.config.probe_command, &crate::transport::SudoRequest::None)
                .await
            {
                Ok(output) if output.is_success() => {
                    outcome = CommandOutcome::ok(join_lines(&output.stdout));
                }
                Ok(output) => {
                    outcome = CommandOutcome {
                        status: output.status,
                        response: join_lines(&output.stdout),
                        error: join_lines(&output.stderr),
                    };
                }
                Err(e) => {
                    outcome = CommandOutcome::failed(status::SSH_CONNECTION_ERROR, e.to_string());
                }
            }
        }

        if outcome.is_success() && options.try_file_ops {
            outcome = self.probe_file_ops(transport.as_ref()).await;
        }

        let _ = transport.close().await;

        if !outcome.is_success() && options.raise_on_error {
            return Err(Error::ConnectionTest {
                status: outcome.status,
                response: outcome.response.unwrap_or_default(),
                message: outcome.error.unwrap_or_default(),
            });
        }
        debug!(host = %host_ref, status = outcome.status, "connection test finished");
        Ok(outcome)
    }

    async fn probe_file_ops(&self, transport: &dyn crate::transport::Transport) -> CommandOutcome {
        let path = &self.config.probe_file_path;
        let payload = b"connection test";
        if let Err(e) = transport.upload(payload, path).await {
            return CommandOutcome::failed(status::SSH_CONNECTION_ERROR, e.to_string());
        }
        match transport.download(path).await {
            Ok(content) if content == payload => {}
            Ok(_) => {
                let _ = transport.delete_file(path).await;
                return CommandOutcome::failed(
                    status::SSH_CONNECTION_ERROR,
                    "probe file content mismatch after round trip",
                );
            }
            Err(e) => {
                let _ = transport.delete_file(path).await;
                return CommandOutcome::failed(status::SSH_CONNECTION_ERROR, e.to_string());
            }
        }
        if let Err(e) = transport.delete_file(path).await {
            return CommandOutcome::failed(status::SSH_CONNECTION_ERROR, e.to_string());
        }
        CommandOutcome::ok(Some("File management test passed".to_string()))
    }

    /// Remove a host from the inventory.
    ///
    /// When the host declares an on-delete plan and `force` is unset, the
    /// host enters the `deleting` status and the plan runs first; the host
    /// is removed only if the plan finishes with status zero, otherwise it
    /// stays registered with the `delete_error` status. Returns whether the
    /// host was removed.
    pub async fn delete_host(&self, host_ref: &Reference, force: bool) -> Result<bool> {
        let host = self.inventory.get(host_ref)?;
        let plan_ref = match (&host.on_delete_plan, force) {
            (Some(plan), false) => plan.clone(),
            _ => {
                self.inventory.remove(host_ref)?;
                info!(host = %host_ref, force, "host removed");
                return Ok(true);
            }
        };

        self.inventory.update_status(host_ref, HostStatus::Deleting);
        let plan_status = self
            .execute_plan(host_ref, &plan_ref, PlanOptions::default())
            .await?;
        if plan_status == 0 {
            self.inventory.remove(host_ref)?;
            info!(host = %host_ref, plan = %plan_ref, "host removed after on-delete plan");
            Ok(true)
        } else {
            warn!(host = %host_ref, plan = %plan_ref, plan_status, "on-delete plan failed");
            self.inventory.update_status(host_ref, HostStatus::DeleteError);
            Ok(false)
        }
    }
}
