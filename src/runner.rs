//! Command execution: sudo/path composition and action dispatch.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandAction, FileSource};
use crate::engine::Engine;
use crate::error::Result;
use crate::host::{Host, SudoMode};
use crate::log::{CommandLogId, CommandLogStart, PlanLogId};
use crate::interpreter::PlanCtx;
use crate::reference::Reference;
use crate::secrets::{self, ResolvedCode};
use crate::status::{self, collapse_statuses, join_lines, CommandOutcome};
use crate::transport::{SudoRequest, Transport};

/// Sudo invocation prefix. `-S` reads the password from stdin, `-p ''`
/// suppresses the prompt so it never pollutes captured output.
pub const SUDO_PREFIX: &str = "sudo -S -p ''";

/// Message recorded when sudo-with-password is requested without a stored
/// password.
pub const SUDO_PASSWORD_MISSING_MESSAGE: &str = "sudo password was not provided!";

/// Message recorded by the parallel-run guard.
pub const ANOTHER_COMMAND_RUNNING_MESSAGE: &str =
    "Another instance of the command is already running";

/// Per-call sudo override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SudoOverride {
    /// Use the host's default sudo policy.
    #[default]
    HostDefault,
    /// Run without sudo regardless of the host policy.
    Disabled,
    /// Use a specific sudo mode.
    Mode(SudoMode),
}

/// Options for a single command execution.
#[derive(Default)]
pub struct ExecOptions {
    /// Working directory override, itself a template. Falls back to the
    /// command's own path.
    pub path: Option<String>,
    pub sudo: SudoOverride,
    /// Reuse an existing transport session instead of opening one.
    pub transport: Option<Arc<dyn Transport>>,
    /// Correlation label for the command log.
    pub label: Option<String>,
    /// Skip log bookkeeping entirely. Also forgoes the parallel-run guard,
    /// since concurrency is detected through running log records.
    pub suppress_log: bool,
    /// Plan log this execution belongs to.
    pub plan_log_id: Option<PlanLogId>,
    /// Plan line index that triggered this execution.
    pub plan_line: Option<usize>,
    /// Plan references already on the call stack, for recursion prevention.
    pub visited_plans: Vec<Reference>,
}

/// Command text composed per the sudo policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedCommand {
    /// One shell invocation.
    Single(String),
    /// Discrete invocations executed one at a time, each fed the sudo
    /// password on stdin.
    Sequence(Vec<String>),
}

fn split_subcommands(code: &str) -> Vec<String> {
    code.replace('\\', "")
        .replace('\n', "")
        .replace(';', "&&")
        .split("&&")
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Compose the final shell invocation(s) from rendered code, an optional
/// working directory and the effective sudo mode.
///
/// Without sudo the code runs as one invocation, prefixed with a `cd` step
/// when a directory is set. Under sudo each sub-command is prefixed
/// individually; the `cd` step itself never gets sudo. Sudo with password
/// returns the sub-commands as a list because the password must be fed to
/// each sudo invocation separately.
pub fn prepare_remote_command(
    code: &str,
    path: Option<&str>,
    sudo: Option<SudoMode>,
) -> PreparedCommand {
    match sudo {
        None => {
            let text = match path {
                Some(dir) if !dir.is_empty() => format!("cd {dir} && {code}"),
                _ => code.to_string(),
            };
            PreparedCommand::Single(text)
        }
        Some(SudoMode::Without) => {
            let mut parts: Vec<String> = split_subcommands(code)
                .into_iter()
                .map(|part| format!("{SUDO_PREFIX} {part}"))
                .collect();
            if let Some(dir) = path.filter(|d| !d.is_empty()) {
                parts.insert(0, format!("cd {dir}"));
            }
            PreparedCommand::Single(parts.join(" && "))
        }
        Some(SudoMode::WithPassword) => {
            let mut parts: Vec<String> = split_subcommands(code)
                .into_iter()
                .map(|part| format!("{SUDO_PREFIX} {part}"))
                .collect();
            if let Some(dir) = path.filter(|d| !d.is_empty()) {
                parts.insert(0, format!("cd {dir}"));
            }
            PreparedCommand::Sequence(parts)
        }
    }
}

/// Effective sudo mode for one execution. The root user never needs sudo,
/// so it is disabled outright for root regardless of overrides.
pub fn effective_sudo(host: &Host, requested: SudoOverride) -> Option<SudoMode> {
    if host.ssh_username == "root" {
        return None;
    }
    match requested {
        SudoOverride::HostDefault => host.use_sudo,
        SudoOverride::Disabled => None,
        SudoOverride::Mode(mode) => Some(mode),
    }
}

impl Engine {
    /// Execute a command against a host.
    ///
    /// The result is secret-redacted and, unless `suppress_log` is set,
    /// recorded in the log book. Structured failures come back as outcomes
    /// with sentinel statuses; only configuration defects surface as errors.
    pub async fn execute_command(
        &self,
        host: &Reference,
        command: &Reference,
        options: ExecOptions,
    ) -> Result<CommandOutcome> {
        let (outcome, _log_id) = self.execute_command_ctx(host, command, options).await?;
        Ok(outcome)
    }

    pub(crate) async fn execute_command_ctx(
        &self,
        host_ref: &Reference,
        command_ref: &Reference,
        options: ExecOptions,
    ) -> Result<(CommandOutcome, Option<CommandLogId>)> {
        let host = self.inventory.get(host_ref)?;
        let command = self.commands.get(command_ref)?;
        let sudo = effective_sudo(&host, options.sudo);

        // Secrets resolve against the rendered template, so redaction can
        // map the substituted values back to spoilers.
        let rendered_code = self
            .renderer
            .render_for_host(&command.code, &host, &self.variables)?;
        let script_mode = matches!(command.action, CommandAction::Script);
        let resolved =
            secrets::resolve_placeholders(&rendered_code, &self.secrets, script_mode);
        let raw_path = options.path.clone().or_else(|| command.path.clone());
        let rendered_path = match raw_path {
            Some(p) => Some(self.renderer.render_for_host(&p, &host, &self.variables)?),
            None => None,
        };

        let log_id = if options.suppress_log {
            None
        } else {
            let start = CommandLogStart {
                host: host_ref.clone(),
                command: command_ref.clone(),
                label: options.label.clone(),
                code: Some(secrets::redact(&resolved.code, &resolved.secrets_used)),
                plan_log_id: options.plan_log_id,
                plan_line: options.plan_line,
            };
            if command.allow_parallel_run {
                Some(self.logs.start_command(start))
            } else {
                match self.logs.try_start_guarded(start) {
                    Some(id) => Some(id),
                    None => {
                        warn!(host = %host_ref, command = %command_ref, "parallel run rejected");
                        let outcome = CommandOutcome::failed(
                            status::ANOTHER_COMMAND_RUNNING,
                            ANOTHER_COMMAND_RUNNING_MESSAGE,
                        );
                        let guard_log = self.logs.record_command(
                            CommandLogStart {
                                host: host_ref.clone(),
                                command: command_ref.clone(),
                                label: options.label.clone(),
                                code: None,
                                plan_log_id: options.plan_log_id,
                                plan_line: options.plan_line,
                            },
                            &outcome,
                        );
                        if let Some(plan_log) = options.plan_log_id {
                            self.logs.attach_command(plan_log, guard_log);
                        }
                        return Ok((outcome, Some(guard_log)));
                    }
                }
            }
        };
        if let (Some(plan_log), Some(id)) = (options.plan_log_id, log_id) {
            self.logs.attach_command(plan_log, id);
        }

        debug!(host = %host_ref, command = %command_ref, "executing command");
        let outcome = match self
            .dispatch(&host, &command, &resolved, rendered_path.as_deref(), sudo, &options, log_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // Close the log before raising, or the guard would treat
                // this run as still in flight.
                if let Some(id) = log_id {
                    self.logs.finish_command(
                        id,
                        &CommandOutcome::failed(
                            status::COMMAND_EXECUTION_ERROR,
                            e.to_string(),
                        ),
                    );
                }
                return Err(e);
            }
        };
        let outcome = CommandOutcome {
            status: outcome.status,
            response: secrets::redact_opt(outcome.response, &resolved.secrets_used),
            error: secrets::redact_opt(outcome.error, &resolved.secrets_used),
        };

        if let Some(id) = log_id {
            self.logs.finish_command(id, &outcome);
        }
        if outcome.is_success() {
            if let Some(new_status) = command.host_status {
                self.inventory.update_status(host_ref, new_status);
            }
        }
        info!(
            host = %host_ref,
            command = %command_ref,
            status = outcome.status,
            "command finished"
        );
        Ok((outcome, log_id))
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        host: &Host,
        command: &Command,
        resolved: &ResolvedCode,
        path: Option<&str>,
        sudo: Option<SudoMode>,
        options: &ExecOptions,
        log_id: Option<CommandLogId>,
    ) -> Result<CommandOutcome> {
        match &command.action {
            CommandAction::Shell => {
                self.run_shell(host, resolved, path, sudo, options.transport.clone())
                    .await
            }
            CommandAction::Script => {
                Ok(crate::script::run_script(&resolved.code, host, &self.variables))
            }
            CommandAction::FileFromTemplate(template_ref) => {
                self.run_file_template(host, template_ref, options.transport.clone())
                    .await
            }
            CommandAction::Plan(plan_ref) => {
                self.run_nested_plan(host, plan_ref, options, log_id).await
            }
        }
    }

    async fn run_shell(
        &self,
        host: &Host,
        resolved: &ResolvedCode,
        path: Option<&str>,
        sudo: Option<SudoMode>,
        reuse: Option<Arc<dyn Transport>>,
    ) -> Result<CommandOutcome> {
        let password = match sudo {
            Some(SudoMode::WithPassword) => match &host.ssh_password {
                Some(p) if !p.is_empty() => Some(p.expose().to_string()),
                _ => {
                    return Ok(CommandOutcome::failed(
                        status::SUDO_PASSWORD_MISSING,
                        SUDO_PASSWORD_MISSING_MESSAGE,
                    ));
                }
            },
            _ => None,
        };

        let owns_transport = reuse.is_none();
        let transport = match reuse {
            Some(t) => t,
            None => {
                host.validate_ssh_key()?;
                match self
                    .transports
                    .connect(host, self.config.connect_timeout())
                    .await
                {
                    Ok(t) => t,
                    Err(e) => {
                        return Ok(CommandOutcome::failed(
                            status::SSH_CONNECTION_ERROR,
                            e.to_string(),
                        ));
                    }
                }
            }
        };

        let prepared = prepare_remote_command(&resolved.code, path, sudo);
        let result = match prepared {
            PreparedCommand::Single(text) => {
                let request = match sudo {
                    Some(SudoMode::Without) => SudoRequest::Without,
                    _ => SudoRequest::None,
                };
                match transport.exec(&text, &request).await {
                    Ok(output) => CommandOutcome {
                        status: output.status,
                        response: join_lines(&output.stdout),
                        error: join_lines(&output.stderr),
                    },
                    Err(e) => {
                        CommandOutcome::failed(status::SSH_CONNECTION_ERROR, e.to_string())
                    }
                }
            }
            PreparedCommand::Sequence(parts) => {
                let password = password.unwrap_or_default();
                let mut statuses = Vec::with_capacity(parts.len());
                let mut stdout = Vec::new();
                let mut stderr = Vec::new();
                let mut transport_error = None;
                for part in &parts {
                    let request = SudoRequest::WithPassword(password.clone());
                    match transport.exec(part, &request).await {
                        Ok(output) => {
                            statuses.push(output.status);
                            stdout.extend(output.stdout);
                            stderr.extend(output.stderr);
                        }
                        Err(e) => {
                            transport_error = Some(e);
                            break;
                        }
                    }
                }
                match transport_error {
                    Some(e) => {
                        CommandOutcome::failed(status::SSH_CONNECTION_ERROR, e.to_string())
                    }
                    None => CommandOutcome {
                        status: collapse_statuses(&statuses),
                        response: join_lines(&stdout),
                        error: join_lines(&stderr),
                    },
                }
            }
        };

        if owns_transport {
            let _ = transport.close().await;
        }
        Ok(result)
    }

    async fn run_file_template(
        &self,
        host: &Host,
        template_ref: &Reference,
        reuse: Option<Arc<dyn Transport>>,
    ) -> Result<CommandOutcome> {
        let template = self.file_templates.get(template_ref)?;
        let dir = self
            .renderer
            .render_for_host(&template.server_dir, host, &self.variables)?;
        let file_name = self
            .renderer
            .render_for_host(&template.file_name, host, &self.variables)?;
        let remote_path = format!("{}/{}", dir.trim_end_matches('/'), file_name);

        let owns_transport = reuse.is_none();
        let transport = match reuse {
            Some(t) => t,
            None => {
                host.validate_ssh_key()?;
                match self
                    .transports
                    .connect(host, self.config.connect_timeout())
                    .await
                {
                    Ok(t) => t,
                    Err(e) => {
                        return Ok(CommandOutcome::failed(
                            status::SSH_CONNECTION_ERROR,
                            e.to_string(),
                        ));
                    }
                }
            }
        };

        let result = match template.source {
            FileSource::Engine => {
                let content = self
                    .renderer
                    .render_for_host(&template.code, host, &self.variables)?;
                match transport.path_exists(&remote_path).await {
                    Ok(true) => CommandOutcome::failed(
                        status::FILE_CREATION_FAILED,
                        "File already exists",
                    ),
                    Ok(false) => match transport.upload(content.as_bytes(), &remote_path).await {
                        Ok(_) => CommandOutcome::ok(Some(
                            "File created and uploaded successfully".to_string(),
                        )),
                        Err(e) => {
                            CommandOutcome::failed(status::FILE_CREATION_FAILED, e.to_string())
                        }
                    },
                    Err(e) => CommandOutcome::failed(status::FILE_CREATION_FAILED, e.to_string()),
                }
            }
            FileSource::Host => match transport.download(&remote_path).await {
                Ok(content) => CommandOutcome::ok(Some(
                    String::from_utf8_lossy(&content).to_string(),
                )),
                Err(e) => CommandOutcome::failed(status::FILE_CREATION_FAILED, e.to_string()),
            },
        };

        if owns_transport {
            let _ = transport.close().await;
        }
        Ok(result)
    }

    async fn run_nested_plan(
        &self,
        host: &Host,
        plan_ref: &Reference,
        options: &ExecOptions,
        log_id: Option<CommandLogId>,
    ) -> Result<CommandOutcome> {
        if options.visited_plans.contains(plan_ref) {
            return Ok(CommandOutcome::failed(
                status::PLAN_EXECUTION_ERROR,
                "Flight plan recursion detected",
            ));
        }
        let ctx = PlanCtx {
            label: options.label.clone(),
            parent_plan_log_id: options.plan_log_id,
            parent_command_log_id: log_id,
            visited_plans: options.visited_plans.clone(),
            transport: options.transport.clone(),
        };
        let (plan_status, child_log) = self
            .execute_plan_ctx(&host.reference, plan_ref, ctx)
            .await?;
        if let Some(id) = log_id {
            self.logs.link_triggered_plan(id, child_log);
        }
        if plan_status == 0 {
            Ok(CommandOutcome::ok(None))
        } else {
            Ok(CommandOutcome::failed(
                status::PLAN_EXECUTION_ERROR,
                "Flight plan execution error",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_prepare_without_sudo() {
        assert_eq!(
            prepare_remote_command("ls -a /tmp", None, None),
            PreparedCommand::Single("ls -a /tmp".into())
        );
        assert_eq!(
            prepare_remote_command("ls -a", Some("/opt"), None),
            PreparedCommand::Single("cd /opt && ls -a".into())
        );
    }

    #[test]
    fn test_prepare_sudo_without_password() {
        assert_eq!(
            prepare_remote_command("ls -a /tmp && mkdir /tmp/x", None, Some(SudoMode::Without)),
            PreparedCommand::Single(
                "sudo -S -p '' ls -a /tmp && sudo -S -p '' mkdir /tmp/x".into()
            )
        );
        assert_eq!(
            prepare_remote_command("ls -a", Some("/opt"), Some(SudoMode::Without)),
            PreparedCommand::Single("cd /opt && sudo -S -p '' ls -a".into())
        );
    }

    #[test]
    fn test_prepare_sudo_with_password() {
        assert_eq!(
            prepare_remote_command(
                "ls -a /tmp && mkdir /tmp/x",
                None,
                Some(SudoMode::WithPassword)
            ),
            PreparedCommand::Sequence(vec![
                "sudo -S -p '' ls -a /tmp".into(),
                "sudo -S -p '' mkdir /tmp/x".into(),
            ])
        );
        // Single command still comes back as a one-element list.
        assert_eq!(
            prepare_remote_command("whoami", None, Some(SudoMode::WithPassword)),
            PreparedCommand::Sequence(vec!["sudo -S -p '' whoami".into()])
        );
        assert_eq!(
            prepare_remote_command("whoami", Some("/opt"), Some(SudoMode::WithPassword)),
            PreparedCommand::Sequence(vec!["cd /opt".into(), "sudo -S -p '' whoami".into()])
        );
    }

    #[test]
    fn test_semicolons_normalize_to_and() {
        assert_eq!(
            prepare_remote_command("a; b", None, Some(SudoMode::Without)),
            PreparedCommand::Single("sudo -S -p '' a && sudo -S -p '' b".into())
        );
    }

    #[test]
    fn test_line_continuations_stripped() {
        assert_eq!(
            prepare_remote_command("ls \\\n-a && pwd", None, Some(SudoMode::WithPassword)),
            PreparedCommand::Sequence(vec![
                "sudo -S -p '' ls -a".into(),
                "sudo -S -p '' pwd".into(),
            ])
        );
    }

    #[test]
    fn test_effective_sudo_rules() {
        use crate::host::Host;
        let mut host = Host::new(Reference::new("h1").unwrap(), "H1");
        host.ssh_username = "doge".into();
        host.use_sudo = Some(SudoMode::Without);
        assert_eq!(
            effective_sudo(&host, SudoOverride::HostDefault),
            Some(SudoMode::Without)
        );
        assert_eq!(effective_sudo(&host, SudoOverride::Disabled), None);
        assert_eq!(
            effective_sudo(&host, SudoOverride::Mode(SudoMode::WithPassword)),
            Some(SudoMode::WithPassword)
        );
        host.ssh_username = "root".into();
        assert_eq!(
            effective_sudo(&host, SudoOverride::Mode(SudoMode::WithPassword)),
            None
        );
    }
}
