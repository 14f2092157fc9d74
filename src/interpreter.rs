//! Flight plan interpretation.
//!
//! A plan run walks its lines in order against one host. Each line's command
//! result is judged by the line's action table; the first matching action
//! decides whether the run advances, terminates with the command's own
//! status, or terminates with a custom code. Nested plan commands recurse
//! through the command runner, carrying a visited-plan stack so a run can
//! never revisit an ancestor plan.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::Result;
use crate::host::Host;
use crate::log::{random_label, CommandLogId, CommandLogStart, PlanLogId};
use crate::plan::{ActionKind, FlightPlan, PlanLineAction};
use crate::reference::Reference;
use crate::runner::{ExecOptions, SudoOverride};
use crate::status::{self, CommandOutcome};
use crate::transport::Transport;

/// Message recorded for a line skipped by its gating condition.
pub const CONDITION_CHECK_FAILED_MESSAGE: &str = "Condition check failed";

/// Context threaded through nested plan invocations.
#[derive(Default)]
pub struct PlanCtx {
    pub label: Option<String>,
    pub parent_plan_log_id: Option<PlanLogId>,
    pub parent_command_log_id: Option<CommandLogId>,
    pub visited_plans: Vec<Reference>,
    /// Transport session reused across all lines of the run.
    pub transport: Option<Arc<dyn Transport>>,
}

/// Options for a top-level plan execution.
#[derive(Default)]
pub struct PlanOptions {
    /// Correlation label. Generated when not set.
    pub label: Option<String>,
    /// Transport session to reuse for every line.
    pub transport: Option<Arc<dyn Transport>>,
}

/// Transition decided for one executed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Advance,
    Terminate(i32),
}

fn resolve_transition(
    action: ActionKind,
    custom_code: Option<i32>,
    command_status: i32,
    is_last_line: bool,
) -> Transition {
    match action {
        ActionKind::Next => {
            // A plan cannot fall off the end with a next-action; the last
            // line downgrades to exit-with-own-code.
            if is_last_line {
                Transition::Terminate(command_status)
            } else {
                Transition::Advance
            }
        }
        ActionKind::Exit => Transition::Terminate(command_status),
        ActionKind::ExitCustom => Transition::Terminate(custom_code.unwrap_or(command_status)),
    }
}

/// Pick the winning action for a command status: first matching line action
/// in declaration order, else the plan's fallback error action.
fn next_action<'a>(
    plan: &'a FlightPlan,
    actions: &'a [PlanLineAction],
    command_status: i32,
) -> (ActionKind, Option<i32>, Option<&'a PlanLineAction>) {
    for action in actions {
        if action.operator.matches(command_status, action.value) {
            return (action.action, action.custom_exit_code, Some(action));
        }
    }
    (plan.on_error_action, plan.on_error_custom_code, None)
}

impl Engine {
    /// Execute a flight plan against a host and return its final status.
    pub async fn execute_plan(
        &self,
        host: &Reference,
        plan: &Reference,
        options: PlanOptions,
    ) -> Result<i32> {
        let ctx = PlanCtx {
            label: options.label,
            transport: options.transport,
            ..PlanCtx::default()
        };
        let (final_status, _log) = self.execute_plan_ctx(host, plan, ctx).await?;
        Ok(final_status)
    }

    /// Boxed so nested plan commands can recurse through the runner.
    pub(crate) fn execute_plan_ctx<'a>(
        &'a self,
        host: &'a Reference,
        plan_ref: &'a Reference,
        ctx: PlanCtx,
    ) -> Pin<Box<dyn Future<Output = Result<(i32, PlanLogId)>> + Send + 'a>> {
        Box::pin(self.run_plan(host, plan_ref, ctx))
    }

    async fn run_plan(
        &self,
        host_ref: &Reference,
        plan_ref: &Reference,
        ctx: PlanCtx,
    ) -> Result<(i32, PlanLogId)> {
        let plan = self.plans.get(plan_ref)?;
        let host = self.inventory.get(host_ref)?;
        let label = ctx
            .label
            .clone()
            .unwrap_or_else(|| random_label(self.config.log_label_len));

        let plan_log = self.logs.start_plan(
            host_ref.clone(),
            plan_ref.clone(),
            Some(label.clone()),
            ctx.parent_plan_log_id,
            ctx.parent_command_log_id,
        );
        info!(host = %host_ref, plan = %plan_ref, label = %label, "plan started");

        if plan.lines.is_empty() {
            warn!(plan = %plan_ref, "plan has no lines");
            self.logs.finish_plan(plan_log, status::PLAN_IS_EMPTY);
            return Ok((status::PLAN_IS_EMPTY, plan_log));
        }

        let mut visited = ctx.visited_plans.clone();
        visited.push(plan_ref.clone());

        let final_status = match self
            .run_plan_lines(&plan, &host, host_ref, plan_ref, &label, plan_log, &ctx, &visited)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                // Close the plan log before raising, or the host would look
                // like it still has a plan in flight.
                self.logs.finish_plan(plan_log, status::PLAN_EXECUTION_ERROR);
                return Err(e);
            }
        };

        self.logs.finish_plan(plan_log, final_status);
        info!(host = %host_ref, plan = %plan_ref, status = final_status, "plan finished");
        Ok((final_status, plan_log))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_plan_lines(
        &self,
        plan: &FlightPlan,
        host: &Host,
        host_ref: &Reference,
        plan_ref: &Reference,
        label: &str,
        plan_log: PlanLogId,
        ctx: &PlanCtx,
        visited: &[Reference],
    ) -> Result<i32> {
        let mut final_status = 0;
        let line_count = plan.lines.len();
        for (index, line) in plan.lines.iter().enumerate() {
            let is_last = index + 1 == line_count;

            if let Some(condition) = line.condition.as_deref().filter(|c| !c.trim().is_empty()) {
                let rendered = self
                    .renderer
                    .render_for_host(condition, host, &self.variables)?;
                if !crate::condition::evaluate(&rendered) {
                    debug!(plan = %plan_ref, line = index, "line skipped by condition");
                    let skip = CommandOutcome::failed(
                        status::PLAN_LINE_CONDITION_CHECK_FAILED,
                        CONDITION_CHECK_FAILED_MESSAGE,
                    );
                    let skip_log = self.logs.record_command(
                        CommandLogStart {
                            host: host_ref.clone(),
                            command: line.command.clone(),
                            label: Some(label.to_string()),
                            code: None,
                            plan_log_id: Some(plan_log),
                            plan_line: Some(index),
                        },
                        &skip,
                    );
                    self.logs.attach_command(plan_log, skip_log);
                    if is_last {
                        final_status = status::PLAN_LINE_CONDITION_CHECK_FAILED;
                        break;
                    }
                    continue;
                }
            }

            let exec = ExecOptions {
                path: line.path.clone(),
                sudo: SudoOverride::HostDefault,
                transport: ctx.transport.clone(),
                label: Some(label.to_string()),
                suppress_log: false,
                plan_log_id: Some(plan_log),
                plan_line: Some(index),
                visited_plans: visited.to_vec(),
            };
            let (outcome, _) = self
                .execute_command_ctx(host_ref, &line.command, exec)
                .await?;

            let (action, custom_code, winning) = next_action(plan, &line.actions, outcome.status);
            if let Some(winning) = winning {
                for assignment in &winning.variable_assignments {
                    self.variables
                        .assign(host_ref, &assignment.variable, &assignment.value);
                }
            }
            match resolve_transition(action, custom_code, outcome.status, is_last) {
                Transition::Advance => continue,
                Transition::Terminate(code) => {
                    final_status = code;
                    break;
                }
            }
        }
        Ok(final_status)
    }
}
