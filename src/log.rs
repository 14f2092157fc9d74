//! Execution history: command logs, flight plan logs and the log book.
//!
//! Every command execution opens a command log before the transport is
//! touched and closes it with the final, redacted result. Flight plan runs
//! get their own plan log that links to the command logs produced by its
//! lines. The log book is the single arena holding both kinds of record; the
//! running-state checks that guard parallel execution are done under its
//! lock so that check and insert are one atomic step.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;

use crate::reference::Reference;
use crate::status::CommandOutcome;

/// Character set for generated log labels.
const LABEL_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random label used to correlate related log records.
pub fn random_label(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| LABEL_CHARS[rng.gen_range(0..LABEL_CHARS.len())] as char)
        .collect()
}

/// Identifier of a command log within the log book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandLogId(pub usize);

/// Identifier of a flight plan log within the log book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanLogId(pub usize);

/// Record of one command execution on one host.
#[derive(Debug, Clone)]
pub struct CommandLog {
    pub id: CommandLogId,
    pub host: Reference,
    pub command: Reference,
    /// Free-form correlation label.
    pub label: Option<String>,
    /// Rendered code with secrets redacted.
    pub code: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<i32>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub is_running: bool,
    /// Plan log this execution belongs to, when run from a flight plan.
    pub plan_log_id: Option<PlanLogId>,
    /// Index of the plan line that produced this log.
    pub plan_line: Option<usize>,
    /// Plan log of a nested plan triggered by this command.
    pub triggered_plan_log_id: Option<PlanLogId>,
}

impl CommandLog {
    /// Wall-clock duration in seconds, clamped to zero.
    pub fn duration_secs(&self) -> i64 {
        match self.finished_at {
            Some(finished) => (finished - self.started_at).num_seconds().max(0),
            None => 0,
        }
    }
}

/// Record of one flight plan run on one host.
#[derive(Debug, Clone)]
pub struct PlanLog {
    pub id: PlanLogId,
    pub host: Reference,
    pub plan: Reference,
    pub label: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<i32>,
    pub is_running: bool,
    /// Plan log of the parent run, for nested plans.
    pub parent_plan_log_id: Option<PlanLogId>,
    /// Command log of the line that triggered this nested run.
    pub parent_command_log_id: Option<CommandLogId>,
    /// Command logs produced by this run, in execution order.
    pub command_log_ids: Vec<CommandLogId>,
}

impl PlanLog {
    pub fn duration_secs(&self) -> i64 {
        match self.finished_at {
            Some(finished) => (finished - self.started_at).num_seconds().max(0),
            None => 0,
        }
    }
}

#[derive(Default)]
struct LogBookInner {
    command_logs: Vec<CommandLog>,
    plan_logs: Vec<PlanLog>,
}

/// Arena of execution records shared across the engine.
#[derive(Default)]
pub struct LogBook {
    inner: Mutex<LogBookInner>,
}

/// Fields needed to open a command log.
pub struct CommandLogStart {
    pub host: Reference,
    pub command: Reference,
    pub label: Option<String>,
    pub code: Option<String>,
    pub plan_log_id: Option<PlanLogId>,
    pub plan_line: Option<usize>,
}

impl LogBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a command log unconditionally.
    pub fn start_command(&self, start: CommandLogStart) -> CommandLogId {
        let mut inner = self.inner.lock();
        Self::push_command(&mut inner, start)
    }

    /// Open a command log only if no other log for the same host and
    /// command is currently running. Check and insert happen under one
    /// lock, so two concurrent callers cannot both pass the check.
    pub fn try_start_guarded(&self, start: CommandLogStart) -> Option<CommandLogId> {
        let mut inner = self.inner.lock();
        let busy = inner
            .command_logs
            .iter()
            .any(|log| log.is_running && log.host == start.host && log.command == start.command);
        if busy {
            return None;
        }
        Some(Self::push_command(&mut inner, start))
    }

    fn push_command(inner: &mut LogBookInner, start: CommandLogStart) -> CommandLogId {
        let id = CommandLogId(inner.command_logs.len());
        inner.command_logs.push(CommandLog {
            id,
            host: start.host,
            command: start.command,
            label: start.label,
            code: start.code,
            started_at: Utc::now(),
            finished_at: None,
            status: None,
            response: None,
            error: None,
            is_running: true,
            plan_log_id: start.plan_log_id,
            plan_line: start.plan_line,
            triggered_plan_log_id: None,
        });
        id
    }

    /// Close a command log with its final, already redacted result.
    pub fn finish_command(&self, id: CommandLogId, outcome: &CommandOutcome) {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.command_logs.get_mut(id.0) {
            log.finished_at = Some(Utc::now());
            log.status = Some(outcome.status);
            log.response = outcome.response.clone();
            log.error = outcome.error.clone();
            log.is_running = false;
        }
    }

    /// Record a finished execution in one step, used for results that never
    /// reached the transport, such as skipped lines and guard rejections.
    pub fn record_command(&self, start: CommandLogStart, outcome: &CommandOutcome) -> CommandLogId {
        let id = self.start_command(start);
        self.finish_command(id, outcome);
        id
    }

    /// Link a command log to the plan log of a nested run it triggered.
    pub fn link_triggered_plan(&self, command_log: CommandLogId, plan_log: PlanLogId) {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.command_logs.get_mut(command_log.0) {
            log.triggered_plan_log_id = Some(plan_log);
        }
    }

    /// Open a flight plan log.
    pub fn start_plan(
        &self,
        host: Reference,
        plan: Reference,
        label: Option<String>,
        parent_plan_log_id: Option<PlanLogId>,
        parent_command_log_id: Option<CommandLogId>,
    ) -> PlanLogId {
        let mut inner = self.inner.lock();
        let id = PlanLogId(inner.plan_logs.len());
        inner.plan_logs.push(PlanLog {
            id,
            host,
            plan,
            label,
            started_at: Utc::now(),
            finished_at: None,
            status: None,
            is_running: true,
            parent_plan_log_id,
            parent_command_log_id,
            command_log_ids: Vec::new(),
        });
        id
    }

    /// Close a flight plan log with its final status.
    pub fn finish_plan(&self, id: PlanLogId, status: i32) {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.plan_logs.get_mut(id.0) {
            log.finished_at = Some(Utc::now());
            log.status = Some(status);
            log.is_running = false;
        }
    }

    /// Attach a command log to its plan log.
    pub fn attach_command(&self, plan_log: PlanLogId, command_log: CommandLogId) {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.plan_logs.get_mut(plan_log.0) {
            log.command_log_ids.push(command_log);
        }
    }

    /// Whether a plan is currently running on a host.
    pub fn plan_running(&self, host: &Reference, plan: &Reference) -> bool {
        self.inner
            .lock()
            .plan_logs
            .iter()
            .any(|log| log.is_running && &log.host == host && &log.plan == plan)
    }

    /// Snapshot of a command log.
    pub fn command_log(&self, id: CommandLogId) -> Option<CommandLog> {
        self.inner.lock().command_logs.get(id.0).cloned()
    }

    /// Snapshot of a plan log.
    pub fn plan_log(&self, id: PlanLogId) -> Option<PlanLog> {
        self.inner.lock().plan_logs.get(id.0).cloned()
    }

    /// Snapshots of all command logs for a host, in creation order.
    pub fn command_logs_for_host(&self, host: &Reference) -> Vec<CommandLog> {
        self.inner
            .lock()
            .command_logs
            .iter()
            .filter(|log| &log.host == host)
            .cloned()
            .collect()
    }
}
