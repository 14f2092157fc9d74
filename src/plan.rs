//! Flight plans: ordered command sequences with status-driven branching.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::command::{CommandAction, CommandRegistry};
use crate::condition::ConditionOperator;
use crate::error::{Error, Result};
use crate::reference::Reference;
use crate::vars::VariableAssignment;
use indexmap::IndexMap;

/// What the interpreter does after a line finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Continue with the next line.
    Next,
    /// Stop the plan, final status is the command's exit status.
    Exit,
    /// Stop the plan with a custom exit code.
    ExitCustom,
}

/// One branching rule attached to a plan line.
#[derive(Debug, Clone)]
pub struct PlanLineAction {
    /// Operator applied to the command's exit status.
    pub operator: ConditionOperator,
    /// Reference value for the operator.
    pub value: i32,
    pub action: ActionKind,
    /// Exit code used when `action` is [`ActionKind::ExitCustom`].
    pub custom_exit_code: Option<i32>,
    /// Variable values to assign when this action fires.
    pub variable_assignments: Vec<VariableAssignment>,
}

impl PlanLineAction {
    pub fn new(operator: ConditionOperator, value: i32, action: ActionKind) -> Self {
        Self {
            operator,
            value,
            action,
            custom_exit_code: None,
            variable_assignments: Vec::new(),
        }
    }

    pub fn with_custom_code(mut self, code: i32) -> Self {
        self.custom_exit_code = Some(code);
        self
    }

    pub fn with_assignment(mut self, variable: impl Into<String>, value: impl Into<String>) -> Self {
        self.variable_assignments.push(VariableAssignment {
            variable: variable.into(),
            value: value.into(),
        });
        self
    }
}

/// One step of a flight plan.
#[derive(Debug, Clone)]
pub struct PlanLine {
    pub command: Reference,
    /// Working directory override for this line, itself a template.
    pub path: Option<String>,
    /// Template condition gating this line. Empty means always run.
    pub condition: Option<String>,
    /// Branching rules, evaluated in order after the command finishes.
    pub actions: Vec<PlanLineAction>,
}

impl PlanLine {
    pub fn new(command: Reference) -> Self {
        Self {
            command,
            path: None,
            condition: None,
            actions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_action(mut self, action: PlanLineAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// An ordered sequence of plan lines with a fallback error action.
#[derive(Debug, Clone)]
pub struct FlightPlan {
    pub reference: Reference,
    pub name: String,
    pub lines: Vec<PlanLine>,
    /// Action taken when a line fails and no explicit rule matched.
    pub on_error_action: ActionKind,
    /// Exit code used when `on_error_action` is [`ActionKind::ExitCustom`].
    pub on_error_custom_code: Option<i32>,
}

impl FlightPlan {
    pub fn new(reference: Reference, name: impl Into<String>) -> Self {
        Self {
            reference,
            name: name.into(),
            lines: Vec::new(),
            on_error_action: ActionKind::Exit,
            on_error_custom_code: None,
        }
    }
}

/// Thread-safe flight plan registry keyed by reference.
///
/// Inserting a line whose command triggers another plan is validated
/// against the registered plan graph, so statically declared cycles are
/// rejected up front. Cycles assembled at runtime are still caught by the
/// interpreter's visited-plan check.
#[derive(Default)]
pub struct PlanRegistry {
    plans: RwLock<IndexMap<Reference, FlightPlan>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, plan: FlightPlan) {
        self.plans.write().insert(plan.reference.clone(), plan);
    }

    pub fn get(&self, reference: &Reference) -> Result<FlightPlan> {
        self.plans
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::not_found("flight plan", reference.as_str()))
    }

    /// Append a line to a plan, rejecting lines that would make the plan
    /// reach itself through nested plan commands.
    pub fn add_line(
        &self,
        plan_ref: &Reference,
        line: PlanLine,
        commands: &CommandRegistry,
    ) -> Result<()> {
        if let Ok(command) = commands.get(&line.command) {
            if let CommandAction::Plan(nested) = &command.action {
                if self.reaches(nested, plan_ref, commands)? {
                    return Err(Error::Recursion {
                        plan: plan_ref.as_str().to_string(),
                        command: line.command.as_str().to_string(),
                    });
                }
            }
        }
        let mut plans = self.plans.write();
        let plan = plans
            .get_mut(plan_ref)
            .ok_or_else(|| Error::not_found("flight plan", plan_ref.as_str()))?;
        plan.lines.push(line);
        Ok(())
    }

    /// Depth-first reachability over nested plan commands.
    fn reaches(
        &self,
        from: &Reference,
        target: &Reference,
        commands: &CommandRegistry,
    ) -> Result<bool> {
        if from == target {
            return Ok(true);
        }
        let mut stack = vec![from.clone()];
        let mut visited = vec![from.clone()];
        while let Some(current) = stack.pop() {
            let Ok(plan) = self.get(&current) else {
                continue;
            };
            for line in &plan.lines {
                let Ok(command) = commands.get(&line.command) else {
                    continue;
                };
                if let CommandAction::Plan(nested) = command.action {
                    if &nested == target {
                        return Ok(true);
                    }
                    if !visited.contains(&nested) {
                        visited.push(nested.clone());
                        stack.push(nested);
                    }
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    fn reference(s: &str) -> Reference {
        Reference::new(s).unwrap()
    }

    fn setup() -> (PlanRegistry, CommandRegistry) {
        let plans = PlanRegistry::new();
        let commands = CommandRegistry::new();
        commands.upsert(
            Command::new(reference("shell_cmd"), "Shell", CommandAction::Shell).with_code("ls"),
        );
        (plans, commands)
    }

    #[test]
    fn test_add_line_appends() {
        let (plans, commands) = setup();
        plans.upsert(FlightPlan::new(reference("p1"), "Plan 1"));
        plans
            .add_line(&reference("p1"), PlanLine::new(reference("shell_cmd")), &commands)
            .unwrap();
        assert_eq!(plans.get(&reference("p1")).unwrap().lines.len(), 1);
    }

    #[test]
    fn test_direct_self_reference_rejected() {
        let (plans, commands) = setup();
        plans.upsert(FlightPlan::new(reference("p1"), "Plan 1"));
        commands.upsert(Command::new(
            reference("run_p1"),
            "Run plan 1",
            CommandAction::Plan(reference("p1")),
        ));
        let err = plans
            .add_line(&reference("p1"), PlanLine::new(reference("run_p1")), &commands)
            .unwrap_err();
        assert!(matches!(err, Error::Recursion { .. }));
    }

    #[test]
    fn test_indirect_cycle_rejected() {
        let (plans, commands) = setup();
        plans.upsert(FlightPlan::new(reference("p1"), "Plan 1"));
        plans.upsert(FlightPlan::new(reference("p2"), "Plan 2"));
        commands.upsert(Command::new(
            reference("run_p1"),
            "Run plan 1",
            CommandAction::Plan(reference("p1")),
        ));
        commands.upsert(Command::new(
            reference("run_p2"),
            "Run plan 2",
            CommandAction::Plan(reference("p2")),
        ));
        // p2 runs p1; then adding "run p2" to p1 closes the loop.
        plans
            .add_line(&reference("p2"), PlanLine::new(reference("run_p1")), &commands)
            .unwrap();
        let err = plans
            .add_line(&reference("p1"), PlanLine::new(reference("run_p2")), &commands)
            .unwrap_err();
        assert!(matches!(err, Error::Recursion { .. }));
    }

    #[test]
    fn test_nested_without_cycle_allowed() {
        let (plans, commands) = setup();
        plans.upsert(FlightPlan::new(reference("p1"), "Plan 1"));
        plans.upsert(FlightPlan::new(reference("p2"), "Plan 2"));
        commands.upsert(Command::new(
            reference("run_p2"),
            "Run plan 2",
            CommandAction::Plan(reference("p2")),
        ));
        plans
            .add_line(&reference("p1"), PlanLine::new(reference("run_p2")), &commands)
            .unwrap();
        assert_eq!(plans.get(&reference("p1")).unwrap().lines.len(), 1);
    }
}
