//! Embedded script execution for interpreted-code commands.
//!
//! Script commands run inside the engine process in a sandboxed Rhai
//! interpreter, not over the transport. The script sees the host's variable
//! values and identity bindings as scope constants and reports its result by
//! assigning a `#{exit_code: int, message: text}` map to `COMMAND_RESULT`.

use rhai::{Dynamic, Engine as RhaiEngine, Scope};
use tracing::debug;

use crate::host::Host;
use crate::status::{self, CommandOutcome};
use crate::vars::VariableStore;

/// Well-known variable a script assigns its result to.
pub const COMMAND_RESULT: &str = "COMMAND_RESULT";

fn build_engine() -> RhaiEngine {
    let mut engine = RhaiEngine::new();
    engine.set_max_expr_depths(64, 64);
    engine.set_max_operations(1_000_000);
    engine
}

/// Run script code for a host and convert the outcome.
///
/// A script that never assigns `COMMAND_RESULT` succeeds with no response.
/// Parse and runtime errors map to the script error sentinel.
pub fn run_script(code: &str, host: &Host, variables: &VariableStore) -> CommandOutcome {
    let engine = build_engine();
    let mut scope = Scope::new();
    for (name, value) in variables.all_for_host(&host.reference) {
        scope.push_constant_dynamic(name, value.into());
    }
    for (name, value) in host.identity_bindings() {
        scope.push_constant_dynamic(format!("host_{name}"), value.into());
    }
    scope.push_dynamic(COMMAND_RESULT, Dynamic::UNIT);

    if let Err(err) = engine.run_with_scope(&mut scope, code) {
        debug!(host = %host.reference, error = %err, "script evaluation failed");
        return CommandOutcome::failed(status::SCRIPT_COMMAND_ERROR, err.to_string());
    }

    let result = scope
        .get_value::<Dynamic>(COMMAND_RESULT)
        .unwrap_or(Dynamic::UNIT);
    if result.is_unit() {
        return CommandOutcome::ok(None);
    }
    match result.try_cast::<rhai::Map>() {
        Some(map) => {
            let exit_code = map
                .get("exit_code")
                .and_then(|v| v.as_int().ok())
                .unwrap_or(0) as i32;
            let message = map
                .get("message")
                .map(|v| v.to_string())
                .filter(|m| !m.is_empty());
            if exit_code == 0 {
                CommandOutcome::ok(message)
            } else {
                CommandOutcome::failed(exit_code, message.unwrap_or_default())
            }
        }
        None => CommandOutcome::failed(
            status::SCRIPT_COMMAND_ERROR,
            format!("{COMMAND_RESULT} must be a map with exit_code and message"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;

    fn host() -> Host {
        let mut h = Host::new(Reference::new("h1").unwrap(), "Host One");
        h.ipv4_address = Some("10.0.0.1".into());
        h.ssh_username = "doge".into();
        h
    }

    #[test]
    fn test_script_success_with_result() {
        let vars = VariableStore::new();
        let outcome = run_script(
            r#"COMMAND_RESULT = #{exit_code: 0, message: "done"};"#,
            &host(),
            &vars,
        );
        assert_eq!(outcome.status, 0);
        assert_eq!(outcome.response.as_deref(), Some("done"));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_script_failure_result() {
        let vars = VariableStore::new();
        let outcome = run_script(
            r#"COMMAND_RESULT = #{exit_code: 3, message: "bad state"};"#,
            &host(),
            &vars,
        );
        assert_eq!(outcome.status, 3);
        assert_eq!(outcome.error.as_deref(), Some("bad state"));
    }

    #[test]
    fn test_script_sees_variables() {
        let vars = VariableStore::new();
        let h = host();
        vars.assign(&h.reference, "version", "1.10");
        let outcome = run_script(
            r#"COMMAND_RESULT = #{exit_code: 0, message: "v" + version + " on " + host_name};"#,
            &h,
            &vars,
        );
        assert_eq!(outcome.response.as_deref(), Some("v1.10 on Host One"));
    }

    #[test]
    fn test_syntax_error_maps_to_sentinel() {
        let vars = VariableStore::new();
        let outcome = run_script("let x = ;", &host(), &vars);
        assert_eq!(outcome.status, status::SCRIPT_COMMAND_ERROR);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_no_result_is_success() {
        let vars = VariableStore::new();
        let outcome = run_script("let x = 1 + 1;", &host(), &vars);
        assert_eq!(outcome.status, 0);
        assert!(outcome.response.is_none());
    }
}
