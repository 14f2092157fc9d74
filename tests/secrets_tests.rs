//! Secret handling through the full execution path: substitution before
//! the transport, redaction everywhere else.

mod common;

use std::sync::Arc;

use common::*;
use flightdeck::prelude::*;
use flightdeck::secrets::{InMemorySecretStore, SECRET_VALUE_SPOILER};
use flightdeck::transport::ExecOutput;
use pretty_assertions::assert_eq;

fn engine_with_secret(name: &str, value: &str) -> (Engine, Arc<FakeTransport>) {
    let transport = Arc::new(FakeTransport::new());
    let factory = Arc::new(FakeTransportFactory::new(transport.clone()));
    let secrets = InMemorySecretStore::new();
    secrets.insert(name, value);
    let engine = Engine::builder()
        .transport_factory(factory)
        .secret_store(Arc::new(secrets))
        .build();
    engine.inventory.upsert(test_host("h1"));
    (engine, transport)
}

#[tokio::test]
async fn transport_sees_raw_value_log_sees_spoiler() {
    let (engine, transport) = engine_with_secret("FOLDER", "much_secret");
    engine
        .commands
        .upsert(shell_command("c", "mkdir #!secret.FOLDER!#"));

    engine
        .execute_command(&reference("h1"), &reference("c"), ExecOptions::default())
        .await
        .unwrap();

    // The transport received the actual value.
    assert_eq!(
        transport.executed_commands(),
        vec!["mkdir much_secret".to_string()]
    );
    // The log never contains it.
    let logs = engine.logs.command_logs_for_host(&reference("h1"));
    let code = logs[0].code.as_deref().unwrap();
    assert!(!code.contains("much_secret"));
    assert_eq!(code, format!("mkdir {SECRET_VALUE_SPOILER}"));
}

#[tokio::test]
async fn response_and_error_are_redacted() {
    let (engine, transport) = engine_with_secret("TOKEN", "hunter2");
    transport.stub(
        "login",
        ExecOutput {
            status: 1,
            stdout: vec!["token hunter2 accepted".into()],
            stderr: vec!["hunter2 expired".into()],
        },
    );
    engine
        .commands
        .upsert(shell_command("c", "login #!secret.TOKEN!#"));

    let outcome = engine
        .execute_command(&reference("h1"), &reference("c"), ExecOptions::default())
        .await
        .unwrap();

    assert!(!outcome.response.as_deref().unwrap().contains("hunter2"));
    assert!(!outcome.error.as_deref().unwrap().contains("hunter2"));
    let logs = engine.logs.command_logs_for_host(&reference("h1"));
    assert!(!logs[0].response.as_deref().unwrap().contains("hunter2"));
    assert!(!logs[0].error.as_deref().unwrap().contains("hunter2"));
    assert!(logs[0]
        .response
        .as_deref()
        .unwrap()
        .contains(SECRET_VALUE_SPOILER));
}

#[tokio::test]
async fn unknown_placeholder_passes_through() {
    let (engine, transport) = engine_with_secret("KNOWN", "value");
    engine
        .commands
        .upsert(shell_command("c", "echo #!secret.UNKNOWN!#"));
    engine
        .execute_command(&reference("h1"), &reference("c"), ExecOptions::default())
        .await
        .unwrap();
    assert_eq!(
        transport.executed_commands(),
        vec!["echo #!secret.UNKNOWN!#".to_string()]
    );
}

#[tokio::test]
async fn script_secret_is_quoted_and_redacted() {
    let (engine, _transport) = engine_with_secret("API_KEY", "top secret");
    engine.commands.upsert(
        Command::new(reference("s"), "Script", CommandAction::Script).with_code(
            r#"COMMAND_RESULT = #{exit_code: 0, message: "key is " + #!secret.API_KEY!#};"#,
        ),
    );

    let outcome = engine
        .execute_command(&reference("h1"), &reference("s"), ExecOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, 0);
    // The script saw the raw value, the surfaced response does not.
    assert_eq!(
        outcome.response.as_deref(),
        Some(format!("key is {SECRET_VALUE_SPOILER}").as_str())
    );
    let logs = engine.logs.command_logs_for_host(&reference("h1"));
    assert!(!logs[0].code.as_deref().unwrap().contains("top secret"));
}

#[tokio::test]
async fn template_variables_render_before_secret_resolution() {
    let (engine, transport) = engine_with_secret("PASS", "s3cret");
    engine.variables.assign_global("user", "admin");
    engine
        .commands
        .upsert(shell_command("c", "login {{ user }} #!secret.PASS!#"));
    engine
        .execute_command(&reference("h1"), &reference("c"), ExecOptions::default())
        .await
        .unwrap();
    assert_eq!(
        transport.executed_commands(),
        vec!["login admin s3cret".to_string()]
    );
}
