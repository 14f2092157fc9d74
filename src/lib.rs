//! # Flightdeck - Server Fleet Automation Engine
//!
//! Flightdeck manages remote servers over SSH: it renders and executes shell
//! commands and embedded scripts, materializes files from templates, and
//! orchestrates multi-step flight plans with status-driven branching across
//! heterogeneous hosts.
//!
//! ## Core Concepts
//!
//! - **Hosts**: connection parameters and lifecycle status of managed servers
//! - **Commands**: reusable templated units of work with an action kind
//!   (shell, script, file-from-template, nested plan)
//! - **Flight Plans**: ordered command sequences whose per-line action tables
//!   map exit statuses to transitions (next, exit, exit-with-custom-code)
//! - **Variables**: global and per-host values expanded into command code,
//!   paths and conditions via Jinja2-style templates
//! - **Secrets**: placeholder-referenced values substituted before execution
//!   and redacted from every persisted or displayed text
//! - **Logs**: command and plan execution records forming a navigable
//!   parent/child tree across nested plan invocations
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use flightdeck::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = Engine::builder().build();
//!     engine.inventory.upsert(host);
//!     engine.commands.upsert(command);
//!     let outcome = engine
//!         .execute_command(&host_ref, &command_ref, ExecOptions::default())
//!         .await?;
//!     println!("status {}", outcome.status);
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod log;
pub mod plan;
pub mod reference;
pub mod render;
pub mod runner;
pub mod script;
pub mod secrets;
pub mod status;
pub mod transport;
pub mod vars;

pub use engine::{Engine, EngineBuilder, TestConnectionOptions};
pub use error::{Error, Result};
pub use status::CommandOutcome;

/// Commonly used types.
pub mod prelude {
    pub use crate::command::{Command, CommandAction, FileSource, FileTemplate};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, EngineBuilder, TestConnectionOptions};
    pub use crate::error::{Error, Result};
    pub use crate::host::{AuthMode, Host, HostStatus, SudoMode};
    pub use crate::interpreter::PlanOptions;
    pub use crate::plan::{ActionKind, FlightPlan, PlanLine, PlanLineAction};
    pub use crate::reference::Reference;
    pub use crate::runner::{ExecOptions, SudoOverride};
    pub use crate::status::CommandOutcome;
    pub use crate::vars::VariableAssignment;
}
