//! Commands, file templates and their registries.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::host::HostStatus;
use crate::reference::Reference;
use indexmap::IndexMap;

/// What a command does when executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    /// Run the rendered code over the transport shell.
    Shell,
    /// Evaluate the rendered code in the embedded script engine.
    Script,
    /// Push a file rendered from a template to the host.
    FileFromTemplate(Reference),
    /// Run another flight plan as a nested execution.
    Plan(Reference),
}

/// A reusable unit of work targeting a host.
#[derive(Debug, Clone)]
pub struct Command {
    pub reference: Reference,
    pub name: String,
    pub action: CommandAction,
    /// Template text for shell and script actions. Unused for file and plan
    /// actions.
    pub code: String,
    /// Default working directory, itself a template.
    pub path: Option<String>,
    /// Whether the same command may run concurrently on the same host.
    pub allow_parallel_run: bool,
    /// Host lifecycle status to set after a successful run.
    pub host_status: Option<HostStatus>,
}

impl Command {
    pub fn new(reference: Reference, name: impl Into<String>, action: CommandAction) -> Self {
        Self {
            reference,
            name: name.into(),
            action,
            code: String::new(),
            path: None,
            allow_parallel_run: false,
            host_status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Where a file template's content originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    /// Content rendered by the engine and uploaded to the host.
    Engine,
    /// Content pulled from the host.
    Host,
}

/// A template describing a file to materialize on a host.
#[derive(Debug, Clone)]
pub struct FileTemplate {
    pub reference: Reference,
    pub file_name: String,
    pub source: FileSource,
    /// Directory on the host, itself a template.
    pub server_dir: String,
    /// Template text for the file body.
    pub code: String,
}

/// Thread-safe command registry keyed by reference.
#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<IndexMap<Reference, Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, command: Command) {
        self.commands
            .write()
            .insert(command.reference.clone(), command);
    }

    pub fn get(&self, reference: &Reference) -> Result<Command> {
        self.commands
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::not_found("command", reference.as_str()))
    }
}

/// Thread-safe file template registry keyed by reference.
#[derive(Default)]
pub struct FileTemplateRegistry {
    templates: RwLock<IndexMap<Reference, FileTemplate>>,
}

impl FileTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, template: FileTemplate) {
        self.templates
            .write()
            .insert(template.reference.clone(), template);
    }

    pub fn get(&self, reference: &Reference) -> Result<FileTemplate> {
        self.templates
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::not_found("file template", reference.as_str()))
    }
}
