//! Template rendering for command code, paths and file templates.
//!
//! Uses Jinja2-style templating via minijinja. Undefined variables render as
//! empty text instead of raising, so partially configured hosts can still run
//! the commands that do not depend on the missing values.

use minijinja::{Environment, UndefinedBehavior, Value};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::vars::VariableStore;
use indexmap::IndexMap;

fn variable_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)(?:\.[A-Za-z0-9_]+)*\s*\}\}")
            .expect("valid regex")
    })
}

/// Top-level variable names referenced by a piece of template text.
///
/// Dotted accesses count as their root name, so `{{ host.name }}` reports
/// `host`. Duplicates are dropped, first-seen order kept.
pub fn variables_from_code(code: &str) -> Vec<String> {
    let mut names = Vec::new();
    for caps in variable_regex().captures_iter(code) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Template renderer shared across the engine.
pub struct Renderer {
    env: Environment<'static>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        Self { env }
    }

    /// Render a template string against an already built context.
    pub fn render(&self, template: &str, context: &Value) -> Result<String> {
        self.env
            .render_str(template, context)
            .map_err(|e| Error::Template(e.to_string()))
    }

    /// Render template text for a host: stored variable values first, then
    /// the computed `host.*` identity bindings overlaid on top.
    pub fn render_for_host(
        &self,
        template: &str,
        host: &Host,
        variables: &VariableStore,
    ) -> Result<String> {
        if !has_template(template) {
            return Ok(template.to_string());
        }
        let context = build_context(host, variables);
        self.render(template, &context)
    }
}

/// Whether a string contains any template expression.
pub fn has_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%") || s.contains("{#")
}

/// Build the render context for a host.
///
/// Stored variables resolve first; the `host` namespace is overlaid on top
/// so identity fields always reflect the actual host record.
pub fn build_context(host: &Host, variables: &VariableStore) -> Value {
    let mut bag: IndexMap<String, Value> = variables
        .all_for_host(&host.reference)
        .into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect();
    let identity: IndexMap<String, Value> = host
        .identity_bindings()
        .into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect();
    bag.insert("host".to_string(), Value::from_iter(identity));
    Value::from_iter(bag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;

    fn host() -> Host {
        let mut h = Host::new(Reference::new("web_1").unwrap(), "Web 1");
        h.ipv4_address = Some("10.0.0.1".into());
        h.ssh_username = "doge".into();
        h
    }

    #[test]
    fn test_variables_from_code() {
        let code = "cd {{ dir }} && echo {{ host.name }} {{ dir }}";
        assert_eq!(variables_from_code(code), vec!["dir", "host"]);
    }

    #[test]
    fn test_render_with_stored_and_identity() {
        let renderer = Renderer::new();
        let vars = VariableStore::new();
        let h = host();
        vars.assign(&h.reference, "dir", "/opt/app");
        let out = renderer
            .render_for_host("cd {{ dir }} # {{ host.username }}@{{ host.ipv4 }}", &h, &vars)
            .unwrap();
        assert_eq!(out, "cd /opt/app # doge@10.0.0.1");
    }

    #[test]
    fn test_undefined_renders_empty() {
        let renderer = Renderer::new();
        let vars = VariableStore::new();
        let out = renderer
            .render_for_host("mkdir {{ nothing }}/x", &host(), &vars)
            .unwrap();
        assert_eq!(out, "mkdir /x");
    }

    #[test]
    fn test_plain_text_passes_through() {
        let renderer = Renderer::new();
        let vars = VariableStore::new();
        let out = renderer.render_for_host("uname -a", &host(), &vars).unwrap();
        assert_eq!(out, "uname -a");
    }
}
