//! Secret handling: placeholder resolution and spoiler redaction.
//!
//! Command code may embed `#!secret.NAME!#` placeholders. Before execution
//! they are substituted with the actual secret values; any text that is
//! persisted or displayed afterwards has those values replaced with a fixed
//! spoiler token. Raw secret values only ever travel to the transport.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Token substituted for secret values in persisted or displayed text.
pub const SECRET_VALUE_SPOILER: &str = "[REDACTED]";

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"#!secret\.([A-Za-z0-9_][A-Za-z0-9_\-.]*)!#").expect("valid regex")
    })
}

/// A string wrapper that prevents the value from being logged.
///
/// `Display` and `Debug` print the spoiler token; use [`expose`] to access
/// the underlying value when handing it to the transport.
///
/// [`expose`]: SensitiveString::expose
#[derive(Clone)]
pub struct SensitiveString {
    value: String,
}

impl SensitiveString {
    /// Create a new sensitive string.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Expose the underlying value.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Consume and return the underlying value.
    pub fn into_inner(self) -> String {
        self.value
    }

    /// Check if the value is empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SECRET_VALUE_SPOILER)
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveString({})", SECRET_VALUE_SPOILER)
    }
}

impl From<String> for SensitiveString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SensitiveString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq for SensitiveString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for SensitiveString {}

/// Source of secret values, keyed by placeholder reference.
///
/// The actual secret storage is an external collaborator; the engine only
/// needs lookup.
pub trait SecretStore: Send + Sync {
    /// Resolve a placeholder reference to its secret value, if known.
    fn resolve(&self, reference: &str) -> Option<SensitiveString>;
}

/// Simple in-memory secret store, used as the default and in tests.
#[derive(Default)]
pub struct InMemorySecretStore {
    values: RwLock<HashMap<String, SensitiveString>>,
}

impl InMemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a secret value.
    pub fn insert(&self, reference: impl Into<String>, value: impl Into<SensitiveString>) {
        self.values.write().insert(reference.into(), value.into());
    }
}

impl SecretStore for InMemorySecretStore {
    fn resolve(&self, reference: &str) -> Option<SensitiveString> {
        self.values.read().get(reference).cloned()
    }
}

/// Command code with its placeholders substituted, plus the secret values
/// that were used. The values travel with the code so the caller can redact
/// any output before persisting it; nothing is mutated in place.
#[derive(Debug, Clone)]
pub struct ResolvedCode {
    /// Code with placeholders replaced by actual secret values.
    pub code: String,
    /// Secret values substituted into the code, for later redaction.
    pub secrets_used: Vec<String>,
}

/// Extract all placeholder references from `text`, preserving first-seen
/// order and dropping duplicates.
pub fn extract_placeholders(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in placeholder_regex().captures_iter(text) {
        let name = caps[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Substitute each known placeholder in `text` with its secret value.
///
/// Unknown placeholders are left untouched so that partially configured
/// setups keep working. In script mode the substituted value is quoted as a
/// string literal so the surrounding script stays parseable.
pub fn resolve_placeholders(
    text: &str,
    store: &Arc<dyn SecretStore>,
    script_mode: bool,
) -> ResolvedCode {
    let mut secrets_used = Vec::new();
    let code = placeholder_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            match store.resolve(&caps[1]) {
                Some(secret) => {
                    let raw = secret.expose().to_string();
                    let rendered = if script_mode {
                        serde_json::to_string(&raw).unwrap_or_else(|_| raw.clone())
                    } else {
                        raw.clone()
                    };
                    if !secrets_used.contains(&raw) {
                        secrets_used.push(raw);
                    }
                    rendered
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned();
    ResolvedCode { code, secrets_used }
}

/// Replace every occurrence of any value in `secret_values` within `text`
/// with the spoiler token.
pub fn redact(text: &str, secret_values: &[String]) -> String {
    let mut result = text.to_string();
    for value in secret_values {
        if !value.is_empty() && result.contains(value.as_str()) {
            result = result.replace(value.as_str(), SECRET_VALUE_SPOILER);
        }
    }
    result
}

/// Redact an optional text field in place, returning `None` unchanged.
pub fn redact_opt(text: Option<String>, secret_values: &[String]) -> Option<String> {
    text.map(|t| redact(&t, secret_values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(entries: &[(&str, &str)]) -> Arc<dyn SecretStore> {
        let store = InMemorySecretStore::new();
        for (k, v) in entries {
            store.insert(*k, *v);
        }
        Arc::new(store)
    }

    #[test]
    fn test_extract_placeholders() {
        let code = "mkdir #!secret.FOLDER!# && echo #!secret.FOLDER!# #!secret.TOKEN!#";
        assert_eq!(extract_placeholders(code), vec!["FOLDER", "TOKEN"]);
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let store = store_with(&[("FOLDER", "much_secret")]);
        let resolved =
            resolve_placeholders("mkdir #!secret.FOLDER!# #!secret.MISSING!#", &store, false);
        assert_eq!(resolved.code, "mkdir much_secret #!secret.MISSING!#");
        assert_eq!(resolved.secrets_used, vec!["much_secret"]);
    }

    #[test]
    fn test_resolve_script_mode_quotes() {
        let store = store_with(&[("TOKEN", "top secret")]);
        let resolved = resolve_placeholders("let t = #!secret.TOKEN!#;", &store, true);
        assert_eq!(resolved.code, "let t = \"top secret\";");
        assert_eq!(resolved.secrets_used, vec!["top secret"]);
    }

    #[test]
    fn test_redact_replaces_all_occurrences() {
        let redacted = redact(
            "Doge like SSH much_secret and again much_secret",
            &["much_secret".to_string()],
        );
        assert!(!redacted.contains("much_secret"));
        assert_eq!(redacted.matches(SECRET_VALUE_SPOILER).count(), 2);
    }

    #[test]
    fn test_sensitive_string_never_displays_value() {
        let secret = SensitiveString::new("hunter2");
        assert_eq!(format!("{}", secret), SECRET_VALUE_SPOILER);
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }
}
