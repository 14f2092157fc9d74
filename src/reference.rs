//! Stable reference strings used as entity identity.
//!
//! Hosts, commands, plans and file templates are addressed by a
//! [`Reference`]: a lowercase slug that stays stable while display names
//! change. References are embedded by value in each entity.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A validated reference slug: lowercase ASCII letters, digits and
/// underscores, at least one character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    /// Validate and wrap an existing reference string.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidReference(value))
        }
    }

    /// Derive a reference from a display name: lowercased, runs of
    /// non-alphanumeric characters collapsed into single underscores.
    pub fn from_name(name: &str) -> Self {
        let mut slug = String::with_capacity(name.len());
        let mut last_was_sep = true;
        for ch in name.chars() {
            if ch.is_ascii_alphanumeric() {
                slug.push(ch.to_ascii_lowercase());
                last_was_sep = false;
            } else if !last_was_sep {
                slug.push('_');
                last_was_sep = true;
            }
        }
        while slug.ends_with('_') {
            slug.pop();
        }
        if slug.is_empty() {
            slug.push('x');
        }
        Self(slug)
    }

    /// `true` if `value` is a well-formed reference.
    pub fn is_valid(value: &str) -> bool {
        !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }

    /// The reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Reference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
