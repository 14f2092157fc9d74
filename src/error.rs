//! Error types for Flightdeck.
//!
//! Configuration defects (malformed keys, missing credentials, unknown
//! references, recursive plans) are raised as errors. Runtime command
//! failures are never raised from the execution paths; they surface as
//! structured status codes on command and plan results instead, so plan
//! interpretation can continue deterministically.

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for Flightdeck operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Flightdeck.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to connect to a host.
    #[error("SSH connection error for '{host}': {message}")]
    Connection {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// A private key could not be decoded in any supported format.
    #[error("Error loading a private key. Unsupported key format or incorrect key: {0}")]
    InvalidKey(String),

    /// Required credentials are missing from the host configuration.
    #[error("Missing credentials for '{host}': {message}")]
    MissingCredentials {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// A connection test failed and the caller asked for a raised error.
    #[error("Connection test failed. CODE: {status}. RESULT: {response}. ERROR: {message}")]
    ConnectionTest {
        /// Status code of the failing step
        status: i32,
        /// Response text of the failing step
        response: String,
        /// Error text
        message: String,
    },

    /// A plan line would make a plan invoke itself, directly or transitively.
    #[error("Recursion detected: plan '{plan}' would invoke itself via command '{command}'")]
    Recursion {
        /// Plan that would become cyclic
        plan: String,
        /// Offending command reference
        command: String,
    },

    /// Template rendering failed.
    #[error("Template rendering failed: {0}")]
    Template(String),

    /// A registry lookup failed.
    #[error("{kind} '{reference}' not found")]
    NotFound {
        /// Entity kind (host, command, plan, file template)
        kind: &'static str,
        /// Requested reference
        reference: String,
    },

    /// A reference string failed validation.
    #[error("Invalid reference: '{0}'")]
    InvalidReference(String),

    /// Configuration is invalid or incomplete.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Creates a new connection error.
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new not-found error.
    pub fn not_found(kind: &'static str, reference: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            reference: reference.into(),
        }
    }
}
