//! Error types for driver loading and invocation.
//!
//! Schema and conformance problems are never raised: they come back as report
//! values so every violation can be shown at once.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Failures of the loading boundary itself (spawning, talking to a module).
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("I/O error talking to driver module `{module}`: {source}")]
    Io {
        module: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("driver module `{module}` broke protocol: {message}")]
    Protocol { module: String, message: String },

    #[error("driver module `{module}` failed to load: {message}")]
    Module { module: String, message: String },
}

/// Why a plugin directory could not produce a driver instance.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("{} not found", .path.display())]
    ManifestMissing { path: PathBuf },

    #[error("{} invalid: {message}", .path.display())]
    ManifestInvalid { path: PathBuf, message: String },

    #[error("{0}")]
    EntrypointMalformed(#[from] plinth_plugin_sdk::manifest::MalformedEntrypoint),

    #[error("Driver file missing: {}", .path.display())]
    DriverFileMissing { path: PathBuf },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Class '{class}' not found in {file}")]
    DriverClassMissing { class: String, file: String },

    #[error("failed to construct driver class '{class}': {message}")]
    DriverConstructionFailed { class: String, message: String },
}

/// Why a driver method could not be exercised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    #[error("Driver missing method {method}")]
    MethodMissing { method: String },

    #[error("Could not call {method} with standard signatures: {last_mismatch}")]
    InvocationUnsupported {
        method: String,
        last_mismatch: String,
    },

    #[error("{0}")]
    Action(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_missing_piece() {
        let err = LoadError::DriverClassMissing {
            class: "Driver".into(),
            file: "driver.py".into(),
        };
        assert_eq!(err.to_string(), "Class 'Driver' not found in driver.py");

        let err = InvokeError::MethodMissing {
            method: "power_cycle".into(),
        };
        assert_eq!(err.to_string(), "Driver missing method power_cycle");
    }

    #[test]
    fn malformed_entrypoint_converts() {
        let err: LoadError = "driver"
            .parse::<plinth_plugin_sdk::Entrypoint>()
            .unwrap_err()
            .into();
        assert!(matches!(err, LoadError::EntrypointMalformed(_)));
    }
}
