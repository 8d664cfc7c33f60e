//! CLI error types with miette diagnostics.
//!
//! Maps coordinator and config errors into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use coordly_config::ConfigError;
use coordly_core::{ErrorKind, FetchError, SetupError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Source ───────────────────────────────────────────────────────
    #[error("Source '{name}' is not ready")]
    #[diagnostic(
        code(coordly::not_ready),
        help("Check that the endpoint is reachable, or raise --timeout.")
    )]
    NotReady {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error("Authentication failed for '{name}': {reason}")]
    #[diagnostic(
        code(coordly::auth_failed),
        help("Pass a valid bearer token with --token or set token_env in the source.")
    )]
    AuthFailed { name: String, reason: String },

    #[error("Source '{name}' shut down before its first update")]
    #[diagnostic(code(coordly::shut_down))]
    ShutDown { name: String },

    #[error("Unexpected response from '{name}'")]
    #[diagnostic(
        code(coordly::bad_response),
        help("The endpoint must answer with a JSON document.")
    )]
    BadResponse {
        name: String,
        #[source]
        source: FetchError,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No source configured")]
    #[diagnostic(
        code(coordly::no_source),
        help(
            "Pass a URL: coordly watch https://host/status\n\
             Or create a source with: coordly config init --url <URL>\n\
             Expected config at: {path}"
        )
    )]
    NoSource { path: String },

    #[error("Source '{name}' not found in configuration")]
    #[diagnostic(
        code(coordly::source_not_found),
        help("Available sources: {available}\nList them with: coordly config sources")
    )]
    SourceNotFound { name: String, available: String },

    #[error("Source '{name}' already exists")]
    #[diagnostic(code(coordly::conflict), help("Use --force to replace it."))]
    SourceExists { name: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(coordly::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(coordly::config))]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error("Failed to build HTTP client: {0}")]
    #[diagnostic(code(coordly::http_client))]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(coordly::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotReady { .. } => exit_code::CONNECTION,
            Self::SourceNotFound { .. } => exit_code::NOT_FOUND,
            Self::NoSource { .. } | Self::Validation { .. } | Self::SourceExists { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── Core / config error mapping ──────────────────────────────────────

impl From<SetupError> for CliError {
    fn from(err: SetupError) -> Self {
        match err {
            SetupError::AuthFailed { name, reason } => Self::AuthFailed { name, reason },
            SetupError::ShutDown { name } => Self::ShutDown { name },
            SetupError::NotReady { name, source } if source.kind() == ErrorKind::Unknown => {
                Self::BadResponse { name, source }
            }
            SetupError::NotReady { name, source } => Self::NotReady { name, source },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownSource { name } => Self::SourceNotFound {
                name,
                available: String::new(),
            },
            other => Self::Config(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_map_to_exit_codes() {
        let auth: CliError = SetupError::AuthFailed {
            name: "meter".into(),
            reason: "HTTP 401".into(),
        }
        .into();
        assert_eq!(auth.exit_code(), exit_code::AUTH);

        let offline: CliError = SetupError::NotReady {
            name: "meter".into(),
            source: FetchError::unavailable("connection refused"),
        }
        .into();
        assert_eq!(offline.exit_code(), exit_code::CONNECTION);

        let garbage: CliError = SetupError::NotReady {
            name: "meter".into(),
            source: FetchError::unknown("expected value at line 1"),
        }
        .into();
        assert!(matches!(garbage, CliError::BadResponse { .. }));
        assert_eq!(garbage.exit_code(), exit_code::GENERAL);
    }
}
