//! Shared configuration for coordly tools.
//!
//! TOML sources, token resolution (env + plaintext), and translation to
//! `coordly_core::CoordinatorConfig`. The CLI layers its flag overrides
//! on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use coordly_core::CoordinatorConfig;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no source named '{name}' in config")]
    UnknownSource { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Source used when none is named on the command line.
    pub default_source: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named data sources.
    #[serde(default)]
    pub sources: BTreeMap<String, Source>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_source: Some("default".into()),
            defaults: Defaults::default(),
            sources: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Look up a source by name, falling back to `default_source`.
    pub fn source(&self, name: Option<&str>) -> Result<(&str, &Source), ConfigError> {
        let name = name
            .or(self.default_source.as_deref())
            .ok_or_else(|| ConfigError::Validation {
                field: "default_source".into(),
                reason: "no source named and no default configured".into(),
            })?;
        self.sources
            .get_key_value(name)
            .map(|(key, source)| (key.as_str(), source))
            .ok_or_else(|| ConfigError::UnknownSource { name: name.into() })
    }
}

/// Values applied to every source that does not override them.
/// Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    /// Poll interval. `0` disables polling.
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Debounce window for requested refreshes.
    #[serde(default = "default_cooldown")]
    pub cooldown: u64,

    #[serde(default)]
    pub skip_unchanged: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timeout: default_timeout(),
            cooldown: default_cooldown(),
            skip_unchanged: false,
        }
    }
}

fn default_interval() -> u64 {
    30
}
fn default_timeout() -> u64 {
    10
}
fn default_cooldown() -> u64 {
    10
}

/// A named HTTP JSON source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Source {
    /// Endpoint returning a JSON document.
    pub url: String,

    /// Override poll interval (seconds, `0` = no polling).
    pub interval: Option<u64>,

    /// Override request timeout (seconds).
    pub timeout: Option<u64>,

    /// Bearer token (plaintext, prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable name containing the bearer token.
    pub token_env: Option<String>,

    /// Override debounce window (seconds).
    pub cooldown: Option<u64>,

    /// Override `skip_unchanged`.
    pub skip_unchanged: Option<bool>,
}

impl Source {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "coordly", "coordly").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("coordly");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load Config from `path` + environment.
///
/// Environment variables use the `COORDLY_` prefix with `__` between
/// nesting levels, e.g. `COORDLY_DEFAULTS__INTERVAL=5`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("COORDLY_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve a source's bearer token: `token_env` first, then plaintext.
/// `None` means the source is unauthenticated.
pub fn resolve_token(source: &Source) -> Option<SecretString> {
    resolve_token_with(source, |name| std::env::var(name).ok())
}

/// [`resolve_token`] with an injectable environment lookup.
pub fn resolve_token_with<F>(source: &Source, lookup: F) -> Option<SecretString>
where
    F: Fn(&str) -> Option<String>,
{
    // 1. Source's token_env → env var lookup
    if let Some(value) = source.token_env.as_deref().and_then(&lookup) {
        return Some(SecretString::from(value));
    }

    // 2. Plaintext in config
    source.token.clone().map(SecretString::from)
}

// ── Translation to core config ──────────────────────────────────────

/// Everything a tool needs to build a coordinator for one source.
#[derive(Debug)]
pub struct ResolvedSource {
    pub url: url::Url,
    pub token: Option<SecretString>,
    pub skip_unchanged: bool,
    pub coordinator: CoordinatorConfig,
}

/// Build a `CoordinatorConfig` for `source`, applying `defaults` where the
/// source is silent. CLI flags are applied later by the caller.
pub fn source_to_coordinator_config(
    source: &Source,
    name: &str,
    defaults: &Defaults,
) -> Result<ResolvedSource, ConfigError> {
    let url: url::Url = source.url.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", source.url),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("expected http or https, got '{}'", url.scheme()),
        });
    }

    let timeout = source.timeout.unwrap_or(defaults.timeout);
    if timeout == 0 {
        return Err(ConfigError::Validation {
            field: "timeout".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    let mut coordinator = CoordinatorConfig::new(name)
        .with_request_timeout(Duration::from_secs(timeout))
        .with_request_refresh_cooldown(Duration::from_secs(
            source.cooldown.unwrap_or(defaults.cooldown),
        ));
    match source.interval.unwrap_or(defaults.interval) {
        0 => {}
        secs => coordinator = coordinator.with_update_interval(Duration::from_secs(secs)),
    }

    Ok(ResolvedSource {
        url,
        token: resolve_token(source),
        skip_unchanged: source.skip_unchanged.unwrap_or(defaults.skip_unchanged),
        coordinator,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn token_env_wins_over_plaintext() {
        let source = Source {
            token: Some("from-file".into()),
            token_env: Some("METER_TOKEN".into()),
            ..Source::new("http://meter.local/status")
        };

        let token = resolve_token_with(&source, |name| {
            (name == "METER_TOKEN").then(|| "from-env".to_owned())
        });
        assert_eq!(token.unwrap().expose_secret(), "from-env");

        let token = resolve_token_with(&source, |_| None);
        assert_eq!(token.unwrap().expose_secret(), "from-file");
    }

    #[test]
    fn no_token_is_fine() {
        let source = Source::new("http://meter.local/status");
        assert!(resolve_token_with(&source, |_| None).is_none());
    }

    #[test]
    fn source_overrides_defaults() {
        let source = Source {
            interval: Some(5),
            skip_unchanged: Some(true),
            ..Source::new("https://meter.local/status")
        };

        let resolved = source_to_coordinator_config(&source, "meter", &Defaults::default()).unwrap();
        assert_eq!(resolved.coordinator.name, "meter");
        assert_eq!(resolved.coordinator.update_interval, Some(Duration::from_secs(5)));
        assert_eq!(resolved.coordinator.request_timeout, Some(Duration::from_secs(10)));
        assert_eq!(
            resolved.coordinator.request_refresh_cooldown,
            Duration::from_secs(10)
        );
        assert!(resolved.skip_unchanged);
    }

    #[test]
    fn zero_interval_means_push_only() {
        let defaults = Defaults {
            interval: 0,
            ..Defaults::default()
        };
        let resolved =
            source_to_coordinator_config(&Source::new("http://hub.local/"), "hub", &defaults).unwrap();
        assert_eq!(resolved.coordinator.update_interval, None);
    }

    #[test]
    fn rejects_bad_urls_and_timeouts() {
        let defaults = Defaults::default();

        let err = source_to_coordinator_config(&Source::new("not a url"), "x", &defaults).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "url"));

        let err =
            source_to_coordinator_config(&Source::new("ftp://hub.local/"), "x", &defaults).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "url"));

        let source = Source {
            timeout: Some(0),
            ..Source::new("http://hub.local/")
        };
        let err = source_to_coordinator_config(&source, "x", &defaults).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "timeout"));
    }

    #[test]
    fn source_lookup_falls_back_to_default() {
        let mut config = Config::default();
        config
            .sources
            .insert("default".into(), Source::new("http://hub.local/"));

        let (name, source) = config.source(None).unwrap();
        assert_eq!(name, "default");
        assert_eq!(source.url, "http://hub.local/");

        assert!(matches!(
            config.source(Some("missing")),
            Err(ConfigError::UnknownSource { .. })
        ));
    }
}
