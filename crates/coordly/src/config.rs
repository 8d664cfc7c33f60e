//! CLI-side configuration glue: config path selection and flag overrides
//! on top of `coordly_config`.
//!
//! Core never sees these types -- it receives a pre-built `CoordinatorConfig`.

use std::path::PathBuf;

use secrecy::SecretString;

use coordly_config::{
    Config, ConfigError, ResolvedSource, Source, load_config_from, source_to_coordinator_config,
};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;

/// Source name used when watching a bare URL.
const ADHOC_SOURCE: &str = "adhoc";

/// The config file this invocation reads and writes.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(coordly_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(load_config_from(&config_path(global))?)
}

/// Resolve what `watch` polls: a URL argument wins over the configured
/// source, and flags override whatever the source specifies.
pub fn resolve_watch_target(args: &WatchArgs, global: &GlobalOpts) -> Result<ResolvedSource, CliError> {
    let cfg = load_config(global)?;

    let mut resolved = if let Some(ref url) = args.url {
        let name = global.source.as_deref().unwrap_or(ADHOC_SOURCE);
        source_to_coordinator_config(&Source::new(url.clone()), name, &cfg.defaults)?
    } else {
        if cfg.sources.is_empty() {
            return Err(no_source(global));
        }
        let (name, source) = cfg.source(global.source.as_deref()).map_err(|err| match err {
            ConfigError::UnknownSource { name } => CliError::SourceNotFound {
                name,
                available: cfg.sources.keys().cloned().collect::<Vec<_>>().join(", "),
            },
            other => other.into(),
        })?;
        source_to_coordinator_config(source, name, &cfg.defaults)?
    };

    apply_overrides(&mut resolved, args)?;
    Ok(resolved)
}

fn apply_overrides(resolved: &mut ResolvedSource, args: &WatchArgs) -> Result<(), CliError> {
    if let Some(interval) = args.interval {
        resolved.coordinator.update_interval = (!interval.is_zero()).then_some(interval);
    }
    if let Some(timeout) = args.timeout {
        if timeout.is_zero() {
            return Err(CliError::Validation {
                field: "timeout".into(),
                reason: "must be greater than zero".into(),
            });
        }
        resolved.coordinator.request_timeout = Some(timeout);
    }
    if let Some(ref token) = args.token {
        resolved.token = Some(SecretString::from(token.clone()));
    }
    if args.skip_unchanged {
        resolved.skip_unchanged = true;
    }
    Ok(())
}

fn no_source(global: &GlobalOpts) -> CliError {
    CliError::NoSource {
        path: config_path(global).display().to_string(),
    }
}
