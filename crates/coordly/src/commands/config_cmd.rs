//! Config subcommand handlers.

use coordly_config::{Config, ConfigError, Source, save_config_to, source_to_coordinator_config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;

const REDACTED: &str = "<redacted>";

// ── Helpers ─────────────────────────────────────────────────────────

fn save(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::config_path(global);
    save_config_to(cfg, &path)?;
    eprintln!("✓ Config written to {}", path.display());
    Ok(())
}

/// Copy of `cfg` with plaintext tokens masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for source in cfg.sources.values_mut() {
        if source.token.is_some() {
            source.token = Some(REDACTED.into());
        }
    }
    cfg
}

fn source_not_found(name: String, cfg: &Config) -> CliError {
    CliError::SourceNotFound {
        name,
        available: cfg.sources.keys().cloned().collect::<Vec<_>>().join(", "),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::config_path(global).display());
        }

        ConfigCommand::Show => {
            let cfg = config::load_config(global)?;
            let toml_str = toml::to_string_pretty(&redacted(&cfg)).map_err(ConfigError::from)?;
            print!("{toml_str}");
        }

        ConfigCommand::Init {
            url,
            name,
            interval,
            token_env,
            force,
        } => {
            let mut cfg = config::load_config(global)?;
            if cfg.sources.contains_key(&name) && !force {
                return Err(CliError::SourceExists { name });
            }

            let source = Source {
                interval,
                token_env,
                ..Source::new(url)
            };
            // Reject what `watch` would reject before writing it.
            source_to_coordinator_config(&source, &name, &cfg.defaults)?;

            cfg.sources.insert(name.clone(), source);
            let default_is_valid = cfg
                .default_source
                .as_ref()
                .is_some_and(|current| cfg.sources.contains_key(current));
            if !default_is_valid {
                cfg.default_source = Some(name);
            }
            save(&cfg, global)?;
        }

        ConfigCommand::Sources => {
            let cfg = config::load_config(global)?;
            if cfg.sources.is_empty() {
                eprintln!("No sources configured. Create one with: coordly config init --url <URL>");
            }
            for (name, source) in &cfg.sources {
                let marker = if cfg.default_source.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {name}\t{}", source.url);
            }
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config(global)?;
            if !cfg.sources.contains_key(&name) {
                return Err(source_not_found(name, &cfg));
            }
            cfg.default_source = Some(name);
            save(&cfg, global)?;
        }
    }
    Ok(())
}
