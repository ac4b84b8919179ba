//! Command dispatch: bridges CLI args -> provider operations -> output formatting.

pub mod data;
pub mod init;
pub mod schema;

use strata_config::Config;
use strata_core::Provider;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Load the configuration the data commands run against.
///
/// A configuration without any schema key is treated as missing.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let cfg = strata_config::load_config(global.config.as_deref())?;
    if cfg.schema.is_empty() {
        let path = global
            .config
            .clone()
            .unwrap_or_else(strata_config::config_path);
        return Err(CliError::NoConfig {
            path: path.display().to_string(),
        });
    }
    Ok(cfg)
}

fn provider(cfg: &Config) -> Result<Provider, CliError> {
    Ok(Provider::new(cfg.to_pipeline_config()?)?)
}

/// Dispatch a configuration-bound command to its handler.
pub async fn dispatch(cmd: Command, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Schema => schema::handle(cfg, global),
        Command::Fetch(args) => data::fetch(&provider(cfg)?, args, global).await,
        Command::Write(args) => data::write(&provider(cfg)?, args, global).await,
        Command::Deploy(args) => data::deploy(&provider(cfg)?, args, global).await,
        // Init and Completions are handled before dispatch
        Command::Init(_) | Command::Completions(_) => unreachable!(),
    }
}
