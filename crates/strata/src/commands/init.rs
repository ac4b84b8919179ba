//! `strata init`: write a starter configuration.

use strata_config::Config;

use crate::cli::{GlobalOpts, InitArgs};
use crate::error::CliError;

pub fn handle(args: &InitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(strata_config::config_path);

    if path.exists() && !args.force {
        return Err(CliError::ConfigExists {
            path: path.display().to_string(),
        });
    }

    strata_config::save_config(&Config::sample(), &path)?;
    if !global.quiet {
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}
