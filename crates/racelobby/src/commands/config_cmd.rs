//! Config subcommand handlers.

use racelobby_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::commands::load_config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { force } => {
            let target = global
                .config
                .clone()
                .unwrap_or_else(racelobby_config::config_path);
            if target.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: target.display().to_string(),
                });
            }

            let path = match &global.config {
                Some(path) => {
                    racelobby_config::save_config_to(&Config::default(), path)?;
                    path.clone()
                }
                None => racelobby_config::save_config(&Config::default())?,
            };
            output::print_output(
                &format!("Config written to {}", path.display()),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Show => {
            let config = load_config(global)?;
            let out = output::render_single(
                global.output,
                &config,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("# {e}")),
                |c| c.lobby_url.clone(),
            )?;
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            let path = global
                .config
                .clone()
                .unwrap_or_else(racelobby_config::config_path);
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }
    }
}

