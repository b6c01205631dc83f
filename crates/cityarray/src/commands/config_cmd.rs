//! Config subcommand handlers.

use cityarray_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global.config.clone().unwrap_or_else(config::config_path);

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config_from(Some(&path))?;
            // Surface schedule and template mistakes here rather than at serve time
            cfg.schedule_entries()?;
            cfg.blackouts()?;
            print!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            config::save_config(&Config::example(), &path)?;
            eprintln!("Wrote starter config to {}", path.display());
            Ok(())
        }
    }
}
