//! `tandem config`: inspect the deployment configuration.

use std::process::ExitCode;

use anyhow::Result;
use clap::Subcommand;

use crate::app::AppContext;
use crate::application::ports::ConfigStore;

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Parse and validate the configuration file, then print it
    Validate,
}

/// Run the config command.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn run(app: &AppContext, cmd: ConfigCommand) -> Result<ExitCode> {
    match cmd {
        ConfigCommand::Validate => validate(app),
    }
}

fn validate(app: &AppContext) -> Result<ExitCode> {
    let store = app.config_store();
    let config = store.load()?;
    let path = store.path().display().to_string();
    tracing::debug!(%path, environments = config.environments.len(), "configuration valid");
    app.renderer().render_config(&config, &path)?;
    Ok(ExitCode::SUCCESS)
}
