use clap::{Args, Subcommand};
use serde::Serialize;

use docship::config::DocshipConfig;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Display the effective configuration (defaults + file + environment)
    Show,
    /// Write a default docship.toml at the project root
    Init,
}

#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<DocshipConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    exists: bool,
}

pub fn run(args: ConfigArgs, global: &GlobalArgs) -> CmdResult<ConfigOutput> {
    match args.command {
        ConfigCommand::Show => show(global),
        ConfigCommand::Init => init(global),
    }
}

fn show(global: &GlobalArgs) -> CmdResult<ConfigOutput> {
    let project = global.project()?;
    Ok((
        ConfigOutput {
            command: "config.show",
            exists: project.config_path.is_some(),
            path: project
                .config_path
                .map(|p| p.to_string_lossy().to_string()),
            config: Some(project.config),
        },
        0,
    ))
}

fn init(global: &GlobalArgs) -> CmdResult<ConfigOutput> {
    let root = global.project_root()?;
    let path = docship::config::init(&root)?;
    docship::log_status!("config", "Wrote {}", path.display());
    Ok((
        ConfigOutput {
            command: "config.init",
            config: None,
            path: Some(path.to_string_lossy().to_string()),
            exists: true,
        },
        0,
    ))
}
