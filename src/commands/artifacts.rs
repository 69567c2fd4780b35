use clap::{Args, Subcommand};
use serde::Serialize;

use docship::artifact::{self, ArtifactRecord};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ArtifactsArgs {
    #[command(subcommand)]
    command: ArtifactsCommand,
}

#[derive(Subcommand)]
enum ArtifactsCommand {
    /// List stored artifacts, newest first
    List {
        /// Only artifacts with this name
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct ArtifactsOutput {
    command: &'static str,
    store: String,
    count: usize,
    artifacts: Vec<ArtifactRecord>,
}

pub fn run(args: ArtifactsArgs, global: &GlobalArgs) -> CmdResult<ArtifactsOutput> {
    match args.command {
        ArtifactsCommand::List { name } => list(global, name.as_deref()),
    }
}

fn list(global: &GlobalArgs, name: Option<&str>) -> CmdResult<ArtifactsOutput> {
    let project = global.project()?;
    let store = project.config.artifact_store_dir(&project.root);
    let artifacts = artifact::list(&store, name)?;
    Ok((
        ArtifactsOutput {
            command: "artifacts.list",
            store: store.to_string_lossy().to_string(),
            count: artifacts.len(),
            artifacts,
        },
        0,
    ))
}
