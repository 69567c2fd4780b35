use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;

use commands::{artifacts, build, config, on, plan, prepare, run};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "docship")]
#[command(version = VERSION)]
#[command(about = "Build project documentation and publish it as an artifact or a git commit")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Configuration file (defaults to <root>/docship.toml)
    #[arg(long, global = true, value_name = "FILE", env = "DOCSHIP_CONFIG")]
    config: Option<PathBuf>,

    /// Print debug diagnostics to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a documentation pipeline
    Run(run::RunArgs),
    /// Run the pipelines an event triggers
    On(on::OnArgs),
    /// Show a pipeline's steps and whether their tools are available
    Plan(plan::PlanArgs),
    /// Prepare the documentation environment only
    Prepare(prepare::PrepareArgs),
    /// Prepare and build the documentation without publishing
    Build(build::BuildArgs),
    /// Inspect stored artifacts
    Artifacts(artifacts::ArtifactsArgs),
    /// Show or create docship.toml
    Config(config::ConfigArgs),
}

/// Diagnostics go to stderr; stdout is reserved for the JSON envelope.
fn init_tracing(verbose: bool) {
    let level = if verbose { "docship=debug" } else { "off" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("DOCSHIP_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let global = GlobalArgs {
        root: cli.root,
        config: cli.config,
    };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(err) = output::print_json_result(json_result, exit_code) {
        eprintln!("docship: {}", err.message);
        return std::process::ExitCode::from(exit_code_to_u8(err.code.exit_code()));
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
