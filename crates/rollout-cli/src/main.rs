mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rollout",
    about = "Build staged deployment plans and dispatch them across a server fleet",
    version,
    propagate_version = true
)]
struct Cli {
    /// Fleet description (servers, existing deployments, dispatch tuning)
    #[arg(long, global = true, env = "ROLLOUT_FLEET")]
    fleet: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log dispatch progress (overridden by RUST_LOG)
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a plan file without dispatching it and show its sets
    Validate {
        /// Plan file (YAML list of directives)
        plan: PathBuf,
    },

    /// Build a plan file, dispatch it to the fleet and report every outcome
    Run {
        /// Plan file (YAML list of directives)
        plan: PathBuf,

        /// Per-apply timeout in milliseconds, overriding the fleet file
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List the fleet's servers by group
    Fleet,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = cmd::load_fleet(cli.fleet.as_deref()).and_then(|fleet| match cli.command {
        Commands::Validate { plan } => cmd::validate::run(&fleet, &plan, cli.json),
        Commands::Run { plan, timeout_ms } => cmd::run::run(fleet, &plan, timeout_ms, cli.json),
        Commands::Fleet => cmd::fleet::run(&fleet, cli.json),
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
