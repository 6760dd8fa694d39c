mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stagecraft",
    about = "Build minimal, non-root runtime images through isolated build stages"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add stagecraft.toml and .stagecraftignore to an existing project
    Init,
    /// Show the stages that would run, without running them
    Plan {
        /// Print the pipeline as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the pipeline and export the runtime image
    Build {
        /// Execute every stage, ignoring cached results
        #[arg(long)]
        no_cache: bool,
    },
    /// Print the equivalent multi-stage Dockerfile
    Dockerfile,
    /// Eject the Dockerfile to .stagecraft/Dockerfile for manual customization
    Eject,
    /// Check project layout and required tools
    Doctor,
    /// Remove stage roots, exported image, and cache
    Clean,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                // arch-lint: allow(no-silent-result-drop) reason="an unset or unparsable RUST_LOG falls back to the default info filter"
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::init_project().await?,
        Commands::Plan { json } => commands::plan(json).await?,
        Commands::Build { no_cache } => commands::build(no_cache).await?,
        Commands::Dockerfile => commands::dockerfile().await?,
        Commands::Eject => commands::eject().await?,
        Commands::Doctor => commands::doctor().await?,
        Commands::Clean => commands::clean().await?,
    }

    Ok(())
}
