//! Chartwise CLI — the main entry point.
//!
//! Commands:
//! - `init`    — Write a default config file
//! - `serve`   — Start the HTTP gateway
//! - `ask`     — Run one prompt locally and print the step stream
//! - `tools`   — Launch the configured tool servers and list capabilities
//! - `doctor`  — Diagnose configuration, credentials and tool servers

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chartwise",
    about = "Chartwise — streaming stock-analysis agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Run one prompt and print the step stream (Ctrl-C cancels)
    Ask {
        /// The question, e.g. "What is the trend for AAPL?"
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,

        /// Print raw NDJSON events instead of formatted lines
        #[arg(long)]
        ndjson: bool,
    },

    /// Launch the configured tool servers and list their capabilities
    Tools,

    /// Diagnose system health
    Doctor,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Serve { port, host } => commands::serve::run(port, host).await?,
        Commands::Ask { prompt, ndjson } => commands::ask::run(prompt.join(" "), ndjson).await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
