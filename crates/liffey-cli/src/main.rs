#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "liffey")]
#[command(author, version, about = "A dev-time ES module server", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve a source tree as on-demand ES modules
    Serve {
        /// Project root (defaults to the current directory)
        root: Option<PathBuf>,

        /// Port to listen on
        #[arg(long, default_value_t = 3000)]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Public base path
        #[arg(long)]
        base: Option<String>,

        /// Mode: development or production
        #[arg(long)]
        mode: Option<String>,

        /// Explicit config file path (overrides auto-discovery)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Serve {
            root,
            port,
            host,
            base,
            mode,
            config,
        } => {
            commands::serve::run(commands::serve::ServeAction {
                root: root.unwrap_or_else(|| PathBuf::from(".")),
                port,
                host,
                base,
                mode,
                config,
            })
            .await
        }
    }
}
