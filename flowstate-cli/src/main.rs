mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::handlers;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "flowstate")]
#[command(version)]
#[command(about = "Run and inspect state-machine workflows")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    /// Path to the engine configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow document to completion
    ///
    /// Loads the YAML document, registers its states and transitions, starts
    /// the requested number of runs at the document's initial state and
    /// prints one report per run.
    ///
    /// Examples:
    ///   flowstate run deploy.yaml
    ///   flowstate run deploy.yaml --runs 5 --priority high --stats
    ///   flowstate run deploy.yaml --meta env=staging --meta attempt=1 --format text
    Run {
        /// Workflow document (YAML)
        file: PathBuf,

        /// Name recorded on the runs (default: the document name)
        #[arg(short, long)]
        workflow: Option<String>,

        /// Number of runs to start
        #[arg(short, long, default_value = "1")]
        runs: usize,

        /// Run priority (low, normal, high, critical)
        #[arg(short, long, default_value = "normal")]
        priority: String,

        /// Run metadata as KEY=VALUE; values are parsed as JSON when possible
        #[arg(short, long = "meta")]
        meta: Vec<String>,

        /// Report format (json, yaml, text)
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Print system statistics after all runs finish
        #[arg(long)]
        stats: bool,
    },

    /// Validate a workflow document without running it
    Validate {
        /// Workflow document (YAML)
        file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show or initialize the engine configuration
    Config {
        /// Write the configuration file with defaults (keeps existing values)
        #[arg(long)]
        init: bool,

        /// Path to configuration file
        #[arg(long, default_value = "~/.config/flowstate/config.toml")]
        config_file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = handlers::load_config(cli.config.as_deref())?;
    let level = match cli.log_level.as_deref() {
        Some(level) => level.parse().map_err(anyhow::Error::msg)?,
        None => config.log_level,
    };
    flowstate_core::services::init_logging(level)?;

    match cli.command {
        Commands::Run {
            file,
            workflow,
            runs,
            priority,
            meta,
            format,
            stats,
        } => {
            let options = handlers::RunOptions {
                workflow,
                runs,
                priority: cli::args::parse_priority(&priority)?,
                metadata: cli::args::parse_metadata(&meta)?,
                format: format.parse().map_err(anyhow::Error::msg)?,
                stats,
            };
            handlers::handle_run(config, &file, options).await?;
        }
        Commands::Validate { file, json } => {
            handlers::handle_validate(&file, json)?;
        }
        Commands::Config { init, config_file } => {
            let path = cli::args::resolve_config_path(&config_file)?;
            if init {
                handlers::handle_config_init(&path)?;
            } else {
                handlers::handle_config_show(&path)?;
            }
        }
    }

    Ok(())
}
