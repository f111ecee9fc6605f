//! InkDeck Administration CLI

mod journal_cmd;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inkdeck_core::{FrameCodec, OperationJournal, SessionConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "inkdeck-admin")]
#[command(author = "InkDeck Contributors")]
#[command(version = "0.1.0")]
#[command(about = "InkDeck operation journal tool")]
struct Cli {
    /// Directory holding inkdeck.json (defaults apply when absent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the records of a journal
    Inspect { journal: PathBuf },

    /// Decode every record and report malformed ones
    Verify {
        journal: PathBuf,
        #[arg(short, long)]
        quiet: bool,
    },

    /// Apply a journal to a fresh deck and print the result as JSON
    Replay {
        journal: PathBuf,
        /// Name of the fresh deck
        #[arg(short, long, default_value = "Replay")]
        name: String,
        /// Write the JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config(dir: Option<&Path>) -> Result<SessionConfig> {
    match dir {
        Some(dir) => SessionConfig::load(dir)
            .with_context(|| format!("Failed to load config from {:?}", dir)),
        None => Ok(SessionConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = load_config(cli.config.as_deref())?;
    let codec = FrameCodec::from_config(&config);
    let mut stdout = std::io::stdout();

    match cli.command {
        Commands::Inspect { journal } => {
            let journal = OperationJournal::new(journal, codec);
            journal_cmd::inspect(&journal, &mut stdout).await?;
        }

        Commands::Verify { journal, quiet } => {
            let journal = OperationJournal::new(journal, codec);
            let report = journal_cmd::verify(&journal, quiet, &mut stdout).await?;
            if report.malformed > 0 {
                anyhow::bail!(
                    "{} of {} records are malformed",
                    report.malformed,
                    report.total
                );
            }
        }

        Commands::Replay {
            journal,
            name,
            output,
        } => {
            let journal = OperationJournal::new(journal, codec);
            let summary = journal_cmd::replay(&journal, &config, &name).await?;
            let json = serde_json::to_string_pretty(&summary)?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write {:?}", path))?,
                None => println!("{}", json),
            }
        }
    }

    Ok(())
}
