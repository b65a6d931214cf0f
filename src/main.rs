//! # ragbot CLI
//!
//! ```bash
//! ragbot --config ./config/ragbot.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragbot init` | Create the SQLite index and run schema migrations |
//! | `ragbot update` | Ingest new or modified files from the data directory |
//! | `ragbot chat` | Interactive terminal chat |
//! | `ragbot ask "<question>"` | Answer one question and exit |
//! | `ragbot serve` | Start the WhatsApp webhook server |
//! | `ragbot status` | Show ledger and index contents |
//!
//! Secrets are read from the environment; a `.env` file in the working
//! directory is loaded first if present.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ragbot::app::{AppContext, Assistant};
use ragbot::config::{self, LlmCredentials, WhatsAppCredentials};
use ragbot::index::SqliteIndex;
use ragbot::{chat, ingest, server, status};

const DEFAULT_CONFIG: &str = "./config/ragbot.toml";

/// Multilingual question answering over a folder of documents.
#[derive(Parser)]
#[command(name = "ragbot", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ragbot.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index database. Safe to run repeatedly.
    Init,

    /// Embed new or modified files and append them to the index.
    Update {
        /// Load and chunk changed files without embedding or writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Chat in the terminal until `exit` or `quit`.
    Chat,

    /// Answer a single question.
    Ask { question: String },

    /// Serve the WhatsApp webhook.
    Serve,

    /// Show what the ledger and index contain.
    Status,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragbot=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragbot=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load_or_default(cli.config.as_deref(), Path::new(DEFAULT_CONFIG))?;

    match cli.command {
        Commands::Init => {
            SqliteIndex::open(&cfg.paths.index_db).await?;
            println!("Index initialized at {}", cfg.paths.index_db.display());
        }
        Commands::Update { dry_run } => {
            ingest::run_update(&cfg, dry_run).await?;
        }
        Commands::Chat => {
            let credentials = LlmCredentials::from_env()?;
            let ctx = AppContext::open(cfg).await?;
            let assistant = Assistant::from_credentials(&ctx, &credentials)?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            chat::run_chat(&assistant, stdin, &mut std::io::stdout()).await?;
        }
        Commands::Ask { question } => {
            let credentials = LlmCredentials::from_env()?;
            let ctx = AppContext::open(cfg).await?;
            let assistant = Assistant::from_credentials(&ctx, &credentials)?;
            println!("{}", assistant.ask(&question).await?);
        }
        Commands::Serve => {
            let llm = LlmCredentials::from_env()?;
            let whatsapp = WhatsAppCredentials::from_env(&cfg.whatsapp)?;
            let ctx = Arc::new(AppContext::open(cfg).await?);
            server::run_server(ctx, &llm, &whatsapp).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}
