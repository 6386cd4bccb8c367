mod config;
mod error;
mod file_encode;
mod llm_extract;
mod pipeline;
mod receipt;
mod receipt_db;
mod server;
mod stats;
mod validate;

use clap::{Parser, Subcommand};
use config::{Config, DEFAULT_CONFIG_PATH};
use llm_extract::GeminiClient;
use pipeline::Extractor;
use receipt_db::ReceiptStore;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Read receipts with a vision model, keep them in SQLite, summarise spending.
#[derive(Parser)]
#[command(name = "receipt_scan")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload / listing HTTP service
    Serve,

    /// Extract one receipt file and print the result
    Extract {
        file: PathBuf,

        /// Also store the receipt in the database
        #[arg(long)]
        save: bool,
    },

    /// Print every stored receipt, newest first
    List,

    /// Print one stored receipt with its items
    Show { id: i64 },

    /// Print aggregate statistics over all stored receipts
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // init tracing
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let cfg = Config::load_or_default(&config_path)?;

    match cli.command {
        Commands::Serve => serve(&cfg).await,
        Commands::Extract { file, save } => extract(&cfg, &file, save).await,
        Commands::List => {
            let db = open_store(&cfg)?;
            print_json(&db.list_receipts()?)
        }
        Commands::Show { id } => {
            let db = open_store(&cfg)?;
            let receipt = db
                .get_receipt(id)?
                .ok_or_else(|| format!("No receipt found with id {id}"))?;
            print_json(&receipt)
        }
        Commands::Stats => {
            let db = open_store(&cfg)?;
            info!(count = db.count()?, "Computing statistics");
            let receipts = db.list_receipts()?;
            print_json(&stats::compute_stats(&receipts))
        }
    }
}

fn open_store(cfg: &Config) -> Result<ReceiptStore, Box<dyn std::error::Error>> {
    if let Some(parent) = Path::new(&cfg.db_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }
    info!(db_path = %cfg.db_path, "Opening receipt database");
    Ok(ReceiptStore::new(&cfg.db_path)?)
}

fn extractor(cfg: &Config) -> Result<Extractor, Box<dyn std::error::Error>> {
    Ok(Extractor::new(Arc::new(GeminiClient::new(&cfg.gemini)?)))
}

async fn serve(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let state = server::AppState {
        extractor: extractor(cfg)?,
        store: Arc::new(Mutex::new(open_store(cfg)?)),
        upload_dir: PathBuf::from(&cfg.upload_dir),
    };
    if cfg.gemini.api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; every upload will come back as ParseError");
    }
    let app = server::router(state, cfg.server.max_upload_bytes);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    info!("Server listening on {}", addr);
    info!("  GET  /              - receipts + stats");
    info!("  POST /upload        - multipart field `file`");
    info!("  GET  /details/{{id}}  - one receipt, items, charts");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn extract(cfg: &Config, file: &Path, save: bool) -> Result<(), Box<dyn std::error::Error>> {
    let record = extractor(cfg)?.extract(file).await;
    print_json(&record)?;

    if record.is_parse_error() {
        return Err(record
            .error
            .unwrap_or_else(|| "extraction failed".to_string())
            .into());
    }
    if save {
        let mut db = open_store(cfg)?;
        let source = file.file_name().map(|n| n.to_string_lossy().into_owned());
        let id = db.insert_receipt(&record, source.as_deref())?;
        info!(receipt_id = id, "Saved");
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
