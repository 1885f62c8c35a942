use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codesearch_common::logger::{self, LogOutput};
use codesearch_common::AppConfig;
use codesearch_vector::{
    DistanceMetric, Document, EngineConfig, IngestStatus, MetadataFilter, Query, SearchEngine,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Documents sent to the engine per batch during `ingest`
const INGEST_BATCH_SIZE: usize = 64;

/// Find project root by looking for .git directory
fn find_project_root() -> Option<PathBuf> {
    let mut current_dir = std::env::current_dir().ok()?;

    loop {
        if current_dir.join(".git").exists() {
            return Some(current_dir);
        }

        if !current_dir.pop() {
            break;
        }
    }

    None
}

/// Load .env file from project root
fn load_dotenv_from_project_root() {
    if let Some(root) = find_project_root() {
        let env_path = root.join(".env");
        if env_path.exists() {
            dotenv::from_path(&env_path).ok();
        }
    } else {
        // Fallback to default dotenv behavior
        dotenv::dotenv().ok();
    }
}

#[derive(Parser)]
#[command(name = "codesearch")]
#[command(about = "code-search - semantic search over source code snippets", long_about = None)]
struct Cli {
    /// Vector store directory (overrides STORAGE_PATH)
    #[arg(long, global = true)]
    storage_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,
    },

    /// Ingest documents from a JSON Lines file ({"id", "text", "metadata"} per line)
    Ingest {
        file: PathBuf,
    },

    /// Search the index
    Query {
        text: String,

        /// Number of results
        #[arg(short, default_value_t = 10)]
        k: usize,

        /// cosine or euclidean (defaults to DEFAULT_METRIC)
        #[arg(long)]
        metric: Option<DistanceMetric>,

        /// MMR lambda in [0, 1]; enables result diversification
        #[arg(long)]
        diversity: Option<f32>,

        /// Metadata equality filter, KEY=VALUE (repeatable)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Delete a document by id
    Delete {
        id: String,
    },

    /// Show index statistics
    Stats,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

/// Open the engine and rebuild its index, for one-shot commands
async fn open_engine(config: &AppConfig) -> Result<SearchEngine> {
    let engine = SearchEngine::open(EngineConfig::from_app_config(config)?).await?;
    engine.start().await?;
    Ok(engine)
}

/// Parse a JSON Lines file into (line number, document or parse error) pairs
fn read_documents(path: &Path) -> Result<Vec<(usize, std::result::Result<Document, String>)>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(data
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let parsed = serde_json::from_str::<Document>(line).map_err(|e| e.to_string());
            (i + 1, parsed)
        })
        .collect())
}

async fn run_ingest(config: &AppConfig, file: &Path) -> Result<()> {
    let lines = read_documents(file)?;
    let engine = open_engine(config).await?;

    let pb = ProgressBar::new(lines.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut failures: Vec<String> = Vec::new();

    for chunk in lines.chunks(INGEST_BATCH_SIZE) {
        let mut docs = Vec::new();
        let mut line_numbers = Vec::new();
        for (line, parsed) in chunk {
            match parsed {
                Ok(doc) => {
                    docs.push(doc.clone());
                    line_numbers.push(*line);
                }
                Err(e) => failures.push(format!("line {}: {}", line, e)),
            }
        }

        let results = engine.ingest_many(docs).await?;
        for (line, result) in line_numbers.into_iter().zip(results) {
            match result {
                Ok(outcome) => {
                    let label = match outcome.status {
                        IngestStatus::Created => "created",
                        IngestStatus::Updated => "updated",
                        IngestStatus::MetadataUpdated => "metadata updated",
                        IngestStatus::Unchanged => "unchanged",
                    };
                    *counts.entry(label).or_insert(0) += 1;
                }
                Err(e) => failures.push(format!("line {}: {}", line, e)),
            }
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_with_message("Ingestion complete");

    for (label, count) in &counts {
        println!("{:>18}: {}", label, count);
    }
    println!("{:>18}: {}", "failed", failures.len());
    for failure in &failures {
        eprintln!("  {}", failure);
    }

    if !failures.is_empty() {
        anyhow::bail!("{} of {} documents failed", failures.len(), lines.len());
    }
    Ok(())
}

async fn run_query(
    config: &AppConfig,
    text: String,
    k: usize,
    metric: Option<DistanceMetric>,
    diversity: Option<f32>,
    filters: Vec<(String, String)>,
    json: bool,
) -> Result<()> {
    let engine = open_engine(config).await?;

    let mut query = Query::text(text, k);
    if let Some(metric) = metric {
        query = query.with_metric(metric);
    }
    if let Some(lambda) = diversity {
        query = query.with_diversity(lambda);
    }
    if !filters.is_empty() {
        let filter = filters
            .into_iter()
            .fold(MetadataFilter::new(), |f, (key, value)| f.equals(key, value));
        query = query.with_filter(filter);
    }

    let response = engine.query(query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.clamped {
        println!(
            "(k clamped from {} to {})",
            response.requested_k, response.effective_k
        );
    }
    if response.results.is_empty() {
        println!("No results");
    }
    for (rank, result) in response.results.iter().enumerate() {
        let location = result
            .metadata
            .get("path")
            .map(String::as_str)
            .unwrap_or("-");
        println!(
            "{:>3}. {:<40} {:>9.4} ({})  {}",
            rank + 1,
            result.id,
            result.score,
            response.metric,
            location
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load environment variables from .env at project root
    // Note: AppConfig::from_env() also loads .env, but we do it here early
    // to ensure any CLI argument overrides work correctly
    load_dotenv_from_project_root();

    if let Some(path) = &cli.storage_path {
        std::env::set_var("STORAGE_PATH", path);
    }

    match cli.command {
        Some(Commands::Serve { host, port }) => {
            // Override with CLI arguments
            if let Some(host) = &host {
                std::env::set_var("SERVER_HOST", host);
            }
            if let Some(port) = port {
                std::env::set_var("SERVER_PORT", port.to_string());
            }
            serve().await?;
        }
        Some(Commands::Ingest { file }) => {
            let config = AppConfig::from_env()?;
            logger::init(&config, LogOutput::Console)?;
            run_ingest(&config, &file).await?;
        }
        Some(Commands::Query {
            text,
            k,
            metric,
            diversity,
            filters,
            json,
        }) => {
            let config = AppConfig::from_env()?;
            logger::init(&config, LogOutput::Console)?;
            run_query(&config, text, k, metric, diversity, filters, json).await?;
        }
        Some(Commands::Delete { id }) => {
            let config = AppConfig::from_env()?;
            logger::init(&config, LogOutput::Console)?;
            let engine = open_engine(&config).await?;
            if engine.delete(&id).await? {
                println!("Deleted {}", id);
            } else {
                println!("No document with id {}", id);
            }
        }
        Some(Commands::Stats) => {
            let config = AppConfig::from_env()?;
            logger::init(&config, LogOutput::Console)?;
            let engine = open_engine(&config).await?;
            println!("{}", serde_json::to_string_pretty(&engine.stats().await)?);
        }
        None => {
            // Default: start server with default config
            serve().await?;
        }
    }

    Ok(())
}

async fn serve() -> Result<()> {
    let config = AppConfig::from_env()?;
    logger::init(&config, LogOutput::ConsoleAndFile(config.log_dir.clone()))?;

    tracing::info!("code-search starting...");
    tracing::info!("Configuration loaded:");
    tracing::info!("  Bind: {}", config.server_bind_address());
    tracing::info!("  Storage: {}", config.storage_path.display());
    tracing::info!(
        "  Embeddings: {:?} {} ({} dims) at {}",
        config.embedding_provider,
        config.embedding_model,
        config.embedding_dim,
        config.model_endpoint
    );

    println!("Server listening on http://{}", config.server_bind_address());

    codesearch_server::start_server(config).await?;
    Ok(())
}
