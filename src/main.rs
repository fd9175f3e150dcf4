//! # Grounding CLI (`ground`)
//!
//! Resolves curriculum questions to verified context from the command line,
//! or serves the same resolution over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! ground --config ./config/grounding.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ground init` | Create the SQLite database and run schema migrations |
//! | `ground code "<text>"` | Print the canonical standard code in the text |
//! | `ground resolve "<query>"` | Ground a query and print the evidence |
//! | `ground cache purge` | Delete expired embedding cache rows |
//! | `ground serve` | Start the HTTP grounding service |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level), so
//! stdout stays machine-readable with `--json`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use curriculum_grounding::cache::EmbeddingCache;
use curriculum_grounding::code::extract_code;
use curriculum_grounding::config::{self, Config};
use curriculum_grounding::models::{GroundingResult, Query};
use curriculum_grounding::router::GroundingRouter;
use curriculum_grounding::{migrate, server};

/// Curriculum grounding: local-first evidence retrieval with a
/// portal fallback.
#[derive(Parser)]
#[command(name = "ground", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grounding.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Print the canonical standard code found in TEXT, or `(none)`.
    Code {
        text: String,
    },

    /// Ground a query and print the resulting evidence.
    Resolve {
        query: String,

        /// Restrict local retrieval to a document id. Repeatable.
        #[arg(long = "scope")]
        scope: Vec<String>,

        /// Route on this code instead of detecting one in the query.
        #[arg(long)]
        code: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage the embedding cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP grounding service on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete cache entries older than `[cache].ttl_secs`.
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Code { text } = &cli.command {
        println!("{}", extract_code(text).as_deref().unwrap_or("(none)"));
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::init_database(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Resolve {
            query,
            scope,
            code,
            json,
        } => {
            let router = GroundingRouter::from_config(&cfg).await?;
            let mut request = Query::new(query).with_scope(scope);
            if let Some(code) = code {
                request = request.with_code(code);
            }
            let result = router.resolve(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Commands::Cache {
            action: CacheAction::Purge,
        } => {
            let cache = EmbeddingCache::open(&cfg).await?;
            let removed = cache
                .purge_expired()
                .await
                .context("Failed to purge embedding cache")?;
            println!("Purged {} expired cache entries.", removed);
        }
        Commands::Serve => {
            serve(&cfg).await?;
        }
        Commands::Code { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

async fn serve(cfg: &Config) -> anyhow::Result<()> {
    let router = Arc::new(GroundingRouter::from_config(cfg).await?);
    server::run_server(cfg, router).await
}

fn print_result(result: &GroundingResult) {
    println!(
        "source: {}  confidence: {:.2}  code: {}",
        result.grounding_source(),
        result.confidence(),
        result.code().unwrap_or("(none)")
    );
    println!();
    println!("{}", result.context_block());
}
