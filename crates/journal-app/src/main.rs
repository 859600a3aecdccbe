//! Journal application binary - composition root.
//!
//! 1. Load configuration from TOML (if present) and apply CLI overrides
//! 2. Construct the embedding provider named in config
//! 3. Run one subcommand: build an index, retrieve from it, or prepare a digest

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use journal_core::config::{EmbeddingConfig, JournalConfig};
use journal_core::entry::load_journal;
use journal_core::error::JournalError;
use journal_insight::{ClusterConfig, Clusterer, ThemeDigest};
use journal_vector::embedding::{
    DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService, TimeoutEmbedding,
};
use journal_vector::{EmbeddingIndex, Retriever};

use cli::{CliArgs, Command};

/// Expand ~ to home directory in a path string.
fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}

/// Bound every embed call by `timeout_secs` unless it is 0.
fn with_timeout<E: EmbeddingService + 'static>(
    service: E,
    timeout_secs: u64,
) -> Arc<dyn DynEmbeddingService> {
    if timeout_secs == 0 {
        Arc::new(service)
    } else {
        Arc::new(TimeoutEmbedding::new(
            service,
            Duration::from_secs(timeout_secs),
        ))
    }
}

fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingService>, JournalError> {
    match config.backend.as_str() {
        "mock" => {
            tracing::warn!(
                dimensions = config.mock_dimensions,
                "Using mock embeddings; similarity is not semantic"
            );
            Ok(with_timeout(
                MockEmbedding::with_dimensions(config.mock_dimensions),
                config.timeout_secs,
            ))
        }
        "onnx" => {
            let model_dir = expand_home(&config.model_dir);
            let service = OnnxEmbeddingService::from_directory(&model_dir)?;
            tracing::info!(path = %model_dir.display(), "ONNX embedding model loaded");
            Ok(with_timeout(service, config.timeout_secs))
        }
        other => Err(JournalError::Config(format!(
            "unknown embedding backend '{}'",
            other
        ))),
    }
}

/// Index directory: explicit flag > config `index.path`, relocated under
/// `--data-dir` when that flag is given.
fn index_dir(explicit: Option<PathBuf>, config: &JournalConfig, data_dir_overridden: bool) -> PathBuf {
    if let Some(p) = explicit {
        return p;
    }
    if data_dir_overridden {
        return expand_home(&config.general.data_dir).join("index");
    }
    expand_home(&config.index.path)
}

async fn run_build(
    config: &JournalConfig,
    embedder: Arc<dyn DynEmbeddingService>,
    journal: &Path,
    out: &Path,
) -> Result<(), JournalError> {
    let load = load_journal(journal)?;
    if load.skipped > 0 {
        tracing::warn!(skipped = load.skipped, "Some journal lines were skipped");
    }
    let count = load.entries.len();

    let index = EmbeddingIndex::build(load.entries, &*embedder).await?;
    let generation = index.persist_with_retention(out, config.index.retain_generations)?;

    tracing::info!(
        entries = count,
        indexed = index.len(),
        generation = %generation.display(),
        "Index published"
    );
    println!("indexed {} entries into {}", index.len(), out.display());
    Ok(())
}

async fn run_retrieve(
    embedder: Arc<dyn DynEmbeddingService>,
    index: &Path,
    query: &str,
    user: Option<&str>,
    top_k: usize,
) -> Result<(), JournalError> {
    let retriever = Retriever::open(index, embedder)?;
    let texts = retriever.retrieve(query, user, top_k).await?;
    if texts.is_empty() {
        tracing::info!("No matching entries");
    }
    for (rank, text) in texts.iter().enumerate() {
        println!("{}. {}", rank + 1, text);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config. A file that exists but fails to parse or validate is fatal.
    let config_file = args.resolve_config_path();
    let mut config = JournalConfig::load_if_present(&config_file)?;
    let data_dir_overridden = match args.resolve_data_dir() {
        Some(dir) => {
            config.general.data_dir = dir;
            true
        }
        None => false,
    };
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. RUST_LOG still wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting journal v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    let embedder = build_embedder(&config.embedding)?;

    match args.command {
        Command::Build { journal, out } => {
            let out = index_dir(out, &config, data_dir_overridden);
            run_build(&config, embedder, &journal, &out).await?;
        }
        Command::Retrieve {
            query,
            user,
            top_k,
            index,
        } => {
            let index = index_dir(index, &config, data_dir_overridden);
            let top_k = top_k.unwrap_or(config.retrieval.top_k);
            run_retrieve(embedder, &index, &query, user.as_deref(), top_k).await?;
        }
        Command::Digest {
            journal,
            user,
            days,
            clusters,
            top_emotions,
            today,
        } => {
            let load = load_journal(&journal)?;
            let clusterer = Clusterer::with_shared(embedder, ClusterConfig::from(&config.clustering));
            let today = today.unwrap_or_else(|| chrono::Local::now().date_naive());

            let digest = ThemeDigest::prepare(
                &clusterer,
                &load.entries,
                &user,
                days.unwrap_or(config.digest.days),
                clusters.unwrap_or(config.clustering.k),
                top_emotions.unwrap_or(config.trends.top_n),
                today,
            )
            .await
            .map_err(JournalError::from)?;

            println!("{}", serde_json::to_string_pretty(&digest)?);
        }
    }

    Ok(())
}
