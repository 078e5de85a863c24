//! CLI entry point for the orthogonal vector index.
//!
//! Provides commands for creating, inspecting and maintaining an index,
//! plus indexing and search when built with an embedding provider.

use anyhow::{Context, anyhow};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use orthovec::analysis::DEFAULT_MAX_SAMPLE;
use orthovec::display::{
    create_analysis_table, create_stats_table, create_verify_table, with_spinner,
};
use orthovec::indexing::{EmbedError, EmbeddingProvider};
use orthovec::{IndexError, IndexMetadata, OrthoIndex, Settings, SourceFilter};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Local orthogonal vector index
#[derive(Parser)]
#[command(
    name = "orthovec",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local orthogonal vector index",
    long_about = "Index code and conversations as embeddings, keeping only content that adds new information.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .orthovec directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .orthovec/settings.toml")]
    Config,

    /// Show index counts
    Stats {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Compare the similarity index against the record store
    Verify,

    /// Drop expired tombstones and rebuild the index
    Compact,

    /// Rebuild the similarity index from live records
    Rebuild,

    /// Report how redundant the indexed content is
    #[command(after_help = "Examples:\n  orthovec analyze\n  orthovec analyze --prefix src/ --sample 200")]
    Analyze {
        /// Only consider sources starting with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Maximum number of records compared
        #[arg(long, default_value_t = DEFAULT_MAX_SAMPLE)]
        sample: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Tombstone every record of a file or conversation transcript
    Remove {
        /// Path that was indexed
        path: PathBuf,
    },

    /// Index a file or every matching file under a directory
    #[cfg(feature = "fastembed")]
    Index {
        /// Path to file or directory to index
        path: PathBuf,
    },

    /// Search indexed content by meaning
    #[cfg(feature = "fastembed")]
    #[command(after_help = "Examples:\n  orthovec search \"how are tombstones compacted\"\n  orthovec search \"retry logic\" -k 10 --prefix src/")]
    Search {
        /// Natural language query
        query: String,

        /// Number of results
        #[arg(short, long, default_value_t = 5)]
        k: usize,

        /// Only return sources starting with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// Stands in for an embedder on commands that never embed text.
struct StoredDimension(usize);

impl EmbeddingProvider for StoredDimension {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Provider(
            "no embedding provider available for this command".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        self.0
    }
}

fn init_logging(settings: &Settings, verbose: bool) {
    let level = if verbose {
        Level::DEBUG
    } else {
        settings.logging.level.parse().unwrap_or(Level::INFO)
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn load_settings(config: Option<&Path>) -> anyhow::Result<Settings> {
    match config {
        Some(path) => Settings::load_from(path)
            .map_err(|e| anyhow!("Configuration error loading from {}: {e}", path.display())),
        None => Settings::load().map_err(|e| anyhow!("Configuration error: {e}")),
    }
}

/// Opens the index without loading an embedding model.
fn open_offline(settings: &Settings) -> anyhow::Result<OrthoIndex> {
    let dir = settings.resolved_index_path();
    let dimension = if IndexMetadata::exists(&dir) {
        IndexMetadata::load(&dir)?.dimension
    } else {
        settings.dimension
    };
    let index = OrthoIndex::open_with_fs_source(settings, Arc::new(StoredDimension(dimension)))?;
    Ok(index)
}

#[cfg(feature = "fastembed")]
fn open_with_model(settings: &Settings, show_progress: bool) -> anyhow::Result<OrthoIndex> {
    use orthovec::indexing::FastEmbedProvider;

    let provider = FastEmbedProvider::new(settings.model_cache_dir(), show_progress)
        .context("Failed to load the embedding model")?;
    let index = OrthoIndex::open_with_fs_source(settings, Arc::new(provider))?;
    Ok(index)
}

fn prefix_filter(prefix: Option<&String>) -> Option<SourceFilter> {
    prefix.map(|p| SourceFilter::prefix(p.as_str()))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(cli.config.as_deref())?;
    init_logging(&settings, cli.verbose);
    let interactive = std::io::stderr().is_terminal() && !cli.verbose;

    match &cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(*force).map_err(|e| anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
        }

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            let toml_str =
                toml::to_string_pretty(&settings).context("Error displaying config")?;
            println!("{toml_str}");
        }

        Commands::Stats { json } => {
            let index = open_offline(&settings)?;
            let stats = index.stats();
            if *json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", create_stats_table(&stats));
            }
        }

        Commands::Verify => {
            let index = open_offline(&settings)?;
            let report = index.verify();
            println!("{}", create_verify_table(&report));
            if !report.is_consistent() {
                return Err(anyhow!("Index and store disagree on live records"));
            }
        }

        Commands::Compact => {
            let index = open_offline(&settings)?;
            let removed = with_spinner("Compacting record log", interactive, || index.compact())?;
            println!("Compacted: {removed} expired tombstones dropped");
            println!("{}", create_stats_table(&index.stats()));
        }

        Commands::Rebuild => {
            let index = open_offline(&settings)?;
            with_spinner("Rebuilding similarity index", interactive, || index.rebuild())?;
            println!("{}", create_stats_table(&index.stats()));
        }

        Commands::Analyze {
            prefix,
            sample,
            json,
        } => {
            let index = open_offline(&settings)?;
            let filter = prefix_filter(prefix.as_ref());
            let report = with_spinner("Comparing records", interactive, || {
                index.analyze(filter.as_ref(), *sample)
            });
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", create_analysis_table(&report));
            }
        }

        Commands::Remove { path } => {
            let index = open_offline(&settings)?;
            let removed = index.remove_file(path)?;
            println!("Removed {removed} records of {}", path.display());
        }

        #[cfg(feature = "fastembed")]
        Commands::Index { path } => {
            use orthovec::display::create_summary_table;

            let index = open_with_model(&settings, interactive)?;
            let bulk = with_spinner("Indexing", interactive, || {
                if path.is_dir() {
                    index.index_directory(path)
                } else {
                    index.index_files(std::slice::from_ref(path))
                }
            });

            println!("{}", create_summary_table(&bulk));
            for (file, error) in &bulk.failed {
                eprintln!("Failed: {}: {error}", file.display());
            }
            if !bulk.failed.is_empty() && bulk.files.is_empty() {
                return Err(anyhow!("No files were indexed"));
            }
        }

        #[cfg(feature = "fastembed")]
        Commands::Search {
            query,
            k,
            prefix,
            json,
        } => {
            use orthovec::display::create_search_table;

            let index = open_with_model(&settings, interactive)?;
            let filter = prefix_filter(prefix.as_ref());
            let results = index.search_text(query, *k, filter.as_ref())?;

            if *json {
                let items: Vec<_> = results
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "chunk_id": r.chunk_id.as_str(),
                            "source_path": r.source_path,
                            "score": r.score.get(),
                            "line_range": r.line_range,
                            "content": r.content,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if results.is_empty() {
                println!("No results");
            } else {
                println!("{}", create_search_table(&results));
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(index_error) = e.downcast_ref::<IndexError>() {
                eprintln!("Code: {}", index_error.status_code());
                for suggestion in index_error.recovery_suggestions() {
                    eprintln!("  - {suggestion}");
                }
            }
            ExitCode::FAILURE
        }
    }
}
