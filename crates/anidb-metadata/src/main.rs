//! AniDB metadata CLI application.

use anidb_metadata::{AniDbProvider, EpisodeQuery, ProviderSettings, SeriesQuery};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::{CachePaths, Config};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Series metadata by AniDB id or by name
    Series {
        /// AniDB anime id
        #[arg(long)]
        id: Option<u32>,

        /// Series name to resolve when no id is given
        #[arg(long)]
        name: Option<String>,

        /// Metadata languages in preference order
        #[arg(long = "lang", value_delimiter = ',')]
        languages: Vec<String>,
    },

    /// Episode metadata by episode id or by number
    Episode {
        /// AniDB anime id of the series
        #[arg(long)]
        series: u32,

        /// AniDB episode id
        #[arg(long)]
        id: Option<u32>,

        /// Episode number
        #[arg(long)]
        number: Option<u32>,

        /// Last episode number of a multi-episode file
        #[arg(long)]
        number_end: Option<u32>,

        /// Season number (0 for specials)
        #[arg(long)]
        season: Option<u32>,

        #[arg(long = "lang", value_delimiter = ',')]
        languages: Vec<String>,
    },

    /// Resolve a series name to an AniDB id
    Resolve {
        name: String,
    },

    /// Remote images of a series
    Images {
        id: u32,
    },

    /// Cached person by name
    Person {
        name: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        shared::logging::parse_level(&config.logging.default_level)
    };

    shared::logging::init(shared::LogConfig {
        log_dir: config.log_dir().to_string_lossy().to_string(),
        component: "anidb-metadata".to_string(),
        default_level: log_level,
        console: config.logging.console,
        file: config.logging.file,
        json_format: config.logging.json_format,
    })?;

    info!(config_file = %args.config.display(), "Loaded configuration");

    let cache_root = config.cache_dir();
    CachePaths::new(&cache_root)
        .create_dirs()
        .with_context(|| format!("Failed to create cache directories in {}", cache_root.display()))?;

    let provider = AniDbProvider::from_settings(ProviderSettings::from_config(&config))
        .context("Failed to create AniDB provider")?;

    // Ctrl-C cancels whatever is in flight
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match args.command {
        Command::Series {
            id,
            name,
            languages,
        } => {
            let query = SeriesQuery {
                name,
                anidb_id: id,
                languages,
            };
            let series = provider
                .series_metadata(&query, &cancel)
                .await
                .context("Series lookup failed")?;
            print_json(&series)?;
        }
        Command::Episode {
            series,
            id,
            number,
            number_end,
            season,
            languages,
        } => {
            let query = EpisodeQuery {
                series_id: Some(series),
                episode_id: id,
                index: number,
                index_end: number_end,
                parent_index: season,
                languages,
            };
            let episode = provider
                .episode_metadata(&query, &cancel)
                .await
                .context("Episode lookup failed")?;
            print_json(&episode)?;
        }
        Command::Resolve { name } => {
            let aid = provider
                .resolve_id(&name, &cancel)
                .await
                .context("Title resolution failed")?;
            print_json(&aid)?;
        }
        Command::Images { id } => {
            let images = provider
                .series_images(id, &cancel)
                .await
                .context("Image lookup failed")?;
            print_json(&images)?;
        }
        Command::Person { name } => {
            print_json(&provider.person(&name).await)?;
        }
    }

    Ok(())
}
