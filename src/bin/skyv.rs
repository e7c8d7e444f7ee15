//! CLI entry point for the `skyv` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use skyvault::cli::commands;
use skyvault::collection::{SearchParams, SearchSort};
use skyvault::types::ContentType;
use skyvault::{Settings, SkyError};

#[derive(Parser)]
#[command(
    name = "skyv",
    about = "Skyvault CLI: recover account history and hydrate engagement counts"
)]
struct Cli {
    /// Output format: "text" (default) or "json"
    #[arg(long, default_value = "text")]
    format: String,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,

    /// Settings file (defaults to $SKYVAULT_CONFIG, then the per-user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a repository archive and summarize it
    Decode {
        /// Path to the .car archive
        file: PathBuf,
        /// Owner DID, for archives without a commit block
        #[arg(long)]
        did: Option<String>,
    },
    /// Fetch an account's records from the public API
    Fetch {
        /// Account DID
        did: String,
        /// Write the items as JSON to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Decode an archive and fill in engagement counts
    Hydrate {
        /// Path to the .car archive
        file: PathBuf,
        /// Owner DID, for archives without a commit block
        #[arg(long)]
        did: Option<String>,
        /// Write the hydrated items as JSON to this file
        #[arg(long)]
        out: Option<PathBuf>,
        /// Skip per-post reply lookups
        #[arg(long)]
        no_replies: bool,
    },
    /// Filter and sort items from an archive or a JSON export
    Search {
        /// Path to a .car archive or a .json export
        file: PathBuf,
        /// Owner DID, for archives without a commit block
        #[arg(long)]
        did: Option<String>,
        /// Comma-separated content types: post, like, repost
        #[arg(long = "type")]
        content_types: Option<String>,
        /// Case-insensitive text filter
        #[arg(long)]
        text: Option<String>,
        /// Minimum engagement score
        #[arg(long)]
        min_score: Option<f64>,
        /// Minimum like count
        #[arg(long)]
        min_likes: Option<u64>,
        /// Created after (Unix seconds)
        #[arg(long)]
        after: Option<i64>,
        /// Created before (Unix seconds)
        #[arg(long)]
        before: Option<i64>,
        /// Sort: newest, oldest, engagement, likes
        #[arg(long, default_value = "newest")]
        sort: String,
        /// Maximum results
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Build an archive from a JSON record dump
    Pack {
        /// JSON dump: {"did": ..., "records": [{"collection", "rkey", "value"}]}
        input: PathBuf,
        /// Output .car path
        output: PathBuf,
    },
    /// Inspect or prune the engagement cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts
    Stats,
    /// Delete expired entries
    ClearExpired,
}

fn exit_code(e: &SkyError) -> i32 {
    match e {
        SkyError::Io(_) => 1,
        SkyError::ArchiveCorrupt { .. } => 2,
        SkyError::Config(_) => 3,
        SkyError::RateLimited { .. }
        | SkyError::NetworkTimeout { .. }
        | SkyError::Http { .. }
        | SkyError::Transport(_)
        | SkyError::HydrationFailed { .. } => 4,
        _ => 5,
    }
}

fn main() {
    let cli = Cli::parse();
    let json = cli.format == "json";

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(exit_code(&e));
        }
    };

    let result = match cli.command {
        Commands::Decode { file, did } => commands::cmd_decode(&file, did.as_deref(), json),
        Commands::Fetch { did, out } => commands::cmd_fetch(&settings, &did, out.as_deref(), json),
        Commands::Hydrate {
            file,
            did,
            out,
            no_replies,
        } => commands::cmd_hydrate(
            &settings,
            &file,
            did.as_deref(),
            out.as_deref(),
            no_replies,
            json,
        ),
        Commands::Search {
            file,
            did,
            content_types,
            text,
            min_score,
            min_likes,
            after,
            before,
            sort,
            limit,
        } => {
            let types: Vec<ContentType> = content_types
                .map(|s| {
                    s.split(',')
                        .filter_map(|t| ContentType::from_name(t.trim()))
                        .collect()
                })
                .unwrap_or_default();
            let sort = match sort.as_str() {
                "oldest" => SearchSort::Oldest,
                "engagement" => SearchSort::TopEngagement,
                "likes" => SearchSort::MostLiked,
                _ => SearchSort::Newest,
            };
            commands::cmd_search(
                &settings,
                &file,
                did.as_deref(),
                SearchParams {
                    content_types: types,
                    text_contains: text,
                    min_score,
                    min_likes,
                    created_after: after,
                    created_before: before,
                    sort,
                    limit,
                },
                json,
            )
        }
        Commands::Pack { input, output } => commands::cmd_pack(&input, &output, json),
        Commands::Cache { action } => match action {
            CacheAction::Stats => commands::cmd_cache_stats(&settings, json),
            CacheAction::ClearExpired => commands::cmd_cache_clear_expired(&settings, json),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(exit_code(&e));
    }
}
