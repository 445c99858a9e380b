use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "guildstats")]
#[command(about = "Builds userdata.json for the guild stats site")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every profile from the API and write the guild's compact userdata file
    Fetch,
    /// Rebuild the compact userdata file from an existing bulk users.json dump
    Transform {
        /// Path to the bulk dump (a JSON array of raw profiles)
        dump: PathBuf,
    },
    /// Strip unused fields from a full-field userdata file in place
    Prune {
        #[arg(long, default_value = guildstats_sync::DEFAULT_OUTPUT)]
        file: PathBuf,
    },
    /// Show member and color usage counts for a compact userdata file
    Stats {
        #[arg(long, default_value = guildstats_sync::DEFAULT_OUTPUT)]
        file: PathBuf,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_json = std::env::var("GUILDSTATS_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false);

    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Commands::Fetch) {
        Commands::Fetch => {
            let summary = guildstats_sync::run_fetch_from_env().await?;
            let secs = (summary.finished_at - summary.started_at).num_milliseconds() as f64 / 1000.0;
            println!(
                "fetch complete: run_id={} requested={} fetched={} members={} output={} time={:.1}s",
                summary.run_id,
                summary.requested,
                summary.fetched,
                summary.members,
                summary.output_path,
                secs
            );
        }
        Commands::Transform { dump } => {
            let config = guildstats_sync::SyncConfig::from_env();
            let summary =
                guildstats_sync::transform_dump(&dump, &config.output_path, &config.guild).await?;
            println!(
                "transform complete: source_total={} members={} output={}",
                summary.source_total, summary.members, summary.output_path
            );
        }
        Commands::Prune { file } => {
            let summary = guildstats_sync::prune_file(&file).await?;
            let dropped = summary.dropped_fields.into_iter().collect::<Vec<_>>();
            println!(
                "prune complete: records={} kept={} dropped=[{}] file={}",
                summary.records,
                guildstats_core::PRUNED_FIELDS.join(","),
                dropped.join(","),
                summary.path
            );
        }
        Commands::Stats { file, top } => {
            let stats = guildstats_sync::summarize_userdata(&file, top).await?;
            println!(
                "members={} distinct_colors={}",
                stats.members, stats.distinct_colors
            );
            for entry in stats.top_colors {
                println!(
                    "{:>6}  {:<12} {}",
                    entry.members,
                    entry.color,
                    entry.hex.unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}
