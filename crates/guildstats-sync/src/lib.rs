//! Pipelines that produce and maintain `userdata.json`: live fetch, bulk-dump
//! transform, in-place pruning and the color summary the stats site renders.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use guildstats_core::{
    compact_members, decimal_to_hex, dropped_fields, split_colors, CompactProfile, PrunedProfile,
    RawProfile, DEFAULT_GUILD,
};
use guildstats_storage::{HttpClientConfig, JsonFile, ProfileFetcher, DEFAULT_API_URL};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "guildstats-sync";

pub const DEFAULT_OUTPUT: &str = "userdata.json";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_url: String,
    pub total_users: u64,
    pub batch_size: usize,
    pub pause: Duration,
    pub http_timeout_secs: u64,
    pub guild: String,
    pub output_path: PathBuf,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            total_users: 13_000,
            batch_size: 50,
            pause: Duration::from_secs(6),
            http_timeout_secs: 10,
            guild: DEFAULT_GUILD.to_string(),
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            user_agent: "guildstats/0.1".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset or unparseable values
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            api_url: lookup("GUILDSTATS_API_URL").unwrap_or(defaults.api_url),
            total_users: lookup("GUILDSTATS_TOTAL_USERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.total_users),
            batch_size: lookup("GUILDSTATS_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.batch_size)
                .max(1),
            pause: lookup("GUILDSTATS_PAUSE_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.pause),
            http_timeout_secs: lookup("GUILDSTATS_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            guild: lookup("GUILDSTATS_GUILD").unwrap_or(defaults.guild),
            output_path: lookup("GUILDSTATS_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_path),
            user_agent: lookup("GUILDSTATS_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }
}

/// Contiguous inclusive id slices covering `1..=total`; the last one may be short.
pub fn batch_ranges(total: u64, batch_size: usize) -> Vec<RangeInclusive<u64>> {
    let step = batch_size.max(1) as u64;
    (1..=total)
        .step_by(step as usize)
        .map(|start| start..=(start + step - 1).min(total))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub requested: u64,
    pub fetched: usize,
    pub members: usize,
    pub output_path: String,
    pub output_bytes: usize,
}

pub struct FetchPipeline {
    config: SyncConfig,
    http: ProfileFetcher,
    output: JsonFile,
}

impl FetchPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = ProfileFetcher::new(HttpClientConfig {
            api_url: config.api_url.clone(),
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let output = JsonFile::new(config.output_path.clone());
        Ok(Self {
            config,
            http,
            output,
        })
    }

    pub async fn run_once(&self) -> Result<FetchSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let run_id = Uuid::new_v4();
        let total = self.config.total_users;

        info!(
            %run_id,
            total,
            batch_size = self.config.batch_size,
            pause_secs = self.config.pause.as_secs_f64(),
            api_url = self.http.api_url(),
            "fetching user profiles"
        );

        let mut profiles: Vec<RawProfile> = Vec::new();
        for batch in batch_ranges(total, self.config.batch_size) {
            let batch_end = *batch.end();
            let span = info_span!("fetch_batch", %run_id, first = *batch.start(), last = batch_end);
            let results = self.fetch_batch(batch).instrument(span).await;
            profiles.extend(results.into_iter().flatten());

            info!(
                %run_id,
                batch_end,
                total,
                percent = (batch_end as f64 / total as f64 * 1000.0).round() / 10.0,
                valid = profiles.len(),
                elapsed_secs = clock.elapsed().as_secs(),
                "progress"
            );

            if batch_end < total {
                tokio::time::sleep(self.config.pause).await;
            }
        }

        let compact = compact_members(&profiles, &self.config.guild)
            .context("compacting fetched guild members")?;
        let stored = self.output.replace(&compact).await?;

        Ok(FetchSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            requested: total,
            fetched: profiles.len(),
            members: compact.len(),
            output_path: stored.path.display().to_string(),
            output_bytes: stored.byte_size,
        })
    }

    /// Fetch every id of `batch` concurrently. Slot `n` holds the result for the
    /// `n`th id regardless of completion order.
    async fn fetch_batch(&self, batch: RangeInclusive<u64>) -> Vec<Option<RawProfile>> {
        let ids: Vec<u64> = batch.collect();
        let mut slots: Vec<Option<RawProfile>> = vec![None; ids.len()];
        let mut join_set = JoinSet::new();

        for (index, target_id) in ids.into_iter().enumerate() {
            let http = self.http.clone();
            join_set.spawn(async move { (index, http.fetch_profile(target_id).await) });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, profile)) => slots[index] = profile,
                Err(err) => warn!(error = %err, "fetch task did not complete"),
            }
        }

        slots
    }
}

pub async fn run_fetch_from_env() -> Result<FetchSummary> {
    FetchPipeline::new(SyncConfig::from_env())?.run_once().await
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformSummary {
    pub source_total: usize,
    pub members: usize,
    pub output_path: String,
}

/// Rebuild the compact output from a bulk dump already on disk.
pub async fn transform_dump(input: &Path, output: &Path, guild: &str) -> Result<TransformSummary> {
    let source = JsonFile::new(input);
    if !source.exists().await? {
        bail!("{} not found", input.display());
    }

    let users: Vec<RawProfile> = source.load().await?;
    let compact = compact_members(&users, guild)
        .with_context(|| format!("compacting guild members from {}", input.display()))?;
    let stored = JsonFile::new(output).replace(&compact).await?;

    info!(source = %input.display(), total = users.len(), members = compact.len(), "transformed dump");
    Ok(TransformSummary {
        source_total: users.len(),
        members: compact.len(),
        output_path: stored.path.display().to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneSummary {
    pub records: usize,
    pub dropped_fields: BTreeSet<String>,
    pub path: String,
}

/// Reduce every record of `path` to the pruned field allow-list and rewrite
/// the file minified.
pub async fn prune_file(path: &Path) -> Result<PruneSummary> {
    let file = JsonFile::new(path);
    let records: Vec<Map<String, Value>> = file.load().await?;

    let mut dropped = BTreeSet::new();
    let pruned: Vec<PrunedProfile> = records
        .iter()
        .map(|record| {
            dropped.extend(dropped_fields(record).map(str::to_owned));
            PrunedProfile::project(record)
        })
        .collect();

    let stored = file.replace(&pruned).await?;
    Ok(PruneSummary {
        records: pruned.len(),
        dropped_fields: dropped,
        path: stored.path.display().to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorCount {
    pub color: String,
    pub hex: Option<String>,
    pub members: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserdataStats {
    pub members: usize,
    pub distinct_colors: usize,
    pub top_colors: Vec<ColorCount>,
}

/// Color usage across an existing compact file, most used first.
pub async fn summarize_userdata(path: &Path, top: usize) -> Result<UserdataStats> {
    let users: Vec<CompactProfile> = JsonFile::new(path).load().await?;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for user in &users {
        for color in split_colors(user.colors.as_str().unwrap_or_default()) {
            *counts.entry(color).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let distinct_colors = ranked.len();

    let top_colors = ranked
        .into_iter()
        .take(top)
        .map(|(color, members)| ColorCount {
            color: color.to_string(),
            hex: decimal_to_hex(color),
            members,
        })
        .collect();

    Ok(UserdataStats {
        members: users.len(),
        distinct_colors,
        top_colors,
    })
}
