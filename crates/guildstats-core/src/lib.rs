//! Profile model, guild membership predicate and the compact output mapping.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CRATE_NAME: &str = "guildstats-core";

/// Guild identifier matched against the visible text of a guild tag.
pub const DEFAULT_GUILD: &str = "PIXELCONS";

/// Fields kept by [`PrunedProfile::project`], in output order.
pub const PRUNED_FIELDS: [&str; 5] = ["id", "name", "level", "guildTag", "colors"];

static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("markup tag pattern is valid"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile record has no `id` field")]
    MissingId,
}

/// `Some(Value::Null)` for an explicit `null`, so absence stays distinguishable.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Full user record as returned by the profile API or found in a bulk dump.
///
/// The propagated fields are kept loosely typed: a record is never rejected
/// for what it carries, only for lacking an `id` once it is compacted.
/// Everything else the API sends (experience, social handles, moderation
/// state, ...) lands in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProfile {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub level: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub guild_tag: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub colors: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawProfile {
    /// Only a string tag can name a guild; `null` or any other type counts as empty.
    pub fn is_member_of(&self, guild: &str) -> bool {
        is_guild_member(self.guild_tag.as_ref().and_then(Value::as_str), guild)
    }

    /// True for a `{}` body, which carries no profile at all.
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.name.is_none()
            && self.level.is_none()
            && self.guild_tag.is_none()
            && self.colors.is_none()
            && self.extra.is_empty()
    }
}

/// Persisted four-field record; short keys keep `userdata.json` small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactProfile {
    #[serde(rename = "i")]
    pub id: Value,
    #[serde(rename = "n")]
    pub name: Value,
    #[serde(rename = "l")]
    pub level: Value,
    #[serde(rename = "c")]
    pub colors: Value,
}

impl TryFrom<&RawProfile> for CompactProfile {
    type Error = ProfileError;

    /// Defaults apply to absent fields only; a present value, `null` included,
    /// is copied as is.
    fn try_from(raw: &RawProfile) -> Result<Self, Self::Error> {
        let id = raw.id.clone().ok_or(ProfileError::MissingId)?;
        Ok(Self {
            id,
            name: raw.name.clone().unwrap_or_else(|| Value::from("")),
            level: raw.level.clone().unwrap_or_else(|| Value::from(0)),
            colors: raw.colors.clone().unwrap_or_else(|| Value::from("")),
        })
    }
}

/// Remove every substring matching `<[^>]+>`. No nesting awareness.
pub fn strip_markup(input: &str) -> String {
    MARKUP_TAG.replace_all(input, "").into_owned()
}

/// True when the tag's visible text contains `guild`, case-insensitively.
/// A missing tag is treated as empty.
pub fn is_guild_member(guild_tag: Option<&str>, guild: &str) -> bool {
    let plain = strip_markup(guild_tag.unwrap_or_default());
    plain.trim().to_uppercase().contains(&guild.to_uppercase())
}

/// Filter `profiles` down to guild members and compact them, keeping input order.
pub fn compact_members<'a, I>(profiles: I, guild: &str) -> Result<Vec<CompactProfile>, ProfileError>
where
    I: IntoIterator<Item = &'a RawProfile>,
{
    profiles
        .into_iter()
        .filter(|p| p.is_member_of(guild))
        .map(CompactProfile::try_from)
        .collect()
}

/// Record shape produced by the in-place pruning pass. Fields absent from the
/// source stay absent; nothing is defaulted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunedProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_tag: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<Value>,
}

impl PrunedProfile {
    /// Project a record onto [`PRUNED_FIELDS`]. A present `null` is kept.
    pub fn project(record: &Map<String, Value>) -> Self {
        Self {
            id: record.get("id").cloned(),
            name: record.get("name").cloned(),
            level: record.get("level").cloned(),
            guild_tag: record.get("guildTag").cloned(),
            colors: record.get("colors").cloned(),
        }
    }
}

/// Keys of `record` that pruning would drop.
pub fn dropped_fields(record: &Map<String, Value>) -> impl Iterator<Item = &str> {
    record
        .keys()
        .map(String::as_str)
        .filter(|k| !PRUNED_FIELDS.iter().any(|field| field == k))
}

/// Split a compact `colors` string into its trimmed, non-empty entries.
pub fn split_colors(colors: &str) -> impl Iterator<Item = &str> {
    colors.split(',').map(str::trim).filter(|c| !c.is_empty())
}

/// Render a decimal color value as `#RRGGBB`. Returns `None` for anything that
/// is not a non-negative integer.
pub fn decimal_to_hex(color: &str) -> Option<String> {
    let value: u32 = color.trim().parse().ok()?;
    Some(format!("#{value:06X}"))
}
