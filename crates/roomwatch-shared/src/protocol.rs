//! Wire shapes of the host responses the network tap hands to the engine.
//!
//! The host serializes numeric fields inconsistently (sometimes numbers,
//! sometimes strings), so the numeric-ish fields deserialize through a
//! lenient coercion helper instead of failing the whole payload. Item
//! batches are lenient one level up as well: a malformed element is skipped
//! with a warning, and its valid siblings still come through.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// One private-message log item as delivered by the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogItem {
    #[serde(deserialize_with = "lenient_u64")]
    pub log_id: u64,
    /// `DD/MM HH:MM[:SS]` timestamp string.
    #[serde(default)]
    pub log_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    /// Avatar thumbnail URL.
    #[serde(default)]
    pub user_tumb: String,
    #[serde(default)]
    pub log_content: String,
}

/// A private-log response body: `pload` carries the page being viewed,
/// `plogs` the history backlog. Both are batches of [`LogItem`]s.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostLogResponse {
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    pub last: Option<u64>,
    #[serde(default)]
    pub pico: Option<String>,
    #[serde(default, deserialize_with = "lenient_items")]
    pub pload: Vec<LogItem>,
    #[serde(default, deserialize_with = "lenient_items")]
    pub plogs: Vec<LogItem>,
}

impl HostLogResponse {
    /// All items in wire order: history backlog first, then the live page.
    pub fn items(self) -> Vec<LogItem> {
        let mut items = self.plogs;
        items.extend(self.pload);
        items
    }
}

/// Item batches tolerate malformed elements: each is parsed on its own and
/// a failure drops only that element, with a warning.
fn lenient_items<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<LogItem>, D::Error> {
    let raw: Vec<serde_json::Value> = Vec::deserialize(de)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<LogItem>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(error = %e, "skipping malformed log item");
                None
            }
        })
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Num(u64),
    Str(String),
}

fn lenient_u64<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    match NumberOrString::deserialize(de)? {
        NumberOrString::Num(n) => Ok(n),
        NumberOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_opt_u64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u64>, D::Error> {
    match Option::<NumberOrString>::deserialize(de)? {
        None => Ok(None),
        Some(NumberOrString::Num(n)) => Ok(Some(n)),
        Some(NumberOrString::Str(s)) => {
            s.trim().parse().map(Some).map_err(serde::de::Error::custom)
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    match NumberOrString::deserialize(de)? {
        NumberOrString::Num(n) => Ok(n.to_string()),
        NumberOrString::Str(s) => Ok(s),
    }
}
