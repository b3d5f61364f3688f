use std::fmt;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Run status key.
pub const STATUS_KEY: &str = "status";
/// Base URL for category listing pages; the category number is appended.
pub const PAGE_BASE_URL_KEY: &str = "pageBaseUrl";
/// Base URL handed to the item updater.
pub const ITEM_BASE_URL_KEY: &str = "itemBaseUrl";
/// Set of categories that still have available pages.
pub const CATEGORIES_KEY: &str = "categories";

/// Items last updated before this hour (local time) today are due a refresh.
pub const DEFAULT_REFRESH_HOUR: u32 = 13;

/// The two kinds of work unit the scheduler distributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    Pages,
    Items,
}

impl WorkKind {
    pub fn label(self) -> &'static str {
        match self {
            WorkKind::Pages => "Pages",
            WorkKind::Items => "Items",
        }
    }

    /// Top-level index of categories with a non-empty pending pool.
    pub fn pending_index_key(self) -> String {
        format!("pending{}", self.label())
    }

    /// Dispatch journal for one category.
    pub fn pending_pool_key(self, category: &str) -> String {
        format!("pending{}:{}", self.label(), category)
    }

    /// Completion counter maintained by the downstream workers.
    pub fn counter_key(self) -> String {
        format!("updateCount:{}", self.label())
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Available page pool of a category.
pub fn available_pages_key(category: &str) -> String {
    format!("pages:{category}")
}

/// Per-category metadata blob stored under the category name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMeta {
    pub category_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_words: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
}

impl CategoryMeta {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Items whose `updatedAt` is older than the returned instant are stale.
///
/// The cutoff is today's `hour:00` in local time, so a run that starts in the
/// morning also refreshes items updated earlier the same morning.
pub fn refresh_cutoff(now: DateTime<Local>, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let naive = now.date_naive().and_time(time);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc))
}
