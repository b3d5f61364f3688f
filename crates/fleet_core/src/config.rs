use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::model::CategoryMeta;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Parse(String),
    #[error("config field '{0}' is missing or empty")]
    MissingField(&'static str),
    #[error("category '{0}' is declared more than once")]
    DuplicateCategory(String),
    #[error("category '{category}': {field} '{value}' is not a page number")]
    InvalidBound {
        category: String,
        field: &'static str,
        value: String,
    },
    #[error("category '{category}': end page {end} is before start page {start}")]
    EmptyRange { category: String, start: u64, end: u64 },
    #[error("category '{0}' has an open page range and no page-count service is configured")]
    UnresolvedBound(String),
}

/// A JSON value written either as a string or as a bare number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TextOrNumber {
    Number(u64),
    Text(String),
}

impl fmt::Display for TextOrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextOrNumber::Number(n) => write!(f, "{n}"),
            TextOrNumber::Text(s) => f.write_str(s.trim()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConfig {
    pub category: String,
    pub category_number: TextOrNumber,
    #[serde(default)]
    pub start: Option<TextOrNumber>,
    #[serde(default)]
    pub end: Option<TextOrNumber>,
    #[serde(default)]
    pub minimum_date: Option<String>,
    #[serde(default)]
    pub ignore_words: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

/// The scrape configuration file, read once at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeConfig {
    pub page_base_url: String,
    pub item_base_url: String,
    #[serde(default)]
    pub minimum_date: Option<String>,
    #[serde(default)]
    pub ignore_words: Vec<String>,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    #[serde(default)]
    pub items_categories: Vec<String>,
}

/// Page range of one category. `Open` ranges need the last page resolved externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRange {
    Bounded { start: u64, end: u64 },
    Open { start: u64 },
}

impl PageRange {
    pub fn start(&self) -> u64 {
        match *self {
            PageRange::Bounded { start, .. } | PageRange::Open { start } => start,
        }
    }

    /// Close an open range with a resolved last page.
    pub fn close(self, category: &str, last_page: u64) -> Result<PageRange, ConfigError> {
        let start = self.start();
        let end = match self {
            PageRange::Bounded { end, .. } => end,
            PageRange::Open { .. } => last_page,
        };
        if end < start {
            return Err(ConfigError::EmptyRange {
                category: category.to_string(),
                start,
                end,
            });
        }
        Ok(PageRange::Bounded { start, end })
    }

    /// Page units as decimal strings. Open ranges yield nothing.
    pub fn pages(&self) -> Vec<String> {
        match *self {
            PageRange::Bounded { start, end } => (start..=end).map(|p| p.to_string()).collect(),
            PageRange::Open { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCategory {
    pub name: String,
    pub meta: CategoryMeta,
    pub range: PageRange,
}

pub fn parse_config(raw: &str) -> Result<ScrapeConfig, ConfigError> {
    let config: ScrapeConfig =
        serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
    config.validate()?;
    Ok(config)
}

impl ScrapeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_base_url.trim().is_empty() {
            return Err(ConfigError::MissingField("pageBaseUrl"));
        }
        if self.item_base_url.trim().is_empty() {
            return Err(ConfigError::MissingField("itemBaseUrl"));
        }
        let mut seen = HashSet::new();
        for category in &self.categories {
            if category.category.trim().is_empty() {
                return Err(ConfigError::MissingField("categories[].category"));
            }
            if !seen.insert(category.category.as_str()) {
                return Err(ConfigError::DuplicateCategory(category.category.clone()));
            }
        }
        Ok(())
    }

    /// Merge global defaults into every category and parse its page range.
    pub fn resolve_categories(&self) -> Result<Vec<ResolvedCategory>, ConfigError> {
        self.categories
            .iter()
            .map(|category| self.resolve_category(category))
            .collect()
    }

    fn resolve_category(&self, category: &CategoryConfig) -> Result<ResolvedCategory, ConfigError> {
        // The category's own date wins; the global one is only a fallback.
        let minimum_date = category
            .minimum_date
            .clone()
            .or_else(|| self.minimum_date.clone());

        let mut ignore_words = self.ignore_words.clone();
        ignore_words.extend(category.ignore_words.iter().cloned());

        let filters = category
            .filters
            .iter()
            .map(|filter| stringify_filter(&filter.kind, &filter.value))
            .collect();

        let meta = CategoryMeta {
            category_number: category.category_number.to_string(),
            minimum_date,
            ignore_words,
            filters,
        };

        let start = match &category.start {
            Some(bound) => parse_bound(&category.category, "start", bound)?.unwrap_or(1),
            None => 1,
        };
        let range = match &category.end {
            Some(bound) => match parse_bound(&category.category, "end", bound)? {
                Some(end) => PageRange::Open { start }.close(&category.category, end)?,
                None => PageRange::Open { start },
            },
            None => PageRange::Open { start },
        };

        Ok(ResolvedCategory {
            name: category.category.clone(),
            meta,
            range,
        })
    }
}

/// Selector form of a filter as the page scraper expects it.
pub fn stringify_filter(kind: &str, value: &str) -> String {
    if kind == "maker" {
        format!("#searchMaker{value}")
    } else {
        format!("#searchAttributeValue{value}")
    }
}

/// `Ok(None)` means the bound is open (`"*"` or empty).
fn parse_bound(
    category: &str,
    field: &'static str,
    bound: &TextOrNumber,
) -> Result<Option<u64>, ConfigError> {
    let invalid = || ConfigError::InvalidBound {
        category: category.to_string(),
        field,
        value: bound.to_string(),
    };
    match bound {
        TextOrNumber::Number(0) => Err(invalid()),
        TextOrNumber::Number(n) => Ok(Some(*n)),
        TextOrNumber::Text(text) => {
            let text = text.trim();
            if text.is_empty() || text == "*" {
                return Ok(None);
            }
            match text.parse::<u64>() {
                Ok(0) | Err(_) => Err(invalid()),
                Ok(n) => Ok(Some(n)),
            }
        }
    }
}
