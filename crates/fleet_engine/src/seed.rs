//! Fresh-run seeding of the coordination store from the scrape configuration.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    available_pages_key, ConfigError, PageRange, ResolvedCategory, ScrapeConfig, CATEGORIES_KEY,
    ITEM_BASE_URL_KEY, PAGE_BASE_URL_KEY,
};
use fleet_logging::{fleet_debug, fleet_info, fleet_warn};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{CoordinationStore, StoreError};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("last page of '{category}' could not be resolved: {reason}")]
    Resolve { category: String, reason: String },
    #[error("metadata of '{category}' could not be encoded: {reason}")]
    Encode { category: String, reason: String },
}

/// Finds the last listing page of a category whose configured range is open.
#[async_trait::async_trait]
pub trait PageBoundResolver: Send + Sync {
    async fn last_page(
        &self,
        category: &ResolvedCategory,
        page_base_url: &str,
    ) -> Result<u64, SeedError>;
}

/// Used when no page-count service is configured: open ranges are a configuration error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBoundResolver;

#[async_trait::async_trait]
impl PageBoundResolver for NoBoundResolver {
    async fn last_page(
        &self,
        category: &ResolvedCategory,
        _page_base_url: &str,
    ) -> Result<u64, SeedError> {
        Err(ConfigError::UnresolvedBound(category.name.clone()).into())
    }
}

#[derive(Debug, Serialize)]
struct PageCountRequest<'a> {
    url: String,
    filters: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageCountReply {
    last_page: u64,
}

/// Asks the page-count service: `POST {url, filters}` answered by `{lastPage}`.
#[derive(Debug, Clone)]
pub struct HttpPageBoundResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPageBoundResolver {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SeedError> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SeedError::Resolve {
                category: String::new(),
                reason: format!("http client setup failed: {err}"),
            })?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl PageBoundResolver for HttpPageBoundResolver {
    async fn last_page(
        &self,
        category: &ResolvedCategory,
        page_base_url: &str,
    ) -> Result<u64, SeedError> {
        let failed = |reason: String| SeedError::Resolve {
            category: category.name.clone(),
            reason,
        };
        let request = PageCountRequest {
            url: format!("{page_base_url}{}", category.meta.category_number),
            filters: &category.meta.filters,
        };
        let body = serde_json::to_vec(&request).map_err(|err| failed(err.to_string()))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| failed(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("page-count service answered {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| failed(err.to_string()))?;
        let reply: PageCountReply =
            serde_json::from_slice(&bytes).map_err(|err| failed(err.to_string()))?;
        Ok(reply.last_page)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub categories_seeded: usize,
    pub pages_seeded: usize,
    /// Categories whose last page could not be determined.
    pub categories_skipped: Vec<String>,
}

/// Writes base URLs, category metadata and available page pools for a fresh run.
pub struct PoolSeeder {
    store: Arc<dyn CoordinationStore>,
    resolver: Arc<dyn PageBoundResolver>,
}

impl PoolSeeder {
    pub fn new(store: Arc<dyn CoordinationStore>, resolver: Arc<dyn PageBoundResolver>) -> Self {
        Self { store, resolver }
    }

    pub async fn seed(&self, config: &ScrapeConfig) -> Result<SeedReport, SeedError> {
        let categories = config.resolve_categories()?;
        self.store
            .set_value(PAGE_BASE_URL_KEY, &config.page_base_url)
            .await?;
        self.store
            .set_value(ITEM_BASE_URL_KEY, &config.item_base_url)
            .await?;

        let mut report = SeedReport::default();
        for category in &categories {
            let range = match self.close_range(category, &config.page_base_url).await {
                Ok(range) => range,
                Err(SeedError::Resolve {
                    category: name,
                    reason,
                }) => {
                    fleet_warn!("[Seed] skipping '{}': {}", name, reason);
                    report.categories_skipped.push(name);
                    continue;
                }
                Err(SeedError::Config(ConfigError::EmptyRange {
                    category: name,
                    start,
                    end,
                })) => {
                    fleet_warn!(
                        "[Seed] skipping '{}': no pages between {} and {}",
                        name,
                        start,
                        end
                    );
                    report.categories_skipped.push(name);
                    continue;
                }
                Err(err) => return Err(err),
            };
            report.pages_seeded += self.seed_category(category, range).await?;
            report.categories_seeded += 1;
        }

        fleet_info!(
            "[Seed] {} categories with {} pages seeded, {} skipped",
            report.categories_seeded,
            report.pages_seeded,
            report.categories_skipped.len()
        );
        Ok(report)
    }

    async fn close_range(
        &self,
        category: &ResolvedCategory,
        page_base_url: &str,
    ) -> Result<PageRange, SeedError> {
        match category.range {
            PageRange::Bounded { .. } => Ok(category.range),
            PageRange::Open { .. } => {
                let last = self.resolver.last_page(category, page_base_url).await?;
                fleet_debug!("[Seed] '{}' ends at page {}", category.name, last);
                Ok(category.range.close(&category.name, last)?)
            }
        }
    }

    async fn seed_category(
        &self,
        category: &ResolvedCategory,
        range: PageRange,
    ) -> Result<usize, SeedError> {
        let meta = category.meta.to_json().map_err(|err| SeedError::Encode {
            category: category.name.clone(),
            reason: err.to_string(),
        })?;
        let mut pages = range.pages();
        fastrand::shuffle(&mut pages);

        self.store.set_value(&category.name, &meta).await?;
        self.store
            .add_all(&available_pages_key(&category.name), &pages)
            .await?;
        self.store
            .add_all(CATEGORIES_KEY, &[category.name.clone()])
            .await?;
        Ok(pages.len())
    }
}
