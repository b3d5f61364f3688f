#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEffect {
    /// Parse the configuration file and seed base URLs, metadata and page pools.
    SeedPools,
    PersistStatus(crate::RunStatus),
    LoadBaseUrls,
    /// Run recovery, start the estimator and drive both dispatch stages.
    StartWork {
        page_base_url: String,
        item_base_url: String,
    },
    Exit { code: i32, reason: String },
}
