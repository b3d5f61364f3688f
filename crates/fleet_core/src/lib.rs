//! Scheduler core: pure data model, run-state machine and estimation math.
mod config;
mod effect;
mod estimate;
mod model;
mod msg;
mod retry;
mod state;
mod update;
mod wait;

pub use config::{
    parse_config, stringify_filter, CategoryConfig, ConfigError, FilterConfig, PageRange,
    ResolvedCategory, ScrapeConfig, TextOrNumber,
};
pub use effect::RunEffect;
pub use estimate::{format_eta, ProgressSnapshot, ThroughputWindow, DEFAULT_HISTORY_CAPACITY};
pub use model::{
    available_pages_key, refresh_cutoff, CategoryMeta, WorkKind, CATEGORIES_KEY,
    DEFAULT_REFRESH_HOUR, ITEM_BASE_URL_KEY, PAGE_BASE_URL_KEY, STATUS_KEY,
};
pub use msg::RunMsg;
pub use retry::RetryPolicy;
pub use state::{RunPhase, RunState, RunStatus};
pub use update::update;
pub use wait::CompletionWaitModel;
