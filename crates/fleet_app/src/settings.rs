use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use fleet_core::CompletionWaitModel;
use fleet_engine::{MongoItemStoreConfig, RedisStoreConfig, SchedulerSettings, WaitSettings};
use fleet_logging::LogDestination;
use log::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExecutionMode {
    #[default]
    Development,
    Production,
}

/// Process settings; every flag can also be given through its environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "fleet_app")]
#[command(
    version,
    about = "Scrape scheduler: leases catalog pages and stale items to a worker fleet"
)]
pub struct Settings {
    /// Coordination store URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Item store URL
    #[arg(long, env = "MONGODB_URL", default_value = "mongodb://127.0.0.1:27017")]
    pub mongodb_url: String,

    #[arg(long, env = "DB_NAME", default_value = "default_db")]
    pub db_name: String,

    /// Scrape configuration file, read on a fresh run and at the start of work
    #[arg(
        long,
        env = "CONFIG_FILE_PATH",
        default_value = "config/scrapConfig.json",
        value_name = "FILE"
    )]
    pub config_file: PathBuf,

    #[arg(long, env = "PAGE_WORKER_URL", default_value = "http://localhost:10000/updatePages")]
    pub page_worker_url: String,

    #[arg(long, env = "ITEM_WORKER_URL", default_value = "http://localhost:10000/updateItems")]
    pub item_worker_url: String,

    /// Service resolving the last page of open-ended categories
    #[arg(long, env = "PAGE_COUNT_URL")]
    pub page_count_url: Option<String>,

    #[arg(long, env = "EXECUTION_MODE", value_enum, default_value_t = ExecutionMode::Development)]
    pub execution_mode: ExecutionMode,

    /// Outbound proxy that must be reachable in production mode
    #[arg(long, env = "HTTP_PROXY")]
    pub http_proxy: Option<String>,

    /// URL fetched through the proxy by the production health check
    #[arg(long, env = "PROXY_PROBE_URL")]
    pub proxy_probe_url: Option<String>,

    /// Number of downstream worker processes
    #[arg(long, env = "FLEET_SIZE", default_value_t = 1)]
    pub fleet_size: u32,

    /// Units each worker processes concurrently
    #[arg(long, env = "WORKER_CONCURRENCY", default_value_t = 10)]
    pub worker_concurrency: u32,

    /// Average seconds a worker needs for one unit
    #[arg(long, env = "AVERAGE_LATENCY_SECS", default_value_t = 105)]
    pub average_latency_secs: u64,

    /// Upper bound on the end-of-stage wait
    #[arg(long, env = "MAX_STAGE_WAIT_SECS")]
    pub max_stage_wait_secs: Option<u64>,

    /// Log output: terminal, file or both
    #[arg(long, env = "LOG_DESTINATION", default_value = "terminal")]
    pub log_destination: LogDestination,

    #[arg(long, env = "LOG_LEVEL", default_value = "info", value_parser = parse_level)]
    pub log_level: LevelFilter,
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level '{value}'"))
}

impl Settings {
    pub fn redis(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.redis_url.trim().to_string(),
            password: self.redis_password.clone(),
        }
    }

    pub fn mongo(&self) -> MongoItemStoreConfig {
        MongoItemStoreConfig {
            url: self.mongodb_url.trim().to_string(),
            database: self.db_name.clone(),
        }
    }

    pub fn wait(&self) -> WaitSettings {
        WaitSettings {
            model: CompletionWaitModel {
                fleet_size: self.fleet_size,
                per_worker_concurrency: self.worker_concurrency,
                average_latency: Duration::from_secs(self.average_latency_secs),
                max_wait: self.max_stage_wait_secs.map(Duration::from_secs),
            },
            ..WaitSettings::default()
        }
    }

    pub fn scheduler(&self) -> SchedulerSettings {
        SchedulerSettings {
            page_worker_url: self.page_worker_url.clone(),
            item_worker_url: self.item_worker_url.clone(),
            wait: self.wait(),
            ..SchedulerSettings::default()
        }
    }

    pub fn is_production(&self) -> bool {
        self.execution_mode == ExecutionMode::Production
    }
}
