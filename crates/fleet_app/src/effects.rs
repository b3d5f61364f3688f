use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_core::{
    parse_config, update, RunEffect, RunMsg, RunState, RunStatus, ScrapeConfig,
    ITEM_BASE_URL_KEY, PAGE_BASE_URL_KEY, STATUS_KEY,
};
use fleet_engine::{
    stage_label, CoordinationStore, DispatchScheduler, Dispatcher, EstimatorSettings, ItemStore,
    LogProgressSink, PageBoundResolver, PoolSeeder, ProgressEstimator, RecoveryManager,
    SchedulerSettings, StoreError,
};
use fleet_logging::{fleet_debug, fleet_error, fleet_info, fleet_warn};
use tokio_util::sync::CancellationToken;

/// Executes run-state effects against the stores and feeds results back as messages.
pub struct EffectRunner {
    store: Arc<dyn CoordinationStore>,
    items: Arc<dyn ItemStore>,
    dispatcher: Arc<dyn Dispatcher>,
    resolver: Arc<dyn PageBoundResolver>,
    config_file: PathBuf,
    scheduler: SchedulerSettings,
    estimator: EstimatorSettings,
    cancel: CancellationToken,
}

impl EffectRunner {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        items: Arc<dyn ItemStore>,
        dispatcher: Arc<dyn Dispatcher>,
        resolver: Arc<dyn PageBoundResolver>,
        config_file: PathBuf,
        scheduler: SchedulerSettings,
    ) -> Self {
        let estimator = EstimatorSettings {
            refresh_hour: scheduler.refresh_hour,
            ..EstimatorSettings::default()
        };
        Self {
            store,
            items,
            dispatcher,
            resolver,
            config_file,
            scheduler,
            estimator,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn load_status(&self) -> Result<RunStatus, StoreError> {
        let value = self.store.get_value(STATUS_KEY).await?;
        let status = RunStatus::from_stored(value.as_deref());
        fleet_info!("[Startup] run status: {}", status);
        Ok(status)
    }

    /// Runs one effect. `Exit` is handled by [`drive`] and never reaches here.
    pub async fn apply(&self, effect: RunEffect) -> Option<RunMsg> {
        match effect {
            RunEffect::SeedPools => Some(self.seed_pools().await),
            RunEffect::PersistStatus(status) => {
                self.persist_status(status).await;
                None
            }
            RunEffect::LoadBaseUrls => Some(self.load_base_urls().await),
            RunEffect::StartWork {
                page_base_url,
                item_base_url,
            } => Some(self.start_work(&page_base_url, &item_base_url).await),
            RunEffect::Exit { .. } => None,
        }
    }

    async fn seed_pools(&self) -> RunMsg {
        let config = match read_config(&self.config_file) {
            Ok(config) => config,
            Err(reason) => {
                fleet_error!("[Seed] {}", reason);
                return RunMsg::SeedFailed { reason };
            }
        };
        let seeder = PoolSeeder::new(self.store.clone(), self.resolver.clone());
        match seeder.seed(&config).await {
            Ok(report) => {
                if !report.categories_skipped.is_empty() {
                    fleet_warn!(
                        "[Seed] categories skipped: {}",
                        report.categories_skipped.join(", ")
                    );
                }
                RunMsg::PoolsSeeded
            }
            Err(err) => {
                fleet_error!("[Seed] {}", err);
                RunMsg::SeedFailed {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn persist_status(&self, status: RunStatus) {
        let Some(value) = status.as_stored() else {
            return;
        };
        match self.store.set_value(STATUS_KEY, value).await {
            Ok(()) => fleet_debug!("status set to {}", value),
            Err(err) => fleet_error!("failed to persist status '{}': {}", value, err),
        }
    }

    async fn load_base_urls(&self) -> RunMsg {
        let page_base_url = self.read_value(PAGE_BASE_URL_KEY).await;
        let item_base_url = self.read_value(ITEM_BASE_URL_KEY).await;
        RunMsg::BaseUrlsLoaded {
            page_base_url,
            item_base_url,
        }
    }

    async fn read_value(&self, key: &str) -> Option<String> {
        match self.store.get_value(key).await {
            Ok(value) => value,
            Err(err) => {
                fleet_error!("[Startup] failed to read '{}': {}", key, err);
                None
            }
        }
    }

    async fn start_work(&self, page_base_url: &str, item_base_url: &str) -> RunMsg {
        let item_categories = match read_config(&self.config_file) {
            Ok(config) => config.items_categories,
            Err(reason) => {
                return RunMsg::StageFailed {
                    stage: "Startup".to_string(),
                    reason,
                }
            }
        };

        RecoveryManager::new(self.store.clone(), self.items.clone())
            .recover()
            .await;

        let estimator_cancel = self.cancel.child_token();
        let estimator = ProgressEstimator::new(
            self.store.clone(),
            self.items.clone(),
            item_categories.clone(),
            self.estimator,
        )
        .spawn(estimator_cancel.clone(), Arc::new(LogProgressSink));

        let scheduler = DispatchScheduler::new(
            self.store.clone(),
            self.items.clone(),
            self.dispatcher.clone(),
            self.scheduler.clone(),
        );
        let outcome = scheduler
            .run(page_base_url, item_base_url, &item_categories)
            .await;

        estimator_cancel.cancel();
        if let Err(err) = estimator.await {
            fleet_warn!("estimator task ended abnormally: {}", err);
        }

        match outcome {
            Ok(_) => RunMsg::StagesFinished,
            Err(err) => RunMsg::StageFailed {
                stage: stage_label(err.stage).to_string(),
                reason: err.source.to_string(),
            },
        }
    }

    /// Cleanup before the process exits.
    pub fn shutdown(&self, code: i32, reason: &str) {
        self.cancel.cancel();
        if code == 0 {
            fleet_info!("exiting: {}", reason);
        } else {
            fleet_error!("exiting with code {}: {}", code, reason);
        }
    }
}

fn read_config(path: &Path) -> Result<ScrapeConfig, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("cannot read config file '{}': {err}", path.display()))?;
    parse_config(&raw).map_err(|err| format!("invalid config file '{}': {err}", path.display()))
}

/// Drives the run-state machine until it asks to exit; returns the exit code.
///
/// `shutdown` resolves when the process is asked to stop. The effect in flight
/// at that moment is abandoned.
pub async fn drive<F>(runner: &EffectRunner, shutdown: F) -> i32
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut state = RunState::new();
    let mut inbox = VecDeque::new();

    let first = tokio::select! {
        biased;
        _ = &mut shutdown => RunMsg::Terminated,
        status = runner.load_status() => match status {
            Ok(status) => RunMsg::StatusLoaded(status),
            Err(err) => {
                runner.shutdown(1, &format!("[Startup] cannot read run status: {err}"));
                return 1;
            }
        },
    };
    inbox.push_back(first);

    while let Some(msg) = inbox.pop_front() {
        let (next, effects) = update(state, msg);
        state = next;

        for effect in effects {
            if let RunEffect::Exit { code, reason } = effect {
                runner.shutdown(code, &reason);
                return code;
            }
            let reply = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    inbox.clear();
                    inbox.push_back(RunMsg::Terminated);
                    break;
                }
                reply = runner.apply(effect) => reply,
            };
            inbox.extend(reply);
        }
    }

    runner.shutdown(1, "run state machine stopped without an exit");
    1
}
