//! Fleet engine: coordination store, item store and the dispatch protocol.
mod dispatch;
mod estimator;
mod health;
mod items;
mod lease;
mod recovery;
mod scheduler;
mod seed;
mod store;

pub use dispatch::{
    dispatch_request, DispatchError, DispatchFailure, DispatchReport, DispatchSettings,
    Dispatcher, ItemRequest, PageRequest, ReqwestDispatcher,
};
pub use estimator::{
    completion_time, EstimatorError, EstimatorSettings, LogProgressSink, ProgressEstimator,
    ProgressSink,
};
pub use health::{HealthCheckError, ProxyHealthCheck};
pub use items::{
    ItemRecord, ItemStore, ItemStoreError, ItemStoreResult, MemoryItemStore, MongoItemStore,
    MongoItemStoreConfig,
};
pub use lease::{LeaseError, LeaseReceipt, LeaseSettings, WorkLeaseManager};
pub use recovery::{CompletionWaiter, RecoveryManager, RecoveryReport, WaitReport, WaitSettings};
pub use scheduler::{
    stage_label, DispatchScheduler, SchedulerError, SchedulerSettings, StageError, StageReport,
};
pub use seed::{
    HttpPageBoundResolver, NoBoundResolver, PageBoundResolver, PoolSeeder, SeedError, SeedReport,
};
pub use store::{
    CoordinationStore, MemoryStore, RedisStore, RedisStoreConfig, StoreError, StoreOp,
    StoreResult, WatchGuard,
};
