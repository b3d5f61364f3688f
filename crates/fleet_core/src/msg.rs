#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMsg {
    /// The `status` key was read at startup.
    StatusLoaded(crate::RunStatus),
    /// Configuration parsed and every pool seeded.
    PoolsSeeded,
    /// Configuration could not be parsed or seeded.
    SeedFailed { reason: String },
    /// Base URLs read back from the store.
    BaseUrlsLoaded {
        page_base_url: Option<String>,
        item_base_url: Option<String>,
    },
    /// Page and item stages both exhausted.
    StagesFinished,
    /// A stage aborted on a store failure.
    StageFailed { stage: String, reason: String },
    /// SIGINT/SIGTERM received.
    Terminated,
}
