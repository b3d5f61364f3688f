use std::fmt;

/// Whole-run status persisted under the `status` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    /// Never started, or reset by an operator after completion.
    #[default]
    Absent,
    Running,
    Done,
}

impl RunStatus {
    /// Unknown stored values are treated like an unset key.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("running") => RunStatus::Running,
            Some("done") => RunStatus::Done,
            _ => RunStatus::Absent,
        }
    }

    /// Stored representation; `Absent` is represented by the key not existing.
    pub fn as_stored(&self) -> Option<&'static str> {
        match self {
            RunStatus::Absent => None,
            RunStatus::Running => Some("running"),
            RunStatus::Done => Some("done"),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_stored().unwrap_or("absent"))
    }
}

/// Where this process is in its own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    /// Waiting for the stored status.
    #[default]
    Booting,
    /// Parsing configuration and seeding pools for a fresh run.
    Seeding,
    /// Checking that the base URLs are present in the store.
    Verifying,
    /// Recovery, estimator and both dispatch stages are running.
    Working,
    /// Both stages exhausted and `done` persisted.
    Finished,
    Exited { code: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunState {
    phase: RunPhase,
    observed: Option<RunStatus>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Status read from the store when the process booted.
    pub fn observed_status(&self) -> Option<RunStatus> {
        self.observed
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, RunPhase::Finished | RunPhase::Exited { .. })
    }

    pub(crate) fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
    }

    pub(crate) fn observe(&mut self, status: RunStatus) {
        self.observed = Some(status);
    }
}
