use std::time::Duration;

/// Time-based stand-in for "every dispatched unit has been processed".
///
/// Downstream workers never acknowledge a batch back to the scheduler, so the
/// end of a stage is inferred from how long the fleet needs to drain the
/// pending journals:
/// `pending / (fleet_size * per_worker_concurrency) * average_latency`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionWaitModel {
    pub fleet_size: u32,
    pub per_worker_concurrency: u32,
    pub average_latency: Duration,
    pub max_wait: Option<Duration>,
}

impl Default for CompletionWaitModel {
    fn default() -> Self {
        Self {
            fleet_size: 1,
            per_worker_concurrency: 10,
            average_latency: Duration::from_secs(105),
            max_wait: None,
        }
    }
}

impl CompletionWaitModel {
    pub fn budget(&self, total_pending: u64) -> Duration {
        if total_pending == 0 {
            return Duration::ZERO;
        }
        let slots =
            u64::from(self.fleet_size.max(1)) * u64::from(self.per_worker_concurrency.max(1));
        let rounds = total_pending as f64 / slots as f64;
        let budget = Duration::try_from_secs_f64(self.average_latency.as_secs_f64() * rounds)
            .unwrap_or(Duration::MAX);
        match self.max_wait {
            Some(cap) => budget.min(cap),
            None => budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_scales_with_pending_over_capacity() {
        let model = CompletionWaitModel {
            fleet_size: 2,
            per_worker_concurrency: 5,
            average_latency: Duration::from_secs(100),
            max_wait: None,
        };
        assert_eq!(model.budget(0), Duration::ZERO);
        assert_eq!(model.budget(5), Duration::from_secs(50));
        assert_eq!(model.budget(30), Duration::from_secs(300));
    }

    #[test]
    fn budget_is_capped() {
        let model = CompletionWaitModel {
            max_wait: Some(Duration::from_secs(60)),
            ..CompletionWaitModel::default()
        };
        assert_eq!(model.budget(1_000), Duration::from_secs(60));
    }

    #[test]
    fn huge_latency_saturates_instead_of_overflowing() {
        let capped = CompletionWaitModel {
            average_latency: Duration::from_secs(u64::MAX / 2),
            max_wait: Some(Duration::from_secs(60)),
            ..CompletionWaitModel::default()
        };
        assert_eq!(capped.budget(1_000), Duration::from_secs(60));

        let uncapped = CompletionWaitModel {
            max_wait: None,
            ..capped
        };
        assert_eq!(uncapped.budget(1_000), Duration::MAX);
    }

    #[test]
    fn zero_sized_fleet_is_treated_as_one() {
        let model = CompletionWaitModel {
            fleet_size: 0,
            per_worker_concurrency: 0,
            average_latency: Duration::from_secs(10),
            max_wait: None,
        };
        assert_eq!(model.budget(3), Duration::from_secs(30));
    }
}
