use crate::{RunEffect, RunMsg, RunPhase, RunState, RunStatus};

/// Exit code used when a termination signal stops the process.
const SIGNAL_EXIT_CODE: i32 = 130;

/// Pure update function: applies a message to state and returns any effects.
///
/// Messages that do not fit the current phase are ignored.
pub fn update(mut state: RunState, msg: RunMsg) -> (RunState, Vec<RunEffect>) {
    if state.is_terminal() {
        return (state, Vec::new());
    }

    let effects = match (state.phase(), msg) {
        (_, RunMsg::Terminated) => exit(&mut state, SIGNAL_EXIT_CODE, "terminated by signal"),
        (RunPhase::Booting, RunMsg::StatusLoaded(status)) => {
            state.observe(status);
            match status {
                RunStatus::Done => exit(&mut state, 0, "scraper is already done"),
                RunStatus::Absent => {
                    state.set_phase(RunPhase::Seeding);
                    vec![RunEffect::SeedPools]
                }
                RunStatus::Running => {
                    state.set_phase(RunPhase::Verifying);
                    vec![RunEffect::LoadBaseUrls]
                }
            }
        }
        (RunPhase::Seeding, RunMsg::PoolsSeeded) => {
            state.set_phase(RunPhase::Verifying);
            vec![
                RunEffect::PersistStatus(RunStatus::Running),
                RunEffect::LoadBaseUrls,
            ]
        }
        (RunPhase::Seeding, RunMsg::SeedFailed { reason }) => exit(&mut state, 1, &reason),
        (
            RunPhase::Verifying,
            RunMsg::BaseUrlsLoaded {
                page_base_url,
                item_base_url,
            },
        ) => match (non_empty(page_base_url), non_empty(item_base_url)) {
            (Some(page_base_url), Some(item_base_url)) => {
                state.set_phase(RunPhase::Working);
                vec![RunEffect::StartWork {
                    page_base_url,
                    item_base_url,
                }]
            }
            _ => exit(&mut state, 1, "base URL is not set"),
        },
        (RunPhase::Working, RunMsg::StagesFinished) => {
            state.set_phase(RunPhase::Finished);
            vec![
                RunEffect::PersistStatus(RunStatus::Done),
                RunEffect::Exit {
                    code: 0,
                    reason: "scraper is done".to_string(),
                },
            ]
        }
        (RunPhase::Working, RunMsg::StageFailed { stage, reason }) => {
            exit(&mut state, 1, &format!("{stage}: {reason}"))
        }
        _ => Vec::new(),
    };

    (state, effects)
}

fn exit(state: &mut RunState, code: i32, reason: &str) -> Vec<RunEffect> {
    state.set_phase(RunPhase::Exited { code });
    vec![RunEffect::Exit {
        code,
        reason: reason.to_string(),
    }]
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
