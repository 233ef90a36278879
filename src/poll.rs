//! Poll-with-timeout primitive for provider actions.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

use crate::provider::{Action, ActionStatus, Provider};

/// Interval and upper bound applied while waiting on an action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between status reloads.
    pub interval: Duration,
    /// Maximum time spent waiting for a terminal status.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Errors raised while waiting for an action.
#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// The provider reported the action as errored.
    #[error("action {action_id} ({kind}) errored")]
    Failed {
        /// Action identifier.
        action_id: u64,
        /// Action type.
        kind: String,
    },
    /// The action was still in progress when the policy's timeout elapsed.
    #[error("action {action_id} ({kind}) still in progress after {} seconds", waited.as_secs())]
    Timeout {
        /// Action identifier.
        action_id: u64,
        /// Action type.
        kind: String,
        /// Time spent waiting.
        waited: Duration,
    },
    /// Reloading the action failed.
    #[error("failed to reload action {action_id}: {source}")]
    Provider {
        /// Action identifier.
        action_id: u64,
        /// Underlying provider error.
        #[source]
        source: E,
    },
}

/// Waits until `action` reaches a terminal status.
///
/// Each iteration sleeps for the policy interval before reloading the
/// action. An already terminal action is returned without polling.
///
/// # Errors
///
/// Returns [`PollError::Failed`] for errored actions, [`PollError::Timeout`]
/// when the action is still running after the policy timeout, and
/// [`PollError::Provider`] when a reload fails.
pub async fn wait_for_action<P: Provider>(
    provider: &P,
    action: Action,
    policy: PollPolicy,
) -> Result<Action, PollError<P::Error>> {
    let started = Instant::now();
    let mut current = action;

    while current.status == ActionStatus::InProgress {
        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(PollError::Timeout {
                action_id: current.id,
                kind: current.kind,
                waited,
            });
        }

        sleep(policy.interval).await;
        let action_id = current.id;
        debug!(action_id, kind = %current.kind, "reloading action status");
        current = provider
            .get_action(action_id)
            .await
            .map_err(|source| PollError::Provider { action_id, source })?;
    }

    debug!(action_id = current.id, status = %current.status, "action reached terminal status");
    match current.status {
        ActionStatus::Errored => Err(PollError::Failed {
            action_id: current.id,
            kind: current.kind,
        }),
        ActionStatus::Completed | ActionStatus::InProgress => Ok(current),
    }
}
