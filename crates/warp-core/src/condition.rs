//! Pod lifecycle conditions.
//!
//! [`evaluate`] classifies a single [`PodNotification`] against a
//! [`Milestone`] without side effects. [`wait_for`] drives a notification
//! stream through the evaluator until the milestone is decided.
//!
//! A pod that reached a final phase before the milestone is reported as
//! [`Condition::Terminal`], not as an error: the caller switches to printing
//! the pod's logs instead of failing.

use std::fmt;

use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::{
    pod::{ContainerState, EventKind, PodNotification, PodPhase, PodSnapshot},
    Error, Result,
};

/// Target condition to wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Milestone {
    /// Scheduled, and every declared init container is running.
    InitReady,
    /// Pod running and the named container running.
    ContainerRunning(String),
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitReady => write!(f, "init-ready"),
            Self::ContainerRunning(name) => write!(f, "container '{name}' running"),
        }
    }
}

/// Why a milestone can no longer be reached by waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// The pod (or the container) already ran to completion.
    Completed,
    /// The pod is already running, so init-ready has passed.
    AlreadyRunning,
}

/// Outcome of evaluating one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Pending,
    Satisfied,
    Terminal(Terminal),
}

/// Failures the evaluator reports instead of waiting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    /// The pod was deleted.
    #[error("pod not found")]
    NotFound,
    /// The container name never appears in the pod status.
    #[error("no container found with name '{0}'")]
    NoSuchContainer(String),
    /// The container reported none of waiting/running/terminated.
    #[error("unknown container state for '{0}'")]
    UnknownState(String),
}

impl ConditionError {
    fn into_error(self, pod_name: &str) -> Error {
        match self {
            Self::NotFound => Error::NotFound(pod_name.to_string()),
            Self::NoSuchContainer(name) => Error::NoSuchContainer(name),
            Self::UnknownState(name) => Error::UnknownContainerState(name),
        }
    }
}

/// Classify a notification against a milestone.
pub fn evaluate(
    notification: &PodNotification,
    milestone: &Milestone,
) -> std::result::Result<Condition, ConditionError> {
    if notification.kind == EventKind::Deleted {
        return Err(ConditionError::NotFound);
    }
    let pod = &notification.pod;
    match milestone {
        Milestone::InitReady => Ok(init_ready(pod)),
        Milestone::ContainerRunning(name) => container_running(pod, name),
    }
}

fn init_ready(pod: &PodSnapshot) -> Condition {
    if pod.phase.is_final() {
        return Condition::Terminal(Terminal::Completed);
    }
    match pod.phase {
        PodPhase::Running => Condition::Terminal(Terminal::AlreadyRunning),
        PodPhase::Pending if pod.scheduled && init_containers_running(pod) => Condition::Satisfied,
        _ => Condition::Pending,
    }
}

fn init_containers_running(pod: &PodSnapshot) -> bool {
    pod.init_container_statuses.len() == pod.declared_init_containers
        && pod
            .init_container_statuses
            .iter()
            .all(|status| status.state == ContainerState::Running)
}

fn container_running(
    pod: &PodSnapshot,
    name: &str,
) -> std::result::Result<Condition, ConditionError> {
    if pod.phase.is_final() {
        return Ok(Condition::Terminal(Terminal::Completed));
    }
    match pod.phase {
        PodPhase::Running => {
            let status = pod
                .container(name)
                .ok_or_else(|| ConditionError::NoSuchContainer(name.to_string()))?;
            match status.state {
                ContainerState::Waiting => Ok(Condition::Pending),
                ContainerState::Running => Ok(Condition::Satisfied),
                ContainerState::Terminated => {
                    tracing::debug!(container = name, "container terminated");
                    Ok(Condition::Terminal(Terminal::Completed))
                }
                ContainerState::Unknown => Err(ConditionError::UnknownState(name.to_string())),
            }
        }
        _ => Ok(Condition::Pending),
    }
}

/// Decided result of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The milestone was reached; carries the satisfying snapshot.
    Reached(PodSnapshot),
    /// The milestone can no longer be reached.
    Terminal(Terminal, PodSnapshot),
}

/// Consume notifications until `milestone` is decided.
///
/// Errors from the stream itself are returned as-is. A stream that ends
/// before a decision is [`Error::WatchClosed`].
pub async fn wait_for<S>(pod_name: &str, mut notifications: S, milestone: &Milestone) -> Result<WaitOutcome>
where
    S: Stream<Item = Result<PodNotification>> + Unpin,
{
    while let Some(notification) = notifications.next().await {
        let notification = notification?;
        match evaluate(&notification, milestone).map_err(|e| e.into_error(pod_name))? {
            Condition::Pending => {}
            Condition::Satisfied => return Ok(WaitOutcome::Reached(notification.pod)),
            Condition::Terminal(reason) => {
                return Ok(WaitOutcome::Terminal(reason, notification.pod))
            }
        }
    }
    Err(Error::WatchClosed(pod_name.to_string()))
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::pod::ContainerStatus;

    fn fresh_pod() -> PodSnapshot {
        PodSnapshot {
            phase: PodPhase::Pending,
            scheduled: false,
            declared_init_containers: 1,
            init_container_statuses: Vec::new(),
            container_statuses: Vec::new(),
        }
    }

    fn scheduled_pending() -> PodSnapshot {
        PodSnapshot {
            phase: PodPhase::Pending,
            scheduled: true,
            declared_init_containers: 1,
            init_container_statuses: vec![ContainerStatus::new(
                "sync-init",
                ContainerState::Running,
            )],
            container_statuses: Vec::new(),
        }
    }

    fn running_with(name: &str, state: ContainerState) -> PodSnapshot {
        PodSnapshot {
            phase: PodPhase::Running,
            scheduled: true,
            declared_init_containers: 1,
            init_container_statuses: Vec::new(),
            container_statuses: vec![ContainerStatus::new(name, state)],
        }
    }

    fn modified(pod: PodSnapshot) -> PodNotification {
        PodNotification::new(EventKind::Modified, pod)
    }

    fn exec() -> Milestone {
        Milestone::ContainerRunning("exec".to_string())
    }

    #[test]
    fn test_init_ready_when_scheduled_and_init_running() {
        assert_eq!(
            evaluate(&modified(scheduled_pending()), &Milestone::InitReady),
            Ok(Condition::Satisfied)
        );
    }

    #[test]
    fn test_init_not_ready_when_unscheduled() {
        let pod = PodSnapshot {
            scheduled: false,
            ..scheduled_pending()
        };
        assert_eq!(
            evaluate(&modified(pod), &Milestone::InitReady),
            Ok(Condition::Pending)
        );
    }

    #[test]
    fn test_init_not_ready_when_statuses_missing() {
        let pod = PodSnapshot {
            declared_init_containers: 2,
            ..scheduled_pending()
        };
        assert_eq!(
            evaluate(&modified(pod), &Milestone::InitReady),
            Ok(Condition::Pending)
        );
    }

    #[test]
    fn test_init_not_ready_when_init_waiting() {
        let pod = PodSnapshot {
            init_container_statuses: vec![ContainerStatus::new(
                "sync-init",
                ContainerState::Waiting,
            )],
            ..scheduled_pending()
        };
        assert_eq!(
            evaluate(&modified(pod), &Milestone::InitReady),
            Ok(Condition::Pending)
        );
    }

    #[test]
    fn test_init_already_running() {
        let pod = running_with("exec", ContainerState::Running);
        assert_eq!(
            evaluate(&modified(pod), &Milestone::InitReady),
            Ok(Condition::Terminal(Terminal::AlreadyRunning))
        );
    }

    #[test]
    fn test_final_phase_is_completed_for_both_milestones() {
        for phase in [PodPhase::Succeeded, PodPhase::Failed] {
            let pod = PodSnapshot {
                phase,
                ..scheduled_pending()
            };
            let notification = modified(pod);
            assert_eq!(
                evaluate(&notification, &Milestone::InitReady),
                Ok(Condition::Terminal(Terminal::Completed))
            );
            assert_eq!(
                evaluate(&notification, &exec()),
                Ok(Condition::Terminal(Terminal::Completed))
            );
        }
    }

    #[test]
    fn test_deleted_is_not_found_for_both_milestones() {
        let notification = PodNotification::new(EventKind::Deleted, scheduled_pending());
        assert_eq!(
            evaluate(&notification, &Milestone::InitReady),
            Err(ConditionError::NotFound)
        );
        assert_eq!(evaluate(&notification, &exec()), Err(ConditionError::NotFound));
    }

    #[test]
    fn test_container_states() {
        let cases = [
            (ContainerState::Waiting, Ok(Condition::Pending)),
            (ContainerState::Running, Ok(Condition::Satisfied)),
            (
                ContainerState::Terminated,
                Ok(Condition::Terminal(Terminal::Completed)),
            ),
            (
                ContainerState::Unknown,
                Err(ConditionError::UnknownState("exec".to_string())),
            ),
        ];
        for (state, expected) in cases {
            let notification = modified(running_with("exec", state));
            assert_eq!(evaluate(&notification, &exec()), expected, "{state:?}");
        }
    }

    #[test]
    fn test_missing_container_is_distinct_from_pending() {
        let notification = modified(running_with("sync", ContainerState::Running));
        assert_eq!(
            evaluate(&notification, &exec()),
            Err(ConditionError::NoSuchContainer("exec".to_string()))
        );
    }

    #[test]
    fn test_container_milestone_pending_before_running_phase() {
        let notification = modified(scheduled_pending());
        assert_eq!(evaluate(&notification, &exec()), Ok(Condition::Pending));
    }

    #[tokio::test]
    async fn test_wait_for_skips_pending_notifications() {
        let unscheduled = fresh_pod();
        let notifications = stream::iter(vec![
            Ok(PodNotification::new(EventKind::Added, unscheduled)),
            Ok(modified(scheduled_pending())),
        ]);
        let outcome = wait_for("demo", notifications, &Milestone::InitReady).await;
        assert_eq!(outcome, Ok(WaitOutcome::Reached(scheduled_pending())));
    }

    #[tokio::test]
    async fn test_wait_for_reports_terminal() {
        let done = PodSnapshot {
            phase: PodPhase::Succeeded,
            ..scheduled_pending()
        };
        let notifications = stream::iter(vec![Ok(modified(done.clone()))]);
        let outcome = wait_for("demo", notifications, &exec()).await;
        assert_eq!(outcome, Ok(WaitOutcome::Terminal(Terminal::Completed, done)));
    }

    #[tokio::test]
    async fn test_wait_for_maps_errors() {
        let deleted = stream::iter(vec![Ok(PodNotification::new(
            EventKind::Deleted,
            scheduled_pending(),
        ))]);
        assert_eq!(
            wait_for("demo", deleted, &Milestone::InitReady).await,
            Err(Error::NotFound("demo".to_string()))
        );

        let missing = stream::iter(vec![Ok(modified(running_with(
            "sync",
            ContainerState::Running,
        )))]);
        assert_eq!(
            wait_for("demo", missing, &exec()).await,
            Err(Error::NoSuchContainer("exec".to_string()))
        );
    }

    #[tokio::test]
    async fn test_wait_for_closed_stream() {
        let notifications = stream::iter(vec![Ok(modified(fresh_pod()))]);
        assert_eq!(
            wait_for("demo", notifications, &Milestone::InitReady).await,
            Err(Error::WatchClosed("demo".to_string()))
        );
    }
}
