//! Pod state notifications.
//!
//! A [`PodNotification`] is the condensed view of one watch event: what kind
//! of change it was, the pod's phase, whether it is scheduled, and the state
//! of every (init) container. Only the fields the condition evaluator looks
//! at are kept.
//!
//! Notifications are decoded from the JSON that `kubectl get --watch
//! --output-watch-events -o json` prints.

use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// Kind of change a watch event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the `status.phase` string; anything unrecognised is `Unknown`.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Whether the pod can no longer change phase.
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// State of a single container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Waiting,
    Running,
    Terminated,
    /// None of the known state keys were present.
    Unknown,
}

/// Named container status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerState,
}

impl ContainerStatus {
    pub fn new(name: impl Into<String>, state: ContainerState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }
}

/// Snapshot of the pod fields the evaluator inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    pub phase: PodPhase,
    pub scheduled: bool,
    /// Number of init containers declared in the pod spec.
    pub declared_init_containers: usize,
    pub init_container_statuses: Vec<ContainerStatus>,
    pub container_statuses: Vec<ContainerStatus>,
}

impl PodSnapshot {
    /// Look up a regular container's status by name.
    pub fn container(&self, name: &str) -> Option<&ContainerStatus> {
        self.container_statuses.iter().find(|s| s.name == name)
    }
}

/// One observed change to the pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodNotification {
    pub kind: EventKind,
    pub pod: PodSnapshot,
}

impl PodNotification {
    pub const fn new(kind: EventKind, pod: PodSnapshot) -> Self {
        Self { kind, pod }
    }

    /// Decode one `--output-watch-events` document.
    ///
    /// `ERROR` events carry a `Status` object instead of a pod; they are
    /// surfaced as errors (a `NotFound` reason becomes [`Error::NotFound`]).
    pub fn from_watch_event(pod_name: &str, event: &Value) -> Result<Self> {
        let raw: RawWatchEvent = serde_json::from_value(event.clone())?;
        let kind = match raw.kind.as_str() {
            "ADDED" => EventKind::Added,
            "MODIFIED" => EventKind::Modified,
            "DELETED" => EventKind::Deleted,
            "ERROR" => return Err(status_error(pod_name, &raw.object)),
            other => {
                return Err(Error::kubectl(
                    "watch pod",
                    format!("unexpected watch event type '{other}'"),
                ))
            }
        };
        let pod: RawPod = serde_json::from_value(raw.object)?;
        Ok(Self::new(kind, pod.into()))
    }
}

fn status_error(pod_name: &str, status: &Value) -> Error {
    let reason = status.get("reason").and_then(Value::as_str).unwrap_or("");
    if reason == "NotFound" {
        return Error::NotFound(pod_name.to_string());
    }
    let message = status
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("watch returned an error event");
    Error::kubectl("watch pod", message)
}

// ═══════════════════════════════════════════════════════════════════════════
// WIRE FORMAT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPod {
    spec: RawPodSpec,
    status: RawPodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawPodSpec {
    init_containers: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawPodStatus {
    phase: Option<String>,
    conditions: Vec<RawCondition>,
    init_container_statuses: Vec<RawContainerStatus>,
    container_statuses: Vec<RawContainerStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawContainerStatus {
    name: String,
    state: RawContainerState,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawContainerState {
    waiting: Option<Value>,
    running: Option<Value>,
    terminated: Option<Value>,
}

impl From<RawContainerState> for ContainerState {
    fn from(raw: RawContainerState) -> Self {
        if raw.waiting.is_some() {
            Self::Waiting
        } else if raw.running.is_some() {
            Self::Running
        } else if raw.terminated.is_some() {
            Self::Terminated
        } else {
            Self::Unknown
        }
    }
}

impl From<RawContainerStatus> for ContainerStatus {
    fn from(raw: RawContainerStatus) -> Self {
        Self::new(raw.name, raw.state.into())
    }
}

impl From<RawPod> for PodSnapshot {
    fn from(raw: RawPod) -> Self {
        let scheduled = raw
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "PodScheduled" && c.status == "True");
        Self {
            phase: raw
                .status
                .phase
                .as_deref()
                .map_or(PodPhase::Unknown, PodPhase::parse),
            scheduled,
            declared_init_containers: raw.spec.init_containers.len(),
            init_container_statuses: raw
                .status
                .init_container_statuses
                .into_iter()
                .map(Into::into)
                .collect(),
            container_statuses: raw
                .status
                .container_statuses
                .into_iter()
                .map(Into::into)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pod_event(kind: &str, phase: &str) -> Value {
        json!({
            "type": kind,
            "object": {
                "kind": "Pod",
                "metadata": { "name": "demo" },
                "spec": {
                    "initContainers": [{ "name": "sync-init", "image": "ernoaapa/sshd-rsync" }],
                    "containers": [{ "name": "sync" }, { "name": "exec" }]
                },
                "status": {
                    "phase": phase,
                    "conditions": [
                        { "type": "PodScheduled", "status": "True" },
                        { "type": "Ready", "status": "False" }
                    ],
                    "initContainerStatuses": [
                        { "name": "sync-init", "state": { "running": { "startedAt": "2018-11-01T10:00:00Z" } } }
                    ],
                    "containerStatuses": [
                        { "name": "sync", "state": { "waiting": { "reason": "PodInitializing" } } },
                        { "name": "exec", "state": { "terminated": { "exitCode": 0 } } }
                    ]
                }
            }
        })
    }

    #[test]
    fn test_decode_pending_pod() {
        let notification = PodNotification::from_watch_event("demo", &pod_event("ADDED", "Pending"));
        let notification = notification.unwrap();

        assert_eq!(notification.kind, EventKind::Added);
        assert_eq!(notification.pod.phase, PodPhase::Pending);
        assert!(notification.pod.scheduled);
        assert_eq!(notification.pod.declared_init_containers, 1);
        assert_eq!(
            notification.pod.init_container_statuses,
            vec![ContainerStatus::new("sync-init", ContainerState::Running)]
        );
        assert_eq!(
            notification.pod.container("sync").map(|s| s.state),
            Some(ContainerState::Waiting)
        );
        assert_eq!(
            notification.pod.container("exec").map(|s| s.state),
            Some(ContainerState::Terminated)
        );
    }

    #[test]
    fn test_decode_deleted_event() {
        let notification =
            PodNotification::from_watch_event("demo", &pod_event("DELETED", "Running")).unwrap();
        assert_eq!(notification.kind, EventKind::Deleted);
    }

    #[test]
    fn test_decode_minimal_pod_defaults() {
        let event = json!({ "type": "ADDED", "object": { "metadata": { "name": "demo" } } });
        let notification = PodNotification::from_watch_event("demo", &event).unwrap();
        assert_eq!(notification.pod.phase, PodPhase::Unknown);
        assert!(!notification.pod.scheduled);
        assert!(notification.pod.container_statuses.is_empty());
    }

    #[test]
    fn test_empty_state_is_unknown() {
        let event = json!({
            "type": "MODIFIED",
            "object": { "status": { "phase": "Running", "containerStatuses": [{ "name": "exec", "state": {} }] } }
        });
        let notification = PodNotification::from_watch_event("demo", &event).unwrap();
        assert_eq!(
            notification.pod.container("exec").map(|s| s.state),
            Some(ContainerState::Unknown)
        );
    }

    #[test]
    fn test_error_event_not_found() {
        let event = json!({
            "type": "ERROR",
            "object": { "kind": "Status", "reason": "NotFound", "message": "pods \"demo\" not found" }
        });
        let err = PodNotification::from_watch_event("demo", &event).unwrap_err();
        assert_eq!(err, Error::NotFound("demo".into()));
    }

    #[test]
    fn test_error_event_other() {
        let event = json!({
            "type": "ERROR",
            "object": { "kind": "Status", "reason": "Expired", "message": "too old resource version" }
        });
        let err = PodNotification::from_watch_event("demo", &event).unwrap_err();
        assert!(err.to_string().contains("too old resource version"));
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!(PodPhase::parse("Succeeded"), PodPhase::Succeeded);
        assert_eq!(PodPhase::parse("whatever"), PodPhase::Unknown);
        assert!(PodPhase::Failed.is_final());
        assert!(!PodPhase::Running.is_final());
    }
}
