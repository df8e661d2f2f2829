//! Pod and secret manifests.
//!
//! Layout of the pod:
//!
//! - init container `sync-init`: one-shot sshd that accepts the initial sync
//! - sidecar `sync`: long-running sshd for the background sync
//! - work container `exec`: the user's image and command
//!
//! All three share the `workdir` emptyDir; both sshd containers mount the
//! session's `authorized_keys` from the secret.

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// Name of the container running the user's command.
pub const WORK_CONTAINER: &str = "exec";
/// Name of the sshd sidecar used by the background sync.
pub const SYNC_CONTAINER: &str = "sync";
/// Name of the one-shot sshd init container.
pub const SYNC_INIT_CONTAINER: &str = "sync-init";
/// Port sshd listens on inside the pod.
pub const SSH_PORT: u16 = 22;
/// Default image providing sshd and rsync.
pub const DEFAULT_SYNC_IMAGE: &str = "ernoaapa/sshd-rsync";

const SSH_CONFIG_VOLUME: &str = "ssh-config";
const WORKDIR_VOLUME: &str = "workdir";
const AUTHORIZED_KEYS: &str = "authorized_keys";
/// 0400: sshd refuses group/world readable key files.
const SECRET_MODE: u32 = 0o400;

/// Everything needed to create the session's pod and its secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRequest {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub workdir: String,
    pub tty: bool,
    pub stdin: bool,
    /// OpenSSH `authorized_keys` line for the session key.
    pub public_key: String,
    pub sync_image: String,
    pub service_account: Option<String>,
    pub node_selector: BTreeMap<String, String>,
}

impl PodRequest {
    /// Secret carrying `authorized_keys`, named after the pod.
    pub fn secret_manifest(&self) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": self.name },
            "stringData": { AUTHORIZED_KEYS: self.public_key },
        })
    }

    /// The pod itself.
    pub fn pod_manifest(&self) -> Value {
        let ssh_port = json!([{ "name": "ssh", "protocol": "TCP", "containerPort": SSH_PORT }]);
        let tcp_probe = json!({ "tcpSocket": { "port": SSH_PORT } });

        let sync_init = json!({
            "name": SYNC_INIT_CONTAINER,
            "image": self.sync_image,
            "ports": ssh_port,
            "env": [{ "name": "ONE_TIME", "value": "true" }],
            "volumeMounts": self.sshd_mounts(),
        });

        let sync = json!({
            "name": SYNC_CONTAINER,
            "image": self.sync_image,
            "ports": ssh_port,
            "readinessProbe": tcp_probe,
            "livenessProbe": tcp_probe,
            "volumeMounts": self.sshd_mounts(),
        });

        let mut work = json!({
            "name": WORK_CONTAINER,
            "image": self.image,
            "tty": self.tty,
            "stdin": self.stdin,
            "stdinOnce": self.stdin,
            "workingDir": self.workdir,
            "volumeMounts": [{ "name": WORKDIR_VOLUME, "mountPath": self.workdir }],
        });
        if !self.command.is_empty() {
            work["command"] = json!(self.command);
        }

        let mut spec = json!({
            "restartPolicy": "Never",
            "initContainers": [sync_init],
            "containers": [sync, work],
            "volumes": [
                {
                    "name": SSH_CONFIG_VOLUME,
                    "secret": { "secretName": self.name, "defaultMode": SECRET_MODE },
                },
                { "name": WORKDIR_VOLUME, "emptyDir": {} },
            ],
        });
        if let Some(account) = &self.service_account {
            spec["serviceAccountName"] = json!(account);
        }
        if !self.node_selector.is_empty() {
            spec["nodeSelector"] = json!(self.node_selector);
        }

        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": self.name },
            "spec": spec,
        })
    }

    fn sshd_mounts(&self) -> Value {
        json!([
            {
                "name": SSH_CONFIG_VOLUME,
                "mountPath": "/root/.ssh/authorized_keys",
                "subPath": AUTHORIZED_KEYS,
            },
            { "name": WORKDIR_VOLUME, "mountPath": self.workdir },
        ])
    }
}
