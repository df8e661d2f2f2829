//! Session configuration.
//!
//! A [`SessionConfig`] is built once at startup and owned by the
//! orchestrator; nothing reads configuration from anywhere else.

use std::{collections::BTreeMap, time::Duration};

use crate::{
    manifest::{PodRequest, DEFAULT_SYNC_IMAGE},
    sync::SyncFilter,
    Error, Result,
};

/// Default directory the local tree is synced into.
pub const DEFAULT_WORKDIR: &str = "/work-dir";
/// Time between background syncs.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(1);
/// Pause between init-ready and opening the tunnel; sshd needs a moment to
/// start listening after the container reports running.
pub const DEFAULT_TUNNEL_GRACE: Duration = Duration::from_millis(100);

/// The pod name doubles as the secret name and must be a DNS label.
const MAX_NAME_LEN: usize = 63;

/// Everything one session needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub command: Vec<String>,
    pub workdir: String,
    pub stdin: bool,
    pub tty: bool,
    pub sync_image: String,
    pub service_account: Option<String>,
    pub node_selector: BTreeMap<String, String>,
    pub filter: SyncFilter,
    pub sync_interval: Duration,
    pub tunnel_grace: Duration,
    /// Bound on each wait for a pod milestone; unbounded when `None`.
    pub wait_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Config with defaults for everything but the required fields.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            image: image.into(),
            command: Vec::new(),
            workdir: DEFAULT_WORKDIR.to_string(),
            stdin: false,
            tty: false,
            sync_image: DEFAULT_SYNC_IMAGE.to_string(),
            service_account: None,
            node_selector: BTreeMap::new(),
            filter: SyncFilter::default(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            tunnel_grace: DEFAULT_TUNNEL_GRACE,
            wait_timeout: None,
        }
    }

    /// Check the fields the cluster would otherwise reject late.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid name, an empty image,
    /// a relative workdir or a zero sync interval.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if self.image.trim().is_empty() {
            return Err(Error::InvalidConfig("image cannot be empty".into()));
        }
        if !self.workdir.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "workdir must be an absolute path, got '{}'",
                self.workdir
            )));
        }
        if self.sync_interval.is_zero() {
            return Err(Error::InvalidConfig("sync interval must be positive".into()));
        }
        Ok(())
    }

    /// rsync destination inside the pod, reached through the tunnel.
    pub fn destination(&self) -> String {
        format!("root@localhost:{}", self.workdir)
    }

    /// Pod request carrying the session's public key.
    pub fn pod_request(&self, public_key: String) -> PodRequest {
        PodRequest {
            name: self.name.clone(),
            image: self.image.clone(),
            command: self.command.clone(),
            workdir: self.workdir.clone(),
            tty: self.tty,
            stdin: self.stdin,
            public_key,
            sync_image: self.sync_image.clone(),
            service_account: self.service_account.clone(),
            node_selector: self.node_selector.clone(),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidConfig("name cannot be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidConfig(format!(
            "name '{name}' is longer than {MAX_NAME_LEN} characters"
        )));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_ends = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if valid_chars && valid_ends {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "name '{name}' must consist of lowercase alphanumeric characters or '-', \
             and must start and end with an alphanumeric character"
        )))
    }
}

/// Pair node selector keys with values.
///
/// Lists of different lengths cannot be paired; the selector is dropped
/// with a warning and the pod is scheduled without one.
pub fn resolve_node_selector(keys: &[String], values: &[String]) -> BTreeMap<String, String> {
    if keys.len() != values.len() {
        tracing::warn!(
            keys = keys.len(),
            values = values.len(),
            "node selector keys and values differ in length, ignoring node selector"
        );
        return BTreeMap::new();
    }
    keys.iter().cloned().zip(values.iter().cloned()).collect()
}
