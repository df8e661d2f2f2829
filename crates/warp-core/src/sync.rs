//! File synchronisation via rsync over the tunnel.
//!
//! [`Rsync`] runs one rsync invocation per [`FileSync::sync`] call. It never
//! retries: the initial sync treats a failure as fatal, while
//! [`run_background_sync`] logs it and tries again on the next tick.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{cancel::CancellationSignal, Error, Result};

/// Default rsync arguments, space separated as on the command line.
pub const DEFAULT_RSYNC_ARGS: &str = "--recursive --times --links --devices --specials";

/// Which local paths are transferred, and how.
///
/// Includes and excludes are passed to rsync in the order given; rsync uses
/// the first matching rule, so order is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncFilter {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    /// Free-form rsync arguments placed before everything else.
    pub extra_args: Vec<String>,
}

impl SyncFilter {
    /// Build a filter from `--rsync-args` style text plus patterns.
    pub fn new(rsync_args: &str, includes: Vec<String>, excludes: Vec<String>) -> Self {
        Self {
            includes,
            excludes,
            extra_args: rsync_args.split_whitespace().map(str::to_string).collect(),
        }
    }
}

/// Prefix every value, preserving order.
pub fn prefix(prefix: &str, values: &[String]) -> Vec<String> {
    values.iter().map(|value| format!("{prefix}{value}")).collect()
}

/// Where rsync's own output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncOutput {
    /// Drop it; the default, since background syncs would spam the terminal.
    #[default]
    Discard,
    /// Share the caller's stdout/stderr.
    Inherit,
}

impl SyncOutput {
    fn stdio(self) -> Stdio {
        match self {
            Self::Discard => Stdio::null(),
            Self::Inherit => Stdio::inherit(),
        }
    }
}

/// One-shot file transfer to a destination.
#[async_trait]
pub trait FileSync: Send + Sync {
    async fn sync(&self, destination: &str, filter: &SyncFilter) -> Result<()>;
}

/// Creates a [`FileSync`] once the tunnel port and key file are known.
pub trait SyncBackend: Send + Sync {
    fn connect(&self, tunnel_port: u16, private_key: &Path) -> Arc<dyn FileSync>;
}

/// rsync executor tunnelled over ssh.
#[derive(Debug, Clone)]
pub struct Rsync {
    ssh_port: u16,
    private_key: PathBuf,
    output: SyncOutput,
}

impl Rsync {
    pub fn new(ssh_port: u16, private_key: impl Into<PathBuf>, output: SyncOutput) -> Self {
        Self {
            ssh_port,
            private_key: private_key.into(),
            output,
        }
    }

    /// Remote shell for rsync's `--rsh`.
    ///
    /// Every session talks to a brand new sshd, so host keys are neither
    /// checked nor remembered.
    pub fn remote_shell(&self) -> String {
        format!(
            "ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o LogLevel=ERROR -p {} -i {}",
            self.ssh_port,
            shell_quote(&self.private_key.to_string_lossy())
        )
    }

    /// Full rsync argument list for one run.
    pub fn command_args(&self, destination: &str, filter: &SyncFilter) -> Vec<String> {
        let mut args = filter.extra_args.clone();
        args.push("--rsh".to_string());
        args.push(self.remote_shell());
        args.extend(prefix("--include=", &filter.includes));
        args.extend(prefix("--exclude=", &filter.excludes));
        args.push(".".to_string());
        args.push(destination.to_string());
        args
    }
}

/// Quote one argument of the `--rsh` command.
///
/// rsync splits that command on spaces itself, without a shell. Inside
/// single quotes a doubled single quote is a literal one and backslashes
/// are plain characters.
fn shell_quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '"');
    if needs_quotes {
        format!("'{}'", value.replace('\'', "''"))
    } else {
        value.to_string()
    }
}

#[async_trait]
impl FileSync for Rsync {
    async fn sync(&self, destination: &str, filter: &SyncFilter) -> Result<()> {
        let args = self.command_args(destination, filter);
        tracing::debug!(?args, "running rsync");

        let status = Command::new("rsync")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(self.output.stdio())
            .stderr(self.output.stdio())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::sync_failed(None, format!("failed to execute rsync: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::sync_failed(
                status.code(),
                format!("rsync exited with {status}"),
            ))
        }
    }
}

/// [`SyncBackend`] producing [`Rsync`] executors.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsyncBackend {
    output: SyncOutput,
}

impl RsyncBackend {
    pub const fn new(output: SyncOutput) -> Self {
        Self { output }
    }
}

impl SyncBackend for RsyncBackend {
    fn connect(&self, tunnel_port: u16, private_key: &Path) -> Arc<dyn FileSync> {
        Arc::new(Rsync::new(tunnel_port, private_key, self.output))
    }
}

/// Re-sync every `interval` until `cancel` fires.
///
/// Failures are logged and the loop keeps going. Cancellation is checked
/// before each tick, and a pending tick is abandoned as soon as the signal
/// closes. Returns how many syncs were attempted.
pub async fn run_background_sync(
    engine: Arc<dyn FileSync>,
    destination: String,
    filter: SyncFilter,
    interval: Duration,
    cancel: CancellationSignal,
) -> u64 {
    tracing::info!("Start background file sync");
    let mut attempts = 0u64;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(%destination, "sync: stop syncing");
                return attempts;
            }
            () = tokio::time::sleep(interval) => {
                attempts += 1;
                if let Err(e) = engine.sync(&destination, &filter).await {
                    tracing::warn!("sync failed: {e}");
                }
            }
        }
    }
}
