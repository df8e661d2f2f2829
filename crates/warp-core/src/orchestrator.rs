//! Session orchestrator.
//!
//! Runs one session as a linear pipeline:
//!
//! 1. generate the keypair and write the private key file
//! 2. create the pod
//! 3. wait for init-ready
//! 4. short grace period, then open the tunnel
//! 5. initial sync (fatal on failure)
//! 6. wait for the work container
//! 7. start background sync once the sync sidecar runs
//! 8. attach
//!
//! A pod that already finished short-circuits to printing its logs. The key
//! file and the pod are held by guards, so every exit path after their
//! creation cleans them up; the pod goes first, then the key.

use std::{path::Path, sync::Arc, time::Duration};

use tokio::{io::AsyncWrite, task::JoinHandle};

use crate::{
    cancel::CancellationSignal,
    cluster::{AttachOptions, Cluster, PodGuard},
    condition::{wait_for, Milestone, Terminal, WaitOutcome},
    keys::{KeyFile, Keypair},
    manifest::{SSH_PORT, SYNC_CONTAINER, WORK_CONTAINER},
    port::reserve_ephemeral_port,
    session::SessionConfig,
    sync::{run_background_sync, FileSync, SyncBackend},
    Error, Result,
};

/// How a session ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The attached process exited.
    Attached,
    /// The pod had already finished; its logs were printed instead.
    LogsPrinted,
}

/// Drives one session against a cluster and a sync backend.
pub struct Orchestrator {
    config: SessionConfig,
    cluster: Arc<dyn Cluster>,
    sync: Arc<dyn SyncBackend>,
    cancel: CancellationSignal,
}

impl Orchestrator {
    pub fn new(
        config: SessionConfig,
        cluster: Arc<dyn Cluster>,
        sync: Arc<dyn SyncBackend>,
        cancel: CancellationSignal,
    ) -> Self {
        Self {
            config,
            cluster,
            sync,
            cancel,
        }
    }

    /// Run the session to completion.
    ///
    /// Logs of an already finished pod are written to `stdout`.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, or [`Error::Interrupted`] when the
    /// cancellation signal closed before the session ended.
    pub async fn run(&self, stdout: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<SessionOutcome> {
        self.config.validate()?;

        let keypair = Keypair::generate()?;
        let key_file = KeyFile::create(&keypair.private_openssh_pem()?)?;

        tracing::info!(pod = %self.config.name, namespace = %self.config.namespace, "Create the Pod");
        let request = self.config.pod_request(keypair.public_openssh()?);
        self.cluster.create_pod(&request).await?;
        let pod = PodGuard::new(Arc::clone(&self.cluster), &self.config.name);

        let outcome = self.drive(key_file.path(), stdout).await;
        drop(pod);
        drop(key_file);
        outcome
    }

    async fn drive(
        &self,
        private_key: &Path,
        stdout: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<SessionOutcome> {
        let name = &self.config.name;

        match self.wait(&Milestone::InitReady).await? {
            WaitOutcome::Reached(_) => {}
            WaitOutcome::Terminal(Terminal::AlreadyRunning, _) => {
                tracing::debug!(pod = %name, "pod already running, init wait skipped");
            }
            WaitOutcome::Terminal(Terminal::Completed, _) => return self.print_logs(stdout).await,
        }
        self.pause(self.config.tunnel_grace).await?;

        tracing::info!("Open connection to the Pod");
        let local_port = reserve_ephemeral_port()?;
        let mut tunnel = self
            .cluster
            .open_tunnel(name, local_port, SSH_PORT, self.cancel.clone())
            .await?;
        tunnel.wait_ready(&self.cancel).await?;
        tracing::debug!(local_port, "tunnel ready");

        let engine = self.sync.connect(local_port, private_key);
        let destination = self.config.destination();
        tracing::info!("Sync initial files to the Pod");
        engine.sync(&destination, &self.config.filter).await?;

        let work = Milestone::ContainerRunning(WORK_CONTAINER.to_string());
        if let WaitOutcome::Terminal(..) = self.wait(&work).await? {
            return self.print_logs(stdout).await;
        }

        let background = self.spawn_background_sync(engine, destination);

        tracing::info!("Attach to the Pod");
        let options = AttachOptions {
            stdin: self.config.stdin,
            tty: self.config.tty,
        };
        let attached = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Interrupted),
            result = self.cluster.attach(name, WORK_CONTAINER, options) => result,
        };

        let interrupted = self.cancel.is_cancelled();
        self.cancel.cancel();
        if let Err(e) = background.await {
            tracing::warn!("background sync task failed: {e}");
        }
        drop(tunnel);

        if interrupted {
            return Err(Error::Interrupted);
        }
        attached.map(|()| SessionOutcome::Attached)
    }

    /// Wait for `milestone` on a fresh watch, racing cancellation and the
    /// optional timeout.
    async fn wait(&self, milestone: &Milestone) -> Result<WaitOutcome> {
        let name = &self.config.name;
        tracing::debug!(pod = %name, %milestone, "waiting");
        let watch = self.cluster.watch_pod(name).await?;
        let waiting = wait_for(name, watch, milestone);

        let bounded = async {
            match self.config.wait_timeout {
                None => waiting.await,
                Some(limit) => tokio::time::timeout(limit, waiting)
                    .await
                    .map_err(|_| Error::WaitTimeout {
                        pod: name.clone(),
                        milestone: milestone.to_string(),
                        seconds: limit.as_secs(),
                    })?,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Interrupted),
            outcome = bounded => outcome,
        }
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Interrupted),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn print_logs(
        &self,
        stdout: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<SessionOutcome> {
        tracing::info!(
            "Pod {} already completed. Print logs to stdout",
            self.config.name
        );
        self.cluster
            .stream_logs(&self.config.name, WORK_CONTAINER, stdout)
            .await?;
        Ok(SessionOutcome::LogsPrinted)
    }

    /// Start the background sync once the sync sidecar is running.
    ///
    /// Failing to observe the sidecar only disables background sync.
    fn spawn_background_sync(&self, engine: Arc<dyn FileSync>, destination: String) -> JoinHandle<()> {
        let cluster = Arc::clone(&self.cluster);
        let name = self.config.name.clone();
        let filter = self.config.filter.clone();
        let interval = self.config.sync_interval;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let sidecar = Milestone::ContainerRunning(SYNC_CONTAINER.to_string());
            let ready = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                ready = async {
                    let watch = cluster.watch_pod(&name).await?;
                    wait_for(&name, watch, &sidecar).await
                } => ready,
            };

            match ready {
                Ok(WaitOutcome::Reached(_)) => {
                    let attempts =
                        run_background_sync(engine, destination, filter, interval, cancel).await;
                    tracing::debug!(attempts, "background sync stopped");
                }
                Ok(WaitOutcome::Terminal(..)) => {
                    tracing::warn!("Sync container is not running, background sync disabled");
                }
                Err(e) => {
                    tracing::warn!("Failed to wait for sync container: {e}");
                }
            }
        })
    }
}
