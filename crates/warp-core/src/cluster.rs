//! Cluster collaborator interface.
//!
//! The orchestrator only talks to the cluster through [`Cluster`]. The
//! production implementation shells out to kubectl (see
//! [`crate::kubectl`]); tests substitute in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::{io::AsyncWrite, sync::oneshot, task::JoinHandle};

use crate::{cancel::CancellationSignal, manifest::PodRequest, Error, Result};

/// Stream of state notifications for one pod.
pub type PodWatch = BoxStream<'static, Result<crate::pod::PodNotification>>;

/// Terminal options for [`Cluster::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttachOptions {
    pub stdin: bool,
    pub tty: bool,
}

/// Operations the session needs from the cluster.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Create the pod and its `authorized_keys` secret.
    async fn create_pod(&self, request: &PodRequest) -> Result<()>;

    /// Delete the pod and its secret.
    ///
    /// Synchronous and best effort so it can run from `Drop`. Must tolerate
    /// being called for a pod that no longer exists.
    fn delete_pod(&self, name: &str);

    /// Watch the pod's state, starting with its current state.
    async fn watch_pod(&self, name: &str) -> Result<PodWatch>;

    /// Attach the local terminal to a container; blocks until it exits.
    async fn attach(&self, name: &str, container: &str, options: AttachOptions) -> Result<()>;

    /// Copy a container's log output into `out`.
    async fn stream_logs(
        &self,
        name: &str,
        container: &str,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;

    /// Forward `local_port` to `remote_port` on the pod until `cancel` fires.
    async fn open_tunnel(
        &self,
        name: &str,
        local_port: u16,
        remote_port: u16,
        cancel: CancellationSignal,
    ) -> Result<Tunnel>;
}

/// A running port forward.
///
/// `ready` fires once the forward accepts connections; `pump` is the task
/// driving it. Dropping the tunnel aborts the pump.
#[derive(Debug)]
pub struct Tunnel {
    ready: Option<oneshot::Receiver<()>>,
    pump: JoinHandle<Result<()>>,
}

impl Tunnel {
    pub fn new(ready: oneshot::Receiver<()>, pump: JoinHandle<Result<()>>) -> Self {
        Self {
            ready: Some(ready),
            pump,
        }
    }

    /// Block until the tunnel is ready.
    ///
    /// Returns [`Error::Interrupted`] if `cancel` fires first. If the pump
    /// finishes without signalling readiness its error is returned.
    pub async fn wait_ready(&mut self, cancel: &CancellationSignal) -> Result<()> {
        let Some(ready) = self.ready.take() else {
            return Ok(());
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Interrupted),
            signalled = ready => match signalled {
                Ok(()) => Ok(()),
                Err(_) => Err(self.pump_failure().await),
            },
        }
    }

    async fn pump_failure(&mut self) -> Error {
        match (&mut self.pump).await {
            Ok(Err(e)) => e,
            Ok(Ok(())) => Error::Tunnel("port-forward closed before it was ready".to_string()),
            Err(e) => Error::Tunnel(format!("port-forward task failed: {e}")),
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Deletes the session's pod when dropped.
///
/// Created right after the pod exists so every later exit path, error and
/// interrupt included, removes it.
pub struct PodGuard {
    cluster: Arc<dyn Cluster>,
    name: String,
    active: bool,
}

impl PodGuard {
    #[must_use]
    pub fn new(cluster: Arc<dyn Cluster>, name: impl Into<String>) -> Self {
        Self {
            cluster,
            name: name.into(),
            active: true,
        }
    }

    /// Delete the pod now. Later calls, and the drop, do nothing.
    pub fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        tracing::debug!(pod = %self.name, "deleting pod");
        self.cluster.delete_pod(&self.name);
    }
}

impl Drop for PodGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PodGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodGuard")
            .field("name", &self.name)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct DeleteRecorder {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Cluster for DeleteRecorder {
        async fn create_pod(&self, _request: &PodRequest) -> Result<()> {
            Ok(())
        }

        fn delete_pod(&self, name: &str) {
            self.deleted.lock().unwrap().push(name.to_string());
        }

        async fn watch_pod(&self, _name: &str) -> Result<PodWatch> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn attach(&self, _name: &str, _container: &str, _options: AttachOptions) -> Result<()> {
            Ok(())
        }

        async fn stream_logs(
            &self,
            _name: &str,
            _container: &str,
            _out: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<()> {
            Ok(())
        }

        async fn open_tunnel(
            &self,
            _name: &str,
            _local_port: u16,
            _remote_port: u16,
            _cancel: CancellationSignal,
        ) -> Result<Tunnel> {
            Err(Error::Tunnel("unsupported".to_string()))
        }
    }

    #[test]
    fn test_guard_deletes_on_drop() {
        let cluster = Arc::new(DeleteRecorder::default());
        drop(PodGuard::new(cluster.clone(), "demo"));
        assert_eq!(*cluster.deleted.lock().unwrap(), vec!["demo".to_string()]);
    }

    #[test]
    fn test_guard_release_is_idempotent() {
        let cluster = Arc::new(DeleteRecorder::default());
        let mut guard = PodGuard::new(cluster.clone(), "demo");
        guard.release();
        guard.release();
        drop(guard);
        assert_eq!(cluster.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tunnel_ready() {
        let (tx, rx) = oneshot::channel();
        let pump = tokio::spawn(async move {
            let _ = tx.send(());
            Ok(())
        });
        let mut tunnel = Tunnel::new(rx, pump);
        assert!(tunnel.wait_ready(&CancellationSignal::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_tunnel_pump_error_surfaces() {
        let (tx, rx) = oneshot::channel::<()>();
        let pump = tokio::spawn(async move {
            drop(tx);
            Err(Error::Tunnel("port-forward exited with status 1".to_string()))
        });
        let mut tunnel = Tunnel::new(rx, pump);
        assert_eq!(
            tunnel.wait_ready(&CancellationSignal::new()).await,
            Err(Error::Tunnel("port-forward exited with status 1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_tunnel_wait_interrupted() {
        let (_tx, rx) = oneshot::channel::<()>();
        let pump = tokio::spawn(futures::future::pending::<Result<()>>());
        let mut tunnel = Tunnel::new(rx, pump);
        let cancel = CancellationSignal::new();
        cancel.cancel();
        assert_eq!(tunnel.wait_ready(&cancel).await, Err(Error::Interrupted));
    }
}
