//! [`Cluster`] implementation driving the `kubectl` binary.
//!
//! Every operation is one kubectl invocation scoped to the session's
//! namespace (and optional context/kubeconfig). Manifests are piped in as
//! JSON; watch output is decoded incrementally with [`JsonStreamDecoder`].

use std::{
    collections::VecDeque,
    ffi::OsString,
    path::PathBuf,
    process::{Command as StdCommand, Stdio},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    process::{Child, ChildStdout, Command},
    sync::oneshot,
};

use crate::{
    cancel::CancellationSignal,
    cluster::{AttachOptions, Cluster, PodWatch, Tunnel},
    manifest::PodRequest,
    pod::PodNotification,
    Error, Result,
};

const DEFAULT_NAMESPACE: &str = "default";
const READ_CHUNK: usize = 8192;

/// Connection flags forwarded to every kubectl call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubectlOptions {
    /// Namespace; the current context's namespace when `None`.
    pub namespace: Option<String>,
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
}

/// kubectl-backed cluster client.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    namespace: String,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

fn kubectl_error(operation: &str, error: &std::io::Error) -> Error {
    Error::Kubectl {
        operation: operation.to_string(),
        detail: error.to_string(),
        is_not_found: error.kind() == std::io::ErrorKind::NotFound,
    }
}

impl Kubectl {
    /// Locate kubectl and resolve the namespace.
    ///
    /// # Errors
    ///
    /// Returns error if kubectl is not on `PATH` or the kubeconfig cannot
    /// be read.
    pub async fn connect(options: KubectlOptions) -> Result<Self> {
        let binary = which::which("kubectl").map_err(|e| Error::Kubectl {
            operation: "locate kubectl".to_string(),
            detail: e.to_string(),
            is_not_found: true,
        })?;

        let mut kubectl = Self {
            binary,
            namespace: options.namespace.clone().unwrap_or_default(),
            context: options.context,
            kubeconfig: options.kubeconfig,
        };
        if options.namespace.is_none() {
            kubectl.namespace = kubectl.current_namespace().await?;
        }
        tracing::debug!(namespace = %kubectl.namespace, binary = %kubectl.binary.display(), "using kubectl");
        Ok(kubectl)
    }

    /// Namespace every call is scoped to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn current_namespace(&self) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.connection_args(false))
            .args(["config", "view", "--minify", "-o", "jsonpath={..namespace}"]);
        let output = cmd
            .output()
            .await
            .map_err(|e| kubectl_error("read current namespace", &e))?;
        if !output.status.success() {
            return Err(Error::kubectl(
                "read current namespace",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        let namespace = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if namespace.is_empty() {
            Ok(DEFAULT_NAMESPACE.to_string())
        } else {
            Ok(namespace)
        }
    }

    fn connection_args(&self, with_namespace: bool) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push(OsString::from("--kubeconfig"));
            args.push(kubeconfig.clone().into_os_string());
        }
        if let Some(context) = &self.context {
            args.push(OsString::from("--context"));
            args.push(OsString::from(context));
        }
        if with_namespace {
            args.push(OsString::from("--namespace"));
            args.push(OsString::from(&self.namespace));
        }
        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.connection_args(true));
        cmd
    }

    /// Run kubectl to completion, optionally feeding `input` on stdin.
    async fn run(&self, operation: &str, args: &[&str], input: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| kubectl_error(operation, &e))?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| kubectl_error(operation, &e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| kubectl_error(operation, &e))?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(Error::kubectl(
                operation,
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }

    fn delete_sync(&self, kind: &str, name: &str, extra: &[&str]) -> Result<()> {
        let operation = format!("delete {kind}");
        let output = StdCommand::new(&self.binary)
            .args(self.connection_args(true))
            .args(["delete", kind, name, "--ignore-not-found"])
            .args(extra)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| kubectl_error(&operation, &e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::kubectl(
                operation,
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }
}

#[async_trait]
impl Cluster for Kubectl {
    async fn create_pod(&self, request: &PodRequest) -> Result<()> {
        let secret = serde_json::to_vec(&request.secret_manifest())?;
        let pod = serde_json::to_vec(&request.pod_manifest())?;

        self.run(
            "delete stale secret",
            &["delete", "secret", request.name.as_str(), "--ignore-not-found"],
            None,
        )
        .await?;
        self.run("create secret", &["create", "-f", "-"], Some(secret))
            .await?;

        if let Err(e) = self.run("create pod", &["create", "-f", "-"], Some(pod)).await {
            if let Err(cleanup) = self.delete_sync("secret", &request.name, &[]) {
                tracing::warn!("Secret cleanup failed for '{}': {}", request.name, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    fn delete_pod(&self, name: &str) {
        if let Err(e) = self.delete_sync("pod", name, &["--wait=false"]) {
            tracing::warn!("Pod cleanup failed for '{}': {}", name, e);
        }
        if let Err(e) = self.delete_sync("secret", name, &[]) {
            tracing::warn!("Secret cleanup failed for '{}': {}", name, e);
        }
    }

    async fn watch_pod(&self, name: &str) -> Result<PodWatch> {
        let resource = format!("pod/{name}");
        let mut child = self
            .command()
            .args(["get", resource.as_str(), "--watch", "--output-watch-events", "-o", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| kubectl_error("watch pod", &e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::kubectl("watch pod", "stdout was not captured"))?;

        let state = WatchState {
            pod: name.to_string(),
            child,
            stdout,
            decoder: JsonStreamDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };
        Ok(Box::pin(futures::stream::unfold(state, WatchState::next)))
    }

    async fn attach(&self, name: &str, container: &str, options: AttachOptions) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["attach", name, "-c", container]);
        if options.stdin {
            cmd.arg("-i");
        }
        if options.tty {
            cmd.arg("-t");
        }
        let status = cmd
            .stdin(if options.stdin {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| kubectl_error("attach", &e))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::kubectl("attach", format!("kubectl exited with {status}")))
        }
    }

    async fn stream_logs(
        &self,
        name: &str,
        container: &str,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let mut child = self
            .command()
            .args(["logs", name, "-c", container])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| kubectl_error("stream logs", &e))?;
        if let Some(mut stdout) = child.stdout.take() {
            tokio::io::copy(&mut stdout, out).await?;
            out.flush().await?;
        }
        let status = child
            .wait()
            .await
            .map_err(|e| kubectl_error("stream logs", &e))?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::kubectl("stream logs", read_stderr(&mut child).await))
        }
    }

    async fn open_tunnel(
        &self,
        name: &str,
        local_port: u16,
        remote_port: u16,
        cancel: CancellationSignal,
    ) -> Result<Tunnel> {
        let resource = format!("pod/{name}");
        let ports = format!("{local_port}:{remote_port}");
        let child = self
            .command()
            .args(["port-forward", resource.as_str(), ports.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| kubectl_error("open tunnel", &e))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_port_forward(child, ready_tx, cancel));
        Ok(Tunnel::new(ready_rx, pump))
    }
}

async fn read_stderr(child: &mut Child) -> String {
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        if let Err(e) = pipe.read_to_string(&mut stderr).await {
            tracing::debug!("failed to read kubectl stderr: {e}");
        }
    }
    stderr.trim().to_string()
}

/// Drive `kubectl port-forward` until cancelled.
///
/// Readiness is the first "Forwarding from" line on stdout. The child is
/// killed when `cancel` fires; exiting on its own is an error.
async fn pump_port_forward(
    mut child: Child,
    ready: oneshot::Sender<()>,
    cancel: CancellationSignal,
) -> Result<()> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Tunnel("port-forward stdout was not captured".to_string()))?;
    let mut lines = BufReader::new(stdout).lines();
    let mut ready = Some(ready);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::debug!("failed to stop port-forward: {e}");
                }
                return Ok(());
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    tracing::debug!("port-forward: {line}");
                    if line.starts_with("Forwarding from") {
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(());
                        }
                    }
                }
                Ok(None) => {
                    let status = child.wait().await?;
                    let stderr = read_stderr(&mut child).await;
                    return Err(Error::Tunnel(format!(
                        "port-forward exited with {status}: {stderr}"
                    )));
                }
                Err(e) => {
                    return Err(Error::Tunnel(format!("failed to read port-forward output: {e}")));
                }
            }
        }
    }
}

struct WatchState {
    pod: String,
    child: Child,
    stdout: ChildStdout,
    decoder: JsonStreamDecoder,
    pending: VecDeque<Result<PodNotification>>,
    finished: bool,
}

impl WatchState {
    async fn next(mut self) -> Option<(Result<PodNotification>, Self)> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some((item, self));
            }
            if self.finished {
                return None;
            }
            self.fill().await;
        }
    }

    async fn fill(&mut self) {
        let mut buf = vec![0u8; READ_CHUNK];
        match self.stdout.read(&mut buf).await {
            Ok(0) => {
                self.finished = true;
                if self.decoder.has_partial() {
                    self.pending.push_back(Err(Error::kubectl(
                        "watch pod",
                        "watch output ended in the middle of an event",
                    )));
                }
                if let Some(e) = self.exit_error().await {
                    self.pending.push_back(Err(e));
                }
            }
            Ok(n) => {
                for document in self.decoder.push(&buf[..n]) {
                    let notification = document
                        .and_then(|event| PodNotification::from_watch_event(&self.pod, &event));
                    self.pending.push_back(notification);
                }
            }
            Err(e) => {
                self.finished = true;
                self.pending.push_back(Err(kubectl_error("watch pod", &e)));
            }
        }
    }

    async fn exit_error(&mut self) -> Option<Error> {
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Some(kubectl_error("watch pod", &e)),
        };
        if status.success() {
            return None;
        }
        let stderr = read_stderr(&mut self.child).await;
        if stderr.contains("(NotFound)") {
            Some(Error::NotFound(self.pod.clone()))
        } else {
            Some(Error::kubectl("watch pod", stderr))
        }
    }
}

/// Splits a byte stream of concatenated JSON documents.
///
/// kubectl's `-o json` watch output is a sequence of pretty-printed
/// objects with no framing. Bytes are buffered until a full document is
/// available; a trailing partial document is kept for the next push.
#[derive(Debug, Default)]
pub struct JsonStreamDecoder {
    buffer: Vec<u8>,
}

impl JsonStreamDecoder {
    /// Feed bytes, returning every document completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<Value>> {
        self.buffer.extend_from_slice(bytes);
        let mut documents = Vec::new();
        let consumed = {
            let mut iter = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
            loop {
                match iter.next() {
                    Some(Ok(value)) => documents.push(Ok(value)),
                    Some(Err(e)) if e.is_eof() => break iter.byte_offset(),
                    Some(Err(e)) => {
                        documents.push(Err(e.into()));
                        break self.buffer.len();
                    }
                    None => break iter.byte_offset(),
                }
            }
        };
        self.buffer.drain(..consumed);
        documents
    }

    /// Whether a partial document is buffered.
    pub fn has_partial(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pod::{EventKind, PodPhase};

    fn kubectl(context: Option<&str>, kubeconfig: Option<&str>) -> Kubectl {
        Kubectl {
            binary: PathBuf::from("kubectl"),
            namespace: "team".to_string(),
            context: context.map(str::to_string),
            kubeconfig: kubeconfig.map(PathBuf::from),
        }
    }

    #[test]
    fn test_connection_args() {
        assert_eq!(
            kubectl(None, None).connection_args(true),
            vec![OsString::from("--namespace"), OsString::from("team")]
        );
        assert_eq!(
            kubectl(Some("prod"), Some("/tmp/config")).connection_args(false),
            vec![
                OsString::from("--kubeconfig"),
                OsString::from("/tmp/config"),
                OsString::from("--context"),
                OsString::from("prod"),
            ]
        );
    }

    /// kubectl stand-in running `body` as a shell script.
    #[cfg(unix)]
    fn fake_kubectl(dir: &std::path::Path, body: &str) -> Kubectl {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("kubectl");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        Kubectl {
            binary: script,
            ..kubectl(None, None)
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupted_attach_stops_kubectl() {
        use std::time::Duration;

        // Only leaves the marker if it lives past one second.
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let kubectl = fake_kubectl(dir.path(), &format!("sleep 1\ntouch '{}'", marker.display()));

        let cancel = CancellationSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Interrupted),
            result = kubectl.attach("demo", "exec", AttachOptions::default()) => result,
        };
        assert_eq!(outcome, Err(Error::Interrupted));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists(), "kubectl attach outlived the interrupted session");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watch_truncated_event_is_an_error() {
        use futures::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let kubectl = fake_kubectl(dir.path(), r#"printf '{"type": "ADDED", "object": {'"#);

        let mut watch = kubectl.watch_pod("demo").await.unwrap();
        let first = watch.next().await.unwrap();
        assert!(first
            .unwrap_err()
            .to_string()
            .contains("ended in the middle of an event"));
        assert!(watch.next().await.is_none());
    }

    #[test]
    fn test_decoder_handles_split_documents() {
        let mut decoder = JsonStreamDecoder::default();
        let text = "{\n  \"type\": \"ADDED\"\n}\n{\"type\": \"MOD";

        let first = decoder.push(text.as_bytes());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].as_ref().unwrap()["type"], "ADDED");
        assert!(decoder.has_partial());

        let second = decoder.push(b"IFIED\"}\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_ref().unwrap()["type"], "MODIFIED");
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_decoder_byte_at_a_time() {
        let mut decoder = JsonStreamDecoder::default();
        let text = r#"{"a": 1} {"b": [1, 2]}"#;
        let documents: Vec<Value> = text
            .as_bytes()
            .iter()
            .flat_map(|b| decoder.push(std::slice::from_ref(b)))
            .map(Result::unwrap)
            .collect();
        // The second object is complete only once its closing brace arrives.
        assert_eq!(documents, vec![json!({"a": 1}), json!({"b": [1, 2]})]);
    }

    #[test]
    fn test_decoder_reports_garbage() {
        let mut decoder = JsonStreamDecoder::default();
        let documents = decoder.push(b"not json\n");
        assert_eq!(documents.len(), 1);
        assert!(documents[0].is_err());
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_decoded_watch_event_becomes_notification() {
        let mut decoder = JsonStreamDecoder::default();
        let event = json!({
            "type": "MODIFIED",
            "object": {
                "spec": { "initContainers": [{ "name": "sync-init" }] },
                "status": {
                    "phase": "Pending",
                    "conditions": [{ "type": "PodScheduled", "status": "True" }],
                    "initContainerStatuses": [
                        { "name": "sync-init", "state": { "running": {} } }
                    ]
                }
            }
        });
        let bytes = serde_json::to_vec_pretty(&event).unwrap();
        let documents = decoder.push(&bytes);
        let notification =
            PodNotification::from_watch_event("demo", documents[0].as_ref().unwrap()).unwrap();

        assert_eq!(notification.kind, EventKind::Modified);
        assert_eq!(notification.pod.phase, PodPhase::Pending);
        assert!(notification.pod.scheduled);
        assert_eq!(notification.pod.declared_init_containers, 1);
    }
}
