//! The one and only command: run a session.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::ArgMatches;
use warp_core::{
    resolve_node_selector, CancellationSignal, Kubectl, KubectlOptions, Orchestrator,
    RsyncBackend, SessionConfig, SessionOutcome, SyncFilter, SyncOutput,
};

/// Options for a session, straight from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub stdin: bool,
    pub tty: bool,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub rsync_args: String,
    pub service_account: Option<String>,
    pub node_selector_keys: Vec<String>,
    pub node_selector_values: Vec<String>,
    pub kubectl: KubectlOptions,
    pub sync_image: String,
    pub workdir: String,
    pub wait_timeout: Option<Duration>,
    pub verbose: bool,
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn required(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("--{id} is required"))
}

impl RunOptions {
    /// Create options from clap matches
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            name: required(matches, "name")?,
            image: required(matches, "image")?,
            command: strings(matches, "command"),
            stdin: matches.get_flag("stdin"),
            tty: matches.get_flag("tty"),
            includes: strings(matches, "include"),
            excludes: strings(matches, "exclude"),
            rsync_args: required(matches, "rsync-args")?,
            service_account: matches.get_one::<String>("service-account-name").cloned(),
            node_selector_keys: strings(matches, "node-selector-keys"),
            node_selector_values: strings(matches, "node-selector-values"),
            kubectl: KubectlOptions {
                namespace: matches.get_one::<String>("namespace").cloned(),
                context: matches.get_one::<String>("context").cloned(),
                kubeconfig: matches.get_one::<PathBuf>("kubeconfig").cloned(),
            },
            sync_image: required(matches, "sync-image")?,
            workdir: required(matches, "workdir")?,
            wait_timeout: matches
                .get_one::<u64>("wait-timeout")
                .map(|secs| Duration::from_secs(*secs)),
            verbose: matches.get_flag("verbose"),
        })
    }

    /// Build the session configuration for `namespace`.
    pub fn session_config(&self, namespace: &str) -> SessionConfig {
        let mut config = SessionConfig::new(&self.name, namespace, &self.image);
        config.command.clone_from(&self.command);
        config.stdin = self.stdin;
        config.tty = self.tty;
        config.workdir.clone_from(&self.workdir);
        config.sync_image.clone_from(&self.sync_image);
        config.service_account.clone_from(&self.service_account);
        config.node_selector =
            resolve_node_selector(&self.node_selector_keys, &self.node_selector_values);
        config.filter = SyncFilter::new(
            &self.rsync_args,
            self.includes.clone(),
            self.excludes.clone(),
        );
        config.wait_timeout = self.wait_timeout;
        config
    }

    /// rsync output is only shown with `--verbose`.
    pub const fn sync_output(&self) -> SyncOutput {
        if self.verbose {
            SyncOutput::Inherit
        } else {
            SyncOutput::Discard
        }
    }
}

/// Run a session against the cluster kubectl points at.
pub async fn run_with_options(opts: &RunOptions, cancel: CancellationSignal) -> Result<SessionOutcome> {
    let kubectl = Kubectl::connect(opts.kubectl.clone()).await?;
    let config = opts.session_config(kubectl.namespace());

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(kubectl),
        Arc::new(RsyncBackend::new(opts.sync_output())),
        cancel,
    );
    let mut stdout = tokio::io::stdout();
    let outcome = orchestrator.run(&mut stdout).await?;
    Ok(outcome)
}
