//! # Warp Core
//!
//! Runs a command in a throwaway pod with the current directory synced
//! into it.
//!
//! ## Session Flow
//!
//! The [`Orchestrator`] creates a pod with two sshd containers next to the
//! user's container, opens a port-forward to sshd, rsyncs the local tree
//! over it, attaches to the work container and keeps re-syncing every
//! second until the session ends.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` / `expect()` / `panic!()` outside tests
//! - No `unsafe`
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. A pod that already
//! finished is an outcome, not an error: the session prints its logs and
//! returns [`SessionOutcome::LogsPrinted`].

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod cancel;
pub mod cluster;
pub mod condition;
mod error;
pub mod keys;
pub mod kubectl;
pub mod manifest;
pub mod orchestrator;
pub mod pod;
pub mod port;
pub mod session;
pub mod sync;

pub use cancel::CancellationSignal;
pub use cluster::{AttachOptions, Cluster, PodGuard, PodWatch, Tunnel};
pub use condition::{evaluate, wait_for, Condition, ConditionError, Milestone, Terminal, WaitOutcome};
pub use error::{Error, Result};
pub use kubectl::{Kubectl, KubectlOptions};
pub use orchestrator::{Orchestrator, SessionOutcome};
pub use session::{resolve_node_selector, SessionConfig};
pub use sync::{FileSync, RsyncBackend, SyncBackend, SyncFilter, SyncOutput};
