//! Sandbox abstraction layer.
//!
//! Defines the [`Sandbox`] trait every provider must implement, the
//! [`SpawnedProcess`] handle the orchestrator owns exclusively, and the
//! [`SandboxRegistry`] that memoizes the session-wide boot. One provider
//! ships with the crate:
//!
//! - [`local::LocalSandbox`] — tempdir-backed local processes (no isolation
//!   guarantees beyond a scratch directory; intended for development and
//!   tests)

pub mod local;

use crate::project::tree::FileTree;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, OnceCell};
use tokio_util::sync::CancellationToken;

/// Unsolicited notifications from a sandbox instance.
#[derive(Clone, Debug)]
pub enum SandboxEvent {
    /// A spawned server is accepting connections.
    ServerReady { port: u16, url: String },
    /// Runtime failure inside the sandbox — fatal for the current launch.
    Error { message: String },
}

/// Provider-agnostic sandbox interface.
///
/// All paths are slash-delimited and relative to the sandbox's project
/// root. Providers own their processes' plumbing; the orchestrator only
/// ever sees [`SpawnedProcess`] handles.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Stable instance identifier, for log context.
    fn id(&self) -> &str;

    /// Materialize a mount tree at the project root, replacing any
    /// previously mounted content at the same paths.
    async fn mount(&self, tree: &FileTree) -> anyhow::Result<()>;

    /// Spawn a process. `env` is applied on top of the sandbox defaults.
    async fn spawn(
        &self,
        argv: &[String],
        env: &[(String, String)],
    ) -> anyhow::Result<SpawnedProcess>;

    /// Write one file into the live filesystem, creating intermediate
    /// directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()>;

    /// Subscribe to sandbox notifications (server-ready, runtime errors).
    fn events(&self) -> broadcast::Receiver<SandboxEvent>;
}

/// Exclusive handle to one live process inside a sandbox.
///
/// The orchestrator holds at most one of these at a time; starting a new
/// server requires killing the previous handle first.
pub struct SpawnedProcess {
    output: Option<mpsc::Receiver<String>>,
    exit: watch::Receiver<Option<i32>>,
    kill: CancellationToken,
}

impl SpawnedProcess {
    /// Assemble a handle from provider-side plumbing: a bounded line
    /// stream, an exit observable, and a cancellation token the provider
    /// listens on to kill the underlying process.
    pub fn new(
        output: mpsc::Receiver<String>,
        exit: watch::Receiver<Option<i32>>,
        kill: CancellationToken,
    ) -> Self {
        Self {
            output: Some(output),
            exit,
            kill,
        }
    }

    /// Take the merged stdout/stderr line stream. Yields `None` after the
    /// first call.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<String>> {
        self.output.take()
    }

    /// Observable exit code; `None` until the process exits.
    pub fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        self.exit.clone()
    }

    /// Request termination. Idempotent; the provider reaps the process.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Wait for the process to exit and return its code. Safe to call
    /// repeatedly; `-1` stands in for a code the provider could not
    /// determine.
    pub async fn wait(&mut self) -> i32 {
        loop {
            let current = *self.exit.borrow();
            if let Some(code) = current {
                return code;
            }
            if self.exit.changed().await.is_err() {
                // Provider dropped without reporting an exit code.
                return self.exit.borrow().unwrap_or(-1);
            }
        }
    }
}

// ── session-wide boot ─────────────────────────────────────────────────────────

/// Factory that performs the actual (expensive) boot.
#[async_trait]
pub trait SandboxBooter: Send + Sync {
    async fn boot(&self) -> anyhow::Result<Arc<dyn Sandbox>>;
}

/// Process-wide registry for the shared sandbox capability.
///
/// The capability is booted at most once per session: the first caller
/// wins and concurrent callers await the same in-flight boot. The handle
/// lives until the registry is dropped at session end; orchestrators may
/// be torn down and relaunched many times against the same instance.
pub struct SandboxRegistry {
    booter: Box<dyn SandboxBooter>,
    cell: OnceCell<Arc<dyn Sandbox>>,
}

impl SandboxRegistry {
    pub fn new(booter: Box<dyn SandboxBooter>) -> Self {
        Self {
            booter,
            cell: OnceCell::new(),
        }
    }

    /// Return the booted sandbox, booting it on first use.
    pub async fn get_or_boot(&self) -> anyhow::Result<Arc<dyn Sandbox>> {
        self.cell
            .get_or_try_init(|| self.booter.boot())
            .await
            .cloned()
    }

    pub fn booted(&self) -> bool {
        self.cell.initialized()
    }
}
