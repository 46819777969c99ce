//! Lifecycle Orchestrator: the one effectful state owner of the crate.
//!
//! Drives boot → mount → install → run for each full launch, owns the single
//! live server process handle, retries failed installs once with escalated
//! flags, retries the dev server on fresh ports, and applies incremental
//! file-set revisions to the running instance without a restart where it
//! safely can.
//!
//! Controls (`start`/`refresh`/`stop`/`sync`) may be called from any task;
//! a new launch always cancels the in-flight attempt and terminates the
//! previously owned process before touching the sandbox again.

pub mod sync;

use crate::config::PreviewConfig;
use crate::error::PreviewError;
use crate::logs::LogAggregator;
use crate::project::commands::{self, InstallEscalation, NpmInstallEscalation};
use crate::project::{detect, tree, ProjectType};
use crate::revision::FileRevision;
use crate::sandbox::{Sandbox, SandboxEvent, SandboxRegistry, SpawnedProcess};
use parking_lot::Mutex;
use rand::RngExt;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sync::{diff_revisions, SyncOutcome};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Observable lifecycle of the preview instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Booting,
    Installing,
    Running,
    Error,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Booting => "booting",
            Self::Installing => "installing",
            Self::Running => "running",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// State guarded by a (non-async) mutex; never held across an await.
struct Shared {
    /// The single live long-running process handle, if any.
    process: Option<SpawnedProcess>,
    /// Cancellation token of the current launch attempt.
    attempt: CancellationToken,
    /// Last revision fully applied to the sandbox, for diffing.
    last_applied: Option<FileRevision>,
    /// Revision that arrived mid-launch, applied by the next full launch.
    pending: Option<FileRevision>,
    /// Whether the session-wide sandbox error listener is running.
    error_listener: bool,
}

/// The preview orchestrator. Cheap to clone handles are exposed through
/// the observables; the orchestrator itself is the exclusive owner of the
/// live mount and process.
pub struct PreviewOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<SandboxRegistry>,
    config: PreviewConfig,
    escalation: Box<dyn InstallEscalation>,
    logs: Arc<LogAggregator>,
    status_tx: watch::Sender<LifecycleState>,
    preview_tx: watch::Sender<Option<String>>,
    shared: Mutex<Shared>,
}

impl PreviewOrchestrator {
    pub fn new(registry: Arc<SandboxRegistry>, config: PreviewConfig) -> Self {
        Self::with_escalation(registry, config, Box::new(NpmInstallEscalation))
    }

    pub fn with_escalation(
        registry: Arc<SandboxRegistry>,
        config: PreviewConfig,
        escalation: Box<dyn InstallEscalation>,
    ) -> Self {
        let logs = Arc::new(LogAggregator::new(config.log_capacity));
        let (status_tx, _) = watch::channel(LifecycleState::Idle);
        let (preview_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                escalation,
                logs,
                status_tx,
                preview_tx,
                shared: Mutex::new(Shared {
                    process: None,
                    attempt: CancellationToken::new(),
                    last_applied: None,
                    pending: None,
                    error_listener: false,
                }),
            }),
        }
    }

    // ── observables ──────────────────────────────────────────────────────────

    pub fn status(&self) -> LifecycleState {
        *self.inner.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<LifecycleState> {
        self.inner.status_tx.subscribe()
    }

    pub fn preview_address(&self) -> Option<String> {
        self.inner.preview_tx.borrow().clone()
    }

    pub fn subscribe_preview_address(&self) -> watch::Receiver<Option<String>> {
        self.inner.preview_tx.subscribe()
    }

    pub fn logs(&self) -> Arc<LogAggregator> {
        self.inner.logs.clone()
    }

    // ── controls ─────────────────────────────────────────────────────────────

    /// Full launch of a revision: boot → mount → install → run.
    ///
    /// Cancels any in-flight attempt and terminates any previously owned
    /// process first. Returns once the dev server signalled ready (state
    /// `Running`, preview address set) or the launch failed (state `Error`).
    pub async fn start(&self, revision: FileRevision) -> Result<(), PreviewError> {
        self.inner.shared.lock().pending = None; // superseded by this revision
        let token = self.inner.begin_attempt();
        let attempted = revision.clone();
        match self.inner.clone().launch(revision, token.clone()).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() || token.is_cancelled() => {
                self.inner.logs.push("Launch attempt aborted");
                Ok(())
            }
            Err(err) => {
                // Retain the failed revision for the next refresh; a
                // revision queued mid-launch is newer and wins.
                {
                    let mut shared = self.inner.shared.lock();
                    if shared.pending.is_none() {
                        shared.pending = Some(attempted);
                    }
                }
                self.inner.fail(&err);
                Err(err)
            }
        }
    }

    /// Force a full relaunch, discarding the preview address and the
    /// last-applied revision so the next sync is a full remount.
    pub async fn refresh(&self) -> Result<(), PreviewError> {
        self.inner.logs.push("Refresh requested: full relaunch");
        let revision = {
            let mut shared = self.inner.shared.lock();
            shared.pending.take().or_else(|| shared.last_applied.take())
        };
        match revision {
            Some(revision) => self.start(revision).await,
            None => {
                self.inner.logs.push("Nothing to relaunch yet");
                self.stop();
                Ok(())
            }
        }
    }

    /// Terminate the owned process and return to `Idle`. Log history is
    /// kept for diagnosis.
    pub fn stop(&self) {
        let _ = self.inner.begin_attempt();
        self.inner.set_state(LifecycleState::Idle);
        self.inner.logs.push("Stopped");
    }

    /// Apply a new file-set revision to the current instance.
    ///
    /// Mid-launch revisions are remembered and applied by the next full
    /// launch. While running, removals and dependency changes force a full
    /// relaunch; plain content changes are written directly into the live
    /// filesystem and the server's own hot-reload picks them up.
    pub async fn sync(&self, revision: FileRevision) -> Result<SyncOutcome, PreviewError> {
        let state = self.status();
        if state != LifecycleState::Running {
            self.inner.shared.lock().pending = Some(revision);
            self.inner
                .logs
                .push(format!("Revision queued while {state}; applied on next launch"));
            return Ok(SyncOutcome::Deferred);
        }

        let last_applied = self.inner.shared.lock().last_applied.clone();
        let Some(last_applied) = last_applied else {
            // Running without a baseline should not happen; remount to be safe.
            self.start(revision).await?;
            return Ok(SyncOutcome::Relaunched);
        };

        let diff = diff_revisions(&last_applied, &revision);

        if !diff.removed.is_empty() {
            self.inner.logs.push(format!(
                "{} file(s) removed ({}): full relaunch",
                diff.removed.len(),
                diff.removed.join(", ")
            ));
            self.start(revision).await?;
            return Ok(SyncOutcome::Relaunched);
        }

        if diff.deps_changed {
            self.inner
                .logs
                .push("Manifest dependencies changed: full relaunch");
            self.start(revision).await?;
            return Ok(SyncOutcome::Relaunched);
        }

        let mut written = 0;
        if !diff.changed.is_empty() {
            let sandbox = self.inner.registry.get_or_boot().await?;
            for path in &diff.changed {
                let Some(entry) = revision.get(path) else {
                    continue;
                };
                if let Some(reason) = tree::exclusion_reason(path, entry) {
                    self.inner.logs.push(format!("Skipping {path}: {reason}"));
                    continue;
                }
                match sandbox.write_file(path, &entry.content).await {
                    Ok(()) => written += 1,
                    Err(err) => {
                        // Non-fatal: skip the file, keep the batch going.
                        self.inner
                            .logs
                            .push(format!("Write failed for {path}, skipped: {err}"));
                    }
                }
            }
            self.inner
                .logs
                .push(format!("Synced {written} file(s) into the running preview"));
        }

        self.inner.shared.lock().last_applied = Some(revision);
        Ok(SyncOutcome::Patched { written })
    }
}

impl Inner {
    /// Cancel the in-flight attempt, terminate any owned process, clear the
    /// published preview address, and hand out a fresh token for the next
    /// attempt.
    fn begin_attempt(&self) -> CancellationToken {
        let mut shared = self.shared.lock();
        shared.attempt.cancel();
        if let Some(process) = shared.process.take() {
            process.kill();
            self.logs.push("Killed previous server process");
        }
        // The address belongs to the process that just lost ownership.
        self.preview_tx.send_replace(None);
        let token = CancellationToken::new();
        shared.attempt = token.clone();
        token
    }

    fn set_state(&self, state: LifecycleState) {
        let changed = {
            let previous = *self.status_tx.borrow();
            previous != state
        };
        if changed {
            self.status_tx.send_replace(state);
            self.logs.push(format!("Status: {state}"));
        }
    }

    fn fail(&self, err: &PreviewError) {
        self.logs.push(format!("Error: {err}"));
        self.preview_tx.send_replace(None);
        self.set_state(LifecycleState::Error);
    }

    fn pick_port(&self) -> u16 {
        rand::rng().random_range(self.config.port_min..=self.config.port_max)
    }

    /// Forward a process output stream into the log ring, flagging a
    /// recognized bind conflict so the retry message can name it.
    fn pipe_output(&self, mut rx: mpsc::Receiver<String>) -> Arc<AtomicBool> {
        let logs = self.logs.clone();
        let bind_conflict = Arc::new(AtomicBool::new(false));
        let flag = bind_conflict.clone();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if line.contains("EADDRINUSE") || line.contains("address already in use") {
                    flag.store(true, Ordering::SeqCst);
                }
                logs.push(line);
            }
        });
        bind_conflict
    }

    async fn launch(
        self: Arc<Self>,
        revision: FileRevision,
        token: CancellationToken,
    ) -> Result<(), PreviewError> {
        self.set_state(LifecycleState::Booting);
        self.logs.push("Booting sandbox");

        let sandbox = self.registry.get_or_boot().await?;
        ensure_live(&token)?;
        Inner::ensure_error_listener(self.clone(), &sandbox);
        self.logs.push(format!("Sandbox ready ({})", sandbox.id()));

        let project_type = detect::detect_project_type(&revision);
        self.logs
            .push(format!("Detected project type: {project_type}"));
        if project_type == ProjectType::Unknown {
            return Err(PreviewError::Detection);
        }

        let built = tree::build_tree(&revision);
        for (path, reason) in &built.skipped {
            self.logs.push(format!("Skipping {path}: {reason}"));
        }
        sandbox.mount(&built.tree).await?;
        ensure_live(&token)?;
        self.logs.push("Files mounted");

        let plan = commands::extract_plan(&revision);
        if plan.is_empty() {
            return Err(PreviewError::NoCommandPlan);
        }
        // Log the full plan verbatim before anything executes.
        self.logs.push("Extracted command plan:");
        for argv in plan.iter() {
            self.logs.push(format!("$ {}", argv.join(" ")));
        }

        self.set_state(LifecycleState::Installing);
        for argv in plan.setup() {
            self.run_setup(&sandbox, argv, &token).await?;
        }

        let server = plan
            .server()
            .ok_or(PreviewError::NoCommandPlan)?
            .to_vec();
        self.set_state(LifecycleState::Running);
        self.clone()
            .run_server(sandbox, server, revision, token)
            .await
    }

    /// Run one setup command to completion, retrying once with escalated
    /// (safer) flags on a non-zero exit.
    async fn run_setup(
        &self,
        sandbox: &Arc<dyn Sandbox>,
        argv: &[String],
        token: &CancellationToken,
    ) -> Result<(), PreviewError> {
        let rendered = argv.join(" ");
        self.logs.push(format!("Running: {rendered}"));
        let code = self.run_to_exit(sandbox, argv, token).await?;
        if code == 0 {
            self.logs.push(format!("{rendered} finished"));
            return Ok(());
        }
        self.logs
            .push(format!("{rendered} exited with code {code}"));

        let Some(safer) = self.escalation.escalate(argv) else {
            return Err(PreviewError::Install {
                command: rendered,
                code,
            });
        };

        let safer_rendered = safer.join(" ");
        self.logs
            .push(format!("Retrying with safer flags: $ {safer_rendered}"));
        let code = self.run_to_exit(sandbox, &safer, token).await?;
        if code == 0 {
            self.logs.push(format!("{safer_rendered} finished"));
            return Ok(());
        }
        Err(PreviewError::Install {
            command: safer_rendered,
            code,
        })
    }

    async fn run_to_exit(
        &self,
        sandbox: &Arc<dyn Sandbox>,
        argv: &[String],
        token: &CancellationToken,
    ) -> Result<i32, PreviewError> {
        ensure_live(token)?;
        let mut process = sandbox.spawn(argv, &[]).await?;
        if let Some(rx) = process.take_output() {
            self.pipe_output(rx);
        }
        tokio::select! {
            _ = token.cancelled() => {
                process.kill();
                Err(PreviewError::Cancelled)
            }
            code = process.wait() => Ok(code),
        }
    }

    /// Launch the long-running server command, retrying on fresh candidate
    /// ports until it signals ready or the attempt budget is exhausted.
    async fn run_server(
        self: Arc<Self>,
        sandbox: Arc<dyn Sandbox>,
        argv: Vec<String>,
        revision: FileRevision,
        token: CancellationToken,
    ) -> Result<(), PreviewError> {
        let max_attempts = self.config.max_run_attempts;
        let mut last_reason = "server never signalled ready".to_string();

        for attempt in 1..=max_attempts {
            ensure_live(&token)?;

            let port = self.pick_port();
            self.logs.push(format!(
                "Starting dev server (attempt {attempt}/{max_attempts}) on port {port}: $ {}",
                argv.join(" ")
            ));

            let mut env: Vec<(String, String)> = self
                .config
                .server_env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            env.push(("PORT".to_string(), port.to_string()));

            // Subscribe before spawning so a fast ready event is not missed.
            let mut events = sandbox.events();
            let mut events_open = true;

            let mut process = sandbox.spawn(&argv, &env).await?;
            let bind_conflict = match process.take_output() {
                Some(rx) => self.pipe_output(rx),
                None => Arc::new(AtomicBool::new(false)),
            };
            let mut exit = process.exit_watch();
            self.shared.lock().process = Some(process);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        if let Some(process) = self.shared.lock().process.take() {
                            process.kill();
                        }
                        return Err(PreviewError::Cancelled);
                    }
                    changed = exit.changed() => {
                        let code = match changed {
                            Ok(()) => *exit.borrow_and_update(),
                            Err(_) => Some(-1),
                        };
                        let Some(code) = code else { continue };
                        self.shared.lock().process = None;
                        last_reason = if bind_conflict.load(Ordering::SeqCst) {
                            self.logs.push(format!(
                                "Port {port} already in use; retrying on a new port"
                            ));
                            format!("port {port} already in use")
                        } else {
                            self.logs.push(format!(
                                "Dev server exited with code {code} before ready; retrying on a new port"
                            ));
                            format!("exited with code {code} before signalling ready")
                        };
                        break;
                    }
                    event = events.recv(), if events_open => match event {
                        Ok(SandboxEvent::ServerReady { port: ready_port, url }) => {
                            if ready_port != port {
                                // A leftover broadcast from a previous
                                // attempt; that process is already gone.
                                continue;
                            }
                            let url = if url.starts_with("http") {
                                url
                            } else {
                                format!("http://{url}")
                            };
                            self.preview_tx.send_replace(Some(url.clone()));
                            self.logs.push(format!("Server ready on {url} (port {port})"));
                            self.shared.lock().last_applied = Some(revision);
                            Inner::spawn_exit_monitor(self.clone(), exit, token);
                            return Ok(());
                        }
                        Ok(SandboxEvent::Error { .. }) => {
                            // Handled by the session-wide listener, which
                            // cancels this attempt's token.
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => {
                            events_open = false;
                        }
                    }
                }
            }
        }

        Err(PreviewError::Run {
            attempts: max_attempts,
            reason: last_reason,
        })
    }

    /// After the server is ready: watch for it dying underneath us.
    fn spawn_exit_monitor(
        inner: Arc<Inner>,
        mut exit: watch::Receiver<Option<i32>>,
        token: CancellationToken,
    ) {
        tokio::spawn(async move {
            let code = loop {
                if let Some(code) = *exit.borrow_and_update() {
                    break code;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    changed = exit.changed() => {
                        if changed.is_err() {
                            break -1;
                        }
                    }
                }
            };
            if token.is_cancelled() {
                return; // a newer launch or stop owns the narrative now
            }
            inner.shared.lock().process = None;
            inner.preview_tx.send_replace(None);
            if code != 0 {
                inner
                    .logs
                    .push(format!("Dev server exited with code {code}"));
                inner.set_state(LifecycleState::Error);
            } else {
                inner.logs.push("Dev server exited");
                inner.set_state(LifecycleState::Idle);
            }
        });
    }

    /// Session-wide listener for unsolicited sandbox errors: fatal from any
    /// state. Started once, on first successful boot.
    fn ensure_error_listener(inner: Arc<Inner>, sandbox: &Arc<dyn Sandbox>) {
        {
            let mut shared = inner.shared.lock();
            if shared.error_listener {
                return;
            }
            shared.error_listener = true;
        }
        let mut events = sandbox.events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SandboxEvent::Error { message }) => {
                        inner.logs.push(format!("Sandbox runtime error: {message}"));
                        let process = {
                            let mut shared = inner.shared.lock();
                            shared.attempt.cancel();
                            shared.process.take()
                        };
                        if let Some(process) = process {
                            process.kill();
                        }
                        inner.preview_tx.send_replace(None);
                        inner.set_state(LifecycleState::Error);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }
}

/// Bail out of the current attempt if it has been superseded.
fn ensure_live(token: &CancellationToken) -> Result<(), PreviewError> {
    if token.is_cancelled() {
        Err(PreviewError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_render_lowercase() {
        assert_eq!(LifecycleState::Booting.to_string(), "booting");
        assert_eq!(LifecycleState::Error.to_string(), "error");
    }

    #[test]
    fn ensure_live_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(ensure_live(&token).is_ok());
        token.cancel();
        assert!(matches!(
            ensure_live(&token),
            Err(PreviewError::Cancelled)
        ));
    }
}
