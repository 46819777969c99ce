//! Local sandbox provider — runs project processes in a scratch directory.
//!
//! No MicroVM or container: the mount tree is materialized into a
//! [`tempfile::TempDir`] and processes run directly on the host with
//! `tokio::process`. Useful for development and tests; preview URLs are
//! `http://localhost:{port}` and only reachable from the local machine.
//!
//! Server readiness is detected by polling the port injected via the `PORT`
//! environment variable with TCP connects until one succeeds.

use super::{Sandbox, SandboxBooter, SandboxEvent, SpawnedProcess};
use crate::project::tree::{FileNode, FileTree};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Interval between TCP connect probes while waiting for a server.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Bound on the merged output line channel per process.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub struct LocalSandbox {
    id: String,
    root: TempDir,
    events: broadcast::Sender<SandboxEvent>,
}

impl LocalSandbox {
    pub fn boot() -> anyhow::Result<Self> {
        let root = TempDir::with_prefix("livepreview-")
            .map_err(|e| anyhow::anyhow!("failed to create sandbox root: {e}"))?;
        let (events, _) = broadcast::channel(32);
        let id = format!("local-{}", uuid::Uuid::new_v4());
        tracing::debug!("booted local sandbox {id} at {}", root.path().display());
        Ok(Self { id, root, events })
    }

    pub fn root_path(&self) -> &Path {
        self.root.path()
    }

    /// Resolve a relative slash path inside the sandbox root, refusing
    /// anything that would escape it.
    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(path);
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        anyhow::ensure!(!escapes, "path escapes sandbox root: {path}");
        Ok(self.root.path().join(rel))
    }

    fn write_node<'a>(
        &'a self,
        dir: PathBuf,
        name: &'a str,
        node: &'a FileNode,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let target = dir.join(name);
            match node {
                FileNode::File { contents } => {
                    tokio::fs::write(&target, contents).await.map_err(|e| {
                        anyhow::anyhow!("failed to write {}: {e}", target.display())
                    })?;
                }
                FileNode::Directory { entries } => {
                    tokio::fs::create_dir_all(&target).await.map_err(|e| {
                        anyhow::anyhow!("failed to create {}: {e}", target.display())
                    })?;
                    for (child_name, child) in entries {
                        self.write_node(target.clone(), child_name, child).await?;
                    }
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mount(&self, tree: &FileTree) -> anyhow::Result<()> {
        for (name, node) in tree {
            self.write_node(self.root.path().to_path_buf(), name, node)
                .await?;
        }
        Ok(())
    }

    async fn spawn(
        &self,
        argv: &[String],
        env: &[(String, String)],
    ) -> anyhow::Result<SpawnedProcess> {
        let program = argv
            .first()
            .ok_or_else(|| anyhow::anyhow!("empty argv"))?;

        let mut child = Command::new(program)
            .args(&argv[1..])
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(self.root.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn `{program}`: {e}"))?;

        let (line_tx, line_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = CancellationToken::new();

        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, line_tx);
        }

        // When PORT is injected the caller expects a listening server;
        // probe it and publish server-ready on the event channel.
        if let Some(port) = env
            .iter()
            .find(|(k, _)| k == "PORT")
            .and_then(|(_, v)| v.parse::<u16>().ok())
        {
            spawn_ready_probe(port, self.events.clone(), kill.clone(), exit_rx.clone());
        }

        let token = kill.clone();
        tokio::spawn(async move {
            let code = tokio::select! {
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    child.wait().await.ok().and_then(|s| s.code()).unwrap_or(-1)
                }
                status = child.wait() => status.ok().and_then(|s| s.code()).unwrap_or(-1),
            };
            exit_tx.send_replace(Some(code));
        });

        Ok(SpawnedProcess::new(line_rx, exit_rx, kill))
    }

    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| anyhow::anyhow!("failed to create {}: {e}", parent.display()))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", target.display()))
    }

    fn events(&self) -> broadcast::Receiver<SandboxEvent> {
        self.events.subscribe()
    }
}

fn spawn_line_reader(stream: impl AsyncRead + Unpin + Send + 'static, tx: mpsc::Sender<String>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

fn spawn_ready_probe(
    port: u16,
    events: broadcast::Sender<SandboxEvent>,
    kill: CancellationToken,
    mut exit: watch::Receiver<Option<i32>>,
) {
    tokio::spawn(async move {
        loop {
            if kill.is_cancelled() || exit.borrow_and_update().is_some() {
                return;
            }
            if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                let _ = events.send(SandboxEvent::ServerReady {
                    port,
                    url: format!("http://localhost:{port}"),
                });
                return;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    });
}

/// Boots a [`LocalSandbox`] for the registry.
pub struct LocalSandboxBooter;

#[async_trait]
impl SandboxBooter for LocalSandboxBooter {
    async fn boot(&self) -> anyhow::Result<Arc<dyn Sandbox>> {
        Ok(Arc::new(LocalSandbox::boot()?))
    }
}
