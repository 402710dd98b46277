//! Process Supervisor: spawn/monitor/stop the core child process with a
//! bounded crash-restart policy and a stability timer.

pub mod killtree;
#[cfg(target_os = "macos")]
pub mod shepherd;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, RwLock};
use tracing::{error, info, warn};

use crate::control::ControlSession;
use crate::error::SupervisorError;
use crate::logsink::{NullSink, Sink};

const STABILITY_WINDOW: Duration = Duration::from_secs(180);
const RESTART_BACKOFF: Duration = Duration::from_secs(2);
const MAX_CONSECUTIVE_RESTARTS: u32 = 3;
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub binary_path: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

struct Inner {
    state: RunState,
    consecutive_crashes: u32,
    user_requested_stop: bool,
    child_pid: Option<u32>,
    generation: u64,
    /// Latched on the exhausted-restarts and force-kill paths, cleared on
    /// the next successful `start()`; one value survives until the next
    /// transition, it never accumulates across restarts.
    last_error: Option<SupervisorError>,
}

/// Owns the single long-lived observer loop for the core child process.
pub struct Supervisor {
    config: SupervisorConfig,
    inner: Arc<RwLock<Inner>>,
    child_exited: Arc<Notify>,
    control: Option<Arc<ControlSession>>,
    child_sink: Arc<dyn Sink>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                state: RunState::Stopped,
                consecutive_crashes: 0,
                user_requested_stop: false,
                child_pid: None,
                generation: 0,
                last_error: None,
            })),
            child_exited: Arc::new(Notify::new()),
            control: None,
            child_sink: Arc::new(NullSink),
        }
    }

    /// Routes the child's stdout/stderr through `sink` instead of discarding
    /// it. The CLI's bootstrap wires this to a rotating file sink before
    /// starting.
    pub fn with_child_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.child_sink = sink;
        self
    }

    /// Attaches the Control-Plane Bridge whose `enabled` flag and caches
    /// must track this supervisor's running state. The bridge is only
    /// usable while this supervisor reports `running` and is reset on every
    /// transition away from it.
    pub fn with_control_session(mut self, session: Arc<ControlSession>) -> Self {
        self.control = Some(session);
        self
    }

    fn notify_running(&self, running: bool) {
        if let Some(session) = self.control.clone() {
            tokio::spawn(async move { session.set_running(running).await });
        }
    }

    pub async fn state(&self) -> RunState {
        self.inner.read().await.state
    }

    pub async fn child_pid(&self) -> Option<u32> {
        self.inner.read().await.child_pid
    }

    /// The error latched by the most recent exhausted-restarts or
    /// force-kill transition, if any since the last successful `start()`.
    pub async fn last_error(&self) -> Option<SupervisorError> {
        self.inner.read().await.last_error.clone()
    }

    /// Idempotent: a second call while `starting` or `running` reports
    /// `AlreadyRunning` rather than spawning a second child.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        {
            let guard = self.inner.read().await;
            if guard.state != RunState::Stopped {
                return Err(SupervisorError::AlreadyRunning);
            }
        }
        if !self.config.binary_path.exists() {
            return Err(SupervisorError::BinaryMissing(self.config.binary_path.display().to_string()));
        }

        let mut guard = self.inner.write().await;
        guard.state = RunState::Starting;
        guard.user_requested_stop = false;
        guard.last_error = None;
        guard.generation += 1;
        let generation = guard.generation;
        drop(guard);

        self.spawn_and_watch(generation).await
    }

    async fn spawn_and_watch(&self, generation: u64) -> Result<(), SupervisorError> {
        let mut command = Command::new(&self.config.binary_path);
        command
            .args(&self.config.args)
            .current_dir(&self.config.working_dir)
            .kill_on_drop(false)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| SupervisorError::StartFailed(e.to_string()))?;
        let pid = child.id().ok_or_else(|| SupervisorError::StartFailed("spawned process has no pid".into()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.spawn_output_reader(stdout, "stdout");
        self.spawn_output_reader(stderr, "stderr");

        {
            let mut guard = self.inner.write().await;
            guard.state = RunState::Running;
            guard.child_pid = Some(pid);
        }
        info!(pid, "core process started");
        self.notify_running(true);

        self.spawn_stability_timer(generation);
        self.spawn_observer(child, generation);

        Ok(())
    }

    /// Relays one of the child's output streams, line by line, through
    /// `child_sink` rather than inheriting the parent's stdio.
    fn spawn_output_reader<R>(&self, stream: Option<R>, stream_name: &'static str)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let Some(stream) = stream else { return };
        let sink = self.child_sink.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => sink.write_line(format_args!("[{stream_name}] {line}")),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, stream_name, "core process output stream read failed");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_stability_timer(&self, generation: u64) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STABILITY_WINDOW).await;
            let mut guard = inner.write().await;
            if guard.generation == generation && guard.state == RunState::Running {
                guard.consecutive_crashes = 0;
            }
        });
    }

    fn spawn_observer(&self, mut child: Child, generation: u64) {
        let inner = self.inner.clone();
        let child_exited = self.child_exited.clone();
        let config = self.config.clone();
        let control = self.control.clone();
        let child_sink = self.child_sink.clone();

        tokio::spawn(async move {
            let status = child.wait().await;
            child_exited.notify_waiters();

            let mut guard = inner.write().await;
            if guard.generation != generation {
                // A newer start() has already superseded this run.
                return;
            }

            match status {
                Ok(status) => info!(?status, "core process exited"),
                Err(e) => error!(error = %e, "failed to wait on core process"),
            }

            if guard.user_requested_stop {
                guard.state = RunState::Stopped;
                guard.child_pid = None;
                drop(guard);
                if let Some(session) = &control {
                    session.set_running(false).await;
                }
                return;
            }

            if guard.consecutive_crashes + 1 >= MAX_CONSECUTIVE_RESTARTS {
                guard.consecutive_crashes += 1;
                guard.state = RunState::Stopped;
                guard.child_pid = None;
                guard.last_error = Some(SupervisorError::RestartExhausted(guard.consecutive_crashes));
                error!(crashes = guard.consecutive_crashes, "restart attempts exhausted");
                drop(guard);
                if let Some(session) = &control {
                    session.set_running(false).await;
                }
                return;
            }

            guard.consecutive_crashes += 1;
            let crashes = guard.consecutive_crashes;
            guard.generation += 1;
            let next_generation = guard.generation;
            drop(guard);

            warn!(crashes, "core process crashed; scheduling restart");
            if let Some(session) = &control {
                session.set_running(false).await;
            }
            tokio::time::sleep(RESTART_BACKOFF).await;

            let supervisor = Supervisor {
                config,
                inner: inner.clone(),
                child_exited: child_exited.clone(),
                control: control.clone(),
                child_sink: child_sink.clone(),
            };
            if let Err(e) = supervisor.spawn_and_watch(next_generation).await {
                error!(error = %e, "automatic restart failed");
                let mut guard = inner.write().await;
                guard.state = RunState::Stopped;
            }
        });
    }

    /// Sets the stop latch, signals the child, waits up to the grace
    /// period, then force-kills the PID tree.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let pid = {
            let mut guard = self.inner.write().await;
            if guard.state == RunState::Stopped {
                return Ok(());
            }
            guard.user_requested_stop = true;
            guard.state = RunState::Stopping;
            guard.child_pid
        };
        // P6: the bridge is disabled the moment we leave `running`, not only
        // once the child has actually exited.
        self.notify_running(false);

        let Some(pid) = pid else {
            let mut guard = self.inner.write().await;
            guard.state = RunState::Stopped;
            return Ok(());
        };

        killtree::send_terminate(pid)?;

        let waited = tokio::time::timeout(STOP_GRACE, self.child_exited.notified()).await;
        if waited.is_err() {
            warn!(pid, "grace period expired; force-killing process tree");
            killtree::kill_tree(pid);
        }

        let mut guard = self.inner.write().await;
        guard.state = RunState::Stopped;
        guard.child_pid = None;
        if waited.is_err() {
            guard.last_error = Some(SupervisorError::StopTimeout);
        }
        Ok(())
    }
}
