//! Child-process supervisor - tracks both launcher children in a role-keyed
//! table and collects their exit events.
//!
//! Flow:
//! 1. Spawn the server child in the background (never awaited for readiness)
//! 2. Spawn the worker child
//! 3. A reaper task per child forwards its exit status to the wait loop
//! 4. The wait loop derives the container outcome from the worker's exit
//! 5. On a stop request: SIGTERM to all children, bounded grace, then SIGKILL

use std::collections::HashMap;
use std::pin::pin;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::TANDEM_VERSION;
use crate::spec::{ChildRole, ProcessSpec};
use crate::state::{ChildStatus, RunState, SpawnEvent, StatusSnapshot};

/// What a server death means while the worker is still alive.
///
/// `BestEffort` keeps the original contract: the server is started and then
/// left entirely unsupervised - its exit is recorded and logged but triggers
/// nothing. `Critical` treats the server as required and gracefully stops
/// the worker when it dies. Under both policies the container exit code is
/// derived from the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerPolicy {
    #[default]
    BestEffort,
    Critical,
}

impl ServerPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerPolicy::BestEffort => "best-effort",
            ServerPolicy::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "best-effort" => Some(ServerPolicy::BestEffort),
            "critical" => Some(ServerPolicy::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(#[from] SpawnError),
    #[error("failed to wait for {role}: {source}")]
    Wait {
        role: ChildRole,
        #[source]
        source: std::io::Error,
    },
    #[error("children exited without reporting a worker outcome")]
    MissingWorkerOutcome,
}

/// Extension point for spawn strategies.
pub trait ChildSpawner: Send + Sync {
    fn spawn(&self, spec: &ProcessSpec) -> Result<Child, SpawnError>;
}

/// Default spawner: runs the command described by the spec.
pub struct CommandSpawner;

impl ChildSpawner for CommandSpawner {
    fn spawn(&self, spec: &ProcessSpec) -> Result<Child, SpawnError> {
        let child = spec.command().spawn()?;
        Ok(child)
    }
}

/// Table mutations are short and infallible; recover the guard on poison.
fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type ExitEvent = (ChildRole, std::io::Result<ExitStatus>);

/// Process-wide supervisor for the two launcher children.
pub struct Supervisor {
    children: StdMutex<HashMap<ChildRole, ChildStatus>>,
    events: StdMutex<Vec<SpawnEvent>>,
    spawner: Arc<dyn ChildSpawner>,
    policy: ServerPolicy,
    grace_period: Duration,
}

impl Supervisor {
    pub fn new(policy: ServerPolicy, grace_period: Duration) -> Arc<Self> {
        Self::with_spawner(policy, grace_period, Arc::new(CommandSpawner))
    }

    pub fn with_spawner(
        policy: ServerPolicy,
        grace_period: Duration,
        spawner: Arc<dyn ChildSpawner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            children: StdMutex::new(HashMap::new()),
            events: StdMutex::new(Vec::new()),
            spawner,
            policy,
            grace_period,
        })
    }

    /// Spawn the two children in fixed order: server requested strictly
    /// before worker, with no readiness handshake in between. The server
    /// spawn is fire-and-forget - a failure there is recorded but never
    /// halts the worker. A worker spawn failure is fatal.
    pub fn launch(
        self: &Arc<Self>,
        server: ProcessSpec,
        worker: ProcessSpec,
    ) -> Result<LaunchHandle, SupervisorError> {
        let (exit_tx, exit_rx) = mpsc::channel(2);

        match self.spawn_child(&server, &exit_tx) {
            Ok(pid) => match server.binding() {
                Some(binding) => tracing::info!(
                    role = %server.role(),
                    pid,
                    addr = %binding.addr(),
                    "Started server child"
                ),
                None => tracing::info!(role = %server.role(), pid, "Started server child"),
            },
            Err(e) => {
                tracing::warn!(role = %server.role(), error = %e, "Server child failed to spawn");
            }
        }

        match self.spawn_child(&worker, &exit_tx) {
            Ok(pid) => tracing::info!(role = %worker.role(), pid, "Started worker child"),
            Err(e) => {
                tracing::error!(role = %worker.role(), error = %e, "Worker child failed to spawn");
                return Err(SupervisorError::WorkerSpawn(e));
            }
        }

        Ok(LaunchHandle {
            supervisor: Arc::clone(self),
            exit_rx,
        })
    }

    /// Record the spawn request, spawn the child, and hand it to a reaper
    /// task that reports the exit status on `exit_tx`.
    fn spawn_child(
        self: &Arc<Self>,
        spec: &ProcessSpec,
        exit_tx: &mpsc::Sender<ExitEvent>,
    ) -> Result<u32, SpawnError> {
        let role = spec.role();
        let spawned = self.spawner.spawn(spec);

        let (status, pid) = match &spawned {
            Ok(child) => {
                // The pid stays valid until the reaper task below waits on
                // the child.
                let pid = child.id().unwrap_or_default();
                (ChildStatus::Running { pid }, Some(pid))
            }
            Err(e) => (
                ChildStatus::SpawnFailed {
                    error: e.to_string(),
                },
                None,
            ),
        };

        lock(&self.children).insert(role, status);
        lock(&self.events).push(SpawnEvent {
            role,
            pid,
            at: Utc::now(),
        });

        let mut child = spawned?;
        let tx = exit_tx.clone();
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let result = child.wait().await;
            match &result {
                Ok(status) => supervisor.record_exit(role, *status),
                Err(e) => {
                    tracing::error!(role = %role, error = %e, "Failed to wait for child");
                    supervisor.record_unreaped(role);
                }
            }
            let _ = tx.send((role, result)).await;
        });

        Ok(pid.unwrap_or_default())
    }

    fn record_exit(&self, role: ChildRole, status: ExitStatus) {
        lock(&self.children).insert(role, ChildStatus::exited(status));
    }

    /// Terminal status for a child whose wait call failed.
    fn record_unreaped(&self, role: ChildRole) {
        lock(&self.children).insert(
            role,
            ChildStatus::Exited {
                code: None,
                signal: None,
            },
        );
    }

    fn child_status(&self, role: ChildRole) -> ChildStatus {
        lock(&self.children)
            .get(&role)
            .cloned()
            .unwrap_or(ChildStatus::Pending)
    }

    fn any_running(&self) -> bool {
        lock(&self.children).values().any(ChildStatus::is_running)
    }

    /// Aggregate status of the container run.
    pub fn status(&self) -> StatusSnapshot {
        let server = self.child_status(ChildRole::Server);
        let worker = self.child_status(ChildRole::Worker);
        let state = RunState::aggregate([&server, &worker]);
        StatusSnapshot {
            state,
            server,
            worker,
            version: TANDEM_VERSION,
        }
    }

    /// Spawn requests in the order they were issued.
    pub fn events(&self) -> Vec<SpawnEvent> {
        lock(&self.events).clone()
    }

    /// Forward a signal to every child still running.
    ///
    /// ESRCH means the child exited between the table snapshot and the kill;
    /// the reaper owns the authoritative status, so that race is ignored.
    #[cfg(unix)]
    fn signal_running(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let targets: Vec<(ChildRole, u32)> = lock(&self.children)
            .iter()
            .filter_map(|(role, status)| status.pid().map(|pid| (*role, pid)))
            .collect();

        for (role, pid) in targets {
            tracing::debug!(role = %role, pid, signal = ?signal, "Signaling child");
            if let Err(e) = kill(Pid::from_raw(pid as i32), signal)
                && e != nix::errno::Errno::ESRCH
            {
                tracing::warn!(role = %role, pid, error = %e, "Failed to signal child");
            }
        }
    }

    /// Graceful stop request: SIGTERM where the platform has it.
    fn request_stop(&self) {
        #[cfg(unix)]
        self.signal_running(nix::sys::signal::Signal::SIGTERM);
    }

    /// Abrupt stop: SIGKILL, no grace.
    fn force_stop(&self) {
        #[cfg(unix)]
        self.signal_running(nix::sys::signal::Signal::SIGKILL);
    }
}

/// Outcome of a completed launch: the worker's exit status, from which the
/// container exit code is derived.
#[derive(Debug, Clone, Copy)]
pub struct ExitOutcome {
    status: ExitStatus,
}

impl ExitOutcome {
    fn new(status: ExitStatus) -> Self {
        Self { status }
    }

    pub fn status(&self) -> ExitStatus {
        self.status
    }

    /// Container exit code: the worker's code, or `128 + signal` when the
    /// worker was signal-terminated.
    pub fn container_code(&self) -> i32 {
        if let Some(code) = self.status.code() {
            return code;
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = self.status.signal() {
                return 128 + signal;
            }
        }

        1
    }
}

/// Handle to a launched pair of children.
///
/// `wait` drives the launch to completion. Dropping the handle instead
/// abandons the children to kill-on-drop teardown.
pub struct LaunchHandle {
    supervisor: Arc<Supervisor>,
    exit_rx: mpsc::Receiver<ExitEvent>,
}

impl LaunchHandle {
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Block until the container outcome is known.
    ///
    /// Resolves once the worker has been reaped and no child is left
    /// running. `shutdown` is the external stop request (typically
    /// [`crate::signal::shutdown_signal`]); when it resolves, SIGTERM is
    /// forwarded to every running child and the grace period starts.
    pub async fn wait(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<ExitOutcome, SupervisorError> {
        let supervisor = Arc::clone(&self.supervisor);
        let policy = supervisor.policy;
        let grace_period = supervisor.grace_period;

        let mut shutdown = pin!(shutdown);
        let mut stopping = false;
        let mut deadline: Option<Instant> = None;
        let mut worker_status: Option<ExitStatus> = None;

        // A critical server may already be down by the time the wait starts
        // (spawn failure, or an exit quicker than the launch return).
        if policy == ServerPolicy::Critical
            && supervisor.child_status(ChildRole::Server).is_terminal()
        {
            tracing::warn!("Server is down and policy is critical, stopping worker");
            supervisor.request_stop();
            stopping = true;
            deadline = Some(Instant::now() + grace_period);
        }

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown, if !stopping => {
                    tracing::info!("Stop requested, forwarding SIGTERM to children");
                    supervisor.request_stop();
                    stopping = true;
                    deadline = Some(Instant::now() + grace_period);
                }

                _ = async move {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if deadline.is_some() => {
                    tracing::warn!("Grace period elapsed, force-killing remaining children");
                    supervisor.force_stop();
                    deadline = None;
                }

                event = self.exit_rx.recv() => match event {
                    Some((ChildRole::Worker, Ok(status))) => {
                        tracing::info!(code = ?status.code(), "Worker exited");
                        worker_status = Some(status);
                        if supervisor.any_running() {
                            // Container teardown is abrupt: once the
                            // foreground process is gone, survivors get no
                            // graceful signal.
                            supervisor.force_stop();
                            if cfg!(not(unix)) {
                                break;
                            }
                        } else {
                            break;
                        }
                    }
                    Some((ChildRole::Worker, Err(e))) => {
                        return Err(SupervisorError::Wait {
                            role: ChildRole::Worker,
                            source: e,
                        });
                    }
                    Some((ChildRole::Server, result)) => {
                        match &result {
                            Ok(status) => tracing::warn!(
                                code = ?status.code(),
                                "Server exited while the container is still up"
                            ),
                            Err(e) => tracing::error!(error = %e, "Failed to wait for server"),
                        }

                        if policy == ServerPolicy::Critical && !stopping {
                            tracing::warn!("Server is down and policy is critical, stopping worker");
                            supervisor.request_stop();
                            stopping = true;
                            deadline = Some(Instant::now() + grace_period);
                        }

                        if worker_status.is_some() && !supervisor.any_running() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        match worker_status {
            Some(status) => Ok(ExitOutcome::new(status)),
            None => Err(SupervisorError::MissingWorkerOutcome),
        }
    }
}
