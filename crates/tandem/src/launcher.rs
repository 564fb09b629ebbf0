//! Top-level launch orchestration: build the two fixed process specs and
//! drive them under the supervisor.

use anyhow::Context;

use crate::settings::Settings;
use crate::signal;
use crate::spec::{ChildRole, NetBinding, ProcessSpec};
use crate::supervisor::Supervisor;

/// Run the launcher to completion and return the container exit code.
///
/// Spawns the server child first (never awaited for readiness), then the
/// worker, and blocks until the worker's exit status is known. The exit
/// code is derived from the worker in every case; the server contributes
/// state and logs, never the code.
pub async fn run(settings: Settings) -> anyhow::Result<i32> {
    let supervisor = Supervisor::new(settings.server_policy, settings.grace_period);

    let server = ProcessSpec::from_command_line(ChildRole::Server, &settings.server_command)
        .context("server command is empty")?
        .with_binding(NetBinding::new(settings.host.clone(), settings.port));
    let worker = ProcessSpec::from_command_line(ChildRole::Worker, &settings.worker_command)
        .context("worker command is empty")?;

    tracing::info!(
        server = %server.display_command(),
        worker = %worker.display_command(),
        policy = settings.server_policy.as_str(),
        "Launching children"
    );

    let handle = supervisor
        .launch(server, worker)
        .context("failed to launch children")?;

    let outcome = handle.wait(signal::shutdown_signal()).await?;
    let code = outcome.container_code();
    tracing::info!(code, "Container run finished");

    Ok(code)
}
