//! tandem: co-process launcher for single-container entrypoints.

mod state;

pub mod launcher;
pub mod settings;
pub mod signal;
pub mod spec;
pub mod supervisor;

pub use launcher::run;

pub use settings::{Settings, SettingsError};
pub use spec::{ChildRole, NetBinding, ProcessSpec};
pub use state::{ChildStatus, RunState, SpawnEvent, StatusSnapshot};
pub use supervisor::{
    ChildSpawner, CommandSpawner, ExitOutcome, LaunchHandle, ServerPolicy, SpawnError, Supervisor,
    SupervisorError,
};

/// Launcher version from Cargo.toml
pub const TANDEM_VERSION: &str = env!("CARGO_PKG_VERSION");
