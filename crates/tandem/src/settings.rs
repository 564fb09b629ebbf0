//! Launcher settings resolved from the environment at process start.
//!
//! Defaults reproduce the fixed values of the original launch command:
//! `flask run -h 0.0.0.0 -p 10000` next to `python main.py`. Every value
//! can be overridden through `TANDEM_*` variables; invalid values are a
//! startup error, never a silent fallback.

use std::time::Duration;

use crate::supervisor::ServerPolicy;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

const ENV_HOST: &str = "TANDEM_HOST";
const ENV_PORT: &str = "TANDEM_PORT";
const ENV_SERVER_CMD: &str = "TANDEM_SERVER_CMD";
const ENV_WORKER_CMD: &str = "TANDEM_WORKER_CMD";
const ENV_GRACE_SECONDS: &str = "TANDEM_GRACE_SECONDS";
const ENV_SERVER_POLICY: &str = "TANDEM_SERVER_POLICY";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{key} must not be empty")]
    EmptyCommand { key: &'static str },
}

/// Resolved launcher configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Host the server child binds.
    pub host: String,
    /// Port the server child binds.
    pub port: u16,
    /// Server command line, pre-split.
    pub server_command: Vec<String>,
    /// Worker command line, pre-split.
    pub worker_command: Vec<String>,
    /// How long children get between SIGTERM and SIGKILL on stop.
    pub grace_period: Duration,
    /// What a server death means for the rest of the container.
    pub server_policy: ServerPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            server_command: default_server_command(DEFAULT_HOST, DEFAULT_PORT),
            worker_command: default_worker_command(),
            grace_period: DEFAULT_GRACE,
            server_policy: ServerPolicy::default(),
        }
    }
}

fn default_server_command(host: &str, port: u16) -> Vec<String> {
    vec![
        "flask".to_string(),
        "run".to_string(),
        "-h".to_string(),
        host.to_string(),
        "-p".to_string(),
        port.to_string(),
    ]
}

fn default_worker_command() -> Vec<String> {
    vec!["python".to_string(), "main.py".to_string()]
}

/// Commands are whitespace-split; anything needing shell quoting belongs in
/// a wrapper script.
fn split_command(key: &'static str, raw: &str) -> Result<Vec<String>, SettingsError> {
    let parts: Vec<String> = raw.split_whitespace().map(String::from).collect();
    if parts.is_empty() {
        return Err(SettingsError::EmptyCommand { key });
    }
    Ok(parts)
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings from a key lookup. Factored out of `from_env` so
    /// tests never mutate the process environment.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        let host = lookup(ENV_HOST).unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match lookup(ENV_PORT) {
            Some(raw) => raw.parse::<u16>().map_err(|e| SettingsError::Invalid {
                key: ENV_PORT,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let server_command = match lookup(ENV_SERVER_CMD) {
            Some(raw) => split_command(ENV_SERVER_CMD, &raw)?,
            None => default_server_command(&host, port),
        };

        let worker_command = match lookup(ENV_WORKER_CMD) {
            Some(raw) => split_command(ENV_WORKER_CMD, &raw)?,
            None => default_worker_command(),
        };

        let grace_period = match lookup(ENV_GRACE_SECONDS) {
            Some(raw) => {
                let seconds = raw.parse::<u64>().map_err(|e| SettingsError::Invalid {
                    key: ENV_GRACE_SECONDS,
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                Duration::from_secs(seconds)
            }
            None => DEFAULT_GRACE,
        };

        let server_policy = match lookup(ENV_SERVER_POLICY) {
            Some(raw) => {
                ServerPolicy::parse(&raw).ok_or_else(|| SettingsError::Invalid {
                    key: ENV_SERVER_POLICY,
                    value: raw.clone(),
                    reason: "expected \"best-effort\" or \"critical\"".to_string(),
                })?
            }
            None => ServerPolicy::default(),
        };

        Ok(Self {
            host,
            port,
            server_command,
            worker_command,
            grace_period,
            server_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_match_fixed_launch_values() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 10000);
        assert_eq!(
            settings.server_command,
            ["flask", "run", "-h", "0.0.0.0", "-p", "10000"]
        );
        assert_eq!(settings.worker_command, ["python", "main.py"]);
        assert_eq!(settings.grace_period, Duration::from_secs(10));
        assert_eq!(settings.server_policy, ServerPolicy::BestEffort);
    }

    #[test]
    fn host_and_port_thread_into_default_server_command() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("TANDEM_HOST", "127.0.0.1"),
            ("TANDEM_PORT", "8080"),
        ]))
        .unwrap();

        assert_eq!(
            settings.server_command,
            ["flask", "run", "-h", "127.0.0.1", "-p", "8080"]
        );
    }

    #[test]
    fn explicit_commands_override_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("TANDEM_SERVER_CMD", "gunicorn app:app"),
            ("TANDEM_WORKER_CMD", "python -u worker.py"),
        ]))
        .unwrap();

        assert_eq!(settings.server_command, ["gunicorn", "app:app"]);
        assert_eq!(settings.worker_command, ["python", "-u", "worker.py"]);
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = Settings::from_lookup(lookup_from(&[("TANDEM_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                key: "TANDEM_PORT",
                ..
            }
        ));
    }

    #[test]
    fn blank_command_is_an_error() {
        let err = Settings::from_lookup(lookup_from(&[("TANDEM_WORKER_CMD", "   ")]))
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::EmptyCommand {
                key: "TANDEM_WORKER_CMD"
            }
        ));
    }

    #[test]
    fn grace_seconds_parse() {
        let settings =
            Settings::from_lookup(lookup_from(&[("TANDEM_GRACE_SECONDS", "3")])).unwrap();
        assert_eq!(settings.grace_period, Duration::from_secs(3));

        let err = Settings::from_lookup(lookup_from(&[("TANDEM_GRACE_SECONDS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { .. }));
    }

    #[test]
    fn server_policy_parse() {
        let settings =
            Settings::from_lookup(lookup_from(&[("TANDEM_SERVER_POLICY", "critical")]))
                .unwrap();
        assert_eq!(settings.server_policy, ServerPolicy::Critical);

        let err = Settings::from_lookup(lookup_from(&[("TANDEM_SERVER_POLICY", "maybe")]))
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                key: "TANDEM_SERVER_POLICY",
                ..
            }
        ));
    }
}
