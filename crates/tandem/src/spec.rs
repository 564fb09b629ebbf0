//! Process specifications for the launcher's children.

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Role of a child process within the launcher.
///
/// Exactly two children exist per container start; the role keys the
/// supervisor's child table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildRole {
    Server,
    Worker,
}

impl ChildRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildRole::Server => "server",
            ChildRole::Worker => "worker",
        }
    }
}

impl fmt::Display for ChildRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network binding declared by a process spec.
///
/// Exactly one spec (the server) declares one. The launcher never opens the
/// address itself; the binding belongs to the child that declares it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetBinding {
    pub host: String,
    pub port: u16,
}

impl NetBinding {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Specification of one launchable child: a command line, extra environment
/// merged over the inherited container environment, and an optional declared
/// network binding.
///
/// Specs are fixed at launch time; there is no runtime reconfiguration.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    role: ChildRole,
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    binding: Option<NetBinding>,
}

impl ProcessSpec {
    pub fn new(role: ChildRole, program: impl Into<String>) -> Self {
        Self {
            role,
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            binding: None,
        }
    }

    /// Build a spec from a pre-split command line. Returns `None` for an
    /// empty command.
    pub fn from_command_line(role: ChildRole, command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(role, program).with_args(args.iter().cloned()))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_binding(mut self, binding: NetBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn role(&self) -> ChildRole {
        self.role
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn binding(&self) -> Option<&NetBinding> {
        self.binding.as_ref()
    }

    /// One-line rendering of the command for logs.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build the command used to spawn this child.
    ///
    /// Stdio is inherited so child output lands on the container's streams.
    /// `kill_on_drop` carries container-teardown semantics: an abandoned
    /// child is killed abruptly, never signaled gracefully.
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_display_matches_as_str() {
        assert_eq!(ChildRole::Server.to_string(), "server");
        assert_eq!(ChildRole::Worker.to_string(), "worker");
    }

    #[test]
    fn role_serializes_lowercase() {
        insta::assert_json_snapshot!(ChildRole::Server, @r#""server""#);
        insta::assert_json_snapshot!(ChildRole::Worker, @r#""worker""#);
    }

    #[test]
    fn binding_addr_joins_host_and_port() {
        let binding = NetBinding::new("0.0.0.0", 10000);
        assert_eq!(binding.addr(), "0.0.0.0:10000");
    }

    #[test]
    fn from_command_line_splits_program_and_args() {
        let command: Vec<String> = ["flask", "run", "-p", "10000"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let spec = ProcessSpec::from_command_line(ChildRole::Server, &command).unwrap();
        assert_eq!(spec.program(), "flask");
        assert_eq!(spec.args(), ["run", "-p", "10000"]);
        assert_eq!(spec.role(), ChildRole::Server);
    }

    #[test]
    fn from_command_line_rejects_empty() {
        assert!(ProcessSpec::from_command_line(ChildRole::Worker, &[]).is_none());
    }

    #[test]
    fn display_command_joins_everything() {
        let spec = ProcessSpec::new(ChildRole::Worker, "python").with_args(["main.py"]);
        assert_eq!(spec.display_command(), "python main.py");
    }

    #[test]
    fn builder_collects_env_and_binding() {
        let spec = ProcessSpec::new(ChildRole::Server, "flask")
            .with_env("FLASK_DEBUG", "0")
            .with_binding(NetBinding::new("127.0.0.1", 8080));

        assert_eq!(spec.binding().unwrap().port, 8080);
        assert_eq!(spec.env.get("FLASK_DEBUG").map(String::as_str), Some("0"));
    }
}
