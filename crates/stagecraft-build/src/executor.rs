use std::collections::BTreeMap;
use std::path::PathBuf;

use stagecraft_core::{CommandLine, Identity};

/// Host variables passed through to stage commands. Everything else a command
/// sees comes from [`Invocation::env`], including a per-stage `HOME` and `TMPDIR`.
const HOST_PASSTHROUGH_ENV: &[&str] = &["PATH", "LANG"];

/// One command execution inside a stage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: String,
    pub command: CommandLine,
    /// Absolute host path of the stage's workdir.
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Effective identity, `None` while the stage is still privileged.
    pub identity: Option<Identity>,
}

/// Abstraction over external command execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait CommandExecutor: Send + Sync {
    /// Run a stage command, streaming its output to the terminal.
    async fn run(&self, invocation: &Invocation) -> Result<(), ExecError>;

    /// Run `program --version` and capture the first line.
    async fn probe(&self, program: &str) -> Result<String, ExecError>;
}

/// Executes commands on the host with `tokio::process`.
pub struct RealExecutor;

impl CommandExecutor for RealExecutor {
    async fn run(&self, invocation: &Invocation) -> Result<(), ExecError> {
        use std::process::Stdio;

        let mut command = tokio::process::Command::new(&invocation.command.program);
        command
            .args(&invocation.command.args)
            .current_dir(&invocation.cwd)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        for key in HOST_PASSTHROUGH_ENV {
            if let Some(value) = std::env::var_os(key) {
                command.env(key, value);
            }
        }
        command.envs(&invocation.env);

        let status = command.status().await.map_err(|e| ExecError::NotFound {
            program: invocation.command.program.clone(),
            source: e,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(ExecError::Failed {
                command: invocation.command.to_string(),
                code: status.code(),
            })
        }
    }

    async fn probe(&self, program: &str) -> Result<String, ExecError> {
        use std::process::Stdio;

        let output = tokio::process::Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExecError::NotFound {
                program: program.to_owned(),
                source: e,
            })?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            // arch-lint: allow(no-silent-result-drop) reason="a tool that prints nothing for --version is still present"
            Ok(stdout.lines().next().unwrap_or_default().trim().to_owned())
        } else {
            Err(ExecError::Failed {
                command: format!("{program} --version"),
                code: output.status.code(),
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start `{program}` (is it installed and on PATH?)")]
    NotFound {
        program: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", describe_code(*code))]
    Failed { command: String, code: Option<i32> },
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_owned(),
    }
}
