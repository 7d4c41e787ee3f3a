// ABOUTME: Shell process runner used by `run: { shell: ... }` tasks
// ABOUTME: Executes a command or a multi-line script through tokio::process and captures its output

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use super::{ProcessResult, ProcessRunner};
use crate::engine::error::TaskError;

pub struct ShellProcessRunner;

/// Shell process configuration
///
/// Either a `command` with `args`, or a `script` run by `shell`:
///
/// ```yaml
/// run:
///   shell:
///     command: echo
///     args: ["{{input.name}}"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Multi-line script; mutually exclusive with `command`
    #[serde(default)]
    pub script: Option<String>,

    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default, alias = "environment")]
    pub env: HashMap<String, String>,

    #[serde(default, rename = "workingDir", alias = "working_dir")]
    pub working_dir: Option<String>,
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

impl ShellConfig {
    fn from_value(process: &Value) -> Result<Self, TaskError> {
        let config: ShellConfig = serde_json::from_value(process.clone())
            .map_err(|e| TaskError::validation(format!("Invalid shell configuration: {}", e)))?;

        match (&config.command, &config.script) {
            (None, None) => Err(TaskError::validation(
                "Either 'command' or 'script' must be provided",
            )),
            (Some(_), Some(_)) => Err(TaskError::validation(
                "Cannot specify both 'command' and 'script'",
            )),
            (Some(command), None) if command.is_empty() => {
                Err(TaskError::validation("Command cannot be empty"))
            }
            _ => Ok(config),
        }
    }
}

#[async_trait]
impl ProcessRunner for ShellProcessRunner {
    async fn run(&self, process: &Value, _input: &Value) -> Result<ProcessResult, TaskError> {
        let config = ShellConfig::from_value(process)?;

        let output = match (&config.script, &config.command) {
            (Some(script), _) => self.execute_script(&config, script).await?,
            (None, Some(command)) => self.execute_command(&config, command).await?,
            (None, None) => {
                return Err(TaskError::validation(
                    "Either 'command' or 'script' must be provided",
                ))
            }
        };

        let code = output.status.code().unwrap_or(-1);
        debug!("Process completed with exit code: {}", code);
        Ok(ProcessResult {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

impl ShellProcessRunner {
    async fn execute_script(
        &self,
        config: &ShellConfig,
        script: &str,
    ) -> Result<std::process::Output, TaskError> {
        let mut script_file = NamedTempFile::new()
            .map_err(|e| TaskError::runtime(format!("Failed to create script file: {}", e)))?;
        script_file
            .write_all(script.as_bytes())
            .map_err(|e| TaskError::runtime(format!("Failed to write script file: {}", e)))?;

        debug!("Running {} byte script with {}", script.len(), config.shell);
        let mut cmd = Command::new(&config.shell);
        cmd.arg(script_file.path());
        self.configure_command(&mut cmd, config);

        // the script file lives until the process exits
        let output = cmd.output().await;
        output.map_err(|e| TaskError::runtime(format!("Failed to run script: {}", e)))
    }

    async fn execute_command(
        &self,
        config: &ShellConfig,
        command: &str,
    ) -> Result<std::process::Output, TaskError> {
        debug!("Command: {} {:?}", command, config.args);
        let mut cmd = Command::new(command);
        cmd.args(&config.args);
        self.configure_command(&mut cmd, config);

        cmd.output()
            .await
            .map_err(|e| TaskError::runtime(format!("Failed to run '{}': {}", command, e)))
    }

    fn configure_command(&self, cmd: &mut Command, config: &ShellConfig) {
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(working_dir) = &config.working_dir {
            cmd.current_dir(working_dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
    }
}
