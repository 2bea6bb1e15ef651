//! Status derived from the output of an external tool

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::{Cadence, Check, CheckError, Evaluation};
use crate::config::{CommandCheckConfig, CommandCondition};
use crate::pattern::Pattern;

#[derive(Debug, Clone)]
enum Condition {
    ExitFailure,
    Contains(Pattern),
    Missing(Pattern),
}

/// Captured result of one run
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
}

pub struct CommandCheck {
    name: String,
    cadence: Cadence,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    condition: Condition,
}

impl CommandCheck {
    pub fn from_config(config: &CommandCheckConfig, cadence: Cadence) -> Result<Self, CheckError> {
        let condition = match &config.condition {
            CommandCondition::ExitFailure => Condition::ExitFailure,
            CommandCondition::OutputContains { pattern, is_regex } => {
                Condition::Contains(Pattern::new(pattern, *is_regex)?)
            }
            CommandCondition::OutputMissing { pattern, is_regex } => {
                Condition::Missing(Pattern::new(pattern, *is_regex)?)
            }
        };

        Ok(Self {
            name: config.name.clone(),
            cadence,
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            condition,
        })
    }

    /// Decide the status for a finished run
    pub fn judge(&self, output: &CommandOutput) -> Evaluation {
        let label = self.name.to_uppercase();
        let (status, detail) = match &self.condition {
            Condition::ExitFailure => {
                let code = output
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                (!output.success, format!("exit status {}", code))
            }
            Condition::Contains(m) => {
                let found = m.is_match(&output.stdout);
                let detail = if found {
                    format!("output contains '{}'", m.as_str())
                } else {
                    format!("output does not contain '{}'", m.as_str())
                };
                (found, detail)
            }
            Condition::Missing(m) => {
                let found = m.is_match(&output.stdout);
                let detail = if found {
                    format!("output contains '{}'", m.as_str())
                } else {
                    format!("output is missing '{}'", m.as_str())
                };
                (!found, detail)
            }
        };

        let message = if status {
            format!("{}: ALERT: {}", label, detail)
        } else {
            format!("{}: back to normal, {}", label, detail)
        };
        let status_message = format!("{}: {}", label, detail);
        Evaluation::new(status, message, status_message)
    }

    async fn run(&self) -> Result<CommandOutput, CheckError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| CheckError::Timeout {
                program: self.program.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|source| CheckError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

#[async_trait::async_trait]
impl Check for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    async fn evaluate(&self) -> Result<Evaluation, CheckError> {
        let output = self.run().await?;
        tracing::debug!(
            check = %self.name,
            code = ?output.code,
            bytes = output.stdout.len(),
            "Command finished"
        );
        Ok(self.judge(&output))
    }
}
