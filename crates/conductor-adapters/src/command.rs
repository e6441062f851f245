use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use conductor_core::config::InvokerConfig;
use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::AiInvoker;
use conductor_core::types::{InvokeResult, WorkOrder};

const MAX_STDERR_CHARS: usize = 2000;

/// AI invoker that runs an external command per work order.
///
/// The prompt is written to stdin and stdout is the response. Model
/// parameters are passed as `CONDUCTOR_MODEL`, `CONDUCTOR_TEMPERATURE` and
/// `CONDUCTOR_MAX_TOKENS`.
pub struct CommandInvoker {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandInvoker {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: Duration::from_secs(600),
        }
    }

    pub fn from_config(config: &InvokerConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, order: WorkOrder) -> std::io::Result<std::process::Output> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .env("CONDUCTOR_MODEL", &order.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(t) = order.temperature {
            cmd.env("CONDUCTOR_TEMPERATURE", t.to_string());
        }
        if let Some(n) = order.max_tokens {
            cmd.env("CONDUCTOR_MAX_TOKENS", n.to_string());
        }

        let mut child = cmd.spawn()?;
        // Feed stdin concurrently so a command that streams output while
        // still reading its prompt cannot fill the stdout pipe and stall.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = order.prompt;
            tokio::spawn(async move {
                // The command may exit without reading its input.
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "Invoker command closed stdin early");
                }
            })
        });
        let output = child.wait_with_output().await;
        if let Some(writer) = writer {
            writer.abort();
        }
        output
    }
}

impl AiInvoker for CommandInvoker {
    fn invoke(&self, order: WorkOrder) -> BoxFuture<'_, Result<InvokeResult>> {
        Box::pin(async move {
            debug!(command = %self.command, model = %order.model, "Running invoker command");

            match tokio::time::timeout(self.timeout, self.run(order)).await {
                Ok(Ok(output)) => {
                    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if output.status.success() {
                        if stdout.is_empty() {
                            return Ok(InvokeResult::failure("invoker command produced no output"));
                        }
                        return Ok(InvokeResult::success(stdout));
                    }
                    let code = output.status.code().unwrap_or(-1);
                    let stderr: String = String::from_utf8_lossy(&output.stderr)
                        .trim()
                        .chars()
                        .take(MAX_STDERR_CHARS)
                        .collect();
                    warn!(command = %self.command, code, "Invoker command failed");
                    Ok(InvokeResult::failure(format!("exit code {}: {}", code, stderr)))
                }
                Ok(Err(e)) => Err(ConductorError::Invoker(format!("{}: {}", self.command, e))),
                Err(_) => Err(ConductorError::InvokerTimeout {
                    command: self.command.clone(),
                    timeout_secs: self.timeout.as_secs(),
                }),
            }
        })
    }

    fn name(&self) -> &str {
        &self.command
    }
}
