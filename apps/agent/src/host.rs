//! Host capabilities backed by a child interpreter process and the log.

use std::io::Write;
use std::process::{Command, Stdio};

use codesocket_controllers::{ConsoleSink, ExecutionError, HostExecutor};

use crate::config::HostConfig;

/// Runs each request in a fresh interpreter, feeding the code on stdin.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: String,
    args: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl From<&HostConfig> for ProcessExecutor {
    fn from(config: &HostConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }
}

impl HostExecutor for ProcessExecutor {
    fn execute(&self, code: &str) -> Result<String, ExecutionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutionError::raised(format!("failed to start {}: {e}", self.program)))?;

        // Feed stdin from its own thread so a chatty child cannot fill its
        // stdout pipe while we are still writing.
        let writer = child.stdin.take().map(|mut stdin| {
            let code = code.to_owned();
            std::thread::spawn(move || stdin.write_all(code.as_bytes()))
        });

        let output = child
            .wait_with_output()
            .map_err(|e| ExecutionError::raised(format!("{} failed: {e}", self.program)))?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(program = %self.program, "stdin write failed: {e}"),
                Err(_) => tracing::warn!(program = %self.program, "stdin writer panicked"),
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let message = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} exited with {}", self.program, output.status));
        Err(ExecutionError::Raised {
            message,
            traceback: Some(stderr),
        })
    }
}

/// Console mirror that writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogConsole;

impl ConsoleSink for LogConsole {
    fn show_input(&self, text: &str) {
        tracing::info!(target: "codesocket::console", "input:\n{text}");
    }

    fn show_output(&self, text: &str) {
        tracing::info!(target: "codesocket::console", "output:\n{text}");
    }
}
