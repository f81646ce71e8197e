use std::io;

/// First line of every rendered failure.
pub const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// Failure while running a request on the host.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The host raised an error while running the code.
    #[error("{message}")]
    Raised {
        message: String,
        traceback: Option<String>,
    },

    /// The transfer file could not be written.
    #[error("transfer file error: {0}")]
    Transfer(#[from] io::Error),

    /// The execution task panicked or was cancelled.
    #[error("execution aborted: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised {
            message: message.into(),
            traceback: None,
        }
    }

    /// Renders the error as the text returned to the client.
    pub fn render(&self) -> String {
        match self {
            Self::Raised {
                traceback: Some(traceback),
                ..
            } if traceback.trim_start().starts_with(TRACEBACK_HEADER) => {
                traceback.trim_end().to_string()
            }
            Self::Raised {
                message,
                traceback: Some(traceback),
            } => {
                let traceback = traceback.trim_end();
                if traceback.is_empty() {
                    format!("{TRACEBACK_HEADER}\n{message}")
                } else if traceback.ends_with(message.as_str()) {
                    format!("{TRACEBACK_HEADER}\n{traceback}")
                } else {
                    format!("{TRACEBACK_HEADER}\n{traceback}\n{message}")
                }
            }
            Self::Raised {
                message,
                traceback: None,
            } => format!("{TRACEBACK_HEADER}\n{message}"),
            Self::Transfer(e) => format!("{TRACEBACK_HEADER}\nOSError: {e}"),
            Self::Panicked(reason) => format!("{TRACEBACK_HEADER}\nRuntimeError: {reason}"),
        }
    }
}
