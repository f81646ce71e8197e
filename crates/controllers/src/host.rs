//! Capabilities the controllers borrow from the host application.

use crate::ExecutionError;

/// Runs code inside the host runtime.
///
/// Called from a blocking thread; implementations may block for as long as
/// the code runs.
pub trait HostExecutor: Send + Sync + 'static {
    /// Executes `code` and returns whatever it printed.
    fn execute(&self, code: &str) -> Result<String, ExecutionError>;
}

/// The host's script console.
pub trait ConsoleSink: Send + Sync + 'static {
    /// Replaces the console's input pane.
    fn show_input(&self, text: &str);

    /// Replaces the console's output pane.
    fn show_output(&self, text: &str);
}

impl<F> HostExecutor for F
where
    F: Fn(&str) -> Result<String, ExecutionError> + Send + Sync + 'static,
{
    fn execute(&self, code: &str) -> Result<String, ExecutionError> {
        self(code)
    }
}
