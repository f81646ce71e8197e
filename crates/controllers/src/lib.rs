//! Execution strategies.
//!
//! Every request is handled by exactly one [`Controller`], picked from the
//! extension of its `file` hint by [`select`]. Controllers share an
//! [`ExecutionContext`] holding the injected host capabilities, the output
//! history and the transfer file.

mod blink;
mod error;
mod history;
mod host;
mod node_paste;
mod python;
mod script;
mod settings;
mod transfer;

use std::path::PathBuf;
use std::sync::Arc;

use codesocket_protocol::Request;

pub use blink::{BLINK_OUTPUT, BlinkScriptController};
pub use error::{ExecutionError, TRACEBACK_HEADER};
pub use history::OutputHistory;
pub use host::{ConsoleSink, HostExecutor};
pub use node_paste::{NODE_PASTE_OUTPUT, NodePasteController};
pub use python::{PythonController, RESULT_MARKER, strip_result_marker};
pub use script::python_string_literal;
pub use settings::ControllerSettings;
pub use transfer::{TransferFile, TransferHold, default_transfer_path};

/// Available execution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerKind {
    Python,
    Blink,
    NodePaste,
}

/// File extensions that select a non-default strategy.
pub const EXTENSION_TABLE: &[(&str, ControllerKind)] = &[
    ("cpp", ControllerKind::Blink),
    ("blink", ControllerKind::Blink),
    ("tmp", ControllerKind::NodePaste),
];

/// Text after the last `.` of `file`, or `""`.
pub fn extension(file: &str) -> &str {
    file.rfind('.').map_or("", |pos| &file[pos + 1..])
}

/// Picks the strategy for a request. Case-sensitive; Python by default.
pub fn select(request: &Request) -> ControllerKind {
    select_for_file(request.file())
}

pub fn select_for_file(file: &str) -> ControllerKind {
    let ext = extension(file);
    EXTENSION_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map_or(ControllerKind::Python, |(_, kind)| *kind)
}

/// One strategy invocation: `set_input`, then `execute`, then `output`.
pub trait Controller: Send {
    fn kind(&self) -> ControllerKind;

    fn set_input(&mut self, text: &str) -> Result<(), ExecutionError>;

    fn execute(&mut self) -> Result<(), ExecutionError>;

    /// Text returned to the client.
    fn output(&self) -> String;
}

/// Long-lived state shared by all controllers.
///
/// Cheap to clone; clones share the history and transfer file.
#[derive(Clone)]
pub struct ExecutionContext {
    executor: Arc<dyn HostExecutor>,
    console: Option<Arc<dyn ConsoleSink>>,
    settings: Arc<ControllerSettings>,
    history: Arc<OutputHistory>,
    transfer: Arc<TransferFile>,
}

impl ExecutionContext {
    pub fn new(executor: Arc<dyn HostExecutor>, transfer_path: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            console: None,
            settings: Arc::new(ControllerSettings::default()),
            history: Arc::new(OutputHistory::new()),
            transfer: Arc::new(TransferFile::new(transfer_path)),
        }
    }

    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn with_history(mut self, history: Arc<OutputHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn executor(&self) -> &dyn HostExecutor {
        self.executor.as_ref()
    }

    pub fn console(&self) -> Option<&dyn ConsoleSink> {
        self.console.as_deref()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn history(&self) -> &Arc<OutputHistory> {
        &self.history
    }

    pub fn transfer(&self) -> &Arc<TransferFile> {
        &self.transfer
    }

    /// Builds the controller for `kind`.
    pub fn build(&self, kind: ControllerKind, file: &str) -> Box<dyn Controller> {
        match kind {
            ControllerKind::Python => Box::new(PythonController::new(self.clone(), file)),
            ControllerKind::Blink => Box::new(BlinkScriptController::new(self.clone(), file)),
            ControllerKind::NodePaste => Box::new(NodePasteController::new(self.clone())),
        }
    }

    pub fn controller_for(&self, request: &Request) -> Box<dyn Controller> {
        self.build(select(request), request.file())
    }

    /// Runs `request` to completion on the calling thread.
    pub fn process(&self, request: &Request) -> Result<String, ExecutionError> {
        let mut controller = self.controller_for(request);
        tracing::debug!(kind = ?controller.kind(), file = %request.file(), "dispatching request");
        controller.set_input(request.text())?;
        controller.execute()?;
        Ok(controller.output())
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("settings", &self.settings)
            .field("transfer", &self.transfer.path())
            .field("console", &self.console.is_some())
            .finish()
    }
}
