//! Plain Python execution with console mirroring.

use std::path::Path;

use crate::{Controller, ControllerKind, ExecutionContext, ExecutionError};

/// Marker the host prints before the value of the last expression.
pub const RESULT_MARKER: &str = "# Result: ";

const UNTITLED: &str = "Untitled";

/// Runs the code as-is and returns the host output.
pub struct PythonController {
    ctx: ExecutionContext,
    file: String,
    input: String,
    output: String,
}

impl PythonController {
    pub fn new(ctx: ExecutionContext, file: impl Into<String>) -> Self {
        Self {
            ctx,
            file: file.into(),
            input: String::new(),
            output: String::new(),
        }
    }

    /// Records `output` in the history and mirrors it to the console.
    fn publish(&self, output: &str) {
        let settings = self.ctx.settings();
        let entry = if settings.format_output {
            let time = chrono::Local::now().format("%H:%M:%S").to_string();
            format_entry(
                &time,
                &file_label(&self.file, settings.show_file_path),
                output,
                settings.show_unicode,
            )
        } else {
            output.to_string()
        };

        let history = self.ctx.history();
        if settings.clear_output {
            history.clear();
        }
        history.append(entry.clone());

        if !settings.mirror_to_console {
            return;
        }
        let Some(console) = self.ctx.console() else {
            return;
        };
        if settings.override_input {
            console.show_input(&self.input);
        }
        if settings.override_output {
            let view = if settings.clear_output {
                entry
            } else {
                history.render()
            };
            console.show_output(&view);
        }
    }
}

impl Controller for PythonController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Python
    }

    fn set_input(&mut self, text: &str) -> Result<(), ExecutionError> {
        self.input = text.to_string();
        Ok(())
    }

    fn execute(&mut self) -> Result<(), ExecutionError> {
        match self.ctx.executor().execute(&self.input) {
            Ok(raw) => {
                self.output = strip_result_marker(&raw).to_string();
                self.publish(&self.output);
                Ok(())
            }
            Err(e) => {
                self.publish(&e.render());
                Err(e)
            }
        }
    }

    fn output(&self) -> String {
        self.output.clone()
    }
}

/// Keeps only what follows the last [`RESULT_MARKER`].
pub fn strip_result_marker(output: &str) -> &str {
    match output.rfind(RESULT_MARKER) {
        Some(pos) => &output[pos + RESULT_MARKER.len()..],
        None => output,
    }
}

fn file_label(file: &str, full_path: bool) -> String {
    if file.is_empty() {
        return UNTITLED.to_string();
    }
    if full_path {
        return file.to_string();
    }
    Path::new(file)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string())
}

fn format_entry(time: &str, label: &str, output: &str, unicode: bool) -> String {
    let prefix = if unicode { "➥ " } else { "> " };
    format!("[{time}] [{label}]\n{prefix}{output}")
}
