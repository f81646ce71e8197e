//! BlinkScript kernel upload.

use std::path::Path;

use crate::script::python_string_literal;
use crate::{Controller, ControllerKind, ExecutionContext, ExecutionError};

/// Response sent once the recompile was triggered.
pub const BLINK_OUTPUT: &str = "Recompiling";

const DEFAULT_NODE_NAME: &str = "BlinkScript";

/// Loads the kernel source into a BlinkScript node and recompiles it.
pub struct BlinkScriptController {
    ctx: ExecutionContext,
    file: String,
    command: String,
}

impl BlinkScriptController {
    pub fn new(ctx: ExecutionContext, file: impl Into<String>) -> Self {
        Self {
            ctx,
            file: file.into(),
            command: String::new(),
        }
    }

    /// Host command built by the last `set_input`.
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Controller for BlinkScriptController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::Blink
    }

    fn set_input(&mut self, text: &str) -> Result<(), ExecutionError> {
        self.command = blink_command(&node_name(&self.file), &self.file, text);
        Ok(())
    }

    fn execute(&mut self) -> Result<(), ExecutionError> {
        self.ctx.executor().execute(&self.command)?;
        tracing::debug!(file = %self.file, "blink kernel recompiling");
        Ok(())
    }

    fn output(&self) -> String {
        BLINK_OUTPUT.to_string()
    }
}

/// Basename of `file` without its extension.
fn node_name(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string())
}

fn blink_command(name: &str, file: &str, source: &str) -> String {
    let name = python_string_literal(name);
    let file = python_string_literal(file);
    let source = python_string_literal(source);
    format!(
        "import nuke\n\
         node = nuke.toNode({name})\n\
         if node is None:\n\
         \x20   node = nuke.createNode(\"BlinkScript\")\n\
         \x20   node.setName({name})\n\
         node.knob(\"kernelSourceFile\").setValue({file})\n\
         node.knob(\"kernelSource\").setText({source})\n\
         node.knob(\"recompile\").execute()\n"
    )
}
