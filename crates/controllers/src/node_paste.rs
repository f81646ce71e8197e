//! Node graph paste through the transfer file.

use std::path::Path;

use crate::script::python_string_literal;
use crate::transfer::TransferHold;
use crate::{Controller, ControllerKind, ExecutionContext, ExecutionError};

/// Response sent once the nodes were pasted.
pub const NODE_PASTE_OUTPUT: &str = "Nodes received.";

/// Writes the payload to the transfer file and pastes it into the graph.
///
/// The transfer file stays held from the first `set_input` until `execute`
/// returns, so concurrent requests each paste their own nodes.
pub struct NodePasteController {
    ctx: ExecutionContext,
    hold: Option<TransferHold>,
}

impl NodePasteController {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx, hold: None }
    }
}

fn paste_command(path: &Path) -> String {
    format!(
        "import nuke\nnuke.nodePaste({})\n",
        python_string_literal(&path.to_string_lossy())
    )
}

impl Controller for NodePasteController {
    fn kind(&self) -> ControllerKind {
        ControllerKind::NodePaste
    }

    fn set_input(&mut self, text: &str) -> Result<(), ExecutionError> {
        let hold = self.hold.get_or_insert_with(|| self.ctx.transfer().hold());
        hold.write(text)?;
        Ok(())
    }

    fn execute(&mut self) -> Result<(), ExecutionError> {
        let command = paste_command(self.ctx.transfer().path());
        let result = self.ctx.executor().execute(&command);
        self.hold = None;
        result?;
        Ok(())
    }

    fn output(&self) -> String {
        NODE_PASTE_OUTPUT.to_string()
    }
}
