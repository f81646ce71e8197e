use serde::{Deserialize, Serialize};

/// How the Python controller mirrors results to the host console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Master switch for console mirroring.
    #[serde(default = "default_true")]
    pub mirror_to_console: bool,

    /// Show the received code in the console input pane.
    #[serde(default)]
    pub override_input: bool,

    /// Write results to the console output pane.
    #[serde(default = "default_true")]
    pub override_output: bool,

    /// Prefix each entry with a timestamp and file label.
    #[serde(default = "default_true")]
    pub format_output: bool,

    /// Show only the latest entry instead of the whole history.
    #[serde(default)]
    pub clear_output: bool,

    /// Label entries with the full `file` rather than its basename.
    #[serde(default)]
    pub show_file_path: bool,

    /// Use `➥ ` instead of `> ` before formatted output.
    #[serde(default = "default_true")]
    pub show_unicode: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            mirror_to_console: true,
            override_input: false,
            override_output: true,
            format_output: true,
            clear_output: false,
            show_file_path: false,
            show_unicode: true,
        }
    }
}
