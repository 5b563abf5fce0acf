//! Engine settings

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which native surface an engine is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JsEngineMode {
    /// JsRT when the library loads, otherwise ActiveScript Chakra, otherwise
    /// classic JScript.
    #[default]
    Auto,
    /// ChakraCore through the JsRT C API.
    ChakraJsRt,
    /// Chakra through the ActiveScript COM interfaces.
    ChakraActiveScript,
    /// Classic JScript through the ActiveScript COM interfaces.
    Classic,
}

impl JsEngineMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "Auto",
            Self::ChakraJsRt => "Chakra JsRT",
            Self::ChakraActiveScript => "Chakra ActiveScript",
            Self::Classic => "Classic",
        }
    }

    pub fn is_active_script(self) -> bool {
        matches!(self, Self::ChakraActiveScript | Self::Classic)
    }
}

impl fmt::Display for JsEngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub engine_mode: JsEngineMode,
    /// Attach the script debugger (JsRT `JsStartDebugging`, ActiveScript
    /// debug interfaces).
    pub enable_debugging: bool,
    /// Explicit path of the ChakraCore library. The platform default name is
    /// resolved through the loader search path when absent.
    pub library_path: Option<PathBuf>,
    /// Stack size of the dispatcher thread, in bytes.
    pub max_stack_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            engine_mode: JsEngineMode::Auto,
            enable_debugging: false,
            library_path: None,
            max_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl EngineSettings {
    pub fn with_mode(engine_mode: JsEngineMode) -> Self {
        Self {
            engine_mode,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
