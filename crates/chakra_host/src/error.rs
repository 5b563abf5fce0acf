//! Host error taxonomy
//!
//! Every public engine operation either returns a value or fails with
//! exactly one [`EngineError`] variant. Native status codes never leave the
//! engine façades.

use std::fmt;

use thiserror::Error;

/// Coarse classification of a failure, as reported to host code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The script threw at run time.
    Runtime,
    /// The script failed to compile.
    Compilation,
    /// The wrapper misused the native API.
    Usage,
    /// The engine itself failed (out of memory, bad FPU state).
    Engine,
    /// The runtime is in an unrecoverable state.
    Fatal,
    /// The failure could not be classified.
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runtime => "Runtime error",
            Self::Compilation => "Compilation error",
            Self::Usage => "Usage error",
            Self::Engine => "Engine error",
            Self::Fatal => "Fatal error",
            Self::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The native engine could not be loaded or does not support a required
/// capability.
#[derive(Debug, Clone, Error)]
#[error("failed to create instance of the {engine_mode} engine: {message}")]
pub struct EngineLoadError {
    pub engine_mode: String,
    pub message: String,
}

/// Script execution stopped because `interrupt()` was honoured.
#[derive(Debug, Clone, Error)]
#[error("script execution was interrupted ({engine_mode})")]
pub struct ScriptInterruptedError {
    pub engine_mode: String,
}

/// A native call failed for a reason that is neither a script error nor an
/// interruption.
#[derive(Debug, Clone, Error)]
#[error("{category}: {message} (error code {error_code})")]
pub struct ScriptEngineError {
    pub engine_mode: String,
    pub error_code: String,
    pub category: ErrorCategory,
    pub message: String,
}

/// The engine was used in a way it does not allow (after disposal, or with a
/// value from another engine), or a native call reported a usage status.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UsageError {
    pub engine_mode: String,
    pub message: String,
}

impl UsageError {
    pub fn new(engine_mode: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            engine_mode: engine_mode.into(),
            message: message.into(),
        }
    }

    pub fn disposed(engine_mode: impl Into<String>) -> Self {
        let engine_mode = engine_mode.into();
        let message = format!("cannot access a disposed {engine_mode} engine");
        Self { engine_mode, message }
    }
}

/// Everything known about a script failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptErrorDetails {
    pub engine_mode: String,
    pub error_code: String,
    pub category: Option<ErrorCategory>,
    pub message: String,
    /// Script error type, e.g. `ReferenceError`.
    pub error_type: String,
    /// The error's own message, without location.
    pub description: String,
    pub document_name: String,
    /// 1-based, 0 when unknown.
    pub line: u32,
    /// 1-based, 0 when unknown.
    pub column: u32,
    pub source_fragment: String,
    pub call_stack: String,
}

/// The script threw.
#[derive(Debug, Clone, Error)]
#[error("{}", details.message)]
pub struct ScriptError {
    pub details: ScriptErrorDetails,
}

impl ScriptError {
    pub fn new(details: ScriptErrorDetails) -> Self {
        Self { details }
    }

    pub fn error_type(&self) -> &str {
        &self.details.error_type
    }

    pub fn description(&self) -> &str {
        &self.details.description
    }

    pub fn line(&self) -> u32 {
        self.details.line
    }

    pub fn column(&self) -> u32 {
        self.details.column
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.details.category
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] EngineLoadError),

    #[error(transparent)]
    Interrupted(#[from] ScriptInterruptedError),

    #[error(transparent)]
    Engine(#[from] ScriptEngineError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Script(Box<ScriptError>),
}

impl From<ScriptError> for EngineError {
    fn from(error: ScriptError) -> Self {
        Self::Script(Box::new(error))
    }
}

impl EngineError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    pub fn as_script_error(&self) -> Option<&ScriptError> {
        match self {
            Self::Script(error) => Some(error),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// `<engine message>: <script message> (line N, column M)`, leaving out
/// the parts that are unknown.
pub(crate) fn message_with_location(
    engine_message: &str,
    script_message: &str,
    line: u32,
    column: u32,
) -> String {
    let engine_message = engine_message.trim_end_matches('.');
    let mut message = if script_message.is_empty() {
        engine_message.to_owned()
    } else {
        format!("{engine_message}: {script_message}")
    };
    if line > 0 {
        message.push_str(&format!(" (line {line}, column {column})"));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_readable() {
        let err: EngineError = UsageError::disposed("Chakra JsRT").into();
        assert_eq!(err.to_string(), "cannot access a disposed Chakra JsRT engine");

        let err: EngineError = ScriptEngineError {
            engine_mode: "Chakra JsRT".into(),
            error_code: "131073".into(),
            category: ErrorCategory::Engine,
            message: "Out of memory.".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Engine error: Out of memory. (error code 131073)");
    }

    #[test]
    fn location_message() {
        assert_eq!(
            message_with_location("Script threw an exception.", "'x' is undefined", 4, 2),
            "Script threw an exception: 'x' is undefined (line 4, column 2)"
        );
        assert_eq!(message_with_location("Compile error.", "", 0, 0), "Compile error");
    }

    #[test]
    fn script_errors_expose_details() {
        let err: EngineError = ScriptError::new(ScriptErrorDetails {
            message: "ReferenceError: x is not defined".into(),
            error_type: "ReferenceError".into(),
            description: "x is not defined".into(),
            line: 2,
            column: 5,
            ..Default::default()
        })
        .into();

        let script = err.as_script_error().expect("script error");
        assert_eq!(script.error_type(), "ReferenceError");
        assert_eq!((script.line(), script.column()), (2, 5));
        assert_eq!(err.to_string(), "ReferenceError: x is not defined");
        assert!(!err.is_interrupted());
    }
}
