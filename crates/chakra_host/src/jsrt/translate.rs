//! JsRT failures to host errors

use chakra_native::jsrt::{JsErrorCategory, JsErrorCode, JsValueType};
use once_cell::sync::Lazy;
use regex::Regex;

use super::runtime::JsRtRuntime;
use super::scope::in_scope;
use super::value::{get_and_clear_exception, has_exception, JsValue};
use super::{JsRtError, JsRtResult};
use crate::error::{
    message_with_location, EngineError, ErrorCategory, ScriptEngineError, ScriptError,
    ScriptErrorDetails, ScriptInterruptedError, UsageError,
};

static MESSAGE_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(line (\d+), column (\d+)\)").expect("valid location pattern"));

/// `at f (document.js:3:14)`
static STACK_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^()]*):(\d+):(\d+)\)").expect("valid stack pattern"));

/// Message the engine attaches to a status code.
pub(crate) fn engine_message(code: JsErrorCode) -> &'static str {
    match code {
        JsErrorCode::SCRIPT_EXCEPTION => "Script threw an exception.",
        JsErrorCode::SCRIPT_COMPILE => "Compile error.",
        JsErrorCode::SCRIPT_TERMINATED => "Script was terminated.",
        JsErrorCode::SCRIPT_EVAL_DISABLED => "Eval of strings is disabled in this runtime.",
        JsErrorCode::OUT_OF_MEMORY => "Out of memory.",
        JsErrorCode::BAD_FPU_STATE => "Bad floating point unit state.",
        JsErrorCode::FATAL => "Fatal error.",
        JsErrorCode::WRONG_RUNTIME => "Wrong runtime.",
        JsErrorCode::IN_DISABLED_STATE => "Runtime is in a disabled state.",
        JsErrorCode::IN_EXCEPTION_STATE => "Runtime is in an exception state.",
        JsErrorCode::NO_CURRENT_CONTEXT => "No current context.",
        JsErrorCode::INVALID_ARGUMENT => "Invalid argument.",
        JsErrorCode::NULL_ARGUMENT => "Null argument.",
        JsErrorCode::WRONG_THREAD => "Wrong thread.",
        JsErrorCode::RUNTIME_IN_USE => "Runtime is in use.",
        JsErrorCode::BAD_SERIALIZED_SCRIPT => "Bad serialized script.",
        JsErrorCode::ARGUMENT_NOT_OBJECT => "Argument is not an object.",
        JsErrorCode::NOT_IMPLEMENTED => "Not implemented.",
        _ => "Unknown error.",
    }
}

/// Line and column found in an error message or stack trace.
pub(crate) fn message_coordinates(message: &str) -> Option<(u32, u32)> {
    let captures = MESSAGE_LOCATION
        .captures(message)
        .map(|captures| (captures.get(1), captures.get(2)))
        .or_else(|| {
            STACK_LOCATION
                .captures(message)
                .map(|captures| (captures.get(2), captures.get(3)))
        })?;
    match captures {
        (Some(line), Some(column)) => {
            Some((line.as_str().parse().ok()?, column.as_str().parse().ok()?))
        }
        _ => None,
    }
}

/// Document name of the innermost frame of a stack trace.
pub(crate) fn stack_document_name(stack: &str) -> Option<String> {
    STACK_LOCATION
        .captures(stack)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_owned())
        .filter(|name| !name.is_empty())
}

/// The frame lines of a stack trace, without the leading message line.
pub(crate) fn stack_frames(stack: &str) -> String {
    stack
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("at "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn category_of(code: JsErrorCode) -> ErrorCategory {
    match code.category() {
        JsErrorCategory::Usage => ErrorCategory::Usage,
        JsErrorCategory::Engine => ErrorCategory::Engine,
        JsErrorCategory::Fatal => ErrorCategory::Fatal,
        JsErrorCategory::Script if code == JsErrorCode::SCRIPT_COMPILE => {
            ErrorCategory::Compilation
        }
        JsErrorCategory::Script => ErrorCategory::Runtime,
        JsErrorCategory::None | JsErrorCategory::Unknown => ErrorCategory::Unknown,
    }
}

/// A failure status outside the script category. Usage statuses mean the
/// host drove the API wrongly and surface as [`UsageError`].
pub(crate) fn native_error(mode: &str, code: JsErrorCode) -> EngineError {
    match category_of(code) {
        ErrorCategory::Usage => {
            UsageError::new(mode, format!("{} [{code}]", engine_message(code))).into()
        }
        category => ScriptEngineError {
            engine_mode: mode.to_owned(),
            error_code: code.0.to_string(),
            category,
            message: engine_message(code).to_owned(),
        }
        .into(),
    }
}

impl JsRtRuntime {
    pub(crate) fn translate(&self, error: JsRtError) -> EngineError {
        let mode = self.mode.name();
        match error {
            JsRtError::Usage(message) => UsageError::new(mode, message).into(),
            JsRtError::Member(err) => UsageError::new(mode, err.to_string()).into(),
            JsRtError::Runtime(message) => ScriptError::new(ScriptErrorDetails {
                engine_mode: mode.to_owned(),
                category: Some(ErrorCategory::Runtime),
                message: message.clone(),
                description: message,
                ..ScriptErrorDetails::default()
            })
            .into(),
            JsRtError::Native(err) => self.translate_code(err.code),
        }
    }

    fn translate_code(&self, code: JsErrorCode) -> EngineError {
        let mode = self.mode.name();
        if code == JsErrorCode::SCRIPT_TERMINATED {
            return ScriptInterruptedError {
                engine_mode: mode.to_owned(),
            }
            .into();
        }

        if code.category() != JsErrorCategory::Script {
            return native_error(mode, code);
        }
        let category = category_of(code);

        let mut details = ScriptErrorDetails {
            engine_mode: mode.to_owned(),
            error_code: code.0.to_string(),
            category: Some(category),
            message: engine_message(code).to_owned(),
            ..ScriptErrorDetails::default()
        };
        if in_scope() && has_exception().unwrap_or(false) {
            match get_and_clear_exception() {
                Ok(error) => {
                    if let Err(err) = describe_error(error, engine_message(code), &mut details) {
                        tracing::debug!("script error could not be fully read: {err}");
                    }
                }
                Err(err) => tracing::warn!("pending script error could not be taken: {err}"),
            }
        }
        ScriptError::new(details).into()
    }
}

fn is_object(value: JsValue) -> JsRtResult<bool> {
    Ok(!matches!(
        value.value_type()?,
        JsValueType::Undefined
            | JsValueType::Null
            | JsValueType::Boolean
            | JsValueType::Number
            | JsValueType::String
    ))
}

fn string_property(object: JsValue, name: &str) -> JsRtResult<Option<String>> {
    if !object.has(name)? {
        return Ok(None);
    }
    let value = object.get(name)?;
    if value.value_type()? == JsValueType::Undefined {
        return Ok(None);
    }
    Ok(Some(value.convert_to_string()?.to_string()?))
}

/// 0-based coordinate properties, returned 1-based.
fn coordinate_property(object: JsValue, name: &str) -> JsRtResult<u32> {
    if !object.has(name)? {
        return Ok(0);
    }
    let value = object.get(name)?.convert_to_number()?.to_f64()?;
    if value.is_finite() && value >= 0.0 && value < f64::from(u32::MAX) {
        Ok(value as u32 + 1)
    } else {
        Ok(0)
    }
}

fn describe_error(
    error: JsValue,
    engine_message: &str,
    details: &mut ScriptErrorDetails,
) -> JsRtResult<()> {
    if !is_object(error)? {
        // `throw 42`
        let text = error.convert_to_string()?.to_string()?;
        details.message = message_with_location(engine_message, &text, 0, 0);
        details.description = text;
        return Ok(());
    }

    details.line = coordinate_property(error, "line")?;
    details.column = coordinate_property(error, "column")?;
    details.error_type = string_property(error, "name")?.unwrap_or_default();
    details.description = string_property(error, "message")?.unwrap_or_default();

    let stack = string_property(error, "stack")?;
    details.message = match &stack {
        Some(stack) => stack.clone(),
        None => message_with_location(
            engine_message,
            &details.description,
            details.line,
            details.column,
        ),
    };
    if details.line == 0 && details.column == 0 {
        if let Some((line, column)) = message_coordinates(&details.message) {
            details.line = line;
            details.column = column;
        }
    }
    if let Some(stack) = &stack {
        details.document_name = stack_document_name(stack).unwrap_or_default();
        details.call_stack = stack_frames(stack);
    }
    details.source_fragment = string_property(error, "source")?.unwrap_or_default();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_from_messages() {
        assert_eq!(
            message_coordinates("Compile error: Expected ';' (line 3, column 14)"),
            Some((3, 14))
        );
        assert_eq!(
            message_coordinates(
                "ReferenceError: 'x' is not defined\n   at Global code (app.js:2:5)"
            ),
            Some((2, 5))
        );
        assert_eq!(message_coordinates("no location here"), None);
    }

    #[test]
    fn stack_parts() {
        let stack = "TypeError: boom\n   at inner (lib.js:10:3)\n   at Global code (main.js:1:1)";
        assert_eq!(stack_document_name(stack).as_deref(), Some("lib.js"));
        assert_eq!(stack_frames(stack), "at inner (lib.js:10:3)\nat Global code (main.js:1:1)");
        assert_eq!(stack_document_name("Error: nothing"), None);
    }

    #[test]
    fn categories() {
        assert_eq!(category_of(JsErrorCode::SCRIPT_COMPILE), ErrorCategory::Compilation);
        assert_eq!(category_of(JsErrorCode::SCRIPT_EXCEPTION), ErrorCategory::Runtime);
        assert_eq!(category_of(JsErrorCode::INVALID_ARGUMENT), ErrorCategory::Usage);
        assert_eq!(category_of(JsErrorCode::OUT_OF_MEMORY), ErrorCategory::Engine);
        assert_eq!(category_of(JsErrorCode::FATAL), ErrorCategory::Fatal);
    }

    #[test]
    fn usage_statuses_are_usage_errors() {
        for code in [
            JsErrorCode::INVALID_ARGUMENT,
            JsErrorCode::NULL_ARGUMENT,
            JsErrorCode::WRONG_THREAD,
            JsErrorCode::NO_CURRENT_CONTEXT,
            JsErrorCode::IN_EXCEPTION_STATE,
        ] {
            match native_error("Chakra JsRT", code) {
                EngineError::Usage(err) => {
                    assert!(err.message.contains(&code.to_string()), "{}", err.message)
                }
                other => panic!("expected a usage error for {code}, got {other:?}"),
            }
        }
        let err = native_error("Chakra JsRT", JsErrorCode::INVALID_ARGUMENT);
        assert_eq!(err.to_string(), "Invalid argument. [InvalidArgument(0x10001)]");

        match native_error("Chakra JsRT", JsErrorCode::OUT_OF_MEMORY) {
            EngineError::Engine(err) => {
                assert_eq!(err.category, ErrorCategory::Engine);
                assert_eq!(err.message, "Out of memory.");
            }
            other => panic!("expected an engine error, got {other:?}"),
        }
    }
}
