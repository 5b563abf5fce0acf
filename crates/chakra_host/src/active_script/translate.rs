//! ActiveScript failures to host errors

use chakra_native::active_script::WrapperError;
use chakra_native::com::{ExcepInfo, HResult};
use chakra_native::jsrt::JsErrorKind;

use super::runtime::ActiveScriptRuntime;
use super::ActiveScriptError;
use crate::error::{
    message_with_location, EngineError, ErrorCategory, ScriptEngineError, ScriptError,
    ScriptErrorDetails, ScriptInterruptedError, UsageError,
};
use crate::settings::JsEngineMode;

/// `FACILITY_CONTROL`, where the script engines report their error numbers.
const FACILITY_CONTROL: u16 = 0x0A;

/// `0x800A_xxxx` for script engine error number `number`.
pub(crate) const fn control_error(number: u16) -> HResult {
    HResult((0x800A_0000_u32 | number as u32) as i32)
}

fn error_number(hresult: HResult) -> Option<u16> {
    (hresult.facility() == FACILITY_CONTROL).then(|| hresult.code())
}

/// Script error type of an engine error number.
pub(crate) fn error_type_of(hresult: HResult) -> &'static str {
    match error_number(hresult) {
        Some(5008 | 5009) => "ReferenceError",
        Some(438 | 5002 | 5007) => "TypeError",
        Some(5029..=5031) => "RangeError",
        Some(1000..=1099) => "SyntaxError",
        _ => "Error",
    }
}

pub(crate) fn category_of(hresult: HResult) -> ErrorCategory {
    match error_number(hresult) {
        Some(1000..=1099) => ErrorCategory::Compilation,
        _ => ErrorCategory::Runtime,
    }
}

/// Status reported back to the engine for a failed host member, chosen so
/// that [`error_type_of`] recovers `kind`.
pub(crate) fn script_error_code(kind: JsErrorKind) -> HResult {
    match kind {
        JsErrorKind::TypeError => control_error(438),
        JsErrorKind::ReferenceError => control_error(5009),
        JsErrorKind::RangeError => control_error(5029),
        JsErrorKind::SyntaxError => control_error(1002),
        JsErrorKind::Error | JsErrorKind::UriError => HResult::E_FAIL,
    }
}

fn native_category(hresult: HResult) -> ErrorCategory {
    match hresult {
        HResult::E_INVALIDARG | HResult::E_POINTER | HResult::E_UNEXPECTED | HResult::E_NOTIMPL => {
            ErrorCategory::Usage
        }
        _ => ErrorCategory::Engine,
    }
}

/// A failed native call that no script error explains. Usage statuses mean
/// the host drove the engine wrongly and surface as [`UsageError`].
pub(crate) fn native_error(mode: &str, error: &WrapperError) -> EngineError {
    let hresult = error.hresult();
    let mut message = error.to_string();
    match native_category(hresult) {
        ErrorCategory::Usage => {
            let code = hresult.to_string();
            if !message.contains(&code) {
                message = format!("{message} [{code}]");
            }
            UsageError::new(mode, message).into()
        }
        category => ScriptEngineError {
            engine_mode: mode.to_owned(),
            error_code: hresult.to_string(),
            category,
            message,
        }
        .into(),
    }
}

/// Everything an error report of the engine provides.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReportedError {
    pub(crate) hresult: HResult,
    pub(crate) description: String,
    pub(crate) document_name: String,
    /// 0-based, as reported.
    pub(crate) line: Option<u32>,
    /// 0-based, as reported.
    pub(crate) column: Option<u32>,
    pub(crate) source_line: String,
    pub(crate) call_stack: Vec<String>,
}

impl ReportedError {
    /// Status of an `EXCEPINFO`, preferring its `scode` over the error
    /// number in `wCode`.
    pub(crate) fn status_of(exception: &ExcepInfo, fallback: HResult) -> HResult {
        if exception.scode != 0 {
            HResult(exception.scode)
        } else if exception.w_code != 0 {
            control_error(exception.w_code)
        } else {
            fallback
        }
    }

    pub(crate) fn into_details(self, mode: JsEngineMode) -> ScriptErrorDetails {
        let error_type = error_type_of(self.hresult);
        let line = self.line.map_or(0, |line| line + 1);
        let column = self.column.map_or(0, |column| column + 1);
        let call_stack = self
            .call_stack
            .iter()
            .map(|frame| format!("at {frame}"))
            .collect::<Vec<_>>()
            .join("\n");

        let mut message = message_with_location(error_type, &self.description, line, column);
        if !call_stack.is_empty() {
            message.push('\n');
            message.push_str(&call_stack);
        }

        ScriptErrorDetails {
            engine_mode: mode.name().to_owned(),
            error_code: self.hresult.to_string(),
            category: Some(category_of(self.hresult)),
            message,
            error_type: error_type.to_owned(),
            description: self.description,
            document_name: self.document_name,
            line,
            column,
            source_fragment: self.source_line.trim().to_owned(),
            call_stack,
        }
    }
}

impl ActiveScriptRuntime {
    /// Translates a failure. Script errors raised by nested calls are kept
    /// so that the outermost call can report where the failure started.
    pub(crate) fn translate(&self, error: ActiveScriptError, outermost: bool) -> EngineError {
        let translated = self.translate_error(error);
        if let EngineError::Script(script) = &translated {
            if outermost {
                if let Some(nested) = self.nested_error.take() {
                    let description = &script.details.description;
                    if !nested.description.is_empty() && description.contains(&nested.description) {
                        return ScriptError::new(nested).into();
                    }
                }
            } else if self.nested_error.borrow().is_none() {
                *self.nested_error.borrow_mut() = Some(script.details.clone());
            }
        }
        translated
    }

    fn translate_error(&self, error: ActiveScriptError) -> EngineError {
        let mode = self.mode.name();
        let error = match error {
            ActiveScriptError::Usage(message) => return UsageError::new(mode, message).into(),
            ActiveScriptError::Member(err) => return UsageError::new(mode, err.to_string()).into(),
            ActiveScriptError::Runtime(message) => {
                return ScriptError::new(ScriptErrorDetails {
                    engine_mode: mode.to_owned(),
                    category: Some(ErrorCategory::Runtime),
                    message: message.clone(),
                    description: message,
                    ..ScriptErrorDetails::default()
                })
                .into()
            }
            ActiveScriptError::Wrapper(WrapperError::Disposed) => {
                return UsageError::disposed(mode).into()
            }
            ActiveScriptError::Wrapper(err) => err,
        };

        let reported = self.site.take_error();
        let aborted = error.hresult() == HResult::E_ABORT
            || reported.as_ref().is_some_and(|reported| reported.hresult == HResult::E_ABORT);
        if aborted || self.take_interrupt_request() {
            return ScriptInterruptedError {
                engine_mode: mode.to_owned(),
            }
            .into();
        }
        if let Some(reported) = reported {
            return ScriptError::new(reported.into_details(self.mode)).into();
        }

        match error {
            WrapperError::Exception {
                hresult, description, ..
            } => ScriptError::new(
                ReportedError {
                    hresult,
                    description,
                    ..ReportedError::default()
                }
                .into_details(self.mode),
            )
            .into(),
            other => native_error(mode, &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use chakra_native::com::ComError;

    use super::*;

    #[test]
    fn error_numbers_map_to_script_types() {
        assert_eq!(error_type_of(control_error(5009)), "ReferenceError");
        assert_eq!(error_type_of(control_error(5008)), "ReferenceError");
        assert_eq!(error_type_of(control_error(438)), "TypeError");
        assert_eq!(error_type_of(control_error(5007)), "TypeError");
        assert_eq!(error_type_of(control_error(1004)), "SyntaxError");
        assert_eq!(error_type_of(control_error(5022)), "Error");
        assert_eq!(error_type_of(HResult::E_FAIL), "Error");
        assert_eq!(control_error(5009), HResult(0x800A_1391_u32 as i32));
    }

    #[test]
    fn compile_errors_are_compilation() {
        assert_eq!(category_of(control_error(1002)), ErrorCategory::Compilation);
        assert_eq!(category_of(control_error(5009)), ErrorCategory::Runtime);
        assert_eq!(category_of(HResult::E_FAIL), ErrorCategory::Runtime);
    }

    #[test]
    fn member_failures_keep_their_kind() {
        for (kind, name) in [
            (JsErrorKind::TypeError, "TypeError"),
            (JsErrorKind::ReferenceError, "ReferenceError"),
            (JsErrorKind::RangeError, "RangeError"),
            (JsErrorKind::Error, "Error"),
        ] {
            assert_eq!(error_type_of(script_error_code(kind)), name);
        }
    }

    #[test]
    fn reported_errors_become_details() {
        let details = ReportedError {
            hresult: control_error(5009),
            description: "'argumens' is undefined".into(),
            document_name: "math.js".into(),
            line: Some(9),
            column: Some(3),
            ..ReportedError::default()
        }
        .into_details(JsEngineMode::ChakraActiveScript);

        assert_eq!(details.error_type, "ReferenceError");
        assert_eq!(details.category, Some(ErrorCategory::Runtime));
        assert_eq!((details.line, details.column), (10, 4));
        assert_eq!(details.message, "ReferenceError: 'argumens' is undefined (line 10, column 4)");
        assert_eq!(details.error_code, "0x800A1391");
        assert!(details.source_fragment.is_empty());
        assert!(details.call_stack.is_empty());
    }

    #[test]
    fn call_stacks_follow_the_message() {
        let details = ReportedError {
            hresult: HResult::E_FAIL,
            description: "boom".into(),
            source_line: "  throw new Error('boom');  ".into(),
            call_stack: vec!["inner".into(), "Global code".into()],
            ..ReportedError::default()
        }
        .into_details(JsEngineMode::Classic);

        assert_eq!(details.call_stack, "at inner\nat Global code");
        assert_eq!(details.message, "Error: boom\nat inner\nat Global code");
        assert_eq!(details.source_fragment, "throw new Error('boom');");
        assert_eq!((details.line, details.column), (0, 0));
    }

    #[test]
    fn usage_statuses_are_usage_errors() {
        let usage = [
            HResult::E_INVALIDARG,
            HResult::E_POINTER,
            HResult::E_UNEXPECTED,
            HResult::E_NOTIMPL,
        ];
        for hresult in usage {
            let error = WrapperError::Com(ComError::Call(hresult));
            match native_error("Classic", &error) {
                EngineError::Usage(err) => {
                    assert!(err.message.contains(&hresult.to_string()), "{}", err.message)
                }
                other => panic!("expected a usage error for {hresult}, got {other:?}"),
            }
        }

        let err = native_error("Classic", &WrapperError::Com(ComError::NullPointer));
        assert_eq!(err.to_string(), "null interface pointer [0x80004003]");

        match native_error("Classic", &WrapperError::Com(ComError::Call(HResult::E_FAIL))) {
            EngineError::Engine(err) => {
                assert_eq!(err.category, ErrorCategory::Engine);
                assert_eq!(err.error_code, HResult::E_FAIL.to_string());
            }
            other => panic!("expected an engine error, got {other:?}"),
        }
    }

    #[test]
    fn exception_status_prefers_scode() {
        let mut exception = ExcepInfo::default();
        assert_eq!(ReportedError::status_of(&exception, HResult::E_FAIL), HResult::E_FAIL);
        exception.w_code = 5009;
        assert_eq!(ReportedError::status_of(&exception, HResult::E_FAIL), control_error(5009));
        exception.scode = HResult::E_ABORT.0;
        assert_eq!(ReportedError::status_of(&exception, HResult::E_FAIL), HResult::E_ABORT);
    }
}
