//! Backend selection

use tracing::{debug, info};

use crate::active_script::ChakraActiveScriptEngine;
use crate::engine::ScriptEngine;
use crate::error::{EngineError, EngineLoadError, EngineResult};
use crate::jsrt::ChakraJsRtEngine;
use crate::settings::{EngineSettings, JsEngineMode};

/// Backends [`JsEngineMode::Auto`] tries, in order.
const AUTO_CANDIDATES: [JsEngineMode; 3] = [
    JsEngineMode::ChakraJsRt,
    JsEngineMode::ChakraActiveScript,
    JsEngineMode::Classic,
];

/// Starts an engine of `settings.engine_mode`.
///
/// [`JsEngineMode::Auto`] tries JsRT first, then ActiveScript Chakra, then
/// classic JScript. Only load failures move on to the next candidate; if every
/// backend fails to load, the returned error lists each reason.
pub fn create_engine(settings: &EngineSettings) -> EngineResult<Box<dyn ScriptEngine>> {
    match settings.engine_mode {
        JsEngineMode::ChakraJsRt => Ok(Box::new(ChakraJsRtEngine::new(settings)?)),
        JsEngineMode::ChakraActiveScript | JsEngineMode::Classic => {
            Ok(Box::new(ChakraActiveScriptEngine::new(settings)?))
        }
        JsEngineMode::Auto => {
            let mut reasons = Vec::new();
            for mode in AUTO_CANDIDATES {
                let candidate = EngineSettings {
                    engine_mode: mode,
                    ..settings.clone()
                };
                match create_engine(&candidate) {
                    Ok(engine) => {
                        info!("automatic engine selection picked {mode}");
                        return Ok(engine);
                    }
                    Err(EngineError::Load(err)) => {
                        debug!("{mode} engine unavailable: {}", err.message);
                        reasons.push(format!("{mode}: {}", err.message));
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(EngineLoadError {
                engine_mode: JsEngineMode::Auto.name().to_owned(),
                message: format!("no Chakra engine could be loaded ({})", reasons.join("; ")),
            }
            .into())
        }
    }
}

/// Whether an engine of `mode` can be created on this machine.
pub fn is_supported(mode: JsEngineMode) -> bool {
    match mode {
        JsEngineMode::ChakraJsRt => ChakraJsRtEngine::is_supported(),
        JsEngineMode::ChakraActiveScript | JsEngineMode::Classic => {
            ChakraActiveScriptEngine::is_supported(mode)
        }
        JsEngineMode::Auto => AUTO_CANDIDATES.into_iter().any(is_supported),
    }
}
