//! Chakra native surfaces
//!
//! Raw access to the two native hosting APIs of the Chakra engine:
//!
//! - **JsRT** ([`jsrt`]): the flat C API, reached through the [`jsrt::JsRtApi`]
//!   function table that [`jsrt::ChakraLibrary`] resolves from the dynamically
//!   loaded engine library.
//! - **ActiveScript** ([`active_script`]): the COM hosting interfaces, reached
//!   through vtable slots. The 32-bit and 64-bit ABIs use separate slot tables
//!   behind one [`active_script::ActiveScriptWrapper`] contract.
//!
//! Nothing in this crate converts values or translates errors into host
//! exceptions; that happens in `chakra_host`.

pub mod active_script;
pub mod com;
pub mod jsrt;

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Pointer width of the running process, used to pick a slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86,
    X64,
}

impl Architecture {
    pub const fn current() -> Self {
        if cfg!(target_pointer_width = "64") {
            Architecture::X64
        } else {
            Architecture::X86
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn architecture_matches_pointer_width() {
        let expected = if std::mem::size_of::<usize>() == 8 {
            Architecture::X64
        } else {
            Architecture::X86
        };
        assert_eq!(Architecture::current(), expected);
    }
}
