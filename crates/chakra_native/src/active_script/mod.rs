//! ActiveScript hosting interfaces
//!
//! The engine is reached through raw vtable slots. The 32-bit and 64-bit
//! ABIs expose the same logical operations through different interfaces
//! (`IActiveScriptParse32` vs `IActiveScriptParse64`, …) whose source
//! context cookies differ in width. Each ABI is described by one immutable
//! [`MethodTable`]; [`Wrapper<A>`] is generic over the ABI so callers only
//! ever see the [`ActiveScriptWrapper`] contract.

mod debugging;
mod wrapper;

pub use debugging::{CodeContextEnumerator, StackFrameEnumerator};
pub use wrapper::{
    create_wrapper, wrap_for_current_architecture, ActiveScriptWrapper, InterruptHandle, Wrapper,
    WrapperError, WrapperResult,
};

use crate::com::Guid;
use crate::Architecture;

pub const CLSID_CHAKRA: Guid = Guid::from_u128(0x16d51579_a30b_4c8b_a276_0ff4dc41e755);
pub const CLSID_JSCRIPT: Guid = Guid::from_u128(0xf414c260_6ac0_11cf_b6d1_00aa00bbbb58);

pub const IID_IACTIVE_SCRIPT: Guid = Guid::from_u128(0xbb1a2ae1_a4f9_11cf_8f20_00805f2cd064);
pub const IID_IACTIVE_SCRIPT_PARSE_32: Guid =
    Guid::from_u128(0xbb1a2ae2_a4f9_11cf_8f20_00805f2cd064);
pub const IID_IACTIVE_SCRIPT_PARSE_64: Guid =
    Guid::from_u128(0xc7ef7658_e1ee_480e_97ea_d52cb4d76d17);
pub const IID_IACTIVE_SCRIPT_SITE: Guid = Guid::from_u128(0xdb01a1e3_a42b_11cf_8f20_00805f2cd064);
pub const IID_IACTIVE_SCRIPT_ERROR: Guid = Guid::from_u128(0xeae1ba61_a4ed_11cf_8f20_00805f2cd064);
pub const IID_IACTIVE_SCRIPT_DEBUG_32: Guid =
    Guid::from_u128(0x51973c10_cb0c_11d0_b5c9_00a0244a0e7a);
pub const IID_IACTIVE_SCRIPT_DEBUG_64: Guid =
    Guid::from_u128(0xbc437e23_f5b8_47f4_bb79_7d1ce5483b86);
pub const IID_IACTIVE_SCRIPT_GARBAGE_COLLECTOR: Guid =
    Guid::from_u128(0x6aa2c4a0_2b53_11d4_a2a0_00104bd35090);
pub const IID_IDEBUG_STACK_FRAME_SNIFFER_EX_32: Guid =
    Guid::from_u128(0x8cd12af4_49c1_4d52_8d8a_c146f47581aa);
pub const IID_IDEBUG_STACK_FRAME_SNIFFER_EX_64: Guid =
    Guid::from_u128(0x8cd12af4_49c1_4d52_8d8a_c146f47581ab);

/// Vtable slot indices and interface identifiers for one ABI.
#[derive(Debug)]
pub struct MethodTable {
    pub architecture: Architecture,
    pub parse_iid: Guid,
    pub debug_iid: Guid,
    pub sniffer_iid: Guid,

    // IActiveScript
    pub set_script_site: usize,
    pub set_script_state: usize,
    pub get_script_state: usize,
    pub close: usize,
    pub add_named_item: usize,
    pub add_type_lib: usize,
    pub get_script_dispatch: usize,
    pub interrupt_script_thread: usize,

    // IActiveScriptParse32/64
    pub init_new: usize,
    pub parse_script_text: usize,

    // IActiveScriptDebug32/64
    pub enum_code_contexts_of_position: usize,

    // IDebugStackFrameSnifferEx32/64
    pub enum_stack_frames: usize,

    // IActiveScriptGarbageCollector
    pub collect_garbage: usize,
}

pub static METHODS_32: MethodTable = MethodTable {
    architecture: Architecture::X86,
    parse_iid: IID_IACTIVE_SCRIPT_PARSE_32,
    debug_iid: IID_IACTIVE_SCRIPT_DEBUG_32,
    sniffer_iid: IID_IDEBUG_STACK_FRAME_SNIFFER_EX_32,
    set_script_site: 3,
    set_script_state: 5,
    get_script_state: 6,
    close: 7,
    add_named_item: 8,
    add_type_lib: 9,
    get_script_dispatch: 10,
    interrupt_script_thread: 14,
    init_new: 3,
    parse_script_text: 5,
    enum_code_contexts_of_position: 5,
    enum_stack_frames: 3,
    collect_garbage: 3,
};

pub static METHODS_64: MethodTable = MethodTable {
    architecture: Architecture::X64,
    parse_iid: IID_IACTIVE_SCRIPT_PARSE_64,
    debug_iid: IID_IACTIVE_SCRIPT_DEBUG_64,
    sniffer_iid: IID_IDEBUG_STACK_FRAME_SNIFFER_EX_64,
    set_script_site: 3,
    set_script_state: 5,
    get_script_state: 6,
    close: 7,
    add_named_item: 8,
    add_type_lib: 9,
    get_script_dispatch: 10,
    interrupt_script_thread: 14,
    init_new: 3,
    parse_script_text: 5,
    enum_code_contexts_of_position: 5,
    enum_stack_frames: 3,
    collect_garbage: 3,
};

/// One ActiveScript ABI.
pub trait Abi: 'static {
    /// Source context cookie (`DWORD` or `DWORDLONG`).
    type Cookie: Copy + From<u32> + std::fmt::Debug;

    const METHODS: &'static MethodTable;
}

/// 32-bit interfaces.
#[derive(Debug)]
pub enum Abi32 {}

/// 64-bit interfaces.
#[derive(Debug)]
pub enum Abi64 {}

impl Abi for Abi32 {
    type Cookie = u32;
    const METHODS: &'static MethodTable = &METHODS_32;
}

impl Abi for Abi64 {
    type Cookie = u64;
    const METHODS: &'static MethodTable = &METHODS_64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ScriptState {
    Uninitialized = 0,
    Started = 1,
    Connected = 2,
    Disconnected = 3,
    Closed = 4,
    Initialized = 5,
}

impl ScriptState {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Uninitialized,
            1 => Self::Started,
            2 => Self::Connected,
            3 => Self::Disconnected,
            4 => Self::Closed,
            5 => Self::Initialized,
            _ => return None,
        })
    }
}

/// Declares a `u32` flag set with named constants.
macro_rules! script_flags {
    ($(#[$meta:meta])* $name:ident { $($flag:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const NONE: Self = Self(0);
            $(pub const $flag: Self = Self($value);)*

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

script_flags! {
    /// `SCRIPTITEM_*`
    ScriptItemFlags {
        IS_VISIBLE = 0x0000_0002,
        IS_SOURCE = 0x0000_0004,
        GLOBAL_MEMBERS = 0x0000_0008,
        IS_PERSISTENT = 0x0000_0040,
        CODE_ONLY = 0x0000_0200,
        NO_CODE = 0x0000_0400,
    }
}

script_flags! {
    /// `SCRIPTTEXT_*`
    ScriptTextFlags {
        DELAY_EXECUTION = 0x0000_0001,
        IS_VISIBLE = 0x0000_0002,
        IS_EXPRESSION = 0x0000_0020,
        IS_PERSISTENT = 0x0000_0040,
        HOST_MANAGES_SOURCE = 0x0000_0080,
    }
}

script_flags! {
    /// `SCRIPTTYPELIB_*`
    ScriptTypeLibFlags {
        IS_CONTROL = 0x0000_0010,
        IS_PERSISTENT = 0x0000_0040,
    }
}

script_flags! {
    /// `SCRIPTINTERRUPT_*`
    ScriptInterruptFlags {
        DEBUG = 0x0000_0001,
        RAISE_EXCEPTION = 0x0000_0002,
    }
}

script_flags! {
    /// `SCRIPTINFO_*`, requested by `IActiveScriptSite::GetItemInfo`.
    ScriptInfoFlags {
        IUNKNOWN = 0x0000_0001,
        ITYPEINFO = 0x0000_0002,
    }
}

/// `SCRIPTTHREADID_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ScriptThreadId {
    Current = 0xFFFF_FFFF,
    Base = 0xFFFF_FFFE,
    All = 0xFFFF_FFFD,
}

/// `SCRIPTGCTYPE_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ScriptGcType {
    Normal = 0,
    Exhaustive = 1,
}
