//! Interfaces the host debugger implements for the evaluator
//!
//! Evaluation never touches the inferior directly. Frames, registers,
//! memory and debug-info lookups all go through these traits so the same
//! machine can run against a live process, a core file or a test double.

use crate::core::{
    CallSiteParameter, CallSiteParameterKind, CompUnit, ExprError, FrameRef, LocExprBlock,
    ModuleId, Result,
};
use crate::value::{Type, Value};
use gimli::{DebugInfoOffset, UnitOffset};
use locus_platform::Arch;
use std::sync::Arc;

/// Outcome of reading register bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStatus {
    Valid,
    /// The unwinder knows the register was not saved
    OptimizedOut,
    /// The register exists but its contents were not collected
    Unavailable,
}

/// Frame and register access
pub trait FrameAccess {
    /// Whether `frame` still names a live frame
    fn frame_is_valid(&self, frame: FrameRef) -> bool;

    /// Raw size in bytes of DWARF register `regnum`
    fn register_size(&self, frame: FrameRef, regnum: u64) -> Result<usize>;

    /// Read `buf.len()` bytes of `regnum` starting `offset` bytes in
    fn read_register(
        &self,
        frame: FrameRef,
        regnum: u64,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<RegisterStatus>;

    fn write_register(
        &mut self,
        frame: FrameRef,
        regnum: u64,
        offset: usize,
        data: &[u8],
    ) -> Result<()>;

    /// Caller of `frame`, skipping inlined frames
    fn prev_frame(&self, frame: FrameRef) -> Option<FrameRef>;

    /// Canonical frame address
    fn call_frame_cfa(&self, frame: FrameRef) -> Result<u64>;

    /// PC used to pick location-list entries for `frame`
    fn frame_pc(&self, frame: FrameRef) -> Result<u64>;

    /// DW_AT_frame_base expression of the function running in `frame`
    fn frame_base_expression(&self, frame: FrameRef) -> Result<LocExprBlock>;

    /// Frame the user is currently looking at
    fn selected_frame(&self) -> Option<FrameRef>;
}

/// Inferior memory access
pub trait MemoryAccess {
    /// Fill `buf` from `address`
    ///
    /// Unreadable memory is reported as [`ExprError::Memory`]; memory that
    /// exists but was not collected as [`ExprError::NotAvailable`].
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()>;

    /// Address of a thread-local variable at `offset` in `module`'s TLS block
    fn translate_tls_address(&self, module: ModuleId, offset: u64) -> Result<u64> {
        Err(ExprError::NotAvailable(format!(
            "Cannot find thread-local storage for module {}, offset 0x{offset:x}",
            module.0
        )))
    }

    /// Architecture hook turning an integer into an address
    fn integer_to_address(&self, _value: u64, _addr_size: u8) -> Option<u64> {
        None
    }

    /// Architecture hook turning pointer bits into an address
    fn pointer_to_address(&self, pointer: u64, _code: bool) -> u64 {
        pointer
    }
}

/// Type and name of a DIE
#[derive(Debug, Clone)]
pub struct DieType {
    pub ty: Arc<Type>,
    pub name: Option<String>,
}

/// Debug information lookups
pub trait DebugInfo {
    /// Architecture of a loaded module
    fn module_arch(&self, module: ModuleId) -> Arch;

    /// Location expression of the DIE at `die` within `cu` (DW_OP_call*)
    ///
    /// `get_pc` is only consulted when the DIE has a location list.
    fn die_location(
        &self,
        cu: &CompUnit,
        die: UnitOffset<usize>,
        get_pc: &dyn Fn() -> Result<u64>,
    ) -> Result<LocExprBlock>;

    /// Location expression of a DIE named by section offset
    ///
    /// `Ok(None)` means the DIE has no location attribute.
    fn die_location_at(
        &self,
        cu: &CompUnit,
        die: DebugInfoOffset<usize>,
        get_pc: &dyn Fn() -> Result<u64>,
        resolve_abstract_origin: bool,
    ) -> Result<Option<LocExprBlock>>;

    /// DW_AT_const_value bytes of a DIE, if it has one
    fn die_constant_bytes(
        &self,
        cu: &CompUnit,
        die: DebugInfoOffset<usize>,
    ) -> Result<Option<Vec<u8>>>;

    fn die_type(&self, cu: &CompUnit, die: DebugInfoOffset<usize>) -> Result<Option<DieType>>;

    /// Base type DIE at a unit-relative offset
    fn base_type(&self, cu: &CompUnit, offset: UnitOffset<usize>) -> Result<Option<Arc<Type>>>;

    /// Entry `index` of .debug_addr for `cu`
    fn read_addr_index(&self, cu: &CompUnit, index: u64) -> Result<u64>;

    /// Load bias of a module's text section
    fn relocation_offset(&self, module: ModuleId) -> u64;

    /// Call-site parameter in `caller` matching `kind` for the call that
    /// created `frame`
    fn call_site_parameter(
        &self,
        frame: FrameRef,
        caller: FrameRef,
        kind: &CallSiteParameterKind,
    ) -> Result<CallSiteParameter>;

    /// Look a variable up by name in the current scope
    fn variable_value(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Everything evaluation needs from the host
pub trait Target: FrameAccess + MemoryAccess + DebugInfo {
    /// Polled once per opcode; returning true aborts evaluation
    fn interrupted(&self) -> bool {
        false
    }
}
