//! Handles passed between the evaluator and its host debugger

use gimli::{DebugInfoOffset, UnitOffset};
use std::fmt;
use std::sync::Arc;

/// Identity of a stack frame as seen by the host
///
/// The host bumps `generation` whenever the frame cache is rebuilt, so a
/// stale reference can be detected instead of silently pointing at a
/// different frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRef {
    pub id: u64,
    pub generation: u64,
}

impl FrameRef {
    pub fn new(id: u64, generation: u64) -> Self {
        Self { id, generation }
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}@{}", self.id, self.generation)
    }
}

/// Loaded object file an expression belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModuleId(pub usize);

/// Compilation unit an expression was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompUnit {
    /// Offset of the unit header in .debug_info
    pub offset: DebugInfoOffset<usize>,
    pub module: ModuleId,
    /// Size of a target address inside this unit
    pub addr_size: u8,
    /// Size of a DW_FORM_ref_addr / section offset operand
    pub ref_addr_size: u8,
}

impl CompUnit {
    pub fn new(offset: usize, module: ModuleId, addr_size: u8, ref_addr_size: u8) -> Self {
        Self {
            offset: DebugInfoOffset(offset),
            module,
            addr_size,
            ref_addr_size,
        }
    }
}

/// A location expression together with the unit that owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocExprBlock {
    pub data: Arc<[u8]>,
    pub cu: CompUnit,
}

impl LocExprBlock {
    pub fn new(data: impl Into<Arc<[u8]>>, cu: CompUnit) -> Self {
        Self {
            data: data.into(),
            cu,
        }
    }
}

/// Address of the object whose location is being computed
/// (DW_OP_push_object_address), with an optional snapshot of its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAddressInfo {
    pub addr: u64,
    pub valaddr: Option<Arc<[u8]>>,
}

impl ObjectAddressInfo {
    pub fn new(addr: u64) -> Self {
        Self {
            addr,
            valaddr: None,
        }
    }

    pub fn with_snapshot(addr: u64, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            addr,
            valaddr: Some(bytes.into()),
        }
    }
}

/// How a call-site parameter is identified in the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallSiteParameterKind {
    /// Parameter passed in this DWARF register
    DwarfReg(u64),
    /// Parameter passed on the stack at this offset from the caller's SP
    FbOffset(i64),
    /// Parameter identified by its DIE (DW_OP_GNU_parameter_ref)
    ParamOffset(UnitOffset<usize>),
}

impl fmt::Display for CallSiteParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallSiteParameterKind::DwarfReg(reg) => write!(f, "DW_OP_reg{reg}"),
            CallSiteParameterKind::FbOffset(off) => write!(f, "DW_OP_fbreg({off})"),
            CallSiteParameterKind::ParamOffset(off) => write!(f, "parameter DIE 0x{:x}", off.0),
        }
    }
}

/// Matched DW_TAG_call_site_parameter in the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteParameter {
    /// DW_AT_call_value expression
    pub value: Option<Arc<[u8]>>,
    /// DW_AT_call_data_value expression
    pub data_value: Option<Arc<[u8]>>,
    /// Unit of the caller that holds the call site
    pub cu: CompUnit,
}
