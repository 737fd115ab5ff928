//! Location kinds and pieces recorded while evaluating an expression

use crate::value::Value;
use gimli::DebugInfoOffset;
use locus_platform::{dwarf_reg_to_name, Arch};
use std::fmt;
use std::sync::Arc;

/// Kind of location the expression currently describes
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// Top of stack is an address
    Memory,
    /// Object lives in this DWARF register (DW_OP_reg*)
    Register(u64),
    /// Top of stack is the object's value (DW_OP_stack_value)
    Stack,
    /// Object's bytes are embedded in the expression (DW_OP_implicit_value)
    Literal(Arc<[u8]>),
    /// Object is a pointer to the DIE's value (DW_OP_implicit_pointer)
    ImplicitPointer(DebugInfoOffset<usize>),
    OptimizedOut,
}

/// Where the bits of one piece come from
#[derive(Debug, Clone)]
pub enum PieceLocation {
    Register(u64),
    Memory { address: u64, in_stack_memory: bool },
    Stack(Arc<Value>),
    Literal(Arc<[u8]>),
    ImplicitPointer {
        die: DebugInfoOffset<usize>,
        offset: i64,
    },
    OptimizedOut,
}

/// A contiguous run of bits of a composite object
#[derive(Debug, Clone)]
pub struct Piece {
    /// Size in bits
    pub size: u64,
    /// Bit offset into the piece's source (DW_OP_bit_piece)
    pub offset: u64,
    pub location: PieceLocation,
}

fn reg_name(arch: Option<Arch>, reg: u64) -> String {
    arch.and_then(|a| u16::try_from(reg).ok().and_then(|r| dwarf_reg_to_name(a, r)))
        .map(str::to_string)
        .unwrap_or_else(|| format!("r{reg}"))
}

impl Location {
    /// Human-readable form using the architecture's register names
    pub fn describe(&self, arch: Option<Arch>) -> String {
        match self {
            Location::Memory => "memory".to_string(),
            Location::Register(reg) => format!("register {}", reg_name(arch, *reg)),
            Location::Stack => "stack value".to_string(),
            Location::Literal(bytes) => format!("implicit value[{} bytes]", bytes.len()),
            Location::ImplicitPointer(die) => format!("implicit pointer to DIE 0x{:x}", die.0),
            Location::OptimizedOut => "<optimized out>".to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe(None))
    }
}

impl Piece {
    pub fn describe(&self, arch: Option<Arch>) -> String {
        let source = match &self.location {
            PieceLocation::Register(reg) => reg_name(arch, *reg),
            PieceLocation::Memory {
                address,
                in_stack_memory,
            } => {
                if *in_stack_memory {
                    format!("@0x{address:x} (stack)")
                } else {
                    format!("@0x{address:x}")
                }
            }
            PieceLocation::Stack(value) => match value.as_long() {
                Ok(v) => format!("value 0x{v:x}"),
                Err(_) => "value <unavailable>".to_string(),
            },
            PieceLocation::Literal(bytes) => format!("implicit[{:02x?}]", bytes),
            PieceLocation::ImplicitPointer { die, offset } => {
                format!("&<DIE 0x{:x}>+{offset}", die.0)
            }
            PieceLocation::OptimizedOut => "<optimized out>".to_string(),
        };
        if self.offset != 0 {
            format!("{source}[bits {}+{}]", self.offset, self.size)
        } else {
            format!("{source}[{} bits]", self.size)
        }
    }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe(None))
    }
}
