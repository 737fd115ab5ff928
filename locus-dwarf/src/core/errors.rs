//! Error types for the location expression evaluator

use crate::core::FrameRef;
use gimli::DwOp;

/// Error types for the library
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("DWARF expression error: ran off end of buffer reading {what}")]
    TruncatedExpression { what: &'static str },
    #[error("DWARF expression error: {0}")]
    MalformedOperand(String),
    #[error(
        "DWARF-2 expression error: `{op}' operations must be used either alone \
         or in conjunction with DW_OP_piece or DW_OP_bit_piece."
    )]
    MalformedRegisterOp { op: DwOp },
    #[error("dwarf expression stack underflow: need {needed} elements, have {depth}")]
    StackUnderflow { needed: usize, depth: usize },
    #[error("Asked for position {index} of stack, stack only has {depth} elements on it.")]
    StackIndexOutOfRange { index: usize, depth: usize },
    #[error("Incompatible types on DWARF stack")]
    IncompatibleStackTypes,
    #[error("Unhandled dwarf expression opcode 0x{opcode:x}")]
    UnsupportedOpcode { opcode: u8 },
    #[error("{op} evaluation requires a frame.")]
    MissingFrame { op: &'static str },
    #[error("{op} evaluation requires a compilation unit.")]
    MissingCompilationUnit { op: &'static str },
    #[error("Cannot access memory at address 0x{address:x}")]
    Memory { address: u64, length: usize },
    #[error("{0}")]
    OptimizedOut(String),
    #[error("{0}")]
    NotAvailable(String),
    #[error("{0}")]
    NoEntryValue(String),
    #[error("DWARF-2 expression error: Loop detected ({depth}).")]
    LocationLoopDetected { depth: u32 },
    #[error("{0}")]
    InvalidSyntheticPointerUse(String),
    #[error("Frame {0:?} no longer exists")]
    FrameNotFound(FrameRef),
    #[error("Unable to access DWARF register number {0}")]
    BadRegister(u64),
    #[error("Unsupported address size in DWARF expressions: {bits} bits")]
    UnsupportedAddressSize { bits: u32 },
    #[error("Location address is not set.")]
    MissingObjectAddress,
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Left operand of assignment is not an lvalue.")]
    NotLvalue,
    #[error("{0}")]
    TypeError(String),
    #[error("Quit")]
    Interrupted,
}

impl ExprError {
    /// Structural problems with the byte-code itself
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ExprError::TruncatedExpression { .. }
                | ExprError::MalformedOperand(_)
                | ExprError::MalformedRegisterOp { .. }
        )
    }

    /// Data that does not exist or cannot currently be read
    pub fn is_availability(&self) -> bool {
        matches!(self, ExprError::OptimizedOut(_) | ExprError::NotAvailable(_))
    }
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, ExprError>;
