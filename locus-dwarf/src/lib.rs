//! Locus DWARF Location Expression Library
//!
//! Evaluates DWARF location expressions the way a debugger does: against
//! live frames, registers and memory supplied through the [`target`]
//! traits, producing typed [`Value`]s that may be lazy, pieced together
//! from several locations, or synthetic pointers into other variables.

// Core modules
pub mod core;
pub mod target;
pub mod value;

// Expression machine
pub mod expr;

// Main entry point
pub mod evaluator;

pub use evaluator::{EvaluatedAddress, LocationEvaluator};

// Re-export essential core types
pub use core::{
    CallSiteParameter, CallSiteParameterKind, CompUnit, EvalConfig, ExprError, FrameRef,
    LocExprBlock, ModuleId, ObjectAddressInfo, Result,
};

pub use expr::{
    Disassembler, Disassembly, ExprContext, Instruction, Location, Piece, PieceClosure,
    PieceLocation, SymbolNeeds,
};
pub use target::{DebugInfo, DieType, FrameAccess, MemoryAccess, RegisterStatus, Target};
pub use value::{Lval, Type, TypeCode, Value};

// Re-export platform and gimli types that callers need
pub use gimli::{constants, DebugInfoOffset, RunTimeEndian, UnitOffset};
pub use locus_platform::Arch;
