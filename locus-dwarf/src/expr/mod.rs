//! DWARF expression machine: decoding, the operand stack, the opcode
//! interpreter and composite (pieced) locations

pub mod blocks;
pub mod context;
pub mod decoder;
pub mod disassemble;
pub mod location;
pub mod needs;
pub mod pieces;
pub mod stack;

pub use blocks::{
    block_to_dwarf_reg, block_to_dwarf_reg_deref, block_to_fb_offset, block_to_sp_offset,
};
pub use context::{ExprContext, DW_OP_GNU_uninit, DW_OP_GNU_variable_value};
pub use decoder::ExprCursor;
pub use disassemble::{op_name, Disassembler, Disassembly, Instruction};
pub use location::{Location, Piece, PieceLocation};
pub use needs::{symbol_needs, SymbolNeeds};
pub use pieces::PieceClosure;
pub use stack::{EvalStack, StackEntry};
