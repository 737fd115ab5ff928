//! Listing of location expression byte-code
//!
//! [`Disassembler`] decodes an expression into one [`Instruction`] per
//! operation for diagnostics and symbol dumps. Blocks nested in
//! `DW_OP_entry_value` are listed inline one level deeper.

use super::context::{DW_OP_GNU_uninit, DW_OP_GNU_variable_value};
use super::decoder::ExprCursor;
use crate::core::{CompUnit, ExprError, Result};
use gimli::constants::*;
use gimli::DwOp;
use locus_platform::{dwarf_reg_to_name, Arch};
use std::fmt;

/// Name of `op`, including the GNU extensions gimli leaves unnamed
pub fn op_name(op: DwOp) -> Option<&'static str> {
    match op {
        DW_OP_GNU_uninit => Some("DW_OP_GNU_uninit"),
        DW_OP_GNU_variable_value => Some("DW_OP_GNU_variable_value"),
        _ => op.static_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Byte offset from the start of the outermost expression
    pub offset: usize,
    pub op: DwOp,
    /// Rendered operands, empty when the operation takes none
    pub operands: String,
    /// Nesting level inside `DW_OP_entry_value` blocks
    pub depth: usize,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = op_name(self.op).unwrap_or("DW_OP_<unknown>");
        write!(
            f,
            "  {:>width$}: {}",
            self.offset,
            name,
            width = 4 + 2 * self.depth
        )?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disassembly {
    pub instructions: Vec<Instruction>,
    /// Offset of the first byte not listed
    pub end: usize,
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for insn in &self.instructions {
            writeln!(f, "{insn}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Disassembler {
    arch: Arch,
    addr_size: u8,
    ref_addr_size: u8,
}

impl Disassembler {
    pub fn new(arch: Arch, cu: &CompUnit) -> Self {
        Self {
            arch,
            addr_size: cu.addr_size,
            ref_addr_size: cu.ref_addr_size,
        }
    }

    /// List `data` from the start
    ///
    /// Unless `all` is set, listing stops in front of the first
    /// `DW_OP_piece` or `DW_OP_bit_piece` so that each piece of a
    /// composite location can be shown separately.
    pub fn disassemble(&self, data: &[u8], all: bool) -> Result<Disassembly> {
        let mut instructions = Vec::new();
        let end = self.listing(data, 0, data.len(), 0, all, &mut instructions)?;
        Ok(Disassembly { instructions, end })
    }

    fn regname(&self, reg: u64) -> String {
        u16::try_from(reg)
            .ok()
            .and_then(|r| dwarf_reg_to_name(self.arch, r))
            .map(str::to_string)
            .unwrap_or_else(|| format!("reg{reg}"))
    }

    fn listing(
        &self,
        data: &[u8],
        start: usize,
        end: usize,
        depth: usize,
        all: bool,
        out: &mut Vec<Instruction>,
    ) -> Result<usize> {
        let mut cursor = ExprCursor::new(&data[..end], self.arch.byte_order());
        cursor.jump(start as i64)?;

        while let Some(byte) = cursor.peek_u8() {
            if !all && (byte == DW_OP_piece.0 || byte == DW_OP_bit_piece.0) {
                break;
            }
            let offset = cursor.pos();
            let op = DwOp(cursor.read_u8("opcode")?);
            if op_name(op).is_none() {
                return Err(ExprError::UnsupportedOpcode { opcode: op.0 });
            }

            if op == DW_OP_entry_value || op == DW_OP_GNU_entry_value {
                let len = cursor.read_uleb128("DW_OP_entry_value length")?;
                let block_start = cursor.pos();
                let len = usize::try_from(len).map_err(|_| ExprError::TruncatedExpression {
                    what: "DW_OP_entry_value block",
                })?;
                cursor.read_bytes(len, "DW_OP_entry_value block")?;
                out.push(Instruction {
                    offset,
                    op,
                    operands: String::new(),
                    depth,
                });
                self.listing(data, block_start, cursor.pos(), depth + 1, all, out)?;
                continue;
            }

            let operands = self.operands(op, &mut cursor)?;
            out.push(Instruction {
                offset,
                op,
                operands,
                depth,
            });
        }
        Ok(cursor.pos())
    }

    fn operands(&self, op: DwOp, cursor: &mut ExprCursor<'_>) -> Result<String> {
        if (DW_OP_reg0.0..=DW_OP_reg31.0).contains(&op.0) {
            return Ok(format!("[${}]", self.regname(u64::from(op.0 - DW_OP_reg0.0))));
        }
        if (DW_OP_breg0.0..=DW_OP_breg31.0).contains(&op.0) {
            let offset = cursor.read_sleb128("DW_OP_breg offset")?;
            let reg = u64::from(op.0 - DW_OP_breg0.0);
            return Ok(format!("{} [${}]", offset, self.regname(reg)));
        }

        let text = match op {
            DW_OP_addr => format!("0x{:x}", cursor.read_unsigned(self.addr_size, "DW_OP_addr")?),
            DW_OP_const1u => cursor.read_unsigned(1, "DW_OP_const1u")?.to_string(),
            DW_OP_const1s => cursor.read_signed(1, "DW_OP_const1s")?.to_string(),
            DW_OP_const2u => cursor.read_unsigned(2, "DW_OP_const2u")?.to_string(),
            DW_OP_const2s => cursor.read_signed(2, "DW_OP_const2s")?.to_string(),
            DW_OP_const4u => cursor.read_unsigned(4, "DW_OP_const4u")?.to_string(),
            DW_OP_const4s => cursor.read_signed(4, "DW_OP_const4s")?.to_string(),
            DW_OP_const8u => cursor.read_unsigned(8, "DW_OP_const8u")?.to_string(),
            DW_OP_const8s => cursor.read_signed(8, "DW_OP_const8s")?.to_string(),
            DW_OP_constu => cursor.read_uleb128("DW_OP_constu")?.to_string(),
            DW_OP_consts => cursor.read_sleb128("DW_OP_consts")?.to_string(),
            DW_OP_plus_uconst => cursor.read_uleb128("DW_OP_plus_uconst")?.to_string(),
            DW_OP_fbreg => cursor.read_sleb128("DW_OP_fbreg offset")?.to_string(),

            DW_OP_regx => {
                let reg = cursor.read_uleb128("DW_OP_regx register")?;
                format!("{} [${}]", reg, self.regname(reg))
            }
            DW_OP_bregx => {
                let reg = cursor.read_uleb128("DW_OP_bregx register")?;
                let offset = cursor.read_sleb128("DW_OP_bregx offset")?;
                format!("register {} [${}] offset {}", reg, self.regname(reg), offset)
            }

            DW_OP_implicit_value => {
                let len = cursor.read_uleb128("DW_OP_implicit_value length")?;
                let n = usize::try_from(len).map_err(|_| ExprError::TruncatedExpression {
                    what: "DW_OP_implicit_value data",
                })?;
                cursor.read_bytes(n, "DW_OP_implicit_value data")?;
                len.to_string()
            }

            DW_OP_xderef_size | DW_OP_deref_size | DW_OP_pick => {
                cursor.read_u8("operand byte")?.to_string()
            }

            DW_OP_skip | DW_OP_bra => {
                let offset = cursor.read_signed(2, "branch offset")?;
                let target = cursor.pos() as i64 + offset;
                if op == DW_OP_skip {
                    format!("to {target}")
                } else {
                    target.to_string()
                }
            }

            DW_OP_call2 => format!("offset {:x}", cursor.read_unsigned(2, "DW_OP_call2 DIE")?),
            DW_OP_call4 | DW_OP_GNU_parameter_ref => {
                format!("offset {:x}", cursor.read_unsigned(4, "DIE offset")?)
            }
            DW_OP_call_ref | DW_OP_GNU_variable_value => format!(
                "offset {:x}",
                cursor.read_unsigned(self.ref_addr_size, "DIE reference")?
            ),

            DW_OP_piece => format!("{} (bytes)", cursor.read_uleb128("DW_OP_piece size")?),
            DW_OP_bit_piece => {
                let size = cursor.read_uleb128("DW_OP_bit_piece size")?;
                let offset = cursor.read_uleb128("DW_OP_bit_piece offset")?;
                format!("size {size} offset {offset} (bits)")
            }

            DW_OP_implicit_pointer | DW_OP_GNU_implicit_pointer => {
                let die = cursor.read_unsigned(self.ref_addr_size, "DW_OP_implicit_pointer DIE")?;
                let offset = cursor.read_sleb128("DW_OP_implicit_pointer offset")?;
                format!("DIE {die:x} offset {offset}")
            }

            DW_OP_deref_type | DW_OP_GNU_deref_type => {
                let size = cursor.read_u8("dereference size")?;
                let ty = cursor.read_uleb128("dereference type offset")?;
                format!("<[0x{ty:x}]> {size}")
            }

            DW_OP_const_type | DW_OP_GNU_const_type => {
                let ty = cursor.read_uleb128("DW_OP_const_type type offset")?;
                let n = cursor.read_u8("DW_OP_const_type size")?;
                let bytes = cursor.read_bytes(n as usize, "DW_OP_const_type data")?;
                let mut text = format!("<[0x{ty:x}]> {n} byte block:");
                for b in bytes {
                    text.push_str(&format!(" {b:02x}"));
                }
                text
            }

            DW_OP_regval_type | DW_OP_GNU_regval_type => {
                let reg = cursor.read_uleb128("DW_OP_regval_type register")?;
                let ty = cursor.read_uleb128("DW_OP_regval_type type offset")?;
                format!("<[0x{:x}]> [${}]", ty, self.regname(reg))
            }

            DW_OP_convert | DW_OP_GNU_convert | DW_OP_reinterpret | DW_OP_GNU_reinterpret => {
                match cursor.read_uleb128("conversion type offset")? {
                    0 => "<0>".to_string(),
                    ty => format!("<[0x{ty:x}]>"),
                }
            }

            DW_OP_addrx | DW_OP_GNU_addr_index | DW_OP_constx | DW_OP_GNU_const_index => {
                format!("index {}", cursor.read_uleb128("address index")?)
            }

            _ => String::new(),
        };
        Ok(text)
    }
}
