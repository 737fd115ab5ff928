//! What reading a symbol requires, found without running its expression
//!
//! The walk follows every path through the byte-code (both arms of
//! `DW_OP_bra`) and descends into `DW_OP_call*` and
//! `DW_OP_GNU_variable_value` targets. It stops as soon as an operation
//! needing a frame is reached.

use super::context::{variable_value_type, DW_OP_GNU_uninit, DW_OP_GNU_variable_value};
use super::decoder::ExprCursor;
use crate::core::{CompUnit, EvalConfig, ExprError, LocExprBlock, Result};
use crate::target::Target;
use gimli::constants::*;
use gimli::{DebugInfoOffset, DwOp, UnitOffset};
use std::cell::Cell;
use std::collections::HashSet;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolNeeds {
    /// Readable from static data alone
    None,
    /// Needs thread registers but no particular frame
    Registers,
    /// Needs a live frame
    Frame,
}

/// Classify the location expression in `block`
pub fn symbol_needs(
    target: &dyn Target,
    config: &EvalConfig,
    block: &LocExprBlock,
) -> Result<SymbolNeeds> {
    let walker = NeedsWalker {
        target,
        max_depth: config.max_recursion_depth,
    };
    walker.walk(&block.data, &block.cu, 0)
}

struct NeedsWalker<'t> {
    target: &'t dyn Target,
    max_depth: u32,
}

impl NeedsWalker<'_> {
    fn walk(&self, data: &[u8], cu: &CompUnit, depth: u32) -> Result<SymbolNeeds> {
        let mut needs = SymbolNeeds::None;
        if data.is_empty() {
            return Ok(needs);
        }
        if depth > self.max_depth {
            return Err(ExprError::LocationLoopDetected { depth });
        }
        let depth = depth + 1;
        let byte_order = self.target.module_arch(cu.module).byte_order();

        let mut to_visit = vec![0usize];
        let mut visited = HashSet::new();
        let schedule = |to_visit: &mut Vec<usize>, visited: &HashSet<usize>, pos: usize| {
            if pos < data.len() && !visited.contains(&pos) {
                to_visit.push(pos);
            }
        };

        while let Some(start) = to_visit.pop() {
            if !visited.insert(start) {
                continue;
            }
            if self.target.interrupted() {
                return Err(ExprError::Interrupted);
            }

            let mut cursor = ExprCursor::new(data, byte_order);
            cursor.jump(start as i64)?;
            let op = DwOp(cursor.read_u8("opcode")?);

            if op == DW_OP_bra {
                let offset = cursor.read_signed(2, "DW_OP_bra offset")?;
                let fallthrough = cursor.pos();
                cursor.jump(offset)?;
                schedule(&mut to_visit, &visited, cursor.pos());
                schedule(&mut to_visit, &visited, fallthrough);
                continue;
            }

            needs = needs.max(self.op_needs(op, &mut cursor, cu, depth)?);
            if needs == SymbolNeeds::Frame {
                trace!("{} at offset {} needs a frame", op, start);
                break;
            }
            schedule(&mut to_visit, &visited, cursor.pos());
        }
        Ok(needs)
    }

    /// Needs of the single operation `op`, leaving `cursor` after its
    /// operands
    fn op_needs(
        &self,
        op: DwOp,
        cursor: &mut ExprCursor<'_>,
        cu: &CompUnit,
        depth: u32,
    ) -> Result<SymbolNeeds> {
        if (DW_OP_lit0.0..=DW_OP_lit31.0).contains(&op.0) {
            return Ok(SymbolNeeds::None);
        }
        if (DW_OP_reg0.0..=DW_OP_reg31.0).contains(&op.0)
            || (DW_OP_breg0.0..=DW_OP_breg31.0).contains(&op.0)
        {
            return Ok(SymbolNeeds::Frame);
        }

        match op {
            DW_OP_stack_value | DW_OP_dup | DW_OP_drop | DW_OP_swap | DW_OP_over | DW_OP_rot
            | DW_OP_deref | DW_OP_abs | DW_OP_neg | DW_OP_not | DW_OP_and | DW_OP_div
            | DW_OP_minus | DW_OP_mod | DW_OP_mul | DW_OP_or | DW_OP_plus | DW_OP_shl
            | DW_OP_shr | DW_OP_shra | DW_OP_xor | DW_OP_le | DW_OP_ge | DW_OP_eq | DW_OP_lt
            | DW_OP_gt | DW_OP_ne | DW_OP_GNU_push_tls_address | DW_OP_nop
            | DW_OP_GNU_uninit | DW_OP_push_object_address => {}

            DW_OP_form_tls_address => return Ok(SymbolNeeds::Registers),

            DW_OP_convert | DW_OP_GNU_convert | DW_OP_reinterpret | DW_OP_GNU_reinterpret
            | DW_OP_addrx | DW_OP_GNU_addr_index | DW_OP_constx | DW_OP_GNU_const_index
            | DW_OP_constu | DW_OP_consts | DW_OP_plus_uconst | DW_OP_piece => {
                cursor.skip_leb128("operand")?;
            }

            DW_OP_bit_piece => {
                cursor.skip_leb128("DW_OP_bit_piece size")?;
                cursor.skip_leb128("DW_OP_bit_piece offset")?;
            }

            DW_OP_deref_type | DW_OP_GNU_deref_type => {
                cursor.read_u8("dereference size")?;
                cursor.skip_leb128("dereference type offset")?;
            }

            DW_OP_addr => {
                let size = cu.addr_size;
                cursor.read_bytes(size as usize, "DW_OP_addr operand")?;
            }
            DW_OP_const1u | DW_OP_const1s | DW_OP_deref_size | DW_OP_pick => {
                cursor.read_bytes(1, "operand")?;
            }
            DW_OP_const2u | DW_OP_const2s => {
                cursor.read_bytes(2, "operand")?;
            }
            DW_OP_const4u | DW_OP_const4s => {
                cursor.read_bytes(4, "operand")?;
            }
            DW_OP_const8u | DW_OP_const8s => {
                cursor.read_bytes(8, "operand")?;
            }

            DW_OP_regx | DW_OP_bregx | DW_OP_fbreg | DW_OP_call_frame_cfa
            | DW_OP_entry_value | DW_OP_GNU_entry_value | DW_OP_GNU_parameter_ref
            | DW_OP_regval_type | DW_OP_GNU_regval_type => return Ok(SymbolNeeds::Frame),

            DW_OP_implicit_value => {
                let len = cursor.read_uleb128("DW_OP_implicit_value length")?;
                let len = usize::try_from(len).map_err(|_| ExprError::TruncatedExpression {
                    what: "DW_OP_implicit_value data",
                })?;
                cursor.read_bytes(len, "DW_OP_implicit_value data")?;
            }

            DW_OP_implicit_pointer | DW_OP_GNU_implicit_pointer => {
                cursor.read_bytes(cu.ref_addr_size as usize, "DW_OP_implicit_pointer DIE")?;
                cursor.skip_leb128("DW_OP_implicit_pointer offset")?;
            }

            DW_OP_skip => {
                let offset = cursor.read_signed(2, "DW_OP_skip offset")?;
                cursor.jump(offset)?;
            }

            DW_OP_call2 | DW_OP_call4 => {
                let size = if op == DW_OP_call2 { 2 } else { 4 };
                let die = cursor.read_unsigned(size, "DW_OP_call DIE offset")?;
                let needs_pc = Cell::new(false);
                let get_pc = || -> Result<u64> {
                    needs_pc.set(true);
                    Ok(0)
                };
                let block = self.target.die_location(cu, UnitOffset(die as usize), &get_pc)?;
                if needs_pc.get() {
                    return Ok(SymbolNeeds::Frame);
                }
                return self.walk(&block.data, &block.cu, depth);
            }

            DW_OP_GNU_variable_value => {
                let die = cursor.read_unsigned(cu.ref_addr_size, "DW_OP_GNU_variable_value DIE")?;
                let die = DebugInfoOffset(die as usize);
                variable_value_type(self.target, cu, die)?;

                let needs_pc = Cell::new(false);
                let get_pc = || -> Result<u64> {
                    needs_pc.set(true);
                    Ok(0)
                };
                let block = self.target.die_location_at(cu, die, &get_pc, true)?;
                if needs_pc.get() {
                    return Ok(SymbolNeeds::Frame);
                }
                if let Some(block) = block {
                    return self.walk(&block.data, &block.cu, depth);
                }
            }

            DW_OP_const_type | DW_OP_GNU_const_type => {
                cursor.skip_leb128("DW_OP_const_type type offset")?;
                let n = cursor.read_u8("DW_OP_const_type size")?;
                cursor.read_bytes(n as usize, "DW_OP_const_type data")?;
            }

            _ => return Err(ExprError::UnsupportedOpcode { opcode: op.0 }),
        }
        Ok(SymbolNeeds::None)
    }
}
