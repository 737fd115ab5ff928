//! Recognisers for single-operation expression blocks
//!
//! Call-site parameters and entry values only work with a few fixed
//! shapes of expression. These helpers match those shapes exactly and
//! return `None` for anything else.

use super::decoder::ExprCursor;
use gimli::constants::*;
use gimli::RunTimeEndian;
use locus_platform::{stack_pointer_register, Arch};

// Single-byte opcodes and LEB128 operands do not depend on byte order
const ENDIAN: RunTimeEndian = RunTimeEndian::Little;

fn is_reg_op(op: u8) -> bool {
    (DW_OP_reg0.0..=DW_OP_reg31.0).contains(&op)
}

fn is_breg_op(op: u8) -> bool {
    (DW_OP_breg0.0..=DW_OP_breg31.0).contains(&op)
}

fn fits_int(reg: u64) -> bool {
    i32::try_from(reg).is_ok()
}

/// Register number of a block that is just `DW_OP_reg*`, `DW_OP_regx` or
/// `DW_OP_regval_type`
pub fn block_to_dwarf_reg(block: &[u8]) -> Option<u64> {
    let (&op, _) = block.split_first()?;
    if is_reg_op(op) {
        return (block.len() == 1).then(|| u64::from(op - DW_OP_reg0.0));
    }

    let mut cursor = ExprCursor::new(block, ENDIAN);
    cursor.read_u8("opcode").ok()?;
    let reg = if op == DW_OP_regval_type.0 || op == DW_OP_GNU_regval_type.0 {
        let reg = cursor.read_uleb128("register").ok()?;
        cursor.skip_leb128("type offset").ok()?;
        reg
    } else if op == DW_OP_regx.0 {
        cursor.read_uleb128("register").ok()?
    } else {
        return None;
    };

    (cursor.is_at_end() && fits_int(reg)).then_some(reg)
}

/// Register number and dereference size of a block that is
/// `DW_OP_breg*(0)` followed by `DW_OP_deref` or `DW_OP_deref_size`
///
/// The size is `None` for a plain `DW_OP_deref`.
pub fn block_to_dwarf_reg_deref(block: &[u8]) -> Option<(u64, Option<u8>)> {
    let mut cursor = ExprCursor::new(block, ENDIAN);
    let op = cursor.read_u8("opcode").ok()?;
    let reg = if is_breg_op(op) {
        if cursor.is_at_end() {
            return None;
        }
        u64::from(op - DW_OP_breg0.0)
    } else if op == DW_OP_bregx.0 {
        let reg = cursor.read_uleb128("register").ok()?;
        if !fits_int(reg) {
            return None;
        }
        reg
    } else {
        return None;
    };

    if cursor.read_sleb128("offset").ok()? != 0 {
        return None;
    }

    let deref = cursor.read_u8("opcode").ok()?;
    let size = if deref == DW_OP_deref.0 {
        None
    } else if deref == DW_OP_deref_size.0 {
        Some(cursor.read_u8("deref size").ok()?)
    } else {
        return None;
    };

    cursor.is_at_end().then_some((reg, size))
}

/// Offset of a block that is just `DW_OP_fbreg(X)`
pub fn block_to_fb_offset(block: &[u8]) -> Option<i64> {
    let mut cursor = ExprCursor::new(block, ENDIAN);
    if cursor.read_u8("opcode").ok()? != DW_OP_fbreg.0 {
        return None;
    }
    let offset = cursor.read_sleb128("offset").ok()?;
    cursor.is_at_end().then_some(offset)
}

/// Offset of a block that is just `DW_OP_breg<SP>(X)` for `arch`
pub fn block_to_sp_offset(arch: Arch, block: &[u8]) -> Option<i64> {
    let mut cursor = ExprCursor::new(block, ENDIAN);
    let op = cursor.read_u8("opcode").ok()?;
    let reg = if is_breg_op(op) {
        u64::from(op - DW_OP_breg0.0)
    } else if op == DW_OP_bregx.0 {
        cursor.read_uleb128("register").ok()?
    } else {
        return None;
    };

    if reg != u64::from(stack_pointer_register(arch)) {
        return None;
    }
    let offset = cursor.read_sleb128("offset").ok()?;
    cursor.is_at_end().then_some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dwarf_reg_shapes() {
        assert_eq!(block_to_dwarf_reg(&[DW_OP_reg5.0]), Some(5));
        assert_eq!(block_to_dwarf_reg(&[DW_OP_regx.0, 0x21]), Some(33));
        assert_eq!(block_to_dwarf_reg(&[DW_OP_regval_type.0, 3, 0x2a]), Some(3));
        assert_eq!(block_to_dwarf_reg(&[DW_OP_reg5.0, DW_OP_nop.0]), None);
        assert_eq!(block_to_dwarf_reg(&[DW_OP_regx.0, 0x80]), None);
        assert_eq!(block_to_dwarf_reg(&[]), None);
    }

    #[test]
    fn test_dwarf_reg_deref_shapes() {
        assert_eq!(
            block_to_dwarf_reg_deref(&[DW_OP_breg3.0, 0, DW_OP_deref.0]),
            Some((3, None))
        );
        assert_eq!(
            block_to_dwarf_reg_deref(&[DW_OP_bregx.0, 17, 0, DW_OP_deref_size.0, 4]),
            Some((17, Some(4)))
        );
        // non-zero offset
        assert_eq!(block_to_dwarf_reg_deref(&[DW_OP_breg3.0, 8, DW_OP_deref.0]), None);
        // missing dereference
        assert_eq!(block_to_dwarf_reg_deref(&[DW_OP_breg3.0, 0]), None);
        assert_eq!(
            block_to_dwarf_reg_deref(&[DW_OP_breg3.0, 0, DW_OP_deref.0, DW_OP_nop.0]),
            None
        );
    }

    #[test]
    fn test_frame_and_sp_offsets() {
        assert_eq!(block_to_fb_offset(&[DW_OP_fbreg.0, 0x70]), Some(-16));
        assert_eq!(block_to_fb_offset(&[DW_OP_fbreg.0]), None);

        assert_eq!(block_to_sp_offset(Arch::X86_64, &[DW_OP_breg7.0, 8]), Some(8));
        assert_eq!(block_to_sp_offset(Arch::X86_64, &[DW_OP_breg6.0, 8]), None);
        assert_eq!(
            block_to_sp_offset(Arch::Aarch64, &[DW_OP_bregx.0, 31, 0x10]),
            Some(16)
        );
    }
}
