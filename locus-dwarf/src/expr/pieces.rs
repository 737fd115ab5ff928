//! Composite locations assembled from pieces
//!
//! A value whose location is split across registers, memory and computed
//! bits is backed by a [`PieceClosure`]. Reads gather the bits piece by
//! piece into the value's buffer; writes scatter them back. Pieces that
//! cannot hold data (stack values, literals, implicit pointers) read as
//! zeros or are marked optimized out.

use super::location::{Piece, PieceLocation};
use crate::core::{CompUnit, EvalConfig, ExprError, FrameRef, ModuleId, Result};
use crate::evaluator::indirect_synthetic_pointer;
use crate::target::{RegisterStatus, Target};
use crate::value::bits::{bits_to_bytes, copy_bitwise, extract_signed};
use crate::value::{TypeCode, Value};
use gimli::{DebugInfoOffset, RunTimeEndian};
use locus_platform::Arch;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Shared description of a composite location
pub struct PieceClosure {
    cu: Option<CompUnit>,
    module: ModuleId,
    pieces: Vec<Piece>,
    frame: Option<FrameRef>,
    arch: Arch,
    config: Arc<EvalConfig>,
}

impl fmt::Debug for PieceClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pieces: Vec<String> = self
            .pieces
            .iter()
            .map(|p| p.describe(Some(self.arch)))
            .collect();
        f.debug_struct("PieceClosure")
            .field("frame", &self.frame)
            .field("pieces", &pieces)
            .finish()
    }
}

enum Access<'a, 'b> {
    Read(&'a dyn Target),
    Check(&'a dyn Target),
    Write {
        from: &'b Value,
        target: &'a mut dyn Target,
    },
}

impl Access<'_, '_> {
    fn target(&self) -> &dyn Target {
        match self {
            Access::Read(target) | Access::Check(target) => *target,
            Access::Write { target, .. } => &**target,
        }
    }
}

fn read_into(
    target: &dyn Target,
    v: &mut Value,
    bit_offset: u64,
    bit_len: u64,
    address: u64,
    buf: &mut [u8],
) -> Result<()> {
    match target.read_memory(address, buf) {
        Ok(()) => Ok(()),
        Err(ExprError::NotAvailable(_)) => {
            v.mark_bits_unavailable(bit_offset, bit_len);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

impl PieceClosure {
    pub(crate) fn new(
        cu: Option<CompUnit>,
        module: ModuleId,
        pieces: Vec<Piece>,
        frame: Option<FrameRef>,
        arch: Arch,
        config: Arc<EvalConfig>,
    ) -> Self {
        Self {
            cu,
            module,
            pieces,
            frame,
            arch,
            config,
        }
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn frame(&self) -> Option<FrameRef> {
        self.frame
    }

    pub fn cu(&self) -> Option<&CompUnit> {
        self.cu.as_ref()
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    fn byte_order(&self) -> RunTimeEndian {
        self.arch.byte_order()
    }

    fn live_frame(&self, target: &dyn Target) -> Result<FrameRef> {
        let frame = self.frame.ok_or(ExprError::MissingFrame {
            op: "register piece",
        })?;
        if !target.frame_is_valid(frame) {
            return Err(ExprError::FrameNotFound(frame));
        }
        Ok(frame)
    }

    pub(crate) fn read(&self, v: &mut Value, target: &dyn Target) -> Result<()> {
        self.transfer(v, Access::Read(target)).map(|_| ())
    }

    pub(crate) fn write(&self, to: &mut Value, from: &Value, target: &mut dyn Target) -> Result<()> {
        self.transfer(to, Access::Write { from, target }).map(|_| ())
    }

    /// Whether any bit of `v` comes from an optimized-out piece, reading
    /// only register status
    pub(crate) fn check_optimized_out(&self, v: &Value, target: &dyn Target) -> Result<bool> {
        let mut probe = v.clone();
        self.transfer(&mut probe, Access::Check(target))
    }

    fn transfer(&self, v: &mut Value, mut access: Access<'_, '_>) -> Result<bool> {
        let check = matches!(access, Access::Check(_));
        let bits_big_endian = v.byte_order() == RunTimeEndian::Big;
        let src: Vec<u8> = match &access {
            Access::Write { from, .. } => from.contents()?.to_vec(),
            _ => Vec::new(),
        };

        let mut offset = 0u64;
        let mut bits_to_skip = 8 * v.offset();
        let max_offset = match v.bitfield() {
            Some(bf) => {
                bits_to_skip += bf.bitpos;
                match &access {
                    // Use the least significant bits of the source
                    Access::Write { from, .. } if from.byte_order() == RunTimeEndian::Big => {
                        let max = 8 * from.ty().length as u64;
                        offset = max - bf.bitsize;
                        max
                    }
                    _ => bf.bitsize,
                }
            }
            None => 8 * v.ty().length as u64,
        };

        let mut i = 0;
        while i < self.pieces.len() && bits_to_skip >= self.pieces[i].size {
            bits_to_skip -= self.pieces[i].size;
            i += 1;
        }

        while i < self.pieces.len() && offset < max_offset {
            let p = &self.pieces[i];
            let this_size_bits = (p.size - bits_to_skip).min(max_offset - offset);
            // Skipped bits stay below the piece size, so offsets past
            // `piece_end` cannot overflow once it is known to fit
            let piece_end = p.offset.checked_add(p.size).ok_or_else(|| {
                ExprError::MalformedOperand("DW_OP_bit_piece offset overflows".to_string())
            })?;

            match &p.location {
                PieceLocation::Register(regno) => {
                    let regno = *regno;
                    let frame = self.live_frame(access.target())?;
                    let reg_bits = 8 * access.target().register_size(frame, regno)? as u64;
                    if self.byte_order() == RunTimeEndian::Big && piece_end < reg_bits {
                        bits_to_skip += reg_bits - piece_end;
                    } else {
                        bits_to_skip += p.offset;
                    }
                    let reg_offset = (bits_to_skip / 8) as usize;
                    let mut buffer = vec![0u8; bits_to_bytes(bits_to_skip, this_size_bits)];

                    if let Access::Write { target, .. } = &mut access {
                        if bits_to_skip % 8 != 0 || this_size_bits % 8 != 0 {
                            match target.read_register(frame, regno, reg_offset, &mut buffer)? {
                                RegisterStatus::Valid => {}
                                RegisterStatus::OptimizedOut => {
                                    return Err(ExprError::OptimizedOut(
                                        "Can't do read-modify-write to update bitfield; \
                                         containing word has been optimized out"
                                            .to_string(),
                                    ))
                                }
                                RegisterStatus::Unavailable => {
                                    return Err(ExprError::NotAvailable(
                                        "Can't do read-modify-write to update bitfield; \
                                         containing word is unavailable"
                                            .to_string(),
                                    ))
                                }
                            }
                        }
                        copy_bitwise(
                            &mut buffer,
                            bits_to_skip % 8,
                            &src,
                            offset,
                            this_size_bits,
                            bits_big_endian,
                        );
                        target.write_register(frame, regno, reg_offset, &buffer)?;
                    } else {
                        let status =
                            access
                                .target()
                                .read_register(frame, regno, reg_offset, &mut buffer)?;
                        match status {
                            RegisterStatus::Valid => {
                                if !check {
                                    copy_bitwise(
                                        v.contents_raw_mut(),
                                        offset,
                                        &buffer,
                                        bits_to_skip % 8,
                                        this_size_bits,
                                        bits_big_endian,
                                    );
                                }
                            }
                            RegisterStatus::OptimizedOut => {
                                if check {
                                    return Ok(true);
                                }
                                v.mark_bits_optimized_out(offset, this_size_bits);
                            }
                            RegisterStatus::Unavailable => {
                                if !check {
                                    v.mark_bits_unavailable(offset, this_size_bits);
                                }
                            }
                        }
                    }
                }

                PieceLocation::Memory { address, .. } if !check => {
                    bits_to_skip += p.offset;
                    let start = address.wrapping_add(bits_to_skip / 8);

                    if bits_to_skip % 8 == 0 && this_size_bits % 8 == 0 && offset % 8 == 0 {
                        let from = (offset / 8) as usize;
                        let len = (this_size_bits / 8) as usize;
                        if let Access::Write { target, .. } = &mut access {
                            target.write_memory(start, &src[from..from + len])?;
                        } else {
                            let mut buffer = vec![0u8; len];
                            read_into(access.target(), v, offset, this_size_bits, start, &mut buffer)?;
                            v.contents_raw_mut()[from..from + len].copy_from_slice(&buffer);
                        }
                    } else {
                        let this_size = bits_to_bytes(bits_to_skip, this_size_bits);
                        let mut buffer = vec![0u8; this_size];
                        if let Access::Write { target, .. } = &mut access {
                            if bits_to_skip % 8 != 0 || this_size_bits % 8 != 0 {
                                if this_size <= 8 {
                                    target.read_memory(start, &mut buffer)?;
                                } else {
                                    // Only the first and last bytes keep old bits
                                    target.read_memory(start, &mut buffer[..1])?;
                                    target.read_memory(
                                        start.wrapping_add(this_size as u64 - 1),
                                        &mut buffer[this_size - 1..],
                                    )?;
                                }
                            }
                            copy_bitwise(
                                &mut buffer,
                                bits_to_skip % 8,
                                &src,
                                offset,
                                this_size_bits,
                                bits_big_endian,
                            );
                            target.write_memory(start, &buffer)?;
                        } else {
                            read_into(access.target(), v, offset, this_size_bits, start, &mut buffer)?;
                            copy_bitwise(
                                v.contents_raw_mut(),
                                offset,
                                &buffer,
                                bits_to_skip % 8,
                                this_size_bits,
                                bits_big_endian,
                            );
                        }
                    }
                }

                PieceLocation::Stack(value) if !check => {
                    if matches!(access, Access::Write { .. }) {
                        v.mark_bits_optimized_out(offset, this_size_bits);
                    } else {
                        let value_bits = 8 * value.ty().length as u64;
                        // Pieces reaching past the stack value read as zeros
                        if piece_end <= value_bits {
                            if self.byte_order() == RunTimeEndian::Big {
                                bits_to_skip += value_bits - piece_end;
                            } else {
                                bits_to_skip += p.offset;
                            }
                            copy_bitwise(
                                v.contents_raw_mut(),
                                offset,
                                value.contents()?,
                                bits_to_skip,
                                this_size_bits,
                                bits_big_endian,
                            );
                        }
                    }
                }

                PieceLocation::Literal(data) if !check => {
                    if matches!(access, Access::Write { .. }) {
                        v.mark_bits_optimized_out(offset, this_size_bits);
                    } else {
                        let literal_bits = 8 * data.len() as u64;
                        bits_to_skip += p.offset;
                        if bits_to_skip < literal_bits {
                            let n = this_size_bits.min(literal_bits - bits_to_skip);
                            copy_bitwise(
                                v.contents_raw_mut(),
                                offset,
                                data,
                                bits_to_skip,
                                n,
                                bits_big_endian,
                            );
                        }
                    }
                }

                PieceLocation::ImplicitPointer { .. } => {
                    // Reads as zeros without being optimized out
                    if matches!(access, Access::Write { .. }) {
                        v.mark_bits_optimized_out(offset, this_size_bits);
                    }
                }

                PieceLocation::OptimizedOut => {
                    if check {
                        return Ok(true);
                    }
                    v.mark_bits_optimized_out(offset, this_size_bits);
                }

                PieceLocation::Memory { .. }
                | PieceLocation::Stack(_)
                | PieceLocation::Literal(_) => {}
            }

            offset += this_size_bits;
            bits_to_skip = 0;
            i += 1;
        }

        if offset < max_offset {
            if check {
                return Ok(true);
            }
            trace!(
                "bits {}..{} not covered by any piece",
                offset,
                max_offset
            );
            v.mark_bits_optimized_out(offset, max_offset - offset);
        }
        Ok(false)
    }

    /// Whether `bit_length` bits at `bit_offset` of `v` all come from
    /// implicit-pointer pieces
    pub(crate) fn check_synthetic_pointer(&self, v: &Value, bit_offset: u64, bit_length: u64) -> bool {
        let mut bit_offset = bit_offset.saturating_add(8 * v.offset());
        if let Some(bf) = v.bitfield() {
            bit_offset = bit_offset.saturating_add(bf.bitpos);
        }
        let mut bit_length = bit_length as i64;

        for p in &self.pieces {
            if bit_length <= 0 {
                break;
            }
            if bit_offset > 0 {
                if bit_offset >= p.size {
                    bit_offset -= p.size;
                    continue;
                }
                bit_length -= (p.size - bit_offset) as i64;
                bit_offset = 0;
            } else {
                bit_length -= p.size as i64;
            }

            if !matches!(p.location, PieceLocation::ImplicitPointer { .. }) {
                return false;
            }
        }
        true
    }

    fn pointer_piece(&self, v: &Value) -> Result<Option<(DebugInfoOffset<usize>, i64)>> {
        let mut bit_length = 8 * v.ty().length as i64;
        let mut bit_offset = 8 * v.offset();
        if let Some(bf) = v.bitfield() {
            bit_offset += bf.bitpos;
        }

        for p in &self.pieces {
            if bit_length <= 0 {
                break;
            }
            if bit_offset > 0 {
                if bit_offset >= p.size {
                    bit_offset -= p.size;
                    continue;
                }
                bit_length -= (p.size - bit_offset) as i64;
            } else {
                bit_length -= p.size as i64;
            }

            return match p.location {
                PieceLocation::ImplicitPointer { die, offset } => {
                    if bit_length != 0 {
                        return Err(ExprError::InvalidSyntheticPointerUse(
                            "Invalid use of DW_OP_implicit_pointer".to_string(),
                        ));
                    }
                    Ok(Some((die, offset)))
                }
                _ => Ok(None),
            };
        }
        Err(ExprError::InvalidSyntheticPointerUse(
            "pointer lies outside the recorded pieces".to_string(),
        ))
    }

    fn selected_frame(&self, target: &dyn Target) -> Result<FrameRef> {
        target.selected_frame().ok_or(ExprError::MissingFrame {
            op: "DW_OP_implicit_pointer",
        })
    }

    pub(crate) fn indirect(&self, v: &Value, target: &dyn Target) -> Result<Option<Value>> {
        if v.ty().code != TypeCode::Ptr {
            return Ok(None);
        }
        let Some((die, piece_offset)) = self.pointer_piece(v)? else {
            return Ok(None);
        };
        let cu = self.cu.ok_or(ExprError::MissingCompilationUnit {
            op: "DW_OP_implicit_pointer",
        })?;
        let frame = self.selected_frame(target)?;

        // Pointer arithmetic on a synthetic pointer lands in its contents
        let fetched;
        let contents = if v.is_lazy() {
            fetched = v.clone().fetched(target)?;
            fetched.contents_raw()
        } else {
            v.contents_raw()
        };
        let byte_offset = extract_signed(contents, self.byte_order()) as i64 + piece_offset;
        debug!(
            "following implicit pointer to DIE 0x{:x} at byte offset {}",
            die.0, byte_offset
        );

        indirect_synthetic_pointer(
            target,
            &self.config,
            die,
            byte_offset,
            &cu,
            frame,
            v.ty(),
            false,
            0,
        )
        .map(Some)
    }

    pub(crate) fn coerce_ref(&self, v: &Value, target: &dyn Target) -> Result<Option<Value>> {
        if !self.check_synthetic_pointer(v, 0, 8 * v.ty().length as u64) {
            return Ok(None);
        }
        let frame = self.selected_frame(target)?;
        let (die, offset) = match self.pieces.as_slice() {
            [Piece {
                location: PieceLocation::ImplicitPointer { die, offset },
                ..
            }] => (*die, *offset),
            _ => {
                return Err(ExprError::InvalidSyntheticPointerUse(
                    "synthetic reference must be a single implicit pointer piece".to_string(),
                ))
            }
        };
        let cu = self.cu.ok_or(ExprError::MissingCompilationUnit {
            op: "DW_OP_implicit_pointer",
        })?;
        indirect_synthetic_pointer(target, &self.config, die, offset, &cu, frame, v.ty(), false, 0)
            .map(Some)
    }
}
