//! Typed values produced by location expressions
//!
//! A [`Value`] is a typed byte buffer plus a description of where the bytes
//! live (its lvalue kind). Contents may be fetched lazily, and individual
//! bits may be marked optimized out or unavailable.

pub mod arith;
pub mod bits;
pub mod types;

pub use arith::BinOp;
pub use bits::BitRanges;
pub use types::{Type, TypeCode};

use crate::core::{ExprError, FrameRef, Result};
use crate::expr::pieces::PieceClosure;
use crate::target::{RegisterStatus, Target};
use bits::copy_bitwise;
use gimli::RunTimeEndian;
use std::sync::Arc;
use tracing::trace;

/// Bit slice of a larger value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitfield {
    pub bitpos: u64,
    pub bitsize: u64,
}

/// Where a value's bytes live
#[derive(Debug, Clone)]
pub enum Lval {
    NotLval,
    Memory { address: u64 },
    Register { frame: FrameRef, regnum: u64 },
    /// Assembled from pieces by [`PieceClosure`]
    Computed(Arc<PieceClosure>),
}

#[derive(Debug, Clone)]
pub struct Value {
    ty: Arc<Type>,
    lval: Lval,
    contents: Vec<u8>,
    lazy: bool,
    /// Byte offset of this value within its location
    offset: u64,
    bitfield: Option<Bitfield>,
    optimized_out: BitRanges,
    unavailable: BitRanges,
    initialized: bool,
    /// Lives in stack memory of the inferior
    stack: bool,
    byte_order: RunTimeEndian,
}

impl Value {
    fn with_lval(ty: Arc<Type>, lval: Lval, lazy: bool, byte_order: RunTimeEndian) -> Self {
        let contents = vec![0; ty.length];
        Self {
            ty,
            lval,
            contents,
            lazy,
            offset: 0,
            bitfield: None,
            optimized_out: BitRanges::new(),
            unavailable: BitRanges::new(),
            initialized: true,
            stack: false,
            byte_order,
        }
    }

    /// Zero-filled non-lvalue
    pub fn allocate(ty: Arc<Type>, byte_order: RunTimeEndian) -> Self {
        Self::with_lval(ty, Lval::NotLval, false, byte_order)
    }

    pub fn allocate_optimized_out(ty: Arc<Type>, byte_order: RunTimeEndian) -> Self {
        let mut value = Self::allocate(ty, byte_order);
        value.mark_bits_optimized_out(0, 8 * value.ty.length as u64);
        value
    }

    pub fn from_bytes(ty: Arc<Type>, bytes: &[u8], byte_order: RunTimeEndian) -> Self {
        let mut value = Self::allocate(ty, byte_order);
        let n = bytes.len().min(value.contents.len());
        value.contents[..n].copy_from_slice(&bytes[..n]);
        value
    }

    pub fn from_ulongest(ty: Arc<Type>, v: u64, byte_order: RunTimeEndian) -> Self {
        let mut value = Self::allocate(ty, byte_order);
        bits::store_unsigned(&mut value.contents, byte_order, u128::from(v));
        value
    }

    pub fn from_longest(ty: Arc<Type>, v: i64, byte_order: RunTimeEndian) -> Self {
        let mut value = Self::allocate(ty, byte_order);
        bits::store_unsigned(&mut value.contents, byte_order, i128::from(v) as u128);
        value
    }

    /// Lazy value in target memory
    pub fn at_lazy(ty: Arc<Type>, address: u64, byte_order: RunTimeEndian) -> Self {
        Self::with_lval(ty, Lval::Memory { address }, true, byte_order)
    }

    /// Lazy value backed by a composite location
    pub fn computed(ty: Arc<Type>, closure: Arc<PieceClosure>, byte_order: RunTimeEndian) -> Self {
        Self::with_lval(ty, Lval::Computed(closure), true, byte_order)
    }

    /// Read a value of `ty` out of DWARF register `regnum` of `frame`
    ///
    /// Values narrower than the register occupy its low-order end.
    pub fn from_register(
        ty: Arc<Type>,
        frame: FrameRef,
        regnum: u64,
        target: &dyn Target,
        byte_order: RunTimeEndian,
    ) -> Result<Self> {
        if !target.frame_is_valid(frame) {
            return Err(ExprError::FrameNotFound(frame));
        }
        let reg_size = target.register_size(frame, regnum)?;
        let mut value = Self::with_lval(ty, Lval::Register { frame, regnum }, false, byte_order);
        let len = value.ty.length;
        if byte_order == RunTimeEndian::Big && len < reg_size {
            value.offset = (reg_size - len) as u64;
        }

        let status =
            target.read_register(frame, regnum, value.offset as usize, &mut value.contents)?;
        match status {
            RegisterStatus::Valid => {}
            RegisterStatus::OptimizedOut => value.mark_bits_optimized_out(0, 8 * len as u64),
            RegisterStatus::Unavailable => value.mark_bits_unavailable(0, 8 * len as u64),
        }
        trace!("register {} of {} read as {:02x?}", regnum, frame, value.contents);
        Ok(value)
    }

    pub fn ty(&self) -> &Arc<Type> {
        &self.ty
    }

    pub fn lval(&self) -> &Lval {
        &self.lval
    }

    pub fn address(&self) -> Option<u64> {
        match self.lval {
            Lval::Memory { address } => Some(address),
            _ => None,
        }
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn bitfield(&self) -> Option<Bitfield> {
        self.bitfield
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    pub fn stack(&self) -> bool {
        self.stack
    }

    pub fn set_stack(&mut self, stack: bool) {
        self.stack = stack;
    }

    pub fn byte_order(&self) -> RunTimeEndian {
        self.byte_order
    }

    /// Composite location shared by this value, if any
    pub fn closure(&self) -> Option<&Arc<PieceClosure>> {
        match &self.lval {
            Lval::Computed(closure) => Some(closure),
            _ => None,
        }
    }

    /// Number of live values sharing this value's composite location
    pub fn closure_refcount(&self) -> Option<usize> {
        self.closure().map(Arc::strong_count)
    }

    /// Read the bytes behind a lazy value
    pub fn fetch_lazy(&mut self, target: &dyn Target) -> Result<()> {
        if !self.lazy {
            return Ok(());
        }
        self.optimized_out.clear();
        self.unavailable.clear();
        self.contents.iter_mut().for_each(|b| *b = 0);

        match self.lval.clone() {
            Lval::NotLval | Lval::Register { .. } => {}
            Lval::Memory { address } => {
                let mut buf = vec![0; self.ty.length];
                match target.read_memory(address, &mut buf) {
                    Ok(()) => self.contents = buf,
                    Err(ExprError::NotAvailable(_)) => {
                        self.mark_bits_unavailable(0, 8 * self.ty.length as u64)
                    }
                    Err(e) => return Err(e),
                }
            }
            Lval::Computed(closure) => closure.read(self, target)?,
        }
        self.lazy = false;
        Ok(())
    }

    /// Consume and return the value with its contents fetched
    pub fn fetched(mut self, target: &dyn Target) -> Result<Self> {
        self.fetch_lazy(target)?;
        Ok(self)
    }

    /// Contents, failing if any bit is optimized out or unavailable
    pub fn contents(&self) -> Result<&[u8]> {
        if self.lazy {
            return Err(ExprError::TypeError(
                "value contents have not been fetched".to_string(),
            ));
        }
        if !self.optimized_out.is_empty() {
            return Err(ExprError::OptimizedOut(
                "value has been optimized out".to_string(),
            ));
        }
        if !self.unavailable.is_empty() {
            return Err(ExprError::NotAvailable("value is not available".to_string()));
        }
        Ok(&self.contents)
    }

    /// Contents without availability checks
    pub fn contents_raw(&self) -> &[u8] {
        &self.contents
    }

    pub(crate) fn contents_raw_mut(&mut self) -> &mut [u8] {
        &mut self.contents
    }

    pub fn mark_bits_optimized_out(&mut self, offset: u64, length: u64) {
        self.optimized_out.insert(offset, length);
    }

    pub fn mark_bits_unavailable(&mut self, offset: u64, length: u64) {
        self.unavailable.insert(offset, length);
    }

    pub fn mark_bytes_unavailable(&mut self, offset: u64, length: u64) {
        self.mark_bits_unavailable(8 * offset, 8 * length);
    }

    pub fn bits_any_optimized_out(&self, offset: u64, length: u64) -> bool {
        self.optimized_out.overlaps(offset, length)
    }

    pub fn bits_available(&self, offset: u64, length: u64) -> bool {
        !self.unavailable.overlaps(offset, length)
    }

    pub fn optimized_out_bits(&self) -> &BitRanges {
        &self.optimized_out
    }

    pub fn unavailable_bits(&self) -> &BitRanges {
        &self.unavailable
    }

    pub fn entirely_optimized_out(&self) -> bool {
        self.optimized_out.contains(0, 8 * self.ty.length as u64)
    }

    pub fn entirely_unavailable(&self) -> bool {
        self.unavailable.contains(0, 8 * self.ty.length as u64)
    }

    pub fn entirely_available(&self) -> bool {
        self.unavailable.is_empty()
    }

    /// Whether any bit is optimized out, without reading data for
    /// composite locations
    pub fn is_optimized_out(&self, target: &dyn Target) -> Result<bool> {
        if self.lazy {
            return match &self.lval {
                Lval::Computed(closure) => closure.check_optimized_out(self, target),
                _ => Ok(false),
            };
        }
        Ok(!self.optimized_out.is_empty())
    }

    /// Non-lvalue copy carrying the same contents and bit marks
    pub fn to_not_lval(&self) -> Value {
        let mut copy = self.clone();
        copy.lval = Lval::NotLval;
        copy.offset = 0;
        copy
    }

    /// Component of type `ty` starting `byte_offset` bytes into this value
    pub fn sub_value(&self, ty: Arc<Type>, byte_offset: u64) -> Result<Value> {
        let end = byte_offset + ty.length as u64;
        if end > self.ty.length as u64 {
            return Err(ExprError::TypeError(format!(
                "component at offset {byte_offset} of size {} lies outside {}",
                ty.length, self.ty
            )));
        }

        match &self.lval {
            Lval::Memory { address } if self.lazy => Ok(Value::at_lazy(
                ty,
                address.wrapping_add(byte_offset),
                self.byte_order,
            )),
            Lval::Computed(closure) => {
                let mut sub = Value::computed(ty, closure.clone(), self.byte_order);
                sub.offset = self.offset + byte_offset;
                sub.initialized = self.initialized;
                Ok(sub)
            }
            _ => {
                let start = byte_offset as usize;
                let mut sub = Value::from_bytes(
                    ty.clone(),
                    &self.contents[start..start + ty.length],
                    self.byte_order,
                );
                let (bit_start, bit_len) = (8 * byte_offset, 8 * ty.length as u64);
                self.optimized_out
                    .copy_into(&mut sub.optimized_out, 0, bit_start, bit_len);
                self.unavailable
                    .copy_into(&mut sub.unavailable, 0, bit_start, bit_len);
                sub.lval = match &self.lval {
                    Lval::Register { frame, regnum } => {
                        sub.offset = self.offset + byte_offset;
                        Lval::Register {
                            frame: *frame,
                            regnum: *regnum,
                        }
                    }
                    Lval::Memory { address } => Lval::Memory {
                        address: address.wrapping_add(byte_offset),
                    },
                    _ => Lval::NotLval,
                };
                sub.initialized = self.initialized;
                sub.stack = self.stack;
                Ok(sub)
            }
        }
    }

    /// Bitfield of type `ty` covering `bitsize` bits from `bitpos`
    pub fn bitfield_value(&self, ty: Arc<Type>, bitpos: u64, bitsize: u64) -> Result<Value> {
        if bitpos + bitsize > 8 * self.ty.length as u64 || bitsize > 8 * ty.length as u64 {
            return Err(ExprError::TypeError(format!(
                "bitfield {bitpos}+{bitsize} lies outside {}",
                self.ty
            )));
        }

        if let Lval::Computed(closure) = &self.lval {
            let mut field = Value::computed(ty, closure.clone(), self.byte_order);
            field.offset = self.offset;
            field.bitfield = Some(Bitfield { bitpos, bitsize });
            return Ok(field);
        }

        let mut field = Value::allocate(ty, self.byte_order);
        copy_bitwise(
            &mut field.contents,
            0,
            self.contents_raw(),
            bitpos,
            bitsize,
            self.byte_order == RunTimeEndian::Big,
        );
        self.optimized_out
            .copy_into(&mut field.optimized_out, 0, bitpos, bitsize);
        self.unavailable
            .copy_into(&mut field.unavailable, 0, bitpos, bitsize);
        field.lazy = self.lazy;
        Ok(field)
    }

    /// Store `from` into the location this value describes
    pub fn assign(&mut self, from: &Value, target: &mut dyn Target) -> Result<()> {
        if from.ty.length != self.ty.length {
            return Err(ExprError::TypeError(format!(
                "cannot assign {} byte value to {}",
                from.ty.length, self.ty
            )));
        }

        match self.lval.clone() {
            Lval::NotLval => return Err(ExprError::NotLvalue),
            Lval::Memory { address } => {
                target.write_memory(address, from.contents()?)?;
                self.lazy = true;
            }
            Lval::Register { frame, regnum } => {
                if !target.frame_is_valid(frame) {
                    return Err(ExprError::FrameNotFound(frame));
                }
                let data = from.contents()?.to_vec();
                target.write_register(frame, regnum, self.offset as usize, &data)?;
                self.contents = data;
            }
            Lval::Computed(closure) => {
                closure.write(self, from, target)?;
                self.lazy = true;
            }
        }
        Ok(())
    }

    /// Whether the given bits (relative to this value) are an implicit pointer
    pub fn bits_synthetic_pointer(&self, offset: u64, length: u64) -> bool {
        match &self.lval {
            Lval::Computed(closure) => closure.check_synthetic_pointer(self, offset, length),
            _ => false,
        }
    }

    /// Dereference an implicit pointer value
    ///
    /// Returns `None` when this is an ordinary pointer that should be
    /// followed through memory instead.
    pub fn indirect(&self, target: &dyn Target) -> Result<Option<Value>> {
        match &self.lval {
            Lval::Computed(closure) => closure.indirect(self, target),
            _ => Ok(None),
        }
    }

    /// Resolve a reference whose referent is an implicit pointer
    pub fn coerce_ref(&self, target: &dyn Target) -> Result<Option<Value>> {
        match &self.lval {
            Lval::Computed(closure) => closure.coerce_ref(self, target),
            _ => Ok(None),
        }
    }
}
