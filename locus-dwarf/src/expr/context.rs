//! The DWARF expression stack machine
//!
//! [`ExprContext`] runs location expression byte-code against a
//! [`Target`]. It tracks the operand stack, the kind of location the
//! expression currently describes, and any pieces recorded so far, then
//! turns that state into a [`Value`] with [`ExprContext::fetch_result`].

use super::blocks::{block_to_dwarf_reg, block_to_dwarf_reg_deref};
use super::decoder::ExprCursor;
use super::location::{Location, Piece, PieceLocation};
use super::pieces::PieceClosure;
use super::stack::{EvalStack, StackEntry};
use crate::core::{
    CallSiteParameter, CallSiteParameterKind, CompUnit, EvalConfig, ExprError, FrameRef, ModuleId,
    ObjectAddressInfo, Result,
};
use crate::evaluator::indirect_synthetic_pointer;
use crate::target::{DieType, RegisterStatus, Target};
use crate::value::bits::{extract_unsigned, store_unsigned};
use crate::value::{BinOp, Type, TypeCode, Value};
use gimli::constants::*;
use gimli::{DebugInfoOffset, DwOp, RunTimeEndian, UnitOffset};
use locus_platform::Arch;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// GNU extensions gimli does not name
#[allow(non_upper_case_globals)]
pub const DW_OP_GNU_uninit: DwOp = DwOp(0xf0);
#[allow(non_upper_case_globals)]
pub const DW_OP_GNU_variable_value: DwOp = DwOp(0xfd);

fn in_range(op: DwOp, first: DwOp, last: DwOp) -> bool {
    (first.0..=last.0).contains(&op.0)
}

fn require_integral(ty: &Type) -> Result<()> {
    if ty.is_integral() {
        Ok(())
    } else {
        Err(ExprError::TypeError(
            "integral type expected in DWARF expression".to_string(),
        ))
    }
}

/// `reg*`, `implicit_value`, `stack_value`, `implicit_pointer` and
/// `GNU_uninit` may only be followed by a piece operation
fn require_composition(cursor: &ExprCursor<'_>, op: DwOp) -> Result<()> {
    match cursor.peek_u8() {
        None => Ok(()),
        Some(next)
            if next == DW_OP_piece.0
                || next == DW_OP_bit_piece.0
                || next == DW_OP_GNU_uninit.0 =>
        {
            Ok(())
        }
        Some(_) => Err(ExprError::MalformedRegisterOp { op }),
    }
}

fn entry(value: Value, in_stack_memory: bool) -> Option<StackEntry> {
    Some(StackEntry {
        value: Arc::new(value),
        in_stack_memory,
    })
}

/// Evaluation state saved while running an expression on behalf of
/// the caller frame
struct CallerScope {
    frame: Option<FrameRef>,
    cu: Option<CompUnit>,
    addr_info: Option<ObjectAddressInfo>,
    module: ModuleId,
    addr_size: u8,
    arch: Arch,
}

pub struct ExprContext<'t> {
    target: &'t dyn Target,
    config: Arc<EvalConfig>,
    module: ModuleId,
    arch: Arch,
    addr_size: u8,
    stack: EvalStack,
    pieces: Vec<Piece>,
    location: Location,
    initialized: bool,
    recursion_depth: u32,
    frame: Option<FrameRef>,
    cu: Option<CompUnit>,
    addr_info: Option<ObjectAddressInfo>,
}

impl<'t> ExprContext<'t> {
    pub fn new(
        target: &'t dyn Target,
        module: ModuleId,
        addr_size: u8,
        config: Arc<EvalConfig>,
    ) -> Self {
        Self {
            target,
            config,
            module,
            arch: target.module_arch(module),
            addr_size,
            stack: EvalStack::new(),
            pieces: Vec::new(),
            location: Location::Memory,
            initialized: true,
            recursion_depth: 0,
            frame: None,
            cu: None,
            addr_info: None,
        }
    }

    /// Start counting nested evaluations from `depth`
    pub(crate) fn with_recursion_depth(mut self, depth: u32) -> Self {
        self.recursion_depth = depth;
        self
    }

    pub fn set_frame(&mut self, frame: Option<FrameRef>) {
        self.frame = frame;
    }

    pub fn set_compilation_unit(&mut self, cu: Option<CompUnit>) {
        self.cu = cu;
    }

    pub fn set_object_address(&mut self, addr_info: Option<ObjectAddressInfo>) {
        self.addr_info = addr_info;
    }

    pub fn frame(&self) -> Option<FrameRef> {
        self.frame
    }

    pub fn compilation_unit(&self) -> Option<&CompUnit> {
        self.cu.as_ref()
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn recursion_depth(&self) -> u32 {
        self.recursion_depth
    }

    fn byte_order(&self) -> RunTimeEndian {
        self.arch.byte_order()
    }

    /// Default type of untyped stack entries
    pub fn address_type(&self) -> Result<Arc<Type>> {
        Type::address(self.addr_size)
    }

    pub fn push(&mut self, value: Value, in_stack_memory: bool) {
        self.stack.push(Arc::new(value), in_stack_memory);
    }

    pub fn push_address(&mut self, address: u64, in_stack_memory: bool) -> Result<()> {
        let value = Value::from_ulongest(self.address_type()?, address, self.byte_order());
        self.push(value, in_stack_memory);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<()> {
        self.stack.pop().map(|_| ())
    }

    /// Entry `n` from the top of the stack
    pub fn fetch(&self, n: usize) -> Result<Arc<Value>> {
        Ok(self.stack.fetch(n)?.value.clone())
    }

    pub fn fetch_in_stack_memory(&self, n: usize) -> Result<bool> {
        Ok(self.stack.fetch(n)?.in_stack_memory)
    }

    /// Entry `n` interpreted as a target address
    pub fn fetch_address(&self, n: usize) -> Result<u64> {
        let value = self.fetch(n)?;
        self.value_to_address(&value)
    }

    fn value_to_address(&self, value: &Value) -> Result<u64> {
        require_integral(value.ty())?;
        let raw = extract_unsigned(value.contents()?, self.byte_order()) as u64;
        Ok(self
            .target
            .integer_to_address(raw, self.addr_size)
            .unwrap_or(raw))
    }

    fn pop_value(&mut self) -> Result<Arc<Value>> {
        Ok(self.stack.pop()?.value)
    }

    fn pop_address(&mut self) -> Result<u64> {
        let value = self.pop_value()?;
        self.value_to_address(&value)
    }

    /// Run `expr`, leaving its result on the stack and in the location state
    pub fn eval(&mut self, expr: &[u8]) -> Result<()> {
        let address_type = self.address_type()?;

        self.location = Location::Memory;
        self.initialized = true;

        if self.recursion_depth > self.config.max_recursion_depth {
            return Err(ExprError::LocationLoopDetected {
                depth: self.recursion_depth,
            });
        }
        self.recursion_depth += 1;
        let result = self.execute_stack_op(expr, &address_type);
        self.recursion_depth -= 1;
        result
    }

    /// Evaluate a complete location expression and produce its value
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        expr: &[u8],
        as_lval: bool,
        cu: Option<CompUnit>,
        frame: Option<FrameRef>,
        addr_info: Option<ObjectAddressInfo>,
        ty: Option<Arc<Type>>,
        subobj_ty: Option<Arc<Type>>,
        subobj_offset: u64,
    ) -> Result<Value> {
        self.cu = cu;
        self.frame = frame;
        self.addr_info = addr_info;

        self.eval(expr)?;
        self.fetch_result(ty, subobj_ty, subobj_offset, as_lval)
    }

    fn require_frame(&self, op: &'static str) -> Result<FrameRef> {
        self.frame.ok_or(ExprError::MissingFrame { op })
    }

    fn require_cu(&self, op: &'static str) -> Result<CompUnit> {
        self.cu.ok_or(ExprError::MissingCompilationUnit { op })
    }

    fn base_type(&self, offset: u64) -> Result<Arc<Type>> {
        let Some(cu) = &self.cu else {
            return Ok(Type::int(4, false));
        };
        self.target
            .base_type(cu, UnitOffset(offset as usize))?
            .ok_or_else(|| ExprError::TypeError("Could not find type for operation".to_string()))
    }

    /// Read target memory, preferring the snapshot of the object being
    /// described when the request falls inside it
    fn read_mem(&self, buf: &mut [u8], address: u64) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if self.config.prefer_object_snapshot {
            if let Some(ObjectAddressInfo {
                addr,
                valaddr: Some(bytes),
            }) = &self.addr_info
            {
                let offset = address.wrapping_sub(*addr);
                let len = buf.len() as u64;
                if offset < bytes.len() as u64 && offset + len <= bytes.len() as u64 {
                    let start = offset as usize;
                    buf.copy_from_slice(&bytes[start..start + buf.len()]);
                    return Ok(());
                }
            }
        }
        self.target.read_memory(address, buf)
    }

    /// Value of a register taken as an address
    fn read_addr_from_reg(&self, frame: FrameRef, regnum: u64) -> Result<u64> {
        if !self.target.frame_is_valid(frame) {
            return Err(ExprError::FrameNotFound(frame));
        }
        let size = self.target.register_size(frame, regnum)?;
        let mut buf = vec![0u8; size];
        match self.target.read_register(frame, regnum, 0, &mut buf)? {
            RegisterStatus::Valid => {}
            RegisterStatus::OptimizedOut => {
                return Err(ExprError::OptimizedOut(format!(
                    "register {} was not saved",
                    regnum
                )))
            }
            RegisterStatus::Unavailable => {
                return Err(ExprError::NotAvailable(format!(
                    "register {} is not available",
                    regnum
                )))
            }
        }
        let raw = extract_unsigned(&buf, self.byte_order()) as u64;
        Ok(self.target.pointer_to_address(raw, false))
    }

    fn run_with_parked_stack<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let saved = self.stack.take();
        let result = f(self);
        self.stack = saved;
        result
    }

    fn run_in_caller<R>(
        &mut self,
        caller: FrameRef,
        caller_cu: CompUnit,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let saved = CallerScope {
            frame: self.frame.replace(caller),
            cu: self.cu.replace(caller_cu),
            addr_info: self.addr_info.take(),
            module: self.module,
            addr_size: self.addr_size,
            arch: self.arch,
        };
        self.module = caller_cu.module;
        self.addr_size = caller_cu.addr_size;
        self.arch = self.target.module_arch(caller_cu.module);

        let result = f(self);

        self.frame = saved.frame;
        self.cu = saved.cu;
        self.addr_info = saved.addr_info;
        self.module = saved.module;
        self.addr_size = saved.addr_size;
        self.arch = saved.arch;
        result
    }

    /// Evaluate the location of the DIE at `die` (DW_OP_call2/call4)
    fn dwarf_call(&mut self, die: UnitOffset<usize>) -> Result<()> {
        let cu = self.require_cu("DW_OP_call")?;
        let target = self.target;
        let frame = self.frame;
        let get_pc = move || -> Result<u64> {
            let frame = frame.ok_or(ExprError::MissingFrame { op: "DW_OP_call" })?;
            target.frame_pc(frame)
        };

        let block = self.target.die_location(&cu, die, &get_pc)?;
        debug!(
            "DW_OP_call to DIE 0x{:x}: {} byte expression",
            die.0,
            block.data.len()
        );
        self.eval(&block.data)
    }

    fn push_dwarf_reg_entry_value(
        &mut self,
        kind: CallSiteParameterKind,
        deref_size: Option<u8>,
    ) -> Result<()> {
        self.require_cu("DW_OP_entry_value")?;
        let frame = self.require_frame("DW_OP_entry_value")?;
        let (caller, parameter) = entry_parameter(self.target, &self.config, frame, &kind)?;

        let data = match deref_size {
            None => parameter.value,
            Some(_) => parameter.data_value,
        }
        .ok_or_else(|| {
            ExprError::NoEntryValue("Cannot resolve DW_AT_call_data_value".to_string())
        })?;

        self.run_in_caller(caller, parameter.cu, |ctx| ctx.eval(&data))
    }

    /// Value of the variable at `die` (DW_OP_GNU_variable_value)
    fn variable_value(&mut self, die: DebugInfoOffset<usize>) -> Result<Value> {
        let cu = self.require_cu("DW_OP_GNU_variable_value")?;
        let die_type = variable_value_type(self.target, &cu, die)?;

        if let Some(name) = &die_type.name {
            if let Some(value) = self.target.variable_value(name) {
                trace!("DW_OP_GNU_variable_value found {} by name", name);
                return value.fetched(self.target);
            }
        }

        let ptr_type = Type::pointer(die_type.ty.clone(), self.addr_size as usize);
        let frame = self.target.selected_frame().ok_or(ExprError::MissingFrame {
            op: "DW_OP_GNU_variable_value",
        })?;
        indirect_synthetic_pointer(
            self.target,
            &self.config,
            die,
            0,
            &cu,
            frame,
            &ptr_type,
            true,
            self.recursion_depth,
        )?
        .fetched(self.target)
    }

    /// Record a piece of `size` bits for the current location
    fn add_piece(&mut self, size: u64, offset: u64) -> Result<()> {
        if offset.checked_add(size).is_none() {
            return Err(ExprError::MalformedOperand(
                "DW_OP_bit_piece offset overflows".to_string(),
            ));
        }
        let location = if let Location::Literal(data) = &self.location {
            PieceLocation::Literal(data.clone())
        } else if self.stack.is_empty() {
            // An empty stack means the piece has no location at all
            self.location = Location::OptimizedOut;
            PieceLocation::OptimizedOut
        } else {
            match &self.location {
                Location::Memory => PieceLocation::Memory {
                    address: self.fetch_address(0)?,
                    in_stack_memory: self.fetch_in_stack_memory(0)?,
                },
                Location::ImplicitPointer(die) => PieceLocation::ImplicitPointer {
                    die: *die,
                    offset: self.fetch(0)?.as_long()?,
                },
                Location::Register(regno) => PieceLocation::Register(*regno),
                Location::Stack => PieceLocation::Stack(self.fetch(0)?),
                Location::Literal(_) | Location::OptimizedOut => PieceLocation::OptimizedOut,
            }
        };

        let piece = Piece {
            size,
            offset,
            location,
        };
        debug!("recorded piece {}", piece.describe(Some(self.arch)));
        self.pieces.push(piece);
        Ok(())
    }

    fn execute_stack_op(&mut self, expr: &[u8], address_type: &Arc<Type>) -> Result<()> {
        let mut cursor = ExprCursor::new(expr, self.byte_order());

        while !cursor.is_at_end() {
            if self.target.interrupted() {
                return Err(ExprError::Interrupted);
            }
            let at = cursor.pos();
            let op = DwOp(cursor.read_u8("opcode")?);
            trace!("{} at offset {} (stack depth {})", op, at, self.stack.len());

            if let Some(entry) = self.execute_op(op, &mut cursor, address_type)? {
                self.stack.push(entry.value, entry.in_stack_memory);
            }
        }

        // Implicit pointers are always handed back as a one-piece composite
        if matches!(self.location, Location::ImplicitPointer(_)) {
            self.add_piece(8 * u64::from(self.addr_size), 0)?;
        }
        Ok(())
    }

    fn execute_op(
        &mut self,
        op: DwOp,
        cursor: &mut ExprCursor<'_>,
        address_type: &Arc<Type>,
    ) -> Result<Option<StackEntry>> {
        let bo = self.byte_order();
        let addr = |v: u64| Value::from_ulongest(address_type.clone(), v, bo);

        if in_range(op, DW_OP_lit0, DW_OP_lit31) {
            return Ok(entry(addr(u64::from(op.0 - DW_OP_lit0.0)), false));
        }

        if in_range(op, DW_OP_reg0, DW_OP_reg31) {
            require_composition(cursor, op)?;
            let regno = u64::from(op.0 - DW_OP_reg0.0);
            self.location = Location::Register(regno);
            return Ok(entry(addr(regno), false));
        }

        if in_range(op, DW_OP_breg0, DW_OP_breg31) {
            let offset = cursor.read_sleb128("DW_OP_breg offset")?;
            let frame = self.require_frame("DW_OP_breg")?;
            let base = self.read_addr_from_reg(frame, u64::from(op.0 - DW_OP_breg0.0))?;
            return Ok(entry(addr(base.wrapping_add(offset as u64)), false));
        }

        let result = match op {
            DW_OP_addr => {
                let mut value = cursor.read_unsigned(self.addr_size, "DW_OP_addr operand")?;
                // An address feeding DW_OP_GNU_push_tls_address is a TLS offset
                if cursor.peek_u8() != Some(DW_OP_GNU_push_tls_address.0) {
                    value = value.wrapping_add(self.target.relocation_offset(self.module));
                }
                entry(addr(value), false)
            }

            DW_OP_addrx | DW_OP_GNU_addr_index => {
                let cu = self.require_cu("DW_OP_addrx")?;
                let index = cursor.read_uleb128("DW_OP_addrx index")?;
                let value = self
                    .target
                    .read_addr_index(&cu, index)?
                    .wrapping_add(self.target.relocation_offset(self.module));
                entry(addr(value), false)
            }

            DW_OP_constx | DW_OP_GNU_const_index => {
                let cu = self.require_cu("DW_OP_GNU_const_index")?;
                let index = cursor.read_uleb128("DW_OP_GNU_const_index index")?;
                entry(addr(self.target.read_addr_index(&cu, index)?), false)
            }

            DW_OP_const1u => entry(addr(cursor.read_unsigned(1, "DW_OP_const1u")?), false),
            DW_OP_const1s => entry(addr(cursor.read_signed(1, "DW_OP_const1s")? as u64), false),
            DW_OP_const2u => entry(addr(cursor.read_unsigned(2, "DW_OP_const2u")?), false),
            DW_OP_const2s => entry(addr(cursor.read_signed(2, "DW_OP_const2s")? as u64), false),
            DW_OP_const4u => entry(addr(cursor.read_unsigned(4, "DW_OP_const4u")?), false),
            DW_OP_const4s => entry(addr(cursor.read_signed(4, "DW_OP_const4s")? as u64), false),
            DW_OP_const8u => entry(addr(cursor.read_unsigned(8, "DW_OP_const8u")?), false),
            DW_OP_const8s => entry(addr(cursor.read_signed(8, "DW_OP_const8s")? as u64), false),
            DW_OP_constu => entry(addr(cursor.read_uleb128("DW_OP_constu")?), false),
            DW_OP_consts => entry(addr(cursor.read_sleb128("DW_OP_consts")? as u64), false),

            DW_OP_regx => {
                let regno = cursor.read_uleb128("DW_OP_regx register")?;
                require_composition(cursor, op)?;
                self.location = Location::Register(regno);
                entry(addr(regno), false)
            }

            DW_OP_implicit_value => {
                let len = cursor.read_uleb128("DW_OP_implicit_value length")?;
                let len = usize::try_from(len).map_err(|_| {
                    ExprError::MalformedOperand(
                        "DW_OP_implicit_value: too few bytes available.".to_string(),
                    )
                })?;
                let data = cursor.read_bytes(len, "DW_OP_implicit_value data")?;
                self.location = Location::Literal(Arc::from(data));
                require_composition(cursor, op)?;
                None
            }

            DW_OP_stack_value => {
                self.location = Location::Stack;
                require_composition(cursor, op)?;
                None
            }

            DW_OP_implicit_pointer | DW_OP_GNU_implicit_pointer => {
                let cu = self.require_cu("DW_OP_implicit_pointer")?;
                let die = cursor.read_unsigned(cu.ref_addr_size, "DW_OP_implicit_pointer DIE")?;
                let offset = cursor.read_sleb128("DW_OP_implicit_pointer offset")?;
                self.location = Location::ImplicitPointer(DebugInfoOffset(die as usize));
                require_composition(cursor, op)?;
                entry(addr(offset as u64), false)
            }

            DW_OP_bregx => {
                let regno = cursor.read_uleb128("DW_OP_bregx register")?;
                let offset = cursor.read_sleb128("DW_OP_bregx offset")?;
                let frame = self.require_frame("DW_OP_bregx")?;
                let base = self.read_addr_from_reg(frame, regno)?;
                entry(addr(base.wrapping_add(offset as u64)), false)
            }

            DW_OP_fbreg => {
                let offset = cursor.read_sleb128("DW_OP_fbreg offset")?;
                let frame = self.require_frame("DW_OP_fbreg")?;
                let block = self.target.frame_base_expression(frame)?;

                let base = self.run_with_parked_stack(|ctx| {
                    ctx.eval(&block.data)?;
                    match ctx.location {
                        Location::Memory => ctx.fetch_address(0),
                        Location::Register(_) => {
                            let regno = ctx.fetch(0)?.as_long()? as u64;
                            ctx.read_addr_from_reg(frame, regno)
                        }
                        _ => Err(ExprError::MalformedOperand(
                            "Not implemented: computing frame base using explicit value operator"
                                .to_string(),
                        )),
                    }
                })?;
                self.location = Location::Memory;
                entry(addr(base.wrapping_add(offset as u64)), true)
            }

            DW_OP_dup => Some(self.stack.fetch(0)?.clone()),

            DW_OP_drop => {
                self.pop()?;
                None
            }

            DW_OP_pick => {
                let index = cursor.read_u8("DW_OP_pick index")?;
                Some(self.stack.fetch(index as usize)?.clone())
            }

            DW_OP_swap => {
                self.stack.swap()?;
                None
            }

            DW_OP_over => Some(self.stack.fetch(1)?.clone()),

            DW_OP_rot => {
                self.stack.rot()?;
                None
            }

            DW_OP_deref | DW_OP_deref_size | DW_OP_deref_type | DW_OP_GNU_deref_type => {
                let size = if op == DW_OP_deref {
                    self.addr_size
                } else {
                    cursor.read_u8("dereference size")?
                };
                let address = self.pop_address()?;

                let ty = if op == DW_OP_deref_type || op == DW_OP_GNU_deref_type {
                    let offset = cursor.read_uleb128("dereference type offset")?;
                    self.base_type(offset)?
                } else {
                    address_type.clone()
                };

                let mut buf = vec![0u8; size as usize];
                self.read_mem(&mut buf, address)?;

                // Zero-extend (or truncate) to the result type
                if ty.length != buf.len() {
                    if buf.len() > 16 {
                        return Err(ExprError::TypeError(
                            "That operation is not available on integers of more than 16 bytes."
                                .to_string(),
                        ));
                    }
                    let datum = extract_unsigned(&buf, bo);
                    buf = vec![0u8; ty.length];
                    store_unsigned(&mut buf, bo, datum);
                }
                entry(Value::from_bytes(ty, &buf, bo), false)
            }

            DW_OP_abs | DW_OP_neg | DW_OP_not | DW_OP_plus_uconst => {
                let value = self.pop_value()?;
                let result = match op {
                    DW_OP_abs => {
                        let zero = Value::allocate(value.ty().clone(), bo);
                        if value.less_than(&zero)? {
                            value.neg()?
                        } else {
                            (*value).clone()
                        }
                    }
                    DW_OP_neg => value.neg()?,
                    DW_OP_not => {
                        require_integral(value.ty())?;
                        value.complement()?
                    }
                    _ => {
                        require_integral(value.ty())?;
                        let base = value.as_long()? as u64;
                        let addend = cursor.read_uleb128("DW_OP_plus_uconst operand")?;
                        addr(base.wrapping_add(addend))
                    }
                };
                entry(result, false)
            }

            DW_OP_and | DW_OP_div | DW_OP_minus | DW_OP_mod | DW_OP_mul | DW_OP_or
            | DW_OP_plus | DW_OP_shl | DW_OP_shr | DW_OP_shra | DW_OP_xor | DW_OP_le
            | DW_OP_ge | DW_OP_eq | DW_OP_lt | DW_OP_gt | DW_OP_ne => {
                let second = self.pop_value()?;
                let first = self.pop_value()?;
                entry(self.binary_op(op, &first, &second, address_type)?, false)
            }

            DW_OP_call_frame_cfa => {
                let frame = self.require_frame("DW_OP_call_frame_cfa")?;
                entry(addr(self.target.call_frame_cfa(frame)?), true)
            }

            DW_OP_GNU_push_tls_address | DW_OP_form_tls_address => {
                let offset = self.pop_value()?.as_long()? as u64;
                let address = self.target.translate_tls_address(self.module, offset)?;
                entry(addr(address), false)
            }

            DW_OP_skip => {
                let offset = cursor.read_signed(2, "DW_OP_skip offset")?;
                cursor.jump(offset)?;
                None
            }

            DW_OP_bra => {
                let offset = cursor.read_signed(2, "DW_OP_bra offset")?;
                let value = self.pop_value()?;
                require_integral(value.ty())?;
                if value.as_long()? != 0 {
                    cursor.jump(offset)?;
                }
                None
            }

            DW_OP_nop => None,

            DW_OP_piece | DW_OP_bit_piece => {
                let (size, offset) = if op == DW_OP_piece {
                    let bytes = cursor.read_uleb128("DW_OP_piece size")?;
                    let bits = bytes.checked_mul(8).ok_or_else(|| {
                        ExprError::MalformedOperand("DW_OP_piece size overflows".to_string())
                    })?;
                    (bits, 0)
                } else {
                    let bits = cursor.read_uleb128("DW_OP_bit_piece size")?;
                    let offset = cursor.read_uleb128("DW_OP_bit_piece offset")?;
                    (bits, offset)
                };
                self.add_piece(size, offset)?;

                if !matches!(self.location, Location::Literal(_) | Location::OptimizedOut) {
                    self.pop()?;
                }
                self.location = Location::Memory;
                None
            }

            DW_OP_GNU_uninit => {
                require_composition(cursor, op)?;
                self.initialized = false;
                None
            }

            DW_OP_call2 | DW_OP_call4 => {
                let size = if op == DW_OP_call2 { 2 } else { 4 };
                let die = cursor.read_unsigned(size, "DW_OP_call DIE offset")?;
                self.dwarf_call(UnitOffset(die as usize))?;
                None
            }

            DW_OP_GNU_variable_value => {
                let cu = self.require_cu("DW_OP_GNU_variable_value")?;
                let die = cursor.read_unsigned(cu.ref_addr_size, "DW_OP_GNU_variable_value DIE")?;
                let value = self.variable_value(DebugInfoOffset(die as usize))?;
                entry(value.cast(address_type)?, false)
            }

            DW_OP_entry_value | DW_OP_GNU_entry_value => {
                let len = cursor.read_uleb128("DW_OP_entry_value length")?;
                let block = usize::try_from(len)
                    .ok()
                    .and_then(|len| cursor.read_bytes(len, "DW_OP_entry_value block").ok())
                    .ok_or_else(|| {
                        ExprError::MalformedOperand(
                            "DW_OP_entry_value: too few bytes available.".to_string(),
                        )
                    })?;

                if let Some(regno) = block_to_dwarf_reg(block) {
                    self.push_dwarf_reg_entry_value(CallSiteParameterKind::DwarfReg(regno), None)?;
                } else if let Some((regno, size)) = block_to_dwarf_reg_deref(block) {
                    let size = size.unwrap_or(self.addr_size);
                    self.push_dwarf_reg_entry_value(
                        CallSiteParameterKind::DwarfReg(regno),
                        Some(size),
                    )?;
                } else {
                    return Err(ExprError::MalformedOperand(
                        "DW_OP_entry_value is supported only for single DW_OP_reg* \
                         or for DW_OP_breg*(0)+DW_OP_deref*"
                            .to_string(),
                    ));
                }
                None
            }

            DW_OP_GNU_parameter_ref => {
                let offset = cursor.read_unsigned(4, "DW_OP_GNU_parameter_ref offset")?;
                self.push_dwarf_reg_entry_value(
                    CallSiteParameterKind::ParamOffset(UnitOffset(offset as usize)),
                    None,
                )?;
                None
            }

            DW_OP_const_type | DW_OP_GNU_const_type => {
                let type_offset = cursor.read_uleb128("DW_OP_const_type type offset")?;
                let n = cursor.read_u8("DW_OP_const_type size")?;
                let data = cursor.read_bytes(n as usize, "DW_OP_const_type data")?;
                let ty = self.base_type(type_offset)?;
                if ty.length != n as usize {
                    return Err(ExprError::TypeError(
                        "DW_OP_const_type has different sizes for type and data".to_string(),
                    ));
                }
                entry(Value::from_bytes(ty, data, bo), false)
            }

            DW_OP_regval_type | DW_OP_GNU_regval_type => {
                let regno = cursor.read_uleb128("DW_OP_regval_type register")?;
                let type_offset = cursor.read_uleb128("DW_OP_regval_type type offset")?;
                let frame = self.require_frame("DW_OP_regval_type")?;
                let ty = self.base_type(type_offset)?;
                entry(Value::from_register(ty, frame, regno, self.target, bo)?, false)
            }

            DW_OP_convert | DW_OP_GNU_convert | DW_OP_reinterpret | DW_OP_GNU_reinterpret => {
                let type_offset = cursor.read_uleb128("conversion type offset")?;
                let ty = if type_offset == 0 {
                    address_type.clone()
                } else {
                    self.base_type(type_offset)?
                };
                let value = self.pop_value()?;

                let result = if op == DW_OP_convert || op == DW_OP_GNU_convert {
                    value.cast(&ty)?
                } else if ty.as_ref() == value.ty().as_ref() {
                    (*value).clone()
                } else if ty.length != value.ty().length {
                    return Err(ExprError::TypeError(
                        "DW_OP_reinterpret has wrong size".to_string(),
                    ));
                } else {
                    value.reinterpret(&ty)?
                };
                entry(result, false)
            }

            DW_OP_push_object_address => match &self.addr_info {
                Some(info) if info.valaddr.is_some() || info.addr != 0 => {
                    entry(addr(info.addr), false)
                }
                _ => return Err(ExprError::MissingObjectAddress),
            },

            _ => return Err(ExprError::UnsupportedOpcode { opcode: op.0 }),
        };
        Ok(result)
    }

    fn binary_op(
        &self,
        op: DwOp,
        first: &Value,
        second: &Value,
        address_type: &Arc<Type>,
    ) -> Result<Value> {
        if !first.ty().base_types_equal(second.ty()) {
            return Err(ExprError::IncompatibleStackTypes);
        }
        let bo = self.byte_order();
        let truth = |b: bool| Value::from_ulongest(address_type.clone(), u64::from(b), bo);
        let integral = || -> Result<()> {
            require_integral(first.ty())?;
            require_integral(second.ty())
        };

        Ok(match op {
            DW_OP_and => {
                integral()?;
                first.binop(second, BinOp::BitAnd)?
            }
            DW_OP_or => {
                integral()?;
                first.binop(second, BinOp::BitOr)?
            }
            DW_OP_xor => {
                integral()?;
                first.binop(second, BinOp::BitXor)?
            }
            DW_OP_div => first.binop(second, BinOp::Div)?,
            DW_OP_minus => first.binop(second, BinOp::Sub)?,
            DW_OP_mul => first.binop(second, BinOp::Mul)?,
            DW_OP_plus => first.binop(second, BinOp::Add)?,
            DW_OP_mod => {
                // Untyped values take the modulus in unsigned arithmetic
                if first.ty().is_generic() {
                    let utype = first.ty().unsigned_variant();
                    first
                        .cast(&utype)?
                        .binop(&second.cast(&utype)?, BinOp::Mod)?
                        .cast(first.ty())?
                } else {
                    first.binop(second, BinOp::Mod)?
                }
            }
            DW_OP_shl => {
                integral()?;
                first.binop(second, BinOp::Shl)?
            }
            DW_OP_shr | DW_OP_shra => {
                integral()?;
                let shifted_ty = if op == DW_OP_shr {
                    first.ty().unsigned_variant()
                } else {
                    first.ty().signed_variant()
                };
                let result = first.cast(&shifted_ty)?.binop(second, BinOp::Shr)?;
                if result.ty().as_ref() != second.ty().as_ref() {
                    result.cast(second.ty())?
                } else {
                    result
                }
            }
            DW_OP_le => truth(!second.less_than(first)?),
            DW_OP_ge => truth(!first.less_than(second)?),
            DW_OP_eq => truth(first.equal(second)?),
            DW_OP_lt => truth(first.less_than(second)?),
            DW_OP_gt => truth(second.less_than(first)?),
            DW_OP_ne => truth(!first.equal(second)?),
            _ => return Err(ExprError::UnsupportedOpcode { opcode: op.0 }),
        })
    }

    /// Turn the final machine state into a value of `ty`
    ///
    /// With `subobj_ty`, the result is the component of that type at
    /// `subobj_offset` bytes into the object. With `as_lval` false, the
    /// top of stack is taken as the value itself.
    pub fn fetch_result(
        &mut self,
        ty: Option<Arc<Type>>,
        subobj_ty: Option<Arc<Type>>,
        subobj_offset: u64,
        as_lval: bool,
    ) -> Result<Value> {
        let ty = match ty {
            Some(ty) => ty,
            None => self.address_type()?,
        };
        let subobj_ty = subobj_ty.unwrap_or_else(|| ty.clone());
        let bo = self.byte_order();

        let mut retval = if !self.pieces.is_empty() {
            let bit_size = self
                .pieces
                .iter()
                .try_fold(0u64, |acc, p| acc.checked_add(p.size))
                .ok_or_else(|| {
                    ExprError::MalformedOperand("total size of pieces overflows".to_string())
                })?;
            if bit_size > 8 * ty.length as u64 {
                return Err(invalid_synthetic_pointer());
            }
            let closure = PieceClosure::new(
                self.cu,
                self.module,
                std::mem::take(&mut self.pieces),
                self.frame,
                self.arch,
                self.config.clone(),
            );
            let mut value = Value::computed(subobj_ty, Arc::new(closure), bo);
            value.set_offset(subobj_offset);
            value
        } else {
            if !as_lval {
                self.location = Location::Stack;
            }

            match &self.location {
                Location::Register(_) => {
                    let regno = self.fetch(0)?.as_long()? as u64;
                    if subobj_offset != 0 {
                        return Err(ExprError::InvalidSyntheticPointerUse(
                            "cannot use offset on synthetic pointer to register".to_string(),
                        ));
                    }
                    let frame = self.require_frame("DW_OP_reg")?;
                    let value = Value::from_register(subobj_ty, frame, regno, self.target, bo)?;
                    // A register with any unsaved bits reads as a plain
                    // optimized-out value
                    if value.bits_any_optimized_out(0, 8 * value.ty().length as u64) {
                        value.to_not_lval()
                    } else {
                        value
                    }
                }
                Location::Memory => {
                    let address = self.fetch_address(0)?;
                    let in_stack_memory = self.fetch_in_stack_memory(0)?;
                    let address = self.target.pointer_to_address(address, subobj_ty.is_code());
                    let mut value =
                        Value::at_lazy(subobj_ty, address.wrapping_add(subobj_offset), bo);
                    if in_stack_memory {
                        value.set_stack(true);
                    }
                    value
                }
                Location::Stack => {
                    let top = self.fetch(0)?;
                    let n = top.ty().length as u64;
                    let len = subobj_ty.length as u64;
                    let max = ty.length as u64;
                    if subobj_offset + len > max {
                        return Err(invalid_synthetic_pointer());
                    }
                    // Offsets count from the object's start, which is the
                    // low-order end of the stack value on big-endian targets
                    let start = if bo == RunTimeEndian::Big {
                        (subobj_offset + n)
                            .checked_sub(max)
                            .ok_or_else(invalid_synthetic_pointer)?
                    } else {
                        subobj_offset
                    };
                    let contents = top.contents()?;
                    let bytes = contents
                        .get(start as usize..(start + len) as usize)
                        .ok_or_else(invalid_synthetic_pointer)?;
                    Value::from_bytes(subobj_ty, bytes, bo)
                }
                Location::Literal(data) => {
                    let n = subobj_ty.length;
                    let start = subobj_offset as usize;
                    let bytes = data
                        .get(start..start + n)
                        .ok_or_else(invalid_synthetic_pointer)?;
                    Value::from_bytes(subobj_ty, bytes, bo)
                }
                Location::OptimizedOut => Value::allocate_optimized_out(subobj_ty, bo),
                Location::ImplicitPointer(_) => {
                    return Err(ExprError::MalformedOperand(
                        "invalid location type".to_string(),
                    ))
                }
            }
        };

        retval.set_initialized(self.initialized);
        Ok(retval)
    }
}

/// Call-site parameter matching `kind` at the call that created `frame`,
/// together with the caller frame it must be evaluated in
pub(crate) fn entry_parameter(
    target: &dyn Target,
    config: &EvalConfig,
    frame: FrameRef,
    kind: &CallSiteParameterKind,
) -> Result<(FrameRef, CallSiteParameter)> {
    let caller = target.prev_frame(frame).ok_or_else(|| {
        ExprError::NoEntryValue(format!(
            "DW_OP_entry_value resolving requires caller of {frame}"
        ))
    })?;
    let parameter = target.call_site_parameter(frame, caller, kind)?;
    if config.entry_values_debug {
        info!(
            "entry value of {} in {} resolved at call site in {}",
            kind, frame, caller
        );
    }
    Ok((caller, parameter))
}

/// Type of the DIE named by DW_OP_GNU_variable_value, which must be an
/// integer or a pointer
pub(crate) fn variable_value_type(
    target: &dyn Target,
    cu: &CompUnit,
    die: DebugInfoOffset<usize>,
) -> Result<DieType> {
    let die_type = target.die_type(cu, die)?.ok_or_else(|| {
        ExprError::MalformedOperand("Bad DW_OP_GNU_variable_value DIE.".to_string())
    })?;
    if !matches!(
        die_type.ty.code,
        TypeCode::Int | TypeCode::Enum | TypeCode::Range | TypeCode::Ptr
    ) {
        return Err(ExprError::TypeError(
            "Type of DW_OP_GNU_variable_value DIE must be an integer or pointer.".to_string(),
        ));
    }
    Ok(die_type)
}

pub(crate) fn invalid_synthetic_pointer() -> ExprError {
    ExprError::InvalidSyntheticPointerUse(
        "access outside bounds of object referenced via synthetic pointer".to_string(),
    )
}
