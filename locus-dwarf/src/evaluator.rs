//! Location evaluator
//!
//! Top-level entry points that run a location expression for a variable
//! and turn evaluation failures that describe missing data into values
//! marked unavailable or optimized out.

use crate::core::{
    CallSiteParameterKind, CompUnit, EvalConfig, ExprError, FrameRef, LocExprBlock,
    ObjectAddressInfo, Result,
};
use crate::expr::blocks::{block_to_dwarf_reg, block_to_fb_offset};
use crate::expr::context::{entry_parameter, invalid_synthetic_pointer, ExprContext};
use crate::expr::needs::{symbol_needs, SymbolNeeds};
use crate::target::Target;
use crate::value::{Lval, Type, Value};
use gimli::constants::DW_OP_stack_value;
use gimli::DebugInfoOffset;
use std::sync::Arc;
use tracing::{debug, info};

/// Address produced by [`LocationEvaluator::evaluate_address`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatedAddress {
    pub address: u64,
    /// Cleared when the expression computed the address as a plain value
    pub is_reference: bool,
}

/// Evaluates DWARF location expressions against a [`Target`]
#[derive(Debug, Clone, Default)]
pub struct LocationEvaluator {
    config: Arc<EvalConfig>,
}

impl LocationEvaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Value of a variable of type `ty` whose location is `block`
    ///
    /// With `as_lval` false the expression's result is taken as the
    /// value itself rather than its address.
    pub fn evaluate_loc_desc(
        &self,
        target: &dyn Target,
        ty: &Arc<Type>,
        frame: Option<FrameRef>,
        block: &LocExprBlock,
        as_lval: bool,
    ) -> Result<Value> {
        evaluate_loc_desc_full(target, &self.config, ty, frame, block, None, 0, as_lval, 0)
    }

    /// Like [`Self::evaluate_loc_desc`], returning the component of type
    /// `subobj_ty` at `subobj_byte_offset` bytes into the variable
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate_loc_desc_full(
        &self,
        target: &dyn Target,
        ty: &Arc<Type>,
        frame: Option<FrameRef>,
        block: &LocExprBlock,
        subobj_ty: Option<Arc<Type>>,
        subobj_byte_offset: i64,
        as_lval: bool,
    ) -> Result<Value> {
        evaluate_loc_desc_full(
            target,
            &self.config,
            ty,
            frame,
            block,
            subobj_ty,
            subobj_byte_offset,
            as_lval,
            0,
        )
    }

    /// Evaluate an expression expected to produce a single address, such
    /// as a dynamic array bound or data location
    ///
    /// `push_values` are pushed in order before evaluation starts.
    /// Returns `None` when the address cannot be determined.
    pub fn evaluate_address(
        &self,
        target: &dyn Target,
        block: &LocExprBlock,
        frame: Option<FrameRef>,
        addr_info: Option<ObjectAddressInfo>,
        push_values: &[u64],
        is_reference: bool,
    ) -> Result<Option<EvaluatedAddress>> {
        if block.data.is_empty() {
            return Ok(None);
        }

        let cu = block.cu;
        let mut ctx = ExprContext::new(target, cu.module, cu.addr_size, self.config.clone());
        for value in push_values {
            ctx.push_address(*value, false)?;
        }

        let result = match ctx.evaluate(&block.data, true, Some(cu), frame, addr_info, None, None, 0)
        {
            Ok(result) => result,
            Err(ExprError::NotAvailable(msg)) => {
                debug!("address expression unavailable: {}", msg);
                return Ok(None);
            }
            Err(ExprError::NoEntryValue(msg)) => {
                if self.config.entry_values_debug {
                    info!("{}", msg);
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if result.is_optimized_out(target)? {
            return Ok(None);
        }

        if let Lval::Memory { address } = result.lval() {
            return Ok(Some(EvaluatedAddress {
                address: *address,
                is_reference,
            }));
        }

        let is_reference = is_reference && !matches!(result.lval(), Lval::NotLval);
        let address = result.fetched(target)?.as_address()?;
        Ok(Some(EvaluatedAddress {
            address,
            is_reference,
        }))
    }

    /// Whether reading a symbol located by `block` needs a frame,
    /// registers only, or neither
    pub fn symbol_needs(&self, target: &dyn Target, block: &LocExprBlock) -> Result<SymbolNeeds> {
        symbol_needs(target, &self.config, block)
    }

    /// Value a parameter of type `ty` had on entry to the function
    /// running in `frame`, where `block` is the parameter's location
    ///
    /// Only a single register or a frame-base offset can be matched
    /// against the call site.
    pub fn read_variable_at_entry(
        &self,
        target: &dyn Target,
        ty: &Arc<Type>,
        frame: FrameRef,
        block: &LocExprBlock,
    ) -> Result<Value> {
        if block.data.is_empty() {
            let byte_order = target.module_arch(block.cu.module).byte_order();
            return Ok(Value::allocate_optimized_out(ty.clone(), byte_order));
        }

        let kind = if let Some(reg) = block_to_dwarf_reg(&block.data) {
            CallSiteParameterKind::DwarfReg(reg)
        } else if let Some(offset) = block_to_fb_offset(&block.data) {
            CallSiteParameterKind::FbOffset(offset)
        } else {
            return Err(ExprError::NoEntryValue(
                "DW_OP_entry_value is supported only for single DW_OP_reg* or for DW_OP_fbreg(*)"
                    .to_string(),
            ));
        };
        self.value_of_reg_entry(target, ty, frame, kind)
    }

    /// Value of the call-site parameter `kind` for the call that created
    /// `frame`, computed in the caller
    pub fn value_of_reg_entry(
        &self,
        target: &dyn Target,
        ty: &Arc<Type>,
        frame: FrameRef,
        kind: CallSiteParameterKind,
    ) -> Result<Value> {
        let (caller, parameter) = entry_parameter(target, &self.config, frame, &kind)?;
        let value = parameter.value.ok_or_else(|| {
            ExprError::NoEntryValue("Cannot resolve DW_AT_call_value".to_string())
        })?;

        let mut data = value.to_vec();
        data.push(DW_OP_stack_value.0);
        let block = LocExprBlock::new(data, parameter.cu);
        debug!("entry value of {} read in caller {}", kind, caller);
        evaluate_loc_desc_full(target, &self.config, ty, Some(caller), &block, None, 0, true, 0)
    }

    /// Dereference an implicit pointer to the DIE at `die`
    pub fn indirect_synthetic_pointer(
        &self,
        target: &dyn Target,
        die: DebugInfoOffset<usize>,
        byte_offset: i64,
        cu: &CompUnit,
        frame: FrameRef,
        pointer_ty: &Arc<Type>,
    ) -> Result<Value> {
        indirect_synthetic_pointer(
            target,
            &self.config,
            die,
            byte_offset,
            cu,
            frame,
            pointer_ty,
            false,
            0,
        )
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn evaluate_loc_desc_full(
    target: &dyn Target,
    config: &Arc<EvalConfig>,
    ty: &Arc<Type>,
    frame: Option<FrameRef>,
    block: &LocExprBlock,
    subobj_ty: Option<Arc<Type>>,
    subobj_byte_offset: i64,
    as_lval: bool,
    recursion_depth: u32,
) -> Result<Value> {
    let (subobj_ty, subobj_byte_offset) = match subobj_ty {
        None => (ty.clone(), 0),
        Some(_) if subobj_byte_offset < 0 => return Err(invalid_synthetic_pointer()),
        Some(subobj_ty) => (subobj_ty, subobj_byte_offset as u64),
    };

    let cu = block.cu;
    let byte_order = target.module_arch(cu.module).byte_order();
    if block.data.is_empty() {
        return Ok(Value::allocate_optimized_out(subobj_ty, byte_order));
    }

    let mut ctx = ExprContext::new(target, cu.module, cu.addr_size, config.clone())
        .with_recursion_depth(recursion_depth);
    let result = ctx.evaluate(
        &block.data,
        as_lval,
        Some(cu),
        frame,
        None,
        Some(ty.clone()),
        Some(subobj_ty.clone()),
        subobj_byte_offset,
    );

    match result {
        Ok(value) => Ok(value),
        Err(ExprError::NotAvailable(msg)) => {
            debug!("location unavailable: {}", msg);
            let mut value = Value::allocate(subobj_ty, byte_order);
            let len = value.ty().length as u64;
            value.mark_bytes_unavailable(0, len);
            Ok(value)
        }
        Err(ExprError::NoEntryValue(msg)) => {
            if config.entry_values_debug {
                info!("{}", msg);
            }
            Ok(Value::allocate_optimized_out(subobj_ty, byte_order))
        }
        Err(e) => Err(e),
    }
}

/// Value an implicit pointer of type `ty` points at: the pointed-to DIE's
/// location if it has one, else its constant value, else optimized out
///
/// `recursion_depth` is the depth of the evaluation that reached this
/// DIE, so a location that refers back to itself still hits the limit.
#[allow(clippy::too_many_arguments)]
pub(crate) fn indirect_synthetic_pointer(
    target: &dyn Target,
    config: &Arc<EvalConfig>,
    die: DebugInfoOffset<usize>,
    byte_offset: i64,
    cu: &CompUnit,
    frame: FrameRef,
    ty: &Arc<Type>,
    resolve_abstract_origin: bool,
    recursion_depth: u32,
) -> Result<Value> {
    let get_pc = || target.frame_pc(frame);
    let block = target.die_location_at(cu, die, &get_pc, resolve_abstract_origin)?;

    let orig_ty = target
        .die_type(cu, die)?
        .ok_or_else(invalid_synthetic_pointer)?
        .ty;
    let pointee = ty.target.clone().ok_or_else(invalid_synthetic_pointer)?;
    let byte_order = target.module_arch(cu.module).byte_order();

    if let Some(block) = block {
        debug!(
            "synthetic pointer to DIE 0x{:x} has a location, offset {}",
            die.0, byte_offset
        );
        return evaluate_loc_desc_full(
            target,
            config,
            &orig_ty,
            Some(frame),
            &block,
            Some(pointee),
            byte_offset,
            true,
            recursion_depth,
        );
    }

    match target.die_constant_bytes(cu, die)? {
        Some(bytes) => {
            let start = usize::try_from(byte_offset).map_err(|_| invalid_synthetic_pointer())?;
            let slice = start
                .checked_add(pointee.length)
                .and_then(|end| bytes.get(start..end))
                .ok_or_else(invalid_synthetic_pointer)?;
            Ok(Value::from_bytes(pointee, slice, byte_order))
        }
        None => Ok(Value::allocate_optimized_out(pointee, byte_order)),
    }
}
