#![allow(clippy::uninlined_format_args)]
#![allow(dead_code)]

//! Common test utilities shared across integration tests
//!
//! [`MockTarget`] stands in for a live inferior: registers per frame with
//! generation counters, byte-addressed memory and small debug-info tables.

use locus_dwarf::core::{
    CallSiteParameter, CallSiteParameterKind, CompUnit, ExprError, FrameRef, LocExprBlock,
    ModuleId, Result,
};
use locus_dwarf::target::{DebugInfo, DieType, FrameAccess, MemoryAccess, RegisterStatus, Target};
use locus_dwarf::value::{Type, Value};
use locus_dwarf::{DebugInfoOffset, UnitOffset};
use locus_platform::{dwarf_reg_size, Arch};
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Initialize logging for tests (call once per test)
///
/// Output is off unless `RUST_LOG` asks for it.
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn uleb(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn sleb(mut value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Concatenate expression fragments
pub fn expr(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

/// Unit used by most tests: 8-byte addresses, DWARF32 references
pub fn test_cu() -> CompUnit {
    CompUnit::new(0, ModuleId(0), 8, 4)
}

pub fn block(data: &[u8]) -> LocExprBlock {
    LocExprBlock::new(data.to_vec(), test_cu())
}

#[derive(Debug, Clone)]
pub struct MockFrame {
    pub generation: u64,
    pub registers: HashMap<u64, Vec<u8>>,
    pub register_status: HashMap<u64, RegisterStatus>,
    pub cfa: u64,
    pub pc: u64,
    pub frame_base: Option<Vec<u8>>,
    pub caller: Option<u64>,
}

impl MockFrame {
    fn new() -> Self {
        Self {
            generation: 0,
            registers: HashMap::new(),
            register_status: HashMap::new(),
            cfa: 0,
            pc: 0,
            frame_base: None,
            caller: None,
        }
    }
}

pub struct MockTarget {
    pub arch: Arch,
    pub frames: HashMap<u64, MockFrame>,
    pub memory: BTreeMap<u64, u8>,
    pub unavailable_memory: HashSet<u64>,
    pub relocation: u64,
    pub addr_table: Vec<u64>,
    pub tls_base: Option<u64>,
    /// DW_OP_call targets by unit offset
    pub procedures: HashMap<usize, Vec<u8>>,
    /// DIEs whose location list must consult the frame's PC
    pub pc_dependent_dies: HashSet<usize>,
    /// Locations of DIEs named by section offset
    pub die_locations: HashMap<usize, Vec<u8>>,
    pub die_constants: HashMap<usize, Vec<u8>>,
    pub die_types: HashMap<usize, DieType>,
    pub base_types: HashMap<usize, Arc<Type>>,
    pub call_site_params: Vec<(CallSiteParameterKind, CallSiteParameter)>,
    pub variables: HashMap<String, Value>,
    pub selected: Option<FrameRef>,
    pub interrupt_after: Cell<Option<u32>>,
}

impl MockTarget {
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            frames: HashMap::new(),
            memory: BTreeMap::new(),
            unavailable_memory: HashSet::new(),
            relocation: 0,
            addr_table: Vec::new(),
            tls_base: None,
            procedures: HashMap::new(),
            pc_dependent_dies: HashSet::new(),
            die_locations: HashMap::new(),
            die_constants: HashMap::new(),
            die_types: HashMap::new(),
            base_types: HashMap::new(),
            call_site_params: Vec::new(),
            variables: HashMap::new(),
            selected: None,
            interrupt_after: Cell::new(None),
        }
    }

    pub fn x86_64() -> Self {
        Self::new(Arch::X86_64)
    }

    /// Add a frame and return its handle; the first frame becomes selected
    pub fn add_frame(&mut self, id: u64) -> FrameRef {
        self.frames.insert(id, MockFrame::new());
        let frame = FrameRef::new(id, 0);
        if self.selected.is_none() {
            self.selected = Some(frame);
        }
        frame
    }

    pub fn frame_mut(&mut self, frame: FrameRef) -> &mut MockFrame {
        self.frames.get_mut(&frame.id).expect("unknown mock frame")
    }

    pub fn frame(&self, frame: FrameRef) -> &MockFrame {
        self.frames.get(&frame.id).expect("unknown mock frame")
    }

    pub fn set_caller(&mut self, frame: FrameRef, caller: FrameRef) {
        self.frame_mut(frame).caller = Some(caller.id);
    }

    /// Store a full-width register value in target byte order
    pub fn set_register(&mut self, frame: FrameRef, regnum: u64, value: u64) {
        let size = dwarf_reg_size(self.arch, regnum as u16).unwrap_or(8);
        let mut bytes = vec![0u8; size];
        let raw = match self.arch.byte_order() {
            locus_dwarf::RunTimeEndian::Little => value.to_le_bytes(),
            locus_dwarf::RunTimeEndian::Big => value.to_be_bytes(),
        };
        if self.arch.byte_order() == locus_dwarf::RunTimeEndian::Big {
            bytes[size - 8..].copy_from_slice(&raw);
        } else {
            bytes[..8].copy_from_slice(&raw);
        }
        self.frame_mut(frame).registers.insert(regnum, bytes);
    }

    pub fn register_u64(&self, frame: FrameRef, regnum: u64) -> u64 {
        let bytes = &self.frame(frame).registers[&regnum];
        let mut raw = [0u8; 8];
        if self.arch.byte_order() == locus_dwarf::RunTimeEndian::Big {
            raw.copy_from_slice(&bytes[bytes.len() - 8..]);
            u64::from_be_bytes(raw)
        } else {
            raw.copy_from_slice(&bytes[..8]);
            u64::from_le_bytes(raw)
        }
    }

    pub fn set_register_status(&mut self, frame: FrameRef, regnum: u64, status: RegisterStatus) {
        self.frame_mut(frame).register_status.insert(regnum, status);
    }

    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.memory.insert(address + i as u64, *b);
        }
    }

    pub fn write_u64(&mut self, address: u64, value: u64) {
        let bytes = match self.arch.byte_order() {
            locus_dwarf::RunTimeEndian::Little => value.to_le_bytes(),
            locus_dwarf::RunTimeEndian::Big => value.to_be_bytes(),
        };
        self.write_bytes(address, &bytes);
    }

    pub fn read_bytes(&self, address: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.memory.get(&(address + i)).copied().unwrap_or(0))
            .collect()
    }

    /// Invalidate every handle to `frame`, as a frame cache flush does
    pub fn invalidate_frame(&mut self, frame: FrameRef) {
        self.frame_mut(frame).generation += 1;
    }

    fn live(&self, frame: FrameRef) -> Result<&MockFrame> {
        match self.frames.get(&frame.id) {
            Some(f) if f.generation == frame.generation => Ok(f),
            _ => Err(ExprError::FrameNotFound(frame)),
        }
    }
}

impl FrameAccess for MockTarget {
    fn frame_is_valid(&self, frame: FrameRef) -> bool {
        self.live(frame).is_ok()
    }

    fn register_size(&self, frame: FrameRef, regnum: u64) -> Result<usize> {
        if let Some(bytes) = self.live(frame)?.registers.get(&regnum) {
            return Ok(bytes.len());
        }
        u16::try_from(regnum)
            .ok()
            .and_then(|r| dwarf_reg_size(self.arch, r))
            .ok_or(ExprError::BadRegister(regnum))
    }

    fn read_register(
        &self,
        frame: FrameRef,
        regnum: u64,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<RegisterStatus> {
        let f = self.live(frame)?;
        match f.register_status.get(&regnum) {
            Some(RegisterStatus::Valid) | None => {}
            Some(status) => return Ok(*status),
        }
        let size = self.register_size(frame, regnum)?;
        let bytes = f
            .registers
            .get(&regnum)
            .cloned()
            .unwrap_or_else(|| vec![0u8; size]);
        let src = bytes
            .get(offset..offset + buf.len())
            .ok_or(ExprError::BadRegister(regnum))?;
        buf.copy_from_slice(src);
        Ok(RegisterStatus::Valid)
    }

    fn write_register(
        &mut self,
        frame: FrameRef,
        regnum: u64,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        let size = self.register_size(frame, regnum)?;
        let f = self.frames.get_mut(&frame.id).ok_or(ExprError::FrameNotFound(frame))?;
        let bytes = f.registers.entry(regnum).or_insert_with(|| vec![0u8; size]);
        let dest = bytes
            .get_mut(offset..offset + data.len())
            .ok_or(ExprError::BadRegister(regnum))?;
        dest.copy_from_slice(data);
        Ok(())
    }

    fn prev_frame(&self, frame: FrameRef) -> Option<FrameRef> {
        let caller = self.live(frame).ok()?.caller?;
        let generation = self.frames.get(&caller)?.generation;
        Some(FrameRef::new(caller, generation))
    }

    fn call_frame_cfa(&self, frame: FrameRef) -> Result<u64> {
        Ok(self.live(frame)?.cfa)
    }

    fn frame_pc(&self, frame: FrameRef) -> Result<u64> {
        Ok(self.live(frame)?.pc)
    }

    fn frame_base_expression(&self, frame: FrameRef) -> Result<LocExprBlock> {
        let data = self
            .live(frame)?
            .frame_base
            .clone()
            .ok_or_else(|| ExprError::MalformedOperand("no DW_AT_frame_base".to_string()))?;
        Ok(LocExprBlock::new(data, test_cu()))
    }

    fn selected_frame(&self) -> Option<FrameRef> {
        self.selected
    }
}

impl MemoryAccess for MockTarget {
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let buf_len = buf.len();
        for (i, slot) in buf.iter_mut().enumerate() {
            let a = address.wrapping_add(i as u64);
            if self.unavailable_memory.contains(&a) {
                return Err(ExprError::NotAvailable(format!(
                    "value at 0x{:x} was not collected",
                    a
                )));
            }
            *slot = *self.memory.get(&a).ok_or(ExprError::Memory {
                address,
                length: buf_len,
            })?;
        }
        Ok(())
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.write_bytes(address, data);
        Ok(())
    }

    fn translate_tls_address(&self, _module: ModuleId, offset: u64) -> Result<u64> {
        match self.tls_base {
            Some(base) => Ok(base + offset),
            None => Err(ExprError::NotAvailable("no TLS block".to_string())),
        }
    }
}

impl DebugInfo for MockTarget {
    fn module_arch(&self, _module: ModuleId) -> Arch {
        self.arch
    }

    fn die_location(
        &self,
        cu: &CompUnit,
        die: UnitOffset<usize>,
        get_pc: &dyn Fn() -> Result<u64>,
    ) -> Result<LocExprBlock> {
        if self.pc_dependent_dies.contains(&die.0) {
            get_pc()?;
        }
        let data = self.procedures.get(&die.0).ok_or_else(|| {
            ExprError::MalformedOperand(format!("no DIE at unit offset 0x{:x}", die.0))
        })?;
        Ok(LocExprBlock::new(data.clone(), *cu))
    }

    fn die_location_at(
        &self,
        cu: &CompUnit,
        die: DebugInfoOffset<usize>,
        get_pc: &dyn Fn() -> Result<u64>,
        _resolve_abstract_origin: bool,
    ) -> Result<Option<LocExprBlock>> {
        if self.pc_dependent_dies.contains(&die.0) {
            get_pc()?;
        }
        Ok(self
            .die_locations
            .get(&die.0)
            .map(|data| LocExprBlock::new(data.clone(), *cu)))
    }

    fn die_constant_bytes(
        &self,
        _cu: &CompUnit,
        die: DebugInfoOffset<usize>,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.die_constants.get(&die.0).cloned())
    }

    fn die_type(&self, _cu: &CompUnit, die: DebugInfoOffset<usize>) -> Result<Option<DieType>> {
        Ok(self.die_types.get(&die.0).cloned())
    }

    fn base_type(&self, _cu: &CompUnit, offset: UnitOffset<usize>) -> Result<Option<Arc<Type>>> {
        Ok(self.base_types.get(&offset.0).cloned())
    }

    fn read_addr_index(&self, _cu: &CompUnit, index: u64) -> Result<u64> {
        self.addr_table.get(index as usize).copied().ok_or_else(|| {
            ExprError::MalformedOperand(format!("DW_OP_addrx index {} out of range", index))
        })
    }

    fn relocation_offset(&self, _module: ModuleId) -> u64 {
        self.relocation
    }

    fn call_site_parameter(
        &self,
        _frame: FrameRef,
        _caller: FrameRef,
        kind: &CallSiteParameterKind,
    ) -> Result<CallSiteParameter> {
        self.call_site_params
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| {
                ExprError::NoEntryValue(format!(
                    "Cannot find matching parameter at DW_TAG_call_site for {}",
                    kind
                ))
            })
    }

    fn variable_value(&self, name: &str) -> Option<Value> {
        self.variables.get(name).cloned()
    }
}

impl Target for MockTarget {
    fn interrupted(&self) -> bool {
        match self.interrupt_after.get() {
            Some(0) => true,
            Some(n) => {
                self.interrupt_after.set(Some(n - 1));
                false
            }
            None => false,
        }
    }
}
