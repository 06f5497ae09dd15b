//! Provides the simulatable tile core: a cycle-accurate RV32IM integer core driving a
//! request/response memory port.

mod counters;
pub mod csr;
mod execute;
mod status;
mod trap;

use crate::accel::AccelPort;
use crate::context::ThreadContext;
use crate::instruction::{
    BranchCondition, CsrOp, Instruction, LoadWidth, RegImmOp, RegRegOp, RegShiftImmOp, StoreWidth,
};
use crate::port::MemoryPort;
use crate::registers::{Registers, Specifier};
use crate::PrivilegeLevel;
use execute::Executor;
use log::trace;
use std::collections::HashMap;

pub use counters::Counters;
pub use csr::CsrSpecifier;
pub use status::{MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP_MACHINE, MSTATUS_MPP_MASK};
pub use trap::TrapCause;

use status::Status;
use trap::TrapCsrs;

/// Memory model the core drives its port with.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum MemModel {
    /// Cycle-accurate request/response with stalling (the default).
    #[default]
    Timed,
    /// Functional sanity mode: synchronous `read32`/`write32`, no stalls.
    Ideal,
}

/// The data-memory operation a stalled instruction is waiting on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
enum DmemOp {
    #[default]
    None,
    Lb,
    Lbu,
    Lh,
    Lhu,
    Lw,
    Sb,
    Sh,
    Sw,
}

/// A load or store as described by the executor, before any memory traffic happens.
#[derive(Debug, Copy, Clone)]
struct MemAccess {
    op: DmemOp,
    addr: u32,
    data: u32,
    rd: Specifier,
}

/// How the pc should move after executing an instruction.
#[derive(Debug, Copy, Clone)]
enum Action {
    /// Fall through to the next instruction.
    Advance,
    /// Continue at the given target address.
    Jump(u32),
    /// Do not advance; the pc is redirected elsewhere (trap entry or the pc-override latch).
    Hold,
    /// Perform the described memory access (synchronously in ideal mode, as a timed
    /// request/response transaction otherwise).
    Memory(MemAccess),
}

/// Result of executing a single instruction: how the pc moves, or the trap to take.
type ExecutionResult = Result<Action, TrapCause>;

/// Instruction-fetch latch. At most one of `waiting`/`valid` is true.
#[derive(Debug, Default)]
struct IfetchState {
    /// A fetch request is in flight; stall until its response arrives.
    waiting: bool,
    /// `word` holds a fetched, not yet consumed instruction.
    valid: bool,
    word: u32,
}

/// Data-memory stall latch, including the captured sub-word store state for the two-phase
/// read-modify-write sequence.
#[derive(Debug, Default)]
struct DmemState {
    waiting: bool,
    op: DmemOp,
    /// Set once the write phase of an SB/SH read-modify-write has been issued.
    rmw_write_issued: bool,
    rd: Specifier,
    addr: u32,
    store_data: u32,
    store_mask: u32,
    store_shift: u32,
    /// The pc to commit once the access (both phases, for RMW stores) completes.
    next_pc: u32,
}

/// A cycle-accurate RV32IM tile core.
///
/// Each [`tick`](Tile::tick) advances the attached memory port one cycle and then moves the core
/// through its fetch → decode → execute → trap/commit sequence, stalling (returning early with
/// latch state intact) whenever a memory response is still outstanding. All architectural
/// effects of an instruction — including the write phase of a sub-word store — are visible
/// before the next instruction's fetch is issued, so program order holds across the
/// request/response split.
///
/// The core is machine-mode-only in spirit: it tracks the privilege mode through trap entry and
/// return but does not enforce privilege on any operation.
#[derive(Debug)]
pub struct Tile {
    memory: Option<Box<dyn MemoryPort>>,
    accelerator: Option<Box<dyn AccelPort>>,
    mem_model: MemModel,

    registers: Registers,
    /// Address of the most recently fetched instruction; captured into mepc on trap entry.
    last_pc: u32,
    last_instr: u32,
    ifetch: IfetchState,
    dmem: DmemState,

    halted: bool,
    exited: bool,
    exit_code: u32,

    counters: Counters,

    status: Status,
    trap_csrs: TrapCsrs,
    /// The long tail of CSRs, keyed by 12-bit specifier. Unknown CSRs read as 0.
    csrs: HashMap<CsrSpecifier, u32>,

    trap_pending: Option<TrapCause>,
    pc_override: Option<u32>,
    /// Cause of the trap taken on the most recent tick, for harness observation.
    last_trap: Option<TrapCause>,
    privilege_mode: PrivilegeLevel,
}

impl Tile {
    pub fn new() -> Self {
        Self {
            memory: None,
            accelerator: None,
            mem_model: MemModel::default(),
            registers: Registers::new(0),
            last_pc: 0,
            last_instr: 0,
            ifetch: IfetchState::default(),
            dmem: DmemState::default(),
            halted: false,
            exited: false,
            exit_code: 0,
            counters: Counters::new(),
            status: Status::new(),
            trap_csrs: TrapCsrs::new(),
            csrs: HashMap::new(),
            trap_pending: None,
            pc_override: None,
            last_trap: None,
            privilege_mode: PrivilegeLevel::Machine,
        }
    }

    /// Attach the memory port the core fetches and loads/stores through.
    pub fn attach_memory(&mut self, memory: Box<dyn MemoryPort>) {
        self.memory = Some(memory);
    }

    /// Attach the accelerator reached through custom-0 instructions.
    pub fn attach_accelerator(&mut self, accelerator: Box<dyn AccelPort>) {
        self.accelerator = Some(accelerator);
    }

    /// The attached memory port, if any.
    pub fn memory(&self) -> Option<&dyn MemoryPort> {
        self.memory.as_deref()
    }

    /// Mutable access to the attached memory port, for loaders, debuggers and diagnostics.
    /// Host-side helpers must only run between ticks.
    pub fn memory_mut(&mut self) -> Option<&mut dyn MemoryPort> {
        match self.memory {
            Some(ref mut b) => Some(b.as_mut()),
            None => None,
        }
    }

    pub fn mem_model(&self) -> MemModel {
        self.mem_model
    }

    pub fn set_mem_model(&mut self, model: MemModel) {
        self.mem_model = model;
    }

    /// Generate a reset: architectural state, latches, counters and CSRs back to power-on
    /// values. Attached memory and accelerator stay attached.
    pub fn reset(&mut self) {
        self.registers = Registers::new(0);
        self.last_pc = 0;
        self.last_instr = 0;
        self.ifetch = IfetchState::default();
        self.dmem = DmemState::default();
        self.halted = false;
        self.exited = false;
        self.exit_code = 0;
        self.counters = Counters::new();
        self.status = Status::new();
        self.trap_csrs = TrapCsrs::new();
        self.csrs.clear();
        self.trap_pending = None;
        self.pc_override = None;
        self.last_trap = None;
        self.privilege_mode = PrivilegeLevel::Machine;
    }

    /// Advance the core by one cycle.
    pub fn tick(&mut self) {
        // Phase 0: gate. A halted core issues no further fetches, executes and memory requests.
        if self.halted {
            return;
        }
        if self.memory.is_none() {
            self.last_pc = self.registers.pc();
            self.last_instr = 0;
            return;
        }

        // Phase 1: advance the memory hierarchy one cycle.
        self.mem().cycle();

        // Phase 2: resolve an in-flight instruction fetch.
        if self.ifetch.waiting {
            if !self.mem().resp_valid() {
                return;
            }
            let word = self.mem().resp_data();
            self.mem().resp_consume();
            self.ifetch.word = word;
            self.ifetch.valid = true;
            self.ifetch.waiting = false;
        }

        // Phase 3: resolve an in-flight data access.
        if self.dmem.waiting {
            if !self.mem().resp_valid() {
                return;
            }
            let resp = self.mem().resp_data();
            self.mem().resp_consume();
            self.complete_dmem(resp);
            return;
        }

        // Phase 4: fetch.
        let curr_pc = self.registers.pc();
        let instr = match self.mem_model {
            MemModel::Ideal => {
                self.ifetch.waiting = false;
                self.ifetch.valid = false;
                self.mem().read32(curr_pc)
            }
            MemModel::Timed => {
                if !self.ifetch.valid {
                    if !self.mem().can_request() {
                        return;
                    }
                    self.mem().request_read32(curr_pc);
                    self.ifetch.waiting = true;
                    self.last_pc = curr_pc;
                    self.last_instr = 0;
                    // The response is consumed on a later tick.
                    return;
                }
                self.ifetch.valid = false;
                self.ifetch.word
            }
        };
        self.last_pc = curr_pc;
        self.last_instr = instr;
        trace!("pc={curr_pc:#010x} instr={instr:#010x}");
        let mut next_pc = curr_pc.wrapping_add(4);
        let mut advance_pc = true;

        // Phase 5: decode and execute. Counters commit here, not at retire after a dmem stall.
        self.counters.increment_inst();
        let result = match Instruction::decode(instr) {
            Ok(instruction) => self.execute_instruction(instruction),
            Err(_) => Err(TrapCause::IllegalInstruction),
        };
        match result {
            Ok(Action::Advance) => {}
            Ok(Action::Jump(target)) => next_pc = target,
            Ok(Action::Hold) => advance_pc = false,
            Ok(Action::Memory(access)) => match self.mem_model {
                MemModel::Ideal => self.perform_ideal(access),
                MemModel::Timed => {
                    if !self.mem().can_request() {
                        return;
                    }
                    self.issue_dmem(access, next_pc);
                    return;
                }
            },
            Err(cause) => {
                self.request_trap(cause);
                advance_pc = false;
            }
        }

        // Phase 6: take a pending trap.
        if let Some(cause) = self.trap_pending.take() {
            self.raise_trap(cause);
            return;
        }

        // Phase 7: commit the next pc. An override installed by a trap-return instruction wins.
        if let Some(target) = self.pc_override.take() {
            *self.registers.pc_mut() = target;
            return;
        }
        *self.registers.pc_mut() = if advance_pc { next_pc } else { curr_pc };
    }

    fn mem(&mut self) -> &mut dyn MemoryPort {
        self.memory.as_deref_mut().expect("no memory port attached")
    }

    fn accelerator_and_memory(
        &mut self,
    ) -> (Option<&mut dyn AccelPort>, Option<&mut dyn MemoryPort>) {
        (
            match self.accelerator {
                Some(ref mut b) => Some(b.as_mut()),
                None => None,
            },
            match self.memory {
                Some(ref mut b) => Some(b.as_mut()),
                None => None,
            },
        )
    }

    /// Dispatch one decoded instruction to its executor, bumping the event counters.
    fn execute_instruction(&mut self, instruction: Instruction) -> ExecutionResult {
        let mut executor = Executor { core: self };
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                executor.core.counters.increment_arith();
                let op = match op {
                    RegImmOp::Addi => Executor::addi,
                    RegImmOp::Slti => Executor::slti,
                    RegImmOp::Sltiu => Executor::sltiu,
                    RegImmOp::Xori => Executor::xori,
                    RegImmOp::Ori => Executor::ori,
                    RegImmOp::Andi => Executor::andi,
                };
                op(&mut executor, dest, src, immediate)
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u5,
            } => {
                executor.core.counters.increment_arith();
                let op = match op {
                    RegShiftImmOp::Slli => Executor::slli,
                    RegShiftImmOp::Srli => Executor::srli,
                    RegShiftImmOp::Srai => Executor::srai,
                };
                op(&mut executor, dest, src, shift_amount_u5)
            }
            Instruction::Auipc { dest, immediate } => {
                executor.core.counters.increment_arith();
                executor.auipc(dest, immediate)
            }
            Instruction::Lui { dest, immediate } => {
                executor.core.counters.increment_arith();
                executor.lui(dest, immediate)
            }
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                executor.core.counters.increment_arith();
                match op {
                    // Subtractions count as adds.
                    RegRegOp::Add | RegRegOp::Sub => executor.core.counters.increment_add(),
                    RegRegOp::Mul => executor.core.counters.increment_mul(),
                    _ => {}
                }
                let op = match op {
                    RegRegOp::Add => Executor::add,
                    RegRegOp::Slt => Executor::slt,
                    RegRegOp::Sltu => Executor::sltu,
                    RegRegOp::And => Executor::and,
                    RegRegOp::Or => Executor::or,
                    RegRegOp::Xor => Executor::xor,
                    RegRegOp::Sll => Executor::sll,
                    RegRegOp::Srl => Executor::srl,
                    RegRegOp::Sub => Executor::sub,
                    RegRegOp::Sra => Executor::sra,
                    RegRegOp::Mul => Executor::mul,
                    RegRegOp::Mulh => Executor::mulh,
                    RegRegOp::Mulhsu => Executor::mulhsu,
                    RegRegOp::Mulhu => Executor::mulhu,
                    RegRegOp::Div => Executor::div,
                    RegRegOp::Divu => Executor::divu,
                    RegRegOp::Rem => Executor::rem,
                    RegRegOp::Remu => Executor::remu,
                    RegRegOp::Mulw => Executor::mulw,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::Jal { dest, offset } => executor.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                executor.core.counters.increment_branch();
                let op = match condition {
                    BranchCondition::Beq => Executor::beq,
                    BranchCondition::Bne => Executor::bne,
                    BranchCondition::Blt => Executor::blt,
                    BranchCondition::Bltu => Executor::bltu,
                    BranchCondition::Bge => Executor::bge,
                    BranchCondition::Bgeu => Executor::bgeu,
                };
                op(&mut executor, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                executor.core.counters.increment_load();
                let op = match width {
                    LoadWidth::Lb => Executor::lb,
                    LoadWidth::Lh => Executor::lh,
                    LoadWidth::Lw => Executor::lw,
                    LoadWidth::Lbu => Executor::lbu,
                    LoadWidth::Lhu => Executor::lhu,
                };
                op(&mut executor, dest, base, offset)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                executor.core.counters.increment_store();
                let op = match width {
                    StoreWidth::Sb => Executor::sb,
                    StoreWidth::Sh => Executor::sh,
                    StoreWidth::Sw => Executor::sw,
                };
                op(&mut executor, src, base, offset)
            }
            Instruction::Fence => executor.fence(),
            Instruction::FenceI => executor.fence_i(),
            Instruction::Ecall => executor.ecall(),
            Instruction::Ebreak => executor.ebreak(),
            Instruction::Uret => executor.uret(),
            Instruction::Sret => executor.sret(),
            Instruction::Mret => executor.mret(),
            Instruction::Csr { op, dest, csr, src } => {
                let op = match op {
                    CsrOp::ReadWrite => Executor::csrrw,
                    CsrOp::ReadSet => Executor::csrrs,
                    CsrOp::ReadClear => Executor::csrrc,
                };
                op(&mut executor, dest, csr, src)
            }
            Instruction::Csri {
                op,
                dest,
                csr,
                immediate,
            } => {
                let op = match op {
                    CsrOp::ReadWrite => Executor::csrrwi,
                    CsrOp::ReadSet => Executor::csrrsi,
                    CsrOp::ReadClear => Executor::csrrci,
                };
                op(&mut executor, dest, csr, immediate)
            }
            Instruction::Custom0 { dest, src1, src2 } => executor.custom0(dest, src1, src2),
        }
    }

    /// Perform a load/store synchronously against the port helpers (ideal memory model).
    fn perform_ideal(&mut self, access: MemAccess) {
        let aligned = access.addr & !0x3;
        match access.op {
            DmemOp::Lb | DmemOp::Lbu | DmemOp::Lh | DmemOp::Lhu | DmemOp::Lw => {
                let word = self.mem().read32(aligned);
                let value = load_value(access.op, access.addr, word);
                self.registers.set_x(access.rd, value);
            }
            DmemOp::Sw => self.mem().write32(aligned, access.data),
            DmemOp::Sb | DmemOp::Sh => {
                let (data, shift, mask) = store_lane(access.op, access.addr, access.data);
                let prior = self.mem().read32(aligned);
                let merged = (prior & !mask) | ((data << shift) & mask);
                self.mem().write32(aligned, merged);
            }
            DmemOp::None => unreachable!("ideal access with no op"),
        }
    }

    /// Issue a load/store on the timed channel and arm the dmem stall latch. Sub-word stores
    /// start with the read phase of their read-modify-write sequence.
    fn issue_dmem(&mut self, access: MemAccess, next_pc: u32) {
        let aligned = access.addr & !0x3;
        self.dmem.waiting = true;
        self.dmem.op = access.op;
        self.dmem.rmw_write_issued = false;
        self.dmem.rd = access.rd;
        self.dmem.addr = access.addr;
        self.dmem.store_data = 0;
        self.dmem.store_mask = 0;
        self.dmem.store_shift = 0;
        self.dmem.next_pc = next_pc;
        match access.op {
            DmemOp::Lb | DmemOp::Lbu | DmemOp::Lh | DmemOp::Lhu | DmemOp::Lw => {
                self.mem().request_read32(aligned);
            }
            DmemOp::Sw => {
                self.dmem.store_data = access.data;
                self.dmem.store_mask = 0xFFFF_FFFF;
                self.mem().request_write32(aligned, access.data);
            }
            DmemOp::Sb | DmemOp::Sh => {
                let (data, shift, mask) = store_lane(access.op, access.addr, access.data);
                self.dmem.store_data = data;
                self.dmem.store_shift = shift;
                self.dmem.store_mask = mask;
                // Transaction 1 of the RMW: read the word the store lands in.
                self.mem().request_read32(aligned);
            }
            DmemOp::None => unreachable!("issued dmem access with no op"),
        }
    }

    /// Finish a data access whose response just arrived: update the register file for loads,
    /// issue the write phase for sub-word stores, and commit the pc once the access is done.
    fn complete_dmem(&mut self, resp_data: u32) {
        match self.dmem.op {
            DmemOp::Lb | DmemOp::Lbu | DmemOp::Lh | DmemOp::Lhu | DmemOp::Lw => {
                let value = load_value(self.dmem.op, self.dmem.addr, resp_data);
                let rd = self.dmem.rd;
                self.registers.set_x(rd, value);
            }
            DmemOp::Sw => {}
            DmemOp::Sb | DmemOp::Sh => {
                if !self.dmem.rmw_write_issued {
                    let merged = (resp_data & !self.dmem.store_mask)
                        | ((self.dmem.store_data << self.dmem.store_shift) & self.dmem.store_mask);
                    assert!(
                        self.mem().can_request(),
                        "RMW write phase requires a free request slot"
                    );
                    let aligned = self.dmem.addr & !0x3;
                    // Transaction 2 of the RMW: write the merged word back. The dmem latch stays
                    // armed, so no fetch can slip between the two phases.
                    self.mem().request_write32(aligned, merged);
                    self.dmem.rmw_write_issued = true;
                    self.dmem.store_data = merged;
                    return;
                }
            }
            DmemOp::None => panic!("dmem completion with no active op"),
        }
        *self.registers.pc_mut() = self.dmem.next_pc;
        self.dmem = DmemState::default();
    }

    // Core state accessors

    pub fn pc(&self) -> u32 {
        self.registers.pc()
    }

    /// Set the pc, discarding any pending pc-override.
    pub fn set_pc(&mut self, pc: u32) {
        *self.registers.pc_mut() = pc;
        self.pc_override = None;
    }

    /// Address of the most recently fetched instruction.
    pub fn last_pc(&self) -> u32 {
        self.last_pc
    }

    /// The most recently fetched instruction word (0 while a fetch is outstanding).
    pub fn last_instr(&self) -> u32 {
        self.last_instr
    }

    /// Read register `x<idx>`. Out-of-range indices read as 0.
    pub fn reg(&self, idx: u32) -> u32 {
        if idx < 32 {
            self.registers.x(Specifier::from_u5(idx as u8))
        } else {
            0
        }
    }

    /// Write register `x<idx>`. Writes to x0 and out-of-range indices are ignored.
    pub fn write_reg(&mut self, idx: u32, value: u32) {
        if idx == 0 || idx >= 32 {
            return;
        }
        self.registers.set_x(Specifier::from_u5(idx as u8), value);
        trace!("x{idx} <= {value:#x}");
    }

    /// Returns `true` while the core is waiting on a memory response (fetch or data). Thread
    /// rotation must not happen mid-stall, since the outstanding transaction belongs to the
    /// stalled instruction.
    pub fn stalled(&self) -> bool {
        self.ifetch.waiting || self.dmem.waiting
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn halt(&mut self) {
        self.halted = true;
        trace!("halted");
    }

    /// Latch a normal program exit, as detected by the harness on an exit environment call.
    pub fn request_exit(&mut self, code: u32) {
        self.exit_code = code;
        self.exited = true;
        self.halted = true;
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    pub fn exit_code(&self) -> u32 {
        self.exit_code
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    // CSR accessors

    /// Read a CSR by specifier. The four machine trap CSRs have dedicated storage; everything
    /// else routes through the sparse map, with unknown CSRs reading as 0.
    pub fn read_csr(&self, specifier: CsrSpecifier) -> u32 {
        match specifier {
            csr::MSTATUS => self.status.read(),
            csr::MTVEC => self.trap_csrs.mtvec,
            csr::MEPC => self.trap_csrs.mepc,
            csr::MCAUSE => self.trap_csrs.mcause,
            _ => self.csrs.get(&specifier).copied().unwrap_or(0),
        }
    }

    /// Write a CSR by specifier.
    pub fn write_csr(&mut self, specifier: CsrSpecifier, value: u32) {
        match specifier {
            csr::MSTATUS => self.status.write(value),
            csr::MTVEC => self.trap_csrs.mtvec = value,
            csr::MEPC => self.trap_csrs.mepc = value,
            csr::MCAUSE => self.trap_csrs.mcause = value,
            _ => {
                self.csrs.insert(specifier, value);
            }
        }
        trace!("csr[{specifier:#05x}] <= {value:#x}");
    }

    pub fn mstatus(&self) -> u32 {
        self.status.read()
    }

    pub fn mtvec(&self) -> u32 {
        self.trap_csrs.mtvec
    }

    pub fn mepc(&self) -> u32 {
        self.trap_csrs.mepc
    }

    pub fn mcause(&self) -> u32 {
        self.trap_csrs.mcause
    }

    /// Returns the current privilege mode.
    pub fn privilege_mode(&self) -> PrivilegeLevel {
        self.privilege_mode
    }

    // Trap flow control

    /// Latch a trap to be taken at the end of the current tick.
    pub fn request_trap(&mut self, cause: TrapCause) {
        self.trap_pending = Some(cause);
    }

    pub fn request_illegal_instruction(&mut self) {
        self.request_trap(TrapCause::IllegalInstruction);
    }

    pub fn trap_pending(&self) -> bool {
        self.trap_pending.is_some()
    }

    /// Take and clear the cause of the trap entered on the most recent tick. The harness polls
    /// this after each tick to observe breakpoints and environment calls.
    pub fn take_last_trap(&mut self) -> Option<TrapCause> {
        self.last_trap.take()
    }

    /// Enter the trap handler for `cause`.
    ///
    /// mepc receives the faulting instruction's address (not the post-increment pc), mcause the
    /// cause code. In mstatus, the previous privilege mode is pushed into MPP and the
    /// interrupt-enable stack into MPIE, with MIE cleared. The pc redirects to mtvec (direct
    /// vectoring only) and the core enters machine mode.
    pub fn raise_trap(&mut self, cause: TrapCause) {
        self.trap_pending = None;
        self.trap_csrs.mepc = self.last_pc;
        self.trap_csrs.mcause = cause.code();
        let prev_mode = self.privilege_mode;
        self.status.set_mpie(self.status.mie());
        self.status.set_mie(false);
        self.status.set_mpp(prev_mode);
        self.pc_override = None;
        trace!(
            "trap: cause={} mtvec={:#010x} mepc={:#010x}",
            cause.code(),
            self.trap_csrs.mtvec,
            self.trap_csrs.mepc
        );
        *self.registers.pc_mut() = self.trap_csrs.mtvec;
        self.privilege_mode = PrivilegeLevel::Machine;
        self.last_trap = Some(cause);
    }

    /// Return from a trap (MRET): the pc-override latch receives mepc, applied at the next
    /// commit. MIE is restored from MPIE, MPIE set, the privilege mode popped from MPP, and MPP
    /// cleared to User.
    pub fn resume_from_trap(&mut self) {
        self.pc_override = Some(self.trap_csrs.mepc);
        self.status.set_mie(self.status.mpie());
        self.status.set_mpie(true);
        let target_mode = self.status.mpp();
        self.privilege_mode = target_mode;
        self.status.set_mpp(PrivilegeLevel::User);
        trace!("mret -> pc={:#010x}", self.trap_csrs.mepc);
    }

    // Thread context save/restore

    /// Copy the pc and all registers into `context`. `regs[0]` is forced to zero.
    pub fn save_context(&self, context: &mut ThreadContext) {
        context.pc = self.registers.pc();
        for specifier in Specifier::iter_all() {
            context.regs[usize::from(specifier)] = self.registers.x(specifier);
        }
        context.regs[0] = 0;
    }

    /// Apply the pc and registers from `context`, forcing x0 to zero, and clear the halt/exit
    /// latches so the restored thread can run.
    pub fn load_context(&mut self, context: &ThreadContext) {
        *self.registers.pc_mut() = context.pc;
        for specifier in Specifier::iter_all() {
            self.registers
                .set_x(specifier, context.regs[usize::from(specifier)]);
        }
        self.halted = false;
        self.exited = false;
        self.exit_code = 0;
    }
}

impl Default for Tile {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract and extend a loaded value from the word the address falls in.
fn load_value(op: DmemOp, addr: u32, word: u32) -> u32 {
    match op {
        DmemOp::Lw => word,
        DmemOp::Lb => {
            let shift = (addr & 0x3) * 8;
            ((word >> shift) & 0xFF) as u8 as i8 as u32
        }
        DmemOp::Lbu => {
            let shift = (addr & 0x3) * 8;
            (word >> shift) & 0xFF
        }
        DmemOp::Lh => {
            let shift = (addr & 0x2) * 8;
            ((word >> shift) & 0xFFFF) as u16 as i16 as u32
        }
        DmemOp::Lhu => {
            let shift = (addr & 0x2) * 8;
            (word >> shift) & 0xFFFF
        }
        _ => unreachable!("not a load op"),
    }
}

/// Byte-lane placement for a sub-word store: (truncated data, shift, mask).
fn store_lane(op: DmemOp, addr: u32, data: u32) -> (u32, u32, u32) {
    match op {
        DmemOp::Sb => {
            let shift = (addr & 0x3) * 8;
            (data & 0xFF, shift, 0xFF << shift)
        }
        DmemOp::Sh => {
            let shift = (addr & 0x2) * 8;
            (data & 0xFFFF, shift, 0xFFFF << shift)
        }
        _ => unreachable!("not a sub-word store op"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dram::Dram;
    use crate::loader;
    use crate::port::DirectPort;

    fn tile_with_program(words: &[u32]) -> Tile {
        let mut port = DirectPort::new(Dram::new());
        loader::load_words(&mut port, 0, words);
        let mut tile = Tile::new();
        tile.attach_memory(Box::new(port));
        tile
    }

    fn run(tile: &mut Tile, cycles: u32) {
        for _ in 0..cycles {
            tile.tick();
        }
    }

    // Through the direct port every instruction takes two ticks: one to issue the fetch, one to
    // consume the response and execute.

    #[test]
    fn test_x0_stays_zero() {
        // addi x0, x0, 5
        let mut tile = tile_with_program(&[0x0050_0013]);
        run(&mut tile, 2);
        assert_eq!(0, tile.reg(0));
        assert_eq!(4, tile.pc());
    }

    #[test]
    fn test_addi_executes() {
        // addi x5, x0, 7 ; addi x6, x0, 9
        let mut tile = tile_with_program(&[0x0070_0293, 0x0090_0313]);
        run(&mut tile, 4);
        assert_eq!(7, tile.reg(5));
        assert_eq!(9, tile.reg(6));
        assert_eq!(2, tile.counters().inst());
        assert_eq!(2, tile.counters().arith());
    }

    #[test]
    fn test_no_memory_port_is_inert() {
        let mut tile = Tile::new();
        run(&mut tile, 3);
        assert_eq!(0, tile.pc());
        assert_eq!(0, tile.counters().inst());
    }

    #[test]
    fn test_ebreak_enters_trap() {
        // ebreak, with mtvec pointing at 0x80
        let mut tile = tile_with_program(&[0x0010_0073]);
        tile.write_csr(csr::MTVEC, 0x80);
        run(&mut tile, 2);
        assert_eq!(0x80, tile.pc());
        assert_eq!(TrapCause::BREAKPOINT, tile.mcause());
        assert_eq!(0, tile.mepc());
        assert_eq!(
            MSTATUS_MPP_MACHINE,
            tile.mstatus() & MSTATUS_MPP_MASK,
            "previous privilege pushed into MPP"
        );
        assert_eq!(0, tile.mstatus() & MSTATUS_MIE, "MIE cleared on entry");
        assert_eq!(PrivilegeLevel::Machine, tile.privilege_mode());
        assert_eq!(Some(TrapCause::Breakpoint), tile.take_last_trap());
        assert_eq!(None, tile.take_last_trap());
    }

    #[test]
    fn test_ecall_cause_tracks_privilege() {
        let mut tile = tile_with_program(&[0x0000_0073]);
        tile.write_csr(csr::MTVEC, 0x40);
        run(&mut tile, 2);
        assert_eq!(TrapCause::ENVIRONMENT_CALL_FROM_M_MODE, tile.mcause());
    }

    #[test]
    fn test_mret_restores_trap_state() {
        // 0x00: ebreak          -> trap to 0x10
        // 0x10: mret            -> back to mepc (0x00 again), MPP cleared to User
        let mut tile = tile_with_program(&[0x0010_0073, 0, 0, 0, 0x3020_0073]);
        tile.write_csr(csr::MTVEC, 0x10);
        tile.write_csr(csr::MSTATUS, MSTATUS_MIE);
        run(&mut tile, 2);
        assert_eq!(0x10, tile.pc());
        assert_eq!(0, tile.mstatus() & MSTATUS_MIE);
        run(&mut tile, 2);
        assert_eq!(0, tile.pc(), "mret returned to mepc");
        assert_ne!(0, tile.mstatus() & MSTATUS_MIE, "MIE restored from MPIE");
        assert_ne!(0, tile.mstatus() & MSTATUS_MPIE, "MPIE set by mret");
        assert_eq!(PrivilegeLevel::Machine, tile.privilege_mode());
        assert_eq!(0, tile.mstatus() & MSTATUS_MPP_MASK, "MPP cleared to User");
    }

    #[test]
    fn test_csr_swap_reads_old_value() {
        // addi x5, x0, 7 ; addi x6, x0, 9 ; csrrw x5, 0x340, x6
        let mut tile = tile_with_program(&[0x0070_0293, 0x0090_0313, 0x3403_12F3]);
        tile.write_csr(0x340, 0x1234);
        run(&mut tile, 6);
        assert_eq!(0x1234, tile.reg(5), "old CSR value lands in rd");
        assert_eq!(9, tile.read_csr(0x340));
    }

    #[test]
    fn test_illegal_instruction_traps() {
        let mut tile = tile_with_program(&[0xFFFF_FFFF]);
        tile.write_csr(csr::MTVEC, 0x20);
        run(&mut tile, 2);
        assert_eq!(TrapCause::ILLEGAL_INSTRUCTION, tile.mcause());
        assert_eq!(0x20, tile.pc());
    }

    #[test]
    fn test_ideal_mode_subword_store() {
        // addi x2, x0, 0xAA ; sb x2, 0x201(x0) — byte lane 1 of the word at 0x200.
        let mut tile = tile_with_program(&[0x0AA0_0113, 0x2020_00A3]);
        tile.set_mem_model(MemModel::Ideal);
        // Ideal fetches are synchronous, so one tick per instruction.
        run(&mut tile, 2);
        assert_eq!(
            0x0000_AA00,
            tile.memory_mut().unwrap().read32(0x200),
            "store to byte lane 1 shifts into the second byte"
        );
    }

    #[test]
    fn test_context_round_trip() {
        let mut tile = tile_with_program(&[0x0070_0293]);
        run(&mut tile, 2);
        let mut saved = crate::context::ThreadContext::default();
        tile.save_context(&mut saved);
        assert_eq!(7, saved.regs[5]);
        assert_eq!(0, saved.regs[0]);

        let mut fresh = Tile::new();
        fresh.load_context(&saved);
        let mut round_tripped = crate::context::ThreadContext::default();
        fresh.save_context(&mut round_tripped);
        assert_eq!(saved, round_tripped);
    }

    #[test]
    fn test_reset() {
        let mut tile = tile_with_program(&[0x0070_0293]);
        run(&mut tile, 2);
        assert_ne!(0, tile.counters().inst());
        tile.reset();
        assert_eq!(0, tile.pc());
        assert_eq!(0, tile.reg(5));
        assert_eq!(0, tile.counters().inst());
        assert_eq!(PrivilegeLevel::Machine, tile.privilege_mode());
    }
}
