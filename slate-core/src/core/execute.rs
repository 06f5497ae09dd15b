use log::trace;

use super::{Action, DmemOp, ExecutionResult, MemAccess, Tile};
use crate::core::csr::CsrSpecifier;
use crate::core::trap::TrapCause;
use crate::instruction::CsrOp;
use crate::registers::Specifier;
use crate::{Alignment, PrivilegeLevel};

/// Per-opcode execution helpers.
///
/// Register-to-register operations mutate the tile directly and report how the pc should move.
/// Loads and stores do *not* touch memory themselves: they are described as a [`MemAccess`] so
/// the tick loop can either perform them synchronously (ideal memory) or issue them on the timed
/// request/response channel and stall.
#[derive(Debug)]
pub(super) struct Executor<'c> {
    pub core: &'c mut Tile,
}

impl<'c> Executor<'c> {
    /// `addi`: rs1 plus the sign-extended immediate, wrapped to 32 bits. With a zero immediate
    /// this doubles as `mv`.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("exec addi {dest}, {src}, {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add_signed(imm))
    }

    /// `slti`: rd becomes 1 when rs1 is below the immediate under signed ordering, else 0.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("exec slti {dest}, {src}, {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i32) < imm) as u32)
    }

    /// `sltiu`: as `slti`, but the comparison is unsigned (the immediate is sign-extended first
    /// and then reinterpreted).
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("exec sltiu {dest}, {src}, {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| (s < (imm as u32)) as u32)
    }

    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("exec andi {dest}, {src}, {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u32))
    }

    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("exec ori {dest}, {src}, {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u32))
    }

    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        trace!("exec xori {dest}, {src}, {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u32))
    }

    pub fn slli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("exec slli {dest}, {src}, {shift_amount_u5}");
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s << shamt)
    }

    pub fn srli(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("exec srli {dest}, {src}, {shift_amount_u5}");
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| s >> shamt)
    }

    /// `srai` shifts in copies of the sign bit from the left.
    pub fn srai(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("exec srai {dest}, {src}, {shift_amount_u5}");
        self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| {
            ((s as i32) >> shamt) as u32
        })
    }

    /// `lui`: place the U-immediate in the upper 20 bits of rd, zeroing the rest. The low 12
    /// bits of `immediate` are discarded here, so callers need not pre-clear them.
    pub fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        trace!("exec lui {dest}, {immediate:#x}");
        let result = immediate as u32 & !0xFFF;
        self.core.registers.set_x(dest, result);
        Ok(Action::Advance)
    }

    /// `auipc`: rd receives the U-immediate (low 12 bits cleared) added to this instruction's
    /// own address. The pc register has not advanced yet at this point, so it is read directly.
    pub fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        trace!("exec auipc {dest}, {immediate:#x}");
        let result = self
            .core
            .registers
            .pc()
            .wrapping_add_signed(immediate & !0xFFF);
        self.core.registers.set_x(dest, result);
        Ok(Action::Advance)
    }

    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec add {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec sub {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    /// `slt`/`sltu` write the comparison outcome (0 or 1) to rd.
    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec slt {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) < (s2 as i32)) as u32
        })
    }

    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec sltu {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u32)
    }

    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec and {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec or {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec xor {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// Register shifts use only the low five bits of rs2 as the amount.
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec sll {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x1F))
    }

    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec srl {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x1F))
    }

    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec sra {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) >> (s2 & 0x1F)) as u32
        })
    }

    /// `mul`: the low 32 bits of the product. Signedness is irrelevant for the low half.
    pub fn mul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec mul {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, u32::wrapping_mul)
    }

    /// `mulw`: carried over from the 64-bit ISA but executed here as a plain low-32 multiply,
    /// so it lands on the same result as `mul`.
    pub fn mulw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec mulw {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, u32::wrapping_mul)
    }

    /// `mulh`: the upper 32 bits of the 64-bit product, with both operands taken as signed.
    pub fn mulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec mulh {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let product = i64::from(s1 as i32) * i64::from(s2 as i32);
            (product >> 32) as u32
        })
    }

    /// `mulhsu`: upper half of the mixed product, rs1 signed and rs2 unsigned.
    pub fn mulhsu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec mulhsu {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let product = i64::from(s1 as i32) * i64::from(s2);
            (product >> 32) as u32
        })
    }

    /// `mulhu`: upper half of the product with both operands taken as unsigned.
    pub fn mulhu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec mulhu {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let product = u64::from(s1) * u64::from(s2);
            (product >> 32) as u32
        })
    }

    /// `div`: signed division rounding toward zero. A zero divisor yields all ones, and the one
    /// overflowing case (`INT_MIN / -1`) wraps back to `INT_MIN`.
    pub fn div(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec div {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            if s2 == 0 {
                return u32::MAX;
            }
            (s1 as i32).wrapping_div(s2 as i32) as u32
        })
    }

    /// `divu`: unsigned division; a zero divisor yields all ones.
    pub fn divu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec divu {dest}, {src1}, {src2}");
        self.reg_reg_op(
            dest,
            src1,
            src2,
            |s1, s2| if s2 == 0 { u32::MAX } else { s1 / s2 },
        )
    }

    /// `rem`: the remainder keeps the dividend's sign. Dividing by zero hands back the dividend
    /// untouched; the `INT_MIN % -1` overflow case leaves zero.
    pub fn rem(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec rem {dest}, {src1}, {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            if s2 == 0 {
                return s1;
            }
            (s1 as i32).wrapping_rem(s2 as i32) as u32
        })
    }

    /// `remu`: unsigned remainder; dividing by zero hands back the dividend.
    pub fn remu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("exec remu {dest}, {src1}, {src2}");
        self.reg_reg_op(
            dest,
            src1,
            src2,
            |s1, s2| if s2 == 0 { s1 } else { s1 % s2 },
        )
    }

    /// `jal`: the link (pc of the following instruction) is written to `dest` and execution
    /// jumps to `pc + offset`.
    pub fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec jal {dest}, {offset}");
        let pc = self.core.registers.pc();
        let target = pc.wrapping_add_signed(offset);
        self.core.registers.set_x(dest, pc.wrapping_add(4));
        Ok(Action::Jump(target))
    }

    /// `jalr`: the target is `(rs1 + offset) & !1`, computed before the link register is
    /// written so `jalr x1, x1, 0` behaves.
    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec jalr {dest}, {base}, {offset}");
        let pc = self.core.registers.pc();
        let target = self.core.registers.x(base).wrapping_add_signed(offset) & !1;
        self.core.registers.set_x(dest, pc.wrapping_add(4));
        Ok(Action::Jump(target))
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec beq {src1}, {src2}, {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec bne {src1}, {src2}, {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec blt {src1}, {src2}, {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) < (s2 as i32))
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec bltu {src1}, {src2}, {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec bge {src1}, {src2}, {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i32) >= (s2 as i32))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec bgeu {src1}, {src2}, {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec lb {dest}, {offset}({base})");
        self.load_op(DmemOp::Lb, dest, base, offset)
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec lbu {dest}, {offset}({base})");
        self.load_op(DmemOp::Lbu, dest, base, offset)
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec lh {dest}, {offset}({base})");
        self.load_op(DmemOp::Lh, dest, base, offset)
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec lhu {dest}, {offset}({base})");
        self.load_op(DmemOp::Lhu, dest, base, offset)
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec lw {dest}, {offset}({base})");
        self.load_op(DmemOp::Lw, dest, base, offset)
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec sb {src}, {offset}({base})");
        self.store_op(DmemOp::Sb, src, base, offset)
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec sh {src}, {offset}({base})");
        self.store_op(DmemOp::Sh, src, base, offset)
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        trace!("exec sw {src}, {offset}({base})");
        self.store_op(DmemOp::Sw, src, base, offset)
    }

    /// Both fences are no-ops on this single-hart in-order tile.
    pub fn fence(&mut self) -> ExecutionResult {
        trace!("exec fence");
        Ok(Action::Advance)
    }

    pub fn fence_i(&mut self) -> ExecutionResult {
        trace!("exec fence.i");
        Ok(Action::Advance)
    }

    /// `ecall`: requests an environment-call trap whose cause names the privilege mode the call
    /// was made from.
    pub fn ecall(&mut self) -> ExecutionResult {
        trace!("exec ecall");
        Err(match self.core.privilege_mode {
            PrivilegeLevel::User => TrapCause::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => TrapCause::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => TrapCause::EnvironmentCallFromMMode,
        })
    }

    pub fn ebreak(&mut self) -> ExecutionResult {
        trace!("exec ebreak");
        Err(TrapCause::Breakpoint)
    }

    /// `mret`: the actual jump to mepc is applied at commit via the pc-override latch, so the
    /// return does not fight the fetch flow of the current tick.
    pub fn mret(&mut self) -> ExecutionResult {
        trace!("exec mret");
        self.core.resume_from_trap();
        Ok(Action::Hold)
    }

    /// `sret` takes the same return path as `mret`: this core keeps no delegated trap state for
    /// the lower modes to differ on.
    pub fn sret(&mut self) -> ExecutionResult {
        trace!("exec sret");
        self.core.resume_from_trap();
        Ok(Action::Hold)
    }

    pub fn uret(&mut self) -> ExecutionResult {
        trace!("exec uret");
        self.core.resume_from_trap();
        Ok(Action::Hold)
    }

    /// `csrrw`: atomic swap — the CSR's old value lands in rd, rs1's value in the CSR. A
    /// destination of x0 simply discards the read.
    pub fn csrrw(&mut self, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("exec csrrw {dest}, {csr:#x}, {src}");
        self.csr_reg_op(CsrOp::ReadWrite, dest, csr, src)
    }

    /// `csrrs`: read the CSR into rd and set the bits rs1 holds high. With rs1 == x0 the CSR is
    /// read but never written.
    pub fn csrrs(&mut self, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("exec csrrs {dest}, {csr:#x}, {src}");
        self.csr_reg_op(CsrOp::ReadSet, dest, csr, src)
    }

    /// `csrrc`: read the CSR into rd and clear the bits rs1 holds high. With rs1 == x0 the CSR
    /// is read but never written.
    pub fn csrrc(&mut self, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("exec csrrc {dest}, {csr:#x}, {src}");
        self.csr_reg_op(CsrOp::ReadClear, dest, csr, src)
    }

    /// The immediate CSR variants use the 5-bit rs1 slot as a zero-extended operand instead of
    /// a register value.
    pub fn csrrwi(
        &mut self,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        trace!("exec csrrwi {dest}, {csr:#x}, {immediate}");
        self.csr_imm_op(CsrOp::ReadWrite, dest, csr, immediate)
    }

    /// `csrrsi`/`csrrci` with a zero immediate read the CSR but leave it unwritten.
    pub fn csrrsi(
        &mut self,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        trace!("exec csrrsi {dest}, {csr:#x}, {immediate}");
        self.csr_imm_op(CsrOp::ReadSet, dest, csr, immediate)
    }

    pub fn csrrci(
        &mut self,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        trace!("exec csrrci {dest}, {csr:#x}, {immediate}");
        self.csr_imm_op(CsrOp::ReadClear, dest, csr, immediate)
    }

    /// Dispatches a custom-0 instruction to the attached accelerator with the values of rs1 and
    /// rs2. A returned value is written to rd. The accelerator accesses memory synchronously
    /// through the port; that traffic is part of this instruction's cycle.
    pub fn custom0(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        trace!("exec custom0 {dest}, {src1}, {src2}");
        let rs1 = self.core.registers.x(src1);
        let rs2 = self.core.registers.x(src2);
        let (accelerator, memory) = self.core.accelerator_and_memory();
        let (Some(accelerator), Some(memory)) = (accelerator, memory) else {
            // No accelerator (or no memory) to dispatch to.
            return Err(TrapCause::IllegalInstruction);
        };
        if let Some(result) = accelerator.execute(memory, rs1, rs2) {
            self.core.registers.set_x(dest, result);
        }
        Ok(Action::Advance)
    }

    // Private generic implementations

    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src), immediate));
        Ok(Action::Advance)
    }

    fn reg_shamt_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        if shift_amount_u5 > 31 {
            panic!("out of range u5 used");
        }
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src), shift_amount_u5));
        Ok(Action::Advance)
    }

    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        Ok(Action::Advance)
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u32, u32) -> bool,
    {
        let registers = &self.core.registers;
        if predicate(registers.x(src1), registers.x(src2)) {
            let target = registers.pc().wrapping_add_signed(offset);
            self.core.counters.increment_branch_taken();
            Ok(Action::Jump(target))
        } else {
            Ok(Action::Advance)
        }
    }

    fn load_op(
        &mut self,
        op: DmemOp,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        let address = self.core.registers.x(base).wrapping_add_signed(offset);
        match op {
            DmemOp::Lh => assert!(
                Alignment::HALFWORD.is_aligned(address),
                "LH requires 2-byte alignment"
            ),
            DmemOp::Lhu => assert!(
                Alignment::HALFWORD.is_aligned(address),
                "LHU requires 2-byte alignment"
            ),
            DmemOp::Lw => assert!(
                Alignment::WORD.is_aligned(address),
                "LW requires 4-byte alignment"
            ),
            _ => {}
        }
        Ok(Action::Memory(MemAccess {
            op,
            addr: address,
            data: 0,
            rd: dest,
        }))
    }

    fn store_op(
        &mut self,
        op: DmemOp,
        src: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        let address = self.core.registers.x(base).wrapping_add_signed(offset);
        match op {
            DmemOp::Sh => assert!(
                Alignment::HALFWORD.is_aligned(address),
                "SH requires 2-byte alignment"
            ),
            DmemOp::Sw => assert!(
                Alignment::WORD.is_aligned(address),
                "SW requires 4-byte alignment"
            ),
            _ => {}
        }
        Ok(Action::Memory(MemAccess {
            op,
            addr: address,
            data: self.core.registers.x(src),
            rd: Specifier::X0,
        }))
    }

    fn csr_reg_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    ) -> ExecutionResult {
        // A read-set/read-clear naming x0 as its source must not write the CSR at all; a
        // read-write always writes, even when rs1 is x0 (writing zero).
        let write_value = match op {
            CsrOp::ReadWrite => Some(self.core.registers.x(src)),
            CsrOp::ReadSet | CsrOp::ReadClear => {
                if src == Specifier::X0 {
                    None
                } else {
                    Some(self.core.registers.x(src))
                }
            }
        };
        self.csr_op(op, dest, csr, write_value)
    }

    fn csr_imm_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult {
        // CSRRWI always writes; for CSRRSI/CSRRCI a zero immediate elides the write entirely.
        let write_value = match op {
            CsrOp::ReadWrite => Some(immediate),
            CsrOp::ReadSet | CsrOp::ReadClear => {
                if immediate == 0 {
                    None
                } else {
                    Some(immediate)
                }
            }
        };
        self.csr_op(op, dest, csr, write_value)
    }

    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src_value: Option<u32>,
    ) -> ExecutionResult {
        // The old value is read before the write so a CSR instruction naming the same register
        // as source and destination swaps rather than clobbers.
        let old_value = self.core.read_csr(csr);
        self.core.registers.set_x(dest, old_value);
        if let Some(src_value) = src_value {
            let new_value = match op {
                CsrOp::ReadWrite => src_value,
                CsrOp::ReadSet => old_value | src_value,
                CsrOp::ReadClear => old_value & !src_value,
            };
            self.core.write_csr(csr, new_value);
        }
        Ok(Action::Advance)
    }
}
