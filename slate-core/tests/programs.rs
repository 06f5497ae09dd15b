//! End-to-end scenarios: whole programs run through the timed memory hierarchy, with the test
//! acting as the external harness (trap observation, exit-syscall detection, postmortem).

use std::cell::RefCell;
use std::rc::Rc;

use slate_core::core::{MemModel, Tile};
use slate_core::diagnostics::{self, TrapSightings};
use slate_core::dram::Dram;
use slate_core::loader;
use slate_core::port::{DirectPort, MemoryPort};
use slate_core::timed::TimedPort;

/// RV32 instruction encoders for the hand-assembled test programs.
mod rv {
    pub fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
        (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
    }

    pub fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
        ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
    }

    pub fn s_type(imm: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
        let imm = imm as u32 & 0xFFF;
        ((imm >> 5) << 25)
            | (rs2 << 20)
            | (rs1 << 15)
            | (funct3 << 12)
            | ((imm & 0x1F) << 7)
            | 0x23
    }

    pub fn b_type(offset: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
        assert_eq!(0, offset & 1, "branch offsets are even");
        let imm = offset as u32 & 0x1FFF;
        (((imm >> 12) & 1) << 31)
            | (((imm >> 5) & 0x3F) << 25)
            | (rs2 << 20)
            | (rs1 << 15)
            | (funct3 << 12)
            | (((imm >> 1) & 0xF) << 8)
            | (((imm >> 11) & 1) << 7)
            | 0x63
    }

    pub fn j_type(offset: i32, rd: u32) -> u32 {
        assert_eq!(0, offset & 1, "jump offsets are even");
        let imm = offset as u32 & 0x1F_FFFF;
        (((imm >> 20) & 1) << 31)
            | (((imm >> 1) & 0x3FF) << 21)
            | (((imm >> 11) & 1) << 20)
            | (((imm >> 12) & 0xFF) << 12)
            | (rd << 7)
            | 0x6F
    }

    pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 0x0, rd, 0x13)
    }

    pub fn sltiu(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 0x3, rd, 0x13)
    }

    pub fn andi(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 0x7, rd, 0x13)
    }

    pub fn lui(rd: u32, imm20: u32) -> u32 {
        (imm20 << 12) | (rd << 7) | 0x37
    }

    pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x00, rs2, rs1, 0x0, rd, 0x33)
    }

    pub fn sub(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x20, rs2, rs1, 0x0, rd, 0x33)
    }

    pub fn slt(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x00, rs2, rs1, 0x2, rd, 0x33)
    }

    pub fn sltu(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x00, rs2, rs1, 0x3, rd, 0x33)
    }

    pub fn mul(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x01, rs2, rs1, 0x0, rd, 0x33)
    }

    pub fn mulh(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x01, rs2, rs1, 0x1, rd, 0x33)
    }

    pub fn mulhsu(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x01, rs2, rs1, 0x2, rd, 0x33)
    }

    pub fn mulhu(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x01, rs2, rs1, 0x3, rd, 0x33)
    }

    pub fn div(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x01, rs2, rs1, 0x4, rd, 0x33)
    }

    pub fn divu(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x01, rs2, rs1, 0x5, rd, 0x33)
    }

    pub fn rem(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x01, rs2, rs1, 0x6, rd, 0x33)
    }

    pub fn remu(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x01, rs2, rs1, 0x7, rd, 0x33)
    }

    pub fn mulw(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x01, rs2, rs1, 0x0, rd, 0x3B)
    }

    pub fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 0x2, rd, 0x03)
    }

    pub fn lb(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 0x0, rd, 0x03)
    }

    pub fn lbu(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 0x4, rd, 0x03)
    }

    pub fn lhu(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 0x5, rd, 0x03)
    }

    pub fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
        s_type(imm, rs2, rs1, 0x2)
    }

    pub fn sh(rs2: u32, rs1: u32, imm: i32) -> u32 {
        s_type(imm, rs2, rs1, 0x1)
    }

    pub fn sb(rs2: u32, rs1: u32, imm: i32) -> u32 {
        s_type(imm, rs2, rs1, 0x0)
    }

    pub fn beq(rs1: u32, rs2: u32, offset: i32) -> u32 {
        b_type(offset, rs2, rs1, 0x0)
    }

    pub fn bne(rs1: u32, rs2: u32, offset: i32) -> u32 {
        b_type(offset, rs2, rs1, 0x1)
    }

    pub fn blt(rs1: u32, rs2: u32, offset: i32) -> u32 {
        b_type(offset, rs2, rs1, 0x4)
    }

    pub fn jal(rd: u32, offset: i32) -> u32 {
        j_type(offset, rd)
    }

    pub fn csrrw(rd: u32, csr: u32, rs1: u32) -> u32 {
        (csr << 20) | (rs1 << 15) | (0x1 << 12) | (rd << 7) | 0x73
    }

    pub fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
        (csr << 20) | (rs1 << 15) | (0x2 << 12) | (rd << 7) | 0x73
    }

    pub const ECALL: u32 = 0x0000_0073;
    pub const EBREAK: u32 = 0x0010_0073;
    pub const MRET: u32 = 0x3020_0073;

    pub const MTVEC: u32 = 0x305;
    pub const MEPC: u32 = 0x341;
    pub const MCAUSE: u32 = 0x342;
}

const LATENCY: u32 = 2;

fn timed_tile(program: &[u32]) -> Tile {
    let mut port = TimedPort::new(DirectPort::new(Dram::new()), LATENCY);
    loader::load_words(&mut port, 0, program);
    let mut tile = Tile::new();
    tile.attach_memory(Box::new(port));
    tile
}

fn ideal_tile(program: &[u32]) -> Tile {
    let mut port = DirectPort::new(Dram::new());
    loader::load_words(&mut port, 0, program);
    let mut tile = Tile::new();
    tile.attach_memory(Box::new(port));
    tile.set_mem_model(MemModel::Ideal);
    tile
}

/// Drive the tile as the external harness would: tick, observe traps, service the exit syscall.
fn run_to_exit(tile: &mut Tile, max_cycles: u64) -> (TrapSightings, u64) {
    let mut sightings = TrapSightings::default();
    let mut cycle = 0;
    while cycle < max_cycles && !tile.has_exited() {
        tile.tick();
        cycle += 1;
        diagnostics::observe_trap(tile, &mut sightings, 0);
    }
    assert!(
        tile.has_exited(),
        "program did not exit within {max_cycles} cycles (pc={:#010x})",
        tile.pc()
    );
    (sightings, cycle)
}

fn run_cycles(tile: &mut Tile, cycles: u64) -> TrapSightings {
    let mut sightings = TrapSightings::default();
    for _ in 0..cycles {
        tile.tick();
        diagnostics::observe_trap(tile, &mut sightings, 0);
        if tile.has_exited() {
            break;
        }
    }
    sightings
}

fn exit_with(code: i32) -> [u32; 3] {
    [rv::addi(10, 0, code), rv::addi(17, 0, 93), rv::ECALL]
}

// Scenario programs

fn rtype_slt_program() -> Vec<u32> {
    vec![
        rv::addi(5, 0, -1),
        rv::addi(6, 0, 1),
        rv::slt(7, 5, 6),   // (-1 < 1) signed -> 1
        rv::sltu(28, 5, 6), // (0xFFFFFFFF < 1) unsigned -> 0
        rv::sub(10, 7, 28), // exit code 1 iff both held
        rv::addi(17, 0, 93),
        rv::ECALL,
    ]
}

fn store_bh_program() -> Vec<u32> {
    vec![
        rv::addi(1, 0, 0x200),
        rv::sw(0, 1, 0),
        rv::addi(2, 0, 0xAA),
        rv::sb(2, 1, 0),
        rv::addi(3, 0, 0x55),
        rv::sb(3, 1, 1),
        rv::lui(4, 0xD),
        rv::addi(4, 4, -973), // 0xCC33
        rv::sh(4, 1, 2),
        rv::lw(10, 1, 0), // 0xCC3355AA
        rv::lui(5, 0xCC335),
        rv::addi(5, 5, 0x5AA),
        rv::sub(6, 10, 5),
        rv::sltiu(10, 6, 1), // 1 iff the readback matched
        rv::addi(17, 0, 93),
        rv::ECALL,
    ]
}

fn sum_lpv_program() -> Vec<u32> {
    vec![
        rv::addi(1, 0, 0x200),
        rv::addi(2, 0, 0),
        rv::addi(3, 0, 16),
        // store loop: LPV[i] = i + 1
        rv::addi(4, 2, 1),
        rv::sw(4, 1, 0),
        rv::addi(1, 1, 4),
        rv::addi(2, 2, 1),
        rv::blt(2, 3, -16),
        // sum loop
        rv::addi(1, 0, 0x200),
        rv::addi(2, 0, 0),
        rv::addi(5, 0, 0),
        rv::lw(4, 1, 0),
        rv::add(5, 5, 4),
        rv::addi(1, 1, 4),
        rv::addi(2, 2, 1),
        rv::blt(2, 3, -16),
        rv::addi(6, 0, 0x100),
        rv::sw(5, 6, 0),
        rv::add(10, 5, 0),
        rv::addi(17, 0, 93),
        rv::ECALL,
    ]
}

fn m_extension_program() -> Vec<u32> {
    // x31 counts failed sub-tests; each check skips the increment when the result matches.
    fn check(body: &mut Vec<u32>, expected_reg: u32) {
        body.push(rv::beq(7, expected_reg, 8));
        body.push(rv::addi(31, 31, 1));
    }
    let mut p = vec![rv::addi(31, 0, 0)];
    // MUL 7 * -3 = -21
    p.extend([rv::addi(5, 0, 7), rv::addi(6, 0, -3), rv::mul(7, 5, 6)]);
    p.push(rv::addi(28, 0, -21));
    check(&mut p, 28);
    // MULH of -1 * -1 has a zero high word
    p.extend([rv::addi(5, 0, -1), rv::mulh(7, 5, 5)]);
    check(&mut p, 0);
    // MULHU 0xFFFFFFFF * 0xFFFFFFFF -> high word 0xFFFFFFFE
    p.push(rv::mulhu(7, 5, 5));
    p.push(rv::addi(28, 0, -2));
    check(&mut p, 28);
    // MULHSU -1 * 0xFFFFFFFF -> high word 0xFFFFFFFF
    p.push(rv::mulhsu(7, 5, 5));
    p.push(rv::addi(28, 0, -1));
    check(&mut p, 28);
    // DIV 10 / -3 = -3 (round toward zero)
    p.extend([rv::addi(5, 0, 10), rv::addi(6, 0, -3), rv::div(7, 5, 6)]);
    p.push(rv::addi(28, 0, -3));
    check(&mut p, 28);
    // REM 10 % -3 = 1 (sign of the dividend)
    p.push(rv::rem(7, 5, 6));
    p.push(rv::addi(28, 0, 1));
    check(&mut p, 28);
    // DIV by zero -> all ones
    p.push(rv::div(7, 5, 0));
    p.push(rv::addi(28, 0, -1));
    check(&mut p, 28);
    // REM by zero -> dividend
    p.push(rv::rem(7, 5, 0));
    check(&mut p, 5);
    // DIV INT_MIN / -1 -> INT_MIN, remainder 0
    p.extend([rv::lui(5, 0x80000), rv::addi(6, 0, -1), rv::div(7, 5, 6)]);
    check(&mut p, 5);
    p.push(rv::rem(7, 5, 6));
    check(&mut p, 0);
    // DIVU 0xFFFFFFFF / 2 = 0x7FFFFFFF
    p.extend([rv::addi(5, 0, -1), rv::addi(6, 0, 2), rv::divu(7, 5, 6)]);
    p.extend([rv::lui(28, 0x80000), rv::addi(28, 28, -1)]);
    check(&mut p, 28);
    // REMU 0xFFFFFFFF % 2 = 1
    p.push(rv::remu(7, 5, 6));
    p.push(rv::addi(28, 0, 1));
    check(&mut p, 28);
    // MULW behaves as a low-32 multiply
    p.extend([rv::addi(5, 0, 6), rv::addi(6, 0, 7), rv::mulw(7, 5, 6)]);
    p.push(rv::addi(28, 0, 42));
    check(&mut p, 28);
    // Exit 1 iff no sub-test failed.
    p.push(rv::sltiu(10, 31, 1));
    p.push(rv::addi(17, 0, 93));
    p.push(rv::ECALL);
    p
}

fn mem_stress_program() -> Vec<u32> {
    vec![
        rv::addi(1, 0, 0x200),
        rv::sw(0, 1, 0),
        rv::addi(2, 0, 0xAA),
        rv::sb(2, 1, 0),
        rv::addi(2, 0, 0x33),
        rv::sb(2, 1, 1),
        rv::lui(3, 0xC),
        rv::addi(3, 3, -273), // 0xBEEF
        rv::sh(3, 1, 2),
        rv::lw(4, 1, 0),       // 0xBEEF33AA
        rv::addi(5, 4, -0x65), // checksum 0xBEEF3345
        rv::addi(6, 0, 0x100),
        rv::sw(5, 6, 0),
        rv::andi(10, 5, 0xFF), // exit 0x45
        rv::addi(17, 0, 93),
        rv::ECALL,
    ]
}

fn smurf_debug_program() -> Vec<u32> {
    let mut p = vec![
        // 0x00: install the trap handler
        rv::addi(5, 0, 0x50),
        rv::csrrw(0, rv::MTVEC, 5),
        // 0x08: scratch words
        rv::lui(6, 0x11112),
        rv::addi(6, 6, 0x222), // 0x11112222
        rv::addi(7, 0, 0x100),
        rv::sw(6, 7, 0),
        rv::lui(6, 0x33334),
        rv::addi(6, 6, 0x444), // 0x33334444
        rv::sw(6, 7, 4),
        // 0x24: constants into t0/t1/s0/a0
        rv::addi(5, 0, 1),
        rv::addi(6, 0, 2),
        rv::addi(8, 0, 3),
        rv::addi(10, 0, 4),
        // 0x34: breakpoint, then exit 42
        rv::EBREAK,
        rv::addi(10, 0, 42),
        rv::addi(17, 0, 93),
        rv::ECALL,
    ];
    // pad to the handler at 0x50
    while p.len() < 20 {
        p.push(0);
    }
    p.extend([
        // 0x50: breakpoint handler: set the flag, step mepc past the ebreak, return
        rv::lui(30, 0xC),
        rv::addi(30, 30, -273), // 0xBEEF
        rv::addi(31, 0, 0x108),
        rv::sw(30, 31, 0),
        rv::csrrs(28, rv::MEPC, 0),
        rv::addi(28, 28, 4),
        rv::csrrw(0, rv::MEPC, 28),
        rv::MRET,
    ]);
    p
}

/// Program for the postmortem path: traps are handled, flags written, and the final environment
/// call parks inside the handler instead of returning.
fn trap_flags_program() -> Vec<u32> {
    let mut p = vec![
        rv::addi(5, 0, 0x40),
        rv::csrrw(0, rv::MTVEC, 5),
        rv::EBREAK,
        rv::addi(17, 0, 0), // a7 = 0: a plain environment call, not an exit
        rv::ECALL,
        rv::jal(0, 0),
    ];
    while p.len() < 16 {
        p.push(0);
    }
    p.extend([
        // 0x40: dispatch on mcause
        rv::csrrs(28, rv::MCAUSE, 0),
        rv::addi(29, 0, 3),
        rv::bne(28, 29, 32), // not a breakpoint -> 0x68
        // breakpoint: set flag, advance mepc, return
        rv::lui(30, 0xC),
        rv::addi(30, 30, -273), // 0xBEEF
        rv::sw(30, 0, 0x108),
        rv::csrrs(28, rv::MEPC, 0),
        rv::addi(28, 28, 4),
        rv::csrrw(0, rv::MEPC, 28),
        rv::MRET,
        // 0x68: environment call: set flag and park with MPP still Machine
        rv::lui(30, 0xE),
        rv::addi(30, 30, -339), // 0xDEAD
        rv::sw(30, 0, 0x104),
        rv::jal(0, 0),
    ]);
    p
}

// Scenarios

#[test]
fn rtype_slt() {
    let mut tile = timed_tile(&rtype_slt_program());
    run_to_exit(&mut tile, 1_000);
    assert_eq!(1, tile.exit_code());
    assert_eq!(11, tile.mcause(), "exit ecall from machine mode");
    assert_eq!(1, tile.reg(7), "slt(-1, 1) is a signed compare");
    assert_eq!(0, tile.reg(28), "sltu(0xFFFFFFFF, 1) is an unsigned compare");
}

#[test]
fn store_bh() {
    let mut tile = timed_tile(&store_bh_program());
    run_to_exit(&mut tile, 2_000);
    assert_eq!(1, tile.exit_code());
    assert_eq!(0xCC33_55AA, tile.memory_mut().unwrap().read32(0x200));
}

#[test]
fn sum_lpv() {
    let mut tile = timed_tile(&sum_lpv_program());
    run_to_exit(&mut tile, 5_000);
    assert_eq!(136, tile.exit_code());
    assert_eq!(136, tile.memory_mut().unwrap().read32(0x100));
    for i in 0..16 {
        assert_eq!(i + 1, tile.memory_mut().unwrap().read32(0x200 + 4 * i));
    }
}

#[test]
fn m_extension() {
    let mut tile = timed_tile(&m_extension_program());
    run_to_exit(&mut tile, 5_000);
    assert_eq!(0, tile.reg(31), "failed sub-test count");
    assert_eq!(1, tile.exit_code());
}

#[test]
fn mem_stress() {
    let mut tile = timed_tile(&mem_stress_program());
    run_to_exit(&mut tile, 2_000);
    assert_eq!(0x45, tile.exit_code());
    assert_eq!(0xBEEF_33AA, tile.memory_mut().unwrap().read32(0x200));
    assert_eq!(0xBEEF_3345, tile.memory_mut().unwrap().read32(0x100));
}

#[test]
fn smurf_debug() {
    let mut tile = timed_tile(&smurf_debug_program());
    let (sightings, _) = run_to_exit(&mut tile, 5_000);
    assert_eq!(42, tile.exit_code());
    assert!(sightings.saw_breakpoint[0]);
    assert_eq!(0x34, sightings.breakpoint_mepc[0]);
    assert_eq!(0, sightings.breakpoint_mepc[0] & 0x3);
    assert!(sightings.saw_ecall[0]);
    // The scratch words survive the handler.
    assert_eq!(0x1111_2222, tile.memory_mut().unwrap().read32(0x100));
    assert_eq!(0x3333_4444, tile.memory_mut().unwrap().read32(0x104));
}

#[test]
fn postmortem_checks_pass_for_handled_traps() {
    let mut tile = timed_tile(&trap_flags_program());
    let sightings = run_cycles(&mut tile, 500);
    assert!(!tile.has_exited());
    let report = diagnostics::verify_postmortem(&mut tile, &sightings, 500)
        .expect("postmortem invariants hold");
    assert_eq!(0xBEEF, report.breakpoint_flag);
    assert_eq!(0xDEAD, report.ecall_flag);
}

#[test]
fn postmortem_rejects_missing_traps() {
    let mut tile = timed_tile(&rtype_slt_program());
    let sightings = TrapSightings::default();
    assert!(diagnostics::verify_postmortem(&mut tile, &sightings, 0).is_err());
}

// Cross-model equivalence

#[test]
fn timed_and_ideal_models_agree() {
    let program = mem_stress_program();
    let mut timed = timed_tile(&program);
    let mut ideal = ideal_tile(&program);
    run_to_exit(&mut timed, 2_000);
    run_to_exit(&mut ideal, 2_000);
    assert_eq!(timed.exit_code(), ideal.exit_code());
    for r in 0..32 {
        assert_eq!(timed.reg(r), ideal.reg(r), "x{r} differs between models");
    }
    for addr in [0x100, 0x200] {
        assert_eq!(
            timed.memory_mut().unwrap().read32(addr),
            ideal.memory_mut().unwrap().read32(addr),
        );
    }
}

// Invariants on the memory protocol

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Txn {
    Read(u32),
    Write(u32),
}

/// A port wrapper that logs every timed request, for protocol-ordering assertions.
#[derive(Debug)]
struct RecordingPort<P> {
    inner: P,
    log: Rc<RefCell<Vec<Txn>>>,
}

impl<P: MemoryPort> MemoryPort for RecordingPort<P> {
    fn read32(&mut self, addr: u32) -> u32 {
        self.inner.read32(addr)
    }

    fn write32(&mut self, addr: u32, value: u32) {
        self.inner.write32(addr, value);
    }

    fn cycle(&mut self) {
        self.inner.cycle();
    }

    fn can_request(&self) -> bool {
        self.inner.can_request()
    }

    fn request_read32(&mut self, addr: u32) {
        self.log.borrow_mut().push(Txn::Read(addr));
        self.inner.request_read32(addr);
    }

    fn request_write32(&mut self, addr: u32, value: u32) {
        self.log.borrow_mut().push(Txn::Write(addr));
        self.inner.request_write32(addr, value);
    }

    fn resp_valid(&self) -> bool {
        self.inner.resp_valid()
    }

    fn resp_data(&self) -> u32 {
        self.inner.resp_data()
    }

    fn resp_consume(&mut self) {
        self.inner.resp_consume();
    }
}

#[test]
fn subword_store_rmw_is_atomic() {
    // addi x1, x0, 0x200 ; addi x2, x0, 0xAA ; sb x2, 1(x1) ; exit 0
    let mut program = vec![rv::addi(1, 0, 0x200), rv::addi(2, 0, 0xAA), rv::sb(2, 1, 1)];
    program.extend(exit_with(0));

    let log = Rc::new(RefCell::new(Vec::new()));
    let mut port = RecordingPort {
        inner: TimedPort::new(DirectPort::new(Dram::new()), LATENCY),
        log: Rc::clone(&log),
    };
    loader::load_words(&mut port, 0, &program);
    let mut tile = Tile::new();
    tile.attach_memory(Box::new(port));
    run_to_exit(&mut tile, 1_000);

    assert_eq!(0x0000_AA00, tile.memory_mut().unwrap().read32(0x200));

    // The write phase of the RMW must directly follow its read phase: no fetch (or any other
    // request) may enter the port between the two.
    let log = log.borrow();
    let write_idx = log
        .iter()
        .position(|t| *t == Txn::Write(0x200))
        .expect("RMW write phase reached the port");
    assert_eq!(Txn::Read(0x200), log[write_idx - 1]);
}

// Counter bookkeeping

#[test]
fn counters_track_instruction_mix() {
    // addi, addi, lw, sw, beq (not taken), then exit
    let mut program = vec![
        rv::addi(1, 0, 0x200),
        rv::addi(2, 0, 5),
        rv::lw(3, 1, 0),
        rv::sw(2, 1, 0),
        rv::beq(2, 0, 8), // never taken: x2 == 5
    ];
    program.extend(exit_with(0));
    let mut tile = timed_tile(&program);
    run_to_exit(&mut tile, 1_000);

    let counters = tile.counters();
    // The two setup addi instructions plus the exit stub's two: arith counts OP-IMM only here.
    assert_eq!(4, counters.arith());
    assert_eq!(1, counters.load());
    assert_eq!(1, counters.store());
    assert_eq!(1, counters.branch());
    assert_eq!(0, counters.branch_taken());
    // Every decoded instruction is counted exactly once: 5 + the 3-instruction exit stub.
    assert_eq!(8, counters.inst());
}

#[test]
fn branch_taken_counts_taken_only() {
    let mut program = vec![
        rv::addi(1, 0, 1),
        rv::beq(1, 1, 8),  // taken: skips the next instruction
        rv::addi(1, 0, 7), // skipped
        rv::bne(1, 0, 8),  // taken
        rv::addi(1, 0, 9), // skipped
        rv::beq(1, 0, 8),  // not taken
    ];
    program.extend(exit_with(0));
    let mut tile = timed_tile(&program);
    run_to_exit(&mut tile, 1_000);
    assert_eq!(1, tile.reg(1));
    assert_eq!(3, tile.counters().branch());
    assert_eq!(2, tile.counters().branch_taken());
}

// Loads through the timed port

#[test]
fn subword_loads_extract_lanes() {
    // Word at 0x200 = 0x8070_4020; check LB/LBU/LHU lane extraction and sign extension.
    let mut program = vec![
        rv::addi(1, 0, 0x200),
        rv::lui(2, 0x80704),
        rv::addi(2, 2, 0x20), // 0x80704020
        rv::sw(2, 1, 0),
        rv::lb(5, 1, 3),  // 0x80 -> sign-extends to 0xFFFFFF80
        rv::lbu(6, 1, 3), // 0x80
        rv::lhu(7, 1, 2), // 0x8070
        rv::lb(28, 1, 1), // 0x40
    ];
    program.extend(exit_with(0));
    let mut tile = timed_tile(&program);
    run_to_exit(&mut tile, 1_000);
    assert_eq!(0xFFFF_FF80, tile.reg(5));
    assert_eq!(0x80, tile.reg(6));
    assert_eq!(0x8070, tile.reg(7));
    assert_eq!(0x40, tile.reg(28));
}
