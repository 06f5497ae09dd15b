use crate::core::csr::CsrSpecifier;
use crate::registers::Specifier;
use log::trace;
use thiserror::Error;

/// Data structure that can hold any supported instruction in its decoded form.
///
/// Covers the RV32IM subset this tile executes: the RV32I base, Zicsr, the M extension (plus
/// `MULW` as a low-32 multiply alias), the machine-level system instructions, and the custom-0
/// opcode space used for accelerator dispatch.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    },
    Auipc {
        dest: Specifier,
        immediate: i32,
    },
    Lui {
        dest: Specifier,
        immediate: i32,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Jal {
        dest: Specifier,
        offset: i32,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    Fence,
    FenceI,
    Ecall,
    Ebreak,
    Uret,
    Sret,
    Mret,
    Csr {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    },
    Csri {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    },
    /// An instruction in the custom-0 opcode space (major opcode `0x0B`), forwarded to the
    /// attached accelerator with the values of `src1` and `src2`.
    Custom0 {
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add,
    Slt,
    Sltu,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sub,
    Sra,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    /// Nominally an RV64 instruction; treated here as a low-32 multiply for compatibility with
    /// the programs this tile runs.
    Mulw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bltu,
    Bge,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp {
    /// Atomic Read/Write CSR.
    ReadWrite,
    /// Atomic Read and Set Bits in CSR.
    ReadSet,
    /// Atomic Read and Clear Bits in CSR.
    ReadClear,
}

impl Instruction {
    pub fn decode(raw_instruction: u32) -> Result<Self, DecodeError> {
        trace!("Decoding instruction {raw_instruction:#010x}");
        match opcode(raw_instruction).ok_or(DecodeError::UnsupportedOpcode)? {
            Opcode::OpImm => match i_funct(raw_instruction) {
                Some(op) => Ok(Self::OpImm {
                    op,
                    dest: rd(raw_instruction),
                    src: rs1(raw_instruction),
                    immediate: i_imm(raw_instruction),
                }),
                None => match i_shfunct(raw_instruction) {
                    Some(op) => Ok(Self::OpShiftImm {
                        op,
                        dest: rd(raw_instruction),
                        src: rs1(raw_instruction),
                        shift_amount_u5: shamt(raw_instruction),
                    }),
                    None => Err(DecodeError::IllegalInstruction),
                },
            },
            Opcode::Auipc => Ok(Self::Auipc {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Lui => Ok(Self::Lui {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Op => match r_funct(raw_instruction) {
                Some(op) => Ok(Self::Op {
                    op,
                    dest: rd(raw_instruction),
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Op32 => {
                // Of OP-32, only MULW is recognized, as a low-32 multiply.
                match (funct7(raw_instruction), funct3(raw_instruction)) {
                    (0b0000001, 0b000) => Ok(Self::Op {
                        op: RegRegOp::Mulw,
                        dest: rd(raw_instruction),
                        src1: rs1(raw_instruction),
                        src2: rs2(raw_instruction),
                    }),
                    _ => Err(DecodeError::IllegalInstruction),
                }
            }
            Opcode::Jal => Ok(Self::Jal {
                dest: rd(raw_instruction),
                offset: j_imm(raw_instruction),
            }),
            Opcode::Jalr => Ok(Self::Jalr {
                dest: rd(raw_instruction),
                base: rs1(raw_instruction),
                offset: i_imm(raw_instruction),
            }),
            Opcode::Branch => match b_funct(raw_instruction) {
                Some(condition) => Ok(Self::Branch {
                    condition,
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                    offset: b_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Load => match i_width(raw_instruction) {
                Some(width) => Ok(Self::Load {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Store => match s_width(raw_instruction) {
                Some(width) => Ok(Self::Store {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::MiscMem => match funct3(raw_instruction) {
                // All unused fields of FENCE (fm, predecessor/successor sets, rs1, rd) are
                // reserved for forward compatibility and treated as a plain fence. On this
                // single-hart in-order tile both fences are no-ops anyway.
                0b000 => Ok(Self::Fence),
                0b001 => Ok(Self::FenceI),
                _ => Err(DecodeError::IllegalInstruction),
            },
            Opcode::System => match i_sys(raw_instruction) {
                Some(sys) => match sys {
                    SysFunct::Priv => {
                        // The 12-bit I-immediate selects the privileged subtype.
                        match funct12(raw_instruction) {
                            0x000 => Ok(Self::Ecall),
                            0x001 => Ok(Self::Ebreak),
                            0x002 => Ok(Self::Uret),
                            0x102 => Ok(Self::Sret),
                            0x302 => Ok(Self::Mret),
                            _ => Err(DecodeError::IllegalInstruction),
                        }
                    }
                    SysFunct::Csrrw | SysFunct::Csrrs | SysFunct::Csrrc => Ok(Instruction::Csr {
                        op: match sys {
                            SysFunct::Csrrw => CsrOp::ReadWrite,
                            SysFunct::Csrrs => CsrOp::ReadSet,
                            SysFunct::Csrrc => CsrOp::ReadClear,
                            _ => unreachable!(), // Already checked in outer match
                        },
                        dest: rd(raw_instruction),
                        csr: csr(raw_instruction),
                        src: rs1(raw_instruction),
                    }),
                    SysFunct::Csrrwi | SysFunct::Csrrsi | SysFunct::Csrrci => {
                        Ok(Instruction::Csri {
                            op: match sys {
                                SysFunct::Csrrwi => CsrOp::ReadWrite,
                                SysFunct::Csrrsi => CsrOp::ReadSet,
                                SysFunct::Csrrci => CsrOp::ReadClear,
                                _ => unreachable!(), // Already checked in outer match
                            },
                            dest: rd(raw_instruction),
                            csr: csr(raw_instruction),
                            immediate: u32::from(rs1(raw_instruction)),
                        })
                    }
                },
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Custom0 => Ok(Self::Custom0 {
                dest: rd(raw_instruction),
                src1: rs1(raw_instruction),
                src2: rs2(raw_instruction),
            }),
        }
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("instruction has unsupported opcode")]
    UnsupportedOpcode,
    #[error("illegal instruction")]
    IllegalInstruction,
}

/// Pull out the bit field `hi..=lo` of an instruction word, right-justified.
fn bits(raw: u32, hi: u32, lo: u32) -> u32 {
    (raw >> lo) & ((1 << (hi - lo + 1)) - 1)
}

/// Sign-extend the low `width` bits of an assembled immediate.
fn sign_extend(value: u32, width: u32) -> i32 {
    let unused = 32 - width;
    (value << unused) as i32 >> unused
}

/// Map the low 7 bits onto the major opcodes this tile understands.
fn opcode(raw: u32) -> Option<Opcode> {
    match raw & 0x7F {
        0x03 => Some(Opcode::Load),
        0x0B => Some(Opcode::Custom0),
        0x0F => Some(Opcode::MiscMem),
        0x13 => Some(Opcode::OpImm),
        0x17 => Some(Opcode::Auipc),
        0x23 => Some(Opcode::Store),
        0x33 => Some(Opcode::Op),
        0x37 => Some(Opcode::Lui),
        0x3B => Some(Opcode::Op32),
        0x63 => Some(Opcode::Branch),
        0x67 => Some(Opcode::Jalr),
        0x6F => Some(Opcode::Jal),
        0x73 => Some(Opcode::System),
        // Everything else (FP loads/stores, AMO, the remaining custom spaces, longer encodings)
        // sits outside this tile's ISA.
        _ => None,
    }
}

/// Destination register field, bits 11..=7.
fn rd(raw: u32) -> Specifier {
    Specifier::from_u5(bits(raw, 11, 7) as u8)
}

/// First source register field, bits 19..=15.
fn rs1(raw: u32) -> Specifier {
    Specifier::from_u5(bits(raw, 19, 15) as u8)
}

/// Second source register field, bits 24..=20.
fn rs2(raw: u32) -> Specifier {
    Specifier::from_u5(bits(raw, 24, 20) as u8)
}

/// CSR address of a Zicsr instruction; occupies the I-immediate slot, taken unsigned.
fn csr(raw: u32) -> CsrSpecifier {
    bits(raw, 31, 20) as u16
}

/// Minor opcode, bits 14..=12.
fn funct3(raw: u32) -> u8 {
    bits(raw, 14, 12) as u8
}

/// Sub-function field of R-form instructions, bits 31..=25.
fn funct7(raw: u32) -> u8 {
    bits(raw, 31, 25) as u8
}

/// Shift amount of the shift-immediate forms; lives in the low five bits of the rs2 slot.
fn shamt(raw: u32) -> u32 {
    bits(raw, 24, 20)
}

/// I-form immediate, sign-extended from 12 bits.
fn i_imm(raw: u32) -> i32 {
    sign_extend(bits(raw, 31, 20), 12)
}

/// The whole 12-bit immediate slot taken unsigned; selects the privileged system subtypes.
fn funct12(raw: u32) -> u32 {
    bits(raw, 31, 20)
}

/// S-form immediate: split across the funct7 and rd slots, sign-extended from 12 bits.
fn s_imm(raw: u32) -> i32 {
    let assembled = (bits(raw, 31, 25) << 5) | bits(raw, 11, 7);
    sign_extend(assembled, 12)
}

/// B-form immediate: the scrambled 13-bit branch offset (bit 0 is implicitly zero).
fn b_imm(raw: u32) -> i32 {
    let assembled = (bits(raw, 31, 31) << 12)
        | (bits(raw, 7, 7) << 11)
        | (bits(raw, 30, 25) << 5)
        | (bits(raw, 11, 8) << 1);
    sign_extend(assembled, 13)
}

/// U-form immediate: the top 20 bits of the word, with the low 12 left zero.
fn u_imm(raw: u32) -> i32 {
    (raw & 0xFFFF_F000) as i32
}

/// J-form immediate: the scrambled 21-bit jump offset (bit 0 is implicitly zero).
fn j_imm(raw: u32) -> i32 {
    let assembled = (bits(raw, 31, 31) << 20)
        | (bits(raw, 19, 12) << 12)
        | (bits(raw, 20, 20) << 11)
        | (bits(raw, 30, 21) << 1);
    sign_extend(assembled, 21)
}

fn i_funct(raw: u32) -> Option<RegImmOp> {
    match funct3(raw) {
        0b000 => Some(RegImmOp::Addi),
        0b010 => Some(RegImmOp::Slti),
        0b011 => Some(RegImmOp::Sltiu),
        0b100 => Some(RegImmOp::Xori),
        0b110 => Some(RegImmOp::Ori),
        0b111 => Some(RegImmOp::Andi),
        _ => None,
    }
}

/// The shift-immediate forms reuse the funct7 slot to pick logical vs. arithmetic.
fn i_shfunct(raw: u32) -> Option<RegShiftImmOp> {
    match (funct3(raw), funct7(raw)) {
        (0b001, 0b0000000) => Some(RegShiftImmOp::Slli),
        (0b101, 0b0000000) => Some(RegShiftImmOp::Srli),
        (0b101, 0b0100000) => Some(RegShiftImmOp::Srai),
        _ => None,
    }
}

fn i_sys(raw: u32) -> Option<SysFunct> {
    match funct3(raw) {
        0b000 => Some(SysFunct::Priv),
        0b001 => Some(SysFunct::Csrrw),
        0b010 => Some(SysFunct::Csrrs),
        0b011 => Some(SysFunct::Csrrc),
        0b101 => Some(SysFunct::Csrrwi),
        0b110 => Some(SysFunct::Csrrsi),
        0b111 => Some(SysFunct::Csrrci),
        _ => None,
    }
}

fn i_width(raw: u32) -> Option<LoadWidth> {
    match funct3(raw) {
        0b000 => Some(LoadWidth::Lb),
        0b001 => Some(LoadWidth::Lh),
        0b010 => Some(LoadWidth::Lw),
        0b100 => Some(LoadWidth::Lbu),
        0b101 => Some(LoadWidth::Lhu),
        _ => None,
    }
}

fn s_width(raw: u32) -> Option<StoreWidth> {
    match funct3(raw) {
        0b000 => Some(StoreWidth::Sb),
        0b001 => Some(StoreWidth::Sh),
        0b010 => Some(StoreWidth::Sw),
        _ => None,
    }
}

/// OP-form decode keyed on funct7 first: the base set, the SUB/SRA pair, and the M extension.
fn r_funct(raw: u32) -> Option<RegRegOp> {
    match funct7(raw) {
        0b0000000 => match funct3(raw) {
            0b000 => Some(RegRegOp::Add),
            0b001 => Some(RegRegOp::Sll),
            0b010 => Some(RegRegOp::Slt),
            0b011 => Some(RegRegOp::Sltu),
            0b100 => Some(RegRegOp::Xor),
            0b101 => Some(RegRegOp::Srl),
            0b110 => Some(RegRegOp::Or),
            0b111 => Some(RegRegOp::And),
            _ => None,
        },
        0b0100000 => match funct3(raw) {
            0b000 => Some(RegRegOp::Sub),
            0b101 => Some(RegRegOp::Sra),
            _ => None,
        },
        0b0000001 => match funct3(raw) {
            0b000 => Some(RegRegOp::Mul),
            0b001 => Some(RegRegOp::Mulh),
            0b010 => Some(RegRegOp::Mulhsu),
            0b011 => Some(RegRegOp::Mulhu),
            0b100 => Some(RegRegOp::Div),
            0b101 => Some(RegRegOp::Divu),
            0b110 => Some(RegRegOp::Rem),
            0b111 => Some(RegRegOp::Remu),
            _ => None,
        },
        _ => None,
    }
}

fn b_funct(raw: u32) -> Option<BranchCondition> {
    match funct3(raw) {
        0b000 => Some(BranchCondition::Beq),
        0b001 => Some(BranchCondition::Bne),
        0b100 => Some(BranchCondition::Blt),
        0b101 => Some(BranchCondition::Bge),
        0b110 => Some(BranchCondition::Bltu),
        0b111 => Some(BranchCondition::Bgeu),
        _ => None,
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Opcode {
    OpImm,
    Auipc,
    Lui,
    Op,
    Op32,
    Jal,
    Jalr,
    Branch,
    Load,
    Store,
    MiscMem,
    System,
    Custom0,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SysFunct {
    Priv,
    Csrrw,
    Csrrs,
    Csrrc,
    Csrrwi,
    Csrrsi,
    Csrrci,
}
