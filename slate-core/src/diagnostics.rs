//! Read-only inspection of a tile that did not finish its program with the expected exit call,
//! plus the trap-observation hook harnesses poll between ticks.

use crate::core::{Tile, TrapCause, MSTATUS_MPP_MACHINE, MSTATUS_MPP_MASK};
use crate::registers::Specifier;
use std::fmt;
use thiserror::Error;

/// Address of the memory flag the loaded program's trap handler sets on an ECALL trap.
pub const ECALL_FLAG_ADDR: u32 = 0x0104;
/// Address of the memory flag the loaded program's trap handler sets on a breakpoint trap.
pub const BREAKPOINT_FLAG_ADDR: u32 = 0x0108;
/// Expected value of the ECALL flag.
pub const ECALL_FLAG_VALUE: u32 = 0xDEAD;
/// Expected value of the breakpoint flag.
pub const BREAKPOINT_FLAG_VALUE: u32 = 0xBEEF;

/// Syscall number of the exit environment call (`a7 == 93`, exit code in `a0`).
pub const EXIT_SYSCALL: u32 = 93;

/// Traps observed by the harness across software threads, with the mepc each trap recorded.
#[derive(Debug, Clone, Default)]
pub struct TrapSightings {
    pub saw_breakpoint: [bool; 2],
    pub saw_ecall: [bool; 2],
    pub breakpoint_mepc: [u32; 2],
    pub ecall_mepc: [u32; 2],
}

/// Poll the tile for a trap entered on the most recent tick.
///
/// Breakpoint and environment-call sightings are recorded for `thread`. An environment call
/// with `a7 == 93` is the exit syscall: the exit code is taken from `a0` and the tile halted.
/// The registers still hold the caller's values at this point, since the handler has not
/// executed its first instruction yet.
pub fn observe_trap(
    tile: &mut Tile,
    sightings: &mut TrapSightings,
    thread: usize,
) -> Option<TrapCause> {
    let cause = tile.take_last_trap()?;
    match cause {
        TrapCause::Breakpoint => {
            sightings.saw_breakpoint[thread] = true;
            sightings.breakpoint_mepc[thread] = tile.mepc();
        }
        TrapCause::EnvironmentCallFromUMode
        | TrapCause::EnvironmentCallFromSMode
        | TrapCause::EnvironmentCallFromMMode => {
            sightings.saw_ecall[thread] = true;
            sightings.ecall_mepc[thread] = tile.mepc();
            if tile.reg(Specifier::A7.into()) == EXIT_SYSCALL {
                let code = tile.reg(Specifier::A0.into());
                tile.request_exit(code);
            }
        }
        TrapCause::IllegalInstruction => {}
    }
    Some(cause)
}

#[derive(Error, Debug)]
pub enum PostmortemError {
    #[error("breakpoint trap was not observed")]
    MissingBreakpointTrap,
    #[error("ECALL trap was not observed")]
    MissingEcallTrap,
    #[error("breakpoint mepc misaligned: {0:#010x}")]
    MisalignedBreakpointMepc(u32),
    #[error("ECALL mepc misaligned: {0:#010x}")]
    MisalignedEcallMepc(u32),
    #[error("breakpoint trap did not set flag at {BREAKPOINT_FLAG_ADDR:#06x} (found {0:#x})")]
    BreakpointFlagNotSet(u32),
    #[error("ECALL trap did not set flag at {ECALL_FLAG_ADDR:#06x} (found {0:#x})")]
    EcallFlagNotSet(u32),
    #[error("mstatus.MPP expected to hold previous mode (Machine) inside handler: {0:#010x}")]
    WrongHandlerPrivilege(u32),
    #[error("x0 must remain zero")]
    NonzeroX0,
    #[error("no memory port attached")]
    NoMemoryPort,
}

/// Summary printed after a postmortem pass.
#[derive(Debug, Clone)]
pub struct PostmortemReport {
    pub cycle: u64,
    pub breakpoint_flag: u32,
    pub ecall_flag: u32,
    pub mcause: u32,
    pub mstatus: u32,
    pub sightings: TrapSightings,
}

impl fmt::Display for PostmortemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Cycle count: {} breakpoint flag={:#x} ecall flag={:#x}",
            self.cycle, self.breakpoint_flag, self.ecall_flag
        )?;
        write!(f, "Trap summary:")?;
        for t in 0..2 {
            if self.sightings.saw_breakpoint[t] {
                write!(
                    f,
                    " [T{t}] breakpoint mepc={:#x}",
                    self.sightings.breakpoint_mepc[t]
                )?;
            }
            if self.sightings.saw_ecall[t] {
                write!(f, " [T{t}] ecall mepc={:#x}", self.sightings.ecall_mepc[t])?;
            }
        }
        write!(f, " mcause={:#x} mstatus={:#x}", self.mcause, self.mstatus)
    }
}

/// Verify the final state of a run that did not exit cleanly.
///
/// Requires: at least one breakpoint trap and one ECALL trap observed across threads, 4-byte
/// aligned mepc values for every sighting, the trap handler's memory flags in place, machine
/// mode in `mstatus.MPP`, and x0 still zero.
pub fn verify_postmortem(
    tile: &mut Tile,
    sightings: &TrapSightings,
    cycle: u64,
) -> Result<PostmortemReport, PostmortemError> {
    let any_breakpoint = sightings.saw_breakpoint.iter().any(|&b| b);
    let any_ecall = sightings.saw_ecall.iter().any(|&b| b);
    if !any_breakpoint {
        return Err(PostmortemError::MissingBreakpointTrap);
    }
    if !any_ecall {
        return Err(PostmortemError::MissingEcallTrap);
    }

    for t in 0..2 {
        if sightings.saw_breakpoint[t] && sightings.breakpoint_mepc[t] & 0x3 != 0 {
            return Err(PostmortemError::MisalignedBreakpointMepc(
                sightings.breakpoint_mepc[t],
            ));
        }
        if sightings.saw_ecall[t] && sightings.ecall_mepc[t] & 0x3 != 0 {
            return Err(PostmortemError::MisalignedEcallMepc(sightings.ecall_mepc[t]));
        }
    }

    let mem = tile.memory_mut().ok_or(PostmortemError::NoMemoryPort)?;
    let breakpoint_flag = mem.read32(BREAKPOINT_FLAG_ADDR);
    let ecall_flag = mem.read32(ECALL_FLAG_ADDR);
    if breakpoint_flag != BREAKPOINT_FLAG_VALUE {
        return Err(PostmortemError::BreakpointFlagNotSet(breakpoint_flag));
    }
    if ecall_flag != ECALL_FLAG_VALUE {
        return Err(PostmortemError::EcallFlagNotSet(ecall_flag));
    }

    let mstatus = tile.mstatus();
    if mstatus & MSTATUS_MPP_MASK != MSTATUS_MPP_MACHINE {
        return Err(PostmortemError::WrongHandlerPrivilege(mstatus));
    }
    if tile.reg(0) != 0 {
        return Err(PostmortemError::NonzeroX0);
    }

    Ok(PostmortemReport {
        cycle,
        breakpoint_flag,
        ecall_flag,
        mcause: tile.mcause(),
        mstatus,
        sightings: sightings.clone(),
    })
}
