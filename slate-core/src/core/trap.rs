/// Causes of the synchronous traps this core can take.
///
/// Values follow the RISC-V mcause exception encoding.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapCause {
    IllegalInstruction,
    Breakpoint,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
}

impl TrapCause {
    pub const ILLEGAL_INSTRUCTION: u32 = 2;
    pub const BREAKPOINT: u32 = 3;
    pub const ENVIRONMENT_CALL_FROM_U_MODE: u32 = 8;
    pub const ENVIRONMENT_CALL_FROM_S_MODE: u32 = 9;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u32 = 11;

    /// Returns the exception code written to mcause for this trap.
    pub const fn code(&self) -> u32 {
        match self {
            Self::IllegalInstruction => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint => Self::BREAKPOINT,
            Self::EnvironmentCallFromUMode => Self::ENVIRONMENT_CALL_FROM_U_MODE,
            Self::EnvironmentCallFromSMode => Self::ENVIRONMENT_CALL_FROM_S_MODE,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
        }
    }

    /// Returns `true` for the environment-call causes.
    pub const fn is_environment_call(&self) -> bool {
        matches!(
            self,
            Self::EnvironmentCallFromUMode
                | Self::EnvironmentCallFromSMode
                | Self::EnvironmentCallFromMMode
        )
    }
}

/// The machine trap CSRs with dedicated storage: mtvec, mepc, mcause.
///
/// mstatus lives separately in [`Status`](super::status::Status); the long tail of other CSRs
/// goes through the core's sparse map.
#[derive(Debug, Clone, Default)]
pub struct TrapCsrs {
    pub mtvec: u32,
    pub mepc: u32,
    pub mcause: u32,
}

impl TrapCsrs {
    pub fn new() -> Self {
        Self::default()
    }
}
