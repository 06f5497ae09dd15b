//! CSR specifiers.
//!
//! The four machine trap CSRs this core gives dedicated storage to are named here; every other
//! specifier is routed to a sparse map by the core's CSR accessors.

/// The 12-bit address of a CSR.
pub type CsrSpecifier = u16;

/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// Machine trap-handler base address.
pub const MTVEC: CsrSpecifier = 0x305;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
