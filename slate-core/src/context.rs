//! Thread context snapshots.
//!
//! A tile has no notion of threads beyond snapshot/restore: the debugger or test harness rotates
//! contexts cooperatively between logical quanta.

/// Architectural state captured by [`Tile::save_context`](crate::core::Tile::save_context) and
/// applied by [`Tile::load_context`](crate::core::Tile::load_context).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ThreadContext {
    /// The pc to resume the thread at.
    pub pc: u32,
    /// Values of all `x` registers. Index 0 is kept at zero.
    pub regs: [u32; 32],
    /// Whether this context is currently scheduled.
    pub active: bool,
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self {
            pc: 0,
            regs: [0; 32],
            active: false,
        }
    }
}
