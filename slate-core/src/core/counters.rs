/// Micro-architectural event counters.
///
/// All counters are monotonic unsigned 64-bit values, incremented at the point an instruction
/// commits decode (not at retire after a data-memory stall). `branch_taken` additionally counts
/// only branches whose condition held.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    inst: u64,
    arith: u64,
    add: u64,
    mul: u64,
    load: u64,
    store: u64,
    branch: u64,
    branch_taken: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn increment_inst(&mut self) {
        self.inst += 1;
    }

    pub(super) fn increment_arith(&mut self) {
        self.arith += 1;
    }

    pub(super) fn increment_add(&mut self) {
        self.add += 1;
    }

    pub(super) fn increment_mul(&mut self) {
        self.mul += 1;
    }

    pub(super) fn increment_load(&mut self) {
        self.load += 1;
    }

    pub(super) fn increment_store(&mut self) {
        self.store += 1;
    }

    pub(super) fn increment_branch(&mut self) {
        self.branch += 1;
    }

    pub(super) fn increment_branch_taken(&mut self) {
        self.branch_taken += 1;
    }

    /// Instructions that committed decode.
    pub fn inst(&self) -> u64 {
        self.inst
    }

    /// ALU-category instructions (including multiplies and divides).
    pub fn arith(&self) -> u64 {
        self.arith
    }

    /// ADD and SUB instructions.
    pub fn add(&self) -> u64 {
        self.add
    }

    /// MUL instructions.
    pub fn mul(&self) -> u64 {
        self.mul
    }

    pub fn load(&self) -> u64 {
        self.load
    }

    pub fn store(&self) -> u64 {
        self.store
    }

    pub fn branch(&self) -> u64 {
        self.branch
    }

    pub fn branch_taken(&self) -> u64 {
        self.branch_taken
    }
}
