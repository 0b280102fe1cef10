use thiserror::Error;

/// A fatal machine condition.
///
/// Every variant terminates execution; there is no recovery and no partial
/// resumption. `step`/`run` return the fault to the embedding caller, which
/// decides whether to abort, log, or propagate. Variants carry the register
/// diagnostics (`pc`, `sp`) of the moment the condition was detected where
/// those registers are meaningful (loader writes happen before execution, so
/// capacity errors carry the offending range instead).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// An address fell outside `[0, capacity)`, before or after scaling.
    #[error("invalid address {addr} (pc = {pc}, sp = {sp})")]
    InvalidAddress { addr: i64, pc: i64, sp: i64 },

    /// A loader write would run past the end of memory.
    #[error("write of {len} cell(s) at {addr} exceeds capacity {capacity}")]
    OutOfCapacity {
        addr: i64,
        len: usize,
        capacity: usize,
    },

    /// A push would drive the stack pointer into loaded code or data.
    #[error("stack overflow: sp = {sp} below limit {limit} (pc = {pc})")]
    StackOverflow { pc: i64, sp: i64, limit: i64 },

    /// A pop was attempted with the stack pointer at or past the top of
    /// memory; more pops than pushes have occurred.
    #[error("stack underflow: sp = {sp} at or past capacity {capacity} (pc = {pc})")]
    StackUnderflow { pc: i64, sp: i64, capacity: usize },

    /// The cell at the program counter decodes to no known opcode.
    #[error("illegal instruction {opcode} (pc = {pc}, sp = {sp})")]
    IllegalInstruction { opcode: i64, pc: i64, sp: i64 },

    /// `DIV` with a zero divisor.
    #[error("division by zero (pc = {pc}, sp = {sp})")]
    DivisionByZero { pc: i64, sp: i64 },

    /// A byte-oriented operation (`PRINTC`, `PRINTS`, `write_bytes`) was used
    /// on a machine whose cells are wider than one byte.
    #[error("{op} requires one-byte cells, this machine has {width}-byte cells")]
    UnsupportedCellWidth { op: &'static str, width: usize },
}
