//! A minimal register-in-memory virtual machine.
//!
//! One flat array of fixed-width signed integer cells holds code, data and
//! the stack; a [`Processor`](processor::Processor) drives a
//! fetch-decode-execute loop over it until `HALT` or a fatal
//! [`Fault`](fault::Fault). Programs are hand-assembled opcode/operand arrays
//! written into [`Memory`](memory::Memory) by the caller; see the programs
//! under `demos/`.

pub mod fault;
pub mod memory;
pub mod processor;
