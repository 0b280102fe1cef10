use std::convert::TryFrom;

use crate::fault::Fault;
use crate::memory::{Cell, Memory};
use log::*;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

/// Indirection depth of a pointer operand: the operand's cell holds the
/// address of the true target.
const POINTER: usize = 2;

/// The register file and dispatch loop of the machine.
///
/// Registers live outside the address space and are `i64`, wide enough for
/// every supported cell type. `mode` is the address scale factor applied by
/// the resolver to every address; it starts at 1 and is only changed by the
/// `MODE` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Processor {
    /// Program counter
    pub pc: i64,
    /// Stack pointer; moves down on push, up on pop
    pub sp: i64,
    /// Address scale factor
    pub mode: i64,
    /// Termination flag, set when `HALT` executes
    pub halted: bool,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Processor {
    /// Initializes a new processor with the given entry point and stack top.
    pub fn new(pc: i64, sp: i64) -> Self {
        Self {
            pc,
            sp,
            mode: 1,
            halted: false,
        }
    }

    /// Overrides the program counter. Meant for loader setup, before `run`.
    pub fn set_pc(&mut self, pc: i64) {
        self.pc = pc;
    }

    /// Overrides the stack pointer. Meant for loader setup, before `run`.
    pub fn set_sp(&mut self, sp: i64) {
        self.sp = sp;
    }

    /// Resolves a logical address to a physical cell index: bounds-check,
    /// scale by `mode`, then bounds-check the scaled index before it ever
    /// touches the array.
    fn resolve(&self, addr: i64, capacity: usize) -> Result<usize, Fault> {
        let fault = Fault::InvalidAddress {
            addr,
            pc: self.pc,
            sp: self.sp,
        };
        if addr < 0 || addr >= capacity as i64 {
            return Err(fault);
        }
        let scaled = addr.checked_mul(self.mode).ok_or(fault)?;
        if scaled < 0 || scaled >= capacity as i64 {
            return Err(fault);
        }
        Ok(scaled as usize)
    }

    /// Reads the cell at a logical address.
    fn cell<T: Cell, const S: usize>(&self, mem: &Memory<T, S>, addr: i64) -> Result<T, Fault> {
        Ok(mem.data[self.resolve(addr, S)?])
    }

    /// Writes the cell at a logical address.
    fn set_cell<T: Cell, const S: usize>(
        &self,
        mem: &mut Memory<T, S>,
        addr: i64,
        value: T,
    ) -> Result<(), Fault> {
        let at = self.resolve(addr, S)?;
        mem.data[at] = value;
        Ok(())
    }

    /// Fetches the `k`-th operand word of the current instruction.
    fn operand<T: Cell, const S: usize>(
        &self,
        mem: &Memory<T, S>,
        k: i64,
    ) -> Result<i64, Fault> {
        Ok(self.cell(mem, self.pc + k)?.to_i64())
    }

    /// Follows `depth - 1` pointer cells starting from `addr` and returns the
    /// final target address; depth 1 is `addr` itself.
    fn chase<T: Cell, const S: usize>(
        &self,
        mem: &Memory<T, S>,
        mut addr: i64,
        depth: usize,
    ) -> Result<i64, Fault> {
        for _ in 1..depth {
            addr = self.cell(mem, addr)?.to_i64();
        }
        Ok(addr)
    }

    /// Evaluates the two comparison operands and the target word of a branch
    /// at the current program counter.
    fn branch_operands<T: Cell, const S: usize>(
        &self,
        mem: &Memory<T, S>,
    ) -> Result<(T, T, i64), Fault> {
        let a = self.cell(mem, self.operand(mem, 1)?)?;
        let b = self.cell(mem, self.operand(mem, 2)?)?;
        let target = self.operand(mem, 3)?;
        Ok((a, b, target))
    }

    fn check_push<T: Cell, const S: usize>(&self, mem: &Memory<T, S>) -> Result<(), Fault> {
        if self.sp < mem.limit() {
            return Err(Fault::StackOverflow {
                pc: self.pc,
                sp: self.sp,
                limit: mem.limit(),
            });
        }
        Ok(())
    }

    fn check_pop(&self, capacity: usize) -> Result<(), Fault> {
        if self.sp >= capacity as i64 {
            return Err(Fault::StackUnderflow {
                pc: self.pc,
                sp: self.sp,
                capacity,
            });
        }
        Ok(())
    }

    /// Executes a single, already decoded instruction
    pub fn execute_instruction<T: Cell, const S: usize>(
        &mut self,
        instruction: Instruction,
        mem: &mut Memory<T, S>,
    ) -> Result<(), Fault> {
        match instruction {
            Instruction::ADD => {
                let dst = self.operand(mem, 1)?;
                let src = self.operand(mem, 2)?;
                let result = self.cell(mem, dst)?.wrapping_add(self.cell(mem, src)?);
                self.set_cell(mem, dst, result)?;
                self.pc += 3;

                debug!("ADD {} {}: {}", dst, src, result);
            }
            Instruction::SUB => {
                let dst = self.operand(mem, 1)?;
                let src = self.operand(mem, 2)?;
                let result = self.cell(mem, dst)?.wrapping_sub(self.cell(mem, src)?);
                self.set_cell(mem, dst, result)?;
                self.pc += 3;

                debug!("SUB {} {}: {}", dst, src, result);
            }
            Instruction::MUL => {
                let dst = self.operand(mem, 1)?;
                let src = self.operand(mem, 2)?;
                let result = self.cell(mem, dst)?.wrapping_mul(self.cell(mem, src)?);
                self.set_cell(mem, dst, result)?;
                self.pc += 3;

                debug!("MUL {} {}: {}", dst, src, result);
            }
            Instruction::DIV => {
                let dst = self.operand(mem, 1)?;
                let src = self.operand(mem, 2)?;
                let result = self
                    .cell(mem, dst)?
                    .wrapping_div(self.cell(mem, src)?)
                    .ok_or(Fault::DivisionByZero {
                        pc: self.pc,
                        sp: self.sp,
                    })?;
                self.set_cell(mem, dst, result)?;
                self.pc += 3;

                debug!("DIV {} {}: {}", dst, src, result);
            }
            Instruction::JLT => {
                let (a, b, target) = self.branch_operands(mem)?;
                if a < b {
                    self.pc = target;
                } else {
                    self.pc += 4;
                }

                debug!("JLT {} {}: pc = {}", a, b, self.pc);
            }
            Instruction::JLE => {
                let (a, b, target) = self.branch_operands(mem)?;
                if a <= b {
                    self.pc = target;
                } else {
                    self.pc += 4;
                }

                debug!("JLE {} {}: pc = {}", a, b, self.pc);
            }
            Instruction::JGE => {
                let (a, b, target) = self.branch_operands(mem)?;
                if a >= b {
                    self.pc = target;
                } else {
                    self.pc += 4;
                }

                debug!("JGE {} {}: pc = {}", a, b, self.pc);
            }
            Instruction::JGT => {
                let (a, b, target) = self.branch_operands(mem)?;
                if a > b {
                    self.pc = target;
                } else {
                    self.pc += 4;
                }

                debug!("JGT {} {}: pc = {}", a, b, self.pc);
            }
            Instruction::JMP => {
                // the two comparison slots are unused and never fetched
                let target = self.operand(mem, 3)?;
                self.pc = target;

                debug!("JMP {}", target);
            }
            Instruction::RJLT => {
                let (a, b, offset) = self.branch_operands(mem)?;
                if a < b {
                    self.pc += offset;
                } else {
                    self.pc += 4;
                }

                debug!("RJLT {} {}: pc = {}", a, b, self.pc);
            }
            Instruction::RJLE => {
                let (a, b, offset) = self.branch_operands(mem)?;
                if a <= b {
                    self.pc += offset;
                } else {
                    self.pc += 4;
                }

                debug!("RJLE {} {}: pc = {}", a, b, self.pc);
            }
            Instruction::RJGE => {
                let (a, b, offset) = self.branch_operands(mem)?;
                if a >= b {
                    self.pc += offset;
                } else {
                    self.pc += 4;
                }

                debug!("RJGE {} {}: pc = {}", a, b, self.pc);
            }
            Instruction::RJGT => {
                let (a, b, offset) = self.branch_operands(mem)?;
                if a > b {
                    self.pc += offset;
                } else {
                    self.pc += 4;
                }

                debug!("RJGT {} {}: pc = {}", a, b, self.pc);
            }
            Instruction::RJMP => {
                let offset = self.operand(mem, 3)?;
                self.pc += offset;

                debug!("RJMP {}: pc = {}", offset, self.pc);
            }
            Instruction::MOVE => {
                let dst = self.operand(mem, 1)?;
                let src = self.operand(mem, 2)?;
                let value = self.cell(mem, src)?;
                self.set_cell(mem, dst, value)?;
                self.pc += 3;

                debug!("MOVE {} {}: {}", dst, src, value);
            }
            Instruction::STORE => {
                let dst = self.chase(mem, self.operand(mem, 1)?, POINTER)?;
                let value = self.cell(mem, self.operand(mem, 2)?)?;
                self.set_cell(mem, dst, value)?;
                self.pc += 3;

                debug!("STORE {}: {}", dst, value);
            }
            Instruction::STOREP => {
                let dst = self.chase(mem, self.operand(mem, 1)?, POINTER)?;
                let src = self.chase(mem, self.operand(mem, 2)?, POINTER)?;
                let value = self.cell(mem, src)?;
                self.set_cell(mem, dst, value)?;
                self.pc += 3;

                debug!("STOREP {} {}: {}", dst, src, value);
            }
            Instruction::LOAD => {
                let dst = self.operand(mem, 1)?;
                // the second operand word is the value itself
                let value = self.cell(mem, self.pc + 2)?;
                self.set_cell(mem, dst, value)?;
                self.pc += 3;

                debug!("LOAD {} {}", dst, value);
            }
            Instruction::PRINT => {
                let addr = self.operand(mem, 1)?;
                let value = self.cell(mem, addr)?;
                self.pc += 2;

                println!("[{}] {}", addr, value);
            }
            Instruction::PRINTC => {
                if T::WIDTH != 1 {
                    return Err(Fault::UnsupportedCellWidth {
                        op: instruction.name(),
                        width: T::WIDTH,
                    });
                }
                let addr = self.operand(mem, 1)?;
                let c = self.cell(mem, addr)?.to_i64() as u8 as char;
                self.pc += 2;

                println!("[{}] {}", addr, c);
            }
            Instruction::PRINTS => {
                if T::WIDTH != 1 {
                    return Err(Fault::UnsupportedCellWidth {
                        op: instruction.name(),
                        width: T::WIDTH,
                    });
                }
                let addr = self.operand(mem, 1)?;
                let mut bytes = Vec::new();
                let mut at = addr;
                loop {
                    let v = self.cell(mem, at)?.to_i64();
                    if v == 0 {
                        break;
                    }
                    bytes.push(v as u8);
                    at += 1;
                }
                self.pc += 2;

                println!("[{}] {}", addr, String::from_utf8_lossy(&bytes));
            }
            Instruction::PUSH => {
                self.check_push(mem)?;
                let value = self.cell(mem, self.operand(mem, 1)?)?;
                self.set_cell(mem, self.sp, value)?;
                self.sp -= T::WIDTH as i64;
                self.pc += 2;

                debug!("PUSH {}: sp = {}", value, self.sp);
            }
            Instruction::PUSHP => {
                self.check_push(mem)?;
                let src = self.chase(mem, self.operand(mem, 1)?, POINTER)?;
                let value = self.cell(mem, src)?;
                self.set_cell(mem, self.sp, value)?;
                self.sp -= T::WIDTH as i64;
                self.pc += 2;

                debug!("PUSHP {}: sp = {}", value, self.sp);
            }
            Instruction::POP => {
                self.check_pop(S)?;
                self.sp += T::WIDTH as i64;
                let value = self.cell(mem, self.sp)?;
                let dst = self.operand(mem, 1)?;
                self.set_cell(mem, dst, value)?;
                self.pc += 2;

                debug!("POP {}: sp = {}", value, self.sp);
            }
            Instruction::POPP => {
                self.check_pop(S)?;
                self.sp += T::WIDTH as i64;
                let value = self.cell(mem, self.sp)?;
                let dst = self.chase(mem, self.operand(mem, 1)?, POINTER)?;
                self.set_cell(mem, dst, value)?;
                self.pc += 2;

                debug!("POPP {}: sp = {}", value, self.sp);
            }
            Instruction::INCR => {
                let addr = self.operand(mem, 1)?;
                let result = self.cell(mem, addr)?.wrapping_add(T::from_i64(1));
                self.set_cell(mem, addr, result)?;
                self.pc += 2;

                debug!("INCR {}: {}", addr, result);
            }
            Instruction::DECR => {
                let addr = self.operand(mem, 1)?;
                let result = self.cell(mem, addr)?.wrapping_sub(T::from_i64(1));
                self.set_cell(mem, addr, result)?;
                self.pc += 2;

                debug!("DECR {}: {}", addr, result);
            }
            Instruction::MODE => {
                self.mode = self.operand(mem, 1)?;
                self.pc += 2;

                debug!("MODE {}", self.mode);
            }
            Instruction::HALT => {
                self.halted = true;

                debug!("HALT");
            }
        }

        Ok(())
    }

    /// Runs one fetch-decode-execute step. A halted processor stays halted.
    pub fn step<T: Cell, const S: usize>(&mut self, mem: &mut Memory<T, S>) -> Result<(), Fault> {
        if self.halted {
            return Ok(());
        }
        let word = self.cell(mem, self.pc)?.to_i64();
        let instruction = u8::try_from(word)
            .ok()
            .and_then(|raw| Instruction::try_from(raw).ok())
            .ok_or(Fault::IllegalInstruction {
                opcode: word,
                pc: self.pc,
                sp: self.sp,
            })?;
        self.execute_instruction(instruction, mem)
    }

    /// Runs the program until `HALT` or the first fault
    pub fn run<T: Cell, const S: usize>(&mut self, mem: &mut Memory<T, S>) -> Result<(), Fault> {
        while !self.halted {
            self.step(mem)?;
        }

        Ok(())
    }
}

macro_rules! instructions {
    ( $( $( #[doc = $doc:expr] )+ $name:ident = $repr:literal / $width:literal , )+ ) => {
        /// Defines the instructions
        ///
        /// The discriminants are the wire encoding: a program is an array of
        /// cells whose opcode words hold these values. All operands denote
        /// addresses unless documented as immediate.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        #[derive(TryFromPrimitive, IntoPrimitive)]
        pub enum Instruction {
            $(
                $( #[doc = $doc] )+
                $name = $repr,
            )+
        }

        impl Instruction {
            pub const ALL: &'static [Self] = &[
                $( Self::$name , )+
            ];

            /// Total width of the instruction in cells, opcode included
            pub fn width(&self) -> u8 {
                match self {
                    $( Self::$name => $width , )+
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name) , )+
                }
            }
        }

        impl ::std::fmt::Display for Instruction {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    $( Self::$name => f.write_str(stringify!($name)) , )+
                }
            }
        }
    }
}

instructions! {
    /// `cell(dest) += cell(src)`, wrapping
    ADD = 0 / 3,
    /// `cell(dest) -= cell(src)`, wrapping
    SUB = 1 / 3,
    /// `cell(dest) *= cell(src)`, wrapping
    MUL = 2 / 3,
    /// `cell(dest) /= cell(src)`; a zero divisor is a fault
    DIV = 3 / 3,
    /// Jump to the immediate target if `cell(a) < cell(b)`
    JLT = 4 / 4,
    /// Jump to the immediate target if `cell(a) <= cell(b)`
    JLE = 5 / 4,
    /// Jump to the immediate target if `cell(a) >= cell(b)`
    JGE = 6 / 4,
    /// Jump to the immediate target if `cell(a) > cell(b)`
    JGT = 7 / 4,
    /// Unconditional jump to the immediate target; the a/b slots are unused
    JMP = 8 / 4,
    /// Add the immediate offset to the pc if `cell(a) < cell(b)`
    RJLT = 9 / 4,
    /// Add the immediate offset to the pc if `cell(a) <= cell(b)`
    RJLE = 10 / 4,
    /// Add the immediate offset to the pc if `cell(a) >= cell(b)`
    RJGE = 11 / 4,
    /// Add the immediate offset to the pc if `cell(a) > cell(b)`
    RJGT = 12 / 4,
    /// Unconditionally add the immediate offset to the pc
    RJMP = 13 / 4,
    /// `cell(dest) = cell(src)`
    MOVE = 14 / 3,
    /// `cell(cell(ptr)) = cell(src)`: the destination is a pointer cell
    STORE = 15 / 3,
    /// `cell(cell(dest-ptr)) = cell(cell(src-ptr))`
    STOREP = 16 / 3,
    /// `cell(dest) = immediate`
    LOAD = 17 / 3,
    /// Print `cell(addr)` as an integer
    PRINT = 18 / 2,
    /// Print `cell(addr)` as a character; one-byte cells only
    PRINTC = 19 / 2,
    /// Print the zero-terminated string at `addr`; one-byte cells only
    PRINTS = 20 / 2,
    /// Push `cell(addr)` onto the stack
    PUSH = 21 / 2,
    /// Push `cell(cell(ptr))` onto the stack
    PUSHP = 22 / 2,
    /// Pop into `cell(addr)`
    POP = 23 / 2,
    /// Pop into `cell(cell(ptr))`
    POPP = 24 / 2,
    /// `cell(addr) += 1`
    INCR = 25 / 2,
    /// `cell(addr) -= 1`
    DECR = 26 / 2,
    /// Set the address scale factor to the immediate operand
    MODE = 27 / 2,
    /// Stop execution
    HALT = 28 / 1,
}

#[cfg(test)]
mod tests {
    use crate::memory::Memory;
    use crate::write_program;

    use super::*;
    use color_eyre::eyre::Result;

    #[test]
    fn test_opcode_table() -> Result<()> {
        for &instruction in Instruction::ALL {
            assert_eq!(Instruction::try_from(u8::from(instruction))?, instruction);
        }
        assert_eq!(Instruction::ADD.width(), 3);
        assert_eq!(Instruction::RJMP.width(), 4);
        assert_eq!(Instruction::PUSH.width(), 2);
        assert_eq!(Instruction::HALT.width(), 1);
        assert_eq!(Instruction::MODE.name(), "MODE");

        Ok(())
    }

    #[test]
    fn test_resolve() -> Result<()> {
        let cpu = Processor::new(0, 0);
        assert_eq!(cpu.resolve(0, 16)?, 0);
        assert_eq!(cpu.resolve(3, 16)?, 3);
        assert!(matches!(
            cpu.resolve(16, 16),
            Err(Fault::InvalidAddress { addr: 16, .. })
        ));
        assert!(matches!(
            cpu.resolve(-1, 16),
            Err(Fault::InvalidAddress { addr: -1, .. })
        ));

        let mut scaled = Processor::new(0, 0);
        scaled.mode = 2;
        assert_eq!(scaled.resolve(3, 16)?, 6);
        // logical address in range, scaled index out of range
        assert!(matches!(
            scaled.resolve(10, 16),
            Err(Fault::InvalidAddress { addr: 10, .. })
        ));

        Ok(())
    }

    #[test]
    fn test_load_then_print() -> Result<()> {
        let mut mem: Memory<i32, 32> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 => LOAD, 8, 42, PRINT, 8, HALT)?;

        let mut cpu = Processor::new(0, 0);
        cpu.run(&mut mem)?;

        assert!(cpu.halted);
        assert_eq!(mem.data[8], 42);

        Ok(())
    }

    #[test]
    fn test_arithmetic() -> Result<()> {
        let mut mem: Memory<i32, 32> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 =>
            LOAD, 24, 20,
            LOAD, 25, 6,
            ADD, 24, 25,
            SUB, 24, 25,
            MUL, 24, 25,
            MOVE, 26, 24,
            DIV, 24, 25,
            HALT
        )?;

        let mut cpu = Processor::new(0, 0);
        cpu.run(&mut mem)?;

        assert_eq!(mem.data[26], 120); // ((20 + 6) - 6) * 6
        assert_eq!(mem.data[24], 20); // and / 6 again
        assert_eq!(mem.data[25], 6);

        Ok(())
    }

    #[test]
    fn test_division_by_zero() -> Result<()> {
        let mut mem: Memory<i32, 32> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 =>
            LOAD, 10, 1,
            LOAD, 11, 0,
            DIV, 10, 11,
            HALT
        )?;

        let mut cpu = Processor::new(0, 0);
        assert_eq!(
            cpu.run(&mut mem),
            Err(Fault::DivisionByZero { pc: 6, sp: 0 })
        );

        Ok(())
    }

    #[test]
    fn test_store_through_pointer() -> Result<()> {
        let mut mem: Memory<i32, 32> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 =>
            LOAD, 20, 24,  // cell 20 points at 24
            LOAD, 21, 7,
            STORE, 20, 21, // cell(cell(20)) = 7
            HALT
        )?;

        let mut cpu = Processor::new(0, 0);
        cpu.run(&mut mem)?;

        assert_eq!(mem.data[24], 7);

        Ok(())
    }

    #[test]
    fn test_store_pointer_to_pointer() -> Result<()> {
        let mut mem: Memory<i32, 32> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 =>
            LOAD, 20, 24,   // dest pointer -> 24
            LOAD, 21, 22,   // src pointer -> 22
            LOAD, 22, 9,
            STOREP, 20, 21, // cell(24) = cell(cell(21)) = 9
            HALT
        )?;

        let mut cpu = Processor::new(0, 0);
        cpu.run(&mut mem)?;

        assert_eq!(mem.data[24], 9);

        Ok(())
    }

    #[test]
    fn test_push_pop_round_trip() -> Result<()> {
        let mut mem: Memory<i32, 64> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 =>
            LOAD, 20, 123,
            PUSH, 20,
            POP, 21,
            HALT
        )?;

        let mut cpu = Processor::new(0, 40);
        cpu.run(&mut mem)?;

        // sp is back where it started and the value round-tripped
        assert_eq!(cpu.sp, 40);
        assert_eq!(mem.data[21], 123);

        Ok(())
    }

    #[test]
    fn test_pushp_popp() -> Result<()> {
        let mut mem: Memory<i32, 64> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 =>
            LOAD, 30, 34, // pointer -> 34
            LOAD, 34, 55,
            PUSHP, 30,    // pushes cell(cell(30))
            LOAD, 31, 35, // pointer -> 35
            POPP, 31,     // pops into cell(cell(31))
            HALT
        )?;

        let mut cpu = Processor::new(0, 50);
        cpu.run(&mut mem)?;

        assert_eq!(cpu.sp, 50);
        assert_eq!(mem.data[35], 55);

        Ok(())
    }

    #[test]
    fn test_stack_overflow_at_first_offending_push() -> Result<()> {
        let mut mem: Memory<i32, 32> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 =>
            PUSH, 20,
            PUSH, 20,
            PUSH, 20,
            PUSH, 20,
            HALT
        )?;
        // loader data write raises the limit to 21
        mem.write_cell(20, 1)?;

        // sp strides by 4 on an i32 machine: 29, 25, 21 succeed, then 17 < 21
        let mut cpu = Processor::new(0, 29);
        assert_eq!(
            cpu.run(&mut mem),
            Err(Fault::StackOverflow {
                pc: 6,
                sp: 17,
                limit: 21,
            })
        );
        assert_eq!(mem.data[29], 1);
        assert_eq!(mem.data[25], 1);
        assert_eq!(mem.data[21], 1);

        Ok(())
    }

    #[test]
    fn test_stack_underflow() -> Result<()> {
        let mut mem: Memory<i32, 16> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 => POP, 5, HALT)?;

        let mut cpu = Processor::new(0, 0);
        cpu.set_sp(16);
        assert_eq!(
            cpu.run(&mut mem),
            Err(Fault::StackUnderflow {
                pc: 0,
                sp: 16,
                capacity: 16,
            })
        );

        Ok(())
    }

    /// Runs a single branch at address 0 and reports whether it was taken.
    fn branch_taken(op: Instruction, a: i32, b: i32) -> Result<bool> {
        let mut mem: Memory<i32, 32> = Memory::default();
        use Instruction::*;
        // taken lands on the LOAD at 6; for the relative forms the offset 6
        // from pc 0 reaches the same spot the absolute target 6 names
        write_program!(mem : i32 ; 0 =>
            op, 20, 21, 6,
            HALT, 0,
            LOAD, 22, 1,
            HALT
        )?;
        mem.write_cell(20, a)?;
        mem.write_cell(21, b)?;

        let mut cpu = Processor::new(0, 0);
        cpu.run(&mut mem)?;
        Ok(mem.data[22] == 1)
    }

    #[test]
    fn test_relative_and_absolute_branches_agree() -> Result<()> {
        use Instruction::*;
        let pairs = [
            (JLT, RJLT),
            (JLE, RJLE),
            (JGE, RJGE),
            (JGT, RJGT),
            (JMP, RJMP),
        ];
        for &(absolute, relative) in &pairs {
            for &(a, b) in &[(1, 2), (2, 2), (3, 2)] {
                assert_eq!(
                    branch_taken(absolute, a, b)?,
                    branch_taken(relative, a, b)?,
                    "{} and {} disagree on ({}, {})",
                    absolute,
                    relative,
                    a,
                    b
                );
            }
        }

        Ok(())
    }

    #[test]
    fn test_counting_loop() -> Result<()> {
        let mut mem: Memory<i32, 17> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 2 =>
            LOAD, 0, 0,
            LOAD, 1, 100,
            PRINT, 0,
            INCR, 0,
            RJLE, 0, 1, -4,
            HALT
        )?;

        let mut cpu = Processor::new(2, 0);
        cpu.run(&mut mem)?;

        assert!(cpu.halted);
        // the counter passed 100 exactly once
        assert_eq!(mem.data[0], 101);
        assert_eq!(mem.data[1], 100);

        Ok(())
    }

    #[test]
    fn test_factorial() -> Result<()> {
        let mut mem: Memory<i64, 32> = Memory::default();
        use Instruction::*;
        write_program!(mem : i64 ; 3 =>
            LOAD, 0, 10,
            LOAD, 1, 1,
            LOAD, 2, 1,
            MUL, 2, 0,
            SUB, 0, 1,
            RJGT, 0, 1, -6,
            PRINT, 2,
            HALT
        )?;

        let mut cpu = Processor::new(3, 0);
        cpu.run(&mut mem)?;

        assert!(cpu.halted);
        assert_eq!(mem.data[2], 3628800); // 10!

        Ok(())
    }

    #[test]
    fn test_illegal_instruction() -> Result<()> {
        let mut mem: Memory<i32, 16> = Memory::default();
        mem.write_cell(0, 99)?;

        let mut cpu = Processor::new(0, 0);
        assert_eq!(
            cpu.run(&mut mem),
            Err(Fault::IllegalInstruction {
                opcode: 99,
                pc: 0,
                sp: 0,
            })
        );
        assert!(!cpu.halted);

        let mut mem: Memory<i32, 16> = Memory::default();
        mem.write_cell(0, -1)?;
        let mut cpu = Processor::new(0, 0);
        assert!(matches!(
            cpu.run(&mut mem),
            Err(Fault::IllegalInstruction { opcode: -1, .. })
        ));

        Ok(())
    }

    #[test]
    fn test_mode_rescales_all_addressing() -> Result<()> {
        let mut mem: Memory<i32, 16> = Memory::default();
        use Instruction::*;
        // after MODE 2 every fetch is scaled: the INCR opcode sits at
        // physical 4 (pc 2), its operand at physical 6, and the target
        // address 5 resolves to physical 10
        write_program!(mem : i32 ; 0 =>
            MODE, 2,
            0, 0,
            INCR, 0,
            5, 0,
            HALT, 0,
            7
        )?;

        let mut cpu = Processor::new(0, 0);
        cpu.run(&mut mem)?;

        assert!(cpu.halted);
        assert_eq!(mem.data[10], 8);

        Ok(())
    }

    #[test]
    fn test_byte_prints() -> Result<()> {
        let mut mem: Memory<i8, 20> = Memory::default();
        mem.write_bytes(0, b"hello world\0")?;
        use Instruction::*;
        write_program!(mem : i8 ; 13 => PRINTS, 0, PRINTC, 0, HALT)?;

        let mut cpu = Processor::new(13, 0);
        cpu.run(&mut mem)?;

        assert!(cpu.halted);

        Ok(())
    }

    #[test]
    fn test_wide_cells_cannot_print_bytes() -> Result<()> {
        let mut mem: Memory<i32, 16> = Memory::default();
        use Instruction::*;
        write_program!(mem : i32 ; 0 => PRINTS, 4, HALT)?;

        let mut cpu = Processor::new(0, 0);
        assert_eq!(
            cpu.run(&mut mem),
            Err(Fault::UnsupportedCellWidth {
                op: "PRINTS",
                width: 4,
            })
        );

        let mut mem: Memory<i32, 16> = Memory::default();
        write_program!(mem : i32 ; 0 => PRINTC, 4, HALT)?;
        let mut cpu = Processor::new(0, 0);
        assert_eq!(
            cpu.run(&mut mem),
            Err(Fault::UnsupportedCellWidth {
                op: "PRINTC",
                width: 4,
            })
        );

        Ok(())
    }

    #[test]
    fn test_halted_processor_stays_halted() -> Result<()> {
        let mut mem: Memory<i32, 16> = Memory::default();
        mem.write_cell(0, Instruction::HALT as i32)?;

        let mut cpu = Processor::new(0, 0);
        cpu.step(&mut mem)?;
        assert!(cpu.halted);

        let before = cpu;
        cpu.step(&mut mem)?;
        assert_eq!(cpu, before);

        Ok(())
    }
}
