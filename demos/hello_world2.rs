use color_eyre::eyre::Result;

use log::LevelFilter;
use minivm::memory::Memory;
use minivm::processor::Processor;
use minivm::write_program;
use simple_logger::SimpleLogger;

/// Address of the string data.
const STRING: i64 = 4;

/// The entrypoint, just past the string data.
const ENTRYPOINT: i64 = 17;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap(); // logging

    let mut mem: Memory<i8, 64> = Memory::default();
    let mut cpu = Processor::new(ENTRYPOINT, 63);

    mem.write_bytes(STRING, b"hello world\0")?;

    // copies the string one character at a time through a pointer cell,
    // printing each character, then prints the whole string at once
    use minivm::processor::Instruction::*;
    write_program!(mem : i8 ; ENTRYPOINT =>
        LOAD, 3, STRING + 11, // one past the last character
        LOAD, 0, 1,           // cell 0 points at the scratch cell 1
        LOAD, 2, STRING,      // cursor
        STOREP, 0, 2,         // cell(1) = current character
        PRINTC, 1,
        INCR, 2,
        RJLT, 2, 3, -7,
        PRINTS, STRING,
        HALT
    )?;

    cpu.run(&mut mem)?;

    Ok(())
}
