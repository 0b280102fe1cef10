use color_eyre::eyre::Result;

use log::LevelFilter;
use minivm::memory::Memory;
use minivm::processor::Processor;
use minivm::write_program;
use simple_logger::SimpleLogger;

/// The entrypoint. The first instruction is placed here.
const ENTRYPOINT: i64 = 3;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap(); // logging

    let number = 10;

    let mut mem: Memory<i64, 32> = Memory::default();
    let mut cpu = Processor::new(ENTRYPOINT, 0);

    use minivm::processor::Instruction::*;
    write_program!(mem : i64 ; ENTRYPOINT =>
        LOAD, 0, number,
        LOAD, 1, 1,
        LOAD, 2, 1,
        MUL, 2, 0,
        SUB, 0, 1,
        RJGT, 0, 1, -6,
        PRINT, 2,
        HALT
    )?;

    // prints [2] 3628800
    cpu.run(&mut mem)?;

    Ok(())
}
