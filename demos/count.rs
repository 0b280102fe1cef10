use color_eyre::eyre::Result;

use log::LevelFilter;
use minivm::memory::Memory;
use minivm::processor::Processor;
use minivm::write_program;
use simple_logger::SimpleLogger;

/// The entrypoint. The first instruction is placed here.
const ENTRYPOINT: i64 = 2;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap(); // logging

    let mut mem: Memory<i32, 17> = Memory::default();
    let mut cpu = Processor::new(ENTRYPOINT, 0);

    use minivm::processor::Instruction::*;
    write_program!(mem : i32 ; ENTRYPOINT =>
        LOAD, 0, 0,
        LOAD, 1, 100,
        PRINT, 0,
        INCR, 0,
        RJLE, 0, 1, -4,
        HALT
    )?;

    // prints [0] 0 through [0] 100
    cpu.run(&mut mem)?;

    Ok(())
}
