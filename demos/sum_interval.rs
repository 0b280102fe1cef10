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

    let begin = 1;
    let end = 100;

    let mut mem: Memory<i32, 16> = Memory::default();
    let mut cpu = Processor::new(ENTRYPOINT, 0);

    use minivm::processor::Instruction::*;
    write_program!(mem : i32 ; ENTRYPOINT =>
        LOAD, 0, begin,
        LOAD, 1, end,
        ADD, 0, 1,
        PRINT, 0,
        HALT
    )?;

    cpu.run(&mut mem)?;

    Ok(())
}
