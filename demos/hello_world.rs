use color_eyre::eyre::Result;

use log::LevelFilter;
use minivm::memory::Memory;
use minivm::processor::Processor;
use minivm::write_program;
use simple_logger::SimpleLogger;

/// The entrypoint, just past the string data.
const ENTRYPOINT: i64 = 13;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap(); // logging

    // a one-byte-cell machine can hold string data
    let mut mem: Memory<i8, 20> = Memory::default();
    let mut cpu = Processor::new(ENTRYPOINT, 0);

    mem.write_bytes(0, b"hello world\0")?;

    use minivm::processor::Instruction::*;
    write_program!(mem : i8 ; ENTRYPOINT =>
        PRINTS, 0,
        HALT
    )?;

    // prints [0] hello world
    cpu.run(&mut mem)?;

    Ok(())
}
