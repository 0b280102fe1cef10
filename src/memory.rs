use std::fmt;

use crate::fault::Fault;

/// One fixed-width signed integer cell of machine memory.
///
/// The cell type is chosen at build time and fixes the word size of the whole
/// machine: opcodes, operands, data and stack slots are all cells. `WIDTH` is
/// also the stack pointer stride, so an `i32` machine moves `SP` by four per
/// push.
pub trait Cell:
    Copy + Default + PartialEq + PartialOrd + fmt::Debug + fmt::Display + 'static
{
    /// Width of one cell in bytes.
    const WIDTH: usize;

    /// Truncating conversion from the register domain.
    fn from_i64(v: i64) -> Self;
    /// Widening conversion into the register domain.
    fn to_i64(self) -> i64;

    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;
    /// Wrapping division; `None` when `rhs` is zero (`MIN / -1` wraps).
    fn wrapping_div(self, rhs: Self) -> Option<Self>;
}

macro_rules! impl_cell {
    ( $( $t:ty ),+ ) => {
        $(
            impl Cell for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn from_i64(v: i64) -> Self {
                    v as $t
                }

                fn to_i64(self) -> i64 {
                    self as i64
                }

                fn wrapping_add(self, rhs: Self) -> Self {
                    <$t>::wrapping_add(self, rhs)
                }

                fn wrapping_sub(self, rhs: Self) -> Self {
                    <$t>::wrapping_sub(self, rhs)
                }

                fn wrapping_mul(self, rhs: Self) -> Self {
                    <$t>::wrapping_mul(self, rhs)
                }

                fn wrapping_div(self, rhs: Self) -> Option<Self> {
                    if rhs == 0 {
                        None
                    } else {
                        Some(<$t>::wrapping_div(self, rhs))
                    }
                }
            }
        )+
    };
}

impl_cell!(i8, i16, i32, i64);

/// Default memory
pub type StdMem = Memory<i32, 4096>;

/// The flat memory of the machine: `S` cells of type `T` holding code, data
/// and the stack, plus the high-water mark of loader writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Memory<T: Cell, const S: usize> {
    /// The actual cells of the memory
    pub data: [T; S],
    limit: i64,
}

impl<T: Cell, const S: usize> Default for Memory<T, S> {
    /// Initializes the memory with every cell zeroed
    fn default() -> Self {
        Memory {
            data: [T::default(); S],
            limit: 0,
        }
    }
}

impl<T: Cell, const S: usize> Memory<T, S> {
    /// Total number of cells.
    pub const fn capacity() -> usize {
        S
    }

    /// One past the highest address the loader has written; the boundary the
    /// stack must never grow down into.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Bounds-checks a loader write of `len` cells at `addr` and extends the
    /// reserved region over it.
    fn reserve(&mut self, addr: i64, len: usize) -> Result<(), Fault> {
        if addr < 0 || (addr as usize).saturating_add(len) > S {
            return Err(Fault::OutOfCapacity {
                addr,
                len,
                capacity: S,
            });
        }
        self.limit = self.limit.max(addr + len as i64);
        Ok(())
    }

    /// Writes a single cell to the memory
    pub fn write_cell(&mut self, addr: i64, value: T) -> Result<(), Fault> {
        self.reserve(addr, 1)?;
        self.data[addr as usize] = value;
        Ok(())
    }

    /// Writes a contiguous run of cells to the memory
    pub fn write_cells(&mut self, addr: i64, cells: &[T]) -> Result<(), Fault> {
        self.reserve(addr, cells.len())?;
        self.data[addr as usize..addr as usize + cells.len()].copy_from_slice(cells);
        Ok(())
    }

    /// Writes raw bytes (string data) to the memory, one byte per cell.
    ///
    /// Byte data only makes sense when cells are one byte wide; on a wider
    /// machine this fails fast instead of reinterpreting.
    pub fn write_bytes(&mut self, addr: i64, bytes: &[u8]) -> Result<(), Fault> {
        if T::WIDTH != 1 {
            return Err(Fault::UnsupportedCellWidth {
                op: "write_bytes",
                width: T::WIDTH,
            });
        }
        self.reserve(addr, bytes.len())?;
        for (i, &b) in bytes.iter().enumerate() {
            self.data[addr as usize + i] = T::from_i64(i64::from(b));
        }
        Ok(())
    }
}

/// Hand-assembles a program directly into the memory: every word is cast to
/// the given cell type, so opcodes, addresses and immediates can be mixed
/// freely.
#[macro_export]
macro_rules! write_program {
    ( $mem:ident : $t:ty ; $pos:expr => $( $word:expr ),+ $(,)? ) => {
        $mem.write_cells($pos, &[
            $(
                $word as $t,
            )+
        ])
    };
}
