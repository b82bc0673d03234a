//! # srcdbg
//!
//! A source-level debugger for x86-64 Linux executables. It launches a
//! debuggee under ptrace, plants software breakpoints, steps by machine
//! instruction or by source line, and maps program counters back to
//! functions, files and lines using the DWARF debug information embedded
//! in the ELF image.

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::errors::Result;

pub mod addr;
pub mod breakpoint;
pub mod consts;
pub mod dbginfo;
pub mod debuggee;
pub mod debugger;
pub mod dwarf_parse;
pub mod errors;
pub mod feedback;
pub mod lines;
pub mod regs;
pub mod source;
pub mod ui;

pub use addr::Addr;

/// A machine word as ptrace hands it out
pub type Word = i64;
/// Size of a machine word in bytes
pub const WORD_BYTES: usize = 8;

/// Reads one word from the debuggee's address space.
///
/// # Errors
///
/// Fails if the underlying ptrace peek fails, for example because the
/// debuggee has died or the address is not mapped.
pub fn mem_read_word(pid: Pid, addr: Addr) -> Result<Word> {
    Ok(ptrace::read(pid, addr.raw_pointer())?)
}

/// Writes one word into the debuggee's address space.
///
/// The write is word-granular: all eight bytes at `addr` are replaced.
/// Callers that want to change fewer bytes must peek and merge first, like
/// the breakpoint engine does.
///
/// # Errors
///
/// Fails if the underlying ptrace poke fails.
pub fn mem_write_word(pid: Pid, addr: Addr, value: Word) -> Result<()> {
    Ok(ptrace::write(pid, addr.raw_pointer(), value)?)
}
