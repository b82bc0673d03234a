//! # Error Types
//!
//! Defines error types and a result alias used throughout the [crate].
//!
//! Every fallible operation in the debugger returns [`Result`]. Components
//! never print their own failures; errors bubble up to the command loop,
//! which reports them and reads the next command.

use gimli::DwTag;
use thiserror::Error;

use crate::Addr;

/// Type alias for Results returned by srcdbg functions
pub type Result<T> = std::result::Result<T, DebuggerError>;

/// All error conditions the debugger can run into, from system call
/// failures to missing debug information.
#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("Executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("Could not launch the debuggee: {0}")]
    Launch(String),
    #[error("No debuggee is being traced")]
    NoDebuggee,
    #[error("Could not parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Error while getting cli input: {0}")]
    CliInput(#[from] dialoguer::Error),
    #[error("Error while reading information from the executable file: {0}")]
    Object(#[from] object::Error),
    #[error("Error while working with the DWARF debug information: {0}")]
    Dwarf(#[from] gimli::Error),
    #[error("DWARF Tag not supported by this debugger: {0}")]
    DwTagNotImplemented(DwTag),
    #[error("A DWARF entry has a high address but no low address")]
    HighAddrExistsButNotLowAddr,
    #[error("No register is named {0}")]
    UnknownRegister(String),
    #[error("No register has DWARF number {0}")]
    UnknownDwarfRegister(u16),
    #[error("Register index {0} is out of range")]
    RegisterIndexOutOfRange(usize),
    #[error("No function contains address {0}")]
    NoFunctionAtPc(Addr),
    #[error("No line table entry for address {0}")]
    NoLineAtPc(Addr),
    #[error("No statement found for {0}:{1}")]
    NoSuchLine(String, u64),
    #[error("No function is named {0}")]
    UnknownFunction(String),
    #[error("The variable location is not representable as an address or register")]
    UnsupportedLocation,
    #[error("The enclosing function has no frame base")]
    NoFrameBase,
    #[error("Tried stepping out of the main function")]
    StepOutMain,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("{command} takes {expected} arguments")]
    BadArgumentCount {
        command: &'static str,
        expected: usize,
    },
}
