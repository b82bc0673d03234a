//! What a command hands back to the UI. The [`Display`] impl is the
//! user-facing output format of every command result.

use std::fmt::Display;

use crate::dbginfo::ElfSymbol;
use crate::dwarf_parse::ResolvedLocation;
use crate::errors::DebuggerError;
use crate::Addr;

/// One frame of a backtrace
#[derive(Debug, Clone)]
pub struct Frame {
    /// File-relative low pc of the function
    pub addr: Addr,
    pub name: String,
}

/// One variable of the current function with its resolved location and
/// current value
#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    pub location: ResolvedLocation,
    pub value: u64,
}

#[derive(Debug)]
pub enum Feedback {
    Ok,
    Exit(i32),
    Word(u64),
    Registers(Vec<(&'static str, u64)>),
    Symbols(Vec<ElfSymbol>),
    Backtrace(Vec<Frame>),
    Variables(Vec<VariableInfo>),
    Text(String),
    Error(DebuggerError),
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Ok => write!(f, "Ok")?,
            Feedback::Exit(code) => write!(f, "Debuggee exited with code {code}")?,
            Feedback::Word(w) => write!(f, "{w:#x}")?,
            Feedback::Registers(regs) => {
                for (name, value) in regs {
                    writeln!(f, "{name} : {value:#x}")?;
                }
            }
            Feedback::Symbols(symbols) => {
                for sym in symbols {
                    writeln!(f, "{} {} {:#x}", sym.name, sym.kind, sym.value)?;
                }
            }
            Feedback::Backtrace(frames) => {
                for (idx, frame) in frames.iter().enumerate() {
                    writeln!(f, "Frame #{idx}: {:#x} {}", frame.addr.u64(), frame.name)?;
                }
            }
            Feedback::Variables(vars) => {
                for var in vars {
                    match var.location {
                        ResolvedLocation::Register(n) => {
                            writeln!(f, "{} (reg {n})={:#x}", var.name, var.value)?;
                        }
                        ResolvedLocation::Address(a) => {
                            writeln!(f, "{} ({:#x})={:#x}", var.name, a.u64(), var.value)?;
                        }
                    }
                }
            }
            Feedback::Text(t) => write!(f, "{t}")?,
            Feedback::Error(e) => write!(f, "Error: {e}")?,
        }

        Ok(())
    }
}

impl Feedback {
    /// Whether the rendered form already ends in a newline
    pub fn multiline(&self) -> bool {
        matches!(
            self,
            Feedback::Registers(_)
                | Feedback::Symbols(_)
                | Feedback::Backtrace(_)
                | Feedback::Variables(_)
        )
    }
}

impl From<crate::errors::Result<Feedback>> for Feedback {
    fn from(value: crate::errors::Result<Feedback>) -> Self {
        match value {
            Ok(f) => f,
            Err(e) => Feedback::Error(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dbginfo::ElfSymbolKind;

    #[test]
    fn test_word_format() {
        assert_eq!(Feedback::Word(0x401126).to_string(), "0x401126");
    }

    #[test]
    fn test_register_dump_format() {
        let fb = Feedback::Registers(vec![("rax", 0x2a), ("rip", 0x401126)]);
        assert_eq!(fb.to_string(), "rax : 0x2a\nrip : 0x401126\n");
    }

    #[test]
    fn test_symbol_format() {
        let fb = Feedback::Symbols(vec![ElfSymbol {
            kind: ElfSymbolKind::Function,
            name: "main".to_string(),
            value: 0x1139,
        }]);
        assert_eq!(fb.to_string(), "main function 0x1139\n");
    }

    #[test]
    fn test_backtrace_format() {
        let fb = Feedback::Backtrace(vec![
            Frame { addr: Addr::from(0x1156usize), name: "b".to_string() },
            Frame { addr: Addr::from(0x1171usize), name: "a".to_string() },
            Frame { addr: Addr::from(0x118cusize), name: "main".to_string() },
        ]);
        assert_eq!(
            fb.to_string(),
            "Frame #0: 0x1156 b\nFrame #1: 0x1171 a\nFrame #2: 0x118c main\n"
        );
    }

    #[test]
    fn test_variable_format() {
        let fb = Feedback::Variables(vec![
            VariableInfo {
                name: "i".to_string(),
                location: ResolvedLocation::Address(Addr::from(0x7ffc_0000_0010usize)),
                value: 3,
            },
            VariableInfo {
                name: "n".to_string(),
                location: ResolvedLocation::Register(0),
                value: 7,
            },
        ]);
        assert_eq!(fb.to_string(), "i (0x7ffc00000010)=0x3\nn (reg 0)=0x7\n");
    }
}
