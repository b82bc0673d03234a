//! Line-oriented command front end.
//!
//! A command is whitespace-separated tokens. The first token selects a
//! command by prefix: the earliest entry of [`COMMANDS`] that the token is
//! a prefix of wins, so `c` is `continue` and `b` is `breakpoint`. The
//! remaining tokens must match the command's fixed arity exactly.

use std::str::FromStr;

use dialoguer::BasicHistory;
use tracing::{error, trace, warn};

use super::{BreakpointTarget, DebuggerUI, Status};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::{Addr, Word};

/// The command set, in match order, with each command's argument count
const COMMANDS: [(&str, usize); 14] = [
    ("continue", 0),
    ("breakpoint", 1),
    ("registers-dump", 0),
    ("read-register", 1),
    ("write-register", 2),
    ("read-memory", 1),
    ("write-memory", 2),
    ("symbol", 1),
    ("step", 0),
    ("stepi", 0),
    ("next", 0),
    ("finish", 0),
    ("backtrace", 0),
    ("variables", 0),
];

pub struct CliUi {
    buf: String,
    buf_preparsed: Vec<String>,
    history: BasicHistory,
}

impl CliUi {
    pub fn build() -> Result<Self> {
        Ok(CliUi {
            buf: String::new(),
            buf_preparsed: Vec::new(),
            history: BasicHistory::new(),
        })
    }

    fn get_input(&mut self) -> Result<()> {
        self.buf = dialoguer::Input::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt("sdb")
            .history_with(&mut self.history)
            .interact_text()?;
        trace!("processing '{}'", self.buf);
        self.buf_preparsed = self.buf.split_whitespace().map(|a| a.to_string()).collect();
        Ok(())
    }
}

impl DebuggerUI for CliUi {
    fn process(&mut self, feedback: Feedback) -> Result<Status> {
        match feedback {
            Feedback::Ok => (),
            Feedback::Error(e) => warn!("{e}"),
            other => print!("{other}{}", if other.multiline() { "" } else { "\n" }),
        }

        loop {
            if let Err(e) = self.get_input() {
                // closed input ends the session cleanly
                trace!("input ended: {e}");
                return Ok(Status::DebuggerQuit);
            }
            if self.buf_preparsed.is_empty() {
                continue;
            }
            match parse_command(&self.buf_preparsed) {
                Ok(status) => return Ok(status),
                Err(e) => {
                    error!("{e}");
                    continue;
                }
            }
        }
    }
}

fn parse_command(tokens: &[String]) -> Result<Status> {
    let head = tokens[0].as_str();
    let (name, arity) = *COMMANDS
        .iter()
        .find(|(name, _)| name.starts_with(head))
        .ok_or_else(|| DebuggerError::UnknownCommand(head.to_string()))?;

    if tokens.len() - 1 != arity {
        return Err(DebuggerError::BadArgumentCount {
            command: name,
            expected: arity,
        });
    }

    Ok(match name {
        "continue" => Status::Continue,
        "breakpoint" => Status::SetBreakpoint(parse_breakpoint_target(&tokens[1])?),
        "registers-dump" => Status::DumpRegisters,
        "read-register" => Status::ReadRegister(tokens[1].clone()),
        "write-register" => Status::WriteRegister(tokens[1].clone(), get_number(&tokens[2])?),
        "read-memory" => Status::ReadMem(Addr::from(get_number(&tokens[1])?)),
        "write-memory" => Status::WriteMem(
            Addr::from(get_number(&tokens[1])?),
            get_number(&tokens[2])? as Word,
        ),
        "symbol" => Status::Symbols(tokens[1].clone()),
        "step" => Status::StepIn,
        "stepi" => Status::StepInstruction,
        "next" => Status::StepOver,
        "finish" => Status::StepOut,
        "backtrace" => Status::Backtrace,
        "variables" => Status::Variables,
        _ => unreachable!("command table entry without a parser arm"),
    })
}

fn parse_breakpoint_target(arg: &str) -> Result<BreakpointTarget> {
    if arg.starts_with("0x") {
        return Ok(BreakpointTarget::Address(Addr::from(get_number(arg)?)));
    }
    if let Some((file, line)) = arg.rsplit_once(':') {
        return Ok(BreakpointTarget::Line {
            file: file.to_string(),
            line: u64::from_str(line)?,
        });
    }
    Ok(BreakpointTarget::Function(arg.to_string()))
}

fn get_number(mut raw: &str) -> Result<u64> {
    if let Some(stripped) = raw.strip_prefix("0x") {
        raw = stripped;
    }

    Ok(u64::from_str_radix(raw, 16)?)
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(line: &str) -> Result<Status> {
        let tokens: Vec<String> = line.split_whitespace().map(|a| a.to_string()).collect();
        parse_command(&tokens)
    }

    #[test]
    fn test_get_number() {
        assert_eq!(0x19u64, get_number("19").unwrap());
        assert_eq!(0x19u64, get_number("0x19").unwrap());
        assert_eq!(0x19u64, get_number("0x00019").unwrap());
        assert!(get_number("zz").is_err());
    }

    #[test]
    fn test_full_command_names() {
        assert_eq!(parse("continue").unwrap(), Status::Continue);
        assert_eq!(parse("registers-dump").unwrap(), Status::DumpRegisters);
        assert_eq!(parse("backtrace").unwrap(), Status::Backtrace);
        assert_eq!(parse("variables").unwrap(), Status::Variables);
        assert_eq!(parse("finish").unwrap(), Status::StepOut);
        assert_eq!(parse("next").unwrap(), Status::StepOver);
    }

    #[test]
    fn test_prefix_matching() {
        assert_eq!(parse("c").unwrap(), Status::Continue);
        assert_eq!(parse("cont").unwrap(), Status::Continue);
        assert_eq!(parse("r").unwrap(), Status::DumpRegisters);
        assert_eq!(parse("reg").unwrap(), Status::DumpRegisters);
        assert_eq!(parse("n").unwrap(), Status::StepOver);
        assert_eq!(parse("f").unwrap(), Status::StepOut);
        assert_eq!(parse("v").unwrap(), Status::Variables);
        // first match in table order wins
        assert_eq!(parse("s main").unwrap(), Status::Symbols("main".to_string()));
        assert_eq!(parse("st").unwrap(), Status::StepIn);
        assert_eq!(parse("stepi").unwrap(), Status::StepInstruction);
    }

    #[test]
    fn test_register_commands() {
        assert_eq!(
            parse("read-register rip").unwrap(),
            Status::ReadRegister("rip".to_string())
        );
        assert_eq!(
            parse("write-register rax 0x2a").unwrap(),
            Status::WriteRegister("rax".to_string(), 0x2a)
        );
        assert_eq!(
            parse("rea rip").unwrap(),
            Status::ReadRegister("rip".to_string())
        );
        assert_eq!(
            parse("read-m 0x401000").unwrap(),
            Status::ReadMem(Addr::from(0x401000usize))
        );
        assert_eq!(
            parse("write-memory 0x401000 0xff").unwrap(),
            Status::WriteMem(Addr::from(0x401000usize), 0xff)
        );
    }

    #[test]
    fn test_breakpoint_targets() {
        assert_eq!(
            parse("breakpoint 0x400500").unwrap(),
            Status::SetBreakpoint(BreakpointTarget::Address(Addr::from(0x400500usize)))
        );
        assert_eq!(
            parse("b main").unwrap(),
            Status::SetBreakpoint(BreakpointTarget::Function("main".to_string()))
        );
        assert_eq!(
            parse("b hello.c:12").unwrap(),
            Status::SetBreakpoint(BreakpointTarget::Line {
                file: "hello.c".to_string(),
                line: 12
            })
        );
    }

    #[test]
    fn test_arity_is_enforced() {
        assert!(matches!(
            parse("continue now"),
            Err(DebuggerError::BadArgumentCount { command: "continue", .. })
        ));
        assert!(matches!(
            parse("breakpoint"),
            Err(DebuggerError::BadArgumentCount { command: "breakpoint", .. })
        ));
        assert!(matches!(
            parse("s"),
            Err(DebuggerError::BadArgumentCount { command: "symbol", .. })
        ));
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(
            parse("quit"),
            Err(DebuggerError::UnknownCommand(_))
        ));
    }
}
