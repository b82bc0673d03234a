//! # Tracee Controller and Stepping Engine
//!
//! Owns the debuggee, triages its stop signals, and composes breakpoints,
//! single steps and line-table lookups into the source-level stepping
//! commands. While any command runs, the debuggee is stopped; every
//! resumption ends in [`Debugger::wait_signal`], so control only returns
//! here once the debuggee is stopped (or gone) again.

use std::ffi::CString;
use std::path::Path;

use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execv, fork, ForkResult, Pid};
use tracing::{debug, error, info, trace, warn};

use crate::consts::{SEGV_REASONS, SI_KERNEL, TRAP_BRKPT, TRAP_TRACE};
use crate::dbginfo::{DebugInfo, OwnedSymbol, SymbolKind};
use crate::debuggee::Debuggee;
use crate::dwarf_parse::{evaluate_location, LocationContext, ResolvedLocation};
use crate::errors::{DebuggerError, Result};
use crate::feedback::{Feedback, Frame, VariableInfo};
use crate::lines::LineEntry;
use crate::regs::{self, Register};
use crate::source;
use crate::ui::{BreakpointTarget, DebuggerUI, Status};
use crate::{mem_read_word, mem_write_word, Addr, Word};

/// Upper bound on backtrace depth, in case `main` is never found
const MAX_BACKTRACE_FRAMES: usize = 64;

pub struct Debugger<UI: DebuggerUI> {
    pub(crate) debuggee: Option<Debuggee>,
    pub(crate) ui: UI,
    dbginfo: DebugInfo,
}

impl<UI: DebuggerUI> Debugger<UI> {
    /// Loads the debug information for `path`, forks, and starts the
    /// child under ptrace with ASLR disabled. Returns once the child has
    /// delivered its initial stop and the load address is known.
    ///
    /// # Errors
    ///
    /// Fails if the executable is missing or unreadable, the fork fails,
    /// or the child dies before its initial stop.
    pub fn launch(path: impl AsRef<Path>, args: &[String], ui: UI) -> Result<Self> {
        let path: &Path = path.as_ref();
        if !path.exists() {
            let err = DebuggerError::ExecutableDoesNotExist(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }
        if !path.is_file() {
            let err = DebuggerError::ExecutableIsNotAFile(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }

        let dbginfo = DebugInfo::build(path)?;

        let cpath = CString::new(path.to_string_lossy().to_string().as_str())?;
        let mut cargs: Vec<CString> = vec![cpath.clone()];
        for arg in args {
            cargs.push(CString::new(arg.as_str())?);
        }

        let fork_res = unsafe { fork() };
        match fork_res {
            Err(e) => {
                error!("could not start executable: {e}");
                Err(e.into())
            }
            Ok(ForkResult::Child) => {
                // addresses must be stable for breakpoints given by hand
                let persona = personality::get()?;
                personality::set(persona | Persona::ADDR_NO_RANDOMIZE)
                    .inspect_err(|e| eprintln!("could not disable ASLR: {e}"))?;
                ptrace::traceme().inspect_err(|e| eprintln!("error while doing traceme: {e}"))?;
                execv(&cpath, &cargs)?;
                unreachable!()
            }
            Ok(ForkResult::Parent { child: pid }) => {
                match waitpid(pid, None)? {
                    WaitStatus::Exited(_, code) => {
                        return Err(DebuggerError::Launch(format!(
                            "debuggee exited with code {code} before the initial stop"
                        )))
                    }
                    status => trace!("initial stop: {status:?}"),
                }
                let load_address = dbginfo.load_address(pid)?;
                info!("debuggee running with PID {pid}, load address {load_address}");

                Ok(Debugger {
                    debuggee: Some(Debuggee::build(pid, load_address)),
                    ui,
                    dbginfo,
                })
            }
        }
    }

    /// The command loop: ask the UI for commands until it quits or an
    /// unrecoverable error surfaces.
    ///
    /// # Errors
    ///
    /// Fails only if the UI itself fails; command errors become
    /// [`Feedback::Error`] and the loop keeps going.
    pub fn run(&mut self) -> Result<()> {
        let mut feedback: Feedback = Feedback::Ok;
        loop {
            let status = match self.ui.process(feedback) {
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
                Ok(s) => s,
            };

            feedback = match status {
                Status::DebuggerQuit => break,
                Status::Continue => self.cont(),
                Status::SetBreakpoint(target) => self.set_breakpoint(target),
                Status::DumpRegisters => self.dump_regs(),
                Status::ReadRegister(name) => self.read_register(&name),
                Status::WriteRegister(name, value) => self.write_register(&name, value),
                Status::ReadMem(addr) => self.read_mem(addr),
                Status::WriteMem(addr, value) => self.write_mem(addr, value),
                Status::Symbols(name) => self.symbols(&name),
                Status::StepIn => self.step_in(),
                Status::StepInstruction => self.step_instruction(),
                Status::StepOver => self.step_over(),
                Status::StepOut => self.step_out(),
                Status::Backtrace => self.backtrace(),
                Status::Variables => self.variables(),
            }
            .into();

            // once the debuggee is gone, commands have nothing to act on
            if let Feedback::Exit(_) = feedback {
                self.debuggee = None;
            }
        }

        Ok(())
    }

    /// Kills a still-running debuggee.
    ///
    /// # Errors
    ///
    /// None; a kill that fails because the debuggee is already gone is
    /// only logged.
    pub fn cleanup(&self) -> Result<()> {
        if let Some(dbge) = &self.debuggee {
            if let Err(e) = dbge.kill() {
                warn!("could not kill debuggee on exit: {e}");
            }
        }
        Ok(())
    }

    fn debuggee(&self) -> Result<&Debuggee> {
        self.debuggee.as_ref().ok_or(DebuggerError::NoDebuggee)
    }

    fn debuggee_mut(&mut self) -> Result<&mut Debuggee> {
        self.debuggee.as_mut().ok_or(DebuggerError::NoDebuggee)
    }

    fn current_rip(&self) -> Result<Addr> {
        Ok(regs::get_reg(self.debuggee()?.pid, Register::rip)?.into())
    }

    /// Current pc in file-relative form
    fn file_rel_pc(&self) -> Result<Addr> {
        let dbge = self.debuggee()?;
        Ok(dbge.to_file_relative(self.current_rip()?))
    }

    fn current_line(&self) -> Result<LineEntry> {
        self.dbginfo.line_at(self.file_rel_pc()?)
    }

    // ------------- signal triage -------------

    /// Blocks until the debuggee stops or exits, then dispatches on the
    /// stop signal. Breakpoint traps rewind rip onto the trapped
    /// instruction and report it together with the source line.
    ///
    /// # Errors
    ///
    /// Fails if waiting or signal inspection fails, or if a breakpoint
    /// hit cannot be resolved to a source line.
    pub fn wait_signal(&self) -> Result<Feedback> {
        let dbge = self.debuggee()?;

        match waitpid(dbge.pid, None)? {
            WaitStatus::Exited(_, exit_code) => Ok(Feedback::Exit(exit_code)),
            WaitStatus::Signaled(_, signal, _) => {
                debug!("debuggee terminated by signal {signal}");
                Ok(Feedback::Exit(-1))
            }
            _ => {
                let siginfo = ptrace::getsiginfo(dbge.pid)?;
                let signal = Signal::try_from(siginfo.si_signo)?;
                match signal {
                    Signal::SIGTRAP => self.handle_sigtrap(&siginfo)?,
                    Signal::SIGSEGV => report_segfault(&siginfo),
                    other => println!("Got signal {}", other.as_str()),
                }
                Ok(Feedback::Ok)
            }
        }
    }

    fn handle_sigtrap(&self, siginfo: &nix::libc::siginfo_t) -> Result<()> {
        trace!("SIGTRAP with code {}", siginfo.si_code);
        match siginfo.si_code {
            // the trap advanced rip past the int3; rewind onto the
            // trapped instruction, whether or not we planted it
            SI_KERNEL | TRAP_BRKPT => {
                let dbge = self.debuggee()?;
                let rip = regs::get_reg(dbge.pid, Register::rip)? - 1;
                regs::set_reg(dbge.pid, Register::rip, rip)?;

                println!("**Hit breakpoint at address {rip:#x}**");
                let entry = self.dbginfo.line_at(dbge.to_file_relative(rip.into()))?;
                source::print_source(&entry.file, entry.line, source::CONTEXT_LINES);
                Ok(())
            }
            TRAP_TRACE => Ok(()), // single step completed
            code => {
                println!("Unknown SIGTRAP code {code}");
                Ok(())
            }
        }
    }

    // ------------- resumption primitives -------------

    /// Resumes the debuggee until its next stop.
    ///
    /// # Errors
    ///
    /// Fails if the debuggee is gone or resumption fails.
    pub fn cont(&mut self) -> Result<Feedback> {
        if let fb @ Feedback::Exit(_) = self.step_over_breakpoint()? {
            return Ok(fb);
        }
        ptrace::cont(self.debuggee()?.pid, None)?;
        self.wait_signal()
    }

    /// One machine instruction.
    fn single_step(&mut self) -> Result<Feedback> {
        ptrace::step(self.debuggee()?.pid, None)?;
        self.wait_signal()
    }

    /// One machine instruction, stepping over a breakpoint at rip if one
    /// is planted there.
    fn single_step_checked(&mut self) -> Result<Feedback> {
        let rip = self.current_rip()?;
        if self.debuggee()?.has_breakpoint(rip) {
            self.step_over_breakpoint()
        } else {
            self.single_step()
        }
    }

    /// If an enabled breakpoint sits at the current rip, lifts it for one
    /// single step and plants it again. rip already points at the
    /// original instruction here because the trap handler rewound it.
    fn step_over_breakpoint(&mut self) -> Result<Feedback> {
        let rip = self.current_rip()?;
        let dbge = self.debuggee_mut()?;

        let Some(bp) = dbge.breakpoints.get_mut(&rip) else {
            return Ok(Feedback::Ok);
        };
        if !bp.is_enabled() {
            return Ok(Feedback::Ok);
        }

        trace!("lifting breakpoint at {rip} for one step");
        bp.disable()?;
        ptrace::step(dbge.pid, None)?;
        let fb = self.wait_signal()?;
        if let Feedback::Exit(_) = fb {
            return Ok(fb);
        }
        self.debuggee_mut()?
            .breakpoints
            .get_mut(&rip)
            .expect("breakpoint vanished while lifted")
            .enable()?;

        Ok(fb)
    }

    // ------------- breakpoints -------------

    /// Plants a breakpoint at an address, a function (past its prologue)
    /// or a file:line statement.
    ///
    /// # Errors
    ///
    /// Fails if the target cannot be resolved or the int3 cannot be
    /// written.
    pub fn set_breakpoint(&mut self, target: BreakpointTarget) -> Result<Feedback> {
        let addr = match target {
            BreakpointTarget::Address(addr) => addr,
            BreakpointTarget::Function(ref name) => {
                let file_rel = self.post_prologue_address(name)?;
                self.debuggee()?.to_runtime(file_rel)
            }
            BreakpointTarget::Line { ref file, line } => {
                let file_rel = self.dbginfo.address_for_line(file, line)?;
                self.debuggee()?.to_runtime(file_rel)
            }
        };

        self.debuggee_mut()?.set_breakpoint(addr)?;
        Ok(Feedback::Text(format!(
            "Breakpoint set at address {:#x}",
            addr.u64()
        )))
    }

    /// The file-relative address of the first statement after a
    /// function's prologue: the line entry at the low pc, advanced by one
    /// row.
    fn post_prologue_address(&self, name: &str) -> Result<Addr> {
        let funcs = self.dbginfo.functions_by_name(name);
        let func = funcs
            .first()
            .ok_or_else(|| DebuggerError::UnknownFunction(name.to_string()))?;
        let low = func
            .low_addr()
            .ok_or_else(|| DebuggerError::UnknownFunction(name.to_string()))?;
        let high = func.high_addr().unwrap_or(low + 1usize);

        let entries = self.dbginfo.line_entries_in_range(low, high)?;
        Ok(entries
            .get(1)
            .or_else(|| entries.first())
            .map_or(low, |e| e.address))
    }

    // ------------- stepping -------------

    /// One machine instruction, then the new source position.
    pub fn step_instruction(&mut self) -> Result<Feedback> {
        if let fb @ Feedback::Exit(_) = self.single_step_checked()? {
            return Ok(fb);
        }
        let entry = self.current_line()?;
        source::print_source(&entry.file, entry.line, source::CONTEXT_LINES);
        Ok(Feedback::Ok)
    }

    /// Source-level step into: machine steps until the source line
    /// changes.
    pub fn step_in(&mut self) -> Result<Feedback> {
        let start_line = self.current_line()?.line;
        loop {
            if let fb @ Feedback::Exit(_) = self.single_step_checked()? {
                return Ok(fb);
            }
            let entry = self.current_line()?;
            if entry.line != start_line {
                source::print_source(&entry.file, entry.line, source::CONTEXT_LINES);
                return Ok(Feedback::Ok);
            }
        }
    }

    /// Source-level step over: temporary breakpoints on every other line
    /// of the enclosing function and on the return address, then
    /// continue. Only breakpoints created here are removed afterwards.
    pub fn step_over(&mut self) -> Result<Feedback> {
        let pc = self.file_rel_pc()?;
        let func = self.dbginfo.function_at(pc)?;
        let low = func.low_addr().ok_or(DebuggerError::NoFunctionAtPc(pc))?;
        let high = func.high_addr().ok_or(DebuggerError::NoFunctionAtPc(pc))?;

        let start_line = self.dbginfo.line_at(pc)?;
        let mut created: Vec<Addr> = Vec::new();

        for entry in self.dbginfo.line_entries_in_range(low, high)? {
            if entry.address == start_line.address {
                continue;
            }
            let runtime = self.debuggee()?.to_runtime(entry.address);
            if !self.debuggee()?.has_breakpoint(runtime) {
                self.debuggee_mut()?.set_breakpoint(runtime)?;
                created.push(runtime);
            }
        }

        let return_addr = self.return_address()?;
        if !self.debuggee()?.has_breakpoint(return_addr) {
            self.debuggee_mut()?.set_breakpoint(return_addr)?;
            created.push(return_addr);
        }

        let fb = self.cont()?;

        if !matches!(fb, Feedback::Exit(_)) {
            for addr in created {
                self.debuggee_mut()?.remove_breakpoint(addr)?;
            }
        }
        Ok(fb)
    }

    /// Runs until the current function returns, using a temporary
    /// breakpoint on the return address unless one is already there.
    pub fn step_out(&mut self) -> Result<Feedback> {
        match self.dbginfo.function_at(self.file_rel_pc()?) {
            Ok(f) if f.name() == Some("main") => {
                error!("there is no frame below main to return to");
                return Err(DebuggerError::StepOutMain);
            }
            Ok(f) => debug!("stepping out of {:?}", f.name()),
            Err(e) => warn!("no debug symbol for the current address: {e}"),
        }

        let return_addr = self.return_address()?;
        let created = if self.debuggee()?.has_breakpoint(return_addr) {
            false
        } else {
            self.debuggee_mut()?.set_breakpoint(return_addr)?;
            true
        };

        let fb = self.cont()?;

        if created && !matches!(fb, Feedback::Exit(_)) {
            self.debuggee_mut()?.remove_breakpoint(return_addr)?;
        }
        Ok(fb)
    }

    /// The return address of the current frame, read from `[rbp + 8]`.
    /// Assumes frame-pointer-preserving code generation.
    fn return_address(&self) -> Result<Addr> {
        let dbge = self.debuggee()?;
        let frame_pointer: Addr = regs::get_reg(dbge.pid, Register::rbp)?.into();
        Ok(mem_read_word(dbge.pid, frame_pointer + 8usize)?.into())
    }

    // ------------- inspection -------------

    /// Walks the frame-pointer chain from the current function down to
    /// `main`, capped at [`MAX_BACKTRACE_FRAMES`].
    pub fn backtrace(&self) -> Result<Feedback> {
        let dbge = self.debuggee()?;
        let mut frames = Vec::new();

        let current = self.dbginfo.function_at(self.file_rel_pc()?)?;
        frames.push(frame_of(&current));

        let mut frame_pointer: Addr = regs::get_reg(dbge.pid, Register::rbp)?.into();
        let mut return_addr: Addr = mem_read_word(dbge.pid, frame_pointer + 8usize)?.into();

        while current.name() != Some("main") && frames.len() < MAX_BACKTRACE_FRAMES {
            let func = self
                .dbginfo
                .function_at(dbge.to_file_relative(return_addr))?;
            frames.push(frame_of(&func));
            if func.name() == Some("main") {
                break;
            }
            frame_pointer = mem_read_word(dbge.pid, frame_pointer)?.into();
            return_addr = mem_read_word(dbge.pid, frame_pointer + 8usize)?.into();
        }

        Ok(Feedback::Backtrace(frames))
    }

    /// Every variable of the current function with its location and
    /// current value.
    ///
    /// # Errors
    ///
    /// Fails if the pc is outside any known function or a variable's
    /// location expression cannot be evaluated.
    pub fn variables(&self) -> Result<Feedback> {
        let dbge = self.debuggee()?;
        let ctx = TraceeContext {
            pid: dbge.pid,
            load_address: dbge.load_address(),
        };

        let func = self.dbginfo.function_at(ctx.pc()?)?;
        let frame_base = func.frame_base().and_then(|attr| attr.exprloc_value());

        let mut vars = Vec::new();
        for var in crate::dbginfo::search_through_symbols(func.children(), |s| {
            s.kind() == SymbolKind::Variable
        }) {
            let Some(expression) = var.location().and_then(|attr| attr.exprloc_value()) else {
                debug!("variable {:?} has no location expression", var.name());
                continue;
            };
            let location =
                evaluate_location(expression, var.encoding(), frame_base.as_ref(), &ctx)?;
            let value = match location {
                ResolvedLocation::Address(addr) => ctx.deref_word(addr)?,
                ResolvedLocation::Register(number) => ctx.register(number)?,
            };
            vars.push(VariableInfo {
                name: var.name().unwrap_or("<unnamed>").to_string(),
                location,
                value,
            });
        }

        Ok(Feedback::Variables(vars))
    }

    pub fn dump_regs(&self) -> Result<Feedback> {
        Ok(Feedback::Registers(regs::dump_regs(self.debuggee()?.pid)?))
    }

    pub fn read_register(&self, name: &str) -> Result<Feedback> {
        let reg: Register = name.parse()?;
        Ok(Feedback::Word(regs::get_reg(self.debuggee()?.pid, reg)?))
    }

    pub fn write_register(&self, name: &str, value: u64) -> Result<Feedback> {
        let reg: Register = name.parse()?;
        regs::set_reg(self.debuggee()?.pid, reg, value)?;
        Ok(Feedback::Ok)
    }

    pub fn read_mem(&self, addr: Addr) -> Result<Feedback> {
        let word = mem_read_word(self.debuggee()?.pid, addr)?;
        Ok(Feedback::Word(word as u64))
    }

    pub fn write_mem(&self, addr: Addr, value: Word) -> Result<Feedback> {
        mem_write_word(self.debuggee()?.pid, addr, value)?;
        Ok(Feedback::Ok)
    }

    pub fn symbols(&self, name: &str) -> Result<Feedback> {
        Ok(Feedback::Symbols(self.dbginfo.lookup_symbol(name)))
    }
}

fn frame_of(func: &OwnedSymbol) -> Frame {
    Frame {
        addr: func.low_addr().unwrap_or_default(),
        name: func.name().unwrap_or("<unknown>").to_string(),
    }
}

fn report_segfault(siginfo: &nix::libc::siginfo_t) {
    let code = siginfo.si_code;
    if code >= 1 && (code as usize) <= SEGV_REASONS.len() {
        println!(
            "Segmentation fault. Reason : {}",
            SEGV_REASONS[(code - 1) as usize]
        );
    } else {
        println!("Segmentation fault. Couldn't decipher reason! si_code : {code}");
    }
}

/// The live-tracee capabilities handed to the location evaluator: live
/// registers and memory, plus the load base for the file-relative
/// addresses embedded in expressions.
struct TraceeContext {
    pid: Pid,
    load_address: Addr,
}

impl LocationContext for TraceeContext {
    fn register(&self, number: u16) -> Result<u64> {
        regs::get_reg_by_dwarf_number(self.pid, number)
    }

    fn pc(&self) -> Result<Addr> {
        let rip: Addr = regs::get_reg(self.pid, Register::rip)?.into();
        Ok(rip.relative_to(self.load_address))
    }

    fn relocate(&self, addr: Addr) -> Result<Addr> {
        Ok(self.load_address + addr)
    }

    fn deref_word(&self, addr: Addr) -> Result<u64> {
        Ok(mem_read_word(self.pid, addr)? as u64)
    }
}
