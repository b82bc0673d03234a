//! The traced process: its pid, its load address, and the breakpoints
//! currently planted in it. The breakpoint map is owned here exclusively;
//! addresses are unique keys and always runtime addresses.

use std::collections::HashMap;

use nix::sys::ptrace;
use nix::unistd::Pid;
use tracing::warn;

use crate::breakpoint::Breakpoint;
use crate::errors::Result;
use crate::Addr;

pub struct Debuggee {
    pub(crate) pid: Pid,
    pub(crate) breakpoints: HashMap<Addr, Breakpoint>,
    /// Base the image is mapped at; zero for non-PIE executables
    pub(crate) load_address: Addr,
}

impl Debuggee {
    pub(crate) fn build(pid: Pid, load_address: Addr) -> Self {
        Self {
            pid,
            breakpoints: HashMap::new(),
            load_address,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn load_address(&self) -> Addr {
        self.load_address
    }

    /// Runtime form of a file-relative address
    pub fn to_runtime(&self, addr: Addr) -> Addr {
        self.load_address + addr
    }

    /// File-relative form of a runtime address
    pub fn to_file_relative(&self, addr: Addr) -> Addr {
        addr.relative_to(self.load_address)
    }

    /// Plants an enabled breakpoint at a runtime address. Setting one
    /// where a breakpoint already exists is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the int3 cannot be written.
    pub fn set_breakpoint(&mut self, addr: Addr) -> Result<()> {
        if self.breakpoints.contains_key(&addr) {
            return Ok(());
        }
        let mut bp = Breakpoint::new(self.pid, addr);
        bp.enable()?;
        self.breakpoints.insert(addr, bp);
        Ok(())
    }

    /// Disables and forgets the breakpoint at a runtime address.
    ///
    /// # Errors
    ///
    /// Fails if the original byte cannot be restored.
    pub fn remove_breakpoint(&mut self, addr: Addr) -> Result<()> {
        if let Some(mut bp) = self.breakpoints.remove(&addr) {
            bp.disable()?;
        } else {
            warn!("removed a breakpoint at {addr:x?} that did not exist");
        }
        Ok(())
    }

    pub fn has_breakpoint(&self, addr: Addr) -> bool {
        self.breakpoints.contains_key(&addr)
    }

    pub fn kill(&self) -> Result<()> {
        ptrace::kill(self.pid)?;
        Ok(())
    }
}
