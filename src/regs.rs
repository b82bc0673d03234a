//! # Register File View
//!
//! Typed access to the debuggee's general-purpose registers.
//!
//! The kernel exposes the register state as a block of 27 consecutive
//! 64-bit fields ([`nix::libc::user_regs_struct`]); [`Register`] names
//! those fields in block order. [`REGISTER_TABLE`] is the single source of
//! truth tying each register to its lowercase name and, where the SysV
//! x86-64 psABI assigns one, its DWARF register number. All register writes
//! are read-modify-write of the whole block.

use std::fmt::Display;
use std::str::FromStr;

use nix::libc::user_regs_struct;
use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::errors::{DebuggerError, Result};

/// How many registers the kernel's user register block holds
pub const REGISTER_COUNT: usize = 27;

/// The general-purpose x86-64 registers, in the order of the kernel's
/// user register block.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Register {
    r15,
    r14,
    r13,
    r12,
    rbp,
    rbx,
    r11,
    r10,
    r9,
    r8,
    rax,
    rcx,
    rdx,
    rsi,
    rdi,
    orig_rax,
    rip,
    cs,
    eflags,
    rsp,
    ss,
    fs_base,
    gs_base,
    ds,
    es,
    fs,
    gs,
}

/// One row of the register mapping table
pub struct RegDescriptor {
    pub reg: Register,
    pub name: &'static str,
    /// DWARF register number per the SysV x86-64 psABI, if any
    pub dwarf: Option<u16>,
}

/// Maps every register to its name and DWARF number.
///
/// The table index equals the register's position in the kernel block; the
/// DWARF column follows the psABI and is deliberately different from that
/// position.
pub const REGISTER_TABLE: [RegDescriptor; REGISTER_COUNT] = [
    RegDescriptor { reg: Register::r15, name: "r15", dwarf: Some(15) },
    RegDescriptor { reg: Register::r14, name: "r14", dwarf: Some(14) },
    RegDescriptor { reg: Register::r13, name: "r13", dwarf: Some(13) },
    RegDescriptor { reg: Register::r12, name: "r12", dwarf: Some(12) },
    RegDescriptor { reg: Register::rbp, name: "rbp", dwarf: Some(6) },
    RegDescriptor { reg: Register::rbx, name: "rbx", dwarf: Some(3) },
    RegDescriptor { reg: Register::r11, name: "r11", dwarf: Some(11) },
    RegDescriptor { reg: Register::r10, name: "r10", dwarf: Some(10) },
    RegDescriptor { reg: Register::r9, name: "r9", dwarf: Some(9) },
    RegDescriptor { reg: Register::r8, name: "r8", dwarf: Some(8) },
    RegDescriptor { reg: Register::rax, name: "rax", dwarf: Some(0) },
    RegDescriptor { reg: Register::rcx, name: "rcx", dwarf: Some(2) },
    RegDescriptor { reg: Register::rdx, name: "rdx", dwarf: Some(1) },
    RegDescriptor { reg: Register::rsi, name: "rsi", dwarf: Some(4) },
    RegDescriptor { reg: Register::rdi, name: "rdi", dwarf: Some(5) },
    RegDescriptor { reg: Register::orig_rax, name: "orig_rax", dwarf: None },
    RegDescriptor { reg: Register::rip, name: "rip", dwarf: None },
    RegDescriptor { reg: Register::cs, name: "cs", dwarf: Some(51) },
    RegDescriptor { reg: Register::eflags, name: "eflags", dwarf: Some(49) },
    RegDescriptor { reg: Register::rsp, name: "rsp", dwarf: Some(7) },
    RegDescriptor { reg: Register::ss, name: "ss", dwarf: Some(52) },
    RegDescriptor { reg: Register::fs_base, name: "fs_base", dwarf: Some(58) },
    RegDescriptor { reg: Register::gs_base, name: "gs_base", dwarf: Some(59) },
    RegDescriptor { reg: Register::ds, name: "ds", dwarf: Some(53) },
    RegDescriptor { reg: Register::es, name: "es", dwarf: Some(50) },
    RegDescriptor { reg: Register::fs, name: "fs", dwarf: Some(54) },
    RegDescriptor { reg: Register::gs, name: "gs", dwarf: Some(55) },
];

impl Register {
    /// Position of this register in the kernel's user register block
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// The register at the given block position
    ///
    /// # Errors
    ///
    /// Fails with [`DebuggerError::RegisterIndexOutOfRange`] unless
    /// `0 <= index < 27`.
    pub fn from_ordinal(index: usize) -> Result<Self> {
        REGISTER_TABLE
            .get(index)
            .map(|d| d.reg)
            .ok_or(DebuggerError::RegisterIndexOutOfRange(index))
    }

    /// The register with the given DWARF number
    ///
    /// # Errors
    ///
    /// Fails with [`DebuggerError::UnknownDwarfRegister`] if the psABI
    /// assigns the number to no general-purpose register.
    pub fn from_dwarf_number(number: u16) -> Result<Self> {
        REGISTER_TABLE
            .iter()
            .find(|d| d.dwarf == Some(number))
            .map(|d| d.reg)
            .ok_or(DebuggerError::UnknownDwarfRegister(number))
    }

    pub fn name(self) -> &'static str {
        REGISTER_TABLE[self.ordinal()].name
    }

    pub fn dwarf_number(self) -> Option<u16> {
        REGISTER_TABLE[self.ordinal()].dwarf
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Register {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self> {
        REGISTER_TABLE
            .iter()
            .find(|d| d.name == s)
            .map(|d| d.reg)
            .ok_or_else(|| DebuggerError::UnknownRegister(s.to_string()))
    }
}

// The one place that knows the register block as a struct. Everything else
// goes through the Register ordinals.
fn field_mut(regs: &mut user_regs_struct, reg: Register) -> &mut u64 {
    match reg {
        Register::r15 => &mut regs.r15,
        Register::r14 => &mut regs.r14,
        Register::r13 => &mut regs.r13,
        Register::r12 => &mut regs.r12,
        Register::rbp => &mut regs.rbp,
        Register::rbx => &mut regs.rbx,
        Register::r11 => &mut regs.r11,
        Register::r10 => &mut regs.r10,
        Register::r9 => &mut regs.r9,
        Register::r8 => &mut regs.r8,
        Register::rax => &mut regs.rax,
        Register::rcx => &mut regs.rcx,
        Register::rdx => &mut regs.rdx,
        Register::rsi => &mut regs.rsi,
        Register::rdi => &mut regs.rdi,
        Register::orig_rax => &mut regs.orig_rax,
        Register::rip => &mut regs.rip,
        Register::cs => &mut regs.cs,
        Register::eflags => &mut regs.eflags,
        Register::rsp => &mut regs.rsp,
        Register::ss => &mut regs.ss,
        Register::fs_base => &mut regs.fs_base,
        Register::gs_base => &mut regs.gs_base,
        Register::ds => &mut regs.ds,
        Register::es => &mut regs.es,
        Register::fs => &mut regs.fs,
        Register::gs => &mut regs.gs,
    }
}

/// Reads one register of the debuggee.
///
/// # Errors
///
/// Fails if the register block cannot be fetched.
pub fn get_reg(pid: Pid, reg: Register) -> Result<u64> {
    let mut regs = ptrace::getregs(pid)?;
    Ok(*field_mut(&mut regs, reg))
}

/// Writes one register of the debuggee.
///
/// The whole block is fetched, the one field replaced and the block
/// written back.
///
/// # Errors
///
/// Fails if the register block cannot be fetched or stored.
pub fn set_reg(pid: Pid, reg: Register, value: u64) -> Result<()> {
    let mut regs = ptrace::getregs(pid)?;
    *field_mut(&mut regs, reg) = value;
    ptrace::setregs(pid, regs)?;
    Ok(())
}

/// Reads the register the psABI assigns the given DWARF number to.
///
/// # Errors
///
/// Fails with [`DebuggerError::UnknownDwarfRegister`] for numbers outside
/// the mapping table.
pub fn get_reg_by_dwarf_number(pid: Pid, number: u16) -> Result<u64> {
    get_reg(pid, Register::from_dwarf_number(number)?)
}

/// Reads every register, in block order, paired with its name.
///
/// # Errors
///
/// Fails if the register block cannot be fetched.
pub fn dump_regs(pid: Pid) -> Result<Vec<(&'static str, u64)>> {
    let mut regs = ptrace::getregs(pid)?;
    Ok(REGISTER_TABLE
        .iter()
        .map(|d| (d.name, *field_mut(&mut regs, d.reg)))
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_table_matches_block_order() {
        for (idx, descriptor) in REGISTER_TABLE.iter().enumerate() {
            assert_eq!(descriptor.reg.ordinal(), idx);
            assert_eq!(Register::from_ordinal(idx).unwrap(), descriptor.reg);
        }
    }

    #[test]
    fn test_ordinal_bounds() {
        assert!(Register::from_ordinal(REGISTER_COUNT).is_err());
        assert!(Register::from_ordinal(usize::MAX).is_err());
        assert_eq!(Register::from_ordinal(0).unwrap(), Register::r15);
        assert_eq!(Register::from_ordinal(16).unwrap(), Register::rip);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(Register::from_str("rax").unwrap(), Register::rax);
        assert_eq!(Register::from_str("fs_base").unwrap(), Register::fs_base);
        assert!(matches!(
            Register::from_str("xmm0"),
            Err(DebuggerError::UnknownRegister(_))
        ));
        assert_eq!(Register::rsp.to_string(), "rsp");
    }

    #[test]
    fn test_lookup_by_dwarf_number() {
        assert_eq!(Register::from_dwarf_number(0).unwrap(), Register::rax);
        assert_eq!(Register::from_dwarf_number(6).unwrap(), Register::rbp);
        assert_eq!(Register::from_dwarf_number(16).unwrap_err().to_string(),
            "No register has DWARF number 16");
        assert_eq!(Register::from_dwarf_number(58).unwrap(), Register::fs_base);
        assert_eq!(Register::rip.dwarf_number(), None);
        assert_eq!(Register::orig_rax.dwarf_number(), None);
        assert_eq!(Register::eflags.dwarf_number(), Some(49));
    }
}
