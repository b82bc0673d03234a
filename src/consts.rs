//! Signal sub-code constants the kernel delivers with SIGTRAP and SIGSEGV.
//!
//! These live deep in the libc headers and are not exported by nix or the
//! rust libc bindings.
//!
//! Source: <https://elixir.bootlin.com/linux/v6.13.1/source/include/uapi/asm-generic/siginfo.h#L227>

#![allow(unused)]

/// Sent by the kernel, among others for an int3 the kernel itself planted
pub const SI_KERNEL: i32 = 0x80;

// ---------------- SIGTRAP si_codes ----------------

/// Process breakpoint
pub const TRAP_BRKPT: i32 = 0x1;
/// Process trace trap
pub const TRAP_TRACE: i32 = 0x2;
/// Process taken branch trap
pub const TRAP_BRANCH: i32 = 0x3;
/// Hardware breakpoint/watchpoint
pub const TRAP_HWBKPT: i32 = 0x4;

// ---------------- SIGSEGV si_codes ----------------

/// Sub-reason names for SIGSEGV, indexed by `si_code - 1`
pub const SEGV_REASONS: [&str; 4] = [
    "SEGV_MAPERR",
    "SEGV_ACCERR",
    "SEGV_BNDERR",
    "SEGV_PKUERR",
];
