//! Software breakpoints: an int3 opcode patched over the first byte of an
//! instruction, with the original byte saved for restoration.

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::errors::Result;
use crate::{Addr, Word};

/// The int3 opcode
pub const INT3_BYTE: u8 = 0xcc;
const BYTE_MASK: Word = 0xff;

/// A software breakpoint in the debuggee's text.
///
/// While enabled, the byte at `addr` is [`INT3_BYTE`] and the original byte
/// lives in `saved_data`; while disabled, the original byte is back in
/// place. The engine owns that byte for as long as the breakpoint is
/// enabled.
#[derive(Debug)]
pub struct Breakpoint {
    addr: Addr,
    pid: Pid,
    saved_data: Option<u8>,
}

impl Breakpoint {
    /// Creates a disabled breakpoint at the given runtime address.
    pub fn new(pid: Pid, addr: Addr) -> Self {
        Self {
            pid,
            addr,
            saved_data: None,
        }
    }

    /// Patches the int3 in. Enabling an enabled breakpoint is a no-op.
    ///
    /// ptrace reads whole words, so the containing word is fetched and
    /// written back with only its low byte replaced; `addr` need not be
    /// word aligned for the high 56 bits to survive unchanged.
    ///
    /// # Errors
    ///
    /// Fails if the debuggee's memory cannot be read or written.
    pub fn enable(&mut self) -> Result<()> {
        if self.saved_data.is_some() {
            return Ok(());
        }

        let word: Word = ptrace::read(self.pid, self.addr.raw_pointer())?;
        self.saved_data = Some((word & BYTE_MASK) as u8);
        ptrace::write(self.pid, self.addr.raw_pointer(), patch_low_byte(word, INT3_BYTE))?;

        Ok(())
    }

    /// Restores the original byte. Disabling a disabled breakpoint is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Fails if the debuggee's memory cannot be read or written.
    pub fn disable(&mut self) -> Result<()> {
        let Some(original) = self.saved_data else {
            return Ok(());
        };

        let word: Word = ptrace::read(self.pid, self.addr.raw_pointer())?;
        ptrace::write(self.pid, self.addr.raw_pointer(), patch_low_byte(word, original))?;
        self.saved_data = None;

        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.saved_data.is_some()
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn saved_data(&self) -> Option<u8> {
        self.saved_data
    }
}

/// Replaces the low byte of a word, leaving the other 56 bits untouched.
fn patch_low_byte(word: Word, byte: u8) -> Word {
    (word & !BYTE_MASK) | Word::from(byte)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_patch_low_byte() {
        assert_eq!(patch_low_byte(0x1122334455667788, INT3_BYTE), 0x11223344556677cc);
        assert_eq!(patch_low_byte(0x11223344556677cc, 0x88), 0x1122334455667788);
    }

    #[test]
    fn test_patch_keeps_sign_bit() {
        let word: Word = i64::from_ne_bytes([0x55, 0, 0, 0, 0, 0, 0, 0xff]);
        let patched = patch_low_byte(word, INT3_BYTE);
        assert_eq!(patched.to_ne_bytes()[0], INT3_BYTE);
        assert_eq!(patched.to_ne_bytes()[7], 0xff);
    }
}
