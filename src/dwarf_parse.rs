//! Low-level DWARF plumbing: the reader type the whole crate parses with,
//! attribute helpers, and the location-expression evaluator.

use gimli::{Attribute, AttributeValue, Reader, Unit};

use crate::errors::{DebuggerError, Result};
use crate::Addr;

/// The gimli reader used everywhere: sections copied into refcounted
/// buffers, so the parsed DWARF owns its bytes
pub type GimliReader = gimli::EndianRcSlice<gimli::NativeEndian>;

pub(crate) fn parse_string(
    dwarf: &gimli::Dwarf<GimliReader>,
    unit: &Unit<GimliReader>,
    attribute: Option<Attribute<GimliReader>>,
) -> Result<Option<String>> {
    Ok(if let Some(a) = attribute {
        Some(
            dwarf
                .attr_string(unit, a.value())?
                .to_string_lossy()?
                .to_string(),
        )
    } else {
        None
    })
}

/// Parses a low-pc style attribute into a file-relative address.
pub(crate) fn parse_addr(
    dwarf: &gimli::Dwarf<GimliReader>,
    unit: &Unit<GimliReader>,
    attribute: Option<Attribute<GimliReader>>,
) -> Result<Option<Addr>> {
    Ok(if let Some(a) = attribute {
        dwarf.attr_address(unit, a.value())?.map(Addr::from)
    } else {
        None
    })
}

/// Parses a high-pc attribute, which DWARF encodes either as an address or
/// as an offset past the low pc.
pub(crate) fn parse_high_addr(
    dwarf: &gimli::Dwarf<GimliReader>,
    unit: &Unit<GimliReader>,
    attribute: Option<Attribute<GimliReader>>,
    low: Option<Addr>,
) -> Result<Option<Addr>> {
    let Some(a) = attribute else {
        return Ok(None);
    };
    Ok(match a.value() {
        AttributeValue::Udata(offset) => match low {
            Some(l) => Some(l + offset as usize),
            None => return Err(DebuggerError::HighAddrExistsButNotLowAddr),
        },
        other => dwarf.attr_address(unit, other)?.map(Addr::from),
    })
}

/// Where a variable currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedLocation {
    /// A runtime memory address
    Address(Addr),
    /// A DWARF register number
    Register(u16),
}

/// The capabilities a location expression may draw on while being
/// evaluated.
///
/// Register values are live runtime values, so every address built from
/// them during evaluation is a runtime address; [`LocationContext::relocate`]
/// lifts the file-relative addresses embedded in the expression itself into
/// the same space. Only [`LocationContext::pc`] is file-relative, since it
/// exists to look things up in the debug information.
pub trait LocationContext {
    /// Current value of the register with the given DWARF number
    fn register(&self, number: u16) -> Result<u64>;
    /// Current program counter, file-relative
    fn pc(&self) -> Result<Addr>;
    /// Runtime form of a file-relative address
    fn relocate(&self, addr: Addr) -> Result<Addr>;
    /// One word of debuggee memory at a runtime address
    fn deref_word(&self, addr: Addr) -> Result<u64>;
}

/// Evaluates a DWARF location expression against the live debuggee.
///
/// `frame_base` is the enclosing function's frame-base expression; it is
/// evaluated on demand when the expression uses frame-relative operators.
///
/// The resulting [`ResolvedLocation::Address`] is a runtime address.
///
/// # Errors
///
/// Fails with [`DebuggerError::UnsupportedLocation`] for expressions that
/// need more than registers, memory and a frame base, or whose result is
/// neither a single address nor a single register. Fails with
/// [`DebuggerError::NoFrameBase`] if a frame base is required but the
/// function has none.
pub fn evaluate_location<C: LocationContext>(
    expression: gimli::Expression<GimliReader>,
    encoding: gimli::Encoding,
    frame_base: Option<&gimli::Expression<GimliReader>>,
    ctx: &C,
) -> Result<ResolvedLocation> {
    let mut eval = expression.evaluation(encoding);
    let mut state = eval.evaluate()?;

    loop {
        match state {
            gimli::EvaluationResult::Complete => break,
            gimli::EvaluationResult::RequiresRegister { register, .. } => {
                let value = ctx.register(register.0)?;
                state = eval.resume_with_register(gimli::Value::Generic(value))?;
            }
            gimli::EvaluationResult::RequiresMemory { address, .. } => {
                let word = ctx.deref_word(Addr::from(address))?;
                state = eval.resume_with_memory(gimli::Value::Generic(word))?;
            }
            gimli::EvaluationResult::RequiresFrameBase => {
                let fb_expr = frame_base.ok_or(DebuggerError::NoFrameBase)?;
                let base = match evaluate_location(fb_expr.clone(), encoding, None, ctx)? {
                    ResolvedLocation::Address(a) => a.u64(),
                    ResolvedLocation::Register(n) => ctx.register(n)?,
                };
                state = eval.resume_with_frame_base(base)?;
            }
            gimli::EvaluationResult::RequiresRelocatedAddress(address) => {
                // addresses embedded in the expression are file-relative;
                // lift them into the runtime space the registers live in
                let runtime = ctx.relocate(Addr::from(address))?;
                state = eval.resume_with_relocated_address(runtime.u64())?;
            }
            _ => return Err(DebuggerError::UnsupportedLocation),
        }
    }

    let pieces = eval.result();
    match pieces.first().map(|p| &p.location) {
        Some(gimli::Location::Address { address }) => {
            Ok(ResolvedLocation::Address(Addr::from(*address)))
        }
        Some(gimli::Location::Register { register }) => {
            Ok(ResolvedLocation::Register(register.0))
        }
        _ => Err(DebuggerError::UnsupportedLocation),
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use super::*;

    struct FixedContext {
        rbp: u64,
        load_address: Addr,
    }

    impl LocationContext for FixedContext {
        fn register(&self, number: u16) -> Result<u64> {
            match number {
                6 => Ok(self.rbp),
                n => Err(DebuggerError::UnknownDwarfRegister(n)),
            }
        }

        fn pc(&self) -> Result<Addr> {
            Ok(Addr::from(0x1149usize))
        }

        fn relocate(&self, addr: Addr) -> Result<Addr> {
            Ok(self.load_address + addr)
        }

        fn deref_word(&self, _addr: Addr) -> Result<u64> {
            Ok(0)
        }
    }

    fn expression(bytes: &[u8]) -> gimli::Expression<GimliReader> {
        gimli::Expression(GimliReader::new(Rc::from(bytes), gimli::NativeEndian))
    }

    fn encoding() -> gimli::Encoding {
        gimli::Encoding {
            format: gimli::Format::Dwarf32,
            version: 4,
            address_size: 8,
        }
    }

    #[test]
    fn test_register_location() {
        // DW_OP_reg6
        let expr = expression(&[0x56]);
        let ctx = FixedContext { rbp: 0x7fff_0000, load_address: Addr::from(0usize) };
        let loc = evaluate_location(expr, encoding(), None, &ctx).unwrap();
        assert_eq!(loc, ResolvedLocation::Register(6));
    }

    #[test]
    fn test_frame_relative_location() {
        // DW_OP_fbreg -16, with a frame base of DW_OP_breg6 +0; the frame
        // pointer is a runtime value, so the result already is one too
        let expr = expression(&[0x91, 0x70]);
        let frame_base = expression(&[0x76, 0x00]);
        let ctx = FixedContext { rbp: 0x8000, load_address: Addr::from(0x5000usize) };
        let loc = evaluate_location(expr, encoding(), Some(&frame_base), &ctx).unwrap();
        assert_eq!(loc, ResolvedLocation::Address(Addr::from(0x8000usize - 16)));
    }

    #[test]
    fn test_static_address_is_relocated() {
        // DW_OP_addr 0x1000 lands in runtime space
        let expr = expression(&[0x03, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let ctx = FixedContext { rbp: 0x8000, load_address: Addr::from(0x5000usize) };
        let loc = evaluate_location(expr, encoding(), None, &ctx).unwrap();
        assert_eq!(loc, ResolvedLocation::Address(Addr::from(0x6000usize)));
    }

    #[test]
    fn test_fbreg_without_frame_base_fails() {
        let expr = expression(&[0x91, 0x70]);
        let ctx = FixedContext { rbp: 0x8000, load_address: Addr::from(0usize) };
        assert!(matches!(
            evaluate_location(expr, encoding(), None, &ctx),
            Err(DebuggerError::NoFrameBase)
        ));
    }
}
