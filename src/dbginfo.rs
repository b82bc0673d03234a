//! # Debug-Info Handle
//!
//! Owns everything parsed out of the debuggee's ELF image: the DWARF tree,
//! an owned symbol tree built from it, and the ELF symbol tables. Read-only
//! after construction; every address stored in or returned from here is
//! file-relative. The load address of the running image is applied by the
//! tracee controller, not in this module.

use std::fmt::Display;
use std::path::Path;
use std::rc::Rc;

use gimli::{
    DW_AT_frame_base, DW_AT_high_pc, DW_AT_location, DW_AT_low_pc, DW_AT_name, Attribute, DwTag,
    Unit,
};
use nix::unistd::Pid;
use object::{Object, ObjectSection, ObjectSymbol};
use tracing::{debug, trace};

use crate::dwarf_parse::{self, GimliReader};
use crate::errors::{DebuggerError, Result};
use crate::Addr;

/// What kind of DWARF entry an [`OwnedSymbol`] was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    CompileUnit,
    Function,
    Variable,
    Parameter,
    Block,
}

impl TryFrom<DwTag> for SymbolKind {
    type Error = DebuggerError;

    fn try_from(value: DwTag) -> Result<Self> {
        Ok(match value {
            gimli::DW_TAG_compile_unit => SymbolKind::CompileUnit,
            gimli::DW_TAG_subprogram => SymbolKind::Function,
            gimli::DW_TAG_variable => SymbolKind::Variable,
            gimli::DW_TAG_formal_parameter => SymbolKind::Parameter,
            gimli::DW_TAG_lexical_block => SymbolKind::Block,
            other => return Err(DebuggerError::DwTagNotImplemented(other)),
        })
    }
}

/// An owned node of the DWARF tree: enough of a DIE to resolve functions,
/// line ranges and variable locations without holding borrows into the
/// parser.
#[derive(Debug, Clone)]
pub struct OwnedSymbol {
    offset: usize,
    kind: SymbolKind,
    name: Option<String>,
    low_addr: Option<Addr>,
    high_addr: Option<Addr>,
    location: Option<Attribute<GimliReader>>,
    frame_base: Option<Attribute<GimliReader>>,
    encoding: gimli::Encoding,
    children: Vec<OwnedSymbol>,
}

impl OwnedSymbol {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    /// Low pc, file-relative
    pub fn low_addr(&self) -> Option<Addr> {
        self.low_addr
    }

    /// One past the last pc, file-relative
    pub fn high_addr(&self) -> Option<Addr> {
        self.high_addr
    }

    pub fn location(&self) -> Option<&Attribute<GimliReader>> {
        self.location.as_ref()
    }

    pub fn frame_base(&self) -> Option<&Attribute<GimliReader>> {
        self.frame_base.as_ref()
    }

    pub fn encoding(&self) -> gimli::Encoding {
        self.encoding
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn children(&self) -> &[OwnedSymbol] {
        &self.children
    }

    /// Whether the symbol's pc range contains the given file-relative
    /// address. Symbols without a range contain nothing.
    pub fn contains(&self, addr: Addr) -> bool {
        self.low_addr.is_some_and(|low| low <= addr)
            && self.high_addr.is_some_and(|high| addr < high)
    }
}

/// Collects all symbols in the forest (roots and descendants) for which
/// the filter returns true.
pub fn search_through_symbols<F>(symbols: &[OwnedSymbol], filter: F) -> Vec<OwnedSymbol>
where
    F: Fn(&OwnedSymbol) -> bool,
{
    fn walk<F: Fn(&OwnedSymbol) -> bool>(
        symbols: &[OwnedSymbol],
        filter: &F,
        found: &mut Vec<OwnedSymbol>,
    ) {
        for sym in symbols {
            if filter(sym) {
                found.push(sym.clone());
            }
            walk(sym.children(), filter, found);
        }
    }

    let mut found = Vec::new();
    walk(symbols, &filter, &mut found);
    found
}

/// The ELF symbol kinds the `symbol` command reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfSymbolKind {
    NoType,
    Object,
    Function,
    Section,
    File,
}

impl Display for ElfSymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ElfSymbolKind::NoType => "notype",
            ElfSymbolKind::Object => "object",
            ElfSymbolKind::Function => "function",
            ElfSymbolKind::Section => "section",
            ElfSymbolKind::File => "file",
        };
        write!(f, "{s}")
    }
}

impl From<object::SymbolKind> for ElfSymbolKind {
    fn from(value: object::SymbolKind) -> Self {
        match value {
            object::SymbolKind::Text => ElfSymbolKind::Function,
            object::SymbolKind::Data => ElfSymbolKind::Object,
            object::SymbolKind::Section => ElfSymbolKind::Section,
            object::SymbolKind::File => ElfSymbolKind::File,
            _ => ElfSymbolKind::NoType,
        }
    }
}

/// One entry of `.symtab` or `.dynsym`
#[derive(Debug, Clone)]
pub struct ElfSymbol {
    pub kind: ElfSymbolKind,
    pub name: String,
    pub value: u64,
}

/// The parsed debug information of one executable
pub struct DebugInfo {
    pub(crate) dwarf: gimli::Dwarf<GimliReader>,
    elf_symbols: Vec<ElfSymbol>,
    pie: bool,
    symbols: Vec<OwnedSymbol>,
}

impl DebugInfo {
    /// Reads and parses the executable at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not a valid ELF, or its DWARF
    /// sections cannot be loaded.
    pub fn build(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let object_info = object::File::parse(&*raw)?;

        let loader = |section: gimli::SectionId| -> std::result::Result<GimliReader, gimli::Error> {
            let data = object_info
                .section_by_name(section.name())
                .map(|s| s.uncompressed_data().unwrap_or_default())
                .unwrap_or_default();
            Ok(GimliReader::new(Rc::from(data.as_ref()), gimli::NativeEndian))
        };
        let dwarf = gimli::Dwarf::load(loader)?;

        let mut elf_symbols = Vec::new();
        for sym in object_info.symbols().chain(object_info.dynamic_symbols()) {
            // a garbled name must not sink the whole symbol table
            elf_symbols.push(ElfSymbol {
                kind: sym.kind().into(),
                name: sym.name().unwrap_or_default().to_string(),
                value: sym.address(),
            });
        }

        let pie = object_info.kind() == object::ObjectKind::Dynamic;
        trace!("executable is {}", if pie { "PIE" } else { "fixed-load" });

        let mut symbols = Vec::new();
        let mut iter = dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = dwarf.unit(header)?;
            let mut tree = unit.entries_tree(None)?;
            symbols.push(Self::process_tree(&dwarf, &unit, tree.root()?)?);
        }

        Ok(Self {
            dwarf,
            elf_symbols,
            pie,
            symbols,
        })
    }

    fn entry_from_gimli(
        dwarf: &gimli::Dwarf<GimliReader>,
        unit: &Unit<GimliReader>,
        entry: &gimli::DebuggingInformationEntry<'_, '_, GimliReader>,
    ) -> Result<OwnedSymbol> {
        let kind = SymbolKind::try_from(entry.tag())?;
        let name = dwarf_parse::parse_string(dwarf, unit, entry.attr(DW_AT_name)?)?;
        let low = dwarf_parse::parse_addr(dwarf, unit, entry.attr(DW_AT_low_pc)?)?;
        let high = dwarf_parse::parse_high_addr(dwarf, unit, entry.attr(DW_AT_high_pc)?, low)?;

        Ok(OwnedSymbol {
            offset: entry.offset().0,
            kind,
            name,
            low_addr: low,
            high_addr: high,
            location: entry.attr(DW_AT_location)?,
            frame_base: entry.attr(DW_AT_frame_base)?,
            encoding: unit.encoding(),
            children: Vec::new(),
        })
    }

    fn process_tree(
        dwarf: &gimli::Dwarf<GimliReader>,
        unit: &Unit<GimliReader>,
        node: gimli::EntriesTreeNode<'_, '_, '_, GimliReader>,
    ) -> Result<OwnedSymbol> {
        let mut parent = Self::entry_from_gimli(dwarf, unit, node.entry())?;

        let mut children = Vec::new();
        let mut children_tree = node.children();
        while let Some(child) = children_tree.next()? {
            // entries with tags we don't model (types and the like) are
            // skipped together with their subtree
            match Self::process_tree(dwarf, unit, child) {
                Ok(s) => children.push(s),
                Err(e) => {
                    debug!("skipping a debug symbol subtree: {e}");
                    continue;
                }
            }
        }

        parent.children = children;
        Ok(parent)
    }

    /// All symbols matching a filter, over every compilation unit.
    pub fn symbols_query<F>(&self, filter: F) -> Vec<OwnedSymbol>
    where
        F: Fn(&OwnedSymbol) -> bool,
    {
        search_through_symbols(&self.symbols, filter)
    }

    /// The function whose pc range contains the given file-relative
    /// address.
    ///
    /// # Errors
    ///
    /// Fails with [`DebuggerError::NoFunctionAtPc`] if no subprogram with a
    /// low-pc attribute covers the address.
    pub fn function_at(&self, pc: Addr) -> Result<OwnedSymbol> {
        self.symbols_query(|s| s.kind() == SymbolKind::Function && s.contains(pc))
            .into_iter()
            .next()
            .ok_or(DebuggerError::NoFunctionAtPc(pc))
    }

    /// Every function DIE carrying the given name, across all compilation
    /// units.
    pub fn functions_by_name(&self, name: &str) -> Vec<OwnedSymbol> {
        self.symbols_query(|s| s.kind() == SymbolKind::Function && s.name() == Some(name))
    }

    /// ELF symbol table entries matching `name`, or every entry for
    /// `"*"`. Both `.symtab` and `.dynsym` are searched.
    pub fn lookup_symbol(&self, name: &str) -> Vec<ElfSymbol> {
        self.elf_symbols
            .iter()
            .filter(|s| name == "*" || s.name == name)
            .cloned()
            .collect()
    }

    /// Whether the executable is position independent.
    pub fn is_pie(&self) -> bool {
        self.pie
    }

    /// The base address the running image is mapped at: the start of the
    /// process's first mapping for a PIE, zero otherwise.
    ///
    /// # Errors
    ///
    /// Fails if the process's memory map cannot be read.
    pub fn load_address(&self, pid: Pid) -> Result<Addr> {
        if !self.pie {
            return Ok(Addr::from(0usize));
        }
        let maps = proc_maps::get_process_maps(pid.into())?;
        maps.first()
            .map(|m| Addr::from(m.start()))
            .ok_or_else(|| DebuggerError::Launch("process has no memory mappings".to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_symbol_kind_from_tag() {
        assert_eq!(
            SymbolKind::try_from(gimli::DW_TAG_subprogram).unwrap(),
            SymbolKind::Function
        );
        assert_eq!(
            SymbolKind::try_from(gimli::DW_TAG_formal_parameter).unwrap(),
            SymbolKind::Parameter
        );
        assert!(SymbolKind::try_from(gimli::DW_TAG_base_type).is_err());
    }

    #[test]
    fn test_elf_symbol_kind_display() {
        assert_eq!(ElfSymbolKind::from(object::SymbolKind::Text).to_string(), "function");
        assert_eq!(ElfSymbolKind::from(object::SymbolKind::Data).to_string(), "object");
        assert_eq!(ElfSymbolKind::from(object::SymbolKind::Unknown).to_string(), "notype");
    }
}
