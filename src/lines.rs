//! Line-table lookups: pc to source line, file:line to pc, and the row
//! walk the source-level stepping algorithms are built on.
//!
//! Like the rest of the debug-info resolver, everything here speaks
//! file-relative addresses.

use std::path::PathBuf;

use gimli::{LineProgramHeader, LineRow, Reader, Unit};

use crate::dbginfo::DebugInfo;
use crate::dwarf_parse::GimliReader;
use crate::errors::{DebuggerError, Result};
use crate::Addr;

/// One row of a DWARF line program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
    pub file: PathBuf,
    pub line: u64,
    /// File-relative address of the first instruction of the row
    pub address: Addr,
    /// Whether the row is a recommended breakpoint location
    pub is_stmt: bool,
}

impl DebugInfo {
    /// The line entry covering a file-relative pc: the row with the
    /// greatest address not past pc, within the row's sequence.
    ///
    /// # Errors
    ///
    /// Fails with [`DebuggerError::NoLineAtPc`] if no sequence of any
    /// compilation unit covers the address.
    pub fn line_at(&self, pc: Addr) -> Result<LineEntry> {
        let mut units = self.dwarf.units();
        while let Some(header) = units.next()? {
            let unit = self.dwarf.unit(header)?;
            if !self.unit_contains(&unit, pc)? {
                continue;
            }
            let Some(program) = unit.line_program.clone() else {
                continue;
            };

            let mut best: Option<LineEntry> = None;
            let mut rows = program.rows();
            while let Some((header, row)) = rows.next_row()? {
                if row.end_sequence() {
                    // the sequence is over; keep its candidate only if the
                    // sequence actually covered pc
                    if let Some(entry) = best.take() {
                        if pc.u64() < row.address() {
                            return Ok(entry);
                        }
                    }
                    continue;
                }
                if row.address() <= pc.u64() {
                    best = Some(self.entry_from_row(&unit, header, row)?);
                } else if let Some(entry) = best.take() {
                    return Ok(entry);
                }
            }
        }

        Err(DebuggerError::NoLineAtPc(pc))
    }

    /// The address of the first statement row for `line` in a compilation
    /// unit whose name ends with `file_suffix`.
    ///
    /// # Errors
    ///
    /// Fails with [`DebuggerError::NoSuchLine`] if no matching unit has
    /// such a row.
    pub fn address_for_line(&self, file_suffix: &str, line: u64) -> Result<Addr> {
        let mut units = self.dwarf.units();
        while let Some(header) = units.next()? {
            let unit = self.dwarf.unit(header)?;
            let Some(name) = self.unit_name(&unit)? else {
                continue;
            };
            if !name.ends_with(file_suffix) {
                continue;
            }
            let Some(program) = unit.line_program.clone() else {
                continue;
            };

            let mut rows = program.rows();
            while let Some((_, row)) = rows.next_row()? {
                if row.end_sequence() || !row.is_stmt() {
                    continue;
                }
                if row.line().is_some_and(|l| l.get() == line) {
                    return Ok(Addr::from(row.address()));
                }
            }
        }

        Err(DebuggerError::NoSuchLine(file_suffix.to_string(), line))
    }

    /// All line entries with addresses in `[low, high)`, in line-program
    /// order. This is the walk `next` plants its temporary breakpoints
    /// along, and what prologue skipping looks at.
    ///
    /// # Errors
    ///
    /// Fails if the line programs cannot be parsed.
    pub fn line_entries_in_range(&self, low: Addr, high: Addr) -> Result<Vec<LineEntry>> {
        let mut entries = Vec::new();

        let mut units = self.dwarf.units();
        while let Some(header) = units.next()? {
            let unit = self.dwarf.unit(header)?;
            if !self.unit_contains(&unit, low)? {
                continue;
            }
            let Some(program) = unit.line_program.clone() else {
                continue;
            };

            let mut rows = program.rows();
            while let Some((header, row)) = rows.next_row()? {
                if row.end_sequence() {
                    continue;
                }
                let addr = Addr::from(row.address());
                if low <= addr && addr < high {
                    entries.push(self.entry_from_row(&unit, header, row)?);
                }
            }
        }

        Ok(entries)
    }

    fn entry_from_row(
        &self,
        unit: &Unit<GimliReader>,
        header: &LineProgramHeader<GimliReader>,
        row: &LineRow,
    ) -> Result<LineEntry> {
        let mut path = PathBuf::new();
        if let Some(ref comp_dir) = unit.comp_dir {
            path.push(comp_dir.to_string_lossy()?.as_ref());
        }
        if let Some(file) = row.file(header) {
            if file.directory_index() != 0 {
                if let Some(dir) = file.directory(header) {
                    path.push(self.dwarf.attr_string(unit, dir)?.to_string_lossy()?.as_ref());
                }
            }
            path.push(
                self.dwarf
                    .attr_string(unit, file.path_name())?
                    .to_string_lossy()?
                    .as_ref(),
            );
        }

        Ok(LineEntry {
            file: path,
            line: row.line().map_or(0, std::num::NonZeroU64::get),
            address: Addr::from(row.address()),
            is_stmt: row.is_stmt(),
        })
    }

    fn unit_contains(&self, unit: &Unit<GimliReader>, pc: Addr) -> Result<bool> {
        let mut ranges = self.dwarf.unit_ranges(unit)?;
        while let Some(range) = ranges.next()? {
            if range.begin <= pc.u64() && pc.u64() < range.end {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn unit_name(&self, unit: &Unit<GimliReader>) -> Result<Option<String>> {
        Ok(match unit.name {
            Some(ref name) => Some(name.to_string_lossy()?.to_string()),
            None => None,
        })
    }
}
