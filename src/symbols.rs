//! ELF symbol resolution for named checkpoints
//!
//! The native injection strategy needs the runtime address of the
//! checkpoint symbol to plant a breakpoint. Link-time addresses come from
//! the symbol table; position-independent executables are rebased against
//! the live process's mappings.

use anyhow::{Context, Result};
use nix::unistd::Pid;
use object::{Object, ObjectSymbol};
use std::fs::File;
use std::path::Path;

/// Link-time address of a symbol plus whether it must be rebased at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolInfo {
    pub address: u64,
    /// True for ET_DYN (position-independent) binaries.
    pub needs_rebase: bool,
}

/// Look up a function symbol in the target binary's symbol tables.
///
/// The target must be built with symbols sufficient to resolve the
/// checkpoint; a miss here is a configuration error, not a fault outcome.
pub fn resolve_symbol(binary: &Path, name: &str) -> Result<SymbolInfo> {
    if !binary.exists() {
        anyhow::bail!("binary does not exist: {}", binary.display());
    }

    let file = File::open(binary)
        .with_context(|| format!("failed to open binary: {}", binary.display()))?;
    let mmap = unsafe { memmap2::Mmap::map(&file) }.context("failed to memory-map binary")?;
    let obj = object::File::parse(&*mmap)
        .with_context(|| format!("failed to parse ELF binary: {}", binary.display()))?;

    let needs_rebase = obj.kind() == object::ObjectKind::Dynamic;

    let found = obj
        .symbols()
        .chain(obj.dynamic_symbols())
        .find(|sym| sym.name().map(|n| n == name).unwrap_or(false));

    match found {
        Some(sym) => Ok(SymbolInfo {
            address: sym.address(),
            needs_rebase,
        }),
        None => anyhow::bail!(
            "checkpoint symbol `{}` not found in {} - compile the target with symbols",
            name,
            binary.display()
        ),
    }
}

/// Runtime load base of `binary` inside a live (stopped) process, from
/// `/proc/<pid>/maps`.
pub fn load_base(pid: Pid, binary: &Path) -> Result<u64> {
    let maps_path = format!("/proc/{}/maps", pid);
    let maps = std::fs::read_to_string(&maps_path)
        .with_context(|| format!("failed to read {}", maps_path))?;

    let canonical = binary
        .canonicalize()
        .unwrap_or_else(|_| binary.to_path_buf());
    let needle = canonical.to_string_lossy();

    for line in maps.lines() {
        if !line.ends_with(needle.as_ref()) {
            continue;
        }
        let mut fields = line.split_whitespace();
        let range = fields.next().unwrap_or("");
        let _perms = fields.next();
        let offset = fields.next().unwrap_or("0");

        let start_text = range.split('-').next().unwrap_or("");
        let start = u64::from_str_radix(start_text, 16)
            .with_context(|| format!("malformed maps line: {line}"))?;
        let file_offset = u64::from_str_radix(offset, 16)
            .with_context(|| format!("malformed maps line: {line}"))?;

        // Lowest mapping of the file, minus its file offset, is the base.
        return Ok(start - file_offset);
    }

    anyhow::bail!("{} is not mapped in process {}", binary.display(), pid)
}
