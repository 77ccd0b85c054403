//! Platform polymorphism for the two archive container formats this crate
//! reads, behind a single capability trait.

pub mod coff;
pub mod unix;

use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::symbol::Symbol;

/// Shared contract for the COFF and Unix archive readers.
///
/// The resolver (`src/resolver.rs`) is written entirely against this trait
/// and never needs to know which concrete format backs a given archive.
/// `Sync` lets the seed phase share a `&dyn ArchiveReader` across the
/// worker threads it spawns for concurrent member extraction.
pub trait ArchiveReader: Sync {
    fn num_members(&self) -> usize;

    /// Copies the raw content bytes of member `index` into `sink`.
    fn extract(&self, index: usize, sink: &mut dyn Write) -> Result<()>;

    fn export_symbols(&self, index: usize) -> &[Symbol];

    fn import_symbols(&self, index: usize) -> &[Symbol];

    fn member_name(&self, index: usize) -> &str;
}

/// Splits a member's raw symbol table into (exports, imports), applying the
/// intra-member self-resolution filter shared by both archive variants: an
/// import is suppressed if some symbol in the *same* member already
/// exports that name.
pub(crate) fn classify_and_filter(mut raw: Vec<Symbol>) -> (Vec<Symbol>, Vec<Symbol>) {
    let exports: Vec<Symbol> = raw.iter().filter(|s| s.is_export()).cloned().collect();
    raw.retain(|s| s.is_import());
    let imports: Vec<Symbol> = raw
        .into_iter()
        .filter(|s| !exports.iter().any(|e| e.name() == s.name()))
        .collect();
    (exports, imports)
}

/// Lowercased, extension-stripped basename, used to build the set of input
/// library names the directive rewriter matches against and to name
/// extracted objects.
pub fn lib_basename(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    stem.to_lowercase()
}
