//! Unix archive reader, driven through the `ar` and `nm` command-line
//! tools rather than parsing the archive format directly.
//!
//! A fat (universal) binary is first thinned to a single architecture
//! with `libtool -static -arch_only`, its members are extracted to a
//! scratch directory with `ar -x`, and its symbol table is read by
//! parsing `nm -arch <arch>` text output against the original (not
//! thinned) archive path.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use tempfile::TempDir;

use crate::archive::{classify_and_filter, ArchiveReader};
use crate::error::{PrelibError, Result};
use crate::symbol::{Symbol, SymbolKind};

fn member_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^.*\((.*)\):$").unwrap())
}

fn symbol_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9A-Za-z]+)?\s+(T|U|S|D|t|s|d)\s+(.*)$").unwrap())
}

/// Classifies one `nm` type letter. `U` (undefined) is the textbook import
/// code; `t`, `s`, `d` (lowercase local text/data/bss symbols) are folded
/// into IMPORT too, even though lowercase normally means local definition
/// rather than an unresolved reference. Kept intentionally rather than
/// "fixed" to match observed behavior; a correctness question worth
/// revisiting, not a deliberate design choice.
fn classify_nm_code(code: &str) -> SymbolKind {
    match code {
        "U" | "t" | "s" | "d" => SymbolKind::Import,
        _ => SymbolKind::Export,
    }
}

struct UnixMemberRecord {
    name: String,
    exports: Vec<Symbol>,
    imports: Vec<Symbol>,
}

/// Reads a Unix `ar` archive (optionally a fat/universal `libtool` archive)
/// by shelling out to `libtool`, `ar` and `nm`.
pub struct UnixArchive {
    extracted_dir: TempDir,
    members: Vec<UnixMemberRecord>,
}

impl UnixArchive {
    pub fn open(path: &Path, arch: &str) -> Result<Self> {
        let extracted_dir = TempDir::new()?;
        let thin_file = tempfile::NamedTempFile::new()?;
        let thin_path = thin_file.path().to_path_buf();

        run_tool(
            Command::new("libtool")
                .args(["-static", "-arch_only", arch])
                .arg(path)
                .args(["-o"])
                .arg(&thin_path),
        )?;

        run_tool(Command::new("ar").arg("-x").arg(&thin_path).current_dir(extracted_dir.path()))?;

        let nm_output = run_tool_capture(Command::new("nm").args(["-arch", arch]).arg(path))?;
        let members = parse_nm_output(&nm_output);

        Ok(UnixArchive {
            extracted_dir,
            members,
        })
    }
}

fn run_tool(cmd: &mut Command) -> Result<()> {
    let status = cmd.status().map_err(PrelibError::Io)?;
    if !status.success() {
        return Err(PrelibError::ToolFailure {
            command: format!("{cmd:?}"),
            status: status.to_string(),
        });
    }
    Ok(())
}

fn run_tool_capture(cmd: &mut Command) -> Result<String> {
    let output = cmd.output().map_err(PrelibError::Io)?;
    if !output.status.success() {
        return Err(PrelibError::ToolFailure {
            command: format!("{cmd:?}"),
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_nm_output(text: &str) -> Vec<UnixMemberRecord> {
    let header_re = member_header_re();
    let symbol_re = symbol_line_re();

    let mut members = Vec::new();
    let mut current_name: Option<String> = None;
    let mut current_raw: Vec<Symbol> = Vec::new();

    let flush = |name: Option<String>, raw: Vec<Symbol>, out: &mut Vec<UnixMemberRecord>| {
        if let Some(name) = name {
            let (exports, imports) = classify_and_filter(raw);
            out.push(UnixMemberRecord {
                name,
                exports,
                imports,
            });
        }
    };

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = header_re.captures(line) {
            let new_name = caps.get(1).map(|m| m.as_str().to_string());
            flush(current_name.take(), std::mem::take(&mut current_raw), &mut members);
            current_name = new_name;
            continue;
        }
        if current_name.is_none() {
            continue;
        }
        if let Some(caps) = symbol_re.captures(line) {
            let code = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let name = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            if name.is_empty() {
                continue;
            }
            current_raw.push(Symbol::new(name.to_string(), classify_nm_code(code)));
        }
    }
    flush(current_name.take(), current_raw, &mut members);

    members
}

impl ArchiveReader for UnixArchive {
    fn num_members(&self) -> usize {
        self.members.len()
    }

    fn extract(&self, index: usize, sink: &mut dyn Write) -> Result<()> {
        let name = &self.members[index].name;
        let src_path: PathBuf = self.extracted_dir.path().join(name);
        let mut src = std::fs::File::open(&src_path)?;
        let mut buf = Vec::new();
        src.read_to_end(&mut buf)?;
        sink.write_all(&buf)?;
        Ok(())
    }

    fn export_symbols(&self, index: usize) -> &[Symbol] {
        &self.members[index].exports
    }

    fn import_symbols(&self, index: usize) -> &[Symbol] {
        &self.members[index].imports
    }

    fn member_name(&self, index: usize) -> &str {
        &self.members[index].name
    }
}
