//! `.drectve` linker-directive section rewriting.
//!
//! A COFF object's `.drectve` section carries `-defaultlib:"NAME"`
//! directives the linker would otherwise honor; this strips the ones this
//! archive already supplies so the final link doesn't go looking for
//! `NAME.lib` on its own.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::OnceLock;

use object::{Object, ObjectSection};
use regex::bytes::Regex;

use crate::archive::lib_basename;
use crate::error::{PrelibError, Result};

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"-defaultlib:"([^"]*)""#).unwrap())
}

/// Rewrites `.drectve` in place, blanking `-defaultlib:"NAME"` directives
/// whose `NAME` (lowercased, extension stripped) appears in
/// `input_lib_names`, and returns the names it left untouched.
///
/// When `input_lib_names` is empty, every directive is blanked rather than
/// none — an intentionally inverted guard (`!remove && !input_lib_names.is_empty()`)
/// kept as-is rather than "fixed", since downstream behavior depends on it.
pub fn rewrite(object_path: &Path, input_lib_names: &[String]) -> Result<Vec<String>> {
    let bytes = std::fs::read(object_path)?;
    let file = match object::File::parse(&*bytes) {
        Ok(f) => f,
        Err(_) => return Ok(Vec::new()),
    };

    let Some(section) = file.section_by_name(".drectve") else {
        return Ok(Vec::new());
    };
    let Some((offset, size)) = section.file_range() else {
        return Ok(Vec::new());
    };
    let data = section
        .data()
        .map_err(|_| PrelibError::BadDirective {
            path: object_path.to_path_buf(),
            expected_len: size as usize,
            actual_len: 0,
        })?
        .to_vec();

    let mut kept = Vec::new();
    let rewritten = rewrite_directives(&data, input_lib_names, &mut kept);

    if rewritten.len() != size as usize {
        return Err(PrelibError::BadDirective {
            path: object_path.to_path_buf(),
            expected_len: size as usize,
            actual_len: rewritten.len(),
        });
    }

    let mut f = OpenOptions::new().write(true).open(object_path)?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(&rewritten)?;

    Ok(kept)
}

/// Pure byte-rewrite step, split out from `rewrite` so it can be exercised
/// directly against a raw `.drectve` payload without needing a real object
/// file on disk.
fn rewrite_directives(data: &[u8], input_lib_names: &[String], kept: &mut Vec<String>) -> Vec<u8> {
    let re = directive_re();
    let mut out = Vec::with_capacity(data.len());
    let mut last = 0;

    for caps in re.captures_iter(data) {
        let whole = caps.get(0).unwrap();
        out.extend_from_slice(&data[last..whole.start()]);
        last = whole.end();

        let raw_name = caps.get(1).map(|c| c.as_bytes()).unwrap_or(b"");
        let raw_name = String::from_utf8_lossy(raw_name);
        let name = lib_basename(Path::new(raw_name.as_ref()));

        let remove = input_lib_names.iter().any(|n| n == &name);
        if !remove && !input_lib_names.is_empty() {
            kept.push(name);
            out.extend_from_slice(whole.as_bytes());
        } else {
            out.extend(std::iter::repeat(b' ').take(whole.as_bytes().len()));
        }
    }
    out.extend_from_slice(&data[last..]);
    out
}
