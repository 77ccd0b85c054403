//! External-tool driver: builds the platform archiver's response file and
//! invokes it, plus the COFF-host toolchain/console-encoding probes it
//! needs along the way.
//!
//! On COFF hosts the final concatenation is delegated to `lib.exe` via a
//! response file (found by scanning `VS<N>COMNTOOLS` environment
//! variables); on Unix hosts it's delegated to `libtool -filelist`.

use std::io::{BufRead, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use crate::error::{PrelibError, Result};

/// Invokes `lib.exe` (or equivalent) against a `/OUT:` + quoted-filename
/// response file.
pub fn link_coff(
    lib_exe: &Path,
    objects: &[PathBuf],
    output: &Path,
    extra_lib_flags: &str,
    work_dir: &Path,
) -> Result<()> {
    let response_path = work_dir.join("prelib.rsp");
    let mut response = String::new();
    if !extra_lib_flags.is_empty() {
        response.push_str(extra_lib_flags);
        response.push('\n');
    }
    for obj in objects {
        response.push('"');
        response.push_str(&obj.to_string_lossy());
        response.push_str("\"\n");
    }
    response.push_str(&format!("/OUT:\"{}\"\n", output.to_string_lossy()));
    std::fs::write(&response_path, response)?;

    run_and_stream(
        Command::new(lib_exe)
            .arg(format!("@{}", response_path.display()))
            .current_dir(work_dir),
    )
}

/// Invokes `libtool -static -arch_only <arch> -filelist <list> -o <out>`.
pub fn link_unix(objects: &[PathBuf], output: &Path, arch: &str, work_dir: &Path) -> Result<()> {
    let filelist_path = work_dir.join("prelib.filelist");
    let mut filelist = String::new();
    for obj in objects {
        filelist.push_str(&obj.to_string_lossy());
        filelist.push('\n');
    }
    std::fs::write(&filelist_path, filelist)?;

    run_and_stream(
        Command::new("libtool")
            .args(["-static", "-arch_only", arch, "-filelist"])
            .arg(&filelist_path)
            .arg("-o")
            .arg(output)
            .current_dir(work_dir),
    )
}

/// Runs `cmd`, relaying its stdout to our own stdout line by line as it
/// arrives (decoded through the console's code page) rather than buffering
/// the whole thing until the child exits.
fn run_and_stream(cmd: &mut Command) -> Result<()> {
    let command_line = format!("{cmd:?}");
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(PrelibError::Io)?;

    let child_stdout = child.stdout.take().expect("stdout was piped");
    let mut reader = std::io::BufReader::new(child_stdout);
    let mut stdout = std::io::stdout();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).map_err(PrelibError::Io)?;
        if n == 0 {
            break;
        }
        stdout.write_all(decode_console_output(&line).as_bytes()).ok();
        stdout.flush().ok();
    }

    let status = child.wait().map_err(PrelibError::Io)?;
    if !status.success() {
        return Err(PrelibError::ToolFailure {
            command: command_line,
            status: status.to_string(),
        });
    }
    Ok(())
}

/// Scans `VS<N>COMNTOOLS` environment variables for the largest `N`,
/// deriving `lib.exe`'s path as `<value>../../../VC/bin/lib.exe`.
pub fn find_coff_archiver() -> Result<PathBuf> {
    let mut best: Option<(u32, String)> = None;
    for (key, value) in std::env::vars() {
        let Some(rest) = key.strip_prefix("VS") else {
            continue;
        };
        let Some(n_str) = rest.strip_suffix("COMNTOOLS") else {
            continue;
        };
        let Ok(n) = n_str.parse::<u32>() else {
            continue;
        };
        if best.as_ref().map(|(b, _)| n > *b).unwrap_or(true) {
            best = Some((n, value));
        }
    }

    let (_, comntools) = best.ok_or(PrelibError::NoToolchain)?;
    let candidate = Path::new(&comntools).join("../../../VC/bin/lib.exe");
    if !candidate.exists() {
        return Err(PrelibError::NoToolchain);
    }
    Ok(candidate)
}

/// Code pages recognized for subprocess console output, mapped to the
/// `encoding_rs` encoding that decodes them.
///
/// Code page 52936 is properly HZ-GB2312, a distinct 7-bit `~{`/`~}`
/// shift-escape encoding that `encoding_rs` has no decoder for (it only
/// implements the WHATWG encoding set). It is mapped to GBK here, the same
/// as code page 936, which is a known fidelity gap rather than a correct
/// decode: HZ-GB2312 output will come through garbled. Left unaddressed
/// until a crate with an HZ-GB2312 decoder is pulled in.
fn encoding_for_code_page(code_page: u32) -> Option<&'static encoding_rs::Encoding> {
    match code_page {
        932 => Some(encoding_rs::SHIFT_JIS),
        20932 => Some(encoding_rs::EUC_JP),
        50220 | 50221 | 50222 => Some(encoding_rs::ISO_2022_JP),
        949 => Some(encoding_rs::EUC_KR),
        54936 => Some(encoding_rs::GB18030),
        936 => Some(encoding_rs::GBK),
        52936 => Some(encoding_rs::GBK), // see doc comment: should be HZ-GB2312
        950 => Some(encoding_rs::BIG5),
        _ => None,
    }
}

fn probe_code_page() -> u32 {
    let Ok(output) = Command::new("chcp").output() else {
        return 0;
    };
    let text = String::from_utf8_lossy(&output.stdout);
    text.split_whitespace()
        .last()
        .and_then(|tok| tok.trim_end_matches('.').parse().ok())
        .unwrap_or(0)
}

fn console_encoding() -> &'static encoding_rs::Encoding {
    static CODE_PAGE: OnceLock<&'static encoding_rs::Encoding> = OnceLock::new();
    CODE_PAGE.get_or_init(|| {
        let code_page = probe_code_page();
        encoding_for_code_page(code_page).unwrap_or(encoding_rs::UTF_8)
    })
}

fn decode_console_output(bytes: &[u8]) -> String {
    let (text, _, _) = console_encoding().decode(bytes);
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_all_documented_code_pages() {
        for cp in [932, 20932, 50220, 50221, 50222, 949, 54936, 936, 52936, 950] {
            assert!(encoding_for_code_page(cp).is_some(), "code page {cp} should map");
        }
    }

    #[test]
    fn unrecognized_code_page_falls_back_to_utf8() {
        assert!(encoding_for_code_page(65001).is_none());
    }

    #[test]
    fn decode_console_output_is_valid_utf8_for_ascii_bytes() {
        assert_eq!(decode_console_output(b"hello"), "hello");
    }
}
