#![allow(dead_code)]

use object::write::{self, Object};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

/// Builds a minimal COFF object with one exported (defined) symbol and one
/// imported (undefined) symbol.
pub fn build_coff_object(export_name: &[u8], import_name: &[u8]) -> Vec<u8> {
    let mut object = Object::new(BinaryFormat::Coff, Architecture::X86_64, Endianness::Little);
    object.add_file_symbol(b"file.c".to_vec());

    let text = object.section_id(write::StandardSection::Text);
    let offset = object.append_section_data(text, &[0x90; 16], 4);
    object.add_symbol(write::Symbol {
        name: export_name.to_vec(),
        value: offset,
        size: 16,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: write::SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });

    object.add_symbol(write::Symbol {
        name: import_name.to_vec(),
        value: 0,
        size: 0,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: write::SymbolSection::Undefined,
        flags: SymbolFlags::None,
    });

    object.write().unwrap()
}

fn pad_field(value: &str, width: usize) -> String {
    format!("{value:<width$}")
}

fn write_member_header(out: &mut Vec<u8>, name: &str, size: usize) {
    out.extend_from_slice(pad_field(name, 16).as_bytes());
    out.extend_from_slice(pad_field("0", 12).as_bytes()); // date
    out.extend_from_slice(pad_field("0", 6).as_bytes()); // uid
    out.extend_from_slice(pad_field("0", 6).as_bytes()); // gid
    out.extend_from_slice(pad_field("0", 8).as_bytes()); // mode
    out.extend_from_slice(pad_field(&size.to_string(), 10).as_bytes());
    out.extend_from_slice(b"`\n");
}

fn pad_even(out: &mut Vec<u8>) {
    if out.len() % 2 == 1 {
        out.push(b'\n');
    }
}

/// Hand-assembles a minimal COFF archive (magic, empty first linker
/// member, second linker member with a real member-offset table, no
/// long-name member) wrapping `members` in order. This is the write-side
/// mirror of `src/archive/coff.rs`'s reader, used to validate that reader
/// end-to-end against archives this crate fully controls.
pub fn build_coff_archive(members: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"!<arch>\n");

    write_member_header(&mut out, "/", 4);
    out.extend_from_slice(&0u32.to_be_bytes());
    pad_even(&mut out);

    let num_members = members.len() as u32;
    let mut second_payload = Vec::new();
    second_payload.extend_from_slice(&num_members.to_le_bytes());
    let offsets_patch_at = second_payload.len();
    second_payload.extend(std::iter::repeat(0u8).take(4 * members.len()));
    second_payload.extend_from_slice(&0u32.to_le_bytes()); // NumberOfSymbols

    write_member_header(&mut out, "/", second_payload.len());
    let second_payload_pos = out.len();
    out.extend_from_slice(&second_payload);
    pad_even(&mut out);

    let mut offsets = Vec::with_capacity(members.len());
    for member in members {
        let header_pos = out.len() as u32;
        offsets.push(header_pos);
        write_member_header(&mut out, "member.o", member.len());
        out.extend_from_slice(member);
        pad_even(&mut out);
    }

    for (i, offset) in offsets.iter().enumerate() {
        let at = second_payload_pos + offsets_patch_at + i * 4;
        out[at..at + 4].copy_from_slice(&offset.to_le_bytes());
    }

    out
}
