//! Export directory table (spec §4.5.1): address/name/ordinal tables plus
//! forwarder detection. Structurally mirrors `pe::imports`'s table-walk
//! style since no corpus export-table parser was close enough to ground
//! field-for-field.

use crate::error::Result;
use crate::pe::directories::rva_to_offset;
use crate::pe::section::SectionHeader;
use crate::stream::ByteStream;

#[derive(Debug, Clone)]
pub enum ExportTarget {
    Rva(u32),
    Forwarder(String),
}

#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub name: Option<String>,
    pub ordinal: u16,
    pub target: ExportTarget,
}

#[derive(Debug, Clone)]
pub struct ExportDirectory {
    pub name: String,
    pub ordinal_base: u32,
    pub entries: Vec<ExportEntry>,
}

struct Header {
    name_rva: u32,
    ordinal_base: u32,
    number_of_functions: u32,
    number_of_names: u32,
    address_of_functions: u32,
    address_of_names: u32,
    address_of_name_ordinals: u32,
}

fn decode_header(stream: &ByteStream, offset: usize) -> Result<Header> {
    Ok(Header {
        name_rva: stream.peek_u32(offset + 12)?,
        ordinal_base: stream.peek_u32(offset + 16)?,
        number_of_functions: stream.peek_u32(offset + 20)?,
        number_of_names: stream.peek_u32(offset + 24)?,
        address_of_functions: stream.peek_u32(offset + 28)?,
        address_of_names: stream.peek_u32(offset + 32)?,
        address_of_name_ordinals: stream.peek_u32(offset + 36)?,
    })
}

/// Decodes the export directory at `directory_rva`, bounded by
/// `(directory_rva, directory_size)` for forwarder detection (an address
/// table entry whose RVA falls inside that window is a forwarder string
/// instead of a function address).
pub fn parse_exports(
    stream: &ByteStream,
    sections: &[SectionHeader],
    directory_rva: u32,
    directory_size: u32,
) -> Result<ExportDirectory> {
    let offset = rva_to_offset(sections, directory_rva)? as usize;
    let header = decode_header(stream, offset)?;
    let dir_name = stream.peek_string_at(rva_to_offset(sections, header.name_rva)? as usize)?;

    let eat_offset = rva_to_offset(sections, header.address_of_functions)? as usize;
    let mut functions = Vec::with_capacity(header.number_of_functions as usize);
    for i in 0..header.number_of_functions as usize {
        let rva = stream.peek_u32(eat_offset + i * 4)?;
        functions.push(rva);
    }

    let names_offset = rva_to_offset(sections, header.address_of_names)? as usize;
    let ordinals_offset = rva_to_offset(sections, header.address_of_name_ordinals)? as usize;

    let mut entries = Vec::new();
    let mut named_ordinals = std::collections::HashSet::new();

    for i in 0..header.number_of_names as usize {
        let name_rva = stream.peek_u32(names_offset + i * 4)?;
        let name = stream.peek_string_at(rva_to_offset(sections, name_rva)? as usize)?;
        let name_ordinal = stream.peek_u16(ordinals_offset + i * 2)?;

        let Some(&rva) = functions.get(name_ordinal as usize) else {
            log::warn!("exports: out-of-range ordinal {name_ordinal} for name {name:?}");
            continue;
        };
        named_ordinals.insert(name_ordinal);

        let target = forwarder_or_rva(stream, sections, directory_rva, directory_size, rva)?;
        entries.push(ExportEntry {
            name: Some(name),
            ordinal: header.ordinal_base as u16 + name_ordinal,
            target,
        });
    }

    for (idx, &rva) in functions.iter().enumerate() {
        if rva == 0 || named_ordinals.contains(&(idx as u16)) {
            continue;
        }
        let target = forwarder_or_rva(stream, sections, directory_rva, directory_size, rva)?;
        entries.push(ExportEntry {
            name: None,
            ordinal: header.ordinal_base as u16 + idx as u16,
            target,
        });
    }

    Ok(ExportDirectory {
        name: dir_name,
        ordinal_base: header.ordinal_base,
        entries,
    })
}

/// An address-table entry whose RVA falls inside the export directory's own
/// window is a forwarder: its "address" is actually a NUL-terminated
/// `"DLL.Symbol"` string living in the same section.
fn forwarder_or_rva(
    stream: &ByteStream,
    sections: &[SectionHeader],
    directory_rva: u32,
    directory_size: u32,
    rva: u32,
) -> Result<ExportTarget> {
    if rva >= directory_rva && rva < directory_rva + directory_size {
        let offset = rva_to_offset(sections, rva)? as usize;
        return Ok(ExportTarget::Forwarder(stream.peek_string_at(offset)?));
    }
    Ok(ExportTarget::Rva(rva))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_section() -> SectionHeader {
        SectionHeader {
            name: ".edata".into(),
            virtual_size: 0x1000,
            virtual_address: 0,
            size_of_raw_data: 0x1000,
            pointer_to_raw_data: 0,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: Default::default(),
            semantic_kinds: Vec::new(),
        }
    }

    fn write_str(buf: &mut [u8], at: usize, s: &str) {
        buf[at..at + s.len()].copy_from_slice(s.as_bytes());
    }

    #[test]
    fn decodes_named_export_by_ordinal_index() {
        let mut buf = vec![0u8; 0x200];
        // header at 0
        write_str(&mut buf, 0x40, "mylib.dll\0");
        buf[12..16].copy_from_slice(&0x40u32.to_le_bytes()); // name_rva
        buf[16..20].copy_from_slice(&1u32.to_le_bytes()); // ordinal_base
        buf[20..24].copy_from_slice(&1u32.to_le_bytes()); // number_of_functions
        buf[24..28].copy_from_slice(&1u32.to_le_bytes()); // number_of_names
        buf[28..32].copy_from_slice(&0x80u32.to_le_bytes()); // address_of_functions
        buf[32..36].copy_from_slice(&0x90u32.to_le_bytes()); // address_of_names
        buf[36..40].copy_from_slice(&0xA0u32.to_le_bytes()); // address_of_name_ordinals

        buf[0x80..0x84].copy_from_slice(&0x1234u32.to_le_bytes()); // function[0]
        buf[0x90..0x94].copy_from_slice(&0x50u32.to_le_bytes()); // names[0] -> rva 0x50
        write_str(&mut buf, 0x50, "DoThing\0");
        buf[0xA0..0xA2].copy_from_slice(&0u16.to_le_bytes()); // name_ordinal[0] = 0

        let s = ByteStream::new(&buf);
        let sections = vec![flat_section()];
        let dir = parse_exports(&s, &sections, 0, 0x60).unwrap();
        assert_eq!(dir.name, "mylib.dll");
        assert_eq!(dir.entries.len(), 1);
        assert_eq!(dir.entries[0].name.as_deref(), Some("DoThing"));
        assert!(matches!(dir.entries[0].target, ExportTarget::Rva(0x1234)));
    }
}
