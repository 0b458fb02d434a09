//! PE top-level parse driver (spec C6/§4.4): orchestrates the structure
//! decoders (C2), the data directory table (C4), and the sub-parsers (C5)
//! under one partial-failure policy -- only header parsing is fatal.
//!
//! Control flow is the teacher's `pe::File::parse`/`parse_or_print_error`
//! generalized from "abort on any error" into the warn-and-continue
//! pipeline spec §4.4 names.

pub mod debug;
pub mod directories;
pub mod exports;
pub mod headers;
pub mod imports;
pub mod load_config;
pub mod relocations;
pub mod resources;
pub mod section;
pub mod signature;
pub mod tls;
pub mod util;

use crate::error::{BinError, Result};
use crate::stream::ByteStream;
use debug::DebugEntry;
use directories::{DataDirectoryTable, DirectoryKind};
use exports::ExportDirectory;
use headers::Headers;
use imports::ImportDescriptor;
use load_config::LoadConfiguration;
use relocations::BaseRelocation;
use resources::ResourceEntry;
use section::SectionHeader;
use signature::Certificate;
use tls::TlsDirectory;

/// Every non-fatal step that failed, named by step, so a caller can inspect
/// what was best-effort without re-parsing with a logger attached (spec
/// §3.1's `PeWarnings`, additive over the mandatory `log` calls).
#[derive(Debug, Clone, Default)]
pub struct PeWarnings {
    pub failures: Vec<(&'static str, BinError)>,
}

impl PeWarnings {
    fn record(&mut self, step: &'static str, level: log::Level, err: BinError) {
        log::log!(level, "{step}: {err}");
        self.failures.push((step, err));
    }

    fn run<T>(&mut self, step: &'static str, level: log::Level, r: Result<T>) -> Option<T> {
        match r {
            Ok(v) => Some(v),
            Err(e) => {
                self.record(step, level, e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RichHeaderEntry {
    pub comp_id: u32,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct Overlay {
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone)]
pub struct CoffSymbol {
    pub name: [u8; 8],
    pub value: u32,
    pub section_number: i16,
    pub symbol_type: u16,
    pub storage_class: u8,
}

/// The fully (or partially) parsed PE image: spec §4.4's "binary object"
/// that `PeImage::parse` returns best-effort.
#[derive(Debug)]
pub struct PeImage {
    pub headers: Headers,
    pub dos_stub: Option<Vec<u8>>,
    pub rich_header: Option<Vec<RichHeaderEntry>>,
    pub sections: Vec<SectionHeader>,
    pub directories: Option<DataDirectoryTable>,
    pub imports: Vec<ImportDescriptor>,
    pub exports: Option<ExportDirectory>,
    pub tls: Option<TlsDirectory>,
    pub load_config: Option<LoadConfiguration>,
    pub relocations: Vec<BaseRelocation>,
    pub debug: Vec<DebugEntry>,
    pub resources: Vec<ResourceEntry>,
    pub certificate: Option<Certificate>,
    pub symbols: Vec<CoffSymbol>,
    pub overlay: Option<Overlay>,
    pub warnings: PeWarnings,
}

impl PeImage {
    pub fn has_imports(&self) -> bool {
        !self.imports.is_empty()
    }
    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }
    pub fn has_configuration(&self) -> bool {
        self.load_config.is_some()
    }

    /// The seven-step pipeline of spec §4.4. Only step 1 can fail the whole
    /// parse; every later step warns and falls through to the next.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let headers = Headers::parse(buf)?;
        let stream = ByteStream::new(buf);
        let mut warnings = PeWarnings::default();

        let dos_stub = warnings.run(
            "dos_stub",
            log::Level::Warn,
            decode_dos_stub(&stream, headers.dos.pe_pointer as usize),
        );

        let rich_header = warnings.run(
            "rich_header",
            log::Level::Debug,
            decode_rich_header(&stream, headers.dos.pe_pointer as usize),
        );

        let sections = warnings
            .run(
                "sections",
                log::Level::Warn,
                section::decode_sections(
                    &stream,
                    headers.section_table_offset,
                    headers.coff.number_of_sections,
                ),
            )
            .unwrap_or_default();

        let is_64 = headers.optional.is_64();
        let image_base = headers.optional.image_base();
        let num_dirs = headers.optional.number_of_rva_and_sizes();
        let directories_offset = headers.optional_header_offset + headers.optional.fixed_size();

        let directories = warnings.run(
            "data_directories",
            log::Level::Warn,
            DataDirectoryTable::decode(&stream, directories_offset, num_dirs, &sections),
        );

        let (imports, exports, tls, load_config, relocations, debug, resources, certificate) =
            dispatch_directories(
                &stream,
                &sections,
                directories.as_ref(),
                image_base,
                is_64,
                &mut warnings,
            );

        let symbols = decode_symbols(
            &stream,
            headers.coff.pointer_to_symbol_table as usize,
            headers.coff.number_of_symbols as usize,
        );

        let overlay = warnings
            .run("overlay", log::Level::Warn, compute_overlay(buf, &sections))
            .flatten();

        Ok(PeImage {
            headers,
            dos_stub,
            rich_header,
            sections,
            directories,
            imports,
            exports,
            tls,
            load_config,
            relocations,
            debug,
            resources,
            certificate,
            symbols,
            overlay,
            warnings,
        })
    }
}

fn decode_dos_stub(stream: &ByteStream, pe_pointer: usize) -> Result<Vec<u8>> {
    if pe_pointer < headers::DosHeader::SIZE {
        return Err(BinError::corrupted("e_lfanew points inside the fixed DOS header"));
    }
    Ok(stream
        .peek_bytes(headers::DosHeader::SIZE, pe_pointer - headers::DosHeader::SIZE)?
        .to_vec())
}

/// XOR-decodes the "Rich" header embedded in the DOS stub by MSVC linkers:
/// a `"DanS"`-prefixed block of `(comp_id, count)` pairs, XORed with a
/// per-file key, terminated by a `"Rich"` marker followed by the key itself.
fn decode_rich_header(stream: &ByteStream, pe_pointer: usize) -> Result<Vec<RichHeaderEntry>> {
    let window_start = headers::DosHeader::SIZE;
    if pe_pointer <= window_start {
        return Err(BinError::not_found("no DOS stub window to scan"));
    }
    let window = stream.peek_bytes(window_start, pe_pointer - window_start)?;

    let rich_pos = window
        .windows(4)
        .position(|w| w == b"Rich")
        .ok_or_else(|| BinError::not_found("no Rich marker"))?;
    if rich_pos + 8 > window.len() {
        return Err(BinError::corrupted("Rich marker has no trailing key"));
    }
    let key = read_u32_le(&window[rich_pos + 4..rich_pos + 8]);
    if key == 0 {
        return Err(BinError::corrupted("Rich header key is zero"));
    }

    let dans_needle: Vec<u8> = b"DanS".iter().map(|b| b ^ (key as u8)).collect();
    let dans_pos = window[..rich_pos]
        .windows(4)
        .position(|w| w == dans_needle.as_slice())
        .ok_or_else(|| BinError::not_found("no DanS marker"))?;

    let body = &window[dans_pos + 16..rich_pos];
    let mut entries = Vec::new();
    for chunk in body.chunks_exact(8) {
        let comp_id = read_u32_le(&chunk[0..4]) ^ key;
        let count = read_u32_le(&chunk[4..8]) ^ key;
        entries.push(RichHeaderEntry { comp_id, count });
    }
    Ok(entries)
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[allow(clippy::too_many_arguments)]
fn dispatch_directories(
    stream: &ByteStream,
    sections: &[SectionHeader],
    directories: Option<&DataDirectoryTable>,
    image_base: u64,
    is_64: bool,
    warnings: &mut PeWarnings,
) -> (
    Vec<ImportDescriptor>,
    Option<ExportDirectory>,
    Option<TlsDirectory>,
    Option<LoadConfiguration>,
    Vec<BaseRelocation>,
    Vec<DebugEntry>,
    Vec<ResourceEntry>,
    Option<Certificate>,
) {
    let Some(table) = directories else {
        return (Vec::new(), None, None, None, Vec::new(), Vec::new(), Vec::new(), None);
    };

    let imports = table
        .get(DirectoryKind::Import)
        .and_then(|d| {
            warnings.run(
                "imports",
                log::Level::Warn,
                imports::parse_imports(stream, sections, d.rva, is_64),
            )
        })
        .unwrap_or_default();

    let exports = table.get(DirectoryKind::Export).and_then(|d| {
        warnings.run(
            "exports",
            log::Level::Warn,
            exports::parse_exports(stream, sections, d.rva, d.size),
        )
    });

    let tls = table.get(DirectoryKind::Tls).and_then(|d| {
        let offset = directories::rva_to_offset(sections, d.rva).ok()?;
        warnings.run(
            "tls",
            log::Level::Warn,
            tls::parse_tls(stream, sections, offset as usize, image_base, is_64),
        )
    });

    let load_config = table.get(DirectoryKind::LoadConfig).and_then(|d| {
        let offset = directories::rva_to_offset(sections, d.rva).ok()?;
        warnings.run(
            "load_config",
            log::Level::Warn,
            load_config::parse_load_config(stream, offset as usize, is_64),
        )
    });

    let relocations = table
        .get(DirectoryKind::BaseRelocation)
        .and_then(|d| {
            let offset = directories::rva_to_offset(sections, d.rva).ok()?;
            warnings.run(
                "base_relocations",
                log::Level::Warn,
                relocations::parse_relocations(stream, offset as usize, d.size),
            )
        })
        .unwrap_or_default();

    let debug = table
        .get(DirectoryKind::Debug)
        .and_then(|d| {
            let offset = directories::rva_to_offset(sections, d.rva).ok()?;
            warnings.run(
                "debug",
                log::Level::Warn,
                debug::parse_debug(stream, offset as usize, d.size),
            )
        })
        .unwrap_or_default();

    let resources = table
        .get(DirectoryKind::Resource)
        .and_then(|d| {
            let offset = directories::rva_to_offset(sections, d.rva).ok()?;
            warnings.run(
                "resources",
                log::Level::Warn,
                resources::parse_resources(stream, offset as usize, 0),
            )
        })
        .unwrap_or_default();

    // Security directory RVA is a raw file offset, not an RVA (spec §4.12).
    let certificate = table.get(DirectoryKind::Security).and_then(|d| {
        warnings.run(
            "signature",
            log::Level::Warn,
            signature::parse_signature(stream, d.rva as usize),
        )
    });

    (
        imports,
        exports,
        tls,
        load_config,
        relocations,
        debug,
        resources,
        certificate,
    )
}

/// Decodes the COFF symbol table entry by entry (spec §4.4.1's "Symbols"
/// step), the same bounded-loop shape as the imports descriptor walk and the
/// TLS callback walk: a declared `count` that would run past the buffer is
/// `CorruptedInput`, logged and swallowed, leaving whatever prefix decoded
/// cleanly intact rather than discarding the whole table.
fn decode_symbols(stream: &ByteStream, offset: usize, count: usize) -> Vec<CoffSymbol> {
    if offset == 0 || count == 0 {
        return Vec::new();
    }
    const SYMBOL_SIZE: usize = 18;
    let mut symbols = Vec::with_capacity(count);
    for i in 0..count {
        let at = offset + i * SYMBOL_SIZE;
        let entry = (|| -> Result<CoffSymbol> {
            let mut name = [0u8; 8];
            stream.peek_data(&mut name, at, 8)?;
            let value = stream.peek_u32(at + 8)?;
            let section_number = stream.peek_u16(at + 12)? as i16;
            let symbol_type = stream.peek_u16(at + 14)?;
            let storage_class = stream.peek_u8(at + 16)?;
            Ok(CoffSymbol {
                name,
                value,
                section_number,
                symbol_type,
                storage_class,
            })
        })();
        match entry {
            Ok(symbol) => symbols.push(symbol),
            Err(e) => {
                log::warn!("symbols: table runs past buffer at entry {i}: {e}");
                break;
            }
        }
    }
    symbols
}

fn compute_overlay(buf: &[u8], sections: &[SectionHeader]) -> Result<Option<Overlay>> {
    let highest_end = sections
        .iter()
        .map(|s| s.pointer_to_raw_data as usize + s.size_of_raw_data as usize)
        .max()
        .unwrap_or(0);
    if highest_end >= buf.len() {
        return Ok(None);
    }
    Ok(Some(Overlay {
        offset: highest_end,
        len: buf.len() - highest_end,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYMBOL_SIZE: usize = 18;

    fn write_symbol(buf: &mut [u8], at: usize, value: u32) {
        buf[at..at + 8].copy_from_slice(b"sym\0\0\0\0\0");
        buf[at + 8..at + 12].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn decode_symbols_reads_all_when_table_fits() {
        let mut buf = vec![0u8; SYMBOL_SIZE * 3];
        for i in 0..3 {
            write_symbol(&mut buf, i * SYMBOL_SIZE, i as u32);
        }
        let s = ByteStream::new(&buf);
        let symbols = decode_symbols(&s, 0, 3);
        assert_eq!(symbols.len(), 3);
        assert_eq!(symbols[2].value, 2);
    }

    /// A declared count running past the buffer keeps the prefix that
    /// decoded cleanly instead of discarding the whole table.
    #[test]
    fn decode_symbols_keeps_prefix_on_overrun() {
        let mut buf = vec![0u8; SYMBOL_SIZE * 2];
        write_symbol(&mut buf, 0, 0);
        write_symbol(&mut buf, SYMBOL_SIZE, 1);
        let s = ByteStream::new(&buf);
        let symbols = decode_symbols(&s, 0, 5);
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].value, 0);
        assert_eq!(symbols[1].value, 1);
    }

    #[test]
    fn decode_symbols_empty_on_zero_offset_or_count() {
        let buf = vec![0u8; SYMBOL_SIZE];
        let s = ByteStream::new(&buf);
        assert!(decode_symbols(&s, 0, 0).is_empty());
        assert!(decode_symbols(&s, 0, 3).is_empty());
    }
}
