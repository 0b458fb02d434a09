//! DOS header, COFF (PE) header, and optional header decoders (spec C2 for
//! the PE path). Field order and the `impl_parse_for_enum!`-based
//! `Machine`/`Subsystem` parsers are carried over from the teacher's
//! `pe::header` almost verbatim; this version additionally decodes PE32 (the
//! teacher only handled PE32+) and returns `BinError` instead of aborting on
//! `panic!`/`nom::Err`.

use crate::error::BinError;
use crate::impl_parse_for_enum;
use crate::pe::util::{Input, NomResult};
use std::convert::TryFrom;

pub const DOS_MAGIC: u16 = 0x5A4D; // "MZ"
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;

fn nom_to_bin<O>(step: &'static str, r: NomResult<O>) -> Result<O, BinError> {
    r.map(|(_, o)| o).map_err(|e| match e {
        nom::Err::Incomplete(_) => BinError::parsing(format!("{step}: incomplete input")),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            BinError::parsing(format!("{step}: {e:?}"))
        }
    })
}

/// `IMAGE_DOS_HEADER`, trimmed to the fields this crate actually uses:
/// the `"MZ"` signature and `e_lfanew`, the file offset of the PE header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    pub signature: u16,
    pub pe_pointer: u32,
}

impl DosHeader {
    pub const SIZE: usize = 0x40;

    /// Decodes the signature and `e_lfanew` via the bounds-checked byte
    /// cursor (spec C1) rather than `nom` -- there is no sequential,
    /// variable-length content here, just two fixed offsets.
    pub fn decode(stream: &crate::stream::ByteStream) -> Result<Self, BinError> {
        let signature = stream.peek_u16(0)?;
        if signature != DOS_MAGIC {
            return Err(BinError::parsing(format!(
                "bad DOS signature {signature:#06x}"
            )));
        }
        let pe_pointer = stream.peek_u32(0x3c)?;
        Ok(DosHeader {
            signature,
            pe_pointer,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Machine {
    Unknown = 0,
    I386 = 0x14C,
    Arm = 0x1C0,
    IA64 = 0x200,
    AMD64 = 0x8664,
    Arm64 = 0xAA64,
}

impl TryFrom<u16> for Machine {
    type Error = u16;
    fn try_from(n: u16) -> Result<Self, u16> {
        match n {
            0 => Ok(Self::Unknown),
            0x14C => Ok(Self::I386),
            0x1C0 => Ok(Self::Arm),
            0x200 => Ok(Self::IA64),
            0x8664 => Ok(Self::AMD64),
            0xAA64 => Ok(Self::Arm64),
            _ => Err(n),
        }
    }
}
impl_parse_for_enum!(Machine, le_u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Subsystem {
    Unknown = 0,
    Native = 1,
    WindowsGui = 2,
    WindowsCui = 3,
    Os2Cui = 5,
    PosixCui = 7,
    NativeWindows = 8,
    WindowsCeGui = 9,
    EfiApplication = 10,
    EfiBootServiceDriver = 11,
    EfiRuntimeDriver = 12,
    EfiRom = 13,
    Xbox = 14,
    WindowsBootApplication = 16,
}

impl TryFrom<u16> for Subsystem {
    type Error = u16;
    fn try_from(n: u16) -> Result<Self, u16> {
        match n {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Native),
            2 => Ok(Self::WindowsGui),
            3 => Ok(Self::WindowsCui),
            5 => Ok(Self::Os2Cui),
            7 => Ok(Self::PosixCui),
            8 => Ok(Self::NativeWindows),
            9 => Ok(Self::WindowsCeGui),
            10 => Ok(Self::EfiApplication),
            11 => Ok(Self::EfiBootServiceDriver),
            12 => Ok(Self::EfiRuntimeDriver),
            13 => Ok(Self::EfiRom),
            14 => Ok(Self::Xbox),
            16 => Ok(Self::WindowsBootApplication),
            _ => Err(n),
        }
    }
}
impl_parse_for_enum!(Subsystem, le_u16);

/// The COFF file header (`IMAGE_FILE_HEADER`), immediately following the
/// `"PE\0\0"` signature.
#[derive(Debug, Clone, Copy)]
pub struct CoffHeader {
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl CoffHeader {
    pub fn parse(i: Input) -> NomResult<Self> {
        use nom::{error::context, number::complete::*, sequence::tuple};
        let (
            i,
            (
                machine,
                number_of_sections,
                time_date_stamp,
                pointer_to_symbol_table,
                number_of_symbols,
                size_of_optional_header,
                characteristics,
            ),
        ) = tuple((
            context("Machine", Machine::parse),
            context("NumberOfSections", le_u16),
            context("TimeDateStamp", le_u32),
            context("PointerToSymbolTable", le_u32),
            context("NumberOfSymbols", le_u32),
            context("SizeOfOptionalHeader", le_u16),
            context("Characteristics", le_u16),
        ))(i)?;
        Ok((
            i,
            CoffHeader {
                machine,
                number_of_sections,
                time_date_stamp,
                pointer_to_symbol_table,
                number_of_symbols,
                size_of_optional_header,
                characteristics,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OptionalHeader32 {
    pub address_of_entry_point: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: u16,
    pub number_of_rva_and_sizes: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct OptionalHeader64 {
    pub address_of_entry_point: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: u16,
    pub number_of_rva_and_sizes: u32,
}

#[derive(Debug, Clone, Copy)]
pub enum OptionalHeader {
    Pe32(OptionalHeader32),
    Pe32Plus(OptionalHeader64),
}

impl OptionalHeader {
    pub fn image_base(&self) -> u64 {
        match self {
            OptionalHeader::Pe32(h) => h.image_base as u64,
            OptionalHeader::Pe32Plus(h) => h.image_base,
        }
    }
    pub fn entry_point_rva(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(h) => h.address_of_entry_point,
            OptionalHeader::Pe32Plus(h) => h.address_of_entry_point,
        }
    }
    pub fn size_of_image(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(h) => h.size_of_image,
            OptionalHeader::Pe32Plus(h) => h.size_of_image,
        }
    }
    pub fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(h) => h.number_of_rva_and_sizes,
            OptionalHeader::Pe32Plus(h) => h.number_of_rva_and_sizes,
        }
    }
    pub fn subsystem(&self) -> Subsystem {
        match self {
            OptionalHeader::Pe32(h) => h.subsystem,
            OptionalHeader::Pe32Plus(h) => h.subsystem,
        }
    }
    pub fn is_64(&self) -> bool {
        matches!(self, OptionalHeader::Pe32Plus(_))
    }

    /// Byte length of the fixed fields this type decodes, i.e. everything up
    /// to (not including) the data directory array -- `IMAGE_OPTIONAL_HEADER`
    /// minus its trailing `IMAGE_DATA_DIRECTORY[...]`.
    pub fn fixed_size(&self) -> usize {
        match self {
            OptionalHeader::Pe32(_) => 96,
            OptionalHeader::Pe32Plus(_) => 112,
        }
    }

    /// Parses either variant based on the magic, per spec's
    /// `parse<Variant>()` contract (the caller-visible choice is made here,
    /// from the bytes, rather than forced on the API).
    pub fn parse(i: Input) -> NomResult<Self> {
        use nom::{error::context, number::complete::*, sequence::tuple};
        let (rest, magic) = context("OptionalMagic", le_u16)(i)?;
        if magic == PE32PLUS_MAGIC {
            let (
                rest,
                (
                    _linker_versions,
                    _size_of_code,
                    _size_of_init_data,
                    _size_of_uninit_data,
                    address_of_entry_point,
                    _base_of_code,
                    image_base,
                    section_alignment,
                    file_alignment,
                    _os_version,
                    _image_version,
                    _subsystem_version,
                ),
            ) = tuple((
                context("LinkerVersions", le_u16),
                context("SizeOfCode", le_u32),
                context("SizeOfInitializedData", le_u32),
                context("SizeOfUninitializedData", le_u32),
                context("AddressOfEntryPoint", le_u32),
                context("BaseOfCode", le_u32),
                context("ImageBase", le_u64),
                context("SectionAlignment", le_u32),
                context("FileAlignment", le_u32),
                context("OsVersion", le_u32),
                context("ImageVersion", le_u32),
                context("SubsystemVersion", le_u32),
            ))(rest)?;
            let (
                rest,
                (
                    _win32_version_value,
                    size_of_image,
                    size_of_headers,
                    _checksum,
                    subsystem,
                    dll_characteristics,
                    _stack_reserve,
                    _stack_commit,
                    _heap_reserve,
                    _heap_commit,
                    _loader_flags,
                    number_of_rva_and_sizes,
                ),
            ) = tuple((
                context("Win32VersionValue", le_u32),
                context("SizeOfImage", le_u32),
                context("SizeOfHeaders", le_u32),
                context("CheckSum", le_u32),
                context("Subsystem", Subsystem::parse),
                context("DllCharacteristics", le_u16),
                context("SizeOfStackReserve", le_u64),
                context("SizeOfStackCommit", le_u64),
                context("SizeOfHeapReserve", le_u64),
                context("SizeOfHeapCommit", le_u64),
                context("LoaderFlags", le_u32),
                context("NumberOfRvaAndSizes", le_u32),
            ))(rest)?;
            Ok((
                rest,
                OptionalHeader::Pe32Plus(OptionalHeader64 {
                    address_of_entry_point,
                    image_base,
                    section_alignment,
                    file_alignment,
                    size_of_image,
                    size_of_headers,
                    subsystem,
                    dll_characteristics,
                    number_of_rva_and_sizes,
                }),
            ))
        } else if magic == PE32_MAGIC {
            let (
                rest,
                (
                    _linker_versions,
                    _size_of_code,
                    _size_of_init_data,
                    _size_of_uninit_data,
                    address_of_entry_point,
                    _base_of_code,
                    _base_of_data,
                    image_base,
                    section_alignment,
                    file_alignment,
                    _os_version,
                    _image_version,
                    _subsystem_version,
                ),
            ) = tuple((
                context("LinkerVersions", le_u16),
                context("SizeOfCode", le_u32),
                context("SizeOfInitializedData", le_u32),
                context("SizeOfUninitializedData", le_u32),
                context("AddressOfEntryPoint", le_u32),
                context("BaseOfCode", le_u32),
                context("BaseOfData", le_u32),
                context("ImageBase", le_u32),
                context("SectionAlignment", le_u32),
                context("FileAlignment", le_u32),
                context("OsVersion", le_u32),
                context("ImageVersion", le_u32),
                context("SubsystemVersion", le_u32),
            ))(rest)?;
            let (
                rest,
                (
                    _win32_version_value,
                    size_of_image,
                    size_of_headers,
                    _checksum,
                    subsystem,
                    dll_characteristics,
                    _stack_reserve,
                    _stack_commit,
                    _heap_reserve,
                    _heap_commit,
                    _loader_flags,
                    number_of_rva_and_sizes,
                ),
            ) = tuple((
                context("Win32VersionValue", le_u32),
                context("SizeOfImage", le_u32),
                context("SizeOfHeaders", le_u32),
                context("CheckSum", le_u32),
                context("Subsystem", Subsystem::parse),
                context("DllCharacteristics", le_u16),
                context("SizeOfStackReserve", le_u32),
                context("SizeOfStackCommit", le_u32),
                context("SizeOfHeapReserve", le_u32),
                context("SizeOfHeapCommit", le_u32),
                context("LoaderFlags", le_u32),
                context("NumberOfRvaAndSizes", le_u32),
            ))(rest)?;
            Ok((
                rest,
                OptionalHeader::Pe32(OptionalHeader32 {
                    address_of_entry_point,
                    image_base,
                    section_alignment,
                    file_alignment,
                    size_of_image,
                    size_of_headers,
                    subsystem,
                    dll_characteristics,
                    number_of_rva_and_sizes,
                }),
            ))
        } else {
            Err(nom::Err::Error(nom::error::VerboseError {
                errors: vec![(
                    i,
                    nom::error::VerboseErrorKind::Context("unknown optional header magic"),
                )],
            }))
        }
    }
}

/// Decoded mandatory header region: DOS header, COFF header, optional
/// header, and the file offset right after the optional header (where the
/// section table starts).
#[derive(Debug)]
pub struct Headers {
    pub dos: DosHeader,
    pub coff: CoffHeader,
    pub optional: OptionalHeader,
    pub optional_header_offset: usize,
    pub section_table_offset: usize,
}

impl Headers {
    /// Step 1 of the PE pipeline: the only mandatory step. Any failure here
    /// is fatal (`BinError::Parsing`), per spec §4.4.
    pub fn parse(buf: &[u8]) -> Result<Self, BinError> {
        let stream = crate::stream::ByteStream::new(buf);
        let dos = DosHeader::decode(&stream)?;
        let pe_offset = dos.pe_pointer as usize;
        if pe_offset + 4 > buf.len() {
            return Err(BinError::parsing("PE signature offset out of bounds"));
        }
        if buf[pe_offset..pe_offset + 4] != PE_SIGNATURE {
            return Err(BinError::parsing("bad PE signature"));
        }
        let after_sig = &buf[pe_offset + 4..];
        let coff = nom_to_bin("CoffHeader", CoffHeader::parse(after_sig))?;
        let opt_header_offset = pe_offset + 4 + 20;
        if opt_header_offset > buf.len() {
            return Err(BinError::parsing("optional header offset out of bounds"));
        }
        let opt_slice = &buf[opt_header_offset..];
        let optional = nom_to_bin("OptionalHeader", OptionalHeader::parse(opt_slice))?;
        let section_table_offset = opt_header_offset + coff.size_of_optional_header as usize;
        Ok(Headers {
            dos,
            coff,
            optional,
            optional_header_offset: opt_header_offset,
            section_table_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pe32plus(num_sections: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 0x40];
        buf[0..2].copy_from_slice(&DOS_MAGIC.to_le_bytes());
        let pe_off = 0x80usize;
        buf.resize(pe_off, 0);
        buf[0x3c..0x40].copy_from_slice(&(pe_off as u32).to_le_bytes());
        buf.extend_from_slice(&PE_SIGNATURE);
        buf.extend_from_slice(&0x8664u16.to_le_bytes()); // machine
        buf.extend_from_slice(&num_sections.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // timestamp
        buf.extend_from_slice(&0u32.to_le_bytes()); // symtab ptr
        buf.extend_from_slice(&0u32.to_le_bytes()); // num symbols
        let opt_header_size = 112u16;
        buf.extend_from_slice(&opt_header_size.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // characteristics

        let opt_start = buf.len();
        buf.extend_from_slice(&PE32PLUS_MAGIC.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // linker versions
        buf.extend_from_slice(&0u32.to_le_bytes()); // size of code
        buf.extend_from_slice(&0u32.to_le_bytes()); // size init data
        buf.extend_from_slice(&0u32.to_le_bytes()); // size uninit data
        buf.extend_from_slice(&0x1000u32.to_le_bytes()); // entry point
        buf.extend_from_slice(&0u32.to_le_bytes()); // base of code
        buf.extend_from_slice(&0x1_4000_0000u64.to_le_bytes()); // image base
        buf.extend_from_slice(&0x1000u32.to_le_bytes()); // section align
        buf.extend_from_slice(&0x200u32.to_le_bytes()); // file align
        buf.extend_from_slice(&0u32.to_le_bytes()); // os version
        buf.extend_from_slice(&0u32.to_le_bytes()); // image version
        buf.extend_from_slice(&0u32.to_le_bytes()); // subsystem version
        buf.extend_from_slice(&0u32.to_le_bytes()); // win32 version value
        buf.extend_from_slice(&0x3000u32.to_le_bytes()); // size of image
        buf.extend_from_slice(&0x400u32.to_le_bytes()); // size of headers
        buf.extend_from_slice(&0u32.to_le_bytes()); // checksum
        buf.extend_from_slice(&2u16.to_le_bytes()); // subsystem = WindowsGui
        buf.extend_from_slice(&0u16.to_le_bytes()); // dll characteristics
        buf.extend_from_slice(&0x10_0000u64.to_le_bytes());
        buf.extend_from_slice(&0x1000u64.to_le_bytes());
        buf.extend_from_slice(&0x10_0000u64.to_le_bytes());
        buf.extend_from_slice(&0x1000u64.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // loader flags
        buf.extend_from_slice(&16u32.to_le_bytes()); // number of rva and sizes
        let written = buf.len() - opt_start;
        buf.resize(opt_start + opt_header_size as usize, 0);
        let _ = written;
        buf
    }

    #[test]
    fn parses_minimal_pe32plus_headers() {
        let buf = minimal_pe32plus(1);
        let headers = Headers::parse(&buf).unwrap();
        assert!(headers.optional.is_64());
        assert_eq!(headers.optional.image_base(), 0x1_4000_0000);
        assert_eq!(headers.coff.number_of_sections, 1);
        assert_eq!(headers.optional.number_of_rva_and_sizes(), 16);
    }

    /// S4: truncated before the optional header -> ParsingError.
    #[test]
    fn truncated_before_optional_header_is_fatal() {
        let mut buf = minimal_pe32plus(0);
        let cutoff = 0x80 + 4 + 20; // right after the COFF header
        buf.truncate(cutoff);
        let err = Headers::parse(&buf).unwrap_err();
        assert!(matches!(err, BinError::Parsing(_)));
    }

    /// S8: buffer shorter than a required header.
    #[test]
    fn tiny_buffer_is_fatal() {
        let buf = [0x4Du8, 0x5A];
        let err = Headers::parse(&buf).unwrap_err();
        assert!(matches!(err, BinError::Parsing(_)));
    }
}
