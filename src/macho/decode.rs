//! Pure byte-layout decoders for `segment_command_32`/`segment_command_64`
//! and their `section_32`/`section_64` records (spec C2 for the Mach-O path).
//!
//! Grounded on `examples/other_examples/90b3608f_PandasAreBears-macho2__src-segment.rs.rs`:
//! field order, the `Protection`/`SGFlags` bitflags shape, and the convention
//! of feeding the same 4 bytes into both a masked `SectionType` and an
//! unmasked `SectionAttributes` read.

use crate::error::{BinError, ReadError, Result};
use crate::stream::ByteStream;

bitflags::bitflags! {
    /// `vm_prot_t`: `max_protection`/`init_protection` on a segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protection: u32 {
        const NONE = 0x00;
        const READ = 0x01;
        const WRITE = 0x02;
        const EXECUTE = 0x04;
    }
}

bitflags::bitflags! {
    /// `segment_command::flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u32 {
        const SG_HIGHVM = 0x1;
        const SG_FVMLIB = 0x2;
        const SG_NORELOC = 0x4;
        const SG_PROTECTED_VERSION_1 = 0x8;
        const SG_READ_ONLY = 0x10;
    }
}

bitflags::bitflags! {
    /// The user/system bits of `section::flags`, excluding the low-byte
    /// section type (masked off separately, see `SECTION_TYPE_MASK`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionAttributes: u32 {
        const PURE_INSTRUCTIONS = 0x8000_0000;
        const NO_TOC = 0x4000_0000;
        const STRIP_STATIC_SYMS = 0x2000_0000;
        const NO_DEAD_STRIP = 0x1000_0000;
        const LIVE_SUPPORT = 0x0800_0000;
        const SELF_MODIFYING_CODE = 0x0400_0000;
        const DEBUG = 0x0200_0000;
        const SOME_INSTRUCTIONS = 0x0000_0400;
        const EXT_RELOC = 0x0000_0200;
        const LOC_RELOC = 0x0000_0100;
    }
}

pub const SECTION_TYPE_MASK: u32 = 0x0000_00ff;
pub const SECTION_ATTRIBUTES_MASK: u32 = 0xffff_ff00;

/// On-disk `segment_command_32`/`segment_command_64`, decoded before its
/// trailing section array (sections are decoded separately and appended via
/// `Segment::add_section`, per spec lifecycle).
#[derive(Debug, Clone)]
pub struct SegmentCommandRecord {
    pub is_64: bool,
    pub cmdsize: u32,
    pub name: String,
    pub virtual_address: u64,
    pub virtual_size: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub max_protection: Protection,
    pub init_protection: Protection,
    pub flags: SegmentFlags,
    pub nb_sections_declared: u32,
}

impl SegmentCommandRecord {
    /// `segment_command_32`: `{ cmd, cmdsize, segname[16], vmaddr, vmsize,
    /// fileoff, filesize, maxprot, initprot, nsects, flags }`, all `u32`
    /// width fields, little-endian.
    pub fn decode_32(stream: &ByteStream, offset: usize) -> Result<Self> {
        let segname = stream.peek_fixed_str(offset + 8, 16).map_err(ReadError::from)?;
        let vmaddr = stream.peek_u32(offset + 24).map_err(ReadError::from)? as u64;
        let vmsize = stream.peek_u32(offset + 28).map_err(ReadError::from)? as u64;
        let fileoff = stream.peek_u32(offset + 32).map_err(ReadError::from)? as u64;
        let filesize = stream.peek_u32(offset + 36).map_err(ReadError::from)? as u64;
        let maxprot = stream.peek_u32(offset + 40).map_err(ReadError::from)?;
        let initprot = stream.peek_u32(offset + 44).map_err(ReadError::from)?;
        let nsects = stream.peek_u32(offset + 48).map_err(ReadError::from)?;
        let flags = stream.peek_u32(offset + 52).map_err(ReadError::from)?;
        let cmdsize = stream.peek_u32(offset + 4).map_err(ReadError::from)?;

        Ok(SegmentCommandRecord {
            is_64: false,
            cmdsize,
            name: segname,
            virtual_address: vmaddr,
            virtual_size: vmsize,
            file_offset: fileoff,
            file_size: filesize,
            max_protection: Protection::from_bits_truncate(maxprot),
            init_protection: Protection::from_bits_truncate(initprot),
            flags: SegmentFlags::from_bits_truncate(flags),
            nb_sections_declared: nsects,
        })
    }

    /// `segment_command_64`: same shape, address/size fields widened to
    /// `u64`.
    pub fn decode_64(stream: &ByteStream, offset: usize) -> Result<Self> {
        let segname = stream.peek_fixed_str(offset + 8, 16).map_err(ReadError::from)?;
        let vmaddr = stream.peek_u64(offset + 24).map_err(ReadError::from)?;
        let vmsize = stream.peek_u64(offset + 32).map_err(ReadError::from)?;
        let fileoff = stream.peek_u64(offset + 40).map_err(ReadError::from)?;
        let filesize = stream.peek_u64(offset + 48).map_err(ReadError::from)?;
        let maxprot = stream.peek_u32(offset + 56).map_err(ReadError::from)?;
        let initprot = stream.peek_u32(offset + 60).map_err(ReadError::from)?;
        let nsects = stream.peek_u32(offset + 64).map_err(ReadError::from)?;
        let flags = stream.peek_u32(offset + 68).map_err(ReadError::from)?;
        let cmdsize = stream.peek_u32(offset + 4).map_err(ReadError::from)?;

        Ok(SegmentCommandRecord {
            is_64: true,
            cmdsize,
            name: segname,
            virtual_address: vmaddr,
            virtual_size: vmsize,
            file_offset: fileoff,
            file_size: filesize,
            max_protection: Protection::from_bits_truncate(maxprot),
            init_protection: Protection::from_bits_truncate(initprot),
            flags: SegmentFlags::from_bits_truncate(flags),
            nb_sections_declared: nsects,
        })
    }
}

/// A decoded on-disk section record, prior to being bound into a `Segment`
/// (name/back-reference/payload binding happens in `Segment::add_section`).
#[derive(Debug, Clone)]
pub struct SectionRecord {
    pub sectname: String,
    pub segname: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub sectype: u8,
    pub attributes: SectionAttributes,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl SectionRecord {
    pub const SIZE_32: usize = 68;
    pub const SIZE_64: usize = 80;

    pub fn decode_32(stream: &ByteStream, offset: usize) -> Result<Self> {
        let sectname = stream.peek_fixed_str(offset, 16).map_err(ReadError::from)?;
        let segname = stream.peek_fixed_str(offset + 16, 16).map_err(ReadError::from)?;
        let addr = stream.peek_u32(offset + 32).map_err(ReadError::from)? as u64;
        let size = stream.peek_u32(offset + 36).map_err(ReadError::from)? as u64;
        let file_offset = stream.peek_u32(offset + 40).map_err(ReadError::from)?;
        let align = stream.peek_u32(offset + 44).map_err(ReadError::from)?;
        let reloff = stream.peek_u32(offset + 48).map_err(ReadError::from)?;
        let nreloc = stream.peek_u32(offset + 52).map_err(ReadError::from)?;
        let raw_flags = stream.peek_u32(offset + 56).map_err(ReadError::from)?;
        let reserved1 = stream.peek_u32(offset + 60).map_err(ReadError::from)?;
        let reserved2 = stream.peek_u32(offset + 64).map_err(ReadError::from)?;

        Ok(SectionRecord {
            sectname,
            segname,
            addr,
            size,
            offset: file_offset,
            align,
            reloff,
            nreloc,
            sectype: (raw_flags & SECTION_TYPE_MASK) as u8,
            attributes: SectionAttributes::from_bits_truncate(raw_flags & SECTION_ATTRIBUTES_MASK),
            reserved1,
            reserved2,
        })
    }

    pub fn decode_64(stream: &ByteStream, offset: usize) -> Result<Self> {
        let sectname = stream.peek_fixed_str(offset, 16).map_err(ReadError::from)?;
        let segname = stream.peek_fixed_str(offset + 16, 16).map_err(ReadError::from)?;
        let addr = stream.peek_u64(offset + 32).map_err(ReadError::from)?;
        let size = stream.peek_u64(offset + 40).map_err(ReadError::from)?;
        let file_offset = stream.peek_u32(offset + 48).map_err(ReadError::from)?;
        let align = stream.peek_u32(offset + 52).map_err(ReadError::from)?;
        let reloff = stream.peek_u32(offset + 56).map_err(ReadError::from)?;
        let nreloc = stream.peek_u32(offset + 60).map_err(ReadError::from)?;
        let raw_flags = stream.peek_u32(offset + 64).map_err(ReadError::from)?;
        let reserved1 = stream.peek_u32(offset + 68).map_err(ReadError::from)?;
        let reserved2 = stream.peek_u32(offset + 72).map_err(ReadError::from)?;

        Ok(SectionRecord {
            sectname,
            segname,
            addr,
            size,
            offset: file_offset,
            align,
            reloff,
            nreloc,
            sectype: (raw_flags & SECTION_TYPE_MASK) as u8,
            attributes: SectionAttributes::from_bits_truncate(raw_flags & SECTION_ATTRIBUTES_MASK),
            reserved1,
            reserved2,
        })
    }
}

/// Decodes `count` section records of the given width, starting right after
/// the segment command header at `offset`.
pub fn decode_sections(
    stream: &ByteStream,
    offset: usize,
    count: u32,
    is_64: bool,
) -> Result<Vec<SectionRecord>> {
    let stride = if is_64 {
        SectionRecord::SIZE_64
    } else {
        SectionRecord::SIZE_32
    };
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let at = offset + i * stride;
        let rec = if is_64 {
            SectionRecord::decode_64(stream, at)
        } else {
            SectionRecord::decode_32(stream, at)
        }
        .map_err(|e| match e {
            BinError::Read(r) => BinError::corrupted(format!(
                "declared section count {count} exceeds buffer: {r}"
            )),
            other => other,
        })?;
        out.push(rec);
    }
    Ok(out)
}
