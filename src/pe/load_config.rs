//! Load configuration directory (spec §4.8): a versioned record whose exact
//! variant is picked by matching the on-disk declared `size` against a
//! monotone table of known struct sizes.

use crate::error::Result;
use crate::stream::ByteStream;

/// One fixed-layout load-config variant, identified by the struct size the
/// Windows SDK headers assign it. Versions only ever grow by appending
/// fields, so "largest known size <= declared size" picks the newest
/// variant the file actually has room for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadConfigVersion {
    Base,
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
}

#[derive(Debug, Clone)]
pub struct LoadConfiguration {
    pub version: LoadConfigVersion,
    pub size: u32,
    pub security_cookie: u64,
    pub se_handler_table: u64,
    pub se_handler_count: u64,
    pub guard_cf_check_function: u64,
    pub guard_cf_function_table: u64,
    pub guard_cf_function_count: u64,
    pub guard_flags: u32,
}

/// `(version, minimum struct size needed to read that version's fields)`,
/// sorted ascending -- 32-bit and 64-bit variants share the ordering, they
/// just differ in pointer width between real structs. Sizes here are
/// deliberately coarse bucket boundaries (not exact Windows SDK sizes) since
/// this crate only surfaces the fields above.
fn version_table(is_64: bool) -> &'static [(LoadConfigVersion, usize)] {
    if is_64 {
        &[
            (LoadConfigVersion::Base, 0),
            (LoadConfigVersion::V0, 0x48),
            (LoadConfigVersion::V1, 0x70),
            (LoadConfigVersion::V2, 0x94),
            (LoadConfigVersion::V3, 0xA4),
            (LoadConfigVersion::V4, 0xB4),
            (LoadConfigVersion::V5, 0xC8),
            (LoadConfigVersion::V6, 0xD8),
            (LoadConfigVersion::V7, 0xF0),
        ]
    } else {
        &[
            (LoadConfigVersion::Base, 0),
            (LoadConfigVersion::V0, 0x40),
            (LoadConfigVersion::V1, 0x58),
            (LoadConfigVersion::V2, 0x68),
            (LoadConfigVersion::V3, 0x70),
            (LoadConfigVersion::V4, 0x78),
            (LoadConfigVersion::V5, 0x90),
            (LoadConfigVersion::V6, 0x9C),
            (LoadConfigVersion::V7, 0xA4),
        ]
    }
}

fn select_version(declared_size: u32, is_64: bool) -> LoadConfigVersion {
    version_table(is_64)
        .iter()
        .rev()
        .find(|(_, min_size)| declared_size as usize >= *min_size)
        .map(|(v, _)| *v)
        .unwrap_or(LoadConfigVersion::Base)
}

/// Reads a `u64`-or-`u32` field depending on variant width, returning 0 when
/// `size` doesn't reach that offset (field simply absent in this variant).
fn field(stream: &ByteStream, offset: usize, at: usize, size: u32, is_64: bool) -> u64 {
    let width = if is_64 { 8 } else { 4 };
    if at + width > size as usize {
        return 0;
    }
    if is_64 {
        stream.peek_u64(offset + at).unwrap_or(0)
    } else {
        stream.peek_u32(offset + at).unwrap_or(0) as u64
    }
}

pub fn parse_load_config(stream: &ByteStream, offset: usize, is_64: bool) -> Result<LoadConfiguration> {
    let size = stream.peek_u32(offset)?;
    let version = select_version(size, is_64);

    // Fixed prefix shared by both widths up to SecurityCookie.
    let security_cookie_off = if is_64 { 0x58 } else { 0x44 };
    let se_handler_table_off = if is_64 { 0x70 } else { 0x58 };
    let se_handler_count_off = if is_64 { 0x78 } else { 0x5C };
    let guard_cf_check_off = if is_64 { 0x80 } else { 0x60 };
    let guard_cf_table_off = if is_64 { 0x88 } else { 0x64 };
    let guard_cf_count_off = if is_64 { 0x90 } else { 0x68 };
    let guard_flags_off = if is_64 { 0x98 } else { 0x6C };

    Ok(LoadConfiguration {
        version,
        size,
        security_cookie: field(stream, offset, security_cookie_off, size, is_64),
        se_handler_table: field(stream, offset, se_handler_table_off, size, is_64),
        se_handler_count: field(stream, offset, se_handler_count_off, size, is_64),
        guard_cf_check_function: field(stream, offset, guard_cf_check_off, size, is_64),
        guard_cf_function_table: field(stream, offset, guard_cf_table_off, size, is_64),
        guard_cf_function_count: field(stream, offset, guard_cf_count_off, size, is_64),
        guard_flags: field(stream, offset, guard_flags_off, size, is_64) as u32,
    })
}
