//! Debug directory (spec §4.10): an array of fixed 28-byte
//! `IMAGE_DEBUG_DIRECTORY` entries; `CODEVIEW` entries additionally decode
//! the `RSDS` PDB70 payload.

use crate::error::Result;
use crate::stream::ByteStream;

pub const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;
const ENTRY_SIZE: usize = 28;

#[derive(Debug, Clone)]
pub enum DebugPayload {
    CodeView {
        guid: [u8; 16],
        age: u32,
        pdb_path: String,
    },
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct DebugEntry {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub debug_type: u32,
    pub payload: DebugPayload,
}

/// Decodes `directory_size / 28` entries. A decode failure on one entry is a
/// warning that skips just that entry -- the fixed stride makes resync
/// trivial (spec §4.10).
pub fn parse_debug(stream: &ByteStream, offset: usize, directory_size: u32) -> Result<Vec<DebugEntry>> {
    let count = directory_size as usize / ENTRY_SIZE;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let at = offset + i * ENTRY_SIZE;
        match decode_entry(stream, at) {
            Ok(entry) => out.push(entry),
            Err(e) => log::warn!("debug: skipping entry {i}: {e}"),
        }
    }
    Ok(out)
}

fn decode_entry(stream: &ByteStream, at: usize) -> Result<DebugEntry> {
    let characteristics = stream.peek_u32(at)?;
    let time_date_stamp = stream.peek_u32(at + 4)?;
    let debug_type = stream.peek_u32(at + 12)?;
    let size_of_data = stream.peek_u32(at + 16)?;
    let pointer_to_raw_data = stream.peek_u32(at + 24)?;

    let payload = if debug_type == IMAGE_DEBUG_TYPE_CODEVIEW {
        decode_codeview(stream, pointer_to_raw_data as usize)
            .unwrap_or_else(|_| DebugPayload::Opaque(Vec::new()))
    } else {
        let bytes = stream
            .peek_bytes(pointer_to_raw_data as usize, size_of_data as usize)
            .unwrap_or(&[]);
        DebugPayload::Opaque(bytes.to_vec())
    };

    Ok(DebugEntry {
        characteristics,
        time_date_stamp,
        debug_type,
        payload,
    })
}

fn decode_codeview(stream: &ByteStream, offset: usize) -> Result<DebugPayload> {
    let signature = stream.peek_bytes(offset, 4)?;
    if signature != b"RSDS" {
        return Ok(DebugPayload::Opaque(Vec::new()));
    }
    let mut guid = [0u8; 16];
    stream.peek_data(&mut guid, offset + 4, 16)?;
    let age = stream.peek_u32(offset + 20)?;
    let pdb_path = stream.peek_string_at(offset + 24)?;
    Ok(DebugPayload::CodeView {
        guid,
        age,
        pdb_path,
    })
}
