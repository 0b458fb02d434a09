//! TLS directory (spec §4.7): template copy bounded by `MAX_DATA_SIZE`,
//! callback walk bounded by `MAX_TLS_CALLBACKS`.

use crate::error::Result;
use crate::limits::{MAX_DATA_SIZE, MAX_TLS_CALLBACKS};
use crate::pe::directories::rva_to_offset;
use crate::pe::section::SectionHeader;
use crate::stream::ByteStream;

#[derive(Debug, Clone, Default)]
pub struct TlsDirectory {
    pub template: Vec<u8>,
    pub callbacks: Vec<u32>,
    pub characteristics: u32,
}

/// Decodes the TLS directory at `offset`; `image_base`/pointer width come
/// from the optional header so VA-relative fields can be turned into RVAs.
pub fn parse_tls(
    stream: &ByteStream,
    sections: &[SectionHeader],
    offset: usize,
    image_base: u64,
    is_64: bool,
) -> Result<TlsDirectory> {
    let ptr_width = if is_64 { 8usize } else { 4 };
    let (start_va, end_va, callbacks_va, _size_of_zero_fill, characteristics) = if is_64 {
        (
            stream.peek_u64(offset)?,
            stream.peek_u64(offset + 8)?,
            stream.peek_u64(offset + 16)?,
            stream.peek_u32(offset + 32)?,
            stream.peek_u32(offset + 36)?,
        )
    } else {
        (
            stream.peek_u32(offset)? as u64,
            stream.peek_u32(offset + 4)? as u64,
            stream.peek_u32(offset + 8)? as u64,
            stream.peek_u32(offset + 20)?,
            stream.peek_u32(offset + 24)?,
        )
    };

    let mut tls = TlsDirectory {
        characteristics,
        ..Default::default()
    };

    if start_va >= image_base && end_va > start_va {
        let template_rva = (start_va - image_base) as u32;
        let len = (end_va - start_va) as usize;
        match rva_to_offset(sections, template_rva) {
            Ok(raw_offset) if len <= MAX_DATA_SIZE => {
                if let Ok(bytes) = stream.peek_bytes(raw_offset as usize, len) {
                    tls.template = bytes.to_vec();
                } else {
                    log::warn!("tls: template of len {len} runs past the buffer");
                }
            }
            Ok(_) => {
                log::debug!("tls: template of len {len} exceeds MAX_DATA_SIZE, skipping");
            }
            Err(e) => log::warn!("tls: template rva {template_rva:#x} unresolved: {e}"),
        }
    }

    if callbacks_va > image_base {
        let callbacks_rva = (callbacks_va - image_base) as u32;
        match rva_to_offset(sections, callbacks_rva) {
            Ok(base_offset) => {
                let mut idx = 0usize;
                while idx < MAX_TLS_CALLBACKS {
                    let slot = base_offset as usize + idx * ptr_width;
                    let value = if is_64 {
                        stream.peek_u64(slot).unwrap_or(0)
                    } else {
                        stream.peek_u32(slot).unwrap_or(0) as u64
                    };
                    if value == 0 {
                        break;
                    }
                    tls.callbacks.push((value - image_base) as u32);
                    idx += 1;
                }
            }
            Err(e) => log::warn!("tls: callbacks rva {callbacks_rva:#x} unresolved: {e}"),
        }
    }

    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_section() -> SectionHeader {
        SectionHeader {
            name: ".tls".into(),
            virtual_size: 0x10000,
            virtual_address: 0,
            size_of_raw_data: 0x10000,
            pointer_to_raw_data: 0,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: Default::default(),
            semantic_kinds: Vec::new(),
        }
    }

    const IMAGE_BASE: u64 = 0x1_4000_0000;

    #[test]
    fn decodes_template_and_callbacks() {
        let mut buf = vec![0u8; 0x2000];
        let start = IMAGE_BASE + 0x100;
        let end = IMAGE_BASE + 0x110;
        buf[0..8].copy_from_slice(&start.to_le_bytes());
        buf[8..16].copy_from_slice(&end.to_le_bytes());
        let callbacks_va = IMAGE_BASE + 0x200;
        buf[16..24].copy_from_slice(&callbacks_va.to_le_bytes());

        buf[0x200..0x208].copy_from_slice(&(IMAGE_BASE + 0x1000).to_le_bytes());
        buf[0x208..0x210].copy_from_slice(&(IMAGE_BASE + 0x1010).to_le_bytes());
        // zero terminator already present at 0x210..0x218

        let s = ByteStream::new(&buf);
        let sections = vec![flat_section()];
        let tls = parse_tls(&s, &sections, 0, IMAGE_BASE, true).unwrap();
        assert_eq!(tls.template.len(), 0x10);
        assert_eq!(tls.callbacks, vec![0x1000, 0x1010]);
    }

    /// Boundary behavior 9: oversize template -> empty template, no panic.
    #[test]
    fn oversize_template_yields_empty_template() {
        let mut buf = vec![0u8; 0x40];
        let start = IMAGE_BASE;
        let end = IMAGE_BASE + MAX_DATA_SIZE as u64 + 1;
        buf[0..8].copy_from_slice(&start.to_le_bytes());
        buf[8..16].copy_from_slice(&end.to_le_bytes());
        let s = ByteStream::new(&buf);
        let sections = vec![flat_section()];
        let tls = parse_tls(&s, &sections, 0, IMAGE_BASE, true).unwrap();
        assert!(tls.template.is_empty());
    }

    /// Boundary behavior 10: no zero terminator -> exactly MAX_TLS_CALLBACKS.
    #[test]
    fn unterminated_callback_list_is_capped() {
        let mut buf = vec![0u8; 32 + (MAX_TLS_CALLBACKS + 8) * 8];
        let callbacks_va = IMAGE_BASE + 32;
        buf[16..24].copy_from_slice(&callbacks_va.to_le_bytes());
        for i in 0..(MAX_TLS_CALLBACKS + 8) {
            let v = IMAGE_BASE + 0x1000 + i as u64;
            let at = 32 + i * 8;
            buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
        }
        let s = ByteStream::new(&buf);
        let sections = vec![flat_section()];
        let tls = parse_tls(&s, &sections, 0, IMAGE_BASE, true).unwrap();
        assert_eq!(tls.callbacks.len(), MAX_TLS_CALLBACKS);
    }
}
