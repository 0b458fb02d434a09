//! `WIN_CERTIFICATE` (spec §4.12). The Security directory's `RVA` is
//! actually a raw file offset, not relocatable -- unique among the sixteen
//! data directories. This crate only locates and extracts the opaque blob;
//! it never parses ASN.1/PKCS#7 or verifies the signature (Non-goal, §1).

use crate::error::{BinError, Result};
use crate::stream::ByteStream;

#[derive(Debug, Clone)]
pub struct Certificate {
    pub revision: u16,
    pub certificate_type: u16,
    pub data: Vec<u8>,
}

/// `directory_rva` here is the raw file offset despite the field's usual
/// name (spec §4.12). `directory_size` is the declared header `length`,
/// checked against the buffer before the blob is copied out.
pub fn parse_signature(stream: &ByteStream, file_offset: usize) -> Result<Certificate> {
    let length = stream.peek_u32(file_offset)?;
    let revision = stream.peek_u16(file_offset + 4)?;
    let certificate_type = stream.peek_u16(file_offset + 6)?;

    if (length as usize) < 8 {
        return Err(BinError::corrupted("WIN_CERTIFICATE length smaller than header"));
    }
    let data = stream
        .peek_bytes(file_offset + 8, length as usize - 8)
        .map_err(|e| BinError::corrupted(format!("certificate blob runs past buffer: {e}")))?
        .to_vec();

    Ok(Certificate {
        revision,
        certificate_type,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_opaque_blob() {
        let mut buf = vec![0u8; 32];
        buf[0..4].copy_from_slice(&16u32.to_le_bytes());
        buf[4..6].copy_from_slice(&0x0200u16.to_le_bytes());
        buf[6..8].copy_from_slice(&2u16.to_le_bytes()); // WIN_CERT_TYPE_PKCS_SIGNED_DATA
        buf[8..16].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 1, 2, 3, 4]);

        let s = ByteStream::new(&buf);
        let cert = parse_signature(&s, 0).unwrap();
        assert_eq!(cert.certificate_type, 2);
        assert_eq!(cert.data, vec![0xDE, 0xAD, 0xBE, 0xEF, 1, 2, 3, 4]);
    }

    /// length running past the buffer is a warning at the call site; here it
    /// surfaces as an error the driver converts with `warn_and_continue`.
    #[test]
    fn oversize_length_is_an_error() {
        let mut buf = vec![0u8; 16];
        buf[0..4].copy_from_slice(&1000u32.to_le_bytes());
        let s = ByteStream::new(&buf);
        assert!(parse_signature(&s, 0).is_err());
    }
}
