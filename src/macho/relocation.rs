//! Mach-O relocation entries (`struct relocation_info` from `reloc.h`).
//!
//! Stored inside a Segment as an ordered set (spec §3) so iteration is
//! deterministic regardless of insertion order; ordered by `(address,
//! symbolnum)`, which is a total order since no two relocations legitimately
//! share both.

use crate::error::{ReadError, Result};
use crate::stream::ByteStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relocation {
    pub address: i32,
    pub symbolnum: u32,
    pub pcrel: bool,
    pub length: u8,
    pub is_extern: bool,
    pub rtype: u8,
}

impl PartialOrd for Relocation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Relocation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.address, self.symbolnum).cmp(&(other.address, other.symbolnum))
    }
}

impl Relocation {
    pub const SIZE: usize = 8;

    /// Decodes one 8-byte `relocation_info` record: a plain `i32` address
    /// followed by a packed bitfield word (`symbolnum:24, pcrel:1, length:2,
    /// extern:1, type:4`).
    pub fn decode(stream: &ByteStream, offset: usize) -> Result<Self> {
        let address = stream.peek_u32(offset).map_err(ReadError::from)? as i32;
        let packed = stream.peek_u32(offset + 4).map_err(ReadError::from)?;
        Ok(Relocation {
            address,
            symbolnum: packed & 0x00FF_FFFF,
            pcrel: (packed >> 24) & 0x1 != 0,
            length: ((packed >> 25) & 0x3) as u8,
            is_extern: (packed >> 27) & 0x1 != 0,
            rtype: ((packed >> 28) & 0xF) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_unpacks_bitfield_in_order() {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&100i32.to_le_bytes());
        // symbolnum=5, pcrel=1, length=2, extern=1, type=3
        let packed: u32 = 5 | (1 << 24) | (2 << 25) | (1 << 27) | (3 << 28);
        buf[4..8].copy_from_slice(&packed.to_le_bytes());
        let s = ByteStream::new(&buf);
        let r = Relocation::decode(&s, 0).unwrap();
        assert_eq!(r.address, 100);
        assert_eq!(r.symbolnum, 5);
        assert!(r.pcrel);
        assert_eq!(r.length, 2);
        assert!(r.is_extern);
        assert_eq!(r.rtype, 3);
    }

    #[test]
    fn ordering_is_by_address_then_symbolnum() {
        let a = Relocation {
            address: 0,
            symbolnum: 9,
            pcrel: false,
            length: 0,
            is_extern: false,
            rtype: 0,
        };
        let b = Relocation {
            address: 0,
            symbolnum: 10,
            pcrel: false,
            length: 0,
            is_extern: false,
            rtype: 0,
        };
        let c = Relocation {
            address: 1,
            symbolnum: 0,
            pcrel: false,
            length: 0,
            is_extern: false,
            rtype: 0,
        };
        assert!(a < b);
        assert!(b < c);
    }
}
