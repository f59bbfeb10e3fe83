//! BIOS image decoding.
//!
//! The decoders only ever see an image through [`BiosImage`], a bounded
//! byte reader, so a malformed table can at worst come back marked
//! invalid. Everything on the wire is little-endian.

pub mod dp;

/// Bounded byte access over a BIOS image. Reads return `None` instead
/// of panicking when the offset falls outside the image.
pub trait BiosImage {
    fn read_u8(&self, offset: u32) -> Option<u8>;

    /// Little-endian 16-bit read.
    fn read_u16(&self, offset: u32) -> Option<u16> {
        let lo = self.read_u8(offset)?;
        let hi = self.read_u8(offset.checked_add(1)?)?;
        Some(u16::from(hi) << 8 | u16::from(lo))
    }
}

impl BiosImage for [u8] {
    fn read_u8(&self, offset: u32) -> Option<u8> {
        self.get(offset as usize).copied()
    }
}

/// Framing descriptor locating one typed sub-table within the image:
/// where the entry itself sits and where its payload table lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitEntry {
    pub offset: u32,
    pub version: u8,
    pub t_offset: u32,
    pub t_len: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_reads_little_endian() {
        let image = [0x34u8, 0x12, 0xff];
        assert_eq!(image.read_u16(0), Some(0x1234));
        assert_eq!(image.read_u16(1), Some(0xff12));
    }

    #[test]
    fn reads_past_the_end_fail() {
        let image = [0u8; 4];
        assert_eq!(image.read_u8(3), Some(0));
        assert_eq!(image.read_u8(4), None);
        assert_eq!(image.read_u16(3), None);
        assert_eq!(image.read_u16(u32::MAX), None);
    }
}
