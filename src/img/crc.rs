//! Checksums shared by the track codecs and the CHD container.

/// CRC-16/CCITT as computed by the floppy controller over ID and data fields,
/// also used by MAME for v5 hunk and map checksums.  Seed with 0xffff.
pub fn crc16(crc_seed: u16, buf: &[u8]) -> u16 {
    let mut crc: u16 = crc_seed;
    for byte in buf {
        crc ^= (*byte as u16) << 8;
        for _bit in 0..8 {
            crc = (crc << 1) ^ match crc & 0x8000 { 0 => 0, _ => 0x1021 };
        }
    }
    crc
}

/// Standard CRC-32, used by CHD v3/v4 map entries
pub fn crc32(buf: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(buf);
    crc.sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_values() {
        assert_eq!(crc16(0xffff,b"123456789"),0x29b1);
        assert_eq!(crc32(b"123456789"),0xcbf43926);
    }

    #[test]
    fn id_field() {
        // FM ID field of track 0, head 0, sector 0, 256 bytes
        assert_eq!(crc16(0xffff,&[0xfe,0,0,0,1]),0xf1d3);
    }
}
