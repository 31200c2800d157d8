//! Hunk codecs.  Only deflate is supported, which is what MAME calls `zlib`
//! (v5 tag `zlib`, v3/v4 compression types 1 and 2).  The stream is raw deflate,
//! there is no zlib header or trailer.

use std::io::{Read,Write};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use log::trace;
use crate::img;
use crate::DYNERR;

/// v5 compressor tag for deflate
pub const CHD_CODEC_ZLIB: u32 = u32::from_be_bytes(*b"zlib");
/// v3/v4 compression types
pub const V4_COMPRESSION_NONE: u32 = 0;
pub const V4_COMPRESSION_ZLIB: u32 = 1;
pub const V4_COMPRESSION_ZLIB_PLUS: u32 = 2;

/// printable form of a v5 codec tag
pub fn tag_string(tag: u32) -> String {
    match tag {
        0 => "none".to_string(),
        t => String::from_utf8_lossy(&t.to_be_bytes()).to_string()
    }
}

/// Inflate a hunk, the output must be exactly `hunk_bytes` long
pub fn inflate(hunk: usize,src: &[u8],hunk_bytes: usize) -> Result<Vec<u8>,DYNERR> {
    let mut decoder = DeflateDecoder::new(src);
    let mut ans = Vec::with_capacity(hunk_bytes);
    decoder.read_to_end(&mut ans).map_err(|e| img::Error::HunkDecompression { hunk, reason: e.to_string() })?;
    if ans.len()!=hunk_bytes {
        return Err(Box::new(img::Error::HunkDecompression { hunk, reason: format!("inflated to {} bytes, expected {}",ans.len(),hunk_bytes) }));
    }
    trace!("hunk {}: {} bytes -> {} bytes",hunk,src.len(),ans.len());
    Ok(ans)
}

/// Deflate a hunk at the best compression level
pub fn deflate(dat: &[u8]) -> Result<Vec<u8>,DYNERR> {
    let mut encoder = DeflateEncoder::new(Vec::new(),Compression::best());
    encoder.write_all(dat)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_then_inflate() {
        let mut dat = vec![0u8;4096];
        for i in 0..4096 {
            dat[i] = (i % 7) as u8;
        }
        let packed = deflate(&dat).unwrap();
        assert!(packed.len() < 4096);
        assert_eq!(inflate(0,&packed,4096).unwrap(),dat);
        assert!(inflate(0,&packed,512).is_err());
    }

    #[test]
    fn codec_tags() {
        assert_eq!(tag_string(CHD_CODEC_ZLIB),"zlib");
        assert_eq!(tag_string(0),"none");
    }
}
