//! ## Hunk maps
//!
//! The map tells where each hunk lives and how it is coded.  Versions 3 and 4 use
//! a flat table of 16-byte entries followed by a cookie.  Version 5 uses either a
//! table of 32-bit block numbers (uncompressed images) or a Huffman coded map
//! with run-length compressed types, which is what MAME writes for compressed images.

use log::{debug,trace,warn};
use num_traits::FromPrimitive;
use num_derive::FromPrimitive;
use super::huffman::{BitReader,BitWriter,HuffmanDecoder,HuffmanEncoder,NUM_CODES};
use crate::img;
use crate::img::crc::crc16;
use crate::DYNERR;

pub const V4_ENTRY_LEN: usize = 16;
pub const END_OF_LIST_COOKIE: &[u8;16] = b"EndOfListCookie\0";
const V4_FLAG_NO_CRC: u8 = 0x10;

/// v3/v4 map entry types, low nibble of the flags byte
#[derive(FromPrimitive,Clone,Copy)]
enum V4EntryType {
    Compressed = 1,
    Uncompressed = 2,
    Mini = 3,
    SelfHunk = 4,
    ParentHunk = 5
}

const V5_MAP_HEADER_LEN: usize = 16;
const V5_RAW_ENTRY_LEN: usize = 12;
/// v5 codec slots are types 0 through 3
const COMPRESSION_NONE: u8 = 4;
const COMPRESSION_SELF: u8 = 5;
const COMPRESSION_PARENT: u8 = 6;
const COMPRESSION_RLE_SMALL: u8 = 7;
const COMPRESSION_RLE_LARGE: u8 = 8;
const COMPRESSION_SELF_0: u8 = 9;
const COMPRESSION_SELF_1: u8 = 10;
const COMPRESSION_PARENT_SELF: u8 = 11;
const COMPRESSION_PARENT_0: u8 = 12;
const COMPRESSION_PARENT_1: u8 = 13;
const MAX_RLE_COUNT: usize = 3 + 16 + 255;

/// How a hunk is stored.  CRCs are CRC-32 for v3/v4 and CRC-16 for v5,
/// both computed over the uncompressed hunk.
#[derive(Clone,Copy,Debug,PartialEq)]
pub enum Hunk {
    /// compressed with the codec in `slot` (always 0 for v3/v4)
    Codec { slot: u8, offset: u64, length: u32, crc: Option<u32> },
    /// stored verbatim, `hunk_bytes` long
    Stored { offset: u64, crc: Option<u32> },
    /// v3/v4 only, an 8-byte pattern repeated
    Mini { pattern: u64, crc: Option<u32> },
    /// never written, reads as zeros
    Zero,
    /// same data as an earlier hunk
    Mirror { hunk: u64, crc: Option<u32> },
    /// data lives in a parent image, in units of `unit_bytes`
    Parent { unit: u64 }
}

fn be_u64(b: &[u8]) -> u64 {
    b.iter().fold(0u64,|acc,x| (acc << 8) | *x as u64)
}

/// Count of bits needed to hold `val`
fn bits_for_value(mut val: u64) -> u8 {
    let mut ans = 0;
    while val!=0 {
        val >>= 1;
        ans += 1;
    }
    ans
}

/// End of a table of `hunks` entries starting at `start`, a table that would overrun
/// the address space is reported as truncated rather than computed
fn map_end(start: usize,hunks: usize,entry_len: usize,found: usize) -> Result<usize,DYNERR> {
    match hunks.checked_mul(entry_len).and_then(|n| n.checked_add(start)) {
        Some(end) => Ok(end),
        None => Err(Box::new(img::Error::Truncated { needed: usize::MAX, found }))
    }
}

/// Parse a v3 or v4 map, which begins right after the header
pub fn read_v4_map(buf: &[u8],start: usize,hunks: usize) -> Result<Vec<Hunk>,DYNERR> {
    let end = map_end(start,hunks,V4_ENTRY_LEN,buf.len())?;
    if end > buf.len() {
        return Err(Box::new(img::Error::Truncated { needed: end, found: buf.len() }));
    }
    let mut ans = Vec::with_capacity(hunks);
    for i in 0..hunks {
        let e = &buf[start + i*V4_ENTRY_LEN..start + (i+1)*V4_ENTRY_LEN];
        let offset = be_u64(&e[0..8]);
        let flags = e[15];
        let crc = match flags & V4_FLAG_NO_CRC {
            0 => Some(u32::from_be_bytes([e[8],e[9],e[10],e[11]])),
            _ => None
        };
        let length = u32::from_be_bytes([0,e[14],e[12],e[13]]);
        ans.push(match V4EntryType::from_u8(flags & 0x0f) {
            Some(V4EntryType::Compressed) => Hunk::Codec { slot: 0, offset, length, crc },
            Some(V4EntryType::Uncompressed) => Hunk::Stored { offset, crc },
            Some(V4EntryType::Mini) => Hunk::Mini { pattern: offset, crc },
            Some(V4EntryType::SelfHunk) => Hunk::Mirror { hunk: offset, crc },
            Some(V4EntryType::ParentHunk) => Hunk::Parent { unit: offset },
            None => {
                debug!("hunk {} has map type {}",i,flags & 0x0f);
                return Err(Box::new(img::Error::BadField { field: "map entry type".to_string(), offset: start + i*V4_ENTRY_LEN + 15 }));
            }
        });
    }
    if end + END_OF_LIST_COOKIE.len() > buf.len() || &buf[end..end+END_OF_LIST_COOKIE.len()]!=END_OF_LIST_COOKIE {
        warn!("map is not followed by the end of list cookie");
    }
    Ok(ans)
}

/// Serialize a v4 map including the trailing cookie.  Zero hunks must have been
/// converted to mini hunks by the caller.
pub fn write_v4_map(map: &[Hunk],hunk_bytes: u32) -> Result<Vec<u8>,DYNERR> {
    let mut ans = Vec::with_capacity(map.len()*V4_ENTRY_LEN + END_OF_LIST_COOKIE.len());
    for hunk in map {
        let (typ,offset,length,crc) = match *hunk {
            Hunk::Codec { offset, length, crc, .. } => (V4EntryType::Compressed,offset,length,crc),
            Hunk::Stored { offset, crc } => (V4EntryType::Uncompressed,offset,hunk_bytes,crc),
            Hunk::Mini { pattern, crc } => (V4EntryType::Mini,pattern,0,crc),
            Hunk::Mirror { hunk, crc } => (V4EntryType::SelfHunk,hunk,0,crc),
            Hunk::Parent { unit } => (V4EntryType::ParentHunk,unit,0,None),
            Hunk::Zero => return Err(Box::new(img::Error::Structure("zero hunk in v4 map".to_string())))
        };
        let flags = match crc {
            Some(_) => typ as u8,
            None => typ as u8 | V4_FLAG_NO_CRC
        };
        ans.extend_from_slice(&offset.to_be_bytes());
        ans.extend_from_slice(&crc.unwrap_or(0).to_be_bytes());
        ans.extend_from_slice(&(length as u16).to_be_bytes());
        ans.push((length >> 16) as u8);
        ans.push(flags);
    }
    ans.extend_from_slice(END_OF_LIST_COOKIE);
    Ok(ans)
}

/// Parse the v5 map of an uncompressed image, each entry is a block number in units of `hunk_bytes`
pub fn read_v5_raw_map(buf: &[u8],map_offset: usize,hunks: usize,hunk_bytes: u32) -> Result<Vec<Hunk>,DYNERR> {
    let end = map_end(map_offset,hunks,4,buf.len())?;
    if end > buf.len() {
        return Err(Box::new(img::Error::Truncated { needed: end, found: buf.len() }));
    }
    Ok(buf[map_offset..end].chunks(4).map(|e| {
        match u32::from_be_bytes([e[0],e[1],e[2],e[3]]) {
            0 => Hunk::Zero,
            block => Hunk::Stored { offset: block as u64 * hunk_bytes as u64, crc: None }
        }
    }).collect())
}

/// Serialize the v5 map of an uncompressed image, stored hunks must be block aligned
pub fn write_v5_raw_map(map: &[Hunk],hunk_bytes: u32) -> Result<Vec<u8>,DYNERR> {
    let mut ans = Vec::with_capacity(map.len()*4);
    for hunk in map {
        let block = match hunk {
            Hunk::Zero => 0,
            Hunk::Stored { offset, .. } if offset % hunk_bytes as u64 == 0 => offset / hunk_bytes as u64,
            _ => return Err(Box::new(img::Error::Structure("uncompressed v5 map can only hold aligned hunks".to_string())))
        };
        ans.extend_from_slice(&(block as u32).to_be_bytes());
    }
    Ok(ans)
}

/// 12-byte expanded entry, the form covered by the map CRC
fn raw_entry(typ: u8,length: u32,offset: u64,crc: u16) -> [u8;V5_RAW_ENTRY_LEN] {
    let mut ans = [0u8;V5_RAW_ENTRY_LEN];
    ans[0] = typ;
    ans[1..4].copy_from_slice(&length.to_be_bytes()[1..4]);
    ans[4..10].copy_from_slice(&offset.to_be_bytes()[2..8]);
    ans[10..12].copy_from_slice(&crc.to_be_bytes());
    ans
}

/// Parse a compressed v5 map located at `map_offset`
pub fn read_v5_map(buf: &[u8],map_offset: usize,hunks: usize,hunk_bytes: u32,unit_bytes: u32) -> Result<Vec<Hunk>,DYNERR> {
    let start = map_end(map_offset,1,V5_MAP_HEADER_LEN,buf.len())?;
    if start > buf.len() {
        return Err(Box::new(img::Error::Truncated { needed: start, found: buf.len() }));
    }
    let hdr = &buf[map_offset..map_offset + V5_MAP_HEADER_LEN];
    let map_bytes = u32::from_be_bytes([hdr[0],hdr[1],hdr[2],hdr[3]]) as usize;
    let first_offs = be_u64(&hdr[4..10]);
    let map_crc = u16::from_be_bytes([hdr[10],hdr[11]]);
    let length_bits = hdr[12] as usize;
    let self_bits = hdr[13] as usize;
    let parent_bits = hdr[14] as usize;
    if start + map_bytes > buf.len() {
        return Err(Box::new(img::Error::Truncated { needed: start + map_bytes, found: buf.len() }));
    }
    // each coded symbol covers at most one full run of hunks
    if hunks / MAX_RLE_COUNT > map_bytes*8 {
        return Err(Box::new(img::Error::BadField { field: format!("hunk count {} for a {} byte map",hunks,map_bytes), offset: map_offset }));
    }
    let mut bits = BitReader::new(&buf[start..start + map_bytes]);
    let decoder = HuffmanDecoder::import_tree_rle(&mut bits)?;
    // first pass recovers the types
    let mut types: Vec<u8> = Vec::new();
    let mut lastcomp: u8 = 0;
    let mut repcount: usize = 0;
    for _i in 0..hunks {
        if bits.overflow() {
            return Err(Box::new(img::Error::Truncated { needed: start + map_bytes + 1, found: start + map_bytes }));
        }
        if repcount > 0 {
            types.push(lastcomp);
            repcount -= 1;
            continue;
        }
        let val = decoder.decode_one(&mut bits)?;
        if val==COMPRESSION_RLE_SMALL {
            types.push(lastcomp);
            repcount = 2 + decoder.decode_one(&mut bits)? as usize;
        } else if val==COMPRESSION_RLE_LARGE {
            types.push(lastcomp);
            repcount = 2 + 16 + ((decoder.decode_one(&mut bits)? as usize) << 4);
            repcount += decoder.decode_one(&mut bits)? as usize;
        } else {
            types.push(val);
            lastcomp = val;
        }
    }
    // second pass recovers lengths, offsets, and CRCs
    let mut ans = Vec::with_capacity(types.len());
    let mut rawmap: Vec<u8> = Vec::with_capacity(types.len()*V5_RAW_ENTRY_LEN);
    let mut curoffset = first_offs;
    let mut last_self: u64 = 0;
    let mut last_parent: u64 = 0;
    let units_per_hunk = (hunk_bytes / unit_bytes) as u64;
    for (hunknum,typ) in types.iter().enumerate() {
        let (raw_type,length,offset,crc,hunk) = match *typ {
            slot @ 0..=3 => {
                let length = bits.read(length_bits);
                let crc = bits.read(16) as u16;
                let offset = curoffset;
                curoffset = curoffset.saturating_add(length as u64);
                (slot,length,offset,crc,Hunk::Codec { slot, offset, length, crc: Some(crc as u32) })
            },
            COMPRESSION_NONE => {
                let crc = bits.read(16) as u16;
                let offset = curoffset;
                curoffset = curoffset.saturating_add(hunk_bytes as u64);
                (COMPRESSION_NONE,hunk_bytes,offset,crc,Hunk::Stored { offset, crc: Some(crc as u32) })
            },
            COMPRESSION_SELF => {
                last_self = bits.read_u64(self_bits);
                (COMPRESSION_SELF,0,last_self,0,Hunk::Mirror { hunk: last_self, crc: None })
            },
            COMPRESSION_SELF_0 | COMPRESSION_SELF_1 => {
                if *typ==COMPRESSION_SELF_1 {
                    last_self = last_self.wrapping_add(1);
                }
                (COMPRESSION_SELF,0,last_self,0,Hunk::Mirror { hunk: last_self, crc: None })
            },
            COMPRESSION_PARENT => {
                last_parent = bits.read_u64(parent_bits);
                (COMPRESSION_PARENT,0,last_parent,0,Hunk::Parent { unit: last_parent })
            },
            COMPRESSION_PARENT_SELF => {
                last_parent = hunknum as u64 * hunk_bytes as u64 / unit_bytes as u64;
                (COMPRESSION_PARENT,0,last_parent,0,Hunk::Parent { unit: last_parent })
            },
            COMPRESSION_PARENT_0 | COMPRESSION_PARENT_1 => {
                if *typ==COMPRESSION_PARENT_1 {
                    last_parent = last_parent.wrapping_add(units_per_hunk);
                }
                (COMPRESSION_PARENT,0,last_parent,0,Hunk::Parent { unit: last_parent })
            },
            t => {
                debug!("hunk {} has map type {}",hunknum,t);
                return Err(Box::new(img::Error::BadField { field: "compressed map type".to_string(), offset: start }));
            }
        };
        rawmap.extend_from_slice(&raw_entry(raw_type,length,offset,crc));
        ans.push(hunk);
    }
    if bits.overflow() {
        return Err(Box::new(img::Error::Truncated { needed: start + map_bytes + 1, found: start + map_bytes }));
    }
    if crc16(0xffff,&rawmap)!=map_crc {
        return Err(Box::new(img::Error::BadField { field: "map CRC".to_string(), offset: map_offset + 10 }));
    }
    trace!("decoded map of {} hunks from {} bytes",hunks,map_bytes);
    Ok(ans)
}

/// Push the type stream with run-length coding of repeats
fn flush_repeats(syms: &mut Vec<u8>,lastcomp: u8,mut count: usize) {
    while count > 0 {
        if count < 3 {
            syms.push(lastcomp);
            count -= 1;
        } else if count <= 3 + 15 {
            syms.push(COMPRESSION_RLE_SMALL);
            syms.push((count - 3) as u8);
            count = 0;
        } else {
            let this_count = usize::min(count,MAX_RLE_COUNT);
            syms.push(COMPRESSION_RLE_LARGE);
            syms.push(((this_count - 3 - 16) >> 4) as u8);
            syms.push(((this_count - 3 - 16) & 15) as u8);
            count -= this_count;
        }
    }
}

/// Serialize a compressed v5 map.  Codec and stored hunks must be laid out
/// back to back in hunk order, since the map only records where the first one starts.
pub fn write_v5_map(map: &[Hunk],hunk_bytes: u32,unit_bytes: u32) -> Result<Vec<u8>,DYNERR> {
    let mut rawmap: Vec<u8> = Vec::with_capacity(map.len()*V5_RAW_ENTRY_LEN);
    let mut types: Vec<u8> = Vec::with_capacity(map.len());
    let mut first_offs: Option<u64> = None;
    // relative to first_offs
    let mut curoffset: u64 = 0;
    let mut max_complen: u64 = 0;
    let mut max_self: u64 = 0;
    let mut max_parent: u64 = 0;
    let mut last_self: u64 = 0;
    let mut last_parent: u64 = 0;
    let units_per_hunk = (hunk_bytes / unit_bytes) as u64;
    for (hunknum,hunk) in map.iter().enumerate() {
        let (raw_type,length,offset,crc) = match *hunk {
            Hunk::Codec { slot, offset, length, crc } => (slot,length,offset,crc.unwrap_or(0) as u16),
            Hunk::Stored { offset, crc } => (COMPRESSION_NONE,hunk_bytes,offset,crc.unwrap_or(0) as u16),
            Hunk::Mirror { hunk, .. } => (COMPRESSION_SELF,0,hunk,0),
            Hunk::Parent { unit } => (COMPRESSION_PARENT,0,unit,0),
            _ => return Err(Box::new(img::Error::Structure("v5 map cannot hold zero or mini hunks".to_string())))
        };
        rawmap.extend_from_slice(&raw_entry(raw_type,length,offset,crc));
        let curcomp = match raw_type {
            0..=COMPRESSION_NONE => {
                let base = *first_offs.get_or_insert(offset);
                if offset!=base + curoffset {
                    return Err(Box::new(img::Error::Structure(format!("hunk {} is out of sequence",hunknum))));
                }
                curoffset += length as u64;
                max_complen = u64::max(max_complen,length as u64);
                raw_type
            },
            COMPRESSION_SELF => {
                let ans = if offset==last_self {
                    COMPRESSION_SELF_0
                } else if offset==last_self + 1 {
                    COMPRESSION_SELF_1
                } else {
                    max_self = u64::max(max_self,offset);
                    COMPRESSION_SELF
                };
                last_self = offset;
                ans
            },
            _ => {
                let ans = if offset==hunknum as u64 * hunk_bytes as u64 / unit_bytes as u64 {
                    COMPRESSION_PARENT_SELF
                } else if offset==last_parent {
                    COMPRESSION_PARENT_0
                } else if offset==last_parent + units_per_hunk {
                    COMPRESSION_PARENT_1
                } else {
                    max_parent = u64::max(max_parent,offset);
                    COMPRESSION_PARENT
                };
                last_parent = offset;
                ans
            }
        };
        types.push(curcomp);
    }
    // type stream with runs folded
    let mut syms: Vec<u8> = Vec::new();
    let mut lastcomp: u8 = 0;
    let mut count: usize = 0;
    for curcomp in &types {
        if *curcomp==lastcomp {
            count += 1;
        } else {
            flush_repeats(&mut syms,lastcomp,count);
            count = 0;
            syms.push(*curcomp);
            lastcomp = *curcomp;
        }
    }
    flush_repeats(&mut syms,lastcomp,count);
    let mut histo = [0u32;NUM_CODES];
    for sym in &syms {
        histo[*sym as usize] += 1;
    }
    let encoder = HuffmanEncoder::from_histogram(&histo)?;
    let mut bits = BitWriter::new();
    encoder.export_tree_rle(&mut bits);
    for sym in &syms {
        encoder.encode_one(&mut bits,*sym)?;
    }
    let length_bits = bits_for_value(max_complen);
    let self_bits = bits_for_value(max_self);
    let parent_bits = bits_for_value(max_parent);
    for (i,curcomp) in types.iter().enumerate() {
        let e = &rawmap[i*V5_RAW_ENTRY_LEN..(i+1)*V5_RAW_ENTRY_LEN];
        let length = u32::from_be_bytes([0,e[1],e[2],e[3]]);
        let offset = be_u64(&e[4..10]);
        let crc = u16::from_be_bytes([e[10],e[11]]);
        match *curcomp {
            0..=3 => {
                bits.write(length,length_bits as usize);
                bits.write(crc as u32,16);
            },
            COMPRESSION_NONE => bits.write(crc as u32,16),
            COMPRESSION_SELF => bits.write_u64(offset,self_bits as usize),
            COMPRESSION_PARENT => bits.write_u64(offset,parent_bits as usize),
            _ => {}
        }
    }
    let compressed = bits.finish();
    let mut ans = Vec::with_capacity(V5_MAP_HEADER_LEN + compressed.len());
    ans.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    ans.extend_from_slice(&first_offs.unwrap_or(0).to_be_bytes()[2..8]);
    ans.extend_from_slice(&crc16(0xffff,&rawmap).to_be_bytes());
    ans.push(length_bits);
    ans.push(self_bits);
    ans.push(parent_bits);
    ans.push(0);
    ans.extend_from_slice(&compressed);
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_entries() {
        let map = vec![
            Hunk::Codec { slot: 0, offset: 0x1000, length: 0x1234, crc: Some(0xdeadbeef) },
            Hunk::Stored { offset: 0x3000, crc: Some(5) },
            Hunk::Mini { pattern: 0x0102030405060708, crc: None },
            Hunk::Mirror { hunk: 1, crc: Some(5) }
        ];
        let mut buf = vec![0u8;8];
        buf.append(&mut write_v4_map(&map,4096).unwrap());
        assert_eq!(buf.len(),8 + 4*16 + 16);
        assert_eq!(read_v4_map(&buf,8,4).unwrap(),map);
    }

    #[test]
    fn v5_runs_and_references() {
        let mut map = Vec::new();
        let mut offset = 500;
        for i in 0..40 {
            map.push(Hunk::Codec { slot: 0, offset, length: 100 + i, crc: Some(i) });
            offset += 100 + i as u64;
        }
        // long run of references to hunk 0, then a sequential run
        for _i in 0..300 {
            map.push(Hunk::Mirror { hunk: 0, crc: None });
        }
        for i in 3..10 {
            map.push(Hunk::Mirror { hunk: i, crc: None });
        }
        map.push(Hunk::Stored { offset, crc: Some(0xbeef) });
        let mut buf = vec![0u8;32];
        buf.append(&mut write_v5_map(&map,4096,256).unwrap());
        assert_eq!(read_v5_map(&buf,32,map.len(),4096,256).unwrap(),map);
    }

    #[test]
    fn v5_out_of_sequence() {
        let map = vec![
            Hunk::Codec { slot: 0, offset: 500, length: 10, crc: Some(0) },
            Hunk::Codec { slot: 0, offset: 600, length: 10, crc: Some(0) }
        ];
        assert!(write_v5_map(&map,4096,256).is_err());
    }

    #[test]
    fn v5_corrupt_crc() {
        let map: Vec<Hunk> = (0..3).map(|i| Hunk::Stored { offset: 124 + i*4096, crc: Some(1) }).collect();
        let mut buf = write_v5_map(&map,4096,256).unwrap();
        buf[10] ^= 0xff;
        assert!(read_v5_map(&buf,0,3,4096,256).is_err());
    }

    #[test]
    fn v5_uncompressed() {
        let map = vec![Hunk::Zero,Hunk::Stored { offset: 8192, crc: None },Hunk::Stored { offset: 4096, crc: None }];
        let raw = write_v5_raw_map(&map,4096).unwrap();
        assert_eq!(raw,vec![0,0,0,0,0,0,0,2,0,0,0,1]);
        assert_eq!(read_v5_raw_map(&raw,0,3,4096).unwrap(),map);
    }
}
