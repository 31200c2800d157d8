//! ## Support for MAME compressed hunks of data (CHD)
//!
//! A CHD stores a hard disk as fixed size hunks, each of which can be compressed,
//! stored verbatim, or expressed as a reference to another hunk.  We read versions
//! 3, 4, and 5, and write versions 4 and 5.  Only the deflate codec is supported,
//! which covers the images produced for TI-99/4A hard disks.
//!
//! Hunks are decompressed on demand, and the most recent hunk is cached.
//! Sector writes go to an overlay of modified hunks, which is folded into a
//! freshly built CHD when the image is serialized.  An image that was never
//! modified serializes to its original bytes.
//!
//! A CHD that depends on a parent image is refused when opened.  A hunk that fails
//! to decompress, or fails its CRC, only fails reads that touch that hunk.

pub mod codec;
pub mod header;
pub mod huffman;
pub mod map;

use std::collections::HashMap;
use parking_lot::Mutex;
use sha1::{Sha1,Digest};
use log::{debug,info,warn,error};
use crate::img;
use crate::img::{Geometry,SECTOR_SIZE};
use crate::img::crc::{crc16,crc32};
use crate::{STDRESULT,DYNERR};
use header::{HeaderV3,HeaderV4,HeaderV5,MetaEntry};
use map::Hunk;

/// A map byte codes at most 8 symbols and a symbol covers at most 274 hunks
const MAX_HUNKS_PER_BYTE: usize = 8*274;

pub fn file_extensions() -> Vec<String> {
    vec!["chd".to_string()]
}

/// Parameters for building a CHD
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct ChdParams {
    pub version: u32,
    pub hunk_bytes: u32,
    pub compress: bool
}

impl Default for ChdParams {
    fn default() -> Self {
        Self { version: 5, hunk_bytes: 4096, compress: true }
    }
}

/// Overall SHA1 covers the raw SHA1 and every checksummed metadata entry, sorted
fn overall_sha1(raw_sha1: &[u8;20],metadata: &[MetaEntry]) -> [u8;20] {
    let mut entries: Vec<Vec<u8>> = metadata.iter().filter(|m| m.flags & header::MDFLAGS_CHECKSUM != 0).map(|m| {
        let mut ans = m.tag.to_be_bytes().to_vec();
        ans.extend_from_slice(&Sha1::digest(&m.data));
        ans
    }).collect();
    entries.sort();
    let mut hasher = Sha1::new();
    hasher.update(raw_sha1);
    for entry in entries {
        hasher.update(&entry);
    }
    hasher.finalize().into()
}

/// true if the hunk is one 8-byte pattern repeated
fn is_mini(dat: &[u8]) -> bool {
    dat.len() >= 8 && dat.chunks(8).all(|c| c==&dat[0..8])
}

/// Wrapper for CHD data.
pub struct Chd {
    version: u32,
    /// v3/v4 header flags
    flags: u32,
    /// v3/v4 compression type
    compression: u32,
    /// v5 codec tags
    compressors: [u32;4],
    logical_bytes: u64,
    hunk_bytes: u32,
    unit_bytes: u32,
    raw_sha1: [u8;20],
    sha1: [u8;20],
    map: Vec<Hunk>,
    metadata: Vec<MetaEntry>,
    geometry: Geometry,
    file: Vec<u8>,
    overlay: HashMap<usize,Vec<u8>>,
    dirty: bool,
    cache: Mutex<Option<(usize,Vec<u8>)>>
}

impl Chd {
    /// Create a zero filled CHD for a hard disk of the given geometry.
    /// Nothing is encoded until the image is serialized.
    pub fn create(geometry: Geometry,params: ChdParams) -> Result<Self,DYNERR> {
        if params.version < 4 || params.version > 5 {
            return Err(Box::new(img::Error::UnsupportedVersion(params.version)));
        }
        let logical_bytes = geometry.byte_capacity() as u64;
        if params.hunk_bytes==0 || params.hunk_bytes as usize % SECTOR_SIZE != 0 || geometry.sector_len==0
            || params.hunk_bytes as usize % geometry.sector_len != 0 || logical_bytes==0 {
            error!("hunk size {} is incompatible with {}",params.hunk_bytes,geometry);
            return Err(Box::new(img::Error::GeometryMismatch));
        }
        let hunks = ((logical_bytes + params.hunk_bytes as u64 - 1) / params.hunk_bytes as u64) as usize;
        Ok(Self {
            version: params.version,
            flags: 0,
            compression: match params.compress { true => codec::V4_COMPRESSION_ZLIB_PLUS, false => codec::V4_COMPRESSION_NONE },
            compressors: match params.compress { true => [codec::CHD_CODEC_ZLIB,0,0,0], false => [0;4] },
            logical_bytes,
            hunk_bytes: params.hunk_bytes,
            unit_bytes: geometry.sector_len as u32,
            raw_sha1: [0;20],
            sha1: [0;20],
            map: vec![Hunk::Zero;hunks],
            metadata: vec![MetaEntry::geometry(&geometry)],
            geometry,
            file: Vec::new(),
            overlay: HashMap::new(),
            dirty: true,
            cache: Mutex::new(None)
        })
    }
    /// Create a CHD holding `data`, which should be `geometry.byte_capacity()` bytes long
    pub fn from_logical(data: &[u8],geometry: Geometry,params: ChdParams) -> Result<Self,DYNERR> {
        let mut ans = Self::create(geometry,params)?;
        let hb = ans.hunk_bytes as usize;
        for (i,chunk) in data.chunks(hb).enumerate().take(ans.map.len()) {
            if chunk.iter().any(|b| *b!=0) {
                ans.overlay.insert(i,img::quantize_block(chunk,hb));
            }
        }
        Ok(ans)
    }
    pub fn version(&self) -> u32 {
        self.version
    }
    pub fn hunk_bytes(&self) -> u32 {
        self.hunk_bytes
    }
    pub fn unit_bytes(&self) -> u32 {
        self.unit_bytes
    }
    pub fn logical_bytes(&self) -> u64 {
        self.logical_bytes
    }
    pub fn hunk_count(&self) -> usize {
        self.map.len()
    }
    pub fn hunk_entry(&self,hunk: usize) -> Option<&Hunk> {
        self.map.get(hunk)
    }
    pub fn metadata(&self) -> &[MetaEntry] {
        &self.metadata
    }
    pub fn raw_sha1(&self) -> [u8;20] {
        self.raw_sha1
    }
    pub fn sha1(&self) -> [u8;20] {
        self.sha1
    }
    pub fn is_compressed(&self) -> bool {
        match self.version {
            5 => self.compressors[0]!=0,
            _ => self.compression!=codec::V4_COMPRESSION_NONE
        }
    }
    /// Replace the geometry metadata, the logical size cannot change
    pub fn set_geometry(&mut self,geometry: Geometry) -> STDRESULT {
        if geometry.byte_capacity() as u64!=self.logical_bytes || self.hunk_bytes as usize % geometry.sector_len!=0 {
            return Err(Box::new(img::Error::GeometryMismatch));
        }
        self.metadata.retain(|m| m.tag!=header::GDDD);
        self.metadata.insert(0,MetaEntry::geometry(&geometry));
        self.geometry = geometry;
        self.unit_bytes = geometry.sector_len as u32;
        self.dirty = true;
        Ok(())
    }
    /// Build a new CHD of the requested version with the same content and metadata
    pub fn convert_version(&self,version: u32) -> Result<Chd,DYNERR> {
        if version < 4 || version > 5 {
            return Err(Box::new(img::Error::UnsupportedVersion(version)));
        }
        let bytes = self.serialize(version,self.is_compressed())?;
        Self::from_bytes_inner(&bytes)
    }
    fn payload(&self,hunk: usize,offset: u64,len: usize) -> Result<&[u8],DYNERR> {
        let start = offset as usize;
        if start + len > self.file.len() {
            return Err(Box::new(img::Error::HunkDecompression { hunk, reason: format!("data at {:#x} runs past end of file",start) }));
        }
        Ok(&self.file[start..start+len])
    }
    /// Decode a hunk as stored in the file, ignoring the overlay
    fn decode_hunk(&self,hunk: usize,depth: usize) -> Result<Vec<u8>,DYNERR> {
        let hb = self.hunk_bytes as usize;
        let entry = match self.map.get(hunk) {
            Some(e) => *e,
            None => return Err(Box::new(img::Error::HunkDecompression { hunk, reason: "not in map".to_string() }))
        };
        let (dat,crc) = match entry {
            Hunk::Codec { slot, offset, length, crc } => {
                let supported = match self.version {
                    5 => self.compressors.get(slot as usize)==Some(&codec::CHD_CODEC_ZLIB),
                    _ => self.compression==codec::V4_COMPRESSION_ZLIB || self.compression==codec::V4_COMPRESSION_ZLIB_PLUS
                };
                if !supported {
                    let name = match self.version {
                        5 => codec::tag_string(self.compressors.get(slot as usize).copied().unwrap_or(0)),
                        _ => self.compression.to_string()
                    };
                    return Err(Box::new(img::Error::HunkDecompression { hunk, reason: format!("codec {} is not supported",name) }));
                }
                (codec::inflate(hunk,self.payload(hunk,offset,length as usize)?,hb)?,crc)
            },
            Hunk::Stored { offset, crc } => (self.payload(hunk,offset,hb)?.to_vec(),crc),
            Hunk::Mini { pattern, crc } => (pattern.to_be_bytes().repeat(hb/8),crc),
            Hunk::Zero => (vec![0;hb],None),
            Hunk::Mirror { hunk: target, crc } => {
                if target as usize==hunk || depth > self.map.len() {
                    return Err(Box::new(img::Error::HunkDecompression { hunk, reason: "self reference loops".to_string() }));
                }
                (self.decode_hunk(target as usize,depth+1)?,crc)
            },
            Hunk::Parent { .. } => return Err(Box::new(img::Error::ParentRequired))
        };
        if let Some(expected) = crc {
            let actual = match self.version {
                5 => crc16(0xffff,&dat) as u32,
                _ => crc32(&dat)
            };
            if actual!=expected {
                warn!("hunk {} CRC is {:#x}, expected {:#x}",hunk,actual,expected);
                return Err(Box::new(img::Error::HunkDecompression { hunk, reason: "CRC mismatch".to_string() }));
            }
        }
        Ok(dat)
    }
    /// Get the current contents of a hunk, including unsaved writes
    pub fn read_hunk(&self,hunk: usize) -> Result<Vec<u8>,DYNERR> {
        if let Some(dat) = self.overlay.get(&hunk) {
            return Ok(dat.clone());
        }
        let mut cache = self.cache.lock();
        if let Some((idx,dat)) = cache.as_ref() {
            if *idx==hunk {
                return Ok(dat.clone());
            }
        }
        let dat = self.decode_hunk(hunk,0)?;
        *cache = Some((hunk,dat.clone()));
        Ok(dat)
    }
    /// Encode every hunk into a complete CHD file of the given version
    fn serialize(&self,version: u32,compress: bool) -> Result<Vec<u8>,DYNERR> {
        let hb = self.hunk_bytes as usize;
        let raw_v5 = version==5 && !compress;
        let mut payload: Vec<u8> = Vec::new();
        // offsets are relative to the start of the payload until the layout is known
        let mut rel_map: Vec<Hunk> = Vec::with_capacity(self.map.len());
        let mut seen: HashMap<[u8;20],usize> = HashMap::new();
        let mut raw_hasher = Sha1::new();
        for i in 0..self.map.len() {
            let dat = self.read_hunk(i)?;
            let logical_end = usize::min(hb,(self.logical_bytes - (i*hb) as u64) as usize);
            raw_hasher.update(&dat[0..logical_end]);
            let crc = match version {
                5 => crc16(0xffff,&dat) as u32,
                _ => crc32(&dat)
            };
            if version < 5 && is_mini(&dat) {
                rel_map.push(Hunk::Mini { pattern: u64::from_be_bytes([dat[0],dat[1],dat[2],dat[3],dat[4],dat[5],dat[6],dat[7]]), crc: Some(crc) });
                continue;
            }
            if raw_v5 && dat.iter().all(|b| *b==0) {
                rel_map.push(Hunk::Zero);
                continue;
            }
            let digest: [u8;20] = Sha1::digest(&dat).into();
            if let Some(j) = seen.get(&digest).copied() {
                let entry = match (version,raw_v5) {
                    (5,true) => rel_map[j],
                    (5,false) => Hunk::Mirror { hunk: j as u64, crc: None },
                    _ => Hunk::Mirror { hunk: j as u64, crc: Some(crc) }
                };
                rel_map.push(entry);
                continue;
            }
            seen.insert(digest,i);
            if compress {
                let packed = codec::deflate(&dat)?;
                if packed.len() < hb {
                    rel_map.push(Hunk::Codec { slot: 0, offset: payload.len() as u64, length: packed.len() as u32, crc: Some(crc) });
                    payload.extend_from_slice(&packed);
                    continue;
                }
            }
            let crc = match raw_v5 { true => None, false => Some(crc) };
            rel_map.push(Hunk::Stored { offset: payload.len() as u64, crc });
            payload.extend_from_slice(&dat);
        }
        let raw_sha1: [u8;20] = raw_hasher.finalize().into();
        let sha1 = overall_sha1(&raw_sha1,&self.metadata);
        let relocate = |base: u64| -> Vec<Hunk> {
            rel_map.iter().map(|h| match *h {
                Hunk::Codec { slot, offset, length, crc } => Hunk::Codec { slot, offset: offset + base, length, crc },
                Hunk::Stored { offset, crc } => Hunk::Stored { offset: offset + base, crc },
                other => other
            }).collect()
        };
        let mut ans: Vec<u8> = Vec::new();
        match version {
            4 => {
                let map_len = (self.map.len()*map::V4_ENTRY_LEN + map::END_OF_LIST_COOKIE.len()) as u64;
                let meta_start = header::V4_HEADER_LEN as u64 + map_len;
                let meta = header::write_metadata(&self.metadata,meta_start);
                let payload_base = meta_start + meta.len() as u64;
                let hdr = HeaderV4 {
                    length: header::V4_HEADER_LEN,
                    version: 4,
                    flags: 0,
                    compression: match compress { true => codec::V4_COMPRESSION_ZLIB_PLUS, false => codec::V4_COMPRESSION_NONE },
                    total_hunks: self.map.len() as u32,
                    logical_bytes: self.logical_bytes,
                    meta_offset: match meta.len() { 0 => 0, _ => meta_start },
                    hunk_bytes: self.hunk_bytes,
                    sha1,
                    parent_sha1: [0;20],
                    raw_sha1
                };
                ans.append(&mut hdr.to_bytes()?);
                ans.append(&mut map::write_v4_map(&relocate(payload_base),self.hunk_bytes)?);
                ans.extend_from_slice(&meta);
                ans.append(&mut payload);
            },
            5 => {
                let meta_start = header::V5_HEADER_LEN as u64;
                let meta = header::write_metadata(&self.metadata,meta_start);
                let mut payload_base = meta_start + meta.len() as u64;
                if raw_v5 {
                    payload_base = (payload_base + hb as u64 - 1) / hb as u64 * hb as u64;
                }
                let map_offset = payload_base + payload.len() as u64;
                let map_bytes = match raw_v5 {
                    true => map::write_v5_raw_map(&relocate(payload_base),self.hunk_bytes)?,
                    false => map::write_v5_map(&relocate(payload_base),self.hunk_bytes,self.unit_bytes)?
                };
                let hdr = HeaderV5 {
                    length: header::V5_HEADER_LEN,
                    version: 5,
                    compressors: match compress { true => [codec::CHD_CODEC_ZLIB,0,0,0], false => [0;4] },
                    logical_bytes: self.logical_bytes,
                    map_offset,
                    meta_offset: match meta.len() { 0 => 0, _ => meta_start },
                    hunk_bytes: self.hunk_bytes,
                    unit_bytes: self.unit_bytes,
                    raw_sha1,
                    sha1,
                    parent_sha1: [0;20]
                };
                ans.append(&mut hdr.to_bytes()?);
                ans.extend_from_slice(&meta);
                ans.resize(payload_base as usize,0);
                ans.append(&mut payload);
                ans.extend_from_slice(&map_bytes);
            },
            v => return Err(Box::new(img::Error::UnsupportedVersion(v)))
        }
        info!("built CHD v{} with {} hunks, {} bytes",version,self.map.len(),ans.len());
        Ok(ans)
    }
    fn from_bytes_inner(buf: &[u8]) -> Result<Self,DYNERR> {
        let version = match header::peek_version(buf) {
            Some(v) => v,
            None => return Err(Box::new(img::Error::UnknownFormat))
        };
        let hunks_for = |logical: u64,hb: u32,offset: usize| -> Result<usize,DYNERR> {
            match logical.checked_add(hb as u64 - 1) {
                Some(n) if n / (hb as u64) <= buf.len() as u64 * (MAX_HUNKS_PER_BYTE as u64) => Ok((n / hb as u64) as usize),
                _ => {
                    error!("logical size {} cannot be stored in {} bytes",logical,buf.len());
                    Err(Box::new(img::Error::BadField { field: format!("logical bytes {}",logical), offset }))
                }
            }
        };
        let (flags,compression,compressors,logical_bytes,hunk_bytes,unit_bytes,raw_sha1,sha1,meta_offset,map) = match version {
            3 | 4 => {
                let (flags,compression,total_hunks,logical_bytes,meta_offset,hunk_bytes,sha1,raw_sha1,map_start) = match version {
                    3 => {
                        let h = HeaderV3::from_bytes(buf)?;
                        (h.flags,h.compression,h.total_hunks,h.logical_bytes,h.meta_offset,h.hunk_bytes,h.sha1,h.sha1,header::V3_HEADER_LEN)
                    },
                    _ => {
                        let h = HeaderV4::from_bytes(buf)?;
                        (h.flags,h.compression,h.total_hunks,h.logical_bytes,h.meta_offset,h.hunk_bytes,h.sha1,h.raw_sha1,header::V4_HEADER_LEN)
                    }
                };
                if flags & header::FLAG_HAS_PARENT != 0 {
                    error!("CHD requires a parent");
                    return Err(Box::new(img::Error::ParentRequired));
                }
                if hunk_bytes==0 || hunk_bytes as usize % SECTOR_SIZE != 0 {
                    return Err(Box::new(img::Error::BadField { field: format!("hunk size {}",hunk_bytes), offset: 0 }));
                }
                if total_hunks as usize!=hunks_for(logical_bytes,hunk_bytes,header::V4_LOGICAL_BYTES_OFFSET)? {
                    return Err(Box::new(img::Error::BadField { field: format!("hunk count {}",total_hunks), offset: 24 }));
                }
                let map = map::read_v4_map(buf,map_start as usize,total_hunks as usize)?;
                (flags,compression,[0;4],logical_bytes,hunk_bytes,0,raw_sha1,sha1,meta_offset,map)
            },
            5 => {
                let h = HeaderV5::from_bytes(buf)?;
                if h.parent_sha1!=[0;20] {
                    error!("CHD requires a parent");
                    return Err(Box::new(img::Error::ParentRequired));
                }
                if h.hunk_bytes==0 || h.hunk_bytes as usize % SECTOR_SIZE != 0 || h.unit_bytes==0 || h.hunk_bytes % h.unit_bytes != 0 {
                    return Err(Box::new(img::Error::BadField { field: format!("hunk size {} with unit size {}",h.hunk_bytes,h.unit_bytes), offset: 0 }));
                }
                let hunks = hunks_for(h.logical_bytes,h.hunk_bytes,header::V5_LOGICAL_BYTES_OFFSET)?;
                let map = match h.compressors[0] {
                    0 => map::read_v5_raw_map(buf,h.map_offset as usize,hunks,h.hunk_bytes)?,
                    _ => map::read_v5_map(buf,h.map_offset as usize,hunks,h.hunk_bytes,h.unit_bytes)?
                };
                (0,0,h.compressors,h.logical_bytes,h.hunk_bytes,h.unit_bytes,h.raw_sha1,h.sha1,h.meta_offset,map)
            },
            v => {
                error!("CHD version {} is not supported",v);
                return Err(Box::new(img::Error::UnsupportedVersion(v)));
            }
        };
        if logical_bytes % SECTOR_SIZE as u64 != 0 {
            warn!("logical size {} is not a whole number of sectors",logical_bytes);
        }
        let metadata = header::read_metadata(buf,meta_offset)?;
        let geometry = match metadata.iter().find(|m| m.tag==header::GDDD).and_then(|m| header::parse_geometry(&m.data)) {
            Some(g) => {
                if g.byte_capacity() as u64!=logical_bytes {
                    warn!("geometry {} does not match logical size {}",g,logical_bytes);
                }
                g
            },
            None => {
                debug!("no hard disk geometry in CHD metadata");
                Geometry::linear(logical_bytes as usize/SECTOR_SIZE)
            }
        };
        let unit_bytes = match unit_bytes {
            0 => geometry.sector_len as u32,
            u => u
        };
        info!("identified CHD v{}, {} hunks of {} bytes",version,map.len(),hunk_bytes);
        Ok(Self {
            version,
            flags,
            compression,
            compressors,
            logical_bytes,
            hunk_bytes,
            unit_bytes,
            raw_sha1,
            sha1,
            map,
            metadata,
            geometry,
            file: buf.to_vec(),
            overlay: HashMap::new(),
            dirty: false,
            cache: Mutex::new(None)
        })
    }
    fn sector_pos(&self,lsec: usize) -> Result<(usize,usize),DYNERR> {
        let offset = (lsec * SECTOR_SIZE) as u64;
        if offset + SECTOR_SIZE as u64 > self.logical_bytes {
            return Err(Box::new(img::Error::SectorRange(lsec)));
        }
        let hb = self.hunk_bytes as u64;
        Ok(((offset / hb) as usize,(offset % hb) as usize))
    }
}

impl img::Container for Chd {
    fn what_am_i(&self) -> img::ContainerFormat {
        img::ContainerFormat::Chd
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn geometry(&self) -> Geometry {
        self.geometry
    }
    fn sector_count(&self) -> usize {
        self.logical_bytes as usize / SECTOR_SIZE
    }
    fn read_sector(&self,lsec: usize) -> Result<Vec<u8>,DYNERR> {
        let (hunk,within) = self.sector_pos(lsec)?;
        let dat = self.read_hunk(hunk)?;
        Ok(dat[within..within+SECTOR_SIZE].to_vec())
    }
    fn write_sector(&mut self,lsec: usize,dat: &[u8]) -> STDRESULT {
        let (hunk,within) = self.sector_pos(lsec)?;
        let mut buf = self.read_hunk(hunk)?;
        buf[within..within+SECTOR_SIZE].copy_from_slice(&img::quantize_block(dat,SECTOR_SIZE));
        self.overlay.insert(hunk,buf);
        let mut cache = self.cache.lock();
        if cache.as_ref().is_some_and(|(idx,_)| *idx==hunk) {
            *cache = None;
        }
        Ok(())
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        Self::from_bytes_inner(buf)
    }
    fn to_bytes(&mut self) -> Result<Vec<u8>,DYNERR> {
        if !self.dirty && self.overlay.is_empty() {
            return Ok(self.file.clone());
        }
        let bytes = self.serialize(self.version,self.is_compressed())?;
        *self = Self::from_bytes_inner(&bytes)?;
        Ok(bytes)
    }
    fn as_chd(&self) -> Option<&Chd> {
        Some(self)
    }
    fn get_metadata(&self,indent: Option<u16>) -> String {
        let mut root = json::JsonValue::new_object();
        root["chd"] = json::JsonValue::new_object();
        root["chd"]["version"] = self.version.into();
        root["chd"]["logical_bytes"] = self.logical_bytes.into();
        root["chd"]["hunk_bytes"] = self.hunk_bytes.into();
        root["chd"]["unit_bytes"] = self.unit_bytes.into();
        root["chd"]["hunks"] = self.map.len().into();
        root["chd"]["compression"] = match self.version {
            5 => json::JsonValue::String(self.compressors.iter().filter(|c| **c!=0).map(|c| codec::tag_string(*c)).collect::<Vec<String>>().join(",")),
            _ => json::JsonValue::String(match self.compression { 0 => "none".to_string(), _ => "zlib".to_string() })
        };
        root["chd"]["sha1"] = json::JsonValue::String(hex::encode(self.sha1));
        root["chd"]["raw_sha1"] = json::JsonValue::String(hex::encode(self.raw_sha1));
        root["chd"]["geometry"] = json::JsonValue::String(self.geometry.to_string());
        let mut entries = json::JsonValue::new_array();
        for m in &self.metadata {
            let mut obj = json::JsonValue::new_object();
            obj["tag"] = json::JsonValue::String(m.tag_string());
            obj["flags"] = m.flags.into();
            obj["data"] = json::JsonValue::String(String::from_utf8_lossy(&m.data).trim_end_matches('\0').to_string());
            let _ = entries.push(obj);
        }
        root["chd"]["metadata"] = entries;
        if let Some(spaces) = indent {
            json::stringify_pretty(root,spaces)
        } else {
            json::stringify(root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::Container;

    fn pattern_disk(geom: Geometry) -> Vec<u8> {
        let mut ans = vec![0u8;geom.byte_capacity()];
        for (i,b) in ans.iter_mut().enumerate() {
            // leave every other hunk blank so zero and self hunks occur
            if (i / 4096) % 2 == 1 {
                *b = (i % 4096 % 251) as u8;
            }
        }
        ans
    }

    #[test]
    fn v5_roundtrip() {
        let geom = Geometry::new(20,4,32,256);
        let data = pattern_disk(geom);
        let mut chd = Chd::from_logical(&data,geom,ChdParams::default()).unwrap();
        let bytes = chd.to_bytes().unwrap();
        assert_eq!(&bytes[0..8],b"MComprHD");
        let reloaded = Chd::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.version(),5);
        assert_eq!(reloaded.geometry(),geom);
        assert_eq!(img::read_all(&reloaded).unwrap(),data);
        let expected_raw: [u8;20] = Sha1::digest(&data).into();
        assert_eq!(reloaded.raw_sha1(),expected_raw);
    }

    fn logical_bytes_error(bytes: &[u8]) -> Option<usize> {
        match Chd::from_bytes(bytes) {
            Err(e) => match e.downcast_ref::<img::Error>() {
                Some(img::Error::BadField { offset, .. }) => Some(*offset),
                _ => None
            },
            Ok(_) => None
        }
    }

    #[test]
    fn corrupt_logical_size() {
        let geom = Geometry::new(10,2,32,256);
        let data = pattern_disk(geom);
        let mut v5 = Chd::from_logical(&data,geom,ChdParams::default()).unwrap();
        let mut bytes = v5.to_bytes().unwrap();
        bytes[32..40].copy_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(logical_bytes_error(&bytes),Some(32));
        bytes[32..40].copy_from_slice(&(1u64 << 50).to_be_bytes());
        assert_eq!(logical_bytes_error(&bytes),Some(32));

        let mut v4 = Chd::from_logical(&data,geom,ChdParams { version: 4, ..Default::default() }).unwrap();
        let mut bytes = v4.to_bytes().unwrap();
        bytes[28..36].copy_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(logical_bytes_error(&bytes),Some(28));
    }

    #[test]
    fn v4_uses_mini_and_self() {
        let geom = Geometry::new(10,2,32,256);
        let data = pattern_disk(geom);
        let mut chd = Chd::from_logical(&data,geom,ChdParams { version: 4, hunk_bytes: 4096, compress: true }).unwrap();
        let bytes = chd.to_bytes().unwrap();
        let reloaded = Chd::from_bytes(&bytes).unwrap();
        assert!(matches!(reloaded.hunk_entry(0),Some(Hunk::Mini { pattern: 0, .. })));
        assert!(matches!(reloaded.hunk_entry(3),Some(Hunk::Mirror { hunk: 1, .. })));
        assert_eq!(img::read_all(&reloaded).unwrap(),data);
    }

    #[test]
    fn uncompressed_v5() {
        let geom = Geometry::new(4,2,32,512);
        let data = pattern_disk(geom);
        let mut chd = Chd::from_logical(&data,geom,ChdParams { version: 5, hunk_bytes: 4096, compress: false }).unwrap();
        let bytes = chd.to_bytes().unwrap();
        let reloaded = Chd::from_bytes(&bytes).unwrap();
        assert!(!reloaded.is_compressed());
        assert_eq!(reloaded.unit_bytes(),512);
        assert_eq!(img::read_all(&reloaded).unwrap(),data);
    }

    #[test]
    fn untouched_image_is_identical() {
        let geom = Geometry::new(4,2,32,256);
        let mut chd = Chd::from_logical(&pattern_disk(geom),geom,ChdParams::default()).unwrap();
        let bytes = chd.to_bytes().unwrap();
        let mut reloaded = Chd::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.to_bytes().unwrap(),bytes);
    }

    #[test]
    fn parent_refused() {
        let geom = Geometry::new(4,2,32,256);
        let mut chd = Chd::create(geom,ChdParams::default()).unwrap();
        let mut bytes = chd.to_bytes().unwrap();
        // parent SHA1 is the last field of the v5 header
        bytes[110] = 1;
        assert!(Chd::from_bytes(&bytes).is_err());
    }
}
