//! CHD headers and the metadata chain.
//!
//! All CHD integers are big-endian.  The version number sits at offset 12 in
//! every header version, which is how we pick the layout before parsing.

use std::io::Cursor;
use binrw::{BinRead,BinWrite};
use log::{debug,warn};
use crate::img;
use crate::img::Geometry;
use crate::DYNERR;

pub const V3_HEADER_LEN: u32 = 120;
pub const V4_HEADER_LEN: u32 = 108;
pub const V5_HEADER_LEN: u32 = 124;
/// offset of `logicalbytes` in v3 and v4 headers
pub const V4_LOGICAL_BYTES_OFFSET: usize = 28;
pub const V5_LOGICAL_BYTES_OFFSET: usize = 32;
pub const FLAG_HAS_PARENT: u32 = 0x01;
pub const FLAG_WRITEABLE: u32 = 0x02;
/// hard disk geometry metadata tag
pub const GDDD: u32 = u32::from_be_bytes(*b"GDDD");
/// metadata flag, the entry participates in the overall SHA1
pub const MDFLAGS_CHECKSUM: u8 = 0x01;
const META_ENTRY_LEN: usize = 16;
const MAX_META_ENTRIES: usize = 1024;

#[derive(BinRead,BinWrite,Clone,Debug)]
#[brw(big, magic = b"MComprHD")]
pub struct HeaderV3 {
    pub length: u32,
    pub version: u32,
    pub flags: u32,
    pub compression: u32,
    pub total_hunks: u32,
    pub logical_bytes: u64,
    pub meta_offset: u64,
    pub md5: [u8;16],
    pub parent_md5: [u8;16],
    pub hunk_bytes: u32,
    pub sha1: [u8;20],
    pub parent_sha1: [u8;20]
}

#[derive(BinRead,BinWrite,Clone,Debug)]
#[brw(big, magic = b"MComprHD")]
pub struct HeaderV4 {
    pub length: u32,
    pub version: u32,
    pub flags: u32,
    pub compression: u32,
    pub total_hunks: u32,
    pub logical_bytes: u64,
    pub meta_offset: u64,
    pub hunk_bytes: u32,
    pub sha1: [u8;20],
    pub parent_sha1: [u8;20],
    pub raw_sha1: [u8;20]
}

#[derive(BinRead,BinWrite,Clone,Debug)]
#[brw(big, magic = b"MComprHD")]
pub struct HeaderV5 {
    pub length: u32,
    pub version: u32,
    pub compressors: [u32;4],
    pub logical_bytes: u64,
    pub map_offset: u64,
    pub meta_offset: u64,
    pub hunk_bytes: u32,
    pub unit_bytes: u32,
    pub raw_sha1: [u8;20],
    pub sha1: [u8;20],
    pub parent_sha1: [u8;20]
}

/// Peek at the version field without committing to a layout
pub fn peek_version(buf: &[u8]) -> Option<u32> {
    if buf.len() < 16 || &buf[0..8]!=b"MComprHD" {
        return None;
    }
    Some(u32::from_be_bytes([buf[12],buf[13],buf[14],buf[15]]))
}

macro_rules! header_io {
    ($t:ty,$what:expr) => {
        impl $t {
            pub fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
                <$t>::read(&mut Cursor::new(buf)).map_err(|e| img::struct_error($what,e))
            }
            pub fn to_bytes(&self) -> Result<Vec<u8>,DYNERR> {
                let mut curs = Cursor::new(Vec::new());
                self.write(&mut curs).map_err(|e| img::struct_error($what,e))?;
                Ok(curs.into_inner())
            }
        }
    };
}

header_io!(HeaderV3,"CHD v3 header");
header_io!(HeaderV4,"CHD v4 header");
header_io!(HeaderV5,"CHD v5 header");

/// One entry of the metadata chain
#[derive(Clone,Debug,PartialEq)]
pub struct MetaEntry {
    pub tag: u32,
    pub flags: u8,
    pub data: Vec<u8>
}

impl MetaEntry {
    /// GDDD entry in the form MAME writes, including the terminating null
    pub fn geometry(geom: &Geometry) -> Self {
        let mut data = geom.to_string().into_bytes();
        data.push(0);
        Self { tag: GDDD, flags: MDFLAGS_CHECKSUM, data }
    }
    pub fn tag_string(&self) -> String {
        String::from_utf8_lossy(&self.tag.to_be_bytes()).to_string()
    }
}

/// Parse `CYLS:%d,HEADS:%d,SECS:%d,BPS:%d`
pub fn parse_geometry(data: &[u8]) -> Option<Geometry> {
    let txt = String::from_utf8_lossy(data);
    let txt = txt.trim_end_matches('\0');
    let mut vals = [0usize;4];
    let keys = ["CYLS","HEADS","SECS","BPS"];
    for field in txt.split(',') {
        let mut kv = field.split(':');
        let (key,val) = (kv.next()?,kv.next()?);
        let idx = keys.iter().position(|k| *k==key.trim())?;
        vals[idx] = val.trim().parse::<usize>().ok()?;
    }
    if vals.iter().any(|v| *v==0) {
        debug!("incomplete geometry metadata `{}`",txt);
        return None;
    }
    Some(Geometry::new(vals[0],vals[1],vals[2],vals[3]))
}

/// Walk the metadata chain starting at `offset`, 0 means no metadata
pub fn read_metadata(buf: &[u8],mut offset: u64) -> Result<Vec<MetaEntry>,DYNERR> {
    let mut ans = Vec::new();
    while offset!=0 {
        let pos = offset as usize;
        if pos + META_ENTRY_LEN > buf.len() {
            return Err(Box::new(img::Error::BadField { field: "metadata offset".to_string(), offset: pos }));
        }
        let tag = u32::from_be_bytes([buf[pos],buf[pos+1],buf[pos+2],buf[pos+3]]);
        let flags = buf[pos+4];
        let len = u32::from_be_bytes([0,buf[pos+5],buf[pos+6],buf[pos+7]]) as usize;
        let next = u64::from_be_bytes([buf[pos+8],buf[pos+9],buf[pos+10],buf[pos+11],buf[pos+12],buf[pos+13],buf[pos+14],buf[pos+15]]);
        let start = pos + META_ENTRY_LEN;
        if start + len > buf.len() {
            return Err(Box::new(img::Error::Truncated { needed: start + len, found: buf.len() }));
        }
        ans.push(MetaEntry { tag, flags, data: buf[start..start+len].to_vec() });
        if ans.len() > MAX_META_ENTRIES {
            warn!("metadata chain does not terminate");
            return Err(Box::new(img::Error::BadField { field: "metadata chain".to_string(), offset: pos }));
        }
        offset = next;
    }
    Ok(ans)
}

/// Serialize the metadata chain as it will sit at file offset `base`
pub fn write_metadata(entries: &[MetaEntry],base: u64) -> Vec<u8> {
    let mut ans = Vec::new();
    for (i,entry) in entries.iter().enumerate() {
        let here = base + ans.len() as u64;
        let next = match i + 1 < entries.len() {
            true => here + (META_ENTRY_LEN + entry.data.len()) as u64,
            false => 0
        };
        ans.extend_from_slice(&entry.tag.to_be_bytes());
        let flags_len = ((entry.flags as u32) << 24) | (entry.data.len() as u32 & 0xffffff);
        ans.extend_from_slice(&flags_len.to_be_bytes());
        ans.extend_from_slice(&next.to_be_bytes());
        ans.extend_from_slice(&entry.data);
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_text() {
        let entry = MetaEntry::geometry(&Geometry::new(612,4,32,256));
        assert_eq!(entry.data,b"CYLS:612,HEADS:4,SECS:32,BPS:256\0".to_vec());
        assert_eq!(parse_geometry(&entry.data),Some(Geometry::new(612,4,32,256)));
        assert_eq!(parse_geometry(b"CYLS:1,HEADS:x"),None);
    }

    #[test]
    fn metadata_chain() {
        let entries = vec![
            MetaEntry::geometry(&Geometry::new(10,2,32,512)),
            MetaEntry { tag: u32::from_be_bytes(*b"IDNT"), flags: 0, data: vec![1,2,3] }
        ];
        let mut file = vec![0u8;100];
        file.append(&mut write_metadata(&entries,100));
        assert_eq!(read_metadata(&file,100).unwrap(),entries);
        assert_eq!(read_metadata(&file,0).unwrap(),vec![]);
    }

    #[test]
    fn header_sizes() {
        let h = HeaderV5 {
            length: V5_HEADER_LEN,
            version: 5,
            compressors: [0;4],
            logical_bytes: 0,
            map_offset: 0,
            meta_offset: 0,
            hunk_bytes: 4096,
            unit_bytes: 256,
            raw_sha1: [0;20],
            sha1: [0;20],
            parent_sha1: [0;20]
        };
        let bytes = h.to_bytes().unwrap();
        assert_eq!(bytes.len(),V5_HEADER_LEN as usize);
        assert_eq!(peek_version(&bytes),Some(5));
        assert_eq!(HeaderV5::from_bytes(&bytes).unwrap().hunk_bytes,4096);
    }
}
