//! # Container Module
//!
//! Disk images are represented by objects implementing the `Container` trait.
//! The object type is named for the container format it handles, e.g., `Hfe`.
//! Every container presents the same face to the file system: an array of
//! 256-byte logical sectors, numbered from 0.
//!
//! ## Container Formats
//!
//! * `SectorDump` - plain sequence of logical sectors (DSK)
//! * `TrackDump` - PC99 byte level tracks with FM or MFM framing (DTK)
//! * `Hfe` - HxC flux cells, version 1 (HFE)
//! * `Chd` - MAME compressed hunks, versions 3 (read only), 4 and 5 (CHD)
//! * `RawHd` - uncompressed hard disk sectors (RAW, HD)
//! * `Cf7` - compact flash card holding 1600-sector volumes (CF7, NDS)
//!
//! ## Relation to File Systems
//!
//! The `Container` trait object serves as the underlying storage for `fs::Volume`.
//! Mapping logical sectors to physical tracks happens entirely within `img`.
//! The `fs` module runs heuristics on sector 0 when a container is first mounted,
//! and refuses the container if these fail.
//!
//! ## Sector Order
//!
//! For the track based formats, logical sectors run up side 0 from cylinder 0,
//! then down side 1 from the last cylinder.  Physical sectors on a track are
//! interleaved according to `tracks::interleave`.

pub mod crc;
pub mod tracks;
pub mod sector_dump;
pub mod track_dump;
pub mod hfe;
pub mod raw_hd;
pub mod cf7;
pub mod chd;

use std::str::FromStr;
use std::fmt;
use crate::{STDRESULT,DYNERR};

/// Size of a logical sector, regardless of container
pub const SECTOR_SIZE: usize = 256;

/// Enumerates container errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("unknown container format, expected CHD or HFE magic, PC99 tracks, or a volume information block")]
    UnknownFormat,
    #[error("image type not compatible with request")]
    ImageTypeMismatch,
    #[error("image size {0} does not match any known geometry")]
    ImageSizeMismatch(usize),
    #[error("image truncated: needed {needed} bytes but found {found}")]
    Truncated{needed: usize, found: usize},
    #[error("bad {field} at offset {offset:#x}")]
    BadField{field: String, offset: usize},
    #[error("logical sector {0} is out of range")]
    SectorRange(usize),
    #[error("sector {sector} not found on cylinder {cyl} head {head}")]
    SectorNotFound{cyl: usize, head: usize, sector: usize},
    #[error("geometric coordinate out of range")]
    GeometryMismatch,
    #[error("container is write protected")]
    WriteProtected,
    #[error("hunk {hunk} is unreadable: {reason}")]
    HunkDecompression{hunk: usize, reason: String},
    #[error("unsupported CHD version {0}")]
    UnsupportedVersion(u32),
    #[error("CHD depends on a parent image, which is not supported")]
    ParentRequired,
    #[error("metadata mismatch")]
    MetadataMismatch,
    #[error("could not process {0}")]
    Structure(String)
}

/// Enumerates the container formats
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum ContainerFormat {
    SectorDump,
    TrackDump,
    Hfe,
    Chd,
    RawHd,
    Cf7
}

/// Physical shape of the medium.  Floppy containers report their true
/// track geometry.  Hard disk containers report what their metadata declares,
/// which may be a single track of `sector_count` sectors if nothing is known.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub struct Geometry {
    pub cylinders: usize,
    pub heads: usize,
    pub sectors: usize,
    pub sector_len: usize
}

impl Geometry {
    pub fn new(cylinders: usize,heads: usize,sectors: usize,sector_len: usize) -> Self {
        Self { cylinders, heads, sectors, sector_len }
    }
    /// Geometry that only knows the count of logical sectors
    pub fn linear(logical_sectors: usize) -> Self {
        Self { cylinders: logical_sectors, heads: 1, sectors: 1, sector_len: SECTOR_SIZE }
    }
    pub fn byte_capacity(&self) -> usize {
        self.cylinders * self.heads * self.sectors * self.sector_len
    }
    /// count of 256-byte logical sectors
    pub fn logical_sectors(&self) -> usize {
        self.byte_capacity() / SECTOR_SIZE
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"CYLS:{},HEADS:{},SECS:{},BPS:{}",self.cylinders,self.heads,self.sectors,self.sector_len)
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SectorDump => write!(f,"dsk"),
            Self::TrackDump => write!(f,"dtk"),
            Self::Hfe => write!(f,"hfe"),
            Self::Chd => write!(f,"chd"),
            Self::RawHd => write!(f,"raw"),
            Self::Cf7 => write!(f,"cf7")
        }
    }
}

impl FromStr for ContainerFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "dsk" => Ok(Self::SectorDump),
            "dtk" | "pc99" => Ok(Self::TrackDump),
            "hfe" => Ok(Self::Hfe),
            "chd" => Ok(Self::Chd),
            "raw" | "hd" => Ok(Self::RawHd),
            "cf7" | "nds" => Ok(Self::Cf7),
            _ => Err(Error::UnknownFormat)
        }
    }
}

/// The main trait for working with any kind of container.
/// The corresponding trait object serves as storage for `fs::Volume`.
/// Reading takes `&self`, containers that decode lazily use interior caches.
pub trait Container: Send + Sync {
    fn what_am_i(&self) -> ContainerFormat;
    fn file_extensions(&self) -> Vec<String>;
    fn geometry(&self) -> Geometry;
    /// Count of 256-byte logical sectors
    fn sector_count(&self) -> usize;
    fn read_sector(&self,lsec: usize) -> Result<Vec<u8>,DYNERR>;
    /// Write a logical sector, data is padded or truncated to 256 bytes
    fn write_sector(&mut self,lsec: usize,dat: &[u8]) -> STDRESULT;
    /// Whether the container itself refuses writes (e.g. HFE write_allowed flag)
    fn is_write_protected(&self) -> bool {
        false
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> where Self: Sized;
    /// Serialize the container, for unchanged images this reproduces the original bytes
    fn to_bytes(&mut self) -> Result<Vec<u8>,DYNERR>;
    /// Access the CHD specifics if this is a CHD
    fn as_chd(&self) -> Option<&chd::Chd> {
        None
    }
    /// Get image metadata into JSON string.
    /// Default contains the image type and geometry.
    fn get_metadata(&self,indent: Option<u16>) -> String {
        let mut root = json::JsonValue::new_object();
        let typ = self.what_am_i().to_string();
        root[&typ] = json::JsonValue::new_object();
        root[&typ]["geometry"] = json::JsonValue::String(self.geometry().to_string());
        root[&typ]["sectors"] = self.sector_count().into();
        if let Some(spaces) = indent {
            json::stringify_pretty(root,spaces)
        } else {
            json::stringify(root)
        }
    }
}

/// Read all logical sectors into one buffer
pub fn read_all(img: &dyn Container) -> Result<Vec<u8>,DYNERR> {
    let mut ans = Vec::with_capacity(img.sector_count()*SECTOR_SIZE);
    for lsec in 0..img.sector_count() {
        ans.append(&mut img.read_sector(lsec)?);
    }
    Ok(ans)
}

/// Map a logical sector to [cylinder,head,sector] for a two sided floppy layout,
/// logical order is side 0 outward, then side 1 inward.
pub fn floppy_chs(geom: &Geometry,lsec: usize) -> Result<[usize;3],DYNERR> {
    if geom.sectors==0 || lsec >= geom.logical_sectors() {
        return Err(Box::new(Error::SectorRange(lsec)));
    }
    let track = lsec / geom.sectors;
    let sec = lsec % geom.sectors;
    if track < geom.cylinders {
        Ok([track,0,sec])
    } else {
        Ok([2*geom.cylinders - 1 - track,1,sec])
    }
}

/// Wrap a binrw failure in our own error type
pub fn struct_error(what: &str,e: binrw::Error) -> DYNERR {
    Box::new(Error::Structure(format!("{}: {}",what,e)))
}

/// If a data source is smaller than `quantum` bytes, pad it with zeros.
/// If it is larger, do not include the extra bytes.
pub fn quantize_block(src: &[u8],quantum: usize) -> Vec<u8> {
    let mut padded = src[0..usize::min(src.len(),quantum)].to_vec();
    padded.resize(quantum,0);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_order() {
        let geom = Geometry::new(40,2,9,256);
        assert_eq!(floppy_chs(&geom,0).unwrap(),[0,0,0]);
        assert_eq!(floppy_chs(&geom,359).unwrap(),[39,0,8]);
        assert_eq!(floppy_chs(&geom,360).unwrap(),[39,1,0]);
        assert_eq!(floppy_chs(&geom,719).unwrap(),[0,1,8]);
        assert!(floppy_chs(&geom,720).is_err());
    }

    #[test]
    fn format_names() {
        assert_eq!(ContainerFormat::from_str("pc99").unwrap(),ContainerFormat::TrackDump);
        assert_eq!(ContainerFormat::Chd.to_string(),"chd");
        assert!(ContainerFormat::from_str("woz").is_err());
    }
}
