//! ## On-disk structures
//!
//! Fixed records of the floppy (TI disk controller) and hard disk (HFDC/SCSI) layouts.
//! All integers are big-endian except the level 3 record count, which the disk
//! controller stores little-endian.

use std::io::Cursor;
use binrw::{BinRead,BinWrite};
use chrono::{Datelike,Timelike};
use log::debug;
use super::Error;
use crate::DYNERR;

pub const SECTOR_SIZE: usize = 256;
pub const MAX_NAME_LEN: usize = 10;
pub const MAX_FILES: usize = 127;
pub const FLOPPY_MAX_SUBDIRS: usize = 2;
pub const HD_MAX_SUBDIRS: usize = 114;
/// floppies up to this many sectors use 1 sector per AU
pub const FLOPPY_MAX_AUS: usize = 1600;
/// sectors 0-31 hold the hard disk VIB and bitmap, 32-63 their backup
pub const HD_BITMAP_SECTORS: usize = 32;
pub const HD_RESERVED_SECTORS: usize = 64;

pub const FLAG_PROGRAM: u8 = 0x01;
pub const FLAG_INTERNAL: u8 = 0x02;
pub const FLAG_PROTECTED: u8 = 0x08;
pub const FLAG_MODIFIED: u8 = 0x10;
pub const FLAG_EMULATE: u8 = 0x20;
pub const FLAG_VARIABLE: u8 = 0x80;

/// Flags that can be toggled on an existing file
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum FileFlag {
    Protected,
    Modified,
    Emulate
}

impl FileFlag {
    pub fn mask(&self) -> u8 {
        match self {
            Self::Protected => FLAG_PROTECTED,
            Self::Modified => FLAG_MODIFIED,
            Self::Emulate => FLAG_EMULATE
        }
    }
}

impl std::str::FromStr for FileFlag {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "protected" | "protect" => Ok(Self::Protected),
            "modified" => Ok(Self::Modified),
            "emulate" => Ok(Self::Emulate),
            _ => Err(Error::InvalidOperation(format!("unknown flag `{}`",s)))
        }
    }
}

/// Descriptive metadata of a file, independent of where it is stored
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct FileMeta {
    pub flags: u8,
    pub records_per_sector: u8,
    pub eof_offset: u8,
    pub record_len: u8,
    pub l3_count: u16
}

impl FileMeta {
    /// program image of `len` bytes
    pub fn program(len: usize) -> Self {
        Self {
            flags: FLAG_PROGRAM,
            records_per_sector: 0,
            eof_offset: (len % SECTOR_SIZE) as u8,
            record_len: 0,
            l3_count: 0
        }
    }
    pub fn is_program(&self) -> bool {
        self.flags & FLAG_PROGRAM != 0
    }
    pub fn is_variable(&self) -> bool {
        self.flags & FLAG_VARIABLE != 0
    }
    pub fn is_internal(&self) -> bool {
        self.flags & FLAG_INTERNAL != 0
    }
    /// Type as the TI catalog shows it, e.g. `DIS/VAR 80`
    pub fn type_string(&self) -> String {
        if self.is_program() {
            return "PROGRAM".to_string();
        }
        format!("{}/{} {}",
            match self.is_internal() { true => "INT", false => "DIS" },
            match self.is_variable() { true => "VAR", false => "FIX" },
            self.record_len)
    }
}

/// Valid names are 1 to 10 characters, printable ascii except space and period
pub fn is_name_valid(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        debug!("name length {} out of range",name.len());
        return false;
    }
    for c in name.chars() {
        if !c.is_ascii() || c.is_ascii_control() || c==' ' || c=='.' || c as u32 >= 0x7f {
            debug!("bad name character `{}` (codepoint {})",c,c as u32);
            return false;
        }
    }
    true
}

pub fn name_to_bytes(name: &str) -> Result<[u8;10],DYNERR> {
    if !is_name_valid(name) {
        return Err(Box::new(Error::InvalidName(name.to_string())));
    }
    let mut ans = [0x20u8;10];
    ans[0..name.len()].copy_from_slice(name.as_bytes());
    Ok(ans)
}

pub fn name_from_bytes(raw: &[u8;10]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches([' ','\0']).to_string()
}

/// Pack time into the 4-byte form: time word (h:5,m:6,s/2:5) then date word (y:7,m:4,d:5)
pub fn pack_time(time: Option<chrono::NaiveDateTime>) -> [u8;4] {
    let now = match time {
        Some(t) => t,
        _ => chrono::Local::now().naive_local()
    };
    let tw = ((now.hour() << 11) | (now.minute() << 5) | (now.second() / 2)) as u16;
    let dw = (((now.year() % 100) as u32) << 9 | (now.month() << 5) | now.day()) as u16;
    let [t0,t1] = tw.to_be_bytes();
    let [d0,d1] = dw.to_be_bytes();
    [t0,t1,d0,d1]
}

/// Unpack a timestamp, all zeros or an impossible date gives None
pub fn unpack_time(raw: [u8;4]) -> Option<chrono::NaiveDateTime> {
    if raw==[0;4] {
        return None;
    }
    let tw = u16::from_be_bytes([raw[0],raw[1]]) as u32;
    let dw = u16::from_be_bytes([raw[2],raw[3]]) as u32;
    let yy = (dw >> 9) as i32;
    let year = match yy < 70 { true => 2000 + yy, false => 1900 + yy };
    chrono::NaiveDate::from_ymd_opt(year,(dw >> 5) & 0x0f,dw & 0x1f)?
        .and_hms_opt(tw >> 11,(tw >> 5) & 0x3f,(tw & 0x1f) * 2)
}

macro_rules! disk_struct {
    ($t:ty,$what:expr) => {
        impl $t {
            pub fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
                <$t>::read(&mut Cursor::new(buf)).map_err(|e| -> DYNERR {
                    Box::new(Error::Format(format!("{}: {}",$what,e)))
                })
            }
            pub fn to_bytes(&self) -> Vec<u8> {
                let mut curs = Cursor::new(Vec::with_capacity(SECTOR_SIZE));
                self.write(&mut curs).expect("fixed record into a Vec cannot fail");
                curs.into_inner()
            }
        }
    };
}

#[derive(BinRead,BinWrite,Clone,Copy,Debug,Default,PartialEq)]
#[brw(big)]
pub struct FloppyDirSlot {
    pub name: [u8;10],
    pub fdir: u16
}

/// Floppy (and CF7 volume) information block, sector 0
#[derive(BinRead,BinWrite,Clone,Debug)]
#[brw(big)]
pub struct FloppyVib {
    pub name: [u8;10],
    pub total_sectors: u16,
    pub sectors_per_track: u8,
    #[brw(magic = b"DSK")]
    pub protection: u8,
    pub tracks: u8,
    pub sides: u8,
    pub density: u8,
    pub dirs: [FloppyDirSlot;3],
    pub bitmap: [u8;200]
}

/// Floppy file information block
#[derive(BinRead,BinWrite,Clone,Debug)]
#[brw(big)]
pub struct Fib {
    pub name: [u8;10],
    pub ext_record_len: u16,
    pub flags: u8,
    pub records_per_sector: u8,
    pub sectors: u16,
    pub eof_offset: u8,
    pub record_len: u8,
    #[brw(little)]
    pub l3_count: u16,
    pub created: [u8;4],
    pub updated: [u8;4],
    pub chain: [[u8;3];76]
}

/// Hard disk information block, sector 0 with a backup at sector 32
#[derive(BinRead,BinWrite,Clone,Debug)]
#[brw(big)]
pub struct HdVib {
    pub name: [u8;10],
    pub total_aus: u16,
    pub sectors_per_track: u8,
    /// AUs the controller keeps for descriptors, in units of 64.  This is an
    /// allocation hint, the locked system area is always sectors 0-63.
    pub reserved: u8,
    pub step_speed: u8,
    pub write_current: u8,
    /// (sectors per AU - 1) << 4 | (heads - 1)
    pub au_heads: u8,
    pub precomp: u8,
    pub created: [u8;4],
    pub files: u8,
    pub dirs: u8,
    pub fdir_au: u16,
    pub emulate_au: u16,
    pub subdirs: [u16;114]
}

/// Hard disk directory descriptor record
#[derive(BinRead,BinWrite,Clone,Debug)]
#[brw(big)]
pub struct Ddr {
    pub name: [u8;10],
    pub total_aus: u16,
    pub sectors_per_track: u8,
    #[brw(magic = b"DIR")]
    pub created: [u8;4],
    pub files: u8,
    pub dirs: u8,
    pub fdir_au: u16,
    pub parent_au: u16,
    pub subdirs: [u16;114],
    pub reserved: u16
}

/// Hard disk file descriptor record
#[derive(BinRead,BinWrite,Clone,Debug)]
#[brw(big)]
pub struct Fdr {
    pub name: [u8;10],
    pub ext_record_len: u16,
    pub flags: u8,
    pub records_per_sector: u8,
    pub sectors: u16,
    pub eof_offset: u8,
    pub record_len: u8,
    #[brw(little)]
    pub l3_count: u16,
    pub created: [u8;4],
    pub updated: [u8;4],
    #[brw(magic = b"FI")]
    pub prev_au: u16,
    pub next_au: u16,
    pub aus: u16,
    pub fdir_au: u16,
    pub ext_info: u16,
    /// (first AU, last AU) inclusive
    pub chain: [[u16;2];54]
}

disk_struct!(FloppyVib,"floppy VIB");
disk_struct!(Fib,"file information block");
disk_struct!(HdVib,"hard disk VIB");
disk_struct!(Ddr,"directory descriptor record");
disk_struct!(Fdr,"file descriptor record");

impl FloppyVib {
    pub fn new(name: &str,geometry: &crate::img::Geometry) -> Result<Self,DYNERR> {
        Ok(Self {
            name: name_to_bytes(name)?,
            total_sectors: geometry.logical_sectors() as u16,
            sectors_per_track: geometry.sectors as u8,
            protection: b' ',
            tracks: geometry.cylinders as u8,
            sides: geometry.heads as u8,
            density: match geometry.sectors { s if s <= 9 => 1, s if s <= 18 => 2, _ => 3 },
            dirs: [FloppyDirSlot::default();3],
            bitmap: [0;200]
        })
    }
}

impl Fib {
    pub fn meta(&self) -> FileMeta {
        FileMeta {
            flags: self.flags,
            records_per_sector: self.records_per_sector,
            eof_offset: self.eof_offset,
            record_len: self.record_len,
            l3_count: self.l3_count
        }
    }
}

impl Fdr {
    pub fn meta(&self) -> FileMeta {
        FileMeta {
            flags: self.flags,
            records_per_sector: self.records_per_sector,
            eof_offset: self.eof_offset,
            record_len: self.record_len,
            l3_count: self.l3_count
        }
    }
}

/// Unpack a floppy data chain cluster into (start AU, highest sector offset)
pub fn unpack_cluster(raw: &[u8;3]) -> (usize,usize) {
    let start = raw[0] as usize | ((raw[1] as usize & 0x0f) << 8);
    let offset = (raw[1] as usize >> 4) | ((raw[2] as usize) << 4);
    (start,offset)
}

pub fn pack_cluster(start: usize,offset: usize) -> [u8;3] {
    [
        (start & 0xff) as u8,
        (((start >> 8) & 0x0f) | ((offset & 0x0f) << 4)) as u8,
        ((offset >> 4) & 0xff) as u8
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_sizes() {
        let vib = FloppyVib::new("TEST",&crate::img::Geometry::new(40,2,9,256)).unwrap();
        let bytes = vib.to_bytes();
        assert_eq!(bytes.len(),256);
        assert_eq!(&bytes[0x0d..0x10],b"DSK");
        assert_eq!(bytes[0x12],2);
        let fdr = Fdr::from_bytes(&{
            let mut buf = vec![0u8;256];
            buf[0x1c] = b'F';
            buf[0x1d] = b'I';
            buf[0x12] = 0x34;
            buf[0x13] = 0x12;
            buf
        }).unwrap();
        assert_eq!(fdr.l3_count,0x1234);
        assert_eq!(fdr.to_bytes().len(),256);
        assert!(Fdr::from_bytes(&[0u8;256]).is_err());
    }

    #[test]
    fn clusters() {
        let raw = pack_cluster(0x234,0x567);
        assert_eq!(raw,[0x34,0x72,0x56]);
        assert_eq!(unpack_cluster(&raw),(0x234,0x567));
    }

    #[test]
    fn names_and_times() {
        assert!(is_name_valid("HELLO-1"));
        assert!(!is_name_valid("A.B"));
        assert!(!is_name_valid("TOO_LONG_NAME"));
        assert!(!is_name_valid(""));
        assert_eq!(name_from_bytes(&name_to_bytes("XB").unwrap()),"XB");
        let t = chrono::NaiveDate::from_ymd_opt(1987,6,5).unwrap().and_hms_opt(13,14,16).unwrap();
        assert_eq!(unpack_time(pack_time(Some(t))),Some(t));
        assert_eq!(unpack_time([0;4]),None);
    }
}
