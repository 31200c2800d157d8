//! ## Track layouts
//!
//! The TI-99/4A disk controllers write IBM style tracks, FM for single density
//! and MFM for double density.  This module builds and scans byte level tracks.
//! The PC99 track dump stores these bytes directly, while the HFE codec
//! converts them to and from flux cells.
//!
//! A track buffer carries the list of byte offsets that were written with a
//! missing clock (address marks), since only the flux codecs can represent this.

use std::fmt;
use std::str::FromStr;
use log::{debug,trace,error};
use super::crc::crc16;
use super::{Error,SECTOR_SIZE};
use crate::DYNERR;

pub const FM_TRACK_LEN_PC99: usize = 3253;
pub const MFM_TRACK_LEN_PC99: usize = 6872;
/// data bytes per revolution at 125 kbps and 300 rpm
pub const FM_TRACK_LEN_FLUX: usize = 3125;
/// data bytes per revolution at 250 kbps and 300 rpm
pub const MFM_TRACK_LEN_FLUX: usize = 6250;

const SD_INTERLEAVE: [u8;9] = [0,7,5,3,1,8,6,4,2];
const DD_INTERLEAVE: [u8;18] = [0,11,4,15,8,1,12,5,16,9,2,13,6,17,10,3,14,7];

/// how far past an ID field to look for the data mark
const DAM_WINDOW: usize = 64;

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum TrackEncoding {
    FM,
    MFM
}

impl TrackEncoding {
    /// Encoding a TI controller would use for this many sectors per track
    pub fn for_sectors(spt: usize) -> Self {
        match spt {
            s if s <= 9 => Self::FM,
            _ => Self::MFM
        }
    }
    pub fn pc99_track_len(&self) -> usize {
        match self {
            Self::FM => FM_TRACK_LEN_PC99,
            Self::MFM => MFM_TRACK_LEN_PC99
        }
    }
    pub fn flux_track_len(&self) -> usize {
        match self {
            Self::FM => FM_TRACK_LEN_FLUX,
            Self::MFM => MFM_TRACK_LEN_FLUX
        }
    }
    pub fn gap_byte(&self) -> u8 {
        match self {
            Self::FM => 0xff,
            Self::MFM => 0x4e
        }
    }
}

impl fmt::Display for TrackEncoding {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FM => write!(f,"FM"),
            Self::MFM => write!(f,"MFM")
        }
    }
}

impl FromStr for TrackEncoding {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s.to_lowercase().as_str() {
            "fm" | "sd" => Ok(Self::FM),
            "mfm" | "dd" => Ok(Self::MFM),
            _ => Err(Error::ImageTypeMismatch)
        }
    }
}

/// Location of a sector found on a track
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct SectorLoc {
    pub cyl: u8,
    pub head: u8,
    pub sector: u8,
    pub size_code: u8,
    /// data mark, 0xfb normal or 0xf8 deleted
    pub mark: u8,
    /// offset of the first data byte
    pub data: usize
}

/// Byte level track, `marks` lists the offsets of bytes written with a missing clock
pub struct TrackBuf {
    pub bytes: Vec<u8>,
    pub marks: Vec<usize>
}

/// Physical order of sector numbers on a track
pub fn interleave(spt: usize) -> Vec<u8> {
    match spt {
        9 => SD_INTERLEAVE.to_vec(),
        18 => DD_INTERLEAVE.to_vec(),
        n => (0..n as u8).collect()
    }
}

/// CRC over an ID or data field; for MFM the three A1 sync bytes are included
pub fn field_crc(enc: TrackEncoding,mark: u8,body: &[u8]) -> u16 {
    let seed = match enc {
        TrackEncoding::FM => crc16(0xffff,&[mark]),
        TrackEncoding::MFM => crc16(0xffff,&[0xa1,0xa1,0xa1,mark])
    };
    crc16(seed,body)
}

/// PC99 images may carry F7 F7 in place of a CRC, which is how the controller's
/// write-track command requests one.  Accept either form.
fn crc_ok(enc: TrackEncoding,mark: u8,body: &[u8],crc_bytes: &[u8]) -> bool {
    crc_bytes==[0xf7,0xf7] || u16::from_be_bytes([crc_bytes[0],crc_bytes[1]])==field_crc(enc,mark,body)
}

/// Create a formatted track holding `sectors`, where `sectors[n]` is the data for sector ID n.
/// The track is padded with gap bytes to `track_len`.
pub fn format_track(enc: TrackEncoding,cyl: u8,head: u8,sectors: &[Vec<u8>],track_len: usize) -> Result<TrackBuf,DYNERR> {
    let mut bytes: Vec<u8> = Vec::with_capacity(track_len);
    let mut marks: Vec<usize> = Vec::new();
    let push = |bytes: &mut Vec<u8>,val: u8,count: usize| {
        for _i in 0..count {
            bytes.push(val);
        }
    };
    match enc {
        TrackEncoding::FM => push(&mut bytes,0xff,16),
        TrackEncoding::MFM => push(&mut bytes,0x4e,40)
    }
    for sec in interleave(sectors.len()) {
        let dat = super::quantize_block(&sectors[sec as usize],SECTOR_SIZE);
        let id = [cyl,head,sec,1];
        let id_crc = field_crc(enc,0xfe,&id).to_be_bytes();
        let dat_crc = field_crc(enc,0xfb,&dat).to_be_bytes();
        match enc {
            TrackEncoding::FM => {
                push(&mut bytes,0x00,6);
                marks.push(bytes.len());
                bytes.push(0xfe);
                bytes.extend_from_slice(&id);
                bytes.extend_from_slice(&id_crc);
                push(&mut bytes,0xff,11);
                push(&mut bytes,0x00,6);
                marks.push(bytes.len());
                bytes.push(0xfb);
                bytes.extend_from_slice(&dat);
                bytes.extend_from_slice(&dat_crc);
                push(&mut bytes,0xff,45);
            },
            TrackEncoding::MFM => {
                push(&mut bytes,0x00,10);
                for _i in 0..3 {
                    marks.push(bytes.len());
                    bytes.push(0xa1);
                }
                bytes.push(0xfe);
                bytes.extend_from_slice(&id);
                bytes.extend_from_slice(&id_crc);
                push(&mut bytes,0x4e,22);
                push(&mut bytes,0x00,12);
                for _i in 0..3 {
                    marks.push(bytes.len());
                    bytes.push(0xa1);
                }
                bytes.push(0xfb);
                bytes.extend_from_slice(&dat);
                bytes.extend_from_slice(&dat_crc);
                push(&mut bytes,0x4e,24);
            }
        }
    }
    if bytes.len() > track_len {
        error!("{} sectors do not fit on a {} byte {} track",sectors.len(),track_len,enc);
        return Err(Box::new(Error::GeometryMismatch));
    }
    bytes.resize(track_len,enc.gap_byte());
    Ok(TrackBuf { bytes, marks })
}

/// Find the data mark following an ID field, returns the offset of the mark byte
fn find_dam(enc: TrackEncoding,bytes: &[u8],start: usize) -> Option<usize> {
    let end = usize::min(start + DAM_WINDOW,bytes.len());
    for j in start..end {
        let (mark_idx,sync) = match enc {
            TrackEncoding::FM => (j, j>0 && bytes[j-1]==0x00),
            TrackEncoding::MFM => (j+3, j+3 < bytes.len() && bytes[j..j+3]==[0xa1,0xa1,0xa1])
        };
        if sync && mark_idx + 1 + SECTOR_SIZE + 2 <= bytes.len() && (bytes[mark_idx]==0xfb || bytes[mark_idx]==0xf8) {
            return Some(mark_idx);
        }
    }
    None
}

/// Scan a byte level track for sectors.  Only ID fields with a good CRC and
/// a data mark within reach are reported.
pub fn scan_track(enc: TrackEncoding,bytes: &[u8]) -> Vec<SectorLoc> {
    let mut ans: Vec<SectorLoc> = Vec::new();
    let mut i = 0;
    while i + 10 <= bytes.len() {
        // `idam` is the offset of the 0xfe mark byte
        let idam = match enc {
            TrackEncoding::FM => match i>0 && bytes[i]==0xfe && bytes[i-1]==0x00 {
                true => Some(i),
                false => None
            },
            TrackEncoding::MFM => match bytes[i..i+4]==[0xa1,0xa1,0xa1,0xfe] {
                true => Some(i+3),
                false => None
            }
        };
        if let Some(idam) = idam {
            if idam + 7 <= bytes.len() && crc_ok(enc,0xfe,&bytes[idam+1..idam+5],&bytes[idam+5..idam+7]) {
                let [cyl,head,sector,size_code] = [bytes[idam+1],bytes[idam+2],bytes[idam+3],bytes[idam+4]];
                if size_code!=1 {
                    debug!("skipping sector {} with size code {}",sector,size_code);
                } else if let Some(dam) = find_dam(enc,bytes,idam+7) {
                    trace!("found sector {} at offset {}",sector,dam+1);
                    ans.push(SectorLoc { cyl, head, sector, size_code, mark: bytes[dam], data: dam+1 });
                    i = dam + 1 + SECTOR_SIZE + 2;
                    continue;
                }
            }
        }
        i += 1;
    }
    ans
}

/// Get sector data from a byte level track
pub fn read_data(bytes: &[u8],loc: &SectorLoc) -> Vec<u8> {
    bytes[loc.data..loc.data+SECTOR_SIZE].to_vec()
}

/// Update sector data in place, along with its CRC.  A placeholder CRC stays a placeholder.
pub fn write_data(enc: TrackEncoding,bytes: &mut [u8],loc: &SectorLoc,dat: &[u8]) {
    let padded = super::quantize_block(dat,SECTOR_SIZE);
    bytes[loc.data..loc.data+SECTOR_SIZE].copy_from_slice(&padded);
    let crc_pos = loc.data + SECTOR_SIZE;
    if bytes[crc_pos..crc_pos+2]!=[0xf7,0xf7] {
        let crc = field_crc(enc,loc.mark,&padded).to_be_bytes();
        bytes[crc_pos..crc_pos+2].copy_from_slice(&crc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sectors(spt: usize) -> Vec<Vec<u8>> {
        (0..spt).map(|s| vec![s as u8;256]).collect()
    }

    #[test]
    fn fm_layout() {
        let trk = format_track(TrackEncoding::FM,3,0,&sample_sectors(9),FM_TRACK_LEN_PC99).unwrap();
        assert_eq!(trk.bytes.len(),FM_TRACK_LEN_PC99);
        assert_eq!(trk.marks.len(),18);
        assert_eq!(trk.bytes[trk.marks[0]],0xfe);
        let locs = scan_track(TrackEncoding::FM,&trk.bytes);
        let order: Vec<u8> = locs.iter().map(|l| l.sector).collect();
        assert_eq!(order,SD_INTERLEAVE.to_vec());
        assert!(locs.iter().all(|l| l.cyl==3));
        assert_eq!(read_data(&trk.bytes,&locs[1]),vec![7;256]);
    }

    #[test]
    fn mfm_layout() {
        let trk = format_track(TrackEncoding::MFM,0,1,&sample_sectors(18),MFM_TRACK_LEN_PC99).unwrap();
        assert_eq!(trk.bytes.len(),MFM_TRACK_LEN_PC99);
        assert_eq!(trk.marks.len(),108);
        let locs = scan_track(TrackEncoding::MFM,&trk.bytes);
        assert_eq!(locs.len(),18);
        assert!(locs.iter().all(|l| l.head==1 && l.mark==0xfb));
    }

    #[test]
    fn patch_in_place() {
        let mut trk = format_track(TrackEncoding::FM,0,0,&sample_sectors(9),FM_TRACK_LEN_PC99).unwrap();
        let locs = scan_track(TrackEncoding::FM,&trk.bytes);
        write_data(TrackEncoding::FM,&mut trk.bytes,&locs[4],&[0x55;256]);
        let fresh = scan_track(TrackEncoding::FM,&trk.bytes);
        assert_eq!(fresh,locs);
        assert_eq!(read_data(&trk.bytes,&fresh[4]),vec![0x55;256]);
    }

    #[test]
    fn too_many_sectors() {
        assert!(format_track(TrackEncoding::FM,0,0,&sample_sectors(18),FM_TRACK_LEN_PC99).is_err());
    }
}
