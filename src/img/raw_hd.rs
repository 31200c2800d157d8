//! ## Support for raw hard disk images
//!
//! A raw hard disk image is the uncompressed sequence of 256-byte logical sectors
//! of an HFDC or SCSI drive.  The geometry is recovered from the volume information
//! block when the controller is HFDC, SCSI volumes carry no geometry.

use log::debug;
use crate::img;
use crate::img::{Geometry,SECTOR_SIZE};
use crate::{STDRESULT,DYNERR};

/// sectors 0-63 hold the VIB, bitmap, and their backups
const MIN_SECTORS: usize = 64;

pub fn file_extensions() -> Vec<String> {
    vec!["raw".to_string(),"hd".to_string()]
}

/// Check that sector 0 could be a hard disk VIB, returns the geometry if known
pub fn probe_vib(vib: &[u8],sectors: usize) -> Option<Geometry> {
    if vib.len() < 0x1c || &vib[0x0d..0x10]==b"DSK" {
        return None;
    }
    let total_aus = u16::from_be_bytes([vib[0x0a],vib[0x0b]]) as usize;
    let spau = (vib[0x10] >> 4) as usize + 1;
    let fdir_au = u16::from_be_bytes([vib[0x18],vib[0x19]]) as usize;
    if total_aus==0 || total_aus*spau > sectors || fdir_au==0 || fdir_au >= total_aus {
        debug!("hard disk VIB check failed: {} AUs of {} sectors, FDIR at {}",total_aus,spau,fdir_au);
        return None;
    }
    let spt = vib[0x0c] as usize;
    let heads = (vib[0x10] & 0x0f) as usize + 1;
    if spt > 0 && sectors % (spt*heads)==0 {
        Some(Geometry::new(sectors/(spt*heads),heads,spt,SECTOR_SIZE))
    } else {
        Some(Geometry::linear(sectors))
    }
}

/// Wrapper for raw hard disk data.
pub struct RawHd {
    geometry: Geometry,
    data: Vec<u8>
}

impl RawHd {
    pub fn create(geometry: Geometry) -> Self {
        Self {
            geometry,
            data: vec![0;geometry.logical_sectors()*SECTOR_SIZE]
        }
    }
}

impl img::Container for RawHd {
    fn what_am_i(&self) -> img::ContainerFormat {
        img::ContainerFormat::RawHd
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn geometry(&self) -> Geometry {
        self.geometry
    }
    fn sector_count(&self) -> usize {
        self.data.len()/SECTOR_SIZE
    }
    fn read_sector(&self,lsec: usize) -> Result<Vec<u8>,DYNERR> {
        if lsec >= self.sector_count() {
            return Err(Box::new(img::Error::SectorRange(lsec)));
        }
        Ok(self.data[lsec*SECTOR_SIZE..(lsec+1)*SECTOR_SIZE].to_vec())
    }
    fn write_sector(&mut self,lsec: usize,dat: &[u8]) -> STDRESULT {
        if lsec >= self.sector_count() {
            return Err(Box::new(img::Error::SectorRange(lsec)));
        }
        let padded = img::quantize_block(dat,SECTOR_SIZE);
        self.data[lsec*SECTOR_SIZE..(lsec+1)*SECTOR_SIZE].copy_from_slice(&padded);
        Ok(())
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        if buf.len()%SECTOR_SIZE!=0 || buf.len()/SECTOR_SIZE < MIN_SECTORS {
            return Err(Box::new(img::Error::ImageSizeMismatch(buf.len())));
        }
        let sectors = buf.len()/SECTOR_SIZE;
        match probe_vib(&buf[0..SECTOR_SIZE],sectors) {
            Some(geometry) => Ok(Self { geometry, data: buf.to_vec() }),
            None => Err(Box::new(img::Error::UnknownFormat))
        }
    }
    fn to_bytes(&mut self) -> Result<Vec<u8>,DYNERR> {
        Ok(self.data.clone())
    }
}
