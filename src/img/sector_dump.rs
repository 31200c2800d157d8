//! ## Support for sector dumps (DSK)
//!
//! A sector dump is a sequential copy of the 256-byte logical sectors of a floppy.
//! There is no header, so the geometry comes from the volume information block
//! if one is present, otherwise from the size of the image.

use log::{debug,warn};
use crate::img;
use crate::img::{Geometry,SECTOR_SIZE};
use crate::{STDRESULT,DYNERR};

/// Common floppy geometries as (cylinders,heads,sectors per track)
const STD_GEOMETRIES: [(usize,usize,usize);7] = [
    (40,1,9),
    (40,2,9),
    (35,1,9),
    (40,2,18),
    (80,2,18),
    (80,2,36),
    (40,2,16)
];

pub fn file_extensions() -> Vec<String> {
    vec!["dsk".to_string(),"tidisk".to_string(),"v9t9".to_string()]
}

/// Geometry declared by a floppy VIB, if it is consistent with the sector count
pub fn geometry_from_vib(vib: &[u8],sectors: usize) -> Option<Geometry> {
    if vib.len() < 0x14 || &vib[0x0d..0x10]!=b"DSK" {
        return None;
    }
    let spt = vib[0x0c] as usize;
    let tracks = vib[0x11] as usize;
    let sides = vib[0x12] as usize;
    if spt>0 && tracks>0 && (sides==1 || sides==2) && spt*tracks*sides==sectors {
        return Some(Geometry::new(tracks,sides,spt,SECTOR_SIZE));
    }
    debug!("VIB geometry {}x{}x{} does not match {} sectors",tracks,sides,spt,sectors);
    None
}

fn geometry_from_size(sectors: usize) -> Option<Geometry> {
    for (c,h,s) in STD_GEOMETRIES {
        if c*h*s==sectors {
            return Some(Geometry::new(c,h,s,SECTOR_SIZE));
        }
    }
    None
}

/// Wrapper for sector dump data.
pub struct SectorDump {
    geometry: Geometry,
    data: Vec<u8>
}

impl SectorDump {
    pub fn create(geometry: Geometry) -> Self {
        Self {
            geometry,
            data: vec![0;geometry.logical_sectors()*SECTOR_SIZE]
        }
    }
}

impl img::Container for SectorDump {
    fn what_am_i(&self) -> img::ContainerFormat {
        img::ContainerFormat::SectorDump
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
        if buf.len()==0 || buf.len()%SECTOR_SIZE!=0 {
            return Err(Box::new(img::Error::ImageSizeMismatch(buf.len())));
        }
        let sectors = buf.len()/SECTOR_SIZE;
        let geometry = match (geometry_from_vib(&buf[0..SECTOR_SIZE],sectors),geometry_from_size(sectors)) {
            (Some(g),_) => g,
            (None,Some(g)) => {
                if &buf[0x0d..0x10]!=b"DSK" {
                    debug!("no VIB, geometry from image size");
                }
                g
            },
            (None,None) => {
                if &buf[0x0d..0x10]==b"DSK" && sectors <= 2880 {
                    warn!("nonstandard floppy with {} sectors",sectors);
                    Geometry::linear(sectors)
                } else {
                    return Err(Box::new(img::Error::ImageSizeMismatch(buf.len())));
                }
            }
        };
        Ok(Self {
            geometry,
            data: buf.to_vec()
        })
    }
    fn to_bytes(&mut self) -> Result<Vec<u8>,DYNERR> {
        Ok(self.data.clone())
    }
}
