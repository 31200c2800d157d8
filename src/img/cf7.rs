//! ## Support for CF7 compact flash cards
//!
//! A CF7 card is a sequence of floppy volumes, 1600 logical sectors each.
//! Every byte of a volume is stored in the even byte of a 16-bit word, so a
//! volume takes 819200 bytes on the card.  The container exposes one volume
//! at a time, selected with `select_volume`.

use log::{debug,info};
use crate::img;
use crate::img::{Geometry,SECTOR_SIZE};
use crate::{STDRESULT,DYNERR};

pub const VOLUME_SECTORS: usize = 1600;
pub const VOLUME_BYTES: usize = VOLUME_SECTORS * SECTOR_SIZE * 2;

pub fn file_extensions() -> Vec<String> {
    vec!["cf7".to_string(),"nds".to_string()]
}

/// Wrapper for a CF7 card image.
pub struct Cf7 {
    volume: usize,
    /// length of the card as found, the final volume may be partial
    card_len: usize,
    data: Vec<u8>
}

impl Cf7 {
    /// Create a card with `volumes` blank volumes
    pub fn create(volumes: usize) -> Self {
        Self {
            volume: 0,
            card_len: volumes*VOLUME_BYTES,
            data: vec![0;volumes*VOLUME_BYTES]
        }
    }
    pub fn volume_count(&self) -> usize {
        self.data.len()/VOLUME_BYTES
    }
    pub fn current_volume(&self) -> usize {
        self.volume
    }
    pub fn select_volume(&mut self,volume: usize) -> STDRESULT {
        if volume >= self.volume_count() {
            return Err(Box::new(img::Error::GeometryMismatch));
        }
        self.volume = volume;
        Ok(())
    }
    fn offset(&self,lsec: usize) -> Result<usize,DYNERR> {
        if lsec >= VOLUME_SECTORS {
            return Err(Box::new(img::Error::SectorRange(lsec)));
        }
        Ok(self.volume*VOLUME_BYTES + lsec*SECTOR_SIZE*2)
    }
}

impl img::Container for Cf7 {
    fn what_am_i(&self) -> img::ContainerFormat {
        img::ContainerFormat::Cf7
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn geometry(&self) -> Geometry {
        Geometry::new(40,2,20,SECTOR_SIZE)
    }
    fn sector_count(&self) -> usize {
        VOLUME_SECTORS
    }
    fn read_sector(&self,lsec: usize) -> Result<Vec<u8>,DYNERR> {
        let base = self.offset(lsec)?;
        Ok(self.data[base..base+SECTOR_SIZE*2].iter().step_by(2).copied().collect())
    }
    fn write_sector(&mut self,lsec: usize,dat: &[u8]) -> STDRESULT {
        let base = self.offset(lsec)?;
        // sectors past the end of a partial final volume are not on the card
        if base + SECTOR_SIZE*2 > self.card_len {
            return Err(Box::new(img::Error::SectorRange(lsec)));
        }
        let padded = img::quantize_block(dat,SECTOR_SIZE);
        for i in 0..SECTOR_SIZE {
            self.data[base+2*i] = padded[i];
        }
        Ok(())
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        if buf.len() < VOLUME_BYTES || buf.len()%(SECTOR_SIZE*2)!=0 {
            return Err(Box::new(img::Error::ImageSizeMismatch(buf.len())));
        }
        // VIB marker `DSK` at 0x0d, 0x0e, 0x0f lands on even bytes 0x1a, 0x1c, 0x1e
        let marker = [buf[0x1a],buf[0x1c],buf[0x1e]];
        if &marker!=b"DSK" {
            debug!("first CF7 volume has no VIB");
            return Err(Box::new(img::Error::UnknownFormat));
        }
        let mut data = buf.to_vec();
        // a partial final volume is padded out while in memory
        let whole = (data.len() + VOLUME_BYTES - 1)/VOLUME_BYTES;
        data.resize(whole*VOLUME_BYTES,0);
        info!("identified CF7 card with {} volumes",whole);
        Ok(Self { volume: 0, card_len: buf.len(), data })
    }
    fn to_bytes(&mut self) -> Result<Vec<u8>,DYNERR> {
        Ok(self.data[0..self.card_len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::Container;

    #[test]
    fn partial_final_volume() {
        let mut card = Cf7::create(1);
        card.write_sector(0,b"VOLUME1   \x06\x40\x14DSK").unwrap();
        let mut buf = card.to_bytes().unwrap();
        // second volume holds only 100 sectors
        buf.extend_from_slice(&vec![0;100*SECTOR_SIZE*2]);
        let mut card = Cf7::from_bytes(&buf).unwrap();
        assert_eq!(card.volume_count(),2);
        card.select_volume(1).unwrap();
        card.write_sector(99,&[0x11;SECTOR_SIZE]).unwrap();
        assert_eq!(card.read_sector(100).unwrap(),vec![0;SECTOR_SIZE]);
        assert!(matches!(card.write_sector(100,&[0x22;SECTOR_SIZE]).unwrap_err().downcast_ref::<img::Error>(),Some(img::Error::SectorRange(100))));
        let out = card.to_bytes().unwrap();
        assert_eq!(out.len(),buf.len());
        assert_eq!(out[VOLUME_BYTES + 99*SECTOR_SIZE*2],0x11);
    }
}
