//! ## Support for PC99 track dumps (DTK)
//!
//! A track dump stores every track as the controller would see it, gaps,
//! address marks and CRCs included.  FM tracks are 3253 bytes and MFM tracks
//! are 6872 bytes.  Tracks are stored with side 0 ascending, then side 1 ascending.
//!
//! Sector writes patch the data field and CRC in place, so everything else on the
//! track is preserved and an unmodified image serializes to identical bytes.

use log::{debug,info};
use crate::img;
use crate::img::{Geometry,SECTOR_SIZE};
use crate::img::tracks::{self,TrackEncoding,SectorLoc};
use crate::{STDRESULT,DYNERR};

pub fn file_extensions() -> Vec<String> {
    vec!["dtk".to_string(),"pc99".to_string()]
}

/// Wrapper for PC99 track data.
pub struct TrackDump {
    enc: TrackEncoding,
    geometry: Geometry,
    tracks: Vec<Vec<u8>>,
    sectors: Vec<Vec<SectorLoc>>
}

impl TrackDump {
    /// Create a formatted, zero filled track dump
    pub fn create(enc: TrackEncoding,geometry: Geometry) -> Result<Self,DYNERR> {
        let mut tracks = Vec::new();
        let mut sectors = Vec::new();
        let blank = vec![vec![0;SECTOR_SIZE];geometry.sectors];
        for t in 0..geometry.cylinders*geometry.heads {
            let cyl = t % geometry.cylinders;
            let head = t / geometry.cylinders;
            let trk = tracks::format_track(enc,cyl as u8,head as u8,&blank,enc.pc99_track_len())?;
            sectors.push(tracks::scan_track(enc,&trk.bytes));
            tracks.push(trk.bytes);
        }
        Ok(Self { enc, geometry, tracks, sectors })
    }
    pub fn encoding(&self) -> TrackEncoding {
        self.enc
    }
    fn locate(&self,lsec: usize) -> Result<(usize,SectorLoc),DYNERR> {
        let [cyl,head,sec] = img::floppy_chs(&self.geometry,lsec)?;
        let t = head*self.geometry.cylinders + cyl;
        match self.sectors[t].iter().find(|loc| loc.sector as usize==sec) {
            Some(loc) => Ok((t,*loc)),
            None => Err(Box::new(img::Error::SectorNotFound { cyl, head, sector: sec }))
        }
    }
    fn try_encoding(enc: TrackEncoding,buf: &[u8]) -> Option<Self> {
        let track_len = enc.pc99_track_len();
        if buf.len()==0 || buf.len() % track_len != 0 {
            return None;
        }
        let count = buf.len()/track_len;
        let tracks: Vec<Vec<u8>> = buf.chunks(track_len).map(|c| c.to_vec()).collect();
        let first = tracks::scan_track(enc,&tracks[0]);
        if first.len()==0 {
            debug!("no {} sectors on first track",enc);
            return None;
        }
        let heads = match count > 1 && count % 2 == 0 {
            true => match tracks::scan_track(enc,&tracks[count/2]).first() {
                Some(loc) if loc.head==1 => 2,
                _ => 1
            },
            false => 1
        };
        let sectors: Vec<Vec<SectorLoc>> = tracks.iter().map(|trk| tracks::scan_track(enc,trk)).collect();
        let geometry = Geometry::new(count/heads,heads,first.len(),SECTOR_SIZE);
        info!("identified {} track dump, {}",enc,geometry);
        Some(Self { enc, geometry, tracks, sectors })
    }
}

impl img::Container for TrackDump {
    fn what_am_i(&self) -> img::ContainerFormat {
        img::ContainerFormat::TrackDump
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn geometry(&self) -> Geometry {
        self.geometry
    }
    fn sector_count(&self) -> usize {
        self.geometry.logical_sectors()
    }
    fn read_sector(&self,lsec: usize) -> Result<Vec<u8>,DYNERR> {
        let (t,loc) = self.locate(lsec)?;
        Ok(tracks::read_data(&self.tracks[t],&loc))
    }
    fn write_sector(&mut self,lsec: usize,dat: &[u8]) -> STDRESULT {
        let (t,loc) = self.locate(lsec)?;
        tracks::write_data(self.enc,&mut self.tracks[t],&loc,dat);
        Ok(())
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        for enc in [TrackEncoding::FM,TrackEncoding::MFM] {
            if let Some(ans) = Self::try_encoding(enc,buf) {
                return Ok(ans);
            }
        }
        Err(Box::new(img::Error::UnknownFormat))
    }
    fn to_bytes(&mut self) -> Result<Vec<u8>,DYNERR> {
        Ok(self.tracks.concat())
    }
    fn get_metadata(&self,indent: Option<u16>) -> String {
        let mut root = json::JsonValue::new_object();
        root["dtk"] = json::JsonValue::new_object();
        root["dtk"]["geometry"] = json::JsonValue::String(self.geometry.to_string());
        root["dtk"]["encoding"] = json::JsonValue::String(self.enc.to_string());
        root["dtk"]["track_bytes"] = self.enc.pc99_track_len().into();
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

    #[test]
    fn blank_sssd() {
        let mut dtk = TrackDump::create(TrackEncoding::FM,Geometry::new(40,1,9,256)).unwrap();
        assert_eq!(dtk.sector_count(),360);
        dtk.write_sector(17,&[0xaa;256]).unwrap();
        let bytes = dtk.to_bytes().unwrap();
        assert_eq!(bytes.len(),40*3253);
        let reloaded = TrackDump::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.read_sector(17).unwrap(),vec![0xaa;256]);
        assert_eq!(reloaded.geometry(),Geometry::new(40,1,9,256));
    }

    #[test]
    fn two_sides() {
        let mut dtk = TrackDump::create(TrackEncoding::MFM,Geometry::new(40,2,18,256)).unwrap();
        dtk.write_sector(720,&[1;256]).unwrap();
        let bytes = dtk.to_bytes().unwrap();
        let reloaded = TrackDump::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.geometry().heads,2);
        assert_eq!(reloaded.encoding(),TrackEncoding::MFM);
        assert_eq!(reloaded.read_sector(720).unwrap(),vec![1;256]);
        assert_eq!(reloaded.read_sector(719).unwrap(),vec![0;256]);
    }
}
