//! ## Support for HFE flux images
//!
//! HFE version 1 stores each track as a stream of flux cells, two cells per data bit.
//! The track data is organized in 512-byte blocks, the first 256 bytes belong to
//! side 0 and the next 256 to side 1.  Within a byte the first cell in time is bit 0.
//!
//! Sectors are located by their sync patterns.  FM address marks are written with
//! clock pattern 0xc7, MFM marks are preceded by three A1 bytes with a missing clock (0x4489).
//! Writing a sector re-encodes only its data field and CRC, so the rest of the flux
//! stream, including anything we could not decode, passes through unchanged.

use std::io::Cursor;
use bit_vec::BitVec;
use binrw::{BinRead,BinWrite};
use log::{debug,info,warn};
use crate::img;
use crate::img::{Geometry,SECTOR_SIZE};
use crate::img::tracks::{self,TrackEncoding};
use crate::{STDRESULT,DYNERR};

const BLOCK_SIZE: usize = 512;
const SIDE_CHUNK: usize = 256;
const ISOIBM_MFM_ENCODING: u8 = 0x00;
const ISOIBM_FM_ENCODING: u8 = 0x02;
const GENERIC_SHUGART_DD_FLOPPYMODE: u8 = 0x07;
const FM_IDAM: u16 = 0xf57e;
const FM_DAM: u16 = 0xf56f;
const FM_DDAM: u16 = 0xf56a;
const MFM_SYNC: u16 = 0x4489;
const FM_MARK_CLOCK: u8 = 0xc7;

pub fn file_extensions() -> Vec<String> {
    vec!["hfe".to_string()]
}

#[derive(BinRead,BinWrite,Clone,Debug)]
#[brw(little, magic = b"HXCPICFE")]
pub struct Header {
    pub format_revision: u8,
    pub number_of_track: u8,
    pub number_of_side: u8,
    pub track_encoding: u8,
    pub bit_rate: u16,
    pub floppy_rpm: u16,
    pub interface_mode: u8,
    pub dnu: u8,
    pub track_list_offset: u16,
    pub write_allowed: u8,
    pub single_step: u8,
    pub t0s0_altencoding: u8,
    pub t0s0_encoding: u8,
    pub t0s1_altencoding: u8,
    pub t0s1_encoding: u8
}

#[derive(BinRead,BinWrite,Clone,Copy,Debug)]
#[brw(little)]
pub struct TrackEntry {
    /// in blocks
    pub offset: u16,
    /// in bytes, both sides
    pub track_len: u16
}

#[derive(Clone,Copy,Debug)]
struct FluxSector {
    sector: u8,
    mark: u8,
    /// cell index of the first data byte
    data_cell: usize
}

struct Side {
    cells: BitVec,
    sectors: Vec<FluxSector>,
    dirty: bool
}

/// Address mark found in the cell stream, `content` is the cell index of the byte after the mark
struct Mark {
    mark: u8,
    content: usize
}

fn decode_byte(cells: &BitVec,pos: usize) -> u8 {
    let mut ans: u8 = 0;
    for k in 0..8 {
        ans = (ans << 1) | cells.get(pos + 2*k + 1).unwrap_or(false) as u8;
    }
    ans
}

fn decode_bytes(cells: &BitVec,pos: usize,count: usize) -> Vec<u8> {
    (0..count).map(|i| decode_byte(cells,pos + 16*i)).collect()
}

/// Encode data bytes starting at cell `pos`, `prev` is the last data bit before `pos`.
/// Returns the last data bit written.
fn encode_bytes(enc: TrackEncoding,cells: &mut BitVec,mut pos: usize,dat: &[u8],mut prev: bool) -> bool {
    for byte in dat {
        for k in 0..8 {
            let bit = (byte >> (7-k)) & 1 == 1;
            let clock = match enc {
                TrackEncoding::FM => true,
                TrackEncoding::MFM => !(prev || bit)
            };
            if pos + 1 < cells.len() {
                cells.set(pos,clock);
                cells.set(pos+1,bit);
            }
            pos += 2;
            prev = bit;
        }
    }
    prev
}

fn set_raw_cells(cells: &mut BitVec,pos: usize,pattern: u16) {
    for k in 0..16 {
        if pos + k < cells.len() {
            cells.set(pos + k,(pattern >> (15-k)) & 1 == 1);
        }
    }
}

/// Convert a byte level track to cells, bytes listed in `marks` get the missing clock
fn cells_from_track(enc: TrackEncoding,trk: &tracks::TrackBuf) -> BitVec {
    let mut cells = BitVec::from_elem(trk.bytes.len()*16,false);
    let mut prev = false;
    let mut next_mark = trk.marks.iter().peekable();
    for (i,byte) in trk.bytes.iter().enumerate() {
        let is_mark = next_mark.peek().is_some_and(|m| **m==i);
        if is_mark {
            next_mark.next();
            match enc {
                TrackEncoding::FM => {
                    let mut pattern: u16 = 0;
                    for k in 0..8 {
                        pattern = (pattern << 2) | (((FM_MARK_CLOCK >> (7-k)) & 1) << 1 | ((byte >> (7-k)) & 1)) as u16;
                    }
                    set_raw_cells(&mut cells,i*16,pattern);
                },
                TrackEncoding::MFM => set_raw_cells(&mut cells,i*16,MFM_SYNC)
            }
            prev = byte & 1 == 1;
        } else {
            prev = encode_bytes(enc,&mut cells,i*16,&[*byte],prev);
        }
    }
    cells
}

fn find_marks(enc: TrackEncoding,cells: &BitVec) -> Vec<Mark> {
    let mut syncs: Vec<(usize,u16)> = Vec::new();
    let mut reg: u16 = 0;
    for (i,bit) in cells.iter().enumerate() {
        reg = (reg << 1) | bit as u16;
        if i < 15 {
            continue;
        }
        let hit = match enc {
            TrackEncoding::FM => reg==FM_IDAM || reg==FM_DAM || reg==FM_DDAM,
            TrackEncoding::MFM => reg==MFM_SYNC
        };
        if hit {
            syncs.push((i-15,reg));
        }
    }
    let mut ans = Vec::new();
    match enc {
        TrackEncoding::FM => {
            for (pos,pattern) in syncs {
                let mark = match pattern {
                    FM_IDAM => 0xfe,
                    FM_DAM => 0xfb,
                    _ => 0xf8
                };
                ans.push(Mark { mark, content: pos + 16 });
            }
        },
        TrackEncoding::MFM => {
            let mut j = 0;
            while j + 2 < syncs.len() {
                let p = syncs[j].0;
                if syncs[j+1].0==p+16 && syncs[j+2].0==p+32 {
                    ans.push(Mark { mark: decode_byte(cells,p+48), content: p+64 });
                    j += 3;
                } else {
                    j += 1;
                }
            }
        }
    }
    ans
}

/// Pair ID fields with data fields, returning sectors along with the IDs they carry as (cyl,head)
fn scan_cells(enc: TrackEncoding,cells: &BitVec) -> Vec<(u8,u8,FluxSector)> {
    let marks = find_marks(enc,cells);
    let mut ans = Vec::new();
    for (i,id) in marks.iter().enumerate() {
        if id.mark!=0xfe {
            continue;
        }
        let fields = decode_bytes(cells,id.content,6);
        let crc = u16::from_be_bytes([fields[4],fields[5]]);
        if crc!=tracks::field_crc(enc,0xfe,&fields[0..4]) {
            debug!("bad ID CRC at cell {}",id.content);
            continue;
        }
        if fields[3]!=1 {
            debug!("skipping sector {} with size code {}",fields[2],fields[3]);
            continue;
        }
        let limit = id.content + 16*(6 + 64);
        let dam = marks[i+1..].iter().take_while(|m| m.content < limit)
            .find(|m| m.mark==0xfb || m.mark==0xf8);
        if let Some(dam) = dam {
            if dam.content + 16*(SECTOR_SIZE+2) <= cells.len() {
                ans.push((fields[0],fields[1],FluxSector { sector: fields[2], mark: dam.mark, data_cell: dam.content }));
            }
        }
    }
    ans
}

fn cells_from_bytes(buf: &[u8]) -> BitVec {
    let flipped: Vec<u8> = buf.iter().map(|b| b.reverse_bits()).collect();
    BitVec::from_bytes(&flipped)
}

fn bytes_from_cells(cells: &BitVec) -> Vec<u8> {
    cells.to_bytes().iter().map(|b| b.reverse_bits()).collect()
}

/// positions in the file of the bytes belonging to one side of a track
fn side_ranges(entry: &TrackEntry,side: usize) -> Vec<(usize,usize)> {
    let half = entry.track_len as usize / 2;
    let mut ans = Vec::new();
    let mut count = 0;
    let mut block = entry.offset as usize * BLOCK_SIZE;
    while count < half {
        let n = usize::min(SIDE_CHUNK,half - count);
        ans.push((block + side*SIDE_CHUNK,n));
        count += n;
        block += BLOCK_SIZE;
    }
    ans
}

/// Wrapper for HFE data.
pub struct Hfe {
    header: Header,
    lut: Vec<TrackEntry>,
    file: Vec<u8>,
    enc: TrackEncoding,
    geometry: Geometry,
    /// indexed by head*cylinders + cyl
    sides: Vec<Side>
}

impl Hfe {
    /// Create a formatted, zero filled HFE image
    pub fn create(enc: TrackEncoding,geometry: Geometry) -> Result<Self,DYNERR> {
        let track_len = enc.flux_track_len();
        let hfe_track_len = track_len * 4;
        let blocks_per_track = (hfe_track_len + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let lut_blocks = (geometry.cylinders*4 + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let header = Header {
            format_revision: 0,
            number_of_track: geometry.cylinders as u8,
            number_of_side: geometry.heads as u8,
            track_encoding: match enc { TrackEncoding::FM => ISOIBM_FM_ENCODING, TrackEncoding::MFM => ISOIBM_MFM_ENCODING },
            bit_rate: match enc { TrackEncoding::FM => 125, TrackEncoding::MFM => 250 },
            floppy_rpm: 300,
            interface_mode: GENERIC_SHUGART_DD_FLOPPYMODE,
            dnu: 1,
            track_list_offset: 1,
            write_allowed: 0xff,
            single_step: 0xff,
            t0s0_altencoding: 0xff,
            t0s0_encoding: 0xff,
            t0s1_altencoding: 0xff,
            t0s1_encoding: 0xff
        };
        let mut file = vec![0xff;BLOCK_SIZE*(1+lut_blocks)];
        let mut curs = Cursor::new(&mut file[..]);
        header.write(&mut curs).map_err(|e| img::struct_error("HFE header",e))?;
        let mut lut = Vec::new();
        for cyl in 0..geometry.cylinders {
            let entry = TrackEntry {
                offset: (1 + lut_blocks + cyl*blocks_per_track) as u16,
                track_len: hfe_track_len as u16
            };
            let mut curs = Cursor::new(&mut file[BLOCK_SIZE + cyl*4..BLOCK_SIZE + cyl*4 + 4]);
            entry.write(&mut curs).map_err(|e| img::struct_error("HFE track list",e))?;
            lut.push(entry);
        }
        file.resize(file.len() + geometry.cylinders*blocks_per_track*BLOCK_SIZE,0);
        let blank = vec![vec![0;SECTOR_SIZE];geometry.sectors];
        let mut sides: Vec<Side> = Vec::new();
        for t in 0..geometry.cylinders*geometry.heads {
            let cyl = t % geometry.cylinders;
            let head = t / geometry.cylinders;
            let trk = tracks::format_track(enc,cyl as u8,head as u8,&blank,track_len)?;
            let cells = cells_from_track(enc,&trk);
            let sectors = scan_cells(enc,&cells).into_iter().map(|(_,_,s)| s).collect();
            sides.push(Side { cells, sectors, dirty: true });
        }
        let mut ans = Self { header, lut, file, enc, geometry, sides };
        ans.flush();
        Ok(ans)
    }
    pub fn encoding(&self) -> TrackEncoding {
        self.enc
    }
    /// write modified cell streams back into the file buffer
    fn flush(&mut self) {
        let cyls = self.geometry.cylinders;
        for (t,side) in self.sides.iter_mut().enumerate() {
            if !side.dirty {
                continue;
            }
            let bytes = bytes_from_cells(&side.cells);
            let mut src = 0;
            for (pos,n) in side_ranges(&self.lut[t % cyls],t / cyls) {
                self.file[pos..pos+n].copy_from_slice(&bytes[src..src+n]);
                src += n;
            }
            side.dirty = false;
        }
    }
    fn locate(&self,lsec: usize) -> Result<(usize,FluxSector),DYNERR> {
        let [cyl,head,sec] = img::floppy_chs(&self.geometry,lsec)?;
        let t = head*self.geometry.cylinders + cyl;
        match self.sides[t].sectors.iter().find(|s| s.sector as usize==sec) {
            Some(s) => Ok((t,*s)),
            None => Err(Box::new(img::Error::SectorNotFound { cyl, head, sector: sec }))
        }
    }
    fn load_sides(file: &[u8],lut: &[TrackEntry],heads: usize,enc: TrackEncoding) -> Result<Vec<Side>,DYNERR> {
        let mut ans = Vec::new();
        for head in 0..heads {
            for entry in lut {
                let mut buf = Vec::new();
                for (pos,n) in side_ranges(entry,head) {
                    if pos + n > file.len() {
                        return Err(Box::new(img::Error::Truncated { needed: pos+n, found: file.len() }));
                    }
                    buf.extend_from_slice(&file[pos..pos+n]);
                }
                let cells = cells_from_bytes(&buf);
                let sectors = scan_cells(enc,&cells).into_iter().map(|(_,_,s)| s).collect();
                ans.push(Side { cells, sectors, dirty: false });
            }
        }
        Ok(ans)
    }
}

impl img::Container for Hfe {
    fn what_am_i(&self) -> img::ContainerFormat {
        img::ContainerFormat::Hfe
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
    fn is_write_protected(&self) -> bool {
        self.header.write_allowed==0
    }
    fn read_sector(&self,lsec: usize) -> Result<Vec<u8>,DYNERR> {
        let (t,s) = self.locate(lsec)?;
        Ok(decode_bytes(&self.sides[t].cells,s.data_cell,SECTOR_SIZE))
    }
    fn write_sector(&mut self,lsec: usize,dat: &[u8]) -> STDRESULT {
        if self.is_write_protected() {
            return Err(Box::new(img::Error::WriteProtected));
        }
        let (t,s) = self.locate(lsec)?;
        let mut field = img::quantize_block(dat,SECTOR_SIZE);
        let crc = tracks::field_crc(self.enc,s.mark,&field);
        field.extend_from_slice(&crc.to_be_bytes());
        let side = &mut self.sides[t];
        let prev = side.cells.get(s.data_cell-1).unwrap_or(false);
        let last = encode_bytes(self.enc,&mut side.cells,s.data_cell,&field,prev);
        // the clock of the first gap cell depends on the last CRC bit
        let end = s.data_cell + field.len()*16;
        if self.enc==TrackEncoding::MFM && end + 1 < side.cells.len() {
            let next = side.cells[end + 1];
            side.cells.set(end,!(last || next));
        }
        side.dirty = true;
        Ok(())
    }
    fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        if buf.len() < BLOCK_SIZE {
            return Err(Box::new(img::Error::ImageSizeMismatch(buf.len())));
        }
        let header = match Header::read(&mut Cursor::new(buf)) {
            Ok(h) => h,
            Err(_) => return Err(Box::new(img::Error::UnknownFormat))
        };
        if header.format_revision!=0 {
            warn!("HFE revision {} is not supported",header.format_revision);
            return Err(Box::new(img::Error::ImageTypeMismatch));
        }
        let heads = header.number_of_side as usize;
        let cyls = header.number_of_track as usize;
        if heads < 1 || heads > 2 || cyls==0 {
            return Err(Box::new(img::Error::BadField { field: "track or side count".to_string(), offset: 9 }));
        }
        let lut_pos = header.track_list_offset as usize * BLOCK_SIZE;
        if lut_pos + cyls*4 > buf.len() {
            return Err(Box::new(img::Error::Truncated { needed: lut_pos + cyls*4, found: buf.len() }));
        }
        let mut curs = Cursor::new(&buf[lut_pos..lut_pos + cyls*4]);
        let mut lut = Vec::new();
        for _i in 0..cyls {
            lut.push(TrackEntry::read(&mut curs).map_err(|e| img::struct_error("HFE track list",e))?);
        }
        let declared = match header.track_encoding {
            ISOIBM_FM_ENCODING => TrackEncoding::FM,
            _ => TrackEncoding::MFM
        };
        // some tools label FM tracks as MFM, so fall back to the other encoding
        let alternate = match declared { TrackEncoding::FM => TrackEncoding::MFM, TrackEncoding::MFM => TrackEncoding::FM };
        for enc in [declared,alternate] {
            let sides = Self::load_sides(buf,&lut,heads,enc)?;
            let spt = sides[0].sectors.len();
            if spt==0 {
                debug!("no {} sectors on first track",enc);
                continue;
            }
            let geometry = Geometry::new(cyls,heads,spt,SECTOR_SIZE);
            info!("identified {} HFE image, {}",enc,geometry);
            return Ok(Self { header, lut, file: buf.to_vec(), enc, geometry, sides });
        }
        Err(Box::new(img::Error::SectorNotFound { cyl: 0, head: 0, sector: 0 }))
    }
    fn to_bytes(&mut self) -> Result<Vec<u8>,DYNERR> {
        self.flush();
        Ok(self.file.clone())
    }
    fn get_metadata(&self,indent: Option<u16>) -> String {
        let mut root = json::JsonValue::new_object();
        root["hfe"] = json::JsonValue::new_object();
        root["hfe"]["geometry"] = json::JsonValue::String(self.geometry.to_string());
        root["hfe"]["encoding"] = json::JsonValue::String(self.enc.to_string());
        root["hfe"]["bit_rate"] = self.header.bit_rate.into();
        root["hfe"]["rpm"] = self.header.floppy_rpm.into();
        root["hfe"]["write_allowed"] = (self.header.write_allowed!=0).into();
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
    fn fm_mark_pattern() {
        let trk = tracks::TrackBuf { bytes: vec![0x00,0xfe,0x00], marks: vec![1] };
        let cells = cells_from_track(TrackEncoding::FM,&trk);
        let mut reg: u16 = 0;
        for i in 16..32 {
            reg = (reg << 1) | cells[i] as u16;
        }
        assert_eq!(reg,FM_IDAM);
    }

    #[test]
    fn cell_byte_order() {
        let cells = cells_from_bytes(&[0x01,0x80]);
        assert!(cells[0]);
        assert!(!cells[7]);
        assert!(cells[15]);
        assert_eq!(bytes_from_cells(&cells),vec![0x01,0x80]);
    }

    #[test]
    fn blank_dsdd() {
        let mut hfe = Hfe::create(TrackEncoding::MFM,Geometry::new(40,2,18,256)).unwrap();
        assert_eq!(hfe.sector_count(),1440);
        hfe.write_sector(1000,&[0x5a;256]).unwrap();
        let bytes = hfe.to_bytes().unwrap();
        let mut reloaded = Hfe::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.read_sector(1000).unwrap(),vec![0x5a;256]);
        assert_eq!(reloaded.read_sector(999).unwrap(),vec![0;256]);
        assert_eq!(reloaded.to_bytes().unwrap(),bytes);
    }

    fn adjacent_ones(cells: &BitVec) -> usize {
        (1..cells.len()).filter(|i| cells[*i] && cells[*i-1]).count()
    }

    #[test]
    fn mfm_writes_keep_clock_rule() {
        let mut hfe = Hfe::create(TrackEncoding::MFM,Geometry::new(40,2,18,256)).unwrap();
        let before: usize = hfe.sides.iter().map(|s| adjacent_ones(&s.cells)).sum();
        assert_eq!(before,0);
        for lsec in 0..200 {
            let dat: Vec<u8> = (0..256).map(|i| ((i*7 + lsec*13) % 256) as u8).collect();
            hfe.write_sector(lsec,&dat).unwrap();
        }
        let after: usize = hfe.sides.iter().map(|s| adjacent_ones(&s.cells)).sum();
        assert_eq!(after,0);
        let bytes = hfe.to_bytes().unwrap();
        let reloaded = Hfe::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.read_sector(199).unwrap()[1],((7 + 199*13) % 256) as u8);
    }
}
