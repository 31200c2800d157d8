//! ## Floppy layout
//!
//! The TI disk controller layout, also used by each CF7 volume.
//! Sector 0 is the VIB with the allocation bitmap, sector 1 is the root file index.
//! Subdirectories live only in the root, as slots in the VIB pointing to their own
//! file index sector.

use log::{debug,error};
use super::{Error,VolumeKind};
use super::bitmap::{self,AllocationMap,BitOrder};
use super::catalog::{Catalog,Directory,DirId,Extent,FileId,TFile};
use super::types::*;
use super::volume::Volume;
use crate::img::{Container,ContainerFormat};
use crate::{STDRESULT,DYNERR};

const ROOT_FDIR: usize = 1;
const BITMAP_BYTES: usize = 200;
const MAX_CLUSTERS: usize = 76;
/// cluster offsets are 12 bits
const MAX_SECTORS: usize = 0x1000;

/// Sectors per AU, chosen so the bitmap covers the volume
pub fn au_size(total_sectors: usize) -> usize {
    match total_sectors <= FLOPPY_MAX_AUS {
        true => 1,
        false => total_sectors.div_ceil(FLOPPY_MAX_AUS).next_power_of_two()
    }
}

impl Volume {
    pub(super) fn mount_floppy(img: Box<dyn Container>,raw: &[u8]) -> Result<Self,DYNERR> {
        let vib = FloppyVib::from_bytes(raw)?;
        let total = vib.total_sectors as usize;
        if total <= ROOT_FDIR || total > img.sector_count() {
            error!("VIB declares {} sectors, image has {}",total,img.sector_count());
            return Err(Box::new(Error::Format(format!("VIB declares {} sectors but the image has {}",total,img.sector_count()))));
        }
        let spau = au_size(total);
        let reserved = (ROOT_FDIR + 1).div_ceil(spau);
        let kind = match img.what_am_i() {
            ContainerFormat::Cf7 => VolumeKind::Cf7,
            _ => VolumeKind::Floppy
        };
        let map = AllocationMap::from_bytes(&vib.bitmap,total / spau,reserved,BitOrder::LsbFirst);
        let mut vol = Self::bare(img,kind,name_from_bytes(&vib.name),spau,reserved,map);
        vol.protected = vib.protection==b'P';
        Ok(vol)
    }
    /// Write an empty volume, every sector is zeroed first
    pub(super) fn write_blank_floppy(img: &mut dyn Container,name: &str) -> STDRESULT {
        let total = img.sector_count();
        if total <= ROOT_FDIR || total > u16::MAX as usize {
            return Err(Box::new(Error::InvalidOperation(format!("cannot put a floppy volume on {} sectors",total))));
        }
        let spau = au_size(total);
        let mut vib = FloppyVib::new(name,&img.geometry())?;
        vib.total_sectors = total as u16;
        let map = AllocationMap::new(total / spau,(ROOT_FDIR + 1).div_ceil(spau),BitOrder::LsbFirst);
        vib.bitmap.copy_from_slice(&map.to_bytes(BITMAP_BYTES));
        for lsec in 0..total {
            img.write_sector(lsec,&[0;SECTOR_SIZE])?;
        }
        img.write_sector(0,&vib.to_bytes())?;
        debug!("formatted floppy with {} sectors, {} per AU",total,spau);
        Ok(())
    }
    pub(super) fn floppy_scan(&self) -> Result<Catalog,DYNERR> {
        let vib = FloppyVib::from_bytes(&self.img.read_sector(0)?)?;
        let mut cat = Catalog::new(Directory::new(DirId::ROOT,&self.name,None,ROOT_FDIR));
        self.floppy_scan_fdir(&mut cat,DirId::ROOT,ROOT_FDIR)?;
        for slot in vib.dirs.iter().filter(|s| s.fdir!=0) {
            let fdir = slot.fdir as usize;
            if fdir <= ROOT_FDIR || fdir >= self.img.sector_count() || cat.contains_dir(DirId(fdir)) {
                return Err(Box::new(Error::Format(format!("bad subdirectory pointer {}",fdir))));
            }
            let mut dir = Directory::new(DirId(fdir),&name_from_bytes(&slot.name),Some(DirId::ROOT),fdir);
            dir.aus = vec![fdir / self.sectors_per_au];
            cat.add_dir(dir);
            self.floppy_scan_fdir(&mut cat,DirId(fdir),fdir)?;
        }
        Ok(cat)
    }
    fn floppy_scan_fdir(&self,cat: &mut Catalog,dir: DirId,fdir: usize) -> STDRESULT {
        let buf = self.img.read_sector(fdir)?;
        for i in 0..MAX_FILES {
            let ptr = u16::from_be_bytes([buf[2*i],buf[2*i+1]]) as usize;
            if ptr==0 {
                break;
            }
            cat.add_file(self.floppy_read_fib(dir,ptr)?);
        }
        Ok(())
    }
    fn floppy_read_fib(&self,parent: DirId,lsec: usize) -> Result<TFile,DYNERR> {
        if lsec <= ROOT_FDIR || lsec >= self.img.sector_count() {
            return Err(Box::new(Error::Format(format!("file index points to sector {}",lsec))));
        }
        let fib = Fib::from_bytes(&self.img.read_sector(lsec)?)?;
        let name = name_from_bytes(&fib.name);
        let spau = self.sectors_per_au;
        let sectors = fib.sectors as usize;
        let mut extents = Vec::new();
        let mut aus = vec![lsec / spau];
        let mut covered = 0;
        for raw in fib.chain.iter() {
            if covered >= sectors {
                break;
            }
            let (start,offset) = unpack_cluster(raw);
            if start==0 || offset < covered || start*spau + offset + 1 - covered > self.img.sector_count() {
                error!("bad cluster ({},{}) in `{}`",start,offset,name);
                return Err(Box::new(Error::Format(format!("bad data chain in `{}` at sector {}",name,lsec))));
            }
            let count = offset + 1 - covered;
            extents.push(Extent { start: start*spau, count });
            aus.extend(start..start + count.div_ceil(spau));
            covered = offset + 1;
        }
        if covered < sectors {
            return Err(Box::new(Error::Format(format!("data chain of `{}` covers {} of {} sectors",name,covered,sectors))));
        }
        Ok(TFile {
            id: FileId(lsec),
            parent,
            name,
            meta: fib.meta(),
            sectors,
            created: unpack_time(fib.created),
            updated: unpack_time(fib.updated),
            extents,
            aus
        })
    }
    pub(super) fn floppy_flush_bitmap(&mut self) -> STDRESULT {
        let mut vib = FloppyVib::from_bytes(&self.img.read_sector(0)?)?;
        vib.bitmap.copy_from_slice(&self.bitmap.to_bytes(BITMAP_BYTES));
        self.update_sector(0,&vib.to_bytes())
    }
    pub(super) fn floppy_write_protection(&mut self,protect: bool) -> STDRESULT {
        let mut vib = self.img.read_sector(0)?;
        vib[0x10] = match protect { true => b'P', false => b' ' };
        self.put_sector(0,&vib)
    }
    pub(super) fn floppy_write_fdir(&mut self,dir: DirId,ids: &[usize]) -> STDRESULT {
        let fdir = match self.catalog.dir(dir) {
            Some(d) => d.fdir,
            None => return Err(Box::new(Error::NotFound(format!("directory at sector {}",dir.0))))
        };
        let mut buf = vec![0u8;SECTOR_SIZE];
        for (i,id) in ids.iter().take(MAX_FILES).enumerate() {
            buf[2*i..2*i+2].copy_from_slice(&(*id as u16).to_be_bytes());
        }
        self.put_sector(fdir,&buf)
    }
    pub(super) fn floppy_create_file(&mut self,parent: DirId,name: &str,meta: &FileMeta,content: &[u8]) -> Result<FileId,DYNERR> {
        let spau = self.sectors_per_au;
        let sectors = content.len().div_ceil(SECTOR_SIZE);
        if sectors >= MAX_SECTORS {
            return Err(Box::new(Error::Image(format!("{} sectors is too large for a floppy file",sectors))));
        }
        let aus = self.bitmap.allocate(1 + sectors.div_ceil(spau))?;
        let runs = bitmap::runs(&aus[1..]);
        if runs.len() > MAX_CLUSTERS {
            return Err(Box::new(Error::Image(format!("`{}` would need {} clusters, limit is {}",name,runs.len(),MAX_CLUSTERS))));
        }
        let mut chain = [[0u8;3];MAX_CLUSTERS];
        let mut covered = 0;
        for (i,(first,last)) in runs.iter().enumerate() {
            covered += usize::min((last - first + 1) * spau,sectors - covered);
            chain[i] = pack_cluster(*first,covered - 1);
        }
        let now = pack_time(None);
        let fib = Fib {
            name: name_to_bytes(name)?,
            ext_record_len: 0,
            flags: meta.flags,
            records_per_sector: meta.records_per_sector,
            sectors: sectors as u16,
            eof_offset: meta.eof_offset,
            record_len: meta.record_len,
            l3_count: meta.l3_count,
            created: now,
            updated: now,
            chain
        };
        self.write_content(&aus[1..],content)?;
        let fib_sec = self.au_sector(aus[0]);
        self.put_sector(fib_sec,&fib.to_bytes())?;
        let ids = self.sorted_files(parent,Some((name,fib_sec)),None);
        self.floppy_write_fdir(parent,&ids)?;
        debug!("created `{}` with FIB at sector {}",name,fib_sec);
        Ok(FileId(fib_sec))
    }
    pub(super) fn floppy_unlink_file(&mut self,file: &TFile) -> STDRESULT {
        let ids = self.sorted_files(file.parent,None,Some(file.id.0));
        self.floppy_write_fdir(file.parent,&ids)
    }
    /// Rewrite the VIB directory slots sorted by name, with one slot added, renamed or removed
    fn floppy_write_slots(&mut self,add: Option<(&str,usize)>,remove: Option<usize>) -> STDRESULT {
        let mut vib = FloppyVib::from_bytes(&self.img.read_sector(0)?)?;
        let mut slots: Vec<FloppyDirSlot> = vib.dirs.iter()
            .filter(|s| s.fdir!=0 && Some(s.fdir as usize)!=remove)
            .copied().collect();
        if let Some((name,fdir)) = add {
            slots.push(FloppyDirSlot { name: name_to_bytes(name)?, fdir: fdir as u16 });
        }
        if slots.len() > vib.dirs.len() {
            return Err(Box::new(Error::Image("no free directory slot in the VIB".to_string())));
        }
        slots.sort_by(|a,b| a.name.cmp(&b.name));
        vib.dirs = [FloppyDirSlot::default();3];
        for (i,slot) in slots.into_iter().enumerate() {
            vib.dirs[i] = slot;
        }
        self.put_sector(0,&vib.to_bytes())
    }
    pub(super) fn floppy_create_dir(&mut self,name: &str) -> Result<DirId,DYNERR> {
        let aus = self.bitmap.allocate(1)?;
        let fdir = self.au_sector(aus[0]);
        self.put_sector(fdir,&[0u8;SECTOR_SIZE])?;
        self.floppy_write_slots(Some((name,fdir)),None)?;
        Ok(DirId(fdir))
    }
    pub(super) fn floppy_unlink_dir(&mut self,dir: &Directory) -> STDRESULT {
        self.floppy_write_slots(None,Some(dir.id.0))
    }
    pub(super) fn floppy_rename_dir(&mut self,dir: &Directory,name: &str) -> STDRESULT {
        self.floppy_write_slots(Some((name,dir.id.0)),Some(dir.id.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn au_sizes() {
        assert_eq!(au_size(360),1);
        assert_eq!(au_size(1600),1);
        assert_eq!(au_size(2880),2);
        assert_eq!(au_size(5760),4);
    }
}
