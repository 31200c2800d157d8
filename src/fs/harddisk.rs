//! ## Hard disk layout
//!
//! Shared by the HFDC and SCSI controllers.  Sector 0 is the VIB, sectors 1-31
//! hold the allocation bitmap, and sectors 32-63 are a copy of 0-31.
//! Directories are a DDR plus a file index (FDIR), files are an FDR plus data.
//! All pointers are AU numbers.
//!
//! The only difference between controllers is the VIB: SCSI leaves the
//! sectors per track, heads, and timing bytes at zero.

use log::{debug,warn,error};
use super::{Controller,Error,VolumeKind};
use super::bitmap::{self,AllocationMap,BitOrder};
use super::catalog::{Catalog,Directory,DirId,Extent,FileId,TFile};
use super::types::*;
use super::volume::Volume;
use crate::img::Container;
use crate::{STDRESULT,DYNERR};

const MAX_RUNS: usize = 54;
const OWNER_OFFSET: usize = 0xfe;
const MAX_DEPTH: usize = 32;
/// bits available in sectors 1-31
pub const MAX_AUS: usize = (HD_BITMAP_SECTORS - 1) * SECTOR_SIZE * 8;

/// Find an HFDC geometry (cylinders,heads,sectors) that exactly fits `sectors`.
/// Heads are limited to 16 and sectors per track to 255, 32 per track is preferred.
pub fn hfdc_geometry(sectors: usize) -> Option<(usize,usize,usize)> {
    let fits = |h: usize,s: usize| sectors % (h*s)==0 && sectors / (h*s) <= 0x10000;
    for heads in 1..=16 {
        if fits(heads,32) {
            return Some((sectors/(heads*32),heads,32));
        }
    }
    for spt in (2..=255).rev() {
        for heads in 1..=16 {
            if fits(heads,spt) {
                return Some((sectors/(heads*spt),heads,spt));
            }
        }
    }
    None
}

impl Volume {
    pub(super) fn mount_harddisk(img: Box<dyn Container>,raw: &[u8]) -> Result<Self,DYNERR> {
        for lsec in 0..HD_BITMAP_SECTORS {
            if img.read_sector(lsec)? != img.read_sector(lsec + HD_BITMAP_SECTORS)? {
                error!("sector {} differs from its backup",lsec);
                return Err(Box::new(Error::Format(format!("sector {} does not match its backup at sector {}",lsec,lsec + HD_BITMAP_SECTORS))));
            }
        }
        let vib = HdVib::from_bytes(raw)?;
        let spau = (vib.au_heads >> 4) as usize + 1;
        let system_aus = HD_RESERVED_SECTORS.div_ceil(spau);
        if (vib.reserved as usize)*64 < system_aus {
            warn!("VIB reserves {} AUs, fewer than the {} system AUs",vib.reserved as usize*64,system_aus);
        }
        let mut map_bytes = Vec::new();
        for lsec in 1..HD_BITMAP_SECTORS {
            map_bytes.append(&mut img.read_sector(lsec)?);
        }
        let map = AllocationMap::from_bytes(&map_bytes,vib.total_aus as usize,system_aus,BitOrder::MsbFirst);
        let controller = match vib.sectors_per_track {
            0 => Controller::Scsi,
            _ => Controller::Hfdc
        };
        debug!("{} VIB: {} AUs of {} sectors",controller,vib.total_aus,spau);
        Ok(Self::bare(img,VolumeKind::HardDisk(controller),name_from_bytes(&vib.name),spau,system_aus,map))
    }
    /// Write the VIB, bitmap, backups, and an empty root index
    pub(super) fn write_blank_harddisk(img: &mut dyn Container,name: &str,controller: Controller,spau: usize) -> STDRESULT {
        if ![1,2,4,8,16].contains(&spau) {
            return Err(Box::new(Error::InvalidOperation(format!("{} sectors per AU is not allowed",spau))));
        }
        let sectors = img.sector_count();
        let total_aus = sectors / spau;
        let reserved = HD_RESERVED_SECTORS.div_ceil(spau);
        if total_aus > MAX_AUS || total_aus > u16::MAX as usize {
            return Err(Box::new(Error::InvalidOperation(format!("{} AUs will not fit the bitmap, use larger AUs",total_aus))));
        }
        if total_aus <= reserved + 1 {
            return Err(Box::new(Error::InvalidOperation(format!("{} sectors is too small for a hard disk",sectors))));
        }
        let (spt,heads) = match controller {
            Controller::Scsi => (0,1),
            Controller::Hfdc => {
                let geom = img.geometry();
                if geom.sectors > 1 && geom.sectors <= 255 && geom.heads <= 16 && geom.sector_len==SECTOR_SIZE {
                    (geom.sectors,geom.heads)
                } else {
                    match hfdc_geometry(sectors) {
                        Some((_,h,s)) => (s,h),
                        None => return Err(Box::new(Error::InvalidOperation(format!("no HFDC geometry for {} sectors",sectors))))
                    }
                }
            }
        };
        let vib = HdVib {
            name: name_to_bytes(name)?,
            total_aus: total_aus as u16,
            sectors_per_track: spt as u8,
            reserved: reserved.div_ceil(64) as u8,
            step_speed: 0,
            write_current: 0,
            au_heads: (((spau - 1) << 4) | (heads - 1)) as u8,
            precomp: 0,
            created: pack_time(None),
            files: 0,
            dirs: 0,
            fdir_au: reserved as u16,
            emulate_au: 0,
            subdirs: [0;HD_MAX_SUBDIRS]
        };
        let mut map = AllocationMap::new(total_aus,reserved,BitOrder::MsbFirst);
        map.mark(reserved,true)?;
        for lsec in 0..HD_RESERVED_SECTORS + spau {
            img.write_sector(lsec,&[0;SECTOR_SIZE])?;
        }
        let mut header = vib.to_bytes();
        header.append(&mut map.to_bytes((HD_BITMAP_SECTORS - 1) * SECTOR_SIZE));
        for (i,chunk) in header.chunks(SECTOR_SIZE).enumerate() {
            img.write_sector(i,chunk)?;
            img.write_sector(i + HD_BITMAP_SECTORS,chunk)?;
        }
        debug!("formatted {} with {} AUs of {} sectors",controller,total_aus,spau);
        Ok(())
    }
    pub(super) fn hd_scan(&self) -> Result<Catalog,DYNERR> {
        let vib = HdVib::from_bytes(&self.img.read_sector(0)?)?;
        let fdir = self.au_sector(vib.fdir_au as usize);
        let mut root = Directory::new(DirId::ROOT,&self.name,None,fdir);
        root.aus = vec![vib.fdir_au as usize];
        let mut cat = Catalog::new(root);
        self.hd_scan_dir(&mut cat,DirId::ROOT,fdir,&vib.subdirs,0)?;
        Ok(cat)
    }
    fn hd_scan_dir(&self,cat: &mut Catalog,dir: DirId,fdir: usize,subdirs: &[u16],depth: usize) -> STDRESULT {
        if depth > MAX_DEPTH {
            return Err(Box::new(Error::Format("directories nested too deeply".to_string())));
        }
        if fdir >= self.img.sector_count() {
            return Err(Box::new(Error::Format(format!("file index at sector {} is out of range",fdir))));
        }
        let buf = self.img.read_sector(fdir)?;
        for i in 0..MAX_FILES {
            let au = u16::from_be_bytes([buf[2*i],buf[2*i+1]]) as usize;
            if au==0 {
                break;
            }
            cat.add_file(self.hd_read_fdr(dir,au)?);
        }
        for ptr in subdirs.iter().take_while(|p| **p!=0) {
            let ddr_sec = self.au_sector(*ptr as usize);
            let id = DirId(ddr_sec);
            if ddr_sec >= self.img.sector_count() || cat.contains_dir(id) {
                error!("bad subdirectory pointer {}",ptr);
                return Err(Box::new(Error::Format(format!("bad subdirectory pointer to AU {}",ptr))));
            }
            let ddr = Ddr::from_bytes(&self.img.read_sector(ddr_sec)?)?;
            let sub_fdir = self.au_sector(ddr.fdir_au as usize);
            let mut sub = Directory::new(id,&name_from_bytes(&ddr.name),Some(dir),sub_fdir);
            sub.aus = vec![*ptr as usize,ddr.fdir_au as usize];
            cat.add_dir(sub);
            self.hd_scan_dir(cat,id,sub_fdir,&ddr.subdirs,depth + 1)?;
        }
        Ok(())
    }
    fn hd_read_fdr(&self,parent: DirId,au: usize) -> Result<TFile,DYNERR> {
        let lsec = self.au_sector(au);
        if au < self.reserved_aus || lsec >= self.img.sector_count() {
            return Err(Box::new(Error::Format(format!("file index points to AU {}",au))));
        }
        let fdr = Fdr::from_bytes(&self.img.read_sector(lsec)?)?;
        let name = name_from_bytes(&fdr.name);
        if fdr.next_au!=0 {
            error!("`{}` continues at AU {}",name,fdr.next_au);
            return Err(Box::new(Error::Format(format!("`{}` continues in another FDR, which is not supported",name))));
        }
        let spau = self.sectors_per_au;
        let sectors = fdr.sectors as usize;
        let mut extents = Vec::new();
        let mut aus = vec![au];
        let mut covered = 0;
        for [first,last] in fdr.chain.iter() {
            if covered >= sectors {
                break;
            }
            let (first,last) = (*first as usize,*last as usize);
            if first < self.reserved_aus || last < first || last >= self.bitmap.total() {
                return Err(Box::new(Error::Format(format!("bad data chain in `{}` at AU {}",name,au))));
            }
            let count = usize::min((last - first + 1) * spau,sectors - covered);
            extents.push(Extent { start: first*spau, count });
            aus.extend(first..=last);
            covered += count;
        }
        if covered < sectors {
            return Err(Box::new(Error::Format(format!("data chain of `{}` covers {} of {} sectors",name,covered,sectors))));
        }
        Ok(TFile {
            id: FileId(lsec),
            parent,
            name,
            meta: fdr.meta(),
            sectors,
            created: unpack_time(fdr.created),
            updated: unpack_time(fdr.updated),
            extents,
            aus
        })
    }
    /// Write the bitmap sectors, then bring the backup copy up to date
    pub(super) fn hd_flush_bitmap(&mut self) -> STDRESULT {
        let map = self.bitmap.to_bytes((HD_BITMAP_SECTORS - 1) * SECTOR_SIZE);
        for (i,chunk) in map.chunks(SECTOR_SIZE).enumerate() {
            self.update_sector(1 + i,chunk)?;
        }
        for lsec in 0..HD_BITMAP_SECTORS {
            let dat = self.img.read_sector(lsec)?;
            self.update_sector(lsec + HD_BITMAP_SECTORS,&dat)?;
        }
        Ok(())
    }
    /// Emulate file AU recorded in the VIB, 0 if none
    pub fn emulate_au(&self) -> Result<usize,DYNERR> {
        match self.kind {
            VolumeKind::HardDisk(_) => Ok(HdVib::from_bytes(&self.img.read_sector(0)?)?.emulate_au as usize),
            _ => Ok(0)
        }
    }
    fn hd_fdir_sector(&self,dir: DirId) -> Result<usize,DYNERR> {
        match self.catalog.dir(dir) {
            Some(d) => Ok(d.fdir),
            None => Err(Box::new(Error::NotFound(format!("directory at sector {}",dir.0))))
        }
    }
    pub(super) fn hd_write_fdir(&mut self,dir: DirId,ids: &[usize]) -> STDRESULT {
        let fdir = self.hd_fdir_sector(dir)?;
        let mut buf = self.img.read_sector(fdir)?;
        buf[0..OWNER_OFFSET].fill(0);
        for (i,id) in ids.iter().take(MAX_FILES).enumerate() {
            let au = (*id / self.sectors_per_au) as u16;
            buf[2*i..2*i+2].copy_from_slice(&au.to_be_bytes());
        }
        self.put_sector(fdir,&buf)
    }
    /// DDR sectors of the subdirectories sorted by name, optionally with one added or removed
    fn sorted_dirs(&self,dir: DirId,add: Option<(&str,usize)>,remove: Option<usize>) -> Vec<usize> {
        let mut dirs: Vec<(String,usize)> = self.catalog.subdirectories(dir).iter()
            .filter(|d| Some(d.id.0)!=remove)
            .map(|d| (d.name.clone(),d.id.0)).collect();
        if let Some((name,id)) = add {
            dirs.push((name.to_string(),id));
        }
        dirs.sort();
        dirs.into_iter().map(|(_,id)| id).collect()
    }
    /// Rewrite the subdirectory list of `dir` and adjust its counters
    fn hd_write_subdirs(&mut self,dir: DirId,ids: &[usize],dfiles: i32,ddirs: i32) -> STDRESULT {
        let spau = self.sectors_per_au;
        let mut ptrs = [0u16;HD_MAX_SUBDIRS];
        for (i,id) in ids.iter().take(HD_MAX_SUBDIRS).enumerate() {
            ptrs[i] = (*id / spau) as u16;
        }
        let adjust = |count: u8,delta: i32| (count as i32 + delta).clamp(0,255) as u8;
        if dir==DirId::ROOT {
            let mut vib = HdVib::from_bytes(&self.img.read_sector(0)?)?;
            vib.subdirs = ptrs;
            vib.files = adjust(vib.files,dfiles);
            vib.dirs = adjust(vib.dirs,ddirs);
            self.put_sector(0,&vib.to_bytes())
        } else {
            let mut ddr = Ddr::from_bytes(&self.img.read_sector(dir.0)?)?;
            ddr.subdirs = ptrs;
            ddr.files = adjust(ddr.files,dfiles);
            ddr.dirs = adjust(ddr.dirs,ddirs);
            self.put_sector(dir.0,&ddr.to_bytes())
        }
    }
    fn hd_count_file(&mut self,dir: DirId,delta: i32) -> STDRESULT {
        let ids = self.sorted_dirs(dir,None,None);
        self.hd_write_subdirs(dir,&ids,delta,0)
    }
    pub(super) fn hd_create_file(&mut self,parent: DirId,name: &str,meta: &FileMeta,content: &[u8]) -> Result<FileId,DYNERR> {
        let spau = self.sectors_per_au;
        let sectors = content.len().div_ceil(SECTOR_SIZE);
        if sectors > u16::MAX as usize {
            return Err(Box::new(Error::Image(format!("{} sectors is too large for one FDR",sectors))));
        }
        let data_aus = sectors.div_ceil(spau);
        let aus = self.bitmap.allocate(1 + data_aus)?;
        let runs = bitmap::runs(&aus[1..]);
        if runs.len() > MAX_RUNS {
            return Err(Box::new(Error::Image(format!("`{}` would need {} runs, limit is {}",name,runs.len(),MAX_RUNS))));
        }
        let mut chain = [[0u16;2];MAX_RUNS];
        for (i,(first,last)) in runs.iter().enumerate() {
            chain[i] = [*first as u16,*last as u16];
        }
        let now = pack_time(None);
        let fdr = Fdr {
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
            prev_au: 0,
            next_au: 0,
            aus: data_aus as u16,
            fdir_au: (self.hd_fdir_sector(parent)? / spau) as u16,
            ext_info: 0,
            chain
        };
        self.write_content(&aus[1..],content)?;
        let fdr_sec = self.au_sector(aus[0]);
        self.put_sector(fdr_sec,&fdr.to_bytes())?;
        let ids = self.sorted_files(parent,Some((name,fdr_sec)),None);
        self.hd_write_fdir(parent,&ids)?;
        self.hd_count_file(parent,1)?;
        debug!("created `{}` with FDR at AU {}",name,aus[0]);
        Ok(FileId(fdr_sec))
    }
    pub(super) fn hd_unlink_file(&mut self,file: &TFile) -> STDRESULT {
        let ids = self.sorted_files(file.parent,None,Some(file.id.0));
        self.hd_write_fdir(file.parent,&ids)?;
        self.hd_count_file(file.parent,-1)
    }
    pub(super) fn hd_create_dir(&mut self,parent: DirId,name: &str) -> Result<DirId,DYNERR> {
        let spau = self.sectors_per_au;
        let aus = self.bitmap.allocate(2)?;
        let (ddr_au,fdir_au) = (aus[0],aus[1]);
        let vib = HdVib::from_bytes(&self.img.read_sector(0)?)?;
        let ddr = Ddr {
            name: name_to_bytes(name)?,
            total_aus: vib.total_aus,
            sectors_per_track: vib.sectors_per_track,
            created: pack_time(None),
            files: 0,
            dirs: 0,
            fdir_au: fdir_au as u16,
            parent_au: match parent {
                DirId::ROOT => 0,
                p => (p.0 / spau) as u16
            },
            subdirs: [0;HD_MAX_SUBDIRS],
            reserved: 0
        };
        let ddr_sec = self.au_sector(ddr_au);
        self.put_sector(ddr_sec,&ddr.to_bytes())?;
        let mut fdir = vec![0u8;SECTOR_SIZE];
        fdir[OWNER_OFFSET..].copy_from_slice(&(ddr_au as u16).to_be_bytes());
        self.put_sector(self.au_sector(fdir_au),&fdir)?;
        let ids = self.sorted_dirs(parent,Some((name,ddr_sec)),None);
        self.hd_write_subdirs(parent,&ids,0,1)?;
        Ok(DirId(ddr_sec))
    }
    pub(super) fn hd_unlink_dir(&mut self,dir: &Directory) -> STDRESULT {
        let parent = dir.parent.unwrap_or(DirId::ROOT);
        let ids = self.sorted_dirs(parent,None,Some(dir.id.0));
        self.hd_write_subdirs(parent,&ids,0,-1)
    }
    pub(super) fn hd_rename_dir(&mut self,dir: &Directory,name: &str) -> STDRESULT {
        let mut ddr = Ddr::from_bytes(&self.img.read_sector(dir.id.0)?)?;
        ddr.name = name_to_bytes(name)?;
        self.put_sector(dir.id.0,&ddr.to_bytes())?;
        let parent = dir.parent.unwrap_or(DirId::ROOT);
        let ids = self.sorted_dirs(parent,Some((name,dir.id.0)),Some(dir.id.0));
        self.hd_write_subdirs(parent,&ids,0,0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_search() {
        assert_eq!(hfdc_geometry(32*4*100),Some((400,1,32)));
        assert_eq!(hfdc_geometry(16*16),Some((8,1,32)));
        // 51 is not a multiple of 32, so the largest track that divides it
        assert_eq!(hfdc_geometry(17*3),Some((1,1,51)));
    }
}
