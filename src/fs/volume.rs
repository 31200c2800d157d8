//! ## Volume
//!
//! A `Volume` owns a container and interprets it as one TI file system.
//! Every structural change runs inside a transaction: sectors are copied before
//! they are first written, the bitmap is flushed at commit, and the generation
//! counter advances.  The copies become the undo record.  If the change fails
//! partway, the copies are written back and the volume is as it was.
//!
//! Floppy and CF7 volumes share the TI disk controller layout (`floppy`),
//! HFDC and SCSI volumes share the hard disk layout (`harddisk`).

use log::{debug,info,warn,error};
use super::{Error,MountOptions,VolumeKind,Controller};
use super::bitmap::AllocationMap;
use super::catalog::{Catalog,Directory,DirId,Entry,FileId,TFile};
use super::records;
use super::types::*;
use super::undo::{Patch,UndoRecord};
use crate::img;
use crate::img::Container;
use crate::{STDRESULT,DYNERR};

/// How to pack records into a new file
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct RecordFormat {
    pub variable: bool,
    pub internal: bool,
    pub record_len: u8
}

impl RecordFormat {
    /// The common text file type
    pub fn dis_var_80() -> Self {
        Self { variable: true, internal: false, record_len: 80 }
    }
}

/// One mounted file system
pub struct Volume {
    pub(super) img: Box<dyn Container>,
    pub(super) kind: VolumeKind,
    pub(super) name: String,
    pub(super) sectors_per_au: usize,
    pub(super) reserved_aus: usize,
    pub(super) bitmap: AllocationMap,
    pub(super) protected: bool,
    pub(super) read_only: bool,
    pub(super) generation: u64,
    pub(super) undo: Option<UndoRecord>,
    pub(super) pending: Option<Patch>,
    pub(super) catalog: Catalog
}

impl Volume {
    /// Interpret a container as a volume, fails if sector 0 is not a VIB
    pub fn mount(img: Box<dyn Container>,opts: MountOptions) -> Result<Self,DYNERR> {
        let vib = img.read_sector(0)?;
        let mut vol = if &vib[0x0d..0x10]==b"DSK" {
            Self::mount_floppy(img,&vib)?
        } else if img::raw_hd::probe_vib(&vib,img.sector_count()).is_some() {
            Self::mount_harddisk(img,&vib)?
        } else {
            error!("sector 0 is not a volume information block");
            return Err(Box::new(Error::Format("no volume information block in sector 0".to_string())));
        };
        vol.read_only = opts.read_only;
        if opts.read_only {
            vol.protected = true;
        }
        vol.catalog = vol.scan()?;
        if !vol.check_bitmap() {
            warn!("allocation bitmap does not agree with the catalog");
        }
        info!("mounted {} volume `{}`, {} of {} AUs free",vol.kind,vol.name,vol.free_aus(),vol.total_aus());
        Ok(vol)
    }
    /// Empty shell used by the layout modules while mounting
    pub(super) fn bare(img: Box<dyn Container>,kind: VolumeKind,name: String,sectors_per_au: usize,reserved_aus: usize,bitmap: AllocationMap) -> Self {
        let root = Directory::new(DirId::ROOT,&name,None,0);
        Self {
            img,
            kind,
            name,
            sectors_per_au,
            reserved_aus,
            bitmap,
            protected: false,
            read_only: false,
            generation: 0,
            undo: None,
            pending: None,
            catalog: Catalog::new(root)
        }
    }
    /// Format a floppy or CF7 volume, the container's geometry decides the size
    pub fn format_floppy(img: Box<dyn Container>,name: &str) -> Result<Self,DYNERR> {
        let mut img = img;
        Self::write_blank_floppy(img.as_mut(),name)?;
        Self::mount(img,MountOptions::default())
    }
    /// Format a hard disk volume
    pub fn format_harddisk(img: Box<dyn Container>,name: &str,controller: Controller,sectors_per_au: usize) -> Result<Self,DYNERR> {
        let mut img = img;
        Self::write_blank_harddisk(img.as_mut(),name,controller,sectors_per_au)?;
        Self::mount(img,MountOptions::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> VolumeKind {
        self.kind
    }
    pub fn generation(&self) -> u64 {
        self.generation
    }
    pub fn is_protected(&self) -> bool {
        self.protected
    }
    pub fn sectors_per_au(&self) -> usize {
        self.sectors_per_au
    }
    pub fn total_aus(&self) -> usize {
        self.bitmap.total()
    }
    pub fn free_aus(&self) -> usize {
        self.bitmap.free_count()
    }
    pub fn bitmap(&self) -> &AllocationMap {
        &self.bitmap
    }
    pub fn can_undo(&self) -> bool {
        self.undo.is_some()
    }
    pub fn container(&self) -> &dyn Container {
        self.img.as_ref()
    }
    pub fn into_container(self) -> Box<dyn Container> {
        self.img
    }
    /// Serialize the underlying container
    pub fn to_bytes(&mut self) -> Result<Vec<u8>,DYNERR> {
        self.img.to_bytes()
    }
    /// Every used bit is either reserved or owned by something in the catalog
    pub fn check_bitmap(&self) -> bool {
        self.bitmap.used_count()==self.reserved_aus + self.catalog.aus_in_use()
    }

    // Navigation

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
    pub fn root_directory(&self) -> &Directory {
        // the root is inserted when the catalog is built
        match self.catalog.dir(DirId::ROOT) {
            Some(d) => d,
            None => unreachable!("catalog without root")
        }
    }
    pub fn directory(&self,id: DirId) -> Option<&Directory> {
        self.catalog.dir(id)
    }
    pub fn file(&self,id: FileId) -> Option<&TFile> {
        self.catalog.file(id)
    }
    pub fn children(&self,id: DirId) -> Vec<&TFile> {
        self.catalog.children(id)
    }
    pub fn subdirectories(&self,id: DirId) -> Vec<&Directory> {
        self.catalog.subdirectories(id)
    }
    pub fn resolve(&self,path: &str) -> Result<Entry,DYNERR> {
        match self.catalog.resolve(path) {
            Some(e) => Ok(e),
            None => Err(Box::new(Error::NotFound(path.to_string())))
        }
    }
    fn get_file(&self,id: FileId) -> Result<&TFile,DYNERR> {
        match self.catalog.file(id) {
            Some(f) => Ok(f),
            None => Err(Box::new(Error::NotFound(format!("file at sector {}",id.0))))
        }
    }
    fn get_dir(&self,id: DirId) -> Result<&Directory,DYNERR> {
        match self.catalog.dir(id) {
            Some(d) => Ok(d),
            None => Err(Box::new(Error::NotFound(format!("directory at sector {}",id.0))))
        }
    }

    // Sector access

    pub fn read_sector(&self,lsec: usize) -> Result<Vec<u8>,DYNERR> {
        self.img.read_sector(lsec)
    }
    /// Write a sector as its own undoable change
    pub fn write_sector(&mut self,lsec: usize,dat: &[u8]) -> STDRESULT {
        self.mutate(|vol| vol.put_sector(lsec,dat))
    }
    /// Write a sector, saving the old bytes if a change is in progress
    pub(super) fn put_sector(&mut self,lsec: usize,dat: &[u8]) -> STDRESULT {
        if self.pending.is_some() {
            let old = self.img.read_sector(lsec)?;
            if let Some(patch) = self.pending.as_mut() {
                patch.record(lsec,&old);
            }
        }
        log::trace!("write sector {}",lsec);
        self.img.write_sector(lsec,dat)
    }
    /// Write only if the contents differ
    pub(super) fn update_sector(&mut self,lsec: usize,dat: &[u8]) -> STDRESULT {
        if self.img.read_sector(lsec)?.as_slice()!=&img::quantize_block(dat,SECTOR_SIZE)[..] {
            self.put_sector(lsec,dat)?;
        }
        Ok(())
    }
    pub(super) fn au_sector(&self,au: usize) -> usize {
        au * self.sectors_per_au
    }
    /// Write `content` across the sectors of `aus`, zero padding the last sector
    pub(super) fn write_content(&mut self,aus: &[usize],content: &[u8]) -> STDRESULT {
        for (i,chunk) in content.chunks(SECTOR_SIZE).enumerate() {
            let lsec = self.au_sector(aus[i / self.sectors_per_au]) + i % self.sectors_per_au;
            self.put_sector(lsec,chunk)?;
        }
        Ok(())
    }

    // Allocation and generations

    fn check_writable(&self) -> STDRESULT {
        if self.protected || self.read_only || self.img.is_write_protected() {
            error!("volume `{}` is write protected",self.name);
            return Err(Box::new(Error::Protected));
        }
        Ok(())
    }
    fn begin(&mut self) {
        if self.pending.is_none() {
            self.pending = Some(Patch::new(self.bitmap.clone()));
        }
    }
    /// First-fit allocation of `count` AUs, all or nothing
    pub fn allocate(&mut self,count: usize) -> Result<Vec<usize>,DYNERR> {
        self.check_writable()?;
        self.begin();
        let ans = self.bitmap.allocate(count)?;
        debug!("allocated AUs {:?}",ans);
        Ok(ans)
    }
    pub fn free(&mut self,aus: &[usize]) -> STDRESULT {
        self.check_writable()?;
        self.begin();
        self.bitmap.free(aus)
    }
    /// Close the current generation.  With `commit` the bitmap is written and the
    /// changes since the last generation become the undo record.
    pub fn next_generation(&mut self,commit: bool) -> STDRESULT {
        if commit {
            self.begin();
            self.flush_bitmap()?;
        }
        // the pending patch stays in place until the new state is known to be readable
        let catalog = self.scan()?;
        if commit {
            if let Some(patch) = self.pending.take() {
                if !patch.is_empty() {
                    debug!("generation {} touched sectors {:?}",self.generation,patch.touched());
                    self.undo = Some(UndoRecord { generation: self.generation, patch, protection: false });
                }
            }
        }
        self.generation += 1;
        self.catalog = catalog;
        Ok(())
    }
    /// Put back whatever the pending change wrote
    fn rollback(&mut self) -> STDRESULT {
        if let Some(patch) = self.pending.take() {
            warn!("rolling back {} sectors",patch.touched().len());
            for (lsec,old) in patch.sectors() {
                self.img.write_sector(*lsec,old)?;
            }
            self.bitmap = patch.bitmap().clone();
        }
        self.catalog = self.scan()?;
        Ok(())
    }
    /// Restore the state before the last committed change
    pub fn undo(&mut self) -> STDRESULT {
        let toggled = match &self.undo {
            Some(record) => record.protection,
            None => false
        };
        if !toggled || self.read_only || self.img.is_write_protected() {
            self.check_writable()?;
        }
        if self.undo.is_none() {
            return Err(Box::new(Error::NothingToUndo));
        }
        if self.pending.is_some() {
            self.rollback()?;
        }
        if let Some(record) = self.undo.take() {
            for (lsec,old) in record.patch.sectors() {
                self.img.write_sector(*lsec,old)?;
            }
            self.bitmap = record.patch.bitmap().clone();
            self.reload_header()?;
            info!("restored generation {}",record.generation);
        }
        self.generation += 1;
        self.catalog = self.scan()?;
        Ok(())
    }
    fn transact<T,F>(&mut self,check_protection: bool,f: F) -> Result<T,DYNERR> where F: FnOnce(&mut Self) -> Result<T,DYNERR> {
        if check_protection {
            self.check_writable()?;
        }
        self.begin();
        match f(self) {
            Ok(ans) => match self.next_generation(true) {
                Ok(()) => Ok(ans),
                Err(e) => {
                    if let Err(e2) = self.rollback() {
                        error!("rollback failed: {}",e2);
                    }
                    Err(e)
                }
            },
            Err(e) => {
                if let Err(e2) = self.rollback() {
                    error!("rollback failed: {}",e2);
                }
                Err(e)
            }
        }
    }
    /// Run a structural change as one generation
    pub(super) fn mutate<T,F>(&mut self,f: F) -> Result<T,DYNERR> where F: FnOnce(&mut Self) -> Result<T,DYNERR> {
        self.transact(true,f)
    }

    // Volume level changes

    pub fn set_protected(&mut self,protect: bool) -> STDRESULT {
        if self.read_only {
            return Err(Box::new(Error::Protected));
        }
        let generation = self.generation;
        self.transact(false,|vol| {
            vol.write_protection(protect)?;
            vol.protected = protect;
            Ok(())
        })?;
        if let Some(record) = self.undo.as_mut() {
            if record.generation==generation {
                record.protection = true;
            }
        }
        Ok(())
    }
    pub fn rename(&mut self,new_name: &str) -> STDRESULT {
        let raw = name_to_bytes(new_name)?;
        self.mutate(|vol| {
            let mut vib = vol.read_sector(0)?;
            vib[0..MAX_NAME_LEN].copy_from_slice(&raw);
            vol.put_sector(0,&vib)?;
            vol.name = new_name.to_string();
            Ok(())
        })
    }

    // Files and directories

    fn check_new_name(&self,parent: DirId,name: &str) -> STDRESULT {
        if !is_name_valid(name) {
            return Err(Box::new(Error::InvalidName(name.to_string())));
        }
        self.get_dir(parent)?;
        if self.catalog.find(parent,name).is_some() {
            return Err(Box::new(Error::FileExists(name.to_string())));
        }
        Ok(())
    }
    /// Create a file holding `content`, which is stored as whole sectors
    pub fn create_file(&mut self,parent: DirId,name: &str,meta: FileMeta,content: &[u8]) -> Result<FileId,DYNERR> {
        self.check_writable()?;
        self.check_new_name(parent,name)?;
        if self.catalog.children(parent).len() >= MAX_FILES {
            return Err(Box::new(Error::Image(format!("directory already holds {} files",MAX_FILES))));
        }
        let name = name.to_string();
        self.mutate(|vol| match vol.kind {
            VolumeKind::HardDisk(_) => vol.hd_create_file(parent,&name,&meta,content),
            _ => vol.floppy_create_file(parent,&name,&meta,content)
        })
    }
    /// Create a program file from a memory image
    pub fn create_program(&mut self,parent: DirId,name: &str,image: &[u8]) -> Result<FileId,DYNERR> {
        self.create_file(parent,name,FileMeta::program(image.len()),image)
    }
    /// Create a data file from a list of records
    pub fn create_records_file(&mut self,parent: DirId,name: &str,fmt: RecordFormat,recs: &[Vec<u8>]) -> Result<FileId,DYNERR> {
        let (dat,meta) = match fmt.variable {
            true => records::encode_variable(recs,fmt.record_len,fmt.internal)?,
            false => records::encode_fixed(recs,fmt.record_len,fmt.internal)?
        };
        self.create_file(parent,name,meta,&dat)
    }
    pub fn create_subdirectory(&mut self,parent: DirId,name: &str) -> Result<DirId,DYNERR> {
        self.check_writable()?;
        match self.kind {
            VolumeKind::Cf7 => {
                error!("CF7 volumes cannot have subdirectories");
                return Err(Box::new(Error::InvalidOperation("CF7 volumes do not support subdirectories".to_string())));
            },
            VolumeKind::Floppy => {
                if parent!=DirId::ROOT {
                    return Err(Box::new(Error::InvalidOperation("floppy subdirectories must be in the root".to_string())));
                }
                if self.catalog.subdirectories(parent).len() >= FLOPPY_MAX_SUBDIRS {
                    return Err(Box::new(Error::InvalidOperation(format!("floppy allows {} subdirectories",FLOPPY_MAX_SUBDIRS))));
                }
            },
            VolumeKind::HardDisk(_) => {
                if self.catalog.subdirectories(parent).len() >= HD_MAX_SUBDIRS {
                    return Err(Box::new(Error::Image(format!("directory already holds {} subdirectories",HD_MAX_SUBDIRS))));
                }
            }
        }
        self.check_new_name(parent,name)?;
        let name = name.to_string();
        self.mutate(|vol| match vol.kind {
            VolumeKind::HardDisk(_) => vol.hd_create_dir(parent,&name),
            _ => vol.floppy_create_dir(&name)
        })
    }
    pub fn delete_file(&mut self,id: FileId) -> STDRESULT {
        self.check_writable()?;
        let file = self.get_file(id)?.clone();
        self.mutate(|vol| {
            match vol.kind {
                VolumeKind::HardDisk(_) => vol.hd_unlink_file(&file)?,
                _ => vol.floppy_unlink_file(&file)?
            }
            vol.bitmap.free(&file.aus)
        })
    }
    /// Delete an empty directory
    pub fn delete_dir(&mut self,id: DirId) -> STDRESULT {
        self.check_writable()?;
        if id==DirId::ROOT {
            return Err(Box::new(Error::InvalidOperation("cannot delete the root directory".to_string())));
        }
        let dir = self.get_dir(id)?.clone();
        if !dir.files.is_empty() || !dir.subdirs.is_empty() {
            return Err(Box::new(Error::DirectoryNotEmpty(dir.name)));
        }
        self.mutate(|vol| {
            match vol.kind {
                VolumeKind::HardDisk(_) => vol.hd_unlink_dir(&dir)?,
                _ => vol.floppy_unlink_dir(&dir)?
            }
            vol.bitmap.free(&dir.aus)
        })
    }
    pub fn delete(&mut self,entry: Entry) -> STDRESULT {
        match entry {
            Entry::File(id) => self.delete_file(id),
            Entry::Dir(id) => self.delete_dir(id)
        }
    }
    pub fn rename_file(&mut self,id: FileId,new_name: &str) -> STDRESULT {
        self.check_writable()?;
        let file = self.get_file(id)?.clone();
        if file.name==new_name {
            return Ok(());
        }
        self.check_new_name(file.parent,new_name)?;
        let raw = name_to_bytes(new_name)?;
        self.mutate(|vol| {
            let mut desc = vol.read_sector(id.0)?;
            desc[0..MAX_NAME_LEN].copy_from_slice(&raw);
            vol.put_sector(id.0,&desc)?;
            vol.catalog = vol.scan()?;
            let ids = vol.sorted_files(file.parent,None,None);
            vol.write_file_index(file.parent,&ids)
        })
    }
    pub fn rename_dir(&mut self,id: DirId,new_name: &str) -> STDRESULT {
        self.check_writable()?;
        let dir = self.get_dir(id)?.clone();
        let parent = match dir.parent {
            Some(p) => p,
            None => return self.rename(new_name)
        };
        if dir.name==new_name {
            return Ok(());
        }
        self.check_new_name(parent,new_name)?;
        let name = new_name.to_string();
        self.mutate(|vol| match vol.kind {
            VolumeKind::HardDisk(_) => vol.hd_rename_dir(&dir,&name),
            _ => vol.floppy_rename_dir(&dir,&name)
        })
    }
    /// Set or clear a flag in the file descriptor, same offset for FIB and FDR
    pub fn set_file_flag(&mut self,id: FileId,flag: FileFlag,on: bool) -> STDRESULT {
        self.check_writable()?;
        self.get_file(id)?;
        self.mutate(|vol| {
            let mut desc = vol.read_sector(id.0)?;
            match on {
                true => desc[0x0c] |= flag.mask(),
                false => desc[0x0c] &= !flag.mask()
            }
            vol.put_sector(id.0,&desc)
        })
    }

    // Content

    /// All allocated data sectors of the file, in order
    pub fn raw_content(&self,id: FileId) -> Result<Vec<u8>,DYNERR> {
        let file = self.get_file(id)?;
        let mut ans = Vec::with_capacity(file.sectors*SECTOR_SIZE);
        for ext in &file.extents {
            for lsec in ext.start..ext.start+ext.count {
                ans.append(&mut self.img.read_sector(lsec)?);
            }
        }
        ans.truncate(file.sectors*SECTOR_SIZE);
        Ok(ans)
    }
    /// Content split into records, a program is one record
    pub fn record_content(&self,id: FileId) -> Result<Vec<Vec<u8>>,DYNERR> {
        let dat = self.raw_content(id)?;
        let file = self.get_file(id)?;
        records::decode(&file.meta,&dat,file.byte_len())
    }

    // Layout dispatch

    pub(super) fn scan(&self) -> Result<Catalog,DYNERR> {
        match self.kind {
            VolumeKind::HardDisk(_) => self.hd_scan(),
            _ => self.floppy_scan()
        }
    }
    fn flush_bitmap(&mut self) -> STDRESULT {
        match self.kind {
            VolumeKind::HardDisk(_) => self.hd_flush_bitmap(),
            _ => self.floppy_flush_bitmap()
        }
    }
    fn write_protection(&mut self,protect: bool) -> STDRESULT {
        match self.kind {
            VolumeKind::HardDisk(_) => Ok(()),
            _ => self.floppy_write_protection(protect)
        }
    }
    /// Refresh what the volume keeps from its VIB after sectors were restored
    fn reload_header(&mut self) -> STDRESULT {
        let vib = self.img.read_sector(0)?;
        self.name = name_from_bytes(&[vib[0],vib[1],vib[2],vib[3],vib[4],vib[5],vib[6],vib[7],vib[8],vib[9]]);
        if let VolumeKind::HardDisk(_) = self.kind {
            return Ok(());
        }
        self.protected = self.read_only || vib[0x10]==b'P';
        Ok(())
    }
    fn write_file_index(&mut self,dir: DirId,ids: &[usize]) -> STDRESULT {
        match self.kind {
            VolumeKind::HardDisk(_) => self.hd_write_fdir(dir,ids),
            _ => self.floppy_write_fdir(dir,ids)
        }
    }
    /// Descriptor sectors of a directory's files sorted by name, as the index lists them,
    /// optionally with one file added or removed
    pub(super) fn sorted_files(&self,dir: DirId,add: Option<(&str,usize)>,remove: Option<usize>) -> Vec<usize> {
        let mut files: Vec<(String,usize)> = self.catalog.children(dir).iter()
            .filter(|f| Some(f.id.0)!=remove)
            .map(|f| (f.name.clone(),f.id.0)).collect();
        if let Some((name,id)) = add {
            files.push((name.to_string(),id));
        }
        files.sort();
        files.into_iter().map(|(_,id)| id).collect()
    }
}
