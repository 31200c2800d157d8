//! # Conversions
//!
//! Operations that re-serialize a volume or container in some other form.
//! Every conversion works on a copy of the logical sectors and builds a new
//! container, the source is never written.  A conversion that cannot represent
//! something in the source fails before anything is produced.

use std::io::Write;
use std::path::Path;
use log::{debug,info,error};
use crate::img;
use crate::img::{Container,ContainerFormat,Geometry,SECTOR_SIZE};
use crate::img::chd::{Chd,ChdParams};
use crate::img::tracks::TrackEncoding;
use crate::fs;
use crate::fs::{Controller,DirId,MountOptions,Volume,VolumeKind};
use crate::{STDRESULT,DYNERR};

/// Enumerates conversion errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("target cannot represent the source: {0}")]
    Unrepresentable(String),
    #[error("container is not a CHD")]
    NotChd,
    #[error("extraction failed at offset {offset:#x}: {reason}")]
    Extract{offset: u64, reason: String}
}

/// Parameters for a new container, fields that do not apply to the target are ignored
#[derive(Clone,Copy,Debug,Default)]
pub struct TargetParams {
    /// track encoding for DTK and HFE, chosen from the sectors per track if omitted
    pub encoding: Option<TrackEncoding>,
    pub chd: ChdParams
}

fn unrepresentable(msg: String) -> DYNERR {
    error!("{}",msg);
    Box::new(Error::Unrepresentable(msg))
}

/// Geometry to declare in a new hard disk container
fn hd_geometry(controller: Controller,source: Geometry,sectors: usize,chd: bool) -> Result<Geometry,DYNERR> {
    match controller {
        Controller::Hfdc => {
            if source.sectors > 1 && source.sector_len==SECTOR_SIZE && source.logical_sectors()==sectors {
                return Ok(source);
            }
            match fs::hfdc_geometry(sectors) {
                Some((c,h,s)) => Ok(Geometry::new(c,h,s,SECTOR_SIZE)),
                None => Err(unrepresentable(format!("no HFDC geometry for {} sectors",sectors)))
            }
        },
        // SCSI drives have 512 byte blocks, which is what a CHD should declare
        Controller::Scsi => match (chd,sectors % 2,fs::hfdc_geometry(sectors/2)) {
            (true,0,Some((c,h,s))) => Ok(Geometry::new(c,h,s,2*SECTOR_SIZE)),
            _ => Ok(Geometry::linear(sectors))
        }
    }
}

fn fill(img: &mut dyn Container,dat: &[u8]) -> STDRESULT {
    for (lsec,chunk) in dat.chunks(SECTOR_SIZE).enumerate() {
        img.write_sector(lsec,chunk)?;
    }
    Ok(())
}

/// Build a container of the given format holding `dat`, shaped like `source`
fn build_container(fmt: ContainerFormat,kind: VolumeKind,source: Geometry,dat: &[u8],params: &TargetParams) -> Result<Box<dyn Container>,DYNERR> {
    let sectors = dat.len() / SECTOR_SIZE;
    match (fmt,kind) {
        (ContainerFormat::SectorDump,VolumeKind::Floppy | VolumeKind::Cf7) => {
            let mut ans = img::sector_dump::SectorDump::create(source);
            fill(&mut ans,dat)?;
            Ok(Box::new(ans))
        },
        (ContainerFormat::TrackDump,VolumeKind::Floppy | VolumeKind::Cf7) => {
            let enc = params.encoding.unwrap_or(TrackEncoding::for_sectors(source.sectors));
            let mut ans = img::track_dump::TrackDump::create(enc,source)?;
            fill(&mut ans,dat)?;
            Ok(Box::new(ans))
        },
        (ContainerFormat::Hfe,VolumeKind::Floppy | VolumeKind::Cf7) => {
            let enc = params.encoding.unwrap_or(TrackEncoding::for_sectors(source.sectors));
            let mut ans = img::hfe::Hfe::create(enc,source)?;
            fill(&mut ans,dat)?;
            Ok(Box::new(ans))
        },
        (ContainerFormat::Cf7,VolumeKind::Floppy | VolumeKind::Cf7) => {
            if sectors > img::cf7::VOLUME_SECTORS {
                return Err(unrepresentable(format!("{} sectors will not fit a CF7 volume",sectors)));
            }
            let mut ans = img::cf7::Cf7::create(1);
            fill(&mut ans,dat)?;
            Ok(Box::new(ans))
        },
        (ContainerFormat::RawHd,VolumeKind::HardDisk(c)) => {
            let mut ans = img::raw_hd::RawHd::create(hd_geometry(c,source,sectors,false)?);
            fill(&mut ans,dat)?;
            Ok(Box::new(ans))
        },
        (ContainerFormat::Chd,VolumeKind::HardDisk(c)) => {
            let geom = hd_geometry(c,source,sectors,true)?;
            Ok(Box::new(Chd::from_logical(dat,geom,params.chd)?))
        },
        (f,k) => Err(unrepresentable(format!("a {} volume cannot go in a {} container",k,f)))
    }
}

/// Copy the volume into a new container of the given format and mount it
pub fn convert(vol: &Volume,fmt: ContainerFormat,params: &TargetParams) -> Result<Volume,DYNERR> {
    let src = vol.container();
    let dat = img::read_all(src)?;
    info!("converting {} volume from {} to {}",vol.kind(),src.what_am_i(),fmt);
    let img = build_container(fmt,vol.kind(),src.geometry(),&dat,params)?;
    Volume::mount(img,MountOptions::default())
}

/// Build a CHD of another version with the same logical content
pub fn change_container_version(img: &dyn Container,version: u32) -> Result<Box<dyn Container>,DYNERR> {
    match img.as_chd() {
        Some(chd) => {
            info!("converting CHD v{} to v{}",chd.version(),version);
            Ok(Box::new(chd.convert_version(version)?))
        },
        None => {
            error!("{} container has no version to change",img.what_am_i());
            Err(Box::new(Error::NotChd))
        }
    }
}

/// Stream the logical bytes of the container to `sink`, returns the count written.
/// CHD output stops at the declared logical length even if the last hunk is partial.
pub fn extract_raw(img: &dyn Container,sink: &mut dyn Write) -> Result<u64,DYNERR> {
    let fail = |offset: u64,reason: String| -> DYNERR {
        error!("extraction stopped at {:#x}",offset);
        Box::new(Error::Extract { offset, reason })
    };
    let mut written: u64 = 0;
    match img.as_chd() {
        Some(chd) => {
            let hb = chd.hunk_bytes() as u64;
            for hunk in 0..chd.hunk_count() {
                let dat = chd.read_hunk(hunk).map_err(|e| fail(written,e.to_string()))?;
                let keep = u64::min(hb,chd.logical_bytes() - written) as usize;
                sink.write_all(&dat[0..keep]).map_err(|e| fail(written,e.to_string()))?;
                written += keep as u64;
            }
        },
        None => {
            for lsec in 0..img.sector_count() {
                let dat = img.read_sector(lsec).map_err(|e| fail(written,e.to_string()))?;
                sink.write_all(&dat).map_err(|e| fail(written,e.to_string()))?;
                written += dat.len() as u64;
            }
        }
    }
    sink.flush().map_err(|e| fail(written,e.to_string()))?;
    debug!("extracted {} bytes",written);
    Ok(written)
}

/// Extract to a file, nothing appears at `path` unless every byte was written
pub fn extract_raw_to_file(img: &dyn Container,path: &str) -> Result<u64,DYNERR> {
    let dir = match Path::new(path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from(".")
    };
    let mut scratch = tempfile::NamedTempFile::new_in(dir)?;
    let count = extract_raw(img,&mut scratch)?;
    scratch.persist(path)?;
    Ok(count)
}

/// Rewrite a hard disk volume for the other controller.
/// HFDC to SCSI drops the geometry, SCSI to HFDC invents one that divides the
/// disk exactly.  The result is a new container of the same format.
pub fn to_other_controller(vol: &Volume) -> Result<Volume,DYNERR> {
    let controller = match vol.kind() {
        VolumeKind::HardDisk(c) => c,
        k => return Err(unrepresentable(format!("{} volumes have no controller layout",k)))
    };
    if vol.is_protected() {
        return Err(Box::new(fs::Error::Protected));
    }
    let src = vol.container();
    let mut dat = img::read_all(src)?;
    let sectors = dat.len() / SECTOR_SIZE;
    let ddrs: Vec<usize> = vol.catalog().walk_dirs().into_iter().filter(|d| *d!=DirId::ROOT).map(|d| d.0).collect();
    let target = match controller {
        Controller::Hfdc => {
            if vol.emulate_au()? != 0 {
                return Err(unrepresentable("SCSI volumes cannot have an emulate file".to_string()));
            }
            dat[0x0c] = 0;
            dat[0x0e] = 0;
            dat[0x0f] = 0;
            dat[0x10] &= 0xf0;
            dat[0x11] = 0;
            for ddr in &ddrs {
                dat[ddr*SECTOR_SIZE + 0x0c] = 0;
            }
            Controller::Scsi
        },
        Controller::Scsi => {
            let (_,heads,spt) = match fs::hfdc_geometry(sectors) {
                Some(g) => g,
                None => return Err(unrepresentable(format!("no HFDC geometry for {} sectors",sectors)))
            };
            dat[0x0c] = spt as u8;
            dat[0x10] = (dat[0x10] & 0xf0) | (heads as u8 - 1);
            for ddr in &ddrs {
                dat[ddr*SECTOR_SIZE + 0x0c] = spt as u8;
            }
            Controller::Hfdc
        }
    };
    // keep the backup VIB in step
    let (vib,rest) = dat.split_at_mut(SECTOR_SIZE);
    rest[31*SECTOR_SIZE..32*SECTOR_SIZE].copy_from_slice(vib);
    let mut params = TargetParams::default();
    if let Some(chd) = src.as_chd() {
        params.chd = ChdParams { version: chd.version(), hunk_bytes: chd.hunk_bytes(), compress: chd.is_compressed() };
    }
    info!("converting {} volume `{}` to {}",controller,vol.name(),target);
    let img = build_container(src.what_am_i(),VolumeKind::HardDisk(target),Geometry::linear(sectors),&dat,&params)?;
    Volume::mount(img,MountOptions::default())
}
