use clap;
use std::str::FromStr;
use log::{info,error};
use crate::img;
use crate::img::{Container,ContainerFormat,Geometry,SECTOR_SIZE};
use crate::img::chd::{Chd,ChdParams};
use crate::img::tracks::TrackEncoding;
use crate::fs::{Controller,Volume};
use super::CommandError;
use crate::{STDRESULT,DYNERR};

const RCH: &str = "unreachable was reached";

/// Floppy geometry for a kind name
fn floppy_kind(kind: &str) -> Option<Geometry> {
    match kind {
        "sssd" => Some(Geometry::new(40,1,9,SECTOR_SIZE)),
        "dssd" => Some(Geometry::new(40,2,9,SECTOR_SIZE)),
        "dsdd" => Some(Geometry::new(40,2,18,SECTOR_SIZE)),
        "dsdd80" => Some(Geometry::new(80,2,18,SECTOR_SIZE)),
        _ => None
    }
}

fn mk_floppy_container(fmt: ContainerFormat,geom: Geometry) -> Result<Box<dyn Container>,DYNERR> {
    match fmt {
        ContainerFormat::SectorDump => Ok(Box::new(img::sector_dump::SectorDump::create(geom))),
        ContainerFormat::TrackDump => Ok(Box::new(img::track_dump::TrackDump::create(TrackEncoding::for_sectors(geom.sectors),geom)?)),
        ContainerFormat::Hfe => Ok(Box::new(img::hfe::Hfe::create(TrackEncoding::for_sectors(geom.sectors),geom)?)),
        _ => {
            error!("{} cannot hold a floppy",fmt);
            Err(Box::new(CommandError::UnsupportedFormat))
        }
    }
}

fn get_usize(cmd: &clap::ArgMatches,key: &str) -> Result<usize,DYNERR> {
    match cmd.get_one::<String>(key) {
        Some(s) => Ok(usize::from_str(s)?),
        None => Err(Box::new(CommandError::InvalidCommand))
    }
}

pub fn mkdsk(cmd: &clap::ArgMatches) -> STDRESULT {
    let dest = cmd.get_one::<String>("dimg").expect(RCH);
    let name = cmd.get_one::<String>("volume").expect(RCH);
    let kind = cmd.get_one::<String>("kind").expect(RCH);
    let fmt = ContainerFormat::from_str(cmd.get_one::<String>("type").expect(RCH))?;
    if std::path::Path::new(dest).exists() {
        error!("refusing to overwrite {}",dest);
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let mut vol = match (kind.as_str(),fmt) {
        ("cf7",ContainerFormat::Cf7) => {
            let volumes = get_usize(cmd,"count")?;
            if volumes==0 {
                return Err(Box::new(CommandError::OutOfRange));
            }
            // every volume of the card is formatted, the first is the one mounted
            let mut card: Vec<u8> = Vec::new();
            for v in 0..volumes {
                let vol_name = match v { 0 => name.to_string(), _ => format!("{}{}",name.chars().take(7).collect::<String>(),v+1) };
                let mut one = Volume::format_floppy(Box::new(img::cf7::Cf7::create(1)),&vol_name)?;
                card.append(&mut one.to_bytes()?);
            }
            let card = img::cf7::Cf7::from_bytes(&card)?;
            Volume::mount(Box::new(card),Default::default())?
        },
        ("hd",ContainerFormat::RawHd | ContainerFormat::Chd) => {
            let controller = Controller::from_str(cmd.get_one::<String>("controller").expect(RCH))?;
            let spau = get_usize(cmd,"au")?;
            let geom = Geometry::new(get_usize(cmd,"cyls")?,get_usize(cmd,"heads")?,get_usize(cmd,"secs")?,SECTOR_SIZE);
            let img: Box<dyn Container> = match fmt {
                ContainerFormat::Chd => {
                    let params = ChdParams { version: get_usize(cmd,"chd-version")? as u32, ..Default::default() };
                    Box::new(Chd::create(geom,params)?)
                },
                _ => Box::new(img::raw_hd::RawHd::create(geom))
            };
            Volume::format_harddisk(img,name,controller,spau)?
        },
        (k,f) => match floppy_kind(k) {
            Some(geom) => Volume::format_floppy(mk_floppy_container(f,geom)?,name)?,
            None => {
                error!("cannot make {} in a {} container",k,f);
                return Err(Box::new(CommandError::UnsupportedItemType));
            }
        }
    };
    info!("created {} volume `{}`",vol.kind(),vol.name());
    crate::save_img(&mut vol,dest)
}
