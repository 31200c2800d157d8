use clap;
use std::str::FromStr;
use log::{info,error};
use crate::img::{Container,ContainerFormat};
use crate::img::tracks::TrackEncoding;
use crate::convert::TargetParams;
use crate::fs::MountOptions;
use super::CommandError;
use crate::{STDRESULT,DYNERR};

const RCH: &str = "unreachable was reached";

fn refuse_overwrite(path: &str) -> STDRESULT {
    if std::path::Path::new(path).exists() {
        error!("refusing to overwrite {}",path);
        return Err(Box::new(CommandError::InvalidCommand));
    }
    Ok(())
}

fn get_u32(cmd: &clap::ArgMatches,key: &str) -> Result<Option<u32>,DYNERR> {
    match cmd.get_one::<String>(key) {
        Some(s) => Ok(Some(u32::from_str(s)?)),
        None => Ok(None)
    }
}

/// Move the volume into a new container format
pub fn convert(cmd: &clap::ArgMatches) -> STDRESULT {
    let src = cmd.get_one::<String>("dimg").expect(RCH);
    let dest = cmd.get_one::<String>("output").expect(RCH);
    let fmt = ContainerFormat::from_str(cmd.get_one::<String>("type").expect(RCH))?;
    refuse_overwrite(dest)?;
    let mut params = TargetParams::default();
    if let Some(enc) = cmd.get_one::<String>("encoding") {
        params.encoding = Some(TrackEncoding::from_str(enc)?);
    }
    if let Some(v) = get_u32(cmd,"chd-version")? {
        params.chd.version = v;
    }
    if let Some(h) = get_u32(cmd,"hunk")? {
        params.chd.hunk_bytes = h;
    }
    let vol = crate::open_image_with(src,MountOptions { read_only: true })?;
    let mut ans = crate::convert::convert(&vol,fmt,&params)?;
    crate::save_img(&mut ans,dest)
}

/// Rewrite a CHD at another version
pub fn chd_version(cmd: &clap::ArgMatches) -> STDRESULT {
    let src = cmd.get_one::<String>("dimg").expect(RCH);
    let dest = cmd.get_one::<String>("output").expect(RCH);
    let version = match get_u32(cmd,"chd-version")? {
        Some(v) => v,
        None => return Err(Box::new(CommandError::InvalidCommand))
    };
    refuse_overwrite(dest)?;
    let img = crate::create_container_from_file(src)?;
    let mut ans = crate::convert::change_container_version(img.as_ref(),version)?;
    crate::write_atomic(dest,&ans.to_bytes()?)
}

/// Write the logical bytes of the image to a plain file
pub fn extract(cmd: &clap::ArgMatches) -> STDRESULT {
    let src = cmd.get_one::<String>("dimg").expect(RCH);
    let dest = cmd.get_one::<String>("output").expect(RCH);
    refuse_overwrite(dest)?;
    let img = crate::create_container_from_file(src)?;
    let count = crate::convert::extract_raw_to_file(img.as_ref(),dest)?;
    info!("extracted {} bytes to {}",count,dest);
    Ok(())
}

/// Switch a hard disk between the HFDC and SCSI layouts
pub fn controller(cmd: &clap::ArgMatches) -> STDRESULT {
    let src = cmd.get_one::<String>("dimg").expect(RCH);
    let dest = cmd.get_one::<String>("output").expect(RCH);
    refuse_overwrite(dest)?;
    let vol = crate::open_image_with(src,MountOptions { read_only: true })?;
    let mut ans = crate::convert::to_other_controller(&vol)?;
    info!("volume is now {}",ans.kind());
    crate::save_img(&mut ans,dest)
}
