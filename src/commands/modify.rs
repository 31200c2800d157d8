use clap;
use std::str::FromStr;
use log::error;
use crate::fs::{Entry,FileFlag};
use super::CommandError;
use crate::STDRESULT;

const RCH: &str = "unreachable was reached";

pub fn mkdir(cmd: &clap::ArgMatches) -> STDRESULT {
    let path_to_img = cmd.get_one::<String>("dimg").expect(RCH);
    let path_in_img = cmd.get_one::<String>("file").expect(RCH);
    let mut vol = crate::open_image(path_to_img)?;
    let (parent,name) = super::resolve_parent(&vol,path_in_img)?;
    vol.create_subdirectory(parent,&name)?;
    crate::save_img(&mut vol,path_to_img)
}

pub fn delete(cmd: &clap::ArgMatches) -> STDRESULT {
    let path_to_img = cmd.get_one::<String>("dimg").expect(RCH);
    let path_in_img = cmd.get_one::<String>("file").expect(RCH);
    let mut vol = crate::open_image(path_to_img)?;
    let entry = vol.resolve(path_in_img)?;
    vol.delete(entry)?;
    crate::save_img(&mut vol,path_to_img)
}

pub fn rename(cmd: &clap::ArgMatches) -> STDRESULT {
    let path_to_img = cmd.get_one::<String>("dimg").expect(RCH);
    let name = cmd.get_one::<String>("name").expect(RCH);
    let mut vol = crate::open_image(path_to_img)?;
    match cmd.get_one::<String>("file") {
        Some(path_in_img) => match vol.resolve(path_in_img)? {
            Entry::File(id) => vol.rename_file(id,name)?,
            Entry::Dir(id) => vol.rename_dir(id,name)?
        },
        None => vol.rename(name)?
    }
    crate::save_img(&mut vol,path_to_img)
}

/// Set or clear a file flag, or the volume protection if no file is given
pub fn flag(cmd: &clap::ArgMatches,on: bool) -> STDRESULT {
    let path_to_img = cmd.get_one::<String>("dimg").expect(RCH);
    let mut vol = crate::open_image(path_to_img)?;
    match cmd.get_one::<String>("file") {
        Some(path_in_img) => {
            let flag = match cmd.get_one::<String>("flag") {
                Some(s) => FileFlag::from_str(s)?,
                None => FileFlag::Protected
            };
            let id = super::resolve_file(&vol,path_in_img)?;
            vol.set_file_flag(id,flag,on)?;
        },
        None => {
            if cmd.get_one::<String>("flag").is_some() {
                error!("only protection applies to a whole volume");
                return Err(Box::new(CommandError::InvalidCommand));
            }
            vol.set_protected(on)?;
        }
    }
    crate::save_img(&mut vol,path_to_img)
}
