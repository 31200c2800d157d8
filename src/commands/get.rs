use clap;
use std::io::Write;
use std::str::FromStr;
use log::{error,info};
use super::{ItemType,CommandError};
use crate::fs::{MountOptions,Volume};
use crate::{STDRESULT,DYNERR};

const RCH: &str = "unreachable was reached";

fn output_get(object: &[u8],is_text: bool) -> STDRESULT {
    if is_text {
        println!("{}",String::from_utf8_lossy(object));
    } else if atty::is(atty::Stream::Stdout) {
        crate::display_block(0,object);
    } else {
        std::io::stdout().write_all(object)?;
    }
    Ok(())
}

/// Get the bytes of an item, and whether they are meant to be printed as text
pub fn get_item(vol: &Volume,src_path: &str,typ: ItemType) -> Result<(Vec<u8>,bool),DYNERR> {
    match typ {
        ItemType::Sector => {
            let lsec = match usize::from_str(src_path) {
                Ok(n) => n,
                Err(_) => {
                    error!("sector must be a number, got `{}`",src_path);
                    return Err(Box::new(CommandError::OutOfRange));
                }
            };
            Ok((vol.read_sector(lsec)?,false))
        },
        ItemType::Metadata => Ok((vol.container().get_metadata(Some(2)).into_bytes(),true)),
        ItemType::Raw => {
            let id = super::resolve_file(vol,src_path)?;
            Ok((vol.raw_content(id)?,false))
        },
        ItemType::Program => {
            let id = super::resolve_file(vol,src_path)?;
            match vol.file(id) {
                Some(f) if f.meta.is_program() => {
                    let mut dat = vol.raw_content(id)?;
                    dat.truncate(f.byte_len());
                    Ok((dat,false))
                },
                _ => {
                    error!("{} is not a program",src_path);
                    Err(Box::new(CommandError::UnsupportedItemType))
                }
            }
        },
        ItemType::Text => {
            let id = super::resolve_file(vol,src_path)?;
            let recs = vol.record_content(id)?;
            let lines: Vec<String> = recs.iter().map(|r| String::from_utf8_lossy(r).to_string()).collect();
            Ok((lines.join("\n").into_bytes(),true))
        },
        ItemType::Records => {
            let id = super::resolve_file(vol,src_path)?;
            let recs = vol.record_content(id)?;
            let lines: Vec<String> = recs.iter().map(|r| crate::escaped_ascii_from_bytes(r,true)).collect();
            Ok((lines.join("\n").into_bytes(),true))
        }
    }
}

pub fn get(cmd: &clap::ArgMatches) -> STDRESULT {
    let src_path = cmd.get_one::<String>("file").expect(RCH);
    let typ = ItemType::from_str(cmd.get_one::<String>("type").expect(RCH))?;
    let vol = match cmd.get_one::<String>("dimg") {
        Some(path_to_img) => crate::open_image_with(path_to_img,MountOptions { read_only: true })?,
        None => crate::open_image_from_stdin()?
    };
    // an archive inside the volume is opened as a volume of its own
    let vol = match cmd.get_one::<String>("archive") {
        Some(arc) => {
            let id = super::resolve_file(&vol,arc)?;
            info!("reading from archive {}",arc);
            vol.unpack_archive(id)?
        },
        None => vol
    };
    let (object,is_text) = get_item(&vol,src_path,typ)?;
    output_get(&object,is_text)
}
