use clap;
use std::io::Read;
use std::str::FromStr;
use log::{error,info};
use super::{ItemType,CommandError};
use crate::fs::{RecordFormat,Volume};
use crate::{STDRESULT,DYNERR};

const RCH: &str = "unreachable was reached";

/// Lines of text with any trailing carriage returns removed
fn text_lines(dat: &[u8]) -> Result<Vec<String>,DYNERR> {
    match std::str::from_utf8(dat) {
        Ok(s) => Ok(s.lines().map(|l| l.trim_end_matches('\r').to_string()).collect()),
        Err(_) => {
            error!("could not interpret data as UTF8");
            Err(Box::new(CommandError::UnsupportedFormat))
        }
    }
}

/// Write an item into the volume as one undoable change
pub fn put_item(vol: &mut Volume,dest_path: &str,typ: ItemType,dat: &[u8],record_len: Option<u8>) -> STDRESULT {
    match typ {
        ItemType::Sector => {
            let lsec = match usize::from_str(dest_path) {
                Ok(n) => n,
                Err(_) => return Err(Box::new(CommandError::OutOfRange))
            };
            vol.write_sector(lsec,dat)
        },
        ItemType::Program => {
            let (dir,name) = super::resolve_parent(vol,dest_path)?;
            vol.create_program(dir,&name,dat)?;
            Ok(())
        },
        ItemType::Text => {
            let (dir,name) = super::resolve_parent(vol,dest_path)?;
            let mut fmt = RecordFormat::dis_var_80();
            if let Some(len) = record_len {
                fmt.record_len = len;
            }
            let recs: Vec<Vec<u8>> = text_lines(dat)?.into_iter().map(|l| l.into_bytes()).collect();
            vol.create_records_file(dir,&name,fmt,&recs)?;
            Ok(())
        },
        ItemType::Records => {
            let (dir,name) = super::resolve_parent(vol,dest_path)?;
            let mut fmt = RecordFormat::dis_var_80();
            if let Some(len) = record_len {
                fmt.record_len = len;
            }
            let recs: Vec<Vec<u8>> = text_lines(dat)?.iter().map(|l| crate::parse_escaped_ascii(l)).collect();
            vol.create_records_file(dir,&name,fmt,&recs)?;
            Ok(())
        },
        ItemType::Raw => {
            // stored as INT/FIX 128, two records per sector
            let (dir,name) = super::resolve_parent(vol,dest_path)?;
            let fmt = RecordFormat { variable: false, internal: true, record_len: 128 };
            let recs: Vec<Vec<u8>> = dat.chunks(128).map(|c| c.to_vec()).collect();
            vol.create_records_file(dir,&name,fmt,&recs)?;
            Ok(())
        },
        ItemType::Metadata => {
            error!("container metadata cannot be written");
            Err(Box::new(CommandError::UnsupportedItemType))
        }
    }
}

pub fn put(cmd: &clap::ArgMatches) -> STDRESULT {
    if atty::is(atty::Stream::Stdin) {
        error!("cannot use `put` with console input, please pipe something in");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let dest_path = cmd.get_one::<String>("file").expect(RCH);
    let typ = ItemType::from_str(cmd.get_one::<String>("type").expect(RCH))?;
    let img_path = cmd.get_one::<String>("dimg").expect(RCH);
    let record_len = match cmd.get_one::<String>("len") {
        Some(s) => match u8::from_str(s) {
            Ok(l) if l > 0 => Some(l),
            _ => return Err(Box::new(CommandError::OutOfRange))
        },
        None => None
    };
    let mut file_data = Vec::new();
    std::io::stdin().read_to_end(&mut file_data)?;
    if file_data.is_empty() {
        error!("put did not receive any data from previous node");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let mut vol = crate::open_image(img_path)?;
    put_item(&mut vol,dest_path,typ,&file_data,record_len)?;
    info!("wrote {} bytes to {}",file_data.len(),dest_path);
    crate::save_img(&mut vol,img_path)
}
