//! # `ti99kit` main library
//!
//! This library manipulates disk images of the TI-99/4A, as used by emulators and
//! by the flash and hard disk adapters of the real machine.
//!
//! ## Architecture
//!
//! Disk image operations are built around two layers:
//! * `img::Container` encodes/decodes the physical image, presenting an array of 256-byte logical sectors
//! * `fs::Volume` imposes the TI file system on the logical sectors
//!
//! When a `Volume` is mounted it takes ownership of some `Container`.
//! It then uses this owned container as storage.  Any changes are not permanent until the
//! image is saved to whatever file system is hosting ti99kit.
//!
//! ## File Systems
//!
//! * TI disk controller layout (floppies and CF7 volumes), with up to two subdirectories
//! * HFDC hard disk layout, with nested subdirectories
//! * SCSI hard disk layout, which is the HFDC layout without geometry
//!
//! ## Containers
//!
//! * DSK sector dumps
//! * PC99 track dumps (FM and MFM)
//! * HFE flux images (HxC version 1)
//! * CHD versions 3 (read), 4 and 5
//! * raw hard disk images
//! * CF7 compact flash cards
//!
//! ## Conversions
//!
//! The `convert` module moves a volume between containers, between CHD versions,
//! and between the HFDC and SCSI layouts.

pub mod img;
pub mod fs;
pub mod convert;
pub mod commands;

use std::io::{Read,Write};
use std::fmt::Write as FmtWrite;
use std::path::Path;
use log::{warn,info,debug};
use regex::Regex;
use img::Container;
use fs::{MountOptions,Volume};

pub type DYNERR = Box<dyn std::error::Error + Send + Sync>;
pub type STDRESULT = Result<(),DYNERR>;

const KNOWN_FILE_EXTENSIONS: &str = "dsk,tidisk,v9t9,dtk,pc99,hfe,chd,raw,hd,cf7,nds";

fn ext_allows(ext: &str,extensions: Vec<String>) -> bool {
    ext.is_empty() || extensions.iter().any(|x| x==ext)
}

/// Given a bytestream return a container, or Err if the bytestream cannot be interpreted.
/// Optional `maybe_ext` restricts the container types that will be tried based on file extension.
pub fn create_container_from_bytestream(dat: &[u8],maybe_ext: Option<&str>) -> Result<Box<dyn Container>,DYNERR> {
    let ext = match maybe_ext {
        Some(x) => x.to_lowercase(),
        None => "".to_string()
    };
    if ext_allows(&ext,img::chd::file_extensions()) {
        match img::chd::Chd::from_bytes(dat) {
            Ok(img) => {
                info!("identified CHD v{} container",img.version());
                return Ok(Box::new(img));
            },
            // a CHD that needs a parent is positively identified, pass the refusal on
            Err(e) if matches!(e.downcast_ref::<img::Error>(),Some(img::Error::ParentRequired)) => return Err(e),
            Err(e) => debug!("not CHD: {}",e)
        }
    }
    if ext_allows(&ext,img::hfe::file_extensions()) {
        if let Ok(img) = img::hfe::Hfe::from_bytes(dat) {
            info!("identified HFE container");
            return Ok(Box::new(img));
        }
    }
    if ext_allows(&ext,img::track_dump::file_extensions()) {
        if let Ok(img) = img::track_dump::TrackDump::from_bytes(dat) {
            info!("identified PC99 track dump");
            return Ok(Box::new(img));
        }
    }
    if ext_allows(&ext,img::cf7::file_extensions()) {
        if let Ok(img) = img::cf7::Cf7::from_bytes(dat) {
            info!("identified CF7 card");
            return Ok(Box::new(img));
        }
    }
    if ext_allows(&ext,img::sector_dump::file_extensions()) {
        if let Ok(img) = img::sector_dump::SectorDump::from_bytes(dat) {
            info!("identified sector dump");
            return Ok(Box::new(img));
        }
    }
    if ext_allows(&ext,img::raw_hd::file_extensions()) {
        if let Ok(img) = img::raw_hd::RawHd::from_bytes(dat) {
            info!("identified raw hard disk");
            return Ok(Box::new(img));
        }
    }
    warn!("cannot match any container format");
    Err(Box::new(img::Error::UnknownFormat))
}

fn known_extension(path: &str) -> Option<String> {
    let ext = Path::new(path).extension()?.to_str()?.to_lowercase();
    match KNOWN_FILE_EXTENSIONS.split(',').any(|x| x==ext) {
        true => Some(ext),
        false => None
    }
}

/// Calls `create_container_from_bytestream` getting the bytes from a file.
/// File extension will be used to restrict container types that are tried,
/// unless the extension is unknown, in which case all will be tried.
pub fn create_container_from_file(img_path: &str) -> Result<Box<dyn Container>,DYNERR> {
    let dat = std::fs::read(img_path)?;
    create_container_from_bytestream(&dat,known_extension(img_path).as_deref())
}

/// Identify the container and mount the volume inside
pub fn mount_bytestream(dat: &[u8],maybe_ext: Option<&str>,opts: MountOptions) -> Result<Volume,DYNERR> {
    let img = create_container_from_bytestream(dat,maybe_ext)?;
    Volume::mount(img,opts)
}

/// Open an image file and mount its volume for writing
pub fn open_image(img_path: &str) -> Result<Volume,DYNERR> {
    open_image_with(img_path,MountOptions::default())
}

pub fn open_image_with(img_path: &str,opts: MountOptions) -> Result<Volume,DYNERR> {
    let img = create_container_from_file(img_path)?;
    Volume::mount(img,opts)
}

/// Calls `mount_bytestream` getting the bytes from stdin.
pub fn open_image_from_stdin() -> Result<Volume,DYNERR> {
    let mut dat = Vec::new();
    std::io::stdin().read_to_end(&mut dat)?;
    mount_bytestream(&dat,None,MountOptions::default())
}

/// Write bytes to `path` through a scratch file in the same directory,
/// the original is only replaced once everything is written.
pub fn write_atomic(path: &str,dat: &[u8]) -> STDRESULT {
    let dir = match Path::new(path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from(".")
    };
    let mut scratch = tempfile::NamedTempFile::new_in(dir)?;
    scratch.write_all(dat)?;
    scratch.flush()?;
    scratch.persist(path)?;
    Ok(())
}

/// Save the image file (make changes permanent)
pub fn save_img(vol: &mut Volume,img_path: &str) -> STDRESULT {
    let dat = vol.to_bytes()?;
    write_atomic(img_path,&dat)
}

/// Display binary to stdout in columns of hex and ascii
pub fn display_block(start_addr: usize,block: &[u8]) {
    let mut slice_start = 0;
    loop {
        let row_label = start_addr + slice_start;
        let slice_end = usize::min(slice_start + 16,block.len());
        let slice = &block[slice_start..slice_end];
        let txt: Vec<u8> = slice.iter().map(|c| match *c {
            x if x<32 => b'.',
            x if x<127 => x,
            _ => b'.'
        }).collect();
        print!("{:04X} : ",row_label);
        for byte in slice {
            print!("{:02X} ",byte);
        }
        for _blank in slice_end..slice_start+16 {
            print!("   ");
        }
        println!("| {}",String::from_utf8_lossy(&txt));
        slice_start += 16;
        if slice_end==block.len() {
            break;
        }
    }
}

/// This takes any bytes and makes an ascii friendly string
/// by using hex escapes, e.g., `\xFF`.
/// if `escape_cc` is true, ascii control characters are also escaped.
pub fn escaped_ascii_from_bytes(bytes: &[u8],escape_cc: bool) -> String {
    let mut result = String::new();
    let (lb,ub) = match escape_cc {
        true => (0x20,0x7e),
        false => (0x00,0x7f)
    };
    for b in bytes {
        if *b>=lb && *b<=ub {
            result.push(*b as char);
        } else {
            // writing to a String cannot fail
            let _ = write!(&mut result,"\\x{:02X}",b);
        }
    }
    result
}

/// Interpret a UTF8 string as pure ascii and put into bytes.
/// Non-ascii characters are omitted from the result, but arbitrary
/// bytes can be introduced using escapes, e.g., `\xFF`.
pub fn parse_escaped_ascii(s: &str) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    let hex_patt = match Regex::new(r"\\x[0-9A-Fa-f]{2}") {
        Ok(re) => re,
        Err(_) => return s.bytes().filter(|b| b.is_ascii()).collect()
    };
    let mut curs = 0;
    for m in hex_patt.find_iter(s) {
        ans.extend(s[curs..m.start()].bytes().filter(|b| b.is_ascii()));
        if let Ok(mut byte) = hex::decode(&s[m.start()+2..m.end()]) {
            ans.append(&mut byte);
        }
        curs = m.end();
    }
    ans.extend(s[curs..].bytes().filter(|b| b.is_ascii()));
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes() {
        assert_eq!(parse_escaped_ascii("AB\\xFFC\\x00"),vec![0x41,0x42,0xff,0x43,0x00]);
        assert_eq!(escaped_ascii_from_bytes(&[0x41,0x0d,0xff],true),"A\\x0D\\xFF");
    }

    #[test]
    fn extensions() {
        assert_eq!(known_extension("/tmp/disk.DSK"),Some("dsk".to_string()));
        assert_eq!(known_extension("/tmp/disk.txt"),None);
    }
}
