//! # File System Module
//!
//! The TI file systems are handled here.  There are two on-disk layouts:
//! the disk controller layout used by floppies and CF7 volumes, and the hard disk
//! layout shared by the HFDC and SCSI controllers.  Both are represented by the
//! same `Volume` object, which takes ownership of some `img::Container` and uses it
//! as storage.
//!
//! The directory tree is kept in a `catalog::Catalog`, an arena keyed by the logical
//! sector of each descriptor.  The catalog is rebuilt from disk at every generation,
//! so nothing above the volume ever holds a stale reference.
//!
//! Mutations are transactional.  The prior bytes of every sector a mutation writes
//! are kept in an `undo::Patch`, which becomes the single level undo record once the
//! mutation commits, or is written back immediately if the mutation fails.

pub mod types;
pub mod bitmap;
pub mod catalog;
pub mod undo;
pub mod records;
pub mod volume;
pub mod archive;
pub mod shared;
mod floppy;
mod harddisk;

use std::fmt;
use std::str::FromStr;

pub use volume::{Volume,RecordFormat};
pub use catalog::{Catalog,Directory,DirId,Entry,Extent,FileId,TFile};
pub use types::{FileFlag,FileMeta};
pub use harddisk::hfdc_geometry;
pub use shared::{SharedVolume,SearchResult,Hit};

/// Enumerates file system errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("bad format: {0}")]
    Format(String),
    #[error("{0}")]
    Image(String),
    #[error("image full: needed {needed} AUs but only {free} are free")]
    ImageFull{needed: usize, free: usize},
    #[error("volume is write protected")]
    Protected,
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("`{0}` already exists")]
    FileExists(String),
    #[error("invalid name `{0}`")]
    InvalidName(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("directory `{0}` is not empty")]
    DirectoryNotEmpty(String),
    #[error("`{0}` not found")]
    NotFound(String)
}

impl Error {
    /// Errors that are rule violations rather than bad data or bad storage
    pub fn is_image_error(&self) -> bool {
        matches!(self,Self::Image(_) | Self::FileExists(_) | Self::InvalidName(_) | Self::InvalidOperation(_) | Self::DirectoryNotEmpty(_))
    }
}

/// Options that apply while a volume is mounted
#[derive(Clone,Copy,Debug,Default)]
pub struct MountOptions {
    /// refuse every write, including changes to the protection flag
    pub read_only: bool
}

/// Hard disk controllers, these differ only in how the VIB is filled in
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum Controller {
    Hfdc,
    Scsi
}

/// Which layout a volume uses, this decides which directory operations are legal
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum VolumeKind {
    Floppy,
    Cf7,
    HardDisk(Controller)
}

impl fmt::Display for Controller {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hfdc => write!(f,"HFDC"),
            Self::Scsi => write!(f,"SCSI")
        }
    }
}

impl FromStr for Controller {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s.to_lowercase().as_str() {
            "hfdc" => Ok(Self::Hfdc),
            "scsi" => Ok(Self::Scsi),
            _ => Err(Error::InvalidOperation(format!("unknown controller `{}`",s)))
        }
    }
}

impl fmt::Display for VolumeKind {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Floppy => write!(f,"floppy"),
            Self::Cf7 => write!(f,"CF7"),
            Self::HardDisk(c) => write!(f,"{} hard disk",c)
        }
    }
}
