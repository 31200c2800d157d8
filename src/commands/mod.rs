//! # CLI Subcommands
//!
//! Contains modules that run the subcommands.

pub mod mkdsk;
pub mod catalog;
pub mod get;
pub mod put;
pub mod modify;
pub mod convert;
pub mod search;

use std::str::FromStr;
use crate::fs::{Entry,FileId,DirId,Volume};
use crate::DYNERR;

#[derive(thiserror::Error,Debug)]
pub enum CommandError {
    #[error("Item type is not yet supported")]
    UnsupportedItemType,
    #[error("Item type is unknown")]
    UnknownItemType,
    #[error("Command could not be interpreted")]
    InvalidCommand,
    #[error("One of the parameters was out of range")]
    OutOfRange,
    #[error("Input source is not supported")]
    UnsupportedFormat,
    #[error("File not found")]
    FileNotFound,
    #[error("Path is a directory")]
    IsDirectory
}

/// Types of items that can be read from or written to a volume
#[derive(PartialEq,Clone,Copy,Debug)]
pub enum ItemType {
    /// every data sector of a file
    Raw,
    /// program image, trimmed to its length
    Program,
    /// DIS/VAR 80 text, one line per record
    Text,
    /// records shown with escapes, one per line
    Records,
    /// logical sector
    Sector,
    /// container metadata
    Metadata
}

impl FromStr for ItemType {
    type Err = CommandError;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "prog" => Ok(Self::Program),
            "txt" => Ok(Self::Text),
            "rec" => Ok(Self::Records),
            "sec" => Ok(Self::Sector),
            "meta" => Ok(Self::Metadata),
            _ => Err(CommandError::UnknownItemType)
        }
    }
}

/// Resolve a path that must name a file
pub fn resolve_file(vol: &Volume,path: &str) -> Result<FileId,DYNERR> {
    match vol.resolve(path)? {
        Entry::File(id) => Ok(id),
        Entry::Dir(_) => Err(Box::new(CommandError::IsDirectory))
    }
}

/// Split `DIR.SUB.NAME` into the directory holding the new item and its name
pub fn resolve_parent(vol: &Volume,path: &str) -> Result<(DirId,String),DYNERR> {
    let parts: Vec<&str> = path.split(['/','.']).filter(|s| !s.is_empty()).collect();
    let name = match parts.last() {
        Some(n) => n.to_string(),
        None => return Err(Box::new(CommandError::InvalidCommand))
    };
    match vol.resolve(&parts[0..parts.len()-1].join("."))? {
        Entry::Dir(d) => Ok((d,name)),
        Entry::File(_) => Err(Box::new(CommandError::FileNotFound))
    }
}
