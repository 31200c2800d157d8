//! ## Nested volumes
//!
//! A file whose raw content is itself a disk image can be mounted as a volume
//! of its own.  The nested volume works on a copy of the bytes, it never touches
//! the bitmap or sectors of the volume holding it.

use log::{debug,error};
use super::{Error,MountOptions};
use super::catalog::FileId;
use super::volume::Volume;
use crate::DYNERR;

impl Volume {
    /// Mount the content of `id` as a read only volume, the result can be unpacked in turn
    pub fn unpack_archive(&self,id: FileId) -> Result<Volume,DYNERR> {
        let dat = self.raw_content(id)?;
        let name = match self.catalog.file_path(id) {
            Some(p) => p,
            None => format!("sector {}",id.0)
        };
        let img = match crate::create_container_from_bytestream(&dat,None) {
            Ok(img) => img,
            Err(e) => {
                error!("`{}` does not hold a disk image: {}",name,e);
                return Err(Box::new(Error::Format(format!("`{}` is not an archive: {}",name,e))));
            }
        };
        debug!("`{}` holds a {} container",name,img.what_am_i());
        match Volume::mount(img,MountOptions { read_only: true }) {
            Ok(vol) => Ok(vol),
            Err(e) => Err(Box::new(Error::Format(format!("archive `{}` does not mount: {}",name,e))))
        }
    }
}
