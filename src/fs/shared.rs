//! ## Shared volumes
//!
//! A `SharedVolume` lets several threads work with one mounted volume.
//! Any number of readers may hold the lock at once, a mutation takes it
//! exclusively for its whole transaction, so nobody sees a half updated bitmap.
//!
//! Content searches run on a worker thread and can be cancelled between files.
//! A cancelled search still returns what it found so far.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool,Ordering};
use std::thread;
use parking_lot::{RwLock,RwLockReadGuard,RwLockWriteGuard};
use log::{debug,info,warn};
use super::catalog::FileId;
use super::volume::Volume;
use crate::DYNERR;

#[derive(Clone)]
pub struct SharedVolume(Arc<RwLock<Volume>>);

/// One match, `offset` is the byte offset within the file's raw content
#[derive(Clone,Debug,PartialEq,Eq)]
pub struct Hit {
    pub file: FileId,
    pub path: String,
    pub offset: usize
}

#[derive(Clone,Debug,Default)]
pub struct SearchResult {
    pub hits: Vec<Hit>,
    pub files_searched: usize,
    pub cancelled: bool
}

impl SharedVolume {
    pub fn new(vol: Volume) -> Self {
        Self(Arc::new(RwLock::new(vol)))
    }
    pub fn read(&self) -> RwLockReadGuard<'_,Volume> {
        self.0.read()
    }
    pub fn write(&self) -> RwLockWriteGuard<'_,Volume> {
        self.0.write()
    }
    /// Run `f` with exclusive access
    pub fn mutate<T,F>(&self,f: F) -> Result<T,DYNERR> where F: FnOnce(&mut Volume) -> Result<T,DYNERR> {
        let mut guard = self.0.write();
        f(&mut guard)
    }
    /// Get the volume back if no other handle remains
    pub fn try_unwrap(self) -> Result<Volume,Self> {
        match Arc::try_unwrap(self.0) {
            Ok(lock) => Ok(lock.into_inner()),
            Err(arc) => Err(Self(arc))
        }
    }
    /// Search the raw content of every file for `needle`
    pub fn search(&self,needle: &[u8],cancel: &AtomicBool) -> Result<SearchResult,DYNERR> {
        let vol = self.0.read();
        search(&vol,needle,cancel)
    }
    /// Run `search` on a worker thread
    pub fn spawn_search(&self,needle: Vec<u8>,cancel: Arc<AtomicBool>) -> thread::JoinHandle<Result<SearchResult,String>> {
        let shared = self.clone();
        thread::spawn(move || {
            shared.search(&needle,&cancel).map_err(|e| e.to_string())
        })
    }
}

/// Search every file of the volume, stopping early if `cancel` is raised
pub fn search(vol: &Volume,needle: &[u8],cancel: &AtomicBool) -> Result<SearchResult,DYNERR> {
    let mut ans = SearchResult::default();
    if needle.is_empty() {
        return Ok(ans);
    }
    for dir in vol.catalog().walk_dirs() {
        if cancel.load(Ordering::Relaxed) {
            ans.cancelled = true;
            break;
        }
        for file in vol.children(dir) {
            if cancel.load(Ordering::Relaxed) {
                ans.cancelled = true;
                break;
            }
            let dat = match vol.raw_content(file.id) {
                Ok(d) => d,
                Err(e) => {
                    warn!("skipping `{}`: {}",file.name,e);
                    continue;
                }
            };
            ans.files_searched += 1;
            let path = vol.catalog().file_path(file.id).unwrap_or(file.name.clone());
            for (offset,win) in dat.windows(needle.len()).enumerate() {
                if win==needle {
                    debug!("match in `{}` at {}",path,offset);
                    ans.hits.push(Hit { file: file.id, path: path.clone(), offset });
                }
            }
        }
        if ans.cancelled {
            break;
        }
    }
    info!("searched {} files, {} matches",ans.files_searched,ans.hits.len());
    Ok(ans)
}
