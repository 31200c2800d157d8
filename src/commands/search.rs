use clap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool,Ordering};
use std::str::FromStr;
use std::time::{Duration,Instant};
use log::{warn,error};
use crate::fs::{MountOptions,SharedVolume};
use super::CommandError;
use crate::{STDRESULT,DYNERR};

const RCH: &str = "unreachable was reached";

/// Search file contents on a worker, cancelling after `--timeout` seconds if given
pub fn search(cmd: &clap::ArgMatches) -> STDRESULT {
    let path_to_img = cmd.get_one::<String>("dimg").expect(RCH);
    let needle = crate::parse_escaped_ascii(cmd.get_one::<String>("pattern").expect(RCH));
    if needle.is_empty() {
        error!("search pattern is empty");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let timeout = match cmd.get_one::<String>("timeout") {
        Some(s) => Some(Duration::from_secs(u64::from_str(s)?)),
        None => None
    };
    let vol = SharedVolume::new(crate::open_image_with(path_to_img,MountOptions { read_only: true })?);
    let cancel = Arc::new(AtomicBool::new(false));
    let handle = vol.spawn_search(needle,Arc::clone(&cancel));
    let start = Instant::now();
    while !handle.is_finished() {
        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                cancel.store(true,Ordering::Relaxed);
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let result = match handle.join() {
        Ok(Ok(r)) => r,
        Ok(Err(msg)) => return Err(Box::<dyn std::error::Error + Send + Sync>::from(msg)),
        Err(_) => {
            error!("search worker panicked");
            return Err(Box::new(CommandError::InvalidCommand) as DYNERR);
        }
    };
    for hit in &result.hits {
        println!("{} {:#06x}",hit.path,hit.offset);
    }
    if result.cancelled {
        warn!("search cancelled after {} files",result.files_searched);
    }
    Ok(())
}
