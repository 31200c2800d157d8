//! ## Single level undo
//!
//! A mutation records the original bytes of every sector it touches, the first
//! time it touches it, along with the bitmap as it stood before.  Applying the
//! patch puts the volume back the way it was.

use std::collections::BTreeMap;
use super::bitmap::AllocationMap;

/// Copy-before-write record of one mutation
#[derive(Clone,Debug)]
pub struct Patch {
    old_sectors: BTreeMap<usize,Vec<u8>>,
    bitmap: AllocationMap
}

impl Patch {
    pub fn new(bitmap: AllocationMap) -> Self {
        Self { old_sectors: BTreeMap::new(), bitmap }
    }
    /// Remember the prior contents of `lsec`, later calls for the same sector are ignored
    pub fn record(&mut self,lsec: usize,old: &[u8]) {
        self.old_sectors.entry(lsec).or_insert_with(|| old.to_vec());
    }
    pub fn is_empty(&self) -> bool {
        self.old_sectors.is_empty()
    }
    pub fn touched(&self) -> Vec<usize> {
        self.old_sectors.keys().copied().collect()
    }
    pub fn sectors(&self) -> impl Iterator<Item = (&usize,&Vec<u8>)> {
        self.old_sectors.iter()
    }
    pub fn bitmap(&self) -> &AllocationMap {
        &self.bitmap
    }
}

/// The retained record, tagged with the generation it restores
#[derive(Clone,Debug)]
pub struct UndoRecord {
    pub generation: u64,
    pub patch: Patch,
    /// set when the change was the volume protection toggle, which stays undoable
    /// on the volume it just protected
    pub protection: bool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::bitmap::BitOrder;

    #[test]
    fn first_write_wins() {
        let mut patch = Patch::new(AllocationMap::new(8,1,BitOrder::LsbFirst));
        assert!(patch.is_empty());
        patch.record(5,&[1,2,3]);
        patch.record(5,&[9,9,9]);
        patch.record(2,&[0]);
        assert_eq!(patch.touched(),vec![2,5]);
        let old: Vec<(usize,Vec<u8>)> = patch.sectors().map(|(k,v)| (*k,v.clone())).collect();
        assert_eq!(old[1],(5,vec![1,2,3]));
    }
}
