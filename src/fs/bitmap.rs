//! ## Allocation bitmap
//!
//! One bit per allocation unit, set when the AU is in use.  Floppies pack the
//! bits LSB first, hard disks MSB first.

use bit_vec::BitVec;
use super::Error;
use crate::DYNERR;

#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub enum BitOrder {
    LsbFirst,
    MsbFirst
}

#[derive(Clone,Debug,PartialEq)]
pub struct AllocationMap {
    bits: BitVec,
    order: BitOrder,
    /// AUs below this are never handed out
    reserved: usize
}

impl AllocationMap {
    pub fn new(total_aus: usize,reserved: usize,order: BitOrder) -> Self {
        let mut bits = BitVec::from_elem(total_aus,false);
        for au in 0..usize::min(reserved,total_aus) {
            bits.set(au,true);
        }
        Self { bits, order, reserved }
    }
    /// Unpack from disk bytes, AUs beyond the buffer are taken as used
    pub fn from_bytes(buf: &[u8],total_aus: usize,reserved: usize,order: BitOrder) -> Self {
        let mut bits = BitVec::from_elem(total_aus,true);
        for au in 0..total_aus {
            if au/8 < buf.len() {
                let mask = match order {
                    BitOrder::LsbFirst => 1 << (au % 8),
                    BitOrder::MsbFirst => 0x80 >> (au % 8)
                };
                bits.set(au,buf[au/8] & mask != 0);
            }
        }
        Self { bits, order, reserved }
    }
    /// Pack into `len` bytes, bits past the end of the volume are set
    pub fn to_bytes(&self,len: usize) -> Vec<u8> {
        let mut ans = vec![0u8;len];
        for i in 0..len*8 {
            let used = match self.bits.get(i) {
                Some(b) => b,
                None => true
            };
            if used {
                ans[i/8] |= match self.order {
                    BitOrder::LsbFirst => 1 << (i % 8),
                    BitOrder::MsbFirst => 0x80 >> (i % 8)
                };
            }
        }
        ans
    }
    pub fn total(&self) -> usize {
        self.bits.len()
    }
    pub fn is_used(&self,au: usize) -> bool {
        self.bits.get(au).unwrap_or(true)
    }
    pub fn used_count(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }
    pub fn free_count(&self) -> usize {
        self.total() - self.used_count()
    }
    /// First-fit search for `count` free AUs, extents need not be contiguous.
    /// Nothing is marked unless all of them are found.
    pub fn allocate(&mut self,count: usize) -> Result<Vec<usize>,DYNERR> {
        let found: Vec<usize> = (self.reserved..self.total()).filter(|au| !self.is_used(*au)).take(count).collect();
        if found.len() < count {
            return Err(Box::new(Error::ImageFull { needed: count, free: found.len() }));
        }
        for au in &found {
            self.bits.set(*au,true);
        }
        Ok(found)
    }
    pub fn mark(&mut self,au: usize,used: bool) -> Result<(),DYNERR> {
        if au >= self.total() {
            return Err(Box::new(Error::Format(format!("AU {} is beyond the end of the volume",au))));
        }
        self.bits.set(au,used);
        Ok(())
    }
    pub fn free(&mut self,aus: &[usize]) -> Result<(),DYNERR> {
        for au in aus {
            self.mark(*au,false)?;
        }
        Ok(())
    }
}

/// Group a sorted list of AUs into (first,last) runs
pub fn runs(aus: &[usize]) -> Vec<(usize,usize)> {
    let mut ans: Vec<(usize,usize)> = Vec::new();
    for au in aus {
        match ans.last_mut() {
            Some((_,last)) if *last + 1 == *au => *last = *au,
            _ => ans.push((*au,*au))
        }
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_orders() {
        let mut lsb = AllocationMap::new(16,2,BitOrder::LsbFirst);
        let mut msb = AllocationMap::new(16,2,BitOrder::MsbFirst);
        lsb.mark(9,true).unwrap();
        msb.mark(9,true).unwrap();
        assert_eq!(lsb.to_bytes(3),vec![0x03,0x02,0xff]);
        assert_eq!(msb.to_bytes(2),vec![0xc0,0x40]);
        assert_eq!(AllocationMap::from_bytes(&msb.to_bytes(2),16,2,BitOrder::MsbFirst),msb);
    }

    #[test]
    fn first_fit_is_atomic() {
        let mut map = AllocationMap::new(10,2,BitOrder::LsbFirst);
        map.mark(3,true).unwrap();
        let before = map.clone();
        assert_eq!(map.allocate(3).unwrap(),vec![2,4,5]);
        map.free(&[2,4,5]).unwrap();
        assert_eq!(map,before);
        assert!(map.allocate(8).is_err());
        assert_eq!(map,before);
    }

    #[test]
    fn au_runs() {
        assert_eq!(runs(&[3,4,5,9,11,12]),vec![(3,5),(9,9),(11,12)]);
        assert_eq!(runs(&[]),vec![]);
    }
}
