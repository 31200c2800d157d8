//! ## Bit streams and Huffman coding for the v5 hunk map
//!
//! The compressed v5 map codes the hunk types with a 16 symbol Huffman code
//! whose lengths are at most 8 bits.  The code lengths are stored ahead of the
//! map as a run-length list of 4-bit fields, and the codes themselves are assigned
//! canonically from the lengths, longest codes first, exactly as MAME does.

use crate::img;
use crate::DYNERR;

pub const NUM_CODES: usize = 16;
pub const MAX_BITS: u8 = 8;
/// bits per field in the exported tree
const TREE_FIELD_BITS: usize = 4;

/// Read a big-endian, most significant bit first, bit stream.
/// Reading past the end produces zeros and sets the overflow flag.
pub struct BitReader<'a> {
    buf: &'a [u8],
    pos: usize
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    pub fn read(&mut self,numbits: usize) -> u32 {
        let mut ans: u32 = 0;
        for _i in 0..numbits {
            let byte = self.pos / 8;
            let bit = match byte < self.buf.len() {
                true => (self.buf[byte] >> (7 - self.pos % 8)) & 1,
                false => 0
            };
            ans = (ans << 1) | bit as u32;
            self.pos += 1;
        }
        ans
    }
    pub fn read_u64(&mut self,numbits: usize) -> u64 {
        let mut ans: u64 = 0;
        let mut remaining = numbits;
        while remaining > 0 {
            let n = usize::min(remaining,32);
            ans = (ans << n) | self.read(n) as u64;
            remaining -= n;
        }
        ans
    }
    pub fn overflow(&self) -> bool {
        self.pos > self.buf.len()*8
    }
}

/// Write a most significant bit first bit stream, the final byte is zero padded
pub struct BitWriter {
    buf: Vec<u8>,
    pos: usize
}

impl BitWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new(), pos: 0 }
    }
    pub fn write(&mut self,val: u32,numbits: usize) {
        for i in (0..numbits).rev() {
            if self.pos % 8 == 0 {
                self.buf.push(0);
            }
            let bit = ((val >> i) & 1) as u8;
            let last = self.buf.len() - 1;
            self.buf[last] |= bit << (7 - self.pos % 8);
            self.pos += 1;
        }
    }
    pub fn write_u64(&mut self,val: u64,numbits: usize) {
        let mut remaining = numbits;
        while remaining > 0 {
            let n = usize::min(remaining,32);
            let shift = remaining - n;
            self.write(((val >> shift) & ((1u64 << n) - 1)) as u32,n);
            remaining -= n;
        }
    }
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Assign canonical codes from code lengths, longest lengths get the lowest codes.
fn assign_canonical_codes(lengths: &[u8;NUM_CODES]) -> Result<[u32;NUM_CODES],DYNERR> {
    let mut bithisto = [0u32;33];
    for len in lengths {
        if *len > MAX_BITS {
            return Err(Box::new(img::Error::Structure("huffman code length too large".to_string())));
        }
        bithisto[*len as usize] += 1;
    }
    let mut curstart: u32 = 0;
    for codelen in (1..=32).rev() {
        let nextstart = (curstart + bithisto[codelen]) >> 1;
        if codelen != 1 && nextstart * 2 != curstart + bithisto[codelen] {
            return Err(Box::new(img::Error::Structure("huffman tree is not prefix free".to_string())));
        }
        bithisto[codelen] = curstart;
        curstart = nextstart;
    }
    let mut codes = [0u32;NUM_CODES];
    for i in 0..NUM_CODES {
        let len = lengths[i] as usize;
        if len > 0 {
            codes[i] = bithisto[len];
            bithisto[len] += 1;
        }
    }
    Ok(codes)
}

pub struct HuffmanDecoder {
    lengths: [u8;NUM_CODES],
    codes: [u32;NUM_CODES]
}

impl HuffmanDecoder {
    /// Import the run-length encoded code lengths.  A field of 1 escapes:
    /// `1,1` is a literal length 1, `1,v,r` is length v repeated r+3 times.
    pub fn import_tree_rle(bits: &mut BitReader) -> Result<Self,DYNERR> {
        let mut lengths = [0u8;NUM_CODES];
        let mut curnode = 0;
        while curnode < NUM_CODES {
            let nodebits = bits.read(TREE_FIELD_BITS) as u8;
            if nodebits != 1 {
                lengths[curnode] = nodebits;
                curnode += 1;
            } else {
                let nodebits = bits.read(TREE_FIELD_BITS) as u8;
                if nodebits == 1 {
                    lengths[curnode] = 1;
                    curnode += 1;
                } else {
                    let repcount = bits.read(TREE_FIELD_BITS) as usize + 3;
                    if curnode + repcount > NUM_CODES {
                        return Err(Box::new(img::Error::Structure("huffman tree run overflows".to_string())));
                    }
                    for _i in 0..repcount {
                        lengths[curnode] = nodebits;
                        curnode += 1;
                    }
                }
            }
        }
        let codes = assign_canonical_codes(&lengths)?;
        Ok(Self { lengths, codes })
    }
    pub fn decode_one(&self,bits: &mut BitReader) -> Result<u8,DYNERR> {
        let mut code: u32 = 0;
        for len in 1..=MAX_BITS {
            code = (code << 1) | bits.read(1);
            for sym in 0..NUM_CODES {
                if self.lengths[sym]==len && self.codes[sym]==code {
                    return Ok(sym as u8);
                }
            }
        }
        Err(Box::new(img::Error::Structure("invalid huffman code in map".to_string())))
    }
}

pub struct HuffmanEncoder {
    lengths: [u8;NUM_CODES],
    codes: [u32;NUM_CODES]
}

impl HuffmanEncoder {
    /// Build a code from symbol counts.  The tree is a true Huffman tree whenever
    /// it fits in `MAX_BITS`, otherwise every symbol gets 4 bits.
    pub fn from_histogram(histo: &[u32;NUM_CODES]) -> Result<Self,DYNERR> {
        let mut lengths = huffman_lengths(histo);
        if lengths.iter().any(|l| *l > MAX_BITS) {
            lengths = [4;NUM_CODES];
        }
        let codes = assign_canonical_codes(&lengths)?;
        Ok(Self { lengths, codes })
    }
    pub fn encode_one(&self,bits: &mut BitWriter,sym: u8) -> Result<(),DYNERR> {
        let len = self.lengths[sym as usize];
        if len==0 {
            return Err(Box::new(img::Error::Structure(format!("map symbol {} has no code",sym))));
        }
        bits.write(self.codes[sym as usize],len as usize);
        Ok(())
    }
    pub fn export_tree_rle(&self,bits: &mut BitWriter) {
        let mut lastval: Option<u8> = None;
        let mut repcount = 0;
        for sym in 0..NUM_CODES {
            let newval = self.lengths[sym];
            if Some(newval)==lastval {
                repcount += 1;
            } else {
                if let Some(val) = lastval {
                    write_rle_tree_bits(bits,val,repcount);
                }
                lastval = Some(newval);
                repcount = 1;
            }
        }
        if let Some(val) = lastval {
            write_rle_tree_bits(bits,val,repcount);
        }
    }
}

fn write_rle_tree_bits(bits: &mut BitWriter,value: u8,mut repcount: usize) {
    while repcount > 0 {
        if value==1 {
            bits.write(1,TREE_FIELD_BITS);
            bits.write(1,TREE_FIELD_BITS);
            repcount -= 1;
        } else if repcount <= 2 {
            bits.write(value as u32,TREE_FIELD_BITS);
            repcount -= 1;
        } else {
            let cur_reps = usize::min(repcount - 3,(1 << TREE_FIELD_BITS) - 1);
            bits.write(1,TREE_FIELD_BITS);
            bits.write(value as u32,TREE_FIELD_BITS);
            bits.write(cur_reps as u32,TREE_FIELD_BITS);
            repcount -= cur_reps + 3;
        }
    }
}

/// Code lengths of an ordinary Huffman tree, unused symbols get 0.
/// A lone symbol gets length 1.
fn huffman_lengths(histo: &[u32;NUM_CODES]) -> [u8;NUM_CODES] {
    let mut lengths = [0u8;NUM_CODES];
    // each live node is (weight, member symbols)
    let mut nodes: Vec<(u64,Vec<usize>)> = Vec::new();
    for sym in 0..NUM_CODES {
        if histo[sym] > 0 {
            nodes.push((histo[sym] as u64,vec![sym]));
        }
    }
    if nodes.len()==1 {
        lengths[nodes[0].1[0]] = 1;
        return lengths;
    }
    while nodes.len() > 1 {
        // stable: ties go to the earlier node
        nodes.sort_by(|a,b| b.0.cmp(&a.0));
        let (w1,s1) = nodes.pop().unwrap_or_default();
        let (w2,s2) = nodes.pop().unwrap_or_default();
        for sym in s1.iter().chain(s2.iter()) {
            lengths[*sym] += 1;
        }
        let mut merged = s1;
        merged.extend(s2);
        nodes.push((w1+w2,merged));
    }
    lengths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_stream() {
        let mut w = BitWriter::new();
        w.write(0b101,3);
        w.write_u64(0x123456789a,48);
        w.write(0xffff,16);
        let buf = w.finish();
        assert_eq!(buf.len(),9);
        let mut r = BitReader::new(&buf);
        assert_eq!(r.read(3),0b101);
        assert_eq!(r.read_u64(48),0x123456789a);
        assert_eq!(r.read(16),0xffff);
        assert!(!r.overflow());
        r.read(8);
        assert!(r.overflow());
    }

    #[test]
    fn canonical_codes() {
        let lengths = [4u8;NUM_CODES];
        let codes = assign_canonical_codes(&lengths).unwrap();
        for i in 0..NUM_CODES {
            assert_eq!(codes[i],i as u32);
        }
        let mut bad = [0u8;NUM_CODES];
        bad[0] = 2;
        bad[1] = 2;
        bad[2] = 2;
        assert!(assign_canonical_codes(&bad).is_err());
    }

    #[test]
    fn tree_and_symbols() {
        let mut histo = [0u32;NUM_CODES];
        histo[0] = 500;
        histo[4] = 20;
        histo[5] = 3;
        histo[7] = 9;
        let enc = HuffmanEncoder::from_histogram(&histo).unwrap();
        let mut w = BitWriter::new();
        enc.export_tree_rle(&mut w);
        let message = [0u8,0,4,7,5,0,0,0,7];
        for sym in message {
            enc.encode_one(&mut w,sym).unwrap();
        }
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        let dec = HuffmanDecoder::import_tree_rle(&mut r).unwrap();
        for sym in message {
            assert_eq!(dec.decode_one(&mut r).unwrap(),sym);
        }
        assert!(enc.encode_one(&mut BitWriter::new(),9).is_err());
    }

    #[test]
    fn lone_symbol() {
        let mut histo = [0u32;NUM_CODES];
        histo[6] = 12;
        let lengths = huffman_lengths(&histo);
        assert_eq!(lengths[6],1);
        assert_eq!(lengths.iter().map(|l| *l as u32).sum::<u32>(),1);
    }
}
