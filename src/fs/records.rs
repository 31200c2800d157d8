//! ## Record structured content
//!
//! Fixed records are packed `records_per_sector` to a sector and never span sectors.
//! Variable records carry a length prefix and each sector ends with `0xFF`.
//! For fixed files the level 3 count is the number of records, for variable
//! files it is the number of sectors used.

use log::{debug,error};
use super::Error;
use super::types::{FileMeta,FLAG_INTERNAL,FLAG_VARIABLE,SECTOR_SIZE};
use crate::DYNERR;

const END_OF_SECTOR: u8 = 0xff;

/// Padding for the unused tail of a fixed record
fn pad_byte(internal: bool) -> u8 {
    match internal {
        true => 0x00,
        false => 0x20
    }
}

/// Pack fixed length records, returns the data sectors and the file metadata
pub fn encode_fixed(records: &[Vec<u8>],record_len: u8,internal: bool) -> Result<(Vec<u8>,FileMeta),DYNERR> {
    if record_len==0 {
        return Err(Box::new(Error::InvalidOperation("record length cannot be 0".to_string())));
    }
    let rl = record_len as usize;
    let rps = SECTOR_SIZE / rl;
    let mut ans: Vec<u8> = Vec::new();
    for (i,rec) in records.iter().enumerate() {
        if rec.len() > rl {
            error!("record {} has {} bytes, limit is {}",i,rec.len(),rl);
            return Err(Box::new(Error::InvalidOperation(format!("record {} is too long",i))));
        }
        if i % rps == 0 {
            ans.resize(ans.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE,0);
        }
        ans.extend_from_slice(rec);
        ans.resize(ans.len() + rl - rec.len(),pad_byte(internal));
    }
    ans.resize(ans.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE,0);
    let meta = FileMeta {
        flags: match internal { true => FLAG_INTERNAL, false => 0 },
        records_per_sector: rps as u8,
        eof_offset: 0,
        record_len,
        l3_count: records.len() as u16
    };
    Ok((ans,meta))
}

/// Pack variable length records, `max_len` becomes the declared record length
pub fn encode_variable(records: &[Vec<u8>],max_len: u8,internal: bool) -> Result<(Vec<u8>,FileMeta),DYNERR> {
    if max_len==0 || max_len==0xff {
        return Err(Box::new(Error::InvalidOperation(format!("bad maximum record length {}",max_len))));
    }
    let mut ans: Vec<u8> = Vec::new();
    let mut sector: Vec<u8> = Vec::new();
    let mut used = 0;
    for (i,rec) in records.iter().enumerate() {
        if rec.len() > max_len as usize {
            error!("record {} has {} bytes, limit is {}",i,rec.len(),max_len);
            return Err(Box::new(Error::InvalidOperation(format!("record {} is too long",i))));
        }
        // room for the prefix, the data, and the end marker
        if sector.len() + rec.len() + 2 > SECTOR_SIZE {
            sector.push(END_OF_SECTOR);
            sector.resize(SECTOR_SIZE,0);
            ans.append(&mut sector);
            used += 1;
        }
        sector.push(rec.len() as u8);
        sector.extend_from_slice(rec);
    }
    let mut eof_offset = 0;
    if !sector.is_empty() {
        eof_offset = sector.len();
        sector.push(END_OF_SECTOR);
        sector.resize(SECTOR_SIZE,0);
        ans.append(&mut sector);
        used += 1;
    }
    let meta = FileMeta {
        flags: FLAG_VARIABLE | match internal { true => FLAG_INTERNAL, false => 0 },
        records_per_sector: (255 / (max_len as usize + 1)) as u8,
        eof_offset: eof_offset as u8,
        record_len: max_len,
        l3_count: used
    };
    Ok((ans,meta))
}

/// Split file data into records according to the metadata.
/// A program file comes back as a single record holding the program image.
pub fn decode(meta: &FileMeta,data: &[u8],byte_len: usize) -> Result<Vec<Vec<u8>>,DYNERR> {
    if meta.is_program() {
        return Ok(vec![data[0..usize::min(byte_len,data.len())].to_vec()]);
    }
    if meta.is_variable() {
        return decode_variable(meta,data);
    }
    decode_fixed(meta,data)
}

fn decode_fixed(meta: &FileMeta,data: &[u8]) -> Result<Vec<Vec<u8>>,DYNERR> {
    if meta.record_len==0 {
        return Err(Box::new(Error::Format("fixed record length is 0".to_string())));
    }
    let rl = meta.record_len as usize;
    let rps = match meta.records_per_sector {
        0 => SECTOR_SIZE / rl,
        n => n as usize
    };
    if rps * rl > SECTOR_SIZE {
        return Err(Box::new(Error::Format(format!("{} records of {} bytes do not fit a sector",rps,rl))));
    }
    let mut ans = Vec::new();
    for i in 0..meta.l3_count as usize {
        let offset = (i / rps) * SECTOR_SIZE + (i % rps) * rl;
        if offset >= data.len() {
            return Err(Box::new(Error::Format(format!("record {} at offset {} is past the end of the file",i,offset))));
        }
        let end = usize::min(offset + rl,data.len());
        let mut rec = data[offset..end].to_vec();
        rec.resize(rl,pad_byte(meta.is_internal()));
        ans.push(rec);
    }
    Ok(ans)
}

fn decode_variable(meta: &FileMeta,data: &[u8]) -> Result<Vec<Vec<u8>>,DYNERR> {
    let sectors = match meta.l3_count as usize {
        0 => data.len() / SECTOR_SIZE,
        n => usize::min(n,data.len() / SECTOR_SIZE)
    };
    let mut ans = Vec::new();
    for s in 0..sectors {
        let sec = &data[s*SECTOR_SIZE..(s+1)*SECTOR_SIZE];
        let mut pos = 0;
        loop {
            if pos >= SECTOR_SIZE {
                return Err(Box::new(Error::Format(format!("sector {} of the file has no end marker",s))));
            }
            let len = sec[pos] as usize;
            if sec[pos]==END_OF_SECTOR {
                break;
            }
            if pos + 1 + len > SECTOR_SIZE {
                debug!("record length {} at {} overruns sector",len,pos);
                return Err(Box::new(Error::Format(format!("record at offset {} runs past the end of the sector",s*SECTOR_SIZE + pos))));
            }
            ans.push(sec[pos+1..pos+1+len].to_vec());
            pos += 1 + len;
        }
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("LINE {}",i).into_bytes()).collect()
    }

    #[test]
    fn fixed_records() {
        let recs = lines(7);
        let (dat,meta) = encode_fixed(&recs,80,false).unwrap();
        assert_eq!(meta.records_per_sector,3);
        assert_eq!(meta.l3_count,7);
        assert_eq!(dat.len(),3*SECTOR_SIZE);
        // third sector starts with record 6
        assert_eq!(&dat[512..518],b"LINE 6");
        let back = decode(&meta,&dat,dat.len()).unwrap();
        assert_eq!(back.len(),7);
        assert_eq!(back[4].len(),80);
        assert_eq!(&back[4][0..6],b"LINE 4");
        assert_eq!(back[4][79],0x20);
    }

    #[test]
    fn variable_records() {
        let mut recs = lines(3);
        recs.push(vec![0x41;240]);
        recs.push(vec![]);
        let (dat,meta) = encode_variable(&recs,254,false).unwrap();
        assert_eq!(meta.type_string(),"DIS/VAR 254");
        assert_eq!(meta.l3_count,2);
        assert_eq!(dat.len(),2*SECTOR_SIZE);
        assert_eq!(decode(&meta,&dat,dat.len()).unwrap(),recs);
    }

    #[test]
    fn overrun_is_format_error() {
        let mut dat = vec![0u8;SECTOR_SIZE];
        dat[0] = 3;
        dat[4] = 0xfe;
        let meta = FileMeta { flags: FLAG_VARIABLE, records_per_sector: 3, eof_offset: 0, record_len: 80, l3_count: 1 };
        let err = decode(&meta,&dat,SECTOR_SIZE).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(),Some(Error::Format(_))));
    }

    #[test]
    fn program_image() {
        let meta = FileMeta::program(300);
        let dat = vec![7u8;512];
        assert_eq!(decode(&meta,&dat,300).unwrap()[0].len(),300);
    }
}
