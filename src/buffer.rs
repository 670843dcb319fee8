//! Raw byte access: fixed-width numbers in either byte order and the
//! prefix-length variable integer used for counts and `uvar`/`ivar`.

use crate::error::{CodecError, CodecResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Big,
    Little,
}

pub fn put_uint(out: &mut Vec<u8>, value: u64, width: usize, endian: Endian) {
    let bytes = value.to_be_bytes();
    let be = &bytes[8 - width..];
    match endian {
        Endian::Big => out.extend_from_slice(be),
        Endian::Little => out.extend(be.iter().rev()),
    }
}

pub fn put_f32(out: &mut Vec<u8>, value: f32, endian: Endian) {
    put_uint(out, u64::from(value.to_bits()), 4, endian);
}

pub fn put_f64(out: &mut Vec<u8>, value: f64, endian: Endian) {
    put_uint(out, value.to_bits(), 8, endian);
}

/// Encoded length of `value` as a uvar (1..=9).
pub fn uvar_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    if bits > 56 { 9 } else { (bits.max(1) + 6) / 7 }
}

/// The number of leading 1-bits in the first byte is the number of bytes
/// that follow; the rest of the first byte holds the top payload bits.
pub fn put_uvar(out: &mut Vec<u8>, value: u64) {
    let extra = uvar_len(value) - 1;
    let bytes = value.to_be_bytes();
    if extra == 8 {
        out.push(0xFF);
        out.extend_from_slice(&bytes);
        return;
    }
    let prefix = !(0xFFu8 >> extra);
    out.push(prefix | bytes[7 - extra]);
    out.extend_from_slice(&bytes[8 - extra..]);
}

pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

// ————————————————————————————————————————————————————————————————————————————
// READER
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof { needed: n, offset: self.pos });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn byte(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn uint(&mut self, width: usize, endian: Endian) -> CodecResult<u64> {
        let raw = self.take(width)?;
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        Ok(match endian {
            Endian::Big => raw.iter().fold(0, fold),
            Endian::Little => raw.iter().rev().fold(0, fold),
        })
    }

    pub fn int(&mut self, width: usize, endian: Endian) -> CodecResult<i64> {
        let shift = 64 - width * 8;
        let raw = self.uint(width, endian)?;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn f32(&mut self, endian: Endian) -> CodecResult<f32> {
        Ok(f32::from_bits(self.uint(4, endian)? as u32))
    }

    pub fn f64(&mut self, endian: Endian) -> CodecResult<f64> {
        Ok(f64::from_bits(self.uint(8, endian)?))
    }

    pub fn uvar(&mut self) -> CodecResult<u64> {
        let first = self.byte()?;
        let extra = first.leading_ones() as usize;
        if extra == 8 {
            return self.uint(8, Endian::Big);
        }
        let head = u64::from(first & (0xFFu16 >> (extra + 1)) as u8);
        let tail = self.uint(extra, Endian::Big)?;
        Ok((head << (extra * 8)) | tail)
    }
}
