//! Fixed-width, big-endian primitives shared by the forward database and the
//! index artifact.
//!
//! Strings are a 4-byte length followed by that many UTF-8 bytes. "Full"
//! arrays carry a 4-byte element count; the plain array functions expect the
//! caller to know the length. There is no framing beyond that: readers of an
//! append log detect its end through [`CodecError::is_clean_eof`].

use std::io::{ErrorKind, Read, Write};

use crate::error::CodecError;

pub type CodecResult<T> = Result<T, CodecError>;

pub const INT_BYTES: usize = 4;
pub const LONG_BYTES: usize = 8;

/// Like `read_exact`, but reports how far it got before the stream ended.
fn fill<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> CodecResult<()> {
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]) {
            Ok(0) => return Err(CodecError::Truncated { expected: buf.len(), read }),
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Reads exactly `len` bytes, growing the buffer only as bytes arrive so a
/// corrupt length prefix cannot trigger a huge allocation.
fn fill_vec<R: Read + ?Sized>(r: &mut R, len: u64) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    r.take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Err(CodecError::Truncated { expected: len as usize, read: buf.len() });
    }
    Ok(buf)
}

fn read_len<R: Read + ?Sized>(r: &mut R) -> CodecResult<usize> {
    let len = read_i32(r)?;
    usize::try_from(len).map_err(|_| CodecError::NegativeLength(len))
}

fn write_len<W: Write + ?Sized>(w: &mut W, len: usize) -> CodecResult<()> {
    let len = i32::try_from(len).map_err(|_| {
        CodecError::Io(std::io::Error::new(ErrorKind::InvalidInput, "length exceeds i32::MAX"))
    })?;
    write_i32(w, len)
}

pub fn write_i32<W: Write + ?Sized>(w: &mut W, v: i32) -> CodecResult<()> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

pub fn read_i32<R: Read + ?Sized>(r: &mut R) -> CodecResult<i32> {
    let mut buf = [0u8; INT_BYTES];
    fill(r, &mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub fn write_i64<W: Write + ?Sized>(w: &mut W, v: i64) -> CodecResult<()> {
    w.write_all(&v.to_be_bytes())?;
    Ok(())
}

pub fn read_i64<R: Read + ?Sized>(r: &mut R) -> CodecResult<i64> {
    let mut buf = [0u8; LONG_BYTES];
    fill(r, &mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

pub fn write_f32<W: Write + ?Sized>(w: &mut W, v: f32) -> CodecResult<()> {
    write_i32(w, v.to_bits() as i32)
}

pub fn read_f32<R: Read + ?Sized>(r: &mut R) -> CodecResult<f32> {
    Ok(f32::from_bits(read_i32(r)? as u32))
}

pub fn write_f64<W: Write + ?Sized>(w: &mut W, v: f64) -> CodecResult<()> {
    write_i64(w, v.to_bits() as i64)
}

pub fn read_f64<R: Read + ?Sized>(r: &mut R) -> CodecResult<f64> {
    Ok(f64::from_bits(read_i64(r)? as u64))
}

/// Booleans are stored as an int32, 1 for true.
pub fn write_bool<W: Write + ?Sized>(w: &mut W, v: bool) -> CodecResult<()> {
    write_i32(w, i32::from(v))
}

pub fn read_bool<R: Read + ?Sized>(r: &mut R) -> CodecResult<bool> {
    Ok(read_i32(r)? == 1)
}

pub fn write_string<W: Write + ?Sized>(w: &mut W, s: &str) -> CodecResult<()> {
    write_len(w, s.len())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

pub fn read_string<R: Read + ?Sized>(r: &mut R) -> CodecResult<String> {
    let len = read_len(r)?;
    let buf = fill_vec(r, len as u64)?;
    Ok(String::from_utf8(buf)?)
}

pub fn write_i32_array<W: Write + ?Sized>(w: &mut W, values: &[i32]) -> CodecResult<()> {
    let mut buf = Vec::with_capacity(values.len() * INT_BYTES);
    for v in values {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    w.write_all(&buf)?;
    Ok(())
}

pub fn read_i32_array<R: Read + ?Sized>(r: &mut R, len: usize) -> CodecResult<Vec<i32>> {
    let buf = fill_vec(r, (len as u64).saturating_mul(INT_BYTES as u64))?;
    Ok(buf
        .chunks_exact(INT_BYTES)
        .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn write_i64_array<W: Write + ?Sized>(w: &mut W, values: &[i64]) -> CodecResult<()> {
    let mut buf = Vec::with_capacity(values.len() * LONG_BYTES);
    for v in values {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    w.write_all(&buf)?;
    Ok(())
}

pub fn read_i64_array<R: Read + ?Sized>(r: &mut R, len: usize) -> CodecResult<Vec<i64>> {
    let buf = fill_vec(r, (len as u64).saturating_mul(LONG_BYTES as u64))?;
    Ok(buf
        .chunks_exact(LONG_BYTES)
        .map(|c| {
            let mut b = [0u8; LONG_BYTES];
            b.copy_from_slice(c);
            i64::from_be_bytes(b)
        })
        .collect())
}

pub fn write_full_i32_array<W: Write + ?Sized>(w: &mut W, values: &[i32]) -> CodecResult<()> {
    write_len(w, values.len())?;
    write_i32_array(w, values)
}

pub fn read_full_i32_array<R: Read + ?Sized>(r: &mut R) -> CodecResult<Vec<i32>> {
    let len = read_len(r)?;
    read_i32_array(r, len)
}

pub fn write_full_i64_array<W: Write + ?Sized>(w: &mut W, values: &[i64]) -> CodecResult<()> {
    write_len(w, values.len())?;
    write_i64_array(w, values)
}

pub fn read_full_i64_array<R: Read + ?Sized>(r: &mut R) -> CodecResult<Vec<i64>> {
    let len = read_len(r)?;
    read_i64_array(r, len)
}
