//! Primitive field encoding, modeled on the teacher's hand-rolled
//! `BufReader`/`BufWriter` field-at-a-time style (see `commitlog::commit`'s
//! `buf.get_u64().map_err(decode_error)?`), adapted to the wire encodings
//! spec.md §4.1/§6 specifies: little-endian fixed-width integers, `bool` as
//! `u8`, floats as a decimal textual round-trip, and `i64`-length-prefixed
//! strings/byte arrays where `-1` means nil.

use dtl_core::ClusterLocation;

use crate::error::WireError;

/// Accumulates encoded fields for a single framing boundary (a "cork").
#[derive(Default)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put_u8(v as u8);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_location(&mut self, loc: ClusterLocation) {
        self.buf.extend_from_slice(&loc.to_bytes());
    }

    /// `-1` length means `None`; otherwise the string's UTF-8 bytes follow an
    /// `i64` length prefix.
    pub fn put_string(&mut self, v: Option<&str>) {
        match v {
            None => self.put_i64(-1),
            Some(s) => {
                self.put_i64(s.len() as i64);
                self.buf.extend_from_slice(s.as_bytes());
            }
        }
    }

    /// Same framing as [`Self::put_string`], for raw byte arrays.
    pub fn put_bytes(&mut self, v: Option<&[u8]>) {
        match v {
            None => self.put_i64(-1),
            Some(b) => {
                self.put_i64(b.len() as i64);
                self.buf.extend_from_slice(b);
            }
        }
    }

    /// Decimal textual round-trip, per spec.md §4.1.
    pub fn put_f32(&mut self, v: f32) {
        self.put_string(Some(&v.to_string()));
    }

    pub fn put_f64(&mut self, v: f64) {
        self.put_string(Some(&v.to_string()));
    }
}

/// Consumes encoded fields from a single framing boundary's buffered bytes.
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Number of bytes consumed so far.
    pub fn pos(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::ShortRead {
                expected: n,
                actual: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn get_i64(&mut self) -> Result<i64, WireError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn get_location(&mut self) -> Result<ClusterLocation, WireError> {
        let b = self.take(8)?;
        Ok(ClusterLocation::from_bytes(b.try_into().unwrap()))
    }

    pub fn get_string(&mut self) -> Result<Option<String>, WireError> {
        match self.get_bytes()? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| WireError::MalformedFloat(format!("invalid utf-8 string field: {e}"))),
        }
    }

    pub fn get_bytes(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        let len = self.get_i64()?;
        if len == -1 {
            return Ok(None);
        }
        if len < -1 || len > i64::from(u32::MAX) {
            return Err(WireError::LengthOutOfRange(len));
        }
        Ok(Some(self.take(len as usize)?.to_vec()))
    }

    pub fn get_f32(&mut self) -> Result<f32, WireError> {
        let s = self
            .get_string()?
            .ok_or_else(|| WireError::MalformedFloat("nil f32 field".into()))?;
        s.parse().map_err(|_| WireError::MalformedFloat(s))
    }

    pub fn get_f64(&mut self) -> Result<f64, WireError> {
        let s = self
            .get_string()?
            .ok_or_else(|| WireError::MalformedFloat("nil f64 field".into()))?;
        s.parse().map_err(|_| WireError::MalformedFloat(s))
    }
}
