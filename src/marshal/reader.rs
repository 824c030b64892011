use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::Read;

use crate::error::{Error, Result};
use crate::path::ObjectPath;
use crate::signature::Signature;

use super::{padding_for, Endianness};

/// Reads a marshaled byte buffer back out, mirroring [`super::Marshaler`]
/// call for call: every primitive read first skips alignment padding.
pub struct Unmarshaler<'b> {
    buf: &'b [u8],
    pos: usize,
    endian: Endianness,
}

impl<'b> Unmarshaler<'b> {
    pub fn new(buf: &'b [u8], endian: Endianness) -> Unmarshaler<'b> {
        Unmarshaler { buf, pos: 0, endian }
    }

    pub fn with_offset(buf: &'b [u8], endian: Endianness, pos: usize) -> Unmarshaler<'b> {
        Unmarshaler { buf, pos, endian }
    }

    #[inline]
    pub fn endian(&self) -> Endianness {
        self.endian
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn align(&mut self, align: usize) -> Result<()> {
        let pad = padding_for(self.pos, align);
        if self.remaining() < pad {
            return Err(Error::Marshal("truncated while skipping alignment padding".into()));
        }
        self.pos += pad;
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'b [u8]> {
        if self.remaining() < n {
            return Err(Error::Marshal("truncated message body".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut slice = self.take(1)?;
        Ok(slice.read_u8()?)
    }

    /// As for `UINT32`, but only `0` and `1` are valid values; any other
    /// nonzero value is a strict rejection (`spec.md` §9 resolves the
    /// leniency question this way).
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Marshal(format!("invalid boolean wire value `{}`", other))),
        }
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.align(2)?;
        let mut slice = self.take(2)?;
        Ok(match self.endian {
            Endianness::Little => slice.read_i16::<LittleEndian>()?,
            Endianness::Big => slice.read_i16::<BigEndian>()?,
        })
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        let mut slice = self.take(2)?;
        Ok(match self.endian {
            Endianness::Little => slice.read_u16::<LittleEndian>()?,
            Endianness::Big => slice.read_u16::<BigEndian>()?,
        })
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.align(4)?;
        let mut slice = self.take(4)?;
        Ok(match self.endian {
            Endianness::Little => slice.read_i32::<LittleEndian>()?,
            Endianness::Big => slice.read_i32::<BigEndian>()?,
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        let mut slice = self.take(4)?;
        Ok(match self.endian {
            Endianness::Little => slice.read_u32::<LittleEndian>()?,
            Endianness::Big => slice.read_u32::<BigEndian>()?,
        })
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.align(8)?;
        let mut slice = self.take(8)?;
        Ok(match self.endian {
            Endianness::Little => slice.read_i64::<LittleEndian>()?,
            Endianness::Big => slice.read_i64::<BigEndian>()?,
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.align(8)?;
        let mut slice = self.take(8)?;
        Ok(match self.endian {
            Endianness::Little => slice.read_u64::<LittleEndian>()?,
            Endianness::Big => slice.read_u64::<BigEndian>()?,
        })
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.align(8)?;
        let mut slice = self.take(8)?;
        Ok(match self.endian {
            Endianness::Little => slice.read_f64::<LittleEndian>()?,
            Endianness::Big => slice.read_f64::<BigEndian>()?,
        })
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?.to_vec();
        let nul = self.read_u8()?;
        if nul != 0 {
            return Err(Error::Marshal("string missing NUL terminator".into()));
        }
        Ok(String::from_utf8(bytes)?)
    }

    pub fn read_object_path(&mut self) -> Result<ObjectPath> {
        let s = self.read_string()?;
        ObjectPath::new(s)
    }

    pub fn read_signature(&mut self) -> Result<Signature> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?.to_vec();
        let nul = self.read_u8()?;
        if nul != 0 {
            return Err(Error::Marshal("signature missing NUL terminator".into()));
        }
        let s = String::from_utf8(bytes)?;
        Signature::new(s)
    }

    /// Reads the array's `UINT32` body-length prefix and aligns past the
    /// element-type padding (present even for an empty array), returning
    /// the byte offset the array body ends at.
    pub fn read_array_header(&mut self, elem_align: usize) -> Result<usize> {
        const MAX_ARRAY_BODY_LEN: u32 = 1 << 26;
        let body_len = self.read_u32()?;
        if body_len > MAX_ARRAY_BODY_LEN {
            return Err(Error::Marshal(format!(
                "array body length {} exceeds maximum {}",
                body_len, MAX_ARRAY_BODY_LEN
            )));
        }
        self.align(elem_align)?;
        Ok(self.pos + body_len as usize)
    }

    pub fn read_struct_align(&mut self) -> Result<()> {
        self.align(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::Marshaler;

    #[test]
    fn round_trip_primitives() {
        for endian in [Endianness::Little, Endianness::Big] {
            let mut m = Marshaler::new(endian);
            m.write_u8(7).unwrap();
            m.write_i32(-123).unwrap();
            m.write_u64(u64::MAX).unwrap();
            m.write_f64(3.5).unwrap();
            m.write_string("hello").unwrap();

            let bytes = m.into_bytes();
            let mut u = Unmarshaler::new(&bytes, endian);
            assert_eq!(u.read_u8().unwrap(), 7);
            assert_eq!(u.read_i32().unwrap(), -123);
            assert_eq!(u.read_u64().unwrap(), u64::MAX);
            assert_eq!(u.read_f64().unwrap(), 3.5);
            assert_eq!(u.read_string().unwrap(), "hello");
        }
    }

    #[test]
    fn rejects_non_canonical_bool() {
        let mut m = Marshaler::new(Endianness::Little);
        m.write_u32(2).unwrap();
        let bytes = m.into_bytes();
        let mut u = Unmarshaler::new(&bytes, Endianness::Little);
        assert!(u.read_bool().is_err());
    }

    #[test]
    fn alignment_law() {
        let mut m = Marshaler::new(Endianness::Little);
        m.write_u8(1).unwrap();
        let off_before_i64 = {
            m.align(8);
            m.offset()
        };
        assert_eq!(off_before_i64 % 8, 0);
    }
}
