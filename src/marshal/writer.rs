use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

use crate::error::Result;
use crate::path::ObjectPath;
use crate::signature::Signature;

use super::{padding_for, Endianness};

/// Builds up a marshaled byte buffer, tracking the logical write offset so
/// every primitive can pad itself to its natural alignment first.
///
/// Mirrors the teacher's `DbusWriter<T: io::Write>` (same per-type method
/// names, same `write_padding` helper), but writes into an owned `Vec<u8>`
/// and picks little- vs big-endian at runtime rather than via a
/// `byteorder::ByteOrder` type parameter.
#[derive(Debug)]
pub struct Marshaler {
    buf: Vec<u8>,
    endian: Endianness,
}

impl Marshaler {
    pub fn new(endian: Endianness) -> Marshaler {
        Marshaler {
            buf: Vec::new(),
            endian,
        }
    }

    /// Continue appending to an existing buffer (used when a message body
    /// is marshaled directly after the header, sharing one offset space).
    pub fn with_buffer(endian: Endianness, buf: Vec<u8>) -> Marshaler {
        Marshaler { buf, endian }
    }

    #[inline]
    pub fn endian(&self) -> Endianness {
        self.endian
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Pad with zero bytes until the write offset is a multiple of
    /// `align`; a no-op for `align <= 1`.
    pub fn align(&mut self, align: usize) {
        let pad = padding_for(self.buf.len(), align);
        self.buf.extend(std::iter::repeat(0u8).take(pad));
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.buf.write_u8(v)?;
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u32(v as u32)
    }

    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        self.align(2);
        match self.endian {
            Endianness::Little => self.buf.write_i16::<LittleEndian>(v)?,
            Endianness::Big => self.buf.write_i16::<BigEndian>(v)?,
        }
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.align(2);
        match self.endian {
            Endianness::Little => self.buf.write_u16::<LittleEndian>(v)?,
            Endianness::Big => self.buf.write_u16::<BigEndian>(v)?,
        }
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.align(4);
        match self.endian {
            Endianness::Little => self.buf.write_i32::<LittleEndian>(v)?,
            Endianness::Big => self.buf.write_i32::<BigEndian>(v)?,
        }
        Ok(())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.align(4);
        match self.endian {
            Endianness::Little => self.buf.write_u32::<LittleEndian>(v)?,
            Endianness::Big => self.buf.write_u32::<BigEndian>(v)?,
        }
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.align(8);
        match self.endian {
            Endianness::Little => self.buf.write_i64::<LittleEndian>(v)?,
            Endianness::Big => self.buf.write_i64::<BigEndian>(v)?,
        }
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.align(8);
        match self.endian {
            Endianness::Little => self.buf.write_u64::<LittleEndian>(v)?,
            Endianness::Big => self.buf.write_u64::<BigEndian>(v)?,
        }
        Ok(())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.align(8);
        match self.endian {
            Endianness::Little => self.buf.write_f64::<LittleEndian>(v)?,
            Endianness::Big => self.buf.write_f64::<BigEndian>(v)?,
        }
        Ok(())
    }

    /// `UINT32` length (excluding the NUL) + UTF-8 bytes + one NUL.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_u32(s.len() as u32)?;
        self.buf.extend_from_slice(s.as_bytes());
        self.write_u8(0)
    }

    pub fn write_object_path(&mut self, path: &ObjectPath) -> Result<()> {
        self.write_string(path.as_str())
    }

    /// `UINT8` length + signature bytes + one NUL.
    pub fn write_signature(&mut self, sig: &Signature) -> Result<()> {
        self.write_u8(sig.len() as u8)?;
        self.buf.extend_from_slice(sig.as_str().as_bytes());
        self.write_u8(0)
    }

    /// Reserve space for an array's `UINT32` body-length prefix, align to
    /// the element type, then let the caller marshal the elements; the
    /// prefix is patched in afterwards with the actual body length.
    ///
    /// `elem_align` padding is inserted even for an empty array, per
    /// `spec.md` §4.2.
    pub fn write_array<F>(&mut self, elem_align: usize, f: F) -> Result<()>
    where
        F: FnOnce(&mut Marshaler) -> Result<()>,
    {
        self.align(4);
        let len_offset = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 4]);
        self.align(elem_align);
        let body_start = self.buf.len();

        f(self)?;

        let body_len = (self.buf.len() - body_start) as u32;
        let bytes = match self.endian {
            Endianness::Little => body_len.to_le_bytes(),
            Endianness::Big => body_len.to_be_bytes(),
        };
        self.buf[len_offset..len_offset + 4].copy_from_slice(&bytes);
        Ok(())
    }

    /// Align to 8 and let the caller marshal the struct/dict-entry's
    /// children.
    pub fn write_struct<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Marshaler) -> Result<()>,
    {
        self.align(8);
        f(self)
    }

    /// A signature (single complete type) followed by the value aligned
    /// to that type's natural alignment; `f` writes the value itself.
    pub fn write_variant_header(&mut self, sig: &Signature) -> Result<()> {
        self.write_signature(sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_before_primitives() {
        let mut m = Marshaler::new(Endianness::Little);
        m.write_u8(1).unwrap();
        m.write_u32(2).unwrap();
        assert_eq!(m.offset() % 4, 0);
        assert_eq!(m.as_bytes(), &[1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn string_layout() {
        let mut m = Marshaler::new(Endianness::Little);
        m.write_string("hi").unwrap();
        assert_eq!(m.as_bytes(), &[2, 0, 0, 0, b'h', b'i', 0]);
    }

    #[test]
    fn array_padding_present_even_when_empty() {
        let mut m = Marshaler::new(Endianness::Little);
        m.write_u8(1).unwrap();
        m.write_array(8, |_| Ok(())).unwrap();
        // align(4) pad (3 bytes) + 4-byte len (0) + align(8) pad (0, since
        // offset is now 8) = total buffer length 8.
        assert_eq!(m.offset(), 8);
    }
}
