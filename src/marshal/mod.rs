//! The binary marshaling/unmarshaling codec: every primitive and container
//! type, with strict alignment and endianness parameterization.
//!
//! Unlike the teacher's `DbusWriter<T: io::Write>` / `byteorder::ByteOrder`
//! generic, endianness here is a runtime value ([`Endianness`]): a
//! connection learns its peer's endianness from the wire, so it cannot be
//! fixed at compile time the way the teacher's skeleton assumed.

mod reader;
mod writer;

pub use reader::Unmarshaler;
pub use writer::Marshaler;

/// D-Bus code for a message's byte order; `l` little-endian, `B`
/// big-endian. Applies to every multi-byte scalar in the message,
/// including length prefixes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// The endianness tag byte as it appears on the wire.
    pub fn tag(self) -> u8 {
        match self {
            Endianness::Little => b'l',
            Endianness::Big => b'B',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Endianness> {
        match tag {
            b'l' => Some(Endianness::Little),
            b'B' => Some(Endianness::Big),
            _ => None,
        }
    }

    /// The endianness this process's architecture uses natively.
    pub fn native() -> Endianness {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

/// Round up `offset` to the next multiple of `align` (a power of two).
#[inline]
pub(crate) fn padding_for(offset: usize, align: usize) -> usize {
    let rem = offset % align;
    if rem == 0 {
        0
    } else {
        align - rem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_math() {
        assert_eq!(padding_for(0, 8), 0);
        assert_eq!(padding_for(1, 8), 7);
        assert_eq!(padding_for(8, 8), 0);
        assert_eq!(padding_for(5, 4), 3);
    }

    /// `spec.md` §8 property 3: marshal/unmarshal round-trips for every
    /// primitive, in both endiannesses. `quickcheck` supplies the values.
    quickcheck! {
        fn round_trips_u8(v: u8) -> bool {
            round_trips(v, Marshaler::write_u8, Unmarshaler::read_u8)
        }

        fn round_trips_i16(v: i16) -> bool {
            round_trips(v, Marshaler::write_i16, Unmarshaler::read_i16)
        }

        fn round_trips_u16(v: u16) -> bool {
            round_trips(v, Marshaler::write_u16, Unmarshaler::read_u16)
        }

        fn round_trips_i32(v: i32) -> bool {
            round_trips(v, Marshaler::write_i32, Unmarshaler::read_i32)
        }

        fn round_trips_u32(v: u32) -> bool {
            round_trips(v, Marshaler::write_u32, Unmarshaler::read_u32)
        }

        fn round_trips_i64(v: i64) -> bool {
            round_trips(v, Marshaler::write_i64, Unmarshaler::read_i64)
        }

        fn round_trips_u64(v: u64) -> bool {
            round_trips(v, Marshaler::write_u64, Unmarshaler::read_u64)
        }

        fn round_trips_string(v: String) -> bool {
            // Embedded NULs are valid UTF-8 but not a valid D-Bus STRING
            // content in practice; skip them rather than report a false
            // failure on an input the type doesn't claim to support.
            if v.contains('\0') {
                return true;
            }
            for endian in [Endianness::Little, Endianness::Big] {
                let mut m = Marshaler::new(endian);
                m.write_string(&v).unwrap();
                let bytes = m.into_bytes();
                let mut u = Unmarshaler::new(&bytes, endian);
                if u.read_string().unwrap() != v {
                    return false;
                }
            }
            true
        }
    }

    fn round_trips<T: Copy + PartialEq>(
        v: T,
        write: impl Fn(&mut Marshaler, T) -> crate::error::Result<()>,
        read: impl Fn(&mut Unmarshaler<'_>) -> crate::error::Result<T>,
    ) -> bool {
        for endian in [Endianness::Little, Endianness::Big] {
            let mut m = Marshaler::new(endian);
            write(&mut m, v).unwrap();
            let bytes = m.into_bytes();
            let mut u = Unmarshaler::new(&bytes, endian);
            if read(&mut u).unwrap() != v {
                return false;
            }
        }
        true
    }
}
