//! A self-describing container for exactly one value of any type, keyed by
//! its own signature. This is how a `v` in a signature travels on the wire,
//! and how untyped method arguments are represented in Rust.
//!
//! Grounded on `original_source/dbus-cxx/variant.cpp`: a `Variant` there
//! also carries its own marshaled representation for equality and caches
//! it big-endian regardless of the connection's wire endianness, so two
//! variants holding the same logical value compare equal no matter which
//! connection produced them. Re-marshaling happens lazily at emission time
//! against whatever endianness the enclosing message actually uses
//! (`DESIGN.md` records this as a deliberate resolution of an open question
//! rather than storing and byte-swapping the cached bytes).

use crate::marshal::{Endianness, Marshaler};
use crate::signature::{DataType, Signature};
use crate::value::Value;

/// One value of any D-Bus type, tagged with its own signature.
#[derive(Clone, Debug)]
pub struct Variant {
    value: Value,
    signature: Signature,
}

impl Variant {
    pub fn new(value: Value) -> Variant {
        let signature = value.signature();
        Variant { value, signature }
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// The value's natural alignment, i.e. what the marshaled body must be
    /// padded to immediately after the variant's signature.
    pub fn alignment(&self) -> usize {
        self.value.data_type().alignment()
    }

    /// The value re-marshaled in canonical big-endian form, used as the
    /// equality key so two variants built on connections of different
    /// endianness still compare equal.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut m = Marshaler::new(Endianness::Big);
        // marshal() only fails on a caller bug (mismatched signature vs.
        // value shape), which cannot happen here: `value` built this
        // signature itself.
        self.value.marshal(&mut m).expect("variant value marshals under its own signature");
        m.into_bytes()
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Variant) -> bool {
        self.signature == other.signature && self.canonical_bytes() == other.canonical_bytes()
    }
}

impl Eq for Variant {}

macro_rules! impl_from_for_variant {
    ($ty:ty) => {
        impl From<$ty> for Variant {
            fn from(v: $ty) -> Variant {
                Variant::new(Value::from(v))
            }
        }
    };
}

impl_from_for_variant!(u8);
impl_from_for_variant!(bool);
impl_from_for_variant!(i16);
impl_from_for_variant!(u16);
impl_from_for_variant!(i32);
impl_from_for_variant!(u32);
impl_from_for_variant!(i64);
impl_from_for_variant!(u64);
impl_from_for_variant!(f64);
impl_from_for_variant!(String);

impl From<&str> for Variant {
    fn from(v: &str) -> Variant {
        Variant::new(Value::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_construction_endianness() {
        let a = Variant::from(42u32);
        let b = Variant::new(Value::from(42u32));
        assert_eq!(a, b);
    }

    #[test]
    fn differing_values_are_unequal() {
        assert_ne!(Variant::from(1u32), Variant::from(2u32));
    }

    #[test]
    fn signature_matches_inner_value() {
        let v = Variant::from("hi");
        assert_eq!(v.signature().as_str(), "s");
        assert_eq!(v.data_type(), DataType::String);
    }
}
