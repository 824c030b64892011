//! Compile-time signature derivation: given a Rust type (or a tuple of
//! types), produce the [`Signature`] it marshals as, without needing a
//! value to inspect (`spec.md` §6: "Signature construction … from a
//! tuple-of-types compile-time derivation").
//!
//! Grounded on the teacher's `type_system.rs::ToTypeCode`: the same closed
//! per-basic-type impl set and the same recursive container shape (`Vec<T>`
//! leads with `a`, `HashMap<K, V>` wraps in `{..}`). The teacher's trait is
//! driven by `&self`, which only works because it always has a value on
//! hand to inspect; a *compile-time* derivation has no value yet, so
//! `signature_str` takes no `self` and the tuple impls below (new here —
//! the teacher never derives a struct's signature, only a map's or a
//! vec's) produce `(..)` from the type list alone.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use crate::path::ObjectPath;
use crate::signature::Signature;
use crate::variant::Variant;

/// A Rust type whose D-Bus signature is known at compile time.
pub trait TypeSignature {
    /// This type's single-complete-type signature text.
    fn signature_str() -> String;

    /// The same, as a validated [`Signature`].
    fn signature() -> Signature {
        Signature::from_str_unchecked(Self::signature_str())
    }
}

/// Marker for the basic (non-container) types, mirroring the teacher's
/// `BasicType`: only these may act as a `DICT_ENTRY` key.
pub trait BasicTypeSignature: TypeSignature {}

macro_rules! impl_basic_type_signature {
    ($ty:ty, $code:expr) => {
        impl TypeSignature for $ty {
            fn signature_str() -> String {
                $code.to_string()
            }
        }
        impl BasicTypeSignature for $ty {}
    };
}

impl_basic_type_signature!(u8, "y");
impl_basic_type_signature!(bool, "b");
impl_basic_type_signature!(i16, "n");
impl_basic_type_signature!(u16, "q");
impl_basic_type_signature!(i32, "i");
impl_basic_type_signature!(u32, "u");
impl_basic_type_signature!(i64, "x");
impl_basic_type_signature!(u64, "t");
impl_basic_type_signature!(f64, "d");
impl_basic_type_signature!(String, "s");
impl_basic_type_signature!(ObjectPath, "o");
impl_basic_type_signature!(Signature, "g");

impl TypeSignature for &str {
    fn signature_str() -> String {
        "s".to_string()
    }
}
impl BasicTypeSignature for &str {}

/// VARIANT is a container type, not a basic type: it cannot be a dict key.
impl TypeSignature for Variant {
    fn signature_str() -> String {
        "v".to_string()
    }
}

/// ARRAY has ASCII character 'a' as type code, followed by exactly one
/// single complete type: the element type.
impl<T: TypeSignature> TypeSignature for Vec<T> {
    fn signature_str() -> String {
        format!("a{}", T::signature_str())
    }
}

impl<T: TypeSignature> TypeSignature for [T] {
    fn signature_str() -> String {
        format!("a{}", T::signature_str())
    }
}

/// A DICT_ENTRY works like a struct but with curly braces and the
/// restriction that the key is a basic type; it only ever appears as an
/// array's element type, so the derived signature is the full `a{KV}`.
impl<K, V, S> TypeSignature for HashMap<K, V, S>
where
    K: BasicTypeSignature + Eq + Hash,
    V: TypeSignature,
    S: BuildHasher,
{
    fn signature_str() -> String {
        format!("a{{{}{}}}", K::signature_str(), V::signature_str())
    }
}

macro_rules! impl_tuple_signature {
    ($($t:ident),+) => {
        impl<$($t: TypeSignature),+> TypeSignature for ($($t,)+) {
            fn signature_str() -> String {
                let mut s = String::from("(");
                $(s.push_str(&$t::signature_str());)+
                s.push(')');
                s
            }
        }
    };
}

impl_tuple_signature!(A);
impl_tuple_signature!(A, B);
impl_tuple_signature!(A, B, C);
impl_tuple_signature!(A, B, C, D);
impl_tuple_signature!(A, B, C, D, E);
impl_tuple_signature!(A, B, C, D, E, F);
impl_tuple_signature!(A, B, C, D, E, F, G);
impl_tuple_signature!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_types_match_their_wire_codes() {
        assert_eq!(u8::signature_str(), "y");
        assert_eq!(bool::signature_str(), "b");
        assert_eq!(i32::signature_str(), "i");
        assert_eq!(u64::signature_str(), "t");
        assert_eq!(String::signature_str(), "s");
        assert_eq!(ObjectPath::signature_str(), "o");
        assert_eq!(Signature::signature_str(), "g");
    }

    #[test]
    fn vec_leads_with_array_code() {
        assert_eq!(Vec::<String>::signature_str(), "as");
    }

    #[test]
    fn hashmap_derives_a_dict_signature() {
        assert_eq!(HashMap::<u8, String>::signature_str(), "a{ys}");
        assert_eq!(HashMap::<String, Variant>::signature_str(), "a{sv}");
    }

    /// S3 from `spec.md` §8: the signature of a sequence whose element is a
    /// pair of (int32, uint64) is exactly `a(it)`.
    #[test]
    fn tuple_sequence_signature_matches_s3() {
        assert_eq!(Vec::<(i32, u64)>::signature_str(), "a(it)");
        assert_eq!(<(i32, u64)>::signature_str(), "(it)");
    }

    #[test]
    fn derived_signature_is_valid() {
        assert!(Vec::<(i32, u64)>::signature().is_valid());
    }
}
