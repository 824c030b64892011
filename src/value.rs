//! The polymorphic value the rest of the crate marshals: one variant per
//! [`DataType`], driven recursively by a [`SignatureIterator`] on the way
//! in and producing its own signature text on the way out.
//!
//! This is the Rust rendering of the type-erased value holder the source
//! library uses (`std::any` plus a `DataType` tag); a closed `enum` plays
//! the same role without the erasure, matching `spec.md` §9's design note.

use crate::error::{Error, Result};
use crate::marshal::{Marshaler, Unmarshaler};
use crate::path::ObjectPath;
use crate::signature::{DataType, Signature, SignatureIterator};
use crate::variant::Variant;

/// Any single D-Bus value, typed by the closed [`DataType`] set.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    ObjectPath(ObjectPath),
    Signature(Signature),
    UnixFd(u32),
    /// The element's own signature, plus its values.
    Array(Signature, Vec<Value>),
    Struct(Vec<Value>),
    DictEntry(Box<Value>, Box<Value>),
    Variant(Box<Variant>),
}

impl Value {
    /// The `DataType` this value marshals as.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Byte(_) => DataType::Byte,
            Value::Boolean(_) => DataType::Boolean,
            Value::Int16(_) => DataType::Int16,
            Value::Uint16(_) => DataType::Uint16,
            Value::Int32(_) => DataType::Int32,
            Value::Uint32(_) => DataType::Uint32,
            Value::Int64(_) => DataType::Int64,
            Value::Uint64(_) => DataType::Uint64,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::ObjectPath(_) => DataType::ObjectPath,
            Value::Signature(_) => DataType::Signature,
            Value::UnixFd(_) => DataType::UnixFd,
            Value::Array(..) => DataType::Array,
            Value::Struct(_) => DataType::Struct,
            Value::DictEntry(..) => DataType::DictEntry,
            Value::Variant(_) => DataType::Variant,
        }
    }

    /// This value's own signature (one single-complete-type).
    pub fn signature(&self) -> Signature {
        Signature::from_str_unchecked(self.signature_string())
    }

    fn signature_string(&self) -> String {
        match self {
            Value::Byte(_) => "y".to_string(),
            Value::Boolean(_) => "b".to_string(),
            Value::Int16(_) => "n".to_string(),
            Value::Uint16(_) => "q".to_string(),
            Value::Int32(_) => "i".to_string(),
            Value::Uint32(_) => "u".to_string(),
            Value::Int64(_) => "x".to_string(),
            Value::Uint64(_) => "t".to_string(),
            Value::Double(_) => "d".to_string(),
            Value::String(_) => "s".to_string(),
            Value::ObjectPath(_) => "o".to_string(),
            Value::Signature(_) => "g".to_string(),
            Value::UnixFd(_) => "h".to_string(),
            Value::Array(elem_sig, _) => format!("a{}", elem_sig.as_str()),
            Value::Struct(fields) => {
                let inner: String = fields.iter().map(|f| f.signature_string()).collect();
                format!("({})", inner)
            }
            Value::DictEntry(k, v) => {
                format!("{{{}{}}}", k.signature_string(), v.signature_string())
            }
            Value::Variant(_) => "v".to_string(),
        }
    }

    pub fn marshal(&self, m: &mut Marshaler) -> Result<()> {
        match self {
            Value::Byte(v) => m.write_u8(*v),
            Value::Boolean(v) => m.write_bool(*v),
            Value::Int16(v) => m.write_i16(*v),
            Value::Uint16(v) => m.write_u16(*v),
            Value::Int32(v) => m.write_i32(*v),
            Value::Uint32(v) => m.write_u32(*v),
            Value::Int64(v) => m.write_i64(*v),
            Value::Uint64(v) => m.write_u64(*v),
            Value::Double(v) => m.write_f64(*v),
            Value::String(v) => m.write_string(v),
            Value::ObjectPath(v) => m.write_object_path(v),
            Value::Signature(v) => m.write_signature(v),
            Value::UnixFd(v) => m.write_u32(*v),
            Value::Array(elem_sig, items) => {
                let elem_align = elem_sig.begin().type_().alignment();
                m.write_array(elem_align, |m| {
                    for item in items {
                        item.marshal(m)?;
                    }
                    Ok(())
                })
            }
            Value::Struct(fields) => m.write_struct(|m| {
                for field in fields {
                    field.marshal(m)?;
                }
                Ok(())
            }),
            Value::DictEntry(k, v) => m.write_struct(|m| {
                k.marshal(m)?;
                v.marshal(m)
            }),
            Value::Variant(variant) => {
                m.write_variant_header(variant.signature())?;
                m.align(variant.value().data_type().alignment());
                variant.value().marshal(m)
            }
        }
    }

    /// Unmarshal the value at `it`'s current type from `u`.
    pub fn unmarshal(it: &SignatureIterator<'_>, u: &mut Unmarshaler<'_>) -> Result<Value> {
        match it.type_() {
            DataType::Byte => Ok(Value::Byte(u.read_u8()?)),
            DataType::Boolean => Ok(Value::Boolean(u.read_bool()?)),
            DataType::Int16 => Ok(Value::Int16(u.read_i16()?)),
            DataType::Uint16 => Ok(Value::Uint16(u.read_u16()?)),
            DataType::Int32 => Ok(Value::Int32(u.read_i32()?)),
            DataType::Uint32 => Ok(Value::Uint32(u.read_u32()?)),
            DataType::Int64 => Ok(Value::Int64(u.read_i64()?)),
            DataType::Uint64 => Ok(Value::Uint64(u.read_u64()?)),
            DataType::Double => Ok(Value::Double(u.read_f64()?)),
            DataType::String => Ok(Value::String(u.read_string()?)),
            DataType::ObjectPath => Ok(Value::ObjectPath(u.read_object_path()?)),
            DataType::Signature => Ok(Value::Signature(u.read_signature()?)),
            DataType::UnixFd => Ok(Value::UnixFd(u.read_u32()?)),
            DataType::Array => {
                let elem_it = it.recurse();
                let elem_align = elem_it.type_().alignment();
                let body_end = u.read_array_header(elem_align)?;
                let mut items = Vec::new();
                while u.offset() < body_end {
                    items.push(Value::unmarshal(&elem_it, u)?);
                }
                let elem_sig = Signature::from_str_unchecked(elem_it.as_str());
                Ok(Value::Array(elem_sig, items))
            }
            DataType::Struct => {
                u.read_struct_align()?;
                let mut field_it = it.recurse();
                let mut fields = Vec::new();
                while field_it.type_() != DataType::Invalid {
                    fields.push(Value::unmarshal(&field_it, u)?);
                    field_it.next();
                }
                Ok(Value::Struct(fields))
            }
            DataType::DictEntry => {
                u.read_struct_align()?;
                let mut kv_it = it.recurse();
                let key = Value::unmarshal(&kv_it, u)?;
                kv_it.next();
                let val = Value::unmarshal(&kv_it, u)?;
                Ok(Value::DictEntry(Box::new(key), Box::new(val)))
            }
            DataType::Variant => {
                let sig = u.read_signature()?;
                let sig_it = sig.begin();
                if sig_it.type_() == DataType::Invalid {
                    return Err(Error::Marshal("variant signature is empty".into()));
                }
                u.align(sig_it.type_().alignment())?;
                let inner = Value::unmarshal(&sig_it, u)?;
                Ok(Value::Variant(Box::new(Variant::new(inner))))
            }
            DataType::Invalid => Err(Error::Marshal("nothing left to unmarshal".into())),
        }
    }
}

macro_rules! impl_from_for_value {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Value {
                Value::$variant(v)
            }
        }
    };
}

impl_from_for_value!(u8, Byte);
impl_from_for_value!(bool, Boolean);
impl_from_for_value!(i16, Int16);
impl_from_for_value!(u16, Uint16);
impl_from_for_value!(i32, Int32);
impl_from_for_value!(u32, Uint32);
impl_from_for_value!(i64, Int64);
impl_from_for_value!(u64, Uint64);
impl_from_for_value!(f64, Double);
impl_from_for_value!(String, String);
impl_from_for_value!(ObjectPath, ObjectPath);
impl_from_for_value!(Signature, Signature);

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::Endianness;

    fn round_trip(value: Value, endian: Endianness) -> Value {
        let sig = value.signature();
        let mut m = Marshaler::new(endian);
        value.marshal(&mut m).unwrap();
        let bytes = m.into_bytes();
        let mut u = Unmarshaler::new(&bytes, endian);
        Value::unmarshal(&sig.begin(), &mut u).unwrap()
    }

    #[test]
    fn round_trips_every_primitive() {
        for endian in [Endianness::Little, Endianness::Big] {
            assert_eq!(round_trip(Value::from(7u8), endian), Value::from(7u8));
            assert_eq!(round_trip(Value::from(true), endian), Value::from(true));
            assert_eq!(round_trip(Value::from(-9i16), endian), Value::from(-9i16));
            assert_eq!(round_trip(Value::from(9u16), endian), Value::from(9u16));
            assert_eq!(round_trip(Value::from(-9i32), endian), Value::from(-9i32));
            assert_eq!(round_trip(Value::from(9u32), endian), Value::from(9u32));
            assert_eq!(round_trip(Value::from(-9i64), endian), Value::from(-9i64));
            assert_eq!(round_trip(Value::from(9u64), endian), Value::from(9u64));
            assert_eq!(round_trip(Value::from(1.5f64), endian), Value::from(1.5f64));
            assert_eq!(
                round_trip(Value::from("hi"), endian),
                Value::from("hi".to_string())
            );
        }
    }

    #[test]
    fn round_trips_array_and_struct() {
        let arr = Value::Array(
            Signature::new("i").unwrap(),
            vec![Value::from(3i32), Value::from(4i32)],
        );
        assert_eq!(arr.signature().as_str(), "ai");
        assert_eq!(round_trip(arr.clone(), Endianness::Little), arr);

        let st = Value::Struct(vec![Value::from(3i32), Value::from(4u64)]);
        assert_eq!(st.signature().as_str(), "it");
        assert_eq!(round_trip(st.clone(), Endianness::Big), st);
    }

    #[test]
    fn round_trips_empty_array() {
        let arr = Value::Array(Signature::new("s").unwrap(), vec![]);
        assert_eq!(round_trip(arr.clone(), Endianness::Little), arr);
    }

    #[test]
    fn round_trips_dict_entry_and_variant() {
        let entry = Value::DictEntry(Box::new(Value::from(1u8)), Box::new(Value::from("v")));
        assert_eq!(entry.signature().as_str(), "{ys}");
        assert_eq!(round_trip(entry.clone(), Endianness::Little), entry);

        let variant = Value::Variant(Box::new(Variant::new(Value::from(42u32))));
        assert_eq!(round_trip(variant.clone(), Endianness::Big), variant);
    }
}
