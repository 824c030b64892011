//! Typed, structural read access over a message body.
//!
//! The body has already been decoded into a `Vec<Value>` by
//! [`super::Message::parse`] (reusing the same recursive unmarshal
//! [`crate::value::Value`] already implements for `VARIANT`s), so this
//! cursor walks that tree rather than re-driving the byte-level
//! unmarshaler; observable behavior — typed extraction, `recurse()` into
//! containers, `INVALID` at exhaustion — matches `spec.md` §4.4 exactly.

use std::borrow::Cow;

use crate::error::{Error, Result};
use crate::path::ObjectPath;
use crate::signature::{DataType, Signature};
use crate::value::Value;
use crate::variant::Variant;

/// A cursor over one level of a message body (or a container within it).
pub struct MessageIterator<'v> {
    values: Cow<'v, [Value]>,
    pos: usize,
}

impl<'v> MessageIterator<'v> {
    pub(crate) fn new(values: &'v [Value]) -> MessageIterator<'v> {
        MessageIterator {
            values: Cow::Borrowed(values),
            pos: 0,
        }
    }

    fn current(&self) -> Option<&Value> {
        self.values.get(self.pos)
    }

    pub fn type_(&self) -> DataType {
        self.current().map(Value::data_type).unwrap_or(DataType::Invalid)
    }

    pub fn is_container(&self) -> bool {
        self.type_().is_container()
    }

    pub fn is_array(&self) -> bool {
        self.type_() == DataType::Array
    }

    pub fn is_dict(&self) -> bool {
        matches!(self.current(), Some(Value::Array(elem_sig, _)) if elem_sig.begin().type_() == DataType::DictEntry)
    }

    /// Advance past the value at the cursor.
    pub fn next(&mut self) {
        if self.pos < self.values.len() {
            self.pos += 1;
        }
    }

    /// An iterator over the children of the container at the cursor:
    /// elements of an array, fields of a struct, or the (key, value) pair
    /// of a dict-entry. Returns an immediately-exhausted iterator for a
    /// non-container.
    pub fn recurse(&self) -> MessageIterator<'static> {
        match self.current() {
            Some(Value::Array(_, items)) => MessageIterator {
                values: Cow::Owned(items.clone()),
                pos: 0,
            },
            Some(Value::Struct(fields)) => MessageIterator {
                values: Cow::Owned(fields.clone()),
                pos: 0,
            },
            Some(Value::DictEntry(k, v)) => MessageIterator {
                values: Cow::Owned(vec![(**k).clone(), (**v).clone()]),
                pos: 0,
            },
            _ => MessageIterator {
                values: Cow::Owned(Vec::new()),
                pos: 0,
            },
        }
    }

    fn expect<T>(&self, f: impl FnOnce(&Value) -> Option<T>, what: &str) -> Result<T> {
        self.current()
            .and_then(f)
            .ok_or_else(|| Error::Marshal(format!("expected {} at cursor", what)))
    }

    pub fn as_byte(&self) -> Result<u8> {
        self.expect(|v| if let Value::Byte(b) = v { Some(*b) } else { None }, "BYTE")
    }

    pub fn as_bool(&self) -> Result<bool> {
        self.expect(
            |v| if let Value::Boolean(b) = v { Some(*b) } else { None },
            "BOOLEAN",
        )
    }

    pub fn as_int16(&self) -> Result<i16> {
        self.expect(|v| if let Value::Int16(n) = v { Some(*n) } else { None }, "INT16")
    }

    pub fn as_uint16(&self) -> Result<u16> {
        self.expect(|v| if let Value::Uint16(n) = v { Some(*n) } else { None }, "UINT16")
    }

    pub fn as_int32(&self) -> Result<i32> {
        self.expect(|v| if let Value::Int32(n) = v { Some(*n) } else { None }, "INT32")
    }

    pub fn as_uint32(&self) -> Result<u32> {
        self.expect(|v| if let Value::Uint32(n) = v { Some(*n) } else { None }, "UINT32")
    }

    pub fn as_int64(&self) -> Result<i64> {
        self.expect(|v| if let Value::Int64(n) = v { Some(*n) } else { None }, "INT64")
    }

    pub fn as_uint64(&self) -> Result<u64> {
        self.expect(|v| if let Value::Uint64(n) = v { Some(*n) } else { None }, "UINT64")
    }

    pub fn as_double(&self) -> Result<f64> {
        self.expect(|v| if let Value::Double(n) = v { Some(*n) } else { None }, "DOUBLE")
    }

    pub fn as_string(&self) -> Result<&str> {
        match self.current() {
            Some(Value::String(s)) => Ok(s.as_str()),
            _ => Err(Error::Marshal("expected STRING at cursor".into())),
        }
    }

    pub fn as_object_path(&self) -> Result<&ObjectPath> {
        match self.current() {
            Some(Value::ObjectPath(p)) => Ok(p),
            _ => Err(Error::Marshal("expected OBJECT_PATH at cursor".into())),
        }
    }

    pub fn as_signature(&self) -> Result<&Signature> {
        match self.current() {
            Some(Value::Signature(s)) => Ok(s),
            _ => Err(Error::Marshal("expected SIGNATURE at cursor".into())),
        }
    }

    pub fn as_variant(&self) -> Result<&Variant> {
        match self.current() {
            Some(Value::Variant(v)) => Ok(v),
            _ => Err(Error::Marshal("expected VARIANT at cursor".into())),
        }
    }

    pub fn as_unix_fd(&self) -> Result<u32> {
        self.expect(|v| if let Value::UnixFd(n) = v { Some(*n) } else { None }, "UNIX_FD")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_flat_values() {
        let values = vec![Value::from(3i32), Value::from("hi")];
        let mut it = MessageIterator::new(&values);
        assert_eq!(it.as_int32().unwrap(), 3);
        it.next();
        assert_eq!(it.as_string().unwrap(), "hi");
        it.next();
        assert_eq!(it.type_(), DataType::Invalid);
    }

    #[test]
    fn recurses_into_array() {
        let values = vec![Value::Array(
            Signature::new("i").unwrap(),
            vec![Value::from(1i32), Value::from(2i32)],
        )];
        let it = MessageIterator::new(&values);
        assert!(it.is_array());
        let mut sub = it.recurse();
        assert_eq!(sub.as_int32().unwrap(), 1);
        sub.next();
        assert_eq!(sub.as_int32().unwrap(), 2);
    }

    #[test]
    fn recurses_into_dict_entry() {
        let values = vec![Value::DictEntry(
            Box::new(Value::from("key")),
            Box::new(Value::Variant(Box::new(Variant::new(Value::from(7u32))))),
        )];
        let it = MessageIterator::new(&values);
        let mut kv = it.recurse();
        assert_eq!(kv.as_string().unwrap(), "key");
        kv.next();
        assert_eq!(kv.as_variant().unwrap().value(), &Value::from(7u32));
    }
}
