//! Builds a message body, tracking the emerging SIGNATURE string as values
//! are appended and rejecting a container close whose contents don't match
//! the shape the D-Bus type grammar requires (`spec.md` §4.4).

use crate::error::{Error, Result};
use crate::path::ObjectPath;
use crate::signature::Signature;
use crate::value::Value;
use crate::variant::Variant;

enum Frame {
    Array {
        elem_signature: Signature,
        items: Vec<Value>,
    },
    Struct {
        fields: Vec<Value>,
    },
    DictEntry {
        parts: Vec<Value>,
    },
}

/// A builder over a message body. Values appended while no container is
/// open go straight to the body; `open_array`/`open_struct`/
/// `open_dict_entry` push a frame that collects its children until the
/// matching `close_*` call, at which point the finished container is
/// appended to whatever frame (or the body) is now on top.
pub struct MessageAppendIterator<'m> {
    body: &'m mut Vec<Value>,
    signature: &'m mut Signature,
    stack: Vec<Frame>,
}

impl<'m> MessageAppendIterator<'m> {
    pub(crate) fn new(
        body: &'m mut Vec<Value>,
        signature: &'m mut Signature,
    ) -> MessageAppendIterator<'m> {
        MessageAppendIterator {
            body,
            signature,
            stack: Vec::new(),
        }
    }

    fn push(&mut self, value: Value) -> Result<()> {
        match self.stack.last_mut() {
            Some(Frame::Array { elem_signature, items }) => {
                if elem_signature.is_empty() {
                    *elem_signature = value.signature();
                } else if value.signature() != *elem_signature {
                    return Err(Error::Marshal(format!(
                        "array element signature `{}` does not match declared `{}`",
                        value.signature(),
                        elem_signature
                    )));
                }
                items.push(value);
                Ok(())
            }
            Some(Frame::Struct { fields }) => {
                fields.push(value);
                Ok(())
            }
            Some(Frame::DictEntry { parts }) => {
                if parts.len() >= 2 {
                    return Err(Error::Marshal("dict entry takes exactly one key and one value".into()));
                }
                if parts.is_empty() && !value.data_type().is_basic() {
                    return Err(Error::Marshal("dict entry key must be a basic type".into()));
                }
                parts.push(value);
                Ok(())
            }
            None => {
                let sig = value.signature();
                self.signature.push_str(sig.as_str());
                self.body.push(value);
                Ok(())
            }
        }
    }

    pub fn append_byte(&mut self, v: u8) -> Result<()> {
        self.push(Value::Byte(v))
    }

    pub fn append_bool(&mut self, v: bool) -> Result<()> {
        self.push(Value::Boolean(v))
    }

    pub fn append_int16(&mut self, v: i16) -> Result<()> {
        self.push(Value::Int16(v))
    }

    pub fn append_uint16(&mut self, v: u16) -> Result<()> {
        self.push(Value::Uint16(v))
    }

    pub fn append_int32(&mut self, v: i32) -> Result<()> {
        self.push(Value::Int32(v))
    }

    pub fn append_uint32(&mut self, v: u32) -> Result<()> {
        self.push(Value::Uint32(v))
    }

    pub fn append_int64(&mut self, v: i64) -> Result<()> {
        self.push(Value::Int64(v))
    }

    pub fn append_uint64(&mut self, v: u64) -> Result<()> {
        self.push(Value::Uint64(v))
    }

    pub fn append_double(&mut self, v: f64) -> Result<()> {
        self.push(Value::Double(v))
    }

    pub fn append_string(&mut self, v: impl Into<String>) -> Result<()> {
        self.push(Value::String(v.into()))
    }

    pub fn append_object_path(&mut self, v: ObjectPath) -> Result<()> {
        self.push(Value::ObjectPath(v))
    }

    pub fn append_signature(&mut self, v: Signature) -> Result<()> {
        self.push(Value::Signature(v))
    }

    pub fn append_variant(&mut self, v: Variant) -> Result<()> {
        self.push(Value::Variant(Box::new(v)))
    }

    /// Append an already-constructed [`Value`] of any type, for callers
    /// (such as a method handler's return values) that build values
    /// generically rather than through the typed `append_*` calls above.
    pub fn append_value(&mut self, v: Value) -> Result<()> {
        self.push(v)
    }

    pub fn open_array(&mut self) {
        self.stack.push(Frame::Array {
            elem_signature: Signature::empty(),
            items: Vec::new(),
        });
    }

    pub fn close_array(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(Frame::Array { elem_signature, items }) => {
                self.push(Value::Array(elem_signature, items))
            }
            other => {
                self.restore(other);
                Err(Error::Marshal("close_array without a matching open_array".into()))
            }
        }
    }

    pub fn open_struct(&mut self) {
        self.stack.push(Frame::Struct { fields: Vec::new() });
    }

    pub fn close_struct(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(Frame::Struct { fields }) => {
                if fields.is_empty() {
                    return Err(Error::Marshal("struct must have at least one field".into()));
                }
                self.push(Value::Struct(fields))
            }
            other => {
                self.restore(other);
                Err(Error::Marshal("close_struct without a matching open_struct".into()))
            }
        }
    }

    pub fn open_dict_entry(&mut self) {
        self.stack.push(Frame::DictEntry { parts: Vec::new() });
    }

    pub fn close_dict_entry(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(Frame::DictEntry { mut parts }) => {
                if parts.len() != 2 {
                    return Err(Error::Marshal("dict entry takes exactly one key and one value".into()));
                }
                let value = parts.pop().unwrap();
                let key = parts.pop().unwrap();
                self.push(Value::DictEntry(Box::new(key), Box::new(value)))
            }
            other => {
                self.restore(other);
                Err(Error::Marshal("close_dict_entry without a matching open_dict_entry".into()))
            }
        }
    }

    fn restore(&mut self, frame: Option<Frame>) {
        if let Some(frame) = frame {
            self.stack.push(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_flat_values_and_tracks_signature() {
        let mut body = Vec::new();
        let mut sig = Signature::empty();
        {
            let mut a = MessageAppendIterator::new(&mut body, &mut sig);
            a.append_int32(3).unwrap();
            a.append_int32(4).unwrap();
        }
        assert_eq!(sig.as_str(), "ii");
        assert_eq!(body, vec![Value::from(3i32), Value::from(4i32)]);
    }

    #[test]
    fn builds_array_of_struct() {
        let mut body = Vec::new();
        let mut sig = Signature::empty();
        {
            let mut a = MessageAppendIterator::new(&mut body, &mut sig);
            a.open_array();
            a.open_struct();
            a.append_int32(1).unwrap();
            a.append_uint64(2).unwrap();
            a.close_struct().unwrap();
            a.close_array().unwrap();
        }
        assert_eq!(sig.as_str(), "a(it)");
    }

    #[test]
    fn rejects_mismatched_array_elements() {
        let mut body = Vec::new();
        let mut sig = Signature::empty();
        let mut a = MessageAppendIterator::new(&mut body, &mut sig);
        a.open_array();
        a.append_int32(1).unwrap();
        assert!(a.append_string("oops").is_err());
    }

    #[test]
    fn rejects_close_array_without_open() {
        let mut body = Vec::new();
        let mut sig = Signature::empty();
        let mut a = MessageAppendIterator::new(&mut body, &mut sig);
        assert!(a.close_array().is_err());
    }

    #[test]
    fn builds_dict_entry_inside_array() {
        let mut body = Vec::new();
        let mut sig = Signature::empty();
        {
            let mut a = MessageAppendIterator::new(&mut body, &mut sig);
            a.open_array();
            a.open_dict_entry();
            a.append_string("k").unwrap();
            a.append_variant(Variant::from(1u32)).unwrap();
            a.close_dict_entry().unwrap();
            a.close_array().unwrap();
        }
        assert_eq!(sig.as_str(), "a{sv}");
    }
}
