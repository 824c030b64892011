//! The D-Bus type signature grammar and its iteration model.
//!
//! A [`Signature`] is an immutable string over the type-code alphabet;
//! [`SignatureIterator`] walks one level of it at a time, the same way a
//! cursor walks a parse tree without building one.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Struct/dict nesting (parentheses and curly braces) must not exceed this.
pub const MAX_CONTAINER_DEPTH: u32 = 32;
/// Overall type nesting (arrays included) must not exceed this.
pub const MAX_TYPE_DEPTH: u32 = 64;
/// A signature's marshaled length (the `SIGNATURE` type's own encoding) must
/// not exceed this many bytes.
pub const MAX_SIGNATURE_LENGTH: usize = 255;

/// The closed set of D-Bus wire types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Byte,
    Boolean,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    ObjectPath,
    Signature,
    UnixFd,
    Array,
    Struct,
    DictEntry,
    Variant,
    Invalid,
}

lazy_static! {
    /// Natural alignment, in bytes, of every non-`Invalid` type.
    static ref ALIGNMENT: HashMap<DataType, usize> = {
        use DataType::*;
        let mut m = HashMap::new();
        m.insert(Byte, 1);
        m.insert(Boolean, 4);
        m.insert(Int16, 2);
        m.insert(Uint16, 2);
        m.insert(Int32, 4);
        m.insert(Uint32, 4);
        m.insert(Int64, 8);
        m.insert(Uint64, 8);
        m.insert(Double, 8);
        m.insert(String, 4);
        m.insert(ObjectPath, 4);
        m.insert(Signature, 1);
        m.insert(UnixFd, 4);
        m.insert(Array, 4);
        m.insert(Struct, 8);
        m.insert(DictEntry, 8);
        m.insert(Variant, 1);
        m
    };
}

impl DataType {
    /// The natural alignment of this type, in bytes. `Invalid` has no
    /// alignment and is reported as `1` (the safest no-op padding).
    #[inline]
    pub fn alignment(self) -> usize {
        ALIGNMENT.get(&self).copied().unwrap_or(1)
    }

    /// Whether this type is a basic (non-container) type, i.e. eligible
    /// as a `DICT_ENTRY` key.
    #[inline]
    pub fn is_basic(self) -> bool {
        use DataType::*;
        matches!(
            self,
            Byte | Boolean
                | Int16
                | Uint16
                | Int32
                | Uint32
                | Int64
                | Uint64
                | Double
                | String
                | ObjectPath
                | Signature
                | UnixFd
        )
    }

    /// Whether this type is one of `ARRAY`, `STRUCT`, `DICT_ENTRY` or
    /// `VARIANT`.
    #[inline]
    pub fn is_container(self) -> bool {
        use DataType::*;
        matches!(self, Array | Struct | DictEntry | Variant)
    }

    fn from_code(b: u8) -> DataType {
        use DataType::*;
        match b {
            b'y' => Byte,
            b'b' => Boolean,
            b'n' => Int16,
            b'q' => Uint16,
            b'i' => Int32,
            b'u' => Uint32,
            b'x' => Int64,
            b't' => Uint64,
            b'd' => Double,
            b's' => String,
            b'o' => ObjectPath,
            b'g' => Signature,
            b'h' => UnixFd,
            b'a' => Array,
            b'(' => Struct,
            b'{' => DictEntry,
            b'v' => Variant,
            _ => Invalid,
        }
    }
}

/// An immutable, validated D-Bus type signature string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Parse and validate a signature string.
    pub fn new(s: impl Into<String>) -> Result<Signature> {
        let s = s.into();
        let sig = Signature(s);
        if !sig.is_valid() {
            return Err(Error::Signature(format!("invalid signature `{}`", sig.0)));
        }
        Ok(sig)
    }

    /// Build a signature without validating it. Only meant for signatures
    /// the caller has already established are well-formed (e.g. the
    /// literal `""`, or echoing one parsed from a peer we must still be
    /// able to represent even if malformed, for diagnostics).
    pub fn from_str_unchecked(s: impl Into<String>) -> Signature {
        Signature(s.into())
    }

    /// The empty signature, valid for a body with no arguments.
    pub fn empty() -> Signature {
        Signature(String::new())
    }

    /// Append a complete type code (or codes) to this signature. Used by
    /// [`crate::message::MessageAppendIterator`] to grow the SIGNATURE
    /// header field in step with the body it is building.
    pub(crate) fn push_str(&mut self, s: &str) {
        self.0.push_str(s);
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A cursor positioned at the start of this signature.
    pub fn begin(&self) -> SignatureIterator<'_> {
        SignatureIterator {
            bytes: self.0.as_bytes(),
            pos: 0,
            end: self.0.len(),
        }
    }

    /// Whether this signature satisfies every grammar invariant in
    /// `spec.md` §4.1.
    pub fn is_valid(&self) -> bool {
        if self.0.len() > MAX_SIGNATURE_LENGTH {
            return false;
        }
        let bytes = self.0.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            match validate_one(bytes, pos, 0, 0, false) {
                Ok(next) => pos = next,
                Err(_) => return false,
            }
        }
        true
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Signature> {
        Signature::new(s)
    }
}

/// Computes the end (one-past) of the single-complete-type starting at
/// `pos`, enforcing the structural invariants of `spec.md` §3: balanced
/// brackets, `a` followed by exactly one type, `{KV}` only as an array
/// element with a basic-typed key, and the depth bounds.
fn validate_one(
    bytes: &[u8],
    pos: usize,
    total_depth: u32,
    struct_depth: u32,
    as_array_element: bool,
) -> std::result::Result<usize, ()> {
    if total_depth > MAX_TYPE_DEPTH || struct_depth > MAX_CONTAINER_DEPTH {
        return Err(());
    }
    if pos >= bytes.len() {
        return Err(());
    }

    match bytes[pos] {
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
        | b'h' | b'v' => Ok(pos + 1),
        b'a' => validate_one(bytes, pos + 1, total_depth + 1, struct_depth, true),
        b'(' => {
            let mut i = pos + 1;
            let mut count = 0u32;
            while i < bytes.len() && bytes[i] != b')' {
                i = validate_one(bytes, i, total_depth + 1, struct_depth + 1, false)?;
                count += 1;
            }
            if count == 0 || i >= bytes.len() {
                return Err(());
            }
            Ok(i + 1)
        }
        b'{' => {
            if !as_array_element {
                return Err(());
            }
            let mut i = pos + 1;
            // key: exactly one basic type
            if i >= bytes.len() || DataType::from_code(bytes[i]) == DataType::Invalid {
                return Err(());
            }
            if !DataType::from_code(bytes[i]).is_basic() {
                return Err(());
            }
            i = validate_one(bytes, i, total_depth + 1, struct_depth + 1, false)?;
            // value: exactly one single complete type
            if i >= bytes.len() || bytes[i] == b'}' {
                return Err(());
            }
            i = validate_one(bytes, i, total_depth + 1, struct_depth + 1, false)?;
            if i >= bytes.len() || bytes[i] != b'}' {
                return Err(());
            }
            Ok(i + 1)
        }
        _ => Err(()),
    }
}

/// A cursor over one level of a [`Signature`]. Lazy and cheaply copyable;
/// restartable via [`Signature::begin`].
#[derive(Clone, Copy, Debug)]
pub struct SignatureIterator<'s> {
    bytes: &'s [u8],
    pos: usize,
    end: usize,
}

impl<'s> SignatureIterator<'s> {
    /// The signature text of the single-complete-type range this cursor
    /// currently covers (its own range, not the value at the cursor).
    pub(crate) fn as_str(&self) -> &'s str {
        std::str::from_utf8(&self.bytes[self.pos..self.end]).unwrap_or("")
    }

    /// The type at the cursor, or `Invalid` once exhausted.
    pub fn type_(&self) -> DataType {
        if self.pos >= self.end {
            return DataType::Invalid;
        }
        DataType::from_code(self.bytes[self.pos])
    }

    /// Advance past the single-complete-type at the cursor. A no-op once
    /// the iterator is already exhausted.
    pub fn next(&mut self) {
        if self.pos >= self.end {
            return;
        }
        // The iterator only ever walks already-validated signatures (or
        // a sub-range thereof), so a structural failure here can only
        // mean the cursor reached the end of its range; treat it as
        // exhaustion rather than panicking.
        match span(self.bytes, self.pos) {
            Ok(next) if next <= self.end => self.pos = next,
            _ => self.pos = self.end,
        }
    }

    /// `true` if the cursor is at an `ARRAY`.
    pub fn is_array(&self) -> bool {
        self.type_() == DataType::Array
    }

    /// `true` if the cursor is at an `ARRAY` whose element type is
    /// `DICT_ENTRY`.
    pub fn is_dict(&self) -> bool {
        if !self.is_array() {
            return false;
        }
        self.bytes
            .get(self.pos + 1)
            .map(|&b| DataType::from_code(b) == DataType::DictEntry)
            .unwrap_or(false)
    }

    /// `true` if the cursor is at a container type (`ARRAY`, `STRUCT`,
    /// `DICT_ENTRY` or `VARIANT`).
    pub fn is_container(&self) -> bool {
        self.type_().is_container()
    }

    /// An iterator over the children of the container at the cursor.
    /// Returns an immediately-exhausted iterator for non-containers.
    pub fn recurse(&self) -> SignatureIterator<'s> {
        match self.type_() {
            DataType::Array => {
                let child_start = self.pos + 1;
                let child_end = span(self.bytes, child_start).unwrap_or(child_start);
                SignatureIterator {
                    bytes: self.bytes,
                    pos: child_start,
                    end: child_end.min(self.end),
                }
            }
            DataType::Struct | DataType::DictEntry => {
                let close = span(self.bytes, self.pos).unwrap_or(self.pos + 1);
                SignatureIterator {
                    bytes: self.bytes,
                    pos: self.pos + 1,
                    end: (close.saturating_sub(1)).min(self.end),
                }
            }
            _ => SignatureIterator {
                bytes: self.bytes,
                pos: self.end,
                end: self.end,
            },
        }
    }
}

/// Span computation used by iteration (assumes a well-formed signature;
/// see [`validate_one`] for the validating counterpart).
fn span(bytes: &[u8], pos: usize) -> std::result::Result<usize, ()> {
    if pos >= bytes.len() {
        return Err(());
    }
    match bytes[pos] {
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
        | b'h' | b'v' => Ok(pos + 1),
        b'a' => span(bytes, pos + 1),
        b'(' | b'{' => {
            let close = if bytes[pos] == b'(' { b')' } else { b'}' };
            let mut depth = 1i32;
            let mut i = pos + 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'(' | b'{' => depth += 1,
                    b')' | b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            if bytes[i] != close {
                                return Err(());
                            }
                            return Ok(i + 1);
                        }
                    }
                    _ => {}
                }
                i += 1;
            }
            Err(())
        }
        _ => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_type() {
        let sig = Signature::new("i").unwrap();
        let mut it = sig.begin();
        assert_eq!(it.type_(), DataType::Int32);
        it.next();
        assert_eq!(it.type_(), DataType::Invalid);
    }

    #[test]
    fn iterate_array_of_int() {
        let sig = Signature::new("ai").unwrap();
        let it = sig.begin();
        assert_eq!(it.type_(), DataType::Array);
        assert!(it.is_array());
        assert!(it.is_container());
        assert!(!it.is_dict());

        let sub = it.recurse();
        assert_eq!(sub.type_(), DataType::Int32);
    }

    #[test]
    fn iterate_nested_array() {
        let sig = Signature::new("aai").unwrap();
        let it = sig.begin();
        let sub = it.recurse();
        assert_eq!(sub.type_(), DataType::Array);
        let sub2 = sub.recurse();
        assert_eq!(sub2.type_(), DataType::Int32);
    }

    #[test]
    fn iterate_multiple_types() {
        let sig = Signature::new("idyb").unwrap();
        let mut it = sig.begin();
        assert_eq!(it.type_(), DataType::Int32);
        it.next();
        assert_eq!(it.type_(), DataType::Double);
        it.next();
        assert_eq!(it.type_(), DataType::Byte);
        it.next();
        assert_eq!(it.type_(), DataType::Boolean);
    }

    #[test]
    fn iterate_dict() {
        // S2 from spec.md §8
        let sig = Signature::new("a{sv}").unwrap();
        let it = sig.begin();
        assert_eq!(it.type_(), DataType::Array);
        assert!(it.is_dict());

        let entry = it.recurse();
        assert_eq!(entry.type_(), DataType::DictEntry);

        let mut kv = entry.recurse();
        assert_eq!(kv.type_(), DataType::String);
        kv.next();
        assert_eq!(kv.type_(), DataType::Variant);
        kv.next();
        assert_eq!(kv.type_(), DataType::Invalid);
    }

    #[test]
    fn rejects_invalid_signatures() {
        assert!(!Signature::from_str_unchecked("(").is_valid());
        assert!(!Signature::from_str_unchecked("(b").is_valid());
        assert!(!Signature::from_str_unchecked("{bs}").is_valid());
        assert!(!Signature::from_str_unchecked("a").is_valid());
        assert!(!Signature::from_str_unchecked("{sv}").is_valid());
        assert!(Signature::from_str_unchecked("a{sv}").is_valid());

        let too_long = "y".repeat(MAX_SIGNATURE_LENGTH + 1);
        assert!(!Signature::from_str_unchecked(too_long).is_valid());
    }

    #[test]
    fn rejects_excess_depth() {
        let deep_struct: String = "(".repeat(33) + &")".repeat(33);
        assert!(!Signature::from_str_unchecked(deep_struct).is_valid());

        let deep_array: String = "a".repeat(65) + "i";
        assert!(!Signature::from_str_unchecked(deep_array).is_valid());
    }

    #[test]
    fn alignment_table() {
        assert_eq!(DataType::Byte.alignment(), 1);
        assert_eq!(DataType::Int64.alignment(), 8);
        assert_eq!(DataType::Array.alignment(), 4);
        assert_eq!(DataType::Struct.alignment(), 8);
        assert_eq!(DataType::Variant.alignment(), 1);
    }
}
