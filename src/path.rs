//! Object paths, named for a single file (`path.h`) in the dbus-cxx
//! library this crate's data model follows; `ObjectPath` is still just a
//! validated `String` newtype, as in `type_system.rs`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A name used to refer to an object instance, e.g. `/org/example/Foo`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(s: impl Into<String>) -> Result<ObjectPath> {
        let s = s.into();
        if !is_valid_object_path(&s) {
            return Err(Error::Marshal(format!("invalid object path `{}`", s)));
        }
        Ok(ObjectPath(s))
    }

    /// Build an `ObjectPath` without validating it; for echoing a path
    /// read back off the wire from an already-trusted source, or
    /// constants known to be valid.
    pub fn from_str_unchecked(s: impl Into<String>) -> ObjectPath {
        ObjectPath(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ObjectPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<ObjectPath> {
        ObjectPath::new(s)
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for ObjectPath {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// `/` or `(/[A-Za-z0-9_]+)+`, per `spec.md` §4.2.
fn is_valid_object_path(s: &str) -> bool {
    if s == "/" {
        return true;
    }
    if !s.starts_with('/') {
        return false;
    }
    for element in s[1..].split('/') {
        if element.is_empty() {
            return false;
        }
        if !element
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return false;
        }
    }
    true
}
