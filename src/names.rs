//! Validated string newtypes for the various D-Bus name kinds.
//!
//! There is a maximum name length of 255 which applies to bus names,
//! interfaces, members and error names; each kind has its own further
//! character/structure restrictions (see the D-Bus specification, "Valid
//! Names").

use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// There is a maximum name length of 255 which applies to bus names,
/// interfaces, and members.
pub const MAX_NAME_LENGTH: usize = 255;

macro_rules! impl_display_deref {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::ops::Deref for $ty {
            type Target = str;

            #[inline]
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $ty {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// The interface to invoke a method call on, or that a signal is emitted
/// from. Composed of one or more elements separated by a period (`.`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceName(String);

impl_display_deref!(InterfaceName);

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InterfaceNameError {
    #[error("interface name exceeds {} bytes", MAX_NAME_LENGTH)]
    ExceedsMaxSize,
    #[error("interface name elements must contain at least one character")]
    ElementsMustContainChars,
    #[error("invalid character '{0}' in interface name")]
    InvalidCharacter(char),
    #[error("interface name must contain at least one '.'")]
    MustContainPeriod,
    #[error("interface name must not begin with '.'")]
    MustNotBeginWithPeriod,
    #[error("interface name elements must not begin with a digit")]
    ElementMustNotBeginWithDigit,
}

fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl FromStr for InterfaceName {
    type Err = InterfaceNameError;

    fn from_str(s: &str) -> Result<InterfaceName, InterfaceNameError> {
        if s.len() > MAX_NAME_LENGTH {
            return Err(InterfaceNameError::ExceedsMaxSize);
        }
        if s.starts_with('.') {
            return Err(InterfaceNameError::MustNotBeginWithPeriod);
        }

        let mut last_period_position = 0;
        let mut saw_period = false;
        for (i, c) in s.char_indices() {
            if c == '.' {
                if i > 0 && last_period_position + 1 == i {
                    return Err(InterfaceNameError::ElementsMustContainChars);
                }
                last_period_position = i;
                saw_period = true;
            } else if !is_valid_name_char(c) {
                return Err(InterfaceNameError::InvalidCharacter(c));
            } else if (i == 0 || s.as_bytes()[i - 1] == b'.') && c.is_ascii_digit() {
                return Err(InterfaceNameError::ElementMustNotBeginWithDigit);
            }
        }

        if !saw_period {
            return Err(InterfaceNameError::MustContainPeriod);
        }

        Ok(InterfaceName(s.to_string()))
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = InterfaceNameError;

    fn try_from(s: &str) -> Result<InterfaceName, InterfaceNameError> {
        InterfaceName::from_str(s)
    }
}

/// A connection's well-known bus name, e.g. `org.freedesktop.DBus`.
/// Shares the element/period grammar of [`InterfaceName`], but may
/// additionally begin with `:` to denote a unique connection name (see
/// [`UniqueName`] for that form specifically).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BusName(String);

impl_display_deref!(BusName);

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BusNameError {
    #[error("bus name exceeds {} bytes", MAX_NAME_LENGTH)]
    ExceedsMaxSize,
    #[error("bus name elements must contain at least one character")]
    ElementsMustContainChars,
    #[error("invalid character '{0}' in bus name")]
    InvalidCharacter(char),
    #[error("bus name must contain at least one '.'")]
    MustContainPeriod,
    #[error("bus name must not begin with '.'")]
    MustNotBeginWithPeriod,
}

impl FromStr for BusName {
    type Err = BusNameError;

    fn from_str(s: &str) -> Result<BusName, BusNameError> {
        if s.starts_with(':') {
            // Unique connection names are bus names too, but elements may
            // begin with a digit and the leading ':' is itself not part
            // of an element.
            return UniqueName::from_str(s)
                .map(|u| BusName(u.0))
                .map_err(|_| BusNameError::InvalidCharacter(':'));
        }

        if s.len() > MAX_NAME_LENGTH {
            return Err(BusNameError::ExceedsMaxSize);
        }
        if s.starts_with('.') {
            return Err(BusNameError::MustNotBeginWithPeriod);
        }

        let mut last_period_position = 0;
        let mut saw_period = false;
        for (i, c) in s.char_indices() {
            if !is_valid_name_char(c) && c != '.' {
                return Err(BusNameError::InvalidCharacter(c));
            }
            if c == '.' {
                if i > 0 && last_period_position + 1 == i {
                    return Err(BusNameError::ElementsMustContainChars);
                }
                last_period_position = i;
                saw_period = true;
            }
        }

        if !saw_period {
            return Err(BusNameError::MustContainPeriod);
        }

        Ok(BusName(s.to_string()))
    }
}

impl TryFrom<&str> for BusName {
    type Error = BusNameError;

    fn try_from(s: &str) -> Result<BusName, BusNameError> {
        BusName::from_str(s)
    }
}

/// The unique name the bus daemon assigns a connection for its lifetime,
/// e.g. `:1.42`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UniqueName(String);

impl_display_deref!(UniqueName);

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UniqueNameError {
    #[error("unique name exceeds {} bytes", MAX_NAME_LENGTH)]
    ExceedsMaxSize,
    #[error("unique name must begin with ':'")]
    MustBeginWithColon,
    #[error("invalid character '{0}' in unique name")]
    InvalidCharacter(char),
}

impl FromStr for UniqueName {
    type Err = UniqueNameError;

    fn from_str(s: &str) -> Result<UniqueName, UniqueNameError> {
        if s.len() > MAX_NAME_LENGTH {
            return Err(UniqueNameError::ExceedsMaxSize);
        }
        if !s.starts_with(':') {
            return Err(UniqueNameError::MustBeginWithColon);
        }
        for c in s[1..].chars() {
            if !is_valid_name_char(c) && c != '.' {
                return Err(UniqueNameError::InvalidCharacter(c));
            }
        }
        Ok(UniqueName(s.to_string()))
    }
}

impl TryFrom<&str> for UniqueName {
    type Error = UniqueNameError;

    fn try_from(s: &str) -> Result<UniqueName, UniqueNameError> {
        UniqueName::from_str(s)
    }
}

/// The method or signal name part of a message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberName(String);

impl_display_deref!(MemberName);

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MemberNameError {
    #[error("member name exceeds {} bytes", MAX_NAME_LENGTH)]
    ExceedsMaxSize,
    #[error("member name must be at least one byte")]
    MustBeAtLeastOneByte,
    #[error("invalid character '{0}' in member name")]
    InvalidCharacter(char),
    #[error("member name must not contain '.'")]
    MustNotContainPeriod,
    #[error("member name must not begin with a digit")]
    MustNotBeginWithDigit,
}

impl FromStr for MemberName {
    type Err = MemberNameError;

    fn from_str(s: &str) -> Result<MemberName, MemberNameError> {
        if s.is_empty() {
            return Err(MemberNameError::MustBeAtLeastOneByte);
        }
        if s.len() > MAX_NAME_LENGTH {
            return Err(MemberNameError::ExceedsMaxSize);
        }
        if s.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(MemberNameError::MustNotBeginWithDigit);
        }

        for c in s.chars() {
            if c == '.' {
                return Err(MemberNameError::MustNotContainPeriod);
            }
            if !c.is_ascii_alphanumeric() && c != '_' {
                return Err(MemberNameError::InvalidCharacter(c));
            }
        }

        Ok(MemberName(s.to_string()))
    }
}

impl TryFrom<&str> for MemberName {
    type Error = MemberNameError;

    fn try_from(s: &str) -> Result<MemberName, MemberNameError> {
        MemberName::from_str(s)
    }
}

/// Error names share the interface name grammar.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ErrorName(String);

impl_display_deref!(ErrorName);

pub type ErrorNameError = InterfaceNameError;

impl FromStr for ErrorName {
    type Err = ErrorNameError;

    fn from_str(s: &str) -> Result<ErrorName, ErrorNameError> {
        InterfaceName::from_str(s).map(|iface| ErrorName(iface.0))
    }
}

impl TryFrom<&str> for ErrorName {
    type Error = ErrorNameError;

    fn try_from(s: &str) -> Result<ErrorName, ErrorNameError> {
        ErrorName::from_str(s)
    }
}

impl From<InterfaceName> for ErrorName {
    fn from(iface: InterfaceName) -> ErrorName {
        ErrorName(iface.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_name() {
        let large_string = String::from_utf8(vec![b'X'; 256]).unwrap();
        assert_eq!(
            Err(InterfaceNameError::ExceedsMaxSize),
            InterfaceName::from_str(large_string.as_str())
        );
        assert_eq!(
            Err(InterfaceNameError::ElementsMustContainChars),
            InterfaceName::from_str("Elements..MissingChars")
        );
        assert_eq!(
            Err(InterfaceNameError::MustContainPeriod),
            InterfaceName::from_str("MissingPeriod")
        );
        assert_eq!(
            Err(InterfaceNameError::MustNotBeginWithPeriod),
            InterfaceName::from_str(".Must.Not.Start.With.Period")
        );
        assert_eq!(
            Err(InterfaceNameError::ElementMustNotBeginWithDigit),
            InterfaceName::from_str("Must.Not.Start.With.9Digit")
        );
        assert_eq!(
            Err(InterfaceNameError::InvalidCharacter('|')),
            InterfaceName::from_str("Invalid.C|har")
        );

        let valid_string = "org.example.Interface";
        assert_eq!(
            Ok(InterfaceName(valid_string.to_string())),
            InterfaceName::from_str(valid_string)
        );
    }

    #[test]
    fn bus_name_unique() {
        assert!(BusName::from_str(":1.84").is_ok());
        assert_eq!(BusName::from_str(":1.84").unwrap().to_string(), ":1.84");
    }

    #[test]
    fn member_name() {
        assert_eq!(
            Err(MemberNameError::MustNotContainPeriod),
            MemberName::from_str("Contains.Period")
        );
        assert_eq!(
            Err(MemberNameError::MustNotBeginWithDigit),
            MemberName::from_str("1MustNotBeginWithDigit")
        );
        assert_eq!(
            Ok(MemberName("ValidMemberName".to_string())),
            MemberName::from_str("ValidMemberName")
        );
    }

    #[test]
    fn error_name() {
        let valid_string = "org.example.Error.Failed";
        assert_eq!(
            Ok(ErrorName(valid_string.to_string())),
            ErrorName::from_str(valid_string)
        );
    }
}
