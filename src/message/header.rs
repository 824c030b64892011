//! Header fields: the `ARRAY of STRUCT(BYTE code, VARIANT value)` that
//! follows the 12-byte prologue, keyed by the field codes from
//! `spec.md` §3/§4.4.

use crate::error::{Error, Result};
use crate::marshal::{Marshaler, Unmarshaler};
use crate::names::{BusName, ErrorName, InterfaceName, MemberName, UniqueName};
use crate::path::ObjectPath;
use crate::signature::{DataType, Signature};
use crate::value::Value;

use super::MessageType;

/// The 1-byte field code each header field is tagged with on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderFieldCode {
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

impl HeaderFieldCode {
    fn from_u8(b: u8) -> Option<HeaderFieldCode> {
        use HeaderFieldCode::*;
        match b {
            1 => Some(Path),
            2 => Some(Interface),
            3 => Some(Member),
            4 => Some(ErrorName),
            5 => Some(ReplySerial),
            6 => Some(Destination),
            7 => Some(Sender),
            8 => Some(Signature),
            9 => Some(UnixFds),
            _ => None,
        }
    }
}

/// The header fields, keyed and typed as `spec.md` §3 describes them.
/// A field absent on the wire is `None` here; `signature` defaults to the
/// empty signature when there is no body.
#[derive(Clone, Debug, Default)]
pub struct Header {
    pub path: Option<ObjectPath>,
    pub interface: Option<InterfaceName>,
    pub member: Option<MemberName>,
    pub error_name: Option<ErrorName>,
    pub reply_serial: Option<u32>,
    pub destination: Option<BusName>,
    pub sender: Option<UniqueName>,
    pub signature: Signature,
    pub unix_fds: Option<u32>,
}

impl Header {
    /// Check the per-message-type required fields from `spec.md` §3.
    pub fn validate(&self, message_type: MessageType) -> Result<()> {
        match message_type {
            MessageType::MethodCall => {
                require(self.path.is_some(), "PATH")?;
                require(self.member.is_some(), "MEMBER")?;
            }
            MessageType::MethodReturn => {
                require(self.reply_serial.is_some(), "REPLY_SERIAL")?;
            }
            MessageType::Error => {
                require(self.error_name.is_some(), "ERROR_NAME")?;
                require(self.reply_serial.is_some(), "REPLY_SERIAL")?;
            }
            MessageType::Signal => {
                require(self.path.is_some(), "PATH")?;
                require(self.interface.is_some(), "INTERFACE")?;
                require(self.member.is_some(), "MEMBER")?;
            }
        }
        Ok(())
    }

    pub fn marshal(&self, m: &mut Marshaler) -> Result<()> {
        m.write_array(8, |m| {
            if let Some(path) = &self.path {
                write_field(m, HeaderFieldCode::Path, Value::ObjectPath(path.clone()))?;
            }
            if let Some(interface) = &self.interface {
                write_field(
                    m,
                    HeaderFieldCode::Interface,
                    Value::String(interface.to_string()),
                )?;
            }
            if let Some(member) = &self.member {
                write_field(m, HeaderFieldCode::Member, Value::String(member.to_string()))?;
            }
            if let Some(error_name) = &self.error_name {
                write_field(
                    m,
                    HeaderFieldCode::ErrorName,
                    Value::String(error_name.to_string()),
                )?;
            }
            if let Some(reply_serial) = self.reply_serial {
                write_field(m, HeaderFieldCode::ReplySerial, Value::Uint32(reply_serial))?;
            }
            if let Some(destination) = &self.destination {
                write_field(
                    m,
                    HeaderFieldCode::Destination,
                    Value::String(destination.to_string()),
                )?;
            }
            if let Some(sender) = &self.sender {
                write_field(m, HeaderFieldCode::Sender, Value::String(sender.to_string()))?;
            }
            if !self.signature.is_empty() {
                write_field(
                    m,
                    HeaderFieldCode::Signature,
                    Value::Signature(self.signature.clone()),
                )?;
            }
            if let Some(unix_fds) = self.unix_fds {
                write_field(m, HeaderFieldCode::UnixFds, Value::Uint32(unix_fds))?;
            }
            Ok(())
        })
    }

    pub fn unmarshal(u: &mut Unmarshaler<'_>) -> Result<Header> {
        let body_end = u.read_array_header(8)?;
        let mut header = Header::default();

        while u.offset() < body_end {
            u.read_struct_align()?;
            let code = u.read_u8()?;
            let sig = u.read_signature()?;
            let sig_it = sig.begin();
            if sig_it.type_() == DataType::Invalid {
                return Err(Error::Protocol("empty header field signature".into()));
            }
            u.align(sig_it.type_().alignment())?;
            let value = Value::unmarshal(&sig_it, u)?;

            match HeaderFieldCode::from_u8(code) {
                Some(HeaderFieldCode::Path) => {
                    header.path = Some(expect_object_path(value)?);
                }
                Some(HeaderFieldCode::Interface) => {
                    header.interface = Some(parse_name(expect_string(value)?)?);
                }
                Some(HeaderFieldCode::Member) => {
                    header.member = Some(parse_name(expect_string(value)?)?);
                }
                Some(HeaderFieldCode::ErrorName) => {
                    header.error_name = Some(parse_name(expect_string(value)?)?);
                }
                Some(HeaderFieldCode::ReplySerial) => {
                    header.reply_serial = Some(expect_u32(value)?);
                }
                Some(HeaderFieldCode::Destination) => {
                    header.destination = Some(parse_name(expect_string(value)?)?);
                }
                Some(HeaderFieldCode::Sender) => {
                    header.sender = Some(parse_name(expect_string(value)?)?);
                }
                Some(HeaderFieldCode::Signature) => {
                    header.signature = expect_signature(value)?;
                }
                Some(HeaderFieldCode::UnixFds) => {
                    header.unix_fds = Some(expect_u32(value)?);
                }
                // Unknown header fields are ignored per the D-Bus
                // specification's forward-compatibility rule.
                None => {}
            }
        }

        Ok(header)
    }
}

fn write_field(m: &mut Marshaler, code: HeaderFieldCode, value: Value) -> Result<()> {
    m.write_struct(|m| {
        m.write_u8(code as u8)?;
        m.write_variant_header(&value.signature())?;
        m.align(value.data_type().alignment());
        value.marshal(m)
    })
}

fn parse_name<T>(s: String) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    s.parse::<T>()
        .map_err(|e| Error::InvalidName(format!("{}", e)))
}

fn require(present: bool, field: &str) -> Result<()> {
    if present {
        Ok(())
    } else {
        Err(Error::Protocol(format!("missing required header field {}", field)))
    }
}

fn expect_object_path(v: Value) -> Result<ObjectPath> {
    match v {
        Value::ObjectPath(p) => Ok(p),
        _ => Err(Error::Protocol("expected OBJECT_PATH header field".into())),
    }
}

fn expect_string(v: Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s),
        _ => Err(Error::Protocol("expected STRING header field".into())),
    }
}

fn expect_u32(v: Value) -> Result<u32> {
    match v {
        Value::Uint32(n) => Ok(n),
        _ => Err(Error::Protocol("expected UINT32 header field".into())),
    }
}

fn expect_signature(v: Value) -> Result<Signature> {
    match v {
        Value::Signature(s) => Ok(s),
        _ => Err(Error::Protocol("expected SIGNATURE header field".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{Endianness, Marshaler, Unmarshaler};

    #[test]
    fn validate_requires_path_and_member_for_method_call() {
        let header = Header::default();
        assert!(header.validate(MessageType::MethodCall).is_err());

        let header = Header {
            path: Some(ObjectPath::new("/obj").unwrap()),
            member: Some("Do".parse().unwrap()),
            ..Header::default()
        };
        assert!(header.validate(MessageType::MethodCall).is_ok());
    }

    #[test]
    fn validate_requires_reply_serial_for_return_and_error() {
        let header = Header::default();
        assert!(header.validate(MessageType::MethodReturn).is_err());
        assert!(header.validate(MessageType::Error).is_err());

        let header = Header {
            reply_serial: Some(1),
            error_name: Some("org.example.Error.Oops".parse().unwrap()),
            ..Header::default()
        };
        assert!(header.validate(MessageType::Error).is_ok());
    }

    #[test]
    fn validate_requires_path_interface_member_for_signal() {
        let header = Header {
            path: Some(ObjectPath::new("/s").unwrap()),
            interface: Some("org.example.I".parse().unwrap()),
            member: Some("Changed".parse().unwrap()),
            ..Header::default()
        };
        assert!(header.validate(MessageType::Signal).is_ok());

        let missing_interface = Header {
            path: Some(ObjectPath::new("/s").unwrap()),
            member: Some("Changed".parse().unwrap()),
            ..Header::default()
        };
        assert!(missing_interface.validate(MessageType::Signal).is_err());
    }

    #[test]
    fn marshal_unmarshal_round_trip() {
        let header = Header {
            path: Some(ObjectPath::new("/obj").unwrap()),
            interface: Some("org.example.I".parse().unwrap()),
            member: Some("Add".parse().unwrap()),
            destination: Some("org.example.Svc".parse().unwrap()),
            sender: Some(":1.42".parse().unwrap()),
            signature: Signature::new("ii").unwrap(),
            ..Header::default()
        };

        let mut m = Marshaler::new(Endianness::Little);
        header.marshal(&mut m).unwrap();
        let bytes = m.into_bytes();

        let mut u = Unmarshaler::new(&bytes, Endianness::Little);
        let parsed = Header::unmarshal(&mut u).unwrap();

        assert_eq!(parsed.path, header.path);
        assert_eq!(parsed.interface, header.interface);
        assert_eq!(parsed.member, header.member);
        assert_eq!(parsed.destination, header.destination);
        assert_eq!(parsed.sender, header.sender);
        assert_eq!(parsed.signature, header.signature);
    }

    #[test]
    fn unknown_header_field_codes_are_ignored() {
        let mut m = Marshaler::new(Endianness::Little);
        m.write_array(8, |m| {
            m.write_struct(|m| {
                m.write_u8(42)?;
                m.write_variant_header(&Signature::new("y").unwrap())?;
                m.write_u8(1)
            })
        })
        .unwrap();
        let bytes = m.into_bytes();

        let mut u = Unmarshaler::new(&bytes, Endianness::Little);
        let header = Header::unmarshal(&mut u).unwrap();
        assert!(header.path.is_none());
    }
}
