//! The wire unit everything else in the crate moves: one of MethodCall,
//! MethodReturn, Error or Signal, each a 12-byte prologue, a header field
//! array, and a typed body. See `spec.md` §3/§4.4 for the exact layout.

mod append;
mod header;
mod iter;

pub use append::MessageAppendIterator;
pub use header::Header;
pub use iter::MessageIterator;

use crate::error::{Error, Result};
use crate::marshal::{Endianness, Marshaler, Unmarshaler};
use crate::names::{BusName, ErrorName, InterfaceName, MemberName};
use crate::path::ObjectPath;
use crate::signature::Signature;
use crate::value::Value;

/// The maximum size of a complete message (header + padding + body), per
/// the D-Bus specification: 2^27 bytes (128 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1 << 27;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

impl MessageType {
    fn from_u8(b: u8) -> Result<MessageType> {
        match b {
            1 => Ok(MessageType::MethodCall),
            2 => Ok(MessageType::MethodReturn),
            3 => Ok(MessageType::Error),
            4 => Ok(MessageType::Signal),
            other => Err(Error::Protocol(format!("unknown message type {}", other))),
        }
    }
}

bitflags! {
    pub struct MessageFlags: u8 {
        const NO_REPLY_EXPECTED = 0x1;
        const NO_AUTO_START = 0x2;
        const ALLOW_INTERACTIVE_AUTHORIZATION = 0x4;
    }
}

/// A complete D-Bus message: header metadata plus an ordered body of
/// [`Value`]s whose concatenated signatures equal the SIGNATURE header
/// field.
/// Closes any file descriptors the message still owns when it is dropped.
/// A caller that wants to keep them must extract them first with
/// [`Message::take_fds`]; everything left behind at drop time is closed
/// here rather than leaked.
#[derive(Clone, Debug)]
pub struct Message {
    message_type: MessageType,
    flags: MessageFlags,
    protocol_version: u8,
    serial: u32,
    header: Header,
    body: Vec<Value>,
    #[cfg(unix)]
    fds: Vec<std::os::unix::io::RawFd>,
}

impl Message {
    fn new(message_type: MessageType, header: Header) -> Message {
        Message {
            message_type,
            flags: MessageFlags::empty(),
            protocol_version: 1,
            serial: 0,
            header,
            body: Vec::new(),
            #[cfg(unix)]
            fds: Vec::new(),
        }
    }

    pub fn method_call(
        destination: BusName,
        path: ObjectPath,
        interface: Option<InterfaceName>,
        member: MemberName,
    ) -> Message {
        Message::new(
            MessageType::MethodCall,
            Header {
                path: Some(path),
                interface,
                member: Some(member),
                destination: Some(destination),
                ..Header::default()
            },
        )
    }

    pub fn method_return(call: &Message) -> Message {
        Message::new(
            MessageType::MethodReturn,
            Header {
                reply_serial: Some(call.serial),
                destination: call.header.sender.as_ref().and_then(|s| s.to_string().parse::<BusName>().ok()),
                ..Header::default()
            },
        )
    }

    pub fn error(call: &Message, name: ErrorName, text: impl Into<String>) -> Message {
        let mut msg = Message::new(
            MessageType::Error,
            Header {
                error_name: Some(name),
                reply_serial: Some(call.serial),
                destination: call.header.sender.as_ref().and_then(|s| s.to_string().parse::<BusName>().ok()),
                ..Header::default()
            },
        );
        msg.body = vec![Value::String(text.into())];
        msg.header.signature = Signature::from_str_unchecked("s");
        msg
    }

    pub fn signal(path: ObjectPath, interface: InterfaceName, member: MemberName) -> Message {
        Message::new(
            MessageType::Signal,
            Header {
                path: Some(path),
                interface: Some(interface),
                member: Some(member),
                ..Header::default()
            },
        )
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: MessageFlags) {
        self.flags = flags;
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn body(&self) -> &[Value] {
        &self.body
    }

    /// A cursor over the body for typed, structural extraction.
    pub fn iter(&self) -> MessageIterator<'_> {
        MessageIterator::new(&self.body)
    }

    /// A builder for appending values to the body, tracking the emerging
    /// SIGNATURE header field as it goes.
    pub fn append(&mut self) -> MessageAppendIterator<'_> {
        MessageAppendIterator::new(&mut self.body, &mut self.header.signature)
    }

    #[cfg(unix)]
    pub fn fds(&self) -> &[std::os::unix::io::RawFd] {
        &self.fds
    }

    #[cfg(unix)]
    pub fn take_fds(&mut self) -> Vec<std::os::unix::io::RawFd> {
        std::mem::take(&mut self.fds)
    }

    #[cfg(unix)]
    pub(crate) fn set_fds(&mut self, fds: Vec<std::os::unix::io::RawFd>) {
        self.fds = fds;
    }

    /// Serialize the full wire frame (prologue + header + body), assigning
    /// `serial` as the outbound serial number. Validates the per-type
    /// required header fields first (`spec.md` §3).
    pub fn serialize(&mut self, endian: Endianness, serial: u32) -> Result<Vec<u8>> {
        #[cfg(unix)]
        {
            self.header.unix_fds = if self.fds.is_empty() {
                None
            } else {
                Some(self.fds.len() as u32)
            };
        }
        self.header.validate(self.message_type)?;
        self.serial = serial;

        let mut body_m = Marshaler::new(endian);
        for value in &self.body {
            value.marshal(&mut body_m)?;
        }
        let body_bytes = body_m.into_bytes();

        let mut m = Marshaler::new(endian);
        m.write_u8(endian.tag())?;
        m.write_u8(self.message_type as u8)?;
        m.write_u8(self.flags.bits())?;
        m.write_u8(self.protocol_version)?;
        m.write_u32(body_bytes.len() as u32)?;
        m.write_u32(serial)?;
        self.header.marshal(&mut m)?;
        m.align(8);

        let mut bytes = m.into_bytes();
        bytes.extend_from_slice(&body_bytes);

        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::Protocol(format!(
                "message size {} exceeds maximum {}",
                bytes.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(bytes)
    }

    /// Parse a complete wire frame. `fds` are the out-of-band file
    /// descriptors that arrived alongside `bytes`, taken over by the
    /// returned `Message`.
    #[cfg_attr(not(unix), allow(unused_variables))]
    pub fn parse(bytes: &[u8], fds: Vec<std::os::unix::io::RawFd>) -> Result<Message> {
        if bytes.len() < 12 {
            return Err(Error::Protocol("frame shorter than the 12-byte prologue".into()));
        }
        let endian = Endianness::from_tag(bytes[0])
            .ok_or_else(|| Error::Protocol(format!("invalid endianness tag {:#x}", bytes[0])))?;
        let message_type = MessageType::from_u8(bytes[1])?;
        let flags = MessageFlags::from_bits_truncate(bytes[2]);
        let protocol_version = bytes[3];
        if protocol_version != 1 {
            return Err(Error::Protocol(format!(
                "unsupported protocol version {}",
                protocol_version
            )));
        }

        let mut u = Unmarshaler::with_offset(bytes, endian, 4);
        let body_len = u.read_u32()? as usize;
        let serial = u.read_u32()?;

        let header = Header::unmarshal(&mut u)?;
        u.align(8)?;

        let body_start = u.offset();
        if bytes.len() < body_start + body_len {
            return Err(Error::Protocol("frame shorter than declared body length".into()));
        }

        let mut body = Vec::new();
        if !header.signature.is_empty() {
            let mut body_u = Unmarshaler::new(&bytes[body_start..body_start + body_len], endian);
            let mut sig_it = header.signature.begin();
            while sig_it.type_() != crate::signature::DataType::Invalid {
                body.push(Value::unmarshal(&sig_it, &mut body_u)?);
                sig_it.next();
            }
        }

        let mut msg = Message {
            message_type,
            flags,
            protocol_version,
            serial,
            header,
            body,
            #[cfg(unix)]
            fds: Vec::new(),
        };
        msg.header.validate(msg.message_type)?;
        #[cfg(unix)]
        msg.set_fds(fds);
        #[cfg(not(unix))]
        let _ = fds;
        Ok(msg)
    }
}

#[cfg(unix)]
impl Drop for Message {
    /// File descriptors are owned by the `Message` until extracted with
    /// [`Message::take_fds`]; anything still here when the message is
    /// dropped is closed rather than leaked.
    fn drop(&mut self) {
        for fd in self.fds.drain(..) {
            let _ = nix::unistd::close(fd);
        }
    }
}
