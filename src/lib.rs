//! A pure Rust implementation of the D-Bus wire protocol and client
//! runtime: type signatures, binary marshaling, the `Variant` value,
//! messages, and a connection/dispatcher pair that multiplexes method
//! calls, replies, signals, and inbound object dispatch over one socket.
//!
//! Authentication, the transport socket, and event-loop integration are
//! kept minimal on purpose (see `auth` and `socket`); this crate's job is
//! the wire and type layer and the dispatcher that sits on top of it.

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate lazy_static;

#[cfg(test)]
#[macro_use]
extern crate quickcheck;

pub mod address;
pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod marshal;
pub mod message;
pub mod names;
pub mod object;
pub mod path;
pub mod pending_call;
pub mod signature;
pub mod socket;
pub mod type_code;
pub mod value;
pub mod variant;

pub use address::{BusKind, Endpoint};
pub use connection::{Connection, RequestNameFlags, RequestNameReply, State};
pub use dispatcher::{Affinity, Invocation, SignalDelivery, SignalHandler, SignalMatch};
pub use error::{Error, Result};
pub use message::{Message, MessageFlags, MessageType};
pub use names::{BusName, ErrorName, InterfaceName, MemberName, UniqueName};
pub use object::{Interface, Method, Object, Property, Signal};
pub use path::ObjectPath;
pub use pending_call::PendingCall;
pub use signature::{DataType, Signature};
pub use type_code::{BasicTypeSignature, TypeSignature};
pub use value::Value;
pub use variant::Variant;
