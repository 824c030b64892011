//! The client-facing entry point: resolves and authenticates a socket to
//! the bus, owns the serialized write path, and hands off the read side
//! to a [`Dispatcher`] (`spec.md` §4.5).
//!
//! No teacher analog exists for this module either — grounded directly on
//! `spec.md` §4.5/§5's state machine and concurrency model, using the same
//! `std::sync` primitives `plul-dbus-stream`'s connection/dispatch code
//! reaches for (adapted here from its async original onto `std::thread`).

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::address::{self, BusKind, Endpoint};
use crate::auth;
use crate::dispatcher::{Affinity, Dispatcher, Invocation, SignalHandler, SignalMatch};
use crate::error::{Error, Result};
use crate::marshal::Endianness;
use crate::message::{Message, MessageFlags, MessageType};
use crate::names::{BusName, UniqueName};
use crate::object::Object;
use crate::path::ObjectPath;
use crate::pending_call::PendingCall;
use crate::socket::{Socket, UnixSocket};
use crate::value::Value;

lazy_static! {
    static ref DBUS_BUS_NAME: BusName = "org.freedesktop.DBus".parse().unwrap();
    static ref DBUS_PATH: ObjectPath = ObjectPath::new("/org/freedesktop/DBus").unwrap();
    static ref DBUS_INTERFACE: crate::names::InterfaceName =
        "org.freedesktop.DBus".parse().unwrap();
}

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);

/// A connection's lifecycle, per `spec.md` §4.5. Transitions out of
/// `Ready` happen on EOF, a write error, or an explicit `close()`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Initializing,
    Authenticating,
    Ready,
    Closing,
    Closed,
}

bitflags! {
    /// Flags accepted by `RequestName`, from the `org.freedesktop.DBus`
    /// interface.
    pub struct RequestNameFlags: u32 {
        const ALLOW_REPLACEMENT = 0x1;
        const REPLACE_EXISTING = 0x2;
        const DO_NOT_QUEUE = 0x4;
    }
}

/// The outcome of a `RequestName` call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestNameReply {
    PrimaryOwner,
    InQueue,
    Exists,
    AlreadyOwner,
}

impl RequestNameReply {
    fn from_code(code: u32) -> Result<RequestNameReply> {
        match code {
            1 => Ok(RequestNameReply::PrimaryOwner),
            2 => Ok(RequestNameReply::InQueue),
            3 => Ok(RequestNameReply::Exists),
            4 => Ok(RequestNameReply::AlreadyOwner),
            other => Err(Error::Protocol(format!(
                "unknown RequestName reply code {}",
                other
            ))),
        }
    }
}

/// The serialized write side shared by [`Connection`] (explicit sends)
/// and [`Dispatcher`] (replies sent from handler invocations), so neither
/// needs a back-reference to the other — avoiding the Connection ↔
/// Dispatcher ownership cycle `spec.md` §9 flags.
pub(crate) struct Writer {
    socket: Mutex<Box<dyn Socket>>,
    endian: Endianness,
    next_serial: AtomicU32,
}

impl Writer {
    pub(crate) fn new(socket: Box<dyn Socket>, endian: Endianness) -> Writer {
        Writer {
            socket: Mutex::new(socket),
            endian,
            next_serial: AtomicU32::new(1),
        }
    }

    /// Allocate the next outbound serial, skipping 0 on wraparound
    /// (`spec.md` §8 property 6).
    pub(crate) fn allocate_serial(&self) -> u32 {
        loop {
            let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
            if serial != 0 {
                return serial;
            }
        }
    }

    /// Serialize and write `message` under the already-allocated `serial`.
    /// The socket mutex guarantees no two messages interleave on the wire.
    pub(crate) fn write_with_serial(&self, message: &mut Message, serial: u32) -> Result<()> {
        let bytes = message.serialize(self.endian, serial)?;
        #[cfg(unix)]
        {
            let fds = message.fds().to_vec();
            self.socket.lock().unwrap().send(&bytes, &fds)
        }
        #[cfg(not(unix))]
        {
            self.socket.lock().unwrap().send(&bytes, &[])
        }
    }

    /// Allocate a serial and write in one step — for dispatcher-originated
    /// replies and signals, which need no pending-call bookkeeping.
    pub(crate) fn send(&self, message: &mut Message) -> Result<()> {
        let serial = self.allocate_serial();
        self.write_with_serial(message, serial)
    }

    pub(crate) fn shutdown_socket(&self) -> Result<()> {
        self.socket.lock().unwrap().shutdown()
    }
}

/// A live connection to a session or system bus.
pub struct Connection {
    writer: Arc<Writer>,
    dispatcher: Dispatcher,
    state: Mutex<State>,
    unique_name: Mutex<Option<UniqueName>>,
    names: Mutex<HashSet<BusName>>,
}

impl Connection {
    /// Resolve `bus`'s address, connect, authenticate, start the
    /// dispatcher's reader thread, and complete the `Hello` handshake.
    /// Returns only once the connection is `Ready` with an assigned
    /// unique name.
    pub fn open(bus: BusKind) -> Result<Connection> {
        let Endpoint::Unix { path, abstract_ } = address::resolve(bus)?;

        let mut socket = UnixSocket::connect(&path, abstract_)?;
        auth::external_handshake(&mut socket)?;

        let reader_socket = socket.try_clone()?;
        let writer = Arc::new(Writer::new(Box::new(socket), Endianness::native()));
        let dispatcher = Dispatcher::spawn(Box::new(reader_socket), Arc::clone(&writer))?;

        let connection = Connection {
            writer,
            dispatcher,
            state: Mutex::new(State::Ready),
            unique_name: Mutex::new(None),
            names: Mutex::new(HashSet::new()),
        };

        match connection.hello() {
            Ok(unique_name) => {
                *connection.unique_name.lock().unwrap() = Some(unique_name);
                Ok(connection)
            }
            Err(err) => {
                connection.dispatcher.shutdown();
                Err(err)
            }
        }
    }

    fn hello(&self) -> Result<UniqueName> {
        let call = Message::method_call(
            DBUS_BUS_NAME.clone(),
            DBUS_PATH.clone(),
            Some(DBUS_INTERFACE.clone()),
            "Hello".parse().expect("`Hello` is a valid member name"),
        );
        let reply = self.call(call, DEFAULT_CALL_TIMEOUT)?;
        let name = match reply.body().get(0) {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(Error::Protocol("Hello reply missing unique name".into())),
        };
        name.parse()
            .map_err(|e| Error::InvalidName(format!("{}", e)))
    }

    /// Request ownership of `name` on the bus.
    pub fn request_name(&self, name: BusName, flags: RequestNameFlags) -> Result<RequestNameReply> {
        let mut call = Message::method_call(
            DBUS_BUS_NAME.clone(),
            DBUS_PATH.clone(),
            Some(DBUS_INTERFACE.clone()),
            "RequestName".parse().expect("`RequestName` is a valid member name"),
        );
        call.append().append_string(name.to_string())?;
        call.append().append_uint32(flags.bits())?;

        let reply = self.call(call, DEFAULT_CALL_TIMEOUT)?;
        let code = match reply.body().get(0) {
            Some(Value::Uint32(code)) => *code,
            _ => return Err(Error::Protocol("RequestName reply missing result code".into())),
        };
        let result = RequestNameReply::from_code(code)?;
        if matches!(
            result,
            RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner
        ) {
            self.names.lock().unwrap().insert(name);
        }
        Ok(result)
    }

    /// The well-known names this connection currently owns (as far as
    /// `request_name` calls have told it — the bus is the source of
    /// truth if ownership is later lost to `ReleaseName` or disconnect).
    pub fn owned_names(&self) -> Vec<BusName> {
        self.names.lock().unwrap().iter().cloned().collect()
    }

    /// Assign a serial and write `message`. For a `MethodCall` expecting a
    /// reply, registers the pending-call slot *before* writing so a race
    /// with an unusually fast reply can never find nowhere to land
    /// (`spec.md` §5's serial-before-write ordering). Returns `None` for
    /// anything that does not expect a reply.
    pub fn send(&self, mut message: Message) -> Result<Option<PendingCall>> {
        self.ensure_ready()?;

        let expects_reply = message.message_type() == MessageType::MethodCall
            && !message.flags().contains(MessageFlags::NO_REPLY_EXPECTED);

        let serial = self.writer.allocate_serial();
        let slot = if expects_reply {
            Some(self.dispatcher.register_pending(serial))
        } else {
            None
        };

        if let Err(err) = self.writer.write_with_serial(&mut message, serial) {
            if expects_reply {
                self.dispatcher.take_pending(serial);
            }
            return Err(err);
        }

        Ok(slot.map(|slot| PendingCall::new(serial, slot)))
    }

    /// `send` followed by blocking on the resulting `PendingCall`.
    pub fn call(&self, message: Message, timeout: Duration) -> Result<Message> {
        match self.send(message)? {
            Some(pending) => pending.wait(timeout),
            None => Err(Error::Protocol(
                "call() requires a message that expects a reply".into(),
            )),
        }
    }

    /// Bind `object` to its path, to be dispatched on `affinity`'s thread.
    pub fn register_object(&self, object: Object, affinity: Affinity<Invocation>) {
        self.dispatcher.register_object(object, affinity);
    }

    pub fn unregister_object(&self, path: &ObjectPath) -> Option<Object> {
        self.dispatcher.unregister_object(path)
    }

    /// Install a signal subscription and register interest with the bus
    /// via `AddMatch`.
    pub fn add_signal_handler(
        &self,
        filter: SignalMatch,
        handler: SignalHandler,
        affinity: Affinity<crate::dispatcher::SignalDelivery>,
    ) -> Result<()> {
        let mut call = Message::method_call(
            DBUS_BUS_NAME.clone(),
            DBUS_PATH.clone(),
            Some(DBUS_INTERFACE.clone()),
            "AddMatch".parse().expect("`AddMatch` is a valid member name"),
        );
        call.append().append_string(match_rule(&filter))?;
        self.call(call, DEFAULT_CALL_TIMEOUT)?;

        self.dispatcher.add_signal_handler(filter, handler, affinity);
        Ok(())
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    /// The unique name the bus assigned this connection, once `open` has
    /// returned successfully.
    pub fn unique_name(&self) -> Option<UniqueName> {
        self.unique_name.lock().unwrap().clone()
    }

    /// Shut down the socket, fail every pending call with a transport
    /// error, and join the reader thread. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state == State::Closed {
            return Ok(());
        }
        *state = State::Closing;
        drop(state);

        self.dispatcher.shutdown();
        *self.state.lock().unwrap() = State::Closed;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = *self.state.lock().unwrap();
        if state == State::Ready {
            Ok(())
        } else {
            Err(Error::NotReady(state))
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn match_rule(filter: &SignalMatch) -> String {
    let mut parts = vec!["type='signal'".to_string()];
    if let Some(path) = &filter.path {
        parts.push(format!("path='{}'", path));
    }
    if let Some(interface) = &filter.interface {
        parts.push(format!("interface='{}'", interface));
    }
    if let Some(member) = &filter.member {
        parts.push(format!("member='{}'", member));
    }
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_allocation_skips_zero_on_wraparound() {
        let (near, _far) = std::os::unix::net::UnixStream::pair().unwrap();
        let writer = Writer::new(Box::new(UnixSocket::from_stream(near)), Endianness::Little);
        writer.next_serial.store(u32::MAX, Ordering::SeqCst);
        let first = writer.allocate_serial();
        let second = writer.allocate_serial();
        assert_eq!(first, u32::MAX);
        assert_ne!(second, 0);
    }

    #[test]
    fn match_rule_includes_every_present_filter_field() {
        let filter = SignalMatch::new()
            .path(ObjectPath::new("/s").unwrap())
            .interface("org.ex".parse().unwrap())
            .member("Beep".parse().unwrap());
        let rule = match_rule(&filter);
        assert!(rule.contains("type='signal'"));
        assert!(rule.contains("path='/s'"));
        assert!(rule.contains("interface='org.ex'"));
        assert!(rule.contains("member='Beep'"));
    }

    #[test]
    fn request_name_reply_decodes_standard_codes() {
        assert_eq!(RequestNameReply::from_code(1).unwrap(), RequestNameReply::PrimaryOwner);
        assert_eq!(RequestNameReply::from_code(4).unwrap(), RequestNameReply::AlreadyOwner);
        assert!(RequestNameReply::from_code(9).is_err());
    }
}
