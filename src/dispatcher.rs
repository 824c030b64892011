//! The reader thread that owns a connection's read side: frames messages
//! off the socket and routes each one to a matching `PendingCall`, a
//! signal subscription, or a registered `Object`'s method handler
//! (`spec.md` §4.6).
//!
//! No teacher analog exists for this module — `marcelbuesing-dbus-native`
//! never got past marshaling. The std-library-thread shape (one reader
//! thread, `Mutex`-guarded tables, `mpsc` channels for owner-thread
//! affinity) follows `plul-dbus-stream`'s connection/dispatch code, the
//! one example in the pack that solves the same one-reader-many-waiters
//! problem, adapted from its async/`smol` original onto `std::thread`.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::connection::Writer;
use crate::error::{Error, Result};
use crate::message::{Header, Message, MessageFlags, MessageType};
use crate::names::{ErrorName, InterfaceName, MemberName};
use crate::object::{MethodHandler, Object};
use crate::path::ObjectPath;
use crate::pending_call::Slot;
use crate::socket::Socket;
use crate::value::Value;

lazy_static! {
    static ref UNKNOWN_OBJECT: ErrorName =
        "org.freedesktop.DBus.Error.UnknownObject".parse().unwrap();
    static ref UNKNOWN_METHOD: ErrorName =
        "org.freedesktop.DBus.Error.UnknownMethod".parse().unwrap();
    static ref INVALID_ARGS: ErrorName = "org.freedesktop.DBus.Error.InvalidArgs".parse().unwrap();
    static ref FAILED: ErrorName = "org.freedesktop.DBus.Error.Failed".parse().unwrap();
}

const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
const INTROSPECT_MEMBER: &str = "Introspect";

/// Which thread executes an inbound invocation of type `T` (a method call
/// or a signal delivery): inline on the dispatcher's own reader thread, or
/// handed off to a channel some other thread drains at its own pace.
pub enum Affinity<T> {
    /// The reader thread runs the handler itself. The handler must not
    /// block on another call over the same connection — there is no other
    /// thread left to read its reply.
    Dispatcher,
    /// Enqueued for a thread the registrant chose to `recv()` and run.
    Owner(mpsc::Sender<T>),
}

impl<T> Clone for Affinity<T> {
    fn clone(&self) -> Affinity<T> {
        match self {
            Affinity::Dispatcher => Affinity::Dispatcher,
            Affinity::Owner(sender) => Affinity::Owner(sender.clone()),
        }
    }
}

/// A routed, ready-to-run method call: the object lookup, member
/// resolution, and input-signature check already happened on the reader
/// thread, so whoever calls [`Invocation::run`] just executes the
/// handler and sends its reply.
pub struct Invocation {
    message: Message,
    handler: MethodHandler,
    writer: Arc<Writer>,
}

impl Invocation {
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Run the handler and send its `MethodReturn`/`Error` reply, unless
    /// the call carried `NO_REPLY_EXPECTED`.
    pub fn run(self) {
        let outcome = (self.handler)(&self.message);
        if self.message.flags().contains(MessageFlags::NO_REPLY_EXPECTED) {
            return;
        }
        let mut reply = match outcome {
            Ok(values) => match append_values(Message::method_return(&self.message), values) {
                Ok(reply) => reply,
                Err(err) => Message::error(&self.message, FAILED.clone(), err.to_string()),
            },
            Err((name, text)) => Message::error(&self.message, name, text),
        };
        if let Err(err) = self.writer.send(&mut reply) {
            log::warn!("failed to send method reply: {}", err);
        }
    }
}

fn append_values(mut reply: Message, values: Vec<Value>) -> Result<Message> {
    {
        let mut appender = reply.append();
        for value in values {
            appender.append_value(value)?;
        }
    }
    Ok(reply)
}

/// A signal, already matched against a subscription's filter, ready to
/// hand to that subscriber's handler.
pub struct SignalDelivery {
    message: Message,
    handler: SignalHandler,
}

impl SignalDelivery {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn run(self) {
        (self.handler)(&self.message);
    }
}

/// A callback invoked with every signal that matches its subscription.
pub type SignalHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// A filter over a signal's PATH/INTERFACE/MEMBER header fields. A `None`
/// field matches anything.
#[derive(Clone, Debug, Default)]
pub struct SignalMatch {
    pub path: Option<ObjectPath>,
    pub interface: Option<InterfaceName>,
    pub member: Option<MemberName>,
}

impl SignalMatch {
    pub fn new() -> SignalMatch {
        SignalMatch::default()
    }

    pub fn path(mut self, path: ObjectPath) -> SignalMatch {
        self.path = Some(path);
        self
    }

    pub fn interface(mut self, interface: InterfaceName) -> SignalMatch {
        self.interface = Some(interface);
        self
    }

    pub fn member(mut self, member: MemberName) -> SignalMatch {
        self.member = Some(member);
        self
    }

    fn matches(&self, header: &Header) -> bool {
        if let Some(path) = &self.path {
            if header.path.as_ref() != Some(path) {
                return false;
            }
        }
        if let Some(interface) = &self.interface {
            if header.interface.as_ref() != Some(interface) {
                return false;
            }
        }
        if let Some(member) = &self.member {
            if header.member.as_ref() != Some(member) {
                return false;
            }
        }
        true
    }
}

struct Subscription {
    filter: SignalMatch,
    handler: SignalHandler,
    affinity: Affinity<SignalDelivery>,
}

type ObjectTable = Mutex<HashMap<ObjectPath, (Object, Affinity<Invocation>)>>;
type PendingTable = Mutex<HashMap<u32, Arc<Slot>>>;

/// The single reader thread of a [`crate::Connection`], plus the tables it
/// routes into: the pending-call table, the registered objects, and the
/// signal subscriptions.
pub struct Dispatcher {
    writer: Arc<Writer>,
    pending: Arc<PendingTable>,
    objects: Arc<ObjectTable>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start the reader thread over `reader_socket`, sharing `writer` with
    /// the [`crate::Connection`] that owns this dispatcher so replies sent
    /// from handler invocations go out the same serialized write path as
    /// explicit `send`s.
    pub(crate) fn spawn(reader_socket: Box<dyn Socket>, writer: Arc<Writer>) -> Result<Dispatcher> {
        let pending: Arc<PendingTable> = Arc::new(Mutex::new(HashMap::new()));
        let objects: Arc<ObjectTable> = Arc::new(Mutex::new(HashMap::new()));
        let subscriptions = Arc::new(Mutex::new(Vec::new()));

        let thread_writer = Arc::clone(&writer);
        let thread_pending = Arc::clone(&pending);
        let thread_objects = Arc::clone(&objects);
        let thread_subscriptions = Arc::clone(&subscriptions);

        let handle = thread::Builder::new()
            .name("dbus-dispatcher".to_string())
            .spawn(move || {
                read_loop(
                    reader_socket,
                    thread_writer,
                    thread_pending,
                    thread_objects,
                    thread_subscriptions,
                )
            })?;

        Ok(Dispatcher {
            writer,
            pending,
            objects,
            subscriptions,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Register a completion slot for `serial` before the message that
    /// carries it is written, so a reply racing the writer can never
    /// arrive before there is somewhere to put it (`spec.md` §5).
    pub(crate) fn register_pending(&self, serial: u32) -> Arc<Slot> {
        let slot = Slot::new();
        self.pending.lock().unwrap().insert(serial, Arc::clone(&slot));
        slot
    }

    /// Undo a `register_pending` whose write failed.
    pub(crate) fn take_pending(&self, serial: u32) {
        self.pending.lock().unwrap().remove(&serial);
    }

    pub fn register_object(&self, object: Object, affinity: Affinity<Invocation>) {
        let path = object.path().clone();
        self.objects.lock().unwrap().insert(path, (object, affinity));
    }

    pub fn unregister_object(&self, path: &ObjectPath) -> Option<Object> {
        self.objects.lock().unwrap().remove(path).map(|(object, _)| object)
    }

    pub fn add_signal_handler(
        &self,
        filter: SignalMatch,
        handler: SignalHandler,
        affinity: Affinity<SignalDelivery>,
    ) {
        self.subscriptions.lock().unwrap().push(Subscription {
            filter,
            handler,
            affinity,
        });
    }

    /// Shut down the underlying socket (unblocking the reader thread's
    /// `recv`), fail every still-pending call with a transport error, and
    /// join the reader thread. Idempotent.
    pub(crate) fn shutdown(&self) {
        let _ = self.writer.shutdown_socket();
        fail_all(&self.pending);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn fail_all(pending: &PendingTable) {
    let mut pending = pending.lock().unwrap();
    for (_, slot) in pending.drain() {
        slot.resolve(Err(Error::Transport(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection closed",
        ))));
    }
}

fn read_loop(
    mut socket: Box<dyn Socket>,
    writer: Arc<Writer>,
    pending: Arc<PendingTable>,
    objects: Arc<ObjectTable>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
) {
    loop {
        match read_one_message(socket.as_mut()) {
            Ok(message) => route(&writer, &pending, &objects, &subscriptions, message),
            Err(err) => {
                log::debug!("dispatcher reader thread stopping: {}", err);
                fail_all(&pending);
                break;
            }
        }
    }
}

fn route(
    writer: &Arc<Writer>,
    pending: &PendingTable,
    objects: &ObjectTable,
    subscriptions: &Mutex<Vec<Subscription>>,
    message: Message,
) {
    match message.message_type() {
        MessageType::MethodReturn | MessageType::Error => route_reply(pending, message),
        MessageType::Signal => route_signal(subscriptions, message),
        MessageType::MethodCall => route_call(writer, objects, message),
    }
}

fn route_reply(pending: &PendingTable, message: Message) {
    let serial = match message.header().reply_serial {
        Some(serial) => serial,
        None => {
            log::warn!("dropping reply with no REPLY_SERIAL header field");
            return;
        }
    };

    let slot = pending.lock().unwrap().remove(&serial);
    match slot {
        Some(slot) => {
            let outcome = if message.message_type() == MessageType::Error {
                Err(dispatch_error(&message))
            } else {
                Ok(message)
            };
            slot.resolve(outcome);
        }
        None => log::debug!("dropping reply for unmatched serial {}", serial),
    }
}

fn dispatch_error(message: &Message) -> Error {
    let name = message
        .header()
        .error_name
        .as_ref()
        .map(|n| n.to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    let text = message
        .body()
        .get(0)
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default();
    Error::Dispatch { name, message: text }
}

fn route_signal(subscriptions: &Mutex<Vec<Subscription>>, message: Message) {
    let subscriptions = subscriptions.lock().unwrap();
    for sub in subscriptions.iter() {
        if !sub.filter.matches(message.header()) {
            continue;
        }
        let delivery = SignalDelivery {
            message: message.clone(),
            handler: Arc::clone(&sub.handler),
        };
        match &sub.affinity {
            Affinity::Dispatcher => delivery.run(),
            Affinity::Owner(sender) => {
                if sender.send(delivery).is_err() {
                    log::warn!("signal subscriber's owner thread is gone; dropping delivery");
                }
            }
        }
    }
}

fn route_call(writer: &Arc<Writer>, objects: &ObjectTable, message: Message) {
    let path = match &message.header().path {
        Some(path) => path.clone(),
        None => return,
    };
    let member = match &message.header().member {
        Some(member) => member.clone(),
        None => return,
    };

    if is_introspect_call(message.header()) {
        let xml = objects
            .lock()
            .unwrap()
            .get(&path)
            .map(|(object, _)| object.introspect_xml());
        match xml {
            Some(xml) => send_introspect_reply(writer, &message, xml),
            None => reply_error(
                writer,
                &message,
                UNKNOWN_OBJECT.clone(),
                format!("No object registered at `{}`", path),
            ),
        }
        return;
    }

    let resolved = {
        let objects = objects.lock().unwrap();
        match objects.get(&path) {
            None => None,
            Some((object, affinity)) => {
                match object.find_method(message.header().interface.as_ref(), &member) {
                    None => Some(Err(UNKNOWN_METHOD.clone())),
                    Some(method) if method.input_signature != message.header().signature => {
                        Some(Err(INVALID_ARGS.clone()))
                    }
                    Some(method) => Some(Ok((Arc::clone(&method.handler), affinity.clone()))),
                }
            }
        }
    };

    match resolved {
        None => reply_error(
            writer,
            &message,
            UNKNOWN_OBJECT.clone(),
            format!("No object registered at `{}`", path),
        ),
        Some(Err(name)) => {
            reply_error(writer, &message, name, format!("No such method `{}`", member))
        }
        Some(Ok((handler, affinity))) => {
            let invocation = Invocation {
                message,
                handler,
                writer: Arc::clone(writer),
            };
            match affinity {
                Affinity::Dispatcher => invocation.run(),
                Affinity::Owner(sender) => {
                    if sender.send(invocation).is_err() {
                        log::warn!("object's owner thread is gone; dropping call");
                    }
                }
            }
        }
    }
}

fn is_introspect_call(header: &Header) -> bool {
    header.interface.as_ref().map(|i| i.as_ref() == INTROSPECTABLE_INTERFACE).unwrap_or(false)
        && header.member.as_ref().map(|m| m.as_ref() == INTROSPECT_MEMBER).unwrap_or(false)
}

fn send_introspect_reply(writer: &Arc<Writer>, call: &Message, xml: String) {
    if call.flags().contains(MessageFlags::NO_REPLY_EXPECTED) {
        return;
    }
    let mut reply = Message::method_return(call);
    if let Err(err) = reply.append().append_string(xml) {
        log::warn!("failed to append introspection body: {}", err);
        return;
    }
    if let Err(err) = writer.send(&mut reply) {
        log::warn!("failed to send introspection reply: {}", err);
    }
}

fn reply_error(writer: &Arc<Writer>, call: &Message, name: ErrorName, text: impl Into<String>) {
    if call.flags().contains(MessageFlags::NO_REPLY_EXPECTED) {
        return;
    }
    let mut reply = Message::error(call, name, text);
    if let Err(err) = writer.send(&mut reply) {
        log::warn!("failed to send error reply: {}", err);
    }
}

/// Read one complete framed message off `socket`: the 16-byte fixed
/// prologue (12 bytes plus the header field array's length), the header
/// field array itself, padding to an 8-byte boundary, and finally the
/// body.
fn read_one_message(socket: &mut dyn Socket) -> Result<Message> {
    let (mut bytes, mut fds) = read_exact(socket, 16)?;
    let endian = crate::marshal::Endianness::from_tag(bytes[0])
        .ok_or_else(|| Error::Protocol(format!("invalid endianness tag {:#x}", bytes[0])))?;

    let mut u = crate::marshal::Unmarshaler::with_offset(&bytes, endian, 4);
    let body_len = u.read_u32()? as usize;
    let _serial = u.read_u32()?;
    let header_fields_len = u.read_u32()? as usize;

    let unpadded_len = 16 + header_fields_len;
    let padding = crate::marshal::padding_for(unpadded_len, 8);
    let grand_total = unpadded_len + padding + body_len;
    if grand_total > crate::message::MAX_MESSAGE_SIZE {
        return Err(Error::Protocol(format!(
            "frame size {} exceeds maximum {}",
            grand_total,
            crate::message::MAX_MESSAGE_SIZE
        )));
    }

    let (header_bytes, more_fds) = read_exact(socket, header_fields_len)?;
    bytes.extend_from_slice(&header_bytes);
    fds.extend(more_fds);

    if padding > 0 {
        let (pad_bytes, more_fds) = read_exact(socket, padding)?;
        bytes.extend_from_slice(&pad_bytes);
        fds.extend(more_fds);
    }

    let (body_bytes, more_fds) = read_exact(socket, body_len)?;
    bytes.extend_from_slice(&body_bytes);
    fds.extend(more_fds);

    Message::parse(&bytes, fds)
}

fn read_exact(socket: &mut dyn Socket, n: usize) -> Result<(Vec<u8>, Vec<RawFd>)> {
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    let mut fds = Vec::new();
    while filled < n {
        let (read, got_fds) = socket.recv(&mut buf[filled..])?;
        if read == 0 {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }
        fds.extend(got_fds);
        filled += read;
    }
    Ok((buf, fds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::BusName;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use crate::socket::UnixSocket;

    fn socket_pair() -> (UnixSocket, UnixSocket) {
        let (a, b) = UnixStream::pair().unwrap();
        (UnixSocket::from_stream(a), UnixSocket::from_stream(b))
    }

    fn spawn_dispatcher() -> (Dispatcher, UnixSocket) {
        let (near, far) = socket_pair();
        let reader = near.try_clone().unwrap();
        let writer = Arc::new(Writer::new(Box::new(near), crate::marshal::Endianness::Little));
        let dispatcher = Dispatcher::spawn(Box::new(reader), writer).unwrap();
        (dispatcher, far)
    }

    #[test]
    fn unregistered_path_gets_unknown_object_error() {
        let (dispatcher, mut far) = spawn_dispatcher();

        let mut call = Message::method_call(
            "org.example.Svc".parse::<BusName>().unwrap(),
            ObjectPath::new("/obj").unwrap(),
            None,
            "DoThing".parse().unwrap(),
        );
        let bytes = call.serialize(crate::marshal::Endianness::Little, 1).unwrap();
        far.send(&bytes, &[]).unwrap();

        let reply = read_one_message(&mut far).unwrap();
        assert_eq!(reply.message_type(), MessageType::Error);
        assert_eq!(
            reply.header().error_name.as_ref().unwrap().as_ref(),
            "org.freedesktop.DBus.Error.UnknownObject"
        );
        assert_eq!(reply.header().reply_serial, Some(1));

        dispatcher.shutdown();
    }

    #[test]
    fn registered_method_runs_inline_and_replies() {
        let (dispatcher, mut far) = spawn_dispatcher();

        let called = Arc::new(AtomicBool::new(false));
        let called_handle = Arc::clone(&called);
        let handler: MethodHandler = Arc::new(move |_msg| {
            called_handle.store(true, Ordering::SeqCst);
            Ok(vec![Value::from(7i32)])
        });

        let mut object = Object::new(ObjectPath::new("/obj").unwrap());
        let method = crate::object::Method::new(
            "Get".parse().unwrap(),
            crate::signature::Signature::empty(),
            crate::signature::Signature::new("i").unwrap(),
            handler,
        );
        let iface =
            crate::object::Interface::new("org.example.I".parse().unwrap()).with_method(method);
        object.add_interface(iface).unwrap();
        dispatcher.register_object(object, Affinity::Dispatcher);

        let mut call = Message::method_call(
            "org.example.Svc".parse::<BusName>().unwrap(),
            ObjectPath::new("/obj").unwrap(),
            Some("org.example.I".parse().unwrap()),
            "Get".parse().unwrap(),
        );
        let bytes = call.serialize(crate::marshal::Endianness::Little, 9).unwrap();
        far.send(&bytes, &[]).unwrap();

        let reply = read_one_message(&mut far).unwrap();
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(reply.message_type(), MessageType::MethodReturn);
        assert_eq!(reply.header().reply_serial, Some(9));
        assert_eq!(reply.body(), &[Value::from(7i32)]);

        dispatcher.shutdown();
    }

    #[test]
    fn owner_affinity_enqueues_instead_of_running_inline() {
        let (dispatcher, mut far) = spawn_dispatcher();
        let (tx, rx) = mpsc::channel();

        let handler: MethodHandler = Arc::new(|_msg| Ok(vec![]));
        let mut object = Object::new(ObjectPath::new("/owned").unwrap());
        let method = crate::object::Method::new(
            "Ping".parse().unwrap(),
            crate::signature::Signature::empty(),
            crate::signature::Signature::empty(),
            handler,
        );
        let iface =
            crate::object::Interface::new("org.example.I".parse().unwrap()).with_method(method);
        object.add_interface(iface).unwrap();
        dispatcher.register_object(object, Affinity::Owner(tx));

        let mut call = Message::method_call(
            "org.example.Svc".parse::<BusName>().unwrap(),
            ObjectPath::new("/owned").unwrap(),
            Some("org.example.I".parse().unwrap()),
            "Ping".parse().unwrap(),
        );
        let bytes = call.serialize(crate::marshal::Endianness::Little, 3).unwrap();
        far.send(&bytes, &[]).unwrap();

        let invocation = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(invocation.message().serial(), 3);
        invocation.run();

        let reply = read_one_message(&mut far).unwrap();
        assert_eq!(reply.header().reply_serial, Some(3));

        dispatcher.shutdown();
    }

    #[test]
    fn signal_match_filters_by_member() {
        let filter = SignalMatch::new().member("Beep".parse().unwrap());
        let mut signal = Message::signal(
            ObjectPath::new("/s").unwrap(),
            "org.ex".parse().unwrap(),
            "Beep".parse().unwrap(),
        );
        signal.serialize(crate::marshal::Endianness::Little, 1).unwrap();
        assert!(filter.matches(signal.header()));

        let mut other = Message::signal(
            ObjectPath::new("/s").unwrap(),
            "org.ex".parse().unwrap(),
            "Boop".parse().unwrap(),
        );
        other.serialize(crate::marshal::Endianness::Little, 2).unwrap();
        assert!(!filter.matches(other.header()));
    }

    #[test]
    fn subscribed_signals_arrive_in_order_s5() {
        let (dispatcher, mut far) = spawn_dispatcher();

        let received = Arc::new(StdMutex::new(Vec::new()));
        let received_handle = Arc::clone(&received);
        let handler: SignalHandler = Arc::new(move |msg| {
            let n = msg.iter().as_int32().unwrap_or(-1);
            received_handle.lock().unwrap().push(n);
        });
        dispatcher.add_signal_handler(
            SignalMatch::new()
                .path(ObjectPath::new("/s").unwrap())
                .interface("org.ex".parse().unwrap())
                .member("Beep".parse().unwrap()),
            handler,
            Affinity::Dispatcher,
        );

        for (serial, n) in [(1u32, 1i32), (2, 2)] {
            let mut signal = Message::signal(
                ObjectPath::new("/s").unwrap(),
                "org.ex".parse().unwrap(),
                "Beep".parse().unwrap(),
            );
            signal.append().append_int32(n).unwrap();
            let bytes = signal.serialize(crate::marshal::Endianness::Little, serial).unwrap();
            far.send(&bytes, &[]).unwrap();
        }

        // Give the reader thread a moment to drain both signals.
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while received.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(*received.lock().unwrap(), vec![1, 2]);
        dispatcher.shutdown();
    }

    #[test]
    fn shutdown_unblocks_reader_thread() {
        let (dispatcher, _far) = spawn_dispatcher();
        let done = Arc::new(StdMutex::new(false));
        let done_handle = Arc::clone(&done);
        let handle = thread::spawn(move || {
            dispatcher.shutdown();
            *done_handle.lock().unwrap() = true;
        });
        handle.join().unwrap();
        assert!(*done.lock().unwrap());
    }
}
