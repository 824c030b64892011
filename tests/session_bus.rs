//! Exercises a real connection against whatever session bus is reachable
//! in the environment. Ignored by default — CI and most dev machines
//! don't have a bus running — but left runnable with `cargo test --
//! --ignored` on a desktop session.

use std::time::Duration;

use dbus_native::{BusKind, Connection};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
#[ignore]
fn opens_a_session_connection_and_gets_a_unique_name() {
    init();
    let connection = Connection::open(BusKind::Session).expect("failed to open session bus");
    let name = connection.unique_name().expect("Hello should assign a unique name");
    assert!(name.starts_with(':'));
}

#[test]
#[ignore]
fn pings_the_bus_itself() {
    init();
    let connection = Connection::open(BusKind::Session).expect("failed to open session bus");

    let mut call = dbus_native::Message::method_call(
        "org.freedesktop.DBus".parse().unwrap(),
        dbus_native::ObjectPath::new("/org/freedesktop/DBus").unwrap(),
        Some("org.freedesktop.DBus.Peer".parse().unwrap()),
        "Ping".parse().unwrap(),
    );
    call.set_flags(dbus_native::MessageFlags::empty());
    let reply = connection
        .call(call, Duration::from_secs(5))
        .expect("Ping should succeed");
    assert_eq!(reply.message_type(), dbus_native::MessageType::MethodReturn);
}
