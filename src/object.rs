//! Server-side endpoint registration: an object path owns a set of
//! interfaces, each with methods, signals, and properties (`spec.md` §3,
//! §4.7). The introspection XML the library hands back for
//! `org.freedesktop.DBus.Introspectable.Introspect` is generated here from
//! whatever metadata was registered.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::names::{InterfaceName, MemberName};
use crate::path::ObjectPath;
use crate::signature::DataType;
use crate::signature::Signature;
use crate::value::Value;

/// A server-side method implementation: given the inbound call, produce
/// the output argument list, or a `(error name, message)` pair to surface
/// to the caller as a D-Bus `Error` reply.
pub type MethodHandler =
    Arc<dyn Fn(&Message) -> std::result::Result<Vec<Value>, (crate::names::ErrorName, String)> + Send + Sync>;

/// One callable member of an interface.
#[derive(Clone)]
pub struct Method {
    pub name: MemberName,
    pub input_signature: Signature,
    pub output_signature: Signature,
    pub(crate) handler: MethodHandler,
}

impl Method {
    pub fn new(
        name: MemberName,
        input_signature: Signature,
        output_signature: Signature,
        handler: MethodHandler,
    ) -> Method {
        Method {
            name,
            input_signature,
            output_signature,
            handler,
        }
    }
}

/// A signal an interface may emit. Carried here purely as introspection
/// metadata — the signal itself is an ordinary [`Message::signal`] sent
/// through [`crate::Connection::send`], not something this type emits.
#[derive(Clone)]
pub struct Signal {
    pub name: MemberName,
    pub signature: Signature,
}

impl Signal {
    pub fn new(name: MemberName, signature: Signature) -> Signal {
        Signal { name, signature }
    }
}

/// A property exposed through `org.freedesktop.DBus.Properties`
/// introspection metadata. Get/Set dispatch itself is left to the
/// interface owner, outside this crate's wire/type/dispatch core.
#[derive(Clone)]
pub struct Property {
    pub name: String,
    pub signature: Signature,
    pub readable: bool,
    pub writable: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, signature: Signature, readable: bool, writable: bool) -> Property {
        Property {
            name: name.into(),
            signature,
            readable,
            writable,
        }
    }
}

/// One interface's worth of methods, signals, and properties.
pub struct Interface {
    name: InterfaceName,
    methods: HashMap<MemberName, Method>,
    signals: Vec<Signal>,
    properties: Vec<Property>,
}

impl Interface {
    pub fn new(name: InterfaceName) -> Interface {
        Interface {
            name,
            methods: HashMap::new(),
            signals: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn name(&self) -> &InterfaceName {
        &self.name
    }

    pub fn with_method(mut self, method: Method) -> Interface {
        self.methods.insert(method.name.clone(), method);
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Interface {
        self.signals.push(signal);
        self
    }

    pub fn with_property(mut self, property: Property) -> Interface {
        self.properties.push(property);
        self
    }

    fn method(&self, member: &MemberName) -> Option<&Method> {
        self.methods.get(member)
    }
}

/// A registered server-side endpoint at one object path. `spec.md` §3:
/// at most one `Object` per (connection, path); within it, (interface,
/// member) pairs are unique.
pub struct Object {
    path: ObjectPath,
    interfaces: HashMap<InterfaceName, Interface>,
}

impl Object {
    pub fn new(path: ObjectPath) -> Object {
        Object {
            path,
            interfaces: HashMap::new(),
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Add an interface to this object. Errors if an interface of the same
    /// name is already registered here.
    pub fn add_interface(&mut self, interface: Interface) -> Result<()> {
        if self.interfaces.contains_key(&interface.name) {
            return Err(Error::Marshal(format!(
                "interface `{}` is already registered on `{}`",
                interface.name, self.path
            )));
        }
        self.interfaces.insert(interface.name.clone(), interface);
        Ok(())
    }

    /// Resolve a method by (interface, member). When `interface` is absent
    /// (legal for an inbound `MethodCall` — `spec.md` §3 only requires PATH
    /// and MEMBER), the first registered interface with a matching member
    /// wins, mirroring how a real bus daemon routes interface-less calls.
    pub(crate) fn find_method(
        &self,
        interface: Option<&InterfaceName>,
        member: &MemberName,
    ) -> Option<&Method> {
        match interface {
            Some(interface) => self.interfaces.get(interface).and_then(|i| i.method(member)),
            None => self.interfaces.values().find_map(|i| i.method(member)),
        }
    }

    /// Render the `org.freedesktop.DBus.Introspectable.Introspect` XML
    /// document from this object's registered metadata.
    pub fn introspect_xml(&self) -> String {
        let mut out = String::new();
        out.push_str(
            "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n\
             \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n",
        );
        let _ = writeln!(out, "<node name=\"{}\">", self.path);

        for interface in self.interfaces.values() {
            let _ = writeln!(out, "  <interface name=\"{}\">", interface.name);

            for method in interface.methods.values() {
                let _ = writeln!(out, "    <method name=\"{}\">", method.name);
                write_args(&mut out, &method.input_signature, "in");
                write_args(&mut out, &method.output_signature, "out");
                out.push_str("    </method>\n");
            }

            for signal in &interface.signals {
                let _ = writeln!(out, "    <signal name=\"{}\">", signal.name);
                write_args(&mut out, &signal.signature, "");
                out.push_str("    </signal>\n");
            }

            for property in &interface.properties {
                let access = match (property.readable, property.writable) {
                    (true, true) => "readwrite",
                    (true, false) => "read",
                    (false, true) => "write",
                    (false, false) => continue,
                };
                let _ = writeln!(
                    out,
                    "    <property name=\"{}\" type=\"{}\" access=\"{}\"/>",
                    property.name, property.signature, access
                );
            }

            out.push_str("  </interface>\n");
        }

        out.push_str("</node>\n");
        out
    }
}

/// Write one `<arg>` tag per single-complete-type in `signature` (not per
/// byte — `ai` is one argument of type `ai`, not two).
fn write_args(out: &mut String, signature: &Signature, direction: &str) {
    let mut it = signature.begin();
    while it.type_() != DataType::Invalid {
        if direction.is_empty() {
            let _ = writeln!(out, "      <arg type=\"{}\"/>", it.as_str());
        } else {
            let _ = writeln!(out, "      <arg type=\"{}\" direction=\"{}\"/>", it.as_str(), direction);
        }
        it.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> MethodHandler {
        Arc::new(|_msg| Ok(vec![Value::from(1i32)]))
    }

    #[test]
    fn rejects_duplicate_interface() {
        let mut object = Object::new(ObjectPath::new("/obj").unwrap());
        let iface = || Interface::new("org.example.I".parse().unwrap());
        object.add_interface(iface()).unwrap();
        assert!(object.add_interface(iface()).is_err());
    }

    #[test]
    fn looks_up_registered_method() {
        let mut object = Object::new(ObjectPath::new("/obj").unwrap());
        let method = Method::new(
            "Add".parse().unwrap(),
            Signature::new("ii").unwrap(),
            Signature::new("i").unwrap(),
            handler(),
        );
        let iface = Interface::new("org.example.I".parse().unwrap()).with_method(method);
        object.add_interface(iface).unwrap();

        let found = object.find_method(Some(&"org.example.I".parse().unwrap()), &"Add".parse().unwrap());
        assert!(found.is_some());
        assert_eq!(found.unwrap().input_signature.as_str(), "ii");
    }

    #[test]
    fn introspect_xml_lists_method_args() {
        let mut object = Object::new(ObjectPath::new("/obj").unwrap());
        let method = Method::new(
            "Add".parse().unwrap(),
            Signature::new("ii").unwrap(),
            Signature::new("i").unwrap(),
            handler(),
        );
        let iface = Interface::new("org.example.I".parse().unwrap()).with_method(method);
        object.add_interface(iface).unwrap();

        let xml = object.introspect_xml();
        assert!(xml.contains("<method name=\"Add\">"));
        assert_eq!(xml.matches("direction=\"in\"").count(), 2);
        assert_eq!(xml.matches("direction=\"out\"").count(), 1);
    }
}
