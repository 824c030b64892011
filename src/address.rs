//! Bus address discovery and the `unix:`/`tcp:` address-string grammar.
//!
//! A D-Bus address is a semicolon-separated list of `transport:key=value,...`
//! entries; a client tries each in order until one connects. We only need
//! to *resolve* an address down to something [`crate::socket::UnixSocket`]
//! can dial, so parsing stops at the first recognized Unix-domain entry.

use std::env;

use crate::error::{Error, Result};

/// The address of the system message bus is given in the
/// `DBUS_SYSTEM_BUS_ADDRESS` environment variable. If that variable is not
/// set, applications should try to connect to the well-known address
/// `unix:path=/var/run/dbus/system_bus_socket`.
const SYSTEM_BUS_ADDRESS_ENV: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const WELL_KNOWN_SYSTEM_BUS_ADDRESS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// The session bus address comes from `DBUS_SESSION_BUS_ADDRESS`; if unset,
/// we fall back to the per-user socket under `XDG_RUNTIME_DIR`.
const SESSION_BUS_ADDRESS_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";
const XDG_RUNTIME_DIR_ENV: &str = "XDG_RUNTIME_DIR";

/// Which standard bus a connection targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// A resolved, connectable endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// A filesystem path or abstract-namespace name for a Unix domain
    /// socket. `abstract_` distinguishes the two: Linux's abstract socket
    /// namespace prefixes the name with a NUL at connect time.
    Unix { path: String, abstract_: bool },
}

/// Resolve the address for `kind`, trying every semicolon-separated
/// candidate in order and returning the first one we can parse into a
/// connectable [`Endpoint`].
pub fn resolve(kind: BusKind) -> Result<Endpoint> {
    let raw = match kind {
        BusKind::Session => session_bus_address()?,
        BusKind::System => env::var(SYSTEM_BUS_ADDRESS_ENV)
            .unwrap_or_else(|_| WELL_KNOWN_SYSTEM_BUS_ADDRESS.to_string()),
    };
    parse(&raw)
}

fn session_bus_address() -> Result<String> {
    if let Ok(addr) = env::var(SESSION_BUS_ADDRESS_ENV) {
        return Ok(addr);
    }
    let runtime_dir = env::var(XDG_RUNTIME_DIR_ENV).map_err(|_| {
        Error::Address(format!(
            "neither {} nor {} is set",
            SESSION_BUS_ADDRESS_ENV, XDG_RUNTIME_DIR_ENV
        ))
    })?;
    Ok(format!("unix:path={}/bus", runtime_dir))
}

/// Parse a full D-Bus address string, returning the first entry we know
/// how to dial.
pub fn parse(address: &str) -> Result<Endpoint> {
    for entry in address.split(';') {
        if let Some(endpoint) = parse_entry(entry) {
            return Ok(endpoint);
        }
    }
    Err(Error::Address(format!(
        "no connectable entry in address `{}`",
        address
    )))
}

fn parse_entry(entry: &str) -> Option<Endpoint> {
    let (transport, rest) = entry.split_once(':')?;
    if transport != "unix" {
        return None;
    }
    let mut path = None;
    let mut abstract_name = None;
    for pair in rest.split(',') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=')?;
        match key {
            "path" => path = Some(unescape(value)),
            "abstract" => abstract_name = Some(unescape(value)),
            _ => {}
        }
    }
    if let Some(path) = path {
        Some(Endpoint::Unix {
            path,
            abstract_: false,
        })
    } else {
        abstract_name.map(|name| Endpoint::Unix {
            path: name,
            abstract_: true,
        })
    }
}

/// D-Bus addresses percent-escape any byte outside an allow-list; we only
/// need to undo it for the handful of punctuation characters that show up
/// in real socket paths.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte as char);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path_entry() {
        let endpoint = parse("unix:path=/run/dbus/system_bus_socket").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Unix {
                path: "/run/dbus/system_bus_socket".to_string(),
                abstract_: false,
            }
        );
    }

    #[test]
    fn parses_abstract_entry() {
        let endpoint = parse("unix:abstract=/tmp/dbus-xyz,guid=deadbeef").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Unix {
                path: "/tmp/dbus-xyz".to_string(),
                abstract_: true,
            }
        );
    }

    #[test]
    fn tries_later_entries_when_earlier_ones_are_unsupported() {
        let endpoint = parse("tcp:host=localhost,port=0;unix:path=/run/bus").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Unix {
                path: "/run/bus".to_string(),
                abstract_: false,
            }
        );
    }

    #[test]
    fn rejects_address_with_no_connectable_entry() {
        assert!(parse("tcp:host=localhost,port=0").is_err());
    }

    #[test]
    fn unescapes_percent_sequences() {
        let endpoint = parse("unix:path=/tmp/has%20space").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Unix {
                path: "/tmp/has space".to_string(),
                abstract_: false,
            }
        );
    }
}
