//! The bootstrap slice of SASL: just enough to turn a freshly connected
//! socket into an authenticated D-Bus byte stream via the `EXTERNAL`
//! mechanism. `spec.md` §1 names the full SASL handshake an external
//! collaborator and out of scope for the wire/type core; we still need
//! *something* behind `Connection::open`, so this implements the one
//! mechanism every local Unix-socket D-Bus client actually uses, and
//! nothing else (no cookie auth, no mechanism negotiation, no retries).

use nix::unistd::Uid;

use crate::error::{Error, Result};
use crate::socket::Socket;

/// Run the `EXTERNAL` handshake over `socket`, blocking until the bus
/// either accepts (`OK <guid>` then we send `BEGIN`) or rejects us.
/// Returns the server's GUID string.
pub fn external_handshake(socket: &mut dyn Socket) -> Result<String> {
    // The protocol begins with a single NUL byte identifying our
    // credentials (the kernel attaches the real uid via SO_PEERCRED; the
    // NUL is a formality the spec still requires).
    socket.send(&[0], &[])?;

    let uid = Uid::current();
    let hex_uid = uid
        .to_string()
        .bytes()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    write_line(socket, &format!("AUTH EXTERNAL {}", hex_uid))?;

    let mut reader = LineReader::new();
    let reply = reader.read_line(socket)?;

    let guid = reply
        .strip_prefix("OK ")
        .ok_or_else(|| Error::Auth(format!("unexpected reply to AUTH EXTERNAL: `{}`", reply)))?
        .to_string();

    write_line(socket, "BEGIN")?;

    Ok(guid)
}

fn write_line(socket: &mut dyn Socket, line: &str) -> Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 2);
    buf.extend_from_slice(line.as_bytes());
    buf.extend_from_slice(b"\r\n");
    socket.send(&buf, &[])
}

/// Reads one CRLF-terminated line at a time directly off a [`Socket`],
/// one byte at a time; the handshake is a handful of short lines, so the
/// inefficiency of unbuffered reads here is immaterial, and a byte-at-a-
/// time read is the only way to avoid consuming bytes that belong to the
/// first D-Bus message that follows `BEGIN`.
struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    fn new() -> LineReader {
        LineReader { buf: Vec::new() }
    }

    fn read_line(&mut self, socket: &mut dyn Socket) -> Result<String> {
        self.buf.clear();
        let mut byte = [0u8; 1];
        loop {
            let (n, _fds) = socket.recv(&mut byte)?;
            if n == 0 {
                return Err(Error::Auth("connection closed during handshake".into()));
            }
            if byte[0] == b'\n' {
                break;
            }
            if byte[0] != b'\r' {
                self.buf.push(byte[0]);
            }
        }
        String::from_utf8(self.buf.clone())
            .map_err(|e| Error::Auth(format!("non-UTF-8 handshake line: {}", e)))
    }
}
