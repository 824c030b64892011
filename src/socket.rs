//! The byte-stream-plus-ancillary-fds transport `spec.md` §1 treats as an
//! external collaborator: a reliable ordered stream with the ability to
//! carry Unix file descriptors alongside the bytes.
//!
//! The teacher crate never implements a transport at all (it only shapes
//! bytes); fd passing is ported from `zeenix-zbus`'s dependency on `nix`,
//! the one crate in the pack that already solves this.

use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{
    recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr,
};
use nix::sys::uio::IoVec;

use crate::error::{Error, Result};

/// An ordered byte stream capable of carrying Unix file descriptors
/// alongside the bytes written in the same call, the way `SCM_RIGHTS`
/// ancillary data rides alongside a `sendmsg`/`recvmsg` pair.
///
/// `Connection` and `Dispatcher` only ever talk to this trait, never to
/// `UnixStream` directly, so the transport can be swapped (loopback pair
/// for tests, TCP for the non-Unix case `spec.md` §1 otherwise excludes).
pub trait Socket: Send {
    /// Write `buf` in full, passing `fds` as ancillary data on the same
    /// write. `fds` is typically empty; D-Bus messages rarely carry FDs.
    fn send(&mut self, buf: &[u8], fds: &[RawFd]) -> Result<()>;

    /// Read up to `buf.len()` bytes, returning the number read and any
    /// FDs that arrived as ancillary data on this read. `Ok(0)` means EOF.
    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, Vec<RawFd>)>;

    /// Shut down both directions of the underlying stream, unblocking any
    /// thread currently parked in `recv` on a duplicated descriptor of the
    /// same kernel socket. Used by `Dispatcher::shutdown` to stop the
    /// reader thread without the reader having to poll for a close flag.
    fn shutdown(&self) -> Result<()>;
}

/// The one production [`Socket`]: a connected `AF_UNIX` `SOCK_STREAM`.
pub struct UnixSocket {
    stream: UnixStream,
}

impl UnixSocket {
    pub fn connect(path: &str, abstract_: bool) -> Result<UnixSocket> {
        let addr = if abstract_ {
            UnixAddr::new_abstract(path.as_bytes())
        } else {
            UnixAddr::new(path)
        }
        .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let fd = nix::sys::socket::socket(
            nix::sys::socket::AddressFamily::Unix,
            nix::sys::socket::SockType::Stream,
            nix::sys::socket::SockFlag::empty(),
            None,
        )
        .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        nix::sys::socket::connect(fd, &nix::sys::socket::SockAddr::Unix(addr))
            .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let stream = unsafe { <UnixStream as std::os::unix::io::FromRawFd>::from_raw_fd(fd) };
        Ok(UnixSocket { stream })
    }

    /// Wrap an already-connected stream (used for test loopback pairs).
    pub fn from_stream(stream: UnixStream) -> UnixSocket {
        UnixSocket { stream }
    }

    pub fn try_clone(&self) -> Result<UnixSocket> {
        Ok(UnixSocket {
            stream: self.stream.try_clone()?,
        })
    }
}

impl Socket for UnixSocket {
    fn send(&mut self, buf: &[u8], fds: &[RawFd]) -> Result<()> {
        let fd = self.stream.as_raw_fd();
        let cmsgs = if fds.is_empty() {
            Vec::new()
        } else {
            vec![ControlMessage::ScmRights(fds)]
        };
        let mut sent = 0;
        while sent < buf.len() {
            let iov = [IoVec::from_slice(&buf[sent..])];
            let n = sendmsg(fd, &iov, &cmsgs, MsgFlags::empty(), None)
                .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            if n == 0 {
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "socket closed mid-write",
                )));
            }
            sent += n;
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<(usize, Vec<RawFd>)> {
        let fd = self.stream.as_raw_fd();
        let mut cmsg_buffer = nix::cmsg_space!([RawFd; 16]);
        let iov = [IoVec::from_mut_slice(buf)];
        let msg = recvmsg(fd, &iov, Some(&mut cmsg_buffer), MsgFlags::empty())
            .map_err(|e| Error::Transport(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                fds.extend(received);
            }
        }
        Ok((msg.bytes, fds))
    }

    fn shutdown(&self) -> Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}
