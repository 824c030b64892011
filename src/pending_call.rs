//! The future resolution slot for an outbound `MethodCall` expecting a
//! reply: created when [`crate::Connection::send`] dispatches such a call,
//! resolved exactly once by a matching `MethodReturn`/`Error`, a connection
//! close, an explicit cancellation, or a caller-supplied timeout
//! (`spec.md` §4.5, §5).

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::message::Message;

enum State {
    Pending,
    Done(Result<Message>),
    Cancelled,
}

/// The table-side half of a pending call: what `Dispatcher` holds and
/// resolves, independent of whether the caller still holds (or has
/// dropped) the [`PendingCall`] handle.
pub(crate) struct Slot {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Slot {
    pub(crate) fn new() -> Arc<Slot> {
        Arc::new(Slot {
            state: Mutex::new(State::Pending),
            condvar: Condvar::new(),
        })
    }

    /// Resolve with a reply or a terminal error. A slot that is already
    /// `Done` or `Cancelled` silently drops the outcome — this is how a
    /// late duplicate reply, or a reply to an already-cancelled call, is
    /// dropped per `spec.md` §8's pending-call resolution law.
    pub(crate) fn resolve(&self, outcome: Result<Message>) {
        let mut guard = self.state.lock().unwrap();
        if matches!(*guard, State::Pending) {
            *guard = State::Done(outcome);
            drop(guard);
            self.condvar.notify_all();
        }
    }

    fn cancel(&self) {
        let mut guard = self.state.lock().unwrap();
        if matches!(*guard, State::Pending) {
            *guard = State::Cancelled;
        }
    }
}

/// A handle to the eventual resolution of one outbound method call.
pub struct PendingCall {
    serial: u32,
    slot: Arc<Slot>,
}

impl PendingCall {
    pub(crate) fn new(serial: u32, slot: Arc<Slot>) -> PendingCall {
        PendingCall { serial, slot }
    }

    /// The serial this call was sent with; matches the `REPLY_SERIAL` of
    /// whatever reply resolves it.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Cancel this call from any thread. A reply that later arrives for it
    /// is dropped as a late duplicate rather than resolving anything.
    pub fn cancel(&self) {
        self.slot.cancel();
    }

    /// Block the calling thread until the reply arrives, the call is
    /// cancelled, the connection fails, or `timeout` elapses — whichever
    /// comes first.
    pub fn wait(self, timeout: Duration) -> Result<Message> {
        let mut guard = self.slot.state.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            match &*guard {
                State::Done(_) => {
                    return match std::mem::replace(&mut *guard, State::Cancelled) {
                        State::Done(outcome) => outcome,
                        _ => unreachable!("state was just matched as Done"),
                    };
                }
                State::Cancelled => return Err(Error::Cancelled),
                State::Pending => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    let (new_guard, wait_result) = self
                        .slot
                        .condvar
                        .wait_timeout(guard, deadline - now)
                        .unwrap();
                    guard = new_guard;
                    if wait_result.timed_out() && matches!(*guard, State::Pending) {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::BusName;
    use crate::path::ObjectPath;
    use std::thread;

    fn dummy_reply() -> Message {
        let mut call = Message::method_call(
            "org.example.Svc".parse::<BusName>().unwrap(),
            ObjectPath::new("/obj").unwrap(),
            None,
            "Noop".parse().unwrap(),
        );
        call.serialize(crate::marshal::Endianness::Little, 1).unwrap();
        Message::method_return(&call)
    }

    #[test]
    fn resolves_exactly_once() {
        let slot = Slot::new();
        let pending = PendingCall::new(7, Arc::clone(&slot));
        slot.resolve(Ok(dummy_reply()));
        // A late duplicate after resolution is dropped, not observed here
        // because `wait` already consumes the single outcome.
        slot.resolve(Ok(dummy_reply()));
        assert!(pending.wait(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn wait_blocks_until_resolved_from_another_thread() {
        let slot = Slot::new();
        let pending = PendingCall::new(1, Arc::clone(&slot));
        let resolver = Arc::clone(&slot);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.resolve(Ok(dummy_reply()));
        });
        assert!(pending.wait(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn cancel_causes_late_reply_to_be_dropped() {
        let slot = Slot::new();
        let pending = PendingCall::new(3, Arc::clone(&slot));
        pending.cancel();
        slot.resolve(Ok(dummy_reply()));
        assert!(matches!(pending.wait(Duration::from_secs(1)), Err(Error::Cancelled)));
    }

    #[test]
    fn times_out_when_never_resolved() {
        let slot = Slot::new();
        let pending = PendingCall::new(9, slot);
        assert!(matches!(
            pending.wait(Duration::from_millis(10)),
            Err(Error::Timeout)
        ));
    }
}
