use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;

use crate::{
    concurrent::CancelToken,
    errors::{ExcKind, RunError, RunResult},
    value::Value,
};

/// Polling interval for blocking operations so cancellation stays observable.
const POLL: Duration = Duration::from_millis(25);

/// FIFO channel value: bounded (including capacity-0 rendezvous) or
/// unbounded.
///
/// `send` blocks when full, `receive` blocks when empty; both poll the
/// caller's cancel token while blocked. Sending to a closed channel raises
/// `ChannelClosed`; receiving from a closed empty channel raises too, while
/// `tryReceive` just returns null.
#[derive(Debug)]
pub struct ChannelValue {
    /// Sender side, dropped on `close` to disconnect the channel.
    tx: Mutex<Option<Sender<Value>>>,
    rx: Receiver<Value>,
    closed: AtomicBool,
    capacity: Option<usize>,
}

impl ChannelValue {
    pub fn new(capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(cap) => bounded(cap),
            None => unbounded(),
        };
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error() -> RunError {
        RunError::exc(ExcKind::ChannelClosed, "channel is closed")
    }

    /// Blocking send; rendezvous channels complete only when a receiver
    /// takes the value.
    pub fn send(&self, value: Value, cancel: &CancelToken) -> RunResult<()> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        // Clone the sender out of the lock so `close` stays callable while a
        // rendezvous send is parked.
        let sender = match &*self.tx.lock() {
            Some(tx) => tx.clone(),
            None => return Err(Self::closed_error()),
        };
        let mut pending = value;
        loop {
            if self.is_closed() {
                return Err(Self::closed_error());
            }
            cancel.check()?;
            match sender.send_timeout(pending, POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(v)) => pending = v,
                Err(SendTimeoutError::Disconnected(_)) => return Err(Self::closed_error()),
            }
        }
    }

    /// Blocking receive; raises `ChannelClosed` once closed and drained.
    pub fn receive(&self, cancel: &CancelToken) -> RunResult<Value> {
        self.receive_opt(cancel)?.ok_or_else(Self::closed_error)
    }

    /// Blocking receive returning `None` once closed and drained.
    ///
    /// Used by the channel iterator, which treats close as end of stream.
    pub fn receive_opt(&self, cancel: &CancelToken) -> RunResult<Option<Value>> {
        loop {
            cancel.check()?;
            match self.rx.recv_timeout(POLL) {
                Ok(v) => return Ok(Some(v)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    /// Receive with a deadline: raises `Timeout` when `ms` elapses first.
    pub fn receive_timeout(&self, ms: u64, cancel: &CancelToken) -> RunResult<Value> {
        let deadline = Instant::now() + Duration::from_millis(ms);
        loop {
            cancel.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Err(RunError::exc(
                    ExcKind::Timeout,
                    format!("receive timed out after {ms} ms"),
                ));
            }
            let window = POLL.min(deadline - now);
            match self.rx.recv_timeout(window) {
                Ok(v) => return Ok(v),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(Self::closed_error()),
            }
        }
    }

    /// Non-blocking receive: `None` when empty (closed or not).
    pub fn try_receive(&self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    /// Closes the channel. Parked receivers drain buffered values and then
    /// observe the disconnect.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    fn token() -> CancelToken {
        CancelToken::new()
    }

    #[test]
    fn bounded_send_receive_in_order() {
        let ch = ChannelValue::new(Some(2));
        let t = token();
        ch.send(Value::Int(10), &t).unwrap();
        ch.send(Value::Int(20), &t).unwrap();
        assert!(ch.receive(&t).unwrap().equals(&Value::Int(10)));
        assert!(ch.receive(&t).unwrap().equals(&Value::Int(20)));
    }

    #[test]
    fn rendezvous_completes_only_with_receiver() {
        let ch = Arc::new(ChannelValue::new(Some(0)));
        let sender = ch.clone();
        let handle = thread::spawn(move || {
            let t = token();
            sender.send(Value::Int(1), &t)
        });
        // Give the sender time to park on the rendezvous.
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        assert!(ch.receive(&token()).unwrap().equals(&Value::Int(1)));
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn closed_channel_raises() {
        let ch = ChannelValue::new(None);
        let t = token();
        ch.send(Value::Int(1), &t).unwrap();
        ch.close();
        let err = ch.send(Value::Int(2), &t).unwrap_err();
        assert_eq!(err.kind(), ExcKind::ChannelClosed);
        // Buffered values drain before the closed error surfaces.
        assert!(ch.receive(&t).unwrap().equals(&Value::Int(1)));
        assert_eq!(ch.receive(&t).unwrap_err().kind(), ExcKind::ChannelClosed);
    }

    #[test]
    fn try_receive_returns_none_on_empty() {
        let ch = ChannelValue::new(Some(1));
        assert!(ch.try_receive().is_none());
        ch.send(Value::Int(5), &token()).unwrap();
        assert!(ch.try_receive().unwrap().equals(&Value::Int(5)));
    }

    #[test]
    fn receive_timeout_raises_timeout() {
        let ch = ChannelValue::new(Some(1));
        let err = ch.receive_timeout(30, &token()).unwrap_err();
        assert_eq!(err.kind(), ExcKind::Timeout);
    }
}
