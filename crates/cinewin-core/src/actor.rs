//! Two-lane message protocol between the event pump and the main thread.
//!
//! A [`Protocol`] owns an "in" and an "out" FIFO plus a free list of
//! messages. Messages come out of [`Protocol::get_message`] (or the `send_*`
//! helpers) and go back to the free list when their [`MessageHandle`] is
//! dropped, so a steady message flow does not allocate.
//!
//! Synchronous sends block until the receiver calls
//! [`MessageHandle::reply`] or the timeout elapses. A reply that arrives
//! after the sender gave up is dropped.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

/// Payloads up to this size are stored inline in the message.
pub const MSG_INTERNAL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("no reply to message {signal} within {timeout:?}")]
    Timeout { signal: i32, timeout: Duration },
    #[error("message {signal} was dropped without a reply")]
    Dropped { signal: i32 },
}

/// Message payload.
#[derive(Default)]
pub enum Payload {
    #[default]
    Empty,
    Inline {
        len: usize,
        bytes: [u8; MSG_INTERNAL_BUFFER_SIZE],
    },
    Heap(Vec<u8>),
    Boxed(Box<dyn Any + Send>),
}

impl Payload {
    /// Copy `data`, inline when it fits.
    pub fn from_bytes(data: &[u8]) -> Self {
        if data.len() <= MSG_INTERNAL_BUFFER_SIZE {
            let mut bytes = [0; MSG_INTERNAL_BUFFER_SIZE];
            bytes[..data.len()].copy_from_slice(data);
            Self::Inline {
                len: data.len(),
                bytes,
            }
        } else {
            Self::Heap(data.to_vec())
        }
    }

    pub fn boxed<T: Any + Send>(value: T) -> Self {
        Self::Boxed(Box::new(value))
    }

    /// Raw bytes; empty for boxed and empty payloads.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Inline { len, bytes } => &bytes[..*len],
            Self::Heap(data) => data,
            Self::Empty | Self::Boxed(_) => &[],
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Boxed(value) => value.downcast_ref(),
            _ => None,
        }
    }

    /// Take the boxed value out if it has type `T`.
    pub fn downcast<T: Any>(self) -> Option<T> {
        match self {
            Self::Boxed(value) => value.downcast().ok().map(|value| *value),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Inline { len, .. } => write!(f, "Inline({len} bytes)"),
            Self::Heap(data) => write!(f, "Heap({} bytes)", data.len()),
            Self::Boxed(_) => f.write_str("Boxed"),
        }
    }
}

#[derive(Default)]
struct ReplyState {
    reply: Option<MessageHandle>,
    timed_out: bool,
    dropped: bool,
}

#[derive(Default)]
struct ReplySlot {
    state: Mutex<ReplyState>,
    ready: Condvar,
}

/// A signal plus payload.
#[derive(Debug)]
pub struct Message {
    pub signal: i32,
    pub payload: Payload,
    reply_slot: Option<Arc<ReplySlot>>,
}

impl fmt::Debug for ReplySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReplySlot")
    }
}

impl Message {
    const fn vacant() -> Self {
        Self {
            signal: 0,
            payload: Payload::Empty,
            reply_slot: None,
        }
    }

    /// Whether the sender is blocked waiting for a reply.
    pub const fn is_sync(&self) -> bool {
        self.reply_slot.is_some()
    }

    pub fn take_payload(&mut self) -> Payload {
        std::mem::take(&mut self.payload)
    }
}

struct Pool {
    free: Mutex<Vec<Message>>,
    allocated: AtomicUsize,
}

impl Pool {
    fn acquire(&self) -> Message {
        if let Some(message) = self.free.lock().pop() {
            return message;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Message::vacant()
    }

    fn release(&self, mut message: Message) {
        message.signal = 0;
        message.payload = Payload::Empty;
        message.reply_slot = None;
        self.free.lock().push(message);
    }
}

/// Exclusive ownership of a message; returns it to the pool on drop.
pub struct MessageHandle {
    message: Message,
    pool: Arc<Pool>,
}

impl MessageHandle {
    fn new(message: Message, pool: Arc<Pool>) -> Self {
        Self { message, pool }
    }

    /// Answer a synchronous message. Returns `false` if the message was
    /// not synchronous, was already answered, or the sender timed out.
    pub fn reply(&mut self, signal: i32, payload: Payload) -> bool {
        let Some(slot) = self.message.reply_slot.take() else {
            return false;
        };
        let mut reply = Self::new(self.pool.acquire(), Arc::clone(&self.pool));
        reply.signal = signal;
        reply.payload = payload;

        let mut state = slot.state.lock();
        if state.timed_out {
            debug!(
                "Discarding reply {signal} to message {}: sender timed out",
                self.message.signal
            );
            return false;
        }
        state.reply = Some(reply);
        slot.ready.notify_one();
        true
    }
}

impl Deref for MessageHandle {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

impl DerefMut for MessageHandle {
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}

impl Drop for MessageHandle {
    fn drop(&mut self) {
        let message = std::mem::replace(&mut self.message, Message::vacant());
        // Unanswered sync message: release the blocked sender.
        if let Some(slot) = &message.reply_slot {
            slot.state.lock().dropped = true;
            slot.ready.notify_one();
        }
        self.pool.release(message);
    }
}

impl fmt::Debug for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

/// Auto-reset event.
#[derive(Debug, Default)]
pub struct WakeEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl WakeEvent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Wait until set or `timeout` elapses; consumes the signal. Returns
    /// whether the event was set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }
}

#[derive(Default)]
struct Lane {
    queue: VecDeque<MessageHandle>,
    deferred: bool,
}

#[derive(Default)]
struct Lanes {
    incoming: Lane,
    outgoing: Lane,
}

/// Message protocol with an "in" and an "out" lane.
pub struct Protocol {
    name: String,
    pool: Arc<Pool>,
    lanes: Mutex<Lanes>,
    in_event: Option<Arc<WakeEvent>>,
    out_event: Option<Arc<WakeEvent>>,
}

impl Protocol {
    pub fn new(name: &str) -> Self {
        Self::with_events(name, None, None)
    }

    /// Signal `in_event` / `out_event` whenever a message is queued on the
    /// corresponding lane.
    pub fn with_events(
        name: &str,
        in_event: Option<Arc<WakeEvent>>,
        out_event: Option<Arc<WakeEvent>>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            pool: Arc::new(Pool {
                free: Mutex::new(Vec::new()),
                allocated: AtomicUsize::new(0),
            }),
            lanes: Mutex::new(Lanes::default()),
            in_event,
            out_event,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take a message from the free list, allocating only if it is empty.
    pub fn get_message(&self) -> MessageHandle {
        MessageHandle::new(self.pool.acquire(), Arc::clone(&self.pool))
    }

    fn build(&self, signal: i32, payload: Payload) -> MessageHandle {
        let mut message = self.get_message();
        message.signal = signal;
        message.payload = payload;
        message
    }

    pub fn send_out_message(&self, signal: i32, payload: Payload) {
        let message = self.build(signal, payload);
        self.lanes.lock().outgoing.queue.push_back(message);
        if let Some(event) = &self.out_event {
            event.set();
        }
    }

    pub fn send_in_message(&self, signal: i32, payload: Payload) {
        let message = self.build(signal, payload);
        self.lanes.lock().incoming.queue.push_back(message);
        if let Some(event) = &self.in_event {
            event.set();
        }
    }

    /// Queue on the out lane and block until replied to or `timeout`.
    pub fn send_out_message_sync(
        &self,
        signal: i32,
        timeout: Duration,
        payload: Payload,
    ) -> Result<MessageHandle, ActorError> {
        let slot = Arc::new(ReplySlot::default());
        let mut message = self.build(signal, payload);
        message.reply_slot = Some(Arc::clone(&slot));
        self.lanes.lock().outgoing.queue.push_back(message);
        if let Some(event) = &self.out_event {
            event.set();
        }

        let deadline = Instant::now() + timeout;
        let mut state = slot.state.lock();
        while state.reply.is_none() && !state.dropped {
            if slot.ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if let Some(reply) = state.reply.take() {
            return Ok(reply);
        }
        if state.dropped {
            debug!("{}: message {signal} dropped unanswered", self.name);
            return Err(ActorError::Dropped { signal });
        }
        state.timed_out = true;
        debug!("{}: message {signal} timed out after {timeout:?}", self.name);
        Err(ActorError::Timeout { signal, timeout })
    }

    /// Next message on the out lane, unless empty or deferred.
    pub fn receive_out_message(&self) -> Option<MessageHandle> {
        let mut lanes = self.lanes.lock();
        if lanes.outgoing.deferred {
            return None;
        }
        lanes.outgoing.queue.pop_front()
    }

    pub fn receive_in_message(&self) -> Option<MessageHandle> {
        let mut lanes = self.lanes.lock();
        if lanes.incoming.deferred {
            return None;
        }
        lanes.incoming.queue.pop_front()
    }

    pub fn defer_in(&self, deferred: bool) {
        self.lanes.lock().incoming.deferred = deferred;
    }

    pub fn defer_out(&self, deferred: bool) {
        self.lanes.lock().outgoing.deferred = deferred;
    }

    /// Drop every queued message on both lanes.
    pub fn purge(&self) {
        let dropped = {
            let mut lanes = self.lanes.lock();
            let mut dropped: Vec<MessageHandle> = lanes.incoming.queue.drain(..).collect();
            dropped.extend(lanes.outgoing.queue.drain(..));
            dropped
        };
        if !dropped.is_empty() {
            debug!("{}: purged {} messages", self.name, dropped.len());
        }
    }

    /// Drop queued in-lane messages carrying `signal`.
    pub fn purge_in(&self, signal: i32) {
        let dropped = Self::purge_lane(&mut self.lanes.lock().incoming, signal);
        drop(dropped);
    }

    /// Drop queued out-lane messages carrying `signal`.
    pub fn purge_out(&self, signal: i32) {
        let dropped = Self::purge_lane(&mut self.lanes.lock().outgoing, signal);
        drop(dropped);
    }

    fn purge_lane(lane: &mut Lane, signal: i32) -> Vec<MessageHandle> {
        let (dropped, kept): (Vec<_>, Vec<_>) = lane
            .queue
            .drain(..)
            .partition(|message| message.signal == signal);
        lane.queue.extend(kept);
        dropped
    }

    pub fn pending_out(&self) -> usize {
        self.lanes.lock().outgoing.queue.len()
    }

    pub fn pending_in(&self) -> usize {
        self.lanes.lock().incoming.queue.len()
    }

    /// Messages ever allocated by this protocol.
    pub fn allocated_messages(&self) -> usize {
        self.pool.allocated.load(Ordering::Relaxed)
    }

    /// Messages currently on the free list.
    pub fn free_messages(&self) -> usize {
        self.pool.free.lock().len()
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.name)
            .field("pending_in", &self.pending_in())
            .field("pending_out", &self.pending_out())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_payload_inline_and_heap() {
        let small = Payload::from_bytes(&[1, 2, 3]);
        assert!(matches!(small, Payload::Inline { len: 3, .. }));
        assert_eq!(small.bytes(), &[1, 2, 3]);

        let large_data = vec![7u8; MSG_INTERNAL_BUFFER_SIZE + 1];
        let large = Payload::from_bytes(&large_data);
        assert!(matches!(large, Payload::Heap(_)));
        assert_eq!(large.bytes(), large_data.as_slice());
    }

    #[test]
    fn test_boxed_payload_downcast() {
        let payload = Payload::boxed((640_i32, 480_i32));
        assert_eq!(payload.downcast_ref::<(i32, i32)>(), Some(&(640, 480)));
        assert!(payload.downcast_ref::<String>().is_none());
        assert_eq!(payload.downcast::<(i32, i32)>(), Some((640, 480)));
    }

    #[test]
    fn test_fifo_within_lane() {
        let protocol = Protocol::new("test");
        for signal in 0..5 {
            protocol.send_out_message(signal, Payload::Empty);
        }
        protocol.send_in_message(100, Payload::Empty);

        let received: Vec<i32> = std::iter::from_fn(|| protocol.receive_out_message())
            .map(|m| m.signal)
            .collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        assert_eq!(protocol.receive_in_message().unwrap().signal, 100);
    }

    #[test]
    fn test_pool_reuses_released_messages() {
        let protocol = Protocol::new("pool");
        let messages: Vec<MessageHandle> = (0..8).map(|_| protocol.get_message()).collect();
        assert_eq!(protocol.allocated_messages(), 8);
        drop(messages);
        assert_eq!(protocol.free_messages(), 8);

        let again: Vec<MessageHandle> = (0..8).map(|_| protocol.get_message()).collect();
        assert_eq!(protocol.allocated_messages(), 8);
        assert_eq!(protocol.free_messages(), 0);
        drop(again);
    }

    #[test]
    fn test_deferred_lane_keeps_messages() {
        let protocol = Protocol::new("defer");
        protocol.send_out_message(1, Payload::Empty);
        protocol.defer_out(true);
        assert!(protocol.receive_out_message().is_none());
        assert_eq!(protocol.pending_out(), 1);
        protocol.defer_out(false);
        assert_eq!(protocol.receive_out_message().unwrap().signal, 1);
    }

    #[test]
    fn test_purge_by_signal_keeps_other_messages() {
        let protocol = Protocol::new("purge");
        for signal in [1, 2, 1, 3] {
            protocol.send_out_message(signal, Payload::Empty);
        }
        protocol.purge_out(1);
        let left: Vec<i32> = std::iter::from_fn(|| protocol.receive_out_message())
            .map(|m| m.signal)
            .collect();
        assert_eq!(left, vec![2, 3]);

        protocol.send_in_message(5, Payload::Empty);
        protocol.send_out_message(6, Payload::Empty);
        protocol.purge();
        assert_eq!(protocol.pending_in() + protocol.pending_out(), 0);
    }

    #[test]
    fn test_sync_message_gets_reply() {
        let protocol = Arc::new(Protocol::new("sync"));
        let receiver = {
            let protocol = Arc::clone(&protocol);
            thread::spawn(move || loop {
                if let Some(mut message) = protocol.receive_out_message() {
                    assert!(message.is_sync());
                    let value = message.payload.bytes()[0];
                    assert!(message.reply(7, Payload::from_bytes(&[value * 2])));
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            })
        };

        let reply = protocol
            .send_out_message_sync(3, Duration::from_secs(5), Payload::from_bytes(&[21]))
            .unwrap();
        assert_eq!(reply.signal, 7);
        assert_eq!(reply.payload.bytes(), &[42]);
        receiver.join().unwrap();
    }

    #[test]
    fn test_sync_timeout_discards_late_reply() {
        let protocol = Arc::new(Protocol::new("timeout"));
        let result = protocol.send_out_message_sync(
            42,
            Duration::from_millis(10),
            Payload::from_bytes(b"X"),
        );
        assert!(matches!(
            result,
            Err(ActorError::Timeout { signal: 42, .. })
        ));

        let late = {
            let protocol = Arc::clone(&protocol);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                let mut message = protocol.receive_out_message().unwrap();
                message.reply(43, Payload::Empty)
            })
        };
        assert!(!late.join().unwrap());
    }

    #[test]
    fn test_purge_releases_blocked_sender() {
        let protocol = Arc::new(Protocol::new("purge-sync"));
        let sender = {
            let protocol = Arc::clone(&protocol);
            thread::spawn(move || {
                let started = Instant::now();
                let result =
                    protocol.send_out_message_sync(9, Duration::from_secs(30), Payload::Empty);
                (result, started.elapsed())
            })
        };
        while protocol.pending_out() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        protocol.purge_out(9);

        let (result, waited) = sender.join().unwrap();
        assert!(matches!(result, Err(ActorError::Dropped { signal: 9 })));
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn test_wake_event_auto_resets() {
        let event = WakeEvent::new();
        assert!(!event.wait(Duration::from_millis(1)));
        event.set();
        assert!(event.wait(Duration::from_millis(1)));
        assert!(!event.is_set());
    }

    #[test]
    fn test_send_sets_wake_event() {
        let out_event = WakeEvent::new();
        let protocol = Protocol::with_events("wake", None, Some(Arc::clone(&out_event)));
        protocol.send_out_message(1, Payload::Empty);
        assert!(out_event.wait(Duration::from_millis(1)));
    }
}
