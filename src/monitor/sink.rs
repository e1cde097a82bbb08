//! Event sinks
//!
//! The parser publishes events synchronously from the stdout drain thread.
//! Sinks that may block should be wrapped in a [`QueuedSink`], which hands
//! events to a dedicated dispatcher thread through a bounded queue.

use log::{debug, warn};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::models::DeviceEvent;

/// Receives lifecycle events in the order they were produced
pub trait EventSink: Send + Sync {
    fn publish(&self, event: DeviceEvent);
}

impl<F> EventSink for F
where
    F: Fn(DeviceEvent) + Send + Sync,
{
    fn publish(&self, event: DeviceEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded channel
pub struct ChannelSink {
    sender: Sender<DeviceEvent>,
}

impl ChannelSink {
    /// Create a sink together with the receiving end of its channel
    pub fn new() -> (Self, Receiver<DeviceEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: DeviceEvent) {
        if self.sender.send(event).is_err() {
            debug!("event receiver dropped, discarding event");
        }
    }
}

/// Decouples a slow sink from the publishing thread.
///
/// Events are queued up to `capacity`; when the queue is full the publisher
/// logs a warning and waits for room, so no event is ever dropped or reordered.
pub struct QueuedSink {
    sender: Mutex<Option<SyncSender<DeviceEvent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    capacity: usize,
}

impl QueuedSink {
    pub fn new(inner: Arc<dyn EventSink>, capacity: usize) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<DeviceEvent>(capacity);
        let dispatcher = thread::Builder::new()
            .name("udmon-dispatch".to_string())
            .spawn(move || {
                for event in receiver {
                    inner.publish(event);
                }
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting events and wait until every queued event was delivered
    pub fn close(&self) {
        drop(relock(&self.sender).take());
        if let Some(dispatcher) = relock(&self.dispatcher).take() {
            if dispatcher.join().is_err() {
                warn!("event dispatcher panicked, queued events may be lost");
            }
        }
    }
}

impl EventSink for QueuedSink {
    fn publish(&self, event: DeviceEvent) {
        let Some(sender) = relock(&self.sender).clone() else {
            debug!("event queue closed, discarding {} event", event.kind());
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "event queue full ({} events), waiting for the sink to catch up",
                    self.capacity
                );
                if sender.send(event).is_err() {
                    warn!("event dispatcher stopped, discarding event");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("event dispatcher stopped, discarding event");
            }
        }
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
