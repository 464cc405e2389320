//! Bounded hand-off from reader threads to the editor thread.
//!
//! Reader threads must never call into the bus directly; they post here and
//! the main loop drains the queue between frames.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use crate::bus::EventBus;
use crate::event::{EventPayload, EventType};

#[derive(Clone)]
pub struct EventSender {
    tx: SyncSender<(EventType, EventPayload)>,
}

pub struct EventQueue {
    rx: Receiver<(EventType, EventPayload)>,
}

/// Create a bounded queue with room for `cap` pending events.
pub fn bounded(cap: usize) -> (EventSender, EventQueue) {
    let (tx, rx) = mpsc::sync_channel(cap);
    (EventSender { tx }, EventQueue { rx })
}

impl EventSender {
    /// Post an event without blocking. A full or disconnected queue drops
    /// the event; a reader thread must never park on the editor.
    pub fn post(&self, event: EventType, payload: EventPayload) -> bool {
        match self.tx.try_send((event, payload)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("event queue full, dropping {}", event);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl EventQueue {
    /// Drain all pending events into the bus. Returns how many were emitted.
    pub fn drain_into(&self, bus: &mut EventBus) -> usize {
        let mut emitted = 0;
        while let Ok((event, payload)) = self.rx.try_recv() {
            bus.emit(event, payload);
            emitted += 1;
        }
        emitted
    }

    pub fn try_recv(&self) -> Option<(EventType, EventPayload)> {
        self.rx.try_recv().ok()
    }
}
