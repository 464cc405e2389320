//! `grim-event` is the typed event layer between the buffer bridge and
//! plugins: a prioritized, batchable publish/subscribe bus owned by the
//! editor thread, plus a bounded queue for posting events from reader
//! threads.

mod bus;
mod event;
mod queue;

pub use bus::{EventBus, PluginId};
pub use event::{EventPayload, EventType};
pub use queue::{bounded, EventQueue, EventSender};
