use std::collections::HashMap;

use crate::event::{EventPayload, EventType};

pub type PluginId = u32;

type Handler = Box<dyn FnMut(&EventPayload) -> anyhow::Result<()>>;

struct Listener {
    plugin_id: PluginId,
    priority: i32,
    seq: u64,
    once: bool,
    handler: Handler,
}

/// Single-threaded event bus. Listener lists are kept sorted by descending
/// priority with registration order breaking ties, so dispatch order is
/// deterministic. Not `Sync` on purpose: emission happens on the editor
/// thread only; reader threads go through [`crate::EventSender`].
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventType, Vec<Listener>>,
    next_seq: u64,
    batch_depth: u32,
    batch_queue: Vec<(EventType, EventPayload)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Higher priority fires earlier; ties fire in
    /// registration order.
    pub fn on(
        &mut self,
        event: EventType,
        plugin_id: PluginId,
        priority: i32,
        handler: impl FnMut(&EventPayload) -> anyhow::Result<()> + 'static,
    ) {
        self.insert(event, plugin_id, priority, false, Box::new(handler));
    }

    /// Register a listener that is removed after its first invocation.
    /// One-shot listeners run at priority 0.
    pub fn once(
        &mut self,
        event: EventType,
        plugin_id: PluginId,
        handler: impl FnMut(&EventPayload) -> anyhow::Result<()> + 'static,
    ) {
        self.insert(event, plugin_id, 0, true, Box::new(handler));
    }

    fn insert(
        &mut self,
        event: EventType,
        plugin_id: PluginId,
        priority: i32,
        once: bool,
        handler: Handler,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let listener = Listener {
            plugin_id,
            priority,
            seq,
            once,
            handler,
        };

        let list = self.listeners.entry(event).or_default();
        let at = list
            .iter()
            .position(|other| other.priority < priority)
            .unwrap_or(list.len());
        list.insert(at, listener);
    }

    /// Remove every listener `plugin_id` registered for `event`.
    pub fn off(&mut self, event: EventType, plugin_id: PluginId) {
        if let Some(list) = self.listeners.get_mut(&event) {
            list.retain(|listener| listener.plugin_id != plugin_id);
        }
    }

    /// Remove every listener registered by `plugin_id`, across all events.
    pub fn remove_plugin(&mut self, plugin_id: PluginId) {
        for list in self.listeners.values_mut() {
            list.retain(|listener| listener.plugin_id != plugin_id);
        }
    }

    pub fn listener_count(&self, event: EventType) -> usize {
        self.listeners.get(&event).map_or(0, Vec::len)
    }

    /// Emit an event. While a batch is open the event is queued; otherwise
    /// listeners run immediately. Listener errors are logged with the owning
    /// plugin id and never stop delivery to the remaining listeners.
    pub fn emit(&mut self, event: EventType, payload: EventPayload) {
        if self.batch_depth > 0 {
            self.batch_queue.push((event, payload));
            return;
        }
        self.dispatch(event, &payload);
    }

    fn dispatch(&mut self, event: EventType, payload: &EventPayload) {
        let Some(list) = self.listeners.get_mut(&event) else {
            return;
        };

        for listener in list.iter_mut() {
            if let Err(err) = (listener.handler)(payload) {
                log::error!(
                    "{} listener of plugin {} failed: {:#}",
                    event,
                    listener.plugin_id,
                    err
                );
            }
        }

        list.retain(|listener| !listener.once);
    }

    /// Open a batch. Nested calls are allowed; only the outermost
    /// [`EventBus::end_batch`] flushes.
    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Close a batch. The outermost close replays the queued events in
    /// insertion order with immediate dispatch.
    pub fn end_batch(&mut self) {
        match self.batch_depth {
            0 => log::warn!("end_batch without a matching begin_batch"),
            1 => {
                self.batch_depth = 0;
                self.flush_batch();
            }
            _ => self.batch_depth -= 1,
        }
    }

    fn flush_batch(&mut self) {
        let queued = std::mem::take(&mut self.batch_queue);
        for (event, payload) in queued {
            self.dispatch(event, &payload);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<String>>>, tag: &str) -> impl FnMut(&EventPayload) -> anyhow::Result<()> {
        let log = log.clone();
        let tag = tag.to_string();
        move |_| {
            log.borrow_mut().push(tag.clone());
            Ok(())
        }
    }

    #[test]
    fn test_priority_order_with_stable_ties() {
        let mut bus = EventBus::new();
        let calls = Rc::new(RefCell::new(Vec::new()));

        bus.on(EventType::TextChanged, 1, 0, recorder(&calls, "low"));
        bus.on(EventType::TextChanged, 2, 10, recorder(&calls, "high"));
        bus.on(EventType::TextChanged, 3, 10, recorder(&calls, "high-later"));
        bus.on(EventType::TextChanged, 4, 5, recorder(&calls, "mid"));

        bus.emit(EventType::TextChanged, EventPayload::None);

        assert_eq!(
            calls.borrow().as_slice(),
            &["high", "high-later", "mid", "low"]
        );
    }

    #[test]
    fn test_once_fires_exactly_once() {
        let mut bus = EventBus::new();
        let calls = Rc::new(RefCell::new(Vec::new()));

        bus.once(EventType::BufNew, 1, recorder(&calls, "once"));
        bus.on(EventType::BufNew, 1, 0, recorder(&calls, "always"));

        bus.emit(EventType::BufNew, EventPayload::None);
        bus.emit(EventType::BufNew, EventPayload::None);

        assert_eq!(calls.borrow().as_slice(), &["once", "always", "always"]);
        assert_eq!(bus.listener_count(EventType::BufNew), 1);
    }

    #[test]
    fn test_handler_error_does_not_abort_dispatch() {
        let mut bus = EventBus::new();
        let calls = Rc::new(RefCell::new(Vec::new()));

        bus.on(EventType::CursorMoved, 1, 10, |_| {
            anyhow::bail!("listener fault")
        });
        bus.on(EventType::CursorMoved, 2, 0, recorder(&calls, "second"));

        bus.emit(EventType::CursorMoved, EventPayload::None);
        assert_eq!(calls.borrow().as_slice(), &["second"]);
    }

    #[test]
    fn test_off_and_remove_plugin() {
        let mut bus = EventBus::new();
        let calls = Rc::new(RefCell::new(Vec::new()));

        bus.on(EventType::BufEnter, 1, 0, recorder(&calls, "p1"));
        bus.on(EventType::BufEnter, 2, 0, recorder(&calls, "p2"));
        bus.on(EventType::BufLeave, 2, 0, recorder(&calls, "p2-leave"));

        bus.off(EventType::BufEnter, 1);
        bus.emit(EventType::BufEnter, EventPayload::None);
        assert_eq!(calls.borrow().as_slice(), &["p2"]);

        bus.remove_plugin(2);
        bus.emit(EventType::BufEnter, EventPayload::None);
        bus.emit(EventType::BufLeave, EventPayload::None);
        assert_eq!(calls.borrow().as_slice(), &["p2"]);
    }

    #[test]
    fn test_batched_events_flush_in_order() {
        let mut bus = EventBus::new();
        let calls = Rc::new(RefCell::new(Vec::new()));

        let sink = calls.clone();
        bus.on(EventType::TextChanged, 1, 0, move |payload| {
            if let EventPayload::Text { text, .. } = payload {
                sink.borrow_mut().push(text.clone());
            }
            Ok(())
        });

        let payload = |text: &str| EventPayload::Text {
            buffer_id: 1,
            range: (0, 0),
            text: text.to_string(),
        };

        bus.begin_batch();
        bus.emit(EventType::TextChanged, payload("A"));
        bus.emit(EventType::TextChanged, payload("B"));
        assert!(calls.borrow().is_empty(), "no dispatch inside a batch");
        bus.emit(EventType::TextChanged, payload("C"));
        bus.end_batch();

        assert_eq!(calls.borrow().as_slice(), &["A", "B", "C"]);
    }

    #[test]
    fn test_nested_batches_flush_on_outermost_end() {
        let mut bus = EventBus::new();
        let calls = Rc::new(RefCell::new(Vec::new()));

        bus.on(EventType::BufNew, 1, 0, recorder(&calls, "event"));

        bus.begin_batch();
        bus.begin_batch();
        bus.emit(EventType::BufNew, EventPayload::None);
        bus.end_batch();
        assert!(calls.borrow().is_empty(), "inner end must not flush");
        bus.emit(EventType::BufNew, EventPayload::None);
        bus.end_batch();

        assert_eq!(calls.borrow().as_slice(), &["event", "event"]);
    }

    #[test]
    fn test_unbalanced_end_batch_is_ignored() {
        let mut bus = EventBus::new();
        bus.end_batch();
        let calls = Rc::new(RefCell::new(Vec::new()));
        bus.on(EventType::BufNew, 1, 0, recorder(&calls, "event"));
        bus.emit(EventType::BufNew, EventPayload::None);
        assert_eq!(calls.borrow().len(), 1);
    }
}
