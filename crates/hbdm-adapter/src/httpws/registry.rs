//! Symbol → sink map owned by one connection

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::httpws::sink::EventSink;

struct Inner<T> {
    sinks: HashMap<String, EventSink<T>>,
    closed: bool,
}

/// At most one live sink per symbol; sinks live until the registry closes
pub(crate) struct SubscriptionRegistry<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

impl<T> SubscriptionRegistry<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(Inner { sinks: HashMap::new(), closed: false }), capacity }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Existing sink for `symbol`, or a new one. After close, a closed sink.
    pub(crate) fn get_or_create(&self, symbol: &str) -> EventSink<T> {
        let mut inner = self.lock();
        if inner.closed {
            let sink = EventSink::new(1);
            sink.close();
            return sink;
        }
        let capacity = self.capacity;
        inner.sinks.entry(symbol.to_string()).or_insert_with(|| EventSink::new(capacity)).clone()
    }

    /// Sink for `symbol` if subscribed; the lock is released before returning
    pub(crate) fn get(&self, symbol: &str) -> Option<EventSink<T>> {
        self.lock().sinks.get(symbol).cloned()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().sinks.len()
    }

    /// Close every sink and clear the map; later lookups find nothing
    pub(crate) fn close_all(&self) {
        let sinks: Vec<EventSink<T>> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.sinks.drain().map(|(_, sink)| sink).collect()
        };
        for sink in sinks {
            sink.close();
        }
    }
}
