//! Keyed synchronous event dispatch.
//!
//! Handlers are bound under an [`IndexableName`] so a subscriber can later
//! unbind exactly its own handler. Broadcast is synchronous on the emitting
//! thread; subscribers needing asynchrony defer on their own.

use crate::name::IndexableName;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Dispatches a payload to every bound handler.
pub struct EventDispatcher<T> {
    handlers: RwLock<HashMap<IndexableName, Handler<T>>>,
}

impl<T> EventDispatcher<T> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Binds a handler under a unique key. A key that is already bound keeps
    /// its original handler; it must be unbound before rebinding.
    pub fn bind(&self, key: IndexableName, handler: impl Fn(&T) + Send + Sync + 'static) {
        let handler: Handler<T> = Arc::new(handler);
        self.handlers.write().unwrap().entry(key).or_insert(handler);
    }

    pub fn unbind(&self, key: &IndexableName) {
        self.handlers.write().unwrap().remove(key);
    }

    pub fn unbind_all(&self) {
        self.handlers.write().unwrap().clear();
    }

    /// Invokes every bound handler with the payload, on the calling thread.
    pub fn broadcast(&self, payload: &T) {
        let handlers: Vec<Handler<T>> = self.handlers.read().unwrap().values().cloned().collect();
        for handler in handlers {
            handler(payload);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().unwrap().len()
    }
}

impl<T> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}
