//! Named, typed endpoints on a node.

use crate::data::SharedData;
use crate::name::IndexableName;
use crate::types;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// A port holds at most one data box and tracks its connection state.
///
/// A port whose declared type carries a trailing `"&"` is a required
/// reference port: it refuses to have its data cleared.
pub struct Port {
    key: IndexableName,
    caption: RwLock<String>,
    declared_type: String,
    required: bool,
    index: u64,
    connected: AtomicBool,
    data: RwLock<Option<SharedData>>,
}

pub type SharedPort = Arc<Port>;

impl Port {
    pub fn new(
        key: IndexableName,
        caption: impl Into<String>,
        declared_type: impl Into<String>,
        data: Option<SharedData>,
        index: u64,
    ) -> SharedPort {
        let declared_type = declared_type.into();
        let required = types::is_reference(&declared_type);

        Arc::new(Self {
            key,
            caption: RwLock::new(caption.into()),
            declared_type,
            required,
            index,
            connected: AtomicBool::new(false),
            data: RwLock::new(data),
        })
    }

    pub fn key(&self) -> &IndexableName {
        &self.key
    }

    pub fn caption(&self) -> String {
        self.caption.read().unwrap().clone()
    }

    pub fn set_caption(&self, caption: impl Into<String>) {
        *self.caption.write().unwrap() = caption.into();
    }

    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    /// The tag of the held data, falling back to the declared type when the
    /// port is empty.
    pub fn data_type(&self) -> String {
        self.data
            .read()
            .unwrap()
            .as_ref()
            .map(|data| data.data_type().to_string())
            .unwrap_or_else(|| self.declared_type.clone())
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Marks the port connected; returns `false` if it already was.
    pub fn connect(&self) -> bool {
        !self.connected.swap(true, Ordering::AcqRel)
    }

    /// Marks the port disconnected; returns `false` if it already was.
    pub fn disconnect(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }

    pub fn data(&self) -> Option<SharedData> {
        self.data.read().unwrap().clone()
    }

    /// Stores a box on the port.
    ///
    /// A null box on a required port is ignored. When the port is empty, the
    /// incoming box is null, or this is an output write, the box is stored by
    /// reference; otherwise the incoming value is copied into the existing
    /// box so its identity is preserved for every holder.
    pub fn set_data(&self, data: Option<SharedData>, output: bool) {
        if data.is_none() && self.required {
            return;
        }

        let mut slot = self.data.write().unwrap();
        let in_place = !output && slot.is_some() && data.is_some();
        if in_place {
            if let (Some(existing), Some(incoming)) = (slot.as_ref(), data.as_ref()) {
                existing.assign_from(incoming);
            }
        } else {
            *slot = data;
        }
    }
}
