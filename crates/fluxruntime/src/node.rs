//! The executable unit of a graph.
//!
//! A [`Node`] owns its input and output ports and delegates its computation
//! to a boxed [`NodeBehavior`]. The scheduler holds a node's execution lock
//! while driving it, so a behavior's `compute` is never reentered
//! concurrently by the engine.

use crate::env::Env;
use fluxcore::{
    DataBox, DataValue, EventDispatcher, FluxError, IndexableName, Port, Result, SharedData,
    SharedPort, Uuid, Value,
};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub type SharedNode = Arc<Node>;

/// The computation plugged into a node.
///
/// `setup` declares the node's ports; `compute` reads inputs and writes
/// outputs through the node handed to it. The default persistence hooks save
/// and restore every plain input port's value.
pub trait NodeBehavior: Send + 'static {
    /// Declares ports on the freshly built node.
    fn setup(&mut self, node: &Node) -> Result<()>;

    /// Runs the node's computation.
    fn compute(&mut self, node: &Node) -> Result<()>;

    fn save_inputs(&self, node: &Node) -> Result<serde_json::Value> {
        save_input_values(node)
    }

    fn restore_inputs(&mut self, node: &Node, inputs: &serde_json::Value) -> Result<()> {
        restore_input_values(node, inputs)
    }

    /// Runs after creation, before the node first executes.
    fn start(&self, _node: &Node) {}

    /// Runs when the node is removed from its graph.
    fn stop(&self, _node: &Node) {}
}

/// Payload of the input/output update events.
#[derive(Clone)]
pub struct PortUpdate {
    pub key: IndexableName,
    pub data: Option<SharedData>,
}

/// Payload of the output emission event.
#[derive(Clone)]
pub struct OutputEmit {
    pub node: Uuid,
    pub key: IndexableName,
    pub data: Option<SharedData>,
}

/// Events a node broadcasts while executing.
#[derive(Default)]
pub struct NodeEvents {
    pub on_compute: EventDispatcher<()>,
    pub on_set_input: EventDispatcher<PortUpdate>,
    pub on_set_output: EventDispatcher<PortUpdate>,
    pub on_error: EventDispatcher<FluxError>,
    pub on_emit_output: EventDispatcher<OutputEmit>,
}

pub struct Node {
    id: Uuid,
    class_tag: String,
    name: RwLock<String>,
    env: Arc<Env>,
    inputs: RwLock<HashMap<IndexableName, SharedPort>>,
    outputs: RwLock<HashMap<IndexableName, SharedPort>>,
    behavior: Mutex<Box<dyn NodeBehavior>>,
    exec: Mutex<()>,
    pub events: NodeEvents,
}

impl Node {
    /// Builds a node and lets its behavior declare ports.
    pub fn new(
        id: Uuid,
        class_tag: impl Into<String>,
        name: impl Into<String>,
        env: Arc<Env>,
        behavior: Box<dyn NodeBehavior>,
    ) -> Result<SharedNode> {
        let node = Arc::new(Self {
            id,
            class_tag: class_tag.into(),
            name: RwLock::new(name.into()),
            env,
            inputs: RwLock::new(HashMap::new()),
            outputs: RwLock::new(HashMap::new()),
            behavior: Mutex::new(behavior),
            exec: Mutex::new(()),
            events: NodeEvents::default(),
        });

        {
            let mut behavior = node.behavior.lock().unwrap();
            behavior.setup(&node)?;
        }

        Ok(node)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn class_tag(&self) -> &str {
        &self.class_tag
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap() = name.into();
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// The execution lock the scheduler holds while driving this node.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.exec.lock().unwrap()
    }

    /// Adds an input port. A declared type with a trailing `"&"` makes the
    /// port required.
    pub fn add_input(
        &self,
        key: &str,
        caption: &str,
        declared_type: &str,
        data: Option<SharedData>,
    ) -> Result<SharedPort> {
        let key = IndexableName::new(key)?;
        let mut inputs = self.inputs.write().unwrap();
        let index = inputs.len() as u64;
        let port = inputs
            .entry(key.clone())
            .or_insert_with(|| Port::new(key, caption, declared_type, data, index));
        Ok(port.clone())
    }

    pub fn add_input_of<T: DataValue>(
        &self,
        key: &str,
        caption: &str,
        data: Option<SharedData>,
    ) -> Result<SharedPort> {
        self.add_input(key, caption, T::type_tag(), data)
    }

    /// Adds a required reference input seeded with a live box. The returned
    /// box is shared with the port, so the caller observes every update
    /// delivered to it.
    pub fn add_required_input<T: DataValue>(
        &self,
        key: &str,
        caption: &str,
        initial: T,
    ) -> Result<SharedData> {
        let data = DataBox::new_ref(initial);
        let tag = data.data_type().to_string();
        self.add_input(key, caption, &tag, Some(data.clone()))?;
        Ok(data)
    }

    pub fn add_output(
        &self,
        key: &str,
        caption: &str,
        declared_type: &str,
        data: Option<SharedData>,
    ) -> Result<SharedPort> {
        let key = IndexableName::new(key)?;
        let mut outputs = self.outputs.write().unwrap();
        let index = outputs.len() as u64;
        let port = outputs
            .entry(key.clone())
            .or_insert_with(|| Port::new(key, caption, declared_type, data, index));
        Ok(port.clone())
    }

    pub fn add_output_of<T: DataValue>(
        &self,
        key: &str,
        caption: &str,
        data: Option<SharedData>,
    ) -> Result<SharedPort> {
        self.add_output(key, caption, T::type_tag(), data)
    }

    pub fn input_port(&self, key: &str) -> Result<SharedPort> {
        self.input_port_by_name(&IndexableName::new(key)?)
    }

    pub fn input_port_by_name(&self, key: &IndexableName) -> Result<SharedPort> {
        self.inputs.read().unwrap().get(key).cloned().ok_or_else(|| {
            FluxError::NotFound(format!("no input port `{key}` on node {}", self.id))
        })
    }

    pub fn output_port(&self, key: &str) -> Result<SharedPort> {
        self.output_port_by_name(&IndexableName::new(key)?)
    }

    pub fn output_port_by_name(&self, key: &IndexableName) -> Result<SharedPort> {
        self.outputs.read().unwrap().get(key).cloned().ok_or_else(|| {
            FluxError::NotFound(format!("no output port `{key}` on node {}", self.id))
        })
    }

    /// Input ports in declaration order.
    pub fn input_ports(&self) -> Vec<SharedPort> {
        let mut ports: Vec<SharedPort> = self.inputs.read().unwrap().values().cloned().collect();
        ports.sort_by_key(|port| port.index());
        ports
    }

    /// Output ports in declaration order.
    pub fn output_ports(&self) -> Vec<SharedPort> {
        let mut ports: Vec<SharedPort> = self.outputs.read().unwrap().values().cloned().collect();
        ports.sort_by_key(|port| port.index());
        ports
    }

    pub fn input_data(&self, key: &str) -> Result<Option<SharedData>> {
        Ok(self.input_port(key)?.data())
    }

    pub fn output_data(&self, key: &str) -> Result<Option<SharedData>> {
        Ok(self.output_port(key)?.data())
    }

    /// Typed view of an input port's value.
    pub fn input_value<T: DataValue>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.input_data(key)?.and_then(|data| data.get::<T>()))
    }

    /// Typed view of an output port's value.
    pub fn output_value<T: DataValue>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.output_data(key)?.and_then(|data| data.get::<T>()))
    }

    /// Stores a box into an input port, broadcasts `on_set_input`, and by
    /// default immediately computes.
    pub fn set_input(&self, key: &str, data: Option<SharedData>, compute: bool) -> Result<()> {
        self.set_input_by_name(&IndexableName::new(key)?, data, compute)
    }

    pub fn set_input_by_name(
        &self,
        key: &IndexableName,
        data: Option<SharedData>,
        compute: bool,
    ) -> Result<()> {
        let port = self.input_port_by_name(key)?;
        port.set_data(data.clone(), false);
        self.events.on_set_input.broadcast(&PortUpdate {
            key: key.clone(),
            data,
        });

        if compute {
            self.invoke_compute();
        }
        Ok(())
    }

    /// Stores a box into an output port as an output write, broadcasts
    /// `on_set_output`, and by default emits the update down the graph.
    pub fn set_output(&self, key: &str, data: Option<SharedData>, emit: bool) -> Result<()> {
        self.set_output_by_name(&IndexableName::new(key)?, data, emit)
    }

    pub fn set_output_by_name(
        &self,
        key: &IndexableName,
        data: Option<SharedData>,
        emit: bool,
    ) -> Result<()> {
        let port = self.output_port_by_name(key)?;
        port.set_data(data.clone(), true);
        self.events.on_set_output.broadcast(&PortUpdate {
            key: key.clone(),
            data: data.clone(),
        });

        if emit {
            self.emit_update(key, data);
        }
        Ok(())
    }

    /// Fires the graph-bound propagation hook for an output update.
    pub fn emit_update(&self, key: &IndexableName, data: Option<SharedData>) {
        self.events.on_emit_output.broadcast(&OutputEmit {
            node: self.id,
            key: key.clone(),
            data,
        });
    }

    /// Runs the behavior's `compute`, broadcasting `on_compute` on success
    /// and `on_error` on any failure, panics included. Never propagates.
    pub fn invoke_compute(&self) {
        let outcome = {
            let mut behavior = self.behavior.lock().unwrap();
            catch_unwind(AssertUnwindSafe(|| behavior.compute(self)))
        };

        match outcome {
            Ok(Ok(())) => self.events.on_compute.broadcast(&()),
            Ok(Err(error)) => self.events.on_error.broadcast(&error),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "compute panicked".to_string());
                self.events.on_error.broadcast(&FluxError::Compute(message));
            }
        }
    }

    /// The portable representation: `{id, class, name, inputs}`.
    pub fn save(&self) -> Result<serde_json::Value> {
        let behavior = self.behavior.lock().unwrap();
        Ok(serde_json::json!({
            "id": self.id.to_string(),
            "class": self.class_tag,
            "name": self.name(),
            "inputs": behavior.save_inputs(self)?,
        }))
    }

    /// Restores name and input state from a saved representation. The id and
    /// class are fixed at construction; the payload must still carry them.
    pub fn restore(&self, payload: &serde_json::Value) -> Result<()> {
        let object = payload
            .as_object()
            .ok_or_else(|| FluxError::BadPayload("node payload is not an object".into()))?;

        for field in ["id", "class", "name"] {
            if !object.contains_key(field) {
                return Err(FluxError::BadPayload(format!(
                    "node payload is missing `{field}`"
                )));
            }
        }

        if let Some(name) = object["name"].as_str() {
            self.set_name(name);
        }

        if let Some(inputs) = object.get("inputs") {
            let mut behavior = self.behavior.lock().unwrap();
            behavior.restore_inputs(self, inputs)?;
        }
        Ok(())
    }

    pub fn start(&self) {
        self.behavior.lock().unwrap().start(self);
    }

    pub fn stop(&self) {
        self.behavior.lock().unwrap().stop(self);
    }
}

/// Serializes every input port that holds data, keyed by port name.
pub fn save_input_values(node: &Node) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for port in node.input_ports() {
        if let Some(data) = port.data() {
            map.insert(port.key().to_string(), serde_json::to_value(data.value())?);
        }
    }
    Ok(serde_json::Value::Object(map))
}

/// Restores input values saved by [`save_input_values`]. Reference inputs and
/// unknown keys are skipped.
pub fn restore_input_values(node: &Node, inputs: &serde_json::Value) -> Result<()> {
    let Some(map) = inputs.as_object() else {
        return Ok(());
    };

    for (key, payload) in map {
        let name = IndexableName::new(key)?;
        let Ok(port) = node.input_port_by_name(&name) else {
            continue;
        };
        if port.is_required() {
            continue;
        }

        let value: Value = serde_json::from_value(payload.clone())?;
        node.set_input_by_name(&name, Some(DataBox::from_value(value)), false)?;
    }
    Ok(())
}
