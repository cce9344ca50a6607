//! The graph: nodes, connections, propagation and persistence.

use crate::env::Env;
use crate::node::{OutputEmit, SharedNode};
use fluxcore::{
    Connection, Connections, EventDispatcher, FluxError, IndexableName, Result, SharedConnection,
    SharedData, Uuid,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

const PROPAGATE_HOOK: &str = "graph_propagate";
const ERROR_HOOK: &str = "graph_error";

/// Events a graph broadcasts as its topology and execution evolve.
#[derive(Default)]
pub struct GraphEvents {
    pub on_error: EventDispatcher<FluxError>,
    pub on_node_added: EventDispatcher<SharedNode>,
    pub on_node_removed: EventDispatcher<SharedNode>,
    pub on_nodes_connected: EventDispatcher<SharedConnection>,
    pub on_nodes_disconnected: EventDispatcher<SharedConnection>,
}

struct GraphShared {
    id: Uuid,
    name: RwLock<String>,
    env: Arc<Env>,
    nodes: Mutex<HashMap<Uuid, SharedNode>>,
    connections: Connections,
    events: GraphEvents,
}

/// Container for nodes and connections.
///
/// The graph validates and creates connections, and propagates emitted
/// output data to connected inputs through the environment's worker pool.
/// Cloning yields another handle onto the same graph.
#[derive(Clone)]
pub struct Graph {
    shared: Arc<GraphShared>,
}

impl Graph {
    pub fn new(name: impl Into<String>, env: Arc<Env>) -> Self {
        Self {
            shared: Arc::new(GraphShared {
                id: Uuid::new_v4(),
                name: RwLock::new(name.into()),
                env,
                nodes: Mutex::new(HashMap::new()),
                connections: Connections::new(),
                events: GraphEvents::default(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn name(&self) -> String {
        self.shared.name.read().unwrap().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.shared.name.write().unwrap() = name.into();
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.shared.env
    }

    pub fn events(&self) -> &GraphEvents {
        &self.shared.events
    }

    /// Adds a node and subscribes the graph's propagation hook to its output
    /// emissions; node errors are forwarded to the graph's error event.
    pub fn add_node(&self, node: SharedNode) {
        let weak = Arc::downgrade(&self.shared);
        node.events.on_emit_output.bind(
            IndexableName::new(PROPAGATE_HOOK).expect("hook key is non-empty"),
            move |emit: &OutputEmit| {
                if let Some(shared) = weak.upgrade() {
                    Graph { shared }.propagate(emit.node, &emit.key, emit.data.clone());
                }
            },
        );

        let weak = Arc::downgrade(&self.shared);
        node.events.on_error.bind(
            IndexableName::new(ERROR_HOOK).expect("hook key is non-empty"),
            move |error: &FluxError| {
                if let Some(shared) = weak.upgrade() {
                    shared.events.on_error.broadcast(error);
                }
            },
        );

        self.shared.nodes.lock().unwrap().insert(node.id(), node.clone());
        self.shared.events.on_node_added.broadcast(&node);
    }

    /// Removes a node, along with every connection touching it in either
    /// direction, repairing the connection flags of far endpoints.
    pub fn remove_node(&self, id: Uuid) {
        let touching: Vec<SharedConnection> = self
            .shared
            .connections
            .snapshot()
            .into_iter()
            .filter(|conn| conn.start_node() == id || conn.end_node() == id)
            .collect();

        for conn in &touching {
            self.shared.connections.remove_by_id(conn.id());
            self.release_ports(conn);
            self.shared.events.on_nodes_disconnected.broadcast(conn);
        }

        let removed = self.shared.nodes.lock().unwrap().remove(&id);
        if let Some(node) = removed {
            node.stop();
            node.events
                .on_emit_output
                .unbind(&IndexableName::new(PROPAGATE_HOOK).expect("hook key is non-empty"));
            node.events
                .on_error
                .unbind(&IndexableName::new(ERROR_HOOK).expect("hook key is non-empty"));
            self.shared.events.on_node_removed.broadcast(&node);
        }
    }

    fn release_ports(&self, conn: &SharedConnection) {
        if let Some(start) = self.node(conn.start_node()) {
            let remaining = self
                .shared
                .connections
                .find_from_port(conn.start_node(), conn.start_port());
            if remaining.is_empty() {
                if let Ok(port) = start.output_port_by_name(conn.start_port()) {
                    port.disconnect();
                }
            }
        }
        if let Some(end) = self.node(conn.end_node()) {
            if let Ok(port) = end.input_port_by_name(conn.end_port()) {
                port.disconnect();
            }
        }
    }

    pub fn node(&self, id: Uuid) -> Option<SharedNode> {
        self.shared.nodes.lock().unwrap().get(&id).cloned()
    }

    pub fn nodes(&self) -> Vec<SharedNode> {
        self.shared.nodes.lock().unwrap().values().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.shared.nodes.lock().unwrap().len()
    }

    pub fn connections(&self) -> &Connections {
        &self.shared.connections
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Removes all nodes and connections.
    pub fn clear(&self) {
        self.shared.connections.clear();
        self.shared.nodes.lock().unwrap().clear();
    }

    /// Nodes with at least one connected output and no connected input.
    pub fn source_nodes(&self) -> Vec<SharedNode> {
        self.nodes()
            .into_iter()
            .filter(|node| {
                let has_inputs = node.input_ports().iter().any(|p| p.is_connected());
                let has_outputs = node.output_ports().iter().any(|p| p.is_connected());
                has_outputs && !has_inputs
            })
            .collect()
    }

    /// Nodes with at least one connected input and no connected output.
    pub fn leaf_nodes(&self) -> Vec<SharedNode> {
        self.nodes()
            .into_iter()
            .filter(|node| {
                let has_inputs = node.input_ports().iter().any(|p| p.is_connected());
                let has_outputs = node.output_ports().iter().any(|p| p.is_connected());
                has_inputs && !has_outputs
            })
            .collect()
    }

    /// Nodes with no connected ports at all.
    pub fn orphan_nodes(&self) -> Vec<SharedNode> {
        self.nodes()
            .into_iter()
            .filter(|node| {
                let has_inputs = node.input_ports().iter().any(|p| p.is_connected());
                let has_outputs = node.output_ports().iter().any(|p| p.is_connected());
                !has_inputs && !has_outputs
            })
            .collect()
    }

    /// Whether a connection between the two ports would be accepted: both
    /// nodes and ports exist, the data types are convertible in flow
    /// direction, and the input is still free.
    pub fn can_connect(&self, start: Uuid, start_key: &str, end: Uuid, end_key: &str) -> bool {
        let (Ok(start_key), Ok(end_key)) =
            (IndexableName::new(start_key), IndexableName::new(end_key))
        else {
            return false;
        };
        let (Some(start_node), Some(end_node)) = (self.node(start), self.node(end)) else {
            return false;
        };
        let Ok(out_port) = start_node.output_port_by_name(&start_key) else {
            return false;
        };
        let Ok(in_port) = end_node.input_port_by_name(&end_key) else {
            return false;
        };
        if in_port.is_connected() {
            return false;
        }

        self.shared
            .env
            .factory()
            .is_convertible(&out_port.data_type(), in_port.declared_type())
    }

    /// Connects an output port to an input port.
    ///
    /// Returns the existing connection when the input is already wired to
    /// the same output, `None` when the endpoints are missing, the types are
    /// not convertible, or the input is taken by another edge. A new
    /// connection immediately receives any data the output already holds.
    pub fn connect(
        &self,
        start: Uuid,
        start_key: &str,
        end: Uuid,
        end_key: &str,
    ) -> Result<Option<SharedConnection>> {
        let start_key = IndexableName::new(start_key)?;
        let end_key = IndexableName::new(end_key)?;
        self.connect_by_name(start, &start_key, end, &end_key)
    }

    pub fn connect_by_name(
        &self,
        start: Uuid,
        start_key: &IndexableName,
        end: Uuid,
        end_key: &IndexableName,
    ) -> Result<Option<SharedConnection>> {
        let (Some(start_node), Some(end_node)) = (self.node(start), self.node(end)) else {
            return Ok(None);
        };

        let out_port = start_node.output_port_by_name(start_key)?;
        let in_port = end_node.input_port_by_name(end_key)?;

        if !self
            .shared
            .env
            .factory()
            .is_convertible(&out_port.data_type(), in_port.declared_type())
        {
            return Ok(None);
        }

        out_port.connect();
        if !in_port.connect() {
            let existing = self
                .shared
                .connections
                .find_from_port(start, start_key)
                .into_iter()
                .find(|conn| conn.end_node() == end && conn.end_port() == end_key);
            if existing.is_none()
                && self
                    .shared
                    .connections
                    .find_from_port(start, start_key)
                    .is_empty()
            {
                out_port.disconnect();
            }
            return Ok(existing);
        }

        let conn = self
            .shared
            .connections
            .add(start, start_key.clone(), end, end_key.clone());
        self.shared.events.on_nodes_connected.broadcast(&conn);

        // Catch the new edge up to data the output already carries.
        if let Some(data) = out_port.data() {
            self.propagate(start, start_key, Some(data));
        }

        Ok(Some(conn))
    }

    /// Removes the connection between the two ports and clears the end
    /// node's input at that key.
    pub fn disconnect(&self, start: Uuid, start_key: &str, end: Uuid, end_key: &str) -> Result<()> {
        let start_key = IndexableName::new(start_key)?;
        let end_key = IndexableName::new(end_key)?;

        let removed = self.shared.connections.remove_pair(start, end);

        let (Some(start_node), Some(end_node)) = (self.node(start), self.node(end)) else {
            return Ok(());
        };

        let out_port = start_node.output_port_by_name(&start_key)?;
        let in_port = end_node.input_port_by_name(&end_key)?;

        if self
            .shared
            .connections
            .find_from_port(start, &start_key)
            .is_empty()
        {
            out_port.disconnect();
        }
        in_port.disconnect();

        end_node.set_input_by_name(&end_key, None, true)?;

        if let Some(conn) = removed {
            self.shared.events.on_nodes_disconnected.broadcast(&conn);
        }
        Ok(())
    }

    /// Queues one delivery task per connection leaving the given port. Each
    /// task serializes on its connection, locks the destination node,
    /// converts the box to the input's type and stores it, which computes
    /// the destination. Failures surface through `on_error`.
    pub fn propagate(&self, source: Uuid, key: &IndexableName, data: Option<SharedData>) {
        for conn in self.shared.connections.find_from_port(source, key) {
            let ticket = conn.take_ticket();
            let weak_conn = Arc::downgrade(&conn);
            let weak_graph = Arc::downgrade(&self.shared);
            let data = data.clone();

            self.shared.env.submit(move || {
                let Some(conn) = weak_conn.upgrade() else {
                    return;
                };
                conn.deliver(ticket, || {
                    let Some(shared) = weak_graph.upgrade() else {
                        return;
                    };
                    let graph = Graph { shared };
                    if let Err(error) = graph.deliver_one(&conn, data.clone()) {
                        graph
                            .shared
                            .events
                            .on_error
                            .broadcast(&FluxError::Propagation(error.to_string()));
                    }
                });
            });
        }
    }

    fn deliver_one(&self, conn: &Connection, data: Option<SharedData>) -> Result<()> {
        let Some(node) = self.node(conn.end_node()) else {
            return Ok(());
        };

        let _guard = node.lock();
        let port = node.input_port_by_name(conn.end_port())?;
        let converted = self.shared.env.factory().convert(data, &port.data_type())?;
        node.set_input_by_name(conn.end_port(), converted, true)
    }

    /// Queues a compute task for every source node, starting the flow.
    pub fn run(&self) {
        for node in self.source_nodes() {
            self.shared.env.submit(move || {
                let _guard = node.lock();
                node.invoke_compute();
            });
        }
    }

    /// Visits every node breadth-first from the source nodes, then sweeps up
    /// nodes not reachable through connections. Each node is visited exactly
    /// once; cycles are allowed.
    pub fn visit(&self, mut visitor: impl FnMut(&SharedNode)) {
        let nodes: HashMap<Uuid, SharedNode> = self.shared.nodes.lock().unwrap().clone();
        if nodes.is_empty() {
            return;
        }

        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<Uuid> = VecDeque::new();

        for node in self.source_nodes() {
            if visited.insert(node.id()) {
                visitor(&node);
                queue.push_back(node.id());
            }
        }

        while let Some(id) = queue.pop_front() {
            for conn in self.shared.connections.find(id) {
                let child = conn.end_node();
                if visited.contains(&child) {
                    continue;
                }
                if let Some(node) = nodes.get(&child) {
                    visited.insert(child);
                    visitor(node);
                    queue.push_back(child);
                }
            }
        }

        for (id, node) in &nodes {
            if visited.insert(*id) {
                visitor(node);
            }
        }

        if visited.len() != nodes.len() {
            self.shared
                .events
                .on_error
                .broadcast(&FluxError::Propagation(
                    "could not visit some nodes in the graph".into(),
                ));
        }
    }

    /// Serializes the graph to its portable object form.
    pub fn to_portable(&self) -> Result<serde_json::Value> {
        let mut nodes = Vec::new();
        for node in self.nodes() {
            nodes.push(node.save()?);
        }

        let mut connections = Vec::new();
        for conn in self.shared.connections.snapshot() {
            connections.push(serde_json::json!({
                "in_id": conn.start_node().to_string(),
                "in_var_name": conn.start_port().to_string(),
                "out_id": conn.end_node().to_string(),
                "out_var_name": conn.end_port().to_string(),
            }));
        }

        Ok(serde_json::json!({
            "nodes": nodes,
            "connections": connections,
        }))
    }

    /// Rebuilds graph content from the portable object form, creating
    /// missing nodes through the factory. Accepts the older nested `"model"`
    /// node shape and the `in_key`/`out_key` connection aliases.
    pub fn from_portable(&self, payload: &serde_json::Value) -> Result<()> {
        let nodes = payload
            .get("nodes")
            .and_then(|value| value.as_array())
            .ok_or_else(|| FluxError::BadPayload("flow payload is missing `nodes`".into()))?;

        for entry in nodes {
            let node_json = unwrap_legacy_model(entry);
            let id = parse_uuid_field(&node_json, "id")?;

            let node = match self.node(id) {
                Some(existing) => existing,
                None => {
                    let class = node_json
                        .get("class")
                        .and_then(|value| value.as_str())
                        .ok_or_else(|| {
                            FluxError::BadPayload("node payload is missing `class`".into())
                        })?;
                    let name = node_json
                        .get("name")
                        .and_then(|value| value.as_str())
                        .unwrap_or_default();

                    match self
                        .shared
                        .env
                        .factory()
                        .create(class, id, name, self.shared.env.clone())
                    {
                        Some(node) => node,
                        None => {
                            tracing::warn!(class, "skipping node with unregistered class");
                            continue;
                        }
                    }
                }
            };

            node.restore(&node_json)?;
            self.add_node(node);
        }

        let connections = payload
            .get("connections")
            .and_then(|value| value.as_array())
            .ok_or_else(|| FluxError::BadPayload("flow payload is missing `connections`".into()))?;

        for entry in connections {
            let in_id = parse_uuid_field(entry, "in_id")?;
            let out_id = parse_uuid_field(entry, "out_id")?;
            let in_key = legacy_key(entry, "in_key", "in_var_name")?;
            let out_key = legacy_key(entry, "out_key", "out_var_name")?;

            self.connect(in_id, &in_key, out_id, &out_key)?;
        }

        Ok(())
    }
}

fn unwrap_legacy_model(entry: &serde_json::Value) -> serde_json::Value {
    let Some(model) = entry.get("model") else {
        return entry.clone();
    };

    let mut flat = serde_json::Map::new();
    if let Some(id) = entry.get("id") {
        flat.insert("id".to_string(), id.clone());
    }
    for field in ["class", "name"] {
        if let Some(value) = model.get(field) {
            flat.insert(field.to_string(), value.clone());
        }
    }
    serde_json::Value::Object(flat)
}

fn parse_uuid_field(entry: &serde_json::Value, field: &str) -> Result<Uuid> {
    let text = entry
        .get(field)
        .and_then(|value| value.as_str())
        .ok_or_else(|| FluxError::BadPayload(format!("payload is missing `{field}`")))?;
    Uuid::parse_str(text)
        .map_err(|error| FluxError::InvalidArgument(format!("bad uuid `{text}`: {error}")))
}

fn legacy_key(entry: &serde_json::Value, legacy: &str, current: &str) -> Result<String> {
    entry
        .get(legacy)
        .or_else(|| entry.get(current))
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or_else(|| FluxError::BadPayload(format!("connection payload is missing `{current}`")))
}
