use fluxcore::{DataBox, FluxError, Result, Uuid};
use fluxruntime::{Env, Graph, Node, NodeBehavior, NodeFactory, SharedNode};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Copies `in` to `out` and `other_in` to `other_out`.
struct PassBehavior;

impl NodeBehavior for PassBehavior {
    fn setup(&mut self, node: &Node) -> Result<()> {
        node.add_input_of::<i64>("in", "", None)?;
        node.add_input_of::<i64>("other_in", "", None)?;
        node.add_output_of::<i64>("out", "", None)?;
        node.add_output_of::<i64>("other_out", "", None)?;
        Ok(())
    }

    fn compute(&mut self, node: &Node) -> Result<()> {
        if let Some(data) = node.input_data("in")? {
            node.set_output("out", Some(data), true)?;
        }
        if let Some(data) = node.input_data("other_in")? {
            node.set_output("other_out", Some(data), true)?;
        }
        Ok(())
    }
}

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

fn test_env() -> Arc<Env> {
    init_tracing();
    Env::new(Arc::new(NodeFactory::new()))
}

fn pass_node(env: &Arc<Env>) -> SharedNode {
    Node::new(
        Uuid::new_v4(),
        "PassNode",
        "pass",
        env.clone(),
        Box::new(PassBehavior),
    )
    .unwrap()
}

#[test]
fn add_and_remove_nodes() {
    let env = test_env();
    let graph = Graph::new("test", env.clone());
    let node1 = pass_node(&env);
    let node2 = pass_node(&env);

    assert_eq!(graph.size(), 0);
    graph.add_node(node1.clone());
    assert_eq!(graph.size(), 1);
    graph.add_node(node2.clone());
    assert_eq!(graph.size(), 2);

    graph.remove_node(node1.id());
    assert_eq!(graph.size(), 1);
    assert!(graph.node(node1.id()).is_none());
    graph.remove_node(node2.id());
    assert_eq!(graph.size(), 0);
}

#[test]
fn connect_and_disconnect() {
    let env = test_env();
    let graph = Graph::new("test", env.clone());
    let node1 = pass_node(&env);
    let node2 = pass_node(&env);
    graph.add_node(node1.clone());
    graph.add_node(node2.clone());

    assert_eq!(graph.connection_count(), 0);
    let conn = graph
        .connect(node1.id(), "out", node2.id(), "in")
        .unwrap()
        .expect("connection should be created");
    assert_eq!(conn.start_node(), node1.id());
    assert_eq!(graph.connection_count(), 1);

    assert!(node1.output_port("out").unwrap().is_connected());
    assert!(node2.input_port("in").unwrap().is_connected());

    graph.disconnect(node1.id(), "out", node2.id(), "in").unwrap();
    assert_eq!(graph.connection_count(), 0);
    assert!(!node1.output_port("out").unwrap().is_connected());
    assert!(!node2.input_port("in").unwrap().is_connected());
}

#[test]
fn connecting_a_taken_input_returns_the_existing_connection() {
    let env = test_env();
    let graph = Graph::new("test", env.clone());
    let node1 = pass_node(&env);
    let node2 = pass_node(&env);
    graph.add_node(node1.clone());
    graph.add_node(node2.clone());

    let first = graph
        .connect(node1.id(), "out", node2.id(), "in")
        .unwrap()
        .unwrap();

    // Same four endpoints: the existing connection comes back.
    let again = graph
        .connect(node1.id(), "out", node2.id(), "in")
        .unwrap()
        .unwrap();
    assert_eq!(first.id(), again.id());
    assert_eq!(graph.connection_count(), 1);

    // Another output fighting for the same input is refused, and the losing
    // output port is not left flagged as connected.
    let refused = graph
        .connect(node1.id(), "other_out", node2.id(), "in")
        .unwrap();
    assert!(refused.is_none());
    assert_eq!(graph.connection_count(), 1);
    assert!(!node1.output_port("other_out").unwrap().is_connected());
}

#[test]
fn input_ports_accept_at_most_one_connection() {
    let env = test_env();
    let graph = Graph::new("test", env.clone());
    let a = pass_node(&env);
    let b = pass_node(&env);
    let c = pass_node(&env);
    for node in [&a, &b, &c] {
        graph.add_node((*node).clone());
    }

    assert!(graph.connect(a.id(), "out", c.id(), "in").unwrap().is_some());
    assert!(graph.connect(b.id(), "out", c.id(), "in").unwrap().is_none());
    assert_eq!(graph.connection_count(), 1);
}

#[test]
fn missing_nodes_and_ports() {
    let env = test_env();
    let graph = Graph::new("test", env.clone());
    let node = pass_node(&env);
    graph.add_node(node.clone());

    // Unknown node: no connection, no error.
    assert!(graph
        .connect(node.id(), "out", Uuid::new_v4(), "in")
        .unwrap()
        .is_none());

    // Unknown port on a known node: accessor error.
    let other = pass_node(&env);
    graph.add_node(other.clone());
    assert!(matches!(
        graph.connect(node.id(), "missing", other.id(), "in"),
        Err(FluxError::NotFound(_))
    ));

    assert!(!graph.can_connect(node.id(), "out", Uuid::new_v4(), "in"));
    assert!(!graph.can_connect(node.id(), "missing", other.id(), "in"));
}

#[test]
fn propagation_through_a_connection() {
    let env = test_env();
    let graph = Graph::new("test", env.clone());
    let node1 = pass_node(&env);
    let node2 = pass_node(&env);
    graph.add_node(node1.clone());
    graph.add_node(node2.clone());
    graph.connect(node1.id(), "out", node2.id(), "in").unwrap();

    assert!(node1.output_data("out").unwrap().is_none());

    node1.set_input("in", Some(DataBox::new(101i64)), true).unwrap();
    assert_eq!(node1.output_value::<i64>("out").unwrap(), Some(101));
    assert!(node1.output_data("other_out").unwrap().is_none());

    env.wait();
    assert_eq!(node2.input_value::<i64>("in").unwrap(), Some(101));
    assert!(node2.input_data("other_in").unwrap().is_none());

    // A second edge added later catches up independently.
    graph
        .connect(node1.id(), "other_out", node2.id(), "other_in")
        .unwrap();
    node1
        .set_input("other_in", Some(DataBox::new(202i64)), true)
        .unwrap();
    env.wait();

    assert_eq!(node2.input_value::<i64>("in").unwrap(), Some(101));
    assert_eq!(node2.input_value::<i64>("other_in").unwrap(), Some(202));
}

#[test]
fn new_connections_catch_up_to_existing_output_data() {
    let env = test_env();
    let graph = Graph::new("test", env.clone());
    let node1 = pass_node(&env);
    let node2 = pass_node(&env);
    graph.add_node(node1.clone());
    graph.add_node(node2.clone());

    // Produce before any edge exists.
    node1.set_input("in", Some(DataBox::new(7i64)), true).unwrap();
    env.wait();
    assert!(node2.input_data("in").unwrap().is_none());

    graph.connect(node1.id(), "out", node2.id(), "in").unwrap();
    env.wait();
    assert_eq!(node2.input_value::<i64>("in").unwrap(), Some(7));
}

#[test]
fn identity_pipeline_delivers_end_to_end() {
    let env = test_env();
    let graph = Graph::new("pipeline", env.clone());
    let a = pass_node(&env);
    let b = pass_node(&env);
    graph.add_node(a.clone());
    graph.add_node(b.clone());
    graph.connect(a.id(), "out", b.id(), "in").unwrap();

    a.set_input("in", Some(DataBox::new(101i64)), true).unwrap();
    env.wait();

    assert_eq!(b.input_value::<i64>("in").unwrap(), Some(101));
    assert_eq!(b.output_value::<i64>("out").unwrap(), Some(101));
}

#[test]
fn chain_delivers_to_the_far_end() {
    let env = test_env();
    let graph = Graph::new("chain", env.clone());
    let a = pass_node(&env);
    let b = pass_node(&env);
    let c = pass_node(&env);
    for node in [&a, &b, &c] {
        graph.add_node((*node).clone());
    }
    graph.connect(a.id(), "out", b.id(), "in").unwrap();
    graph.connect(b.id(), "out", c.id(), "in").unwrap();

    a.set_input("in", Some(DataBox::new(55i64)), true).unwrap();
    env.wait();

    assert_eq!(c.input_value::<i64>("in").unwrap(), Some(55));
}

#[test]
fn fan_out_delivers_to_every_consumer_in_emit_order() {
    let env = test_env();
    let graph = Graph::new("fanout", env.clone());
    let a = pass_node(&env);
    let consumers: Vec<SharedNode> = (0..3).map(|_| pass_node(&env)).collect();
    graph.add_node(a.clone());
    for consumer in &consumers {
        graph.add_node(consumer.clone());
        graph.connect(a.id(), "out", consumer.id(), "in").unwrap();
    }

    for value in [1i64, 2, 3] {
        a.set_input("in", Some(DataBox::new(value)), true).unwrap();
    }
    env.wait();

    for consumer in &consumers {
        assert_eq!(consumer.input_value::<i64>("in").unwrap(), Some(3));
    }
}

#[test]
fn node_classification() {
    let env = test_env();
    let graph = Graph::new("classify", env.clone());
    let node1 = pass_node(&env);
    let node2 = pass_node(&env);
    let node3 = pass_node(&env);
    for node in [&node1, &node2, &node3] {
        graph.add_node((*node).clone());
    }

    // No connections yet: everyone is an orphan.
    assert!(graph.source_nodes().is_empty());
    assert!(graph.leaf_nodes().is_empty());
    assert_eq!(graph.orphan_nodes().len(), 3);

    graph.connect(node1.id(), "out", node2.id(), "in").unwrap();
    assert_eq!(graph.source_nodes().len(), 1);
    assert_eq!(graph.leaf_nodes().len(), 1);
    assert_eq!(graph.orphan_nodes().len(), 1);

    let node4 = pass_node(&env);
    graph.add_node(node4.clone());
    assert_eq!(graph.orphan_nodes().len(), 2);

    graph.connect(node1.id(), "out", node4.id(), "in").unwrap();
    assert_eq!(graph.source_nodes().len(), 1);
    assert_eq!(graph.leaf_nodes().len(), 2);
    assert_eq!(graph.orphan_nodes().len(), 1);
}

#[test]
fn run_computes_source_nodes() {
    let env = test_env();
    let graph = Graph::new("run", env.clone());
    let a = pass_node(&env);
    let b = pass_node(&env);
    graph.add_node(a.clone());
    graph.add_node(b.clone());
    graph.connect(a.id(), "out", b.id(), "in").unwrap();

    a.set_input("in", Some(DataBox::new(9i64)), false).unwrap();
    assert!(a.output_data("out").unwrap().is_none());

    graph.run();
    env.wait();

    assert_eq!(a.output_value::<i64>("out").unwrap(), Some(9));
    assert_eq!(b.input_value::<i64>("in").unwrap(), Some(9));
}

#[test]
fn visit_covers_every_node_once() {
    let env = test_env();
    let graph = Graph::new("visit", env.clone());
    let a = pass_node(&env);
    let b = pass_node(&env);
    let c = pass_node(&env);
    let orphan = pass_node(&env);
    for node in [&a, &b, &c, &orphan] {
        graph.add_node((*node).clone());
    }
    graph.connect(a.id(), "out", b.id(), "in").unwrap();
    graph.connect(b.id(), "out", c.id(), "in").unwrap();

    let mut seen: Vec<Uuid> = Vec::new();
    graph.visit(|node| seen.push(node.id()));

    assert_eq!(seen.len(), 4);
    let unique: HashSet<Uuid> = seen.iter().copied().collect();
    assert_eq!(unique.len(), 4);

    // Reachable nodes come before the orphan sweep, in flow order.
    assert_eq!(seen[0], a.id());
    assert_eq!(seen[1], b.id());
    assert_eq!(seen[2], c.id());
    assert_eq!(seen[3], orphan.id());
}

#[test]
fn removing_a_node_repairs_far_endpoints() {
    let env = test_env();
    let graph = Graph::new("repair", env.clone());
    let a = pass_node(&env);
    let b = pass_node(&env);
    let c = pass_node(&env);
    for node in [&a, &b, &c] {
        graph.add_node((*node).clone());
    }
    graph.connect(a.id(), "out", b.id(), "in").unwrap();
    graph.connect(b.id(), "out", c.id(), "in").unwrap();

    graph.remove_node(b.id());

    assert_eq!(graph.connection_count(), 0);
    assert!(!a.output_port("out").unwrap().is_connected());
    assert!(!c.input_port("in").unwrap().is_connected());
}

#[test]
fn compute_failures_surface_on_the_graph() {
    struct FailingBehavior;

    impl NodeBehavior for FailingBehavior {
        fn setup(&mut self, node: &Node) -> Result<()> {
            node.add_input_of::<i64>("in", "", None)?;
            node.add_output_of::<i64>("out", "", None)?;
            Ok(())
        }

        fn compute(&mut self, _node: &Node) -> Result<()> {
            Err(FluxError::Compute("deliberate failure".into()))
        }
    }

    let env = test_env();
    let graph = Graph::new("errors", env.clone());
    let source = pass_node(&env);
    let failing = Node::new(
        Uuid::new_v4(),
        "FailingNode",
        "failing",
        env.clone(),
        Box::new(FailingBehavior),
    )
    .unwrap();
    graph.add_node(source.clone());
    graph.add_node(failing.clone());
    graph.connect(source.id(), "out", failing.id(), "in").unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let errors_inner = errors.clone();
    graph
        .events()
        .on_error
        .bind("count".try_into().unwrap(), move |_| {
            errors_inner.fetch_add(1, Ordering::SeqCst);
        });

    source.set_input("in", Some(DataBox::new(1i64)), true).unwrap();
    env.wait();

    assert!(errors.load(Ordering::SeqCst) >= 1);
    // The failure stayed isolated: the box still arrived.
    assert_eq!(failing.input_value::<i64>("in").unwrap(), Some(1));
}

#[test]
fn clear_empties_nodes_and_connections() {
    let env = test_env();
    let graph = Graph::new("clear", env.clone());
    let a = pass_node(&env);
    let b = pass_node(&env);
    graph.add_node(a.clone());
    graph.add_node(b.clone());
    graph.connect(a.id(), "out", b.id(), "in").unwrap();

    graph.clear();
    assert_eq!(graph.size(), 0);
    assert_eq!(graph.connection_count(), 0);
}

#[test]
fn graph_events_fire_on_topology_changes() {
    let env = test_env();
    let graph = Graph::new("events", env.clone());

    let log = Arc::new(Mutex::new(Vec::new()));
    {
        let log = log.clone();
        graph
            .events()
            .on_node_added
            .bind("log".try_into().unwrap(), move |_| {
                log.lock().unwrap().push("added")
            });
    }
    {
        let log = log.clone();
        graph
            .events()
            .on_nodes_connected
            .bind("log".try_into().unwrap(), move |_| {
                log.lock().unwrap().push("connected")
            });
    }
    {
        let log = log.clone();
        graph
            .events()
            .on_nodes_disconnected
            .bind("log".try_into().unwrap(), move |_| {
                log.lock().unwrap().push("disconnected")
            });
    }
    {
        let log = log.clone();
        graph
            .events()
            .on_node_removed
            .bind("log".try_into().unwrap(), move |_| {
                log.lock().unwrap().push("removed")
            });
    }

    let a = pass_node(&env);
    let b = pass_node(&env);
    graph.add_node(a.clone());
    graph.add_node(b.clone());
    graph.connect(a.id(), "out", b.id(), "in").unwrap();
    graph.disconnect(a.id(), "out", b.id(), "in").unwrap();
    graph.remove_node(b.id());

    assert_eq!(
        *log.lock().unwrap(),
        vec!["added", "added", "connected", "disconnected", "removed"]
    );
}
