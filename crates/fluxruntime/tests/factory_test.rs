use fluxcore::{DataBox, Result, Uuid};
use fluxruntime::{Category, Env, Node, NodeBehavior, NodeFactory, OutRef, SharedNode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct SourceFloat;

impl NodeBehavior for SourceFloat {
    fn setup(&mut self, node: &Node) -> Result<()> {
        node.add_output_of::<f32>("out", "", None)?;
        Ok(())
    }

    fn compute(&mut self, node: &Node) -> Result<()> {
        node.set_output("out", Some(DataBox::new(3.5f32)), true)
    }
}

/// Records every integer that arrives on `in`.
struct SinkInt {
    seen: Arc<Mutex<Vec<i32>>>,
}

impl NodeBehavior for SinkInt {
    fn setup(&mut self, node: &Node) -> Result<()> {
        node.add_input_of::<i32>("in", "", None)?;
        Ok(())
    }

    fn compute(&mut self, node: &Node) -> Result<()> {
        if let Some(value) = node.input_value::<i32>("in")? {
            self.seen.lock().unwrap().push(value);
        }
        Ok(())
    }
}

#[derive(Default)]
struct OpaqueSource;

impl NodeBehavior for OpaqueSource {
    fn setup(&mut self, node: &Node) -> Result<()> {
        node.add_output("out", "", "X", None)?;
        Ok(())
    }

    fn compute(&mut self, _node: &Node) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct OpaqueSink;

impl NodeBehavior for OpaqueSink {
    fn setup(&mut self, node: &Node) -> Result<()> {
        node.add_input("in", "", "Y", None)?;
        Ok(())
    }

    fn compute(&mut self, _node: &Node) -> Result<()> {
        Ok(())
    }
}

fn add(a: i64, b: i64) -> i64 {
    a + b
}

fn scale(factor: f64, value: f64, doubled: OutRef<f64>) -> f64 {
    doubled.set(value * 2.0);
    factor * value
}

#[test]
fn register_create_unregister() {
    let factory = Arc::new(NodeFactory::new());
    let env = Env::new(factory.clone());

    let registered = Arc::new(AtomicUsize::new(0));
    let unregistered = Arc::new(AtomicUsize::new(0));
    {
        let registered = registered.clone();
        factory
            .on_class_registered
            .bind("count".try_into().unwrap(), move |_| {
                registered.fetch_add(1, Ordering::SeqCst);
            });
        let unregistered = unregistered.clone();
        factory
            .on_class_unregistered
            .bind("count".try_into().unwrap(), move |_| {
                unregistered.fetch_add(1, Ordering::SeqCst);
            });
    }

    factory.register_class::<SourceFloat>("Test", "Source Float");
    assert_eq!(registered.load(Ordering::SeqCst), 1);

    let tag = NodeFactory::class_tag_of::<SourceFloat>();
    assert!(factory.is_registered(tag));
    assert_eq!(factory.friendly_name(tag), "Source Float");
    assert_eq!(factory.categories()["Test"], vec![tag.to_string()]);

    let node = factory
        .create(tag, Uuid::new_v4(), "source", env.clone())
        .expect("registered class should construct");
    assert_eq!(node.class_tag(), tag);
    assert_eq!(node.output_ports().len(), 1);

    factory.unregister_class::<SourceFloat>("Test");
    assert_eq!(unregistered.load(Ordering::SeqCst), 1);
    assert!(!factory.is_registered(tag));
    assert!(factory.create(tag, Uuid::new_v4(), "gone", env).is_none());
    // Friendly name falls back to the tag once unregistered.
    assert_eq!(factory.friendly_name(tag), tag);
}

#[test]
fn unknown_class_creates_nothing() {
    let factory = Arc::new(NodeFactory::new());
    let env = Env::new(factory.clone());
    assert!(factory
        .create("NoSuchClass", Uuid::new_v4(), "missing", env)
        .is_none());
}

#[test]
fn function_nodes_get_lettered_ports_and_a_return() {
    let factory = Arc::new(NodeFactory::new());
    let env = Env::new(factory.clone());

    factory.register_function("Math", "Add", add);
    let tag = NodeFactory::function_class_tag(&add);
    assert!(factory.is_registered(tag));
    assert_eq!(factory.friendly_name(tag), "Add");

    let node = factory
        .create(tag, Uuid::new_v4(), "adder", env)
        .expect("function class should construct");

    let inputs = node.input_ports();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].key().as_str(), "a");
    assert_eq!(inputs[1].key().as_str(), "b");
    assert_eq!(inputs[0].declared_type(), "i64");
    assert!(node.output_port("return").is_ok());

    // Absent inputs abort quietly.
    node.invoke_compute();
    assert!(node.output_data("return").unwrap().is_none());

    node.set_input("a", Some(DataBox::new(2i64)), false).unwrap();
    node.set_input("b", Some(DataBox::new(40i64)), true).unwrap();
    assert_eq!(node.output_value::<i64>("return").unwrap(), Some(42));
}

#[test]
fn function_inputs_convert_through_the_registry() {
    let factory = Arc::new(NodeFactory::new());
    let env = Env::new(factory.clone());

    factory.register_function("Math", "Add", add);
    let node = factory
        .create(
            NodeFactory::function_class_tag(&add),
            Uuid::new_v4(),
            "adder",
            env,
        )
        .unwrap();

    // Floats arrive on integer ports: the numeric ladder truncates them.
    node.set_input("a", Some(DataBox::new(2.9f64)), false).unwrap();
    node.set_input("b", Some(DataBox::new(1.2f64)), true).unwrap();
    assert_eq!(node.output_value::<i64>("return").unwrap(), Some(3));
}

#[test]
fn function_names_can_be_supplied() {
    let factory = Arc::new(NodeFactory::new());
    let env = Env::new(factory.clone());

    factory.register_function_named(
        "Math",
        "Add Named",
        add,
        Some(vec!["lhs".to_string(), "rhs".to_string()]),
    );
    let node = factory
        .create(
            NodeFactory::function_class_tag(&add),
            Uuid::new_v4(),
            "adder",
            env,
        )
        .unwrap();

    assert!(node.input_port("lhs").is_ok());
    assert!(node.input_port("rhs").is_ok());
}

#[test]
fn mutable_out_parameters_become_output_ports() {
    let factory = Arc::new(NodeFactory::new());
    let env = Env::new(factory.clone());

    factory.register_function("Math", "Scale", scale);
    let node = factory
        .create(
            NodeFactory::function_class_tag(&scale),
            Uuid::new_v4(),
            "scaler",
            env,
        )
        .unwrap();

    // Two value inputs, one reference output plus the return port.
    assert_eq!(node.input_ports().len(), 2);
    let out_port = node.output_port("c").unwrap();
    assert_eq!(out_port.declared_type(), "f64&");

    node.set_input("a", Some(DataBox::new(3.0f64)), false).unwrap();
    node.set_input("b", Some(DataBox::new(5.0f64)), true).unwrap();

    assert_eq!(node.output_value::<f64>("return").unwrap(), Some(15.0));
    assert_eq!(node.output_value::<f64>("c").unwrap(), Some(10.0));
}

#[test]
fn numeric_conversion_feeds_integer_sinks() {
    let factory = Arc::new(NodeFactory::new());
    let env = Env::new(factory.clone());
    let graph = fluxruntime::Graph::new("conversion", env.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let source: SharedNode = Node::new(
        Uuid::new_v4(),
        "SourceFloat",
        "source",
        env.clone(),
        Box::new(SourceFloat),
    )
    .unwrap();
    let sink: SharedNode = Node::new(
        Uuid::new_v4(),
        "SinkInt",
        "sink",
        env.clone(),
        Box::new(SinkInt { seen: seen.clone() }),
    )
    .unwrap();

    graph.add_node(source.clone());
    graph.add_node(sink.clone());
    assert!(graph.can_connect(source.id(), "out", sink.id(), "in"));
    graph.connect(source.id(), "out", sink.id(), "in").unwrap();

    graph.run();
    env.wait();

    assert_eq!(*seen.lock().unwrap(), vec![3]);
}

#[test]
fn unregistered_types_cannot_connect() {
    let factory = Arc::new(NodeFactory::new());
    let env = Env::new(factory.clone());
    let graph = fluxruntime::Graph::new("opaque", env.clone());

    let source = Node::new(
        Uuid::new_v4(),
        "OpaqueSource",
        "source",
        env.clone(),
        Box::new(OpaqueSource),
    )
    .unwrap();
    let sink = Node::new(
        Uuid::new_v4(),
        "OpaqueSink",
        "sink",
        env.clone(),
        Box::new(OpaqueSink),
    )
    .unwrap();
    graph.add_node(source.clone());
    graph.add_node(sink.clone());

    assert!(!graph.can_connect(source.id(), "out", sink.id(), "in"));
    assert!(graph
        .connect(source.id(), "out", sink.id(), "in")
        .unwrap()
        .is_none());
    assert_eq!(graph.connection_count(), 0);
}

#[test]
fn conversions_delegate_through_the_factory() {
    let factory = Arc::new(NodeFactory::new());
    let _env = Env::new(factory.clone());

    assert!(factory.is_convertible("f32", "i32"));
    assert!(factory.is_convertible("seconds", "milliseconds"));
    assert!(factory.is_convertible("anything", "any"));
    assert!(!factory.is_convertible("string", "i32"));

    let out = factory
        .convert(Some(DataBox::new(3.5f32)), "i32")
        .unwrap()
        .unwrap();
    assert_eq!(out.get::<i32>(), Some(3));
}

#[test]
fn category_handles_unregister_as_a_batch() {
    let factory = Arc::new(NodeFactory::new());

    let category = Category::new(&factory, "Test");
    category.register_class::<SourceFloat>("Source Float");
    category.register_function("Add", add);

    assert!(factory.is_registered(NodeFactory::class_tag_of::<SourceFloat>()));
    assert!(factory.is_registered(NodeFactory::function_class_tag(&add)));

    let nested = category.subcategory("Inner");
    assert_eq!(nested.name(), "Test::Inner");

    category.unregister_all();
    assert!(!factory.is_registered(NodeFactory::class_tag_of::<SourceFloat>()));
    assert!(!factory.is_registered(NodeFactory::function_class_tag(&add)));
}
