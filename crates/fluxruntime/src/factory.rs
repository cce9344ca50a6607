//! Registry of node classes and the conversions between port types.

use crate::env::Env;
use crate::function::{FunctionBehavior, NodeFunction};
use crate::node::{Node, NodeBehavior, SharedNode};
use fluxcore::{EventDispatcher, Result, SharedData, TypeRegistry, Uuid};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Builds one node instance for a registered class.
pub type ConstructorFn = Arc<dyn Fn(Uuid, &str, Arc<Env>) -> Result<SharedNode> + Send + Sync>;

/// Factory for building nodes.
///
/// Classes are keyed by tag, grouped into categories for presentation, and
/// given a friendly display name. The factory also owns the type registry
/// consulted whenever data crosses a connection.
#[derive(Default)]
pub struct NodeFactory {
    constructors: RwLock<HashMap<String, ConstructorFn>>,
    categories: RwLock<HashMap<String, BTreeSet<String>>>,
    friendly_names: RwLock<HashMap<String, String>>,
    registry: TypeRegistry,
    pub on_class_registered: EventDispatcher<String>,
    pub on_class_unregistered: EventDispatcher<String>,
}

impl NodeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The class tag a behavior type registers under.
    pub fn class_tag_of<B: 'static>() -> &'static str {
        std::any::type_name::<B>()
    }

    /// The class tag a function registers under.
    pub fn function_class_tag<F: 'static>(_func: &F) -> &'static str {
        std::any::type_name::<F>()
    }

    /// Registers a default-constructible behavior under a category.
    pub fn register_class<B>(&self, category: &str, friendly_name: &str)
    where
        B: NodeBehavior + Default,
    {
        self.register_class_with::<B, _>(category, friendly_name, B::default);
    }

    /// Registers a behavior built by a custom constructor, for behaviors that
    /// carry state or capture shared handles.
    pub fn register_class_with<B, M>(&self, category: &str, friendly_name: &str, maker: M)
    where
        B: NodeBehavior,
        M: Fn() -> B + Send + Sync + 'static,
    {
        let tag = Self::class_tag_of::<B>();
        let constructor: ConstructorFn =
            Arc::new(move |id, name, env| Node::new(id, tag, name, env, Box::new(maker())));
        self.register_constructor(tag, category, friendly_name, constructor);
    }

    /// Registers a function as a node class with ports named `a`, `b`, `c`, …
    pub fn register_function<F, Args>(&self, category: &str, friendly_name: &str, func: F)
    where
        F: NodeFunction<Args> + Clone,
        Args: Send + 'static,
    {
        self.register_function_named(category, friendly_name, func, None);
    }

    /// Registers a function with explicit argument names.
    pub fn register_function_named<F, Args>(
        &self,
        category: &str,
        friendly_name: &str,
        func: F,
        arg_names: Option<Vec<String>>,
    ) where
        F: NodeFunction<Args> + Clone,
        Args: Send + 'static,
    {
        let tag = std::any::type_name::<F>();
        let constructor: ConstructorFn = Arc::new(move |id, name, env| {
            Node::new(
                id,
                tag,
                name,
                env,
                Box::new(FunctionBehavior::new(func.clone(), arg_names.clone())),
            )
        });
        self.register_constructor(tag, category, friendly_name, constructor);
    }

    /// Registers a raw constructor under a class tag.
    pub fn register_constructor(
        &self,
        class_tag: &str,
        category: &str,
        friendly_name: &str,
        constructor: ConstructorFn,
    ) {
        self.constructors
            .write()
            .unwrap()
            .insert(class_tag.to_string(), constructor);
        self.categories
            .write()
            .unwrap()
            .entry(category.to_string())
            .or_default()
            .insert(class_tag.to_string());
        self.friendly_names
            .write()
            .unwrap()
            .insert(class_tag.to_string(), friendly_name.to_string());

        tracing::debug!(class = class_tag, category, "registered node class");
        self.on_class_registered.broadcast(&class_tag.to_string());
    }

    /// Unregisters a behavior's class.
    pub fn unregister_class<B: NodeBehavior>(&self, category: &str) {
        self.unregister_class_tag(Self::class_tag_of::<B>(), category);
    }

    /// Unregisters a class tag: constructor, friendly name and category entry.
    pub fn unregister_class_tag(&self, class_tag: &str, category: &str) {
        self.constructors.write().unwrap().remove(class_tag);
        self.friendly_names.write().unwrap().remove(class_tag);

        let mut categories = self.categories.write().unwrap();
        if let Some(members) = categories.get_mut(category) {
            members.remove(class_tag);
            if members.is_empty() {
                categories.remove(category);
            }
        }
        drop(categories);

        tracing::debug!(class = class_tag, category, "unregistered node class");
        self.on_class_unregistered.broadcast(&class_tag.to_string());
    }

    /// Builds a node of a registered class, or `None` for an unknown tag.
    pub fn create(
        &self,
        class_tag: &str,
        id: Uuid,
        name: &str,
        env: Arc<Env>,
    ) -> Option<SharedNode> {
        let constructor = self.constructors.read().unwrap().get(class_tag).cloned();
        let Some(constructor) = constructor else {
            tracing::error!(class = class_tag, "no constructor for node class");
            return None;
        };

        match constructor(id, name, env) {
            Ok(node) => Some(node),
            Err(error) => {
                tracing::error!(class = class_tag, %error, "node construction failed");
                None
            }
        }
    }

    pub fn is_registered(&self, class_tag: &str) -> bool {
        self.constructors.read().unwrap().contains_key(class_tag)
    }

    /// Snapshot of the category map.
    pub fn categories(&self) -> HashMap<String, Vec<String>> {
        self.categories
            .read()
            .unwrap()
            .iter()
            .map(|(category, members)| {
                (category.clone(), members.iter().cloned().collect())
            })
            .collect()
    }

    /// The display name for a class, falling back to the tag itself.
    pub fn friendly_name(&self, class_tag: &str) -> String {
        self.friendly_names
            .read()
            .unwrap()
            .get(class_tag)
            .cloned()
            .unwrap_or_else(|| class_tag.to_string())
    }

    pub fn type_registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn convert(&self, data: Option<SharedData>, to_type: &str) -> Result<Option<SharedData>> {
        self.registry.convert(data, to_type)
    }

    pub fn is_convertible(&self, from: &str, to: &str) -> bool {
        self.registry.is_convertible(from, to)
    }
}

/// Groups registrations under one category name so they can be unregistered
/// as a batch.
pub struct Category {
    factory: Weak<NodeFactory>,
    name: String,
    registered: Mutex<Vec<String>>,
}

impl Category {
    pub fn new(factory: &Arc<NodeFactory>, name: impl Into<String>) -> Self {
        Self {
            factory: Arc::downgrade(factory),
            name: name.into(),
            registered: Mutex::new(Vec::new()),
        }
    }

    /// A nested category, named `parent::child`.
    pub fn subcategory(&self, name: &str) -> Self {
        Self {
            factory: self.factory.clone(),
            name: format!("{}::{}", self.name, name),
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> Option<Arc<NodeFactory>> {
        self.factory.upgrade()
    }

    pub fn register_class<B>(&self, friendly_name: &str)
    where
        B: NodeBehavior + Default,
    {
        if let Some(factory) = self.factory.upgrade() {
            factory.register_class::<B>(&self.name, friendly_name);
            self.registered
                .lock()
                .unwrap()
                .push(NodeFactory::class_tag_of::<B>().to_string());
        }
    }

    pub fn register_function<F, Args>(&self, friendly_name: &str, func: F)
    where
        F: NodeFunction<Args> + Clone,
        Args: Send + 'static,
    {
        if let Some(factory) = self.factory.upgrade() {
            let tag = NodeFactory::function_class_tag(&func);
            factory.register_function(&self.name, friendly_name, func);
            self.registered.lock().unwrap().push(tag.to_string());
        }
    }

    /// Unregisters everything registered through this handle.
    pub fn unregister_all(&self) {
        let Some(factory) = self.factory.upgrade() else {
            return;
        };
        for tag in self.registered.lock().unwrap().drain(..) {
            factory.unregister_class_tag(&tag, &self.name);
        }
    }
}
