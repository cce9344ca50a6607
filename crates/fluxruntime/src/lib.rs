//! Graph execution runtime for the flux dataflow engine.
//!
//! Builds on `fluxcore`: nodes with pluggable behaviors, the function
//! adapter, the node factory, graphs with pooled propagation, the shared
//! environment and the dynamic module loader.

pub mod env;
pub mod factory;
pub mod function;
pub mod graph;
pub mod module;
pub mod node;
pub mod pool;

pub use env::{Env, DEFAULT_WORKER_COUNT};
pub use factory::{Category, ConstructorFn, NodeFactory};
pub use function::{
    default_arg_names, FunctionArg, FunctionBehavior, NodeFunction, OutRef, RETURN_PORT,
};
pub use graph::{Graph, GraphEvents};
pub use module::{
    Module, ModuleEntryFn, ModuleMetadata, REGISTER_MODULE_SYMBOL, UNREGISTER_MODULE_SYMBOL,
};
pub use node::{
    restore_input_values, save_input_values, Node, NodeBehavior, NodeEvents, OutputEmit,
    PortUpdate, SharedNode,
};
pub use pool::WorkerPool;
