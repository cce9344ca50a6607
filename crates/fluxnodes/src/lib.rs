//! Built-in node library for the flux dataflow engine.

pub mod debug;
pub mod math;
pub mod time;

pub use debug::PrintNode;
pub use time::NowNode;

use fluxruntime::NodeFactory;

/// Registers every built-in node class with the factory.
pub fn register_all(factory: &NodeFactory) {
    factory.register_class::<PrintNode>("Debug", "Print");
    math::register_math(factory);
    time::register_time(factory);
}
