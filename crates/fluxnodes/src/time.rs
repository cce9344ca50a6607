//! Clock and duration nodes.

use fluxcore::data::{Milliseconds, Seconds, TimeSpan, TimeUnit};
use fluxcore::{DataBox, Result};
use fluxruntime::{Node, NodeBehavior, NodeFactory};

/// Emits the current UTC timestamp as an RFC 3339 string.
#[derive(Default)]
pub struct NowNode;

impl NodeBehavior for NowNode {
    fn setup(&mut self, node: &Node) -> Result<()> {
        node.add_output_of::<String>("timestamp", "Current time", None)?;
        Ok(())
    }

    fn compute(&mut self, node: &Node) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        node.set_output("timestamp", Some(DataBox::new(now)), true)
    }
}

pub fn to_seconds(value: Milliseconds) -> Seconds {
    Seconds(TimeSpan::new(value.0, TimeUnit::Milliseconds).cast(TimeUnit::Seconds).count)
}

pub fn register_time(factory: &NodeFactory) {
    factory.register_class::<NowNode>("Time", "Now");
    factory.register_function("Time", "To Seconds", to_seconds);
}
