use fluxcore::{Result, ANY_TAG};
use fluxruntime::{Node, NodeBehavior};

/// Logs whatever arrives on its input and passes it through unchanged.
#[derive(Default)]
pub struct PrintNode;

impl NodeBehavior for PrintNode {
    fn setup(&mut self, node: &Node) -> Result<()> {
        node.add_input("in", "Value", ANY_TAG, None)?;
        node.add_output("out", "Value", ANY_TAG, None)?;
        Ok(())
    }

    fn compute(&mut self, node: &Node) -> Result<()> {
        if let Some(data) = node.input_data("in")? {
            tracing::info!(node = %node.name(), value = %data, "print");
            node.set_output("out", Some(data), true)?;
        }
        Ok(())
    }
}
