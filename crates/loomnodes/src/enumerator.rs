use async_trait::async_trait;
use loomcore::{EnumeratorCursor, Node, NodeContext, NodeError, NodeLinks, WorkflowAction};
use loomruntime::{NodeFactory, NodeInfo};
use serde_json::Value;

/// Enumerates an array input, one loop-body iteration per element.
///
/// `first` yields the cursor for index 0 (or an immediate `eof` for an
/// empty source); `next` advances by exactly one. Advancing from an index
/// at or past the end of the source is a defect in the calling
/// configuration and surfaces as [`NodeError::CursorOutOfRange`].
pub struct ItemsLoopNode;

impl ItemsLoopNode {
    fn items(ctx: &NodeContext) -> Result<Vec<Value>, NodeError> {
        match ctx.require_input("items")? {
            Value::Array(items) => Ok(items.clone()),
            _ => Err(NodeError::InvalidInputType {
                field: "items".to_string(),
                expected: "array".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Node for ItemsLoopNode {
    fn kind(&self) -> &str {
        "loop.items"
    }

    fn links(&self) -> NodeLinks {
        NodeLinks::enumerator()
    }

    async fn first(&self, ctx: NodeContext) -> Result<EnumeratorCursor, NodeError> {
        let items = Self::items(&ctx)?;
        match items.into_iter().next() {
            Some(item) => Ok(EnumeratorCursor::item(0, item)),
            None => Ok(EnumeratorCursor::end(0)),
        }
    }

    async fn next(&self, ctx: NodeContext, prev: u64) -> Result<EnumeratorCursor, NodeError> {
        let items = Self::items(&ctx)?;
        let len = items.len() as u64;
        if prev >= len {
            return Err(NodeError::CursorOutOfRange { index: prev, len });
        }
        let current = prev + 1;
        match items.get(current as usize) {
            Some(item) => Ok(EnumeratorCursor::item(current, item.clone())),
            None => Ok(EnumeratorCursor::end(current)),
        }
    }
}

pub struct ItemsLoopNodeFactory;

impl NodeFactory for ItemsLoopNodeFactory {
    fn create(&self, _action: &WorkflowAction) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ItemsLoopNode))
    }

    fn kind(&self) -> &str {
        "loop.items"
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            description: "Iterate the loop body over an array input".to_string(),
            category: "loop".to_string(),
        }
    }
}
