//
// processing/mod.rs
//
// Symbol resolution over the desugared AST
//

pub mod compile;
pub mod definition;
pub mod find_bind;
pub mod find_position;
pub mod resolver;
pub mod top_level_objects;

use jsonnet_core::ast::NodeRef;

use crate::nodestack::NodeStack;

pub use definition::Definition;
pub use find_bind::{find_binder, Binder, BinderKind};
pub use find_position::find_node_by_position;
pub use resolver::{IndexKey, ObjectRange, Resolver};

/// A node together with the nodes enclosing it, root first. The enclosing
/// nodes decide which bindings are visible from the node.
#[derive(Debug, Clone)]
pub struct Scoped {
    pub node: NodeRef,
    pub ancestors: Vec<NodeRef>,
}

impl Scoped {
    pub fn root(node: NodeRef) -> Self {
        Self {
            node,
            ancestors: Vec::new(),
        }
    }

    /// The top of `stack` scoped by the nodes below it.
    pub fn from_stack(stack: &NodeStack) -> Option<Self> {
        let (node, ancestors) = stack.stack.split_last()?;
        Some(Self {
            node: node.clone(),
            ancestors: ancestors.to_vec(),
        })
    }

    pub fn from_chain(chain: &[NodeRef]) -> Option<Self> {
        let (node, ancestors) = chain.split_last()?;
        Some(Self {
            node: node.clone(),
            ancestors: ancestors.to_vec(),
        })
    }

    pub fn child(&self, node: &NodeRef) -> Self {
        Self {
            node: node.clone(),
            ancestors: self.chain(),
        }
    }

    /// Ancestors followed by the node itself.
    pub fn chain(&self) -> Vec<NodeRef> {
        let mut chain = self.ancestors.clone();
        chain.push(self.node.clone());
        chain
    }

    /// File of the nearest node with a source location.
    pub fn filename(&self) -> String {
        std::iter::once(&self.node)
            .chain(self.ancestors.iter().rev())
            .map(|n| n.loc.file.to_string())
            .find(|f| !f.is_empty())
            .unwrap_or_default()
    }

    /// Identity of this node in this scope.
    pub(crate) fn key(&self) -> (usize, usize) {
        let parent = self
            .ancestors
            .last()
            .map(|n| std::sync::Arc::as_ptr(n) as usize)
            .unwrap_or(0);
        (std::sync::Arc::as_ptr(&self.node) as usize, parent)
    }
}
