//
// nodetree.rs
//
// Owned tree view of an AST for pre-order walks
//

use jsonnet_core::ast::{children, Node, NodeRef};

#[derive(Debug, Clone)]
pub struct NodeTree {
    pub node: NodeRef,
    pub children: Vec<NodeTree>,
}

pub fn build_tree(node: &NodeRef) -> NodeTree {
    NodeTree {
        node: node.clone(),
        children: children(node).into_iter().map(build_tree).collect(),
    }
}

impl NodeTree {
    /// Every node, parents before children.
    pub fn all_children(&self) -> Vec<NodeRef> {
        let mut out = Vec::new();
        self.collect_all(&mut out);
        out
    }

    fn collect_all(&self, out: &mut Vec<NodeRef>) {
        out.push(self.node.clone());
        for child in &self.children {
            child.collect_all(out);
        }
    }

    pub fn deepest_nodes(&self) -> Vec<NodeRef> {
        if self.children.is_empty() {
            return vec![self.node.clone()];
        }
        self.children.iter().flat_map(|c| c.deepest_nodes()).collect()
    }

    /// Outermost nodes matching `pred`; matches are not searched further.
    pub fn top_nodes_of_kind(&self, pred: &dyn Fn(&Node) -> bool) -> Vec<NodeRef> {
        if pred(&self.node) {
            return vec![self.node.clone()];
        }
        self.children
            .iter()
            .flat_map(|c| c.top_nodes_of_kind(pred))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonnet_core::ast::NodeKind;
    use jsonnet_core::parse;

    #[test]
    fn test_all_children_is_preorder() {
        let root = parse("t.jsonnet", "[1, [2]]").unwrap();
        let kinds: Vec<&str> = build_tree(&root)
            .all_children()
            .iter()
            .map(|n| n.kind_name())
            .collect();
        assert_eq!(kinds, vec!["Array", "LiteralNumber", "Array", "LiteralNumber"]);
    }

    #[test]
    fn test_deepest_nodes() {
        let root = parse("t.jsonnet", "[1, [2]]").unwrap();
        assert_eq!(build_tree(&root).deepest_nodes().len(), 2);
    }

    #[test]
    fn test_top_nodes_stop_at_match() {
        let root = parse("t.jsonnet", "a.b.c + d.e").unwrap();
        let tops = build_tree(&root)
            .top_nodes_of_kind(&|n| matches!(n.kind, NodeKind::Index { .. }));
        assert_eq!(tops.len(), 2, "nested indexes should not be reported");
    }
}
