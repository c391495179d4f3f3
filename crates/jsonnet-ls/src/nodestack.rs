//
// nodestack.rs
//
// Ordered ancestor path from a root node to the node under the cursor
//

use jsonnet_core::ast::{Node, NodeKind, NodeRef};

#[derive(Debug, Clone)]
pub struct NodeStack {
    pub from: NodeRef,
    pub stack: Vec<NodeRef>,
}

impl NodeStack {
    pub fn new(from: NodeRef) -> Self {
        Self {
            stack: vec![from.clone()],
            from,
        }
    }

    /// Stack over `chain`, anchored at its first node.
    pub fn from_chain(chain: &[NodeRef]) -> Option<Self> {
        Some(Self {
            from: chain.first()?.clone(),
            stack: chain.to_vec(),
        })
    }

    pub fn push(&mut self, node: NodeRef) {
        self.stack.push(node);
    }

    pub fn pop(&mut self) -> Option<NodeRef> {
        self.stack.pop()
    }

    pub fn pop_front(&mut self) -> Option<NodeRef> {
        if self.stack.is_empty() {
            return None;
        }
        Some(self.stack.remove(0))
    }

    pub fn peek(&self) -> Option<&NodeRef> {
        self.stack.last()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Nearest node (from the top) matching `pred`, with its index.
    pub fn find_next(&self, pred: impl Fn(&Node) -> bool) -> Option<(NodeRef, usize)> {
        let last = self.stack.len().checked_sub(1)?;
        self.find_next_from_index(pred, last)
    }

    /// Like [`find_next`](Self::find_next) but scanning down from `index`.
    pub fn find_next_from_index(
        &self,
        pred: impl Fn(&Node) -> bool,
        index: usize,
    ) -> Option<(NodeRef, usize)> {
        if index >= self.stack.len() {
            return None;
        }
        (0..=index)
            .rev()
            .find(|i| pred(&self.stack[*i]))
            .map(|i| (self.stack[i].clone(), i))
    }

    /// Flattens the chain of indexes rooted at the top of the stack into
    /// names, outermost target first. `a.b.c` yields `["a", "b", "c"]`.
    pub fn build_index_list(mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(current) = self.pop() {
            match &current.kind {
                NodeKind::Apply { target, .. } => self.push(target.clone()),
                NodeKind::SuperIndex { index } => {
                    self.push(index.clone());
                    out.push("super".to_string());
                }
                NodeKind::Index { target, index } => {
                    self.push(index.clone());
                    self.push(target.clone());
                }
                NodeKind::LiteralString(value) => out.push(value.clone()),
                NodeKind::Self_ => out.push("self".to_string()),
                NodeKind::Var { id } => out.push(id.clone()),
                NodeKind::Dollar => out.push("$".to_string()),
                NodeKind::Import { file } => out.push(file.clone()),
                _ => {}
            }
        }
        out
    }

    /// Stable reorder moving an object above any object it strictly encloses
    /// (starts on an earlier line and ends on a later one).
    pub fn reorder_desugared_objects(mut self) -> Self {
        let is_object = |n: &Node| matches!(n.kind, NodeKind::DesugaredObject { .. });
        // Insertion sort keeps equal elements in place, matching a stable sort
        // with this (non-total) comparator.
        for i in 1..self.stack.len() {
            let mut j = i;
            while j > 0 {
                let (a, b) = (&self.stack[j], &self.stack[j - 1]);
                let before = (is_object(a) || is_object(b))
                    && a.loc.begin.line < b.loc.begin.line
                    && a.loc.end.line > b.loc.end.line;
                if !before {
                    break;
                }
                self.stack.swap(j, j - 1);
                j -= 1;
            }
        }
        self
    }

    pub fn describe(&self) -> String {
        self.stack
            .iter()
            .rev()
            .map(|n| match &n.kind {
                NodeKind::LiteralString(s) => format!("{} {s}", n.kind_name()),
                NodeKind::Var { id } => format!("{} {id}", n.kind_name()),
                NodeKind::Index { index, .. } => match index.as_string() {
                    Some(s) => format!("{} {s}", n.kind_name()),
                    None => n.kind_name().to_string(),
                },
                _ => n.kind_name().to_string(),
            })
            .collect::<Vec<_>>()
            .join(" <- ")
    }
}

/// Path of nodes from `root` down to `target` (inclusive), matched by identity.
pub fn path_to(root: &NodeRef, target: &NodeRef) -> Option<NodeStack> {
    fn walk(node: &NodeRef, target: &NodeRef, path: &mut Vec<NodeRef>) -> bool {
        path.push(node.clone());
        if Node::same(node, target) {
            return true;
        }
        for child in jsonnet_core::ast::children(node) {
            if walk(child, target, path) {
                return true;
            }
        }
        path.pop();
        false
    }
    let mut path = Vec::new();
    if !walk(root, target, &mut path) {
        return None;
    }
    Some(NodeStack {
        from: root.clone(),
        stack: path,
    })
}
