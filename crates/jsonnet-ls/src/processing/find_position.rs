//
// find_position.rs
//
// Descent from a root node to the nodes enclosing a location
//

use jsonnet_core::ast::{children, Location, LocationRange, NodeKind, NodeRef};

use crate::nodestack::NodeStack;

/// Range used for containment checks. A `SuperIndex` whose recorded end stops
/// short of its index is widened to cover it.
pub fn effective_range(node: &NodeRef) -> LocationRange {
    match &node.kind {
        NodeKind::SuperIndex { index } if index.loc.is_set() && index.loc.end > node.loc.end => {
            node.loc.to(&index.loc)
        }
        _ => node.loc.clone(),
    }
}

/// Every node whose range contains `location`, root first. Nodes without a
/// source range are not reported but their children are still searched.
pub fn find_node_by_position(root: &NodeRef, location: Location) -> Option<NodeStack> {
    let mut search = vec![root.clone()];
    let mut found = NodeStack {
        from: root.clone(),
        stack: Vec::new(),
    };

    while let Some(node) = search.pop() {
        let range = effective_range(&node);
        if range.contains(location) {
            found.push(node.clone());
        } else if range.is_set() {
            continue;
        }

        match &node.kind {
            NodeKind::DesugaredObject {
                asserts,
                fields,
                locals,
            } => {
                for field in fields {
                    search.push(field.name.clone());
                    search.push(field.body.clone());
                }
                for bind in locals {
                    search.push(bind.body.clone());
                }
                for assert in asserts {
                    search.push(assert.cond.clone());
                    if let Some(message) = &assert.message {
                        search.push(message.clone());
                    }
                }
            }
            _ => search.extend(children(&node).into_iter().cloned()),
        }
    }

    if found.is_empty() {
        log::trace!("no node at {location}");
        return None;
    }
    Some(found.reorder_desugared_objects())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonnet_core::parse;
    use proptest::prelude::*;

    fn kinds(stack: &NodeStack) -> Vec<&'static str> {
        stack.stack.iter().map(|n| n.kind_name()).collect()
    }

    #[test]
    fn test_stack_ends_at_deepest_node() {
        let root = parse("t.jsonnet", "{ local x = 'v', a: x }").unwrap();
        let stack = find_node_by_position(&root, Location::new(1, 21)).expect("cursor is inside");
        assert_eq!(kinds(&stack), vec!["DesugaredObject", "Var"]);
        assert_eq!(stack.peek().and_then(|n| n.var_id()), Some("x"));
    }

    #[test]
    fn test_index_name_is_on_top() {
        let root = parse("t.jsonnet", "local a = { b: 1 };\na.b").unwrap();
        let stack = find_node_by_position(&root, Location::new(2, 3)).expect("cursor is inside");
        assert_eq!(kinds(&stack), vec!["Local", "Index", "LiteralString"]);
    }

    #[test]
    fn test_method_field_name() {
        let root = parse("t.jsonnet", "{ f(x): x }").unwrap();
        let stack = find_node_by_position(&root, Location::new(1, 3)).expect("cursor is inside");
        assert_eq!(kinds(&stack), vec!["DesugaredObject", "LiteralString"], "the name belongs to the object");

        let stack = find_node_by_position(&root, Location::new(1, 10)).expect("cursor is inside");
        assert_eq!(kinds(&stack), vec!["DesugaredObject", "Function", "Var"]);
    }

    #[test]
    fn test_outside_returns_none() {
        let root = parse("t.jsonnet", "{ a: 1 }").unwrap();
        assert!(find_node_by_position(&root, Location::new(4, 1)).is_none());
    }

    proptest! {
        #[test]
        fn prop_stack_top_contains_position(column in 1u32..40) {
            let text = "{ local x = 1, a: [x, { b: x + 2 }], c: self.a }";
            let root = parse("t.jsonnet", text).unwrap();
            let location = Location::new(1, column);
            if let Some(stack) = find_node_by_position(&root, location) {
                let top = stack.peek().expect("stack is never empty");
                prop_assert!(effective_range(top).contains(location));
                for pair in stack.stack.windows(2) {
                    prop_assert!(pair[0].loc.contains_range(&pair[1].loc) || !pair[1].loc.is_set());
                }
            }
        }
    }
}
