//
// compile.rs
//
// Evaluating a subtree on its own by capturing the bindings it uses
//

use std::collections::BTreeSet;

use anyhow::{anyhow, bail, Context};
use jsonnet_core::ast::{free_variables, Bind, Node, NodeKind, NodeRef};
use jsonnet_core::parse;

use super::find_bind::{find_binder, BinderKind};
use super::resolver::{node_id, Resolver};
use super::Scoped;

const MAX_LIFT_STEPS: usize = 64;
const MAX_ARGUMENT_DEPTH: usize = 8;

/// Names of `binds` that `node` needs, directly or through other binds.
fn needed_binds(node: &Node, binds: &[Bind]) -> BTreeSet<String> {
    let names: BTreeSet<&str> = binds.iter().map(|b| b.variable.as_str()).collect();
    let mut needed: BTreeSet<String> = free_variables(node)
        .into_iter()
        .filter(|id| names.contains(id.as_str()))
        .collect();
    loop {
        let more: Vec<String> = binds
            .iter()
            .filter(|b| needed.contains(&b.variable))
            .flat_map(|b| free_variables(&b.body))
            .filter(|id| names.contains(id.as_str()) && !needed.contains(id))
            .collect();
        if more.is_empty() {
            return needed;
        }
        needed.extend(more);
    }
}

impl Resolver<'_> {
    /// Evaluates `scoped` and parses the manifested result back into a node.
    /// Fails when a variable it uses has no known value or evaluation fails.
    pub fn compile(&mut self, scoped: &Scoped) -> anyhow::Result<NodeRef> {
        let json = self.evaluate(scoped)?;
        parse("", &json).with_context(|| format!("reparsing {json}"))
    }

    /// Manifested JSON of `scoped` evaluated on its own.
    pub fn evaluate(&mut self, scoped: &Scoped) -> anyhow::Result<String> {
        let program = self.lift(scoped, 0)?;
        let vm = self.vm_for(&scoped.filename());
        vm.evaluate_node(&program)
            .map_err(|err| anyhow!("evaluating {}: {}", scoped.node.kind_name(), err.message()))
    }

    /// `scoped.node` wrapped in locals for every variable it uses, so that it
    /// no longer depends on its ancestors.
    fn lift(&mut self, scoped: &Scoped, argument_depth: usize) -> anyhow::Result<NodeRef> {
        if argument_depth > MAX_ARGUMENT_DEPTH {
            bail!("arguments nested too deeply");
        }
        let mut node = scoped.node.clone();
        let mut chain = scoped.ancestors.clone();

        for _ in 0..MAX_LIFT_STEPS {
            let free: Vec<String> = free_variables(&node)
                .into_iter()
                .filter(|id| id != "std")
                .collect();
            if free.is_empty() {
                return Ok(node);
            }
            let Some(binder) = free
                .iter()
                .filter_map(|id| find_binder(&chain, id))
                .max_by_key(|b| b.depth)
            else {
                bail!("{} is not bound", free[0]);
            };

            match (&binder.owner.kind, binder.kind) {
                (NodeKind::Local { binds, .. }, _) | (NodeKind::DesugaredObject { locals: binds, .. }, _) => {
                    let needed = needed_binds(&node, binds);
                    let caller = self
                        .arg_scopes
                        .get(&node_id(&binder.owner))
                        .map(|(_, caller)| caller.clone());
                    let mut lifted = Vec::new();
                    for bind in binds.iter().filter(|b| needed.contains(&b.variable)) {
                        let body = match &caller {
                            // call arguments belong to the caller's scope
                            Some(caller) => {
                                let argument = Scoped {
                                    node: bind.body.clone(),
                                    ancestors: caller.clone(),
                                };
                                self.lift(&argument, argument_depth + 1)?
                            }
                            None => bind.body.clone(),
                        };
                        lifted.push(Bind {
                            body,
                            ..bind.clone()
                        });
                    }
                    node = Node::synthetic(NodeKind::Local {
                        binds: lifted,
                        body: node,
                    });
                    chain.truncate(binder.depth);
                }
                (NodeKind::Function { .. }, BinderKind::Parameter) => {
                    let Some(default) = binder.body.clone() else {
                        bail!("parameter {} has no value here", binder.name);
                    };
                    node = Node::synthetic(NodeKind::Local {
                        binds: vec![Bind {
                            variable: binder.name.clone(),
                            variable_loc: binder.name_loc.clone(),
                            body: default,
                            loc: binder.loc.clone(),
                        }],
                        body: node,
                    });
                    // defaults may use the other parameters
                    chain.truncate(binder.depth + 1);
                }
                _ => bail!("{} is bound by a comprehension", binder.name),
            }
        }
        bail!("too many bindings to capture")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::document_cache::DocumentCache;
    use crate::processing::find_position::find_node_by_position;
    use jsonnet_core::ast::Location;

    fn compile_at(text: &str, line: u32, column: u32) -> anyhow::Result<NodeRef> {
        let cache = DocumentCache::new();
        let config = Configuration::default();
        let mut resolver = Resolver::new(&cache, &config);
        let root = parse("t.jsonnet", text).expect("fixture should parse");
        let stack = find_node_by_position(&root, Location::new(line, column))
            .expect("position should be inside the document");
        resolver.compile(&Scoped::from_stack(&stack).unwrap())
    }

    #[test]
    fn test_compile_with_captured_locals() {
        let node = compile_at("local a = 2, b = a * 3; { x: b }", 1, 30).unwrap();
        assert!(matches!(node.kind, NodeKind::LiteralNumber { value, .. } if value == 6.0));
    }

    #[test]
    fn test_compile_uses_parameter_defaults() {
        let node = compile_at("function(n=4) n + 1", 1, 15).unwrap();
        assert!(matches!(node.kind, NodeKind::LiteralNumber { value, .. } if value == 4.0));
    }

    #[test]
    fn test_compile_fails_for_unknown_parameter() {
        let err = compile_at("function(n) n + 1", 1, 13).unwrap_err();
        assert!(err.to_string().contains("parameter n"), "unexpected error: {err}");
    }

    #[test]
    fn test_compile_std_call() {
        let node = compile_at("local xs = [3, 1]; std.sort(xs)", 1, 28).unwrap();
        assert_eq!(node.kind_name(), "Array");
    }

    #[test]
    fn test_unneeded_binds_are_not_captured() {
        // `bad` refers to a parameter that has no value but is never used
        let node = compile_at("function(p) local bad = p, ok = 'v'; ok", 1, 38).unwrap();
        assert_eq!(node.as_string(), Some("v"));
    }
}
