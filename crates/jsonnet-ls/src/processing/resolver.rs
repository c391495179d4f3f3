//
// resolver.rs
//
// Following variables, indexes, merges, imports and calls to the values
// they denote
//

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use jsonnet_core::ast::{is_identifier, BinaryOp, Bind, Field, Hide, LocationRange, Node, NodeKind, NodeRef};
use jsonnet_core::Vm;

use super::find_bind::{find_binder, Binder};
use super::Scoped;
use crate::config::Configuration;
use crate::document_cache::DocumentCache;
use crate::nodestack::NodeStack;
use crate::vm::make_vm;

/// Resolution gives up past this many nested steps.
const MAX_DEPTH: usize = 64;

/// A field of an object a path resolved to.
#[derive(Debug, Clone)]
pub struct ObjectRange {
    pub filename: String,
    pub field_name: String,
    /// The field name.
    pub selection_range: LocationRange,
    /// The whole field.
    pub full_range: LocationRange,
    pub hide: Hide,
    pub body: Scoped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    Field(String),
    Element(usize),
}

pub(crate) fn node_id(node: &NodeRef) -> usize {
    Arc::as_ptr(node) as usize
}

fn is_object(node: &Node) -> bool {
    matches!(node.kind, NodeKind::DesugaredObject { .. })
}

fn is_merge(node: &Node) -> bool {
    matches!(
        node.kind,
        NodeKind::Binary {
            op: BinaryOp::Plus,
            ..
        }
    )
}

/// Resolution state for one request. Evaluators are created per file on
/// first use and call arguments are remembered for the whole request.
pub struct Resolver<'a> {
    pub(crate) cache: &'a DocumentCache,
    pub(crate) config: &'a Configuration,
    vms: HashMap<String, Arc<Vm>>,
    /// Locals standing for call arguments, with the scope of the call.
    pub(crate) arg_scopes: HashMap<usize, (NodeRef, Vec<NodeRef>)>,
    active: HashSet<(usize, usize)>,
    pub(crate) importing: HashSet<PathBuf>,
    /// Imports skipped so far because they were already being resolved.
    pub(crate) cycle_cuts: usize,
    depth: usize,
}

impl std::fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl<'a> Resolver<'a> {
    pub fn new(cache: &'a DocumentCache, config: &'a Configuration) -> Self {
        Self {
            cache,
            config,
            vms: HashMap::new(),
            arg_scopes: HashMap::new(),
            active: HashSet::new(),
            importing: HashSet::new(),
            cycle_cuts: 0,
            depth: 0,
        }
    }

    pub fn vm_for(&mut self, file: &str) -> Arc<Vm> {
        let config = self.config;
        self.vms
            .entry(file.to_string())
            .or_insert_with(|| Arc::new(make_vm(config, Path::new(file))))
            .clone()
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Values `scoped` may evaluate to, base first for merges. Locals,
    /// variables, indexes, imports, calls and conditionals are followed;
    /// anything else is returned as is.
    pub fn resolve_values(&mut self, scoped: &Scoped) -> Vec<Scoped> {
        if self.depth >= MAX_DEPTH {
            log::debug!("resolution depth exceeded at {}", scoped.node.loc);
            return Vec::new();
        }
        let key = scoped.key();
        if !self.active.insert(key) {
            log::trace!("cycle at {} {}", scoped.node.kind_name(), scoped.node.loc);
            return Vec::new();
        }
        self.depth += 1;
        let values = self.resolve_values_inner(scoped);
        self.depth -= 1;
        self.active.remove(&key);
        values
    }

    fn resolve_values_inner(&mut self, scoped: &Scoped) -> Vec<Scoped> {
        match &scoped.node.kind {
            NodeKind::Local { body, .. } => self.resolve_values(&scoped.child(body)),
            NodeKind::Assert { rest, .. } => self.resolve_values(&scoped.child(rest)),
            NodeKind::Var { id } => {
                let chain = scoped.chain();
                match find_binder(&chain, id).and_then(|b| self.binder_value(&chain, &b)) {
                    Some(value) => self.resolve_values(&value),
                    None => {
                        log::trace!("no value bound to {id}");
                        Vec::new()
                    }
                }
            }
            NodeKind::Binary {
                left,
                op: BinaryOp::Plus,
                right,
            } => {
                let mut values = self.resolve_values(&scoped.child(left));
                values.extend(self.resolve_values(&scoped.child(right)));
                values
            }
            NodeKind::Conditional {
                cond,
                branch_true,
                branch_false,
            } => {
                let branches = self.conditional_branches(scoped, cond, branch_true, branch_false);
                branches
                    .iter()
                    .flat_map(|branch| self.resolve_values(branch))
                    .collect()
            }
            NodeKind::Import { file } => self.import_values(&scoped.node.loc.file, file),
            NodeKind::Index { target, index } => {
                if self.is_std(&scoped.child(target)) {
                    return self.compiled_values(scoped);
                }
                let Some(key) = self.index_key(scoped, index) else {
                    return Vec::new();
                };
                let containers = self.resolve_values(&scoped.child(target));
                self.select(&containers, &key)
                    .iter()
                    .flat_map(|selected| self.resolve_values(selected))
                    .collect()
            }
            NodeKind::SuperIndex { index } => {
                let Some(key) = self.index_key(scoped, index) else {
                    return Vec::new();
                };
                let containers = self.super_objects(&scoped.ancestors);
                self.select(&containers, &key)
                    .iter()
                    .flat_map(|selected| self.resolve_values(selected))
                    .collect()
            }
            NodeKind::Self_ => self.self_objects(&scoped.ancestors),
            NodeKind::Dollar => self.dollar_objects(&scoped.ancestors),
            NodeKind::Apply {
                target,
                positional,
                named,
                ..
            } => {
                let target = scoped.child(target);
                if matches!(target.node.kind, NodeKind::Index { .. })
                    && self.is_std_member(&target)
                {
                    return self.compiled_values(scoped);
                }
                let mut values = Vec::new();
                for function in self.resolve_values(&target) {
                    if let Some(body) = self.enter_call(&function, scoped, positional, named) {
                        values.extend(self.resolve_values(&body));
                    }
                }
                values
            }
            NodeKind::ObjectComp { .. } => match self.compile(scoped) {
                Ok(node) => vec![Scoped::root(node)],
                Err(err) => {
                    log::debug!("object comprehension left opaque: {err:#}");
                    vec![scoped.clone()]
                }
            },
            NodeKind::Error { .. } => Vec::new(),
            _ => vec![scoped.clone()],
        }
    }

    /// Objects among the values of `scoped`.
    pub fn resolve_objects(&mut self, scoped: &Scoped) -> Vec<Scoped> {
        self.resolve_values(scoped)
            .into_iter()
            .filter(|v| is_object(&v.node))
            .collect()
    }

    /// The bound expression of `binder` in the scope it is evaluated in.
    pub fn binder_value(&self, chain: &[NodeRef], binder: &Binder) -> Option<Scoped> {
        let body = binder.body.clone()?;
        if let Some((_, caller)) = self.arg_scopes.get(&node_id(&binder.owner)) {
            return Some(Scoped {
                node: body,
                ancestors: caller.clone(),
            });
        }
        Some(Scoped {
            node: body,
            ancestors: chain.get(..=binder.depth)?.to_vec(),
        })
    }

    fn compiled_values(&mut self, scoped: &Scoped) -> Vec<Scoped> {
        match self.compile(scoped) {
            Ok(node) => vec![Scoped::root(node)],
            Err(err) => {
                log::debug!("could not evaluate {}: {err:#}", scoped.node.kind_name());
                Vec::new()
            }
        }
    }

    /// Whether `scoped` is the unshadowed `std` variable.
    pub fn is_std(&self, scoped: &Scoped) -> bool {
        scoped.node.var_id() == Some("std") && find_binder(&scoped.chain(), "std").is_none()
    }

    /// Whether `scoped` is an index into the standard library.
    pub fn is_std_member(&self, scoped: &Scoped) -> bool {
        match &scoped.node.kind {
            NodeKind::Index { target, .. } => self.is_std(&scoped.child(target)),
            _ => false,
        }
    }

    // ========================================================================
    // Conditionals and calls
    // ========================================================================

    /// Branches a conditional can take: the one its condition folds to, or
    /// both when the condition cannot be evaluated.
    fn conditional_branches(
        &mut self,
        scoped: &Scoped,
        cond: &NodeRef,
        branch_true: &NodeRef,
        branch_false: &NodeRef,
    ) -> Vec<Scoped> {
        let both = vec![scoped.child(branch_true), scoped.child(branch_false)];
        match self.compile(&scoped.child(cond)) {
            Ok(node) => match node.kind {
                NodeKind::LiteralBoolean(true) => vec![scoped.child(branch_true)],
                NodeKind::LiteralBoolean(false) => vec![scoped.child(branch_false)],
                _ => both,
            },
            Err(err) if self.config.workarounds.assume_true_condition_on_error => {
                log::debug!("assuming true condition: {err:#}");
                vec![scoped.child(branch_true)]
            }
            Err(err) => {
                log::debug!("condition left open: {err:#}");
                both
            }
        }
    }

    /// Body of `function` with the call's arguments bound in front of it.
    fn enter_call(
        &mut self,
        function: &Scoped,
        call: &Scoped,
        positional: &[NodeRef],
        named: &[jsonnet_core::ast::NamedArg],
    ) -> Option<Scoped> {
        let NodeKind::Function { params, body } = &function.node.kind else {
            return None;
        };
        let mut binds: Vec<Bind> = params
            .iter()
            .zip(positional)
            .map(|(param, arg)| Bind {
                variable: param.name.clone(),
                variable_loc: param.loc.clone(),
                body: arg.clone(),
                loc: arg.loc.clone(),
            })
            .collect();
        binds.extend(named.iter().map(|arg| Bind {
            variable: arg.name.clone(),
            variable_loc: arg.loc.clone(),
            body: arg.arg.clone(),
            loc: arg.loc.clone(),
        }));

        let mut ancestors = function.chain();
        if !binds.is_empty() {
            let arguments = Node::synthetic(NodeKind::Local {
                binds,
                body: body.clone(),
            });
            self.arg_scopes
                .insert(node_id(&arguments), (arguments.clone(), call.chain()));
            ancestors.push(arguments);
        }
        Some(Scoped {
            node: body.clone(),
            ancestors,
        })
    }

    /// The function `scoped` (an `Apply` target) refers to, if it can be found.
    pub fn resolve_function(&mut self, scoped: &Scoped) -> Option<Scoped> {
        self.resolve_values(scoped)
            .into_iter()
            .find(|v| matches!(v.node.kind, NodeKind::Function { .. }))
    }

    // ========================================================================
    // Objects and fields
    // ========================================================================

    /// Objects `self` refers to from the innermost object in `chain`. Merges
    /// the object is directly part of contribute their other operands.
    pub fn self_objects(&mut self, chain: &[NodeRef]) -> Vec<Scoped> {
        let Some((_, mut index)) = NodeStack::from_chain(chain).and_then(|s| s.find_next(is_object)) else {
            return Vec::new();
        };
        while index > 0 && is_merge(&chain[index - 1]) {
            index -= 1;
        }
        let whole = Scoped {
            node: chain[index].clone(),
            ancestors: chain[..index].to_vec(),
        };
        self.resolve_objects(&whole)
    }

    /// Objects `super` refers to: the left operand of the merge whose right
    /// operand is the innermost object in `chain`.
    pub fn super_objects(&mut self, chain: &[NodeRef]) -> Vec<Scoped> {
        let Some((object, index)) = NodeStack::from_chain(chain).and_then(|s| s.find_next(is_object)) else {
            return Vec::new();
        };
        let Some(parent) = index.checked_sub(1).map(|i| &chain[i]) else {
            return Vec::new();
        };
        match &parent.kind {
            NodeKind::Binary {
                left,
                op: BinaryOp::Plus,
                right,
            } if Node::same(right, &object) => {
                let left = Scoped {
                    node: left.clone(),
                    ancestors: chain[..index].to_vec(),
                };
                self.resolve_objects(&left)
            }
            _ => Vec::new(),
        }
    }

    /// Objects `$` refers to: the outermost object or merge in `chain`.
    pub fn dollar_objects(&mut self, chain: &[NodeRef]) -> Vec<Scoped> {
        let Some(mut stack) = NodeStack::from_chain(chain) else {
            return Vec::new();
        };
        let mut ancestors = Vec::new();
        while let Some(node) = stack.pop_front() {
            if is_object(&node) || is_merge(&node) {
                return self.resolve_objects(&Scoped { node, ancestors });
            }
            ancestors.push(node);
        }
        log::debug!("no object for $");
        Vec::new()
    }

    /// Name of `field` of `object`. Computed names are evaluated in the scope
    /// around the object; names that do not evaluate to a string are `None`.
    pub fn field_name(&mut self, object: &Scoped, field: &Field) -> Option<String> {
        if let Some(name) = field.name.as_string() {
            return Some(name.to_string());
        }
        let name = Scoped {
            node: field.name.clone(),
            ancestors: object.ancestors.clone(),
        };
        match self.compile(&name) {
            Ok(node) => node.as_string().map(String::from),
            Err(err) => {
                log::trace!("skipping computed field name: {err:#}");
                None
            }
        }
    }

    /// Key an index expression selects by.
    pub fn index_key(&mut self, scoped: &Scoped, index: &NodeRef) -> Option<IndexKey> {
        fn literal_key(node: &Node) -> Option<IndexKey> {
            match &node.kind {
                NodeKind::LiteralString(name) => Some(IndexKey::Field(name.clone())),
                NodeKind::LiteralNumber { value, .. } if *value >= 0.0 && value.fract() == 0.0 => {
                    Some(IndexKey::Element(*value as usize))
                }
                _ => None,
            }
        }
        if let Some(key) = literal_key(index) {
            return Some(key);
        }
        match self.compile(&scoped.child(index)) {
            Ok(node) => literal_key(&node),
            Err(err) => {
                log::trace!("index left opaque: {err:#}");
                None
            }
        }
    }

    /// Field bodies and array elements of `containers` selected by `key`.
    pub fn select(&mut self, containers: &[Scoped], key: &IndexKey) -> Vec<Scoped> {
        let mut selected = Vec::new();
        for container in containers {
            match (&container.node.kind, key) {
                (NodeKind::DesugaredObject { fields, .. }, IndexKey::Field(name)) => {
                    for field in fields {
                        if self.field_name(container, field).as_deref() == Some(name.as_str()) {
                            selected.push(container.child(&field.body));
                        }
                    }
                }
                (NodeKind::Array { elements }, IndexKey::Element(i)) => {
                    if let Some(element) = elements.get(*i) {
                        selected.push(container.child(element));
                    }
                }
                _ => {}
            }
        }
        selected
    }

    /// Every field of `objects` in order, with names resolved.
    pub fn object_fields(&mut self, objects: &[Scoped]) -> Vec<ObjectRange> {
        let mut ranges = Vec::new();
        for object in objects {
            let NodeKind::DesugaredObject { fields, .. } = &object.node.kind else {
                continue;
            };
            for field in fields {
                let Some(name) = self.field_name(object, field) else {
                    continue;
                };
                ranges.push(ObjectRange {
                    filename: field.loc.file.to_string(),
                    field_name: name,
                    selection_range: field.name.loc.clone(),
                    full_range: field.loc.clone(),
                    hide: field.hide,
                    body: object.child(&field.body),
                });
            }
        }
        ranges
    }

    /// Fields named `name` in `objects`, base first.
    pub fn field_ranges(&mut self, objects: &[Scoped], name: &str) -> Vec<ObjectRange> {
        self.object_fields(objects)
            .into_iter()
            .filter(|range| range.field_name == name)
            .collect()
    }

    /// One entry per field name; a later definition replaces an earlier one
    /// but keeps its position.
    pub fn merged_fields(&mut self, objects: &[Scoped]) -> Vec<ObjectRange> {
        let mut merged: IndexMap<String, ObjectRange> = IndexMap::new();
        for range in self.object_fields(objects) {
            merged.insert(range.field_name.clone(), range);
        }
        merged.into_values().collect()
    }

    // ========================================================================
    // Index lists
    // ========================================================================

    /// Values of a dotted path such as `["self", "a", "b"]` seen from the
    /// last node of `chain`. A head that is not an identifier is an import
    /// path, as built by [`NodeStack::build_index_list`].
    pub fn resolve_index_list(&mut self, chain: &[NodeRef], list: &[String]) -> Vec<Scoped> {
        let Some((head, rest)) = list.split_first() else {
            return Vec::new();
        };
        let mut values = match head.as_str() {
            "self" => self.self_objects(chain),
            "super" => self.super_objects(chain),
            "$" => self.dollar_objects(chain),
            id if is_identifier(id) => {
                let Some(value) =
                    find_binder(chain, id).and_then(|binder| self.binder_value(chain, &binder))
                else {
                    log::debug!("{id} is not bound here");
                    return Vec::new();
                };
                self.resolve_values(&value)
            }
            // anything else came from an import
            file => {
                let importer = Scoped::from_chain(chain)
                    .map(|s| s.filename())
                    .unwrap_or_default();
                self.find_top_level_objects(file, &importer)
            }
        };
        for name in rest {
            let selected = self.select(&values, &IndexKey::Field(name.clone()));
            values = selected
                .iter()
                .flat_map(|s| self.resolve_values(s))
                .collect();
        }
        values
    }

    /// Fields named by the last element of `list`, in the objects the rest
    /// of the path resolves to.
    pub fn find_ranges_from_index_list(
        &mut self,
        chain: &[NodeRef],
        list: &[String],
    ) -> Vec<ObjectRange> {
        let Some((last, path)) = list.split_last() else {
            return Vec::new();
        };
        if path.is_empty() {
            return Vec::new();
        }
        let containers = self.resolve_index_list(chain, path);
        self.field_ranges(&containers, last)
    }
}
