//
// find_bind.rs
//
// Finding the binding of an identifier in a chain of enclosing nodes
//

use jsonnet_core::ast::{CompSpec, Location, LocationRange, Node, NodeKind, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderKind {
    Local,
    ObjectLocal,
    Parameter,
    ComprehensionVariable,
}

/// Where an identifier is bound.
#[derive(Debug, Clone)]
pub struct Binder {
    pub name: String,
    pub kind: BinderKind,
    /// `name = body` for locals, the parameter (with its default) for parameters.
    pub loc: LocationRange,
    pub name_loc: LocationRange,
    /// Bound expression, or the default of a parameter. `None` for parameters
    /// without a default and comprehension variables.
    pub body: Option<NodeRef>,
    /// The node introducing the binding.
    pub owner: NodeRef,
    /// Index of `owner` in the chain that was searched.
    pub depth: usize,
}

/// Bindings `owner` introduces for the child `next` (`None` when the owner
/// itself is the node of interest), in declaration order.
pub fn binders_of(owner: &NodeRef, next: Option<&NodeRef>, depth: usize) -> Vec<Binder> {
    let mut out = Vec::new();
    match &owner.kind {
        NodeKind::Local { binds, .. } => {
            out.extend(binds.iter().map(|bind| Binder {
                name: bind.variable.clone(),
                kind: BinderKind::Local,
                loc: bind.loc.clone(),
                name_loc: bind.variable_loc.clone(),
                body: Some(bind.body.clone()),
                owner: owner.clone(),
                depth,
            }));
        }
        NodeKind::DesugaredObject { fields, locals, .. } => {
            // field names are evaluated outside the object
            let in_name = next.is_some_and(|n| fields.iter().any(|f| Node::same(&f.name, n)));
            if !in_name {
                out.extend(locals.iter().map(|bind| Binder {
                    name: bind.variable.clone(),
                    kind: BinderKind::ObjectLocal,
                    loc: bind.loc.clone(),
                    name_loc: bind.variable_loc.clone(),
                    body: Some(bind.body.clone()),
                    owner: owner.clone(),
                    depth,
                }));
            }
        }
        NodeKind::Function { params, .. } => {
            out.extend(params.iter().map(|param| {
                let name_end = Location::new(
                    param.loc.begin.line,
                    param.loc.begin.column + param.name.chars().count() as u32,
                );
                Binder {
                    name: param.name.clone(),
                    kind: BinderKind::Parameter,
                    loc: param.loc.clone(),
                    name_loc: LocationRange::new(param.loc.file.clone(), param.loc.begin, name_end),
                    body: param.default.clone(),
                    owner: owner.clone(),
                    depth,
                }
            }));
        }
        NodeKind::ArrayComp { body, specs } => {
            let limit = spec_position(specs, next, Some(body));
            out.extend(comprehension_binders(owner, &specs[..limit], depth));
        }
        NodeKind::ObjectComp {
            locals,
            value,
            specs,
            ..
        } => {
            let limit = spec_position(specs, next, None);
            out.extend(comprehension_binders(owner, &specs[..limit], depth));
            let in_value = next.is_some_and(|n| {
                Node::same(n, value) || locals.iter().any(|b| Node::same(&b.body, n))
            });
            if in_value || next.is_none() {
                out.extend(locals.iter().map(|bind| Binder {
                    name: bind.variable.clone(),
                    kind: BinderKind::ObjectLocal,
                    loc: bind.loc.clone(),
                    name_loc: bind.variable_loc.clone(),
                    body: Some(bind.body.clone()),
                    owner: owner.clone(),
                    depth,
                }));
            }
        }
        _ => {}
    }
    out
}

/// Number of specs whose variables are visible from `next`.
fn spec_position(specs: &[CompSpec], next: Option<&NodeRef>, body: Option<&NodeRef>) -> usize {
    let Some(next) = next else {
        return specs.len();
    };
    if body.is_some_and(|b| Node::same(b, next)) {
        return specs.len();
    }
    specs
        .iter()
        .position(|spec| match spec {
            CompSpec::For { expr, .. } => Node::same(expr, next),
            CompSpec::If { cond } => Node::same(cond, next),
        })
        .unwrap_or(specs.len())
}

fn comprehension_binders<'a>(
    owner: &'a NodeRef,
    specs: &'a [CompSpec],
    depth: usize,
) -> impl Iterator<Item = Binder> + 'a {
    specs.iter().filter_map(move |spec| match spec {
        CompSpec::For { variable, loc, .. } => Some(Binder {
            name: variable.clone(),
            kind: BinderKind::ComprehensionVariable,
            loc: loc.clone(),
            name_loc: loc.clone(),
            body: None,
            owner: owner.clone(),
            depth,
        }),
        CompSpec::If { .. } => None,
    })
}

/// Binding of `id` visible from the last node of `chain` (root first). The
/// nearest scope wins; within a scope the last declaration wins.
pub fn find_binder(chain: &[NodeRef], id: &str) -> Option<Binder> {
    for depth in (0..chain.len()).rev() {
        let found = binders_of(&chain[depth], chain.get(depth + 1), depth)
            .into_iter()
            .rev()
            .find(|b| b.name == id);
        if found.is_some() {
            return found;
        }
    }
    // top-level fallback: locals of the root object regardless of scope
    let root = chain.first()?;
    if matches!(root.kind, NodeKind::DesugaredObject { .. }) {
        return binders_of(root, None, 0).into_iter().find(|b| b.name == id);
    }
    None
}

/// Every binding visible from the last node of `chain`, nearest first, with
/// shadowed names removed.
pub fn visible_binders(chain: &[NodeRef]) -> Vec<Binder> {
    let mut out: Vec<Binder> = Vec::new();
    for depth in (0..chain.len()).rev() {
        for binder in binders_of(&chain[depth], chain.get(depth + 1), depth) {
            if !out.iter().any(|b| b.name == binder.name) {
                out.push(binder);
            }
        }
    }
    out
}

/// Declaration whose name is under `location`: a local, object local,
/// parameter or comprehension variable introduced by a node in `chain`.
pub fn declaration_at(chain: &[NodeRef], location: Location) -> Option<Binder> {
    (0..chain.len()).rev().find_map(|depth| {
        binders_of(&chain[depth], None, depth)
            .into_iter()
            .find(|b| b.name_loc.contains(location))
    })
}
