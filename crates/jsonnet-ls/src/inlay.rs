//
// inlay.rs
//
// Inlay hints: evaluated index values, argument names and AST node kinds
//

use jsonnet_core::ast::{children, NodeKind, NodeRef};
use tower_lsp::lsp_types::{InlayHint, InlayHintKind, InlayHintLabel, Position, Range};

use crate::config::Configuration;
use crate::document_cache::Document;
use crate::nodetree::build_tree;
use crate::position::ast_to_protocol;
use crate::processing::{Resolver, Scoped};
use crate::state::WorldState;

/// Index hints go past the end of the line so editors show them after it.
const END_OF_LINE_SHIFT: u32 = 1000;

fn hint(position: Position, label: String, kind: Option<InlayHintKind>) -> InlayHint {
    InlayHint {
        position,
        label: InlayHintLabel::String(label),
        kind,
        text_edits: None,
        tooltip: None,
        padding_left: None,
        padding_right: None,
        data: None,
    }
}

/// Calls `visit` on every node with its ancestors, root first.
fn walk(node: &NodeRef, ancestors: &mut Vec<NodeRef>, visit: &mut dyn FnMut(&Scoped) -> bool) {
    let scoped = Scoped {
        node: node.clone(),
        ancestors: ancestors.clone(),
    };
    if !visit(&scoped) {
        return;
    }
    ancestors.push(node.clone());
    for child in children(node) {
        walk(child, ancestors, visit);
    }
    ancestors.pop();
}

/// Whitespace runs collapsed to one space, cut at `max_length` characters.
fn shorten(value: &str, max_length: usize) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_length {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_length).collect();
    format!("{cut}...")
}

fn index_value_hints(resolver: &mut Resolver, root: &NodeRef, config: &Configuration) -> Vec<InlayHint> {
    let mut outermost = Vec::new();
    walk(root, &mut Vec::new(), &mut |scoped| {
        if matches!(scoped.node.kind, NodeKind::Index { .. }) && scoped.node.loc.is_set() {
            outermost.push(scoped.clone());
            return false;
        }
        true
    });

    outermost
        .iter()
        .filter_map(|scoped| {
            let value = resolver
                .evaluate(scoped)
                .map_err(|err| log::trace!("no inlay value: {err:#}"))
                .ok()?;
            let mut position = ast_to_protocol(scoped.node.loc.end);
            position.character += END_OF_LINE_SHIFT;
            let mut hint = hint(position, shorten(&value, config.max_inlay_length), None);
            hint.padding_left = Some(true);
            Some(hint)
        })
        .collect()
}

fn argument_hints(resolver: &mut Resolver, root: &NodeRef, config: &Configuration) -> Vec<InlayHint> {
    let mut applies = Vec::new();
    walk(root, &mut Vec::new(), &mut |scoped| {
        if matches!(scoped.node.kind, NodeKind::Apply { .. }) {
            applies.push(scoped.clone());
        }
        true
    });

    let mut hints = Vec::new();
    for apply in applies {
        let NodeKind::Apply { target, positional, .. } = &apply.node.kind else {
            continue;
        };
        let Some(function) = resolver.resolve_function(&apply.child(target)) else {
            log::debug!("unable to find the function called at {}", apply.node.loc);
            continue;
        };
        let NodeKind::Function { params, .. } = &function.node.kind else {
            continue;
        };
        for (arg, param) in positional.iter().zip(params) {
            if !arg.loc.is_set() {
                continue;
            }
            if !config.inlay.function_args.show_with_same_name && arg.var_id() == Some(param.name.as_str()) {
                continue;
            }
            let mut hint = hint(
                ast_to_protocol(arg.loc.begin),
                format!("{}:", param.name),
                Some(InlayHintKind::PARAMETER),
            );
            hint.padding_right = Some(true);
            hints.push(hint);
        }
    }
    hints
}

fn debug_ast_hints(root: &NodeRef) -> Vec<InlayHint> {
    build_tree(root)
        .all_children()
        .iter()
        .filter(|node| node.loc.is_set())
        .map(|node| {
            let mut hint = hint(ast_to_protocol(node.loc.begin), node.kind_name().to_string(), None);
            hint.padding_right = Some(true);
            hint
        })
        .collect()
}

pub fn inlay_hints(state: &WorldState, doc: &Document, range: Range) -> Vec<InlayHint> {
    let Some(root) = &doc.ast else {
        log::debug!("no inlay hints, {} was never parsed", doc.filename);
        return Vec::new();
    };
    let config = &state.config;
    let mut resolver = Resolver::new(&state.cache, config);
    let mut hints = Vec::new();
    if config.inlay.enable_index_value {
        hints.extend(index_value_hints(&mut resolver, root, config));
    }
    if config.inlay.enable_function_args {
        hints.extend(argument_hints(&mut resolver, root, config));
    }
    if config.inlay.enable_debug_ast {
        hints.extend(debug_ast_hints(root));
    }
    hints.retain(|h| (range.start.line..=range.end.line).contains(&h.position.line));
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Url;

    fn hints_with(config: Configuration, text: &str) -> Vec<InlayHint> {
        let state = WorldState::new(config);
        let uri = Url::parse("file:///workspace/inlay.jsonnet").unwrap();
        state.open_document(uri.clone(), text, 1);
        let doc = state.cache.get(&uri).unwrap();
        let whole = Range::new(Position::new(0, 0), Position::new(u32::MAX, 0));
        inlay_hints(&state, &doc, whole)
    }

    fn label(hint: &InlayHint) -> &str {
        match &hint.label {
            InlayHintLabel::String(s) => s,
            InlayHintLabel::LabelParts(_) => panic!("expected a plain label"),
        }
    }

    #[test]
    fn test_shorten_collapses_whitespace() {
        assert_eq!(shorten("{\n   \"a\": 1\n}", 100), "{ \"a\": 1 }");
        assert_eq!(shorten("abcdef", 3), "abc...");
        assert_eq!(shorten("abc", 3), "abc");
    }

    #[test]
    fn test_index_values() {
        let mut config = Configuration::default();
        config.inlay.enable_index_value = true;
        config.max_inlay_length = 10;
        let text = "local o = { a: 1, long: 'abcdefghijklmnop' };\n[o.a, o.long]";
        let hints = hints_with(config, text);
        let labels: Vec<&str> = hints.iter().map(label).collect();
        assert_eq!(labels, vec!["1", "\"abcdefghi..."]);
        assert!(hints[0].position.character >= END_OF_LINE_SHIFT);
        assert_eq!(hints[0].padding_left, Some(true));
    }

    #[test]
    fn test_argument_names() {
        let mut config = Configuration::default();
        config.inlay.enable_function_args = true;
        let text = "local f(first, second) = first;\nlocal second = 2;\nf(1, second)";
        let hints = hints_with(config.clone(), text);
        assert_eq!(hints.iter().map(label).collect::<Vec<_>>(), vec!["first:"]);
        assert_eq!(hints[0].position, Position::new(2, 2));

        config.inlay.function_args.show_with_same_name = true;
        let hints = hints_with(config, text);
        assert_eq!(hints.iter().map(label).collect::<Vec<_>>(), vec!["first:", "second:"]);
    }

    #[test]
    fn test_debug_ast() {
        let mut config = Configuration::default();
        config.inlay.enable_debug_ast = true;
        let hints = hints_with(config, "[1]");
        assert_eq!(hints.iter().map(label).collect::<Vec<_>>(), vec!["Array", "LiteralNumber"]);
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(hints_with(Configuration::default(), "local o = { a: 1 }; o.a").is_empty());
    }
}
