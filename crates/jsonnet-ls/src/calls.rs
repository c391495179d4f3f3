//
// calls.rs
//
// The function an argument list belongs to, for signature help and
// argument-name completion
//

use jsonnet_core::ast::{LineIndex, NodeKind, NodeRef};
use jsonnet_core::parse;

use crate::cst::{blank_arguments, CallContext};
use crate::document_cache::Document;
use crate::processing::{find_node_by_position, Resolver, Scoped};
use crate::stdlib;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    /// The called expression as written, e.g. `std.max` or `lib.f`.
    pub name: String,
    pub params: Vec<String>,
    pub documentation: Option<String>,
}

impl CallTarget {
    pub fn label(&self) -> String {
        format!("{}({})", self.name, self.params.join(", "))
    }
}

/// The outermost node of `chain` spanning exactly `start..end`, or the
/// innermost one ending at `end`.
pub(crate) fn node_spanning(
    chain: &[NodeRef],
    index: &LineIndex,
    start: usize,
    end: usize,
) -> Option<usize> {
    let begin = index.location(start);
    let end = index.location(end);
    chain
        .iter()
        .position(|n| n.loc.begin == begin && n.loc.end == end)
        .or_else(|| chain.iter().rposition(|n| n.loc.end == end))
}

/// Finds what `call` applies. Unfinished argument lists are blanked out
/// and the text reparsed when the document's AST is out of date.
pub fn resolve_call(
    resolver: &mut Resolver,
    doc: &Document,
    text: &str,
    call: &CallContext,
) -> Option<CallTarget> {
    let name: String = text[call.target_start..call.target_end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if let Some(function) = name.strip_prefix("std.").and_then(stdlib::lookup) {
        return Some(CallTarget {
            name,
            params: function.params.iter().map(|p| p.to_string()).collect(),
            documentation: Some(function.description.to_string()),
        });
    }

    let root = match &doc.ast {
        Some(ast) if doc.lines_changed_since_ast.is_empty() => ast.clone(),
        stale => {
            let reparsed = blank_arguments(text, call).and_then(|blanked| {
                parse(&doc.filename, &blanked)
                    .map_err(|err| log::debug!("call target does not parse: {err}"))
                    .ok()
            });
            reparsed.or_else(|| stale.clone())?
        }
    };

    let index = LineIndex::new(text);
    let last = index.location(call.target_end.saturating_sub(1));
    let chain = find_node_by_position(&root, last)?.stack;
    let target = node_spanning(&chain, &index, call.target_start, call.target_end)?;
    let scoped = Scoped::from_chain(&chain[..=target])?;
    let function = resolver.resolve_function(&scoped)?;
    let NodeKind::Function { params, .. } = &function.node.kind else {
        return None;
    };
    Some(CallTarget {
        name,
        params: params.iter().map(|p| p.name.clone()).collect(),
        documentation: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::cst::call_context;
    use crate::document_cache::DocumentCache;
    use tower_lsp::lsp_types::Url;

    fn target_at(text: &str, offset: usize) -> Option<CallTarget> {
        let cache = DocumentCache::new();
        let config = Configuration::default();
        let mut resolver = Resolver::new(&cache, &config);
        let doc = Document::new(Url::parse("file:///w/t.jsonnet").unwrap(), text, 1);
        let call = call_context(text, offset)?;
        resolve_call(&mut resolver, &doc, text, &call)
    }

    #[test]
    fn test_local_function_with_unfinished_arguments() {
        let text = "local f(a,b,c) = a; f(1, , 3)";
        let target = target_at(text, text.find(", ,").unwrap() + 2).expect("f should resolve");
        assert_eq!(target.label(), "f(a, b, c)");
    }

    #[test]
    fn test_std_function() {
        let text = "std.max(1, ";
        let target = target_at(text, text.len()).unwrap();
        assert_eq!(target.label(), "std.max(a, b)");
        assert!(target.documentation.is_some());
    }

    #[test]
    fn test_method_through_object() {
        let text = "local o = { m(x, y=1): x }; o.m(2)";
        let target = target_at(text, text.len() - 1).unwrap();
        assert_eq!(target.params, vec!["x", "y"]);
        assert_eq!(target.name, "o.m");
    }
}
