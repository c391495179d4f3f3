//
// completion.rs
//
// Completion: standard library members, import paths, object fields after
// a dot and names in scope
//

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use jsonnet_core::ast::{is_identifier, BinaryOp, LineIndex, Node, NodeKind, NodeRef};
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionItemLabelDetails, CompletionTextEdit,
    Documentation, InsertTextFormat, MarkupContent, MarkupKind, Position, Range, TextEdit,
};
use walkdir::WalkDir;

use crate::calls::{node_spanning, resolve_call};
use crate::config::Configuration;
use crate::cst::{call_context, completion_context, CompletionContext};
use crate::document_cache::Document;
use crate::position::{ast_to_protocol, protocol_to_ast};
use crate::processing::find_bind::visible_binders;
use crate::processing::{find_node_by_position, Resolver, Scoped};
use crate::state::WorldState;
use crate::stdlib::{self, ValueKind};
use crate::vm::jpaths_for;

const JSONNET_EXTENSIONS: [&str; 2] = ["jsonnet", "libsonnet"];

/// Type shown next to a completion.
pub fn type_name(node: &Node) -> &'static str {
    match &node.kind {
        NodeKind::Array { .. } | NodeKind::ArrayComp { .. } => "array",
        NodeKind::LiteralBoolean(_) => "boolean",
        NodeKind::Function { .. } => "function",
        NodeKind::LiteralNull => "null",
        NodeKind::LiteralNumber { .. } => "number",
        NodeKind::DesugaredObject { .. } | NodeKind::ObjectComp { .. } => "object",
        NodeKind::LiteralString(_) => "string",
        NodeKind::Import { .. } | NodeKind::ImportStr { .. } | NodeKind::ImportBin { .. } => "import",
        NodeKind::Index { .. } => "object field",
        NodeKind::Var { .. } => "variable",
        NodeKind::SuperIndex { .. } => "super",
        _ => "expression",
    }
}

/// `name`, or `['name']` when it is not an identifier.
pub fn escape_label(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        format!("['{}']", name.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

fn function_params(node: &Node) -> Option<String> {
    match &node.kind {
        NodeKind::Function { params, .. } => Some(format!(
            "({})",
            params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
        )),
        _ => None,
    }
}

/// Item for `label` bound to `body`. Bracketed insertions replace
/// `replace` so that the dot before them goes away.
fn create_item(
    config: &Configuration,
    label: &str,
    kind: CompletionItemKind,
    body: Option<&Node>,
    replace: Option<Range>,
) -> CompletionItem {
    let params = body.and_then(function_params);
    let kind = if params.is_some() { CompletionItemKind::FUNCTION } else { kind };
    let insert_text = match replace {
        Some(_) => format!("{}{}", escape_label(label), params.unwrap_or_default()),
        None => format!("{label}{}", params.unwrap_or_default()),
    };
    let type_name = body.map(type_name).unwrap_or("expression");
    let detail = if config.completion.use_type_in_detail {
        type_name.to_string()
    } else {
        insert_text.clone()
    };
    let text_edit = replace
        .filter(|_| insert_text.starts_with('['))
        .map(|range| {
            CompletionTextEdit::Edit(TextEdit {
                range,
                new_text: insert_text.clone(),
            })
        });
    CompletionItem {
        label: label.to_string(),
        kind: Some(kind),
        detail: Some(detail),
        label_details: Some(CompletionItemLabelDetails {
            detail: None,
            description: Some(type_name.to_string()),
        }),
        insert_text: Some(insert_text),
        text_edit,
        ..CompletionItem::default()
    }
}

fn markdown(value: &str) -> Documentation {
    Documentation::MarkupContent(MarkupContent {
        kind: MarkupKind::Markdown,
        value: value.to_string(),
    })
}

/// Completions at `position` of `doc`.
pub fn completion(state: &WorldState, doc: &Document, position: Position) -> Vec<CompletionItem> {
    let text = doc.text();
    let index = LineIndex::new(&text);
    let offset = index.offset(protocol_to_ast(position));
    let context = completion_context(&text, offset);
    log::trace!("completion context at {position:?}: {context:?}");

    let items = match context {
        CompletionContext::Import { partial_path } => {
            return import_completions(&state.config, doc, &partial_path, position);
        }
        CompletionContext::Index {
            base_start,
            base_end,
            prefix,
            inject_index,
        } => {
            let base = &text[base_start..base_end];
            if base == "std" && !std_is_shadowed(doc, &index, base_start) {
                return std_completions(&prefix);
            }
            let Some(root) = doc.ast.clone() else {
                log::debug!("{} was never parsed, no field completion", doc.filename);
                return Vec::new();
            };
            let field = IndexCompletion {
                text: &text,
                index: &index,
                base_start,
                base_end,
                prefix: &prefix,
                inject_index,
                position,
            };
            field.items(state, &root)
        }
        CompletionContext::Global { prefix } => {
            let Some(root) = doc.ast.clone() else {
                return Vec::new();
            };
            global_completions(state, doc, &text, &index, &root, offset, &prefix)
        }
    };
    items
        .into_iter()
        .filter(|item| state.config.show_docstring_in_completion || !item.label.starts_with('#'))
        .collect()
}

fn std_is_shadowed(doc: &Document, index: &LineIndex, offset: usize) -> bool {
    let Some(root) = &doc.ast else {
        return false;
    };
    find_node_by_position(root, index.location(offset))
        .map(|stack| crate::processing::find_binder(&stack.stack, "std").is_some())
        .unwrap_or(false)
}

fn std_completions(prefix: &str) -> Vec<CompletionItem> {
    stdlib::matching(prefix)
        .into_iter()
        .map(|function| {
            let signature = function.signature();
            CompletionItem {
                label: function.name.to_string(),
                kind: Some(CompletionItemKind::FUNCTION),
                insert_text: Some(signature.trim_start_matches("std.").to_string()),
                detail: Some(signature),
                documentation: Some(markdown(function.description)),
                ..CompletionItem::default()
            }
        })
        .collect()
}

fn jsonnet_files(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| JSONNET_EXTENSIONS.contains(&e))
        })
}

/// Jsonnet files under the directory typed so far, relative to each search
/// path and to the document's directory.
fn import_completions(
    config: &Configuration,
    doc: &Document,
    partial_path: &str,
    position: Position,
) -> Vec<CompletionItem> {
    let typed_dir = partial_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    let path = Path::new(&doc.filename);
    let mut roots = jpaths_for(config, path);
    if let Some(dir) = path.parent() {
        roots.push(dir.to_path_buf());
    }

    let mut labels = BTreeSet::new();
    for root in roots {
        for file in jsonnet_files(&root.join(typed_dir)) {
            if file == path {
                continue;
            }
            if let Ok(relative) = file.strip_prefix(&root) {
                labels.insert(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    let typed = partial_path.encode_utf16().count() as u32;
    let range = Range::new(
        Position::new(position.line, position.character.saturating_sub(typed)),
        position,
    );
    labels
        .into_iter()
        .map(|label| CompletionItem {
            kind: Some(CompletionItemKind::FILE),
            text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                range,
                new_text: label.clone(),
            })),
            label,
            ..CompletionItem::default()
        })
        .collect()
}

/// `base.prefix` at the cursor.
struct IndexCompletion<'t> {
    text: &'t str,
    index: &'t LineIndex,
    base_start: usize,
    base_end: usize,
    prefix: &'t str,
    inject_index: bool,
    position: Position,
}

impl IndexCompletion<'_> {
    fn items(&self, state: &WorldState, root: &NodeRef) -> Vec<CompletionItem> {
        let mut resolver = Resolver::new(&state.cache, &state.config);
        let values = self.resolve_base(&mut resolver, root);
        log::debug!(
            "{} resolves to {} value(s)",
            &self.text[self.base_start..self.base_end],
            values.len()
        );

        let dot = self.dot_offset();
        let replace = Range::new(
            ast_to_protocol(self.index.location(dot)),
            self.position,
        );
        let objects: Vec<Scoped> = values
            .iter()
            .filter(|v| matches!(v.node.kind, NodeKind::DesugaredObject { .. }))
            .cloned()
            .collect();
        let mut fields: Vec<_> = resolver
            .merged_fields(&objects)
            .into_iter()
            .filter(|range| range.field_name.starts_with(self.prefix))
            .collect();
        fields.sort_by(|a, b| a.field_name.cmp(&b.field_name));

        let mut items: Vec<CompletionItem> = fields
            .iter()
            .map(|range| {
                create_item(
                    &state.config,
                    &range.field_name,
                    CompletionItemKind::FIELD,
                    Some(&range.body.node),
                    Some(replace),
                )
            })
            .collect();

        if state.config.completion.enable_snippets {
            let kind = values.first().and_then(|v| ValueKind::of(&v.node.kind));
            items.extend(self.std_snippets(kind, dot));
        }
        items
    }

    fn dot_offset(&self) -> usize {
        self.text[self.base_end..]
            .find('.')
            .map(|i| self.base_end + i)
            .unwrap_or(self.base_end)
    }

    fn resolve_base(&self, resolver: &mut Resolver, root: &NodeRef) -> Vec<Scoped> {
        let base = &self.text[self.base_start..self.base_end];

        if let Some(path) = simple_path(base) {
            let chain = find_node_by_position(root, self.index.location(self.base_start))
                .map(|stack| stack.stack)
                .unwrap_or_else(|| vec![root.clone()]);
            return resolver.resolve_index_list(&chain, &path);
        }

        if !self.inject_index {
            // the typed field name parsed as the index of `base`
            let prefix_start = self.index.location(self.text.len().min(self.dot_offset() + 1));
            if let Some(chain) = find_node_by_position(root, prefix_start).map(|s| s.stack) {
                if let Some(parent) = chain.len().checked_sub(2) {
                    if let NodeKind::Index { target, index } = &chain[parent].kind {
                        if Node::same(index, &chain[parent + 1]) {
                            let target = Scoped {
                                node: target.clone(),
                                ancestors: chain[..=parent].to_vec(),
                            };
                            return resolver.resolve_values(&target);
                        }
                    }
                }
            }
        }

        let last = self.index.location(self.base_end.saturating_sub(1));
        let Some(chain) = find_node_by_position(root, last).map(|s| s.stack) else {
            return Vec::new();
        };
        match node_spanning(&chain, self.index, self.base_start, self.base_end)
            .and_then(|i| Scoped::from_chain(&chain[..=i]))
        {
            Some(scoped) => resolver.resolve_values(&scoped),
            None => Vec::new(),
        }
    }

    /// `std.f(base)` for standard functions taking a single value of the
    /// base's kind.
    fn std_snippets(&self, kind: Option<ValueKind>, dot: usize) -> Vec<CompletionItem> {
        let base = &self.text[self.base_start..self.base_end];
        let escaped = base
            .replace('\\', "\\\\")
            .replace('$', "\\$")
            .replace('}', "\\}");
        let prefix_range = Range::new(ast_to_protocol(self.index.location(dot + 1)), self.position);
        let removed = Range::new(
            ast_to_protocol(self.index.location(self.base_start)),
            prefix_range.start,
        );
        stdlib::functions()
            .values()
            .filter(|f| f.params.len() == 1 && f.accepts(kind))
            .map(|f| CompletionItem {
                label: f.name.to_string(),
                kind: Some(CompletionItemKind::SNIPPET),
                detail: Some(f.description.to_string()),
                insert_text_format: Some(InsertTextFormat::SNIPPET),
                text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                    range: prefix_range,
                    new_text: format!("std.{}({escaped})", f.name),
                })),
                additional_text_edits: Some(vec![TextEdit {
                    range: removed,
                    new_text: String::new(),
                }]),
                ..CompletionItem::default()
            })
            .collect()
    }
}

/// `a.b.c` made only of names, `self`, `super` and `$`.
fn simple_path(base: &str) -> Option<Vec<String>> {
    let parts: Vec<String> = base.split('.').map(|p| p.trim().to_string()).collect();
    let valid = parts.iter().enumerate().all(|(i, part)| {
        is_identifier(part) || (i == 0 && matches!(part.as_str(), "self" | "super" | "$"))
    });
    valid.then_some(parts)
}

fn global_completions(
    state: &WorldState,
    doc: &Document,
    text: &str,
    index: &LineIndex,
    root: &NodeRef,
    offset: usize,
    prefix: &str,
) -> Vec<CompletionItem> {
    let anchor = offset - prefix.len();
    let chain = find_node_by_position(root, index.location(anchor))
        .or_else(|| find_node_by_position(root, index.location(anchor.saturating_sub(1))))
        .map(|stack| stack.stack)
        .unwrap_or_else(|| vec![root.clone()]);

    let mut items: Vec<CompletionItem> = visible_binders(&chain)
        .iter()
        .map(|binder| {
            create_item(
                &state.config,
                &binder.name,
                CompletionItemKind::VARIABLE,
                binder.body.as_deref(),
                None,
            )
        })
        .collect();

    let in_object = chain
        .iter()
        .any(|n| matches!(n.kind, NodeKind::DesugaredObject { .. } | NodeKind::ObjectComp { .. }));
    let in_merge_right = chain.windows(2).any(|pair| match &pair[0].kind {
        NodeKind::Binary {
            op: BinaryOp::Plus,
            right,
            ..
        } => Node::same(right, &pair[1]) && matches!(pair[1].kind, NodeKind::DesugaredObject { .. }),
        _ => false,
    });
    let keywords = [("self", in_object), ("super", in_merge_right), ("local", true)];
    items.extend(keywords.iter().filter(|(_, on)| *on).map(|(keyword, _)| CompletionItem {
        label: keyword.to_string(),
        kind: Some(CompletionItemKind::KEYWORD),
        insert_text: Some(keyword.to_string()),
        ..CompletionItem::default()
    }));

    if let Some(call) = call_context(text, offset) {
        let mut resolver = Resolver::new(&state.cache, &state.config);
        if let Some(target) = resolve_call(&mut resolver, doc, text, &call) {
            items.extend(
                target
                    .params
                    .iter()
                    .filter(|p| !call.named.contains(p))
                    .map(|p| CompletionItem {
                        label: format!("{p}="),
                        kind: Some(CompletionItemKind::VARIABLE),
                        detail: Some(target.label()),
                        insert_text: Some(format!("{p}=")),
                        ..CompletionItem::default()
                    }),
            );
        }
    }

    items
        .into_iter()
        .filter(|item| item.label.starts_with(prefix))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Url;

    fn uri(name: &str) -> Url {
        Url::parse(&format!("file:///workspace/{name}")).unwrap()
    }

    fn labels(items: &[CompletionItem]) -> Vec<&str> {
        items.iter().map(|i| i.label.as_str()).collect()
    }

    fn complete(state: &WorldState, text: &str, line: u32, character: u32) -> Vec<CompletionItem> {
        let uri = uri("main.jsonnet");
        state.open_document(uri.clone(), text, 1);
        let doc = state.cache.get(&uri).unwrap();
        completion(state, &doc, Position::new(line, character))
    }

    #[test]
    fn test_std_completion_has_signatures() {
        let state = WorldState::default();
        let items = complete(&state, "{ a: std.ma }", 0, 11);
        let max = items.iter().find(|i| i.label == "max").expect("max is offered");
        assert_eq!(max.detail.as_deref(), Some("std.max(a, b)"));
        assert_eq!(max.insert_text.as_deref(), Some("max(a, b)"));
        let manifest = items.iter().find(|i| i.label == "manifestJson").unwrap();
        assert_eq!(manifest.detail.as_deref(), Some("std.manifestJson(value)"));
    }

    #[test]
    fn test_field_completion_sorted_and_filtered() {
        let state = WorldState::default();
        let text = "local o = { zeta: 1, alpha: 'a', 'needs quote': null, f(x): x };\no.";
        let items = complete(&state, text, 1, 2);
        assert_eq!(labels(&items), vec!["alpha", "f", "needs quote", "zeta"]);

        let quoted = &items[2];
        assert_eq!(quoted.insert_text.as_deref(), Some("['needs quote']"));
        match &quoted.text_edit {
            Some(CompletionTextEdit::Edit(edit)) => {
                assert_eq!(edit.range.start, Position::new(1, 1), "edit replaces the dot");
            }
            other => panic!("expected a text edit, got {other:?}"),
        }
        let function = &items[1];
        assert_eq!(function.kind, Some(CompletionItemKind::FUNCTION));
        assert_eq!(function.insert_text.as_deref(), Some("f(x)"));
        assert_eq!(
            items[0].label_details.as_ref().and_then(|d| d.description.as_deref()),
            Some("string")
        );
    }

    #[test]
    fn test_field_completion_with_prefix() {
        let state = WorldState::default();
        let text = "local o = { apple: 1, avocado: 2, banana: 3 }; o.a";
        let items = complete(&state, text, 0, text.len() as u32);
        assert_eq!(labels(&items), vec!["apple", "avocado"]);
    }

    #[test]
    fn test_completion_through_merge_keeps_last_definition() {
        let state = WorldState::default();
        let text = "local a = { f: 1 }; local b = a + { f: 'two', g: 3 }; b.";
        let items = complete(&state, text, 0, text.len() as u32);
        assert_eq!(labels(&items), vec!["f", "g"]);
        assert_eq!(
            items[0].label_details.as_ref().and_then(|d| d.description.as_deref()),
            Some("string"),
            "the override decides the type"
        );
    }

    #[test]
    fn test_self_completion_after_edit() {
        let state = WorldState::default();
        let uri = uri("main.jsonnet");
        state.open_document(uri.clone(), "{\n  b: 1,\n  a: self.foo,\n}", 1);
        let change = tower_lsp::lsp_types::TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: "{\n  b: 1,\n  a: self.,\n}".to_string(),
        };
        state.change_document(&uri, vec![change], 2);
        let doc = state.cache.get(&uri).unwrap();
        assert_eq!(doc.text(), "{\n  b: 1,\n  a: self.,\n}");
        let items = completion(&state, &doc, Position::new(2, 10));
        assert_eq!(labels(&items), vec!["a", "b"]);
    }

    #[test]
    fn test_global_completion() {
        let state = WorldState::default();
        let text = "local alpha = 1, beta = 2;\n{ x: al }";
        let items = complete(&state, text, 1, 7);
        assert_eq!(labels(&items), vec!["alpha"]);

        let items = complete(&state, "local v = 1;\n{ a: 1 } + { b: v }", 1, 16);
        let names = labels(&items);
        for expected in ["v", "self", "super", "local"] {
            assert!(names.contains(&expected), "{expected} missing from {names:?}");
        }
    }

    #[test]
    fn test_docstring_fields_hidden_by_default() {
        let state = WorldState::default();
        let text = "local o = { '#f': 'doc', f: 1 }; o.";
        let items = complete(&state, text, 0, text.len() as u32);
        assert_eq!(labels(&items), vec!["f"]);

        let mut config = Configuration::default();
        config.show_docstring_in_completion = true;
        let state = WorldState::new(config);
        let items = complete(&state, text, 0, text.len() as u32);
        assert_eq!(labels(&items), vec!["#f", "f"]);
    }

    #[test]
    fn test_argument_name_completion() {
        let state = WorldState::default();
        let text = "local f(first, second) = first; f(second=1, ";
        let items = complete(&state, text, 0, text.len() as u32);
        assert!(labels(&items).contains(&"first="));
        assert!(!labels(&items).contains(&"second="), "named arguments are not offered twice");
    }

    #[test]
    fn test_snippets_respect_type_limitations() {
        let mut config = Configuration::default();
        config.completion.enable_snippets = true;
        let state = WorldState::new(config);
        let text = "local n = 4; n.";
        let items = complete(&state, text, 0, text.len() as u32);
        let ceil = items.iter().find(|i| i.label == "ceil").expect("numbers get math snippets");
        match &ceil.text_edit {
            Some(CompletionTextEdit::Edit(edit)) => assert_eq!(edit.new_text, "std.ceil(n)"),
            other => panic!("expected a text edit, got {other:?}"),
        }
        assert!(items.iter().all(|i| i.label != "length"), "length does not take numbers");
    }

    #[test]
    fn test_use_type_in_detail() {
        let mut config = Configuration::default();
        config.completion.use_type_in_detail = true;
        let state = WorldState::new(config);
        let text = "local o = { n: 1 }; o.";
        let items = complete(&state, text, 0, text.len() as u32);
        assert_eq!(items[0].detail.as_deref(), Some("number"));
    }
}
