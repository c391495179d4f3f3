// scenarios.rs - End-to-end behavior of the language features over real files
//
// Each test opens documents in a fresh WorldState the way the backend does on
// didOpen, then calls the feature entry points directly.

use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;
use tower_lsp::lsp_types::{
    CompletionItemKind, GotoDefinitionResponse, HoverContents, Position, Range,
    TextDocumentContentChangeEvent, Url,
};

use jsonnet_core::ast::Location;
use jsonnet_ls::completion::completion;
use jsonnet_ls::config::Configuration;
use jsonnet_ls::document_cache::{Document, DocumentCache};
use jsonnet_ls::handlers;
use jsonnet_ls::position::{ast_to_protocol, protocol_to_ast};
use jsonnet_ls::processing::find_position::{effective_range, find_node_by_position};
use jsonnet_ls::processing::resolver::Resolver;
use jsonnet_ls::processing::Scoped;
use jsonnet_ls::semantic_tokens::semantic_tokens_full;
use jsonnet_ls::state::WorldState;

fn open(state: &WorldState, path: &Path, text: &str) -> Arc<Document> {
    let uri = Url::from_file_path(path).unwrap();
    state.open_document(uri.clone(), text, 1);
    state.cache.get(&uri).unwrap()
}

fn hover_text(state: &WorldState, doc: &Document, position: Position) -> String {
    let hover = handlers::hover(state, doc, position).expect("hover should be available");
    match hover.contents {
        HoverContents::Markup(markup) => markup.value,
        other => panic!("unexpected hover contents {other:?}"),
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_object_local_definition_and_hover() {
    let dir = TempDir::new().unwrap();
    let state = WorldState::default();
    let doc = open(&state, &dir.path().join("main.jsonnet"), "{ local x = \"v\", a: x }");

    let Some(GotoDefinitionResponse::Link(links)) =
        handlers::goto_definition(&state, &doc, Position::new(0, 20))
    else {
        panic!("expected a definition for x");
    };
    assert_eq!(links.len(), 1);
    assert_eq!(
        links[0].target_range,
        Range::new(Position::new(0, 8), Position::new(0, 15)),
        "target is the whole bind `x = \"v\"`"
    );

    let text = hover_text(&state, &doc, Position::new(0, 20));
    assert!(text.contains("\"v\""), "hover should show the bound value, got {text}");
}

#[test]
fn test_merge_override_yields_base_then_override() {
    let dir = TempDir::new().unwrap();
    let state = WorldState::default();
    let text = "local a = { f: 1 };\nlocal b = a + { f: 2 };\nb.f";
    let doc = open(&state, &dir.path().join("main.jsonnet"), text);

    let Some(GotoDefinitionResponse::Link(links)) =
        handlers::goto_definition(&state, &doc, Position::new(2, 2))
    else {
        panic!("expected definitions for f");
    };
    assert_eq!(links.len(), 2, "both sides of the merge define f: {links:?}");
    assert_eq!(links[0].target_selection_range.start, Position::new(0, 12), "f: 1 comes first");
    assert_eq!(links[1].target_selection_range.start, Position::new(1, 16), "then f: 2");
}

#[test]
fn test_completion_through_import() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("lib.libsonnet"), "{ x: 1 }").unwrap();
    let state = WorldState::default();
    let text = "local l = import 'lib.libsonnet'; l.";
    let doc = open(&state, &dir.path().join("main.jsonnet"), text);

    let items = completion(&state, &doc, Position::new(0, text.len() as u32));
    assert_eq!(items.len(), 1, "only the library field is offered: {items:?}");
    assert_eq!(items[0].label, "x");
    assert_eq!(items[0].kind, Some(CompletionItemKind::FIELD));
    assert_eq!(
        items[0].label_details.as_ref().and_then(|d| d.description.as_deref()),
        Some("number")
    );
}

#[test]
fn test_stdlib_completion_signatures() {
    let dir = TempDir::new().unwrap();
    let state = WorldState::default();
    let text = "{ a: std.ma }";
    let doc = open(&state, &dir.path().join("main.jsonnet"), text);

    let items = completion(&state, &doc, Position::new(0, 11));
    let detail = |label: &str| {
        items
            .iter()
            .find(|i| i.label == label)
            .unwrap_or_else(|| panic!("{label} should be offered"))
            .detail
            .clone()
    };
    assert_eq!(detail("max").as_deref(), Some("std.max(a, b)"));
    assert_eq!(detail("manifestJson").as_deref(), Some("std.manifestJson(value)"));
}

#[test]
fn test_signature_help_in_empty_argument_slot() {
    let dir = TempDir::new().unwrap();
    let state = WorldState::default();
    let doc = open(&state, &dir.path().join("main.jsonnet"), "local f(a,b,c) = a; f(1, , 3)");

    let help = handlers::signature_help(&state, &doc, Position::new(0, 25))
        .expect("signature help inside the call");
    assert_eq!(help.active_parameter, Some(1));
}

#[test]
fn test_self_completion_after_breaking_edit() {
    let dir = TempDir::new().unwrap();
    let state = WorldState::default();
    let path = dir.path().join("main.jsonnet");
    let uri = Url::from_file_path(&path).unwrap();
    state.open_document(uri.clone(), "{\n  b: 1,\n  a: self.foo,\n}", 1);

    let erase_foo = TextDocumentContentChangeEvent {
        range: None,
        range_length: None,
        text: "{\n  b: 1,\n  a: self.,\n}".to_string(),
    };
    assert!(state.change_document(&uri, vec![erase_foo], 2));
    let doc = state.cache.get(&uri).unwrap();
    assert!(doc.parse_error.is_some(), "`self.,` does not parse");

    let labels: Vec<String> = completion(&state, &doc, Position::new(2, 10))
        .into_iter()
        .map(|i| i.label)
        .collect();
    assert_eq!(labels, vec!["a", "b"]);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_rename_preserves_evaluation() {
    let dir = TempDir::new().unwrap();
    let state = WorldState::default();
    let text = "local value = 2;\n{ a: value, b: value * 3 }";
    let doc = open(&state, &dir.path().join("main.jsonnet"), text);

    let edit = handlers::rename(&state, &doc, Position::new(0, 7), "renamed")
        .expect("rename should succeed")
        .expect("rename should produce edits");
    let edits = edit.changes.expect("changes").into_values().next().unwrap();
    assert_eq!(edits.len(), 3);

    let mut lines: Vec<String> = text.lines().map(String::from).collect();
    let mut sorted = edits.clone();
    sorted.sort_by_key(|e| std::cmp::Reverse(e.range.start));
    for e in sorted {
        let line = &mut lines[e.range.start.line as usize];
        line.replace_range(e.range.start.character as usize..e.range.end.character as usize, &e.new_text);
    }
    let renamed = lines.join("\n");
    assert!(!renamed.contains("value"), "every occurrence is renamed: {renamed}");

    let vm = jsonnet_core::Vm::new(Vec::new());
    let before = vm.evaluate_snippet("before.jsonnet", text).unwrap();
    let after = vm.evaluate_snippet("after.jsonnet", &renamed).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_top_level_objects_terminate_on_import_cycle() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.libsonnet"), "(import 'b.libsonnet') + { a: 1 }").unwrap();
    std::fs::write(dir.path().join("b.libsonnet"), "(import 'a.libsonnet') + { b: 1 }").unwrap();
    let state = WorldState::default();
    let main = dir.path().join("main.jsonnet");
    let doc = open(&state, &main, "local a = import 'a.libsonnet'; a.");

    // only has to come back
    let items = completion(&state, &doc, Position::new(0, 34));
    assert!(items.iter().any(|i| i.label == "a"), "got {items:?}");
}

#[test]
fn test_resolver_is_deterministic() {
    let cache = DocumentCache::new();
    let config = Configuration::default();
    let text = "local a = { x: 1 } + { y: self.x }; local b = a { z: 2 }; b";
    let root = jsonnet_core::parse("t.jsonnet", text).unwrap();

    let run = || {
        let mut resolver = Resolver::new(&cache, &config);
        let objects = resolver.resolve_objects(&Scoped::root(root.clone()));
        resolver
            .merged_fields(&objects)
            .into_iter()
            .map(|r| (r.field_name, r.full_range.to_string()))
            .collect::<Vec<_>>()
    };
    let first = run();
    assert!(!first.is_empty());
    for _ in 0..5 {
        assert_eq!(run(), first);
    }
}

const SAMPLE: &str = "local lib = { f(x): x + 1, g: 'two' };\n\
{\n  a: lib.f(1),\n  b: lib.g,\n  c: [i * 2 for i in [1, 2, 3]],\n  d: if true then self.a else null,\n}\n";

proptest! {
    #[test]
    fn prop_position_conversion_round_trips(line in 0u32..10_000, character in 0u32..10_000) {
        let position = Position::new(line, character);
        prop_assert_eq!(ast_to_protocol(protocol_to_ast(position)), position);
    }

    #[test]
    fn prop_stack_top_contains_position(offset in 0usize..SAMPLE.len()) {
        let root = jsonnet_core::parse("sample.jsonnet", SAMPLE).unwrap();
        let before = &SAMPLE[..offset];
        let line = before.matches('\n').count() as u32 + 1;
        let column = (before.len() - before.rfind('\n').map_or(0, |i| i + 1)) as u32 + 1;
        let location = Location::new(line, column);
        if let Some(stack) = find_node_by_position(&root, location) {
            if let Some(top) = stack.peek() {
                let range = effective_range(top);
                prop_assert!(
                    !range.is_set() || range.contains(location),
                    "{} at {:?} does not contain {:?}", top.kind_name(), range, location
                );
            }
        }
    }

    #[test]
    fn prop_semantic_tokens_are_ordered(offset in 0usize..SAMPLE.len()) {
        // damage the document a little; only parseable prefixes produce tokens
        let text = format!("{}\n", &SAMPLE[..offset]);
        if let Ok(root) = jsonnet_core::parse("sample.jsonnet", &text) {
            let tokens = semantic_tokens_full(&root);
            // strictly increasing positions: only the first token may sit at delta 0:0
            for token in tokens.data.iter().skip(1) {
                prop_assert!(token.delta_line > 0 || token.delta_start > 0, "token {:?} repeats a position", token);
            }
        }
    }
}
