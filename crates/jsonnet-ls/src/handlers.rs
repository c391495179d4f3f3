//
// handlers.rs
//
// Definition, references, rename, hover, signature help, document symbols
// and formatting
//

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use jsonnet_core::ast::{is_identifier, LineIndex, LocationRange, NodeKind, NodeRef};
use rayon::prelude::*;
use tower_lsp::lsp_types::*;
use walkdir::WalkDir;

use crate::calls::resolve_call;
use crate::cst::call_context;
use crate::document_cache::{Document, DocumentCache};
use crate::position::{protocol_to_ast, range_ast_to_protocol};
use crate::processing::{find_binder, find_node_by_position, Definition, Resolver};
use crate::state::WorldState;
use crate::stdlib;
use crate::vm::jpaths_for;

const HOVER_MAX_LINES: usize = 5;

fn file_uri(filename: &str) -> Option<Url> {
    Url::from_file_path(filename).ok()
}

// ============================================================================
// Definition
// ============================================================================

fn definitions_at(state: &WorldState, doc: &Document, position: Position) -> Vec<Definition> {
    let Some(root) = &doc.ast else {
        return Vec::new();
    };
    let mut resolver = Resolver::new(&state.cache, &state.config);
    resolver.find_definitions(root, protocol_to_ast(position))
}

pub fn goto_definition(
    state: &WorldState,
    doc: &Document,
    position: Position,
) -> Option<GotoDefinitionResponse> {
    let links: Vec<LocationLink> = definitions_at(state, doc, position)
        .iter()
        .filter_map(|def| {
            Some(LocationLink {
                origin_selection_range: None,
                target_uri: file_uri(&def.filename)?,
                target_range: range_ast_to_protocol(&def.target),
                target_selection_range: range_ast_to_protocol(&def.selection),
            })
        })
        .collect();
    if links.is_empty() {
        log::debug!("no definition at {position:?} in {}", doc.filename);
        return None;
    }
    Some(GotoDefinitionResponse::Link(links))
}

// ============================================================================
// References
// ============================================================================

/// Source text of `path`, preferring the open document.
fn file_text(cache: &DocumentCache, path: &Path) -> Option<String> {
    match cache.find_by_filename(&path.to_string_lossy()) {
        Some(doc) => Some(doc.text()),
        None => std::fs::read_to_string(path).ok(),
    }
}

/// Open documents plus Jsonnet files under the search path and the
/// directory of `source`, at most `max_files` of them.
fn candidate_files(state: &WorldState, source: &Path) -> Vec<PathBuf> {
    let mut files: BTreeSet<PathBuf> = state
        .cache
        .documents()
        .iter()
        .map(|doc| PathBuf::from(&doc.filename))
        .collect();
    let mut roots = jpaths_for(&state.config, source);
    if let Some(dir) = source.parent() {
        roots.push(dir.to_path_buf());
    }
    let max_files = state.config.references.max_files;
    for root in roots {
        let found = WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("jsonnet" | "libsonnet")
                )
            });
        for path in found {
            if files.len() >= max_files {
                log::info!("reference search limited to {max_files} files");
                return files.into_iter().collect();
            }
            files.insert(path);
        }
    }
    files.into_iter().collect()
}

fn is_identifier_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

/// Whole-word occurrences of `identifier` in `text`.
fn identifier_locations(file: &str, text: &str, identifier: &str) -> Vec<LocationRange> {
    let index = LineIndex::new(text);
    let file: std::sync::Arc<str> = file.into();
    text.match_indices(identifier)
        .filter(|(start, _)| {
            let before = text[..*start].chars().next_back();
            let after = text[start + identifier.len()..].chars().next();
            !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char)
        })
        .map(|(start, _)| {
            LocationRange::new(
                file.clone(),
                index.location(start),
                index.location(start + identifier.len()),
            )
        })
        .collect()
}

/// Name a definition introduces, without quotes for string field names.
fn defined_name(cache: &DocumentCache, def: &Definition) -> Option<String> {
    let text = file_text(cache, Path::new(&def.filename))?;
    let index = LineIndex::new(&text);
    let name = text.get(index.offset(def.selection.begin)..index.offset(def.selection.end))?;
    let name = name.trim_matches(|c| c == '\'' || c == '"');
    is_identifier(name).then(|| name.to_string())
}

fn same_definition(a: &Definition, b: &Definition) -> bool {
    a.filename == b.filename && a.selection.begin == b.selection.begin
}

/// Every place that refers to the definition of the symbol at `position`.
pub fn references(
    state: &WorldState,
    doc: &Document,
    position: Position,
    include_declaration: bool,
) -> Option<Vec<Location>> {
    let target = definitions_at(state, doc, position).pop()?;
    let identifier = defined_name(&state.cache, &target)?;
    log::debug!("searching references of {identifier} defined in {}", target.filename);

    let files = candidate_files(state, Path::new(&target.filename));
    let mut locations: Vec<Location> = files
        .par_iter()
        .flat_map_iter(|path| {
            let filename = path.to_string_lossy().into_owned();
            let found = file_text(&state.cache, path)
                .map(|text| {
                    let mut resolver = Resolver::new(&state.cache, &state.config);
                    identifier_locations(&filename, &text, &identifier)
                        .into_iter()
                        .filter(|range| {
                            resolver
                                .find_definitions_in_file(path, range.begin)
                                .iter()
                                .any(|def| same_definition(def, &target))
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let uri = file_uri(&filename);
            found.into_iter().filter_map(move |range| {
                Some(Location {
                    uri: uri.clone()?,
                    range: range_ast_to_protocol(&range),
                })
            })
        })
        .collect();

    if !include_declaration {
        let declaration = range_ast_to_protocol(&target.selection);
        let declaration_uri = file_uri(&target.filename);
        locations.retain(|l| !(Some(&l.uri) == declaration_uri.as_ref() && l.range == declaration));
    }
    locations.sort_by(|a, b| {
        (a.uri.as_str(), a.range.start.line, a.range.start.character)
            .cmp(&(b.uri.as_str(), b.range.start.line, b.range.start.character))
    });
    locations.dedup();
    locations.truncate(state.config.references.max_results);
    Some(locations)
}

// ============================================================================
// Rename
// ============================================================================

pub fn rename(
    state: &WorldState,
    doc: &Document,
    position: Position,
    new_name: &str,
) -> anyhow::Result<Option<WorkspaceEdit>> {
    if !is_identifier(new_name) {
        anyhow::bail!("{new_name:?} is not a valid identifier");
    }
    let Some(locations) = references(state, doc, position, true) else {
        return Ok(None);
    };
    let mut changes: HashMap<Url, Vec<TextEdit>> = HashMap::new();
    for location in locations {
        changes.entry(location.uri).or_default().push(TextEdit {
            range: location.range,
            new_text: new_name.to_string(),
        });
    }
    Ok(Some(WorkspaceEdit {
        changes: Some(changes),
        ..WorkspaceEdit::default()
    }))
}

// ============================================================================
// Hover
// ============================================================================

fn markdown_hover(value: String, range: Option<Range>) -> Hover {
    Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value,
        }),
        range,
    }
}

/// Catalogue entry for the innermost `std.name` around the cursor, unless a
/// local `std` shadows the standard library there.
fn std_member_hover(stack: &[NodeRef]) -> Option<Hover> {
    stack.iter().enumerate().rev().find_map(|(i, node)| {
        let NodeKind::Index { target, index } = &node.kind else {
            return None;
        };
        if target.var_id() != Some("std") || find_binder(&stack[..=i], "std").is_some() {
            return None;
        }
        let function = stdlib::lookup(index.as_string()?)?;
        Some(markdown_hover(
            format!("`{}`\n\n{}", function.signature(), function.description),
            Some(range_ast_to_protocol(&node.loc)),
        ))
    })
}

pub fn hover(state: &WorldState, doc: &Document, position: Position) -> Option<Hover> {
    if let Some(err) = &doc.parse_error {
        // hover fires constantly while typing
        log::debug!("hover skipped, {} does not parse: {err}", doc.filename);
        return None;
    }
    let root = doc.ast.as_ref()?;
    let stack = find_node_by_position(root, protocol_to_ast(position))?;
    let node = stack.peek()?.clone();
    if let Some(hover) = std_member_hover(&stack.stack) {
        return Some(hover);
    }

    let definitions = definitions_at(state, doc, position);
    if definitions.is_empty() {
        return None;
    }
    let mut content = String::new();
    for def in &definitions {
        let uri = file_uri(&def.filename)?;
        let range = range_ast_to_protocol(&def.target);
        if definitions.len() > 1 {
            let mut header = format!("{uri}:{}", range.start.line + 1);
            if range.start.line != range.end.line {
                header.push_str(&format!("-{}", range.end.line + 1));
            }
            content.push_str(&format!("## `{header}`\n"));
        }
        let mut target = match state.cache.get_contents(&uri, range) {
            Ok(target) => target,
            Err(err) => {
                log::debug!("hover: {err:#}");
                return None;
            }
        };
        if target.matches('\n').count() > HOVER_MAX_LINES {
            let lines: Vec<&str> = target.split('\n').take(HOVER_MAX_LINES).collect();
            target = format!("{}\n...", lines.join("\n"));
        }
        content.push_str(&format!("```jsonnet\n{target}\n```\n"));
        if definitions.len() > 1 {
            content.push('\n');
        }
    }
    Some(markdown_hover(content, Some(range_ast_to_protocol(&node.loc))))
}

// ============================================================================
// Signature Help
// ============================================================================

pub fn signature_help(state: &WorldState, doc: &Document, position: Position) -> Option<SignatureHelp> {
    let text = doc.text();
    let offset = LineIndex::new(&text).offset(protocol_to_ast(position));
    let call = call_context(&text, offset)?;
    let mut resolver = Resolver::new(&state.cache, &state.config);
    let target = resolve_call(&mut resolver, doc, &text, &call)?;

    let active = call.argument_index as u32;
    let signature = SignatureInformation {
        label: target.label(),
        documentation: target.documentation.clone().map(|value| {
            Documentation::MarkupContent(MarkupContent {
                kind: MarkupKind::Markdown,
                value,
            })
        }),
        parameters: Some(
            target
                .params
                .iter()
                .map(|p| ParameterInformation {
                    label: ParameterLabel::Simple(p.clone()),
                    documentation: None,
                })
                .collect(),
        ),
        active_parameter: Some(active),
    };
    Some(SignatureHelp {
        signatures: vec![signature],
        active_signature: Some(0),
        active_parameter: Some(active),
    })
}

// ============================================================================
// Document Symbols
// ============================================================================

#[allow(deprecated)]
fn symbol(name: String, kind: SymbolKind, loc: &LocationRange, selection: &LocationRange, children: Vec<DocumentSymbol>) -> DocumentSymbol {
    DocumentSymbol {
        name,
        detail: None,
        kind,
        tags: None,
        deprecated: None,
        range: range_ast_to_protocol(loc),
        selection_range: range_ast_to_protocol(selection),
        children: (!children.is_empty()).then_some(children),
    }
}

/// Fields of the objects `node` evaluates to syntactically.
fn value_symbols(node: &NodeRef) -> Vec<DocumentSymbol> {
    match &node.kind {
        NodeKind::DesugaredObject { fields, .. } => fields
            .iter()
            .filter(|f| f.loc.is_set())
            .filter_map(|field| {
                let name = field.name.as_string()?.to_string();
                let kind = match field.body.kind {
                    NodeKind::Function { .. } => SymbolKind::METHOD,
                    _ => SymbolKind::FIELD,
                };
                Some(symbol(name, kind, &field.loc, &field.name.loc, value_symbols(&field.body)))
            })
            .collect(),
        NodeKind::Binary { left, right, .. } => {
            let mut symbols = value_symbols(left);
            symbols.extend(value_symbols(right));
            symbols
        }
        NodeKind::Local { body, .. } => local_symbols(node).into_iter().chain(value_symbols(body)).collect(),
        _ => Vec::new(),
    }
}

fn local_symbols(node: &NodeRef) -> Vec<DocumentSymbol> {
    let NodeKind::Local { binds, .. } = &node.kind else {
        return Vec::new();
    };
    binds
        .iter()
        .map(|bind| {
            let kind = match bind.body.kind {
                NodeKind::Function { .. } => SymbolKind::FUNCTION,
                _ => SymbolKind::VARIABLE,
            };
            symbol(bind.variable.clone(), kind, &bind.loc, &bind.variable_loc, value_symbols(&bind.body))
        })
        .collect()
}

pub fn document_symbol(doc: &Document) -> Option<DocumentSymbolResponse> {
    let root = doc.ast.as_ref()?;
    Some(DocumentSymbolResponse::Nested(value_symbols(root)))
}

// ============================================================================
// Formatting
// ============================================================================

/// Strips trailing whitespace and leaves exactly one final newline.
pub fn formatting(doc: &Document) -> Vec<TextEdit> {
    let text = doc.text();
    let mut formatted: String = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end_matches('\n')
        .to_string();
    formatted.push('\n');
    if formatted == text {
        return Vec::new();
    }
    let last_line = doc.contents.len_lines() as u32;
    vec![TextEdit {
        range: Range::new(Position::new(0, 0), Position::new(last_line, 0)),
        new_text: formatted,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use jsonnet_core::parse;
    use tempfile::TempDir;

    fn open(state: &WorldState, path: &Path, text: &str) -> std::sync::Arc<Document> {
        let uri = Url::from_file_path(path).unwrap();
        state.open_document(uri.clone(), text, 1);
        state.cache.get(&uri).unwrap()
    }

    fn hover_text(hover: Hover) -> String {
        match hover.contents {
            HoverContents::Markup(markup) => markup.value,
            other => panic!("unexpected hover contents {other:?}"),
        }
    }

    #[test]
    fn test_definition_of_object_local() {
        let dir = TempDir::new().unwrap();
        let state = WorldState::default();
        let doc = open(&state, &dir.path().join("a.jsonnet"), "{ local x = \"v\", a: x }");
        let Some(GotoDefinitionResponse::Link(links)) = goto_definition(&state, &doc, Position::new(0, 20)) else {
            panic!("expected a definition");
        };
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_range, Range::new(Position::new(0, 8), Position::new(0, 15)));
        assert_eq!(links[0].target_selection_range, Range::new(Position::new(0, 8), Position::new(0, 9)));
    }

    #[test]
    fn test_hover_shows_definition_source() {
        let dir = TempDir::new().unwrap();
        let state = WorldState::default();
        let doc = open(&state, &dir.path().join("a.jsonnet"), "{ local x = \"v\", a: x }");
        let text = hover_text(hover(&state, &doc, Position::new(0, 20)).unwrap());
        assert!(text.contains("x = \"v\""), "hover was {text}");
        assert!(text.starts_with("```jsonnet"));
    }

    #[test]
    fn test_hover_std_member() {
        let dir = TempDir::new().unwrap();
        let state = WorldState::default();
        let doc = open(&state, &dir.path().join("a.jsonnet"), "std.max(1, 2)");
        let hover = hover(&state, &doc, Position::new(0, 5)).unwrap();
        assert_eq!(hover.range, Some(Range::new(Position::new(0, 0), Position::new(0, 7))));
        assert!(hover_text(hover).starts_with("`std.max(a, b)`\n\n"));
    }

    #[test]
    fn test_hover_shadowed_std_is_a_plain_field() {
        let dir = TempDir::new().unwrap();
        let state = WorldState::default();
        let doc = open(
            &state,
            &dir.path().join("a.jsonnet"),
            "local std = { max: 1 }; std.max",
        );
        let text = hover_text(hover(&state, &doc, Position::new(0, 29)).unwrap());
        assert!(!text.contains("std.max(a, b)"), "local std is not the library: {text}");
        assert!(text.contains("max: 1"), "hover was {text}");
    }

    #[test]
    fn test_hover_several_definitions_get_headers() {
        let dir = TempDir::new().unwrap();
        let state = WorldState::default();
        let text = "local a = { f: 1 };\n(a + { f: 2 }).f";
        let doc = open(&state, &dir.path().join("a.jsonnet"), text);
        let text = hover_text(hover(&state, &doc, Position::new(1, 15)).unwrap());
        assert_eq!(text.matches("## `").count(), 2, "hover was {text}");
    }

    #[test]
    fn test_hover_skipped_on_parse_error() {
        let dir = TempDir::new().unwrap();
        let state = WorldState::default();
        let doc = open(&state, &dir.path().join("a.jsonnet"), "{ a: ) }");
        assert!(hover(&state, &doc, Position::new(0, 2)).is_none());
    }

    #[test]
    fn test_references_across_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("lib.libsonnet"), "{\n  x: 1,\n  y: self.x,\n}").unwrap();
        std::fs::write(dir.path().join("other.jsonnet"), "local x = 5; x").unwrap();
        let state = WorldState::default();
        let doc = open(
            &state,
            &dir.path().join("main.jsonnet"),
            "local l = import 'lib.libsonnet';\nl.x + l.y",
        );

        let locations = references(&state, &doc, Position::new(1, 2), true).unwrap();
        let found: Vec<(String, u32)> = locations
            .iter()
            .map(|l| {
                let name = l.uri.path().rsplit('/').next().unwrap().to_string();
                (name, l.range.start.line)
            })
            .collect();
        assert_eq!(
            found,
            vec![
                ("lib.libsonnet".to_string(), 1),
                ("lib.libsonnet".to_string(), 2),
                ("main.jsonnet".to_string(), 1),
            ],
            "the unrelated local x in other.jsonnet is not a reference"
        );

        let without = references(&state, &doc, Position::new(1, 2), false).unwrap();
        assert_eq!(without.len(), 2);
    }

    #[test]
    fn test_rename_local() {
        let dir = TempDir::new().unwrap();
        let state = WorldState::default();
        let text = "local value = 1;\n{ a: value, b: value + 1 }";
        let doc = open(&state, &dir.path().join("a.jsonnet"), text);
        let edit = rename(&state, &doc, Position::new(1, 6), "renamed").unwrap().unwrap();
        let changes = edit.changes.unwrap();
        let edits = changes.values().next().unwrap();
        assert_eq!(edits.len(), 3);

        let mut renamed = text.to_string();
        let index = LineIndex::new(text);
        let mut offsets: Vec<(usize, usize)> = edits
            .iter()
            .map(|e| {
                (
                    index.offset(protocol_to_ast(e.range.start)),
                    index.offset(protocol_to_ast(e.range.end)),
                )
            })
            .collect();
        offsets.sort();
        for (start, end) in offsets.into_iter().rev() {
            renamed.replace_range(start..end, "renamed");
        }
        assert_eq!(renamed, "local renamed = 1;\n{ a: renamed, b: renamed + 1 }");
        assert!(parse("a.jsonnet", &renamed).is_ok());

        assert!(rename(&state, &doc, Position::new(1, 6), "not valid").is_err());
    }

    #[test]
    fn test_references_respect_max_results() {
        let dir = TempDir::new().unwrap();
        let mut config = Configuration::default();
        config.references.max_results = 2;
        let state = WorldState::new(config);
        let doc = open(&state, &dir.path().join("a.jsonnet"), "local v = 1; [v, v, v]");
        assert_eq!(references(&state, &doc, Position::new(0, 14), true).unwrap().len(), 2);
    }

    #[test]
    fn test_signature_help_active_parameter() {
        let dir = TempDir::new().unwrap();
        let state = WorldState::default();
        let text = "local f(a,b,c) = a; f(1, , 3)";
        let doc = open(&state, &dir.path().join("a.jsonnet"), text);
        let help = signature_help(&state, &doc, Position::new(0, 25)).expect("signature");
        assert_eq!(help.active_parameter, Some(1));
        assert_eq!(help.signatures[0].label, "f(a, b, c)");
    }

    #[test]
    fn test_document_symbols() {
        let dir = TempDir::new().unwrap();
        let state = WorldState::default();
        let text = "local helper(x) = x;\n{\n  a: { nested: 1 },\n  m(y): y,\n}";
        let doc = open(&state, &dir.path().join("a.jsonnet"), text);
        let Some(DocumentSymbolResponse::Nested(symbols)) = document_symbol(&doc) else {
            panic!("expected nested symbols");
        };
        let names: Vec<_> = symbols.iter().map(|s| (s.name.as_str(), s.kind)).collect();
        assert_eq!(
            names,
            vec![("helper", SymbolKind::FUNCTION), ("a", SymbolKind::FIELD), ("m", SymbolKind::METHOD)]
        );
        assert_eq!(symbols[1].children.as_ref().map(|c| c.len()), Some(1));
    }

    #[test]
    fn test_formatting_trims_whitespace() {
        let uri = Url::parse("file:///w/a.jsonnet").unwrap();
        let doc = Document::new(uri.clone(), "{  \n  a: 1,\t\n}\n\n\n", 1);
        let edits = formatting(&doc);
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].new_text, "{\n  a: 1,\n}\n");

        let clean = Document::new(uri, "{ a: 1 }\n", 1);
        assert!(formatting(&clean).is_empty());
    }
}
