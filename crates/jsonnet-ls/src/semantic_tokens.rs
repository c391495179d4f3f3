//
// semantic_tokens.rs
//
// Semantic token classification of the AST
//

use jsonnet_core::ast::{children, Bind, LocationRange, Node, NodeKind, NodeRef};
use tower_lsp::lsp_types::{
    SemanticToken, SemanticTokenModifier, SemanticTokenType, SemanticTokens, SemanticTokensLegend,
};

use crate::processing::{find_binder, BinderKind};

pub const TOKEN_TYPES: [SemanticTokenType; 23] = [
    SemanticTokenType::NAMESPACE,
    SemanticTokenType::TYPE,
    SemanticTokenType::CLASS,
    SemanticTokenType::ENUM,
    SemanticTokenType::INTERFACE,
    SemanticTokenType::STRUCT,
    SemanticTokenType::TYPE_PARAMETER,
    SemanticTokenType::PARAMETER,
    SemanticTokenType::VARIABLE,
    SemanticTokenType::PROPERTY,
    SemanticTokenType::ENUM_MEMBER,
    SemanticTokenType::EVENT,
    SemanticTokenType::FUNCTION,
    SemanticTokenType::METHOD,
    SemanticTokenType::MACRO,
    SemanticTokenType::KEYWORD,
    SemanticTokenType::MODIFIER,
    SemanticTokenType::COMMENT,
    SemanticTokenType::STRING,
    SemanticTokenType::NUMBER,
    SemanticTokenType::REGEXP,
    SemanticTokenType::OPERATOR,
    SemanticTokenType::DECORATOR,
];

pub const TOKEN_MODIFIERS: [SemanticTokenModifier; 10] = [
    SemanticTokenModifier::DECLARATION,
    SemanticTokenModifier::DEFINITION,
    SemanticTokenModifier::READONLY,
    SemanticTokenModifier::STATIC,
    SemanticTokenModifier::DEPRECATED,
    SemanticTokenModifier::ABSTRACT,
    SemanticTokenModifier::ASYNC,
    SemanticTokenModifier::MODIFICATION,
    SemanticTokenModifier::DOCUMENTATION,
    SemanticTokenModifier::DEFAULT_LIBRARY,
];

// indices into TOKEN_TYPES
const NAMESPACE: u32 = 0;
const PARAMETER: u32 = 7;
const VARIABLE: u32 = 8;
const PROPERTY: u32 = 9;
const FUNCTION: u32 = 12;
const METHOD: u32 = 13;
const KEYWORD: u32 = 15;
const STRING: u32 = 18;
const NUMBER: u32 = 19;

// bits of the modifier mask
const DECLARATION: u32 = 1 << 0;
const DEFAULT_LIBRARY: u32 = 1 << 9;

pub fn legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: TOKEN_TYPES.to_vec(),
        token_modifiers: TOKEN_MODIFIERS.to_vec(),
    }
}

/// A token in absolute coordinates, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AbsoluteToken {
    pub line: u32,
    pub start: u32,
    pub length: u32,
    pub token_type: u32,
    pub modifiers: u32,
}

#[derive(Debug, Default)]
struct TokenCollector {
    tokens: Vec<AbsoluteToken>,
}

impl TokenCollector {
    /// Adds a token at the start of `loc`. Without an explicit `length` the
    /// range must be on one line.
    fn add(&mut self, loc: &LocationRange, length: Option<u32>, token_type: u32, modifiers: u32) {
        if !loc.is_set() {
            return;
        }
        let length = match length {
            Some(length) => length,
            None if loc.begin.line == loc.end.line => loc.end.column - loc.begin.column,
            None => return,
        };
        if length == 0 {
            return;
        }
        self.tokens.push(AbsoluteToken {
            line: loc.begin.line - 1,
            start: loc.begin.column - 1,
            length,
            token_type,
            modifiers,
        });
    }

    fn add_binds(&mut self, binds: &[Bind]) {
        for bind in binds {
            let token_type = match bind.body.kind {
                NodeKind::Function { .. } => FUNCTION,
                _ => VARIABLE,
            };
            self.add(&bind.variable_loc, None, token_type, DECLARATION);
        }
    }

    fn visit(&mut self, node: &NodeRef, ancestors: &mut Vec<NodeRef>) {
        self.classify(node, ancestors);
        ancestors.push(node.clone());
        for child in children(node) {
            self.visit(child, ancestors);
        }
        ancestors.pop();
    }

    fn classify(&mut self, node: &NodeRef, ancestors: &[NodeRef]) {
        let loc = &node.loc;
        match &node.kind {
            NodeKind::Self_ => self.add(loc, Some(4), VARIABLE, DEFAULT_LIBRARY),
            NodeKind::SuperIndex { .. } => self.add(loc, Some(5), VARIABLE, DEFAULT_LIBRARY),
            NodeKind::Dollar => self.add(loc, Some(1), VARIABLE, DEFAULT_LIBRARY),
            NodeKind::LiteralNull => self.add(loc, Some(4), VARIABLE, DEFAULT_LIBRARY),
            NodeKind::LiteralBoolean(value) => {
                let length = if *value { 4 } else { 5 };
                self.add(loc, Some(length), KEYWORD, DEFAULT_LIBRARY);
            }
            NodeKind::Import { .. } => self.add(loc, Some(6), KEYWORD, 0),
            NodeKind::ImportStr { .. } | NodeKind::ImportBin { .. } => self.add(loc, Some(9), KEYWORD, 0),
            NodeKind::Local { binds, .. } => {
                self.add(loc, Some(5), KEYWORD, 0);
                self.add_binds(binds);
            }
            NodeKind::DesugaredObject { locals, .. } => self.add_binds(locals),
            NodeKind::Function { params, .. } => {
                for param in params {
                    let length = param.name.encode_utf16().count() as u32;
                    self.add(&param.loc, Some(length), PARAMETER, DECLARATION);
                }
            }
            NodeKind::Var { id } => {
                let (token_type, modifiers) = var_token(node, id, ancestors);
                self.add(loc, None, token_type, modifiers);
            }
            NodeKind::LiteralString(value) => {
                let (token_type, modifiers) = string_token(node, value, ancestors);
                self.add(loc, None, token_type, modifiers);
            }
            NodeKind::LiteralNumber { .. } => self.add(loc, None, NUMBER, 0),
            _ => log::trace!("no semantic token for {}", node.kind_name()),
        }
    }
}

fn var_token(node: &NodeRef, id: &str, ancestors: &[NodeRef]) -> (u32, u32) {
    let mut chain = ancestors.to_vec();
    chain.push(node.clone());
    let Some(binder) = find_binder(&chain, id) else {
        if id == "std" {
            return (VARIABLE, DEFAULT_LIBRARY);
        }
        return (VARIABLE, 0);
    };
    if binder.kind == BinderKind::Parameter {
        return (PARAMETER, 0);
    }
    match binder.body.as_ref().map(|b| &b.kind) {
        Some(NodeKind::Import { .. }) => (NAMESPACE, 0),
        Some(NodeKind::Self_) => (VARIABLE, DEFAULT_LIBRARY),
        Some(NodeKind::Function { .. }) => (FUNCTION, 0),
        _ => (VARIABLE, 0),
    }
}

/// Whether a string node is written as a bare identifier (`a.name`,
/// `{ name: 1 }`) rather than quoted.
fn is_bare(node: &Node, value: &str) -> bool {
    node.loc.begin.line == node.loc.end.line
        && (node.loc.end.column - node.loc.begin.column) as usize == value.encode_utf16().count()
}

fn string_token(node: &NodeRef, value: &str, ancestors: &[NodeRef]) -> (u32, u32) {
    let Some(parent) = ancestors.last() else {
        return (STRING, 0);
    };
    if !is_bare(node, value) {
        return (STRING, 0);
    }
    match &parent.kind {
        NodeKind::Index { index, .. } if Node::same(index, node) => {
            let called = ancestors.len() >= 2
                && matches!(
                    &ancestors[ancestors.len() - 2].kind,
                    NodeKind::Apply { target, .. } if Node::same(target, parent)
                );
            if called {
                (FUNCTION, 0)
            } else {
                (PROPERTY, 0)
            }
        }
        NodeKind::SuperIndex { index } if Node::same(index, node) => (PROPERTY, 0),
        NodeKind::DesugaredObject { fields, .. } => {
            match fields.iter().find(|f| Node::same(&f.name, node)) {
                Some(field) if matches!(field.body.kind, NodeKind::Function { .. }) => (METHOD, DECLARATION),
                Some(_) => (PROPERTY, DECLARATION),
                None => (STRING, 0),
            }
        }
        _ => (STRING, 0),
    }
}

/// Tokens of the tree under `root`, sorted by position.
pub fn absolute_tokens(root: &NodeRef) -> Vec<AbsoluteToken> {
    let mut collector = TokenCollector::default();
    collector.visit(root, &mut Vec::new());
    let mut tokens = collector.tokens;
    tokens.sort();
    tokens.dedup_by(|a, b| a.line == b.line && a.start == b.start);
    tokens
}

/// Relative encoding: line deltas, and start deltas within a line.
pub fn encode(tokens: &[AbsoluteToken]) -> Vec<SemanticToken> {
    let mut previous = (0, 0);
    tokens
        .iter()
        .map(|token| {
            let (line, start) = previous;
            let delta_start = if token.line == line {
                token.start - start
            } else {
                token.start
            };
            previous = (token.line, token.start);
            SemanticToken {
                delta_line: token.line - line,
                delta_start,
                length: token.length,
                token_type: token.token_type,
                token_modifiers_bitset: token.modifiers,
            }
        })
        .collect()
}

pub fn semantic_tokens_full(root: &NodeRef) -> SemanticTokens {
    SemanticTokens {
        result_id: None,
        data: encode(&absolute_tokens(root)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonnet_core::parse;
    use proptest::prelude::*;

    fn tokens(text: &str) -> Vec<(u32, u32, u32, u32, u32)> {
        let root = parse("t.jsonnet", text).expect("fixture should parse");
        absolute_tokens(&root)
            .iter()
            .map(|t| (t.line, t.start, t.length, t.token_type, t.modifiers))
            .collect()
    }

    #[test]
    fn test_legend_indices_match_constants() {
        assert_eq!(TOKEN_TYPES[VARIABLE as usize], SemanticTokenType::VARIABLE);
        assert_eq!(TOKEN_TYPES[FUNCTION as usize], SemanticTokenType::FUNCTION);
        assert_eq!(TOKEN_TYPES[KEYWORD as usize], SemanticTokenType::KEYWORD);
        assert_eq!(TOKEN_TYPES[NAMESPACE as usize], SemanticTokenType::NAMESPACE);
        assert_eq!(TOKEN_MODIFIERS[9], SemanticTokenModifier::DEFAULT_LIBRARY);
    }

    #[test]
    fn test_local_and_variables() {
        assert_eq!(
            tokens("local a = 1; a"),
            vec![
                (0, 0, 5, KEYWORD, 0),
                (0, 6, 1, VARIABLE, DECLARATION),
                (0, 10, 1, NUMBER, 0),
                (0, 13, 1, VARIABLE, 0),
            ]
        );
    }

    #[test]
    fn test_std_call_head_is_function() {
        let found = tokens("std.max(1, 2)");
        assert_eq!(found[0], (0, 0, 3, VARIABLE, DEFAULT_LIBRARY));
        assert_eq!(found[1], (0, 4, 3, FUNCTION, 0));
    }

    #[test]
    fn test_import_binding_is_namespace() {
        let found = tokens("local lib = import 'lib.libsonnet';\nlib.x");
        assert!(found.contains(&(0, 12, 6, KEYWORD, 0)));
        assert!(found.contains(&(1, 0, 3, NAMESPACE, 0)));
        assert!(found.contains(&(1, 4, 1, PROPERTY, 0)));
    }

    #[test]
    fn test_fields_and_keywords() {
        let found = tokens("{ a: self.b, 'q': null, m(x): x }");
        assert!(found.contains(&(0, 2, 1, PROPERTY, DECLARATION)));
        assert!(found.contains(&(0, 5, 4, VARIABLE, DEFAULT_LIBRARY)));
        assert!(found.contains(&(0, 13, 3, STRING, 0)));
        assert!(found.contains(&(0, 18, 4, VARIABLE, DEFAULT_LIBRARY)));
        assert!(found.contains(&(0, 24, 1, METHOD, DECLARATION)));
        assert!(found.contains(&(0, 26, 1, PARAMETER, DECLARATION)));
        assert!(found.contains(&(0, 30, 1, PARAMETER, 0)));
    }

    #[test]
    fn test_delta_encoding() {
        let encoded = encode(&[
            AbsoluteToken { line: 0, start: 2, length: 1, token_type: 8, modifiers: 0 },
            AbsoluteToken { line: 0, start: 6, length: 2, token_type: 9, modifiers: 0 },
            AbsoluteToken { line: 2, start: 4, length: 3, token_type: 18, modifiers: 1 },
        ]);
        let flat: Vec<u32> = encoded
            .iter()
            .flat_map(|t| [t.delta_line, t.delta_start, t.length, t.token_type, t.token_modifiers_bitset])
            .collect();
        assert_eq!(flat, vec![0, 2, 1, 8, 0, 0, 4, 2, 9, 0, 2, 4, 3, 18, 1]);
    }

    proptest! {
        #[test]
        fn prop_tokens_are_ordered(values in proptest::collection::vec(0u32..1000, 0..12)) {
            let text = format!(
                "local xs = [{}];\n{{ total: std.length(xs), first: xs[0] }}",
                values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
            );
            let root = parse("t.jsonnet", &text).unwrap();
            let found = absolute_tokens(&root);
            for pair in found.windows(2) {
                prop_assert!((pair[0].line, pair[0].start) < (pair[1].line, pair[1].start));
            }
        }
    }
}
