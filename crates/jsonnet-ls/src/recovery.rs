//
// recovery.rs
//
// Recovering a usable AST from text that is mid-edit
//

use std::collections::BTreeSet;

use jsonnet_core::ast::LineIndex;
use jsonnet_core::{parse, NodeRef, StaticError};

const REMOVED_ENDINGS: [char; 2] = ['.', ','];

/// Tried in order at the end of the first edited line. `.a` turns a dangling
/// `super.` into a parsable index.
const ADDED_ENDINGS: [&str; 11] = [";", "),", ",", ")", "[]", "{}", ".a", "]", "],", "\"", "\";"];

/// Byte offset of the first difference between the two texts.
fn diff_position(new_text: &str, old_text: &str) -> usize {
    new_text
        .bytes()
        .zip(old_text.bytes())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| {
            if new_text.len() > old_text.len() {
                old_text.len()
            } else {
                0
            }
        })
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Parses `new_text`, falling back to a few suffix mutations of the line that
/// holds the first change against `old_text`. Without an old text the line
/// the parse error points at is mutated instead.
pub fn fixed_ast(filename: &str, new_text: &str, old_text: &str) -> Result<NodeRef, StaticError> {
    let original_error = match parse(filename, new_text) {
        Ok(ast) => return Ok(ast),
        Err(err) => err,
    };

    let anchor = if old_text.is_empty() {
        LineIndex::new(new_text).offset(original_error.loc.begin)
    } else {
        diff_position(new_text, old_text)
    };
    let diff = floor_char_boundary(new_text, anchor);
    let mut line_end = new_text[diff..]
        .find('\n')
        .map(|i| i + diff)
        .unwrap_or(new_text.len());
    let mut text = new_text.to_string();

    while line_end > 0 {
        let Some(last) = text[..line_end].chars().next_back() else {
            break;
        };
        if !REMOVED_ENDINGS.contains(&last) {
            break;
        }
        text.replace_range(line_end - 1..line_end, "");
        line_end -= 1;
    }
    if let Ok(ast) = parse(filename, &text) {
        log::debug!("fixed ast by removing trailing characters");
        return Ok(ast);
    }

    for ending in ADDED_ENDINGS {
        let candidate = format!("{}{}{}", &text[..line_end], ending, &text[line_end..]);
        if let Ok(ast) = parse(filename, &candidate) {
            log::info!("fixed ast with {ending:?}");
            return Ok(ast);
        }
    }

    log::warn!("unable to fix ast for {filename}");
    Err(original_error)
}

/// Zero-based indices of old lines that are absent or different in the new text.
pub fn changed_lines(old_text: &str, new_text: &str) -> BTreeSet<usize> {
    let new_lines: Vec<&str> = new_text.split('\n').collect();
    old_text
        .split('\n')
        .enumerate()
        .filter(|(i, line)| new_lines.get(*i) != Some(line))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonnet_core::NodeKind;

    #[test]
    fn test_clean_text_parses_directly() {
        let ast = fixed_ast("a.jsonnet", "{ a: 1 }", "").expect("valid text should parse");
        assert!(matches!(ast.kind, NodeKind::DesugaredObject { .. }));
    }

    #[test]
    fn test_trailing_dot_is_removed() {
        let old = "{\n  a: self.foo,\n  foo: 1,\n}";
        let new = "{\n  a: self.,\n  foo: 1,\n}";
        let ast = fixed_ast("a.jsonnet", new, old).expect("trailing dot should be recoverable");
        let NodeKind::DesugaredObject { fields, .. } = &ast.kind else {
            panic!("expected object, got {}", ast.kind_name());
        };
        assert_eq!(fields.len(), 2);
        assert!(matches!(fields[0].body.kind, NodeKind::Self_));
    }

    #[test]
    fn test_fresh_text_mutates_error_line() {
        let text = "local o = { x: 1 };\no.";
        let ast = fixed_ast("a.jsonnet", text, "").expect("dangling dot on the last line");
        assert!(matches!(ast.kind, NodeKind::Local { .. }));
    }

    #[test]
    fn test_missing_semicolon_is_added() {
        let old = "local a = { b: 1 };\na";
        let new = "local a = { b: 1 }\na";
        let ast = fixed_ast("a.jsonnet", new, old).expect("semicolon should be inserted");
        assert!(matches!(ast.kind, NodeKind::Local { .. }));
    }

    #[test]
    fn test_unclosed_call_is_closed() {
        let old = "local f(x) = x;\nf(1)";
        let new = "local f(x) = x;\nf(1";
        assert!(fixed_ast("a.jsonnet", new, old).is_ok());
    }

    #[test]
    fn test_unrecoverable_keeps_original_error() {
        let err = fixed_ast("a.jsonnet", "{ a: ) ( }", "{ a: 1 }").unwrap_err();
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_changed_lines() {
        let old = "a\nb\nc";
        let new = "a\nB\nc\nd";
        assert_eq!(changed_lines(old, new), BTreeSet::from([1]));
        assert_eq!(changed_lines("a\nb\nc", "a"), BTreeSet::from([1, 2]));
        assert!(changed_lines("x", "x").is_empty());
    }
}
