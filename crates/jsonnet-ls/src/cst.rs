//
// cst.rs
//
// Token-level reading of the raw text around the cursor. Works on text that
// does not parse, which is the common case while typing.
//

use jsonnet_core::lexer::{lex_partial, Token, TokenKind};

/// What the user is completing at the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionContext {
    /// A bare identifier, possibly empty.
    Global { prefix: String },
    /// `base.prefix`: byte offsets delimit `base` in the text.
    Index {
        base_start: usize,
        base_end: usize,
        prefix: String,
        /// Nothing typed after the dot yet, so a parsed document holds no
        /// index node for the cursor.
        inject_index: bool,
    },
    /// Inside the string of an `import`.
    Import { partial_path: String },
}

/// The call whose argument list contains the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Byte offsets of the called expression.
    pub target_start: usize,
    pub target_end: usize,
    pub open_paren: usize,
    /// Offset of the matching `)`, when the call is closed.
    pub close_paren: Option<usize>,
    /// Zero-based index of the argument under the cursor.
    pub argument_index: usize,
    /// Names already passed as `name=value`.
    pub named: Vec<String>,
}

fn is_identifier_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn is_atom(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Ident(_)
            | TokenKind::SelfKw
            | TokenKind::Super
            | TokenKind::Dollar
            | TokenKind::Str(_)
            | TokenKind::Number(..)
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null
    )
}

fn closing_for(kind: &TokenKind) -> Option<TokenKind> {
    match kind {
        TokenKind::RParen => Some(TokenKind::LParen),
        TokenKind::RBracket => Some(TokenKind::LBracket),
        TokenKind::RBrace => Some(TokenKind::LBrace),
        _ => None,
    }
}

/// Index of the bracket opening the group closed at `close`.
fn matching_open(tokens: &[Token], close: usize) -> Option<usize> {
    let open = closing_for(&tokens[close].kind)?;
    let close_kind = &tokens[close].kind;
    let mut depth = 0usize;
    for i in (0..=close).rev() {
        if tokens[i].kind == *close_kind {
            depth += 1;
        } else if tokens[i].kind == open {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Start of the postfix expression (`a.b(c)[d]`) whose last token is `last`.
fn expression_start(tokens: &[Token], last: usize) -> Option<usize> {
    let mut i = last;
    let mut start = None;
    loop {
        let token = &tokens[i];
        if closing_for(&token.kind).is_some() {
            let open = matching_open(tokens, i)?;
            start = Some(tokens[open].span.start);
            if open == 0 {
                break;
            }
            let prev = &tokens[open - 1].kind;
            if is_atom(prev) || closing_for(prev).is_some() {
                i = open - 1;
            } else if *prev == TokenKind::Dot && open >= 2 {
                i = open - 2;
            } else {
                break;
            }
        } else if is_atom(&token.kind) {
            start = Some(token.span.start);
            if i == 0 {
                break;
            }
            match &tokens[i - 1].kind {
                TokenKind::Dot if i >= 2 => i -= 2,
                TokenKind::Import | TokenKind::ImportStr | TokenKind::ImportBin
                    if matches!(token.kind, TokenKind::Str(_)) =>
                {
                    start = Some(tokens[i - 1].span.start);
                    break;
                }
                _ => break,
            }
        } else {
            break;
        }
    }
    start
}

/// Offset of the quote opening the string the cursor is in, if any.
fn open_string_start(text: &str, offset: usize) -> Option<usize> {
    let line_start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut open: Option<(usize, char)> = None;
    let mut escaped = false;
    for (i, c) in text[line_start..offset].char_indices() {
        match open {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some((_, quote)) if c == quote => open = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => open = Some((line_start + i, c)),
            None => {}
        }
    }
    open.map(|(start, _)| start)
}

/// Classifies the cursor at byte `offset` of `text`.
pub fn completion_context(text: &str, offset: usize) -> CompletionContext {
    let offset = floor_boundary(text, offset);

    if let Some(quote) = open_string_start(text, offset) {
        let before = lex_partial(&text[..quote]);
        if matches!(
            before.last().map(|t| &t.kind),
            Some(TokenKind::Import | TokenKind::ImportStr | TokenKind::ImportBin)
        ) {
            return CompletionContext::Import {
                partial_path: text[quote + 1..offset].to_string(),
            };
        }
    }

    let prefix_start = text[..offset]
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_identifier_char(*c))
        .last()
        .map(|(i, _)| i)
        .unwrap_or(offset);
    let prefix = text[prefix_start..offset].to_string();
    let before = text[..prefix_start].trim_end();

    if before.ends_with('.') && !before.ends_with("..") {
        let dot = before.len() - 1;
        let tokens = lex_partial(&text[..dot]);
        if let Some(start) = tokens
            .len()
            .checked_sub(1)
            .and_then(|last| expression_start(&tokens, last))
        {
            let base_end = tokens.last().map(|t| t.span.end).unwrap_or(dot);
            return CompletionContext::Index {
                base_start: start,
                base_end,
                inject_index: prefix.is_empty(),
                prefix,
            };
        }
    }
    CompletionContext::Global { prefix }
}

/// Finds the call whose parentheses enclose byte `offset` of `text`.
pub fn call_context(text: &str, offset: usize) -> Option<CallContext> {
    let offset = floor_boundary(text, offset);
    let tokens = lex_partial(&text[..offset]);
    let mut depth = 0usize;
    let mut argument_index = 0;
    let mut named = Vec::new();

    for i in (0..tokens.len()).rev() {
        let kind = &tokens[i].kind;
        match kind {
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => depth += 1,
            TokenKind::LBracket | TokenKind::LBrace if depth == 0 => return None,
            TokenKind::LBracket | TokenKind::LBrace => depth -= 1,
            TokenKind::LParen if depth > 0 => depth -= 1,
            TokenKind::LParen => {
                let target_last = i.checked_sub(1)?;
                let prev = &tokens[target_last].kind;
                if !(is_atom(prev) || closing_for(prev).is_some()) {
                    return None;
                }
                if declares_parameters(&tokens, target_last) {
                    return None;
                }
                let target_start = expression_start(&tokens, target_last)?;
                named.reverse();
                return Some(CallContext {
                    target_start,
                    target_end: tokens[target_last].span.end,
                    open_paren: tokens[i].span.start,
                    close_paren: closing_paren(text, tokens[i].span.start),
                    argument_index,
                    named,
                });
            }
            TokenKind::Semicolon if depth == 0 => return None,
            TokenKind::Comma if depth == 0 => argument_index += 1,
            TokenKind::Assign if depth == 0 => {
                if let Some(TokenKind::Ident(name)) = i.checked_sub(1).map(|p| &tokens[p].kind) {
                    named.push(name.clone());
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether the name at token `name`, followed by `(`, is a function being
/// declared: a `local` bind, possibly after others in the same `local`, or
/// an object method.
fn declares_parameters(tokens: &[Token], name: usize) -> bool {
    if !matches!(tokens[name].kind, TokenKind::Ident(_)) {
        return false;
    }
    let Some(before) = name.checked_sub(1) else {
        return false;
    };
    match tokens[before].kind {
        TokenKind::Local | TokenKind::LBrace => true,
        TokenKind::Comma => {
            let mut depth = 0usize;
            for token in tokens[..before].iter().rev() {
                match token.kind {
                    TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => depth += 1,
                    TokenKind::LParen | TokenKind::LBracket if depth == 0 => return false,
                    TokenKind::LBrace | TokenKind::Local if depth == 0 => return true,
                    TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth -= 1,
                    TokenKind::Semicolon if depth == 0 => return false,
                    _ => {}
                }
            }
            false
        }
        _ => false,
    }
}

/// Offset of the `)` matching the `(` at `open`.
fn closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for token in lex_partial(&text[open..]) {
        match token.kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return (token.kind == TokenKind::RParen).then_some(open + token.span.start);
                }
            }
            _ => {}
        }
    }
    None
}

/// `text` with the arguments of `call` replaced by spaces, so that a call
/// with unfinished arguments parses. Offsets and lines are preserved.
pub fn blank_arguments(text: &str, call: &CallContext) -> Option<String> {
    let close = call.close_paren?;
    let arguments = &text[call.open_paren + 1..close];
    let blanked: String = arguments
        .chars()
        .map(|c| if c == '\n' { '\n' } else { ' ' })
        .collect();
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..call.open_paren + 1]);
    // multi-byte characters become single spaces; pad to keep later offsets
    out.push_str(&blanked);
    out.extend(std::iter::repeat(' ').take(arguments.len() - blanked.len()));
    out.push_str(&text[close..]);
    Some(out)
}

fn floor_boundary(text: &str, mut offset: usize) -> usize {
    offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_at_end(text: &str) -> CompletionContext {
        completion_context(text, text.len())
    }

    #[test]
    fn test_global_prefix() {
        assert_eq!(
            context_at_end("local abc = 1; ab"),
            CompletionContext::Global { prefix: "ab".into() }
        );
        assert_eq!(
            context_at_end("{ a: "),
            CompletionContext::Global { prefix: String::new() }
        );
    }

    #[test]
    fn test_index_after_dot() {
        let text = "local l = import 'lib.libsonnet'; l.";
        match context_at_end(text) {
            CompletionContext::Index { base_start, base_end, prefix, inject_index } => {
                assert_eq!(&text[base_start..base_end], "l");
                assert_eq!(prefix, "");
                assert!(inject_index);
            }
            other => panic!("expected an index context, got {other:?}"),
        }
    }

    #[test]
    fn test_index_with_calls_and_brackets() {
        let text = "x + a.b(1, [2])['k'].c.pre";
        match context_at_end(text) {
            CompletionContext::Index { base_start, base_end, prefix, inject_index } => {
                assert_eq!(&text[base_start..base_end], "a.b(1, [2])['k'].c");
                assert_eq!(prefix, "pre");
                assert!(!inject_index);
            }
            other => panic!("expected an index context, got {other:?}"),
        }
    }

    #[test]
    fn test_std_and_self_bases() {
        let text = "{ a: std.ma";
        assert!(matches!(
            context_at_end(text),
            CompletionContext::Index { base_start: 5, base_end: 8, .. }
        ));
        let text = "{ a: self.";
        assert!(matches!(
            context_at_end(text),
            CompletionContext::Index { base_start: 5, base_end: 9, .. }
        ));
    }

    #[test]
    fn test_import_string() {
        assert_eq!(
            context_at_end("local l = import 'lib/ut"),
            CompletionContext::Import { partial_path: "lib/ut".into() }
        );
        assert_eq!(
            context_at_end("local s = 'not an import"),
            CompletionContext::Global { prefix: "import".into() }
        );
    }

    #[test]
    fn test_call_context_counts_arguments() {
        let text = "local f(a,b,c) = a; f(1, , 3)";
        let offset = text.find(", ,").unwrap() + 2;
        let call = call_context(text, offset).expect("inside a call");
        assert_eq!(call.argument_index, 1);
        assert_eq!(&text[call.target_start..call.target_end], "f");
        assert_eq!(call.close_paren, Some(text.len() - 1));
    }

    #[test]
    fn test_call_context_skips_nested_groups() {
        let text = "obj.fn([1, 2], { a: 1, b: 2 }, g(3, 4), ";
        let call = call_context(text, text.len()).unwrap();
        assert_eq!(call.argument_index, 3);
        assert_eq!(&text[call.target_start..call.target_end], "obj.fn");
        assert_eq!(call.close_paren, None);
    }

    #[test]
    fn test_call_context_named_arguments() {
        let text = "f(1, b=2, ";
        let call = call_context(text, text.len()).unwrap();
        assert_eq!(call.named, vec!["b".to_string()]);
    }

    #[test]
    fn test_no_call_context() {
        assert!(call_context("local f(a", 9).is_none(), "parameter lists are not calls");
        assert!(call_context("[1, 2", 5).is_none());
        assert!(call_context("(1 + 2", 6).is_none());
    }

    #[test]
    fn test_declarations_are_not_calls() {
        for text in [
            "local a = 1, f(x",
            "local a = g(1, 2), f(x",
            "{ f(x",
            "{ a: 1, f(x",
            "{ local a = 1, f(x",
            "function(x",
        ] {
            assert!(call_context(text, text.len()).is_none(), "{text} declares parameters");
        }
        for text in ["local a = 1; f(x", "local a = 1, b = f(x", "g(1, f(x", "[1, f(x"] {
            let call = call_context(text, text.len()).expect("inside a call");
            assert_eq!(&text[call.target_start..call.target_end], "f", "{text}");
        }
    }

    #[test]
    fn test_blank_arguments_keeps_offsets() {
        let text = "local f(a,b,c) = a;\nf(1, é, 3)";
        let offset = text.rfind(',').unwrap();
        let call = call_context(text, offset).unwrap();
        let blanked = blank_arguments(text, &call).unwrap();
        assert_eq!(blanked.len(), text.len());
        assert!(blanked.ends_with("f(        )"), "got {blanked:?}");
    }
}
