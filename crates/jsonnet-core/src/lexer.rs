//
// lexer.rs
//
// Jsonnet tokenizer built on logos
//

use std::ops::Range;
use std::sync::Arc;

use logos::Logos;

use crate::ast::{LineIndex, LocationRange};
use crate::error::StaticError;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    Assert,
    Else,
    Error,
    False,
    For,
    Function,
    If,
    Import,
    ImportStr,
    ImportBin,
    In,
    Local,
    Null,
    SelfKw,
    Super,
    Tailstrict,
    Then,
    True,

    // Punctuation
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Colon,
    ColonColon,
    ColonColonColon,
    Dollar,

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    ShiftL,
    ShiftR,

    // Literals
    Ident(String),
    Number(f64, String),
    Str(String),

    /// Input the lexer could not make sense of. Only produced by [`lex_partial`].
    Invalid,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(id) => format!("IDENTIFIER \"{id}\""),
            TokenKind::Number(_, text) => format!("NUMBER \"{text}\""),
            TokenKind::Str(s) => format!("STRING \"{s}\""),
            TokenKind::Invalid => "invalid input".to_string(),
            other => format!("\"{}\"", other.text()),
        }
    }

    fn text(&self) -> &'static str {
        match self {
            TokenKind::Assert => "assert",
            TokenKind::Else => "else",
            TokenKind::Error => "error",
            TokenKind::False => "false",
            TokenKind::For => "for",
            TokenKind::Function => "function",
            TokenKind::If => "if",
            TokenKind::Import => "import",
            TokenKind::ImportStr => "importstr",
            TokenKind::ImportBin => "importbin",
            TokenKind::In => "in",
            TokenKind::Local => "local",
            TokenKind::Null => "null",
            TokenKind::SelfKw => "self",
            TokenKind::Super => "super",
            TokenKind::Tailstrict => "tailstrict",
            TokenKind::Then => "then",
            TokenKind::True => "true",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::ColonColon => "::",
            TokenKind::ColonColonColon => ":::",
            TokenKind::Dollar => "$",
            TokenKind::Assign => "=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Bang => "!",
            TokenKind::Tilde => "~",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::ShiftL => "<<",
            TokenKind::ShiftR => ">>",
            TokenKind::Ident(_) | TokenKind::Number(..) | TokenKind::Str(_) | TokenKind::Invalid => "",
        }
    }
}

const KEYWORDS: &[&str] = &[
    "assert",
    "else",
    "error",
    "false",
    "for",
    "function",
    "if",
    "import",
    "importstr",
    "importbin",
    "in",
    "local",
    "null",
    "self",
    "super",
    "tailstrict",
    "then",
    "true",
];

pub fn is_keyword(id: &str) -> bool {
    KEYWORDS.contains(&id)
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"#[^\n]*")]
enum RawToken {
    #[token("/*", block_comment)]
    BlockComment,

    #[token("assert")]
    Assert,
    #[token("else")]
    Else,
    #[token("error")]
    Error,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("function")]
    Function,
    #[token("if")]
    If,
    #[token("import")]
    Import,
    #[token("importstr")]
    ImportStr,
    #[token("importbin")]
    ImportBin,
    #[token("in")]
    In,
    #[token("local")]
    Local,
    #[token("null")]
    Null,
    #[token("self")]
    SelfKw,
    #[token("super")]
    Super,
    #[token("tailstrict")]
    Tailstrict,
    #[token("then")]
    Then,
    #[token("true")]
    True,

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("::")]
    ColonColon,
    #[token(":::")]
    ColonColonColon,
    #[token("$")]
    Dollar,

    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<<")]
    ShiftL,
    #[token(">>")]
    ShiftR,

    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[token("\"", |lex| quoted(lex, '"'))]
    #[token("'", |lex| quoted(lex, '\''))]
    #[token("@\"", |lex| verbatim(lex, '"'))]
    #[token("@'", |lex| verbatim(lex, '\''))]
    #[token("|||", text_block)]
    Str(String),

    #[regex(r"[_a-zA-Z][_a-zA-Z0-9]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn block_comment(lex: &mut logos::Lexer<RawToken>) -> bool {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            true
        }
        None => {
            lex.bump(lex.remainder().len());
            false
        }
    }
}

/// Consumes a quoted string body up to and including the closing quote.
fn quoted(lex: &mut logos::Lexer<RawToken>, quote: char) -> Option<String> {
    let rest = lex.remainder();
    let mut escaped = false;
    let mut end = None;
    for (i, c) in rest.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            end = Some(i);
            break;
        }
    }
    let Some(end) = end else {
        lex.bump(rest.len());
        return None;
    };
    let raw = &rest[..end];
    lex.bump(end + 1);
    unescape(raw)
}

fn verbatim(lex: &mut logos::Lexer<RawToken>, quote: char) -> Option<String> {
    let rest = lex.remainder();
    let mut out = String::new();
    let mut chars = rest.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            if let Some(&(_, next)) = chars.peek() {
                if next == quote {
                    out.push(quote);
                    chars.next();
                    continue;
                }
            }
            lex.bump(i + 1);
            return Some(out);
        }
        out.push(c);
    }
    lex.bump(rest.len());
    None
}

fn text_block(lex: &mut logos::Lexer<RawToken>) -> Option<String> {
    let rest = lex.remainder();
    let (chomp, mut i) = if rest.starts_with('-') { (true, 1) } else { (false, 0) };
    let bytes = rest.as_bytes();
    while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r') {
        i += 1;
    }
    if bytes.get(i) != Some(&b'\n') {
        lex.bump(rest.len());
        return None;
    }
    i += 1;

    let first = &rest[i..];
    let indent_len = first
        .bytes()
        .take_while(|b| *b == b' ' || *b == b'\t')
        .count();
    if indent_len == 0 {
        lex.bump(rest.len());
        return None;
    }
    let indent = &first[..indent_len];

    let mut out = String::new();
    loop {
        let line_end = rest[i..].find('\n').map(|n| i + n);
        let line = &rest[i..line_end.unwrap_or(rest.len())];
        if let Some(content) = line.strip_prefix(indent) {
            let Some(line_end) = line_end else {
                lex.bump(rest.len());
                return None;
            };
            out.push_str(content);
            out.push('\n');
            i = line_end + 1;
        } else if line.trim_matches(|c| c == ' ' || c == '\t' || c == '\r').is_empty() {
            let Some(line_end) = line_end else {
                lex.bump(rest.len());
                return None;
            };
            out.push('\n');
            i = line_end + 1;
        } else {
            let trimmed = line.trim_start_matches([' ', '\t']);
            if !trimmed.starts_with("|||") {
                lex.bump(rest.len());
                return None;
            }
            i += line.len() - trimmed.len() + 3;
            break;
        }
    }
    lex.bump(i);
    if chomp && out.ends_with('\n') {
        out.pop();
    }
    Some(out)
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            '/' => out.push('/'),
            'b' => out.push('\u{0008}'),
            'f' => out.push('\u{000C}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'u' => {
                let high = hex4(&mut chars)?;
                if (0xD800..0xDC00).contains(&high) {
                    if chars.next()? != '\\' || chars.next()? != 'u' {
                        return None;
                    }
                    let low = hex4(&mut chars)?;
                    let cp = 0x10000 + ((high - 0xD800) << 10) + (low.checked_sub(0xDC00)?);
                    out.push(char::from_u32(cp)?);
                } else {
                    out.push(char::from_u32(high)?);
                }
            }
            _ => return None,
        }
    }
    Some(out)
}

fn hex4(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let mut value = 0;
    for _ in 0..4 {
        value = value * 16 + chars.next()?.to_digit(16)?;
    }
    Some(value)
}

fn convert(raw: RawToken, slice: &str) -> Option<TokenKind> {
    Some(match raw {
        RawToken::BlockComment => return None,
        RawToken::Assert => TokenKind::Assert,
        RawToken::Else => TokenKind::Else,
        RawToken::Error => TokenKind::Error,
        RawToken::False => TokenKind::False,
        RawToken::For => TokenKind::For,
        RawToken::Function => TokenKind::Function,
        RawToken::If => TokenKind::If,
        RawToken::Import => TokenKind::Import,
        RawToken::ImportStr => TokenKind::ImportStr,
        RawToken::ImportBin => TokenKind::ImportBin,
        RawToken::In => TokenKind::In,
        RawToken::Local => TokenKind::Local,
        RawToken::Null => TokenKind::Null,
        RawToken::SelfKw => TokenKind::SelfKw,
        RawToken::Super => TokenKind::Super,
        RawToken::Tailstrict => TokenKind::Tailstrict,
        RawToken::Then => TokenKind::Then,
        RawToken::True => TokenKind::True,
        RawToken::LBrace => TokenKind::LBrace,
        RawToken::RBrace => TokenKind::RBrace,
        RawToken::LBracket => TokenKind::LBracket,
        RawToken::RBracket => TokenKind::RBracket,
        RawToken::LParen => TokenKind::LParen,
        RawToken::RParen => TokenKind::RParen,
        RawToken::Comma => TokenKind::Comma,
        RawToken::Dot => TokenKind::Dot,
        RawToken::Semicolon => TokenKind::Semicolon,
        RawToken::Colon => TokenKind::Colon,
        RawToken::ColonColon => TokenKind::ColonColon,
        RawToken::ColonColonColon => TokenKind::ColonColonColon,
        RawToken::Dollar => TokenKind::Dollar,
        RawToken::Assign => TokenKind::Assign,
        RawToken::Plus => TokenKind::Plus,
        RawToken::Minus => TokenKind::Minus,
        RawToken::Star => TokenKind::Star,
        RawToken::Slash => TokenKind::Slash,
        RawToken::Percent => TokenKind::Percent,
        RawToken::Bang => TokenKind::Bang,
        RawToken::Tilde => TokenKind::Tilde,
        RawToken::Amp => TokenKind::Amp,
        RawToken::Pipe => TokenKind::Pipe,
        RawToken::Caret => TokenKind::Caret,
        RawToken::AndAnd => TokenKind::AndAnd,
        RawToken::OrOr => TokenKind::OrOr,
        RawToken::EqEq => TokenKind::EqEq,
        RawToken::NotEq => TokenKind::NotEq,
        RawToken::Lt => TokenKind::Lt,
        RawToken::Gt => TokenKind::Gt,
        RawToken::Le => TokenKind::Le,
        RawToken::Ge => TokenKind::Ge,
        RawToken::ShiftL => TokenKind::ShiftL,
        RawToken::ShiftR => TokenKind::ShiftR,
        RawToken::Number(n) => TokenKind::Number(n, slice.to_string()),
        RawToken::Str(s) => TokenKind::Str(s),
        RawToken::Ident(id) => TokenKind::Ident(id),
    })
}

fn error_message(slice: &str) -> String {
    if slice.starts_with("/*") {
        "multi-line comment has no terminating */".to_string()
    } else if slice.starts_with("|||") {
        "text block not terminated with |||".to_string()
    } else if slice.starts_with('"') || slice.starts_with('\'') || slice.starts_with('@') {
        if slice.len() > 1 && (slice.ends_with('"') || slice.ends_with('\'')) {
            "invalid escape sequence in string".to_string()
        } else {
            "unterminated string".to_string()
        }
    } else {
        format!("could not lex the character {slice:?}")
    }
}

/// Tokenizes `text`, failing on the first invalid input.
pub fn lex(file: &Arc<str>, text: &str, index: &LineIndex) -> Result<Vec<Token>, StaticError> {
    let mut tokens = Vec::new();
    let mut lexer = RawToken::lexer(text);
    while let Some(raw) = lexer.next() {
        let span = lexer.span();
        match raw {
            Ok(raw) => {
                if let Some(kind) = convert(raw, lexer.slice()) {
                    tokens.push(Token { kind, span });
                }
            }
            Err(()) => {
                let loc = LocationRange::new(
                    file.clone(),
                    index.location(span.start),
                    index.location(span.end),
                );
                return Err(StaticError::new(error_message(lexer.slice()), loc));
            }
        }
    }
    Ok(tokens)
}

/// Tokenizes `text` without failing: invalid input becomes [`TokenKind::Invalid`].
pub fn lex_partial(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut lexer = RawToken::lexer(text);
    while let Some(raw) = lexer.next() {
        let span = lexer.span();
        let kind = match raw {
            Ok(raw) => convert(raw, lexer.slice()),
            Err(()) => Some(TokenKind::Invalid),
        };
        if let Some(kind) = kind {
            tokens.push(Token { kind, span });
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let file: Arc<str> = Arc::from("t.jsonnet");
        lex(&file, text, &LineIndex::new(text))
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("local locals = self;"),
            vec![
                TokenKind::Local,
                TokenKind::Ident("locals".into()),
                TokenKind::Assign,
                TokenKind::SelfKw,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_field_separators() {
        assert_eq!(
            kinds("a+: 1, b:: 2, c::: 3"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Plus,
                TokenKind::Colon,
                TokenKind::Number(1.0, "1".into()),
                TokenKind::Comma,
                TokenKind::Ident("b".into()),
                TokenKind::ColonColon,
                TokenKind::Number(2.0, "2".into()),
                TokenKind::Comma,
                TokenKind::Ident("c".into()),
                TokenKind::ColonColonColon,
                TokenKind::Number(3.0, "3".into()),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("// line\n# hash\n/* block\n * more */ x"),
            vec![TokenKind::Ident("x".into())]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\né\"" 'it\'s' @'don''t'"#),
            vec![
                TokenKind::Str("a\n\u{e9}\"".into()),
                TokenKind::Str("it's".into()),
                TokenKind::Str("don't".into()),
            ]
        );
    }

    #[test]
    fn test_surrogate_pair_escape() {
        assert_eq!(kinds(r#""\uD83D\uDE00""#), vec![TokenKind::Str("\u{1F600}".into())]);
    }

    #[test]
    fn test_text_block() {
        let text = "|||\n  line one\n    indented\n\n  last\n|||";
        assert_eq!(
            kinds(text),
            vec![TokenKind::Str("line one\n  indented\n\nlast\n".into())]
        );
        let chomped = "|||-\n  x\n|||";
        assert_eq!(kinds(chomped), vec![TokenKind::Str("x".into())]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1.5e3 42"),
            vec![
                TokenKind::Number(1500.0, "1.5e3".into()),
                TokenKind::Number(42.0, "42".into()),
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let file: Arc<str> = Arc::from("t.jsonnet");
        let text = "local x = 'abc";
        let err = lex(&file, text, &LineIndex::new(text)).unwrap_err();
        assert!(err.message.contains("unterminated"), "got {}", err.message);
        assert_eq!(err.loc.begin.column, 11);
    }

    #[test]
    fn test_lex_partial_keeps_going() {
        let tokens = lex_partial("import 'lib/ab");
        assert_eq!(tokens[0].kind, TokenKind::Import);
        assert_eq!(tokens[1].kind, TokenKind::Invalid);
        assert_eq!(tokens[1].span, 7..14);
    }
}
