//
// parser.rs
//
// Recursive-descent parser producing the desugared AST
//

use std::ops::Range;
use std::sync::Arc;

use crate::ast::{
    Bind, BinaryOp, CompSpec, Field, Hide, LineIndex, LocationRange, NamedArg, Node, NodeKind,
    NodeRef, ObjectAssert, Param, UnaryOp,
};
use crate::error::StaticError;
use crate::lexer::{self, Token, TokenKind};

const MAX_PRECEDENCE: u8 = 10;
const MAX_DEPTH: usize = 500;

type ParseResult<T> = Result<T, StaticError>;

/// Parses a complete Jsonnet document.
pub fn parse(file: &str, text: &str) -> ParseResult<NodeRef> {
    let file: Arc<str> = Arc::from(file);
    let index = LineIndex::new(text);
    let tokens = lexer::lex(&file, text, &index)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        file,
        index: &index,
        text_len: text.len(),
        depth: 0,
    };
    let node = parser.parse_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(parser.error_at(
            &tok.span.clone(),
            format!("did not expect: {}", tok.kind.describe()),
        ));
    }
    Ok(node)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    file: Arc<str>,
    index: &'a LineIndex,
    text_len: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    // ========================================================================
    // Token helpers
    // ========================================================================

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_kind_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> Option<Token> {
        if self.at(kind) {
            self.bump()
        } else {
            None
        }
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> ParseResult<Token> {
        if let Some(tok) = self.eat(kind) {
            return Ok(tok);
        }
        let got = self
            .peek_kind()
            .map(TokenKind::describe)
            .unwrap_or_else(|| "end of file".to_string());
        Err(self.error_here(format!(
            "expected token {} {context} but got {got}",
            kind.describe()
        )))
    }

    fn expect_ident(&mut self, context: &str) -> ParseResult<(String, Range<usize>)> {
        match self.peek().cloned() {
            Some(Token {
                kind: TokenKind::Ident(id),
                span,
            }) => {
                self.pos += 1;
                Ok((id, span))
            }
            Some(tok) => Err(self.error_at(
                &tok.span,
                format!("expected {context} but got {}", tok.kind.describe()),
            )),
            None => Err(self.error_here(format!("expected {context} but got end of file"))),
        }
    }

    fn cur_start(&self) -> usize {
        self.peek().map(|t| t.span.start).unwrap_or(self.text_len)
    }

    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            return 0;
        }
        self.tokens[self.pos - 1].span.end
    }

    fn loc(&self, start: usize, end: usize) -> LocationRange {
        LocationRange::new(
            self.file.clone(),
            self.index.location(start),
            self.index.location(end),
        )
    }

    fn span_loc(&self, span: &Range<usize>) -> LocationRange {
        self.loc(span.start, span.end)
    }

    fn node_from(&self, start: usize, kind: NodeKind) -> NodeRef {
        Node::new(self.loc(start, self.prev_end()), kind)
    }

    fn error_at(&self, span: &Range<usize>, message: String) -> StaticError {
        StaticError::new(message, self.span_loc(span))
    }

    fn error_here(&self, message: String) -> StaticError {
        match self.peek() {
            Some(tok) => self.error_at(&tok.span.clone(), message),
            None => self.error_at(&(self.text_len..self.text_len), message),
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error_here("expression nesting too deep".to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn parse_expr(&mut self) -> ParseResult<NodeRef> {
        self.parse_binary(MAX_PRECEDENCE)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        Some(match self.peek_kind()? {
            TokenKind::Star => BinaryOp::Mult,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Percent,
            TokenKind::Plus => BinaryOp::Plus,
            TokenKind::Minus => BinaryOp::Minus,
            TokenKind::ShiftL => BinaryOp::ShiftL,
            TokenKind::ShiftR => BinaryOp::ShiftR,
            TokenKind::Gt => BinaryOp::Greater,
            TokenKind::Ge => BinaryOp::GreaterEq,
            TokenKind::Lt => BinaryOp::Less,
            TokenKind::Le => BinaryOp::LessEq,
            TokenKind::In => BinaryOp::In,
            TokenKind::EqEq => BinaryOp::Equal,
            TokenKind::NotEq => BinaryOp::NotEqual,
            TokenKind::Amp => BinaryOp::BitwiseAnd,
            TokenKind::Caret => BinaryOp::BitwiseXor,
            TokenKind::Pipe => BinaryOp::BitwiseOr,
            TokenKind::AndAnd => BinaryOp::And,
            TokenKind::OrOr => BinaryOp::Or,
            _ => return None,
        })
    }

    fn parse_binary(&mut self, max_prec: u8) -> ParseResult<NodeRef> {
        self.enter()?;
        let start = self.cur_start();
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binary_op() {
            let prec = op.precedence();
            if prec > max_prec {
                break;
            }
            self.bump();
            if op == BinaryOp::In && self.eat(&TokenKind::Super).is_some() {
                lhs = self.node_from(start, NodeKind::InSuper { index: lhs });
                continue;
            }
            let rhs = self.parse_binary(prec - 1)?;
            lhs = self.node_from(
                start,
                NodeKind::Binary {
                    left: lhs,
                    op,
                    right: rhs,
                },
            );
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<NodeRef> {
        let start = self.cur_start();
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => UnaryOp::Minus,
            Some(TokenKind::Plus) => UnaryOp::Plus,
            Some(TokenKind::Bang) => UnaryOp::Not,
            Some(TokenKind::Tilde) => UnaryOp::BitwiseNot,
            _ => return self.parse_postfix(),
        };
        self.bump();
        let expr = self.parse_unary()?;
        Ok(self.node_from(start, NodeKind::Unary { op, expr }))
    }

    fn parse_postfix(&mut self) -> ParseResult<NodeRef> {
        let start = self.cur_start();
        let mut node = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Dot) => {
                    self.bump();
                    let (id, span) = self.expect_ident("field name after '.'")?;
                    let index = Node::new(self.span_loc(&span), NodeKind::LiteralString(id));
                    node = self.node_from(start, NodeKind::Index { target: node, index });
                }
                Some(TokenKind::LBracket) => node = self.parse_index_or_slice(start, node)?,
                Some(TokenKind::LParen) => node = self.parse_call(start, node)?,
                Some(TokenKind::LBrace) => {
                    let object = self.parse_object()?;
                    node = self.node_from(
                        start,
                        NodeKind::Binary {
                            left: node,
                            op: BinaryOp::Plus,
                            right: object,
                        },
                    );
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> ParseResult<NodeRef> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.error_here("unexpected end of file".to_string()));
        };
        let start = tok.span.start;
        let literal = |this: &mut Self, kind: NodeKind| -> ParseResult<NodeRef> {
            this.pos += 1;
            Ok(Node::new(this.span_loc(&tok.span), kind))
        };
        match tok.kind {
            TokenKind::Null => literal(self, NodeKind::LiteralNull),
            TokenKind::True => literal(self, NodeKind::LiteralBoolean(true)),
            TokenKind::False => literal(self, NodeKind::LiteralBoolean(false)),
            TokenKind::SelfKw => literal(self, NodeKind::Self_),
            TokenKind::Dollar => literal(self, NodeKind::Dollar),
            TokenKind::Number(value, ref text) => literal(
                self,
                NodeKind::LiteralNumber {
                    value,
                    text: text.clone(),
                },
            ),
            TokenKind::Str(ref s) => literal(self, NodeKind::LiteralString(s.clone())),
            TokenKind::Ident(ref id) => literal(self, NodeKind::Var { id: id.clone() }),
            TokenKind::Super => {
                self.bump();
                match self.peek_kind() {
                    Some(TokenKind::Dot) => {
                        self.bump();
                        let (id, span) = self.expect_ident("field name after 'super.'")?;
                        let index = Node::new(self.span_loc(&span), NodeKind::LiteralString(id));
                        Ok(self.node_from(start, NodeKind::SuperIndex { index }))
                    }
                    Some(TokenKind::LBracket) => {
                        self.bump();
                        let index = self.parse_expr()?;
                        self.expect(&TokenKind::RBracket, "to close super index")?;
                        Ok(self.node_from(start, NodeKind::SuperIndex { index }))
                    }
                    _ => Err(self.error_here("expected . or [ after super".to_string())),
                }
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "to close parenthesis")?;
                Ok(inner)
            }
            TokenKind::LBrace => self.parse_object(),
            TokenKind::LBracket => self.parse_array(),
            TokenKind::Local => {
                self.bump();
                let mut binds = vec![self.parse_bind()?];
                while self.eat(&TokenKind::Comma).is_some() {
                    binds.push(self.parse_bind()?);
                }
                self.check_duplicate_binds(&binds)?;
                self.expect(&TokenKind::Semicolon, "after local binds")?;
                let body = self.parse_expr()?;
                Ok(self.node_from(start, NodeKind::Local { binds, body }))
            }
            TokenKind::If => {
                self.bump();
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::Then, "after if condition")?;
                let branch_true = self.parse_expr()?;
                let branch_false = if self.eat(&TokenKind::Else).is_some() {
                    self.parse_expr()?
                } else {
                    Node::synthetic(NodeKind::LiteralNull)
                };
                Ok(self.node_from(
                    start,
                    NodeKind::Conditional {
                        cond,
                        branch_true,
                        branch_false,
                    },
                ))
            }
            TokenKind::Function => {
                self.bump();
                self.expect(&TokenKind::LParen, "after function")?;
                let params = self.parse_params()?;
                let body = self.parse_expr()?;
                Ok(self.node_from(start, NodeKind::Function { params, body }))
            }
            TokenKind::Assert => {
                self.bump();
                let cond = self.parse_expr()?;
                let message = match self.eat(&TokenKind::Colon) {
                    Some(_) => Some(self.parse_expr()?),
                    None => None,
                };
                self.expect(&TokenKind::Semicolon, "after assert")?;
                let rest = self.parse_expr()?;
                Ok(self.node_from(
                    start,
                    NodeKind::Assert {
                        cond,
                        message,
                        rest,
                    },
                ))
            }
            TokenKind::Error => {
                self.bump();
                let expr = self.parse_expr()?;
                Ok(self.node_from(start, NodeKind::Error { expr }))
            }
            TokenKind::Import | TokenKind::ImportStr | TokenKind::ImportBin => {
                self.bump();
                let file = match self.peek_kind() {
                    Some(TokenKind::Str(s)) => s.clone(),
                    _ => {
                        return Err(self.error_here(
                            "computed imports are not allowed".to_string(),
                        ))
                    }
                };
                self.bump();
                let kind = match tok.kind {
                    TokenKind::ImportStr => NodeKind::ImportStr { file },
                    TokenKind::ImportBin => NodeKind::ImportBin { file },
                    _ => NodeKind::Import { file },
                };
                Ok(self.node_from(start, kind))
            }
            other => Err(self.error_at(&tok.span, format!("unexpected: {}", other.describe()))),
        }
    }

    // ========================================================================
    // Postfix forms
    // ========================================================================

    fn parse_call(&mut self, start: usize, target: NodeRef) -> ParseResult<NodeRef> {
        self.bump();
        let mut positional = Vec::new();
        let mut named: Vec<NamedArg> = Vec::new();
        loop {
            if self.eat(&TokenKind::RParen).is_some() {
                break;
            }
            let is_named = matches!(self.peek_kind(), Some(TokenKind::Ident(_)))
                && self.peek_kind_at(1) == Some(&TokenKind::Assign);
            if is_named {
                let (name, span) = self.expect_ident("argument name")?;
                self.bump();
                let arg = self.parse_expr()?;
                named.push(NamedArg {
                    name,
                    arg,
                    loc: self.loc(span.start, self.prev_end()),
                });
            } else {
                if !named.is_empty() {
                    return Err(
                        self.error_here("positional argument after a named argument".to_string())
                    );
                }
                positional.push(self.parse_expr()?);
            }
            if self.eat(&TokenKind::Comma).is_none() {
                self.expect(&TokenKind::RParen, "to close function arguments")?;
                break;
            }
        }
        let tailstrict = self.eat(&TokenKind::Tailstrict).is_some();
        Ok(self.node_from(
            start,
            NodeKind::Apply {
                target,
                positional,
                named,
                tailstrict,
            },
        ))
    }

    fn parse_index_or_slice(&mut self, start: usize, target: NodeRef) -> ParseResult<NodeRef> {
        self.bump();
        let mut parts: [Option<NodeRef>; 3] = [None, None, None];
        if !matches!(
            self.peek_kind(),
            Some(TokenKind::Colon) | Some(TokenKind::ColonColon)
        ) {
            parts[0] = Some(self.parse_expr()?);
        }
        let is_slice = match self.peek_kind() {
            Some(TokenKind::RBracket) => false,
            Some(TokenKind::Colon) => {
                self.bump();
                if !matches!(
                    self.peek_kind(),
                    Some(TokenKind::Colon) | Some(TokenKind::RBracket)
                ) {
                    parts[1] = Some(self.parse_expr()?);
                }
                if self.eat(&TokenKind::Colon).is_some() && !self.at(&TokenKind::RBracket) {
                    parts[2] = Some(self.parse_expr()?);
                }
                true
            }
            Some(TokenKind::ColonColon) => {
                self.bump();
                if !self.at(&TokenKind::RBracket) {
                    parts[2] = Some(self.parse_expr()?);
                }
                true
            }
            _ => return Err(self.error_here("expected ] or : in index".to_string())),
        };
        self.expect(&TokenKind::RBracket, "to close index")?;

        if !is_slice {
            let [index, _, _] = parts;
            let Some(index) = index else {
                return Err(self.error_here("index requires an expression".to_string()));
            };
            return Ok(self.node_from(start, NodeKind::Index { target, index }));
        }

        let std_slice = Node::synthetic(NodeKind::Index {
            target: Node::synthetic(NodeKind::Var {
                id: "std".to_string(),
            }),
            index: Node::synthetic(NodeKind::LiteralString("slice".to_string())),
        });
        let mut positional = vec![target];
        for part in parts {
            positional.push(part.unwrap_or_else(|| Node::synthetic(NodeKind::LiteralNull)));
        }
        Ok(self.node_from(
            start,
            NodeKind::Apply {
                target: std_slice,
                positional,
                named: Vec::new(),
                tailstrict: false,
            },
        ))
    }

    // ========================================================================
    // Binders
    // ========================================================================

    /// Parses parameters after the opening parenthesis, consuming the closing one.
    fn parse_params(&mut self) -> ParseResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        loop {
            if self.eat(&TokenKind::RParen).is_some() {
                break;
            }
            let (name, span) = self.expect_ident("parameter name")?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.error_at(&span, format!("duplicate parameter: {name}")));
            }
            let default = match self.eat(&TokenKind::Assign) {
                Some(_) => Some(self.parse_expr()?),
                None => None,
            };
            params.push(Param {
                name,
                default,
                loc: self.loc(span.start, self.prev_end()),
            });
            if self.eat(&TokenKind::Comma).is_none() {
                self.expect(&TokenKind::RParen, "to close parameters")?;
                break;
            }
        }
        Ok(params)
    }

    fn parse_bind(&mut self) -> ParseResult<Bind> {
        let (variable, span) = self.expect_ident("local variable name")?;
        let body = if self.eat(&TokenKind::LParen).is_some() {
            let params = self.parse_params()?;
            self.expect(&TokenKind::Assign, "in function definition")?;
            let body = self.parse_expr()?;
            self.node_from(span.start, NodeKind::Function { params, body })
        } else {
            self.expect(&TokenKind::Assign, "in local definition")?;
            self.parse_expr()?
        };
        Ok(Bind {
            variable,
            variable_loc: self.span_loc(&span),
            body,
            loc: self.loc(span.start, self.prev_end()),
        })
    }

    fn check_duplicate_binds(&self, binds: &[Bind]) -> ParseResult<()> {
        for (i, bind) in binds.iter().enumerate() {
            if binds[..i].iter().any(|b| b.variable == bind.variable) {
                return Err(StaticError::new(
                    format!("duplicate local var: {}", bind.variable),
                    bind.variable_loc.clone(),
                ));
            }
        }
        Ok(())
    }

    fn parse_comp_specs(&mut self) -> ParseResult<Vec<CompSpec>> {
        let mut specs = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::For) => {
                    self.bump();
                    let (variable, span) = self.expect_ident("variable after for")?;
                    self.expect(&TokenKind::In, "after for variable")?;
                    let expr = self.parse_expr()?;
                    specs.push(CompSpec::For {
                        variable,
                        loc: self.span_loc(&span),
                        expr,
                    });
                }
                Some(TokenKind::If) => {
                    self.bump();
                    let cond = self.parse_expr()?;
                    specs.push(CompSpec::If { cond });
                }
                _ => break,
            }
        }
        Ok(specs)
    }

    // ========================================================================
    // Objects and arrays
    // ========================================================================

    fn parse_object(&mut self) -> ParseResult<NodeRef> {
        let start = self.cur_start();
        self.bump();
        let mut locals = Vec::new();
        let mut asserts = Vec::new();
        let mut fields: Vec<(Field, bool)> = Vec::new();
        loop {
            if self.eat(&TokenKind::RBrace).is_some() {
                break;
            }
            if self.at(&TokenKind::For) {
                return self.finish_object_comp(start, locals, asserts, fields);
            }
            match self.peek_kind() {
                Some(TokenKind::Local) => {
                    self.bump();
                    locals.push(self.parse_bind()?);
                }
                Some(TokenKind::Assert) => {
                    let assert_start = self.cur_start();
                    self.bump();
                    let cond = self.parse_expr()?;
                    let message = match self.eat(&TokenKind::Colon) {
                        Some(_) => Some(self.parse_expr()?),
                        None => None,
                    };
                    asserts.push(ObjectAssert {
                        cond,
                        message,
                        loc: self.loc(assert_start, self.prev_end()),
                    });
                }
                _ => fields.push(self.parse_field()?),
            }
            if self.eat(&TokenKind::Comma).is_some() {
                continue;
            }
            if self.at(&TokenKind::For) {
                return self.finish_object_comp(start, locals, asserts, fields);
            }
            self.expect(&TokenKind::RBrace, "to close object")?;
            break;
        }
        self.check_duplicate_binds(&locals)?;
        let fields: Vec<Field> = fields.into_iter().map(|(f, _)| f).collect();
        for (i, field) in fields.iter().enumerate() {
            if let Some(name) = field.name.as_string() {
                if fields[..i].iter().any(|f| f.name.as_string() == Some(name)) {
                    return Err(StaticError::new(
                        format!("duplicate field: {name}"),
                        field.name.loc.clone(),
                    ));
                }
            }
        }
        Ok(self.node_from(
            start,
            NodeKind::DesugaredObject {
                asserts,
                fields,
                locals,
            },
        ))
    }

    fn finish_object_comp(
        &mut self,
        start: usize,
        locals: Vec<Bind>,
        asserts: Vec<ObjectAssert>,
        mut fields: Vec<(Field, bool)>,
    ) -> ParseResult<NodeRef> {
        if !asserts.is_empty() {
            return Err(self.error_here("object comprehension cannot have asserts".to_string()));
        }
        if fields.len() != 1 || !fields[0].1 {
            return Err(self.error_here(
                "object comprehension must have exactly one field with a computed name"
                    .to_string(),
            ));
        }
        let Some((field, _)) = fields.pop() else {
            return Err(self.error_here("object comprehension has no field".to_string()));
        };
        let specs = self.parse_comp_specs()?;
        self.expect(&TokenKind::RBrace, "to close object comprehension")?;
        Ok(self.node_from(
            start,
            NodeKind::ObjectComp {
                locals,
                key: field.name,
                value: field.body,
                plus_super: field.plus_super,
                specs,
            },
        ))
    }

    /// Parses one field, reporting whether its name was computed (`[e]`).
    fn parse_field(&mut self) -> ParseResult<(Field, bool)> {
        let start = self.cur_start();
        let Some(tok) = self.bump() else {
            return Err(self.error_here("expected field name".to_string()));
        };
        let (name, computed) = match tok.kind {
            TokenKind::Ident(id) => (
                Node::new(self.span_loc(&tok.span), NodeKind::LiteralString(id)),
                false,
            ),
            TokenKind::Str(s) => (
                Node::new(self.span_loc(&tok.span), NodeKind::LiteralString(s)),
                false,
            ),
            TokenKind::LBracket => {
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RBracket, "to close computed field name")?;
                (expr, true)
            }
            other => {
                return Err(self.error_at(
                    &tok.span,
                    format!("expected field name but got {}", other.describe()),
                ))
            }
        };
        // a method's function starts at its parameters so the name stays a
        // direct child of the object
        let params = match self.eat(&TokenKind::LParen) {
            Some(paren) => Some((paren.span.start, self.parse_params()?)),
            None => None,
        };
        let plus_super = self.eat(&TokenKind::Plus).is_some();
        let hide = match self.peek_kind() {
            Some(TokenKind::Colon) => Hide::Inherit,
            Some(TokenKind::ColonColon) => Hide::Hidden,
            Some(TokenKind::ColonColonColon) => Hide::Visible,
            _ => return Err(self.error_here("expected : after field name".to_string())),
        };
        self.bump();
        let body = self.parse_expr()?;
        let loc = self.loc(start, self.prev_end());
        let body = match params {
            Some((params_start, params)) => Node::new(
                self.loc(params_start, self.prev_end()),
                NodeKind::Function { params, body },
            ),
            None => body,
        };
        Ok((
            Field {
                name,
                hide,
                plus_super,
                body,
                loc,
            },
            computed,
        ))
    }

    fn parse_array(&mut self) -> ParseResult<NodeRef> {
        let start = self.cur_start();
        self.bump();
        if self.eat(&TokenKind::RBracket).is_some() {
            return Ok(self.node_from(start, NodeKind::Array { elements: Vec::new() }));
        }
        let first = self.parse_expr()?;
        if self.at(&TokenKind::For) {
            let specs = self.parse_comp_specs()?;
            self.expect(&TokenKind::RBracket, "to close array comprehension")?;
            return Ok(self.node_from(start, NodeKind::ArrayComp { body: first, specs }));
        }
        let mut elements = vec![first];
        loop {
            if self.eat(&TokenKind::Comma).is_some() {
                if self.eat(&TokenKind::RBracket).is_some() {
                    break;
                }
                elements.push(self.parse_expr()?);
            } else {
                self.expect(&TokenKind::RBracket, "to close array")?;
                break;
            }
        }
        Ok(self.node_from(start, NodeKind::Array { elements }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Location;

    fn parse_ok(text: &str) -> NodeRef {
        parse("test.jsonnet", text).unwrap_or_else(|e| panic!("parse failed: {e}"))
    }

    #[test]
    fn test_binary_precedence() {
        let node = parse_ok("1 + 2 * 3");
        let NodeKind::Binary { op, right, .. } = &node.kind else {
            panic!("expected binary, got {}", node.kind_name());
        };
        assert_eq!(*op, BinaryOp::Plus);
        assert!(
            matches!(right.kind, NodeKind::Binary { op: BinaryOp::Mult, .. }),
            "multiplication binds tighter"
        );
    }

    #[test]
    fn test_field_locations() {
        let node = parse_ok("{ a: 1 }");
        let NodeKind::DesugaredObject { fields, .. } = &node.kind else {
            panic!("expected object");
        };
        assert_eq!(fields[0].loc.begin, Location::new(1, 3));
        assert_eq!(fields[0].loc.end, Location::new(1, 7));
        assert_eq!(fields[0].name.loc.end, Location::new(1, 4));
        assert_eq!(node.loc.end, Location::new(1, 9));
    }

    #[test]
    fn test_object_local_bind_range() {
        let node = parse_ok("{ local x = \"v\", a: x }");
        let NodeKind::DesugaredObject { locals, .. } = &node.kind else {
            panic!("expected object");
        };
        assert_eq!(locals[0].variable, "x");
        assert_eq!(locals[0].loc.begin, Location::new(1, 9));
        assert_eq!(locals[0].loc.end, Location::new(1, 16));
    }

    #[test]
    fn test_method_sugar_produces_function() {
        let node = parse_ok("{ f(x, y=2): x + y }");
        let NodeKind::DesugaredObject { fields, .. } = &node.kind else {
            panic!("expected object");
        };
        let NodeKind::Function { params, .. } = &fields[0].body.kind else {
            panic!("expected method body to be a function");
        };
        assert_eq!(params.len(), 2);
        assert!(params[1].default.is_some());
        assert_eq!(fields[0].body.loc.begin, Location::new(1, 4), "function starts at its parameters");
        assert_eq!(fields[0].body.loc.end, fields[0].loc.end);
    }

    #[test]
    fn test_object_application_is_merge() {
        let node = parse_ok("base { a: 1 }");
        assert!(matches!(
            node.kind,
            NodeKind::Binary {
                op: BinaryOp::Plus,
                ..
            }
        ));
    }

    #[test]
    fn test_slice_desugars_to_std_slice() {
        let node = parse_ok("arr[1:]");
        let NodeKind::Apply { target, positional, .. } = &node.kind else {
            panic!("expected apply");
        };
        let NodeKind::Index { index, .. } = &target.kind else {
            panic!("expected std.slice index");
        };
        assert_eq!(index.as_string(), Some("slice"));
        assert_eq!(positional.len(), 4);
        assert!(matches!(positional[2].kind, NodeKind::LiteralNull));
    }

    #[test]
    fn test_super_forms() {
        let node = parse_ok("{ a: super.b, c: 'b' in super }");
        let NodeKind::DesugaredObject { fields, .. } = &node.kind else {
            panic!("expected object");
        };
        assert!(matches!(fields[0].body.kind, NodeKind::SuperIndex { .. }));
        assert!(matches!(fields[1].body.kind, NodeKind::InSuper { .. }));
        assert_eq!(fields[0].body.loc.begin, Location::new(1, 6));
        assert_eq!(fields[0].body.loc.end, Location::new(1, 13));
    }

    #[test]
    fn test_missing_else_is_synthetic_null() {
        let node = parse_ok("if true then 1");
        let NodeKind::Conditional { branch_false, .. } = &node.kind else {
            panic!("expected conditional");
        };
        assert!(matches!(branch_false.kind, NodeKind::LiteralNull));
        assert!(!branch_false.loc.is_set());
    }

    #[test]
    fn test_object_comprehension() {
        let node = parse_ok("{ [k]: k for k in ['a', 'b'] if k != 'c' }");
        let NodeKind::ObjectComp { specs, .. } = &node.kind else {
            panic!("expected object comprehension, got {}", node.kind_name());
        };
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn test_named_arguments_and_trailing_comma() {
        let node = parse_ok("f(1, b=2,)");
        let NodeKind::Apply { positional, named, .. } = &node.kind else {
            panic!("expected apply");
        };
        assert_eq!(positional.len(), 1);
        assert_eq!(named[0].name, "b");
    }

    #[test]
    fn test_parse_error_location() {
        let err = parse("test.jsonnet", "{ a: }").unwrap_err();
        assert_eq!(err.loc.begin, Location::new(1, 6));
        assert!(err.message.contains("unexpected"), "message was {}", err.message);
    }

    #[test]
    fn test_trailing_dot_is_an_error() {
        let err = parse("test.jsonnet", "local l = {}; l.").unwrap_err();
        assert!(err.message.contains("end of file"), "message was {}", err.message);
    }

    #[test]
    fn test_duplicate_field_is_an_error() {
        assert!(parse("test.jsonnet", "{ a: 1, a: 2 }").is_err());
    }
}
