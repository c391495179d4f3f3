//
// ast.rs
//
// Desugared Jsonnet syntax tree with source locations
//

use std::fmt;
use std::sync::Arc;

/// A position in a source file. Lines and columns are 1-based; columns count
/// UTF-16 code units. A zero line marks a synthetic location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn is_set(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Half-open source range: `end` points just past the last character.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationRange {
    pub file: Arc<str>,
    pub begin: Location,
    pub end: Location,
}

impl LocationRange {
    pub fn new(file: Arc<str>, begin: Location, end: Location) -> Self {
        Self { file, begin, end }
    }

    /// Range of a node produced by desugaring rather than read from source.
    pub fn synthetic() -> Self {
        Self {
            file: Arc::from(""),
            begin: Location::default(),
            end: Location::default(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.begin.is_set()
    }

    /// `begin <= loc < end`
    pub fn contains(&self, loc: Location) -> bool {
        self.is_set() && self.begin <= loc && loc < self.end
    }

    pub fn contains_range(&self, other: &LocationRange) -> bool {
        self.is_set() && self.begin <= other.begin && other.end <= self.end
    }

    /// Same range, spanning from `self.begin` to `other.end`.
    pub fn to(&self, other: &LocationRange) -> LocationRange {
        LocationRange::new(self.file.clone(), self.begin, other.end)
    }
}

impl fmt::Display for LocationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_set() {
            return write!(f, "{}", self.file);
        }
        if self.begin.line == self.end.line {
            write!(
                f,
                "{}:{}:{}-{}",
                self.file, self.begin.line, self.begin.column, self.end.column
            )
        } else {
            write!(f, "{}:{}-{}", self.file, self.begin, self.end)
        }
    }
}

/// Maps byte offsets of a source text to [`Location`]s.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    text: Arc<str>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            line_starts,
            text: Arc::from(text),
        }
    }

    pub fn location(&self, offset: usize) -> Location {
        let offset = offset.min(self.text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let column: usize = self
            .text
            .get(start..offset)
            .map(|s| s.chars().map(char::len_utf16).sum())
            .unwrap_or(0);
        Location::new(line as u32 + 1, column as u32 + 1)
    }

    /// Byte offset of a location, clamped to the text.
    pub fn offset(&self, loc: Location) -> usize {
        if loc.line == 0 {
            return 0;
        }
        let line = (loc.line as usize - 1).min(self.line_starts.len() - 1);
        let start = self.line_starts[line];
        let end = self
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.text.len());
        let mut units = loc.column.saturating_sub(1) as usize;
        let mut offset = start;
        for c in self.text[start..end].chars() {
            if units == 0 || c == '\n' {
                break;
            }
            units = units.saturating_sub(c.len_utf16());
            offset += c.len_utf8();
        }
        offset
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

pub type NodeRef = Arc<Node>;

#[derive(Debug)]
pub struct Node {
    pub loc: LocationRange,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(loc: LocationRange, kind: NodeKind) -> NodeRef {
        Arc::new(Node { loc, kind })
    }

    pub fn synthetic(kind: NodeKind) -> NodeRef {
        Arc::new(Node {
            loc: LocationRange::synthetic(),
            kind,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Identifier of a `Var`, if this is one.
    pub fn var_id(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Var { id } => Some(id),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::LiteralString(s) => Some(s),
            _ => None,
        }
    }

    pub fn same(a: &NodeRef, b: &NodeRef) -> bool {
        Arc::ptr_eq(a, b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hide {
    /// `:`
    Inherit,
    /// `::`
    Hidden,
    /// `:::`
    Visible,
}

#[derive(Debug, Clone)]
pub struct Bind {
    pub variable: String,
    pub variable_loc: LocationRange,
    pub body: NodeRef,
    /// Covers `name = body`.
    pub loc: LocationRange,
}

#[derive(Debug, Clone)]
pub struct Field {
    /// `LiteralString` for identifier and string keys, any expression for `[e]`.
    pub name: NodeRef,
    pub hide: Hide,
    pub plus_super: bool,
    pub body: NodeRef,
    pub loc: LocationRange,
}

#[derive(Debug, Clone)]
pub struct ObjectAssert {
    pub cond: NodeRef,
    pub message: Option<NodeRef>,
    pub loc: LocationRange,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<NodeRef>,
    pub loc: LocationRange,
}

#[derive(Debug, Clone)]
pub struct NamedArg {
    pub name: String,
    pub arg: NodeRef,
    pub loc: LocationRange,
}

#[derive(Debug, Clone)]
pub enum CompSpec {
    For {
        variable: String,
        loc: LocationRange,
        expr: NodeRef,
    },
    If {
        cond: NodeRef,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Mult,
    Div,
    Percent,
    Plus,
    Minus,
    ShiftL,
    ShiftR,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    In,
    Equal,
    NotEqual,
    BitwiseAnd,
    BitwiseXor,
    BitwiseOr,
    And,
    Or,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Mult => "*",
            BinaryOp::Div => "/",
            BinaryOp::Percent => "%",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::ShiftL => "<<",
            BinaryOp::ShiftR => ">>",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::In => "in",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::BitwiseAnd => "&",
            BinaryOp::BitwiseXor => "^",
            BinaryOp::BitwiseOr => "|",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Binding strength; lower binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Mult | BinaryOp::Div | BinaryOp::Percent => 1,
            BinaryOp::Plus | BinaryOp::Minus => 2,
            BinaryOp::ShiftL | BinaryOp::ShiftR => 3,
            BinaryOp::Greater
            | BinaryOp::GreaterEq
            | BinaryOp::Less
            | BinaryOp::LessEq
            | BinaryOp::In => 4,
            BinaryOp::Equal | BinaryOp::NotEqual => 5,
            BinaryOp::BitwiseAnd => 6,
            BinaryOp::BitwiseXor => 7,
            BinaryOp::BitwiseOr => 8,
            BinaryOp::And => 9,
            BinaryOp::Or => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    BitwiseNot,
    Plus,
    Minus,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::BitwiseNot => "~",
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
        }
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Apply {
        target: NodeRef,
        positional: Vec<NodeRef>,
        named: Vec<NamedArg>,
        tailstrict: bool,
    },
    Array {
        elements: Vec<NodeRef>,
    },
    ArrayComp {
        body: NodeRef,
        specs: Vec<CompSpec>,
    },
    Assert {
        cond: NodeRef,
        message: Option<NodeRef>,
        rest: NodeRef,
    },
    Binary {
        left: NodeRef,
        op: BinaryOp,
        right: NodeRef,
    },
    Conditional {
        cond: NodeRef,
        branch_true: NodeRef,
        branch_false: NodeRef,
    },
    DesugaredObject {
        asserts: Vec<ObjectAssert>,
        fields: Vec<Field>,
        locals: Vec<Bind>,
    },
    Dollar,
    Error {
        expr: NodeRef,
    },
    Function {
        params: Vec<Param>,
        body: NodeRef,
    },
    Import {
        file: String,
    },
    ImportStr {
        file: String,
    },
    ImportBin {
        file: String,
    },
    Index {
        target: NodeRef,
        index: NodeRef,
    },
    InSuper {
        index: NodeRef,
    },
    LiteralBoolean(bool),
    LiteralNull,
    LiteralNumber {
        value: f64,
        text: String,
    },
    LiteralString(String),
    Local {
        binds: Vec<Bind>,
        body: NodeRef,
    },
    ObjectComp {
        locals: Vec<Bind>,
        key: NodeRef,
        value: NodeRef,
        plus_super: bool,
        specs: Vec<CompSpec>,
    },
    Self_,
    SuperIndex {
        index: NodeRef,
    },
    Unary {
        op: UnaryOp,
        expr: NodeRef,
    },
    Var {
        id: String,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Apply { .. } => "Apply",
            NodeKind::Array { .. } => "Array",
            NodeKind::ArrayComp { .. } => "ArrayComp",
            NodeKind::Assert { .. } => "Assert",
            NodeKind::Binary { .. } => "Binary",
            NodeKind::Conditional { .. } => "Conditional",
            NodeKind::DesugaredObject { .. } => "DesugaredObject",
            NodeKind::Dollar => "Dollar",
            NodeKind::Error { .. } => "Error",
            NodeKind::Function { .. } => "Function",
            NodeKind::Import { .. } => "Import",
            NodeKind::ImportStr { .. } => "ImportStr",
            NodeKind::ImportBin { .. } => "ImportBin",
            NodeKind::Index { .. } => "Index",
            NodeKind::InSuper { .. } => "InSuper",
            NodeKind::LiteralBoolean(_) => "LiteralBoolean",
            NodeKind::LiteralNull => "LiteralNull",
            NodeKind::LiteralNumber { .. } => "LiteralNumber",
            NodeKind::LiteralString(_) => "LiteralString",
            NodeKind::Local { .. } => "Local",
            NodeKind::ObjectComp { .. } => "ObjectComp",
            NodeKind::Self_ => "Self",
            NodeKind::SuperIndex { .. } => "SuperIndex",
            NodeKind::Unary { .. } => "Unary",
            NodeKind::Var { .. } => "Var",
        }
    }
}

/// Direct children of a node in source order.
pub fn children(node: &Node) -> Vec<&NodeRef> {
    let mut out: Vec<&NodeRef> = Vec::new();
    match &node.kind {
        NodeKind::Apply {
            target,
            positional,
            named,
            ..
        } => {
            out.push(target);
            out.extend(positional.iter());
            out.extend(named.iter().map(|n| &n.arg));
        }
        NodeKind::Array { elements } => out.extend(elements.iter()),
        NodeKind::ArrayComp { body, specs } => {
            out.push(body);
            push_specs(&mut out, specs);
        }
        NodeKind::Assert {
            cond,
            message,
            rest,
        } => {
            out.push(cond);
            out.extend(message.iter());
            out.push(rest);
        }
        NodeKind::Binary { left, right, .. } => {
            out.push(left);
            out.push(right);
        }
        NodeKind::Conditional {
            cond,
            branch_true,
            branch_false,
        } => {
            out.push(cond);
            out.push(branch_true);
            out.push(branch_false);
        }
        NodeKind::DesugaredObject {
            asserts,
            fields,
            locals,
        } => {
            out.extend(locals.iter().map(|b| &b.body));
            for field in fields {
                out.push(&field.name);
                out.push(&field.body);
            }
            for assert in asserts {
                out.push(&assert.cond);
                out.extend(assert.message.iter());
            }
            out.sort_by_key(|n| n.loc.begin);
        }
        NodeKind::Error { expr } => out.push(expr),
        NodeKind::Function { params, body } => {
            out.extend(params.iter().filter_map(|p| p.default.as_ref()));
            out.push(body);
        }
        NodeKind::Index { target, index } => {
            out.push(target);
            out.push(index);
        }
        NodeKind::InSuper { index } | NodeKind::SuperIndex { index } => out.push(index),
        NodeKind::Local { binds, body } => {
            out.extend(binds.iter().map(|b| &b.body));
            out.push(body);
        }
        NodeKind::ObjectComp {
            locals,
            key,
            value,
            specs,
            ..
        } => {
            out.push(key);
            out.extend(locals.iter().map(|b| &b.body));
            out.push(value);
            push_specs(&mut out, specs);
            out.sort_by_key(|n| n.loc.begin);
        }
        NodeKind::Unary { expr, .. } => out.push(expr),
        NodeKind::Dollar
        | NodeKind::Import { .. }
        | NodeKind::ImportStr { .. }
        | NodeKind::ImportBin { .. }
        | NodeKind::LiteralBoolean(_)
        | NodeKind::LiteralNull
        | NodeKind::LiteralNumber { .. }
        | NodeKind::LiteralString(_)
        | NodeKind::Self_
        | NodeKind::Var { .. } => {}
    }
    out
}

fn push_specs<'a>(out: &mut Vec<&'a NodeRef>, specs: &'a [CompSpec]) {
    for spec in specs {
        match spec {
            CompSpec::For { expr, .. } => out.push(expr),
            CompSpec::If { cond } => out.push(cond),
        }
    }
}

/// Identifiers used but not bound inside `node`, in first-use order.
pub fn free_variables(node: &Node) -> Vec<String> {
    let mut collector = FreeVars::default();
    collector.visit(node);
    collector.free
}

#[derive(Default)]
struct FreeVars {
    bound: Vec<String>,
    free: Vec<String>,
}

impl FreeVars {
    fn note(&mut self, id: &str) {
        if !self.bound.iter().any(|b| b == id) && !self.free.iter().any(|f| f == id) {
            self.free.push(id.to_string());
        }
    }

    fn with_bound<F: FnOnce(&mut Self)>(&mut self, names: impl IntoIterator<Item = String>, f: F) {
        let mark = self.bound.len();
        self.bound.extend(names);
        f(self);
        self.bound.truncate(mark);
    }

    fn visit_specs_then<F: FnOnce(&mut Self)>(&mut self, specs: &[CompSpec], f: F) {
        let mark = self.bound.len();
        for spec in specs {
            match spec {
                CompSpec::For { variable, expr, .. } => {
                    self.visit(expr);
                    self.bound.push(variable.clone());
                }
                CompSpec::If { cond } => self.visit(cond),
            }
        }
        f(self);
        self.bound.truncate(mark);
    }

    fn visit(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::Var { id } => self.note(id),
            NodeKind::Local { binds, body } => {
                let names = binds.iter().map(|b| b.variable.clone());
                self.with_bound(names, |this| {
                    for bind in binds {
                        this.visit(&bind.body);
                    }
                    this.visit(body);
                });
            }
            NodeKind::Function { params, body } => {
                let names = params.iter().map(|p| p.name.clone());
                self.with_bound(names, |this| {
                    for default in params.iter().filter_map(|p| p.default.as_ref()) {
                        this.visit(default);
                    }
                    this.visit(body);
                });
            }
            NodeKind::DesugaredObject {
                asserts,
                fields,
                locals,
            } => {
                for field in fields {
                    self.visit(&field.name);
                }
                let names = locals.iter().map(|b| b.variable.clone());
                self.with_bound(names, |this| {
                    for bind in locals {
                        this.visit(&bind.body);
                    }
                    for field in fields {
                        this.visit(&field.body);
                    }
                    for assert in asserts {
                        this.visit(&assert.cond);
                        if let Some(message) = &assert.message {
                            this.visit(message);
                        }
                    }
                });
            }
            NodeKind::ObjectComp {
                locals,
                key,
                value,
                specs,
                ..
            } => {
                self.visit_specs_then(specs, |this| {
                    this.visit(key);
                    let names = locals.iter().map(|b| b.variable.clone());
                    this.with_bound(names, |this| {
                        for bind in locals {
                            this.visit(&bind.body);
                        }
                        this.visit(value);
                    });
                });
            }
            NodeKind::ArrayComp { body, specs } => {
                self.visit_specs_then(specs, |this| this.visit(body));
            }
            _ => {
                for child in children(node) {
                    self.visit(child);
                }
            }
        }
    }
}

/// Whether `id` is a legal Jsonnet identifier (and not a keyword).
pub fn is_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !crate::lexer::is_keyword(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_line_index_utf16_columns() {
        let index = LineIndex::new("ab\n\u{1F600}x\n");
        assert_eq!(index.location(0), Location::new(1, 1));
        assert_eq!(index.location(3), Location::new(2, 1));
        // the emoji is two UTF-16 units wide
        assert_eq!(index.location(7), Location::new(2, 3));
        assert_eq!(index.offset(Location::new(2, 3)), 7);
    }

    #[test]
    fn test_range_contains_is_half_open() {
        let range = LocationRange::new(Arc::from("f"), Location::new(1, 3), Location::new(1, 6));
        assert!(range.contains(Location::new(1, 3)));
        assert!(range.contains(Location::new(1, 5)));
        assert!(!range.contains(Location::new(1, 6)), "end column is exclusive");
        assert!(!LocationRange::synthetic().contains(Location::new(0, 0)));
    }

    #[test]
    fn test_free_variables_respects_binders() {
        let node = parse("t.jsonnet", "local a = b; function(c) a + c + d").unwrap();
        assert_eq!(free_variables(&node), vec!["b".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_free_variables_object_locals_and_comprehension() {
        let node = parse("t.jsonnet", "{ local l = x, [k]: l + v for k in ks }").unwrap();
        assert_eq!(free_variables(&node), vec!["ks".to_string(), "x".to_string(), "v".to_string()]);
    }

    #[test]
    fn test_children_in_source_order() {
        let node = parse("t.jsonnet", "{ a: 1, local x = 2, b: x }").unwrap();
        let kinds: Vec<&str> = children(&node).iter().map(|c| c.kind_name()).collect();
        assert_eq!(
            kinds,
            vec!["LiteralString", "LiteralNumber", "LiteralNumber", "LiteralString", "Var"]
        );
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("foo_1"));
        assert!(!is_identifier("1foo"));
        assert!(!is_identifier("local"));
        assert!(!is_identifier("a-b"));
    }
}
