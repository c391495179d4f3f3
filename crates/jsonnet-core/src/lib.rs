//
// lib.rs
//
// Jsonnet language library: lexer, parser, desugared AST and evaluator
//

pub mod ast;
pub mod error;
pub mod eval;
pub mod importer;
pub mod lexer;
pub mod manifest;
pub mod parser;
pub mod stdlib;
pub mod value;
pub mod vm;

pub use ast::{Location, LocationRange, Node, NodeKind, NodeRef};
pub use error::{EvalError, StaticError};
pub use importer::{FileImporter, ImportError, Importer};
pub use parser::parse;
pub use vm::{ExtVar, Vm};
