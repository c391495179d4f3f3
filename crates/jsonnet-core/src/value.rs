//
// value.rs
//
// Runtime values. Compound data lives in the evaluator's arena and is
// referenced by id, so values are cheap to clone and never form Rc cycles.
//

use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{Bind, Hide, NodeRef, ObjectAssert};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThunkId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub(crate) usize);

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<Vec<ThunkId>>),
    Object(ObjId),
    Function(Rc<FunctionValue>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn string(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }
}

#[derive(Debug)]
pub enum FunctionValue {
    /// A `Function` node closed over the environment it was evaluated in.
    Closure { node: NodeRef, env: EnvId },
    Builtin(&'static Builtin),
}

impl FunctionValue {
    pub fn param_names(&self) -> Vec<String> {
        match self {
            FunctionValue::Closure { node, .. } => match &node.kind {
                crate::ast::NodeKind::Function { params, .. } => {
                    params.iter().map(|p| p.name.clone()).collect()
                }
                _ => Vec::new(),
            },
            FunctionValue::Builtin(b) => b.params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// A native standard-library function.
#[derive(Debug)]
pub struct Builtin {
    pub name: &'static str,
    pub params: &'static [&'static str],
    /// Parameters past this index may be omitted.
    pub required: usize,
}

#[derive(Debug)]
pub(crate) enum ThunkState {
    Done(Value),
    Pending(NodeRef, EnvId),
    Forcing,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SelfBinding {
    pub obj: ObjId,
    /// Index of the layer the executing code belongs to; `super` looks below it.
    pub layer: usize,
}

#[derive(Debug)]
pub(crate) struct EnvFrame {
    pub vars: Vec<(Rc<str>, ThunkId)>,
    pub parent: Option<EnvId>,
    pub this: Option<SelfBinding>,
    pub dollar: Option<ObjId>,
}

#[derive(Debug)]
pub(crate) enum FieldBody {
    Node { body: NodeRef, env: EnvId },
    Thunk(ThunkId),
}

#[derive(Debug)]
pub(crate) struct LayerField {
    pub hide: Hide,
    pub plus_super: bool,
    pub body: FieldBody,
}

/// One object literal's contribution to a (possibly merged) object.
#[derive(Debug)]
pub(crate) struct Layer {
    pub fields: IndexMap<Rc<str>, LayerField>,
    pub asserts: Vec<ObjectAssert>,
    pub locals: Vec<Bind>,
    pub env: EnvId,
}

#[derive(Debug)]
pub(crate) struct ObjectData {
    /// Base first; later layers override earlier ones.
    pub layers: Rc<Vec<Rc<Layer>>>,
    pub cache: std::collections::HashMap<Rc<str>, Value>,
    pub asserts_checked: bool,
}
