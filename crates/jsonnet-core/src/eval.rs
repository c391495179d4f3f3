//
// eval.rs
//
// Tree-walking evaluator over the desugared AST
//

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{BinaryOp, Bind, CompSpec, Field, Hide, NodeKind, NodeRef, ObjectAssert, UnaryOp};
use crate::error::{EvalError, EvalResult};
use crate::parser;
use crate::stdlib::BUILTINS;
use crate::value::{
    EnvFrame, EnvId, FieldBody, FunctionValue, Layer, LayerField, ObjId, ObjectData, SelfBinding,
    ThunkId, ThunkState, Value,
};
use crate::vm::{ExtVar, Vm};

/// Nested function calls, field evaluations and thunk forces allowed before
/// evaluation is abandoned.
pub const MAX_STACK: usize = 500;

pub(crate) fn runtime(message: impl Into<String>) -> EvalError {
    EvalError::runtime(message, None)
}

pub struct Evaluator<'vm> {
    vm: &'vm Vm,
    thunks: Vec<ThunkState>,
    envs: Vec<EnvFrame>,
    pub(crate) objects: Vec<ObjectData>,
    depth: usize,
    std_base: Option<ObjId>,
    std_per_file: HashMap<String, ThunkId>,
    imports: HashMap<PathBuf, ThunkId>,
    ext_cache: HashMap<String, ThunkId>,
}

impl<'vm> Evaluator<'vm> {
    pub(crate) fn new(vm: &'vm Vm) -> Self {
        Self {
            vm,
            thunks: Vec::new(),
            envs: Vec::new(),
            objects: Vec::new(),
            depth: 0,
            std_base: None,
            std_per_file: HashMap::new(),
            imports: HashMap::new(),
            ext_cache: HashMap::new(),
        }
    }

    // ========================================================================
    // Arena
    // ========================================================================

    pub(crate) fn ready(&mut self, value: Value) -> ThunkId {
        self.thunks.push(ThunkState::Done(value));
        ThunkId(self.thunks.len() - 1)
    }

    fn pending(&mut self, node: &NodeRef, env: EnvId) -> ThunkId {
        self.thunks.push(ThunkState::Pending(node.clone(), env));
        ThunkId(self.thunks.len() - 1)
    }

    /// A child frame inheriting `self`, `super` and `$` from `parent`.
    fn new_env(&mut self, parent: EnvId, vars: Vec<(Rc<str>, ThunkId)>) -> EnvId {
        let (this, dollar) = {
            let p = &self.envs[parent.0];
            (p.this, p.dollar)
        };
        self.envs.push(EnvFrame {
            vars,
            parent: Some(parent),
            this,
            dollar,
        });
        EnvId(self.envs.len() - 1)
    }

    fn empty_env(&mut self) -> EnvId {
        self.envs.push(EnvFrame {
            vars: Vec::new(),
            parent: None,
            this: None,
            dollar: None,
        });
        EnvId(self.envs.len() - 1)
    }

    /// Top-level environment for a file: only `std` is bound.
    pub(crate) fn root_env(&mut self, file: &str) -> EnvId {
        let std_thunk = self.std_for(file);
        self.envs.push(EnvFrame {
            vars: vec![(Rc::from("std"), std_thunk)],
            parent: None,
            this: None,
            dollar: None,
        });
        EnvId(self.envs.len() - 1)
    }

    fn lookup(&self, mut env: EnvId, id: &str) -> Option<ThunkId> {
        loop {
            let frame = &self.envs[env.0];
            if let Some((_, thunk)) = frame.vars.iter().rev().find(|(name, _)| &**name == id) {
                return Some(*thunk);
            }
            env = frame.parent?;
        }
    }

    fn push_frame(&mut self) -> EvalResult<()> {
        if self.depth >= MAX_STACK {
            return Err(EvalError::StackOverflow { loc: None });
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn force(&mut self, thunk: ThunkId) -> EvalResult<Value> {
        let state = std::mem::replace(&mut self.thunks[thunk.0], ThunkState::Forcing);
        match state {
            ThunkState::Done(value) => {
                self.thunks[thunk.0] = ThunkState::Done(value.clone());
                Ok(value)
            }
            ThunkState::Pending(node, env) => {
                if let Err(e) = self.push_frame() {
                    self.thunks[thunk.0] = ThunkState::Pending(node, env);
                    return Err(e);
                }
                let result = self.eval(&node, env);
                self.depth -= 1;
                match result {
                    Ok(value) => {
                        self.thunks[thunk.0] = ThunkState::Done(value.clone());
                        Ok(value)
                    }
                    Err(e) => {
                        self.thunks[thunk.0] = ThunkState::Pending(node, env);
                        Err(e)
                    }
                }
            }
            ThunkState::Forcing => Err(runtime("infinite recursion detected")),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub(crate) fn eval(&mut self, node: &NodeRef, env: EnvId) -> EvalResult<Value> {
        self.eval_inner(node, env).map_err(|e| e.at(&node.loc))
    }

    fn eval_inner(&mut self, node: &NodeRef, env: EnvId) -> EvalResult<Value> {
        match &node.kind {
            NodeKind::LiteralNull => Ok(Value::Null),
            NodeKind::LiteralBoolean(b) => Ok(Value::Bool(*b)),
            NodeKind::LiteralNumber { value, .. } => Ok(Value::Number(*value)),
            NodeKind::LiteralString(s) => Ok(Value::string(s)),
            NodeKind::Var { id } => match self.lookup(env, id) {
                Some(thunk) => self.force(thunk),
                None => Err(runtime(format!("unknown variable: {id}"))),
            },
            NodeKind::Self_ => match self.envs[env.0].this {
                Some(this) => Ok(Value::Object(this.obj)),
                None => Err(runtime("can't use self outside of an object")),
            },
            NodeKind::Dollar => match self.envs[env.0].dollar {
                Some(obj) => Ok(Value::Object(obj)),
                None => Err(runtime("no top-level object found")),
            },
            NodeKind::Local { binds, body } => {
                let frame = self.bind_locals(env, binds);
                self.eval(body, frame)
            }
            NodeKind::Array { elements } => {
                let items = elements.iter().map(|e| self.pending(e, env)).collect();
                Ok(Value::Array(Rc::new(items)))
            }
            NodeKind::ArrayComp { body, specs } => {
                let envs = self.comprehension_envs(specs, env)?;
                let items = envs.into_iter().map(|e| self.pending(body, e)).collect();
                Ok(Value::Array(Rc::new(items)))
            }
            NodeKind::DesugaredObject {
                asserts,
                fields,
                locals,
            } => self.eval_object(env, asserts, fields, locals),
            NodeKind::ObjectComp {
                locals,
                key,
                value,
                plus_super,
                specs,
            } => self.eval_object_comp(env, locals, key, value, *plus_super, specs),
            NodeKind::Function { .. } => Ok(Value::Function(Rc::new(FunctionValue::Closure {
                node: node.clone(),
                env,
            }))),
            NodeKind::Apply {
                target,
                positional,
                named,
                ..
            } => {
                let function = self.eval(target, env)?;
                let positional = positional.iter().map(|a| self.pending(a, env)).collect();
                let named = named
                    .iter()
                    .map(|a| (a.name.clone(), self.pending(&a.arg, env)))
                    .collect();
                self.call(&function, positional, named)
            }
            NodeKind::Index { target, index } => {
                let target = self.eval(target, env)?;
                let index = self.eval(index, env)?;
                self.index_value(&target, &index)
            }
            NodeKind::SuperIndex { index } => {
                let Some(this) = self.envs[env.0].this else {
                    return Err(runtime("attempt to use super when there is no super class"));
                };
                let name = match self.eval(index, env)? {
                    Value::Str(s) => s,
                    other => {
                        return Err(runtime(format!(
                            "super index must be string, got {}",
                            other.type_name()
                        )))
                    }
                };
                match self.lookup_field(this.obj, &name, this.layer)? {
                    Some(value) => Ok(value),
                    None => Err(runtime(format!("field does not exist in super: {name}"))),
                }
            }
            NodeKind::InSuper { index } => {
                let Some(this) = self.envs[env.0].this else {
                    return Err(runtime("attempt to use super when there is no super class"));
                };
                match self.eval(index, env)? {
                    Value::Str(name) => Ok(Value::Bool(self.defines_field(
                        this.obj,
                        &name,
                        this.layer,
                    ))),
                    other => Err(runtime(format!(
                        "field name must be string, got {}",
                        other.type_name()
                    ))),
                }
            }
            NodeKind::Binary { left, op, right } => self.eval_binary(left, *op, right, env),
            NodeKind::Unary { op, expr } => {
                let value = self.eval(expr, env)?;
                match (op, value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Minus, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Plus, Value::Number(n)) => Ok(Value::Number(n)),
                    (UnaryOp::BitwiseNot, Value::Number(n)) => Ok(Value::Number(!(n as i64) as f64)),
                    (op, value) => Err(runtime(format!(
                        "unary operator {} does not operate on type {}",
                        op.as_str(),
                        value.type_name()
                    ))),
                }
            }
            NodeKind::Conditional {
                cond,
                branch_true,
                branch_false,
            } => match self.eval(cond, env)? {
                Value::Bool(true) => self.eval(branch_true, env),
                Value::Bool(false) => self.eval(branch_false, env),
                other => Err(runtime(format!(
                    "condition must be boolean, got {}",
                    other.type_name()
                ))),
            },
            NodeKind::Error { expr } => {
                let value = self.eval(expr, env)?;
                let message = self.to_display_string(&value)?;
                Err(EvalError::runtime(message, Some(&node.loc)))
            }
            NodeKind::Assert {
                cond,
                message,
                rest,
            } => match self.eval(cond, env)? {
                Value::Bool(true) => self.eval(rest, env),
                Value::Bool(false) => {
                    let text = match message {
                        Some(m) => {
                            let value = self.eval(m, env)?;
                            self.to_display_string(&value)?
                        }
                        None => "assertion failed".to_string(),
                    };
                    Err(EvalError::runtime(text, Some(&node.loc)))
                }
                other => Err(runtime(format!(
                    "assertion condition must be boolean, got {}",
                    other.type_name()
                ))),
            },
            NodeKind::Import { file } => self.import_value(&node.loc.file, file),
            NodeKind::ImportStr { file } => {
                let (_, bytes) = self.vm.import_contents(&node.loc.file, file)?;
                match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Ok(Value::string(&text)),
                    Err(_) => Err(runtime(format!("{file} is not valid UTF-8"))),
                }
            }
            NodeKind::ImportBin { file } => {
                let (_, bytes) = self.vm.import_contents(&node.loc.file, file)?;
                let items = bytes
                    .iter()
                    .map(|b| self.ready(Value::Number(f64::from(*b))))
                    .collect();
                Ok(Value::Array(Rc::new(items)))
            }
        }
    }

    fn bind_locals(&mut self, env: EnvId, binds: &[Bind]) -> EnvId {
        let frame = self.new_env(env, Vec::with_capacity(binds.len()));
        for bind in binds {
            let thunk = self.pending(&bind.body, frame);
            self.envs[frame.0]
                .vars
                .push((Rc::from(bind.variable.as_str()), thunk));
        }
        frame
    }

    fn comprehension_envs(&mut self, specs: &[CompSpec], env: EnvId) -> EvalResult<Vec<EnvId>> {
        let mut envs = vec![env];
        for spec in specs {
            match spec {
                CompSpec::For { variable, expr, .. } => {
                    let mut next = Vec::new();
                    for e in envs {
                        let items = match self.eval(expr, e)? {
                            Value::Array(items) => items,
                            other => {
                                return Err(runtime(format!(
                                    "in comprehension, can only iterate over array, got {}",
                                    other.type_name()
                                )))
                            }
                        };
                        for item in items.iter() {
                            next.push(self.new_env(e, vec![(Rc::from(variable.as_str()), *item)]));
                        }
                    }
                    envs = next;
                }
                CompSpec::If { cond } => {
                    let mut kept = Vec::with_capacity(envs.len());
                    for e in envs {
                        match self.eval(cond, e)? {
                            Value::Bool(true) => kept.push(e),
                            Value::Bool(false) => {}
                            other => {
                                return Err(runtime(format!(
                                    "condition must be boolean, got {}",
                                    other.type_name()
                                )))
                            }
                        }
                    }
                    envs = kept;
                }
            }
        }
        Ok(envs)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    pub(crate) fn new_object(&mut self, layers: Vec<Rc<Layer>>) -> ObjId {
        let asserts_checked = layers.iter().all(|l| l.asserts.is_empty());
        self.objects.push(ObjectData {
            layers: Rc::new(layers),
            cache: HashMap::new(),
            asserts_checked,
        });
        ObjId(self.objects.len() - 1)
    }

    /// Object with plain visible fields holding already-computed values.
    pub(crate) fn object_from_values(&mut self, entries: Vec<(Rc<str>, Value)>) -> ObjId {
        let env = self.empty_env();
        let mut fields = IndexMap::new();
        for (name, value) in entries {
            let thunk = self.ready(value);
            fields.insert(
                name,
                LayerField {
                    hide: Hide::Inherit,
                    plus_super: false,
                    body: FieldBody::Thunk(thunk),
                },
            );
        }
        self.new_object(vec![Rc::new(Layer {
            fields,
            asserts: Vec::new(),
            locals: Vec::new(),
            env,
        })])
    }

    fn field_name(&mut self, name: &NodeRef, env: EnvId) -> EvalResult<Option<Rc<str>>> {
        if let Some(s) = name.as_string() {
            return Ok(Some(Rc::from(s)));
        }
        match self.eval(name, env)? {
            Value::Str(s) => Ok(Some(s)),
            Value::Null => Ok(None),
            other => Err(EvalError::runtime(
                format!("field name must be string, got {}", other.type_name()),
                Some(&name.loc),
            )),
        }
    }

    fn eval_object(
        &mut self,
        env: EnvId,
        asserts: &[ObjectAssert],
        fields: &[Field],
        locals: &[Bind],
    ) -> EvalResult<Value> {
        let mut layer_fields = IndexMap::new();
        for field in fields {
            let Some(name) = self.field_name(&field.name, env)? else {
                continue;
            };
            if layer_fields.contains_key(&name) {
                return Err(EvalError::runtime(
                    format!("duplicate field name: \"{name}\""),
                    Some(&field.name.loc),
                ));
            }
            layer_fields.insert(
                name,
                LayerField {
                    hide: field.hide,
                    plus_super: field.plus_super,
                    body: FieldBody::Node {
                        body: field.body.clone(),
                        env,
                    },
                },
            );
        }
        let layer = Layer {
            fields: layer_fields,
            asserts: asserts.to_vec(),
            locals: locals.to_vec(),
            env,
        };
        Ok(Value::Object(self.new_object(vec![Rc::new(layer)])))
    }

    fn eval_object_comp(
        &mut self,
        env: EnvId,
        locals: &[Bind],
        key: &NodeRef,
        value: &NodeRef,
        plus_super: bool,
        specs: &[CompSpec],
    ) -> EvalResult<Value> {
        let mut layer_fields = IndexMap::new();
        for e in self.comprehension_envs(specs, env)? {
            let Some(name) = self.field_name(key, e)? else {
                continue;
            };
            if layer_fields.contains_key(&name) {
                return Err(EvalError::runtime(
                    format!("duplicate field name: \"{name}\""),
                    Some(&key.loc),
                ));
            }
            layer_fields.insert(
                name,
                LayerField {
                    hide: Hide::Inherit,
                    plus_super,
                    body: FieldBody::Node {
                        body: value.clone(),
                        env: e,
                    },
                },
            );
        }
        let layer = Layer {
            fields: layer_fields,
            asserts: Vec::new(),
            locals: locals.to_vec(),
            env,
        };
        Ok(Value::Object(self.new_object(vec![Rc::new(layer)])))
    }

    fn object_frame(&mut self, env: EnvId, obj: ObjId, layer: usize, locals: &[Bind]) -> EnvId {
        let dollar = self.envs[env.0].dollar.unwrap_or(obj);
        self.envs.push(EnvFrame {
            vars: Vec::with_capacity(locals.len()),
            parent: Some(env),
            this: Some(SelfBinding { obj, layer }),
            dollar: Some(dollar),
        });
        let frame = EnvId(self.envs.len() - 1);
        for bind in locals {
            let thunk = self.pending(&bind.body, frame);
            self.envs[frame.0]
                .vars
                .push((Rc::from(bind.variable.as_str()), thunk));
        }
        frame
    }

    /// Field names sorted, optionally including hidden ones.
    pub(crate) fn object_fields(&self, obj: ObjId, include_hidden: bool) -> Vec<Rc<str>> {
        let mut visibility: IndexMap<Rc<str>, bool> = IndexMap::new();
        for layer in self.objects[obj.0].layers.iter() {
            for (name, field) in &layer.fields {
                match field.hide {
                    Hide::Hidden => {
                        visibility.insert(name.clone(), false);
                    }
                    Hide::Visible => {
                        visibility.insert(name.clone(), true);
                    }
                    Hide::Inherit => {
                        visibility.entry(name.clone()).or_insert(true);
                    }
                }
            }
        }
        let mut names: Vec<Rc<str>> = visibility
            .into_iter()
            .filter(|(_, visible)| include_hidden || *visible)
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Whether any layer below `limit` defines `name`.
    pub(crate) fn defines_field(&self, obj: ObjId, name: &str, limit: usize) -> bool {
        self.objects[obj.0]
            .layers
            .iter()
            .take(limit)
            .any(|layer| layer.fields.contains_key(name))
    }

    pub(crate) fn has_field(&self, obj: ObjId, name: &str, include_hidden: bool) -> bool {
        if include_hidden {
            let limit = self.objects[obj.0].layers.len();
            return self.defines_field(obj, name, limit);
        }
        self.object_fields(obj, false).iter().any(|f| &**f == name)
    }

    pub(crate) fn object_field(&mut self, obj: ObjId, name: &str) -> EvalResult<Value> {
        self.check_asserts(obj)?;
        if let Some(value) = self.objects[obj.0].cache.get(name) {
            return Ok(value.clone());
        }
        let limit = self.objects[obj.0].layers.len();
        match self.lookup_field(obj, name, limit)? {
            Some(value) => {
                self.objects[obj.0]
                    .cache
                    .insert(Rc::from(name), value.clone());
                Ok(value)
            }
            None => Err(runtime(format!("field does not exist: {name}"))),
        }
    }

    /// Value of `name` on `obj` as seen from the layers below `limit`.
    fn lookup_field(&mut self, obj: ObjId, name: &str, limit: usize) -> EvalResult<Option<Value>> {
        let layers = self.objects[obj.0].layers.clone();
        for index in (0..limit.min(layers.len())).rev() {
            let layer = &layers[index];
            let Some(field) = layer.fields.get(name) else {
                continue;
            };
            let value = match &field.body {
                FieldBody::Thunk(thunk) => self.force(*thunk)?,
                FieldBody::Node { body, env } => {
                    self.push_frame()?;
                    let frame = self.object_frame(*env, obj, index, &layer.locals);
                    let result = self.eval(body, frame);
                    self.depth -= 1;
                    result?
                }
            };
            if field.plus_super {
                if let Some(base) = self.lookup_field(obj, name, index)? {
                    return self.add(base, value).map(Some);
                }
            }
            return Ok(Some(value));
        }
        Ok(None)
    }

    fn check_asserts(&mut self, obj: ObjId) -> EvalResult<()> {
        if self.objects[obj.0].asserts_checked {
            return Ok(());
        }
        self.objects[obj.0].asserts_checked = true;
        let layers = self.objects[obj.0].layers.clone();
        for (index, layer) in layers.iter().enumerate() {
            for assert in &layer.asserts {
                let frame = self.object_frame(layer.env, obj, index, &layer.locals);
                match self.eval(&assert.cond, frame)? {
                    Value::Bool(true) => {}
                    Value::Bool(false) => {
                        let text = match &assert.message {
                            Some(m) => {
                                let value = self.eval(m, frame)?;
                                self.to_display_string(&value)?
                            }
                            None => "object assertion failed".to_string(),
                        };
                        return Err(EvalError::runtime(text, Some(&assert.loc)));
                    }
                    other => {
                        return Err(runtime(format!(
                            "assertion condition must be boolean, got {}",
                            other.type_name()
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    fn merge(&mut self, left: ObjId, right: ObjId) -> ObjId {
        let mut layers: Vec<Rc<Layer>> = self.objects[left.0].layers.iter().cloned().collect();
        layers.extend(self.objects[right.0].layers.iter().cloned());
        self.new_object(layers)
    }

    // ========================================================================
    // Functions
    // ========================================================================

    pub(crate) fn call(
        &mut self,
        function: &Value,
        positional: Vec<ThunkId>,
        named: Vec<(String, ThunkId)>,
    ) -> EvalResult<Value> {
        let Value::Function(function) = function else {
            return Err(runtime(format!(
                "unexpected type {}, expected function",
                function.type_name()
            )));
        };
        let function = function.clone();
        self.push_frame()?;
        let result = match &*function {
            FunctionValue::Closure { node, env } => self.call_closure(node, *env, positional, named),
            FunctionValue::Builtin(builtin) => {
                match bind_args(builtin.params, positional, named) {
                    Ok(args) => {
                        let missing = args
                            .iter()
                            .take(builtin.required)
                            .position(Option::is_none);
                        match missing {
                            Some(i) => Err(runtime(format!(
                                "missing argument: {} in std.{}",
                                builtin.params[i], builtin.name
                            ))),
                            None => self.call_builtin(builtin, args),
                        }
                    }
                    Err(e) => Err(e),
                }
            }
        };
        self.depth -= 1;
        result
    }

    /// Calls `function` with already-computed positional arguments.
    pub(crate) fn call_with_values(&mut self, function: &Value, args: Vec<Value>) -> EvalResult<Value> {
        let thunks = args.into_iter().map(|v| self.ready(v)).collect();
        self.call(function, thunks, Vec::new())
    }

    fn call_closure(
        &mut self,
        node: &NodeRef,
        env: EnvId,
        positional: Vec<ThunkId>,
        named: Vec<(String, ThunkId)>,
    ) -> EvalResult<Value> {
        let NodeKind::Function { params, body } = &node.kind else {
            return Err(runtime("closure over a non-function node"));
        };
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        let slots = bind_args(&names, positional, named)?;
        let frame = self.new_env(env, Vec::with_capacity(params.len()));
        for (param, slot) in params.iter().zip(slots) {
            let thunk = match (slot, &param.default) {
                (Some(thunk), _) => thunk,
                (None, Some(default)) => self.pending(default, frame),
                (None, None) => return Err(runtime(format!("missing argument: {}", param.name))),
            };
            self.envs[frame.0]
                .vars
                .push((Rc::from(param.name.as_str()), thunk));
        }
        self.eval(body, frame)
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn eval_binary(
        &mut self,
        left: &NodeRef,
        op: BinaryOp,
        right: &NodeRef,
        env: EnvId,
    ) -> EvalResult<Value> {
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let l = match self.eval(left, env)? {
                Value::Bool(b) => b,
                other => {
                    return Err(runtime(format!(
                        "binary operator {} does not operate on type {}",
                        op.as_str(),
                        other.type_name()
                    )))
                }
            };
            if (op == BinaryOp::And && !l) || (op == BinaryOp::Or && l) {
                return Ok(Value::Bool(l));
            }
            return match self.eval(right, env)? {
                Value::Bool(r) => Ok(Value::Bool(r)),
                other => Err(runtime(format!(
                    "binary operator {} does not operate on type {}",
                    op.as_str(),
                    other.type_name()
                ))),
            };
        }
        let l = self.eval(left, env)?;
        let r = self.eval(right, env)?;
        self.binary_values(op, l, r)
    }

    pub(crate) fn binary_values(&mut self, op: BinaryOp, l: Value, r: Value) -> EvalResult<Value> {
        use Value::{Number, Str};
        match (op, &l, &r) {
            (BinaryOp::Plus, _, _) => self.add(l, r),
            (BinaryOp::Minus, Number(a), Number(b)) => Ok(Number(a - b)),
            (BinaryOp::Mult, Number(a), Number(b)) => Ok(Number(a * b)),
            (BinaryOp::Div, Number(a), Number(b)) => {
                if *b == 0.0 {
                    return Err(runtime("division by zero"));
                }
                Ok(Number(a / b))
            }
            (BinaryOp::Percent, Number(a), Number(b)) => {
                if *b == 0.0 {
                    return Err(runtime("division by zero"));
                }
                Ok(Number(a % b))
            }
            (BinaryOp::Percent, Str(format), _) => {
                let format = format.clone();
                self.format(&format, r).map(|s| Value::string(&s))
            }
            (BinaryOp::ShiftL, Number(a), Number(b)) => {
                Ok(Number(((*a as i64) << ((*b as i64) & 63)) as f64))
            }
            (BinaryOp::ShiftR, Number(a), Number(b)) => {
                Ok(Number(((*a as i64) >> ((*b as i64) & 63)) as f64))
            }
            (BinaryOp::BitwiseAnd, Number(a), Number(b)) => {
                Ok(Number(((*a as i64) & (*b as i64)) as f64))
            }
            (BinaryOp::BitwiseXor, Number(a), Number(b)) => {
                Ok(Number(((*a as i64) ^ (*b as i64)) as f64))
            }
            (BinaryOp::BitwiseOr, Number(a), Number(b)) => {
                Ok(Number(((*a as i64) | (*b as i64)) as f64))
            }
            (BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq, _, _) => {
                let ordering = self.compare(&l, &r)?;
                Ok(Value::Bool(match op {
                    BinaryOp::Less => ordering == Ordering::Less,
                    BinaryOp::LessEq => ordering != Ordering::Greater,
                    BinaryOp::Greater => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            (BinaryOp::Equal, _, _) => self.equals(&l, &r).map(Value::Bool),
            (BinaryOp::NotEqual, _, _) => self.equals(&l, &r).map(|eq| Value::Bool(!eq)),
            (BinaryOp::In, Str(name), Value::Object(obj)) => {
                Ok(Value::Bool(self.has_field(*obj, name, true)))
            }
            _ => Err(runtime(format!(
                "binary operator {} does not operate on types {} and {}",
                op.as_str(),
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    pub(crate) fn add(&mut self, l: Value, r: Value) -> EvalResult<Value> {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::string(&format!("{a}{b}"))),
            (Value::Str(a), _) => {
                let b = self.to_display_string(&r)?;
                Ok(Value::string(&format!("{a}{b}")))
            }
            (_, Value::Str(b)) => {
                let a = self.to_display_string(&l)?;
                Ok(Value::string(&format!("{a}{b}")))
            }
            (Value::Array(a), Value::Array(b)) => {
                let mut items = Vec::with_capacity(a.len() + b.len());
                items.extend(a.iter().copied());
                items.extend(b.iter().copied());
                Ok(Value::Array(Rc::new(items)))
            }
            (Value::Object(a), Value::Object(b)) => Ok(Value::Object(self.merge(*a, *b))),
            _ => Err(runtime(format!(
                "binary operator + does not operate on types {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    pub(crate) fn compare(&mut self, l: &Value, r: &Value) -> EvalResult<Ordering> {
        match (l, r) {
            (Value::Number(a), Value::Number(b)) => a
                .partial_cmp(b)
                .ok_or_else(|| runtime("cannot compare NaN")),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Array(a), Value::Array(b)) => {
                let (a, b) = (a.clone(), b.clone());
                for (x, y) in a.iter().zip(b.iter()) {
                    let x = self.force(*x)?;
                    let y = self.force(*y)?;
                    let ordering = self.compare(&x, &y)?;
                    if ordering != Ordering::Equal {
                        return Ok(ordering);
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(runtime(format!(
                "comparison is not supported between {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    pub(crate) fn equals(&mut self, l: &Value, r: &Value) -> EvalResult<bool> {
        match (l, r) {
            (Value::Null, Value::Null) => Ok(true),
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            (Value::Number(a), Value::Number(b)) => Ok(a == b),
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                let (a, b) = (a.clone(), b.clone());
                for (x, y) in a.iter().zip(b.iter()) {
                    let x = self.force(*x)?;
                    let y = self.force(*y)?;
                    if !self.equals(&x, &y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Object(a), Value::Object(b)) => {
                let fields = self.object_fields(*a, false);
                if fields != self.object_fields(*b, false) {
                    return Ok(false);
                }
                for name in fields {
                    let x = self.object_field(*a, &name)?;
                    let y = self.object_field(*b, &name)?;
                    if !self.equals(&x, &y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Function(_), Value::Function(_)) => {
                Err(runtime("cannot test equality of functions"))
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn index_value(&mut self, target: &Value, index: &Value) -> EvalResult<Value> {
        match (target, index) {
            (Value::Object(obj), Value::Str(name)) => self.object_field(*obj, name),
            (Value::Array(items), Value::Number(n)) => {
                let i = integer_index(*n, items.len())?;
                self.force(items[i])
            }
            (Value::Str(s), Value::Number(n)) => {
                let chars: Vec<char> = s.chars().collect();
                let i = integer_index(*n, chars.len())?;
                Ok(Value::string(&chars[i].to_string()))
            }
            (Value::Object(_), other) | (Value::Array(_), other) | (Value::Str(_), other) => {
                Err(runtime(format!(
                    "{} index must be {}, got {}",
                    target.type_name(),
                    if matches!(target, Value::Object(_)) { "string" } else { "number" },
                    other.type_name()
                )))
            }
            _ => Err(runtime(format!(
                "value of type {} is not indexable",
                target.type_name()
            ))),
        }
    }

    // ========================================================================
    // Imports and externals
    // ========================================================================

    fn import_value(&mut self, importer: &str, path: &str) -> EvalResult<Value> {
        let (node, resolved) = self.vm.import_ast(importer, path)?;
        if let Some(thunk) = self.imports.get(&resolved).copied() {
            return self.force(thunk);
        }
        let env = self.root_env(&resolved.to_string_lossy());
        let thunk = self.pending(&node, env);
        self.imports.insert(resolved, thunk);
        self.force(thunk)
    }

    pub(crate) fn ext_var(&mut self, name: &str) -> EvalResult<Value> {
        if let Some(thunk) = self.ext_cache.get(name).copied() {
            return self.force(thunk);
        }
        let vm = self.vm;
        let thunk = match vm.ext_var(name) {
            Some(ExtVar::Str(s)) => self.ready(Value::string(s)),
            Some(ExtVar::Code(code)) => {
                let file = format!("<extvar:{name}>");
                let node = parser::parse(&file, code)?;
                let env = self.root_env(&file);
                self.pending(&node, env)
            }
            None => return Err(runtime(format!("undefined external variable: {name}"))),
        };
        self.ext_cache.insert(name.to_string(), thunk);
        self.force(thunk)
    }

    fn std_base(&mut self) -> ObjId {
        if let Some(obj) = self.std_base {
            return obj;
        }
        let mut fields = IndexMap::new();
        for builtin in BUILTINS {
            let thunk = self.ready(Value::Function(Rc::new(FunctionValue::Builtin(builtin))));
            fields.insert(
                Rc::from(builtin.name),
                LayerField {
                    hide: Hide::Hidden,
                    plus_super: false,
                    body: FieldBody::Thunk(thunk),
                },
            );
        }
        let env = self.empty_env();
        let obj = self.new_object(vec![Rc::new(Layer {
            fields,
            asserts: Vec::new(),
            locals: Vec::new(),
            env,
        })]);
        self.std_base = Some(obj);
        obj
    }

    fn std_for(&mut self, file: &str) -> ThunkId {
        if let Some(thunk) = self.std_per_file.get(file) {
            return *thunk;
        }
        let base = self.std_base();
        let this_file = self.ready(Value::string(file));
        let mut fields = IndexMap::new();
        fields.insert(
            Rc::from("thisFile"),
            LayerField {
                hide: Hide::Hidden,
                plus_super: false,
                body: FieldBody::Thunk(this_file),
            },
        );
        let env = self.empty_env();
        let mut layers: Vec<Rc<Layer>> = self.objects[base.0].layers.iter().cloned().collect();
        layers.push(Rc::new(Layer {
            fields,
            asserts: Vec::new(),
            locals: Vec::new(),
            env,
        }));
        let obj = self.new_object(layers);
        let thunk = self.ready(Value::Object(obj));
        self.std_per_file.insert(file.to_string(), thunk);
        thunk
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Evaluates a parsed document in a fresh top-level environment.
    pub(crate) fn eval_root(&mut self, node: &NodeRef) -> EvalResult<Value> {
        let env = self.root_env(&node.loc.file);
        self.eval(node, env)
    }
}

fn bind_args(
    params: &[&str],
    positional: Vec<ThunkId>,
    named: Vec<(String, ThunkId)>,
) -> EvalResult<Vec<Option<ThunkId>>> {
    if positional.len() > params.len() {
        return Err(runtime(format!(
            "too many arguments, function has {} parameter(s)",
            params.len()
        )));
    }
    let mut slots = vec![None; params.len()];
    for (slot, thunk) in slots.iter_mut().zip(positional) {
        *slot = Some(thunk);
    }
    for (name, thunk) in named {
        let Some(i) = params.iter().position(|p| *p == name) else {
            return Err(runtime(format!("function has no parameter {name}")));
        };
        if slots[i].is_some() {
            return Err(runtime(format!("argument {name} already provided")));
        }
        slots[i] = Some(thunk);
    }
    Ok(slots)
}

fn integer_index(n: f64, len: usize) -> EvalResult<usize> {
    if n.fract() != 0.0 {
        return Err(runtime(format!("index must be an integer, got {n}")));
    }
    if n < 0.0 || n as usize >= len {
        return Err(runtime(format!(
            "index {n} out of bounds, not within [0, {len})"
        )));
    }
    Ok(n as usize)
}
