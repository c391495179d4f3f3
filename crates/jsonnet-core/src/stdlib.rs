//
// stdlib.rs
//
// Native implementations of the `std` object's functions
//

use std::cmp::Ordering;
use std::rc::Rc;

use crate::error::EvalResult;
use crate::eval::{runtime, Evaluator};
use crate::manifest::{quote, to_pretty};
use crate::value::{Builtin, FunctionValue, ObjId, ThunkId, Value};

macro_rules! count {
    () => { 0usize };
    ($head:literal $(, $tail:literal)*) => { 1usize + count!($($tail),*) };
}

macro_rules! builtin {
    ($name:literal, [$($param:literal),*]) => {
        builtin!($name, [$($param),*], count!($($param),*))
    };
    ($name:literal, [$($param:literal),*], $required:expr) => {
        Builtin {
            name: $name,
            params: &[$($param),*],
            required: $required,
        }
    };
}

pub static BUILTINS: &[Builtin] = &[
    builtin!("abs", ["n"]),
    builtin!("all", ["arr"]),
    builtin!("any", ["arr"]),
    builtin!("asciiLower", ["str"]),
    builtin!("asciiUpper", ["str"]),
    builtin!("assertEqual", ["a", "b"]),
    builtin!("ceil", ["x"]),
    builtin!("char", ["n"]),
    builtin!("codepoint", ["str"]),
    builtin!("contains", ["arr", "elem"]),
    builtin!("count", ["arr", "x"]),
    builtin!("endsWith", ["a", "b"]),
    builtin!("equals", ["a", "b"]),
    builtin!("escapeStringJson", ["str"]),
    builtin!("exp", ["x"]),
    builtin!("extVar", ["x"]),
    builtin!("filter", ["func", "arr"]),
    builtin!("filterMap", ["filter_func", "map_func", "arr"]),
    builtin!("flatMap", ["func", "arr"]),
    builtin!("flattenArrays", ["arrs"]),
    builtin!("floor", ["x"]),
    builtin!("foldl", ["func", "arr", "init"]),
    builtin!("foldr", ["func", "arr", "init"]),
    builtin!("format", ["str", "vals"]),
    builtin!("get", ["o", "f", "default", "inc_hidden"], 2),
    builtin!("isArray", ["v"]),
    builtin!("isBoolean", ["v"]),
    builtin!("isEmpty", ["str"]),
    builtin!("isFunction", ["v"]),
    builtin!("isNumber", ["v"]),
    builtin!("isObject", ["v"]),
    builtin!("isString", ["v"]),
    builtin!("join", ["sep", "arr"]),
    builtin!("length", ["x"]),
    builtin!("lines", ["arr"]),
    builtin!("log", ["x"]),
    builtin!("lstripChars", ["str", "chars"]),
    builtin!("makeArray", ["sz", "func"]),
    builtin!("manifestJson", ["value"]),
    builtin!("manifestJsonEx", ["value", "indent", "newline", "key_val_sep"], 2),
    builtin!("map", ["func", "arr"]),
    builtin!("mapWithIndex", ["func", "arr"]),
    builtin!("mapWithKey", ["func", "obj"]),
    builtin!("max", ["a", "b"]),
    builtin!("member", ["arr", "x"]),
    builtin!("mergePatch", ["target", "patch"]),
    builtin!("min", ["a", "b"]),
    builtin!("mod", ["a", "b"]),
    builtin!("modulo", ["x", "y"]),
    builtin!("native", ["name"]),
    builtin!("objectFields", ["o"]),
    builtin!("objectFieldsAll", ["o"]),
    builtin!("objectFieldsEx", ["obj", "hidden"]),
    builtin!("objectHas", ["o", "f"]),
    builtin!("objectHasAll", ["o", "f"]),
    builtin!("objectHasEx", ["obj", "fname", "hidden"]),
    builtin!("objectKeysValues", ["o"]),
    builtin!("objectKeysValuesAll", ["o"]),
    builtin!("objectValues", ["o"]),
    builtin!("objectValuesAll", ["o"]),
    builtin!("parseInt", ["str"]),
    builtin!("parseJson", ["str"]),
    builtin!("pow", ["x", "n"]),
    builtin!("primitiveEquals", ["x", "y"]),
    builtin!("range", ["from", "to"]),
    builtin!("repeat", ["what", "count"]),
    builtin!("reverse", ["arr"]),
    builtin!("round", ["x"]),
    builtin!("rstripChars", ["str", "chars"]),
    builtin!("set", ["arr", "keyF"], 1),
    builtin!("setDiff", ["a", "b", "keyF"], 2),
    builtin!("setInter", ["a", "b", "keyF"], 2),
    builtin!("setMember", ["x", "arr", "keyF"], 2),
    builtin!("setUnion", ["a", "b", "keyF"], 2),
    builtin!("sign", ["n"]),
    builtin!("slice", ["indexable", "index", "end", "step"]),
    builtin!("sort", ["arr", "keyF"], 1),
    builtin!("split", ["str", "c"]),
    builtin!("splitLimit", ["str", "c", "maxsplits"]),
    builtin!("sqrt", ["x"]),
    builtin!("startsWith", ["a", "b"]),
    builtin!("strReplace", ["str", "from", "to"]),
    builtin!("stringChars", ["str"]),
    builtin!("stripChars", ["str", "chars"]),
    builtin!("substr", ["str", "from", "len"]),
    builtin!("sum", ["arr"]),
    builtin!("toString", ["a"]),
    builtin!("trace", ["str", "rest"]),
    builtin!("trim", ["str"]),
    builtin!("type", ["x"]),
    builtin!("uniq", ["arr", "keyF"], 1),
];

/// Looks a builtin up by name.
pub fn builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

type Args = Vec<Option<ThunkId>>;

impl<'vm> Evaluator<'vm> {
    // ========================================================================
    // Argument access
    // ========================================================================

    fn arg(&mut self, args: &Args, i: usize) -> EvalResult<Value> {
        match args.get(i).copied().flatten() {
            Some(thunk) => self.force(thunk),
            None => Ok(Value::Null),
        }
    }

    fn opt_arg(&mut self, args: &Args, i: usize) -> EvalResult<Option<Value>> {
        match args.get(i).copied().flatten() {
            Some(thunk) => self.force(thunk).map(Some),
            None => Ok(None),
        }
    }

    fn num_arg(&mut self, b: &Builtin, args: &Args, i: usize) -> EvalResult<f64> {
        match self.arg(args, i)? {
            Value::Number(n) => Ok(n),
            other => Err(type_error(b, i, "number", &other)),
        }
    }

    fn str_arg(&mut self, b: &Builtin, args: &Args, i: usize) -> EvalResult<Rc<str>> {
        match self.arg(args, i)? {
            Value::Str(s) => Ok(s),
            other => Err(type_error(b, i, "string", &other)),
        }
    }

    fn bool_arg(&mut self, b: &Builtin, args: &Args, i: usize) -> EvalResult<bool> {
        match self.arg(args, i)? {
            Value::Bool(v) => Ok(v),
            other => Err(type_error(b, i, "boolean", &other)),
        }
    }

    fn array_arg(&mut self, b: &Builtin, args: &Args, i: usize) -> EvalResult<Rc<Vec<ThunkId>>> {
        match self.arg(args, i)? {
            Value::Array(items) => Ok(items),
            other => Err(type_error(b, i, "array", &other)),
        }
    }

    fn object_arg(&mut self, b: &Builtin, args: &Args, i: usize) -> EvalResult<ObjId> {
        match self.arg(args, i)? {
            Value::Object(obj) => Ok(obj),
            other => Err(type_error(b, i, "object", &other)),
        }
    }

    fn function_arg(&mut self, b: &Builtin, args: &Args, i: usize) -> EvalResult<Value> {
        match self.arg(args, i)? {
            f @ Value::Function(_) => Ok(f),
            other => Err(type_error(b, i, "function", &other)),
        }
    }

    fn array_of(&mut self, values: Vec<Value>) -> Value {
        let thunks = values.into_iter().map(|v| self.ready(v)).collect();
        Value::Array(Rc::new(thunks))
    }

    fn force_all(&mut self, items: &[ThunkId]) -> EvalResult<Vec<Value>> {
        items.iter().map(|t| self.force(*t)).collect()
    }

    fn truthy(&mut self, b: &Builtin, value: Value) -> EvalResult<bool> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(runtime(format!(
                "std.{} expected the function to return boolean, got {}",
                b.name,
                other.type_name()
            ))),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    pub(crate) fn call_builtin(&mut self, b: &Builtin, args: Args) -> EvalResult<Value> {
        match b.name {
            "isString" | "isNumber" | "isBoolean" | "isObject" | "isArray" | "isFunction" => {
                let v = self.arg(&args, 0)?;
                let expected = match b.name {
                    "isString" => "string",
                    "isNumber" => "number",
                    "isBoolean" => "boolean",
                    "isObject" => "object",
                    "isArray" => "array",
                    _ => "function",
                };
                Ok(Value::Bool(v.type_name() == expected))
            }
            "type" => {
                let v = self.arg(&args, 0)?;
                Ok(Value::string(v.type_name()))
            }
            "length" => match self.arg(&args, 0)? {
                Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
                Value::Array(items) => Ok(Value::Number(items.len() as f64)),
                Value::Object(obj) => {
                    Ok(Value::Number(self.object_fields(obj, false).len() as f64))
                }
                Value::Function(f) => Ok(Value::Number(f.param_names().len() as f64)),
                other => Err(type_error(b, 0, "array, string, object or function", &other)),
            },
            "objectHas" | "objectHasAll" | "objectHasEx" => {
                let obj = self.object_arg(b, &args, 0)?;
                let name = self.str_arg(b, &args, 1)?;
                let hidden = match b.name {
                    "objectHas" => false,
                    "objectHasAll" => true,
                    _ => self.bool_arg(b, &args, 2)?,
                };
                Ok(Value::Bool(self.has_field(obj, &name, hidden)))
            }
            "objectFields" | "objectFieldsAll" | "objectFieldsEx" => {
                let obj = self.object_arg(b, &args, 0)?;
                let hidden = match b.name {
                    "objectFields" => false,
                    "objectFieldsAll" => true,
                    _ => self.bool_arg(b, &args, 1)?,
                };
                let names = self
                    .object_fields(obj, hidden)
                    .into_iter()
                    .map(Value::Str)
                    .collect();
                Ok(self.array_of(names))
            }
            "objectValues" | "objectValuesAll" => {
                let obj = self.object_arg(b, &args, 0)?;
                let mut values = Vec::new();
                for name in self.object_fields(obj, b.name == "objectValuesAll") {
                    values.push(self.object_field(obj, &name)?);
                }
                Ok(self.array_of(values))
            }
            "objectKeysValues" | "objectKeysValuesAll" => {
                let obj = self.object_arg(b, &args, 0)?;
                let mut pairs = Vec::new();
                for name in self.object_fields(obj, b.name == "objectKeysValuesAll") {
                    let value = self.object_field(obj, &name)?;
                    let pair = self.object_from_values(vec![
                        (Rc::from("key"), Value::Str(name)),
                        (Rc::from("value"), value),
                    ]);
                    pairs.push(Value::Object(pair));
                }
                Ok(self.array_of(pairs))
            }
            "get" => {
                let obj = self.object_arg(b, &args, 0)?;
                let name = self.str_arg(b, &args, 1)?;
                let default = self.arg(&args, 2)?;
                let hidden = match self.opt_arg(&args, 3)? {
                    Some(Value::Bool(v)) => v,
                    Some(other) => return Err(type_error(b, 3, "boolean", &other)),
                    None => true,
                };
                if self.has_field(obj, &name, hidden) {
                    self.object_field(obj, &name)
                } else {
                    Ok(default)
                }
            }
            "member" | "contains" => {
                let needle = self.arg(&args, 1)?;
                match self.arg(&args, 0)? {
                    Value::Str(s) => match needle {
                        Value::Str(n) => Ok(Value::Bool(s.contains(&*n))),
                        other => Err(type_error(b, 1, "string", &other)),
                    },
                    Value::Array(items) => {
                        for item in items.iter() {
                            let v = self.force(*item)?;
                            if self.equals(&v, &needle)? {
                                return Ok(Value::Bool(true));
                            }
                        }
                        Ok(Value::Bool(false))
                    }
                    other => Err(type_error(b, 0, "array or string", &other)),
                }
            }
            "count" => {
                let items = self.array_arg(b, &args, 0)?;
                let needle = self.arg(&args, 1)?;
                let mut n = 0;
                for item in items.iter() {
                    let v = self.force(*item)?;
                    if self.equals(&v, &needle)? {
                        n += 1;
                    }
                }
                Ok(Value::Number(f64::from(n)))
            }
            "map" | "mapWithIndex" => {
                let func = self.function_arg(b, &args, 0)?;
                let arr = self.arg(&args, 1)?;
                let items = match arr {
                    Value::Array(items) => self.force_all(&items)?,
                    Value::Str(s) => s.chars().map(|c| Value::string(&c.to_string())).collect(),
                    other => return Err(type_error(b, 1, "array", &other)),
                };
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let call_args = if b.name == "map" {
                        vec![item]
                    } else {
                        vec![Value::Number(i as f64), item]
                    };
                    out.push(self.call_with_values(&func, call_args)?);
                }
                Ok(self.array_of(out))
            }
            "mapWithKey" => {
                let func = self.function_arg(b, &args, 0)?;
                let obj = self.object_arg(b, &args, 1)?;
                let mut entries = Vec::new();
                for name in self.object_fields(obj, false) {
                    let value = self.object_field(obj, &name)?;
                    let mapped = self.call_with_values(&func, vec![Value::Str(name.clone()), value])?;
                    entries.push((name, mapped));
                }
                Ok(Value::Object(self.object_from_values(entries)))
            }
            "filter" => {
                let func = self.function_arg(b, &args, 0)?;
                let items = self.array_arg(b, &args, 1)?;
                let mut kept = Vec::new();
                for item in items.iter() {
                    let v = self.force(*item)?;
                    let keep = self.call_with_values(&func, vec![v])?;
                    if self.truthy(b, keep)? {
                        kept.push(*item);
                    }
                }
                Ok(Value::Array(Rc::new(kept)))
            }
            "filterMap" => {
                let filter = self.function_arg(b, &args, 0)?;
                let map = self.function_arg(b, &args, 1)?;
                let items = self.array_arg(b, &args, 2)?;
                let mut out = Vec::new();
                for item in items.iter() {
                    let v = self.force(*item)?;
                    let keep = self.call_with_values(&filter, vec![v.clone()])?;
                    if self.truthy(b, keep)? {
                        out.push(self.call_with_values(&map, vec![v])?);
                    }
                }
                Ok(self.array_of(out))
            }
            "flatMap" => {
                let func = self.function_arg(b, &args, 0)?;
                match self.arg(&args, 1)? {
                    Value::Array(items) => {
                        let mut out = Vec::new();
                        for item in items.iter() {
                            let v = self.force(*item)?;
                            match self.call_with_values(&func, vec![v])? {
                                Value::Array(inner) => out.extend(inner.iter().copied()),
                                Value::Null => {}
                                other => {
                                    return Err(runtime(format!(
                                        "std.flatMap function must return array, got {}",
                                        other.type_name()
                                    )))
                                }
                            }
                        }
                        Ok(Value::Array(Rc::new(out)))
                    }
                    Value::Str(s) => {
                        let mut out = String::new();
                        for c in s.chars() {
                            match self.call_with_values(&func, vec![Value::string(&c.to_string())])? {
                                Value::Str(piece) => out.push_str(&piece),
                                Value::Null => {}
                                other => {
                                    return Err(runtime(format!(
                                        "std.flatMap function must return string, got {}",
                                        other.type_name()
                                    )))
                                }
                            }
                        }
                        Ok(Value::string(&out))
                    }
                    other => Err(type_error(b, 1, "array or string", &other)),
                }
            }
            "foldl" | "foldr" => {
                let func = self.function_arg(b, &args, 0)?;
                let items = self.array_arg(b, &args, 1)?;
                let mut acc = self.arg(&args, 2)?;
                if b.name == "foldl" {
                    for item in items.iter() {
                        let v = self.force(*item)?;
                        acc = self.call_with_values(&func, vec![acc, v])?;
                    }
                } else {
                    for item in items.iter().rev() {
                        let v = self.force(*item)?;
                        acc = self.call_with_values(&func, vec![v, acc])?;
                    }
                }
                Ok(acc)
            }
            "range" => {
                let from = self.num_arg(b, &args, 0)? as i64;
                let to = self.num_arg(b, &args, 1)? as i64;
                let values = (from..=to).map(|n| Value::Number(n as f64)).collect();
                Ok(self.array_of(values))
            }
            "makeArray" => {
                let size = self.num_arg(b, &args, 0)?;
                let func = self.function_arg(b, &args, 1)?;
                if size < 0.0 || size.fract() != 0.0 {
                    return Err(runtime(format!("std.makeArray size must be a natural number, got {size}")));
                }
                let mut out = Vec::with_capacity(size as usize);
                for i in 0..size as usize {
                    out.push(self.call_with_values(&func, vec![Value::Number(i as f64)])?);
                }
                Ok(self.array_of(out))
            }
            "repeat" => {
                let count = self.num_arg(b, &args, 1)?;
                if count < 0.0 {
                    return Err(runtime("std.repeat count must be non-negative"));
                }
                match self.arg(&args, 0)? {
                    Value::Str(s) => Ok(Value::string(&s.repeat(count as usize))),
                    Value::Array(items) => {
                        let mut out = Vec::with_capacity(items.len() * count as usize);
                        for _ in 0..count as usize {
                            out.extend(items.iter().copied());
                        }
                        Ok(Value::Array(Rc::new(out)))
                    }
                    other => Err(type_error(b, 0, "string or array", &other)),
                }
            }
            "join" => {
                let items = self.array_arg(b, &args, 1)?;
                match self.arg(&args, 0)? {
                    Value::Str(sep) => {
                        let mut parts = Vec::new();
                        for item in items.iter() {
                            match self.force(*item)? {
                                Value::Str(s) => parts.push(s.to_string()),
                                Value::Null => {}
                                other => {
                                    return Err(runtime(format!(
                                        "std.join expected string but array element was {}",
                                        other.type_name()
                                    )))
                                }
                            }
                        }
                        Ok(Value::string(&parts.join(&sep)))
                    }
                    Value::Array(sep) => {
                        let mut out: Vec<ThunkId> = Vec::new();
                        let mut first = true;
                        for item in items.iter() {
                            match self.force(*item)? {
                                Value::Array(inner) => {
                                    if !first {
                                        out.extend(sep.iter().copied());
                                    }
                                    first = false;
                                    out.extend(inner.iter().copied());
                                }
                                Value::Null => {}
                                other => {
                                    return Err(runtime(format!(
                                        "std.join expected array but array element was {}",
                                        other.type_name()
                                    )))
                                }
                            }
                        }
                        Ok(Value::Array(Rc::new(out)))
                    }
                    other => Err(type_error(b, 0, "string or array", &other)),
                }
            }
            "lines" => {
                let items = self.array_arg(b, &args, 0)?;
                let mut out = String::new();
                for item in items.iter() {
                    match self.force(*item)? {
                        Value::Str(s) => {
                            out.push_str(&s);
                            out.push('\n');
                        }
                        Value::Null => {}
                        other => return Err(type_error(b, 0, "array of strings", &other)),
                    }
                }
                Ok(Value::string(&out))
            }
            "split" | "splitLimit" => {
                let s = self.str_arg(b, &args, 0)?;
                let sep = self.str_arg(b, &args, 1)?;
                if sep.is_empty() {
                    return Err(runtime(format!("std.{} separator cannot be empty", b.name)));
                }
                let limit = if b.name == "splitLimit" {
                    self.num_arg(b, &args, 2)?
                } else {
                    -1.0
                };
                let parts: Vec<Value> = if limit < 0.0 {
                    s.split(&*sep).map(Value::string).collect()
                } else {
                    s.splitn(limit as usize + 1, &*sep).map(Value::string).collect()
                };
                Ok(self.array_of(parts))
            }
            "strReplace" => {
                let s = self.str_arg(b, &args, 0)?;
                let from = self.str_arg(b, &args, 1)?;
                let to = self.str_arg(b, &args, 2)?;
                if from.is_empty() {
                    return Err(runtime("std.strReplace 'from' string must not be empty"));
                }
                Ok(Value::string(&s.replace(&*from, &to)))
            }
            "startsWith" => {
                let a = self.str_arg(b, &args, 0)?;
                let prefix = self.str_arg(b, &args, 1)?;
                Ok(Value::Bool(a.starts_with(&*prefix)))
            }
            "endsWith" => {
                let a = self.str_arg(b, &args, 0)?;
                let suffix = self.str_arg(b, &args, 1)?;
                Ok(Value::Bool(a.ends_with(&*suffix)))
            }
            "substr" => {
                let s = self.str_arg(b, &args, 0)?;
                let from = self.num_arg(b, &args, 1)?.max(0.0) as usize;
                let len = self.num_arg(b, &args, 2)?.max(0.0) as usize;
                Ok(Value::string(&s.chars().skip(from).take(len).collect::<String>()))
            }
            "stringChars" => {
                let s = self.str_arg(b, &args, 0)?;
                let chars = s.chars().map(|c| Value::string(&c.to_string())).collect();
                Ok(self.array_of(chars))
            }
            "asciiUpper" => {
                let s = self.str_arg(b, &args, 0)?;
                Ok(Value::string(&s.to_ascii_uppercase()))
            }
            "asciiLower" => {
                let s = self.str_arg(b, &args, 0)?;
                Ok(Value::string(&s.to_ascii_lowercase()))
            }
            "trim" => {
                let s = self.str_arg(b, &args, 0)?;
                Ok(Value::string(s.trim()))
            }
            "isEmpty" => {
                let s = self.str_arg(b, &args, 0)?;
                Ok(Value::Bool(s.is_empty()))
            }
            "lstripChars" | "rstripChars" | "stripChars" => {
                let s = self.str_arg(b, &args, 0)?;
                let chars = self.str_arg(b, &args, 1)?;
                let strip = |c: char| chars.contains(c);
                let out = match b.name {
                    "lstripChars" => s.trim_start_matches(strip),
                    "rstripChars" => s.trim_end_matches(strip),
                    _ => s.trim_matches(strip),
                };
                Ok(Value::string(out))
            }
            "char" => {
                let n = self.num_arg(b, &args, 0)?;
                match char::from_u32(n as u32) {
                    Some(c) if n >= 0.0 => Ok(Value::string(&c.to_string())),
                    _ => Err(runtime(format!("invalid unicode codepoint, got {n}"))),
                }
            }
            "codepoint" => {
                let s = self.str_arg(b, &args, 0)?;
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Number(f64::from(c as u32))),
                    _ => Err(runtime("std.codepoint expected a string of length 1")),
                }
            }
            "toString" => {
                let v = self.arg(&args, 0)?;
                let s = self.to_display_string(&v)?;
                Ok(Value::string(&s))
            }
            "format" => {
                let format = self.str_arg(b, &args, 0)?;
                let vals = self.arg(&args, 1)?;
                let s = self.format(&format, vals)?;
                Ok(Value::string(&s))
            }
            "escapeStringJson" => {
                let s = self.str_arg(b, &args, 0)?;
                Ok(Value::string(&quote(&s)))
            }
            "parseInt" => {
                let s = self.str_arg(b, &args, 0)?;
                s.parse::<i64>()
                    .map(|n| Value::Number(n as f64))
                    .map_err(|_| runtime(format!("{} is not a base 10 integer", quote(&s))))
            }
            "parseJson" => {
                let s = self.str_arg(b, &args, 0)?;
                let json: serde_json::Value = serde_json::from_str(&s)
                    .map_err(|e| runtime(format!("failed to parse JSON: {e}")))?;
                Ok(self.from_json(&json))
            }
            "manifestJson" | "manifestJsonEx" => {
                let v = self.arg(&args, 0)?;
                let indent = if b.name == "manifestJson" {
                    Rc::from("    ")
                } else {
                    self.str_arg(b, &args, 1)?
                };
                let newline = match self.opt_arg(&args, 2)? {
                    Some(Value::Str(s)) => s.to_string(),
                    Some(other) => return Err(type_error(b, 2, "string", &other)),
                    None => "\n".to_string(),
                };
                let key_sep = match self.opt_arg(&args, 3)? {
                    Some(Value::Str(s)) => s.to_string(),
                    Some(other) => return Err(type_error(b, 3, "string", &other)),
                    None => ": ".to_string(),
                };
                let json = self.manifest(&v)?;
                Ok(Value::string(&to_pretty(&json, &indent, &newline, &key_sep)))
            }
            "mod" => {
                let a = self.arg(&args, 0)?;
                let c = self.arg(&args, 1)?;
                self.binary_values(crate::ast::BinaryOp::Percent, a, c)
            }
            "modulo" => {
                let x = self.num_arg(b, &args, 0)?;
                let y = self.num_arg(b, &args, 1)?;
                if y == 0.0 {
                    return Err(runtime("division by zero"));
                }
                Ok(Value::Number(x % y))
            }
            "equals" => {
                let x = self.arg(&args, 0)?;
                let y = self.arg(&args, 1)?;
                self.equals(&x, &y).map(Value::Bool)
            }
            "primitiveEquals" => {
                let x = self.arg(&args, 0)?;
                let y = self.arg(&args, 1)?;
                match (&x, &y) {
                    (Value::Array(_), _) | (Value::Object(_), _) | (Value::Function(_), _) => {
                        Err(runtime(format!(
                            "primitiveEquals operates on primitive types, got {}",
                            x.type_name()
                        )))
                    }
                    _ => self.equals(&x, &y).map(Value::Bool),
                }
            }
            "abs" | "ceil" | "floor" | "round" | "sqrt" | "exp" | "log" | "sign" => {
                let n = self.num_arg(b, &args, 0)?;
                let out = match b.name {
                    "abs" => n.abs(),
                    "ceil" => n.ceil(),
                    "floor" => n.floor(),
                    "round" => n.round(),
                    "sqrt" => n.sqrt(),
                    "exp" => n.exp(),
                    "log" => n.ln(),
                    _ => {
                        if n > 0.0 {
                            1.0
                        } else if n < 0.0 {
                            -1.0
                        } else {
                            0.0
                        }
                    }
                };
                Ok(Value::Number(out))
            }
            "pow" => {
                let x = self.num_arg(b, &args, 0)?;
                let n = self.num_arg(b, &args, 1)?;
                Ok(Value::Number(x.powf(n)))
            }
            "max" | "min" => {
                let x = self.num_arg(b, &args, 0)?;
                let y = self.num_arg(b, &args, 1)?;
                Ok(Value::Number(if b.name == "max" { x.max(y) } else { x.min(y) }))
            }
            "sum" => {
                let items = self.array_arg(b, &args, 0)?;
                let mut total = 0.0;
                for item in items.iter() {
                    match self.force(*item)? {
                        Value::Number(n) => total += n,
                        other => return Err(type_error(b, 0, "array of numbers", &other)),
                    }
                }
                Ok(Value::Number(total))
            }
            "any" | "all" => {
                let items = self.array_arg(b, &args, 0)?;
                let want = b.name == "any";
                for item in items.iter() {
                    let v = self.force(*item)?;
                    if self.truthy(b, v)? == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            "reverse" => {
                let items = self.array_arg(b, &args, 0)?;
                Ok(Value::Array(Rc::new(items.iter().rev().copied().collect())))
            }
            "flattenArrays" => {
                let items = self.array_arg(b, &args, 0)?;
                let mut out = Vec::new();
                for item in items.iter() {
                    match self.force(*item)? {
                        Value::Array(inner) => out.extend(inner.iter().copied()),
                        Value::Null => {}
                        other => return Err(type_error(b, 0, "array of arrays", &other)),
                    }
                }
                Ok(Value::Array(Rc::new(out)))
            }
            "slice" => self.slice(b, &args),
            "sort" | "uniq" | "set" => {
                let items = self.array_arg(b, &args, 0)?;
                let key_f = self.opt_arg(&args, 1)?;
                let keyed = self.keyed(&items, key_f.as_ref())?;
                let keyed = match b.name {
                    "sort" => sort_keyed(keyed)?,
                    "uniq" => dedup_keyed(keyed),
                    _ => dedup_keyed(sort_keyed(keyed)?),
                };
                Ok(Value::Array(Rc::new(keyed.into_iter().map(|(_, t)| t).collect())))
            }
            "setMember" => {
                let x = self.arg(&args, 0)?;
                let items = self.array_arg(b, &args, 1)?;
                let key_f = self.opt_arg(&args, 2)?;
                let key = match &key_f {
                    Some(f) => self.call_with_values(f, vec![x])?,
                    None => x,
                };
                let keyed = self.keyed(&items, key_f.as_ref())?;
                for (k, _) in &keyed {
                    if compare_keys(k, &key)? == Ordering::Equal {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "setUnion" | "setInter" | "setDiff" => {
                let a = self.array_arg(b, &args, 0)?;
                let c = self.array_arg(b, &args, 1)?;
                let key_f = self.opt_arg(&args, 2)?;
                let left = self.keyed(&a, key_f.as_ref())?;
                let right = self.keyed(&c, key_f.as_ref())?;
                let contains = |set: &[(Value, ThunkId)], key: &Value| -> EvalResult<bool> {
                    for (k, _) in set {
                        if compare_keys(k, key)? == Ordering::Equal {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                };
                let mut out = Vec::new();
                match b.name {
                    "setUnion" => {
                        out.extend(left.iter().cloned());
                        for entry in &right {
                            if !contains(&left, &entry.0)? {
                                out.push(entry.clone());
                            }
                        }
                    }
                    "setInter" => {
                        for entry in &left {
                            if contains(&right, &entry.0)? {
                                out.push(entry.clone());
                            }
                        }
                    }
                    _ => {
                        for entry in &left {
                            if !contains(&right, &entry.0)? {
                                out.push(entry.clone());
                            }
                        }
                    }
                }
                let out = dedup_keyed(sort_keyed(out)?);
                Ok(Value::Array(Rc::new(out.into_iter().map(|(_, t)| t).collect())))
            }
            "mergePatch" => {
                let target = self.arg(&args, 0)?;
                let patch = self.arg(&args, 1)?;
                self.merge_patch(target, patch)
            }
            "extVar" => {
                let name = self.str_arg(b, &args, 0)?;
                self.ext_var(&name)
            }
            "trace" => {
                let message = self.str_arg(b, &args, 0)?;
                log::info!("TRACE: {}", message);
                self.arg(&args, 1)
            }
            "assertEqual" => {
                let x = self.arg(&args, 0)?;
                let y = self.arg(&args, 1)?;
                if self.equals(&x, &y)? {
                    return Ok(Value::Bool(true));
                }
                let left = self.to_display_string(&x)?;
                let right = self.to_display_string(&y)?;
                Err(runtime(format!("Assertion failed. {left} != {right}")))
            }
            "native" => {
                let name = self.str_arg(b, &args, 0)?;
                Err(runtime(format!("native function {name} is not available")))
            }
            other => Err(runtime(format!("std.{other} is not implemented"))),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn keyed(&mut self, items: &[ThunkId], key_f: Option<&Value>) -> EvalResult<Vec<(Value, ThunkId)>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let v = self.force(*item)?;
            let key = match key_f {
                Some(f @ Value::Function(_)) => self.call_with_values(f, vec![v])?,
                _ => v,
            };
            out.push((key, *item));
        }
        Ok(out)
    }

    fn slice(&mut self, b: &Builtin, args: &Args) -> EvalResult<Value> {
        let target = self.arg(args, 0)?;
        let len = match &target {
            Value::Array(items) => items.len(),
            Value::Str(s) => s.chars().count(),
            other => return Err(type_error(b, 0, "array or string", other)),
        } as i64;
        let mut bound = |i: usize, default: i64| -> EvalResult<i64> {
            match self.arg(args, i)? {
                Value::Null => Ok(default),
                Value::Number(n) => Ok(n as i64),
                other => Err(type_error(b, i, "number", &other)),
            }
        };
        let start = bound(1, 0)?;
        let end = bound(2, len)?;
        let step = bound(3, 1)?;
        if start < 0 || end < 0 || step <= 0 {
            return Err(runtime(format!(
                "std.slice got invalid parameters start={start} end={end} step={step}"
            )));
        }
        let end = end.min(len);
        let picked = (start..end).step_by(step as usize).map(|i| i as usize);
        match target {
            Value::Array(items) => Ok(Value::Array(Rc::new(picked.map(|i| items[i]).collect()))),
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(Value::string(&picked.map(|i| chars[i]).collect::<String>()))
            }
            _ => Ok(Value::Null),
        }
    }

    fn merge_patch(&mut self, target: Value, patch: Value) -> EvalResult<Value> {
        let Value::Object(patch_obj) = patch else {
            return Ok(patch);
        };
        let target_obj = match target {
            Value::Object(obj) => Some(obj),
            _ => None,
        };
        let mut entries: Vec<(Rc<str>, Value)> = Vec::new();
        let patch_fields = self.object_fields(patch_obj, false);
        if let Some(obj) = target_obj {
            for name in self.object_fields(obj, false) {
                if !patch_fields.contains(&name) {
                    let value = self.object_field(obj, &name)?;
                    entries.push((name, value));
                }
            }
        }
        for name in patch_fields {
            let value = self.object_field(patch_obj, &name)?;
            if matches!(value, Value::Null) {
                continue;
            }
            let base = match target_obj {
                Some(obj) if self.has_field(obj, &name, false) => self.object_field(obj, &name)?,
                _ => Value::Null,
            };
            entries.push((name, self.merge_patch(base, value)?));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Value::Object(self.object_from_values(entries)))
    }

    // ========================================================================
    // Format
    // ========================================================================

    /// Python-style `%` formatting used by `std.format` and the `%` operator.
    pub(crate) fn format(&mut self, format: &str, vals: Value) -> EvalResult<String> {
        let (positional, named) = match vals {
            Value::Array(items) => (self.force_all(&items)?, None),
            Value::Object(obj) => (Vec::new(), Some(obj)),
            other => (vec![other], None),
        };
        let mut next = 0usize;
        let mut out = String::new();
        let chars: Vec<char> = format.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            i += 1;
            if c != '%' {
                out.push(c);
                continue;
            }
            let mut key = None;
            if chars.get(i) == Some(&'(') {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ')')
                    .ok_or_else(|| runtime("truncated format code"))?;
                key = Some(chars[i + 1..i + close].iter().collect::<String>());
                i += close + 1;
            }
            let mut spec = FormatSpec::default();
            while let Some(flag) = chars.get(i) {
                match flag {
                    '-' => spec.left = true,
                    '0' => spec.zero = true,
                    '+' => spec.plus = true,
                    ' ' => spec.blank = true,
                    '#' => spec.alt = true,
                    _ => break,
                }
                i += 1;
            }
            if chars.get(i) == Some(&'*') {
                i += 1;
                spec.width = Some(self.next_format_number(&positional, &mut next)?);
            } else {
                spec.width = read_digits(&chars, &mut i);
            }
            if chars.get(i) == Some(&'.') {
                i += 1;
                if chars.get(i) == Some(&'*') {
                    i += 1;
                    spec.precision = Some(self.next_format_number(&positional, &mut next)?);
                } else {
                    spec.precision = Some(read_digits(&chars, &mut i).unwrap_or(0));
                }
            }
            while matches!(chars.get(i), Some('h' | 'l' | 'L')) {
                i += 1;
            }
            let conversion = *chars.get(i).ok_or_else(|| runtime("truncated format code"))?;
            i += 1;
            if conversion == '%' {
                out.push('%');
                continue;
            }
            let value = match (&key, named) {
                (Some(key), Some(obj)) => self.object_field(obj, key)?,
                (Some(_), None) => return Err(runtime("format codes with names require an object")),
                (None, Some(_)) => return Err(runtime("format codes without names require an array")),
                (None, None) => {
                    let v = positional
                        .get(next)
                        .cloned()
                        .ok_or_else(|| runtime("not enough values to format"))?;
                    next += 1;
                    v
                }
            };
            let text = self.format_one(&spec, conversion, value)?;
            out.push_str(&spec.pad(text, conversion));
        }
        if named.is_none() && next < positional.len() {
            return Err(runtime(format!(
                "too many values to format: {}, expected {}",
                positional.len(),
                next
            )));
        }
        Ok(out)
    }

    fn next_format_number(&mut self, positional: &[Value], next: &mut usize) -> EvalResult<usize> {
        let v = positional
            .get(*next)
            .ok_or_else(|| runtime("not enough values to format"))?;
        *next += 1;
        match v {
            Value::Number(n) => Ok(*n as usize),
            other => Err(runtime(format!("* expects a number, got {}", other.type_name()))),
        }
    }

    fn format_one(&mut self, spec: &FormatSpec, conversion: char, value: Value) -> EvalResult<String> {
        let number = |v: &Value| match v {
            Value::Number(n) => Ok(*n),
            other => Err(runtime(format!(
                "format %{conversion} expects a number, got {}",
                other.type_name()
            ))),
        };
        let text = match conversion {
            's' => self.to_display_string(&value)?,
            'd' | 'i' | 'u' => spec.sign(number(&value)?, |n| format!("{}", n.abs().trunc() as i64)),
            'o' => spec.sign(number(&value)?, |n| {
                let body = format!("{:o}", n.abs().trunc() as i64);
                if spec.alt { format!("0{body}") } else { body }
            }),
            'x' | 'X' => spec.sign(number(&value)?, |n| {
                let body = format!("{:x}", n.abs().trunc() as i64);
                let body = if spec.alt { format!("0x{body}") } else { body };
                if conversion == 'X' { body.to_uppercase() } else { body }
            }),
            'f' | 'F' => {
                let p = spec.precision.unwrap_or(6);
                spec.sign(number(&value)?, |n| format!("{:.*}", p, n.abs()))
            }
            'e' | 'E' => {
                let p = spec.precision.unwrap_or(6);
                spec.sign(number(&value)?, |n| {
                    let body = exponent(n.abs(), p);
                    if conversion == 'E' { body.to_uppercase() } else { body }
                })
            }
            'g' | 'G' => {
                let p = spec.precision.unwrap_or(6).max(1);
                spec.sign(number(&value)?, |n| {
                    let body = general(n.abs(), p, spec.alt);
                    if conversion == 'G' { body.to_uppercase() } else { body }
                })
            }
            'c' => match value {
                Value::Number(n) => char::from_u32(n as u32)
                    .map(|c| c.to_string())
                    .ok_or_else(|| runtime(format!("invalid codepoint {n}")))?,
                Value::Str(s) if s.chars().count() == 1 => s.to_string(),
                other => {
                    return Err(runtime(format!(
                        "%c expected number or single-character string, got {}",
                        other.type_name()
                    )))
                }
            },
            other => return Err(runtime(format!("unrecognised conversion type: {other}"))),
        };
        Ok(text)
    }
}

#[derive(Default)]
struct FormatSpec {
    left: bool,
    zero: bool,
    plus: bool,
    blank: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl FormatSpec {
    fn sign(&self, n: f64, body: impl FnOnce(f64) -> String) -> String {
        let prefix = if n < 0.0 {
            "-"
        } else if self.plus {
            "+"
        } else if self.blank {
            " "
        } else {
            ""
        };
        format!("{prefix}{}", body(n))
    }

    fn pad(&self, text: String, conversion: char) -> String {
        let width = self.width.unwrap_or(0);
        let len = text.chars().count();
        if len >= width {
            return text;
        }
        let fill = width - len;
        if self.left {
            return format!("{text}{}", " ".repeat(fill));
        }
        if self.zero && conversion != 's' && conversion != 'c' {
            let (sign, digits) = match text.chars().next() {
                Some(c @ ('-' | '+' | ' ')) => (c.to_string(), text[1..].to_string()),
                _ => (String::new(), text),
            };
            return format!("{sign}{}{digits}", "0".repeat(fill));
        }
        format!("{}{text}", " ".repeat(fill))
    }
}

fn read_digits(chars: &[char], i: &mut usize) -> Option<usize> {
    let start = *i;
    while chars.get(*i).is_some_and(|c| c.is_ascii_digit()) {
        *i += 1;
    }
    if *i == start {
        return None;
    }
    chars[start..*i].iter().collect::<String>().parse().ok()
}

/// `1.500000e+02` style.
fn exponent(n: f64, precision: usize) -> String {
    let formatted = format!("{:.*e}", precision, n);
    match formatted.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => formatted,
    }
}

fn general(n: f64, precision: usize, alt: bool) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    let exp = n.log10().floor() as i32;
    let text = if exp < -4 || exp >= precision as i32 {
        exponent(n, precision - 1)
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        format!("{:.*}", decimals, n)
    };
    if alt {
        return text;
    }
    match text.split_once('e') {
        Some((mantissa, exp)) => format!("{}e{exp}", trim_fraction(mantissa)),
        None => trim_fraction(&text),
    }
}

fn trim_fraction(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn type_error(b: &Builtin, i: usize, expected: &str, got: &Value) -> crate::error::EvalError {
    let param = b.params.get(i).copied().unwrap_or("?");
    runtime(format!(
        "std.{} param {} should be {}, got {}",
        b.name,
        param,
        expected,
        got.type_name()
    ))
}

fn compare_keys(a: &Value, b: &Value) -> EvalResult<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.partial_cmp(y).ok_or_else(|| runtime("cannot compare NaN"))
        }
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        (Value::Null, Value::Null) => Ok(Ordering::Equal),
        _ => Err(runtime(format!(
            "cannot compare {} with {} when sorting",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn sort_keyed(mut keyed: Vec<(Value, ThunkId)>) -> EvalResult<Vec<(Value, ThunkId)>> {
    let mut failure = None;
    keyed.sort_by(|a, b| match compare_keys(&a.0, &b.0) {
        Ok(ordering) => ordering,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed),
    }
}

/// Drops consecutive entries whose keys compare equal.
fn dedup_keyed(keyed: Vec<(Value, ThunkId)>) -> Vec<(Value, ThunkId)> {
    let mut out: Vec<(Value, ThunkId)> = Vec::with_capacity(keyed.len());
    for entry in keyed {
        let duplicate = out
            .last()
            .is_some_and(|last| matches!(compare_keys(&last.0, &entry.0), Ok(Ordering::Equal)));
        if !duplicate {
            out.push(entry);
        }
    }
    out
}

/// Builtin behind a `std` function value, if it is one.
pub fn as_builtin(value: &Value) -> Option<&'static Builtin> {
    match value {
        Value::Function(f) => match &**f {
            FunctionValue::Builtin(b) => Some(b),
            FunctionValue::Closure { .. } => None,
        },
        _ => None,
    }
}
