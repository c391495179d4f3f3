//
// vm.rs
//
// Evaluator configuration: search path, importer, external variables
//

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;

use crate::ast::NodeRef;
use crate::error::{EvalError, EvalResult};
use crate::eval::Evaluator;
use crate::importer::{FileImporter, ImportError, Importer};
use crate::manifest::to_pretty;
use crate::parser;

/// Stack size of the thread evaluation runs on. Deep but legal programs
/// recurse far beyond the default thread stack before hitting the frame limit.
const EVAL_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtVar {
    /// `--ext-str`: bound as a string.
    Str(String),
    /// `--ext-code`: parsed and evaluated as Jsonnet.
    Code(String),
}

pub struct Vm {
    importer: Arc<dyn Importer>,
    jpaths: Vec<PathBuf>,
    ext_vars: BTreeMap<String, ExtVar>,
    ast_cache: Mutex<HashMap<PathBuf, NodeRef>>,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("jpaths", &self.jpaths)
            .field("ext_vars", &self.ext_vars)
            .finish()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Vm {
    pub fn new(jpaths: Vec<PathBuf>) -> Self {
        let importer = Arc::new(FileImporter::new(jpaths.clone()));
        Self::with_importer(importer, jpaths)
    }

    pub fn with_importer(importer: Arc<dyn Importer>, jpaths: Vec<PathBuf>) -> Self {
        Self {
            importer,
            jpaths,
            ext_vars: BTreeMap::new(),
            ast_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn jpaths(&self) -> &[PathBuf] {
        &self.jpaths
    }

    pub fn set_ext_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.ext_vars.insert(name.into(), ExtVar::Str(value.into()));
    }

    pub fn set_ext_code(&mut self, name: impl Into<String>, code: impl Into<String>) {
        self.ext_vars.insert(name.into(), ExtVar::Code(code.into()));
    }

    pub fn clear_ext_vars(&mut self) {
        self.ext_vars.clear();
    }

    pub fn ext_var(&self, name: &str) -> Option<&ExtVar> {
        self.ext_vars.get(name)
    }

    pub fn ext_vars(&self) -> &BTreeMap<String, ExtVar> {
        &self.ext_vars
    }

    // ========================================================================
    // Imports
    // ========================================================================

    pub fn resolve_import(&self, importer_file: &str, path: &str) -> Result<PathBuf, ImportError> {
        self.importer.import(importer_file, path).map(|i| i.path)
    }

    pub(crate) fn import_contents(
        &self,
        importer_file: &str,
        path: &str,
    ) -> EvalResult<(PathBuf, Arc<[u8]>)> {
        let imported = self
            .importer
            .import(importer_file, path)
            .map_err(|e| EvalError::runtime(e.to_string(), None))?;
        Ok((imported.path, imported.contents))
    }

    /// Parsed AST of an imported file, cached per resolved path.
    pub fn import_ast(&self, importer_file: &str, path: &str) -> EvalResult<(NodeRef, PathBuf)> {
        let (resolved, contents) = self.import_contents(importer_file, path)?;
        if let Some(node) = self
            .ast_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&resolved).cloned())
        {
            return Ok((node, resolved));
        }
        let text = String::from_utf8_lossy(&contents);
        let node = parser::parse(&resolved.to_string_lossy(), &text)?;
        if let Ok(mut cache) = self.ast_cache.lock() {
            cache.insert(resolved.clone(), node.clone());
        }
        Ok((node, resolved))
    }

    /// Drops cached import contents and ASTs for `path`.
    pub fn forget(&self, path: &Path) {
        if let Ok(mut cache) = self.ast_cache.lock() {
            cache.remove(path);
        }
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluates `node` as a whole program and returns its JSON value.
    pub fn evaluate_value(&self, node: &NodeRef) -> EvalResult<JsonValue> {
        let run = || {
            let mut evaluator = Evaluator::new(self);
            let value = evaluator.eval_root(node)?;
            evaluator.manifest(&value)
        };
        std::thread::scope(|scope| {
            let handle = std::thread::Builder::new()
                .name("jsonnet-eval".to_string())
                .stack_size(EVAL_STACK_SIZE)
                .spawn_scoped(scope, move || std::panic::catch_unwind(AssertUnwindSafe(run)));
            match handle {
                Ok(handle) => match handle.join() {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) | Err(_) => Err(EvalError::runtime("evaluation panicked", None)),
                },
                Err(e) => Err(EvalError::runtime(
                    format!("couldn't start evaluation thread: {e}"),
                    None,
                )),
            }
        })
    }

    /// Evaluates `node` and manifests the result as JSON text.
    pub fn evaluate_node(&self, node: &NodeRef) -> EvalResult<String> {
        let value = self.evaluate_value(node)?;
        Ok(to_pretty(&value, "   ", "\n", ": "))
    }

    pub fn evaluate_snippet(&self, filename: &str, text: &str) -> EvalResult<String> {
        let node = parser::parse(filename, text)?;
        self.evaluate_node(&node)
    }

    pub fn evaluate_file(&self, path: &Path) -> EvalResult<String> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EvalError::runtime(format!("couldn't read {}: {e}", path.display()), None)
        })?;
        self.evaluate_snippet(&path.to_string_lossy(), &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::MemoryImporter;
    use serde_json::json;

    fn eval(text: &str) -> EvalResult<JsonValue> {
        let vm = Vm::default();
        let node = parser::parse("test.jsonnet", text)?;
        vm.evaluate_value(&node)
    }

    fn eval_ok(text: &str) -> JsonValue {
        match eval(text) {
            Ok(v) => v,
            Err(e) => panic!("evaluating {text:?} failed: {e}"),
        }
    }

    #[test]
    fn test_literals_and_arithmetic() {
        assert_eq!(eval_ok("1 + 2 * 3"), json!(7));
        assert_eq!(eval_ok("'a' + 1"), json!("a1"));
        assert_eq!(eval_ok("7 % 4"), json!(3));
        assert_eq!(eval_ok("[1] + [2]"), json!([1, 2]));
        assert_eq!(eval_ok("1 << 3 | 1"), json!(9));
        assert_eq!(eval_ok("!true || 2 > 1"), json!(true));
    }

    #[test]
    fn test_objects_self_super_dollar() {
        let value = eval_ok(
            "local base = { a: 1, b: self.a + 1, h:: 'hidden' };
             base + { a: 10, c: super.b, d: $.a }",
        );
        assert_eq!(value, json!({"a": 10, "b": 11, "c": 11, "d": 10}));
    }

    #[test]
    fn test_plus_super_field() {
        assert_eq!(
            eval_ok("{ a: [1] } + { a+: [2] }"),
            json!({"a": [1, 2]}),
            "+: should append to the inherited field"
        );
        assert_eq!(eval_ok("{} + { a+: 1 }"), json!({"a": 1}));
    }

    #[test]
    fn test_hidden_and_forced_visible() {
        assert_eq!(eval_ok("{ a:: 1 } + { a: 2 }"), json!({}));
        assert_eq!(eval_ok("{ a:: 1 } + { a::: 2 }"), json!({"a": 2}));
    }

    #[test]
    fn test_object_locals_and_asserts() {
        assert_eq!(eval_ok("{ local x = 2, a: x * x }"), json!({"a": 4}));
        let err = eval("{ assert self.a > 1 : 'too small', a: 1 }").unwrap_err();
        assert!(err.message().contains("too small"), "got {err}");
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(eval_ok("[x * 2 for x in [1, 2, 3] if x != 2]"), json!([2, 6]));
        assert_eq!(
            eval_ok("{ [k]: k + '!' for k in ['a', 'b'] }"),
            json!({"a": "a!", "b": "b!"})
        );
    }

    #[test]
    fn test_functions_defaults_and_named_args() {
        assert_eq!(eval_ok("local f(a, b=a + 1) = [a, b]; f(1)"), json!([1, 2]));
        assert_eq!(eval_ok("local f(a, b) = a - b; f(b=1, a=3)"), json!(2));
        assert!(eval("local f(a) = a; f()").is_err());
        assert!(eval("local f(a) = a; f(1, 2)").is_err());
    }

    #[test]
    fn test_laziness() {
        assert_eq!(eval_ok("local x = error 'boom'; 1"), json!(1));
        assert_eq!(eval_ok("[error 'no', 2][1]"), json!(2));
    }

    #[test]
    fn test_error_and_conditional() {
        let err = eval("if 1 > 2 then 1 else error 'nope'").unwrap_err();
        assert_eq!(err.message(), "nope");
        assert_eq!(eval_ok("if false then 1"), json!(null));
    }

    #[test]
    fn test_stack_overflow_is_reported() {
        let err = eval("local f(x) = f(x + 1) + 1; f(0)").unwrap_err();
        assert!(
            matches!(err, EvalError::StackOverflow { .. }),
            "expected stack overflow, got {err}"
        );
        assert_eq!(err.message(), "max stack frames exceeded");
    }

    #[test]
    fn test_infinite_recursion_in_field() {
        assert!(eval("local o = { a: o.a }; o.a").is_err());
    }

    #[test]
    fn test_unknown_variable() {
        let err = eval("x").unwrap_err();
        assert!(err.message().contains("unknown variable"), "got {err}");
    }

    #[test]
    fn test_stdlib_subset() {
        assert_eq!(eval_ok("std.length([1, 2, 3])"), json!(3));
        assert_eq!(eval_ok("std.map(function(x) x + 1, [1, 2])"), json!([2, 3]));
        assert_eq!(eval_ok("std.join(',', ['a', 'b'])"), json!("a,b"));
        assert_eq!(eval_ok("std.objectFields({ b: 1, a: 2, c:: 3 })"), json!(["a", "b"]));
        assert_eq!(eval_ok("std.sort([3, 1, 2])"), json!([1, 2, 3]));
        assert_eq!(eval_ok("std.uniq([1, 1, 2])"), json!([1, 2]));
        assert_eq!(eval_ok("std.format('%s-%03d', ['x', 7])"), json!("x-007"));
        assert_eq!(eval_ok("'%(a)s!' % { a: 'hi' }"), json!("hi!"));
        assert_eq!(eval_ok("std.foldl(function(a, b) a + b, [1, 2, 3], 0)"), json!(6));
        assert_eq!(eval_ok("std.get({ a: 1 }, 'b', 5)"), json!(5));
        assert_eq!(eval_ok("'abcdef'[1:4]"), json!("bcd"));
        assert_eq!(eval_ok("std.parseJson('{\"a\": [1]}')"), json!({"a": [1]}));
        assert_eq!(
            eval_ok("std.mergePatch({ a: 1, b: { c: 2 } }, { a: null, b: { d: 3 } })"),
            json!({"b": {"c": 2, "d": 3}})
        );
        assert_eq!(eval_ok("std.toString({ a: [1, 2] })"), json!("{\"a\": [1, 2]}"));
        assert_eq!(eval_ok("std.thisFile"), json!("test.jsonnet"));
    }

    #[test]
    fn test_equality() {
        assert_eq!(eval_ok("{ a: [1, { b: 2 }] } == { a: [1, { b: 2 }] }"), json!(true));
        assert_eq!(eval_ok("[1, 2] != [1]"), json!(true));
        assert!(eval("(function() 1) == (function() 1)").is_err());
    }

    #[test]
    fn test_in_operator_and_in_super() {
        assert_eq!(eval_ok("'a' in { a:: 1 }"), json!(true));
        assert_eq!(eval_ok("{ a: 1 } + { b: 'a' in super }"), json!({"a": 1, "b": true}));
    }

    #[test]
    fn test_imports_through_importer() {
        let mut importer = MemoryImporter::new(vec![PathBuf::from("/lib")]);
        importer.add("/lib/k.libsonnet", "{ name: 'k', file: std.thisFile }");
        importer.add("/src/data.txt", "raw");
        let vm = Vm::with_importer(Arc::new(importer), vec![PathBuf::from("/lib")]);
        let node = parser::parse(
            "/src/main.jsonnet",
            "{ k: import 'k.libsonnet', s: importstr 'data.txt' }",
        )
        .unwrap();
        assert_eq!(
            vm.evaluate_value(&node).unwrap(),
            json!({"k": {"name": "k", "file": "/lib/k.libsonnet"}, "s": "raw"})
        );
    }

    #[test]
    fn test_ext_vars() {
        let mut vm = Vm::default();
        vm.set_ext_var("env", "prod");
        vm.set_ext_code("replicas", "1 + 2");
        let out = vm
            .evaluate_snippet("t.jsonnet", "[std.extVar('env'), std.extVar('replicas')]")
            .unwrap();
        assert_eq!(out, "[\n   \"prod\",\n   3\n]");
        assert!(vm.evaluate_snippet("t.jsonnet", "std.extVar('missing')").is_err());
    }

    #[test]
    fn test_evaluate_node_pretty_output() {
        let vm = Vm::default();
        assert_eq!(vm.evaluate_snippet("t.jsonnet", "{}").unwrap(), "{ }");
        assert_eq!(
            vm.evaluate_snippet("t.jsonnet", "{ b: 1, a: 'x' }").unwrap(),
            "{\n   \"a\": \"x\",\n   \"b\": 1\n}"
        );
    }

    #[test]
    fn test_runtime_error_has_location() {
        let err = eval("local o = {};\no.missing").unwrap_err();
        let loc = err.location().expect("runtime error should carry a location");
        assert_eq!(loc.begin.line, 2);
    }
}
