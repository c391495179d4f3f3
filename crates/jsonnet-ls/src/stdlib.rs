//
// stdlib.rs
//
// Catalogue of the Jsonnet standard library used by completion, hover and
// signature help
//

use std::sync::OnceLock;

use indexmap::IndexMap;
use jsonnet_core::ast::NodeKind;

/// Kinds of value a function can be applied to, for snippet filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Array,
    Boolean,
    Function,
    Null,
    Number,
    Object,
    String,
}

impl ValueKind {
    /// Kind of value a literal node evaluates to.
    pub fn of(kind: &NodeKind) -> Option<Self> {
        match kind {
            NodeKind::Array { .. } | NodeKind::ArrayComp { .. } => Some(Self::Array),
            NodeKind::LiteralBoolean(_) => Some(Self::Boolean),
            NodeKind::Function { .. } => Some(Self::Function),
            NodeKind::LiteralNull => Some(Self::Null),
            NodeKind::LiteralNumber { .. } => Some(Self::Number),
            NodeKind::DesugaredObject { .. } | NodeKind::ObjectComp { .. } => Some(Self::Object),
            NodeKind::LiteralString(_) => Some(Self::String),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Boolean => "boolean",
            Self::Function => "function",
            Self::Null => "null",
            Self::Number => "number",
            Self::Object => "object",
            Self::String => "string",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StdFunction {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub available_since: &'static str,
    /// Markdown.
    pub description: &'static str,
    /// Empty when the function takes any value.
    pub type_limitations: &'static [ValueKind],
}

impl StdFunction {
    /// `std.name(a, b)`
    pub fn signature(&self) -> String {
        if self.params.is_empty() {
            format!("std.{}", self.name)
        } else {
            format!("std.{}({})", self.name, self.params.join(", "))
        }
    }

    pub fn accepts(&self, kind: Option<ValueKind>) -> bool {
        self.type_limitations.is_empty()
            || kind.is_some_and(|k| self.type_limitations.contains(&k))
    }
}

const NUMBER: &[ValueKind] = &[ValueKind::Number];
const LENGTH: &[ValueKind] = &[
    ValueKind::Array,
    ValueKind::String,
    ValueKind::Object,
    ValueKind::Function,
];

macro_rules! function {
    ($name:literal, [$($param:literal),*], $since:literal, $doc:literal) => {
        function!($name, [$($param),*], $since, $doc, &[])
    };
    ($name:literal, [$($param:literal),*], $since:literal, $doc:literal, $limits:expr) => {
        StdFunction {
            name: $name,
            params: &[$($param),*],
            available_since: $since,
            description: $doc,
            type_limitations: $limits,
        }
    };
}

const MATH: &[StdFunction] = &[
    function!("abs", ["n"], "0.10.0", "Absolute value of `n`.", NUMBER),
    function!("sign", ["n"], "0.10.0", "`-1`, `0` or `1` depending on the sign of `n`.", NUMBER),
    function!("max", ["a", "b"], "0.10.0", "The larger of `a` and `b`."),
    function!("min", ["a", "b"], "0.10.0", "The smaller of `a` and `b`."),
    function!("pow", ["x", "n"], "0.10.0", "`x` raised to the power `n`."),
    function!("exp", ["x"], "0.10.0", "e raised to the power `x`.", NUMBER),
    function!("log", ["x"], "0.10.0", "Natural logarithm of `x`.", NUMBER),
    function!("exponent", ["x"], "0.10.0", "Binary exponent of `x`.", NUMBER),
    function!("mantissa", ["x"], "0.10.0", "Binary mantissa of `x`.", NUMBER),
    function!("floor", ["x"], "0.10.0", "Largest integer not greater than `x`.", NUMBER),
    function!("ceil", ["x"], "0.10.0", "Smallest integer not less than `x`.", NUMBER),
    function!("sqrt", ["x"], "0.10.0", "Square root of `x`.", NUMBER),
    function!("sin", ["x"], "0.10.0", "Sine of `x` in radians.", NUMBER),
    function!("cos", ["x"], "0.10.0", "Cosine of `x` in radians.", NUMBER),
    function!("tan", ["x"], "0.10.0", "Tangent of `x` in radians.", NUMBER),
    function!("asin", ["x"], "0.10.0", "Arc sine of `x`.", NUMBER),
    function!("acos", ["x"], "0.10.0", "Arc cosine of `x`.", NUMBER),
    function!("atan", ["x"], "0.10.0", "Arc tangent of `x`.", NUMBER),
    function!("round", ["x"], "0.10.0", "`x` rounded to the nearest integer.", NUMBER),
    function!("mod", ["a", "b"], "0.10.0", "Remainder of `a / b`; formats strings when `a` is a string."),
    function!("clamp", ["x", "minVal", "maxVal"], "0.15.0", "`x` limited to the range `[minVal, maxVal]`."),
];

const FUNCTIONS: &[StdFunction] = &[
    function!("extVar", ["x"], "0.10.0", "Value of the external variable `x`, as a string or as evaluated code."),
    function!("thisFile", [], "0.10.0", "Name of the file the expression appears in."),
    function!("type", ["x"], "0.10.0", "Type of `x`: `\"array\"`, `\"boolean\"`, `\"function\"`, `\"null\"`, `\"number\"`, `\"object\"` or `\"string\"`."),
    function!("isArray", ["v"], "0.10.0", "Whether `v` is an array."),
    function!("isBoolean", ["v"], "0.10.0", "Whether `v` is a boolean."),
    function!("isFunction", ["v"], "0.10.0", "Whether `v` is a function."),
    function!("isNumber", ["v"], "0.10.0", "Whether `v` is a number."),
    function!("isObject", ["v"], "0.10.0", "Whether `v` is an object."),
    function!("isString", ["v"], "0.10.0", "Whether `v` is a string."),
    function!("length", ["x"], "0.10.0", "Number of elements of an array, characters of a string, fields of an object or parameters of a function.", LENGTH),
    function!("get", ["o", "f", "default", "inc_hidden"], "0.18.0", "Field `f` of `o`, or `default` when it is absent."),
    function!("objectHas", ["o", "f"], "0.10.0", "Whether `o` has a visible field named `f`."),
    function!("objectFields", ["o"], "0.10.0", "Sorted names of the visible fields of `o`."),
    function!("objectValues", ["o"], "0.17.0", "Values of the visible fields of `o`, ordered by field name."),
    function!("objectKeysValues", ["o"], "0.20.0", "`{key, value}` pairs of the visible fields of `o`."),
    function!("objectHasAll", ["o", "f"], "0.10.0", "Whether `o` has a field named `f`, hidden or not."),
    function!("objectFieldsAll", ["o"], "0.10.0", "Sorted names of all fields of `o`, hidden ones included."),
    function!("objectValuesAll", ["o"], "0.17.0", "Values of all fields of `o`, hidden ones included."),
    function!("objectKeysValuesAll", ["o"], "0.20.0", "`{key, value}` pairs of all fields of `o`."),
    function!("prune", ["a"], "0.10.0", "`a` without empty arrays, empty objects and nulls, recursively."),
    function!("mapWithKey", ["func", "obj"], "0.10.0", "Object with every field value replaced by `func(key, value)`."),
    function!("toString", ["a"], "0.10.0", "`a` converted to a string."),
    function!("codepoint", ["str"], "0.10.0", "Unicode code point of the single character `str`."),
    function!("char", ["n"], "0.10.0", "String of the single code point `n`."),
    function!("substr", ["str", "from", "len"], "0.10.0", "`len` characters of `str` starting at `from`."),
    function!("findSubstr", ["pat", "str"], "0.10.0", "Indexes at which `pat` occurs in `str`."),
    function!("startsWith", ["a", "b"], "0.10.0", "Whether `a` starts with `b`."),
    function!("endsWith", ["a", "b"], "0.10.0", "Whether `a` ends with `b`."),
    function!("stripChars", ["str", "chars"], "0.15.0", "`str` without leading and trailing characters from `chars`."),
    function!("lstripChars", ["str", "chars"], "0.15.0", "`str` without leading characters from `chars`."),
    function!("rstripChars", ["str", "chars"], "0.15.0", "`str` without trailing characters from `chars`."),
    function!("split", ["str", "c"], "0.10.0", "`str` split at every occurrence of `c`."),
    function!("splitLimit", ["str", "c", "maxsplits"], "0.10.0", "`str` split at the first `maxsplits` occurrences of `c`."),
    function!("splitLimitR", ["str", "c", "maxsplits"], "0.19.0", "`str` split at the last `maxsplits` occurrences of `c`."),
    function!("strReplace", ["str", "from", "to"], "0.10.0", "`str` with every `from` replaced by `to`."),
    function!("isEmpty", ["str"], "0.20.0", "Whether `str` is the empty string."),
    function!("trim", ["str"], "0.21.0", "`str` without leading and trailing whitespace."),
    function!("equalsIgnoreCase", ["str1", "str2"], "0.21.0", "Whether the strings are equal ignoring ASCII case."),
    function!("asciiUpper", ["str"], "0.10.0", "`str` with ASCII letters upper-cased."),
    function!("asciiLower", ["str"], "0.10.0", "`str` with ASCII letters lower-cased."),
    function!("stringChars", ["str"], "0.10.0", "Array of the characters of `str`."),
    function!("format", ["str", "vals"], "0.10.0", "`str` formatted Python style with `vals`; also written `str % vals`."),
    function!("escapeStringBash", ["str"], "0.10.0", "`str` quoted for a bash command line."),
    function!("escapeStringDollars", ["str"], "0.10.0", "`str` with `$` doubled."),
    function!("escapeStringJson", ["str"], "0.10.0", "`str` as a JSON string literal."),
    function!("escapeStringPython", ["str"], "0.10.0", "`str` as a Python string literal."),
    function!("escapeStringXml", ["str"], "0.10.0", "`str` with XML special characters escaped."),
    function!("parseInt", ["str"], "0.10.0", "Decimal integer parsed from `str`."),
    function!("parseOctal", ["str"], "0.10.0", "Octal integer parsed from `str`."),
    function!("parseHex", ["str"], "0.10.0", "Hexadecimal integer parsed from `str`."),
    function!("parseJson", ["str"], "0.13.0", "Value parsed from the JSON text `str`."),
    function!("parseYaml", ["str"], "0.18.0", "Value parsed from the YAML text `str`."),
    function!("encodeUTF8", ["str"], "0.13.0", "UTF-8 bytes of `str`."),
    function!("decodeUTF8", ["arr"], "0.13.0", "String decoded from the UTF-8 bytes `arr`."),
    function!("manifestIni", ["ini"], "0.10.0", "INI text of an object of sections."),
    function!("manifestPython", ["v"], "0.10.0", "`v` as a Python literal."),
    function!("manifestPythonVars", ["conf"], "0.10.0", "`conf` as Python variable assignments."),
    function!("manifestJsonEx", ["value", "indent", "newline", "key_val_sep"], "0.10.0", "`value` as JSON text with the given indentation and separators."),
    function!("manifestJson", ["value"], "0.10.0", "`value` as JSON text indented by four spaces."),
    function!("manifestJsonMinified", ["value"], "0.18.0", "`value` as JSON text without whitespace."),
    function!("manifestYamlDoc", ["value", "indent_array_in_object", "quote_keys"], "0.10.0", "`value` as a YAML document."),
    function!("manifestYamlStream", ["value", "indent_array_in_object", "c_document_end", "quote_keys"], "0.10.0", "Array `value` as a stream of YAML documents."),
    function!("manifestXmlJsonml", ["value"], "0.10.0", "JsonML `value` as XML text."),
    function!("manifestTomlEx", ["toml", "indent"], "0.18.0", "`toml` as TOML text indented by `indent`."),
    function!("makeArray", ["sz", "func"], "0.10.0", "Array of `sz` elements where element `i` is `func(i)`."),
    function!("member", ["arr", "x"], "0.15.0", "Whether `x` is an element of array or string `arr`."),
    function!("count", ["arr", "x"], "0.10.0", "Number of times `x` occurs in `arr`."),
    function!("find", ["value", "arr"], "0.10.0", "Indexes at which `value` occurs in `arr`."),
    function!("map", ["func", "arr"], "0.10.0", "`arr` with every element replaced by `func(element)`."),
    function!("mapWithIndex", ["func", "arr"], "0.10.0", "`arr` with element `i` replaced by `func(i, element)`."),
    function!("filterMap", ["filter_func", "map_func", "arr"], "0.10.0", "Elements passing `filter_func`, mapped through `map_func`."),
    function!("flatMap", ["func", "arr"], "0.10.0", "Concatenation of `func` applied to every element of `arr`."),
    function!("filter", ["func", "arr"], "0.10.0", "Elements of `arr` for which `func` returns true."),
    function!("foldl", ["func", "arr", "init"], "0.10.0", "Left fold of `arr` with `func` starting from `init`."),
    function!("foldr", ["func", "arr", "init"], "0.10.0", "Right fold of `arr` with `func` starting from `init`."),
    function!("range", ["from", "to"], "0.10.0", "Integers from `from` to `to`, both inclusive."),
    function!("repeat", ["what", "count"], "0.15.0", "Array or string `what` repeated `count` times."),
    function!("slice", ["indexable", "index", "end", "step"], "0.10.0", "Elements of `indexable` selected like `indexable[index:end:step]`."),
    function!("join", ["sep", "arr"], "0.10.0", "Elements of `arr` joined with `sep`."),
    function!("lines", ["arr"], "0.10.0", "Strings of `arr` joined with newlines, ending in a newline."),
    function!("flattenArrays", ["arr"], "0.10.0", "Concatenation of the arrays in `arr`."),
    function!("reverse", ["arrs"], "0.13.0", "Elements of `arrs` in reverse order."),
    function!("sort", ["arr", "keyF"], "0.10.0", "`arr` sorted by `keyF`, the identity by default."),
    function!("uniq", ["arr", "keyF"], "0.10.0", "`arr` without consecutive duplicates."),
    function!("all", ["arr"], "0.19.0", "Whether every element of `arr` is true."),
    function!("any", ["arr"], "0.19.0", "Whether some element of `arr` is true."),
    function!("sum", ["arr"], "0.20.0", "Sum of the numbers in `arr`."),
    function!("avg", ["arr"], "0.21.0", "Average of the numbers in `arr`."),
    function!("contains", ["arr", "elem"], "0.21.0", "Whether `elem` is an element of `arr`."),
    function!("remove", ["arr", "elem"], "0.21.0", "`arr` without the first occurrence of `elem`."),
    function!("removeAt", ["arr", "idx"], "0.21.0", "`arr` without the element at `idx`."),
    function!("set", ["arr", "keyF"], "0.10.0", "`arr` sorted and deduplicated."),
    function!("setInter", ["a", "b", "keyF"], "0.10.0", "Intersection of the sets `a` and `b`."),
    function!("setUnion", ["a", "b", "keyF"], "0.10.0", "Union of the sets `a` and `b`."),
    function!("setDiff", ["a", "b", "keyF"], "0.10.0", "Elements of set `a` not in set `b`."),
    function!("setMember", ["x", "arr", "keyF"], "0.10.0", "Whether `x` is an element of the set `arr`."),
    function!("base64", ["input"], "0.10.0", "Base64 encoding of a string or byte array."),
    function!("base64DecodeBytes", ["str"], "0.10.0", "Bytes decoded from the base64 text `str`."),
    function!("base64Decode", ["str"], "0.10.0", "String decoded from the base64 text `str`."),
    function!("md5", ["s"], "0.10.0", "MD5 hash of `s` as hex."),
    function!("sha1", ["s"], "0.21.0", "SHA-1 hash of `s` as hex."),
    function!("sha256", ["s"], "0.21.0", "SHA-256 hash of `s` as hex."),
    function!("xor", ["x", "y"], "0.20.0", "Exclusive or of two booleans."),
    function!("xnor", ["x", "y"], "0.20.0", "Negated exclusive or of two booleans."),
    function!("mergePatch", ["target", "patch"], "0.10.0", "`target` with the JSON merge patch `patch` applied."),
    function!("trace", ["str", "rest"], "0.11.0", "Prints `str` to stderr and returns `rest`."),
    function!("assertEqual", ["a", "b"], "0.10.0", "True when `a == b`, an error otherwise."),
];

/// Catalogue by name, math functions first.
pub fn functions() -> &'static IndexMap<&'static str, StdFunction> {
    static CATALOGUE: OnceLock<IndexMap<&'static str, StdFunction>> = OnceLock::new();
    CATALOGUE.get_or_init(|| {
        MATH.iter()
            .chain(FUNCTIONS)
            .map(|f| (f.name, f.clone()))
            .collect()
    })
}

pub fn lookup(name: &str) -> Option<&'static StdFunction> {
    functions().get(name)
}

/// Functions whose name matches `prefix`, case-insensitively: names
/// starting with it first, then names containing it. Each group keeps
/// catalogue order.
pub fn matching(prefix: &str) -> Vec<&'static StdFunction> {
    let needle = prefix.to_lowercase();
    let (starts, contains): (Vec<_>, Vec<_>) = functions()
        .values()
        .filter(|f| f.name.to_lowercase().contains(&needle))
        .partition(|f| f.name.to_lowercase().starts_with(&needle));
    starts.into_iter().chain(contains).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures() {
        assert_eq!(lookup("max").unwrap().signature(), "std.max(a, b)");
        assert_eq!(lookup("manifestJson").unwrap().signature(), "std.manifestJson(value)");
        assert_eq!(lookup("thisFile").unwrap().signature(), "std.thisFile");
    }

    #[test]
    fn test_matching_orders_prefix_first() {
        let names: Vec<_> = matching("ma").iter().map(|f| f.name).collect();
        assert!(names.contains(&"max"), "max should match: {names:?}");
        assert!(names.contains(&"manifestJson"), "manifestJson should match: {names:?}");
        let first_contains = names.iter().position(|n| !n.starts_with("ma")).unwrap();
        assert!(
            names[first_contains..].iter().all(|n| !n.to_lowercase().starts_with("ma")),
            "prefix matches come first: {names:?}"
        );
        assert!(names.contains(&"format"), "contains matches are kept");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let names: Vec<_> = matching("JSON").iter().map(|f| f.name).collect();
        assert!(names.contains(&"manifestJson"));
        assert!(names.contains(&"parseJson"));
    }

    #[test]
    fn test_type_limitations() {
        let length = lookup("length").unwrap();
        assert!(length.accepts(Some(ValueKind::Array)));
        assert!(!length.accepts(Some(ValueKind::Number)));
        assert!(!length.accepts(None));
        assert!(lookup("ceil").unwrap().accepts(Some(ValueKind::Number)));
        assert!(lookup("toString").unwrap().accepts(None));
    }

    #[test]
    fn test_names_are_unique() {
        assert_eq!(functions().len(), MATH.len() + FUNCTIONS.len());
    }
}
