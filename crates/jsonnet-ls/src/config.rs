//
// config.rs
//
// Server configuration and parsing of workspace/didChangeConfiguration settings
//

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const EXT_CODE_SUFFIX: &str = ".extcode.jsonnet";

const DEFAULT_MAX_INLAY_LENGTH: usize = 120;
const DEFAULT_REFERENCES_MAX_FILES: usize = 2000;
const DEFAULT_REFERENCES_MAX_RESULTS: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InlayFunctionArgs {
    pub show_with_same_name: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InlayConfig {
    pub enable_debug_ast: bool,
    pub enable_index_value: bool,
    pub enable_function_args: bool,
    pub function_args: InlayFunctionArgs,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkaroundConfig {
    /// Take the true branch of a conditional whose test cannot be evaluated.
    pub assume_true_condition_on_error: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtCodeConfig {
    pub find_upwards: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionConfig {
    pub enable_snippets: bool,
    pub use_type_in_detail: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReferencesConfig {
    /// Upper bound on files scanned for one references request.
    pub max_files: usize,
    /// Upper bound on locations returned.
    pub max_results: usize,
}

impl Default for ReferencesConfig {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_REFERENCES_MAX_FILES,
            max_results: DEFAULT_REFERENCES_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub resolve_paths_with_tanka: bool,
    /// Entries from `JSONNET_PATH`, already reversed.
    pub env_jpaths: Vec<PathBuf>,
    /// Configured search path, rightmost wins.
    pub jpaths: Vec<PathBuf>,
    pub ext_vars: BTreeMap<String, String>,
    pub ext_code: BTreeMap<String, String>,
    /// Formatter options are accepted and kept but only whitespace is normalised.
    pub formatting: Map<String, Value>,
    pub enable_eval_diagnostics: bool,
    pub enable_lint_diagnostics: bool,
    pub show_docstring_in_completion: bool,
    pub max_inlay_length: usize,
    pub inlay: InlayConfig,
    pub enable_semantic_tokens: bool,
    pub workarounds: WorkaroundConfig,
    pub ext_code_config: ExtCodeConfig,
    pub completion: CompletionConfig,
    pub references: ReferencesConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            resolve_paths_with_tanka: false,
            env_jpaths: Vec::new(),
            jpaths: Vec::new(),
            ext_vars: BTreeMap::new(),
            ext_code: BTreeMap::new(),
            formatting: Map::new(),
            enable_eval_diagnostics: false,
            enable_lint_diagnostics: false,
            show_docstring_in_completion: false,
            max_inlay_length: DEFAULT_MAX_INLAY_LENGTH,
            inlay: InlayConfig::default(),
            enable_semantic_tokens: false,
            workarounds: WorkaroundConfig::default(),
            ext_code_config: ExtCodeConfig::default(),
            completion: CompletionConfig::default(),
            references: ReferencesConfig::default(),
        }
    }
}

/// Splits a `JSONNET_PATH`-style value into entries, last entry first.
pub fn jpaths_from_env(value: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::env::split_paths(value)
        .filter(|p| !p.as_os_str().is_empty())
        .collect();
    paths.reverse();
    paths
}

impl Configuration {
    /// Defaults plus the `JSONNET_PATH` environment variable.
    pub fn from_env() -> Self {
        let env_jpaths = std::env::var("JSONNET_PATH")
            .map(|v| jpaths_from_env(&v))
            .unwrap_or_default();
        Self {
            env_jpaths,
            ..Self::default()
        }
    }

    /// Effective search path: environment entries, then configured entries.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.env_jpaths
            .iter()
            .chain(self.jpaths.iter())
            .cloned()
            .collect()
    }

    /// Applies a settings object. Either every key is applied or, on the
    /// first invalid key or value, nothing is.
    pub fn apply_settings(&mut self, settings: &Value) -> anyhow::Result<()> {
        let settings = match settings.get("jsonnet") {
            Some(inner) if inner.is_object() => inner,
            _ => settings,
        };
        let Some(map) = settings.as_object() else {
            bail!("unsupported settings payload. expected json object, got: {settings}");
        };

        let mut next = self.clone();
        let mut log_level = None;
        for (key, value) in map {
            match key.as_str() {
                "log_level" => {
                    let level = value
                        .as_str()
                        .ok_or_else(|| anyhow!("log_level config has wrong type"))?;
                    log_level = Some(
                        log::LevelFilter::from_str(level)
                            .map_err(|_| anyhow!("invalid log level: {level}"))?,
                    );
                }
                "resolve_paths_with_tanka" => next.resolve_paths_with_tanka = as_bool(key, value)?,
                "jpath" => {
                    let list = value.as_array().ok_or_else(|| {
                        anyhow!("unsupported settings value for jpath. expected array of strings. got: {value}")
                    })?;
                    next.jpaths = list
                        .iter()
                        .map(|v| {
                            v.as_str().map(PathBuf::from).ok_or_else(|| {
                                anyhow!("unsupported settings value for jpath. expected string. got: {v}")
                            })
                        })
                        .collect::<anyhow::Result<_>>()?;
                }
                "ext_vars" => next.ext_vars = string_map(key, value)?,
                "ext_code" => next.ext_code.extend(string_map(key, value)?),
                "formatting" => {
                    next.formatting = value
                        .as_object()
                        .cloned()
                        .ok_or_else(|| anyhow!("formatting options parsing failed: expected json object"))?;
                }
                "enable_eval_diagnostics" => next.enable_eval_diagnostics = as_bool(key, value)?,
                "enable_lint_diagnostics" => next.enable_lint_diagnostics = as_bool(key, value)?,
                "show_docstring_in_completion" => {
                    next.show_docstring_in_completion = as_bool(key, value)?
                }
                "enable_semantic_tokens" => next.enable_semantic_tokens = as_bool(key, value)?,
                "max_inlay_length" => {
                    next.max_inlay_length = value.as_u64().map(|v| v as usize).ok_or_else(|| {
                        anyhow!("unsupported settings value for max_inlay_length. expected int. got: {value}")
                    })?;
                }
                "inlay_config" => next.inlay = section(key, value)?,
                "workarounds" => next.workarounds = section(key, value)?,
                "completion" => next.completion = section(key, value)?,
                "references" => next.references = section(key, value)?,
                "ext_code_config" => {
                    next.ext_code_config = section(key, value)?;
                    let cwd = std::env::current_dir().context("reading current directory")?;
                    let mut ext_code = load_ext_code_files(&cwd, next.ext_code_config.find_upwards)
                        .context("ext_code_config parsing failed")?;
                    ext_code.extend(std::mem::take(&mut next.ext_code));
                    next.ext_code = ext_code;
                }
                other => bail!("unsupported settings key: {other:?}"),
            }
        }

        if let Some(level) = log_level {
            log::set_max_level(level);
        }
        *self = next;
        log::info!("configuration updated: {:?}", self);
        Ok(())
    }
}

fn as_bool(key: &str, value: &Value) -> anyhow::Result<bool> {
    value.as_bool().ok_or_else(|| {
        anyhow!("unsupported settings value for {key}. expected boolean. got: {value}")
    })
}

fn string_map(key: &str, value: &Value) -> anyhow::Result<BTreeMap<String, String>> {
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("unsupported settings value for {key}. expected json object. got: {value}"))?;
    object
        .iter()
        .map(|(name, v)| match v.as_str() {
            Some(s) => Ok((name.clone(), s.to_string())),
            None => bail!("unsupported settings value for {key}.{name}. expected string. got: {v}"),
        })
        .collect()
}

fn section<T: for<'de> Deserialize<'de>>(key: &str, value: &Value) -> anyhow::Result<T> {
    if !value.is_object() {
        bail!("unsupported settings value for {key}. Expected json object. got: {value}");
    }
    serde_json::from_value(value.clone()).with_context(|| format!("parsing {key}"))
}

/// Reads `*.extcode.jsonnet` files in `start` (and its ancestors when
/// `find_upwards`), keyed by file name without the suffix. Nearer files win.
pub fn load_ext_code_files(start: &Path, find_upwards: bool) -> anyhow::Result<BTreeMap<String, String>> {
    let mut found = BTreeMap::new();
    let mut current = Some(start);
    while let Some(dir) = current {
        if let Ok(entries) = std::fs::read_dir(dir) {
            let mut names: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            names.sort();
            for path in names {
                let Some(name) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix(EXT_CODE_SUFFIX))
                else {
                    continue;
                };
                if found.contains_key(name) {
                    continue;
                }
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading extcode file {}", path.display()))?;
                found.insert(name.to_string(), content);
            }
        }
        if !find_upwards {
            break;
        }
        current = dir.parent();
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_apply_settings_updates_fields() {
        let mut config = Configuration::default();
        config
            .apply_settings(&json!({
                "jpath": ["lib", "vendor"],
                "enable_lint_diagnostics": true,
                "ext_vars": {"env": "prod"},
                "inlay_config": {"enable_function_args": true, "function_args": {"show_with_same_name": true}},
                "completion": {"use_type_in_detail": true},
                "references": {"max_files": 10, "max_results": 5},
            }))
            .expect("settings should apply");
        assert_eq!(config.jpaths, vec![PathBuf::from("lib"), PathBuf::from("vendor")]);
        assert!(config.enable_lint_diagnostics);
        assert_eq!(config.ext_vars.get("env").map(String::as_str), Some("prod"));
        assert!(config.inlay.enable_function_args);
        assert!(config.inlay.function_args.show_with_same_name);
        assert!(config.completion.use_type_in_detail);
        assert_eq!(config.references.max_results, 5);
    }

    #[test]
    fn test_wrapped_settings_are_unwrapped() {
        let mut config = Configuration::default();
        config
            .apply_settings(&json!({"jsonnet": {"enable_semantic_tokens": true}}))
            .expect("wrapped settings should apply");
        assert!(config.enable_semantic_tokens);
    }

    #[test]
    fn test_invalid_settings_leave_config_unchanged() {
        let mut config = Configuration::default();
        let before = config.clone();
        let err = config
            .apply_settings(&json!({"enable_eval_diagnostics": true, "bogus": 1}))
            .unwrap_err();
        assert!(err.to_string().contains("bogus"), "unexpected error: {err}");
        assert_eq!(config, before, "a rejected update must not be partially applied");

        assert!(config.apply_settings(&json!({"jpath": "lib"})).is_err());
        assert!(config
            .apply_settings(&json!({"inlay_config": {"unknown": true}}))
            .is_err());
        assert!(config.apply_settings(&json!([1])).is_err());
    }

    #[test]
    fn test_search_paths_put_environment_first() {
        let mut config = Configuration {
            env_jpaths: jpaths_from_env(
                &std::env::join_paths(["a", "b"]).unwrap().to_string_lossy(),
            ),
            ..Configuration::default()
        };
        config.jpaths = vec![PathBuf::from("c")];
        assert_eq!(
            config.search_paths(),
            vec![PathBuf::from("b"), PathBuf::from("a"), PathBuf::from("c")]
        );
    }

    #[test]
    fn test_ext_code_files_nearer_wins() {
        let root = TempDir::new().unwrap();
        let child = root.path().join("child");
        std::fs::create_dir(&child).unwrap();
        std::fs::write(root.path().join("cluster.extcode.jsonnet"), "'outer'").unwrap();
        std::fs::write(root.path().join("region.extcode.jsonnet"), "'eu'").unwrap();
        std::fs::write(child.join("cluster.extcode.jsonnet"), "'inner'").unwrap();

        let local = load_ext_code_files(&child, false).unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local["cluster"], "'inner'");

        let upwards = load_ext_code_files(&child, true).unwrap();
        assert_eq!(upwards["cluster"], "'inner'", "nearer directory should win");
        assert_eq!(upwards["region"], "'eu'");
    }
}
