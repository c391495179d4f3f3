//! Deterministic fixture workspace generator for benchmarks and tests.
//!
//! Generates synthetic Jsonnet workspaces with controlled characteristics:
//! library count, fields per library, import chain depth and extra locals,
//! plus a `main.jsonnet` entry point importing the first library.
//!
//! All output is deterministic, so benchmarks are reproducible.

use std::fmt::Write;
use std::path::Path;
use tempfile::TempDir;

pub const MAIN_FILE: &str = "main.jsonnet";

/// Configuration for generating a fixture workspace.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub file_count: usize,
    pub fields_per_file: usize,
    pub import_chain_depth: usize,
    pub extra_locals_per_file: usize,
}

impl FixtureConfig {
    /// Small workspace: 10 libraries, 5 fields each, import chain depth 3.
    pub fn small() -> Self {
        Self {
            file_count: 10,
            fields_per_file: 5,
            import_chain_depth: 3,
            extra_locals_per_file: 5,
        }
    }

    /// Medium workspace: 50 libraries, 10 fields each, import chain depth 10.
    pub fn medium() -> Self {
        Self {
            file_count: 50,
            fields_per_file: 10,
            import_chain_depth: 10,
            extra_locals_per_file: 10,
        }
    }

    /// Large workspace: 200 libraries, 20 fields each, import chain depth 15.
    pub fn large() -> Self {
        Self {
            file_count: 200,
            fields_per_file: 20,
            import_chain_depth: 15,
            extra_locals_per_file: 20,
        }
    }
}

pub fn library_name(index: usize) -> String {
    format!("lib_{index}.libsonnet")
}

/// Content of library `index`. Libraries inside the chain import the next
/// one and expose it as the field `next`.
pub fn library_content(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();
    let chained = index < config.import_chain_depth && index + 1 < config.file_count;

    if chained {
        let _ = writeln!(content, "local next = import '{}';", library_name(index + 1));
    }
    for local_i in 0..config.extra_locals_per_file {
        let _ = writeln!(content, "local helper_{index}_{local_i} = {};", local_i + 1);
    }

    content.push_str("{\n");
    for field_i in 0..config.fields_per_file {
        let _ = writeln!(content, "  field_{index}_{field_i}: {},", field_i + 1);
    }
    let _ = writeln!(content, "  fn_{index}(x, y=1): x + y,");
    if config.extra_locals_per_file > 0 {
        let _ = writeln!(content, "  helper: helper_{index}_0,");
    }
    if chained {
        content.push_str("  next: next,\n");
    }
    content.push_str("}\n");
    content
}

/// Entry point using the first library, one level into the chain when
/// there is one.
pub fn main_content(config: &FixtureConfig) -> String {
    let mut content = String::from("local lib = import 'lib_0.libsonnet';\n{\n");
    if config.fields_per_file > 0 {
        content.push_str("  value: lib.field_0_0,\n");
    }
    content.push_str("  called: lib.fn_0(1),\n");
    if config.import_chain_depth > 0 && config.file_count > 1 && config.fields_per_file > 0 {
        content.push_str("  nested: lib.next.field_1_0,\n");
    }
    content.push_str("}\n");
    content
}

/// Create a temporary fixture workspace from the given configuration.
///
/// The directory is cleaned up when the `TempDir` is dropped. Calling this
/// twice with the same `FixtureConfig` produces byte-identical files.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture workspace");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

/// Write fixture files into an existing directory.
pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) {
    for i in 0..config.file_count {
        let filename = library_name(i);
        std::fs::write(dir.join(&filename), library_content(i, config))
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", filename, e));
    }
    std::fs::write(dir.join(MAIN_FILE), main_content(config))
        .unwrap_or_else(|e| panic!("Failed to write {}: {}", MAIN_FILE, e));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_preset_values() {
        let config = FixtureConfig::small();
        assert_eq!(config.file_count, 10);
        assert_eq!(config.fields_per_file, 5);
        assert_eq!(config.import_chain_depth, 3);
    }

    #[test]
    fn test_file_count_matches_config() {
        let config = FixtureConfig::small();
        let workspace = create_fixture_workspace(&config);
        let libraries = std::fs::read_dir(workspace.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "libsonnet"))
            .count();
        assert_eq!(libraries, config.file_count);
        assert!(workspace.path().join(MAIN_FILE).is_file());
    }

    #[test]
    fn test_deterministic_output() {
        let config = FixtureConfig::small();
        let ws1 = create_fixture_workspace(&config);
        let ws2 = create_fixture_workspace(&config);
        for i in 0..config.file_count {
            let name = library_name(i);
            let content1 = std::fs::read_to_string(ws1.path().join(&name)).unwrap();
            let content2 = std::fs::read_to_string(ws2.path().join(&name)).unwrap();
            assert_eq!(content1, content2, "{name} should be identical across runs");
        }
    }

    #[test]
    fn test_import_chain_structure() {
        let config = FixtureConfig {
            file_count: 5,
            fields_per_file: 1,
            import_chain_depth: 3,
            extra_locals_per_file: 0,
        };
        for i in 0..3 {
            let content = library_content(i, &config);
            assert!(
                content.contains(&format!("import '{}'", library_name(i + 1))),
                "lib_{i} should import lib_{}",
                i + 1
            );
        }
        for i in 3..5 {
            assert!(!library_content(i, &config).contains("import"), "lib_{i} should not import anything");
        }
    }

    #[test]
    fn test_generated_files_parse_without_errors() {
        let config = FixtureConfig::small();
        for i in 0..config.file_count {
            let content = library_content(i, &config);
            if let Err(err) = jsonnet_core::parse(&library_name(i), &content) {
                panic!("{} should parse: {err}\n{content}", library_name(i));
            }
        }
        assert!(jsonnet_core::parse(MAIN_FILE, &main_content(&config)).is_ok());
    }

    #[test]
    fn test_generated_workspace_evaluates() {
        let config = FixtureConfig::small();
        let workspace = create_fixture_workspace(&config);
        let vm = jsonnet_core::Vm::new(Vec::new());
        let json = vm
            .evaluate_file(&workspace.path().join(MAIN_FILE))
            .unwrap_or_else(|err| panic!("main should evaluate: {err}"));
        assert!(json.contains("\"nested\": 1"), "unexpected output {json}");
    }
}
