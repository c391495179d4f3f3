//
// vm.rs
//
// Building a per-file evaluator from the current configuration
//

use std::path::{Path, PathBuf};

use jsonnet_core::Vm;

use crate::config::Configuration;

const TANKA_ROOT_MARKERS: [&str; 2] = ["tkrc.yaml", "jsonnetfile.json"];
const TANKA_ENTRYPOINT: &str = "main.jsonnet";

/// Search path for `path` in a Tanka-style project: the project root is the
/// nearest ancestor holding `tkrc.yaml` or `jsonnetfile.json`, the base is
/// the nearest directory at or below it holding `main.jsonnet`.
pub fn tanka_jpaths(path: &Path) -> Option<Vec<PathBuf>> {
    let start = if path.is_dir() { path } else { path.parent()? };
    let root = TANKA_ROOT_MARKERS.iter().find_map(|marker| {
        start
            .ancestors()
            .find(|dir| dir.join(marker).is_file())
    })?;
    let base = start
        .ancestors()
        .take_while(|dir| dir.starts_with(root))
        .find(|dir| dir.join(TANKA_ENTRYPOINT).is_file())?;
    Some(vec![
        root.join("vendor"),
        base.join("vendor"),
        root.join("lib"),
        base.to_path_buf(),
    ])
}

/// Search path used when evaluating or importing from `path`.
pub fn jpaths_for(config: &Configuration, path: &Path) -> Vec<PathBuf> {
    if config.resolve_paths_with_tanka {
        match tanka_jpaths(path) {
            Some(jpaths) => return jpaths,
            None => log::debug!("unable to resolve tanka jpath for {}", path.display()),
        }
    }
    config.search_paths()
}

/// A fresh evaluator for `path` with the configured ext vars and ext code.
pub fn make_vm(config: &Configuration, path: &Path) -> Vm {
    let mut vm = Vm::new(jpaths_for(config, path));
    reset_ext_vars(&mut vm, config);
    vm
}

fn reset_ext_vars(vm: &mut Vm, config: &Configuration) {
    vm.clear_ext_vars();
    for (name, value) in &config.ext_vars {
        vm.set_ext_var(name.clone(), value.clone());
    }
    for (name, code) in &config.ext_code {
        vm.set_ext_code(name.clone(), code.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonnet_core::ExtVar;
    use tempfile::TempDir;

    #[test]
    fn test_make_vm_applies_ext_vars() {
        let mut config = Configuration::default();
        config.ext_vars.insert("env".into(), "prod".into());
        config.ext_code.insert("replicas".into(), "1 + 2".into());
        let vm = make_vm(&config, Path::new("/tmp/a.jsonnet"));
        assert_eq!(vm.ext_var("env"), Some(&ExtVar::Str("prod".into())));
        assert_eq!(vm.ext_var("replicas"), Some(&ExtVar::Code("1 + 2".into())));
        let out = vm
            .evaluate_snippet("a.jsonnet", "std.extVar('replicas') * 2")
            .expect("ext code should evaluate");
        assert_eq!(out.trim(), "6");
    }

    #[test]
    fn test_tanka_jpaths() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join("jsonnetfile.json"), "{}").unwrap();
        let env = root.join("environments").join("prod");
        std::fs::create_dir_all(env.join("sub")).unwrap();
        std::fs::write(env.join("main.jsonnet"), "{}").unwrap();

        let jpaths = tanka_jpaths(&env.join("sub").join("x.libsonnet")).expect("project should resolve");
        assert_eq!(
            jpaths,
            vec![root.join("vendor"), env.join("vendor"), root.join("lib"), env.clone()]
        );

        let outside = TempDir::new().unwrap();
        assert!(tanka_jpaths(&outside.path().join("a.jsonnet")).is_none());
    }

    #[test]
    fn test_jpaths_fall_back_without_tanka_project() {
        let config = Configuration {
            resolve_paths_with_tanka: true,
            jpaths: vec![PathBuf::from("/lib")],
            ..Configuration::default()
        };
        let outside = TempDir::new().unwrap();
        assert_eq!(
            jpaths_for(&config, &outside.path().join("a.jsonnet")),
            vec![PathBuf::from("/lib")]
        );
    }
}
