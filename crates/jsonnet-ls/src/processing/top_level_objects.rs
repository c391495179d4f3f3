//
// top_level_objects.rs
//
// Imported files and the objects they evaluate to
//

use std::path::{Path, PathBuf};

use jsonnet_core::ast::{NodeKind, NodeRef};

use super::resolver::Resolver;
use super::Scoped;
use crate::nodestack::path_to;

impl Resolver<'_> {
    /// Resolved path and AST of `file` imported from `importer`.
    pub fn import_root(&mut self, importer: &str, file: &str) -> Option<(PathBuf, NodeRef)> {
        let vm = self.vm_for(importer);
        let path = match vm.resolve_import(importer, file) {
            Ok(path) => path,
            Err(err) => {
                log::warn!("unable to resolve import {file:?} from {importer}: {err}");
                return None;
            }
        };
        let root = self.cache.ast_for_path(&path)?;
        Some((path, root))
    }

    /// Values of an imported file. Object results come from the memo when
    /// they have been computed before; results cut short by an import cycle
    /// are not memoised.
    pub(crate) fn import_values(&mut self, importer: &str, file: &str) -> Vec<Scoped> {
        let Some((path, root)) = self.import_root(importer, file) else {
            return Vec::new();
        };
        let key = path.to_string_lossy().into_owned();
        if let Some(objects) = self.cache.get_top_level_objects(&key, importer) {
            if !objects.is_empty() {
                return objects.iter().map(|o| self.scope_of(o)).collect();
            }
        }
        if !self.importing.insert(path.clone()) {
            log::debug!("import cycle through {}", path.display());
            self.cycle_cuts += 1;
            return Vec::new();
        }
        let cuts = self.cycle_cuts;
        let values = self.resolve_values(&Scoped::root(root));
        self.importing.remove(&path);
        if self.cycle_cuts != cuts {
            // a cycle was cut somewhere below, so the result is partial
            return values;
        }

        let objects: Vec<NodeRef> = values
            .iter()
            .filter(|v| matches!(v.node.kind, NodeKind::DesugaredObject { .. }))
            .map(|v| v.node.clone())
            .collect();
        self.cache.put_top_level_objects(&key, importer, objects);
        values
    }

    /// Objects `file`, imported from `importer`, evaluates to.
    pub fn find_top_level_objects(&mut self, file: &str, importer: &str) -> Vec<Scoped> {
        self.import_values(importer, file)
            .into_iter()
            .filter(|v| matches!(v.node.kind, NodeKind::DesugaredObject { .. }))
            .collect()
    }

    /// `node` scoped by its ancestors in the file it was parsed from. Nodes
    /// outside any known file get no ancestors.
    pub fn scope_of(&self, node: &NodeRef) -> Scoped {
        let file = node.loc.file.to_string();
        let stack = (!file.is_empty())
            .then(|| self.cache.ast_for_path(Path::new(&file)))
            .flatten()
            .and_then(|root| path_to(&root, node));
        match stack.and_then(|s| Scoped::from_stack(&s)) {
            Some(scoped) => scoped,
            None => Scoped::root(node.clone()),
        }
    }
}
