//
// definition.rs
//
// Where the symbol under a location is defined
//

use std::path::Path;

use jsonnet_core::ast::{is_identifier, Location, LocationRange, Node, NodeKind, NodeRef};

use super::find_bind::{declaration_at, find_binder, Binder};
use super::find_position::find_node_by_position;
use super::resolver::{IndexKey, ObjectRange, Resolver};
use super::Scoped;
use crate::nodestack::NodeStack;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub filename: String,
    /// Whole definition, e.g. `name = body` or the field.
    pub target: LocationRange,
    /// The defined name.
    pub selection: LocationRange,
}

impl From<&Binder> for Definition {
    fn from(binder: &Binder) -> Self {
        Self {
            filename: binder.loc.file.to_string(),
            target: binder.loc.clone(),
            selection: binder.name_loc.clone(),
        }
    }
}

impl From<&ObjectRange> for Definition {
    fn from(range: &ObjectRange) -> Self {
        Self {
            filename: range.filename.clone(),
            target: range.full_range.clone(),
            selection: range.selection_range.clone(),
        }
    }
}

/// Whether `node` is a dotted path of plain names, such as `a.b.c`,
/// `super.x` or `(import 'lib.libsonnet').x`.
fn is_name_path(node: &Node) -> bool {
    match &node.kind {
        NodeKind::Index { target, index } => index.as_string().is_some() && is_name_path(target),
        NodeKind::SuperIndex { index } => index.as_string().is_some(),
        NodeKind::Var { .. } | NodeKind::Self_ | NodeKind::Dollar => true,
        NodeKind::Import { file } => !is_identifier(file),
        _ => false,
    }
}

impl Resolver<'_> {
    /// Definitions of the symbol at `location` in the document rooted at `root`.
    pub fn find_definitions(&mut self, root: &NodeRef, location: Location) -> Vec<Definition> {
        let Some(stack) = find_node_by_position(root, location) else {
            return Vec::new();
        };
        let chain = stack.stack;
        log::trace!(
            "definition at {location}: {}",
            chain
                .iter()
                .rev()
                .map(|n| n.kind_name())
                .collect::<Vec<_>>()
                .join(" <- ")
        );

        if let Some(binder) = declaration_at(&chain, location) {
            return vec![Definition::from(&binder)];
        }
        let Some(scoped) = Scoped::from_chain(&chain) else {
            return Vec::new();
        };

        let definitions: Vec<Definition> = match &scoped.node.kind {
            NodeKind::Var { id } => find_binder(&chain, id)
                .map(|binder| vec![Definition::from(&binder)])
                .unwrap_or_default(),
            NodeKind::LiteralString(name) => self.literal_definitions(&scoped, name),
            NodeKind::Index { .. } | NodeKind::SuperIndex { .. } => self.index_definitions(&scoped),
            NodeKind::Import { file } | NodeKind::ImportStr { file } | NodeKind::ImportBin { file } => {
                self.import_definition(&scoped.node.loc.file, file)
                    .into_iter()
                    .collect()
            }
            _ => Vec::new(),
        };
        definitions
            .into_iter()
            .filter(|d| !d.filename.is_empty())
            .collect()
    }

    /// A string under the cursor is either the name in an index or the name
    /// of a field being declared.
    fn literal_definitions(&mut self, scoped: &Scoped, name: &str) -> Vec<Definition> {
        let Some(parent) = scoped.ancestors.last() else {
            return Vec::new();
        };
        match &parent.kind {
            NodeKind::Index { index, .. } | NodeKind::SuperIndex { index }
                if Node::same(index, &scoped.node) =>
            {
                let Some(parent) = Scoped::from_chain(&scoped.ancestors) else {
                    return Vec::new();
                };
                self.index_definitions(&parent)
            }
            NodeKind::DesugaredObject { fields, .. } => fields
                .iter()
                .filter(|f| Node::same(&f.name, &scoped.node))
                .map(|f| Definition {
                    filename: f.loc.file.to_string(),
                    target: f.loc.clone(),
                    selection: f.name.loc.clone(),
                })
                .collect(),
            _ => {
                log::trace!("no definition for string {name:?}");
                Vec::new()
            }
        }
    }

    fn index_definitions(&mut self, scoped: &Scoped) -> Vec<Definition> {
        if is_name_path(&scoped.node) {
            let list = NodeStack::new(scoped.node.clone()).build_index_list();
            log::trace!("definition of index list {list:?}");
            return self
                .find_ranges_from_index_list(&scoped.chain(), &list)
                .iter()
                .map(Definition::from)
                .collect();
        }
        let (containers, index) = match &scoped.node.kind {
            NodeKind::Index { target, index } => {
                (self.resolve_values(&scoped.child(target)), index)
            }
            NodeKind::SuperIndex { index } => (self.super_objects(&scoped.ancestors), index),
            _ => return Vec::new(),
        };
        match self.index_key(scoped, index) {
            Some(IndexKey::Field(name)) => self
                .field_ranges(&containers, &name)
                .iter()
                .map(Definition::from)
                .collect(),
            Some(IndexKey::Element(i)) => containers
                .iter()
                .filter_map(|c| match &c.node.kind {
                    NodeKind::Array { elements } => elements.get(i).cloned(),
                    _ => None,
                })
                .map(|element| Definition {
                    filename: element.loc.file.to_string(),
                    target: element.loc.clone(),
                    selection: element.loc.clone(),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    fn import_definition(&mut self, importer: &str, file: &str) -> Option<Definition> {
        let vm = self.vm_for(importer);
        let path = vm.resolve_import(importer, file).ok()?;
        let filename = path.to_string_lossy().into_owned();
        let start = LocationRange::new(
            filename.as_str().into(),
            Location::new(1, 1),
            Location::new(1, 1),
        );
        Some(Definition {
            filename,
            target: start.clone(),
            selection: start,
        })
    }

    /// Definitions of the symbol at `location` in the file at `path`.
    pub fn find_definitions_in_file(&mut self, path: &Path, location: Location) -> Vec<Definition> {
        match self.cache.ast_for_path(path) {
            Some(root) => self.find_definitions(&root, location),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::document_cache::DocumentCache;
    use jsonnet_core::parse;
    use tempfile::TempDir;

    fn definitions(text: &str, line: u32, column: u32) -> Vec<Definition> {
        let cache = DocumentCache::new();
        let config = Configuration::default();
        let mut resolver = Resolver::new(&cache, &config);
        let root = parse("/t.jsonnet", text).expect("fixture should parse");
        resolver.find_definitions(&root, Location::new(line, column))
    }

    #[test]
    fn test_object_local_definition() {
        let defs = definitions("{ local x = \"v\", a: x }", 1, 21);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].target.begin, Location::new(1, 9));
        assert_eq!(defs[0].target.end, Location::new(1, 16));
        assert_eq!(defs[0].selection.end, Location::new(1, 10));
    }

    #[test]
    fn test_field_through_merge() {
        let text = "local a = { f: 1 };\n(a + { f: 2 }).f";
        let defs = definitions(text, 2, 16);
        assert_eq!(defs.len(), 2, "base and override both define f");
        assert_eq!(defs[0].selection.begin, Location::new(1, 13));
        assert_eq!(defs[1].selection.begin, Location::new(2, 8));
    }

    #[test]
    fn test_super_index_definition() {
        let text = "{ a: 1 } + { b: super.a }";
        let defs = definitions(text, 1, 23);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].selection.begin, Location::new(1, 3));
    }

    #[test]
    fn test_declaration_is_its_own_definition() {
        let defs = definitions("local abc = 1; abc", 1, 8);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].selection.begin, Location::new(1, 7));

        let defs = definitions("{ field: 1 }", 1, 4);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].selection.begin, Location::new(1, 3));
    }

    #[test]
    fn test_method_field_declaration() {
        let plain = definitions("{ f: 1, g: self.f }", 1, 3);
        let method = definitions("{ f(x): x, g: self.f(1) }", 1, 3);
        assert_eq!(method.len(), plain.len(), "methods resolve like plain fields");
        assert_eq!(method[0].selection.begin, Location::new(1, 3));
        assert_eq!(method[0].target.begin, Location::new(1, 3));

        let usage = definitions("{ f(x): x, g: self.f(1) }", 1, 20);
        assert_eq!(usage, method, "the usage and the declaration agree");
    }

    #[test]
    fn test_dotted_paths() {
        let defs = definitions("local o = { a: { b: 1 } }; o.a.b", 1, 32);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].selection.begin, Location::new(1, 18));

        let defs = definitions("{ a: 1, b: { c: $.a } }", 1, 19);
        assert_eq!(defs.len(), 1, "$ is the outermost object");
        assert_eq!(defs[0].selection.begin, Location::new(1, 3));
    }

    #[test]
    fn test_field_of_inline_import() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("lib.libsonnet"), "{\n  x: 1,\n}").unwrap();
        let main = dir.path().join("main.jsonnet");
        let root = parse(&main.to_string_lossy(), "(import 'lib.libsonnet').x").unwrap();

        let cache = DocumentCache::new();
        let config = Configuration::default();
        let mut resolver = Resolver::new(&cache, &config);
        let defs = resolver.find_definitions(&root, Location::new(1, 26));
        assert_eq!(defs.len(), 1);
        assert!(defs[0].filename.ends_with("lib.libsonnet"));
        assert_eq!(defs[0].selection.begin, Location::new(2, 3));
    }

    #[test]
    fn test_parameter_definition() {
        let defs = definitions("function(p) p", 1, 13);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].selection.begin, Location::new(1, 10));
    }

    #[test]
    fn test_definition_across_import() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("lib.libsonnet"), "{\n  x: 1,\n}").unwrap();
        let main = dir.path().join("main.jsonnet");
        let text = "local l = import 'lib.libsonnet';\nl.x";
        let root = parse(&main.to_string_lossy(), text).unwrap();

        let cache = DocumentCache::new();
        let config = Configuration::default();
        let mut resolver = Resolver::new(&cache, &config);
        let defs = resolver.find_definitions(&root, Location::new(2, 3));
        assert_eq!(defs.len(), 1);
        assert!(defs[0].filename.ends_with("lib.libsonnet"));
        assert_eq!(defs[0].selection.begin, Location::new(2, 3));

        let import = resolver.find_definitions(&root, Location::new(1, 12));
        assert_eq!(import.len(), 1);
        assert!(import[0].filename.ends_with("lib.libsonnet"));
    }
}
