//
// state.rs
//
// Shared server state and the diagnostics publish gate
//

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tower_lsp::lsp_types::{TextDocumentContentChangeEvent, Url};

use crate::config::Configuration;
use crate::document_cache::{Document, DocumentCache};

/// Keeps diagnostics from going backwards: nothing is published for a
/// version older than the last published one.
#[derive(Debug, Default)]
pub struct DiagnosticsGate {
    last_published_version: RwLock<HashMap<Url, i32>>,
    /// URIs allowed to republish their current version, e.g. after a
    /// configuration change or a change in a file they import.
    force_republish: RwLock<HashSet<Url>>,
}

impl DiagnosticsGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// - Normal: `version > last`
    /// - Forced: `version >= last`
    /// - Never: `version < last`
    pub fn can_publish(&self, uri: &Url, version: i32) -> bool {
        let Ok(last_published) = self.last_published_version.read() else {
            return true;
        };
        let forced = self
            .force_republish
            .read()
            .map(|force| force.contains(uri))
            .unwrap_or(false);
        match last_published.get(uri) {
            Some(&last) if version < last => false,
            Some(&last) if forced => version >= last,
            Some(&last) => version > last,
            None => true,
        }
    }

    pub fn record_publish(&self, uri: &Url, version: i32) {
        if let Ok(mut last_published) = self.last_published_version.write() {
            last_published.insert(uri.clone(), version);
        }
        self.clear_force_republish(uri);
    }

    pub fn mark_force_republish(&self, uri: &Url) {
        log::trace!("marking {uri} for republish");
        if let Ok(mut force) = self.force_republish.write() {
            force.insert(uri.clone());
        }
    }

    pub fn clear_force_republish(&self, uri: &Url) {
        if let Ok(mut force) = self.force_republish.write() {
            force.remove(uri);
        }
    }

    /// Forgets `uri`, e.g. when it is closed.
    pub fn clear(&self, uri: &Url) {
        if let Ok(mut last_published) = self.last_published_version.write() {
            last_published.remove(uri);
        }
        self.clear_force_republish(uri);
    }
}

#[derive(Debug, Default)]
pub struct WorldState {
    pub cache: DocumentCache,
    pub config: Configuration,
    pub diagnostics_gate: DiagnosticsGate,
    pub workspace_folders: Vec<Url>,
}

impl WorldState {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn open_document(&self, uri: Url, text: &str, version: i32) {
        let doc = Document::new(uri, text, version);
        if let Some(err) = &doc.parse_error {
            log::warn!("{}: {}", doc.filename, err);
        }
        self.cache.put(doc);
    }

    /// Applies edits to an open document. Returns false when the document
    /// is not open.
    pub fn change_document(
        &self,
        uri: &Url,
        changes: Vec<TextDocumentContentChangeEvent>,
        version: i32,
    ) -> bool {
        let Some(current) = self.cache.get(uri) else {
            return false;
        };
        let mut doc = (*current).clone();
        doc.apply_changes(changes, version);
        self.cache.put(doc);
        true
    }

    pub fn close_document(&self, uri: &Url) {
        self.cache.remove(uri);
        self.diagnostics_gate.clear(uri);
    }

    /// Open documents other than `changed` that import it, directly or not.
    pub fn dependents_of(&self, changed: &Url) -> Vec<Url> {
        let Some(changed_doc) = self.cache.get(changed) else {
            return Vec::new();
        };
        let Some(name) = std::path::Path::new(&changed_doc.filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
        else {
            return Vec::new();
        };
        // imports name files by relative path, so a text match on the file
        // name is a cheap over-approximation
        self.cache
            .documents()
            .into_iter()
            .filter(|doc| doc.uri != *changed && doc.text().contains(&name))
            .map(|doc| doc.uri.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(name: &str) -> Url {
        Url::parse(&format!("file:///workspace/{name}")).unwrap()
    }

    #[test]
    fn test_gate_allows_first_publish() {
        let gate = DiagnosticsGate::new();
        assert!(gate.can_publish(&uri("a.jsonnet"), 1));
    }

    #[test]
    fn test_gate_is_monotonic() {
        let gate = DiagnosticsGate::new();
        let uri = uri("a.jsonnet");
        gate.record_publish(&uri, 2);
        assert!(gate.can_publish(&uri, 3), "newer versions publish");
        assert!(!gate.can_publish(&uri, 2), "same version needs a forced republish");
        assert!(!gate.can_publish(&uri, 1), "older versions never publish");
    }

    #[test]
    fn test_gate_force_allows_same_version_once() {
        let gate = DiagnosticsGate::new();
        let uri = uri("a.jsonnet");
        gate.record_publish(&uri, 1);
        gate.mark_force_republish(&uri);
        assert!(gate.can_publish(&uri, 1));
        assert!(!gate.can_publish(&uri, 0), "force never allows older versions");

        gate.record_publish(&uri, 1);
        assert!(!gate.can_publish(&uri, 1), "publishing clears the force flag");
    }

    #[test]
    fn test_gate_clear_forgets_uri() {
        let gate = DiagnosticsGate::new();
        let uri = uri("a.jsonnet");
        gate.record_publish(&uri, 5);
        gate.clear(&uri);
        assert!(gate.can_publish(&uri, 1));
    }

    #[test]
    fn test_document_lifecycle() {
        let state = WorldState::default();
        let uri = uri("main.jsonnet");
        state.open_document(uri.clone(), "{ a: 1 }", 1);
        assert!(state.cache.get(&uri).unwrap().ast.is_some());

        let change = TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: "{ a: 2 }".into(),
        };
        assert!(state.change_document(&uri, vec![change], 2));
        let doc = state.cache.get(&uri).unwrap();
        assert_eq!(doc.text(), "{ a: 2 }");
        assert_eq!(doc.version, 2);

        state.close_document(&uri);
        assert!(state.cache.get(&uri).is_none());
        assert!(!state.change_document(&uri, Vec::new(), 3), "closed documents are not changed");
    }

    #[test]
    fn test_dependents_of() {
        let state = WorldState::default();
        state.open_document(uri("lib.libsonnet"), "{ x: 1 }", 1);
        state.open_document(uri("main.jsonnet"), "(import 'lib.libsonnet').x", 1);
        state.open_document(uri("other.jsonnet"), "{}", 1);
        assert_eq!(state.dependents_of(&uri("lib.libsonnet")), vec![uri("main.jsonnet")]);
    }
}
