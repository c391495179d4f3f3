//
// document_cache.rs
//
// Open documents, the top-level-object memo and parsed ASTs of closed files
//

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use anyhow::{anyhow, Context};
use jsonnet_core::{parse, NodeRef, StaticError};
use lru::LruCache;
use ropey::Rope;
use tower_lsp::lsp_types::{Range, TextDocumentContentChangeEvent, Url};

use crate::recovery::{changed_lines, fixed_ast};
use crate::utf16::utf16_column_to_byte_offset;

const DEFAULT_TOP_LEVEL_CAPACITY: usize = 1000;
const DEFAULT_CLOSED_AST_CAPACITY: usize = 500;

/// File name recorded on AST locations for a document URI.
pub fn uri_to_filename(uri: &Url) -> String {
    match uri.to_file_path() {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(()) => uri.path().to_string(),
    }
}

/// An open document.
#[derive(Debug, Clone)]
pub struct Document {
    pub uri: Url,
    pub filename: String,
    pub contents: Rope,
    /// Last AST that parsed cleanly, possibly for an older text.
    pub ast: Option<NodeRef>,
    pub parse_error: Option<StaticError>,
    /// Zero-based lines edited since `ast` was parsed.
    pub lines_changed_since_ast: BTreeSet<usize>,
    pub version: i32,
}

impl Document {
    pub fn new(uri: Url, text: &str, version: i32) -> Self {
        let filename = uri_to_filename(&uri);
        let (ast, parse_error) = if text.is_empty() {
            (None, None)
        } else {
            match fixed_ast(&filename, text, "") {
                Ok(ast) => (Some(ast), None),
                Err(err) => (None, Some(err)),
            }
        };
        Self {
            uri,
            filename,
            contents: Rope::from_str(text),
            ast,
            parse_error,
            lines_changed_since_ast: BTreeSet::new(),
            version,
        }
    }

    pub fn text(&self) -> String {
        self.contents.to_string()
    }

    /// Replaces the text with the last change of a full-sync notification
    /// and reparses. Changes for a version that is not newer are ignored.
    pub fn apply_changes(&mut self, changes: Vec<TextDocumentContentChangeEvent>, version: i32) {
        if version <= self.version {
            return;
        }
        let Some(change) = changes.into_iter().last() else {
            return;
        };
        if change.range.is_some() {
            log::warn!("{}: ranged change under full sync, using its text as the document", self.filename);
        }
        let old_text = self.text();
        self.contents = Rope::from_str(&change.text);
        self.version = version;

        let new_text = change.text;
        match fixed_ast(&self.filename, &new_text, &old_text) {
            Ok(ast) => {
                self.ast = Some(ast);
                self.parse_error = None;
                self.lines_changed_since_ast.clear();
            }
            Err(err) => {
                log::warn!("{}: {}", self.filename, err);
                self.parse_error = Some(err);
                self.lines_changed_since_ast
                    .extend(changed_lines(&old_text, &new_text));
            }
        }
    }
}

/// Documents by URI plus derived per-file data.
pub struct DocumentCache {
    documents: RwLock<HashMap<Url, Arc<Document>>>,
    /// Keyed by (imported file, importer file).
    top_level_objects: RwLock<LruCache<(String, String), Arc<Vec<NodeRef>>>>,
    closed_asts: RwLock<LruCache<PathBuf, (Option<SystemTime>, NodeRef)>>,
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache").finish_non_exhaustive()
    }
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TOP_LEVEL_CAPACITY, DEFAULT_CLOSED_AST_CAPACITY)
    }
}

fn capacity(cap: usize, fallback: usize) -> NonZeroUsize {
    NonZeroUsize::new(cap)
        .or_else(|| NonZeroUsize::new(fallback))
        .unwrap_or(NonZeroUsize::MIN)
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(top_level: usize, closed_asts: usize) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            top_level_objects: RwLock::new(LruCache::new(capacity(
                top_level,
                DEFAULT_TOP_LEVEL_CAPACITY,
            ))),
            closed_asts: RwLock::new(LruCache::new(capacity(
                closed_asts,
                DEFAULT_CLOSED_AST_CAPACITY,
            ))),
        }
    }

    pub fn get(&self, uri: &Url) -> Option<Arc<Document>> {
        self.documents.read().ok()?.get(uri).cloned()
    }

    /// Stores `doc`, dropping memoised data derived from its file.
    pub fn put(&self, doc: Document) {
        self.invalidate_file(&doc.filename);
        if let Ok(mut documents) = self.documents.write() {
            documents.insert(doc.uri.clone(), Arc::new(doc));
        }
    }

    pub fn remove(&self, uri: &Url) -> Option<Arc<Document>> {
        let removed = self.documents.write().ok()?.remove(uri);
        if let Some(doc) = &removed {
            self.invalidate_file(&doc.filename);
        }
        removed
    }

    pub fn documents(&self) -> Vec<Arc<Document>> {
        let mut docs: Vec<Arc<Document>> = self
            .documents
            .read()
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default();
        docs.sort_by(|a, b| a.uri.as_str().cmp(b.uri.as_str()));
        docs
    }

    pub fn find_by_filename(&self, filename: &str) -> Option<Arc<Document>> {
        self.documents
            .read()
            .ok()?
            .values()
            .find(|d| d.filename == filename)
            .cloned()
    }

    /// Text of `range` in `uri`, reading the file from disk when it is not open.
    pub fn get_contents(&self, uri: &Url, range: Range) -> anyhow::Result<String> {
        let text = match self.get(uri) {
            Some(doc) => doc.text(),
            None => {
                let path = uri
                    .to_file_path()
                    .map_err(|()| anyhow!("not a file uri: {uri}"))?;
                std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?
            }
        };
        slice_range(&text, range)
    }

    // ========================================================================
    // Top-level objects
    // ========================================================================

    pub fn get_top_level_objects(&self, file: &str, importer: &str) -> Option<Arc<Vec<NodeRef>>> {
        self.top_level_objects
            .read()
            .ok()?
            .peek(&(file.to_string(), importer.to_string()))
            .cloned()
    }

    pub fn put_top_level_objects(&self, file: &str, importer: &str, objects: Vec<NodeRef>) -> Arc<Vec<NodeRef>> {
        let objects = Arc::new(objects);
        if let Ok(mut cache) = self.top_level_objects.write() {
            cache.push((file.to_string(), importer.to_string()), objects.clone());
        }
        objects
    }

    /// Drops every memo entry for `file`, as importer or as imported file.
    pub fn invalidate_file(&self, file: &str) {
        if let Ok(mut cache) = self.top_level_objects.write() {
            let stale: Vec<(String, String)> = cache
                .iter()
                .filter(|((target, importer), _)| target == file || importer == file)
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
        if let Ok(mut asts) = self.closed_asts.write() {
            asts.pop(Path::new(file));
        }
    }

    /// Drops all memoised top-level objects, e.g. after the search path changed.
    pub fn clear_top_level_objects(&self) {
        if let Ok(mut cache) = self.top_level_objects.write() {
            cache.clear();
        }
    }

    // ========================================================================
    // ASTs by path
    // ========================================================================

    /// AST for a file: the open document's when there is one, otherwise the
    /// file on disk (cached while its modification time is unchanged).
    pub fn ast_for_path(&self, path: &Path) -> Option<NodeRef> {
        let filename = path.to_string_lossy();
        if let Some(doc) = self.find_by_filename(&filename) {
            return doc.ast.clone();
        }
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if let Some((stamp, ast)) = self.closed_asts.read().ok()?.peek(path) {
            if *stamp == modified {
                return Some(ast.clone());
            }
        }
        let text = std::fs::read_to_string(path).ok()?;
        match parse(&filename, &text) {
            Ok(ast) => {
                if let Ok(mut asts) = self.closed_asts.write() {
                    asts.push(path.to_path_buf(), (modified, ast.clone()));
                }
                Some(ast)
            }
            Err(err) => {
                log::debug!("skipping {}: {}", path.display(), err);
                None
            }
        }
    }
}

fn slice_range(text: &str, range: Range) -> anyhow::Result<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    let (start, end) = (range.start.line as usize, range.end.line as usize);
    if start >= lines.len() {
        return Err(anyhow!(
            "line {} out of range (document has {} lines)",
            range.start.line,
            lines.len()
        ));
    }
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate().take(end + 1).skip(start) {
        let from = if i == start {
            utf16_column_to_byte_offset(line, range.start.character)
        } else {
            0
        };
        let to = if i == end {
            utf16_column_to_byte_offset(line, range.end.character)
        } else {
            line.len()
        };
        out.push_str(&line[from..to.max(from)]);
        if i != end {
            out.push('\n');
        }
    }
    Ok(out)
}
