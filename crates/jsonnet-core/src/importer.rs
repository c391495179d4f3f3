//
// importer.rs
//
// Resolution of import paths against the importing file and the search path
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ImportError {
    #[error("couldn't open import \"{path}\": no match locally or in the Jsonnet library paths")]
    NotFound { path: String },

    #[error("couldn't read import \"{path}\": {message}")]
    Io { path: String, message: String },
}

/// Contents of a resolved import.
#[derive(Debug, Clone)]
pub struct Imported {
    pub path: PathBuf,
    pub contents: Arc<[u8]>,
}

pub trait Importer: Send + Sync {
    /// Resolves `path` as written in `importer_file` and returns its contents.
    fn import(&self, importer_file: &str, path: &str) -> Result<Imported, ImportError>;
}

/// Candidate locations for `path`, in the order they are tried: the importing
/// file's directory first, then the search path from last to first.
pub fn candidate_paths(importer_file: &str, path: &str, jpaths: &[PathBuf]) -> Vec<PathBuf> {
    let requested = Path::new(path);
    if requested.is_absolute() {
        return vec![requested.to_path_buf()];
    }
    let mut out = Vec::with_capacity(jpaths.len() + 1);
    let dir = Path::new(importer_file)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    out.push(dir.join(requested));
    for jpath in jpaths.iter().rev() {
        out.push(jpath.join(requested));
    }
    out
}

/// Reads imports from disk, caching contents per resolved path.
#[derive(Debug, Default)]
pub struct FileImporter {
    jpaths: Vec<PathBuf>,
    cache: Mutex<HashMap<PathBuf, Arc<[u8]>>>,
}

impl FileImporter {
    pub fn new(jpaths: Vec<PathBuf>) -> Self {
        Self {
            jpaths,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn jpaths(&self) -> &[PathBuf] {
        &self.jpaths
    }

    fn read(&self, path: &Path) -> Result<Option<Arc<[u8]>>, ImportError> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(contents) = cache.get(path) {
                return Ok(Some(contents.clone()));
            }
        }
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(path).map_err(|e| ImportError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let contents: Arc<[u8]> = Arc::from(bytes);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_path_buf(), contents.clone());
        }
        Ok(Some(contents))
    }
}

impl Importer for FileImporter {
    fn import(&self, importer_file: &str, path: &str) -> Result<Imported, ImportError> {
        for candidate in candidate_paths(importer_file, path, &self.jpaths) {
            if let Some(contents) = self.read(&candidate)? {
                log::trace!("import {} resolved to {}", path, candidate.display());
                return Ok(Imported {
                    path: candidate,
                    contents,
                });
            }
        }
        Err(ImportError::NotFound {
            path: path.to_string(),
        })
    }
}

/// Serves imports from an in-memory map keyed by resolved path.
#[derive(Debug, Default)]
pub struct MemoryImporter {
    jpaths: Vec<PathBuf>,
    files: HashMap<PathBuf, Arc<[u8]>>,
}

impl MemoryImporter {
    pub fn new(jpaths: Vec<PathBuf>) -> Self {
        Self {
            jpaths,
            files: HashMap::new(),
        }
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, contents: &str) {
        self.files
            .insert(path.into(), Arc::from(contents.as_bytes().to_vec()));
    }
}

impl Importer for MemoryImporter {
    fn import(&self, importer_file: &str, path: &str) -> Result<Imported, ImportError> {
        candidate_paths(importer_file, path, &self.jpaths)
            .into_iter()
            .find_map(|candidate| {
                self.files.get(&candidate).map(|contents| Imported {
                    contents: contents.clone(),
                    path: candidate,
                })
            })
            .ok_or_else(|| ImportError::NotFound {
                path: path.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_candidates_prefer_importer_dir_then_last_jpath() {
        let jpaths = vec![PathBuf::from("/lib/a"), PathBuf::from("/lib/b")];
        let candidates = candidate_paths("/work/main.jsonnet", "x.libsonnet", &jpaths);
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/work/x.libsonnet"),
                PathBuf::from("/lib/b/x.libsonnet"),
                PathBuf::from("/lib/a/x.libsonnet"),
            ]
        );
    }

    #[test]
    fn test_absolute_import_is_used_as_is() {
        let candidates = candidate_paths("/work/main.jsonnet", "/abs/x.libsonnet", &[]);
        assert_eq!(candidates, vec![PathBuf::from("/abs/x.libsonnet")]);
    }

    #[test]
    fn test_file_importer_reads_from_jpath() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("vendor");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("k.libsonnet"), "{ a: 1 }").unwrap();

        let importer = FileImporter::new(vec![lib.clone()]);
        let main = dir.path().join("main.jsonnet");
        let imported = importer
            .import(&main.to_string_lossy(), "k.libsonnet")
            .expect("import should resolve through the jpath");
        assert_eq!(imported.path, lib.join("k.libsonnet"));
        assert_eq!(&*imported.contents, b"{ a: 1 }");
    }

    #[test]
    fn test_file_importer_missing_file() {
        let dir = TempDir::new().unwrap();
        let importer = FileImporter::new(Vec::new());
        let main = dir.path().join("main.jsonnet");
        let err = importer
            .import(&main.to_string_lossy(), "nope.libsonnet")
            .unwrap_err();
        assert!(matches!(err, ImportError::NotFound { .. }));
    }

    #[test]
    fn test_memory_importer() {
        let mut importer = MemoryImporter::new(vec![PathBuf::from("/lib")]);
        importer.add("/lib/a.libsonnet", "{}");
        let imported = importer.import("/src/main.jsonnet", "a.libsonnet").unwrap();
        assert_eq!(imported.path, PathBuf::from("/lib/a.libsonnet"));
    }
}
