//
// lib.rs
//
// Jsonnet language server. The binary in main.rs only parses arguments and
// starts the backend; benches/ and tests/ use the modules directly.
//

pub mod backend;
pub mod calls;
pub mod completion;
pub mod config;
pub mod cst;
pub mod diagnostics;
pub mod document_cache;
pub mod handlers;
pub mod inlay;
pub mod nodestack;
pub mod nodetree;
pub mod position;
pub mod processing;
pub mod recovery;
pub mod semantic_tokens;
pub mod state;
pub mod stdlib;
pub mod utf16;
pub mod vm;

// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
