//
// diagnostics.rs
//
// Parse, evaluation and lint diagnostics, computed in the background
//

use std::path::Path;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use jsonnet_core::ast::{children, free_variables, Bind, LocationRange, NodeKind, NodeRef};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, DiagnosticTag, Position, Range, Url};
use tower_lsp::Client;

use crate::config::Configuration;
use crate::document_cache::Document;
use crate::position::range_ast_to_protocol;
use crate::state::WorldState;
use crate::vm::make_vm;

const SOURCE: &str = "jsonnet";

fn diagnostic(range: Range, severity: DiagnosticSeverity, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(severity),
        source: Some(SOURCE.to_string()),
        message,
        ..Diagnostic::default()
    }
}

/// Range of `loc` when it points into `filename`, else the document start.
fn range_in(loc: Option<&LocationRange>, filename: &str) -> Range {
    match loc {
        Some(loc) if loc.is_set() && &*loc.file == filename => range_ast_to_protocol(loc),
        _ => Range::new(Position::new(0, 0), Position::new(0, 0)),
    }
}

fn eval_diagnostics(config: &Configuration, doc: &Document, root: &NodeRef) -> Vec<Diagnostic> {
    // a function at the top level needs arguments to evaluate
    if matches!(root.kind, NodeKind::Function { .. }) {
        return Vec::new();
    }
    let vm = make_vm(config, Path::new(&doc.filename));
    match vm.evaluate_node(root) {
        Ok(_) => Vec::new(),
        Err(err) => {
            log::debug!("{}: evaluation failed: {err}", doc.filename);
            let mut message = err.message();
            if let Some(loc) = err.location().filter(|l| &*l.file != doc.filename.as_str()) {
                message = format!("{loc}: {message}");
            }
            vec![diagnostic(
                range_in(err.location(), &doc.filename),
                DiagnosticSeverity::ERROR,
                message,
            )]
        }
    }
}

/// Binds of a scope that nothing in the scope refers to.
fn unused_binds<'a>(binds: &'a [Bind], users: &[&NodeRef]) -> Vec<&'a Bind> {
    binds
        .iter()
        .enumerate()
        .filter(|(i, bind)| {
            let used_by_body = users
                .iter()
                .any(|user| free_variables(user).contains(&bind.variable));
            let used_by_bind = binds
                .iter()
                .enumerate()
                .any(|(j, other)| j != *i && free_variables(&other.body).contains(&bind.variable));
            !used_by_body && !used_by_bind
        })
        .map(|(_, bind)| bind)
        .collect()
}

fn collect_unused(node: &NodeRef, out: &mut Vec<Diagnostic>) {
    let unused = match &node.kind {
        NodeKind::Local { binds, body } => unused_binds(binds, &[body]),
        NodeKind::DesugaredObject { asserts, fields, locals } => {
            let mut users: Vec<&NodeRef> = fields.iter().map(|f| &f.body).collect();
            for assert in asserts {
                users.push(&assert.cond);
                users.extend(assert.message.iter());
            }
            unused_binds(locals, &users)
        }
        _ => Vec::new(),
    };
    for bind in unused {
        if !bind.variable_loc.is_set() {
            continue;
        }
        let mut warning = diagnostic(
            range_ast_to_protocol(&bind.variable_loc),
            DiagnosticSeverity::WARNING,
            format!("unused variable: {}", bind.variable),
        );
        warning.tags = Some(vec![DiagnosticTag::UNNECESSARY]);
        out.push(warning);
    }
    for child in children(node) {
        collect_unused(child, out);
    }
}

pub fn lint_diagnostics(root: &NodeRef) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    collect_unused(root, &mut out);
    out
}

/// Everything reported for `doc`: the parse error if there is one,
/// otherwise evaluation and lint findings as configured.
pub fn collect_diagnostics(config: &Configuration, doc: &Document) -> Vec<Diagnostic> {
    if let Some(err) = &doc.parse_error {
        return vec![diagnostic(
            range_in(Some(&err.loc), &doc.filename),
            DiagnosticSeverity::ERROR,
            err.message.clone(),
        )];
    }
    let Some(root) = &doc.ast else {
        return Vec::new();
    };
    let mut diagnostics = Vec::new();
    if config.enable_eval_diagnostics {
        diagnostics.extend(eval_diagnostics(config, doc, root));
    }
    if config.enable_lint_diagnostics {
        diagnostics.extend(lint_diagnostics(root));
    }
    diagnostics
}

/// Coalesces diagnostics requests per URI. A URI queued while it is already
/// being processed is processed once more afterwards.
#[derive(Debug)]
pub struct DiagnosticsQueue {
    sender: mpsc::UnboundedSender<Url>,
    pending: DashSet<Url>,
    running: DashMap<Url, ()>,
    rerun: DashSet<Url>,
    cancel: CancellationToken,
}

impl DiagnosticsQueue {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Url>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            sender,
            pending: DashSet::new(),
            running: DashMap::new(),
            rerun: DashSet::new(),
            cancel: CancellationToken::new(),
        });
        (queue, receiver)
    }

    pub fn queue(&self, uri: Url) {
        if !self.pending.insert(uri.clone()) {
            log::trace!("diagnostics for {uri} already queued");
            return;
        }
        if self.sender.send(uri).is_err() {
            log::debug!("diagnostics loop has stopped");
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Receives queued URIs until shutdown, publishing through `client`.
    pub async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<Url>,
        state: Arc<RwLock<WorldState>>,
        client: Client,
    ) {
        log::info!("diagnostics loop started");
        loop {
            let uri = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(uri) => uri,
                    None => break,
                },
            };
            self.pending.remove(&uri);
            if self.running.insert(uri.clone(), ()).is_some() {
                self.rerun.insert(uri);
                continue;
            }
            let queue = self.clone();
            let state = state.clone();
            let client = client.clone();
            tokio::spawn(async move {
                loop {
                    publish(&state, &client, &uri).await;
                    if queue.rerun.remove(&uri).is_none() {
                        break;
                    }
                }
                queue.running.remove(&uri);
                if queue.rerun.remove(&uri).is_some() {
                    queue.queue(uri);
                }
            });
        }
        log::info!("diagnostics loop stopped");
    }
}

async fn publish(state: &Arc<RwLock<WorldState>>, client: &Client, uri: &Url) {
    let snapshot = {
        let state = state.read().await;
        state.cache.get(uri).map(|doc| (doc, state.config.clone()))
    };
    let Some((doc, config)) = snapshot else {
        log::trace!("{uri} closed before diagnostics ran");
        return;
    };
    let version = doc.version;
    let diagnostics = match tokio::task::spawn_blocking(move || collect_diagnostics(&config, &doc)).await {
        Ok(diagnostics) => diagnostics,
        Err(err) => {
            log::error!("diagnostics task for {uri} failed: {err}");
            return;
        }
    };

    {
        let state = state.read().await;
        if !state.diagnostics_gate.can_publish(uri, version) {
            log::trace!("skipping stale diagnostics for {uri} v{version}");
            return;
        }
        state.diagnostics_gate.record_publish(uri, version);
    }
    client
        .publish_diagnostics(uri.clone(), diagnostics, Some(version))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new(Url::parse("file:///workspace/d.jsonnet").unwrap(), text, 1)
    }

    fn messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.message.as_str()).collect()
    }

    #[test]
    fn test_parse_error_is_reported() {
        let diagnostics = collect_diagnostics(&Configuration::default(), &doc("{ a: 1,\n  b: }"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));
        assert_eq!(diagnostics[0].range.start.line, 1, "error points at the broken line");
    }

    #[test]
    fn test_eval_error_needs_opt_in() {
        let text = "{ a: error 'boom' }";
        assert!(collect_diagnostics(&Configuration::default(), &doc(text)).is_empty());

        let mut config = Configuration::default();
        config.enable_eval_diagnostics = true;
        let diagnostics = collect_diagnostics(&config, &doc(text));
        assert_eq!(messages(&diagnostics), vec!["boom"]);
    }

    #[test]
    fn test_top_level_function_is_not_evaluated() {
        let mut config = Configuration::default();
        config.enable_eval_diagnostics = true;
        assert!(collect_diagnostics(&config, &doc("function(x) x.missing")).is_empty());
    }

    #[test]
    fn test_unused_locals() {
        let mut config = Configuration::default();
        config.enable_lint_diagnostics = true;
        let text = "local used = 1, unused = 2, chained = used;\n{ local hidden = 3, a: chained }";
        let diagnostics = collect_diagnostics(&config, &doc(text));
        assert_eq!(
            messages(&diagnostics),
            vec!["unused variable: unused", "unused variable: hidden"]
        );
        assert_eq!(diagnostics[0].range.start, Position::new(0, 16));
        assert_eq!(diagnostics[0].tags, Some(vec![DiagnosticTag::UNNECESSARY]));
    }

    #[test]
    fn test_self_reference_does_not_count_as_use() {
        let text = "local loop(n) = if n == 0 then 0 else loop(n - 1); 1";
        let diagnostics = lint_diagnostics(&jsonnet_core::parse("d.jsonnet", text).unwrap());
        assert_eq!(messages(&diagnostics), vec!["unused variable: loop"]);
    }

    #[tokio::test]
    async fn test_queue_coalesces_pending_uris() {
        let (queue, mut receiver) = DiagnosticsQueue::new();
        let uri = Url::parse("file:///workspace/q.jsonnet").unwrap();
        queue.queue(uri.clone());
        queue.queue(uri.clone());
        assert_eq!(receiver.recv().await, Some(uri.clone()));
        assert!(receiver.try_recv().is_err(), "second request is coalesced");

        queue.pending.remove(&uri);
        queue.queue(uri.clone());
        assert_eq!(receiver.recv().await, Some(uri));
    }
}
