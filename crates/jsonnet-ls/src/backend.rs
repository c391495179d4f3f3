//
// backend.rs
//
// Request dispatch: protocol handlers over the shared world state
//

use std::sync::Arc;

use tokio::sync::RwLock;
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::completion;
use crate::config::Configuration;
use crate::diagnostics::DiagnosticsQueue;
use crate::document_cache::Document;
use crate::handlers;
use crate::inlay;
use crate::semantic_tokens;
use crate::state::WorldState;

const SERVER_NAME: &str = "jsonnet-ls";

fn document_missing(uri: &Url) -> Error {
    let mut error = Error::internal_error();
    error.message = format!("unable to retrieve document from the cache: {uri}").into();
    error
}

pub struct Backend {
    client: Client,
    state: Arc<RwLock<WorldState>>,
    diagnostics: Arc<DiagnosticsQueue>,
}

impl Backend {
    /// Must be called inside a tokio runtime; the diagnostics loop is spawned here.
    pub fn new(client: Client, config: Configuration) -> Self {
        let state = Arc::new(RwLock::new(WorldState::new(config)));
        let (diagnostics, receiver) = DiagnosticsQueue::new();
        tokio::spawn(diagnostics.clone().run(receiver, state.clone(), client.clone()));
        Self {
            client,
            state,
            diagnostics,
        }
    }

    /// Runs `f` on the open document `uri` under a read lock.
    async fn with_document<T>(
        &self,
        uri: &Url,
        f: impl FnOnce(&WorldState, &Document) -> T,
    ) -> Result<T> {
        let state = self.state.read().await;
        let doc = state.cache.get(uri).ok_or_else(|| {
            log::error!("{uri} is not in the document cache");
            document_missing(uri)
        })?;
        Ok(f(&state, &doc))
    }

    /// Queues `uri` and the open documents importing it.
    async fn queue_diagnostics(&self, uri: &Url) {
        let dependents = {
            let state = self.state.read().await;
            let dependents = state.dependents_of(uri);
            for dependent in &dependents {
                state.diagnostics_gate.mark_force_republish(dependent);
            }
            dependents
        };
        self.diagnostics.queue(uri.clone());
        for dependent in dependents {
            self.diagnostics.queue(dependent);
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing {SERVER_NAME} {}", env!("CARGO_PKG_VERSION"));

        let mut state = self.state.write().await;
        if let Some(folders) = params.workspace_folders {
            for folder in folders {
                log::info!("Adding workspace folder: {}", folder.uri);
                if let Ok(path) = folder.uri.to_file_path() {
                    state.config.jpaths.push(path);
                }
                state.workspace_folders.push(folder.uri);
            }
        } else if let Some(root_uri) = params.root_uri {
            log::info!("Adding root URI as workspace folder: {root_uri}");
            state.workspace_folders.push(root_uri);
        }
        drop(state);

        Ok(InitializeResult {
            capabilities: server_capabilities(),
            server_info: Some(ServerInfo {
                name: String::from(SERVER_NAME),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("{SERVER_NAME} initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("{SERVER_NAME} shutting down");
        self.diagnostics.shutdown();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let state = self.state.write().await;
            state.open_document(uri.clone(), &params.text_document.text, params.text_document.version);
        }
        self.queue_diagnostics(&uri).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        // the write guard serialises get, apply and put against other edits
        let changed = {
            let state = self.state.write().await;
            state.change_document(&uri, params.content_changes, params.text_document.version)
        };
        if !changed {
            log::error!("change for {uri} which is not open");
            return;
        }
        self.queue_diagnostics(&uri).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let state = self.state.write().await;
        state.close_document(&params.text_document.uri);
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let (result, open_uris) = {
            let mut state = self.state.write().await;
            let result = state.config.apply_settings(&params.settings);
            let open_uris: Vec<Url> = state.cache.documents().iter().map(|d| d.uri.clone()).collect();
            if result.is_ok() {
                state.cache.clear_top_level_objects();
                for uri in &open_uris {
                    state.diagnostics_gate.mark_force_republish(uri);
                }
            }
            (result, open_uris)
        };

        if let Err(err) = result {
            // notifications cannot answer, so the rejection goes to the user
            let error = Error::invalid_params(format!("{err:#}"));
            log::error!("rejected configuration: {}", error.message);
            self.client
                .show_message(MessageType::ERROR, error.message.to_string())
                .await;
            return;
        }
        for uri in open_uris {
            self.diagnostics.queue(uri);
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let position = params.text_document_position;
        let items = self
            .with_document(&position.text_document.uri, |state, doc| {
                completion::completion(state, doc, position.position)
            })
            .await?;
        Ok(Some(CompletionResponse::Array(items)))
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let position = params.text_document_position_params;
        self.with_document(&position.text_document.uri, |state, doc| {
            handlers::hover(state, doc, position.position)
        })
        .await
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let position = params.text_document_position_params;
        self.with_document(&position.text_document.uri, |state, doc| {
            handlers::signature_help(state, doc, position.position)
        })
        .await
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params;
        self.with_document(&position.text_document.uri, |state, doc| {
            handlers::goto_definition(state, doc, position.position)
        })
        .await
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let position = params.text_document_position;
        let include_declaration = params.context.include_declaration;
        self.with_document(&position.text_document.uri, |state, doc| {
            handlers::references(state, doc, position.position, include_declaration)
        })
        .await
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let position = params.text_document_position;
        self.with_document(&position.text_document.uri, |state, doc| {
            handlers::rename(state, doc, position.position, &params.new_name)
        })
        .await?
        .map_err(|err| Error::invalid_params(err.to_string()))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        self.with_document(&params.text_document.uri, |_, doc| handlers::document_symbol(doc))
            .await
    }

    async fn formatting(&self, params: DocumentFormattingParams) -> Result<Option<Vec<TextEdit>>> {
        self.with_document(&params.text_document.uri, |_, doc| Some(handlers::formatting(doc)))
            .await
    }

    async fn inlay_hint(&self, params: InlayHintParams) -> Result<Option<Vec<InlayHint>>> {
        self.with_document(&params.text_document.uri, |state, doc| {
            Some(inlay::inlay_hints(state, doc, params.range))
        })
        .await
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        self.with_document(&params.text_document.uri, |state, doc| {
            if !state.config.enable_semantic_tokens {
                return Some(SemanticTokensResult::Tokens(SemanticTokens::default()));
            }
            let Some(root) = &doc.ast else {
                log::debug!("{} was never parsed, no semantic tokens", doc.filename);
                return None;
            };
            Some(SemanticTokensResult::Tokens(semantic_tokens::semantic_tokens_full(root)))
        })
        .await
    }
}

/// Capabilities advertised in the `initialize` response.
pub fn server_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
            open_close: Some(true),
            change: Some(TextDocumentSyncKind::FULL),
            ..Default::default()
        })),
        completion_provider: Some(CompletionOptions {
            trigger_characters: Some(vec![String::from("."), String::from("/")]),
            ..Default::default()
        }),
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        definition_provider: Some(OneOf::Left(true)),
        references_provider: Some(OneOf::Left(true)),
        rename_provider: Some(OneOf::Left(true)),
        document_formatting_provider: Some(OneOf::Left(true)),
        document_symbol_provider: Some(OneOf::Left(true)),
        inlay_hint_provider: Some(OneOf::Left(true)),
        signature_help_provider: Some(SignatureHelpOptions {
            trigger_characters: Some(vec![String::from("("), String::from(",")]),
            ..Default::default()
        }),
        semantic_tokens_provider: Some(SemanticTokensServerCapabilities::SemanticTokensOptions(
            SemanticTokensOptions {
                legend: semantic_tokens::legend(),
                full: Some(SemanticTokensFullOptions::Bool(true)),
                range: Some(false),
                ..Default::default()
            },
        )),
        ..Default::default()
    }
}

pub async fn start_lsp(config: Configuration) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| Backend::new(client, config));
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> Url {
        Url::parse("file:///workspace/main.jsonnet").unwrap()
    }

    fn full_change(version: i32) -> DidChangeTextDocumentParams {
        DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier::new(uri(), version),
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: format!("{{ v: {version} }}"),
            }],
        }
    }

    #[test]
    fn test_full_sync_is_advertised() {
        let Some(TextDocumentSyncCapability::Options(sync)) = server_capabilities().text_document_sync
        else {
            panic!("sync options should be advertised");
        };
        assert_eq!(sync.change, Some(TextDocumentSyncKind::FULL));
        assert_eq!(sync.open_close, Some(true));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_changes_keep_newest_version() {
        let (service, _socket) = LspService::new(|client| Backend::new(client, Configuration::default()));
        let backend = service.inner();
        backend
            .did_open(DidOpenTextDocumentParams {
                text_document: TextDocumentItem::new(uri(), "jsonnet".into(), 1, "{ v: 1 }".into()),
            })
            .await;

        for round in 0..25 {
            let base = 2 + round * 4;
            // delivered newest first, so older versions must not overwrite
            tokio::join!(
                backend.did_change(full_change(base + 3)),
                backend.did_change(full_change(base + 1)),
                backend.did_change(full_change(base + 2)),
                backend.did_change(full_change(base)),
            );
            let state = backend.state.read().await;
            let doc = state.cache.get(&uri()).expect("document stays open");
            assert_eq!(doc.version, base + 3, "round {round}");
            assert_eq!(doc.text(), format!("{{ v: {} }}", base + 3), "round {round}");
            assert!(doc.parse_error.is_none());
        }

        backend
            .did_close(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier::new(uri()),
            })
            .await;
        assert!(backend.state.read().await.cache.get(&uri()).is_none());
    }
}
