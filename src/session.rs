//! The analysis session, the crate's front door.
//!
//! One session owns the draft board, the run registry, and handles to the
//! completion service and the catalog store. Callers drive it with plain
//! method calls: scan for instant feedback, analyze to extract orders,
//! edit and save to finish the job. Progress polling and cancellation are
//! safe from any thread.
//!
//! The board lives behind a std mutex that is only ever held for short
//! synchronous sections, never across an await. Analysis results are
//! applied to the board only when their run is still the registry's
//! current one; a superseded run's output is discarded whole.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{CatalogSnapshot, CatalogStore, StoreError};
use crate::completion::CompletionService;
use crate::orders::{BoardError, CardEdit, CardState, DraftOrderCard, OrderBoard};
use crate::pipeline::orchestrator::{
    AnalysisConfig, AnalysisError, Orchestrator, PhaseTranscript,
};
use crate::pipeline::progress::{RunHandle, RunRegistry, RunSnapshot};
use crate::scanner::{scan, ScanReport};

/// How often an in-flight run advances its progress estimate.
const TICK_INTERVAL: Duration = Duration::from_millis(300);

// ---------------------------------------------------------------------------
// Errors and output
// ---------------------------------------------------------------------------

/// Failure of a session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The analysis run itself failed or was cancelled.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    /// The run finished but a newer one had already replaced it.
    #[error("a newer analysis superseded this run")]
    Superseded,
    /// The catalog store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A board operation was rejected.
    #[error(transparent)]
    Board(#[from] BoardError),
}

/// What an analysis run left on the board.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// The board's cards after ingest, in board order.
    pub cards: Vec<DraftOrderCard>,
    /// Raw phase outputs, for diagnostics.
    pub transcript: PhaseTranscript,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A live order-taking session over one catalog.
pub struct AnalysisSession {
    /// Completion backend for analysis runs.
    service: Arc<dyn CompletionService>,
    /// Catalog source and order sink.
    store: Arc<dyn CatalogStore>,
    /// Per-run configuration, cloned into each orchestrator.
    config: AnalysisConfig,
    /// Run identity, progress, and cancellation.
    registry: RunRegistry,
    /// Draft cards from the latest applied run.
    board: Mutex<OrderBoard>,
    /// Catalog snapshot from the latest refresh.
    catalog: Mutex<CatalogSnapshot>,
}

impl std::fmt::Debug for AnalysisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisSession")
            .field("model", &self.service.model_id())
            .finish_non_exhaustive()
    }
}

impl AnalysisSession {
    /// Create a session over a completion service and a catalog store.
    pub fn new(
        service: Arc<dyn CompletionService>,
        store: Arc<dyn CatalogStore>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            service,
            store,
            config,
            registry: RunRegistry::new(),
            board: Mutex::new(OrderBoard::new()),
            catalog: Mutex::new(CatalogSnapshot::default()),
        }
    }

    /// Reload the catalog from the store and cache it for board edits.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    pub async fn refresh_catalog(&self) -> Result<CatalogSnapshot, StoreError> {
        let catalog = self.store.load_catalog().await?;
        *self.lock_catalog() = catalog.clone();
        Ok(catalog)
    }

    /// The catalog snapshot from the latest refresh.
    pub fn catalog(&self) -> CatalogSnapshot {
        self.lock_catalog().clone()
    }

    /// Flag unknown words in a message without calling the model.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the catalog cannot be loaded.
    pub async fn scan(&self, message: &str) -> Result<ScanReport, StoreError> {
        let catalog = self.refresh_catalog().await?;
        Ok(scan(message, &catalog))
    }

    /// Run the full extraction pipeline and apply the result to the board.
    ///
    /// Starting a run cancels any run still in flight; the newest run owns
    /// the board. While the run is live a background ticker nudges its
    /// progress estimate so pollers see movement between phases.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the catalog cannot be loaded, the run
    /// fails or is cancelled, or a newer run supersedes this one before
    /// its result lands.
    pub async fn analyze(&self, message: &str) -> Result<AnalysisReport, SessionError> {
        let catalog = self.refresh_catalog().await?;
        if catalog.is_empty() {
            warn!("catalog is empty; extraction will resolve nothing");
        }

        let handle = self.registry.begin();
        spawn_ticker(handle.clone());

        let orchestrator = Orchestrator::new(Arc::clone(&self.service), self.config.clone());
        let outcome = orchestrator.run(message, &catalog, &handle).await?;

        if !self.registry.is_current(handle.token()) {
            info!("discarding superseded analysis result");
            return Err(SessionError::Superseded);
        }

        let cards = {
            let mut board = self.lock_board();
            board.ingest(outcome.groups, &catalog);
            board.cards().to_vec()
        };
        info!(cards = cards.len(), "analysis applied to board");
        Ok(AnalysisReport {
            cards,
            transcript: outcome.transcript,
        })
    }

    /// Progress of the current run, if any.
    pub fn progress(&self) -> Option<RunSnapshot> {
        self.registry.snapshot()
    }

    /// Request cancellation of the current run.
    ///
    /// Cooperative: an in-flight model call is left to finish, but no
    /// further phase starts and no result reaches the board.
    pub fn cancel(&self) {
        self.registry.cancel_current();
    }

    /// The board's cards, in board order.
    pub fn cards(&self) -> Vec<DraftOrderCard> {
        self.lock_board().cards().to_vec()
    }

    /// Apply one edit to a card, resolving ids against the cached catalog.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError`] when the edit is rejected; the board is
    /// unchanged on error.
    pub fn edit(&self, card_index: usize, edit: CardEdit) -> Result<(), BoardError> {
        let catalog = self.catalog();
        self.lock_board().apply(card_index, edit, &catalog)
    }

    /// Delete a card from the board.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::CardIndex`] when the index is out of range.
    pub fn remove_card(&self, card_index: usize) -> Result<DraftOrderCard, BoardError> {
        self.lock_board().remove(card_index)
    }

    /// Persist one complete card and freeze it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the card is incomplete, already
    /// saved, or the store write fails. A store failure leaves the card
    /// pending and editable.
    pub async fn save_card(&self, card_index: usize) -> Result<String, SessionError> {
        let catalog = self.catalog();
        let order = self.lock_board().to_new_order(card_index, &catalog)?;
        let order_id = self.store.save_order(&order).await?;
        self.lock_board().mark_saved(card_index, order_id.clone())?;
        info!(order_id = %order_id, card = card_index, "order saved");
        Ok(order_id)
    }

    /// Persist every pending card, refusing if any is incomplete.
    ///
    /// All-or-nothing gate, one-by-one writes: the board is only touched
    /// card by card as each write succeeds, so a mid-batch store failure
    /// leaves earlier cards saved and later ones pending.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Incomplete`] for the first incomplete pending
    /// card, or the store failure that interrupted the batch.
    pub async fn save_all(&self) -> Result<Vec<String>, SessionError> {
        let pending: Vec<usize> = {
            let board = self.lock_board();
            for (index, card) in board.cards().iter().enumerate() {
                if card.state == CardState::Pending && !card.is_complete() {
                    return Err(SessionError::Board(BoardError::Incomplete(index)));
                }
            }
            board
                .cards()
                .iter()
                .enumerate()
                .filter(|(_, card)| card.state == CardState::Pending)
                .map(|(index, _)| index)
                .collect()
        };

        let mut order_ids = Vec::with_capacity(pending.len());
        for index in pending {
            order_ids.push(self.save_card(index).await?);
        }
        Ok(order_ids)
    }

    fn lock_board(&self) -> std::sync::MutexGuard<'_, OrderBoard> {
        self.board
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_catalog(&self) -> std::sync::MutexGuard<'_, CatalogSnapshot> {
        self.catalog
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Advance a run's progress estimate until it reaches a terminal stage.
///
/// The task watches the handle it was given, so a ticker from a replaced
/// run exits on its own once that run is cancelled or finished.
fn spawn_ticker(handle: RunHandle) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TICK_INTERVAL).await;
            if handle.stage().is_terminal() {
                break;
            }
            handle.tick();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use crate::catalog::{ClientRecord, NewOrder, ProductRecord};
    use crate::completion::{CompletionError, CompletionOptions};
    use crate::pipeline::progress::RunStage;
    use crate::pipeline::validator::{ExtractedLineItem, ProductRef};

    // ── Mock completion service ────────────────────────────────────────────

    /// Replays scripted replies in arrival order. The first call can be
    /// gated on a oneshot so tests control exactly when it returns.
    struct ScriptedService {
        script: Mutex<VecDeque<Result<String, CompletionError>>>,
        calls: AtomicUsize,
        entered: Mutex<Option<oneshot::Sender<()>>>,
        release: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl ScriptedService {
        fn new(script: Vec<Result<String, CompletionError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                entered: Mutex::new(None),
                release: Mutex::new(None),
            }
        }

        fn gate_first_call(self) -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
            let (entered_tx, entered_rx) = oneshot::channel();
            let (release_tx, release_rx) = oneshot::channel();
            let gated = Self {
                entered: Mutex::new(Some(entered_tx)),
                release: Mutex::new(Some(release_rx)),
                ..self
            };
            (gated, entered_rx, release_tx)
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedService {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, CompletionError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            // Replies are claimed on arrival, before any gate, so each
            // concurrent caller gets a deterministic script entry.
            let reply = self
                .script
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front();
            if index == 0 {
                let entered = self
                    .entered
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .take();
                if let Some(tx) = entered {
                    let _ = tx.send(());
                }
                let release = self
                    .release
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .take();
                if let Some(rx) = release {
                    let _ = rx.await;
                }
            }
            reply.unwrap_or_else(|| Ok("[]".to_owned()))
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    // ── Mock store ─────────────────────────────────────────────────────────

    struct FixtureStore {
        catalog: CatalogSnapshot,
        saved: Mutex<Vec<NewOrder>>,
        fail_saves: bool,
    }

    impl FixtureStore {
        fn new() -> Self {
            Self {
                catalog: CatalogSnapshot {
                    clients: vec![ClientRecord {
                        id: "c1".to_owned(),
                        name: "Juan Perez".to_owned(),
                        phone: None,
                    }],
                    products: vec![ProductRecord {
                        id: "p1".to_owned(),
                        name: "Leche".to_owned(),
                        price: 25.0,
                        variants: vec![],
                    }],
                },
                saved: Mutex::new(Vec::new()),
                fail_saves: false,
            }
        }

        fn saved_count(&self) -> usize {
            self.saved
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .len()
        }
    }

    #[async_trait]
    impl CatalogStore for FixtureStore {
        async fn load_catalog(&self) -> Result<CatalogSnapshot, StoreError> {
            Ok(self.catalog.clone())
        }

        async fn save_order(&self, order: &NewOrder) -> Result<String, StoreError> {
            if self.fail_saves {
                return Err(StoreError::Open("disk full".to_owned()));
            }
            let mut saved = self
                .saved
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            saved.push(order.clone());
            Ok(format!("order-{}", saved.len()))
        }
    }

    // ── Fixtures ───────────────────────────────────────────────────────────

    const JUAN_GROUP: &str = r#"[{
        "client": {"id": "c1", "name": "Juan Perez", "matchConfidence": "high"},
        "items": [{"product": {"id": "p1", "name": "Leche"}, "quantity": 3}]
    }]"#;

    fn session_with(
        script: Vec<Result<String, CompletionError>>,
        store: Arc<FixtureStore>,
    ) -> AnalysisSession {
        let config = AnalysisConfig {
            single_call: true,
            ..AnalysisConfig::default()
        };
        AnalysisSession::new(Arc::new(ScriptedService::new(script)), store, config)
    }

    // ── Tests ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_analyze_populates_board() {
        let store = Arc::new(FixtureStore::new());
        let session = session_with(vec![Ok(JUAN_GROUP.to_owned())], Arc::clone(&store));

        let report = session.analyze("juan 3 leches").await.expect("analysis");
        assert_eq!(report.cards.len(), 1);
        assert!(report.cards[0].is_complete());
        assert_eq!(session.cards().len(), 1);

        let snapshot = session.progress().expect("run snapshot");
        assert_eq!(snapshot.stage, RunStage::Done);
        assert_eq!(snapshot.percent, 100);
    }

    #[tokio::test]
    async fn test_scan_uses_fresh_catalog() {
        let store = Arc::new(FixtureStore::new());
        let session = session_with(vec![], store);

        let report = session.scan("xyz 3 leches").await.expect("scan");
        assert_eq!(report.unknown.len(), 1);
        assert_eq!(report.unknown[0].word, "xyz");
    }

    #[tokio::test]
    async fn test_save_card_persists_and_freezes() {
        let store = Arc::new(FixtureStore::new());
        let session = session_with(vec![Ok(JUAN_GROUP.to_owned())], Arc::clone(&store));
        session.analyze("juan 3 leches").await.expect("analysis");

        let order_id = session.save_card(0).await.expect("save");
        assert_eq!(order_id, "order-1");
        assert_eq!(store.saved_count(), 1);
        assert_eq!(session.cards()[0].state, CardState::Saved);

        let err = session.save_card(0).await.expect_err("already saved");
        assert!(matches!(
            err,
            SessionError::Board(BoardError::AlreadySaved(0))
        ));
    }

    #[tokio::test]
    async fn test_save_all_refuses_incomplete_board() {
        let store = Arc::new(FixtureStore::new());
        let session = session_with(vec![Ok(JUAN_GROUP.to_owned())], Arc::clone(&store));
        session.analyze("juan 3 leches").await.expect("analysis");
        session
            .edit(
                0,
                CardEdit::AddItem {
                    item: ExtractedLineItem {
                        product: ProductRef {
                            id: None,
                            name: "algo raro".to_owned(),
                        },
                        quantity: 1.0,
                        variant: None,
                        status: Default::default(),
                        alternatives: vec![],
                        notes: None,
                    },
                },
            )
            .expect("edit");

        let err = session.save_all().await.expect_err("incomplete item");
        assert!(matches!(
            err,
            SessionError::Board(BoardError::Incomplete(0))
        ));
        assert_eq!(store.saved_count(), 0, "nothing persisted");
    }

    #[tokio::test]
    async fn test_save_all_persists_every_pending_card() {
        let store = Arc::new(FixtureStore::new());
        let session = session_with(vec![Ok(JUAN_GROUP.to_owned())], Arc::clone(&store));
        session.analyze("juan 3 leches").await.expect("analysis");

        let ids = session.save_all().await.expect("save all");
        assert_eq!(ids, vec!["order-1".to_owned()]);
        assert!(session.save_all().await.expect("idempotent").is_empty());
        assert_eq!(store.saved_count(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_card_editable() {
        let mut store = FixtureStore::new();
        store.fail_saves = true;
        let store = Arc::new(store);
        let session = session_with(vec![Ok(JUAN_GROUP.to_owned())], Arc::clone(&store));
        session.analyze("juan 3 leches").await.expect("analysis");

        let err = session.save_card(0).await.expect_err("store down");
        assert!(matches!(err, SessionError::Store(_)));
        assert_eq!(session.cards()[0].state, CardState::Pending);
    }

    #[tokio::test]
    async fn test_cancel_discards_the_run() {
        let store = Arc::new(FixtureStore::new());
        let (service, entered, release) =
            ScriptedService::new(vec![Ok(JUAN_GROUP.to_owned())]).gate_first_call();
        let config = AnalysisConfig {
            single_call: true,
            ..AnalysisConfig::default()
        };
        let session = Arc::new(AnalysisSession::new(Arc::new(service), store, config));

        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.analyze("juan 3 leches").await }
        });
        entered.await.expect("run should reach the model call");
        session.cancel();
        release.send(()).expect("release the call");

        let err = task
            .await
            .expect("join")
            .expect_err("cancelled run must not land");
        assert!(matches!(
            err,
            SessionError::Analysis(AnalysisError::Cancelled)
        ));
        assert!(session.cards().is_empty(), "board untouched");
        let snapshot = session.progress().expect("snapshot");
        assert_eq!(snapshot.stage, RunStage::Cancelled);
    }

    #[tokio::test]
    async fn test_overlapping_run_cannot_clobber_board() {
        let store = Arc::new(FixtureStore::new());
        let second = r#"[{
            "client": {"id": "c1", "name": "Juan Perez", "matchConfidence": "high"},
            "items": [{"product": {"id": "p1", "name": "Leche"}, "quantity": 7}]
        }]"#;
        let (service, entered, release) = ScriptedService::new(vec![
            Ok(JUAN_GROUP.to_owned()),
            Ok(second.to_owned()),
        ])
        .gate_first_call();
        let config = AnalysisConfig {
            single_call: true,
            ..AnalysisConfig::default()
        };
        let session = Arc::new(AnalysisSession::new(Arc::new(service), store, config));

        let stale = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.analyze("juan 3 leches").await }
        });
        entered.await.expect("first run should reach the model call");

        let report = session.analyze("juan 7 leches").await.expect("second run");
        assert_eq!(report.cards[0].items[0].quantity, 7.0);

        release.send(()).expect("release the first call");
        let result = stale.await.expect("join");
        assert!(result.is_err(), "stale run must not land");
        assert_eq!(
            session.cards()[0].items[0].quantity,
            7.0,
            "board keeps the newest run's result"
        );
    }
}
