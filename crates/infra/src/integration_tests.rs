//! Integration tests for the scan → parse → ledger pipeline.
//!
//! Verifies:
//! - Engine fallback and failure reporting through the adapter
//! - A failed scan still allows check-in
//! - Concurrent check-outs never overdraw stock
//! - Cancelled scans and movements leave nothing behind

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::Notify;

    use winebox_core::{TransactionId, WineId};
    use winebox_inventory::{
        net_quantity, InventoryRecord, Transaction, TransactionType, Wine, UNKNOWN_WINE_NAME,
    };
    use winebox_label::{EngineKind, LabelParser, StructuredLabel};

    use crate::cellar::{CellarError, CellarService, CheckInRequest};
    use crate::config::{LedgerConfig, ScanConfig};
    use crate::ledger::{InventoryLedger, LedgerError};
    use crate::ocr::image::tiny_png;
    use crate::ocr::{
        EngineError, LabelImage, LabelImages, LocalOcrClient, OcrAdapter, ScanError, VisionClient,
    };
    use crate::store::{
        InMemoryLedgerStore, LedgerCommit, LedgerStore, Pagination, StoreError, TransactionFilter,
        TransactionPage,
    };

    enum VisionBehaviour {
        Answer(StructuredLabel),
        Hang,
        Fail(EngineError),
    }

    struct FakeVision {
        behaviour: VisionBehaviour,
        calls: AtomicUsize,
    }

    impl FakeVision {
        fn new(behaviour: VisionBehaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionClient for FakeVision {
        async fn read_label(
            &self,
            _front: &LabelImage,
            _back: Option<&LabelImage>,
        ) -> Result<StructuredLabel, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                VisionBehaviour::Answer(label) => Ok(label.clone()),
                VisionBehaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(EngineError::EmptyResponse)
                }
                VisionBehaviour::Fail(err) => Err(err.clone()),
            }
        }
    }

    struct FakeLocal {
        result: Result<&'static str, EngineError>,
        calls: AtomicUsize,
    }

    impl FakeLocal {
        fn new(result: Result<&'static str, EngineError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LocalOcrClient for FakeLocal {
        async fn recognize(&self, _image: &LabelImage, _language: &str) -> Result<String, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map(str::to_string)
        }
    }

    fn scan_config(vision_timeout: Duration) -> ScanConfig {
        let mut config = ScanConfig::default();
        config.vision.api_key = Some("test-key".to_string());
        config.vision.timeout = vision_timeout;
        config
    }

    fn adapter(
        config: ScanConfig,
        vision: Option<Arc<FakeVision>>,
        local: Option<Arc<FakeLocal>>,
    ) -> OcrAdapter {
        OcrAdapter::new(
            config,
            vision.map(|v| v as Arc<dyn VisionClient>),
            local.map(|l| l as Arc<dyn LocalOcrClient>),
        )
    }

    fn cellar(adapter: OcrAdapter) -> CellarService<Arc<InMemoryLedgerStore>> {
        CellarService::new(
            adapter,
            LabelParser::with_current_year(2025),
            InventoryLedger::new(Arc::new(InMemoryLedgerStore::new()), LedgerConfig::default()),
        )
    }

    #[tokio::test]
    async fn vision_answer_is_parsed_as_structured_fields() {
        let vision = FakeVision::new(VisionBehaviour::Answer(StructuredLabel {
            name: Some("Château Margaux".to_string()),
            vintage: Some(serde_json::json!(2016)),
            alcohol_percentage: Some(serde_json::json!("13.5%")),
            wine_type: Some("red".to_string()),
            raw_text: Some("CHATEAU MARGAUX\nGRAND VIN\n2016".to_string()),
            ..Default::default()
        }));
        let local = FakeLocal::new(Ok("unused"));
        let cellar = cellar(adapter(
            scan_config(Duration::from_secs(30)),
            Some(vision.clone()),
            Some(local.clone()),
        ));

        let out = cellar.scan(&LabelImages::front(tiny_png())).await.unwrap();
        assert_eq!(out.scan.engine_used, EngineKind::Vision);
        assert_eq!(out.label.name_value(), Some("Château Margaux"));
        assert_eq!(out.label.vintage.map(|v| v.value), Some(2016));
        assert_eq!(out.label.alcohol_percentage.map(|a| a.value), Some(13.5));
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn vision_timeout_falls_back_to_local() {
        let vision = FakeVision::new(VisionBehaviour::Hang);
        let local = FakeLocal::new(Ok("CHATEAU MARGAUX 2016 GRAND VIN"));
        let cellar = cellar(adapter(
            scan_config(Duration::from_secs(30)),
            Some(vision.clone()),
            Some(local.clone()),
        ));

        let out = cellar.scan(&LabelImages::front(tiny_png())).await.unwrap();
        assert_eq!(out.scan.engine_used, EngineKind::Local);
        assert_eq!(out.scan.front_text, "CHATEAU MARGAUX 2016 GRAND VIN");
        assert_eq!(out.label.vintage.map(|v| v.value), Some(2016));
        assert_eq!(vision.calls.load(Ordering::SeqCst), 1);
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_engines_failing_is_scan_unavailable() {
        let vision = FakeVision::new(VisionBehaviour::Fail(EngineError::Http { status: 503 }));
        let local = FakeLocal::new(Err(EngineError::Process("tesseract missing".to_string())));
        let cellar = cellar(adapter(
            scan_config(Duration::from_secs(30)),
            Some(vision.clone()),
            Some(local.clone()),
        ));

        let err = cellar.scan(&LabelImages::front(tiny_png())).await.unwrap_err();
        match err {
            CellarError::Scan(ScanError::ScanUnavailable { vision, local }) => {
                assert!(vision.unwrap().contains("503"));
                assert!(local.unwrap().contains("tesseract missing"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_image_never_reaches_an_engine() {
        let vision = FakeVision::new(VisionBehaviour::Fail(EngineError::Quota));
        let local = FakeLocal::new(Ok("text"));
        let cellar = cellar(adapter(
            scan_config(Duration::from_secs(30)),
            Some(vision.clone()),
            Some(local.clone()),
        ));

        let mut truncated = tiny_png();
        truncated.truncate(12);
        for payload in [Vec::new(), b"plain text, not pixels".to_vec(), truncated] {
            let err = cellar.scan(&LabelImages::front(payload)).await.unwrap_err();
            assert!(matches!(err, CellarError::Scan(ScanError::InvalidImage(_))));
        }
        assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn without_vision_the_local_engine_runs_directly() {
        let vision = FakeVision::new(VisionBehaviour::Fail(EngineError::Quota));
        let local = FakeLocal::new(Ok("BAROLO\n2018\n14.5%"));
        let mut config = scan_config(Duration::from_secs(30));
        config.use_vision = false;
        let cellar = cellar(adapter(config, Some(vision.clone()), Some(local.clone())));

        let out = cellar.scan(&LabelImages::front(tiny_png())).await.unwrap();
        assert_eq!(out.scan.engine_used, EngineKind::Local);
        assert_eq!(out.label.alcohol_percentage.map(|a| a.value), Some(14.5));
        assert_eq!(vision.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_scan_still_allows_check_in() {
        let local = FakeLocal::new(Err(EngineError::Process("boom".to_string())));
        let cellar = cellar(adapter(ScanConfig::default(), None, Some(local)));

        let out = cellar
            .checkin(CheckInRequest {
                images: Some(LabelImages::front(tiny_png())),
                quantity: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(out.wine.display_name(), UNKNOWN_WINE_NAME);
        assert!(out.wine.label.is_empty());
        assert_eq!(out.inventory.quantity, 3);
    }

    #[tokio::test]
    async fn invalid_image_blocks_check_in() {
        let cellar = cellar(adapter(ScanConfig::default(), None, Some(FakeLocal::new(Ok("x")))));
        let err = cellar
            .checkin(CheckInRequest {
                images: Some(LabelImages::front(Vec::new())),
                quantity: 1,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CellarError::Scan(ScanError::InvalidImage(_))));
        let all = cellar
            .ledger()
            .list_transactions(&TransactionFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(all.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_check_in_during_scan_persists_nothing() {
        let vision = FakeVision::new(VisionBehaviour::Hang);
        let local = FakeLocal::new(Ok("OPUS ONE"));
        let cellar = cellar(adapter(
            scan_config(Duration::from_secs(30)),
            Some(vision.clone()),
            Some(local.clone()),
        ));

        let pending = cellar.checkin(CheckInRequest {
            images: Some(LabelImages::front(tiny_png())),
            quantity: 6,
            ..Default::default()
        });
        let outcome = tokio::time::timeout(Duration::from_millis(50), pending).await;

        assert!(outcome.is_err());
        assert_eq!(vision.calls.load(Ordering::SeqCst), 1);
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
        let all = cellar
            .ledger()
            .list_transactions(&TransactionFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(all.total, 0);
    }

    /// Blocks every commit until released; signals when one is waiting.
    struct GatedStore {
        inner: Arc<InMemoryLedgerStore>,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl LedgerStore for GatedStore {
        async fn load_wine(&self, id: WineId) -> Result<Option<Wine>, StoreError> {
            self.inner.load_wine(id).await
        }
        async fn save_wine(&self, wine: &Wine) -> Result<(), StoreError> {
            self.inner.save_wine(wine).await
        }
        async fn update_wine(
            &self,
            wine: &Wine,
            expected_updated_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.update_wine(wine, expected_updated_at).await
        }
        async fn load_inventory(&self, wine_id: WineId) -> Result<Option<InventoryRecord>, StoreError> {
            self.inner.load_inventory(wine_id).await
        }
        async fn load_transactions(&self, wine_id: WineId) -> Result<Vec<Transaction>, StoreError> {
            self.inner.load_transactions(wine_id).await
        }
        async fn list_transactions(
            &self,
            filter: &TransactionFilter,
            page: Pagination,
        ) -> Result<TransactionPage, StoreError> {
            self.inner.list_transactions(filter, page).await
        }
        async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
            self.inner.get_transaction(id).await
        }
        async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.commit(commit).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn aborted_check_out_leaves_stock_and_history_untouched() {
        let inner = Arc::new(InMemoryLedgerStore::new());
        let wine_id = WineId::new();
        InventoryLedger::new(inner.clone(), LedgerConfig::default())
            .check_in(wine_id, 5, None)
            .await
            .unwrap();

        let gated = Arc::new(InventoryLedger::new(
            GatedStore {
                inner: inner.clone(),
                entered: Notify::new(),
                release: Notify::new(),
            },
            LedgerConfig::default(),
        ));

        let task = {
            let ledger = gated.clone();
            tokio::spawn(async move { ledger.check_out(wine_id, 2, None).await })
        };
        gated.store().entered.notified().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        // a late release finds no waiting commit
        gated.store().release.notify_waiters();

        assert_eq!(gated.inventory(wine_id).await.unwrap().quantity, 5);
        assert_eq!(gated.history(wine_id).await.unwrap().len(), 1);
        let stored = inner.load_inventory(wine_id).await.unwrap().unwrap();
        assert_eq!((stored.quantity, stored.version), (5, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_check_outs_never_overdraw() {
        for _ in 0..20 {
            let store = Arc::new(InMemoryLedgerStore::new());
            let ledger = Arc::new(InventoryLedger::new(store, LedgerConfig::default()));
            let wine_id = WineId::new();
            ledger.check_in(wine_id, 5, None).await.unwrap();

            let a = tokio::spawn({
                let ledger = Arc::clone(&ledger);
                async move { ledger.check_out(wine_id, 3, None).await }
            });
            let b = tokio::spawn({
                let ledger = Arc::clone(&ledger);
                async move { ledger.check_out(wine_id, 3, None).await }
            });
            let results = [a.await.unwrap(), b.await.unwrap()];

            let successes = results.iter().filter(|r| r.is_ok()).count();
            let refused = results
                .iter()
                .filter(|r| {
                    matches!(
                        r,
                        Err(LedgerError::InsufficientStock {
                            available: 2,
                            requested: 3,
                            ..
                        })
                    )
                })
                .count();
            assert_eq!((successes, refused), (1, 1), "{results:?}");

            assert_eq!(ledger.inventory(wine_id).await.unwrap().quantity, 2);
            let history = ledger.history(wine_id).await.unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(net_quantity(&history), 2);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_check_ins_all_land() {
        let ledger = Arc::new(InventoryLedger::new(
            Arc::new(InMemoryLedgerStore::new()),
            LedgerConfig {
                max_conflict_retries: 64,
                ..LedgerConfig::default()
            },
        ));
        let wine_id = WineId::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.check_in(wine_id, 1, None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let history = ledger.history(wine_id).await.unwrap();
        let sequences: Vec<u64> = history.iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, (1..=8).collect::<Vec<_>>());
        assert_eq!(ledger.reconcile(wine_id).await.unwrap().stored, 8);
    }

    #[tokio::test]
    async fn full_round_trip_through_the_cellar() {
        let local = FakeLocal::new(Ok("DOMAINE LEFLAIVE\nPULIGNY-MONTRACHET\n2019\n13%"));
        let cellar = cellar(adapter(ScanConfig::default(), None, Some(local)));

        let created = cellar
            .checkin(CheckInRequest {
                images: Some(LabelImages::front(tiny_png())),
                quantity: 6,
                notes: Some("en primeur".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let id = created.wine.id;
        assert_eq!(created.wine.label.vintage.as_ref().map(|v| v.value), Some(2019));

        cellar.checkout(id, 2, Some("dinner".to_string())).await.unwrap();
        cellar.restock(id, 1, None).await.unwrap();
        let back_to_start = cellar.checkout(id, 1, None).await.unwrap();
        assert_eq!(back_to_start.inventory.quantity, 4);

        let outs = cellar
            .ledger()
            .list_transactions(
                &TransactionFilter {
                    wine_id: Some(id),
                    kind: Some(TransactionType::CheckOut),
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(outs.total, 2);
        assert_eq!(outs.transactions[0].quantity, 1, "newest first");

        let first = cellar.ledger().history(id).await.unwrap()[0].clone();
        assert_eq!(first.notes.as_deref(), Some("en primeur"));
        assert_eq!(
            cellar.ledger().get_transaction(first.id).await.unwrap(),
            Some(first)
        );

        let report = cellar.ledger().reconcile(id).await.unwrap();
        assert_eq!((report.stored, report.computed), (4, 4));
    }
}
