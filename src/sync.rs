//! Upsert synchronizer: recompute embeddings and write rows, one atomic
//! insert-or-update per document.
//!
//! Encoding fans out over a small worker pool; writes stay sequential. A
//! failure on one document is recorded in the report and the batch moves on,
//! except for lost connectivity, which ends the batch with
//! [`Error::BatchAborted`] carrying the outcomes gathered so far.

use std::fmt;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use tokio_postgres::Statement;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::encoder::HashEncoder;
use crate::error::{Error, Result};
use crate::vector_store::{RefreshScope, VectorStore, WriteKind};

/// Destination for encoded documents.
#[allow(async_fn_in_trait)]
pub trait DocumentSink {
    /// Vector width the sink accepts.
    fn dimension(&self) -> usize;

    /// Inserts or updates `document` with `embedding` atomically.
    async fn write(&self, document: &Document, embedding: &[f32]) -> Result<WriteKind>;
}

/// `VectorStore` paired with its prepared upsert statement.
pub struct PreparedUpsert<'a> {
    store: &'a VectorStore,
    statement: Statement,
}

impl<'a> PreparedUpsert<'a> {
    /// Prepares the upsert statement on `store`'s connection.
    pub async fn new(store: &'a VectorStore) -> Result<Self> {
        let statement = store.prepare_upsert().await?;
        Ok(Self { store, statement })
    }
}

impl DocumentSink for PreparedUpsert<'_> {
    fn dimension(&self) -> usize {
        self.store.dimension()
    }

    async fn write(&self, document: &Document, embedding: &[f32]) -> Result<WriteKind> {
        self.store
            .write_document(&self.statement, document, embedding)
            .await
    }
}

/// Per-document result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    /// New row.
    Inserted,
    /// Existing row updated in place.
    Updated,
    /// Encoding or writing failed.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => f.write_str("inserted"),
            Self::Updated => f.write_str("updated"),
            Self::Failed { reason } => f.write_str(reason),
        }
    }
}

/// Outcome for one document of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentOutcome {
    /// Document id.
    pub id: String,
    /// What happened to it.
    #[serde(flatten)]
    pub status: DocumentStatus,
}

/// Counts and per-document outcomes for one upsert batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    /// Rows created.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Documents that could not be written.
    pub failed: usize,
    /// Outcomes in input order.
    pub outcomes: Vec<DocumentOutcome>,
}

impl UpsertReport {
    fn record(&mut self, id: &str, status: DocumentStatus) {
        match &status {
            DocumentStatus::Inserted => self.inserted += 1,
            DocumentStatus::Updated => self.updated += 1,
            DocumentStatus::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(DocumentOutcome {
            id: id.to_string(),
            status,
        });
    }

    /// Rows inserted or updated.
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    /// Documents processed.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, DocumentStatus::Failed { .. }))
    }

    /// Folds another batch into this one.
    pub fn merge(&mut self, other: UpsertReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.failed += other.failed;
        self.outcomes.extend(other.outcomes);
    }
}

/// Recomputes embeddings and writes documents.
#[derive(Clone, Copy, Debug)]
pub struct Synchronizer {
    encoder: HashEncoder,
    workers: usize,
}

impl Synchronizer {
    /// Synchronizer encoding on the calling thread.
    pub fn new(encoder: HashEncoder) -> Self {
        Self {
            encoder,
            workers: 1,
        }
    }

    /// Number of encoding worker threads (minimum one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Encoder shared with the query path.
    pub fn encoder(&self) -> &HashEncoder {
        &self.encoder
    }

    /// Upserts `documents` into `store`.
    pub async fn upsert(&self, store: &VectorStore, documents: &[Document]) -> Result<UpsertReport> {
        self.check_dimension(store.dimension())?;
        if documents.is_empty() {
            return Ok(UpsertReport::default());
        }
        let sink = PreparedUpsert::new(store).await?;
        self.upsert_into(&sink, documents).await
    }

    /// Re-embeds rows already in `store`.
    pub async fn refresh(&self, store: &VectorStore, scope: RefreshScope) -> Result<UpsertReport> {
        self.check_dimension(store.dimension())?;
        let documents = store.fetch_documents(scope).await?;
        info!(count = documents.len(), scope = ?scope, "refreshing stored embeddings");
        self.upsert(store, &documents).await
    }

    /// Encodes `documents` and writes each one through `sink`.
    pub async fn upsert_into<S: DocumentSink>(
        &self,
        sink: &S,
        documents: &[Document],
    ) -> Result<UpsertReport> {
        self.check_dimension(sink.dimension())?;
        let texts: Vec<&str> = documents.iter().map(Document::canonical_text).collect();
        let embeddings = encode_batch(self.encoder, &texts, self.workers);

        let mut report = UpsertReport::default();
        for (position, (document, embedding)) in documents.iter().zip(embeddings).enumerate() {
            let status = match (validate(document), embedding) {
                (Err(reason), _) => DocumentStatus::Failed { reason },
                (Ok(()), None) => DocumentStatus::Failed {
                    reason: "encoding worker exited before producing a vector".to_string(),
                },
                (Ok(()), Some(embedding)) => match sink.write(document, &embedding).await {
                    Ok(WriteKind::Inserted) => DocumentStatus::Inserted,
                    Ok(WriteKind::Updated) => DocumentStatus::Updated,
                    Err(err) if err.is_connectivity() => {
                        warn!(
                            id = %document.id,
                            written = report.written(),
                            error = %err,
                            "connection lost; aborting batch"
                        );
                        let reason = format!("connection lost: {}", error_chain(&err));
                        for pending in &documents[position..] {
                            report.record(
                                &pending.id,
                                DocumentStatus::Failed {
                                    reason: reason.clone(),
                                },
                            );
                        }
                        return Err(Error::BatchAborted {
                            report: Box::new(report),
                            source: Box::new(err),
                        });
                    }
                    Err(err) => DocumentStatus::Failed {
                        reason: error_chain(&err),
                    },
                },
            };
            if let DocumentStatus::Failed { reason } = &status {
                warn!(id = %document.id, %reason, "document upsert failed");
            }
            report.record(&document.id, status);
        }
        info!(
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            "upsert batch complete"
        );
        Ok(report)
    }

    fn check_dimension(&self, dimension: usize) -> Result<()> {
        if self.encoder.dim() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: self.encoder.dim(),
            });
        }
        Ok(())
    }
}

fn validate(document: &Document) -> std::result::Result<(), String> {
    if document.id.trim().is_empty() {
        return Err("document id must not be empty".to_string());
    }
    Ok(())
}

fn error_chain(err: &Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Encodes `texts` across `workers` threads, preserving input order.
///
/// A slot is `None` only if its worker went away before answering.
pub fn encode_batch(encoder: HashEncoder, texts: &[&str], workers: usize) -> Vec<Option<Vec<f32>>> {
    let workers = workers.clamp(1, texts.len().max(1));
    if workers == 1 {
        return texts.iter().map(|text| Some(encoder.encode(text))).collect();
    }

    let mut results = vec![None; texts.len()];
    let (task_tx, task_rx) = bounded(workers * 2);
    let (result_tx, result_rx) = bounded(workers * 2);
    thread::scope(|scope| {
        for worker_id in 0..workers {
            let worker_rx = task_rx.clone();
            let worker_tx = result_tx.clone();
            scope.spawn(move || worker_loop(worker_id, encoder, worker_rx, worker_tx));
        }
        drop(task_rx);
        drop(result_tx);

        scope.spawn(move || {
            for (index, text) in texts.iter().copied().enumerate() {
                if task_tx.send(EncodeTask { index, text }).is_err() {
                    break;
                }
            }
        });

        for result in result_rx.iter() {
            results[result.index] = Some(result.embedding);
        }
    });
    results
}

fn worker_loop(
    worker_id: usize,
    encoder: HashEncoder,
    receiver: Receiver<EncodeTask<'_>>,
    sender: Sender<EncodeResult>,
) {
    let mut encoded = 0usize;
    for task in receiver.iter() {
        let embedding = encoder.encode(task.text);
        if sender
            .send(EncodeResult {
                index: task.index,
                embedding,
            })
            .is_err()
        {
            break;
        }
        encoded += 1;
    }
    debug!(worker_id, encoded, "encoding worker finished");
}

struct EncodeTask<'a> {
    index: usize,
    text: &'a str,
}

struct EncodeResult {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory sink keyed by id; ids listed in `reject` fail to write.
    struct MemorySink {
        dimension: usize,
        rows: Mutex<HashMap<String, (Document, Vec<f32>)>>,
        reject: Vec<&'static str>,
        disconnect_at: Option<&'static str>,
    }

    impl MemorySink {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                rows: Mutex::new(HashMap::new()),
                reject: Vec::new(),
                disconnect_at: None,
            }
        }

        fn embedding(&self, id: &str) -> Option<Vec<f32>> {
            let rows = self.rows.lock().expect("rows lock");
            rows.get(id).map(|(_, embedding)| embedding.clone())
        }
    }

    impl DocumentSink for MemorySink {
        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn write(&self, document: &Document, embedding: &[f32]) -> Result<WriteKind> {
            if self.reject.iter().any(|id| *id == document.id) {
                return Err(Error::Config(format!("rejected {}", document.id)));
            }
            if self.disconnect_at == Some(document.id.as_str()) {
                return Err(closed_connection_error().await);
            }
            let mut rows = self.rows.lock().expect("rows lock");
            let previous = rows.insert(
                document.id.clone(),
                (document.clone(), embedding.to_vec()),
            );
            Ok(if previous.is_some() {
                WriteKind::Updated
            } else {
                WriteKind::Inserted
            })
        }
    }

    /// Real driver error from a refused connection.
    async fn closed_connection_error() -> Error {
        let source = tokio_postgres::connect(
            "host=127.0.0.1 port=1 user=lexvec connect_timeout=1",
            tokio_postgres::NoTls,
        )
        .await
        .err()
        .expect("nothing listens on port 1");
        Error::Connect {
            target: "127.0.0.1:1".to_string(),
            source,
        }
    }

    fn synchronizer(dim: usize) -> Synchronizer {
        Synchronizer::new(HashEncoder::new(dim).expect("encoder"))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn counts_inserts_and_updates() {
        let sink = MemorySink::new(32);
        let sync = synchronizer(32);
        let docs = vec![
            Document::new("a", "First").with_summary("alpha beta"),
            Document::new("b", "Second"),
        ];
        let first = sync.upsert_into(&sink, &docs).await.expect("first batch");
        assert_eq!((first.inserted, first.updated, first.failed), (2, 0, 0));

        let second = sync.upsert_into(&sink, &docs[..1]).await.expect("second batch");
        assert_eq!((second.inserted, second.updated, second.failed), (0, 1, 0));
        assert_eq!(sink.rows.lock().expect("rows lock").len(), 2);
        assert_eq!(sink.embedding("a"), Some(encode("alpha beta", 32, true)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn embeds_title_when_summary_blank() {
        let sink = MemorySink::new(16);
        synchronizer(16)
            .upsert_into(&sink, &[Document::new("t", "Hello world")])
            .await
            .expect("batch");
        assert_eq!(sink.embedding("t"), Some(encode("Hello world", 16, true)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failures_are_isolated_per_document() {
        let mut sink = MemorySink::new(8);
        sink.reject.push("bad");
        let docs = vec![
            Document::new("ok-1", "one"),
            Document::new("bad", "two"),
            Document::new("  ", "blank id"),
            Document::new("ok-2", "three"),
        ];
        let report = synchronizer(8).upsert_into(&sink, &docs).await.expect("batch");
        assert_eq!((report.inserted, report.updated, report.failed), (2, 0, 2));
        assert_eq!(report.total(), 4);
        let failed: Vec<&str> = report.failures().map(|outcome| outcome.id.as_str()).collect();
        assert_eq!(failed, vec!["bad", "  "]);
        assert_eq!(
            report.outcomes[2].status,
            DocumentStatus::Failed {
                reason: "document id must not be empty".to_string()
            }
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn lost_connection_keeps_committed_outcomes() {
        let mut sink = MemorySink::new(8);
        sink.disconnect_at = Some("b");
        let docs = vec![
            Document::new("a", "one"),
            Document::new("b", "two"),
            Document::new("c", "three"),
        ];
        let err = synchronizer(8)
            .upsert_into(&sink, &docs)
            .await
            .expect_err("batch aborted");
        assert!(err.is_connectivity());
        let Error::BatchAborted { report, source } = err else {
            panic!("expected an aborted batch");
        };
        assert!(matches!(*source, Error::Connect { .. }));
        assert_eq!((report.inserted, report.updated, report.failed), (1, 0, 2));
        assert_eq!(report.written(), 1);
        assert_eq!(
            report.outcomes[0],
            DocumentOutcome {
                id: "a".to_string(),
                status: DocumentStatus::Inserted,
            }
        );
        let failed: Vec<&str> = report.failures().map(|outcome| outcome.id.as_str()).collect();
        assert_eq!(failed, vec!["b", "c"]);
        assert!(report.failures().all(|outcome| matches!(
            &outcome.status,
            DocumentStatus::Failed { reason } if reason.starts_with("connection lost")
        )));
        assert!(sink.embedding("a").is_some());
        assert!(sink.embedding("c").is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejects_dimension_mismatch_before_writing() {
        let sink = MemorySink::new(64);
        let err = synchronizer(32)
            .upsert_into(&sink, &[Document::new("a", "x")])
            .await
            .expect_err("mismatch rejected");
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 64,
                actual: 32
            }
        ));
        assert!(sink.rows.lock().expect("rows lock").is_empty());
    }

    #[test]
    fn worker_pool_preserves_order() {
        let encoder = HashEncoder::new(64).expect("encoder");
        let owned: Vec<String> = (0..50).map(|i| format!("doc {i} text {}", i * 7)).collect();
        let texts: Vec<&str> = owned.iter().map(String::as_str).collect();
        let pooled = encode_batch(encoder, &texts, 4);
        let inline = encode_batch(encoder, &texts, 1);
        assert_eq!(pooled, inline);
        assert!(pooled.iter().all(Option::is_some));
    }

    #[test]
    fn empty_batch_encodes_nothing() {
        let encoder = HashEncoder::new(8).expect("encoder");
        assert!(encode_batch(encoder, &[], 4).is_empty());
    }

    #[test]
    fn status_displays_plain_reason() {
        let failed = DocumentStatus::Failed {
            reason: "document id must not be empty".to_string(),
        };
        assert_eq!(failed.to_string(), "document id must not be empty");
        assert_eq!(DocumentStatus::Updated.to_string(), "updated");
    }

    #[test]
    fn report_serializes_outcomes() {
        let mut report = UpsertReport::default();
        report.record("a", DocumentStatus::Inserted);
        report.record(
            "b",
            DocumentStatus::Failed {
                reason: "boom".to_string(),
            },
        );
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["inserted"], 1);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["outcomes"][0]["status"], "inserted");
        assert_eq!(value["outcomes"][1]["reason"], "boom");

        let mut merged = UpsertReport::default();
        merged.merge(report);
        assert_eq!(merged.total(), 2);
    }
}
