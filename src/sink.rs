//! 永続化先の抽象
//!
//! バッファのフラッシュと開播・下播の即時記録はすべて [`RecordSink`] を経由する。
//! SQLite実装は [`crate::database::SqliteSink`]。

use crate::error::{IngestError, IngestResult};
use crate::ingest::record::{Record, SessionClose, SessionOpen};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// レコードの追記専用ストア
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// 受信順のバッチを保存する
    async fn persist_batch(&self, batch: &[Record]) -> IngestResult<()>;

    /// 開播を即時保存する
    async fn open_session(&self, session: &SessionOpen) -> IngestResult<()>;

    /// 下播を即時保存する
    async fn close_session(&self, session: &SessionClose) -> IngestResult<()>;

    /// 下播記録のないセッション `(room_id, start)` を返す
    async fn load_open_sessions(&self) -> IngestResult<Vec<(u64, i64)>> {
        Ok(Vec::new())
    }
}

/// メモリ上に保存するシンク（テスト・組み込み用）
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<Record>>>,
    opened: Mutex<Vec<SessionOpen>>,
    closed: Mutex<Vec<SessionClose>>,
    persist_calls: AtomicUsize,
    fail_persist: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `true` の間 `persist_batch` を失敗させる
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.batches.lock().clone()
    }

    /// 保存済みレコードを保存順に平坦化
    pub fn records(&self) -> Vec<Record> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn opened(&self) -> Vec<SessionOpen> {
        self.opened.lock().clone()
    }

    pub fn closed(&self) -> Vec<SessionClose> {
        self.closed.lock().clone()
    }

    /// 失敗した呼び出しも含む `persist_batch` の呼び出し回数
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn persist_batch(&self, batch: &[Record]) -> IngestResult<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(IngestError::sink("memory sink configured to fail"));
        }
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }

    async fn open_session(&self, session: &SessionOpen) -> IngestResult<()> {
        self.opened.lock().push(session.clone());
        Ok(())
    }

    async fn close_session(&self, session: &SessionClose) -> IngestResult<()> {
        self.closed.lock().push(session.clone());
        Ok(())
    }

    async fn load_open_sessions(&self) -> IngestResult<Vec<(u64, i64)>> {
        let closed = self.closed.lock();
        Ok(self
            .opened
            .lock()
            .iter()
            .filter(|open| {
                !closed
                    .iter()
                    .any(|c| c.room_id == open.room_id && c.start == open.start)
            })
            .map(|open| (open.room_id, open.start))
            .collect())
    }
}

/// ログに出力するだけのシンク（`--dry-run`）
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl RecordSink for LogSink {
    async fn persist_batch(&self, batch: &[Record]) -> IngestResult<()> {
        for record in batch {
            tracing::info!(
                room_id = record.room_id,
                kind = %record.kind,
                actor = %record.actor_name,
                value = record.value,
                session_start = record.session_start,
                "🗒️ {}",
                record.payload
            );
        }
        Ok(())
    }

    async fn open_session(&self, session: &SessionOpen) -> IngestResult<()> {
        tracing::info!(room_id = session.room_id, start = session.start, "🗒️ session open");
        Ok(())
    }

    async fn close_session(&self, session: &SessionClose) -> IngestResult<()> {
        tracing::info!(
            room_id = session.room_id,
            start = session.start,
            end = session.end,
            revenue = session.totals.revenue(),
            "🗒️ session close"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::record::{EventKind, SessionTotals};

    fn open(room_id: u64, start: i64) -> SessionOpen {
        SessionOpen {
            room_id,
            streamer_name: "A".into(),
            streamer_uid: 2,
            title: "T".into(),
            cover: "c".into(),
            start,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_open_sessions() {
        let sink = MemorySink::new();
        sink.open_session(&open(1, 100)).await.unwrap();
        sink.open_session(&open(2, 200)).await.unwrap();
        sink.close_session(&SessionClose {
            room_id: 1,
            start: 100,
            end: 150,
            totals: SessionTotals::default(),
        })
        .await
        .unwrap();

        assert_eq!(sink.load_open_sessions().await.unwrap(), vec![(2, 200)]);
    }

    #[tokio::test]
    async fn test_memory_sink_failure_toggle() {
        let sink = MemorySink::new();
        let record = Record {
            room_id: 1,
            timestamp: 1,
            actor_name: "bob".into(),
            actor_id: 5,
            payload: "hi".into(),
            kind: EventKind::Chat,
            value: 0.0,
            session_start: 0,
        };

        sink.set_fail_persist(true);
        assert!(sink.persist_batch(&[record.clone()]).await.is_err());
        sink.set_fail_persist(false);
        sink.persist_batch(&[record]).await.unwrap();

        assert_eq!(sink.persist_calls(), 2);
        assert_eq!(sink.records().len(), 1);
    }
}
