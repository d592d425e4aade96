//! 定期フラッシュ
//!
//! 受信ループとは独立したタイマーで [`PendingBuffer`] を取り出し、シンクへ渡す。
//! 前回のフラッシュが終わらないうちに次のティックが来た場合は並行実行を許すが、
//! 同時実行数が上限に達していればそのティックは読み飛ばす（キューイングしない）。

use super::buffer::PendingBuffer;
use crate::config::FlushConfig;
use crate::error::IngestResult;
use crate::sink::RecordSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// バッファを1回フラッシュする
///
/// 空なら何もせず 0 を返す。シンクが失敗した場合はバッチをバッファの先頭に戻し、
/// 次回のフラッシュで再試行させる。
pub async fn flush_once(buffer: &PendingBuffer, sink: &dyn RecordSink) -> IngestResult<usize> {
    let batch = buffer.drain();
    if batch.is_empty() {
        return Ok(0);
    }

    let count = batch.len();
    match sink.persist_batch(&batch).await {
        Ok(()) => {
            info!("💾 Saved {} buffered records", count);
            Ok(count)
        }
        Err(e) => {
            error!(count, "❌ Failed to persist batch, requeued for retry: {}", e);
            buffer.requeue_front(batch);
            Err(e)
        }
    }
}

#[derive(Clone)]
pub struct FlushScheduler {
    buffer: PendingBuffer,
    sink: Arc<dyn RecordSink>,
    interval: Duration,
    max_concurrent: usize,
    permits: Arc<Semaphore>,
}

impl FlushScheduler {
    pub fn new(
        buffer: PendingBuffer,
        sink: Arc<dyn RecordSink>,
        interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            buffer,
            sink,
            interval,
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub fn from_config(
        buffer: PendingBuffer,
        sink: Arc<dyn RecordSink>,
        config: &FlushConfig,
    ) -> Self {
        Self::new(buffer, sink, config.interval(), config.max_concurrent)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 実行中のフラッシュ数
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// 1ティック分のフラッシュを起動する
    ///
    /// 同時実行数が上限なら `None`（このティックは読み飛ばし）。
    pub fn tick(&self) -> Option<JoinHandle<IngestResult<usize>>> {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    max_concurrent = self.max_concurrent,
                    pending = self.buffer.len(),
                    "⏭️ Flush skipped: previous flushes still running"
                );
                return None;
            }
        };

        let buffer = self.buffer.clone();
        let sink = Arc::clone(&self.sink);
        Some(tokio::spawn(async move {
            let result = flush_once(&buffer, sink.as_ref()).await;
            drop(permit);
            result
        }))
    }

    /// 実行中のフラッシュがすべて終わるのを待ってから即座にフラッシュする
    /// （終了時の最終フラッシュ用）
    ///
    /// 実行中のフラッシュが失敗して先頭に戻したバッチもここで保存し直す。
    pub async fn flush_now(&self) -> IngestResult<usize> {
        let _permits = self
            .permits
            .acquire_many(self.max_concurrent as u32)
            .await
            .map_err(|e| crate::error::IngestError::sink(format!("flush permits closed: {}", e)))?;
        flush_once(&self.buffer, self.sink.as_ref()).await
    }

    /// タイマータスクを起動する
    ///
    /// 最初のフラッシュは起動から1間隔後。
    pub fn spawn(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval の初回ティックは即時に完了する
            interval.tick().await;

            info!(
                interval_secs = scheduler.interval.as_secs_f64(),
                max_concurrent = scheduler.max_concurrent,
                "⏱️ Flush scheduler started"
            );

            loop {
                interval.tick().await;
                // 結果はタスク内でログ済み
                let _ = scheduler.tick();
            }
        })
    }
}
