//! 保存待ちレコードのバッファ

use super::record::Record;
use parking_lot::Mutex;
use std::sync::Arc;

/// 受信順にレコードを溜め、フラッシュ時にまとめて取り出す
///
/// 追加と取り出しは同じロックで排他されるため、取り出しと並行して追加された
/// レコードは失われず、次回のフラッシュまでバッファに残る。
#[derive(Debug, Clone, Default)]
pub struct PendingBuffer {
    inner: Arc<Mutex<Vec<Record>>>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: Record) {
        self.inner.lock().push(record);
    }

    /// 現時点のレコードをすべて取り出し、バッファを空にする
    pub fn drain(&self) -> Vec<Record> {
        std::mem::take(&mut *self.inner.lock())
    }

    /// 保存に失敗したバッチを先頭に戻す
    pub fn requeue_front(&self, mut batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }
        let mut guard = self.inner.lock();
        batch.append(&mut guard);
        *guard = batch;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// テストや診断用のコピー
    pub fn snapshot(&self) -> Vec<Record> {
        self.inner.lock().clone()
    }
}
