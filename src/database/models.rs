use crate::ingest::record::SessionTotals;
use serde::{Deserialize, Serialize};

/// 保存済みの直播セッション
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub room_id: u64,
    pub start: i64,
    /// 下播していなければNone
    pub end: Option<i64>,
    pub streamer_name: String,
    pub streamer_uid: u64,
    pub title: String,
    pub cover: String,
    pub totals: SessionTotals,
}

impl StoredSession {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// 配信時間（秒）
    pub fn duration_secs(&self) -> Option<i64> {
        self.end.map(|end| end - self.start)
    }
}
