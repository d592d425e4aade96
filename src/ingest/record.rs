//! 永続化されるレコード型

use serde::{Deserialize, Serialize};
use std::fmt;

/// バッファに積まれるイベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Chat,
    Gift,
    Guard,
    SuperChat,
}

impl EventKind {
    /// リレーのコマンド名（DB保存用）
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Chat => "DANMU_MSG",
            EventKind::Gift => "SEND_GIFT",
            EventKind::Guard => "GUARD_BUY",
            EventKind::SuperChat => "SUPER_CHAT_MESSAGE",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "DANMU_MSG" => Some(EventKind::Chat),
            "SEND_GIFT" => Some(EventKind::Gift),
            "GUARD_BUY" => Some(EventKind::Guard),
            "SUPER_CHAT_MESSAGE" => Some(EventKind::SuperChat),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 弾幕・ギフト・大航海・スーパーチャットの記録
///
/// 生成後に変更されることはない。`session_start` は直播中でない場合 0。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub room_id: u64,
    pub timestamp: i64,
    pub actor_name: String,
    pub actor_id: u64,
    /// 表示用のプレーンテキスト（弾幕本文、`投喂 辣条`、`赠送 舰长` など）。
    /// 金額は含めず `value` に持つ
    pub payload: String,
    pub kind: EventKind,
    pub value: f64,
    pub session_start: i64,
}

/// 開播時に即時保存される記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOpen {
    pub room_id: u64,
    pub streamer_name: String,
    pub streamer_uid: u64,
    pub title: String,
    pub cover: String,
    pub start: i64,
}

/// セッション中の集計値
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    /// 弾幕数
    pub chat_count: u64,
    pub gift_value: f64,
    pub guard_value: f64,
    pub super_chat_value: f64,
}

impl SessionTotals {
    pub fn add(&mut self, record: &Record) {
        match record.kind {
            EventKind::Chat => self.chat_count += 1,
            EventKind::Gift => self.gift_value += record.value,
            EventKind::Guard => self.guard_value += record.value,
            EventKind::SuperChat => self.super_chat_value += record.value,
        }
    }

    pub fn revenue(&self) -> f64 {
        self.gift_value + self.guard_value + self.super_chat_value
    }
}

/// 下播時に即時保存される記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClose {
    pub room_id: u64,
    pub start: i64,
    pub end: i64,
    pub totals: SessionTotals,
}
