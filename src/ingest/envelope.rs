//! リレーから届くJSONエンベロープのデコード
//!
//! 1フレーム = 1 JSONオブジェクト。`command` フィールドでイベント種別が決まり、
//! 直播間IDは `live_info.room_id` に入っている。種別ごとのフィールドは
//! [`Envelope::decode`] で型付きの [`RelayEvent`] に変換する。

use crate::error::{IngestError, IngestResult};
use serde_json::Value;

/// エンベロープの種別
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 開播
    Live,
    /// 弾幕
    DanmuMsg,
    /// ギフト
    SendGift,
    /// 大航海（有料サブスク）
    GuardBuy,
    /// スーパーチャット（`SUPER_CHAT_MESSAGE` / `SUPER_CHAT_MESSAGE_JPN`）
    SuperChat,
    /// 下播
    Preparing,
    /// 扱わない種別
    Other(String),
}

impl Command {
    pub fn parse(command: &str) -> Self {
        match command {
            "LIVE" => Command::Live,
            "DANMU_MSG" => Command::DanmuMsg,
            "SEND_GIFT" => Command::SendGift,
            "GUARD_BUY" => Command::GuardBuy,
            "SUPER_CHAT_MESSAGE" | "SUPER_CHAT_MESSAGE_JPN" => Command::SuperChat,
            "PREPARING" => Command::Preparing,
            other => Command::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Command::Live => "LIVE",
            Command::DanmuMsg => "DANMU_MSG",
            Command::SendGift => "SEND_GIFT",
            Command::GuardBuy => "GUARD_BUY",
            Command::SuperChat => "SUPER_CHAT_MESSAGE",
            Command::Preparing => "PREPARING",
            Command::Other(name) => name,
        }
    }
}

/// 開播時の直播間情報
#[derive(Debug, Clone, PartialEq)]
pub struct LiveInfo {
    pub name: String,
    pub uid: u64,
    pub title: String,
    pub cover: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub timestamp: i64,
    pub uid: u64,
    pub uname: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gift {
    pub timestamp: i64,
    pub uid: u64,
    pub uname: String,
    pub action: String,
    pub gift_name: String,
    /// 1/1000 元単位
    pub price: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardPurchase {
    pub timestamp: i64,
    pub uid: u64,
    pub username: String,
    pub gift_name: String,
    /// 1/1000 元単位
    pub price: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuperChat {
    pub id: u64,
    pub timestamp: i64,
    pub uid: u64,
    pub uname: String,
    pub message: String,
    /// 元単位
    pub price: f64,
}

/// 型付きイベント
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    SessionStart(LiveInfo),
    Chat(ChatMessage),
    Gift(Gift),
    Guard(GuardPurchase),
    SuperChat(SuperChat),
    SessionEnd,
    Other(String),
}

/// デコード前のエンベロープ
#[derive(Debug, Clone)]
pub struct Envelope {
    pub command: Command,
    pub room_id: Option<u64>,
    pub raw: Value,
}

impl Envelope {
    /// フレーム文字列をパースする
    pub fn parse(frame: &str) -> IngestResult<Self> {
        let raw: Value = serde_json::from_str(frame)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> IngestResult<Self> {
        let command = raw
            .get("command")
            .and_then(Value::as_str)
            .map(Command::parse)
            .ok_or_else(|| IngestError::missing_field("command", "envelope"))?;

        let room_id = raw.pointer("/live_info/room_id").and_then(lenient_u64);

        Ok(Self {
            command,
            room_id,
            raw,
        })
    }

    /// 種別ごとのフィールドを取り出して型付きイベントにする
    pub fn decode(&self) -> IngestResult<RelayEvent> {
        let kind = self.command.name();
        let raw = &self.raw;

        let event = match &self.command {
            Command::Live => RelayEvent::SessionStart(LiveInfo {
                name: optional_str(raw, "/live_info/name"),
                uid: raw
                    .pointer("/live_info/uid")
                    .and_then(lenient_u64)
                    .unwrap_or_default(),
                title: optional_str(raw, "/live_info/title"),
                cover: optional_str(raw, "/live_info/cover"),
            }),
            Command::DanmuMsg => RelayEvent::Chat(ChatMessage {
                timestamp: i64_at(raw, "/content/info/9/ts", kind)?,
                uid: u64_at(raw, "/content/info/2/0", kind)?,
                uname: str_at(raw, "/content/info/2/1", kind)?,
                text: str_at(raw, "/content/info/1", kind)?,
            }),
            Command::SendGift => RelayEvent::Gift(Gift {
                timestamp: i64_at(raw, "/content/data/timestamp", kind)?,
                uid: u64_at(raw, "/content/data/uid", kind)?,
                uname: str_at(raw, "/content/data/uname", kind)?,
                action: str_at(raw, "/content/data/action", kind)?,
                gift_name: str_at(raw, "/content/data/giftName", kind)?,
                price: u64_at(raw, "/content/data/price", kind)?,
            }),
            Command::GuardBuy => RelayEvent::Guard(GuardPurchase {
                timestamp: i64_at(raw, "/content/data/start_time", kind)?,
                uid: u64_at(raw, "/content/data/uid", kind)?,
                username: str_at(raw, "/content/data/username", kind)?,
                gift_name: str_at(raw, "/content/data/gift_name", kind)?,
                price: u64_at(raw, "/content/data/price", kind)?,
            }),
            Command::SuperChat => RelayEvent::SuperChat(SuperChat {
                id: u64_at(raw, "/content/data/id", kind)?,
                timestamp: i64_at(raw, "/content/data/start_time", kind)?,
                uid: u64_at(raw, "/content/data/uid", kind)?,
                uname: str_at(raw, "/content/data/user_info/uname", kind)?,
                message: str_at(raw, "/content/data/message", kind)?,
                price: f64_at(raw, "/content/data/price", kind)?,
            }),
            Command::Preparing => RelayEvent::SessionEnd,
            Command::Other(name) => RelayEvent::Other(name.clone()),
        };

        Ok(event)
    }

    /// デバッグ出力用の整形済みJSON
    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_else(|_| self.raw.to_string())
    }
}

/// 数値または数値文字列（`SUPER_CHAT_MESSAGE_JPN` はIDを文字列で送る）
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field<'a>(raw: &'a Value, pointer: &str, kind: &str) -> IngestResult<&'a Value> {
    raw.pointer(pointer)
        .ok_or_else(|| IngestError::missing_field(pointer, kind))
}

fn u64_at(raw: &Value, pointer: &str, kind: &str) -> IngestResult<u64> {
    let value = field(raw, pointer, kind)?;
    lenient_u64(value)
        .ok_or_else(|| IngestError::invalid_field(pointer, kind, format!("expected unsigned integer, got {}", value)))
}

fn i64_at(raw: &Value, pointer: &str, kind: &str) -> IngestResult<i64> {
    let value = field(raw, pointer, kind)?;
    lenient_i64(value)
        .ok_or_else(|| IngestError::invalid_field(pointer, kind, format!("expected integer, got {}", value)))
}

fn f64_at(raw: &Value, pointer: &str, kind: &str) -> IngestResult<f64> {
    let value = field(raw, pointer, kind)?;
    lenient_f64(value)
        .ok_or_else(|| IngestError::invalid_field(pointer, kind, format!("expected number, got {}", value)))
}

fn str_at(raw: &Value, pointer: &str, kind: &str) -> IngestResult<String> {
    let value = field(raw, pointer, kind)?;
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(IngestError::invalid_field(
            pointer,
            kind,
            format!("expected string, got {}", other),
        )),
    }
}

fn optional_str(raw: &Value, pointer: &str) -> String {
    raw.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
