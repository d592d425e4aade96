//! イベントディスパッチャー
//!
//! デコード済みエンベロープを種別ごとに処理し、開播状態と重複排除集合を更新して、
//! 保存対象のレコードをバッファに積む。開播・下播の記録はバッファを経由せず
//! 即時にシンクへ渡す。
//!
//! 開播状態と重複排除集合はこのインスタンスが所有し、受信ループからしか触らない。
//! フラッシュタスクと共有するのは [`PendingBuffer`] だけ。

use super::buffer::PendingBuffer;
use super::dedup::SuperChatDedup;
use super::envelope::{Envelope, RelayEvent};
use super::record::{EventKind, Record, SessionClose, SessionOpen};
use super::room_state::RoomStateTracker;
use crate::error::IngestResult;
use crate::sink::RecordSink;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 現在時刻（UNIX秒）を返す関数
pub type Clock = fn() -> i64;

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// 1エンベロープの処理結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 購読していない直播間（または直播間IDなし）
    NotSubscribed,
    SessionOpened,
    /// 既に直播中の開播イベント
    AlreadyLive,
    Buffered(EventKind),
    /// 記録済みのスーパーチャット
    Duplicate,
    SessionClosed,
    /// 直播中でない直播間の下播イベント
    NotLive,
    Unhandled,
}

pub struct EventDispatcher {
    subscriptions: HashSet<u64>,
    rooms: RoomStateTracker,
    dedup: SuperChatDedup,
    buffer: PendingBuffer,
    sink: Arc<dyn RecordSink>,
    clock: Clock,
}

impl EventDispatcher {
    pub fn new(
        subscriptions: impl IntoIterator<Item = u64>,
        buffer: PendingBuffer,
        sink: Arc<dyn RecordSink>,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            subscriptions: subscriptions.into_iter().collect(),
            rooms: RoomStateTracker::new(),
            dedup: SuperChatDedup::new(dedup_capacity),
            buffer,
            sink,
            clock: unix_now,
        }
    }

    /// 時刻源を差し替える
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn rooms(&self) -> &RoomStateTracker {
        &self.rooms
    }

    pub fn dedup(&self) -> &SuperChatDedup {
        &self.dedup
    }

    pub fn buffer(&self) -> &PendingBuffer {
        &self.buffer
    }

    pub fn is_subscribed(&self, room_id: u64) -> bool {
        self.subscriptions.contains(&room_id)
    }

    /// 再起動前から続いているセッションを復元する
    pub fn restore_session(&mut self, room_id: u64, start: i64) -> bool {
        if !self.is_subscribed(room_id) {
            return false;
        }
        let restored = self.rooms.start(room_id, start);
        if restored {
            info!(room_id, start, "♻️ Restored live session");
        }
        restored
    }

    /// 生フレームをパースして処理する
    pub async fn dispatch_frame(&mut self, frame: &str) -> IngestResult<DispatchOutcome> {
        let envelope = Envelope::parse(frame)?;
        self.dispatch(&envelope).await
    }

    pub async fn dispatch(&mut self, envelope: &Envelope) -> IngestResult<DispatchOutcome> {
        let room_id = match envelope.room_id {
            Some(room_id) if self.subscriptions.contains(&room_id) => room_id,
            _ => return Ok(DispatchOutcome::NotSubscribed),
        };

        let outcome = match envelope.decode()? {
            RelayEvent::SessionStart(live_info) => {
                let start = (self.clock)();
                if !self.rooms.start(room_id, start) {
                    return Ok(DispatchOutcome::AlreadyLive);
                }

                let session = SessionOpen {
                    room_id,
                    streamer_name: live_info.name,
                    streamer_uid: live_info.uid,
                    title: live_info.title,
                    cover: live_info.cover,
                    start,
                };
                if let Err(e) = self.sink.open_session(&session).await {
                    error!(room_id, "❌ Failed to persist session open: {}", e);
                }

                info!(
                    room_id,
                    name = %session.streamer_name,
                    title = %session.title,
                    cover = %session.cover,
                    "🔴 Room {} is live: {}",
                    room_id,
                    session.streamer_name
                );
                DispatchOutcome::SessionOpened
            }
            RelayEvent::Chat(chat) => {
                debug!(room_id, "💬 {}: {}", chat.uname, chat.text);
                self.buffer_record(
                    room_id,
                    chat.timestamp,
                    chat.uname,
                    chat.uid,
                    chat.text,
                    EventKind::Chat,
                    0.0,
                )
            }
            RelayEvent::Gift(gift) => {
                let value = gift.price as f64 / 1000.0;
                info!(room_id, value, "🎁 {} sent {}", gift.uname, gift.gift_name);
                let payload = format!("{} {}", gift.action, gift.gift_name);
                self.buffer_record(
                    room_id,
                    gift.timestamp,
                    gift.uname,
                    gift.uid,
                    payload,
                    EventKind::Gift,
                    value,
                )
            }
            RelayEvent::Guard(guard) => {
                let value = (guard.price / 1000) as f64;
                info!(room_id, value, "⚓ {} bought {}", guard.username, guard.gift_name);
                let payload = format!("赠送 {}", guard.gift_name);
                self.buffer_record(
                    room_id,
                    guard.timestamp,
                    guard.username,
                    guard.uid,
                    payload,
                    EventKind::Guard,
                    value,
                )
            }
            RelayEvent::SuperChat(sc) => {
                if !self.dedup.insert(sc.id) {
                    debug!(room_id, id = sc.id, "Duplicate super chat ignored");
                    return Ok(DispatchOutcome::Duplicate);
                }
                info!(room_id, value = sc.price, "💴 {}: {}", sc.uname, sc.message);
                self.buffer_record(
                    room_id,
                    sc.timestamp,
                    sc.uname,
                    sc.uid,
                    sc.message,
                    EventKind::SuperChat,
                    sc.price,
                )
            }
            RelayEvent::SessionEnd => {
                let Some((start, totals)) = self.rooms.end(room_id) else {
                    return Ok(DispatchOutcome::NotLive);
                };

                let session = SessionClose {
                    room_id,
                    start,
                    end: (self.clock)(),
                    totals,
                };
                if let Err(e) = self.sink.close_session(&session).await {
                    error!(room_id, "❌ Failed to persist session close: {}", e);
                }

                info!(
                    room_id,
                    duration_secs = session.end - session.start,
                    chat_count = totals.chat_count,
                    revenue = totals.revenue(),
                    "⚫ Room {} went offline",
                    room_id
                );
                DispatchOutcome::SessionClosed
            }
            RelayEvent::Other(_) => {
                debug!("{}", envelope.pretty());
                DispatchOutcome::Unhandled
            }
        };

        Ok(outcome)
    }

    /// レコードを積み、直播中なら集計に加える
    ///
    /// `payload` はマークアップを含まないテキスト。金額は `value` だけに入る。
    #[allow(clippy::too_many_arguments)]
    fn buffer_record(
        &mut self,
        room_id: u64,
        timestamp: i64,
        actor_name: String,
        actor_id: u64,
        payload: String,
        kind: EventKind,
        value: f64,
    ) -> DispatchOutcome {
        let record = Record {
            room_id,
            timestamp,
            actor_name,
            actor_id,
            payload,
            kind,
            value,
            session_start: self.rooms.session_start(room_id).unwrap_or(0),
        };
        self.rooms.account(&record);
        self.buffer.push(record);
        DispatchOutcome::Buffered(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::sink::MemorySink;
    use serde_json::json;

    fn fixed_clock() -> i64 {
        1_700_000_000
    }

    fn dispatcher(sink: Arc<MemorySink>) -> EventDispatcher {
        EventDispatcher::new([1, 2], PendingBuffer::new(), sink, 100).with_clock(fixed_clock)
    }

    fn live(room_id: u64) -> String {
        json!({
            "command": "LIVE",
            "live_info": {"room_id": room_id, "name": "A", "uid": 2, "title": "T", "cover": "c"}
        })
        .to_string()
    }

    fn preparing(room_id: u64) -> String {
        json!({"command": "PREPARING", "live_info": {"room_id": room_id}}).to_string()
    }

    fn danmu(room_id: u64, text: &str, ts: i64) -> String {
        json!({
            "command": "DANMU_MSG",
            "live_info": {"room_id": room_id},
            "content": {"info": [[0], text, [5, "bob"], [], [], [], [], [], [], {"ts": ts}]}
        })
        .to_string()
    }

    fn super_chat(id: u64) -> String {
        json!({
            "command": "SUPER_CHAT_MESSAGE",
            "live_info": {"room_id": 1},
            "content": {"data": {
                "id": id, "uid": 9, "price": 30, "start_time": 1000,
                "message": "加油", "user_info": {"uname": "carol"}
            }}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_live_opens_session() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink.clone());

        let outcome = dispatcher.dispatch_frame(&live(1)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::SessionOpened);
        assert_eq!(dispatcher.rooms().session_start(1), Some(fixed_clock()));

        let opened = sink.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].room_id, 1);
        assert_eq!(opened[0].streamer_name, "A");
        assert_eq!(opened[0].start, fixed_clock());
        // 開播記録はバッファを経由しない
        assert!(dispatcher.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_live_is_noop() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink.clone());

        dispatcher.dispatch_frame(&live(1)).await.unwrap();
        let outcome = dispatcher.dispatch_frame(&live(1)).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::AlreadyLive);
        assert_eq!(sink.opened().len(), 1);
    }

    #[tokio::test]
    async fn test_danmu_record_carries_session_start() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink);

        dispatcher.dispatch_frame(&live(1)).await.unwrap();
        let outcome = dispatcher.dispatch_frame(&danmu(1, "hello", 1000)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Buffered(EventKind::Chat));

        assert_eq!(
            dispatcher.buffer().snapshot(),
            vec![Record {
                room_id: 1,
                timestamp: 1000,
                actor_name: "bob".into(),
                actor_id: 5,
                payload: "hello".into(),
                kind: EventKind::Chat,
                value: 0.0,
                session_start: fixed_clock(),
            }]
        );
    }

    #[tokio::test]
    async fn test_record_outside_session_has_zero_start() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink);

        dispatcher.dispatch_frame(&danmu(2, "hi", 5)).await.unwrap();
        assert_eq!(dispatcher.buffer().snapshot()[0].session_start, 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_room_is_discarded() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink.clone());

        assert_eq!(
            dispatcher.dispatch_frame(&live(99)).await.unwrap(),
            DispatchOutcome::NotSubscribed
        );
        assert_eq!(
            dispatcher.dispatch_frame(&danmu(99, "x", 1)).await.unwrap(),
            DispatchOutcome::NotSubscribed
        );
        // 直播間IDのないエンベロープも破棄
        assert_eq!(
            dispatcher.dispatch_frame(r#"{"command":"DANMU_MSG"}"#).await.unwrap(),
            DispatchOutcome::NotSubscribed
        );
        assert!(!dispatcher.rooms().is_live(99));
        assert!(dispatcher.buffer().is_empty());
        assert!(sink.opened().is_empty());
    }

    #[tokio::test]
    async fn test_gift_and_guard_values() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink);

        let gift = json!({
            "command": "SEND_GIFT",
            "live_info": {"room_id": 1},
            "content": {"data": {
                "timestamp": 1001, "uname": "dave", "uid": 7,
                "action": "投喂", "giftName": "辣条", "price": 100
            }}
        });
        let guard = json!({
            "command": "GUARD_BUY",
            "live_info": {"room_id": 1},
            "content": {"data": {
                "start_time": 1002, "username": "erin", "uid": 8,
                "gift_name": "舰长", "price": 198500
            }}
        });

        dispatcher.dispatch_frame(&gift.to_string()).await.unwrap();
        dispatcher.dispatch_frame(&guard.to_string()).await.unwrap();

        let records = dispatcher.buffer().snapshot();
        assert_eq!(records[0].kind, EventKind::Gift);
        assert_eq!(records[0].payload, "投喂 辣条");
        assert!((records[0].value - 0.1).abs() < 1e-9);

        assert_eq!(records[1].kind, EventKind::Guard);
        assert_eq!(records[1].payload, "赠送 舰长");
        // 整数除算
        assert_eq!(records[1].value, 198.0);
    }

    #[tokio::test]
    async fn test_super_chat_recorded_once() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink);

        assert_eq!(
            dispatcher.dispatch_frame(&super_chat(77)).await.unwrap(),
            DispatchOutcome::Buffered(EventKind::SuperChat)
        );
        for _ in 0..5 {
            assert_eq!(
                dispatcher.dispatch_frame(&super_chat(77)).await.unwrap(),
                DispatchOutcome::Duplicate
            );
        }
        dispatcher.dispatch_frame(&super_chat(78)).await.unwrap();

        let records = dispatcher.buffer().snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 30.0);
        assert_eq!(records[0].payload, "加油");
        assert_eq!(records[0].actor_name, "carol");
    }

    #[tokio::test]
    async fn test_preparing_closes_session_with_totals() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink.clone());

        dispatcher.dispatch_frame(&live(1)).await.unwrap();
        dispatcher.dispatch_frame(&danmu(1, "a", 1)).await.unwrap();
        dispatcher.dispatch_frame(&danmu(1, "b", 2)).await.unwrap();
        dispatcher.dispatch_frame(&super_chat(1)).await.unwrap();

        let outcome = dispatcher.dispatch_frame(&preparing(1)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::SessionClosed);
        assert!(!dispatcher.rooms().is_live(1));

        let closed = sink.closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].start, fixed_clock());
        assert_eq!(closed[0].end, fixed_clock());
        assert_eq!(closed[0].totals.chat_count, 2);
        assert_eq!(closed[0].totals.super_chat_value, 30.0);
    }

    #[tokio::test]
    async fn test_preparing_when_not_live_is_noop() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink.clone());

        assert_eq!(
            dispatcher.dispatch_frame(&preparing(1)).await.unwrap(),
            DispatchOutcome::NotLive
        );
        assert!(sink.closed().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_changes_nothing() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink);

        let frame = json!({"command": "INTERACT_WORD", "live_info": {"room_id": 1}}).to_string();
        assert_eq!(
            dispatcher.dispatch_frame(&frame).await.unwrap(),
            DispatchOutcome::Unhandled
        );
        assert!(dispatcher.buffer().is_empty());
        assert!(dispatcher.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_event_is_error_without_side_effects() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink);

        let frame = json!({
            "command": "DANMU_MSG",
            "live_info": {"room_id": 1},
            "content": {"info": ["short"]}
        })
        .to_string();
        assert!(matches!(
            dispatcher.dispatch_frame(&frame).await,
            Err(IngestError::MissingField { .. })
        ));
        assert!(dispatcher.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_restore_session() {
        let sink = MemorySink::new();
        let mut dispatcher = dispatcher(sink.clone());

        assert!(dispatcher.restore_session(1, 500));
        assert!(!dispatcher.restore_session(99, 500));

        // 復元済みなので開播イベントは無視される
        assert_eq!(
            dispatcher.dispatch_frame(&live(1)).await.unwrap(),
            DispatchOutcome::AlreadyLive
        );
        dispatcher.dispatch_frame(&danmu(1, "hi", 600)).await.unwrap();
        assert_eq!(dispatcher.buffer().snapshot()[0].session_start, 500);
        assert!(sink.opened().is_empty());
    }
}
