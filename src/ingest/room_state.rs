//! 直播間ごとの開播状態

use super::record::{Record, SessionTotals};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct LiveSession {
    start: i64,
    totals: SessionTotals,
}

/// 直播間ID → 開播時刻
///
/// マップに存在する = 直播中。1つの直播間が同時に持てるセッションは1つだけ。
#[derive(Debug, Default)]
pub struct RoomStateTracker {
    sessions: HashMap<u64, LiveSession>,
}

impl RoomStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 開播を記録する。既に直播中なら何もせず `false` を返す
    pub fn start(&mut self, room_id: u64, start: i64) -> bool {
        if self.sessions.contains_key(&room_id) {
            return false;
        }
        self.sessions.insert(
            room_id,
            LiveSession {
                start,
                totals: SessionTotals::default(),
            },
        );
        true
    }

    /// 下播を記録し、開播時刻と集計値を返す。直播中でなければ `None`
    pub fn end(&mut self, room_id: u64) -> Option<(i64, SessionTotals)> {
        self.sessions
            .remove(&room_id)
            .map(|session| (session.start, session.totals))
    }

    /// 直播中ならその開播時刻
    pub fn session_start(&self, room_id: u64) -> Option<i64> {
        self.sessions.get(&room_id).map(|s| s.start)
    }

    pub fn is_live(&self, room_id: u64) -> bool {
        self.sessions.contains_key(&room_id)
    }

    /// レコードを所属セッションの集計に加える
    pub fn account(&mut self, record: &Record) {
        if let Some(session) = self.sessions.get_mut(&record.room_id) {
            if session.start == record.session_start {
                session.totals.add(record);
            }
        }
    }

    pub fn totals(&self, room_id: u64) -> Option<SessionTotals> {
        self.sessions.get(&room_id).map(|s| s.totals)
    }

    pub fn live_rooms(&self) -> Vec<u64> {
        let mut rooms: Vec<u64> = self.sessions.keys().copied().collect();
        rooms.sort_unstable();
        rooms
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::record::EventKind;

    #[test]
    fn test_start_is_idempotent() {
        let mut tracker = RoomStateTracker::new();
        assert!(tracker.start(510, 100));
        assert!(!tracker.start(510, 200));
        assert_eq!(tracker.session_start(510), Some(100));
    }

    #[test]
    fn test_end_removes_session() {
        let mut tracker = RoomStateTracker::new();
        assert!(tracker.end(510).is_none());

        tracker.start(510, 100);
        let (start, totals) = tracker.end(510).unwrap();
        assert_eq!(start, 100);
        assert_eq!(totals, SessionTotals::default());
        assert!(!tracker.is_live(510));
        assert!(tracker.end(510).is_none());
    }

    #[test]
    fn test_live_iff_last_event_was_start() {
        // true = 開播, false = 下播
        let sequences: Vec<Vec<bool>> = vec![
            vec![true],
            vec![true, true, false],
            vec![false, false, true, true],
            vec![true, false, false, true, false],
            vec![false, true, false, true],
        ];

        for seq in sequences {
            let mut tracker = RoomStateTracker::new();
            for (i, &is_start) in seq.iter().enumerate() {
                if is_start {
                    tracker.start(1, i as i64);
                } else {
                    tracker.end(1);
                }
            }
            assert_eq!(tracker.is_live(1), *seq.last().unwrap(), "{:?}", seq);
        }
    }

    #[test]
    fn test_account_only_counts_current_session() {
        let mut tracker = RoomStateTracker::new();
        tracker.start(1, 100);

        let mut record = Record {
            room_id: 1,
            timestamp: 150,
            actor_name: "bob".into(),
            actor_id: 5,
            payload: "hi".into(),
            kind: EventKind::Chat,
            value: 0.0,
            session_start: 100,
        };
        tracker.account(&record);

        // 別セッション・未開播の直播間は集計されない
        record.session_start = 0;
        tracker.account(&record);
        record.room_id = 2;
        tracker.account(&record);

        assert_eq!(tracker.totals(1).unwrap().chat_count, 1);
        assert!(tracker.totals(2).is_none());
    }
}
