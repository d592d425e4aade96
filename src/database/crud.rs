use rusqlite::types::Type;
use rusqlite::{params, Row};

use super::{IngestDatabase, StoredSession};
use crate::error::IngestResult;
use crate::ingest::record::{EventKind, Record, SessionClose, SessionOpen, SessionTotals};

impl IngestDatabase {
    /// レコードを1トランザクションで追記
    pub fn insert_records(&mut self, records: &[Record]) -> IngestResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records
                 (room_id, timestamp, actor_name, actor_id, payload, kind, value, session_start)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.room_id as i64,
                    record.timestamp,
                    record.actor_name,
                    record.actor_id as i64,
                    record.payload,
                    record.kind.as_str(),
                    record.value,
                    record.session_start,
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!("Inserted {} records", records.len());
        Ok(records.len())
    }

    /// 開播を記録
    pub fn open_session(&mut self, session: &SessionOpen) -> IngestResult<()> {
        self.connection.execute(
            "INSERT INTO live_sessions
             (room_id, start_ts, streamer_name, streamer_uid, title, cover)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(room_id, start_ts) DO UPDATE SET
                streamer_name = excluded.streamer_name,
                streamer_uid = excluded.streamer_uid,
                title = excluded.title,
                cover = excluded.cover",
            params![
                session.room_id as i64,
                session.start,
                session.streamer_name,
                session.streamer_uid as i64,
                session.title,
                session.cover,
            ],
        )?;

        tracing::info!("Opened session: room {} at {}", session.room_id, session.start);
        Ok(())
    }

    /// 下播を記録（開播行がなければ作成する）
    pub fn close_session(&mut self, session: &SessionClose) -> IngestResult<()> {
        let totals = &session.totals;
        self.connection.execute(
            "INSERT INTO live_sessions
             (room_id, start_ts, end_ts, chat_count, gift_value, guard_value, super_chat_value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(room_id, start_ts) DO UPDATE SET
                end_ts = excluded.end_ts,
                chat_count = excluded.chat_count,
                gift_value = excluded.gift_value,
                guard_value = excluded.guard_value,
                super_chat_value = excluded.super_chat_value",
            params![
                session.room_id as i64,
                session.start,
                session.end,
                totals.chat_count as i64,
                totals.gift_value,
                totals.guard_value,
                totals.super_chat_value,
            ],
        )?;

        tracing::info!("Closed session: room {} at {}", session.room_id, session.end);
        Ok(())
    }

    /// 下播記録のないセッション `(room_id, start)`
    pub fn open_sessions(&self) -> IngestResult<Vec<(u64, i64)>> {
        let mut stmt = self.connection.prepare(
            "SELECT room_id, start_ts FROM live_sessions
             WHERE end_ts IS NULL
             ORDER BY start_ts ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)?))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    // 以下は保存内容を確認するための読み出し。取り込み経路からは使わない

    /// セッション一覧を取得（新しい順）
    pub fn get_sessions(
        &self,
        room_id: Option<u64>,
        limit: Option<usize>,
    ) -> IngestResult<Vec<StoredSession>> {
        let mut sql = "SELECT * FROM live_sessions".to_string();
        if room_id.is_some() {
            sql.push_str(" WHERE room_id = ?1");
        }
        sql.push_str(" ORDER BY start_ts DESC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.connection.prepare(&sql)?;
        let rows = match room_id {
            Some(room_id) => stmt.query_map(params![room_id as i64], row_to_session)?,
            None => stmt.query_map([], row_to_session)?,
        };

        let mut sessions = Vec::new();
        for session in rows {
            sessions.push(session?);
        }
        Ok(sessions)
    }

    /// 直播間のレコードを保存順に取得
    pub fn get_records(&self, room_id: u64, limit: Option<usize>) -> IngestResult<Vec<Record>> {
        let sql = if let Some(limit) = limit {
            format!(
                "SELECT * FROM records WHERE room_id = ?1 ORDER BY id ASC LIMIT {}",
                limit
            )
        } else {
            "SELECT * FROM records WHERE room_id = ?1 ORDER BY id ASC".to_string()
        };

        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt.query_map(params![room_id as i64], row_to_record)?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }

    /// 保存済みレコード数（確認用）
    pub fn count_records(&self) -> IngestResult<i64> {
        let count = self
            .connection
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_session(row: &Row) -> rusqlite::Result<StoredSession> {
    Ok(StoredSession {
        room_id: row.get::<_, i64>("room_id")? as u64,
        start: row.get("start_ts")?,
        end: row.get("end_ts")?,
        streamer_name: row.get("streamer_name")?,
        streamer_uid: row.get::<_, i64>("streamer_uid")? as u64,
        title: row.get("title")?,
        cover: row.get("cover")?,
        totals: SessionTotals {
            chat_count: row.get::<_, i64>("chat_count")? as u64,
            gift_value: row.get("gift_value")?,
            guard_value: row.get("guard_value")?,
            super_chat_value: row.get("super_chat_value")?,
        },
    })
}

fn row_to_record(row: &Row) -> rusqlite::Result<Record> {
    let kind: String = row.get("kind")?;
    let kind = EventKind::from_str_opt(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("unknown record kind: {}", kind).into(),
        )
    })?;

    Ok(Record {
        room_id: row.get::<_, i64>("room_id")? as u64,
        timestamp: row.get("timestamp")?,
        actor_name: row.get("actor_name")?,
        actor_id: row.get::<_, i64>("actor_id")? as u64,
        payload: row.get("payload")?,
        kind,
        value: row.get("value")?,
        session_start: row.get("session_start")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(room_id: u64, ts: i64, kind: EventKind, value: f64) -> Record {
        Record {
            room_id,
            timestamp: ts,
            actor_name: "viewer".into(),
            actor_id: 3,
            payload: "payload".into(),
            kind,
            value,
            session_start: 0,
        }
    }

    fn open(room_id: u64, start: i64) -> SessionOpen {
        SessionOpen {
            room_id,
            streamer_name: "streamer".into(),
            streamer_uid: 11,
            title: "title".into(),
            cover: "cover".into(),
            start,
        }
    }

    #[test]
    fn test_insert_records_preserves_order_and_kind() {
        let mut db = IngestDatabase::new_in_memory().unwrap();
        let inserted = db
            .insert_records(&[
                record(1, 3, EventKind::Chat, 0.0),
                record(1, 1, EventKind::SuperChat, 30.0),
                record(2, 2, EventKind::Guard, 198.0),
            ])
            .unwrap();
        assert_eq!(inserted, 3);
        assert_eq!(db.count_records().unwrap(), 3);

        let room1 = db.get_records(1, None).unwrap();
        assert_eq!(room1.len(), 2);
        assert_eq!(room1[0].timestamp, 3);
        assert_eq!(room1[1].kind, EventKind::SuperChat);
        assert_eq!(room1[1].value, 30.0);

        assert_eq!(db.get_records(1, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_session_lifecycle() {
        let mut db = IngestDatabase::new_in_memory().unwrap();
        db.open_session(&open(5, 100)).unwrap();
        db.open_session(&open(6, 150)).unwrap();
        assert_eq!(db.open_sessions().unwrap(), vec![(5, 100), (6, 150)]);

        db.close_session(&SessionClose {
            room_id: 5,
            start: 100,
            end: 400,
            totals: SessionTotals {
                chat_count: 12,
                gift_value: 1.5,
                guard_value: 198.0,
                super_chat_value: 30.0,
            },
        })
        .unwrap();
        assert_eq!(db.open_sessions().unwrap(), vec![(6, 150)]);

        let sessions = db.get_sessions(Some(5), None).unwrap();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.streamer_name, "streamer");
        assert_eq!(session.end, Some(400));
        assert_eq!(session.totals.chat_count, 12);
        assert!(!session.is_open());

        assert_eq!(db.get_sessions(None, Some(1)).unwrap()[0].room_id, 6);
    }

    #[test]
    fn test_close_without_open_creates_row() {
        let mut db = IngestDatabase::new_in_memory().unwrap();
        db.close_session(&SessionClose {
            room_id: 9,
            start: 10,
            end: 20,
            totals: SessionTotals::default(),
        })
        .unwrap();

        let sessions = db.get_sessions(None, None).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].streamer_name, "");
        assert!(db.open_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_kind_is_rejected_on_read() {
        let db = IngestDatabase::new_in_memory().unwrap();
        db.connection
            .execute(
                "INSERT INTO records (room_id, timestamp, actor_name, actor_id, payload, kind)
                 VALUES (1, 1, 'a', 1, 'p', 'PREPARING')",
                [],
            )
            .unwrap();
        assert!(db.get_records(1, None).is_err());
    }
}
