pub mod crud;
pub mod models;

pub use models::*;

use crate::config::project_dirs;
use crate::error::IngestResult;
use crate::ingest::record::{Record, SessionClose, SessionOpen};
use crate::sink::RecordSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// blive-ingest用データベース接続管理
pub struct IngestDatabase {
    pub connection: rusqlite::Connection,
}

impl IngestDatabase {
    /// 新しいデータベース接続を作成
    pub fn new<P: AsRef<Path>>(db_path: P) -> IngestResult<Self> {
        let connection = rusqlite::Connection::open(db_path)?;
        let mut db = Self { connection };

        db.initialize_schema()?;
        Ok(db)
    }

    /// インメモリデータベースを作成（テスト用）
    pub fn new_in_memory() -> IngestResult<Self> {
        let connection = rusqlite::Connection::open_in_memory()?;
        let mut db = Self { connection };

        db.initialize_schema()?;
        Ok(db)
    }

    /// データベーススキーマを初期化
    fn initialize_schema(&mut self) -> IngestResult<()> {
        self.connection.execute_batch(include_str!("schema.sql"))?;
        tracing::info!("Database schema initialized successfully");
        Ok(())
    }
}

/// XDGデータディレクトリからデータベースパスを取得
pub fn get_database_path() -> IngestResult<PathBuf> {
    let project_dirs = project_dirs()?;

    let data_dir = project_dirs.data_dir();
    std::fs::create_dir_all(data_dir)?;

    Ok(data_dir.join("blive-ingest.db"))
}

/// SQLiteに保存するシンク
///
/// 書き込みはすべて `spawn_blocking` 上で実行する。
#[derive(Clone)]
pub struct SqliteSink {
    db: Arc<Mutex<IngestDatabase>>,
}

impl SqliteSink {
    pub fn new(db: IngestDatabase) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// パス指定（Noneの場合はXDGデータディレクトリ）で開く
    pub fn open(path: Option<&Path>) -> IngestResult<Self> {
        let path = match path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                path.to_path_buf()
            }
            None => get_database_path()?,
        };
        tracing::info!("📂 Opening database: {}", path.display());
        Ok(Self::new(IngestDatabase::new(&path)?))
    }

    pub fn database(&self) -> Arc<Mutex<IngestDatabase>> {
        Arc::clone(&self.db)
    }

    async fn with_db<T, F>(&self, f: F) -> IngestResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut IngestDatabase) -> IngestResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut db = db.lock();
            f(&mut db)
        })
        .await?
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn persist_batch(&self, batch: &[Record]) -> IngestResult<()> {
        let batch = batch.to_vec();
        self.with_db(move |db| db.insert_records(&batch).map(|_| ()))
            .await
    }

    async fn open_session(&self, session: &SessionOpen) -> IngestResult<()> {
        let session = session.clone();
        self.with_db(move |db| db.open_session(&session)).await
    }

    async fn close_session(&self, session: &SessionClose) -> IngestResult<()> {
        let session = session.clone();
        self.with_db(move |db| db.close_session(&session)).await
    }

    async fn load_open_sessions(&self) -> IngestResult<Vec<(u64, i64)>> {
        self.with_db(|db| db.open_sessions()).await
    }
}
