//! 取り込みエンジン
//!
//! 接続 → 購読通知 → 受信・ディスパッチのループを監督する。受信エラーで
//! ループが終わると、接続からやり直す。フラッシュタイマーは独立したタスクで
//! 動き、受信ループとは [`PendingBuffer`] だけを共有する。

use super::buffer::PendingBuffer;
use super::dispatcher::{Clock, DispatchOutcome, EventDispatcher};
use super::flush::FlushScheduler;
use crate::api::relay::{RelayClient, RelayConnector};
use crate::api::subscription::SubscriptionAnnouncer;
use crate::config::AppConfig;
use crate::error::{IngestError, IngestResult};
use crate::sink::RecordSink;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 受信統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames: u64,
    pub buffered: u64,
    pub duplicates: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    /// 購読外・未対応・冗長なイベント
    pub ignored: u64,
    /// デコードに失敗したフレーム
    pub malformed: u64,
}

impl IngestStats {
    fn observe(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Buffered(_) => self.buffered += 1,
            DispatchOutcome::Duplicate => self.duplicates += 1,
            DispatchOutcome::SessionOpened => self.sessions_opened += 1,
            DispatchOutcome::SessionClosed => self.sessions_closed += 1,
            DispatchOutcome::NotSubscribed
            | DispatchOutcome::AlreadyLive
            | DispatchOutcome::NotLive
            | DispatchOutcome::Unhandled => self.ignored += 1,
        }
    }
}

/// drop時にタスクを止める
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct IngestEngine {
    client_id: String,
    rooms: Vec<u64>,
    resubscribe_on_reconnect: bool,
    announced: bool,
    relay: RelayClient,
    announcer: Arc<dyn SubscriptionAnnouncer>,
    sink: Arc<dyn RecordSink>,
    dispatcher: EventDispatcher,
    scheduler: FlushScheduler,
    stats: IngestStats,
}

impl IngestEngine {
    pub fn new(
        config: &AppConfig,
        connector: Arc<dyn RelayConnector>,
        announcer: Arc<dyn SubscriptionAnnouncer>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let buffer = PendingBuffer::new();
        let relay = RelayClient::new(
            config.relay.endpoint(),
            connector,
            config.relay.reconnect_interval(),
        );
        let dispatcher = EventDispatcher::new(
            config.rooms.iter().copied(),
            buffer.clone(),
            Arc::clone(&sink),
            config.dedup.capacity,
        );
        let scheduler = FlushScheduler::from_config(buffer, Arc::clone(&sink), &config.flush);

        Self {
            client_id: config.relay.client_id.clone(),
            rooms: config.rooms.clone(),
            resubscribe_on_reconnect: config.relay.resubscribe_on_reconnect,
            announced: false,
            relay,
            announcer,
            sink,
            dispatcher,
            scheduler,
            stats: IngestStats::default(),
        }
    }

    /// 時刻源を差し替える
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.dispatcher = self.dispatcher.with_clock(clock);
        self
    }

    pub fn relay(&self) -> &RelayClient {
        &self.relay
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &FlushScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// 下播記録のないセッションをストアから復元する
    pub async fn restore_sessions(&mut self) -> IngestResult<usize> {
        let mut restored = 0;
        for (room_id, start) in self.sink.load_open_sessions().await? {
            if self.dispatcher.restore_session(room_id, start) {
                restored += 1;
            }
        }
        if restored > 0 {
            info!(restored, "♻️ Restored live sessions from store");
        }
        Ok(restored)
    }

    /// 購読リストを通知する（失敗しても続行）
    async fn announce_subscriptions(&mut self) {
        if self.announced && !self.resubscribe_on_reconnect {
            return;
        }
        match self.announcer.announce(&self.client_id, &self.rooms).await {
            Ok(()) => {
                self.announced = true;
                info!(rooms = self.rooms.len(), "📡 Subscribed rooms announced to relay");
            }
            Err(e) => warn!("⚠️ Failed to announce subscriptions: {}", e),
        }
    }

    /// 1フレームを処理する。デコード失敗はログに残して続行
    pub async fn handle_frame(&mut self, frame: &str) {
        self.stats.frames += 1;
        match self.dispatcher.dispatch_frame(frame).await {
            Ok(outcome) => self.stats.observe(outcome),
            Err(e) => {
                self.stats.malformed += 1;
                warn!("⚠️ Dropping malformed envelope: {}", e);
            }
        }
    }

    /// 接続してから受信が失敗するまで取り込む
    ///
    /// 戻り値はループを終わらせた受信エラー。
    pub async fn run_once(&mut self) -> IngestError {
        let mut receiver = self.relay.connect().await;
        self.announce_subscriptions().await;

        loop {
            match receiver.recv().await {
                Ok(frame) => self.handle_frame(&frame).await,
                Err(e) => {
                    error!(
                        pending = self.dispatcher.buffer().len(),
                        "❌ Relay receive failed: {}",
                        e
                    );
                    return e;
                }
            }
        }
    }

    /// 終了しない取り込みループ
    ///
    /// セッションを復元し、フラッシュタイマーを起動してから、受信ループを
    /// 繰り返し実行する。このfutureをdropするとタイマーも止まる。
    pub async fn run(&mut self) {
        if let Err(e) = self.restore_sessions().await {
            error!("❌ Failed to restore live sessions: {}", e);
        }

        let _timer = AbortOnDrop(self.scheduler.spawn());

        info!(
            rooms = self.rooms.len(),
            endpoint = %self.relay.endpoint(),
            "🚀 Ingestion engine started"
        );

        loop {
            let e = self.run_once().await;
            if e.is_connection_level() {
                info!("🔄 Restarting ingestion after connection loss");
            } else {
                warn!("🔄 Restarting ingestion after unexpected error: {}", e);
            }
        }
    }

    /// バッファに残っているレコードを今すぐ保存する
    pub async fn flush_now(&self) -> IngestResult<usize> {
        self.scheduler.flush_now().await
    }
}
