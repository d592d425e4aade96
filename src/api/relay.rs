//! リレー接続管理
//!
//! リレー（biligo-ws-live 互換）へのWebSocket接続を確立し、受信・送信の
//! プリミティブを提供する。
//!
//! ## 使用方法
//!
//! ```ignore
//! let client = RelayClient::new(relay_config.endpoint(), Arc::new(WsConnector), Duration::from_secs(3));
//!
//! // 接続できるまで再試行し続ける
//! let mut receiver = client.connect().await;
//! let frame = receiver.recv().await?;
//!
//! // 送信はベストエフォート（失敗してもエラーを返さない）
//! client.send(serde_json::json!({"cmd": "ping"})).await;
//! ```

use crate::error::{IngestError, IngestResult};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// 接続の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// 受信中に切断された
    Failed,
}

/// 受信側
#[async_trait]
pub trait FrameSource: Send {
    /// 次のテキストフレーム。切断時はエラー
    async fn recv(&mut self) -> IngestResult<String>;
}

/// 送信側
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> IngestResult<()>;
}

/// トランスポートの確立
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, endpoint: &str)
        -> IngestResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}

/// 送信メッセージ
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// そのまま送る
    Text(String),
    /// JSONにシリアライズして送る
    Structured(serde_json::Value),
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        OutboundMessage::Text(text)
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        OutboundMessage::Text(text.to_string())
    }
}

impl From<serde_json::Value> for OutboundMessage {
    fn from(value: serde_json::Value) -> Self {
        OutboundMessage::Structured(value)
    }
}

impl OutboundMessage {
    pub fn into_text(self) -> IngestResult<String> {
        match self {
            OutboundMessage::Text(text) => Ok(text),
            OutboundMessage::Structured(value) => Ok(serde_json::to_string(&value)?),
        }
    }
}

struct Shared {
    state: RwLock<ConnectionState>,
    sender: Mutex<Option<Box<dyn FrameSink>>>,
}

impl Shared {
    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }
}

/// リレークライアント
pub struct RelayClient {
    endpoint: String,
    connector: Arc<dyn RelayConnector>,
    reconnect_interval: Duration,
    shared: Arc<Shared>,
    attempts: AtomicU64,
    successful_connects: AtomicU64,
}

impl RelayClient {
    pub fn new(
        endpoint: impl Into<String>,
        connector: Arc<dyn RelayConnector>,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            connector,
            reconnect_interval,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                sender: Mutex::new(None),
            }),
            attempts: AtomicU64::new(0),
            successful_connects: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 接続できるまで一定間隔で再試行し、受信側を返す
    ///
    /// 再試行回数に上限はなく、確立失敗は呼び出し側に返さない。
    pub async fn connect(&self) -> RelayReceiver {
        loop {
            self.shared.set_state(ConnectionState::Connecting).await;
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(attempt, endpoint = %self.endpoint, "Connecting to relay");

            match self.connector.connect(&self.endpoint).await {
                Ok((sink, source)) => {
                    *self.shared.sender.lock().await = Some(sink);
                    self.shared.set_state(ConnectionState::Connected).await;
                    self.successful_connects.fetch_add(1, Ordering::SeqCst);
                    info!(endpoint = %self.endpoint, "✅ Relay connected");
                    return RelayReceiver {
                        source,
                        shared: Arc::clone(&self.shared),
                    };
                }
                Err(e) => {
                    self.shared.set_state(ConnectionState::Disconnected).await;
                    info!(
                        attempt,
                        retry_in_secs = self.reconnect_interval.as_secs_f64(),
                        "🔄 Relay reconnecting: {}",
                        e
                    );
                    tokio::time::sleep(self.reconnect_interval).await;
                }
            }
        }
    }

    /// ベストエフォートの送信。失敗はログに残して握りつぶす
    pub async fn send(&self, message: impl Into<OutboundMessage>) {
        let text = match message.into().into_text() {
            Ok(text) => text,
            Err(e) => {
                error!("❌ Send failed: {}", e);
                return;
            }
        };

        let mut sender = self.shared.sender.lock().await;
        match sender.as_mut() {
            Some(sink) => {
                if let Err(e) = sink.send_text(text).await {
                    error!("❌ Send failed: {}", e);
                }
            }
            None => warn!("❌ Send failed: {}", IngestError::NotConnected),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    /// 接続試行の総数
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// 接続成功の総数
    pub fn successful_connects(&self) -> u64 {
        self.successful_connects.load(Ordering::SeqCst)
    }
}

/// 確立済み接続の受信側
pub struct RelayReceiver {
    source: Box<dyn FrameSource>,
    shared: Arc<Shared>,
}

impl RelayReceiver {
    /// 次のフレームを待つ。タイムアウトはない
    ///
    /// エラーはこの接続の終わりを意味し、送信側も破棄される。
    pub async fn recv(&mut self) -> IngestResult<String> {
        match self.source.recv().await {
            Ok(frame) => Ok(frame),
            Err(e) => {
                *self.shared.sender.lock().await = None;
                self.shared.set_state(ConnectionState::Failed).await;
                Err(e)
            }
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// tokio-tungstenite によるWebSocket接続
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> IngestResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(endpoint).await?;
        let (write, read) = ws_stream.split();
        Ok((
            Box::new(WsFrameSink { write }),
            Box::new(WsFrameSource { read }),
        ))
    }
}

struct WsFrameSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn recv(&mut self) -> IngestResult<String> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(text),
                    Err(e) => warn!("Dropping non UTF-8 binary frame: {}", e),
                },
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Relay sent close frame");
                    return Err(IngestError::ConnectionClosed);
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(IngestError::ConnectionClosed),
            }
        }
    }
}

struct WsFrameSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_text(&mut self, text: String) -> IngestResult<()> {
        self.write.send(Message::Text(text.into())).await?;
        Ok(())
    }
}

/// プロセス内チャネルによる接続
///
/// 別タスクから直接フレームを流し込む用途（組み込み・結合テスト）に使う。
/// [`ChannelConnector::add_session`] で用意したセッションが接続ごとに1つずつ
/// 消費され、用意がなければ接続は失敗する。
#[derive(Debug, Default)]
pub struct ChannelConnector {
    sessions: SyncMutex<VecDeque<ChannelSession>>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
    endpoints: SyncMutex<Vec<String>>,
}

#[derive(Debug)]
struct ChannelSession {
    frames: mpsc::UnboundedReceiver<String>,
    sent: mpsc::UnboundedSender<String>,
}

/// セッションのリレー側
#[derive(Debug)]
pub struct ChannelRelayHandle {
    frames: mpsc::UnboundedSender<String>,
    sent: mpsc::UnboundedReceiver<String>,
}

impl ChannelRelayHandle {
    /// クライアントへフレームを送る。クライアント側が切断済みなら `false`
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.frames.send(frame.into()).is_ok()
    }

    /// クライアントが送信したメッセージを受け取る
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// 接続を切る
    pub fn close(self) {}
}

impl ChannelConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 次の接続で使われるセッションを用意する
    pub fn add_session(&self) -> ChannelRelayHandle {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        self.sessions.lock().push_back(ChannelSession {
            frames: frames_rx,
            sent: sent_tx,
        });
        ChannelRelayHandle {
            frames: frames_tx,
            sent: sent_rx,
        }
    }

    /// 次の `n` 回の接続を失敗させる
    pub fn fail_next(&self, n: usize) {
        self.failures.fetch_add(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// 接続要求に使われたエンドポイント
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().clone()
    }
}

#[async_trait]
impl RelayConnector for ChannelConnector {
    async fn connect(
        &self,
        endpoint: &str,
    ) -> IngestResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().push(endpoint.to_string());

        let injected_failure = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(IngestError::Connection("connection refused".to_string()));
        }

        let session = self
            .sessions
            .lock()
            .pop_front()
            .ok_or_else(|| IngestError::Connection("no relay session available".to_string()))?;

        Ok((
            Box::new(ChannelFrameSink { sent: session.sent }),
            Box::new(ChannelFrameSource {
                frames: session.frames,
            }),
        ))
    }
}

struct ChannelFrameSource {
    frames: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn recv(&mut self) -> IngestResult<String> {
        self.frames.recv().await.ok_or(IngestError::ConnectionClosed)
    }
}

struct ChannelFrameSink {
    sent: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl FrameSink for ChannelFrameSink {
    async fn send_text(&mut self, text: String) -> IngestResult<()> {
        self.sent.send(text).map_err(|_| IngestError::ConnectionClosed)
    }
}
