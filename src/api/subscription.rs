//! 購読リストの通知
//!
//! リレーに監視対象の直播間リストを伝える。クライアントIDを `Authorization`
//! ヘッダーに入れ、フォームの `subscribes` フィールドを直播間ごとに繰り返す。

use crate::error::IngestResult;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait SubscriptionAnnouncer: Send + Sync {
    async fn announce(&self, client_id: &str, rooms: &[u64]) -> IngestResult<()>;
}

/// HTTPでの通知
pub struct HttpSubscriptionAnnouncer {
    client: reqwest::Client,
    url: String,
}

impl HttpSubscriptionAnnouncer {
    pub fn new(url: impl Into<String>) -> IngestResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// フォームボディ `subscribes=1&subscribes=2...`
pub fn subscription_form(rooms: &[u64]) -> Vec<(&'static str, String)> {
    rooms
        .iter()
        .map(|room| ("subscribes", room.to_string()))
        .collect()
}

#[async_trait]
impl SubscriptionAnnouncer for HttpSubscriptionAnnouncer {
    async fn announce(&self, client_id: &str, rooms: &[u64]) -> IngestResult<()> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, client_id)
            .form(&subscription_form(rooms))
            .send()
            .await?
            .error_for_status()?;

        tracing::debug!(
            status = %response.status(),
            rooms = rooms.len(),
            "📡 Subscription announced"
        );
        Ok(())
    }
}
