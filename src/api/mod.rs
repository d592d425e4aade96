pub mod relay; // リレー接続管理
pub mod subscription; // 購読リスト通知

pub use relay::{
    ChannelConnector, ChannelRelayHandle, ConnectionState, OutboundMessage, RelayClient,
    RelayConnector, RelayReceiver, WsConnector,
};
pub use subscription::{HttpSubscriptionAnnouncer, SubscriptionAnnouncer};
