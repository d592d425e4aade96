pub mod buffer; // 保留レコードのバッファ
pub mod dedup; // スーパーチャットの重複排除
pub mod dispatcher; // イベント種別ごとの処理
pub mod engine; // 受信ループとフラッシュの監督
pub mod envelope; // リレーフレームのデコード
pub mod flush; // 定期フラッシュ
pub mod record; // 保存レコードの型
pub mod room_state; // 直播間ごとの開播状態

pub use buffer::PendingBuffer;
pub use dedup::SuperChatDedup;
pub use dispatcher::{unix_now, Clock, DispatchOutcome, EventDispatcher};
pub use engine::{IngestEngine, IngestStats};
pub use envelope::{Command, Envelope, RelayEvent};
pub use flush::{flush_once, FlushScheduler};
pub use record::{EventKind, Record, SessionClose, SessionOpen, SessionTotals};
pub use room_state::RoomStateTracker;
