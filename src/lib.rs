pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod sink;

// Re-export the main error types for convenience
pub use error::{IngestError, IngestResult};

// Re-export the ingestion pipeline
pub use ingest::{
    DispatchOutcome, EventDispatcher, EventKind, FlushScheduler, IngestEngine, IngestStats,
    PendingBuffer, Record, SessionClose, SessionOpen, SessionTotals,
};

// Re-export relay plumbing
pub use api::{HttpSubscriptionAnnouncer, RelayClient, SubscriptionAnnouncer, WsConnector};

// Re-export persistence
pub use database::{IngestDatabase, SqliteSink};
pub use sink::{LogSink, MemorySink, RecordSink};

pub use config::{AppConfig, ConfigManager};
