use anyhow::Context;
use blive_ingest::{
    api::{HttpSubscriptionAnnouncer, WsConnector},
    config::{AppConfig, ConfigManager},
    database::SqliteSink,
    logging,
    sink::{LogSink, RecordSink},
    IngestEngine,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "blive-ingest",
    about = "📺 Record live-room chat, gifts and super chats from a relay into SQLite",
    author,
    version
)]
struct Cli {
    /// 設定ファイル（省略時はXDG設定ディレクトリの config.toml）
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// リレーのWebSocket URL
    #[arg(long, value_name = "URL")]
    relay_url: Option<String>,

    /// 購読通知先のURL
    #[arg(long, value_name = "URL")]
    subscribe_url: Option<String>,

    #[arg(long, value_name = "ID")]
    client_id: Option<String>,

    /// 監視する直播間ID（複数指定可、設定ファイルの rooms を置き換える）
    #[arg(long = "room", value_name = "ROOM_ID")]
    rooms: Vec<u64>,

    /// SQLiteファイルのパス
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// 保存せずにログへ出力する
    #[arg(long)]
    dry_run: bool,

    /// ログレベル（RUST_LOG が優先）
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// CLI引数で設定を上書き
    fn apply(&self, config: &mut AppConfig) {
        if let Some(url) = &self.relay_url {
            config.relay.url = url.clone();
        }
        if let Some(url) = &self.subscribe_url {
            config.relay.subscribe_url = url.clone();
        }
        if let Some(client_id) = &self.client_id {
            config.relay.client_id = client_id.clone();
        }
        if !self.rooms.is_empty() {
            config.rooms = self.rooms.clone();
        }
        if let Some(path) = &self.database {
            config.database.path = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone())?,
        None => ConfigManager::new()?,
    };
    let mut config = config_manager
        .load_config()
        .with_context(|| format!("loading {}", config_manager.config_path().display()))?;
    cli.apply(&mut config);
    config.validate()?;

    // ガードは終了まで保持する
    let _log_guard = logging::init_logging(&config.log)?;

    tracing::info!("🎬 Starting blive-ingest for rooms {:?}", config.rooms);

    let sink: Arc<dyn RecordSink> = if cli.dry_run {
        tracing::info!("🧪 Dry run: records are logged, not stored");
        Arc::new(LogSink)
    } else {
        Arc::new(SqliteSink::open(config.database.path.as_deref())?)
    };
    let announcer = Arc::new(HttpSubscriptionAnnouncer::new(&config.relay.subscribe_url)?);

    let mut engine = IngestEngine::new(&config, Arc::new(WsConnector), announcer, sink);

    tokio::select! {
        _ = engine.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            tracing::info!("🛑 Shutdown signal received");
        }
    }

    // 最後のティック以降にたまったレコード
    match engine.flush_now().await {
        Ok(0) => {}
        Ok(count) => tracing::info!("💾 Final flush saved {} records", count),
        Err(e) => tracing::error!("❌ Final flush failed: {}", e),
    }

    let stats = engine.stats();
    tracing::info!(
        frames = stats.frames,
        buffered = stats.buffered,
        duplicates = stats.duplicates,
        malformed = stats.malformed,
        "👋 blive-ingest shutting down"
    );
    Ok(())
}
