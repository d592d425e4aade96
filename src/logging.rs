// ログ初期化

use crate::config::{project_dirs, LogConfig};
use crate::error::{IngestError, IngestResult};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// ログ出力先ディレクトリを決定
pub fn resolve_log_dir(config: &LogConfig) -> IngestResult<PathBuf> {
    match &config.log_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(project_dirs()?.data_dir().join("logs")),
    }
}

/// `RUST_LOG` が設定されていればそれを優先する
fn build_filter(config: &LogConfig) -> IngestResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| IngestError::Config(format!("invalid log level '{}': {}", config.log_level, e)))
}

/// ログ初期化
///
/// ファイル出力が有効な場合は日次ローテーションのライターを追加し、
/// そのガードを返す。ガードを破棄するとバッファ中のログが失われるため、
/// 呼び出し側は終了まで保持すること。
pub fn init_logging(config: &LogConfig) -> IngestResult<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(build_filter(config)?);

    if !config.enable_file_logging {
        tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .map_err(|e| IngestError::Config(format!("Failed to init logging: {}", e)))?;
        return Ok(None);
    }

    let log_dir = resolve_log_dir(config)?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, &config.log_file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(build_filter(config)?);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| IngestError::Config(format!("Failed to init logging: {}", e)))?;

    tracing::info!("📝 File logging enabled: {}", log_dir.display());

    Ok(Some(guard))
}
