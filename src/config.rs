//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリを使用した設定ファイルの永続化と管理を提供します。

use crate::error::{IngestError, IngestResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// リレー接続設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocketエンドポイント（`?id=` はクライアントIDから付与される）
    pub url: String,
    /// 購読リストを通知するHTTPエンドポイント
    pub subscribe_url: String,
    /// リレー側で監視プログラムを区別するためのID
    pub client_id: String,
    /// 接続失敗時の再試行間隔（秒）
    pub reconnect_interval_secs: u64,
    /// 再接続のたびに購読リストを再通知する
    pub resubscribe_on_reconnect: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            subscribe_url: "http://localhost:8080/subscribe".to_string(),
            client_id: "blive-ingest".to_string(),
            reconnect_interval_secs: 3,
            resubscribe_on_reconnect: true,
        }
    }
}

impl RelayConfig {
    /// クライアントIDを埋め込んだ接続先URL
    pub fn endpoint(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}id={}",
            self.url,
            separator,
            urlencoding::encode(&self.client_id)
        )
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

/// フラッシュ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// フラッシュ間隔（秒）
    pub interval_secs: u64,
    /// 同時に実行できるフラッシュ数の上限
    pub max_concurrent: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            max_concurrent: 3,
        }
    }
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// 重複排除設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// 記憶しておくスーパーチャットIDの上限
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// データベース設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// カスタムDBパス（Noneの場合はXDGデータディレクトリ）
    pub path: Option<PathBuf>,
}

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
    /// ログファイル名の接頭辞
    pub log_file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            enable_file_logging: false,
            log_file_prefix: "blive-ingest.log".to_string(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 監視する直播間
    #[serde(default)]
    pub rooms: Vec<u64>,

    /// リレー設定
    #[serde(default)]
    pub relay: RelayConfig,

    /// フラッシュ設定
    #[serde(default)]
    pub flush: FlushConfig,

    /// 重複排除設定
    #[serde(default)]
    pub dedup: DedupConfig,

    /// データベース設定
    #[serde(default)]
    pub database: DatabaseConfig,

    /// ログ設定
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 起動前の整合性チェック
    pub fn validate(&self) -> IngestResult<()> {
        if self.rooms.is_empty() {
            return Err(IngestError::Config(
                "no rooms to listen to; set `rooms` or pass --room".to_string(),
            ));
        }
        if self.relay.client_id.trim().is_empty() {
            return Err(IngestError::Config("relay.client_id is empty".to_string()));
        }
        if self.flush.interval_secs == 0 {
            return Err(IngestError::Config(
                "flush.interval_secs must be positive".to_string(),
            ));
        }
        if self.flush.max_concurrent == 0 {
            return Err(IngestError::Config(
                "flush.max_concurrent must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// 設定管理マネージャー
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDG設定ディレクトリを使う設定マネージャーを作成
    pub fn new() -> IngestResult<Self> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// 任意パスの設定ファイルを扱う
    pub fn with_path(config_path: impl Into<PathBuf>) -> IngestResult<Self> {
        let config_path = config_path.into();

        // 設定ディレクトリを作成（存在しない場合）
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(Self { config_path })
    }

    /// XDGディレクトリに基づく設定ファイルパスを取得
    fn get_config_path() -> IngestResult<PathBuf> {
        let project_dirs = project_dirs()?;
        let config_file = project_dirs.config_dir().join("config.toml");

        debug!("Config file path: {}", config_file.display());

        Ok(config_file)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// 設定を読み込み
    pub fn load_config(&self) -> IngestResult<AppConfig> {
        if !self.config_path.exists() {
            info!(
                "Config file not found, using default settings: {}",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let config_content = fs::read_to_string(&self.config_path)?;

        let config: AppConfig = toml::from_str(&config_content).map_err(|e| {
            IngestError::Config(format!(
                "Failed to parse config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        info!(
            "✅ Configuration loaded from: {}",
            self.config_path.display()
        );

        Ok(config)
    }

    /// 設定を保存
    pub fn save_config(&self, config: &AppConfig) -> IngestResult<()> {
        let config_content = toml::to_string_pretty(config)
            .map_err(|e| IngestError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&self.config_path, config_content)?;

        info!("💾 Configuration saved to: {}", self.config_path.display());
        Ok(())
    }
}

pub(crate) fn project_dirs() -> IngestResult<ProjectDirs> {
    ProjectDirs::from("dev", "sifyfy", "blive-ingest")
        .ok_or_else(|| IngestError::Config("Failed to get project directories".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.flush.interval_secs, 10);
        assert_eq!(config.flush.max_concurrent, 3);
        assert_eq!(config.relay.reconnect_interval(), Duration::from_secs(3));
        assert!(config.relay.resubscribe_on_reconnect);
        assert_eq!(config.dedup.capacity, 10_000);
    }

    #[test]
    fn test_endpoint_embeds_client_id() {
        let relay = RelayConfig {
            client_id: "cha".to_string(),
            ..Default::default()
        };
        assert_eq!(relay.endpoint(), "ws://localhost:8080/ws?id=cha");

        let relay = RelayConfig {
            url: "ws://relay/ws?v=2".to_string(),
            client_id: "a b".to_string(),
            ..Default::default()
        };
        assert_eq!(relay.endpoint(), "ws://relay/ws?v=2&id=a%20b");
    }

    #[test]
    fn test_validate() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_err());

        config.rooms = vec![510];
        assert!(config.validate().is_ok());

        config.flush.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("nested/config.toml")).unwrap();

        // 存在しない場合はデフォルト
        let loaded = manager.load_config().unwrap();
        assert!(loaded.rooms.is_empty());

        let mut config = AppConfig::default();
        config.rooms = vec![510, 605];
        config.relay.client_id = "cha".to_string();
        manager.save_config(&config).unwrap();

        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded.rooms, vec![510, 605]);
        assert_eq!(loaded.relay.client_id, "cha");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "rooms = [1, 2]\n[flush]\ninterval_secs = 5\n").unwrap();

        let config = ConfigManager::with_path(&path).unwrap().load_config().unwrap();
        assert_eq!(config.rooms, vec![1, 2]);
        assert_eq!(config.flush.interval_secs, 5);
        assert_eq!(config.flush.max_concurrent, 3);
        assert_eq!(config.relay.client_id, "blive-ingest");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "rooms = [").unwrap();

        let result = ConfigManager::with_path(&path).unwrap().load_config();
        assert!(matches!(result, Err(IngestError::Config(_))));
    }
}
