//! アプリケーション設定管理モジュール
//!
//! ログレベルなどをJSON形式の設定ファイルから読み込みます（書き込みはしません）。
//! モデルURL・閾値・入力サイズは定数であり、ここでは扱いません。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// アプリケーション設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// env_logger のデフォルトフィルタ（RUST_LOG が優先）
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        // src-tauriディレクトリの監視を避けるため、親ディレクトリに置く
        PathBuf::from("../knife_detector.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 指定パスから設定を読み込む、存在しないか壊れている場合はデフォルト設定を返す
    ///
    /// ロガー初期化前に呼ばれるので、結果は戻り値のメッセージで返す。
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> (Self, String) {
        let path = path.as_ref();
        if !path.exists() {
            return (
                Self::default(),
                "設定ファイルが存在しません。デフォルト設定を使用します".to_string(),
            );
        }

        match Self::load(path) {
            Ok(config) => (config, format!("設定ファイルを読み込みました: {}", path.display())),
            Err(e) => (
                Self::default(),
                format!(
                    "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                ),
            ),
        }
    }

    pub fn load_or_default() -> (Self, String) {
        Self::load_or_default_from(Self::default_path())
    }

    /// ロガーを初期化（2回目以降は無視）
    pub fn init_logger(&self) {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.log_level.as_str()),
        )
        .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_field_uses_default() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knife_detector.json");
        fs::write(&path, r#"{ "log_level": "debug" }"#).unwrap();

        let (loaded, message) = AppConfig::load_or_default_from(&path);
        assert_eq!(loaded, AppConfig { log_level: "debug".to_string() });
        assert!(message.contains("読み込みました"));
    }

    #[test]
    fn test_broken_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knife_detector.json");
        fs::write(&path, "{ not json").unwrap();

        let (loaded, message) = AppConfig::load_or_default_from(&path);
        assert_eq!(loaded, AppConfig::default());
        assert!(message.contains("失敗"));

        let (loaded, _) = AppConfig::load_or_default_from(dir.path().join("none.json"));
        assert_eq!(loaded, AppConfig::default());
    }
}
