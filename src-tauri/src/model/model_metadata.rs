//! モデルメタデータの定義
//!
//! Teachable Machine が model.json と同じ場所に書き出す metadata.json を読みます。
//! 出力ベクトルの0番目が「ナイフ」クラスであることが前提です。

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::constants::INPUT_SIZE;

/// metadata.json が取得できなかった場合のクラスラベル
pub const DEFAULT_CLASS_LABELS: [&str; 2] = ["Knife", "Not a Knife"];

/// モデルメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    /// 出力ベクトルの並び順どおりのクラスラベル
    /// 例: ["Knife", "Not a Knife"]
    pub labels: Vec<String>,

    /// モデル入力サイズ（正方形）。古い書き出しには無い
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// 書き出し時刻（ISO8601形式）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<String>,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            image_size: Some(INPUT_SIZE as u32),
            model_name: None,
            time_stamp: None,
        }
    }

    pub fn default_labels() -> Self {
        Self::new(DEFAULT_CLASS_LABELS.iter().map(|s| s.to_string()).collect())
    }

    /// このアプリで推論できるモデルか確認
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            anyhow::bail!("クラスラベルが空です");
        }
        if let Some(size) = self.image_size {
            if size as usize != INPUT_SIZE {
                anyhow::bail!("モデル入力サイズが不正です: {} (期待: {})", size, INPUT_SIZE);
            }
        }
        Ok(())
    }

    /// 書き出し時刻。形式が崩れていれば None
    pub fn trained_at(&self) -> Option<DateTime<FixedOffset>> {
        self.time_stamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to deserialize metadata from JSON")
    }
}

/// メタデータをログに出力
pub fn print_metadata_info(metadata: &ModelMetadata) {
    log::info!("=== モデルメタデータ ===");
    if let Some(name) = &metadata.model_name {
        log::info!("モデル名: {}", name);
    }
    log::info!("クラスラベル: {}", metadata.labels.join(", "));
    if let Some(size) = metadata.image_size {
        log::info!("モデル入力サイズ: {}x{}", size, size);
    }
    if let Some(trained_at) = metadata.trained_at() {
        log::info!("書き出し日時: {}", trained_at.with_timezone(&chrono::Local));
    }
}
