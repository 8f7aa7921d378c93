//! モデルの取得
//!
//! 起動時に固定URLから model.json を1回だけ取得し、マニフェストに書かれた重みシャードと
//! metadata.json を同じ場所から続けて取得します。認証・再試行・タイムアウトはありません。

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::constants::MODEL_URL;
use crate::detector::ModelLoader;
use crate::ml::InferenceEngine;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::{
    read_artifacts_dir, resolve_relative, ModelArtifacts, ModelJson, METADATA_FILE,
};

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .context(format!("モデルの取得に失敗しました: {}", url))?
        .error_for_status()
        .context(format!("モデルの取得に失敗しました: {}", url))?;

    let bytes = response
        .bytes()
        .await
        .context(format!("ダウンロード中にエラーが発生しました: {}", url))?;

    log::debug!("取得しました: {} ({} bytes)", url, bytes.len());
    Ok(bytes.to_vec())
}

/// model.json のURLからモデル一式を取得
pub async fn fetch_artifacts(client: &reqwest::Client, url: &str) -> Result<ModelArtifacts> {
    let model_json = ModelJson::from_slice(&fetch_bytes(client, url).await?)?;

    let mut shards = Vec::new();
    for path in model_json.shard_paths() {
        shards.push(fetch_bytes(client, &resolve_relative(url, &path)).await?);
    }
    log::info!(
        "重みを取得しました: {} シャード, {} bytes",
        shards.len(),
        shards.iter().map(Vec::len).sum::<usize>()
    );

    // ラベル用。無くても推論はできる
    let metadata_url = resolve_relative(url, METADATA_FILE);
    let metadata = match fetch_bytes(client, &metadata_url).await {
        Ok(bytes) => match ModelMetadata::from_slice(&bytes) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                log::warn!("metadata.json を解析できません: {:#}", e);
                None
            }
        },
        Err(e) => {
            log::warn!("metadata.json を取得できません: {:#}", e);
            None
        }
    };

    Ok(ModelArtifacts { model_json, shards, metadata })
}

// レイヤー構築と重みの展開はCPU負荷が高いのでブロッキングスレッドで行う
async fn engine_from_artifacts(artifacts: ModelArtifacts) -> Result<InferenceEngine> {
    tokio::task::spawn_blocking(move || InferenceEngine::from_artifacts(&artifacts))
        .await
        .context("モデル復元タスクが異常終了しました")?
}

/// リモートの model.json からモデルを読み込む
pub struct RemoteModelLoader {
    url: String,
    client: reqwest::Client,
}

impl RemoteModelLoader {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Default for RemoteModelLoader {
    fn default() -> Self {
        Self::new(MODEL_URL)
    }
}

impl ModelLoader<InferenceEngine> for RemoteModelLoader {
    async fn load(&self) -> Result<InferenceEngine> {
        log::info!("モデルを取得しています: {}", self.url);
        let artifacts = fetch_artifacts(&self.client, &self.url).await?;
        engine_from_artifacts(artifacts).await
    }
}

/// ローカルに保存したモデル（model.json のあるディレクトリ）から読み込む
pub struct LocalModelLoader {
    path: PathBuf,
}

impl LocalModelLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ModelLoader<InferenceEngine> for LocalModelLoader {
    async fn load(&self) -> Result<InferenceEngine> {
        log::info!("モデルファイルを読み込んでいます: {:?}", self.path);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let artifacts = read_artifacts_dir(&path)?;
            InferenceEngine::from_artifacts(&artifacts)
        })
        .await
        .context("モデル復元タスクが異常終了しました")?
    }
}
