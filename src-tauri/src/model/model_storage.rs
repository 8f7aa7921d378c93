//! モデル（TF.js layers 形式）の読み書き
//!
//! Teachable Machine の書き出しは同じディレクトリに置かれた次のファイルで構成されます。
//! リモートから取得したバイト列とローカルディレクトリの両方を扱います。
//!
//! ファイル構成:
//! - model.json      - レイヤー構成（Keras JSON）と重みマニフェスト
//! - weights.bin     - 重み（リトルエンディアン float32、複数シャードに分かれることがある）
//! - metadata.json   - クラスラベル・入力サイズ（無くてもよい）

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::model::model_metadata::ModelMetadata;

pub const MODEL_JSON_FILE: &str = "model.json";
pub const METADATA_FILE: &str = "metadata.json";

/// model.json の中身
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelJson {
    /// Keras のモデル構成。そのまま保持してレイヤー構築時に解釈する
    pub model_topology: serde_json::Value,

    #[serde(default)]
    pub weights_manifest: Vec<WeightsGroup>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_by: Option<String>,
}

/// 重みマニフェストの1グループ（シャードを連結したものに weights が順に並ぶ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsGroup {
    pub paths: Vec<String>,
    pub weights: Vec<WeightEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<serde_json::Value>,
}

impl ModelJson {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let model: ModelJson =
            serde_json::from_slice(bytes).context("model.json を解析できません")?;
        if let Some(format) = &model.format {
            if format != "layers-model" {
                anyhow::bail!("未対応のモデル形式です: {}", format);
            }
        }
        Ok(model)
    }

    /// 全グループのシャードパスをマニフェスト順に並べる
    pub fn shard_paths(&self) -> Vec<String> {
        self.weights_manifest
            .iter()
            .flat_map(|group| group.paths.iter().cloned())
            .collect()
    }
}

/// 1つの重みテンソル
#[derive(Debug, Clone, PartialEq)]
pub struct WeightData {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// 名前で引ける重みの集合
#[derive(Debug, Default)]
pub struct WeightStore {
    tensors: HashMap<String, WeightData>,
}

impl WeightStore {
    /// マニフェストとシャードのバイト列から重みを取り出す
    ///
    /// `shards` は [`ModelJson::shard_paths`] と同じ順序で並んでいること。
    pub fn from_manifest(manifest: &[WeightsGroup], shards: &[Vec<u8>]) -> Result<Self> {
        let expected: usize = manifest.iter().map(|group| group.paths.len()).sum();
        if shards.len() != expected {
            anyhow::bail!(
                "重みシャードの数が一致しません: {} (マニフェスト: {})",
                shards.len(),
                expected
            );
        }

        let mut tensors = HashMap::new();
        let mut shard_iter = shards.iter();

        for group in manifest {
            let buffer: Vec<u8> = shard_iter
                .by_ref()
                .take(group.paths.len())
                .flat_map(|shard| shard.iter().copied())
                .collect();

            let mut offset = 0;
            for entry in &group.weights {
                if entry.dtype != "float32" || entry.quantization.is_some() {
                    anyhow::bail!("未対応の重み形式です: {} ({})", entry.name, entry.dtype);
                }

                let count: usize = entry.shape.iter().product();
                let end = offset + count * 4;
                let bytes = buffer.get(offset..end).ok_or_else(|| {
                    anyhow::anyhow!(
                        "重みデータが不足しています: {} ({} bytes 必要, 残り {} bytes)",
                        entry.name,
                        count * 4,
                        buffer.len().saturating_sub(offset)
                    )
                })?;

                let values = bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                tensors.insert(
                    entry.name.clone(),
                    WeightData { shape: entry.shape.clone(), values },
                );
                offset = end;
            }

            if offset != buffer.len() {
                log::warn!(
                    "重みシャードに未使用の {} bytes があります: {:?}",
                    buffer.len() - offset,
                    group.paths
                );
            }
        }

        Ok(Self { tensors })
    }

    /// レイヤー名と重み名（kernel, bias など）で引く
    ///
    /// 入れ子のモデルではスコープが前に付くことがあるので末尾一致でも探す。
    pub fn get(&self, layer: &str, suffix: &str) -> Option<&WeightData> {
        let name = format!("{}/{}", layer, suffix);
        self.tensors.get(&name).or_else(|| {
            let scoped = format!("/{}", name);
            self.tensors
                .iter()
                .find(|(key, _)| key.ends_with(&scoped))
                .map(|(_, data)| data)
        })
    }

    pub fn require(&self, layer: &str, suffix: &str) -> Result<&WeightData> {
        self.get(layer, suffix)
            .ok_or_else(|| anyhow::anyhow!("重み {}/{} が見つかりません", layer, suffix))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// 1つのモデルを構成するファイル一式
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub model_json: ModelJson,
    /// [`ModelJson::shard_paths`] と同じ順序のシャード
    pub shards: Vec<Vec<u8>>,
    pub metadata: Option<ModelMetadata>,
}

impl ModelArtifacts {
    pub fn weights(&self) -> Result<WeightStore> {
        WeightStore::from_manifest(&self.model_json.weights_manifest, &self.shards)
    }

    /// metadata.json が無ければ既定のラベルを使う
    pub fn metadata_or_default(&self) -> ModelMetadata {
        self.metadata.clone().unwrap_or_else(ModelMetadata::default_labels)
    }
}

/// model.json の場所を基準に相対パスを解決する
pub fn resolve_relative(model_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    match model_url.rfind('/') {
        Some(i) => format!("{}{}", &model_url[..=i], path),
        None => path.to_string(),
    }
}

// マニフェストのパスがディレクトリの外を指していないか確認
fn shard_file(dir: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        anyhow::bail!("重みシャードのパスが不正です: {}", path);
    }
    Ok(dir.join(relative))
}

/// ディレクトリ（または model.json のパス）からモデル一式を読み込む
pub fn read_artifacts_dir(path: &Path) -> Result<ModelArtifacts> {
    let (dir, model_path) = if path.is_dir() {
        (path.to_path_buf(), path.join(MODEL_JSON_FILE))
    } else {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        (dir, path.to_path_buf())
    };

    let bytes = std::fs::read(&model_path)
        .context(format!("Failed to open model.json: {:?}", model_path))?;
    let model_json = ModelJson::from_slice(&bytes)?;

    let mut shards = Vec::new();
    for shard in model_json.shard_paths() {
        let shard_path = shard_file(&dir, &shard)?;
        shards.push(
            std::fs::read(&shard_path)
                .context(format!("Failed to open weights: {:?}", shard_path))?,
        );
    }

    let metadata_path = dir.join(METADATA_FILE);
    let metadata = if metadata_path.exists() {
        let bytes = std::fs::read(&metadata_path)?;
        Some(ModelMetadata::from_slice(&bytes)?)
    } else {
        None
    };

    Ok(ModelArtifacts { model_json, shards, metadata })
}

/// モデル一式をディレクトリに保存
pub fn save_artifacts_dir(dir: &Path, artifacts: &ModelArtifacts) -> Result<()> {
    std::fs::create_dir_all(dir).context(format!("Failed to create directory: {:?}", dir))?;

    let json = serde_json::to_vec_pretty(&artifacts.model_json)?;
    std::fs::write(dir.join(MODEL_JSON_FILE), json)?;

    let paths = artifacts.model_json.shard_paths();
    if paths.len() != artifacts.shards.len() {
        anyhow::bail!("重みシャードの数がマニフェストと一致しません");
    }
    for (path, bytes) in paths.iter().zip(&artifacts.shards) {
        let shard_path = shard_file(dir, path)?;
        std::fs::write(&shard_path, bytes)
            .context(format!("Failed to write weights: {:?}", shard_path))?;
    }

    if let Some(metadata) = &artifacts.metadata {
        std::fs::write(dir.join(METADATA_FILE), metadata.to_json_string()?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{artifacts_from, f32_bytes, knife_head_topology};

    #[test]
    fn test_weights_span_multiple_shards() {
        let manifest = vec![WeightsGroup {
            paths: vec!["group1-shard1of2.bin".to_string(), "group1-shard2of2.bin".to_string()],
            weights: vec![
                WeightEntry {
                    name: "dense/kernel".to_string(),
                    shape: vec![3, 1],
                    dtype: "float32".to_string(),
                    quantization: None,
                },
                WeightEntry {
                    name: "dense/bias".to_string(),
                    shape: vec![1],
                    dtype: "float32".to_string(),
                    quantization: None,
                },
            ],
        }];
        let bytes = f32_bytes(&[1.0, 2.0, 3.0, -0.5]);
        // シャードの境界が値の途中に来てもよい
        let shards = vec![bytes[..6].to_vec(), bytes[6..].to_vec()];

        let store = WeightStore::from_manifest(&manifest, &shards).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.require("dense", "kernel").unwrap().values, vec![1.0, 2.0, 3.0]);
        assert_eq!(store.require("dense", "kernel").unwrap().shape, vec![3, 1]);
        assert_eq!(store.require("dense", "bias").unwrap().values, vec![-0.5]);
    }

    #[test]
    fn test_scoped_weight_names() {
        let artifacts = artifacts_from(
            knife_head_topology(),
            vec![
                ("sequential_3/dense_Dense2/kernel", vec![3, 2], vec![0.0; 6]),
                ("sequential_3/dense_Dense2/bias", vec![2], vec![0.25, 0.75]),
            ],
        );
        let store = artifacts.weights().unwrap();
        assert_eq!(store.require("dense_Dense2", "bias").unwrap().values, vec![0.25, 0.75]);
        assert!(store.get("Dense2", "bias").is_none());
    }

    #[test]
    fn test_short_shard_is_rejected() {
        let mut artifacts = artifacts_from(
            knife_head_topology(),
            vec![("dense_Dense2/kernel", vec![3, 2], vec![0.0; 6])],
        );
        artifacts.shards[0].truncate(10);

        let err = artifacts.weights().unwrap_err();
        assert!(err.to_string().contains("不足"));
    }

    #[test]
    fn test_quantized_weights_are_rejected() {
        let mut artifacts = artifacts_from(
            knife_head_topology(),
            vec![("dense_Dense2/kernel", vec![3, 2], vec![0.0; 6])],
        );
        artifacts.model_json.weights_manifest[0].weights[0].quantization =
            Some(serde_json::json!({"dtype": "uint8", "scale": 0.1, "min": 0.0}));

        assert!(artifacts.weights().is_err());
    }

    #[test]
    fn test_shard_count_mismatch() {
        let mut artifacts = artifacts_from(
            knife_head_topology(),
            vec![("dense_Dense2/kernel", vec![3, 2], vec![0.0; 6])],
        );
        artifacts.shards.push(vec![0; 4]);
        assert!(artifacts.weights().is_err());
    }

    #[test]
    fn test_rejects_graph_model_format() {
        let json = br#"{"format": "graph-model", "modelTopology": {}}"#;
        assert!(ModelJson::from_slice(json).is_err());
        assert!(ModelJson::from_slice(b"<html>404</html>").is_err());
    }

    #[test]
    fn test_resolve_relative() {
        let url = "https://teachablemachine.withgoogle.com/models/abc/model.json";
        assert_eq!(
            resolve_relative(url, "weights.bin"),
            "https://teachablemachine.withgoogle.com/models/abc/weights.bin"
        );
        assert_eq!(
            resolve_relative(url, "https://cdn.example.com/w.bin"),
            "https://cdn.example.com/w.bin"
        );
    }

    #[test]
    fn test_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("knife");
        let mut artifacts = artifacts_from(
            knife_head_topology(),
            vec![
                ("dense_Dense2/kernel", vec![3, 2], vec![1.0, -1.0, 0.0, 0.0, -1.0, 1.0]),
                ("dense_Dense2/bias", vec![2], vec![0.0, 0.0]),
            ],
        );
        artifacts.metadata = Some(ModelMetadata::default_labels());

        save_artifacts_dir(&target, &artifacts).unwrap();
        let restored = read_artifacts_dir(&target).unwrap();
        assert_eq!(restored.shards, artifacts.shards);
        assert_eq!(restored.metadata, artifacts.metadata);

        // model.json を直接指定してもよい
        let restored = read_artifacts_dir(&target.join(MODEL_JSON_FILE)).unwrap();
        assert_eq!(restored.weights().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_metadata_uses_default_labels() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = artifacts_from(
            knife_head_topology(),
            vec![("dense_Dense2/kernel", vec![3, 2], vec![0.0; 6])],
        );
        save_artifacts_dir(dir.path(), &artifacts).unwrap();

        let restored = read_artifacts_dir(dir.path()).unwrap();
        assert!(restored.metadata.is_none());
        assert_eq!(restored.metadata_or_default().labels, vec!["Knife", "Not a Knife"]);
    }

    #[test]
    fn test_shard_path_outside_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifacts = artifacts_from(
            knife_head_topology(),
            vec![("dense_Dense2/kernel", vec![3, 2], vec![0.0; 6])],
        );
        artifacts.model_json.weights_manifest[0].paths = vec!["../weights.bin".to_string()];

        assert!(save_artifacts_dir(dir.path(), &artifacts).is_err());
    }
}
