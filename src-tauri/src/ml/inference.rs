//! モデル推論機能

use anyhow::Result;
use burn::{
    backend::NdArray,
    tensor::{backend::Backend, Tensor},
};
use parking_lot::Mutex;

use crate::detector::Classifier;
use crate::image_input::InputTensor;
use crate::ml::LayersModel;
use crate::model::{ModelArtifacts, ModelMetadata};

/// 推論エンジン
///
/// burn のモジュールは `Sync` ではないため Mutex 越しに保持する。
pub struct InferenceEngine<B: Backend = NdArray> {
    model: Mutex<LayersModel<B>>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// model.json・重みシャード・メタデータから推論エンジンを初期化
    pub fn from_artifacts(artifacts: &ModelArtifacts) -> Result<Self> {
        let metadata = artifacts.metadata_or_default();
        metadata.validate()?;

        let device: B::Device = Default::default();

        // モデルの重みを復元
        let weights = artifacts.weights()?;
        log::debug!("重みテンソル数: {}", weights.len());
        let model = LayersModel::from_topology(&artifacts.model_json.model_topology, &weights, &device)?;

        log::info!(
            "推論エンジン初期化: クラス [{}], レイヤー数 {}",
            metadata.labels.join(", "),
            model.layer_count()
        );

        Ok(Self {
            model: Mutex::new(model),
            metadata,
            device,
        })
    }

    /// メタデータへの参照を取得
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// 単一テンソルの順伝播
    pub fn forward(&self, input: InputTensor) -> Result<Vec<f32>> {
        let shape = input.shape();
        let tensor = Tensor::<B, 1>::from_floats(input.data(), &self.device).reshape(shape);

        let output = self.model.lock().forward(tensor)?;

        output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
    }
}

impl<B: Backend> Classifier for InferenceEngine<B>
where
    B::Device: Send + Sync,
    LayersModel<B>: Send,
{
    fn predict(&self, input: InputTensor) -> Result<Vec<f32>> {
        self.forward(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::knife_head_artifacts;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_forward_outputs_probabilities() {
        let engine = InferenceEngine::<NdArray>::from_artifacts(&knife_head_artifacts()).unwrap();

        let red = RgbImage::from_pixel(300, 200, Rgb([255, 0, 0]));
        let output = engine.predict(InputTensor::from_image(&red)).unwrap();
        assert_eq!(output.len(), 2);
        assert!((output.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert!(output[0] > 0.99);

        let blue = RgbImage::from_pixel(64, 64, Rgb([0, 0, 255]));
        let output = engine.predict(InputTensor::from_image(&blue)).unwrap();
        assert!(output[0] < 0.01);
    }

    #[test]
    fn test_labels_fall_back_when_metadata_missing() {
        let engine = InferenceEngine::<NdArray>::from_artifacts(&knife_head_artifacts()).unwrap();
        assert_eq!(engine.metadata().labels, vec!["Knife", "Not a Knife"]);
    }

    #[test]
    fn test_rejects_mismatched_input_size() {
        let mut artifacts = knife_head_artifacts();
        let mut metadata = ModelMetadata::default_labels();
        metadata.image_size = Some(96);
        artifacts.metadata = Some(metadata);

        assert!(InferenceEngine::<NdArray>::from_artifacts(&artifacts).is_err());
    }

    #[test]
    fn test_rejects_garbage_weights() {
        let mut artifacts = knife_head_artifacts();
        artifacts.shards = vec![vec![1, 2, 3]];

        let err = InferenceEngine::<NdArray>::from_artifacts(&artifacts).err().unwrap();
        assert!(err.to_string().contains("重みデータが不足しています"));
    }
}
