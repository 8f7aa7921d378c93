//! テスト用の小さなTF.jsモデル

use serde_json::{json, Value};

use crate::model::model_storage::{ModelArtifacts, ModelJson, WeightEntry, WeightsGroup};

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// トポロジーと (名前, 形状, 値) の並びから単一シャードのモデルを組み立てる
pub fn artifacts_from(topology: Value, weights: Vec<(&str, Vec<usize>, Vec<f32>)>) -> ModelArtifacts {
    let mut entries = Vec::new();
    let mut shard = Vec::new();
    for (name, shape, values) in weights {
        assert_eq!(shape.iter().product::<usize>(), values.len(), "{}", name);
        entries.push(WeightEntry {
            name: name.to_string(),
            shape,
            dtype: "float32".to_string(),
            quantization: None,
        });
        shard.extend(f32_bytes(&values));
    }

    ModelArtifacts {
        model_json: ModelJson {
            model_topology: topology,
            weights_manifest: vec![WeightsGroup {
                paths: vec!["weights.bin".to_string()],
                weights: entries,
            }],
            format: Some("layers-model".to_string()),
            generated_by: None,
            converted_by: None,
        },
        shards: vec![shard],
        metadata: None,
    }
}

/// Keras の Sequential 構成
pub fn sequential(layers: Vec<Value>) -> Value {
    json!({
        "class_name": "Sequential",
        "config": { "name": "sequential_4", "layers": layers },
        "keras_version": "tfjs-layers 1.3.1",
        "backend": "tensor_flow.js"
    })
}

/// 画素平均 -> Dense(2, softmax) だけの分類ヘッド
pub fn knife_head_topology() -> Value {
    sequential(vec![
        json!({
            "class_name": "GlobalAveragePooling2D",
            "config": {
                "name": "global_average_pooling2d_1",
                "batch_input_shape": [null, 224, 224, 3],
                "dtype": "float32",
                "data_format": "channels_last"
            }
        }),
        json!({
            "class_name": "Dense",
            "config": {
                "name": "dense_Dense2",
                "units": 2,
                "activation": "softmax",
                "use_bias": true
            }
        }),
    ])
}

/// 赤が多いほど「ナイフ」、青が多いほど「ナイフではない」に寄るモデル
pub fn knife_head_artifacts() -> ModelArtifacts {
    artifacts_from(
        knife_head_topology(),
        vec![
            ("dense_Dense2/kernel", vec![3, 2], vec![0.02, -0.02, 0.0, 0.0, -0.02, 0.02]),
            ("dense_Dense2/bias", vec![2], vec![0.0, 0.0]),
        ],
    )
}
