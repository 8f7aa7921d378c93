//! 機械学習モデルの定義
//!
//! model.json の Keras 構成（Sequential / Functional）を解釈し、
//! burn のレイヤーに重みを読み込んで順伝播できる形に組み立てます。
//!
//! 対応レイヤー: InputLayer, Conv2D, DepthwiseConv2D, BatchNormalization, ReLU,
//! Activation, ZeroPadding2D, Add, GlobalAveragePooling2D, Flatten, Dense, Dropout
//! （Dropout は推論時は何もしない）。
//!
//! 内部では NCHW で計算し、入力の NHWC は最初に並べ替えます。

use anyhow::{anyhow, bail, Context, Result};
use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Linear, LinearConfig,
    },
    tensor::{activation, backend::Backend, Tensor, TensorData},
};
use serde_json::Value as Json;
use std::collections::HashMap;

use crate::model::{WeightData, WeightStore};

// Sequential の先頭レイヤーに渡す入力の名前
const SEQUENTIAL_INPUT: &str = "__input";

/// 活性化関数
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Linear,
    Relu,
    /// 上限付きReLU（relu6 や ReLU(max_value)）
    BoundedRelu(f32),
    Sigmoid,
    Tanh,
    /// チャネル方向（dim 1）のソフトマックス
    Softmax,
}

impl Activation {
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "linear" => Activation::Linear,
            "relu" => Activation::Relu,
            "relu6" => Activation::BoundedRelu(6.0),
            "sigmoid" => Activation::Sigmoid,
            "tanh" => Activation::Tanh,
            "softmax" => Activation::Softmax,
            other => bail!("未対応の活性化関数です: {}", other),
        })
    }

    fn from_config(config: &Json) -> Result<Self> {
        match config.get("activation").and_then(Json::as_str) {
            Some(name) => Self::parse(name),
            None => Ok(Activation::Linear),
        }
    }

    fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Linear => x,
            Activation::Relu => activation::relu(x),
            Activation::BoundedRelu(max) => x.clamp(0.0, max),
            Activation::Sigmoid => activation::sigmoid(x),
            Activation::Tanh => x.tanh(),
            Activation::Softmax => activation::softmax(x, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Padding {
    Valid,
    Same,
}

/// "same" パディングの前後の量
///
/// TensorFlow と同じく、合計が奇数のときは後ろ（下・右）を1つ多くする。
pub fn same_padding(input: usize, kernel: usize, stride: usize, dilation: usize) -> (usize, usize) {
    let effective = (kernel - 1) * dilation + 1;
    let output = input.div_ceil(stride);
    let total = ((output.max(1) - 1) * stride + effective).saturating_sub(input);
    (total / 2, total - total / 2)
}

/// NCHW テンソルの上下左右をゼロで埋める
fn zero_pad<B: Backend>(x: Tensor<B, 4>, [top, bottom, left, right]: [usize; 4]) -> Tensor<B, 4> {
    if top + bottom + left + right == 0 {
        return x;
    }
    let [n, c, h, w] = x.dims();
    let device = x.device();

    let mut rows = Vec::with_capacity(3);
    if top > 0 {
        rows.push(Tensor::zeros([n, c, top, w], &device));
    }
    rows.push(x);
    if bottom > 0 {
        rows.push(Tensor::zeros([n, c, bottom, w], &device));
    }
    let x = Tensor::cat(rows, 2);

    let h = h + top + bottom;
    let mut cols = Vec::with_capacity(3);
    if left > 0 {
        cols.push(Tensor::zeros([n, c, h, left], &device));
    }
    cols.push(x);
    if right > 0 {
        cols.push(Tensor::zeros([n, c, h, right], &device));
    }
    Tensor::cat(cols, 3)
}

/// レイヤー間を流れる値（空間テンソル NCHW か、平坦化済み [N, C]）
#[derive(Debug, Clone)]
enum Value<B: Backend> {
    Spatial(Tensor<B, 4>),
    Flat(Tensor<B, 2>),
}

impl<B: Backend> Value<B> {
    fn spatial(self, layer: &str) -> Result<Tensor<B, 4>> {
        match self {
            Value::Spatial(x) => Ok(x),
            Value::Flat(_) => bail!("レイヤー {} には4次元の入力が必要です", layer),
        }
    }

    fn flat(self, layer: &str) -> Result<Tensor<B, 2>> {
        match self {
            Value::Flat(x) => Ok(x),
            Value::Spatial(_) => bail!("レイヤー {} には2次元の入力が必要です", layer),
        }
    }

    fn activate(self, activation: Activation) -> Self {
        match self {
            Value::Spatial(x) => Value::Spatial(activation.apply(x)),
            Value::Flat(x) => Value::Flat(activation.apply(x)),
        }
    }

    fn channels(&self) -> usize {
        match self {
            Value::Spatial(x) => x.dims()[1],
            Value::Flat(x) => x.dims()[1],
        }
    }
}

enum Layer<B: Backend> {
    Identity,
    Conv2d {
        conv: Conv2d<B>,
        in_channels: usize,
        kernel: [usize; 2],
        stride: [usize; 2],
        dilation: [usize; 2],
        padding: Padding,
        activation: Activation,
    },
    Dense {
        linear: Linear<B>,
        in_features: usize,
        activation: Activation,
    },
    /// 推論時の BatchNormalization は `x * scale + shift` に畳み込める
    BatchNorm {
        scale: Tensor<B, 1>,
        shift: Tensor<B, 1>,
    },
    Activation(Activation),
    ZeroPadding([usize; 4]),
    Add,
    GlobalAveragePooling,
    Flatten,
    Graph(Box<Graph<B>>),
}

struct Node<B: Backend> {
    name: String,
    layer: Layer<B>,
    inbound: Vec<String>,
}

/// レイヤーの計算グラフ（単一入力・単一出力）
struct Graph<B: Backend> {
    nodes: Vec<Node<B>>,
    input: String,
    output: String,
}

impl<B: Backend> Graph<B> {
    fn forward(&self, input: Value<B>) -> Result<Value<B>> {
        let mut values: HashMap<&str, Value<B>> = HashMap::new();
        values.insert(self.input.as_str(), input);

        for node in &self.nodes {
            // Functional の InputLayer は入力そのもの
            if node.inbound.is_empty() {
                if !values.contains_key(node.name.as_str()) {
                    bail!("入力 {} が与えられていません", node.name);
                }
                continue;
            }

            let args = node
                .inbound
                .iter()
                .map(|name| {
                    values
                        .get(name.as_str())
                        .cloned()
                        .ok_or_else(|| anyhow!("レイヤー {} の入力 {} が未計算です", node.name, name))
                })
                .collect::<Result<Vec<_>>>()?;

            let output = node.layer.forward(&node.name, args)?;
            values.insert(node.name.as_str(), output);
        }

        values
            .remove(self.output.as_str())
            .ok_or_else(|| anyhow!("出力レイヤー {} が見つかりません", self.output))
    }

    fn layer_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| match &node.layer {
                Layer::Graph(graph) => graph.layer_count(),
                _ => 1,
            })
            .sum()
    }
}

impl<B: Backend> Layer<B> {
    fn forward(&self, name: &str, args: Vec<Value<B>>) -> Result<Value<B>> {
        if let Layer::Add = self {
            return add_all(name, args);
        }

        let mut args = args.into_iter();
        let x = match (args.next(), args.next()) {
            (Some(x), None) => x,
            _ => bail!("レイヤー {} は入力を1つだけ受け取ります", name),
        };

        let output = match self {
            Layer::Identity => x,
            Layer::Conv2d {
                conv,
                in_channels,
                kernel,
                stride,
                dilation,
                padding,
                activation,
            } => {
                if x.channels() != *in_channels {
                    bail!(
                        "レイヤー {} の入力チャネル数が一致しません: {} (期待: {})",
                        name,
                        x.channels(),
                        in_channels
                    );
                }
                let x = x.spatial(name)?;
                let x = match padding {
                    Padding::Valid => x,
                    Padding::Same => {
                        let [_, _, h, w] = x.dims();
                        let (top, bottom) = same_padding(h, kernel[0], stride[0], dilation[0]);
                        let (left, right) = same_padding(w, kernel[1], stride[1], dilation[1]);
                        zero_pad(x, [top, bottom, left, right])
                    }
                };
                Value::Spatial(activation.apply(conv.forward(x)))
            }
            Layer::Dense {
                linear,
                in_features,
                activation,
            } => {
                let x = x.flat(name)?;
                if x.dims()[1] != *in_features {
                    bail!(
                        "レイヤー {} の入力次元が一致しません: {} (期待: {})",
                        name,
                        x.dims()[1],
                        in_features
                    );
                }
                Value::Flat(activation.apply(linear.forward(x)))
            }
            Layer::BatchNorm { scale, shift } => {
                let [c] = scale.dims();
                if x.channels() != c {
                    bail!("レイヤー {} のチャネル数が一致しません: {} (期待: {})", name, x.channels(), c);
                }
                match x {
                    Value::Spatial(x) => Value::Spatial(
                        x * scale.clone().reshape([1, c, 1, 1]) + shift.clone().reshape([1, c, 1, 1]),
                    ),
                    Value::Flat(x) => {
                        Value::Flat(x * scale.clone().reshape([1, c]) + shift.clone().reshape([1, c]))
                    }
                }
            }
            Layer::Activation(activation) => x.activate(*activation),
            Layer::ZeroPadding(padding) => Value::Spatial(zero_pad(x.spatial(name)?, *padding)),
            Layer::GlobalAveragePooling => {
                let x = x.spatial(name)?;
                let [n, c, _, _] = x.dims();
                Value::Flat(x.mean_dim(3).mean_dim(2).reshape([n, c]))
            }
            Layer::Flatten => match x {
                // Keras と同じ (H, W, C) の順に並べる
                Value::Spatial(x) => {
                    let [n, c, h, w] = x.dims();
                    Value::Flat(x.permute([0, 2, 3, 1]).reshape([n, h * w * c]))
                }
                flat => flat,
            },
            Layer::Graph(graph) => graph.forward(x)?,
            Layer::Add => add_all(name, vec![x])?,
        };
        Ok(output)
    }
}

fn add_all<B: Backend>(name: &str, args: Vec<Value<B>>) -> Result<Value<B>> {
    let mut args = args.into_iter();
    let first = args
        .next()
        .ok_or_else(|| anyhow!("レイヤー {} に入力がありません", name))?;
    args.try_fold(first, |acc, value| match (acc, value) {
        (Value::Spatial(a), Value::Spatial(b)) if a.dims() == b.dims() => Ok(Value::Spatial(a + b)),
        (Value::Flat(a), Value::Flat(b)) if a.dims() == b.dims() => Ok(Value::Flat(a + b)),
        _ => Err(anyhow!("レイヤー {} の入力形状が一致しません", name)),
    })
}

// ---- model.json の設定値の読み出し ----

fn as_usize(value: &Json) -> Option<usize> {
    value.as_u64().map(|v| v as usize)
}

fn config_usize(config: &Json, key: &str) -> Result<usize> {
    config
        .get(key)
        .and_then(as_usize)
        .ok_or_else(|| anyhow!("設定 {} がありません", key))
}

fn config_pair(config: &Json, key: &str, default: [usize; 2]) -> Result<[usize; 2]> {
    match config.get(key) {
        None | Some(Json::Null) => Ok(default),
        Some(Json::Number(n)) => n
            .as_u64()
            .map(|v| [v as usize; 2])
            .ok_or_else(|| anyhow!("設定 {} が不正です", key)),
        Some(Json::Array(items)) => match items.as_slice() {
            [a, b] => match (as_usize(a), as_usize(b)) {
                (Some(a), Some(b)) => Ok([a, b]),
                _ => bail!("設定 {} が不正です", key),
            },
            _ => bail!("設定 {} が不正です", key),
        },
        Some(other) => bail!("設定 {} が不正です: {}", key, other),
    }
}

fn config_bool(config: &Json, key: &str, default: bool) -> bool {
    config.get(key).and_then(Json::as_bool).unwrap_or(default)
}

fn config_f64(config: &Json, key: &str, default: f64) -> f64 {
    config.get(key).and_then(Json::as_f64).unwrap_or(default)
}

fn conv_padding(config: &Json) -> Result<Padding> {
    match config.get("padding").and_then(Json::as_str).unwrap_or("valid") {
        "valid" => Ok(Padding::Valid),
        "same" => Ok(Padding::Same),
        other => bail!("未対応のパディングです: {}", other),
    }
}

fn check_channels_last(config: &Json) -> Result<()> {
    match config.get("data_format").and_then(Json::as_str) {
        None | Some("channels_last") => Ok(()),
        Some(other) => bail!("未対応のデータ形式です: {}", other),
    }
}

/// ZeroPadding2D の padding を [上, 下, 左, 右] に正規化
fn zero_padding_amounts(config: &Json) -> Result<[usize; 4]> {
    let padding = match config.get("padding") {
        None | Some(Json::Null) => return Ok([1; 4]),
        Some(padding) => padding,
    };
    if let Some(p) = as_usize(padding) {
        return Ok([p; 4]);
    }
    match padding.as_array().map(Vec::as_slice) {
        Some([rows, cols]) => {
            if let (Some(r), Some(c)) = (as_usize(rows), as_usize(cols)) {
                return Ok([r, r, c, c]);
            }
            let pair = |v: &Json| -> Option<(usize, usize)> {
                match v.as_array().map(Vec::as_slice) {
                    Some([a, b]) => Some((as_usize(a)?, as_usize(b)?)),
                    _ => None,
                }
            };
            match (pair(rows), pair(cols)) {
                (Some((top, bottom)), Some((left, right))) => Ok([top, bottom, left, right]),
                _ => bail!("ZeroPadding2D の padding が不正です: {}", padding),
            }
        }
        _ => bail!("ZeroPadding2D の padding が不正です: {}", padding),
    }
}

fn layer_name(entry: &Json) -> Result<String> {
    entry.get("config")
        .and_then(|c| c.get("name"))
        .or_else(|| entry.get("name"))
        .and_then(Json::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("レイヤー名がありません: {}", entry))
}

// ---- 重みからのテンソル生成 ----

fn tensor<B: Backend, const D: usize>(
    weight: &WeightData,
    expected: [usize; D],
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    if weight.shape.as_slice() != expected.as_slice() {
        bail!("重みの形状が一致しません: {:?} (期待: {:?})", weight.shape, expected);
    }
    Ok(Tensor::from_data(
        TensorData::new(weight.values.clone(), weight.shape.clone()),
        device,
    ))
}

fn kernel_dims(weight: &WeightData, layer: &str) -> Result<[usize; 4]> {
    match weight.shape.as_slice() {
        [kh, kw, a, b] => Ok([*kh, *kw, *a, *b]),
        other => bail!("レイヤー {} のカーネルは4次元である必要があります: {:?}", layer, other),
    }
}

fn bias<B: Backend>(
    weights: &WeightStore,
    name: &str,
    size: usize,
    device: &B::Device,
) -> Result<Param<Tensor<B, 1>>> {
    let bias = weights.require(name, "bias")?;
    Ok(Param::from_tensor(tensor(bias, [size], device)?))
}

// ---- レイヤー構築 ----

fn build_layer<B: Backend>(entry: &Json, weights: &WeightStore, device: &B::Device) -> Result<Layer<B>> {
    let class_name = entry
        .get("class_name")
        .and_then(Json::as_str)
        .ok_or_else(|| anyhow!("class_name がありません: {}", entry))?;
    let name = layer_name(entry)?;
    let empty = Json::Null;
    let config = entry.get("config").unwrap_or(&empty);

    let layer = match class_name {
        "InputLayer" | "Dropout" | "SpatialDropout2D" => Layer::Identity,

        "Sequential" | "Model" | "Functional" => {
            Layer::Graph(Box::new(build_graph(entry, weights, device)?))
        }

        "Conv2D" => {
            check_channels_last(config)?;
            let filters = config_usize(config, "filters")?;
            let use_bias = config_bool(config, "use_bias", true);
            let kernel = weights.require(&name, "kernel")?;
            let [kh, kw, in_channels, out] = kernel_dims(kernel, &name)?;
            if out != filters {
                bail!("レイヤー {} のフィルター数が一致しません: {} (期待: {})", name, out, filters);
            }
            let stride = config_pair(config, "strides", [1, 1])?;
            let dilation = config_pair(config, "dilation_rate", [1, 1])?;

            let mut conv = Conv2dConfig::new([in_channels, filters], [kh, kw])
                .with_stride(stride)
                .with_dilation(dilation)
                .with_bias(use_bias)
                .init(device);
            // Keras: [kh, kw, in, out] -> burn: [out, in, kh, kw]
            conv.weight = Param::from_tensor(
                tensor::<B, 4>(kernel, [kh, kw, in_channels, filters], device)?.permute([3, 2, 0, 1]),
            );
            if use_bias {
                conv.bias = Some(bias(weights, &name, filters, device)?);
            }

            Layer::Conv2d {
                conv,
                in_channels,
                kernel: [kh, kw],
                stride,
                dilation,
                padding: conv_padding(config)?,
                activation: Activation::from_config(config)?,
            }
        }

        "DepthwiseConv2D" => {
            check_channels_last(config)?;
            let use_bias = config_bool(config, "use_bias", true);
            let kernel = weights.require(&name, "depthwise_kernel")?;
            let [kh, kw, in_channels, multiplier] = kernel_dims(kernel, &name)?;
            let out = in_channels * multiplier;
            let stride = config_pair(config, "strides", [1, 1])?;
            let dilation = config_pair(config, "dilation_rate", [1, 1])?;

            let mut conv = Conv2dConfig::new([in_channels, out], [kh, kw])
                .with_stride(stride)
                .with_dilation(dilation)
                .with_groups(in_channels)
                .with_bias(use_bias)
                .init(device);
            // Keras: [kh, kw, in, mult] -> burn: [in * mult, 1, kh, kw]
            conv.weight = Param::from_tensor(
                tensor::<B, 4>(kernel, [kh, kw, in_channels, multiplier], device)?
                    .permute([2, 3, 0, 1])
                    .reshape([out, 1, kh, kw]),
            );
            if use_bias {
                conv.bias = Some(bias(weights, &name, out, device)?);
            }

            Layer::Conv2d {
                conv,
                in_channels,
                kernel: [kh, kw],
                stride,
                dilation,
                padding: conv_padding(config)?,
                activation: Activation::from_config(config)?,
            }
        }

        "BatchNormalization" => {
            match config.get("axis") {
                None | Some(Json::Null) => {}
                Some(axis) if axis.as_i64() == Some(-1) || axis.as_i64() == Some(3) => {}
                Some(axis) => bail!("レイヤー {} の axis {} は未対応です", name, axis),
            }
            let epsilon = config_f64(config, "epsilon", 1e-3) as f32;
            let mean = &weights.require(&name, "moving_mean")?.values;
            let variance = &weights.require(&name, "moving_variance")?.values;
            let channels = mean.len();
            if variance.len() != channels {
                bail!("レイヤー {} の統計量の長さが一致しません", name);
            }

            let per_channel = |suffix: &str, enabled: bool, default: f32| -> Result<Vec<f32>> {
                if !enabled {
                    return Ok(vec![default; channels]);
                }
                let values = &weights.require(&name, suffix)?.values;
                if values.len() != channels {
                    bail!("レイヤー {} の {} の長さが一致しません", name, suffix);
                }
                Ok(values.clone())
            };
            let gamma = per_channel("gamma", config_bool(config, "scale", true), 1.0)?;
            let beta = per_channel("beta", config_bool(config, "center", true), 0.0)?;

            let scale: Vec<f32> = gamma
                .iter()
                .zip(variance)
                .map(|(g, v)| g / (v + epsilon).sqrt())
                .collect();
            let shift: Vec<f32> = beta
                .iter()
                .zip(mean)
                .zip(&scale)
                .map(|((b, m), s)| b - m * s)
                .collect();

            Layer::BatchNorm {
                scale: Tensor::from_data(TensorData::new(scale, [channels]), device),
                shift: Tensor::from_data(TensorData::new(shift, [channels]), device),
            }
        }

        "ReLU" => {
            if config_f64(config, "negative_slope", 0.0) != 0.0 || config_f64(config, "threshold", 0.0) != 0.0 {
                bail!("レイヤー {} の negative_slope / threshold は未対応です", name);
            }
            match config.get("max_value").and_then(Json::as_f64) {
                Some(max) => Layer::Activation(Activation::BoundedRelu(max as f32)),
                None => Layer::Activation(Activation::Relu),
            }
        }

        "Activation" => Layer::Activation(Activation::from_config(config)?),

        "ZeroPadding2D" => {
            check_channels_last(config)?;
            Layer::ZeroPadding(zero_padding_amounts(config)?)
        }

        "Add" => Layer::Add,

        "GlobalAveragePooling2D" => {
            check_channels_last(config)?;
            if config_bool(config, "keepdims", false) {
                bail!("レイヤー {} の keepdims は未対応です", name);
            }
            Layer::GlobalAveragePooling
        }

        "Flatten" => Layer::Flatten,

        "Dense" => {
            let units = config_usize(config, "units")?;
            let use_bias = config_bool(config, "use_bias", true);
            let kernel = weights.require(&name, "kernel")?;
            let in_features = match kernel.shape.as_slice() {
                [input, output] if *output == units => *input,
                other => bail!("レイヤー {} のカーネル形状が不正です: {:?}", name, other),
            };

            let mut linear = LinearConfig::new(in_features, units)
                .with_bias(use_bias)
                .init(device);
            // Keras も burn も [in, out]
            linear.weight = Param::from_tensor(tensor(kernel, [in_features, units], device)?);
            if use_bias {
                linear.bias = Some(bias(weights, &name, units, device)?);
            }

            Layer::Dense {
                linear,
                in_features,
                activation: Activation::from_config(config)?,
            }
        }

        other => bail!("未対応のレイヤーです: {} ({})", other, name),
    };

    log::trace!("[Model] レイヤー構築: {} ({})", name, class_name);
    Ok(layer)
}

fn build_graph<B: Backend>(entry: &Json, weights: &WeightStore, device: &B::Device) -> Result<Graph<B>> {
    let class_name = entry
        .get("class_name")
        .and_then(Json::as_str)
        .ok_or_else(|| anyhow!("モデルの class_name がありません"))?;
    let config = entry
        .get("config")
        .ok_or_else(|| anyhow!("モデルの config がありません"))?;

    match class_name {
        "Sequential" => build_sequential(config, weights, device),
        "Model" | "Functional" => build_functional(config, weights, device),
        other => bail!("未対応のモデル形式です: {}", other),
    }
}

fn build_sequential<B: Backend>(config: &Json, weights: &WeightStore, device: &B::Device) -> Result<Graph<B>> {
    // 古い書き出しは config がレイヤー配列そのもの
    let layers = config
        .get("layers")
        .unwrap_or(config)
        .as_array()
        .ok_or_else(|| anyhow!("Sequential のレイヤー一覧がありません"))?;

    let mut nodes = Vec::with_capacity(layers.len());
    let mut previous = SEQUENTIAL_INPUT.to_string();
    for entry in layers {
        let name = layer_name(entry)?;
        let layer = build_layer(entry, weights, device)?;
        nodes.push(Node {
            name: name.clone(),
            layer,
            inbound: vec![previous],
        });
        previous = name;
    }

    Ok(Graph {
        nodes,
        input: SEQUENTIAL_INPUT.to_string(),
        output: previous,
    })
}

// [["name", 0, 0], ...] から唯一のレイヤー名を取り出す
fn single_endpoint(config: &Json, key: &str) -> Result<String> {
    let endpoints = config
        .get(key)
        .and_then(Json::as_array)
        .ok_or_else(|| anyhow!("{} がありません", key))?;
    match endpoints.as_slice() {
        [endpoint] => endpoint
            .get(0)
            .and_then(Json::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("{} の形式が不正です", key)),
        _ => bail!("複数の入出力を持つモデルは未対応です ({})", key),
    }
}

fn inbound_names(entry: &Json, name: &str) -> Result<Vec<String>> {
    let nodes = match entry.get("inbound_nodes").and_then(Json::as_array) {
        Some(nodes) => nodes,
        None => return Ok(Vec::new()),
    };
    match nodes.as_slice() {
        [] => Ok(Vec::new()),
        [node] => node
            .as_array()
            .ok_or_else(|| anyhow!("レイヤー {} の inbound_nodes の形式が不正です", name))?
            .iter()
            .map(|entry| {
                entry
                    .get(0)
                    .and_then(Json::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("レイヤー {} の inbound_nodes の形式が不正です", name))
            })
            .collect(),
        _ => bail!("共有レイヤーは未対応です: {}", name),
    }
}

fn build_functional<B: Backend>(config: &Json, weights: &WeightStore, device: &B::Device) -> Result<Graph<B>> {
    let layers = config
        .get("layers")
        .and_then(Json::as_array)
        .ok_or_else(|| anyhow!("Functional のレイヤー一覧がありません"))?;

    let mut nodes = Vec::with_capacity(layers.len());
    for entry in layers {
        let name = layer_name(entry)?;
        let inbound = inbound_names(entry, &name)?;
        let layer = build_layer(entry, weights, device)?;
        nodes.push(Node { name, layer, inbound });
    }

    Ok(Graph {
        nodes,
        input: single_endpoint(config, "input_layers")?,
        output: single_endpoint(config, "output_layers")?,
    })
}

/// model.json から組み立てたモデル
pub struct LayersModel<B: Backend> {
    graph: Graph<B>,
}

impl<B: Backend> LayersModel<B> {
    /// modelTopology と重みからモデルを構築
    pub fn from_topology(topology: &Json, weights: &WeightStore, device: &B::Device) -> Result<Self> {
        // Python 版の変換ツールは model_config の下に構成を置く
        let root = topology.get("model_config").unwrap_or(topology);
        let graph = build_graph(root, weights, device).context("モデル構成を解釈できません")?;
        log::debug!("[Model] レイヤー数: {}", graph.layer_count());
        Ok(Self { graph })
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, height, width, 3]（値は0〜255のまま）
    ///
    /// # 戻り値
    /// - 最終レイヤーの出力 [batch_size, num_outputs]
    pub fn forward(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 2>> {
        let x = images.permute([0, 3, 1, 2]);
        match self.graph.forward(Value::Spatial(x))? {
            Value::Flat(output) => Ok(output),
            Value::Spatial(output) => bail!("モデル出力が2次元ではありません: {:?}", output.dims()),
        }
    }

    pub fn layer_count(&self) -> usize {
        self.graph.layer_count()
    }
}
