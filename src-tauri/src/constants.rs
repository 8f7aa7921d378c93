//! 検出器の固定値
//!
//! 閾値・クラスインデックス・入力サイズは設定不可の定数として扱います。

/// 学習済みモデル（TF.js layers 形式の model.json）の取得先
///
/// 重みシャードと metadata.json は同じディレクトリから相対パスで取得する。
pub const MODEL_URL: &str = "https://teachablemachine.withgoogle.com/models/1YM6sDQcC/model.json";

/// モデル入力の一辺（正方形）
pub const INPUT_SIZE: usize = 224;

/// 入力チャネル数（RGB）
pub const INPUT_CHANNELS: usize = 3;

/// 出力ベクトル中の「ナイフ」クラスの位置
pub const KNIFE_CLASS_INDEX: usize = 0;

/// この値を「超えた」場合のみナイフと判定する
pub const KNIFE_THRESHOLD: f32 = 0.5;

pub const KNIFE_LABEL: &str = "It's a Knife";
pub const NOT_KNIFE_LABEL: &str = "It's not a Knife";

pub const TRIGGER_IDLE_LABEL: &str = "Detect Knife";
pub const TRIGGER_BUSY_LABEL: &str = "Detecting...";

/// フロントエンドへ状態変化を通知するイベント名
pub const STATE_CHANGED_EVENT: &str = "detector-state-changed";
