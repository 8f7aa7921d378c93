use serde::{Deserialize, Serialize};

use crate::constants::{
    KNIFE_CLASS_INDEX, KNIFE_LABEL, KNIFE_THRESHOLD, NOT_KNIFE_LABEL, TRIGGER_BUSY_LABEL,
    TRIGGER_IDLE_LABEL,
};

// 二値判定の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prediction {
    Knife,
    NotKnife,
}

impl Prediction {
    /// ナイフ確率から判定（厳密に閾値より大きい場合のみナイフ、NaNはナイフではない）
    pub fn from_knife_probability(probability: f32) -> Self {
        if probability > KNIFE_THRESHOLD {
            Prediction::Knife
        } else {
            Prediction::NotKnife
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Prediction::Knife => KNIFE_LABEL,
            Prediction::NotKnife => NOT_KNIFE_LABEL,
        }
    }
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// 1回の推論結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub prediction: Prediction,
    pub knife_probability: f32,
}

impl Classification {
    /// モデル出力ベクトルから判定する。空の出力は None
    pub fn from_output(output: &[f32]) -> Option<Self> {
        let knife_probability = *output.get(KNIFE_CLASS_INDEX)?;
        Some(Self {
            prediction: Prediction::from_knife_probability(knife_probability),
            knife_probability,
        })
    }
}

// モデル読み込みの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Idle,    // 未開始
    Loading, // 取得中
    Ready,   // 推論可能
    Failed,  // 取得失敗（このセッションでは再試行しない）
}

/// フロントエンドに渡す検出器のスナップショット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorView {
    pub model_status: ModelStatus,
    pub busy: bool,
    pub has_image: bool,
    pub trigger_enabled: bool,
    pub trigger_label: String,
    pub prediction: Option<String>,
    pub knife_probability: Option<f32>,
}

impl DetectorView {
    pub fn new(
        model_status: ModelStatus,
        busy: bool,
        has_image: bool,
        last_result: Option<&Classification>,
    ) -> Self {
        // 画像の有無はボタンの有効化に関与しない
        let trigger_enabled = model_status == ModelStatus::Ready && !busy;
        let trigger_label = if busy { TRIGGER_BUSY_LABEL } else { TRIGGER_IDLE_LABEL };

        Self {
            model_status,
            busy,
            has_image,
            trigger_enabled,
            trigger_label: trigger_label.to_string(),
            prediction: last_result.map(|r| r.prediction.label().to_string()),
            knife_probability: last_result.map(|r| r.knife_probability),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_strict() {
        assert_eq!(Prediction::from_knife_probability(0.51), Prediction::Knife);
        assert_eq!(Prediction::from_knife_probability(0.49), Prediction::NotKnife);
        assert_eq!(Prediction::from_knife_probability(0.5), Prediction::NotKnife);
        assert_eq!(Prediction::from_knife_probability(f32::NAN), Prediction::NotKnife);
    }

    #[test]
    fn test_labels() {
        assert_eq!(Prediction::Knife.to_string(), "It's a Knife");
        assert_eq!(Prediction::NotKnife.to_string(), "It's not a Knife");
    }

    #[test]
    fn test_classification_reads_first_channel() {
        let result = Classification::from_output(&[0.9, 0.1]).unwrap();
        assert_eq!(result.prediction, Prediction::Knife);
        assert_eq!(result.knife_probability, 0.9);

        let result = Classification::from_output(&[0.2, 0.8]).unwrap();
        assert_eq!(result.prediction, Prediction::NotKnife);

        assert!(Classification::from_output(&[]).is_none());
    }

    #[test]
    fn test_view_trigger_state() {
        let view = DetectorView::new(ModelStatus::Loading, false, true, None);
        assert!(!view.trigger_enabled);
        assert_eq!(view.trigger_label, "Detect Knife");

        let view = DetectorView::new(ModelStatus::Ready, false, false, None);
        assert!(view.trigger_enabled);

        let view = DetectorView::new(ModelStatus::Ready, true, true, None);
        assert!(!view.trigger_enabled);
        assert_eq!(view.trigger_label, "Detecting...");
    }

    #[test]
    fn test_view_serializes_snake_case() {
        let result = Classification { prediction: Prediction::Knife, knife_probability: 0.75 };
        let view = DetectorView::new(ModelStatus::Ready, false, true, Some(&result));
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["model_status"], "ready");
        assert_eq!(json["prediction"], "It's a Knife");
        assert_eq!(json["knife_probability"], 0.75);
    }
}
