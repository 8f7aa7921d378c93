//! フロントエンドから呼び出すTauriコマンド

use std::sync::Arc;
use tauri::State;

use crate::detector::KnifeDetector;
use crate::ml::InferenceEngine;
use crate::types::DetectorView;

pub struct AppState {
    pub detector: Arc<KnifeDetector<InferenceEngine>>,
}

#[tauri::command]
pub fn get_detector_state(state: State<AppState>) -> DetectorView {
    state.detector.view()
}

/// FileReader で読み込んだデータURLを受け取り、表示中の画像を差し替える
///
/// 同期コマンドはメインスレッドで実行されるので async にしておく
#[tauri::command]
pub async fn upload_image(data_url: String, state: State<'_, AppState>) -> Result<DetectorView, String> {
    state
        .detector
        .upload_image_data_url(data_url)
        .await
        .map_err(|e| e.to_string())?;
    Ok(state.detector.view())
}

/// 表示中の画像を分類する。モデル未読み込み・推論中・画像なしの場合は何もしない
#[tauri::command]
pub async fn classify_image(state: State<'_, AppState>) -> Result<DetectorView, String> {
    match state.detector.classify().await {
        Ok(Some(result)) => {
            log::info!("判定: {} (p = {:.3})", result.prediction, result.knife_probability);
        }
        Ok(None) => {}
        Err(e) => {
            log::error!("推論に失敗しました: {}", e);
            return Err(e.to_string());
        }
    }
    Ok(state.detector.view())
}
