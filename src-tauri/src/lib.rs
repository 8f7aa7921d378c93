pub mod constants;
pub mod types;
pub mod error;
pub mod image_input;
pub mod detector;

// モデルの保存形式・取得・設定
pub mod model;
#[cfg(feature = "ml")]
pub mod ml;

#[cfg(feature = "desktop")]
mod commands;

pub use detector::{Classifier, KnifeDetector, ModelLoader};
pub use error::DetectorError;
pub use types::{Classification, DetectorView, ModelStatus, Prediction};

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use commands::AppState;
    use constants::STATE_CHANGED_EVENT;
    use model::{AppConfig, RemoteModelLoader};
    use std::sync::Arc;
    use tauri::Emitter;

    let (config, config_message) = AppConfig::load_or_default();
    config.init_logger();
    log::info!("{}", config_message);

    let detector = Arc::new(KnifeDetector::new());
    let app_state = AppState {
        detector: Arc::clone(&detector),
    };

    tauri::Builder::default()
        .setup(move |app| {
            // モデルは起動時に1回だけ取得する
            let handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                let loader = RemoteModelLoader::default();
                let status = detector.load_model(&loader).await;
                log::debug!("モデル状態: {:?}", status);

                if let Err(e) = handle.emit(STATE_CHANGED_EVENT, detector.view()) {
                    log::warn!("状態変更イベントの送信に失敗しました: {}", e);
                }
            });
            Ok(())
        })
        .manage(app_state)
        .invoke_handler(tauri::generate_handler![
            commands::get_detector_state,
            commands::upload_image,
            commands::classify_image,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
