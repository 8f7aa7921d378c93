//! ナイフ検出コンポーネントの状態管理
//!
//! モデルハンドル・表示中の画像・最後の判定結果・推論中フラグを1つの構造体で保持します。
//!
//! # 状態遷移
//! - モデル: Idle -> Loading -> (Ready | Failed)。読み込みはインスタンスにつき1回のみ
//! - 推論: Ready -> 推論中(busy) -> Ready
//!
//! # 既知の制限
//! 画像アップロードの完了は待ち合わせない。フロントエンドがプレビューを表示してから
//! `upload_image` が完了するまでの間にボタンが押されると、前の画像（無ければ何もしない）
//! で推論される。

use image::RgbImage;
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{DetectorError, Result};
use crate::image_input::{self, InputTensor};
use crate::types::{Classification, DetectorView, ModelStatus};

/// 読み込み済みモデルハンドル（順伝播のみを提供）
pub trait Classifier: Send + Sync + 'static {
    /// 入力テンソル `[1, 224, 224, 3]` に対する出力ベクトルを返す
    fn predict(&self, input: InputTensor) -> anyhow::Result<Vec<f32>>;
}

/// モデルの取得と復元
pub trait ModelLoader<M> {
    fn load(&self) -> impl Future<Output = anyhow::Result<M>> + Send;
}

enum ModelSlot<M> {
    Idle,
    Loading,
    Ready(Arc<M>),
    Failed(String),
}

impl<M> ModelSlot<M> {
    fn status(&self) -> ModelStatus {
        match self {
            ModelSlot::Idle => ModelStatus::Idle,
            ModelSlot::Loading => ModelStatus::Loading,
            ModelSlot::Ready(_) => ModelStatus::Ready,
            ModelSlot::Failed(_) => ModelStatus::Failed,
        }
    }
}

struct DetectorState<M> {
    model: ModelSlot<M>,
    image: Option<Arc<RgbImage>>,
    last_result: Option<Classification>,
    busy: bool,
}

pub struct KnifeDetector<M> {
    state: Mutex<DetectorState<M>>,
}

// 推論の終了経路（成功・失敗・パニック）に関わらず busy を下ろす
struct BusyGuard<'a, M> {
    state: &'a Mutex<DetectorState<M>>,
}

impl<M> Drop for BusyGuard<'_, M> {
    fn drop(&mut self) {
        self.state.lock().busy = false;
    }
}

// 画像デコードはCPU負荷が高いので非同期ランタイムのスレッドを塞がない
async fn decode_off_thread<F>(decode: F) -> Result<RgbImage>
where
    F: FnOnce() -> Result<RgbImage> + Send + 'static,
{
    tokio::task::spawn_blocking(decode)
        .await
        .map_err(|e| DetectorError::Inference(format!("画像デコードタスクが異常終了しました: {}", e)))?
}

impl<M: Classifier> KnifeDetector<M> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DetectorState {
                model: ModelSlot::Idle,
                image: None,
                last_result: None,
                busy: false,
            }),
        }
    }

    /// モデルを読み込む
    ///
    /// 初回呼び出しのみ実際に読み込み、2回目以降（読み込み中を含む）は現在の状態を返すだけ。
    /// 失敗はログに出して Failed のまま。再試行はしない。
    pub async fn load_model<L: ModelLoader<M>>(&self, loader: &L) -> ModelStatus {
        {
            let mut state = self.state.lock();
            if !matches!(state.model, ModelSlot::Idle) {
                log::debug!("モデル読み込みは既に開始済み: {:?}", state.model.status());
                return state.model.status();
            }
            state.model = ModelSlot::Loading;
        }

        log::info!("Loading model...");
        let slot = match loader.load().await {
            Ok(model) => {
                log::info!("Model loaded successfully!");
                ModelSlot::Ready(Arc::new(model))
            }
            Err(e) => {
                log::error!("Error loading model: {:#}", e);
                ModelSlot::Failed(format!("{:#}", e))
            }
        };

        let mut state = self.state.lock();
        state.model = slot;
        state.model.status()
    }

    /// データURLから画像を差し替える
    ///
    /// base64とPNG/JPEGのデコードはブロッキングスレッドで行う。
    /// デコードに失敗した場合は前の画像をそのまま残す。判定結果には触れない。
    pub async fn upload_image_data_url(&self, data_url: String) -> Result<()> {
        let image = decode_off_thread(move || image_input::decode_image_data_url(&data_url))
            .await
            .map_err(|e| {
                log::warn!("アップロード画像を読み込めません: {}", e);
                e
            })?;
        self.replace_image(image);
        Ok(())
    }

    pub async fn upload_image_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        let image = decode_off_thread(move || image_input::decode_image(&bytes))
            .await
            .map_err(|e| {
                log::warn!("アップロード画像を読み込めません: {}", e);
                e
            })?;
        self.replace_image(image);
        Ok(())
    }

    pub async fn upload_image_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let image = decode_off_thread({
            let path = path.clone();
            move || image_input::open_image(&path)
        })
        .await
        .map_err(|e| {
            log::warn!("画像ファイルを読み込めません ({:?}): {}", path, e);
            e
        })?;
        self.replace_image(image);
        Ok(())
    }

    fn replace_image(&self, image: RgbImage) {
        let (w, h) = image.dimensions();
        log::debug!("画像を差し替え: {}x{}", w, h);
        self.state.lock().image = Some(Arc::new(image));
    }

    /// 表示中の画像を分類する
    ///
    /// 推論中・モデル未読み込み・画像未設定のいずれかなら何もせず `Ok(None)`。
    pub async fn classify(&self) -> Result<Option<Classification>> {
        let (model, image) = {
            let mut state = self.state.lock();
            if state.busy {
                log::debug!("推論中のため無視します");
                return Ok(None);
            }
            let model = match &state.model {
                ModelSlot::Ready(model) => Arc::clone(model),
                _ => {
                    log::debug!("モデル未読み込みのため無視します");
                    return Ok(None);
                }
            };
            let image = match &state.image {
                Some(image) => Arc::clone(image),
                None => {
                    log::debug!("画像が無いため無視します");
                    return Ok(None);
                }
            };
            state.busy = true;
            (model, image)
        };
        let _busy = BusyGuard { state: &self.state };

        let output = tokio::task::spawn_blocking(move || {
            let input = InputTensor::from_image(&image);
            model.predict(input)
        })
        .await
        .map_err(|e| DetectorError::Inference(format!("推論タスクが異常終了しました: {}", e)))?
        .map_err(|e| DetectorError::Inference(format!("{:#}", e)))?;

        log::debug!("Predictions: {:?}", output);

        let result = Classification::from_output(&output).ok_or(DetectorError::EmptyOutput)?;
        self.state.lock().last_result = Some(result.clone());

        Ok(Some(result))
    }

    pub fn model_status(&self) -> ModelStatus {
        self.state.lock().model.status()
    }

    /// 読み込み失敗時のエラーメッセージ
    pub fn load_error(&self) -> Option<String> {
        match &self.state.lock().model {
            ModelSlot::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }

    pub fn image_dimensions(&self) -> Option<(u32, u32)> {
        self.state.lock().image.as_ref().map(|image| image.dimensions())
    }

    pub fn last_result(&self) -> Option<Classification> {
        self.state.lock().last_result.clone()
    }

    pub fn view(&self) -> DetectorView {
        let state = self.state.lock();
        DetectorView::new(
            state.model.status(),
            state.busy,
            state.image.is_some(),
            state.last_result.as_ref(),
        )
    }
}

impl<M: Classifier> Default for KnifeDetector<M> {
    fn default() -> Self {
        Self::new()
    }
}
