//! 検出器のエラー型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("不正なデータURLです: {0}")]
    InvalidDataUrl(String),

    #[error("画像以外のファイルは扱えません: {0}")]
    UnsupportedMediaType(String),

    #[error("Base64デコードエラー: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("画像デコードエラー: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("推論エラー: {0}")]
    Inference(String),

    #[error("モデルの出力が空です")]
    EmptyOutput,
}

pub type Result<T> = std::result::Result<T, DetectorError>;
