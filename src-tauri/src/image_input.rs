//! アップロード画像の取り込みとモデル入力テンソルへの変換
//!
//! フロントエンドは FileReader でファイルをデータURLとして読み込み、そのまま送ってきます。
//! ここではデコードのみを行い、サイズや内容の検証はしません。

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageBuffer, RgbImage};
use std::path::Path;

use crate::constants::{INPUT_CHANNELS, INPUT_SIZE};
use crate::error::{DetectorError, Result};

/// `data:<mime>;base64,<payload>` を分解して画像バイト列を返す
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| DetectorError::InvalidDataUrl("\"data:\" で始まっていません".to_string()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| DetectorError::InvalidDataUrl("ペイロードがありません".to_string()))?;

    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| DetectorError::InvalidDataUrl(format!("base64形式ではありません: {}", header)))?;

    // ファイル選択の accept="image/*" と同じ制限
    if !mime.starts_with("image/") {
        return Err(DetectorError::UnsupportedMediaType(mime.to_string()));
    }

    Ok(STANDARD.decode(payload.trim())?)
}

/// 画像バイト列をRGB画像にデコード（アルファは捨てる）
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

pub fn decode_image_data_url(data_url: &str) -> Result<RgbImage> {
    let bytes = decode_data_url(data_url)?;
    decode_image(&bytes)
}

pub fn open_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    let bytes = std::fs::read(path)?;
    decode_image(&bytes)
}

/// 最近傍補間でリサイズ
///
/// 出力座標 `d` に対して入力座標 `floor(d * src / dst)` を参照する
/// （角合わせ・半ピクセル補正なし）。
pub fn resize_nearest(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 {
        return RgbImage::new(width, height);
    }

    ImageBuffer::from_fn(width, height, |x, y| {
        let sx = ((x as u64 * src_w as u64) / width as u64).min(src_w as u64 - 1) as u32;
        let sy = ((y as u64 * src_h as u64) / height as u64).min(src_h as u64 - 1) as u32;
        *image.get_pixel(sx, sy)
    })
}

/// モデルに渡す入力テンソル
///
/// 形状は `[1, 224, 224, 3]`（バッチ, 高さ, 幅, チャネル）、値は0〜255のf32。
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl InputTensor {
    /// 表示中の画像から入力テンソルを作成
    pub fn from_image(image: &RgbImage) -> Self {
        let resized = resize_nearest(image, INPUT_SIZE as u32, INPUT_SIZE as u32);
        let data = resized.into_raw().into_iter().map(f32::from).collect();

        Self {
            shape: [1, INPUT_SIZE, INPUT_SIZE, INPUT_CHANNELS],
            data,
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use image::{ImageFormat, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_data_url(image: &RgbImage) -> String {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(&bytes))
    }

    #[test]
    fn test_decode_png_data_url() {
        let image = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let decoded = decode_image_data_url(&png_data_url(&image)).unwrap();

        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(*decoded.get_pixel(2, 1), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_rejects_non_image_mime() {
        let err = decode_data_url("data:text/plain;base64,aGVsbG8=").unwrap_err();
        assert!(matches!(err, DetectorError::UnsupportedMediaType(ref m) if m == "text/plain"));
    }

    #[test]
    fn test_rejects_malformed_data_url() {
        assert!(matches!(
            decode_data_url("image/png;base64,AAAA").unwrap_err(),
            DetectorError::InvalidDataUrl(_)
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64").unwrap_err(),
            DetectorError::InvalidDataUrl(_)
        ));
        assert!(matches!(
            decode_data_url("data:image/png,rawdata").unwrap_err(),
            DetectorError::InvalidDataUrl(_)
        ));
    }

    #[test]
    fn test_garbage_image_bytes_fail_to_decode() {
        let url = format!("data:image/png;base64,{}", STANDARD.encode(b"not a png"));
        assert!(matches!(
            decode_image_data_url(&url).unwrap_err(),
            DetectorError::ImageDecode(_)
        ));
    }

    #[test]
    fn test_alpha_is_dropped() {
        let rgba = RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 0]));
        let mut bytes = Vec::new();
        rgba.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();

        let rgb = decode_image(&bytes).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([1, 2, 3]));
    }

    #[test]
    fn test_resize_nearest_picks_floor_source() {
        // 2x2 の各象限が 4x4 の各 2x2 ブロックに展開される
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, Rgb([1, 0, 0]));
        image.put_pixel(1, 0, Rgb([2, 0, 0]));
        image.put_pixel(0, 1, Rgb([3, 0, 0]));
        image.put_pixel(1, 1, Rgb([4, 0, 0]));

        let resized = resize_nearest(&image, 4, 4);
        assert_eq!(resized.get_pixel(1, 1)[0], 1);
        assert_eq!(resized.get_pixel(2, 1)[0], 2);
        assert_eq!(resized.get_pixel(1, 3)[0], 3);
        assert_eq!(resized.get_pixel(3, 3)[0], 4);

        // 縮小: 4 -> 2 は入力の 0, 2 列目を参照
        let shrunk = resize_nearest(&resized, 2, 2);
        assert_eq!(shrunk, image);
    }

    #[test]
    fn test_input_tensor_shape_and_layout() {
        let mut image = RgbImage::from_pixel(448, 100, Rgb([0, 0, 0]));
        image.put_pixel(0, 0, Rgb([255, 128, 7]));

        let tensor = InputTensor::from_image(&image);
        assert_eq!(tensor.shape(), [1, 224, 224, 3]);
        assert_eq!(tensor.data().len(), 224 * 224 * 3);

        // チャネルが最後の次元
        assert_eq!(&tensor.data()[..3], &[255.0, 128.0, 7.0]);
        assert_eq!(&tensor.data()[3..6], &[0.0, 0.0, 0.0]);
    }
}
