//! ナイフ判定をコマンドラインから試すためのバイナリ
//!
//! 使い方:
//!   classify_image <画像ファイル> [--model <モデルディレクトリ>]
//!   classify_image download-model <保存先ディレクトリ>
//!
//! --model を省略した場合は固定URLからモデルを取得します。

use anyhow::{Context, Result};
use knife_detector_lib::constants::MODEL_URL;
use knife_detector_lib::model::{
    fetch_artifacts, print_metadata_info, save_artifacts_dir, AppConfig, LocalModelLoader,
    RemoteModelLoader,
};
use knife_detector_lib::ml::InferenceEngine;
use knife_detector_lib::{KnifeDetector, ModelStatus};
use std::path::PathBuf;

fn print_usage() {
    eprintln!("使い方:");
    eprintln!("  classify_image <画像ファイル> [--model <モデルディレクトリ>]");
    eprintln!("  classify_image download-model <保存先ディレクトリ>");
}

#[tokio::main]
async fn main() {
    let (config, config_message) = AppConfig::load_or_default();
    config.init_logger();
    log::debug!("{}", config_message);

    // コマンドライン引数を取得
    let args: Vec<String> = std::env::args().skip(1).collect();

    let result = match args.first().map(String::as_str) {
        Some("download-model") => match args.get(1) {
            Some(output) => download_model(PathBuf::from(output)).await,
            None => {
                print_usage();
                std::process::exit(2);
            }
        },
        Some(image_path) => {
            let model_path = match args.iter().position(|a| a == "--model") {
                Some(i) => match args.get(i + 1) {
                    Some(path) => Some(PathBuf::from(path)),
                    None => {
                        print_usage();
                        std::process::exit(2);
                    }
                },
                None => None,
            };
            classify(PathBuf::from(image_path), model_path).await
        }
        None => {
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("✗ エラー: {:#}", e);
        std::process::exit(1);
    }
}

async fn classify(image_path: PathBuf, model_path: Option<PathBuf>) -> Result<()> {
    let detector = KnifeDetector::<InferenceEngine>::new();

    let status = match &model_path {
        Some(path) => detector.load_model(&LocalModelLoader::new(path)).await,
        None => {
            println!("モデルを取得しています: {}", MODEL_URL);
            detector.load_model(&RemoteModelLoader::default()).await
        }
    };
    if status != ModelStatus::Ready {
        anyhow::bail!(
            "モデルを読み込めませんでした: {}",
            detector.load_error().unwrap_or_default()
        );
    }

    detector
        .upload_image_file(&image_path)
        .await
        .context(format!("画像を読み込めません: {:?}", image_path))?;

    let result = detector
        .classify()
        .await?
        .context("推論が実行されませんでした")?;

    println!("✓ {}", result.prediction);
    println!("  ナイフ確率: {:.4}", result.knife_probability);
    Ok(())
}

/// 固定URLのモデル一式を保存し、以後 --model でオフライン利用できるようにする
async fn download_model(output: PathBuf) -> Result<()> {
    let loader = RemoteModelLoader::default();
    println!("モデルを取得しています: {}", loader.url());
    let artifacts = fetch_artifacts(loader.client(), loader.url()).await?;

    // 保存前に読み込めることを確認しておく
    let engine: InferenceEngine = InferenceEngine::from_artifacts(&artifacts)?;

    save_artifacts_dir(&output, &artifacts)
        .context(format!("書き込みに失敗しました: {:?}", output))?;
    print_metadata_info(engine.metadata());
    println!("✓ モデルを保存しました: {}", output.display());
    Ok(())
}
