fn main() {
    // デスクトップビルド時のみ tauri.conf.json を処理する
    #[cfg(feature = "desktop")]
    tauri_build::build()
}
