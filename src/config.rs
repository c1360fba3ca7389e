use std::path::PathBuf;

// 実験スクリプト共通の設定
#[derive(Debug, Clone)]
pub struct Settings {
    // ログの出力先
    pub base_path: PathBuf,
    // 学習率 (学習器による置き換え実験のための定数。制御則では未使用)
    pub learning_rate: f64,
    // 予測ホライゾン
    pub horizon: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("logs"),
            learning_rate: 1e-3,
            horizon: 20,
        }
    }
}
