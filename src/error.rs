use crate::cli::DeviceKind;
use burn::record::RecorderError;
use burn::tensor::DataError;
use std::path::PathBuf;
use thiserror::Error;

/// ライブラリ全体で使う `Result` 型。
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 実験の構築・学習・保存で発生しうるエラー。
#[derive(Debug, Error)]
pub enum Error {
    /// `exp|sho|nlo|pos|chan` 以外の問題キー。
    #[error("問題キーを解釈できません: '{0}' (exp, sho, nlo, pos, chan のいずれかを指定してください)")]
    UnknownProblem(String),

    #[error("設定が不正です: {0}")]
    InvalidConfig(String),

    /// ハイパーパラメータ空間のキーが設定のどのフィールドにも対応しない。
    #[error("未知のハイパーパラメータです: '{0}'")]
    UnknownHyperparameter(String),

    #[error("'{0}' の上書きが拒否されたため中断しました")]
    OverwriteDeclined(PathBuf),

    #[error("ファイル '{0}' が見つかりません。最初に 'train' コマンドで学習・保存してください。")]
    MissingArtifact(PathBuf),

    #[error("モデルの保存・読み込みに失敗しました: {0}")]
    Recorder(#[from] RecorderError),

    /// `DataError` は `std::error::Error` を実装しないため、値のまま保持します。
    #[error("テンソルデータの変換に失敗しました: {0:?}")]
    TensorData(DataError),

    #[error("デバイス {0} はこのビルドでは使えません ('wgpu' フィーチャーを有効にしてビルドしてください)")]
    DeviceUnavailable(DeviceKind),

    #[error("スレッドプールの構築に失敗しました: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
