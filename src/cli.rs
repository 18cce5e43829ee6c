use crate::problem::ProblemKey;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Solving differential equations with neural networks (L2 / GAN) using Burn", long_about = None)]
pub struct Cli {
    /// ログをDEBUGレベルまで出力します
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 問題を1回学習し、結果をフォルダに保存します
    Train(TrainArgs),
    /// ハイパーパラメータの組み合わせを探索し、結果をCSVに保存します
    Sweep(SweepArgs),
    /// 保存された学習結果を読み込み、再評価します
    Infer(InferArgs),
    /// 既定の実験設定をJSONに書き出します
    Config(ConfigArgs),
}

/// 学習に使うデバイス。
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// NdArray バックエンド（CPU）
    Cpu,
    /// wgpu バックエンド（GPU）。`wgpu` フィーチャーが必要です
    Wgpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => f.write_str("NdArray (CPU)"),
            DeviceKind::Wgpu => f.write_str("Wgpu (GPU)"),
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// 問題 (exp, sho, nlo, pos, chan)
    #[arg(short, long)]
    pub problem: ProblemKey,

    /// GANで学習します（指定しなければ設定ファイルの方法、既定はL2）
    #[arg(long)]
    pub gan: bool,

    /// 実験設定のJSONファイル
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// エポック数を上書きします
    #[arg(long)]
    pub epochs: Option<usize>,

    /// 乱数シードを上書きします
    #[arg(long)]
    pub seed: Option<u64>,

    /// 学習に使うデバイス
    #[arg(short, long, value_enum, default_value_t = DeviceKind::Cpu)]
    pub device: DeviceKind,

    /// 結果フォルダを作る場所
    #[arg(short, long, default_value = "runs")]
    pub out: PathBuf,

    /// 重みや予測を保存しません
    #[arg(long)]
    pub no_save: bool,

    /// グラフを描画しません
    #[arg(long)]
    pub no_plot: bool,
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// 問題 (exp, sho, nlo, pos, chan)
    #[arg(short, long)]
    pub problem: ProblemKey,

    #[arg(long)]
    pub gan: bool,

    /// 探索空間のJSONファイル（`{"section.field": [値, ...]}`）
    #[arg(short, long)]
    pub space: Option<PathBuf>,

    /// 基準にする実験設定のJSONファイル
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 学習に使うデバイス
    #[arg(short, long, value_enum, default_value_t = DeviceKind::Cpu)]
    pub device: DeviceKind,

    /// 並列に実行するスレッド数
    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,

    /// 組み合わせごとの反復回数（シードを変えて実行）
    #[arg(short, long, default_value_t = 20)]
    pub replicates: usize,

    /// 結果のCSVファイル（既定は `<KEY>_hypertune.csv`）
    #[arg(short, long)]
    pub fname: Option<PathBuf>,

    /// 確認せずに既存の結果ファイルを上書きします
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct InferArgs {
    /// `train` が作った結果フォルダ
    #[arg(short, long)]
    pub run_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[arg(short, long)]
    pub problem: ProblemKey,

    #[arg(long)]
    pub gan: bool,

    /// 書き出すJSONファイル
    #[arg(short, long)]
    pub out: PathBuf,
}
