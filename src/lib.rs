//! # ニューラルネットワークによる微分方程式ソルバー
//!
//! `burn` フレームワークを使用して、常微分方程式・偏微分方程式の解をニューラル
//! ネットワークで近似します。ネットワークの出力は初期値・境界値を厳密に満たす
//! ように調整され、方程式の残差に基づく損失（L2 / Lagaris）または識別器との
//! 敵対的学習（GAN）で学習します。
//!
//! 対応している問題は指数減衰 (`exp`)、単振動 (`sho`)、非線形振動子 (`nlo`)、
//! 2次元ポアソン方程式 (`pos`)、乱流チャネル流 (`chan`) です。

#![recursion_limit = "256"]
pub mod cli;
pub mod config;
pub mod error;
pub mod experiment;
pub mod grid;
pub mod inference;
pub mod jet;
pub mod model;
pub mod ode;
pub mod pinn;
pub mod plot;
pub mod problem;
pub mod sweep;
pub mod training;

pub use error::{Error, Result};

/// 生成器の重みを保存するファイル名
pub const GENERATOR_FILENAME: &str = "generator.mpk";
/// 識別器の重みを保存するファイル名（GAN学習のみ）
pub const DISCRIMINATOR_FILENAME: &str = "discriminator.mpk";
/// 実験設定を保存するファイル名
pub const HYPERS_FILENAME: &str = "hypers.json";
pub const LOSSES_FILENAME: &str = "losses.json";
pub const PREDS_FILENAME: &str = "preds.json";
pub const LOSS_PLOT_FILENAME: &str = "loss.png";
pub const PREDS_PLOT_FILENAME: &str = "preds.png";
/// 予測とその微分のグラフ（`exp`, `sho` のみ）
pub const DIFFS_PLOT_FILENAME: &str = "diffs.png";
/// 位置ごとの残差の二乗（1次元の問題のみ）
pub const RESIDUAL_PLOT_FILENAME: &str = "residual.png";
