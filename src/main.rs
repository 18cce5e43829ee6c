//! # ニューラルネットワークによる微分方程式ソルバー
//!
//! `clap` クレートを利用して、コマンドラインから学習・探索・推論・設定の書き出しを
//! 個別に実行できます。
//!
//! ## 使い方
//!
//! ### 学習
//! ```bash
//! cargo run --release -- train --problem exp
//! cargo run --release -- train --problem sho --gan
//! cargo run --release -- train --problem chan --device wgpu
//! ```
//!
//! ### ハイパーパラメータ探索
//! ```bash
//! cargo run --release -- sweep --problem sho --gan --workers 8
//! ```
//!
//! ### 推論
//! ```bash
//! cargo run --release -- infer --run-dir runs/20250101_120000_exp
//! ```

use anyhow::Context;
use burn::config::Config;
use clap::Parser;
use denn::cli::{Cli, Commands};
use denn::config::resolve_config;
use denn::{inference, sweep, training};
use tracing::Level;

/// プログラムのエントリーポイント。
///
/// コマンドライン引数を解析し、各サブコマンドの処理に振り分けます。
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Train(args) => training::run(args)?,
        Commands::Sweep(args) => sweep::run(args)?,
        Commands::Infer(args) => inference::run(args)?,
        Commands::Config(args) => {
            let config = resolve_config(args.problem, args.gan, None)?;
            config
                .save(&args.out)
                .with_context(|| format!("'{}' への書き込みに失敗しました", args.out.display()))?;
            println!("=> 既定の設定を '{}' に保存しました。", args.out.display());
        }
    }
    Ok(())
}
