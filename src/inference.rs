use crate::cli::InferArgs;
use crate::error::Result;
use crate::experiment::load_run;
use crate::pinn::evaluate;
use std::time::Instant;
use tracing::info;

/// `infer`サブコマンドを実行します。
///
/// 結果フォルダから設定と生成器を読み込み、固定格子上で再評価します。
pub fn run(args: &InferArgs) -> Result<()> {
    let device = Default::default();

    info!("推論を実行します - バックエンド: NdArray (CPU)");
    let inference_start = Instant::now();

    println!("保存済みモデルを '{}' からロード中...", args.run_dir.display());
    let (config, problem, generator) = load_run(&args.run_dir, &device)?;
    let (metrics, prediction) = evaluate(&problem, &generator, &device)?;
    let inference_duration = inference_start.elapsed();

    println!(
        "推論が完了しました。問題: {}, 学習方法: {:?}, 格子点数: {}",
        problem.key(),
        config.training.method,
        prediction.len()
    );
    println!(
        "=> final_mse: {:.6e}, final_residual: {:.6e}",
        metrics.final_mse, metrics.final_residual
    );
    if let Some(re) = metrics.reynolds {
        println!(
            "=> Re_tau: {:.1}, Re_0: {:.1}, Re_m: {:.1}",
            re.retau, re.renot, re.renum
        );
    }
    println!("=> 推論時間: {:.2?}", inference_duration);

    Ok(())
}
