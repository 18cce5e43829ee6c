//! 設定から問題とネットワークを構築し、学習・評価・保存までを行う実験ハーネス。

use crate::config::{ExperimentConfig, Method};
use crate::error::{Error, Result};
use crate::model::Mlp;
use crate::pinn::{Metrics, Prediction, evaluate};
use crate::problem::{Equation, Problem};
use crate::training::{TrainingOutput, train_gan, train_l2};
use crate::{
    DISCRIMINATOR_FILENAME, GENERATOR_FILENAME, HYPERS_FILENAME, LOSSES_FILENAME, PREDS_FILENAME,
};
use burn::backend::ndarray::NdArrayDevice;
#[cfg(feature = "wgpu")]
use burn::backend::Wgpu;
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::module::{AutodiffModule, Module};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 学習に使うバックエンド（CPU）。
pub type TrainBackend = Autodiff<NdArray<f32>>;

/// GPU で学習するときのバックエンド。
#[cfg(feature = "wgpu")]
pub type WgpuTrainBackend = Autodiff<Wgpu>;

/// 推論・評価に使うバックエンド。
pub type InferBackend = NdArray<f32>;

/// 1回の実験の結果。
#[derive(Debug)]
pub struct ExperimentOutcome<B: AutodiffBackend> {
    pub config: ExperimentConfig,
    pub problem: Problem,
    pub training: TrainingOutput<B>,
    pub metrics: Metrics,
    pub prediction: Prediction,
    pub elapsed: Duration,
}

/// 実験を1回実行します。
///
/// 乱数は `training.seed` から作った1つの `StdRng` だけを使い、生成器の初期化、
/// 識別器の初期化、バッチの摂動の順に消費します。
pub fn run_experiment<B: AutodiffBackend>(
    config: &ExperimentConfig,
    device: &B::Device,
) -> Result<ExperimentOutcome<B>> {
    config.validate()?;
    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.training.seed);
    let problem = Problem::from_config(&config.problem)?;
    debug!("問題 {} を構築しました (格子点数: {})", problem.key(), problem.grid().len());

    let generator: Mlp<B> = config.generator.init(problem.dim(), &mut rng, device)?;
    let training = match config.training.method {
        Method::L2 | Method::Lagaris => {
            train_l2(&problem, generator, &config.training, &mut rng, device)?
        }
        Method::Gan => {
            let discriminator: Mlp<B> = config.discriminator.init(&mut rng, device)?;
            train_gan(
                &problem,
                generator,
                discriminator,
                &config.training,
                config.discriminator.unbounded,
                &mut rng,
                device,
            )?
        }
    };

    let (metrics, prediction) = evaluate(&problem, &training.generator.valid(), device)?;
    let elapsed = start.elapsed();
    info!(
        "実験が完了しました: final_mse = {:.3e}, final_residual = {:.3e} ({:.2?})",
        metrics.final_mse, metrics.final_residual, elapsed
    );

    Ok(ExperimentOutcome {
        config: config.clone(),
        problem,
        training,
        metrics,
        prediction,
        elapsed,
    })
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// 実行結果を保存するフォルダ `<out>/<timestamp>_<key>/` を作ります。
pub fn create_run_dir(out: &Path, config: &ExperimentConfig) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let dir = out.join(format!("{}_{}", stamp, config.problem.key()));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// ネットワークの重み、設定、損失、予測をフォルダに書き出します。
pub fn save_outcome<B: AutodiffBackend>(outcome: &ExperimentOutcome<B>, dir: &Path) -> Result<()> {
    outcome.config.save(dir.join(HYPERS_FILENAME))?;
    outcome
        .training
        .generator
        .clone()
        .save_file(dir.join(GENERATOR_FILENAME), &recorder())?;
    if let Some(discriminator) = &outcome.training.discriminator {
        discriminator
            .clone()
            .save_file(dir.join(DISCRIMINATOR_FILENAME), &recorder())?;
    }
    fs::write(
        dir.join(LOSSES_FILENAME),
        serde_json::to_string_pretty(&outcome.training.losses)?,
    )?;
    fs::write(
        dir.join(PREDS_FILENAME),
        serde_json::to_string_pretty(&outcome.prediction)?,
    )?;
    Ok(())
}

/// 保存済みのフォルダから設定と生成器を読み込みます。
pub fn load_run(
    dir: &Path,
    device: &NdArrayDevice,
) -> Result<(ExperimentConfig, Problem, Mlp<InferBackend>)> {
    let hypers = dir.join(HYPERS_FILENAME);
    let weights = dir.join(GENERATOR_FILENAME);
    for path in [&hypers, &weights] {
        if !path.exists() {
            return Err(Error::MissingArtifact(path.clone()));
        }
    }
    let config = ExperimentConfig::load(&hypers)
        .map_err(|e| Error::InvalidConfig(format!("{}: {e}", hypers.display())))?;
    let problem = Problem::from_config(&config.problem)?;
    // 重みはファイルから上書きされるため、初期化の乱数は何でもよい。
    let mut rng = StdRng::seed_from_u64(0);
    let generator: Mlp<InferBackend> = config
        .generator
        .init::<InferBackend, _>(problem.dim(), &mut rng, device)?
        .load_file(weights, &recorder(), device)?;
    Ok((config, problem, generator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::problem::{ExponentialConfig, ProblemConfig, ProblemKey};

    fn small_config(method: Method) -> ExperimentConfig {
        let mut config = default_config(ProblemKey::Exp, method);
        config.problem = ProblemConfig::Exponential(ExponentialConfig::new().with_n(20));
        config.training.epochs = 5;
        config.training.log_every = 0;
        config
    }

    #[test]
    fn same_seed_reproduces_losses() {
        let device = Default::default();
        let a = run_experiment::<TrainBackend>(&small_config(Method::L2), &device).unwrap();
        let b = run_experiment::<TrainBackend>(&small_config(Method::L2), &device).unwrap();
        assert_eq!(a.training.losses.g_losses, b.training.losses.g_losses);
        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn saved_run_reloads_with_same_predictions() {
        let device = Default::default();
        let outcome = run_experiment::<TrainBackend>(&small_config(Method::Gan), &device).unwrap();
        let out = tempfile::tempdir().unwrap();
        let dir = create_run_dir(out.path(), &outcome.config).unwrap();
        assert!(dir.file_name().unwrap().to_string_lossy().ends_with("_exp"));
        save_outcome(&outcome, &dir).unwrap();
        for name in [
            GENERATOR_FILENAME,
            DISCRIMINATOR_FILENAME,
            HYPERS_FILENAME,
            LOSSES_FILENAME,
            PREDS_FILENAME,
        ] {
            assert!(dir.join(name).exists(), "{name} が保存されていません");
        }

        let (config, problem, generator) = load_run(&dir, &device).unwrap();
        assert_eq!(config.training.method, Method::Gan);
        let (metrics, _) = evaluate(&problem, &generator, &device).unwrap();
        assert!((metrics.final_mse - outcome.metrics.final_mse).abs() < 1e-6);
    }

    #[test]
    fn corrupt_weights_keep_recorder_error_as_source() {
        let dir = tempfile::tempdir().unwrap();
        small_config(Method::L2).save(dir.path().join(HYPERS_FILENAME)).unwrap();
        fs::write(dir.path().join(GENERATOR_FILENAME), b"not a record").unwrap();
        let err = load_run(dir.path(), &Default::default()).unwrap_err();
        assert!(matches!(err, Error::Recorder(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn missing_artifacts_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_run(dir.path(), &Default::default());
        assert!(matches!(result, Err(Error::MissingArtifact(_))));
    }
}
