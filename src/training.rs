use crate::cli::{DeviceKind, TrainArgs};
use crate::config::{ExperimentConfig, Method, TrainingConfig, resolve_config};
use crate::error::{Error, Result};
#[cfg(feature = "wgpu")]
use crate::experiment::WgpuTrainBackend;
use crate::experiment::{TrainBackend, create_run_dir, run_experiment, save_outcome};
use crate::grid::points_tensor;
use crate::model::Mlp;
use crate::pinn::{
    Prediction, Samples, discriminator_loss, forward_adjusted, generator_loss, lagaris_loss,
    residual_loss,
};
use crate::plot::{PlotResult, plot_derivatives, plot_loss_history, plot_predictions, plot_residuals};
use crate::problem::{Equation, Problem};
use crate::{DIFFS_PLOT_FILENAME, LOSS_PLOT_FILENAME, PREDS_PLOT_FILENAME, RESIDUAL_PLOT_FILENAME};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 学習済みのネットワークと損失の履歴。
#[derive(Debug)]
pub struct TrainingOutput<B: AutodiffBackend> {
    pub generator: Mlp<B>,
    /// GAN学習のときのみ `Some`
    pub discriminator: Option<Mlp<B>>,
    pub losses: LossHistory,
}

/// エポックごとの損失。`losses.json` にそのまま書き出します。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LossHistory {
    pub g_losses: Vec<f32>,
    /// L2 / Lagaris 学習では空
    pub d_losses: Vec<f32>,
    /// 各エポックの更新後、摂動なしの格子で測った残差の二乗平均
    #[serde(default)]
    pub val_losses: Vec<f32>,
    #[serde(skip)]
    warned: bool,
}

impl LossHistory {
    fn record(&mut self, epoch: usize, g_loss: f32, d_loss: Option<f32>, val_loss: f32) {
        let finite = g_loss.is_finite() && d_loss.is_none_or(f32::is_finite);
        if !finite && !self.warned {
            warn!(
                "エポック {} で損失が有限でなくなりました (G: {}, D: {:?})。学習は継続します。",
                epoch, g_loss, d_loss
            );
            self.warned = true;
        }
        self.g_losses.push(g_loss);
        if let Some(d_loss) = d_loss {
            self.d_losses.push(d_loss);
        }
        self.val_losses.push(val_loss);
    }
}

/// 固定格子上の検証損失。勾配は追跡しません。
struct Validation<B: AutodiffBackend> {
    coords: Tensor<B::InnerBackend, 2>,
}

impl<B: AutodiffBackend> Validation<B> {
    fn new(problem: &Problem, device: &B::Device) -> Self {
        Self {
            coords: problem.grid().to_tensor::<B::InnerBackend>(device),
        }
    }

    fn loss(&self, problem: &Problem, generator: &Mlp<B>) -> f32 {
        residual_loss(problem, &generator.valid(), self.coords.clone())
            .into_scalar()
            .elem::<f32>()
    }
}

fn should_log(config: &TrainingConfig, epoch: usize) -> bool {
    config.log_every > 0 && (epoch % config.log_every == 0 || epoch == config.epochs)
}

fn scalar<B: AutodiffBackend>(loss: &Tensor<B, 1>) -> f32 {
    loss.clone().into_scalar().elem::<f32>()
}

fn sample_batch<B: AutodiffBackend, R: Rng + ?Sized>(
    problem: &Problem,
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, 2> {
    points_tensor::<B>(&problem.grid_sample(rng), problem.dim(), device)
}

/// 残差に基づく学習（`Method::L2` と `Method::Lagaris`）。
///
/// 1エポックごとに新しいバッチを1つ引き、L2 では1回、Lagaris では `g_iters` 回
/// 生成器を更新します。早期終了はありません。
pub fn train_l2<B: AutodiffBackend, R: Rng + ?Sized>(
    problem: &Problem,
    mut generator: Mlp<B>,
    config: &TrainingConfig,
    rng: &mut R,
    device: &B::Device,
) -> Result<TrainingOutput<B>> {
    config.validate()?;
    let iters = match config.method {
        Method::L2 => 1,
        Method::Lagaris => config.g_iters,
        Method::Gan => {
            return Err(Error::InvalidConfig(
                "GAN 学習には train_gan を使ってください".to_string(),
            ));
        }
    };
    let mut optim = AdamConfig::new()
        .with_beta_1(config.beta_1)
        .with_beta_2(config.beta_2)
        .init();

    let validation = Validation::<B>::new(problem, device);
    let mut losses = LossHistory::default();
    let training_start = Instant::now();
    info!(
        "{:?} 学習を開始します (問題: {}, エポック数: {})",
        config.method,
        problem.key(),
        config.epochs
    );

    for epoch in 1..=config.epochs {
        let coords = sample_batch::<B, R>(problem, rng, device);
        let mut last = 0.0;
        for _ in 0..iters {
            let loss = if config.method == Method::Lagaris {
                lagaris_loss(problem, &generator, coords.clone())
            } else {
                residual_loss(problem, &generator, coords.clone())
            };
            last = scalar(&loss);
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &generator);
            generator = optim.step(config.g_lr, generator, grads);
        }
        let val = validation.loss(problem, &generator);
        losses.record(epoch, last, None, val);

        if should_log(config, epoch) {
            info!(
                "[Epoch {}/{}] Loss: {:.6} Val: {:.6}",
                epoch, config.epochs, last, val
            );
        }
    }
    debug!("学習時間: {:.2?}", training_start.elapsed());

    Ok(TrainingOutput {
        generator,
        discriminator: None,
        losses,
    })
}

/// 識別器との敵対的学習。
///
/// 各エポックで、まず生成器を `g_iters` 回（識別器は固定）、次に直前の
/// サンプルを計算グラフから切り離して識別器を `d_iters` 回更新します。
/// `logits` が真なら識別器の出力をシグモイド前の値として損失を計算します。
pub fn train_gan<B: AutodiffBackend, R: Rng + ?Sized>(
    problem: &Problem,
    mut generator: Mlp<B>,
    mut discriminator: Mlp<B>,
    config: &TrainingConfig,
    logits: bool,
    rng: &mut R,
    device: &B::Device,
) -> Result<TrainingOutput<B>> {
    config.validate()?;
    let adam = AdamConfig::new()
        .with_beta_1(config.beta_1)
        .with_beta_2(config.beta_2);
    let mut optim_g = adam.init();
    let mut optim_d = adam.init();
    let smoothing = config.label_smoothing;

    let validation = Validation::<B>::new(problem, device);
    let mut losses = LossHistory::default();
    let training_start = Instant::now();
    info!(
        "GAN 学習を開始します (問題: {}, エポック数: {}, g_iters: {}, d_iters: {})",
        problem.key(),
        config.epochs,
        config.g_iters,
        config.d_iters
    );

    for epoch in 1..=config.epochs {
        let coords = sample_batch::<B, R>(problem, rng, device);

        // 生成器の更新。識別器のパラメータの勾配は集めない。
        let mut g_loss_val = 0.0;
        let mut last_samples = None;
        for _ in 0..config.g_iters {
            let adjusted = forward_adjusted(problem, &generator, coords.clone());
            let samples = Samples::new(problem, &adjusted, coords.clone());
            let g_loss = generator_loss(&discriminator, &samples, logits, smoothing);
            g_loss_val = scalar(&g_loss);
            let grads = g_loss.backward();
            let grads = GradientsParams::from_grads(grads, &generator);
            generator = optim_g.step(config.g_lr, generator, grads);
            last_samples = Some(samples.detach());
        }

        // 識別器の更新
        let mut d_loss_val = 0.0;
        if let Some(samples) = last_samples {
            for _ in 0..config.d_iters {
                let d_loss = discriminator_loss(&discriminator, &samples, logits, smoothing);
                d_loss_val = scalar(&d_loss);
                let grads = d_loss.backward();
                let grads = GradientsParams::from_grads(grads, &discriminator);
                discriminator = optim_d.step(config.d_lr, discriminator, grads);
            }
        }
        let val = validation.loss(problem, &generator);
        losses.record(epoch, g_loss_val, Some(d_loss_val), val);

        if should_log(config, epoch) {
            info!(
                "[Epoch {}/{}] D_Loss: {:.4} G_Loss: {:.4} Val: {:.6}",
                epoch, config.epochs, d_loss_val, g_loss_val, val
            );
        }
    }
    debug!("学習時間: {:.2?}", training_start.elapsed());

    Ok(TrainingOutput {
        generator,
        discriminator: Some(discriminator),
        losses,
    })
}

/// `train`サブコマンドを実行します。
///
/// 学習、評価、結果フォルダへの保存、損失と予測のグラフ描画を行います。
pub fn run(args: &TrainArgs) -> Result<()> {
    let mut config = resolve_config(args.problem, args.gan, args.config.as_deref())?;
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }

    println!(
        "学習を開始します (問題: {}, 方法: {:?}) - バックエンド: {}",
        args.problem, config.training.method, args.device
    );
    match args.device {
        DeviceKind::Cpu => train_on::<TrainBackend>(args, &config, &Default::default()),
        #[cfg(feature = "wgpu")]
        DeviceKind::Wgpu => train_on::<WgpuTrainBackend>(args, &config, &Default::default()),
        #[cfg(not(feature = "wgpu"))]
        DeviceKind::Wgpu => Err(Error::DeviceUnavailable(args.device)),
    }
}

fn train_on<B: AutodiffBackend>(
    args: &TrainArgs,
    config: &ExperimentConfig,
    device: &B::Device,
) -> Result<()> {
    let outcome = run_experiment::<B>(config, device)?;
    println!("学習が完了しました。");
    println!("=> 学習時間: {:.2?}", outcome.elapsed);
    println!(
        "=> final_mse: {:.6e}, final_residual: {:.6e}",
        outcome.metrics.final_mse, outcome.metrics.final_residual
    );
    if let Some(re) = outcome.metrics.reynolds {
        println!(
            "=> Re_tau: {:.1}, Re_0: {:.1}, Re_m: {:.1}",
            re.retau, re.renot, re.renum
        );
    }

    if args.no_save && args.no_plot {
        return Ok(());
    }
    let dir = create_run_dir(&args.out, config)?;

    if !args.no_save {
        save_outcome(&outcome, &dir)?;
        println!("=> モデルと結果を '{}' に保存しました。", dir.display());
    }
    if !args.no_plot {
        plot_outcome(&dir, &outcome.training.losses, &outcome.prediction);
    }
    Ok(())
}

/// 結果フォルダにグラフを描きます。描画の失敗は警告だけにとどめます。
fn plot_outcome(dir: &Path, losses: &LossHistory, prediction: &Prediction) {
    let path = dir.join(LOSS_PLOT_FILENAME);
    report_plot(
        "損失グラフ",
        &path,
        plot_loss_history(&path, &losses.g_losses, &losses.d_losses, &losses.val_losses),
    );
    let path = dir.join(PREDS_PLOT_FILENAME);
    report_plot("予測グラフ", &path, plot_predictions(&path, prediction));
    if prediction.derivative.is_some() {
        let path = dir.join(DIFFS_PLOT_FILENAME);
        report_plot("微分グラフ", &path, plot_derivatives(&path, prediction));
    }
    if prediction.dim == 1 {
        let path = dir.join(RESIDUAL_PLOT_FILENAME);
        report_plot("残差グラフ", &path, plot_residuals(&path, prediction));
    }
}

fn report_plot(name: &str, path: &Path, result: PlotResult) {
    match result {
        Ok(()) => println!("=> {}を '{}' に保存しました。", name, path.display()),
        Err(e) => warn!("{}の描画に失敗しました: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Activation, DiscriminatorConfig, GeneratorConfig};
    use crate::problem::{ChannelFlowConfig, ExponentialConfig, PoissonConfig, ProblemConfig};
    use burn::backend::{Autodiff, NdArray};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn problem() -> Problem {
        Problem::from_config(&ProblemConfig::Exponential(ExponentialConfig::new().with_n(30))).unwrap()
    }

    #[test]
    fn l2_records_one_loss_per_epoch_and_decreases() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(0);
        let problem = problem();
        let generator = GeneratorConfig::new().init::<TestBackend, _>(1, &mut rng, &device).unwrap();
        let config = TrainingConfig::new().with_epochs(200).with_g_lr(1e-2).with_log_every(0);
        let output = train_l2(&problem, generator, &config, &mut rng, &device).unwrap();
        let losses = &output.losses.g_losses;
        assert_eq!(losses.len(), 200);
        assert!(output.losses.d_losses.is_empty());
        assert!(losses.iter().all(|l| *l >= 0.0));
        assert!(losses[losses.len() - 1] < losses[0]);
        let val = &output.losses.val_losses;
        assert_eq!(val.len(), 200);
        assert!(val[val.len() - 1] < val[0]);
    }

    #[test]
    fn l2_rejects_gan_method() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(0);
        let generator = GeneratorConfig::new().init::<TestBackend, _>(1, &mut rng, &device).unwrap();
        let config = TrainingConfig::new().with_method(Method::Gan).with_epochs(1);
        let result = train_l2(&problem(), generator, &config, &mut rng, &device);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn gan_records_both_losses() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(1);
        let problem = problem();
        let generator = GeneratorConfig::new().init::<TestBackend, _>(1, &mut rng, &device).unwrap();
        let discriminator = DiscriminatorConfig::new().init::<TestBackend, _>(&mut rng, &device).unwrap();
        let config = TrainingConfig::new()
            .with_method(Method::Gan)
            .with_epochs(20)
            .with_g_iters(2)
            .with_log_every(0);
        let output = train_gan(&problem, generator, discriminator, &config, false, &mut rng, &device).unwrap();
        assert_eq!(output.losses.g_losses.len(), 20);
        assert_eq!(output.losses.d_losses.len(), 20);
        assert!(output.discriminator.is_some());
        assert!(output.losses.g_losses.iter().chain(&output.losses.d_losses).all(|l| *l >= 0.0));
        assert_eq!(output.losses.val_losses.len(), 20);
    }

    #[test]
    fn gan_with_unbounded_discriminator_uses_logits() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(4);
        for config in [
            ProblemConfig::Exponential(ExponentialConfig::new().with_n(30)),
            ProblemConfig::Poisson(PoissonConfig::new().with_n(8)),
            ProblemConfig::ChannelFlow(ChannelFlowConfig::new().with_n(50)),
        ] {
            let problem = Problem::from_config(&config).unwrap();
            let generator = GeneratorConfig::new()
                .init::<TestBackend, _>(problem.dim(), &mut rng, &device)
                .unwrap();
            let discriminator = DiscriminatorConfig::new()
                .with_unbounded(true)
                .with_activation(Activation::LeakyRelu)
                .init::<TestBackend, _>(&mut rng, &device)
                .unwrap();
            let training = TrainingConfig::new()
                .with_method(Method::Gan)
                .with_epochs(5)
                .with_log_every(0);
            let output =
                train_gan(&problem, generator, discriminator, &training, true, &mut rng, &device).unwrap();
            let losses = &output.losses;
            assert!(
                losses.g_losses.iter().chain(&losses.d_losses).all(|l| l.is_finite() && *l >= 0.0),
                "{:?}",
                problem.key()
            );
        }
    }

    #[test]
    fn non_finite_loss_is_recorded_and_warned_once() {
        let mut history = LossHistory::default();
        history.record(1, f32::NAN, None, 1.0);
        assert!(history.warned);
        history.record(2, 0.5, Some(f32::INFINITY), 0.5);
        assert_eq!(history.g_losses.len(), 2);
        assert_eq!(history.d_losses.len(), 1);
        assert_eq!(history.val_losses, vec![1.0, 0.5]);
    }
}
