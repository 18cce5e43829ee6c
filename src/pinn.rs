//! 生成器の出力から損失と評価指標を組み立てる部分。
//!
//! 入力に関する微分はジェットで順伝播させるため、ここで作る損失はすべて
//! 通常のテンソル演算だけでできており、`backward()` でそのままネットワークの
//! パラメータまで逆伝播できます。

use crate::error::{Error, Result};
use crate::grid::points_tensor;
use crate::model::Mlp;
use crate::problem::{Adjusted, Equation, Problem, ReynoldsNumbers};
use burn::nn::loss::{BinaryCrossEntropyLossConfig, MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::{Int, Tensor};
use serde::{Deserialize, Serialize};
use tracing::info;

/// 生成器の出力に調整を施した予測を返します。
pub fn forward_adjusted<B: Backend>(
    problem: &Problem,
    generator: &Mlp<B>,
    coords: Tensor<B, 2>,
) -> Adjusted<B> {
    let raw = generator.forward_jets(coords.clone());
    problem.adjust(&raw, coords)
}

/// GAN/Lagaris 学習で比べる2つのサンプル。
///
/// `fake` は方程式の最高階の微分項、`real` は方程式が成り立つときにそれが
/// 等しくなるべき値（`fake - residual`）です。
#[derive(Debug, Clone)]
pub struct Samples<B: Backend> {
    pub fake: Tensor<B, 2>,
    pub real: Tensor<B, 2>,
}

impl<B: Backend> Samples<B> {
    pub fn new(problem: &Problem, adjusted: &Adjusted<B>, coords: Tensor<B, 2>) -> Self {
        let fake = problem.leading_derivative(adjusted);
        let real = fake.clone() - problem.residual(adjusted, coords);
        Self { fake, real }
    }

    /// 計算グラフから切り離したコピー（識別器の更新用）。
    pub fn detach(&self) -> Self {
        Self {
            fake: self.fake.clone().detach(),
            real: self.real.clone().detach(),
        }
    }
}

/// 残差の二乗平均 `MSE(residual, 0)`。
pub fn residual_loss<B: Backend>(
    problem: &Problem,
    generator: &Mlp<B>,
    coords: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let adjusted = forward_adjusted(problem, generator, coords.clone());
    let residual = problem.residual(&adjusted, coords);
    let zeros = residual.zeros_like();
    MseLoss::new().forward(residual, zeros, Reduction::Mean)
}

/// `MSE(fake, real)`。
pub fn lagaris_loss<B: Backend>(
    problem: &Problem,
    generator: &Mlp<B>,
    coords: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let adjusted = forward_adjusted(problem, generator, coords.clone());
    let samples = Samples::new(problem, &adjusted, coords);
    MseLoss::new().forward(samples.fake, samples.real, Reduction::Mean)
}

/// 識別器の出力 `scores` を全点 `label`（1 または 0）と比べる交差エントロピー。
///
/// `logits` が真なら `scores` はシグモイド前の値として扱います。
pub fn bce_loss<B: Backend>(
    scores: Tensor<B, 2>,
    label: i64,
    logits: bool,
    smoothing: Option<f32>,
) -> Tensor<B, 1> {
    let device = scores.device();
    let targets = Tensor::<B, 2, Int>::full(scores.dims(), label, &device);
    BinaryCrossEntropyLossConfig::new()
        .with_logits(logits)
        .with_smoothing(smoothing)
        .init(&device)
        .forward(scores, targets)
}

/// 生成器の損失 `BCE(D(fake), 1)`。
pub fn generator_loss<B: Backend>(
    discriminator: &Mlp<B>,
    samples: &Samples<B>,
    logits: bool,
    smoothing: Option<f32>,
) -> Tensor<B, 1> {
    bce_loss(discriminator.forward(samples.fake.clone()), 1, logits, smoothing)
}

/// 識別器の損失 `(BCE(D(real), 1) + BCE(D(fake), 0)) / 2`。
pub fn discriminator_loss<B: Backend>(
    discriminator: &Mlp<B>,
    samples: &Samples<B>,
    logits: bool,
    smoothing: Option<f32>,
) -> Tensor<B, 1> {
    let real = bce_loss(discriminator.forward(samples.real.clone()), 1, logits, smoothing);
    let fake = bce_loss(discriminator.forward(samples.fake.clone()), 0, logits, smoothing);
    (real + fake).div_scalar(2.0)
}

/// 学習後の評価指標。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// 格子上での参照解との二乗平均誤差
    pub final_mse: f32,
    /// 細分格子上での残差の二乗平均
    pub final_residual: f32,
    /// チャネル流のときのみ、予測した速度分布から求めたレイノルズ数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reynolds: Option<ReynoldsNumbers>,
}

/// 予測の `order` 階微分（格子上）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Derivative {
    pub order: usize,
    pub values: Vec<f32>,
}

/// 格子上の予測と参照解。`preds.json` と予測グラフに使います。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub dim: usize,
    /// `[len, dim]` を行優先で平坦化した座標
    pub points: Vec<f32>,
    pub predicted: Vec<f32>,
    pub reference: Vec<f32>,
    /// 格子上の残差
    #[serde(default)]
    pub residual: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivative: Option<Derivative>,
}

impl Prediction {
    pub fn len(&self) -> usize {
        self.predicted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicted.is_empty()
    }

    pub fn mse(&self) -> f32 {
        mean_square(self.predicted.iter().zip(&self.reference).map(|(p, r)| p - r))
    }
}

/// 固定格子（摂動なし）上で調整済みの予測を計算します。
pub fn predict<B: Backend>(
    problem: &Problem,
    generator: &Mlp<B>,
    device: &B::Device,
) -> Result<Prediction> {
    let grid = problem.grid();
    let coords = grid.to_tensor::<B>(device);
    let adjusted = forward_adjusted(problem, generator, coords.clone());
    let derivative = match problem.plotted_derivative() {
        Some(order) => {
            let jet = adjusted.along(0);
            let values = if order == 1 { jet.d1.clone() } else { jet.d2.clone() };
            Some(Derivative {
                order,
                values: to_vec(values)?,
            })
        }
        None => None,
    };
    let residual = to_vec(problem.residual(&adjusted, coords))?;
    let predicted = to_vec(adjusted.value().clone())?;
    Ok(Prediction {
        dim: grid.dim(),
        points: grid.points().to_vec(),
        reference: problem.solution(grid.points()),
        predicted,
        residual,
        derivative,
    })
}

/// 学習済みの生成器を評価します。
///
/// 推論専用のバックエンド（`module.valid()`）で呼ぶことを想定しています。
pub fn evaluate<B: Backend>(
    problem: &Problem,
    generator: &Mlp<B>,
    device: &B::Device,
) -> Result<(Metrics, Prediction)> {
    let prediction = predict(problem, generator, device)?;

    let refined = problem.grid().refined();
    let coords = points_tensor::<B>(refined.points(), refined.dim(), device);
    let raw = generator.forward_jets(coords.clone());
    let residual = to_vec(problem.equation(&raw, coords))?;

    let reynolds = match problem {
        Problem::ChannelFlow(flow) => {
            let re = flow.reynolds(&prediction.points, &prediction.predicted);
            info!(
                "レイノルズ数: Re_tau = {:.1}, Re_0 = {:.1}, Re_m = {:.1}",
                re.retau, re.renot, re.renum
            );
            Some(re)
        }
        _ => None,
    };

    let metrics = Metrics {
        final_mse: prediction.mse(),
        final_residual: mean_square(residual.into_iter()),
        reynolds,
    };
    Ok((metrics, prediction))
}

fn mean_square(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, n) = values.fold((0.0f64, 0usize), |(sum, n), v| (sum + (v as f64).powi(2), n + 1));
    if n == 0 { 0.0 } else { (sum / n as f64) as f32 }
}

pub(crate) fn to_vec<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(Error::TensorData)
}
