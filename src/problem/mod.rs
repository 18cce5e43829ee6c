//! 解くべき微分方程式の定義。
//!
//! 各問題は格子の生成、初期値・境界値を厳密に満たすための調整（adjustment）、
//! 方程式の残差、検証用の参照解を持ちます。調整と残差はジェット演算で書かれているため、
//! 返される微分は調整後の式そのものの微分です。

mod channel;
mod exponential;
mod oscillator;
mod poisson;

pub use channel::{ChannelFlow, ChannelFlowConfig, ReynoldsNumbers};
pub use exponential::{Exponential, ExponentialConfig};
pub use oscillator::{
    NonlinearOscillator, NonlinearOscillatorConfig, OscillatorConfig, SimpleOscillator,
};
pub use poisson::{PoissonConfig, PoissonEquation};

use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::jet::Jet;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// コマンドラインで問題を選ぶためのキー。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKey {
    Exp,
    Sho,
    Nlo,
    Pos,
    Chan,
}

impl ProblemKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemKey::Exp => "exp",
            ProblemKey::Sho => "sho",
            ProblemKey::Nlo => "nlo",
            ProblemKey::Pos => "pos",
            ProblemKey::Chan => "chan",
        }
    }
}

impl fmt::Display for ProblemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProblemKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "exp" => Ok(ProblemKey::Exp),
            "sho" => Ok(ProblemKey::Sho),
            "nlo" => Ok(ProblemKey::Nlo),
            "pos" => Ok(ProblemKey::Pos),
            "chan" => Ok(ProblemKey::Chan),
            _ => Err(Error::UnknownProblem(s.to_string())),
        }
    }
}

/// 問題の設定。`kind` タグで種類を区別します。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProblemConfig {
    Exponential(ExponentialConfig),
    SimpleOscillator(OscillatorConfig),
    NonlinearOscillator(NonlinearOscillatorConfig),
    Poisson(PoissonConfig),
    ChannelFlow(ChannelFlowConfig),
}

impl ProblemConfig {
    /// キーに対応する既定の問題設定。
    pub fn default_for(key: ProblemKey) -> Self {
        match key {
            ProblemKey::Exp => ProblemConfig::Exponential(ExponentialConfig::new()),
            ProblemKey::Sho => ProblemConfig::SimpleOscillator(OscillatorConfig::new()),
            ProblemKey::Nlo => ProblemConfig::NonlinearOscillator(NonlinearOscillatorConfig::new()),
            ProblemKey::Pos => ProblemConfig::Poisson(PoissonConfig::new()),
            ProblemKey::Chan => ProblemConfig::ChannelFlow(ChannelFlowConfig::new()),
        }
    }

    pub fn key(&self) -> ProblemKey {
        match self {
            ProblemConfig::Exponential(_) => ProblemKey::Exp,
            ProblemConfig::SimpleOscillator(_) => ProblemKey::Sho,
            ProblemConfig::NonlinearOscillator(_) => ProblemKey::Nlo,
            ProblemConfig::Poisson(_) => ProblemKey::Pos,
            ProblemConfig::ChannelFlow(_) => ProblemKey::Chan,
        }
    }
}

/// 調整済みの予測。入力の各軸に沿ったジェットを1つずつ持ちます。
#[derive(Debug, Clone)]
pub struct Adjusted<B: Backend> {
    axes: Vec<Jet<B>>,
}

impl<B: Backend> Adjusted<B> {
    pub fn new(axes: Vec<Jet<B>>) -> Self {
        Self { axes }
    }

    pub fn value(&self) -> &Tensor<B, 2> {
        &self.axes[0].value
    }

    /// 第 `axis` 入力座標に沿ったジェット。
    pub fn along(&self, axis: usize) -> &Jet<B> {
        &self.axes[axis]
    }
}

/// 微分方程式が満たすべき操作。
pub trait Equation {
    fn grid(&self) -> &Grid;

    fn perturb(&self) -> bool;

    /// 学習用のバッチ。`perturb` が偽なら格子そのものを返します。
    fn grid_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
        if self.perturb() {
            self.grid().sample(rng)
        } else {
            self.grid().points().to_vec()
        }
    }

    /// 参照解（解析解または数値解）。可視化と評価にのみ使います。
    fn solution(&self, points: &[f32]) -> Vec<f32>;

    /// ネットワークの生の出力を初期値・境界値を満たす形に変換します。
    fn adjust<B: Backend>(&self, raw: &[Jet<B>], coords: Tensor<B, 2>) -> Adjusted<B>;

    /// 方程式の左辺。解いている点で0になります。
    fn residual<B: Backend>(&self, adjusted: &Adjusted<B>, coords: Tensor<B, 2>) -> Tensor<B, 2>;

    /// 方程式の最高階の微分項。GAN学習の「偽」サンプルとして使います。
    fn leading_derivative<B: Backend>(&self, adjusted: &Adjusted<B>) -> Tensor<B, 2>;

    /// 予測と並べて描画する微分の階数（1 または 2）。描画しない問題は `None`。
    fn plotted_derivative(&self) -> Option<usize> {
        None
    }

    fn equation<B: Backend>(&self, raw: &[Jet<B>], coords: Tensor<B, 2>) -> Tensor<B, 2> {
        let adjusted = self.adjust(raw, coords.clone());
        self.residual(&adjusted, coords)
    }
}

/// 対応している問題の閉じた集合。
#[derive(Debug, Clone)]
pub enum Problem {
    Exponential(Exponential),
    SimpleOscillator(SimpleOscillator),
    NonlinearOscillator(NonlinearOscillator),
    Poisson(PoissonEquation),
    ChannelFlow(ChannelFlow),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            Problem::Exponential($inner) => $body,
            Problem::SimpleOscillator($inner) => $body,
            Problem::NonlinearOscillator($inner) => $body,
            Problem::Poisson($inner) => $body,
            Problem::ChannelFlow($inner) => $body,
        }
    };
}

impl Problem {
    pub fn from_config(config: &ProblemConfig) -> Result<Self> {
        Ok(match config {
            ProblemConfig::Exponential(c) => Problem::Exponential(Exponential::new(c)?),
            ProblemConfig::SimpleOscillator(c) => Problem::SimpleOscillator(SimpleOscillator::new(c)?),
            ProblemConfig::NonlinearOscillator(c) => {
                Problem::NonlinearOscillator(NonlinearOscillator::new(c)?)
            }
            ProblemConfig::Poisson(c) => Problem::Poisson(PoissonEquation::new(c)?),
            ProblemConfig::ChannelFlow(c) => Problem::ChannelFlow(ChannelFlow::new(c)?),
        })
    }

    pub fn key(&self) -> ProblemKey {
        match self {
            Problem::Exponential(_) => ProblemKey::Exp,
            Problem::SimpleOscillator(_) => ProblemKey::Sho,
            Problem::NonlinearOscillator(_) => ProblemKey::Nlo,
            Problem::Poisson(_) => ProblemKey::Pos,
            Problem::ChannelFlow(_) => ProblemKey::Chan,
        }
    }

    /// 入力座標の次元。
    pub fn dim(&self) -> usize {
        self.grid().dim()
    }
}

impl Equation for Problem {
    fn grid(&self) -> &Grid {
        dispatch!(self, p => p.grid())
    }

    fn perturb(&self) -> bool {
        dispatch!(self, p => p.perturb())
    }

    fn solution(&self, points: &[f32]) -> Vec<f32> {
        dispatch!(self, p => p.solution(points))
    }

    fn adjust<B: Backend>(&self, raw: &[Jet<B>], coords: Tensor<B, 2>) -> Adjusted<B> {
        dispatch!(self, p => p.adjust(raw, coords))
    }

    fn residual<B: Backend>(&self, adjusted: &Adjusted<B>, coords: Tensor<B, 2>) -> Tensor<B, 2> {
        dispatch!(self, p => p.residual(adjusted, coords))
    }

    fn leading_derivative<B: Backend>(&self, adjusted: &Adjusted<B>) -> Tensor<B, 2> {
        dispatch!(self, p => p.leading_derivative(adjusted))
    }

    fn plotted_derivative(&self) -> Option<usize> {
        dispatch!(self, p => p.plotted_derivative())
    }
}

/// 時間 `t` のジェットに対する `1 - exp(-t)`。`t = 0` で値0、1階微分1をとります。
pub(crate) fn onset<B: Backend>(t: Jet<B>) -> Jet<B> {
    t.neg().exp().neg().add_scalar(1.0)
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::jet::Jet;
    use crate::model::{GeneratorConfig, Mlp};
    use burn::backend::NdArray;
    use burn::tensor::Tensor;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    pub type TestBackend = NdArray<f32>;

    pub fn column(values: &[f32]) -> Tensor<TestBackend, 2> {
        let device = Default::default();
        Tensor::<TestBackend, 1>::from_floats(values, &device).reshape([values.len(), 1])
    }

    pub fn to_vec(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().convert::<f32>().to_vec().unwrap()
    }

    pub fn network(seed: u64, in_dim: usize) -> Mlp<TestBackend> {
        let mut rng = StdRng::seed_from_u64(seed);
        GeneratorConfig::new()
            .init(in_dim, &mut rng, &Default::default())
            .unwrap()
    }

    pub fn raw(seed: u64, coords: Tensor<TestBackend, 2>) -> Vec<Jet<TestBackend>> {
        let dim = coords.dims()[1];
        network(seed, dim).forward_jets(coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_problem_keys() {
        assert_eq!(" EXP ".parse::<ProblemKey>().unwrap(), ProblemKey::Exp);
        assert_eq!("chan".parse::<ProblemKey>().unwrap(), ProblemKey::Chan);
        assert!(matches!(
            "heat".parse::<ProblemKey>(),
            Err(Error::UnknownProblem(key)) if key == "heat"
        ));
    }

    #[test]
    fn default_configs_build_matching_problems() {
        for key in [
            ProblemKey::Exp,
            ProblemKey::Sho,
            ProblemKey::Nlo,
            ProblemKey::Pos,
            ProblemKey::Chan,
        ] {
            let config = ProblemConfig::default_for(key);
            assert_eq!(config.key(), key);
            let problem = Problem::from_config(&config).unwrap();
            assert_eq!(problem.key(), key);
            let expected_dim = if key == ProblemKey::Pos { 2 } else { 1 };
            assert_eq!(problem.dim(), expected_dim);
        }
    }

    #[test]
    fn problem_config_round_trips_through_json() {
        let config = ProblemConfig::default_for(ProblemKey::Nlo);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["kind"], "nonlinear_oscillator");
        let back: ProblemConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.key(), ProblemKey::Nlo);
    }

    #[test]
    fn unperturbed_sampling_returns_grid() {
        use rand::SeedableRng;
        let mut config = ExponentialConfig::new();
        config.perturb = false;
        let problem = Problem::from_config(&ProblemConfig::Exponential(config)).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let first = problem.grid_sample(&mut rng);
        let second = problem.grid_sample(&mut rng);
        assert_eq!(first, problem.grid().points());
        assert_eq!(first, second);
    }
}
