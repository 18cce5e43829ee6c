use super::{Adjusted, Equation, onset};
use crate::error::Result;
use crate::grid::Grid;
use crate::jet::Jet;
use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;

#[derive(Config, Debug)]
pub struct ExponentialConfig {
    #[config(default = 100)]
    pub n: usize,
    #[config(default = true)]
    pub perturb: bool,
    #[config(default = 0.0)]
    pub t_min: f32,
    #[config(default = 10.0)]
    pub t_max: f32,
    /// 初期値 `x(0)`
    #[config(default = 1.0)]
    pub x0: f32,
    /// 減衰率 `L`
    #[config(default = 1.0)]
    pub rate: f32,
}

/// 指数減衰 `x' + Lx = 0`、解析解は `x = x0 exp(-Lt)`。
#[derive(Debug, Clone)]
pub struct Exponential {
    grid: Grid,
    perturb: bool,
    x0: f32,
    rate: f32,
}

impl Exponential {
    pub fn new(config: &ExponentialConfig) -> Result<Self> {
        Ok(Self {
            grid: Grid::linspace(config.t_min, config.t_max, config.n)?,
            perturb: config.perturb,
            x0: config.x0,
            rate: config.rate,
        })
    }
}

impl Equation for Exponential {
    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn perturb(&self) -> bool {
        self.perturb
    }

    fn solution(&self, points: &[f32]) -> Vec<f32> {
        points
            .iter()
            .map(|t| self.x0 * (-self.rate * t).exp())
            .collect()
    }

    /// `x = x0 + (1 - exp(-t)) N`
    fn adjust<B: Backend>(&self, raw: &[Jet<B>], coords: Tensor<B, 2>) -> Adjusted<B> {
        let t = Jet::coordinate(coords, true);
        let x = onset(t).mul(raw[0].clone()).add_scalar(self.x0);
        Adjusted::new(vec![x])
    }

    fn residual<B: Backend>(&self, adjusted: &Adjusted<B>, _coords: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = adjusted.along(0);
        x.d1.clone() + x.value.clone().mul_scalar(self.rate)
    }

    fn leading_derivative<B: Backend>(&self, adjusted: &Adjusted<B>) -> Tensor<B, 2> {
        adjusted.along(0).d1.clone()
    }

    fn plotted_derivative(&self) -> Option<usize> {
        Some(1)
    }
}
