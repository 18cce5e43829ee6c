use super::{Adjusted, Equation, onset};
use crate::error::Result;
use crate::grid::Grid;
use crate::jet::Jet;
use crate::ode::rk4;
use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use std::f32::consts::PI;

const RK4_MAX_STEP: f64 = 1e-2;

#[derive(Config, Debug)]
pub struct OscillatorConfig {
    #[config(default = 100)]
    pub n: usize,
    #[config(default = true)]
    pub perturb: bool,
    #[config(default = 0.0)]
    pub t_min: f32,
    #[config(default = "4.0 * PI")]
    pub t_max: f32,
    #[config(default = 0.0)]
    pub x0: f32,
    #[config(default = 1.0)]
    pub dx_dt0: f32,
}

#[derive(Config, Debug)]
pub struct NonlinearOscillatorConfig {
    #[config(default = 100)]
    pub n: usize,
    #[config(default = true)]
    pub perturb: bool,
    #[config(default = 0.0)]
    pub t_min: f32,
    #[config(default = "4.0 * PI")]
    pub t_max: f32,
    #[config(default = 0.0)]
    pub x0: f32,
    #[config(default = 1.0)]
    pub dx_dt0: f32,
    #[config(default = 1.0)]
    pub omega: f32,
    #[config(default = 0.1)]
    pub beta: f32,
    #[config(default = 1.0)]
    pub phi: f32,
    #[config(default = 0.1)]
    pub epsilon: f32,
}

/// 2階の初期値問題に共通の調整 `x = x0 + g dx0 + g² N`（`g = 1 - exp(-t)`）。
///
/// `g(0) = 0`, `g'(0) = 1` なので `x(0) = x0`, `x'(0) = dx0` が重みによらず成り立ちます。
fn second_order_adjust<B: Backend>(
    raw: &Jet<B>,
    coords: Tensor<B, 2>,
    x0: f32,
    dx_dt0: f32,
) -> Adjusted<B> {
    let g = onset(Jet::coordinate(coords, true));
    let x = g
        .clone()
        .mul_scalar(dx_dt0)
        .add(g.square().mul(raw.clone()))
        .add_scalar(x0);
    Adjusted::new(vec![x])
}

/// 単振動 `x'' + x = 0`。初期条件は `t = 0` で課します。
#[derive(Debug, Clone)]
pub struct SimpleOscillator {
    grid: Grid,
    perturb: bool,
    x0: f32,
    dx_dt0: f32,
}

impl SimpleOscillator {
    pub fn new(config: &OscillatorConfig) -> Result<Self> {
        Ok(Self {
            grid: Grid::linspace(config.t_min, config.t_max, config.n)?,
            perturb: config.perturb,
            x0: config.x0,
            dx_dt0: config.dx_dt0,
        })
    }
}

impl Equation for SimpleOscillator {
    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn perturb(&self) -> bool {
        self.perturb
    }

    fn solution(&self, points: &[f32]) -> Vec<f32> {
        points
            .iter()
            .map(|t| self.x0 * t.cos() + self.dx_dt0 * t.sin())
            .collect()
    }

    fn adjust<B: Backend>(&self, raw: &[Jet<B>], coords: Tensor<B, 2>) -> Adjusted<B> {
        second_order_adjust(&raw[0], coords, self.x0, self.dx_dt0)
    }

    fn residual<B: Backend>(&self, adjusted: &Adjusted<B>, _coords: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = adjusted.along(0);
        x.d2.clone() + x.value.clone()
    }

    fn leading_derivative<B: Backend>(&self, adjusted: &Adjusted<B>) -> Tensor<B, 2> {
        adjusted.along(0).d2.clone()
    }

    fn plotted_derivative(&self) -> Option<usize> {
        Some(2)
    }
}

/// 非線形振動子
///
/// `x'' + 2βx' + ω²x + φx² + εx³ = 0`
///
/// 閉じた解を持たないため、参照解は1階の連立系をRK4で積分して求めます。
#[derive(Debug, Clone)]
pub struct NonlinearOscillator {
    grid: Grid,
    perturb: bool,
    x0: f32,
    dx_dt0: f32,
    omega: f32,
    beta: f32,
    phi: f32,
    epsilon: f32,
}

impl NonlinearOscillator {
    pub fn new(config: &NonlinearOscillatorConfig) -> Result<Self> {
        Ok(Self {
            grid: Grid::linspace(config.t_min, config.t_max, config.n)?,
            perturb: config.perturb,
            x0: config.x0,
            dx_dt0: config.dx_dt0,
            omega: config.omega,
            beta: config.beta,
            phi: config.phi,
            epsilon: config.epsilon,
        })
    }

    /// `z = (x, x')` の時間微分。
    fn system(&self, z: &[f64]) -> Vec<f64> {
        let (x, v) = (z[0], z[1]);
        let beta = self.beta as f64;
        let omega = self.omega as f64;
        let accel = -(2.0 * beta * v
            + omega * omega * x
            + self.phi as f64 * x * x
            + self.epsilon as f64 * x * x * x);
        vec![v, accel]
    }
}

impl Equation for NonlinearOscillator {
    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn perturb(&self) -> bool {
        self.perturb
    }

    fn solution(&self, points: &[f32]) -> Vec<f32> {
        let z0 = [self.x0 as f64, self.dx_dt0 as f64];
        points
            .iter()
            .map(|t| rk4(|_, z| self.system(z), &z0, 0.0, *t as f64, RK4_MAX_STEP)[0] as f32)
            .collect()
    }

    fn adjust<B: Backend>(&self, raw: &[Jet<B>], coords: Tensor<B, 2>) -> Adjusted<B> {
        second_order_adjust(&raw[0], coords, self.x0, self.dx_dt0)
    }

    fn residual<B: Backend>(&self, adjusted: &Adjusted<B>, _coords: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = adjusted.along(0);
        let value = x.value.clone();
        let square = value.clone() * value.clone();
        let cube = square.clone() * value.clone();
        x.d2.clone()
            + x.d1.clone().mul_scalar(2.0 * self.beta)
            + value.mul_scalar(self.omega * self.omega)
            + square.mul_scalar(self.phi)
            + cube.mul_scalar(self.epsilon)
    }

    fn leading_derivative<B: Backend>(&self, adjusted: &Adjusted<B>) -> Tensor<B, 2> {
        adjusted.along(0).d2.clone()
    }
}
