use super::{Adjusted, Equation};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::jet::Jet;
use crate::ode::rk4;
use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use tracing::debug;

const RK4_MAX_STEP: f64 = 1e-3;

#[derive(Config, Debug)]
pub struct ChannelFlowConfig {
    #[config(default = 1000)]
    pub n: usize,
    #[config(default = true)]
    pub perturb: bool,
    #[config(default = "-1.0")]
    pub y_min: f32,
    #[config(default = 1.0)]
    pub y_max: f32,
    /// 動粘性係数
    #[config(default = 0.001)]
    pub nu: f32,
    /// 圧力勾配
    #[config(default = "-1.0")]
    pub dp_dx: f32,
    /// 密度
    #[config(default = 1.0)]
    pub rho: f32,
    /// カルマン定数（混合距離モデル）
    #[config(default = 0.41)]
    pub kappa: f32,
}

/// 平行平板間の定常チャネル流（RANS、混合距離モデル）
///
/// `ν u'' - d<uv>/dy - (1/ρ) dp/dx = 0`,
/// `<uv> = -(κ(|y - yc| - δ))² |u'| u'`
///
/// `yc` は流路中心、`δ` は半幅です。両壁で `u = 0`（滑りなし）。
#[derive(Debug, Clone)]
pub struct ChannelFlow {
    grid: Grid,
    perturb: bool,
    y_min: f32,
    y_max: f32,
    nu: f32,
    dp_dx: f32,
    rho: f32,
    kappa: f32,
}

impl ChannelFlow {
    pub fn new(config: &ChannelFlowConfig) -> Result<Self> {
        if !(config.nu > 0.0) || !(config.rho > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "nu と rho は正である必要があります (nu = {}, rho = {})",
                config.nu, config.rho
            )));
        }
        let flow = Self {
            grid: Grid::linspace(config.y_min, config.y_max, config.n)?,
            perturb: config.perturb,
            y_min: config.y_min,
            y_max: config.y_max,
            nu: config.nu,
            dp_dx: config.dp_dx,
            rho: config.rho,
            kappa: config.kappa,
        };
        debug!("チャネル流: Re_tau = {:.1}", flow.retau());
        Ok(flow)
    }

    fn center(&self) -> f32 {
        (self.y_min + self.y_max) / 2.0
    }

    fn half_width(&self) -> f32 {
        (self.y_max - self.y_min) / 2.0
    }

    /// 運動量の釣り合いを一度積分した `ν u' + a|u'|u' = (dp/dx / ρ)(y - yc)` を
    /// `u'` について解いたもの（`a = κ²(|y - yc| - δ)²`）。
    fn velocity_gradient(&self, y: f64) -> f64 {
        let nu = self.nu as f64;
        let s = y - self.center() as f64;
        let mixing = self.kappa as f64 * (s.abs() - self.half_width() as f64);
        let a = mixing * mixing;
        let rhs = self.dp_dx as f64 / self.rho as f64 * s;
        rhs.signum() * 2.0 * rhs.abs() / (nu + (nu * nu + 4.0 * a * rhs.abs()).sqrt())
    }

    /// 壁面摩擦速度に基づくレイノルズ数 `Re_τ = u_τ δ / ν`。
    pub fn retau(&self) -> f32 {
        let tau_w = -self.half_width() * self.dp_dx;
        let u_tau = (tau_w / self.rho).sqrt();
        u_tau * self.half_width() / self.nu
    }

    /// 速度分布 `u`（`points` は壁から壁へ昇順）から求めたレイノルズ数。
    ///
    /// `Re_0` は中央の点の速度 `U_0` から `U_0 δ / ν`、`Re_m` は壁から中央までを
    /// 台形則で積分した平均流速 `U_m` から `2 δ U_m / ν` です。
    pub fn reynolds(&self, points: &[f32], u: &[f32]) -> ReynoldsNumbers {
        let delta = self.half_width();
        let center = u.len().min(points.len()) / 2;
        let renot = u.get(center).map_or(f32::NAN, |u0| u0 * delta / self.nu);
        let integral: f32 = points[..center]
            .windows(2)
            .zip(u[..center].windows(2))
            .map(|(y, u)| (y[1] - y[0]) * (u[0] + u[1]) / 2.0)
            .sum();
        let mean_velocity = integral / delta;
        ReynoldsNumbers {
            retau: self.retau(),
            renot,
            renum: 2.0 * delta * mean_velocity / self.nu,
        }
    }
}

/// チャネル流の代表的なレイノルズ数。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReynoldsNumbers {
    /// 壁面摩擦速度基準 `Re_τ`
    pub retau: f32,
    /// 中心速度基準 `Re_0`
    pub renot: f32,
    /// 平均流速基準 `Re_m`
    pub renum: f32,
}

impl Equation for ChannelFlow {
    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn perturb(&self) -> bool {
        self.perturb
    }

    fn solution(&self, points: &[f32]) -> Vec<f32> {
        points
            .iter()
            .map(|y| {
                let u = rk4(
                    |s, _| vec![self.velocity_gradient(s)],
                    &[0.0],
                    self.y_min as f64,
                    *y as f64,
                    RK4_MAX_STEP,
                );
                u[0] as f32
            })
            .collect()
    }

    /// `u = (y - y0)(y - y1) N`
    fn adjust<B: Backend>(&self, raw: &[Jet<B>], coords: Tensor<B, 2>) -> Adjusted<B> {
        let y = Jet::coordinate(coords, true);
        let walls = y
            .clone()
            .add_scalar(-self.y_min)
            .mul(y.add_scalar(-self.y_max));
        Adjusted::new(vec![walls.mul(raw[0].clone())])
    }

    fn residual<B: Backend>(&self, adjusted: &Adjusted<B>, coords: Tensor<B, 2>) -> Tensor<B, 2> {
        let u = adjusted.along(0);
        let du = u.d1.clone();
        let d2u = u.d2.clone();
        let k2 = self.kappa * self.kappa;

        let s = coords.sub_scalar(self.center());
        let mixing = s.clone().abs().sub_scalar(self.half_width());
        // <uv> = -a q, a = κ²m², q = |u'|u'
        let a = (mixing.clone() * mixing.clone()).mul_scalar(k2);
        let da = (mixing * s.sign()).mul_scalar(2.0 * k2);
        let q = du.clone().abs() * du.clone();
        let dq = (du.abs() * d2u.clone()).mul_scalar(2.0);
        let d_stress = (da * q + a * dq).neg();

        (d2u.mul_scalar(self.nu) - d_stress).sub_scalar(self.dp_dx / self.rho)
    }

    fn leading_derivative<B: Backend>(&self, adjusted: &Adjusted<B>) -> Tensor<B, 2> {
        adjusted.along(0).d2.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::test_util::{column, raw, to_vec};

    fn problem() -> ChannelFlow {
        ChannelFlow::new(&ChannelFlowConfig::new().with_n(50).with_nu(0.05)).unwrap()
    }

    #[test]
    fn no_slip_at_both_walls() {
        let problem = problem();
        let coords = column(&[-1.0, 0.0, 1.0]);
        let adjusted = problem.adjust(&raw(5, coords.clone()), coords);
        let value = to_vec(adjusted.value().clone());
        assert!(value[0].abs() < 1e-6);
        assert!(value[2].abs() < 1e-6);
    }

    #[test]
    fn laminar_limit_matches_parabolic_profile() {
        let config = ChannelFlowConfig::new().with_kappa(0.0).with_nu(0.5);
        let problem = ChannelFlow::new(&config).unwrap();
        // u = -(dp/dx)/(2ν) (1 - y²)
        for (u, y) in problem.solution(&[-1.0, -0.5, 0.0, 0.5]).iter().zip([-1.0f32, -0.5, 0.0, 0.5]) {
            let expected = 1.0 / (2.0 * 0.5) * (1.0 - y * y);
            assert!((u - expected).abs() < 1e-4, "{u} vs {expected}");
        }
    }

    #[test]
    fn parabolic_profile_has_zero_laminar_residual() {
        let config = ChannelFlowConfig::new().with_kappa(0.0).with_nu(0.5);
        let problem = ChannelFlow::new(&config).unwrap();
        let coords = column(&[-0.9, -0.1, 0.4]);
        let y = Jet::coordinate(coords.clone(), true);
        let exact = y.square().neg().add_scalar(1.0);
        let residual = to_vec(problem.residual(&Adjusted::new(vec![exact]), coords));
        assert!(residual.iter().all(|r| r.abs() < 1e-5));
    }

    #[test]
    fn reference_velocity_is_symmetric_and_positive() {
        let problem = problem();
        let u = problem.solution(&[-0.5, 0.0, 0.5]);
        assert!(u[1] > u[0] && u[0] > 0.0);
        assert!((u[0] - u[2]).abs() < 1e-3 * u[1]);
    }

    #[test]
    fn reynolds_numbers_of_laminar_profile() {
        let config = ChannelFlowConfig::new().with_kappa(0.0).with_nu(0.5).with_n(1001);
        let problem = ChannelFlow::new(&config).unwrap();
        let points = problem.grid().points().to_vec();
        let u = problem.solution(&points);
        let re = problem.reynolds(&points, &u);
        // U_0 = 1, U_m = 2/3
        assert!((re.renot - 2.0).abs() < 1e-3, "{}", re.renot);
        assert!((re.renum - 8.0 / 3.0).abs() < 2e-2, "{}", re.renum);
        assert!((re.retau - problem.retau()).abs() < 1e-6);
    }

    #[test]
    fn turbulent_residual_matches_finite_differences() {
        let (nu, kappa, dp_dx) = (0.05f64, 0.41f64, -1.0f64);
        let config = ChannelFlowConfig::new()
            .with_nu(nu as f32)
            .with_kappa(kappa as f32);
        let problem = ChannelFlow::new(&config).unwrap();
        let ys = [-0.7f32, -0.2, 0.35, 0.8];

        // u = (1 - y²)(1 + 0.3y)
        let coords = column(&ys);
        let y = Jet::coordinate(coords.clone(), true);
        let u = y
            .clone()
            .square()
            .neg()
            .add_scalar(1.0)
            .mul(y.mul_scalar(0.3).add_scalar(1.0));
        let residual = to_vec(problem.residual(&Adjusted::new(vec![u]), coords));

        let du = |y: f64| 0.3 - 2.0 * y - 0.9 * y * y;
        let d2u = |y: f64| -2.0 - 1.8 * y;
        let uv = |y: f64| {
            let m = kappa * (y.abs() - 1.0);
            -(m * m) * du(y).abs() * du(y)
        };
        let h = 1e-4;
        for (r, y) in residual.iter().zip(ys) {
            let y = y as f64;
            let d_uv = (uv(y + h) - uv(y - h)) / (2.0 * h);
            let expected = nu * d2u(y) - d_uv - dp_dx;
            assert!(
                (*r as f64 - expected).abs() < 1e-3 * expected.abs().max(1.0),
                "y = {y}: {r} vs {expected}"
            );
        }
    }

    #[test]
    fn rejects_non_positive_viscosity() {
        let result = ChannelFlow::new(&ChannelFlowConfig::new().with_nu(0.0));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn retau_follows_wall_units() {
        let problem = ChannelFlow::new(&ChannelFlowConfig::new()).unwrap();
        assert!((problem.retau() - 1000.0).abs() < 1e-2);
    }
}
