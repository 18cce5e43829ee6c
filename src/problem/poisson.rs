use super::{Adjusted, Equation};
use crate::error::Result;
use crate::grid::{Axis, Grid};
use crate::jet::Jet;
use burn::config::Config;
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// 右辺 `f`。境界値 `u_D` のラプラシアンと打ち消し合うように選んであります。
const FORCING: f32 = -6.0;

#[derive(Config, Debug)]
pub struct PoissonConfig {
    /// 各軸の点数（格子全体は `n²` 点）
    #[config(default = 32)]
    pub n: usize,
    #[config(default = true)]
    pub perturb: bool,
    #[config(default = 0.0)]
    pub x_min: f32,
    #[config(default = 1.0)]
    pub x_max: f32,
    #[config(default = 0.0)]
    pub y_min: f32,
    #[config(default = 1.0)]
    pub y_max: f32,
}

/// 長方形領域上のポアソン方程式
///
/// `∇²u + f = 0`（`f = -6`）、境界上で `u = u_D = 1 + x² + 2y²`。
///
/// `u_D` は領域全体で定義された滑らかな関数なので、調整は
/// `u = u_D + (x - x0)(x1 - x)(y - y0)(y1 - y) N` とし、境界で消える因子をネットワーク出力に掛けます。
/// 厳密解は `u_D` そのものです。
#[derive(Debug, Clone)]
pub struct PoissonEquation {
    grid: Grid,
    perturb: bool,
    x_min: f32,
    x_max: f32,
    y_min: f32,
    y_max: f32,
}

impl PoissonEquation {
    pub fn new(config: &PoissonConfig) -> Result<Self> {
        let grid = Grid::cartesian(vec![
            Axis::new(config.x_min, config.x_max, config.n)?,
            Axis::new(config.y_min, config.y_max, config.n)?,
        ]);
        Ok(Self {
            grid,
            perturb: config.perturb,
            x_min: config.x_min,
            x_max: config.x_max,
            y_min: config.y_min,
            y_max: config.y_max,
        })
    }
}

fn boundary_value<B: Backend>(x: Jet<B>, y: Jet<B>) -> Jet<B> {
    x.square().add(y.square().mul_scalar(2.0)).add_scalar(1.0)
}

impl Equation for PoissonEquation {
    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn perturb(&self) -> bool {
        self.perturb
    }

    fn solution(&self, points: &[f32]) -> Vec<f32> {
        points
            .chunks_exact(2)
            .map(|p| 1.0 + p[0] * p[0] + 2.0 * p[1] * p[1])
            .collect()
    }

    fn adjust<B: Backend>(&self, raw: &[Jet<B>], coords: Tensor<B, 2>) -> Adjusted<B> {
        let [n, _] = coords.dims();
        let xs = coords.clone().slice([0..n, 0..1]);
        let ys = coords.slice([0..n, 1..2]);
        let axes = raw
            .iter()
            .enumerate()
            .map(|(axis, net)| {
                let x = Jet::coordinate(xs.clone(), axis == 0);
                let y = Jet::coordinate(ys.clone(), axis == 1);
                let bubble = x
                    .clone()
                    .add_scalar(-self.x_min)
                    .mul(x.clone().neg().add_scalar(self.x_max))
                    .mul(y.clone().add_scalar(-self.y_min))
                    .mul(y.clone().neg().add_scalar(self.y_max));
                boundary_value(x, y).add(bubble.mul(net.clone()))
            })
            .collect();
        Adjusted::new(axes)
    }

    fn residual<B: Backend>(&self, adjusted: &Adjusted<B>, _coords: Tensor<B, 2>) -> Tensor<B, 2> {
        (adjusted.along(0).d2.clone() + adjusted.along(1).d2.clone()).add_scalar(FORCING)
    }

    fn leading_derivative<B: Backend>(&self, adjusted: &Adjusted<B>) -> Tensor<B, 2> {
        adjusted.along(0).d2.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::test_util::{TestBackend, raw, to_vec};
    use crate::grid::points_tensor;

    fn problem() -> PoissonEquation {
        PoissonEquation::new(&PoissonConfig::new().with_n(5)).unwrap()
    }

    #[test]
    fn boundary_values_hold_for_any_weights() {
        let problem = problem();
        let boundary = [0.0, 0.3, 1.0, 0.6, 0.25, 0.0, 0.8, 1.0];
        let coords = points_tensor::<TestBackend>(&boundary, 2, &Default::default());
        let adjusted = problem.adjust(&raw(2, coords.clone()), coords);
        let value = to_vec(adjusted.value().clone());
        let expected = problem.solution(&boundary);
        for (v, e) in value.iter().zip(expected) {
            assert!((v - e).abs() < 1e-5);
        }
    }

    #[test]
    fn exact_solution_has_zero_residual() {
        let problem = problem();
        let coords = problem.grid().to_tensor::<TestBackend>(&Default::default());
        let [n, _] = coords.dims();
        let xs = coords.clone().slice([0..n, 0..1]);
        let ys = coords.clone().slice([0..n, 1..2]);
        let axes = (0..2)
            .map(|axis| {
                boundary_value(
                    Jet::coordinate(xs.clone(), axis == 0),
                    Jet::coordinate(ys.clone(), axis == 1),
                )
            })
            .collect();
        let residual = to_vec(problem.residual(&Adjusted::new(axes), coords));
        assert!(residual.iter().all(|r| r.abs() < 1e-5));
    }

    #[test]
    fn grid_covers_square() {
        let problem = problem();
        assert_eq!(problem.grid().len(), 25);
        assert_eq!(problem.grid().dim(), 2);
    }
}
