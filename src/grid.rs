use crate::error::{Error, Result};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use rand::Rng;

/// 格子の1軸。`[min, max]` を `n` 点で等分します。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axis {
    pub min: f32,
    pub max: f32,
    pub n: usize,
}

impl Axis {
    pub fn new(min: f32, max: f32, n: usize) -> Result<Self> {
        if n < 2 {
            return Err(Error::InvalidConfig(format!(
                "格子点数 n は2以上である必要があります (n = {n})"
            )));
        }
        if !(max > min) {
            return Err(Error::InvalidConfig(format!(
                "区間の上限は下限より大きくなければなりません ([{min}, {max}])"
            )));
        }
        Ok(Self { min, max, n })
    }

    pub fn spacing(&self) -> f32 {
        (self.max - self.min) / (self.n - 1) as f32
    }

    pub fn values(&self) -> Vec<f32> {
        let step = self.spacing();
        (0..self.n)
            .map(|i| {
                if i == self.n - 1 {
                    self.max
                } else {
                    self.min + i as f32 * step
                }
            })
            .collect()
    }
}

/// 学習・評価に使う座標の集合。
///
/// 点は行優先で `[len, dim]` に並び、2次元の場合は第1軸が外側、第2軸が内側です。
/// 構築後は不変で、摂動は [`Grid::sample`] が返すコピーにのみ加えられます。
#[derive(Debug, Clone)]
pub struct Grid {
    axes: Vec<Axis>,
    points: Vec<f32>,
}

impl Grid {
    pub fn linspace(min: f32, max: f32, n: usize) -> Result<Self> {
        Ok(Self::cartesian(vec![Axis::new(min, max, n)?]))
    }

    pub fn cartesian(axes: Vec<Axis>) -> Self {
        let mut points = vec![Vec::new()];
        for axis in &axes {
            let values = axis.values();
            points = points
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |v| {
                        let mut point = prefix.clone();
                        point.push(*v);
                        point
                    })
                })
                .collect();
        }
        Self {
            points: points.into_iter().flatten().collect(),
            axes,
        }
    }

    pub fn dim(&self) -> usize {
        self.axes.len()
    }

    pub fn len(&self) -> usize {
        self.points.len() / self.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[f32] {
        &self.points
    }

    /// 第1軸に沿った点間隔。
    pub fn spacing(&self) -> f32 {
        self.axes[0].spacing()
    }

    /// 各座標に `[-spacing/3, spacing/3]` の一様乱数を加えたコピーを返します。
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
        let bound = self.spacing() / 3.0;
        self.points
            .iter()
            .map(|p| p + rng.random_range(-bound..=bound))
            .collect()
    }

    /// 各軸の点数を `2n - 1` にした評価用の格子（元の点とその中点）。
    pub fn refined(&self) -> Self {
        let axes = self
            .axes
            .iter()
            .map(|a| Axis {
                n: 2 * a.n - 1,
                ..*a
            })
            .collect();
        Self::cartesian(axes)
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        points_tensor(&self.points, self.dim(), device)
    }
}

/// 平坦な座標列を `[len, dim]` のテンソルにします。
pub fn points_tensor<B: Backend>(points: &[f32], dim: usize, device: &B::Device) -> Tensor<B, 2> {
    let n = points.len() / dim;
    Tensor::<B, 1>::from_floats(points, device).reshape([n, dim])
}
