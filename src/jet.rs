//! テンソル上の前進モード自動微分（2階までのジェット）。
//!
//! burn の `Autodiff` バックエンドは入力に関する高階微分を扱えないため、
//! 入力方向の1階・2階微分はジェットとして順伝播させます。ジェットの演算は
//! すべて通常のテンソル演算なので、損失からネットワークのパラメータへの
//! 逆伝播はそのまま機能します。

use burn::prelude::Backend;
use burn::tensor::Tensor;

/// ある入力方向 `s` に沿った値と1階・2階微分の組 `(f, df/ds, d²f/ds²)`。
///
/// すべての成分は同じ形状 `[n, k]` を持ちます。
#[derive(Debug, Clone)]
pub struct Jet<B: Backend> {
    pub value: Tensor<B, 2>,
    pub d1: Tensor<B, 2>,
    pub d2: Tensor<B, 2>,
}

impl<B: Backend> Jet<B> {
    pub fn new(value: Tensor<B, 2>, d1: Tensor<B, 2>, d2: Tensor<B, 2>) -> Self {
        Self { value, d1, d2 }
    }

    /// 座標列をジェットにします。`active` のとき、この座標自身が微分方向です。
    pub fn coordinate(value: Tensor<B, 2>, active: bool) -> Self {
        let d1 = if active {
            value.ones_like()
        } else {
            value.zeros_like()
        };
        let d2 = value.zeros_like();
        Self::new(value, d1, d2)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.value + rhs.value, self.d1 + rhs.d1, self.d2 + rhs.d2)
    }

    /// ライプニッツ則: `(fg)'' = f''g + 2f'g' + fg''`
    pub fn mul(self, rhs: Self) -> Self {
        let value = self.value.clone() * rhs.value.clone();
        let d1 = self.d1.clone() * rhs.value.clone() + self.value.clone() * rhs.d1.clone();
        let d2 = self.d2 * rhs.value
            + self.d1 * rhs.d1.mul_scalar(2.0)
            + self.value * rhs.d2;
        Self::new(value, d1, d2)
    }

    pub fn square(self) -> Self {
        self.clone().mul(self)
    }

    pub fn neg(self) -> Self {
        Self::new(self.value.neg(), self.d1.neg(), self.d2.neg())
    }

    pub fn add_scalar(self, rhs: f32) -> Self {
        Self::new(self.value.add_scalar(rhs), self.d1, self.d2)
    }

    pub fn mul_scalar(self, rhs: f32) -> Self {
        Self::new(
            self.value.mul_scalar(rhs),
            self.d1.mul_scalar(rhs),
            self.d2.mul_scalar(rhs),
        )
    }

    /// 1変数関数 `f` を合成します。`df`, `d2f` は `f(value)` における `f'`, `f''`。
    pub fn compose(self, value: Tensor<B, 2>, df: Tensor<B, 2>, d2f: Tensor<B, 2>) -> Self {
        let d1 = df.clone() * self.d1.clone();
        let d2 = d2f * self.d1.clone() * self.d1 + df * self.d2;
        Self::new(value, d1, d2)
    }

    pub fn exp(self) -> Self {
        let e = self.value.clone().exp();
        self.compose(e.clone(), e.clone(), e)
    }

    pub fn sin(self) -> Self {
        let s = self.value.clone().sin();
        let c = self.value.clone().cos();
        self.compose(s.clone(), c, s.neg())
    }

    #[cfg(test)]
    pub fn cos(self) -> Self {
        let s = self.value.clone().sin();
        let c = self.value.clone().cos();
        self.compose(c.clone(), s.neg(), c.neg())
    }
}
