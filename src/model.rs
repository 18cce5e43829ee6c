use crate::error::{Error, Result};
use crate::jet::Jet;
use burn::config::Config;
use burn::module::{Ignored, Module, Param};
use burn::nn::Linear;
use burn::prelude::Backend;
use burn::tensor::Tensor;
use burn::tensor::activation::{leaky_relu, sigmoid};
use rand::Rng;
use serde::{Deserialize, Serialize};

const LEAKY_SLOPE: f64 = 0.01;

/// 隠れ層・出力層で使う活性化関数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Tanh,
    Sigmoid,
    Sin,
    /// `x * sigmoid(x)`
    Swish,
    LeakyRelu,
}

impl Activation {
    pub fn forward<B: Backend>(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            Activation::Tanh => z.tanh(),
            Activation::Sigmoid => sigmoid(z),
            Activation::Sin => z.sin(),
            Activation::Swish => z.clone() * sigmoid(z),
            Activation::LeakyRelu => leaky_relu(z, LEAKY_SLOPE),
        }
    }

    /// `z` における `(f, f', f'')` を返します。
    pub fn with_derivatives<B: Backend>(
        &self,
        z: Tensor<B, 2>,
    ) -> (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 2>) {
        match self {
            Activation::Tanh => {
                let a = z.tanh();
                let da = (a.clone() * a.clone()).neg().add_scalar(1.0);
                let d2a = (a.clone() * da.clone()).mul_scalar(-2.0);
                (a, da, d2a)
            }
            Activation::Sigmoid => {
                let s = sigmoid(z);
                let ds = s.clone() * s.clone().neg().add_scalar(1.0);
                let d2s = ds.clone() * s.clone().mul_scalar(-2.0).add_scalar(1.0);
                (s, ds, d2s)
            }
            Activation::Sin => {
                let s = z.clone().sin();
                (s.clone(), z.cos(), s.neg())
            }
            Activation::Swish => {
                let s = sigmoid(z.clone());
                let ds = s.clone() * s.clone().neg().add_scalar(1.0);
                let value = z.clone() * s.clone();
                let d1 = s.clone() + z.clone() * ds.clone();
                // σ'(2 + z(1 - 2σ))
                let d2 = ds * (z * s.mul_scalar(-2.0).add_scalar(1.0)).add_scalar(2.0);
                (value, d1, d2)
            }
            Activation::LeakyRelu => {
                let non_positive = z.clone().lower_equal_elem(0.0);
                let d1 = z.ones_like().mask_fill(non_positive, LEAKY_SLOPE);
                let d2 = z.zeros_like();
                (leaky_relu(z, LEAKY_SLOPE), d1, d2)
            }
        }
    }
}

/// 全結合の多層パーセプトロン。生成器（解の近似関数）と識別器の両方に使います。
///
/// 入力 → 隠れ層 × `n_hidden_layers` → 出力 の構成で、隠れ層の後には
/// `activation`、出力層の後には `output` の活性化（なければ恒等写像）を適用します。
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    linears: Vec<Linear<B>>,
    activation: Ignored<Activation>,
    output: Ignored<Option<Activation>>,
}

impl<B: Backend> Mlp<B> {
    /// 乱数生成器から重みを初期化します。
    ///
    /// 重み・バイアスとも `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` から引きます。
    /// バックエンドの大域的な乱数状態に依存しないため、同じシードからは
    /// スレッドをまたいでも同じネットワークが得られます。
    pub fn new<R: Rng + ?Sized>(
        widths: &[usize],
        activation: Activation,
        output: Option<Activation>,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let linears = widths
            .windows(2)
            .map(|pair| seeded_linear(pair[0], pair[1], &mut *rng, device))
            .collect();
        Self {
            linears,
            activation: Ignored(activation),
            output: Ignored(output),
        }
    }

    /// 順伝播（値のみ）。
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.linears.len() - 1;
        let mut x = input;
        for (i, linear) in self.linears.iter().enumerate() {
            x = linear.forward(x);
            let activation = if i < last { Some(*self.activation) } else { *self.output };
            if let Some(activation) = activation {
                x = activation.forward(x);
            }
        }
        x
    }

    /// 入力の各軸方向について、出力の値と1階・2階微分をまとめて順伝播します。
    ///
    /// 返り値の `i` 番目は第 `i` 入力座標に沿ったジェットで、値は全要素で共通です。
    pub fn forward_jets(&self, input: Tensor<B, 2>) -> Vec<Jet<B>> {
        let [n, dim] = input.dims();
        let device = input.device();
        let mut jets: Vec<Jet<B>> = (0..dim)
            .map(|axis| {
                let mut direction = vec![0.0f32; n * dim];
                for row in 0..n {
                    direction[row * dim + axis] = 1.0;
                }
                let d1 = Tensor::<B, 1>::from_floats(direction.as_slice(), &device).reshape([n, dim]);
                let d2 = d1.zeros_like();
                Jet::new(input.clone(), d1, d2)
            })
            .collect();

        let last = self.linears.len() - 1;
        for (i, linear) in self.linears.iter().enumerate() {
            let weight = linear.weight.val();
            let value = linear.forward(jets[0].value.clone());
            jets = jets
                .into_iter()
                .map(|jet| {
                    Jet::new(
                        value.clone(),
                        jet.d1.matmul(weight.clone()),
                        jet.d2.matmul(weight.clone()),
                    )
                })
                .collect();

            let activation = if i < last { Some(*self.activation) } else { *self.output };
            if let Some(activation) = activation {
                let (a, da, d2a) = activation.with_derivatives(value);
                jets = jets
                    .into_iter()
                    .map(|jet| jet.compose(a.clone(), da.clone(), d2a.clone()))
                    .collect();
            }
        }
        jets
    }
}

fn seeded_linear<B: Backend, R: Rng + ?Sized>(
    d_input: usize,
    d_output: usize,
    rng: &mut R,
    device: &B::Device,
) -> Linear<B> {
    let bound = 1.0 / (d_input as f32).sqrt();
    let weight: Vec<f32> = (0..d_input * d_output)
        .map(|_| rng.random_range(-bound..=bound))
        .collect();
    let bias: Vec<f32> = (0..d_output)
        .map(|_| rng.random_range(-bound..=bound))
        .collect();
    let weight = Tensor::<B, 1>::from_floats(weight.as_slice(), device).reshape([d_input, d_output]);
    let bias = Tensor::<B, 1>::from_floats(bias.as_slice(), device);
    Linear {
        weight: Param::from_tensor(weight),
        bias: Some(Param::from_tensor(bias)),
    }
}

/// 解を近似する生成器ネットワークの設定。
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 20)]
    pub n_hidden_units: usize,
    #[config(default = 2)]
    pub n_hidden_layers: usize,
    #[config(default = "Activation::Tanh")]
    pub activation: Activation,
    /// 有界な出力が必要なときの出力活性化（例: `tanh`）。
    pub output_activation: Option<Activation>,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        validate_shape("generator", self.n_hidden_units, self.n_hidden_layers)
    }

    /// 入力次元 `in_dim`、出力次元1の生成器を初期化します。
    pub fn init<B: Backend, R: Rng + ?Sized>(
        &self,
        in_dim: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Mlp<B>> {
        self.validate()?;
        let widths = layer_widths(in_dim, 1, self.n_hidden_units, self.n_hidden_layers);
        Ok(Mlp::new(
            &widths,
            self.activation,
            self.output_activation,
            rng,
            device,
        ))
    }
}

/// GAN学習で使う識別器ネットワークの設定。
#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 1)]
    pub vec_dim: usize,
    #[config(default = 10)]
    pub n_hidden_units: usize,
    #[config(default = 2)]
    pub n_hidden_layers: usize,
    #[config(default = "Activation::Tanh")]
    pub activation: Activation,
    /// `true` のとき出力に sigmoid をかけず、損失はロジットとして計算します。
    #[config(default = false)]
    pub unbounded: bool,
}

impl DiscriminatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vec_dim != 1 {
            return Err(Error::InvalidConfig(format!(
                "識別器の vec_dim は1のみ対応しています (vec_dim = {})",
                self.vec_dim
            )));
        }
        validate_shape("discriminator", self.n_hidden_units, self.n_hidden_layers)
    }

    pub fn init<B: Backend, R: Rng + ?Sized>(&self, rng: &mut R, device: &B::Device) -> Result<Mlp<B>> {
        self.validate()?;
        let widths = layer_widths(
            self.vec_dim,
            self.vec_dim,
            self.n_hidden_units,
            self.n_hidden_layers,
        );
        let output = if self.unbounded {
            None
        } else {
            Some(Activation::Sigmoid)
        };
        Ok(Mlp::new(&widths, self.activation, output, rng, device))
    }
}

fn validate_shape(name: &str, units: usize, layers: usize) -> Result<()> {
    if units == 0 || layers == 0 {
        return Err(Error::InvalidConfig(format!(
            "{name} の隠れ層のユニット数と層数は1以上である必要があります (units = {units}, layers = {layers})"
        )));
    }
    Ok(())
}

fn layer_widths(in_dim: usize, out_dim: usize, units: usize, layers: usize) -> Vec<usize> {
    let mut widths = vec![in_dim];
    widths.extend(std::iter::repeat_n(units, layers));
    widths.push(out_dim);
    widths
}
