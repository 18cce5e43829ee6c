use crate::error::{Error, Result};
use crate::model::{Activation, DiscriminatorConfig, GeneratorConfig};
use crate::problem::{ProblemConfig, ProblemKey};
use burn::config::Config;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 学習方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// 残差の二乗平均を最小化します。
    L2,
    /// 方程式が示す微分とネットワークの微分の二乗誤差を最小化します。
    Lagaris,
    /// 識別器との敵対的学習。
    Gan,
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "Method::L2")]
    pub method: Method,
    #[config(default = 1000)]
    pub epochs: usize,
    #[config(default = 0)]
    pub seed: u64,
    /// 生成器の学習率
    #[config(default = 1e-3)]
    pub g_lr: f64,
    /// 識別器の学習率
    #[config(default = 1e-3)]
    pub d_lr: f64,
    /// 1エポックあたりの生成器の更新回数（Lagaris / GAN）
    #[config(default = 1)]
    pub g_iters: usize,
    /// 1エポックあたりの識別器の更新回数（GAN）
    #[config(default = 1)]
    pub d_iters: usize,
    #[config(default = 0.9)]
    pub beta_1: f32,
    #[config(default = 0.999)]
    pub beta_2: f32,
    /// 識別器の損失に使うラベル平滑化
    pub label_smoothing: Option<f32>,
    /// ログを出力する間隔（エポック）。0なら出力しません。
    #[config(default = 100)]
    pub log_every: usize,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs は1以上である必要があります".into()));
        }
        if self.g_iters == 0 || self.d_iters == 0 {
            return Err(Error::InvalidConfig(format!(
                "g_iters と d_iters は1以上である必要があります (g_iters = {}, d_iters = {})",
                self.g_iters, self.d_iters
            )));
        }
        if !(self.g_lr > 0.0) || !(self.d_lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "学習率は正である必要があります (g_lr = {}, d_lr = {})",
                self.g_lr, self.d_lr
            )));
        }
        if let Some(smoothing) = self.label_smoothing {
            if !(0.0..=1.0).contains(&smoothing) {
                return Err(Error::InvalidConfig(format!(
                    "label_smoothing は [0, 1] の範囲で指定してください (label_smoothing = {smoothing})"
                )));
            }
        }
        Ok(())
    }
}

/// 1回の実験に必要なすべての設定。
#[derive(Config, Debug)]
pub struct ExperimentConfig {
    pub problem: ProblemConfig,
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
    pub training: TrainingConfig,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        self.generator.validate()?;
        if self.training.method == Method::Gan {
            self.discriminator.validate()?;
        }
        self.training.validate()
    }
}

/// 問題キーと学習方法に対応する既定の実験設定。
pub fn default_config(key: ProblemKey, method: Method) -> ExperimentConfig {
    let problem = ProblemConfig::default_for(key);
    let generator = match key {
        ProblemKey::Exp => GeneratorConfig::new(),
        ProblemKey::Sho | ProblemKey::Nlo | ProblemKey::Pos => GeneratorConfig::new()
            .with_n_hidden_units(40)
            .with_n_hidden_layers(3),
        ProblemKey::Chan => GeneratorConfig::new()
            .with_n_hidden_units(50)
            .with_n_hidden_layers(4)
            .with_activation(Activation::Swish),
    };
    let discriminator = DiscriminatorConfig::new();
    let training = match method {
        Method::L2 | Method::Lagaris => TrainingConfig::new(),
        Method::Gan => TrainingConfig::new()
            .with_epochs(500)
            .with_g_iters(10)
            .with_d_iters(1),
    }
    .with_method(method);
    ExperimentConfig::new(problem, generator, discriminator, training)
}

/// コマンドライン引数から実験設定を決めます。
///
/// `path` があればそのJSONを読み込み（問題キーが一致しなければエラー）、なければ
/// 既定の設定を使います。`gan` が真なら学習方法を GAN に切り替えます。
pub fn resolve_config(key: ProblemKey, gan: bool, path: Option<&Path>) -> Result<ExperimentConfig> {
    let mut config = match path {
        Some(path) => {
            let config = ExperimentConfig::load(path)
                .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
            if config.problem.key() != key {
                return Err(Error::InvalidConfig(format!(
                    "設定ファイルの問題 ({}) が指定された問題 ({}) と一致しません",
                    config.problem.key(),
                    key
                )));
            }
            config
        }
        None => default_config(key, if gan { Method::Gan } else { Method::L2 }),
    };
    if gan {
        config.training.method = Method::Gan;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_for_every_problem_and_method() {
        for key in [
            ProblemKey::Exp,
            ProblemKey::Sho,
            ProblemKey::Nlo,
            ProblemKey::Pos,
            ProblemKey::Chan,
        ] {
            for method in [Method::L2, Method::Lagaris, Method::Gan] {
                let config = default_config(key, method);
                config.validate().unwrap();
                assert_eq!(config.training.method, method);
                assert_eq!(config.problem.key(), key);
            }
        }
    }

    #[test]
    fn rejects_zero_iterations() {
        let mut config = default_config(ProblemKey::Exp, Method::Gan);
        config.training.d_iters = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn saves_and_loads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hypers.json");
        let config = default_config(ProblemKey::Pos, Method::Gan);
        config.save(&path).unwrap();
        let loaded = ExperimentConfig::load(&path).unwrap();
        assert_eq!(loaded.problem.key(), ProblemKey::Pos);
        assert_eq!(loaded.training.g_iters, 10);
        assert_eq!(loaded.generator.n_hidden_units, 40);
    }

    #[test]
    fn resolves_file_config_and_gan_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.json");
        let mut config = default_config(ProblemKey::Exp, Method::Lagaris);
        config.training.epochs = 7;
        config.save(&path).unwrap();

        let config = resolve_config(ProblemKey::Exp, false, Some(&path)).unwrap();
        assert_eq!(config.training.method, Method::Lagaris);
        assert_eq!(config.training.epochs, 7);
        let config = resolve_config(ProblemKey::Exp, true, Some(&path)).unwrap();
        assert_eq!(config.training.method, Method::Gan);

        let mismatch = resolve_config(ProblemKey::Chan, false, Some(&path));
        assert!(matches!(mismatch, Err(Error::InvalidConfig(_))));
    }
}
