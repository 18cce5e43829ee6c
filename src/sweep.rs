//! ハイパーパラメータの格子探索。
//!
//! 探索空間は `{"section.field": [値, ...]}` 形式のJSONで、すべての組み合わせ
//! （直積）について、シードを変えた複数回の実験をスレッドプール上で実行します。

use crate::cli::{DeviceKind, SweepArgs};
use crate::config::{ExperimentConfig, Method, resolve_config};
use crate::error::{Error, Result};
#[cfg(feature = "wgpu")]
use crate::experiment::WgpuTrainBackend;
use crate::experiment::{TrainBackend, run_experiment};
use crate::problem::ProblemKey;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 1つの組み合わせ。キーは `section.field` 形式のパス。
pub type Hypers = BTreeMap<String, Value>;

/// 探索空間。キーの辞書順に並び、最初のキーが直積の最も外側になります。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperSpace(BTreeMap<String, Vec<Value>>);

impl HyperSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, values: Vec<Value>) -> Self {
        self.0.insert(key.to_string(), values);
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// 学習方法ごとの既定の探索空間。
    pub fn default_for(method: Method) -> Self {
        let space = HyperSpace::new()
            .with("generator.n_hidden_units", vec![20.into(), 40.into()])
            .with("generator.n_hidden_layers", vec![2.into(), 3.into()]);
        match method {
            Method::Gan => space
                .with("training.g_lr", vec![1e-3.into(), 1e-2.into()])
                .with("training.d_lr", vec![1e-3.into(), 1e-2.into()]),
            Method::L2 | Method::Lagaris => {
                space.with("training.g_lr", vec![1e-3.into(), 1e-2.into()])
            }
        }
    }

    /// 組み合わせの総数（各キーの値の個数の積）。
    pub fn num_combinations(&self) -> usize {
        self.0.values().map(Vec::len).product()
    }

    /// すべての組み合わせを列挙します。
    pub fn combinations(&self) -> Vec<Hypers> {
        let entries: Vec<(&String, &Vec<Value>)> = self.0.iter().collect();
        cartesian_product(&entries)
    }
}

fn cartesian_product(entries: &[(&String, &Vec<Value>)]) -> Vec<Hypers> {
    let Some(((key, values), rest)) = entries.split_first() else {
        return vec![Hypers::new()];
    };
    let rest = cartesian_product(rest);
    values
        .iter()
        .flat_map(|value| {
            rest.iter().map(move |tail| {
                let mut hypers = tail.clone();
                hypers.insert((*key).clone(), value.clone());
                hypers
            })
        })
        .collect()
}

/// `base` のコピーに組み合わせを適用した設定を返します。
///
/// キーは設定をJSONにしたときのフィールドのパスで、既存のフィールドしか
/// 上書きできません。
pub fn apply_hypers(base: &ExperimentConfig, hypers: &Hypers) -> Result<ExperimentConfig> {
    let mut json = serde_json::to_value(base)?;
    for (key, value) in hypers {
        let mut node = &mut json;
        for part in key.split('.') {
            node = node
                .as_object_mut()
                .and_then(|object| object.get_mut(part))
                .ok_or_else(|| Error::UnknownHyperparameter(key.clone()))?;
        }
        *node = value.clone();
    }
    let config: ExperimentConfig = serde_json::from_value(json)
        .map_err(|e| Error::InvalidConfig(format!("{hypers:?}: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// 1つの組み合わせについての結果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRecord {
    pub index: usize,
    pub hypers: Hypers,
    pub seeds: Vec<u64>,
    /// シードごとの `final_mse`。失敗した反復は `None`。
    pub final_mse: Vec<Option<f32>>,
}

impl SweepRecord {
    pub fn failures(&self) -> usize {
        self.final_mse.iter().filter(|m| m.is_none()).count()
    }

    /// 成功した反復の平均。すべて失敗した場合は `None`。
    pub fn mean_final_mse(&self) -> Option<f32> {
        let ok: Vec<f32> = self.final_mse.iter().flatten().copied().collect();
        if ok.is_empty() {
            None
        } else {
            Some(ok.iter().sum::<f32>() / ok.len() as f32)
        }
    }
}

/// 探索を実行します。
///
/// 反復 `r` は、その組み合わせを適用した設定のシード `training.seed + r` を
/// 使います。探索空間に `training.seed` を含めれば、組み合わせごとに別の
/// シード列になります。各反復は自分専用の設定のコピーを持ち、失敗やパニックは
/// その反復だけにとどまります。結果は組み合わせの順に並びます。
pub fn run_sweep(
    base: &ExperimentConfig,
    space: &HyperSpace,
    replicates: usize,
    workers: usize,
    device: DeviceKind,
) -> Result<Vec<SweepRecord>> {
    let combinations = space.combinations();
    let configs = combinations
        .iter()
        .map(|hypers| apply_hypers(base, hypers))
        .collect::<Result<Vec<_>>>()?;

    let jobs: Vec<(usize, u64, ExperimentConfig)> = configs
        .iter()
        .enumerate()
        .flat_map(|(index, config)| {
            (0..replicates as u64).map(move |r| {
                let seed = config.training.seed + r;
                let mut config = config.clone();
                config.training.seed = seed;
                (index, seed, config)
            })
        })
        .collect();
    info!(
        "探索を開始します: 組み合わせ {} 個 x 反復 {} 回 (ワーカー数: {}, デバイス: {})",
        space.num_combinations(),
        replicates,
        workers,
        device
    );

    let start = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;
    let results: Vec<(usize, u64, Option<f32>)> = pool.install(|| {
        jobs.into_par_iter()
            .map(|(index, seed, config)| (index, seed, run_replicate(index, seed, &config, device)))
            .collect()
    });
    debug!("探索時間: {:.2?}", start.elapsed());

    let mut records: Vec<SweepRecord> = combinations
        .into_iter()
        .enumerate()
        .map(|(index, hypers)| SweepRecord {
            index,
            hypers,
            seeds: Vec::with_capacity(replicates),
            final_mse: Vec::with_capacity(replicates),
        })
        .collect();
    for (index, seed, final_mse) in results {
        records[index].seeds.push(seed);
        records[index].final_mse.push(final_mse);
    }
    Ok(records)
}

fn replicate_final_mse(config: &ExperimentConfig, device: DeviceKind) -> Result<f32> {
    let metrics = match device {
        DeviceKind::Cpu => run_experiment::<TrainBackend>(config, &Default::default())?.metrics,
        #[cfg(feature = "wgpu")]
        DeviceKind::Wgpu => run_experiment::<WgpuTrainBackend>(config, &Default::default())?.metrics,
        #[cfg(not(feature = "wgpu"))]
        DeviceKind::Wgpu => return Err(Error::DeviceUnavailable(device)),
    };
    Ok(metrics.final_mse)
}

fn run_replicate(index: usize, seed: u64, config: &ExperimentConfig, device: DeviceKind) -> Option<f32> {
    let result = catch_unwind(AssertUnwindSafe(|| replicate_final_mse(config, device)));
    match result {
        Ok(Ok(final_mse)) => {
            debug!(
                "組み合わせ {} (seed = {}): final_mse = {:.3e}",
                index, seed, final_mse
            );
            Some(final_mse)
        }
        Ok(Err(e)) => {
            warn!("組み合わせ {} (seed = {}) が失敗しました: {}", index, seed, e);
            None
        }
        Err(_) => {
            warn!("組み合わせ {} (seed = {}) の実行中にパニックが発生しました", index, seed);
            None
        }
    }
}

/// 結果をCSVとして書き出します。列は `index, hypers, seeds, final_mse, mean_final_mse, failures`。
pub fn write_csv<W: Write>(records: &[SweepRecord], mut out: W) -> Result<()> {
    writeln!(out, "index,hypers,seeds,final_mse,mean_final_mse,failures")?;
    for record in records {
        let mean = record
            .mean_final_mse()
            .map(|m| m.to_string())
            .unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{},{}",
            record.index,
            csv_field(&serde_json::to_string(&record.hypers)?),
            csv_field(&serde_json::to_string(&record.seeds)?),
            csv_field(&serde_json::to_string(&record.final_mse)?),
            mean,
            record.failures()
        )?;
    }
    Ok(())
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// 既存ファイルの上書きを確認します。
///
/// `force` が真、またはファイルが存在しなければそのまま続行します。それ以外は
/// `[y/N]` を尋ね、`y` / `yes` 以外の応答なら中断します。
pub fn confirm_overwrite<R: BufRead, W: Write>(
    path: &Path,
    force: bool,
    mut input: R,
    mut output: W,
) -> Result<()> {
    if force || !path.exists() {
        return Ok(());
    }
    write!(
        output,
        "'{}' は既に存在します。上書きしますか？ [y/N] ",
        path.display()
    )?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Ok(()),
        _ => Err(Error::OverwriteDeclined(path.to_path_buf())),
    }
}

/// 結果ファイルの既定名（例: `SHO_hypertune.csv`）。
pub fn default_fname(key: ProblemKey) -> String {
    format!("{}_hypertune.csv", key.as_str().to_uppercase())
}

/// `sweep`サブコマンドを実行します。
pub fn run(args: &SweepArgs) -> Result<()> {
    let fname = args
        .fname
        .clone()
        .unwrap_or_else(|| default_fname(args.problem).into());
    let stdin = io::stdin();
    confirm_overwrite(&fname, args.force, stdin.lock(), io::stdout())?;

    let base = resolve_config(args.problem, args.gan, args.config.as_deref())?;
    let space = match &args.space {
        Some(path) => HyperSpace::load(path)?,
        None => HyperSpace::default_for(base.training.method),
    };

    let records = run_sweep(&base, &space, args.replicates, args.workers, args.device)?;
    let file = fs::File::create(&fname)?;
    write_csv(&records, io::BufWriter::new(file))?;
    println!("=> 探索結果を '{}' に保存しました。", fname.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use serde_json::json;

    fn base() -> ExperimentConfig {
        default_config(ProblemKey::Sho, Method::Gan)
    }

    #[test]
    fn combinations_cover_cartesian_product() {
        let space = HyperSpace::new()
            .with("training.g_lr", vec![json!(1e-3), json!(1e-2)])
            .with("generator.n_hidden_units", vec![json!(10), json!(20), json!(30)]);
        let combinations = space.combinations();
        assert_eq!(space.num_combinations(), 6);
        assert_eq!(combinations.len(), 6);
        // 辞書順で最初のキー（generator.*）が外側
        assert_eq!(combinations[0]["generator.n_hidden_units"], json!(10));
        assert_eq!(combinations[1]["generator.n_hidden_units"], json!(10));
        assert_eq!(combinations[1]["training.g_lr"], json!(1e-2));
        assert_eq!(combinations[5]["generator.n_hidden_units"], json!(30));
    }

    #[test]
    fn empty_space_has_single_combination() {
        assert_eq!(HyperSpace::new().combinations(), vec![Hypers::new()]);
    }

    #[test]
    fn hypers_override_nested_fields() {
        let mut hypers = Hypers::new();
        hypers.insert("training.g_iters".into(), json!(3));
        hypers.insert("problem.n".into(), json!(50));
        hypers.insert("discriminator.unbounded".into(), json!(true));
        let config = apply_hypers(&base(), &hypers).unwrap();
        assert_eq!(config.training.g_iters, 3);
        assert!(config.discriminator.unbounded);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["problem"]["n"], json!(50));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut hypers = Hypers::new();
        hypers.insert("training.momentum".into(), json!(0.9));
        assert!(matches!(
            apply_hypers(&base(), &hypers),
            Err(Error::UnknownHyperparameter(key)) if key == "training.momentum"
        ));
    }

    #[test]
    fn csv_quotes_json_fields() {
        let mut hypers = Hypers::new();
        hypers.insert("training.g_lr".into(), json!(0.01));
        let records = vec![SweepRecord {
            index: 0,
            hypers,
            seeds: vec![0, 1],
            final_mse: vec![Some(0.5), None],
        }];
        let mut out = Vec::new();
        write_csv(&records, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "index,hypers,seeds,final_mse,mean_final_mse,failures");
        assert_eq!(
            lines[1],
            r#"0,"{""training.g_lr"":0.01}","[0,1]","[0.5,null]",0.5,1"#
        );
    }

    #[test]
    fn overwrite_prompt_accepts_only_yes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        confirm_overwrite(&path, false, &b""[..], Vec::new()).unwrap();

        fs::write(&path, "old").unwrap();
        confirm_overwrite(&path, false, &b"y\n"[..], Vec::new()).unwrap();
        confirm_overwrite(&path, true, &b""[..], Vec::new()).unwrap();
        for answer in ["n\n", "\n", "maybe\n"] {
            let result = confirm_overwrite(&path, false, answer.as_bytes(), Vec::new());
            assert!(matches!(result, Err(Error::OverwriteDeclined(_))));
        }
    }

    #[test]
    fn default_fname_uses_upper_case_key() {
        assert_eq!(default_fname(ProblemKey::Sho), "SHO_hypertune.csv");
    }
}
