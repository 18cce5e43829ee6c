use denn::Error;
use denn::cli::DeviceKind;
use denn::config::{Method, default_config};
use denn::problem::ProblemKey;
use denn::sweep::{HyperSpace, run_sweep, write_csv};
use serde_json::json;

fn tiny_config() -> denn::config::ExperimentConfig {
    let mut config = default_config(ProblemKey::Exp, Method::L2);
    config.training.epochs = 2;
    config.training.log_every = 0;
    config.training.seed = 10;
    config
}

#[test]
fn sweep_yields_one_row_per_combination() {
    let space = HyperSpace::new()
        .with("training.g_lr", vec![json!(1e-3), json!(1e-2)])
        .with("generator.n_hidden_units", vec![json!(4), json!(8), json!(16)]);
    let records = run_sweep(&tiny_config(), &space, 2, 2, DeviceKind::Cpu).unwrap();

    assert_eq!(records.len(), 6);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.index, i);
        assert_eq!(record.seeds, vec![10, 11]);
        assert_eq!(record.final_mse.len(), 2);
        assert_eq!(record.failures(), 0);
        assert!(record.hypers.contains_key("training.g_lr"));
        assert!(record.hypers.contains_key("generator.n_hidden_units"));
    }
    assert_eq!(records[0].hypers["generator.n_hidden_units"], json!(4));
    assert_eq!(records[5].hypers["generator.n_hidden_units"], json!(16));
    assert_eq!(records[5].hypers["training.g_lr"], json!(1e-2));

    let mut out = Vec::new();
    write_csv(&records, &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap().lines().count(), 7);
}

#[test]
fn replicates_are_reproducible_across_worker_counts() {
    let space = HyperSpace::new().with("training.g_lr", vec![json!(1e-2)]);
    let serial = run_sweep(&tiny_config(), &space, 3, 1, DeviceKind::Cpu).unwrap();
    let parallel = run_sweep(&tiny_config(), &space, 3, 3, DeviceKind::Cpu).unwrap();
    assert_eq!(serial[0].final_mse, parallel[0].final_mse);
}

#[test]
fn invalid_combinations_fail_before_training() {
    let space = HyperSpace::new().with("training.learning_rate", vec![json!(0.1)]);
    let result = run_sweep(&tiny_config(), &space, 1, 1, DeviceKind::Cpu);
    assert!(matches!(result, Err(Error::UnknownHyperparameter(_))));

    let space = HyperSpace::new().with("training.g_iters", vec![json!(0)]);
    let result = run_sweep(&tiny_config(), &space, 1, 1, DeviceKind::Cpu);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn seed_in_space_offsets_replicate_seeds() {
    let space = HyperSpace::new().with("training.seed", vec![json!(0), json!(100)]);
    let records = run_sweep(&tiny_config(), &space, 2, 2, DeviceKind::Cpu).unwrap();
    assert_eq!(records[0].seeds, vec![0, 1]);
    assert_eq!(records[1].seeds, vec![100, 101]);
    assert_ne!(records[0].final_mse, records[1].final_mse);
}
