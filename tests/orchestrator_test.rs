// Integration tests: orchestrator loop, resumption, and persistence layout
// Drives the state machine with stub collaborators and checks the on-disk
// contract against an uninterrupted reference run.

use anyhow::Result;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use kiln::config::{
    DatasetConfig, ModelConfig, OptimizerConfig, RunConfig, SamplingConfig, SchedulerConfig,
    AdapterConfig,
};
use kiln::dist::ProcessIdentity;
use kiln::metrics::MetricsLogger;
use kiln::persistence::ModelPersistence;
use kiln::providers::{Batch, DatasetProvider, ModelProvider, StepOutcome};
use kiln::sampling::{GenerationEngine, SampleRecord};
use kiln::training::{Orchestrator, SchedulerKind, TrainerState};

// ---- Stub collaborators ------------------------------------------------

#[derive(Default)]
struct StubModel {
    steps: u64,
    lrs: Vec<f64>,
    consolidated: RefCell<Vec<PathBuf>>,
    adapter_saves: RefCell<Vec<PathBuf>>,
    adapter_restores: Vec<PathBuf>,
}

impl ModelProvider for StubModel {
    fn step(&mut self, _batch: &Batch, lr: f64) -> Result<StepOutcome> {
        self.steps += 1;
        self.lrs.push(lr);
        Ok(StepOutcome {
            loss: 1.0 / self.steps as f64,
        })
    }
}

impl ModelPersistence for StubModel {
    fn save_consolidated(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.consolidated.borrow_mut().push(dir.to_path_buf());
        Ok(())
    }

    fn save_adapter(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.adapter_saves.borrow_mut().push(dir.to_path_buf());
        Ok(())
    }

    fn restore_adapter(&mut self, dir: &Path) -> Result<()> {
        self.adapter_restores.push(dir.to_path_buf());
        Ok(())
    }
}

struct StubDataset {
    len: usize,
    resets: usize,
}

impl StubDataset {
    fn new(len: usize) -> Self {
        Self { len, resets: 0 }
    }
}

impl DatasetProvider for StubDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn reset(&mut self) {
        self.resets += 1;
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(
            std::iter::repeat(Batch {
                input_ids: vec![vec![1, 2, 3]],
            })
            .take(self.len),
        )
    }
}

#[derive(Default)]
struct StubEngine {
    refreshed_at: Vec<u64>,
    fail_refresh: bool,
}

impl GenerationEngine for StubEngine {
    fn refresh_weights(&mut self, state: &TrainerState) -> Result<()> {
        if self.fail_refresh {
            anyhow::bail!("weight refresh failed");
        }
        self.refreshed_at.push(state.global_step());
        Ok(())
    }

    fn generate(&mut self, prompt: &str) -> Result<String> {
        Ok(format!("{} [generated]", prompt))
    }
}

// ---- Config helpers ----------------------------------------------------

fn run_config(output_dir: &Path, epochs: u32) -> RunConfig {
    RunConfig {
        epochs,
        batch_size: 1,
        seed: 0,
        output_dir: output_dir.to_path_buf(),
        enable_metrics_logging: false,
        optimizer: OptimizerConfig::default(),
        scheduler: SchedulerConfig {
            kind: SchedulerKind::Constant,
            warmup_ratio: 0.0,
        },
        model: ModelConfig {
            backend: "local".to_string(),
            hidden_dim: 8,
        },
        dataset: DatasetConfig {
            path: PathBuf::from("unused.jsonl"),
            tokenizer: PathBuf::from("unused.json"),
            max_seq_len: 8,
            shuffle: false,
        },
        adapter: None,
        sampling: None,
    }
}

fn with_sampling(mut config: RunConfig, frequency: u64) -> RunConfig {
    let output_path = config.output_dir.join("samples.jsonl");
    config.sampling = Some(SamplingConfig {
        sample_frequency: frequency,
        prompts: vec!["hello".to_string()],
        output_path,
    });
    config
}

fn with_adapter(mut config: RunConfig) -> RunConfig {
    config.adapter = Some(AdapterConfig {
        rank: 4,
        alpha: 8.0,
        dropout: 0.0,
        target_modules: vec!["ff".to_string()],
    });
    config
}

fn checkpoint_layout(output_dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    if output_dir.join("final-model").is_dir() {
        names.push("final-model".to_string());
    }
    if let Ok(entries) = std::fs::read_dir(output_dir.join("checkpoints")) {
        for entry in entries.flatten() {
            names.push(format!("checkpoints/{}", entry.file_name().to_string_lossy()));
        }
    }
    names.sort();
    names
}

fn read_samples(path: &Path) -> Vec<SampleRecord> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// ---- Tests -------------------------------------------------------------

#[test]
fn test_two_epoch_scenario_counts_cadence_and_layout() {
    // 2 epochs, 10 batches/epoch, sample_frequency=5, no adapter, rank 0 of
    // world size 1: samples fire at batch indices 0 and 5 of each epoch.
    let temp = TempDir::new().unwrap();
    let config = with_sampling(run_config(temp.path(), 2), 5);
    let identity = ProcessIdentity::single_process();

    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(10);
    let mut engine = StubEngine::default();

    let summary = Orchestrator::new(&config, &identity)
        .run(&mut model, &mut dataset, Some(&mut engine), None)
        .unwrap();

    // Step counter: e * steps_per_epoch exactly, no drift
    assert_eq!(summary.start_epoch, 0);
    assert_eq!(summary.state.global_step(), 20);
    assert_eq!(model.steps, 20);

    // The step advances before the cadence check, so the epoch-initial
    // sample carries step 1, not 0
    assert_eq!(engine.refreshed_at, vec![1, 6, 11, 16]);

    let samples = read_samples(&config.sampling.as_ref().unwrap().output_path);
    assert_eq!(samples.len(), 4);
    let steps: Vec<u64> = samples.iter().map(|record| record.tr_step).collect();
    assert_eq!(steps, vec![1, 6, 11, 16]);

    // Persistence: per-epoch checkpoint for epoch 0, final-model for epoch 1
    assert_eq!(
        *model.consolidated.borrow(),
        vec![
            temp.path().join("checkpoints/epoch_0/end-epoch-model"),
            temp.path().join("final-model"),
        ]
    );
    assert!(model.adapter_saves.borrow().is_empty());

    // The dataset was reset once per completed epoch
    assert_eq!(dataset.resets, 2);
}

#[test]
fn test_resume_skips_completed_epochs_and_matches_fresh_layout() {
    let epochs = 3;
    let len = 4;

    // Reference: uninterrupted run from epoch 0
    let fresh = TempDir::new().unwrap();
    let config = run_config(fresh.path(), epochs);
    let identity = ProcessIdentity::single_process();
    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(len);
    Orchestrator::new(&config, &identity)
        .run(&mut model, &mut dataset, None, None)
        .unwrap();

    // Interrupted: checkpoints for epochs 0 and 1 already on disk, as a run
    // killed during epoch 2 would have left them
    let resumed = TempDir::new().unwrap();
    for epoch in 0..2 {
        std::fs::create_dir_all(
            resumed
                .path()
                .join(format!("checkpoints/epoch_{}/end-epoch-model", epoch)),
        )
        .unwrap();
    }

    let config = run_config(resumed.path(), epochs);
    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(len);
    let summary = Orchestrator::new(&config, &identity)
        .run(&mut model, &mut dataset, None, None)
        .unwrap();

    // The checkpoint epoch value is the next epoch to run
    assert_eq!(summary.start_epoch, 1);
    assert_eq!(model.steps, 2 * len as u64); // epochs 1 and 2 only
    assert_eq!(summary.state.global_step(), epochs as u64 * len as u64);

    // Epoch 0's checkpoint is never re-written on the resumed run
    assert_eq!(
        *model.consolidated.borrow(),
        vec![
            resumed.path().join("checkpoints/epoch_1/end-epoch-model"),
            resumed.path().join("final-model"),
        ]
    );

    // Directory structure identical to the uninterrupted run
    assert_eq!(
        checkpoint_layout(fresh.path()),
        checkpoint_layout(resumed.path())
    );
}

#[test]
fn test_adapter_runs_save_adapter_only_to_the_same_final_dir() {
    let temp = TempDir::new().unwrap();
    let config = with_adapter(run_config(temp.path(), 2));
    let identity = ProcessIdentity::single_process();

    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(2);
    Orchestrator::new(&config, &identity)
        .run(&mut model, &mut dataset, None, None)
        .unwrap();

    // Same directories a full-model run would use, different mechanism
    assert_eq!(
        *model.adapter_saves.borrow(),
        vec![
            temp.path().join("checkpoints/epoch_0/end-epoch-model"),
            temp.path().join("final-model"),
        ]
    );
    assert!(model.consolidated.borrow().is_empty());
    assert!(model.adapter_restores.is_empty());
}

#[test]
fn test_adapter_restores_from_discovered_checkpoint() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("checkpoints/epoch_1/end-epoch-model")).unwrap();

    let config = with_adapter(run_config(temp.path(), 3));
    let identity = ProcessIdentity::single_process();

    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(2);
    let summary = Orchestrator::new(&config, &identity)
        .run(&mut model, &mut dataset, None, None)
        .unwrap();

    assert_eq!(summary.start_epoch, 1);
    assert_eq!(
        model.adapter_restores,
        vec![temp.path().join("checkpoints/epoch_1/end-epoch-model")]
    );
}

#[test]
fn test_fresh_adapter_run_initializes_without_restore() {
    let temp = TempDir::new().unwrap();
    let config = with_adapter(run_config(temp.path(), 1));
    let identity = ProcessIdentity::single_process();

    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(2);
    Orchestrator::new(&config, &identity)
        .run(&mut model, &mut dataset, None, None)
        .unwrap();

    assert!(model.adapter_restores.is_empty());
}

#[test]
fn test_nonzero_rank_never_samples_but_always_joins_collectives() {
    let temp = TempDir::new().unwrap();
    let config = with_sampling(run_config(temp.path(), 2), 1);
    let identity = ProcessIdentity {
        rank: 1,
        local_rank: 1,
        world_size: 2,
        distributed: true,
    };

    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(10);
    // Non-zero ranks are built without a generation engine at all
    let summary = Orchestrator::new(&config, &identity)
        .run(&mut model, &mut dataset, None, None)
        .unwrap();

    // ceil(10 / 2) = 5 steps per epoch on every rank
    assert_eq!(summary.state.steps_per_epoch(), 5);
    assert_eq!(model.steps, 10);
    assert!(!config.sampling.as_ref().unwrap().output_path.exists());

    // The consolidated save is collective: rank 1 calls it too
    assert_eq!(model.consolidated.borrow().len(), 2);
}

#[test]
fn test_refresh_failure_is_surfaced_and_aborts() {
    let temp = TempDir::new().unwrap();
    let config = with_sampling(run_config(temp.path(), 1), 1);
    let identity = ProcessIdentity::single_process();

    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(4);
    let mut engine = StubEngine {
        fail_refresh: true,
        ..Default::default()
    };

    let result = Orchestrator::new(&config, &identity).run(
        &mut model,
        &mut dataset,
        Some(&mut engine),
        None,
    );

    assert!(result.is_err());
    // The failed check happened right after the first step; nothing else ran
    assert_eq!(model.steps, 1);
    assert!(model.consolidated.borrow().is_empty());
}

#[test]
fn test_constant_schedule_without_warmup_holds_the_configured_lr() {
    let temp = TempDir::new().unwrap();
    let config = run_config(temp.path(), 2);
    let identity = ProcessIdentity::single_process();

    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(5);
    Orchestrator::new(&config, &identity)
        .run(&mut model, &mut dataset, None, None)
        .unwrap();

    assert_eq!(model.lrs.len(), 10);
    assert!(model
        .lrs
        .iter()
        .all(|&lr| (lr - config.optimizer.lr).abs() < 1e-15));
}

#[test]
fn test_step_metrics_are_logged_once_per_step() {
    let temp = TempDir::new().unwrap();
    let config = run_config(temp.path(), 2);
    let identity = ProcessIdentity::single_process();

    let mut model = StubModel::default();
    let mut dataset = StubDataset::new(3);
    let mut metrics = MetricsLogger::new(temp.path()).unwrap();

    Orchestrator::new(&config, &identity)
        .run(&mut model, &mut dataset, None, Some(&mut metrics))
        .unwrap();
    drop(metrics);

    let contents = std::fs::read_to_string(temp.path().join("metrics/steps.jsonl")).unwrap();
    assert_eq!(contents.lines().count(), 6);
}
