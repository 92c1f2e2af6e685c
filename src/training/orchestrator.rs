// Training orchestrator
// Owns the epoch/step loop. Collective call sites (the optimization step,
// the consolidated save) run on every rank; single-writer side effects
// (progress, metrics, sampling, adapter saves) are guarded on rank 0 at the
// transition that performs them.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::RunConfig;
use crate::dist::ProcessIdentity;
use crate::metrics::{MetricsLogger, StepMetric};
use crate::persistence::{end_epoch_model_dir, plan_save, SaveMechanism};
use crate::providers::{DatasetProvider, ModelProvider};
use crate::sampling::{write_samples, GenerationEngine, SamplingCadence};

use super::checkpoint;
use super::schedule::LrSchedule;
use super::state::TrainerState;

/// Where the run currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initializing,
    Resuming,
    EpochRunning,
    EpochFinalizing,
    Complete,
}

/// What a completed run looked like
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// First epoch the loop actually ran (0 for a fresh run)
    pub start_epoch: u32,
    pub state: TrainerState,
}

pub struct Orchestrator<'run> {
    config: &'run RunConfig,
    identity: &'run ProcessIdentity,
    phase: RunPhase,
}

impl<'run> Orchestrator<'run> {
    pub fn new(config: &'run RunConfig, identity: &'run ProcessIdentity) -> Self {
        Self {
            config,
            identity,
            phase: RunPhase::Initializing,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, next: RunPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "Run phase transition");
        self.phase = next;
    }

    /// Drive the run to completion
    ///
    /// The state counters advance only inside this method; no collaborator
    /// mutates them.
    pub fn run(
        &mut self,
        model: &mut dyn ModelProvider,
        dataset: &mut dyn DatasetProvider,
        mut engine: Option<&mut dyn GenerationEngine>,
        mut metrics: Option<&mut MetricsLogger>,
    ) -> Result<RunSummary> {
        let output_dir = &self.config.output_dir;

        let mut state = TrainerState::new(
            dataset.len(),
            self.identity.world_size,
            self.config.epochs,
        );
        let warmup_steps =
            (state.steps_per_epoch() as f64 * self.config.scheduler.warmup_ratio).ceil() as u64;
        let schedule = LrSchedule::new(
            self.config.scheduler.kind,
            self.config.optimizer.lr,
            warmup_steps,
            state.max_steps(),
        );
        let cadence = self
            .config
            .sampling
            .as_ref()
            .map(|sampling| SamplingCadence::new(sampling.sample_frequency));

        // Checkpoint check. Always runs here, exactly once, before the epoch
        // loop: the outcome also decides whether adapter weights come from
        // disk rather than their fresh initialization.
        self.transition(RunPhase::Resuming);
        let resumed = checkpoint::find_latest(output_dir);
        let start_epoch = resumed.unwrap_or(0);
        if let Some(epoch) = resumed {
            state.resume_at(epoch);
            tracing::info!(epoch, "Resuming from latest checkpoint");
        }
        if self.config.adapter.is_some() {
            if let Some(epoch) = resumed {
                let adapter_dir = end_epoch_model_dir(output_dir, epoch);
                model
                    .restore_adapter(&adapter_dir)
                    .context("Failed to restore adapter from the discovered checkpoint")?;
            }
        }

        for epoch in start_epoch..self.config.epochs {
            self.transition(RunPhase::EpochRunning);
            state.begin_epoch(epoch);
            let progress = self.epoch_progress(epoch, state.steps_per_epoch());

            {
                // The dataset hands out a fresh iterator each epoch;
                // dataloaders are never assumed restartable mid-stream.
                let mut batches = dataset.batches();
                for index in 0..state.steps_per_epoch() {
                    let batch = batches.next().with_context(|| {
                        format!("Dataset exhausted at batch {} of epoch {}", index, epoch)
                    })?;

                    // Every rank steps every iteration; gradient sync inside
                    // the provider would hang on a missing participant.
                    let lr = schedule.lr_at(state.global_step());
                    let outcome = model.step(&batch, lr)?;
                    state.advance_step();
                    progress.inc(1);

                    if let Some(logger) = metrics.as_deref_mut() {
                        logger.log_step(&StepMetric::new(
                            epoch,
                            state.global_step(),
                            outcome.loss,
                            lr,
                        ))?;
                    }

                    if let (Some(cadence), Some(sampling)) = (&cadence, &self.config.sampling) {
                        if cadence.should_fire(self.identity.rank, index) {
                            let engine = engine.as_deref_mut().context(
                                "sampling is configured but no generation engine was provided",
                            )?;
                            engine
                                .refresh_weights(&state)
                                .context("Failed to refresh generation engine weights")?;
                            write_samples(
                                engine,
                                &sampling.prompts,
                                &sampling.output_path,
                                state.global_step(),
                            )?;
                            tracing::debug!(
                                epoch,
                                batch = index,
                                step = state.global_step(),
                                "Ran generation check"
                            );
                        }
                    }
                }
            }
            progress.finish_and_clear();

            self.transition(RunPhase::EpochFinalizing);
            let target = plan_save(
                output_dir,
                epoch,
                self.config.epochs,
                self.config.adapter.is_some(),
            );
            match target.mechanism {
                SaveMechanism::Consolidated => {
                    // Collective gather: every rank participates even though
                    // only rank 0 writes.
                    model.save_consolidated(&target.dir)?;
                }
                SaveMechanism::AdapterOnly => {
                    if self.identity.is_main() {
                        model.save_adapter(&target.dir)?;
                    }
                }
            }
            tracing::info!(
                epoch,
                dir = %target.dir.display(),
                step = state.global_step(),
                "Finished epoch"
            );

            dataset.reset();
        }

        self.transition(RunPhase::Complete);
        Ok(RunSummary { start_epoch, state })
    }

    /// Progress indicator for one epoch; suppressed on non-zero ranks so
    /// multi-rank output does not interleave
    fn epoch_progress(&self, epoch: u32, steps: u64) -> ProgressBar {
        if self.identity.is_main() {
            let bar = ProgressBar::new(steps);
            bar.set_style(
                ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
                    .expect("static progress template"),
            );
            bar.set_message(format!("epoch {}", epoch));
            bar
        } else {
            ProgressBar::hidden()
        }
    }
}
