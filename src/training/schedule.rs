// Learning-rate schedules
// Pure functions of the global step; warmup ramps from zero over a fraction
// of one epoch, then the configured shape decays toward zero at max_steps.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Constant,
    Linear,
    Cosine,
}

#[derive(Debug, Clone)]
pub struct LrSchedule {
    kind: SchedulerKind,
    base_lr: f64,
    warmup_steps: u64,
    max_steps: u64,
}

impl LrSchedule {
    pub fn new(kind: SchedulerKind, base_lr: f64, warmup_steps: u64, max_steps: u64) -> Self {
        Self {
            kind,
            base_lr,
            warmup_steps,
            max_steps,
        }
    }

    /// Learning rate for the optimization step with counter `step`
    pub fn lr_at(&self, step: u64) -> f64 {
        if self.warmup_steps > 0 && step < self.warmup_steps {
            // Linear warmup; step 0 already gets a non-zero rate
            return self.base_lr * (step + 1) as f64 / self.warmup_steps as f64;
        }

        match self.kind {
            SchedulerKind::Constant => self.base_lr,
            SchedulerKind::Linear => self.base_lr * (1.0 - self.progress(step)),
            SchedulerKind::Cosine => {
                self.base_lr * 0.5 * (1.0 + (std::f64::consts::PI * self.progress(step)).cos())
            }
        }
    }

    /// Fraction of the post-warmup span already covered, clamped to [0, 1]
    fn progress(&self, step: u64) -> f64 {
        let span = self.max_steps.saturating_sub(self.warmup_steps);
        if span == 0 {
            return 1.0;
        }
        let done = step.saturating_sub(self.warmup_steps);
        (done as f64 / span as f64).min(1.0)
    }
}
