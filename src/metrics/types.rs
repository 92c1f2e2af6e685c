// Metrics data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One optimization step's metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetric {
    pub timestamp: DateTime<Utc>,
    pub epoch: u32,
    pub step: u64,
    pub loss: f64,
    pub lr: f64,
}

impl StepMetric {
    pub fn new(epoch: u32, step: u64, loss: f64, lr: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            epoch,
            step,
            loss,
            lr,
        }
    }
}
