// Process identity
// Resolves this process's place in the process group exactly once at startup.
// Everything downstream receives the resolved value by reference; the
// environment is never consulted again after construction.

use candle_core::Device;
use thiserror::Error;

use crate::errors::{topology_var_invalid_error, topology_var_missing_error};

const RANK: &str = "RANK";
const LOCAL_RANK: &str = "LOCAL_RANK";
const WORLD_SIZE: &str = "WORLD_SIZE";

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("{}", topology_var_missing_error(.0))]
    Missing(&'static str),

    #[error("{}", topology_var_invalid_error(var, value))]
    Invalid { var: &'static str, value: String },

    #[error("RANK {rank} must be less than WORLD_SIZE {world_size}")]
    RankOutOfRange { rank: usize, world_size: usize },
}

/// This process's identity within the process group
///
/// `distributed` is true whenever the process was launched under a
/// process-group launcher (the topology variables were exported), even for a
/// world of one; it gates device binding and collective construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub rank: usize,
    pub local_rank: usize,
    pub world_size: usize,
    pub distributed: bool,
}

impl ProcessIdentity {
    /// Identity of a plain single-process run (no launcher)
    pub fn single_process() -> Self {
        Self {
            rank: 0,
            local_rank: 0,
            world_size: 1,
            distributed: false,
        }
    }

    /// Resolve the identity from the process environment
    ///
    /// All three of RANK, LOCAL_RANK, and WORLD_SIZE must be present and
    /// integer-valued, or none of them (single-process run). A partial or
    /// malformed topology is fatal: continuing would train under an
    /// ill-defined process topology.
    pub fn from_env() -> Result<Self, TopologyError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, TopologyError> {
        let raw: Vec<Option<String>> = [RANK, LOCAL_RANK, WORLD_SIZE]
            .iter()
            .map(|key| get(key))
            .collect();

        if raw.iter().all(Option::is_none) {
            return Ok(Self::single_process());
        }

        let parse = |var: &'static str, value: Option<&String>| -> Result<usize, TopologyError> {
            let value = value.ok_or(TopologyError::Missing(var))?;
            value.trim().parse().map_err(|_| TopologyError::Invalid {
                var,
                value: value.clone(),
            })
        };

        let rank = parse(RANK, raw[0].as_ref())?;
        let local_rank = parse(LOCAL_RANK, raw[1].as_ref())?;
        let world_size = parse(WORLD_SIZE, raw[2].as_ref())?;

        if rank >= world_size {
            return Err(TopologyError::RankOutOfRange { rank, world_size });
        }

        Ok(Self {
            rank,
            local_rank,
            world_size,
            distributed: true,
        })
    }

    /// True on the rank that owns single-writer side effects
    pub fn is_main(&self) -> bool {
        self.rank == 0
    }
}

/// Bind this process to its compute device
///
/// Under a process group the device is the CUDA ordinal indexed by
/// `local_rank`, seeded and synchronized so no stale work from a previous
/// occupant of the device is pending. Single-process runs skip binding and
/// train on the CPU, as does a group launched on a machine without CUDA.
pub fn bind_device(identity: &ProcessIdentity, seed: u64) -> anyhow::Result<Device> {
    if !identity.distributed {
        return Ok(Device::Cpu);
    }

    if candle_core::utils::cuda_is_available() {
        let device = Device::new_cuda(identity.local_rank)?;
        device.set_seed(seed)?;
        device.synchronize()?;
        tracing::info!(
            rank = identity.rank,
            local_rank = identity.local_rank,
            "Bound process to CUDA device"
        );
        Ok(device)
    } else {
        tracing::info!(rank = identity.rank, "CUDA not available, training on CPU");
        Ok(Device::Cpu)
    }
}
