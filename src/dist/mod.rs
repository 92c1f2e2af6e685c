// Distributed process context
// Public interface for process identity and collective primitives

mod collective;
mod process;

pub use collective::{master_endpoint_from_env, Collective, NoopCollective, TcpCollective};
pub use process::{bind_device, ProcessIdentity, TopologyError};
