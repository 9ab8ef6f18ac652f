//! Port traits: the boundaries between the simulation core and the outside world.

pub mod checkpoint_port;
pub mod config_port;
pub mod data_port;
pub mod execution_port;
pub mod sink_port;
