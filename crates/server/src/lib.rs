#![warn(missing_docs)]
//! Authoritative server: configuration, the fixed-timestep simulation loop,
//! the tick-boundary host and its TCP front end.

mod config;
mod host;
mod network;
mod timestep;

pub use config::*;
pub use host::*;
pub use network::*;
pub use timestep::*;
