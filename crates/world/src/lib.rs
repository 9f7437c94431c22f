mod chunk;
mod dirty;
mod entity;
mod entity_table;
mod error;
mod generator;
mod machine;
mod persist;
mod simulation;
mod storage;
mod tile;
mod world;

pub use chunk::*;
pub use dirty::*;
pub use entity::*;
pub use entity_table::*;
pub use error::*;
pub use generator::*;
pub use machine::*;
pub use persist::*;
pub use simulation::*;
pub use storage::*;
pub use tile::*;
pub use world::*;
