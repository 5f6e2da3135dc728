pub mod block_state;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod locator;
pub mod manager;
pub mod materials;
pub mod orientation;
pub mod placer;
pub mod procurement;
pub mod schematic;
pub mod state;
pub mod structure;
#[cfg(test)]
pub(crate) mod testing;
pub mod world;
