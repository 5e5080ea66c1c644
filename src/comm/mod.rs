//! Two-rank communication layer
//!
//! A minimal process group over TCP: rank 0 listens on the master address,
//! rank 1 connects, and the collectives the smoke tests need (send/recv,
//! all-reduce, broadcast, gather, barrier) run as paired exchanges over the
//! single connection. With a world size of 2 no reduction topology is
//! involved; every collective is one frame each way at most.

mod group;
mod wire;

pub use group::{GroupConfig, ProcessGroup, ReduceOp};
pub use wire::{CollectiveOp, Frame, MAX_FRAME_SIZE};

pub use crate::config::WORLD_SIZE;
