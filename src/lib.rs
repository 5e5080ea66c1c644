//! comm-check: two-node communication smoke tester
//!
//! Verifies that a pair of nodes can establish a process group over
//! the cluster network and run the basic collective operations, with
//! environment, interface, and GPU checks to diagnose failures.

pub mod cli;
pub mod comm;
pub mod config;
pub mod error;
pub mod gpu;
pub mod logging;
pub mod net;
pub mod suite;
pub mod system;
pub mod version;

pub use error::{Error, Result};
