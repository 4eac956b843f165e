//! golbroker - distributed Game of Life broker
//!
//! The broker splits a toroidal Game of Life world into row bands, hands each
//! band to a registered remote worker, and stitches the stepped bands back
//! together in order.
//!
//! # Architecture
//!
//! - **Registry**: ordered worker addresses, snapshotted per operation
//! - **Partitioner**: row bands with wrapped halo rows
//! - **Executor**: concurrent dispatch, in-order collection, deadlines and cancellation
//! - **Aggregation**: alive-cell totals with turn consistency checks
//! - **Control**: pause/resume/save/quit broadcast and broker lifecycle
//! - **Node service**: a reference worker that swaps halos with its neighbours

pub mod config;
pub mod distributed;
pub mod error;
pub mod life;
pub mod world;

// Re-export commonly used types
pub use config::Config;
pub use error::{BrokerError, BrokerResult};
pub use world::World;

/// Result type used for service plumbing
pub type Result<T> = anyhow::Result<T>;
