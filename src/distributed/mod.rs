//! Distributed mode implementation
//!
//! # Architecture
//!
//! golbroker uses a broker-worker architecture:
//!
//! - **Broker**: registers workers, partitions worlds, runs and reassembles them
//! - **Node Service**: runs on worker hosts, steps one band, swaps halos with neighbours
//! - **Client**: submits worlds, polls alive cells, forwards key presses
//!
//! # Modules
//!
//! - `protocol`: Message definitions and serialization
//! - `registry`: Registered workers and their connections
//! - `partition`: Row-band partitioning with halos
//! - `executor`: Concurrent dispatch and in-order collection
//! - `aggregate`: Alive-cell aggregation
//! - `control`: Signal broadcast and broker lifecycle
//! - `broker`: Broker service
//! - `client`: Broker client
//! - `node_service`: Reference worker node

pub mod aggregate;
pub mod broker;
pub mod client;
pub mod control;
pub mod executor;
pub mod node_service;
pub mod partition;
pub mod protocol;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use protocol::{
    Message,
    Signal,
    PROTOCOL_VERSION,
};

pub use aggregate::AliveCount;
pub use broker::{Broker, BrokerService};
pub use client::BrokerClient;
pub use control::{Lifecycle, LifecycleState};
pub use executor::Executor;
pub use node_service::NodeService;
pub use partition::Partition;
pub use registry::{WorkerHandle, WorkerRegistry};
