//! # olp-client-sdk
//!
//! A client SDK for the HERE Open Location Platform (OLP): catalog/layer
//! endpoint resolution, versioned/volatile/streaming data access, quad-tree
//! tile partitioning, and the cache/coalescing/task-scheduling machinery
//! that make duplicate in-flight requests cheap.
//!
//! ## Architecture
//!
//! - `error`: the single error type every public operation returns
//! - `model`: catalog HRNs, tile keys, quad-tree indices, partitions
//! - `context`: cooperative cancellation and the ambient logging span
//! - `cache`: the key/value cache facade and its typed repositories
//! - `sync`: the named-mutex registry serializing duplicate in-flight work
//! - `task`: the priority-scheduled worker pool every request runs on
//! - `coalesce`: multi-request fan-out on top of the task sink
//! - `client`: API lookup, network transport, and assembled settings
//! - `repository`: tile/partition resolution and blob fetching
//! - `prefetch`: protect/release dependency resolvers for pinned tiles
//! - `layer`: the public `VersionedLayerClient`/`VolatileLayerClient`/
//!   `StreamLayerClient` surface built on everything above

#![warn(clippy::all)]

pub mod cache;
pub mod client;
pub mod coalesce;
pub mod context;
pub mod error;
pub mod layer;
pub mod model;
pub mod prefetch;
pub mod repository;
pub mod sync;
pub mod task;

pub use error::{OlpError, OlpResult};
pub use layer::{
    CacheRemovalTarget, DataRequest, Message, MessageOffset, PartitionsRequest, PrefetchTileResult, PrefetchTilesRequest, StreamLayerClient,
    SubscribeRequest, SubscriptionMode, VersionedLayerClient, VolatileLayerClient,
};
pub use model::{FetchOption, Hrn, Partition, TileKey};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
