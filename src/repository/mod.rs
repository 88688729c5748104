//! Repositories resolving tiles and partitions to metadata, and
//! partitions to bytes (spec §4.G–§4.H): the most intricate subsystem,
//! sitting between the API lookup client and the cache facade.

pub mod data;
pub mod partition;

pub use data::DataRepository;
pub use partition::{PartitionRepository, MAX_PARTITION_IDS_PER_BATCH};
