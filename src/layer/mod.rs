//! Layer clients (spec §4.J): the public surface most callers interact
//! with. Each client wraps the repositories and resolvers from the other
//! modules behind a catalog/layer-scoped façade.

mod core;
mod request;
mod stream;
mod versioned;
mod volatile;

pub use request::{CacheRemovalTarget, DataRequest, PartitionsRequest, PrefetchTileResult, PrefetchTilesRequest};
pub use stream::{Message, MessageOffset, StreamLayerClient, SubscribeRequest, SubscriptionMode};
pub use versioned::VersionedLayerClient;
pub use volatile::VolatileLayerClient;
