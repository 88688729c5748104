//! Prefetch & release dependency resolvers (spec §4.I): given a set of
//! target tiles, compute the minimal set of cache keys to pin against
//! eviction, and symmetrically the set safe to unpin.
//!
//! Grounded on `ProtectDependencyResolver`/`ReleaseDependencyResolver`: both
//! walk a tile's ancestors up to [`crate::model::TileKey::MAX_QUADTREE_DEPTH`]
//! looking for the quad-tree index that covers it, memoizing visited roots
//! so a batch of tiles under the same root costs one cache read.

pub mod protect;
pub mod release;

pub use protect::ProtectDependencyResolver;
pub use release::ReleaseDependencyResolver;
