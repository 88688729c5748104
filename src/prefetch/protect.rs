//! Computes the cache keys a set of tiles need pinned (spec §4.I.1).
//!
//! Grounded on `ProtectDependencyResolver::GetKeysToProtect`/`FindQuad`/
//! `AddDataHandle`/`ProcessTileKeyInCache`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::CacheFacade;
use crate::model::{Hrn, QuadTreeIndex, TileKey};

/// Resolves tile keys to the cache keys that must be `protect()`-ed for
/// those tiles' data to survive eviction. `quad_trees` accumulates across
/// calls to [`ProtectDependencyResolver::keys_to_protect`] on the same
/// instance, mirroring the original's `quad_trees_` member: a second batch
/// of tiles under an already-visited root costs no further cache reads.
pub struct ProtectDependencyResolver {
    catalog: Hrn,
    layer_id: String,
    version: i64,
    cache: Arc<CacheFacade>,
    quad_trees: BTreeMap<TileKey, QuadTreeIndex>,
}

impl ProtectDependencyResolver {
    pub fn new(catalog: Hrn, layer_id: impl Into<String>, version: i64, cache: Arc<CacheFacade>) -> Self {
        Self {
            catalog,
            layer_id: layer_id.into(),
            version,
            cache,
            quad_trees: BTreeMap::new(),
        }
    }

    /// Returns the ordered list of cache keys to pass to `protect()` for
    /// `tiles`. Tiles whose containing quad-tree cannot be found in cache
    /// contribute nothing — they are resolved online later and the caller
    /// retries protection after that fetch completes (spec §4.I.1).
    pub fn keys_to_protect(&mut self, tiles: &[TileKey]) -> Vec<String> {
        let mut keys = Vec::new();
        for tile in tiles {
            if let Some(root) = self.find_quad(tile) {
                let tree = self.quad_trees.get(&root).expect("root returned by find_quad is memoized");
                self.add_data_handle(tile, tree, &mut keys);
            } else {
                self.process_tile_in_cache(tile, &mut keys);
            }
        }
        keys
    }

    /// Ancestor walk over the already-memoized roots (`FindQuad`): the
    /// *first* ancestor found in `quad_trees` wins, unlike the release
    /// resolver which must inspect every ancestor's still-protected set.
    fn find_quad(&self, tile: &TileKey) -> Option<TileKey> {
        let max_depth = tile.level().min(TileKey::MAX_QUADTREE_DEPTH);
        for i in 0..=max_depth {
            let root = tile.changed_level_by(-(i as i32));
            if self.quad_trees.contains_key(&root) {
                return Some(root);
            }
        }
        None
    }

    fn add_data_handle(&self, tile: &TileKey, tree: &QuadTreeIndex, keys: &mut Vec<String>) -> bool {
        match tree.find(tile, false) {
            Some(entry) => {
                keys.push(self.cache.data.key_for(
                    &self.catalog.to_catalog_hrn_string(),
                    &self.layer_id,
                    &entry.data_handle,
                ));
                true
            }
            None => false,
        }
    }

    /// `ProcessTileKeyInCache`: walk ancestors looking for a quad-tree the
    /// in-memory memo doesn't have yet, reading the cache directly.
    fn process_tile_in_cache(&mut self, tile: &TileKey, keys: &mut Vec<String>) -> bool {
        let max_depth = tile.level().min(TileKey::MAX_QUADTREE_DEPTH);
        let hrn = self.catalog.to_catalog_hrn_string().to_string();
        for i in 0..=max_depth {
            let root = tile.changed_level_by(-(i as i32));
            let cached = self
                .cache
                .quadtree
                .get(&hrn, &self.layer_id, &root, self.version, TileKey::MAX_QUADTREE_DEPTH)
                .unwrap_or(None);
            if let Some(tree) = cached {
                if self.add_data_handle(tile, &tree, keys) {
                    keys.push(self.cache.quadtree.key_for(
                        &hrn,
                        &self.layer_id,
                        &root,
                        self.version,
                        TileKey::MAX_QUADTREE_DEPTH,
                    ));
                    self.quad_trees.insert(root, tree);
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBlobCache;
    use bytes::Bytes;

    fn root_of(tile: TileKey, depth: u32) -> TileKey {
        tile.changed_level_by(-(depth as i32))
    }

    fn setup() -> (Arc<CacheFacade>, Hrn) {
        let cache = Arc::new(CacheFacade::new(Arc::new(InMemoryBlobCache::default()), 3600));
        let catalog = Hrn::new("hrn:here:data::olp-here-test:hereos-internal-test-v2").unwrap();
        (cache, catalog)
    }

    #[test]
    fn tile_missing_from_cache_contributes_nothing() {
        let (cache, catalog) = setup();
        let mut resolver = ProtectDependencyResolver::new(catalog, "layer", 1, cache);
        let tile = TileKey::new(5, 1, 1).unwrap();
        assert!(resolver.keys_to_protect(&[tile]).is_empty());
    }

    #[test]
    fn cached_quad_tree_protects_tile_and_tree_key() {
        let (cache, catalog) = setup();
        let tile = TileKey::new(2, 1, 1).unwrap();
        let root = root_of(tile, 2);
        let index = QuadTreeIndex::parse(
            root,
            4,
            // "03" descends two levels from `root` to exactly `tile` (2,1,1):
            // see `descend_from` (quadtree.rs) for the base-4 digit encoding.
            Bytes::from_static(br#"{"subQuads":[{"subQuadKey":"03","dataHandle":"H1"}]}"#),
        )
        .unwrap();
        cache
            .quadtree
            .put(
                &catalog.to_catalog_hrn_string(),
                "layer",
                &root,
                1,
                &index,
                None,
            )
            .unwrap();

        let mut resolver = ProtectDependencyResolver::new(catalog, "layer", 1, cache);
        let keys = resolver.keys_to_protect(&[tile]);
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn second_tile_under_same_root_reuses_memo_without_second_cache_read() {
        let (cache, catalog) = setup();
        let root = TileKey::new(0, 0, 0).unwrap();
        let tile_a = TileKey::new(1, 0, 0).unwrap();
        let tile_b = TileKey::new(1, 0, 1).unwrap();
        let index = QuadTreeIndex::parse(
            root,
            4,
            Bytes::from_static(
                br#"{"subQuads":[{"subQuadKey":"0","dataHandle":"HA"},{"subQuadKey":"1","dataHandle":"HB"}]}"#,
            ),
        )
        .unwrap();
        cache
            .quadtree
            .put(&catalog.to_catalog_hrn_string(), "layer", &root, 1, &index, None)
            .unwrap();

        let mut resolver = ProtectDependencyResolver::new(catalog.clone(), "layer", 1, Arc::clone(&cache));
        let keys_a = resolver.keys_to_protect(&[tile_a]);
        assert_eq!(keys_a.len(), 2);

        // Evict the tree from the underlying cache: a second cache read
        // would now fail, proving the second lookup used the memo.
        cache
            .raw()
            .remove(&cache.quadtree.key_for(
                &catalog.to_catalog_hrn_string(),
                "layer",
                &root,
                1,
                TileKey::MAX_QUADTREE_DEPTH,
            ))
            .unwrap();

        let keys_b = resolver.keys_to_protect(&[tile_b]);
        assert_eq!(keys_b.len(), 1, "data handle key only; tree key already emitted for this root");
    }
}
