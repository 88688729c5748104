//! Computes the cache keys a set of tiles are safe to unpin (spec §4.I.2).
//!
//! Grounded on `ReleaseDependencyResolver::GetKeysToRelease`/`FindQuad`/
//! `AddToResultIfAllSubtilesAreAlreadyInResultOrNotProtected`. Unlike the
//! protect resolver, a containing quad-tree's own key is only released
//! once every *still-protected* sub-quad it carries is also being
//! released in this same call — releasing it early would drop pinning
//! for sibling tiles nobody asked to release yet.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::cache::CacheFacade;
use crate::model::{Hrn, QuadTreeIndex, TileKey};

/// Resolves a tile set to the cache keys safe to pass to `release()`.
pub struct ReleaseDependencyResolver {
    catalog: Hrn,
    layer_id: String,
    version: i64,
    cache: Arc<CacheFacade>,
    /// Memoizes every root visited so far, `None` for a root with no
    /// cached quad-tree, avoiding a repeated cache read for it.
    visited: BTreeMap<TileKey, Option<QuadTreeIndex>>,
}

impl ReleaseDependencyResolver {
    pub fn new(catalog: Hrn, layer_id: impl Into<String>, version: i64, cache: Arc<CacheFacade>) -> Self {
        Self {
            catalog,
            layer_id: layer_id.into(),
            version,
            cache,
            visited: BTreeMap::new(),
        }
    }

    /// Returns the ordered list of cache keys safe to `release()` for
    /// `tiles`. Tiles with no containing quad-tree in cache contribute
    /// nothing (spec §4.I.2).
    pub fn keys_to_release(&mut self, tiles: &[TileKey]) -> Vec<String> {
        let mut sorted: Vec<TileKey> = tiles.to_vec();
        sorted.sort();
        sorted.dedup();
        let release_set: HashSet<TileKey> = sorted.iter().copied().collect();

        let mut keys = Vec::new();
        let mut root_released: HashSet<TileKey> = HashSet::new();
        let mut root_kept: HashSet<TileKey> = HashSet::new();
        let hrn = self.catalog.to_catalog_hrn_string().to_string();

        for tile in &sorted {
            let Some((root, tree)) = self.find_containing_tree(tile) else {
                continue;
            };

            if let Some(entry) = tree.find(tile, false) {
                keys.push(self.cache.data.key_for(&hrn, &self.layer_id, &entry.data_handle));
            }

            if root_released.contains(&root) || root_kept.contains(&root) {
                continue;
            }

            let mut any_protected = false;
            let mut all_protected_in_release_set = true;
            for entry in tree.sub_quads() {
                let data_key = self.cache.data.key_for(&hrn, &self.layer_id, &entry.data_handle);
                if self.cache.raw().is_protected(&data_key).unwrap_or(false) {
                    any_protected = true;
                    if !release_set.contains(&entry.tile_key) {
                        all_protected_in_release_set = false;
                    }
                }
            }

            if !any_protected || all_protected_in_release_set {
                keys.push(self.cache.quadtree.key_for(&hrn, &self.layer_id, &root, self.version, tree.depth()));
                root_released.insert(root);
            } else {
                root_kept.insert(root);
            }
        }

        keys
    }

    /// Ancestor walk (`FindQuad`) consulting (and populating) the
    /// per-root memo before reading the cache for an unvisited root.
    fn find_containing_tree(&mut self, tile: &TileKey) -> Option<(TileKey, QuadTreeIndex)> {
        let max_depth = tile.level().min(TileKey::MAX_QUADTREE_DEPTH);
        let hrn = self.catalog.to_catalog_hrn_string().to_string();
        for i in 0..=max_depth {
            let root = tile.changed_level_by(-(i as i32));
            if let Some(cached) = self.visited.get(&root) {
                if let Some(tree) = cached {
                    return Some((root, tree.clone()));
                }
                continue;
            }
            let cached = self
                .cache
                .quadtree
                .get(&hrn, &self.layer_id, &root, self.version, TileKey::MAX_QUADTREE_DEPTH)
                .unwrap_or(None);
            self.visited.insert(root, cached.clone());
            if let Some(tree) = cached {
                return Some((root, tree));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBlobCache;
    use bytes::Bytes;

    fn setup() -> (Arc<CacheFacade>, Hrn) {
        let cache = Arc::new(CacheFacade::new(Arc::new(InMemoryBlobCache::default()), 3600));
        let catalog = Hrn::new("hrn:here:data::olp-here-test:hereos-internal-test-v2").unwrap();
        (cache, catalog)
    }

    #[test]
    fn tile_missing_from_cache_contributes_nothing() {
        let (cache, catalog) = setup();
        let mut resolver = ReleaseDependencyResolver::new(catalog, "layer", 1, cache);
        let tile = TileKey::new(5, 1, 1).unwrap();
        assert!(resolver.keys_to_release(&[tile]).is_empty());
    }

    #[test]
    fn releasing_every_protected_sibling_also_releases_the_tree_key() {
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

        let hrn = catalog.to_catalog_hrn_string().to_string();
        let key_a = cache.data.key_for(&hrn, "layer", "HA");
        let key_b = cache.data.key_for(&hrn, "layer", "HB");
        cache.raw().protect(&key_a).unwrap();
        cache.raw().protect(&key_b).unwrap();

        let mut resolver = ReleaseDependencyResolver::new(catalog, "layer", 1, cache.clone());
        let keys = resolver.keys_to_release(&[tile_a, tile_b]);

        let tree_key = cache.quadtree.key_for(&hrn, "layer", &root, 1, 4);
        assert!(keys.contains(&tree_key));
        assert!(keys.contains(&key_a));
        assert!(keys.contains(&key_b));
    }

    #[test]
    fn releasing_only_one_of_two_protected_siblings_keeps_the_tree_key_pinned() {
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

        let hrn = catalog.to_catalog_hrn_string().to_string();
        let key_a = cache.data.key_for(&hrn, "layer", "HA");
        let key_b = cache.data.key_for(&hrn, "layer", "HB");
        cache.raw().protect(&key_a).unwrap();
        cache.raw().protect(&key_b).unwrap();

        let mut resolver = ReleaseDependencyResolver::new(catalog, "layer", 1, cache.clone());
        let keys = resolver.keys_to_release(&[tile_a]);

        let tree_key = cache.quadtree.key_for(&hrn, "layer", &root, 1, 4);
        assert!(!keys.contains(&tree_key), "tile_b is still protected and not in the release set");
        assert!(keys.contains(&key_a));
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

        let mut resolver = ReleaseDependencyResolver::new(catalog.clone(), "layer", 1, Arc::clone(&cache));
        let _ = resolver.keys_to_release(&[tile_a]);

        cache
            .raw()
            .remove(&cache.quadtree.key_for(&catalog.to_catalog_hrn_string(), "layer", &root, 1, 4))
            .unwrap();

        // A second cache read for this root would now return nothing; the
        // memo still finds it and the data key is still produced.
        let hrn = catalog.to_catalog_hrn_string().to_string();
        let keys = resolver.keys_to_release(&[tile_b]);
        assert!(keys.contains(&cache.data.key_for(&hrn, "layer", "HB")));
    }
}
