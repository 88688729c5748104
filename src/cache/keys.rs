//! The canonical cache key schema (spec §6.1). Pure string-building free
//! functions — no state, no I/O — so they can be unit-tested against the
//! literal schema and reused by every cache repository in [`super`].

/// `"{catalog}::{service}::{version}::api"`
pub fn api_key(catalog: &str, service: &str, version: &str) -> String {
    format!("{catalog}::{service}::{version}::api")
}

/// `"{catalog}::{layer}::{partition_id}::{version}::partition"`, with the
/// version section omitted for volatile layers (`version = None`).
pub fn partition_key(catalog: &str, layer: &str, partition_id: &str, version: Option<i64>) -> String {
    match version {
        Some(v) => format!("{catalog}::{layer}::{partition_id}::{v}::partition"),
        None => format!("{catalog}::{layer}::{partition_id}::partition"),
    }
}

/// `"{catalog}::{layer}::{version}::partitions"`
pub fn partitions_list_key(catalog: &str, layer: &str, version: i64) -> String {
    format!("{catalog}::{layer}::{version}::partitions")
}

/// `"{catalog}::{layer}::{root_tile_here_string}::{version}::{depth}::quadtree"`
pub fn quadtree_key(catalog: &str, layer: &str, root_tile_here_string: &str, version: i64, depth: u32) -> String {
    format!("{catalog}::{layer}::{root_tile_here_string}::{version}::{depth}::quadtree")
}

/// `"{catalog}::{layer}::{data_handle}"`
pub fn data_handle_key(catalog: &str, layer: &str, data_handle: &str) -> String {
    format!("{catalog}::{layer}::{data_handle}")
}

/// `"{catalog}::{catalog_version}::layerversions"`
pub fn layer_versions_key(catalog: &str, catalog_version: i64) -> String {
    format!("{catalog}::{catalog_version}::layerversions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_literal_schema_strings() {
        assert_eq!(
            api_key("hrn:here:data::x:y", "blob", "v1"),
            "hrn:here:data::x:y::blob::v1::api"
        );
        assert_eq!(
            partition_key("hrn:here:data::x:y", "base-layer", "23618364", Some(3)),
            "hrn:here:data::x:y::base-layer::23618364::3::partition"
        );
        assert_eq!(
            partition_key("hrn:here:data::x:y", "volatile-layer", "abc", None),
            "hrn:here:data::x:y::volatile-layer::abc::partition"
        );
        assert_eq!(
            partitions_list_key("hrn:here:data::x:y", "base-layer", 3),
            "hrn:here:data::x:y::base-layer::3::partitions"
        );
        assert_eq!(
            quadtree_key("hrn:here:data::x:y", "base-layer", "23618364", 3, 4),
            "hrn:here:data::x:y::base-layer::23618364::3::4::quadtree"
        );
        assert_eq!(
            data_handle_key("hrn:here:data::x:y", "base-layer", "95c5c703"),
            "hrn:here:data::x:y::base-layer::95c5c703"
        );
        assert_eq!(
            layer_versions_key("hrn:here:data::x:y", 12),
            "hrn:here:data::x:y::12::layerversions"
        );
    }
}
