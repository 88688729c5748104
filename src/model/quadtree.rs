//! Quad-tree indices: the server's batched answer to "give me the data
//! handles for this tile and every descendant up to depth D, plus any
//! ancestor tiles reachable from here."

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::OlpError;
use crate::model::partition::{AdditionalField, Partition};
use crate::model::tile_key::TileKey;

/// A single entry in a quad-tree index: one tile's data handle plus
/// whichever additional fields the server included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuadTreeEntry {
    pub tile_key: TileKey,
    pub data_handle: String,
    pub version: Option<i64>,
    pub checksum: Option<String>,
    pub crc: Option<String>,
    pub data_size: Option<u64>,
    pub compressed_data_size: Option<u64>,
}

impl QuadTreeEntry {
    fn has_all_fields(&self, requested: &[AdditionalField]) -> bool {
        requested.iter().all(|field| match field {
            AdditionalField::Checksum => self.checksum.is_some(),
            AdditionalField::Crc => self.crc.is_some(),
            AdditionalField::DataSize => self.data_size.is_some(),
            AdditionalField::CompressedDataSize => self.compressed_data_size.is_some(),
        })
    }

    /// Build the [`Partition`] this entry describes, populating only the
    /// fields the caller actually asked for.
    pub fn to_partition(&self, requested: &[AdditionalField]) -> Partition {
        let mut partition = Partition::new(self.tile_key.to_here_tile_string(), &self.data_handle);
        partition.version = self.version;
        for field in requested {
            match field {
                AdditionalField::Checksum => partition.checksum = self.checksum.clone(),
                AdditionalField::Crc => partition.crc = self.crc.clone(),
                AdditionalField::DataSize => partition.data_size = self.data_size,
                AdditionalField::CompressedDataSize => {
                    partition.compressed_data_size = self.compressed_data_size
                }
            }
        }
        partition
    }
}

/// Wire shapes for `GET .../quadkeys/{root}/depths/{D}` (§6.3). Kept
/// deliberately permissive (all-optional numeric fields) since the wire
/// protocol is not specified bit-exactly (Non-goals, spec §1).
#[derive(Debug, Clone, Deserialize, Serialize)]
struct WireQuadEntry {
    #[serde(alias = "subQuadKey", alias = "partition")]
    key: String,
    #[serde(alias = "dataHandle")]
    data_handle: String,
    version: Option<i64>,
    checksum: Option<String>,
    crc: Option<String>,
    #[serde(alias = "dataSize")]
    data_size: Option<u64>,
    #[serde(alias = "compressedDataSize")]
    compressed_data_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct WireQuadTreeIndex {
    #[serde(default, alias = "subQuads")]
    sub_quads: Vec<WireQuadEntry>,
    #[serde(default, alias = "parentQuads")]
    parent_quads: Vec<WireQuadEntry>,
}

/// Descend from `root` by a run of base-4 digits (HERE's `subQuadKey`
/// convention: each digit selects one of the 4 children at the next level
/// down). Returns `root` unchanged for an empty digit string.
fn descend_from(root: TileKey, digits: &str) -> Result<TileKey, OlpError> {
    let mut level = root.level();
    let mut row = root.row();
    let mut column = root.column();
    for ch in digits.chars() {
        let quadrant = ch
            .to_digit(4)
            .ok_or_else(|| OlpError::Unknown(format!("invalid subQuadKey digit '{ch}'")))?;
        level += 1;
        row = (row << 1) | ((quadrant >> 1) & 1);
        column = (column << 1) | (quadrant & 1);
    }
    TileKey::new(level, row, column)
}

/// An immutable, byte-backed quad-tree index rooted at some ancestor tile
/// with inclusive subtree depth `depth`.
#[derive(Debug, Clone)]
pub struct QuadTreeIndex {
    root: TileKey,
    depth: u32,
    raw: Bytes,
    sub_quads: Vec<QuadTreeEntry>,
    parent_quads: Vec<QuadTreeEntry>,
}

impl QuadTreeIndex {
    /// Parse a quad-tree index from the raw response body, without
    /// canonicalizing it: [`QuadTreeIndex::raw_bytes`] returns exactly
    /// `raw` unchanged, so a round trip through the cache is bit-identical.
    pub fn parse(root: TileKey, depth: u32, raw: Bytes) -> Result<Self, OlpError> {
        let wire: WireQuadTreeIndex = serde_json::from_slice(&raw)
            .map_err(|e| OlpError::Unknown(format!("malformed quad-tree index: {e}")))?;

        let sub_quads = wire
            .sub_quads
            .into_iter()
            .map(|e| {
                Ok(QuadTreeEntry {
                    tile_key: descend_from(root, &e.key)?,
                    data_handle: e.data_handle,
                    version: e.version,
                    checksum: e.checksum,
                    crc: e.crc,
                    data_size: e.data_size,
                    compressed_data_size: e.compressed_data_size,
                })
            })
            .collect::<Result<Vec<_>, OlpError>>()?;

        let parent_quads = wire
            .parent_quads
            .into_iter()
            .map(|e| {
                Ok(QuadTreeEntry {
                    tile_key: TileKey::from_here_tile(&e.key)?,
                    data_handle: e.data_handle,
                    version: e.version,
                    checksum: e.checksum,
                    crc: e.crc,
                    data_size: e.data_size,
                    compressed_data_size: e.compressed_data_size,
                })
            })
            .collect::<Result<Vec<_>, OlpError>>()?;

        Ok(Self {
            root,
            depth,
            raw,
            sub_quads,
            parent_quads,
        })
    }

    pub fn root(&self) -> TileKey {
        self.root
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The raw, untouched response body. Stored and replayed byte-for-byte
    /// by the quad-tree cache repository.
    pub fn raw_bytes(&self) -> &Bytes {
        &self.raw
    }

    pub fn sub_quads(&self) -> &[QuadTreeEntry] {
        &self.sub_quads
    }

    pub fn parent_quads(&self) -> &[QuadTreeEntry] {
        &self.parent_quads
    }

    /// Find `tile`, optionally also searching the parent-quad entries
    /// (ancestors above the rooted subtree, used by aggregated lookups).
    pub fn find(&self, tile: &TileKey, include_parents: bool) -> Option<&QuadTreeEntry> {
        self.sub_quads
            .iter()
            .find(|e| &e.tile_key == tile)
            .or_else(|| {
                if include_parents {
                    self.parent_quads.iter().find(|e| &e.tile_key == tile)
                } else {
                    None
                }
            })
    }

    /// `true` if `tile` is present among the sub-quads of this index.
    pub fn contains(&self, tile: &TileKey) -> bool {
        self.sub_quads.iter().any(|e| &e.tile_key == tile)
    }

    /// Whether `tile`'s entry (if present, sub-quad only) carries every
    /// field in `required_fields`.
    pub fn tile_has_all_fields(&self, tile: &TileKey, required_fields: &[AdditionalField]) -> bool {
        self.find(tile, false)
            .map(|e| e.has_all_fields(required_fields))
            .unwrap_or(false)
    }
}
