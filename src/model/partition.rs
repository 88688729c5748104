//! Partitions: the unit of data a layer serves, keyed either by an
//! arbitrary id (generic layers) or by a tile's "here tile" string (tiled
//! layers).

use serde::{Deserialize, Serialize};

/// The optional per-entry metadata fields a caller may request alongside a
/// tile lookup (§6.3's `additionalFields` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdditionalField {
    Checksum,
    Crc,
    DataSize,
    CompressedDataSize,
}

impl AdditionalField {
    /// The literal token used in the `additionalFields` query parameter.
    pub fn as_query_token(&self) -> &'static str {
        match self {
            AdditionalField::Checksum => "checksum",
            AdditionalField::Crc => "crc",
            AdditionalField::DataSize => "dataSize",
            AdditionalField::CompressedDataSize => "compressedDataSize",
        }
    }
}

/// An immutable unit of data within a layer.
///
/// Consumers never mutate a `Partition` once it has been produced by a
/// repository; constructing one from a quad-tree entry or a generic query
/// response always yields an independent, fully-owned value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// The stringified tile key for tiled layers, or an arbitrary server-
    /// assigned id for generic layers.
    pub partition_id: String,
    /// Opaque, content-addressed identifier for the partition's blob.
    /// Non-empty whenever a partition is returned successfully.
    pub data_handle: String,
    pub version: Option<i64>,
    pub checksum: Option<String>,
    pub crc: Option<String>,
    pub data_size: Option<u64>,
    pub compressed_data_size: Option<u64>,
}

impl Partition {
    /// Construct a minimal partition carrying only an id and a data handle.
    pub fn new(partition_id: impl Into<String>, data_handle: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            data_handle: data_handle.into(),
            version: None,
            checksum: None,
            crc: None,
            data_size: None,
            compressed_data_size: None,
        }
    }

    /// `true` if every field in `requested` is present on this partition.
    pub fn has_all_fields(&self, requested: &[AdditionalField]) -> bool {
        requested.iter().all(|field| match field {
            AdditionalField::Checksum => self.checksum.is_some(),
            AdditionalField::Crc => self.crc.is_some(),
            AdditionalField::DataSize => self.data_size.is_some(),
            AdditionalField::CompressedDataSize => self.compressed_data_size.is_some(),
        })
    }

    /// An expected byte size to preallocate a download buffer with, when
    /// known and below the repository's preallocation ceiling.
    pub fn expected_size(&self) -> Option<u64> {
        self.data_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_all_fields_checks_requested_subset_only() {
        let mut p = Partition::new("23247", "handle-1");
        p.checksum = Some("abc".into());
        assert!(p.has_all_fields(&[AdditionalField::Checksum]));
        assert!(!p.has_all_fields(&[AdditionalField::Checksum, AdditionalField::Crc]));
        assert!(p.has_all_fields(&[]));
    }
}
