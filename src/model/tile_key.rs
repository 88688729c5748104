//! Tile keys: `(level, row, column)` addresses into a quadtree-tiled plane.

use std::fmt;

use crate::error::OlpError;

/// A quadtree tile address. `0 <= row, column < 2^level`.
///
/// Ordered and hashable so it can key a [`std::collections::BTreeMap`] (used
/// by the prefetch/release resolvers to memoize visited quad-tree roots) or
/// a [`std::collections::HashMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey {
    level: u32,
    row: u32,
    column: u32,
}

impl TileKey {
    /// Maximum subtree depth a single quad-tree index response covers.
    pub const MAX_QUADTREE_DEPTH: u32 = 4;

    /// Construct a tile key, validating `row`/`column` are within bounds for
    /// `level`.
    pub fn new(level: u32, row: u32, column: u32) -> Result<Self, OlpError> {
        let bound = 1u64 << level;
        if (row as u64) >= bound || (column as u64) >= bound {
            return Err(OlpError::InvalidArgument(format!(
                "tile ({level}, {row}, {column}) out of bounds"
            )));
        }
        Ok(Self { level, row, column })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// The 64-bit "morton-style" quadkey HERE tiles are addressed by: the
    /// root of the whole plane is `1`; each level appends two bits derived
    /// from the corresponding row/column bit.
    pub fn to_quad_key64(&self) -> u64 {
        let mut key: u64 = 1;
        for shift in (0..self.level).rev() {
            let bit = 1u32 << shift;
            let r = u64::from(self.row & bit != 0);
            let c = u64::from(self.column & bit != 0);
            key = (key << 2) | (r << 1) | c;
        }
        key
    }

    /// Reconstruct a [`TileKey`] from its 64-bit quadkey form.
    pub fn from_quad_key64(mut key: u64) -> Result<Self, OlpError> {
        if key == 0 {
            return Err(OlpError::InvalidArgument("quadkey must be >= 1".into()));
        }
        let mut level = 0u32;
        let mut probe = key;
        while probe > 1 {
            probe >>= 2;
            level += 1;
        }

        let mut row = 0u32;
        let mut col = 0u32;
        // Strip bit pairs from the least-significant end, building row/col
        // from the bottom up, then reverse so MSB corresponds to the
        // top-level quadrant.
        let mut pairs = Vec::with_capacity(level as usize);
        for _ in 0..level {
            pairs.push((key & 0b11) as u32);
            key >>= 2;
        }
        debug_assert_eq!(key, 1);
        for (idx, pair) in pairs.iter().rev().enumerate() {
            let shift = level - 1 - idx as u32;
            row |= ((pair >> 1) & 1) << shift;
            col |= (pair & 1) << shift;
        }

        TileKey::new(level, row, col)
    }

    /// The decimal string HERE calls the "here tile" address: the decimal
    /// representation of [`TileKey::to_quad_key64`].
    pub fn to_here_tile_string(&self) -> String {
        self.to_quad_key64().to_string()
    }

    /// Parse a "here tile" decimal string back into a [`TileKey`].
    pub fn from_here_tile(s: &str) -> Result<Self, OlpError> {
        let key: u64 = s
            .parse()
            .map_err(|_| OlpError::InvalidArgument(format!("not a here-tile key: '{s}'")))?;
        TileKey::from_quad_key64(key)
    }

    /// Returns the ancestor (if `delta < 0`) or an arbitrary descendant root
    /// (if `delta > 0`, truncating row/col) obtained by truncating the
    /// current level by `delta`. `changed_level_by(-k)` for `k <= level` is
    /// always the strict ancestor `k` levels up.
    pub fn changed_level_by(&self, delta: i32) -> TileKey {
        let new_level = (self.level as i64 + delta as i64).max(0) as u32;
        if delta <= 0 {
            let shift = self.level - new_level;
            TileKey {
                level: new_level,
                row: self.row >> shift,
                column: self.column >> shift,
            }
        } else {
            let shift = new_level - self.level;
            TileKey {
                level: new_level,
                row: self.row << shift,
                column: self.column << shift,
            }
        }
    }

    /// The immediate parent: `changed_level_by(-1)`.
    pub fn parent(&self) -> Option<TileKey> {
        if self.level == 0 {
            None
        } else {
            Some(self.changed_level_by(-1))
        }
    }

    /// `true` iff `self` is `other` or a descendant of `other` within the
    /// usual quadtree containment relation.
    pub fn is_descendant_of(&self, other: &TileKey) -> bool {
        self.level >= other.level && self.changed_level_by(other.level as i32 - self.level as i32) == *other
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_here_tile_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_here_tile_string() {
        for level in 0..6u32 {
            for row in 0..(1u32 << level) {
                for col in 0..(1u32 << level) {
                    let tile = TileKey::new(level, row, col).unwrap();
                    let s = tile.to_here_tile_string();
                    let back = TileKey::from_here_tile(&s).unwrap();
                    assert_eq!(tile, back);
                }
            }
        }
    }

    #[test]
    fn changed_level_by_walks_ancestors() {
        let tile = TileKey::new(4, 9, 3).unwrap();
        let root = tile.changed_level_by(-4);
        assert_eq!(root.level(), 0);
        assert_eq!(root.row(), 0);
        assert_eq!(root.column(), 0);

        let parent = tile.parent().unwrap();
        assert_eq!(parent.level(), 3);
    }

    #[test]
    fn descendant_relation_holds_for_ancestor_walk() {
        let tile = TileKey::new(5, 17, 22).unwrap();
        for k in 0..=5 {
            let ancestor = tile.changed_level_by(-k);
            assert!(tile.is_descendant_of(&ancestor));
        }
    }

    #[test]
    fn rejects_out_of_bounds_tiles() {
        assert!(TileKey::new(2, 4, 0).is_err());
    }
}
