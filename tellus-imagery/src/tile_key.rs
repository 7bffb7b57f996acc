use std::fmt;

/// Address of one quadtree tile: resolution level plus row/column within the
/// level's grid. This triple is the cache identity for texture data, request
/// deduplication and on-disk paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: u32,
    pub row: u32,
    pub column: u32,
}

impl TileKey {
    pub fn new(level: u32, row: u32, column: u32) -> Self {
        Self {
            level,
            row,
            column,
        }
    }

    /// Child keys at the next level, ordered southwest, southeast,
    /// northwest, northeast to match `Sector::subdivide`.
    pub fn child_keys(&self) -> [TileKey; 4] {
        let level = self.level + 1;
        let row = self.row * 2;
        let column = self.column * 2;
        [
            TileKey::new(level, row, column),
            TileKey::new(level, row, column + 1),
            TileKey::new(level, row + 1, column),
            TileKey::new(level, row + 1, column + 1),
        ]
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.row, self.column)
    }
}
