use std::io;

use crate::header::CellType;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{file} does not start with the expected magic bytes")]
    BadMagic { file: &'static str },

    #[error("Tile min field is {0} bytes wide; at most 4 is valid")]
    BadMinFieldSize(u8),

    #[error("{0} is not a valid cell type code")]
    UnknownCellType(i32),

    #[error("The grid is corrupt: {0}")]
    Corrupt(String),

    #[error("Tile record is {0} bytes; the header needs {1}")]
    TruncatedTile(usize, usize),

    #[error("Tile payload ended after {0} of {1} cells")]
    PartialTile(usize, usize),

    #[error("Tile type 0x{0:02x} is not supported")]
    UnsupportedTileType(u8),

    #[error("Invalid CCITT Group-4 data: {0}")]
    Ccitt(&'static str),

    #[error("The grid holds {grid:?} cells but {requested:?} cells were requested")]
    MismatchedCellType { grid: CellType, requested: CellType },

    #[error("Tile {0} is outside the grid of {1} tiles")]
    TileOutOfRange(u32, u32),

    #[error("The given index ({0}, {1}) is out of bounds")]
    OutOfBounds(usize, usize),
}

impl Error {
    /// True for errors that mean the grid files themselves cannot be trusted,
    /// as opposed to a single unreadable tile.
    pub fn is_format_corruption(&self) -> bool {
        matches!(
            self,
            Self::BadMagic { .. }
                | Self::BadMinFieldSize(_)
                | Self::UnknownCellType(_)
                | Self::Corrupt(_)
        )
    }
}
