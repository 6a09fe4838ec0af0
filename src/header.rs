use std::io::Read;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use log::warn;
use num_traits::NumCast;

use crate::error::Error;

/// Length of the part of `hdr.adf` that carries fields.
pub const HEADER_LEN: usize = 308;
const HEADER_MAGIC: &[u8; 8] = b"GRID1.2\0";

const OFFSET_CELL_TYPE: usize = 16;
const OFFSET_COMP_FLAG: usize = 20;
const OFFSET_PIXEL_SIZE_X: usize = 256;
const OFFSET_PIXEL_SIZE_Y: usize = 264;
const OFFSET_REF_X: usize = 272;
const OFFSET_REF_Y: usize = 280;
const OFFSET_TILES_PER_ROW: usize = 288;
const OFFSET_TILES_PER_COLUMN: usize = 292;
const OFFSET_TILE_X_SIZE: usize = 296;
const OFFSET_TILE_Y_SIZE: usize = 304;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CellType {
    Integer,
    Float,
}
impl CellType {
    pub fn from_code(code: i32) -> Result<Self, Error> {
        match code {
            1 => Ok(Self::Integer),
            2 => Ok(Self::Float),
            _ => Err(Error::UnknownCellType(code)),
        }
    }
    pub fn code(self) -> i32 {
        match self {
            Self::Integer => 1,
            Self::Float => 2,
        }
    }
}

/// The fixed header of a coverage, `hdr.adf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridHeader {
    pub cell_type: CellType,
    pub compressed: bool,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub ref_x: f64,
    pub ref_y: f64,
    pub tiles_per_row: u32,
    pub tiles_per_column: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}
impl GridHeader {
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let mut data = [0u8; HEADER_LEN];
        reader.read_exact(&mut data)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < HEADER_LEN {
            Err(Error::Corrupt(format!(
                "hdr.adf is {} bytes; expected at least {HEADER_LEN}",
                data.len()
            )))?
        }
        if &data[..8] != HEADER_MAGIC {
            // Some writers leave the magic blank; the layout is still usable.
            warn!("hdr.adf does not start with GRID1.2");
        }

        let cell_type = CellType::from_code(BigEndian::read_i32(&data[OFFSET_CELL_TYPE..]))?;
        let compressed = BigEndian::read_i32(&data[OFFSET_COMP_FLAG..]) == 0;

        let header = Self {
            cell_type,
            compressed,
            pixel_size_x: BigEndian::read_f64(&data[OFFSET_PIXEL_SIZE_X..]),
            pixel_size_y: BigEndian::read_f64(&data[OFFSET_PIXEL_SIZE_Y..]),
            ref_x: BigEndian::read_f64(&data[OFFSET_REF_X..]),
            ref_y: BigEndian::read_f64(&data[OFFSET_REF_Y..]),
            tiles_per_row: positive_field(data, OFFSET_TILES_PER_ROW, "tiles per row")?,
            tiles_per_column: positive_field(data, OFFSET_TILES_PER_COLUMN, "tiles per column")?,
            tile_width: positive_field(data, OFFSET_TILE_X_SIZE, "tile width")?,
            tile_height: positive_field(data, OFFSET_TILE_Y_SIZE, "tile height")?,
        };
        header.checked_tile_count()?;
        if !(header.pixel_size_x > 0.0 && header.pixel_size_y > 0.0) {
            Err(Error::Corrupt(format!(
                "pixel size must be positive, got {} x {}",
                header.pixel_size_x, header.pixel_size_y
            )))?
        }
        Ok(header)
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_per_row.saturating_mul(self.tiles_per_column)
    }

    /// Number of tiles, or an error if the layout overflows a tile number.
    pub fn checked_tile_count(&self) -> Result<u32, Error> {
        self.tiles_per_row
            .checked_mul(self.tiles_per_column)
            .ok_or_else(|| {
                Error::Corrupt(format!(
                    "{} x {} tiles overflow the tile numbering",
                    self.tiles_per_row, self.tiles_per_column
                ))
            })
    }

    /// Serializes the header into the `hdr.adf` layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_LEN];
        data[..8].copy_from_slice(HEADER_MAGIC);
        BigEndian::write_i32(&mut data[OFFSET_CELL_TYPE..], self.cell_type.code());
        BigEndian::write_i32(&mut data[OFFSET_COMP_FLAG..], if self.compressed { 0 } else { 1 });
        BigEndian::write_f64(&mut data[OFFSET_PIXEL_SIZE_X..], self.pixel_size_x);
        BigEndian::write_f64(&mut data[OFFSET_PIXEL_SIZE_Y..], self.pixel_size_y);
        BigEndian::write_f64(&mut data[OFFSET_REF_X..], self.ref_x);
        BigEndian::write_f64(&mut data[OFFSET_REF_Y..], self.ref_y);
        BigEndian::write_u32(&mut data[OFFSET_TILES_PER_ROW..], self.tiles_per_row);
        BigEndian::write_u32(&mut data[OFFSET_TILES_PER_COLUMN..], self.tiles_per_column);
        BigEndian::write_u32(&mut data[OFFSET_TILE_X_SIZE..], self.tile_width);
        BigEndian::write_i32(&mut data[OFFSET_TILE_X_SIZE + 4..], 1);
        BigEndian::write_u32(&mut data[OFFSET_TILE_Y_SIZE..], self.tile_height);
        data
    }
}

fn positive_field(data: &[u8], offset: usize, name: &str) -> Result<u32, Error> {
    let value = BigEndian::read_i32(&data[offset..]);
    if value <= 0 {
        Err(Error::Corrupt(format!("{name} must be positive, got {value}")))?
    }
    Ok(value as u32)
}

/// Georeferenced extent of the coverage, `dblbnd.adf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridBounds {
    pub llx: f64,
    pub lly: f64,
    pub urx: f64,
    pub ury: f64,
}
impl GridBounds {
    pub fn new(llx: f64, lly: f64, urx: f64, ury: f64) -> Result<Self, Error> {
        if !(urx > llx && ury > lly) {
            Err(Error::Corrupt(format!(
                "bounds ({llx}, {lly}) - ({urx}, {ury}) are empty"
            )))?
        }
        Ok(Self { llx, lly, urx, ury })
    }
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let llx = reader.read_f64::<BigEndian>()?;
        let lly = reader.read_f64::<BigEndian>()?;
        let urx = reader.read_f64::<BigEndian>()?;
        let ury = reader.read_f64::<BigEndian>()?;
        Self::new(llx, lly, urx, ury)
    }
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; 32];
        BigEndian::write_f64_into(&[self.llx, self.lly, self.urx, self.ury], &mut data);
        data
    }
    pub fn min_x(&self) -> f64 {
        self.llx
    }
    pub fn max_x(&self) -> f64 {
        self.urx
    }
    pub fn min_y(&self) -> f64 {
        self.lly
    }
    pub fn max_y(&self) -> f64 {
        self.ury
    }
}

/// Cell statistics from `sta.adf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}
impl GridStatistics {
    /// Reads the statistics, or nothing if the file is too short to hold them.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Option<Self>, Error> {
        let mut data = Vec::with_capacity(32);
        reader.read_to_end(&mut data)?;
        if data.len() < 32 {
            return Ok(None);
        }
        let mut values = [0f64; 4];
        BigEndian::read_f64_into(&data[..32], &mut values);
        Ok(Some(Self {
            min: values[0],
            max: values[1],
            mean: values[2],
            stddev: values[3],
        }))
    }

    /// The narrowest pixel type that holds every value between `min` and `max`.
    pub fn pixel_representation(&self, cell_type: CellType) -> PixelRepresentation {
        if cell_type == CellType::Float {
            return PixelRepresentation::F32;
        }
        if fits::<u8>(self.min, self.max) {
            PixelRepresentation::U8
        } else if fits::<i16>(self.min, self.max) {
            PixelRepresentation::I16
        } else {
            PixelRepresentation::I32
        }
    }
}

fn fits<T: NumCast>(min: f64, max: f64) -> bool {
    <T as NumCast>::from(min).is_some() && <T as NumCast>::from(max).is_some()
}

/// Output pixel type a consumer should allocate for a band.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PixelRepresentation {
    U8,
    I16,
    I32,
    F32,
}

/// Everything needed to map cells to tiles and map coordinates to cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_per_row: u32,
    pub tiles_per_column: u32,
    pub cell_type: CellType,
    pub pixel_size_x: f64,
    pub pixel_size_y: f64,
    pub ncols: usize,
    pub nrows: usize,
    pub bounds: GridBounds,
}
impl GridGeometry {
    pub fn new(header: &GridHeader, bounds: GridBounds) -> Result<Self, Error> {
        let ncols = ((bounds.urx - bounds.llx) / header.pixel_size_x + 0.5) as usize;
        let nrows = ((bounds.ury - bounds.lly) / header.pixel_size_y + 0.5) as usize;
        if ncols == 0 || nrows == 0 {
            Err(Error::Corrupt("grid has no cells".into()))?
        }
        header.checked_tile_count()?;
        let tiled_cols = header.tiles_per_row as usize * header.tile_width as usize;
        let tiled_rows = header.tiles_per_column as usize * header.tile_height as usize;
        if ncols > tiled_cols || nrows > tiled_rows {
            Err(Error::Corrupt(format!(
                "{nrows} x {ncols} cells do not fit in {tiled_rows} x {tiled_cols} tiled cells"
            )))?
        }
        Ok(Self {
            tile_width: header.tile_width,
            tile_height: header.tile_height,
            tiles_per_row: header.tiles_per_row,
            tiles_per_column: header.tiles_per_column,
            cell_type: header.cell_type,
            pixel_size_x: header.pixel_size_x,
            pixel_size_y: header.pixel_size_y,
            ncols,
            nrows,
            bounds,
        })
    }
    pub fn num_rows(&self) -> usize {
        self.nrows
    }
    pub fn num_cols(&self) -> usize {
        self.ncols
    }
    pub fn tile_count(&self) -> u32 {
        self.tiles_per_row.saturating_mul(self.tiles_per_column)
    }
    pub fn cells_per_tile(&self) -> usize {
        self.tile_width as usize * self.tile_height as usize
    }
    /// Number of the tile holding the cell at `row`, `col` (row 0 is the top edge).
    pub fn tile_number_of(&self, row: usize, col: usize) -> u32 {
        let tile_index_y = (row / self.tile_height as usize) * self.tiles_per_row as usize;
        (col / self.tile_width as usize + tile_index_y) as u32
    }
    /// Position of the cell at `row`, `col` inside its tile's cell array.
    pub fn offset_in_tile(&self, row: usize, col: usize) -> usize {
        (row % self.tile_height as usize) * self.tile_width as usize
            + col % self.tile_width as usize
    }
    /// Get the x and y coordinates of the centre of the cell at the given row and column,
    /// or nothing if it is out of bounds.
    pub fn index_pos(&self, row: usize, col: usize) -> Option<(f64, f64)> {
        if row >= self.nrows || col >= self.ncols {
            return None;
        }
        let x = self.bounds.min_x() + self.pixel_size_x * (col as f64 + 0.5);
        let y = self.bounds.max_y() - self.pixel_size_y * (row as f64 + 0.5);
        Some((x, y))
    }
    /// Get the row and column of the cell that contains the given x and y,
    /// or nothing if it is out of bounds.
    pub fn index_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let bounds = &self.bounds;
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        if x < bounds.min_x() || x > bounds.max_x() || y < bounds.min_y() || y > bounds.max_y() {
            return None;
        }
        let col = ((x - bounds.min_x()) / self.pixel_size_x) as usize;
        let row = ((bounds.max_y() - y) / self.pixel_size_y) as usize;
        // Points on the right or bottom edge belong to the last cell.
        Some((row.min(self.nrows - 1), col.min(self.ncols - 1)))
    }
}
