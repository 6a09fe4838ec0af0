use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use crate::config::ReaderConfig;
use crate::decoder::Cell;
use crate::error::Error;
use crate::grid::BinaryGrid;
use crate::header::{CellType, GridGeometry};

/// Cell values of one tile, widened to `f64`.
type TileValues = Arc<[f64]>;

/// Reads cell values out of a binary grid by row and column or by map coordinate.
///
/// Row 0 is the top edge of the raster, column 0 the left edge. Every value is
/// returned as `f64`; cells without data hold [`EsriGridReader::no_data_value`].
pub struct EsriGridReader<R> {
    grid: BinaryGrid<R>,
    config: ReaderConfig,
    tile_cache: HashMap<u32, TileValues>,
}

impl EsriGridReader<File> {
    /// Opens the coverage directory `dir` with the default [`ReaderConfig`].
    ///
    /// # Examples
    /// ```rust,no_run
    /// use arcinfo_grid::EsriGridReader;
    /// let mut grid = EsriGridReader::open("data/elevation").unwrap();
    /// let value = grid.get_index(0, 0).unwrap();
    /// if value == grid.no_data_value() {
    ///     println!("no data in the top left cell");
    /// }
    /// ```
    /// # Errors
    /// Returns an error if the coverage files are missing or corrupt.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with_config(dir, ReaderConfig::default())
    }

    pub fn open_with_config(dir: impl AsRef<Path>, config: ReaderConfig) -> Result<Self, Error> {
        Ok(Self::from_grid(BinaryGrid::open(dir)?, config))
    }
}

impl<R: Read + Seek> EsriGridReader<R> {
    pub fn from_grid(grid: BinaryGrid<R>, config: ReaderConfig) -> Self {
        Self {
            grid,
            config,
            tile_cache: HashMap::new(),
        }
    }

    pub fn grid(&self) -> &BinaryGrid<R> {
        &self.grid
    }
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }
    pub fn geometry(&self) -> &GridGeometry {
        self.grid.geometry()
    }
    pub fn num_rows(&self) -> usize {
        self.geometry().num_rows()
    }
    pub fn num_cols(&self) -> usize {
        self.geometry().num_cols()
    }
    pub fn min_x(&self) -> f64 {
        self.geometry().bounds.min_x()
    }
    pub fn max_x(&self) -> f64 {
        self.geometry().bounds.max_x()
    }
    pub fn min_y(&self) -> f64 {
        self.geometry().bounds.min_y()
    }
    pub fn max_y(&self) -> f64 {
        self.geometry().bounds.max_y()
    }
    pub fn cell_size(&self) -> f64 {
        self.geometry().pixel_size_x
    }
    pub fn index_pos(&self, row: usize, col: usize) -> Option<(f64, f64)> {
        self.geometry().index_pos(row, col)
    }
    pub fn index_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        self.geometry().index_of(x, y)
    }

    /// The value returned for cells that hold no data.
    pub fn no_data_value(&self) -> f64 {
        match self.geometry().cell_type {
            CellType::Integer => f64::from(self.config.int_nodata),
            CellType::Float => f64::from(self.config.float_nodata),
        }
    }

    /// Returns the value at the given row and column.
    ///
    /// # Errors
    /// Returns an error if the row or column is out of bounds or the tile
    /// holding the cell is corrupt. A tile that cannot be read yields nodata.
    pub fn get_index(&mut self, row: usize, col: usize) -> Result<f64, Error> {
        if row >= self.num_rows() || col >= self.num_cols() {
            Err(Error::OutOfBounds(row, col))?
        }
        let tile_number = self.geometry().tile_number_of(row, col);
        let offset = self.geometry().offset_in_tile(row, col);
        let values = self.tile(tile_number)?;
        Ok(values[offset])
    }

    /// Returns the value of the cell containing the given x and y,
    /// or nothing if the point is outside the raster or its tile is corrupt.
    pub fn get(&mut self, x: f64, y: f64) -> Option<f64> {
        let (row, col) = self.index_of(x, y)?;
        self.get_index(row, col).ok()
    }

    /// Returns the value at the given x and y, interpolated bilinearly from
    /// the four nearest cell centres.
    ///
    /// Points within half a cell of the edge use the edge cells. If any of
    /// the four cells holds no data, the nodata value is returned.
    pub fn get_interpolate(&mut self, x: f64, y: f64) -> Option<f64> {
        use num_traits::NumCast;

        let geometry = *self.geometry();
        self.index_of(x, y)?;
        let max_col = geometry.num_cols() - 1;
        let max_row = geometry.num_rows() - 1;

        let col_pos = ((x - self.min_x()) / geometry.pixel_size_x - 0.5).clamp(0.0, max_col as f64);
        let row_pos = ((self.max_y() - y) / geometry.pixel_size_y - 0.5).clamp(0.0, max_row as f64);
        let left = <usize as NumCast>::from(col_pos.floor())?.min(max_col.saturating_sub(1));
        let top = <usize as NumCast>::from(row_pos.floor())?.min(max_row.saturating_sub(1));
        let right = (left + 1).min(max_col);
        let bottom = (top + 1).min(max_row);

        let ul = self.get_index(top, left).ok()?;
        let ur = self.get_index(top, right).ok()?;
        let ll = self.get_index(bottom, left).ok()?;
        let lr = self.get_index(bottom, right).ok()?;
        let nodata = self.no_data_value();
        if [ul, ur, ll, lr].contains(&nodata) {
            return Some(nodata);
        }

        let horiz_weight = col_pos - left as f64;
        let vert_weight = row_pos - top as f64;
        let value = ul * (1.0 - horiz_weight) * (1.0 - vert_weight)
            + ur * horiz_weight * (1.0 - vert_weight)
            + ll * (1.0 - horiz_weight) * vert_weight
            + lr * horiz_weight * vert_weight;
        Some(value)
    }

    /// Returns `nrows * ncols` values starting at `row`, `col`, row by row.
    ///
    /// # Errors
    /// Returns an error if the block reaches past the raster or a tile is corrupt.
    pub fn read_block(&mut self, row: usize, col: usize, nrows: usize, ncols: usize) -> Result<Vec<f64>, Error> {
        let end_row = row.checked_add(nrows).filter(|&end| end <= self.num_rows());
        let end_col = col.checked_add(ncols).filter(|&end| end <= self.num_cols());
        let (Some(end_row), Some(end_col)) = (end_row, end_col) else {
            return Err(Error::OutOfBounds(row.saturating_add(nrows), col.saturating_add(ncols)));
        };

        let geometry = *self.geometry();
        let mut tiles: HashMap<u32, TileValues> = HashMap::new();
        let mut block = Vec::with_capacity(nrows * ncols);
        for r in row..end_row {
            for c in col..end_col {
                let tile_number = geometry.tile_number_of(r, c);
                let values = match tiles.get(&tile_number) {
                    Some(values) => Arc::clone(values),
                    None => {
                        let values = self.tile(tile_number)?;
                        tiles.insert(tile_number, Arc::clone(&values));
                        values
                    }
                };
                block.push(values[geometry.offset_in_tile(r, c)]);
            }
        }
        Ok(block)
    }

    /// Drops every cached tile.
    pub fn clear_cache(&mut self) {
        self.tile_cache.clear();
    }

    fn tile(&mut self, tile_number: u32) -> Result<TileValues, Error> {
        if let Some(values) = self.tile_cache.get(&tile_number) {
            return Ok(Arc::clone(values));
        }
        let values = self.decode(tile_number)?;
        if self.config.cache_tiles {
            self.tile_cache.insert(tile_number, Arc::clone(&values));
        }
        Ok(values)
    }

    fn decode(&self, tile_number: u32) -> Result<TileValues, Error> {
        match self.geometry().cell_type {
            CellType::Integer => decode_as_f64(&self.grid, tile_number, self.config.int_nodata),
            CellType::Float => decode_as_f64(&self.grid, tile_number, self.config.float_nodata),
        }
    }
}

fn decode_as_f64<R: Read + Seek, T: Cell>(grid: &BinaryGrid<R>, tile_number: u32, nodata: T) -> Result<TileValues, Error> {
    use num_traits::NumCast;

    let tile = grid.decode_tile(tile_number, nodata)?;
    Ok(tile
        .cells
        .into_iter()
        .map(|value| <f64 as NumCast>::from(value).unwrap_or(f64::NAN))
        .collect())
}

impl<R: Read + Seek> IntoIterator for EsriGridReader<R> {
    type Item = Result<(usize, usize, f64), Error>;
    type IntoIter = GridCellIterator<R>;
    /// Returns an iterator over the values in the raster.
    /// The iterator scans the raster from left to right, top to bottom,
    /// decoding one row of tiles at a time.
    ///
    /// If an error is encountered at any point, the iterator will return an
    /// `Err` once and halt.
    ///
    /// ```rust,no_run
    /// use arcinfo_grid::EsriGridReader;
    /// let grid = EsriGridReader::open("data/elevation").unwrap();
    /// let nodata = grid.no_data_value();
    /// let mut sum = 0.0;
    /// for cell in grid {
    ///     let Ok((_row, _col, value)) = cell else {
    ///         panic!("your error handler")
    ///     };
    ///     if value != nodata {
    ///         sum += value;
    ///     }
    /// }
    /// println!("{sum}");
    /// ```
    fn into_iter(self) -> Self::IntoIter {
        GridCellIterator {
            reader: self,
            strip: Vec::new(),
            strip_row: None,
            row: 0,
            col: 0,
            terminated: false,
        }
    }
}

pub struct GridCellIterator<R> {
    reader: EsriGridReader<R>,
    /// Decoded tiles of the tile row holding `row`.
    strip: Vec<TileValues>,
    strip_row: Option<usize>,
    row: usize,
    col: usize,
    terminated: bool,
}
impl<R: Read + Seek> GridCellIterator<R> {
    fn load_strip(&mut self, tile_row: usize) -> Result<Vec<TileValues>, Error> {
        let geometry = self.reader.geometry();
        // Only the tiles that hold cells; trailing tile columns may be empty.
        let used_tiles = geometry.num_cols().div_ceil(geometry.tile_width as usize) as u32;
        let first = tile_row as u32 * geometry.tiles_per_row;
        (first..first + used_tiles)
            .map(|tile_number| match self.reader.tile_cache.get(&tile_number) {
                Some(values) => Ok(Arc::clone(values)),
                None => self.reader.decode(tile_number),
            })
            .collect()
    }
}
impl<R: Read + Seek> Iterator for GridCellIterator<R> {
    type Item = Result<(usize, usize, f64), Error>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.terminated {
            return None;
        }
        let geometry = *self.reader.geometry();
        if self.col >= geometry.num_cols() {
            self.row += 1;
            self.col = 0;
        }
        if self.row >= geometry.num_rows() {
            self.terminated = true;
            self.strip.clear();
            return None;
        }

        let tile_row = self.row / geometry.tile_height as usize;
        if self.strip_row != Some(tile_row) {
            match self.load_strip(tile_row) {
                Ok(strip) => {
                    self.strip = strip;
                    self.strip_row = Some(tile_row);
                }
                Err(error) => {
                    self.terminated = true;
                    return Some(Err(error));
                }
            }
        }

        let (row, col) = (self.row, self.col);
        let value = self.strip[col / geometry.tile_width as usize][geometry.offset_in_tile(row, col)];
        self.col += 1;
        Some(Ok((row, col, value)))
    }
}
