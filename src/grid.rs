use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::Path;

use log::{debug, info, warn};

use crate::decoder::{Cell, DecodedTile, TileStatus};
use crate::error::Error;
use crate::header::{GridBounds, GridGeometry, GridHeader, GridStatistics};
use crate::tile_index::{FILE_MAGIC, TileIndexTable};
use crate::tile_loader::TileByteLoader;

pub const HEADER_FILE: &str = "hdr.adf";
pub const BOUNDS_FILE: &str = "dblbnd.adf";
pub const STATISTICS_FILE: &str = "sta.adf";
pub const TILE_INDEX_FILE: &str = "w001001x.adf";
pub const DATA_FILE: &str = "w001001.adf";

/// An open coverage: its metadata, tile index and raster data file.
///
/// Every method takes `&self`, so one grid can serve decode requests from
/// several threads at once.
pub struct BinaryGrid<R> {
    header: GridHeader,
    geometry: GridGeometry,
    statistics: Option<GridStatistics>,
    index: TileIndexTable,
    loader: TileByteLoader<R>,
}

impl BinaryGrid<File> {
    /// Opens the coverage stored in the directory `dir`.
    ///
    /// `sta.adf` is optional; every other file must be present.
    ///
    /// # Errors
    /// Returns an error if a file is missing or one of the fixed headers is corrupt.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let header = GridHeader::from_reader(&mut open_component(dir, HEADER_FILE)?)?;
        let bounds = GridBounds::from_reader(&mut open_component(dir, BOUNDS_FILE)?)?;
        let statistics = match open_component(dir, STATISTICS_FILE) {
            Ok(mut file) => GridStatistics::from_reader(&mut file)?,
            Err(err) => {
                debug!("no statistics for {}: {err}", dir.display());
                None
            }
        };
        let index = TileIndexTable::from_reader(&mut open_component(dir, TILE_INDEX_FILE)?)?;
        let data = open_component(dir, DATA_FILE)?;

        let grid = Self::from_parts(header, bounds, statistics, index, data)?;
        info!(
            "opened {}: {} x {} {:?} cells in {} tiles",
            dir.display(),
            grid.geometry.num_rows(),
            grid.geometry.num_cols(),
            grid.geometry.cell_type,
            grid.index.len()
        );
        Ok(grid)
    }
}

/// Coverage file names are lower case, but some copies have them upper case.
fn open_component(dir: &Path, name: &str) -> io::Result<File> {
    File::open(dir.join(name)).or_else(|_| File::open(dir.join(name.to_uppercase())))
}

impl<R: Read + Seek> BinaryGrid<R> {
    /// Assembles a grid from already parsed metadata and a raster data reader.
    ///
    /// # Errors
    /// Returns an error if the bounds do not fit the tile layout or the data
    /// reader does not hold a raster data file.
    pub fn from_parts(
        header: GridHeader,
        bounds: GridBounds,
        statistics: Option<GridStatistics>,
        index: TileIndexTable,
        data: R,
    ) -> Result<Self, Error> {
        let geometry = GridGeometry::new(&header, bounds)?;
        let loader = TileByteLoader::new(data);
        if loader.positioned_read(0, FILE_MAGIC.len())? != FILE_MAGIC {
            Err(Error::BadMagic { file: DATA_FILE })?
        }
        if index.len() > geometry.tile_count() as usize {
            debug!(
                "tile index has {} records for {} tiles",
                index.len(),
                geometry.tile_count()
            );
        }
        Ok(Self {
            header,
            geometry,
            statistics,
            index,
            loader,
        })
    }

    pub fn header(&self) -> &GridHeader {
        &self.header
    }
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }
    pub fn statistics(&self) -> Option<&GridStatistics> {
        self.statistics.as_ref()
    }
    pub fn tile_index(&self) -> &TileIndexTable {
        &self.index
    }

    /// Decodes one tile into a fresh buffer of `tile_width * tile_height` cells.
    ///
    /// A tile without a record, one whose bytes cannot be read and one with an
    /// unknown encoding all come back filled with `nodata`; see [`DecodedTile::status`].
    ///
    /// # Errors
    /// Returns an error if `T` is not the grid's cell type, the tile number is
    /// outside the grid, or the tile record shows the data file is corrupt.
    pub fn decode_tile<T: Cell>(&self, tile_number: u32, nodata: T) -> Result<DecodedTile<T>, Error> {
        if T::CELL_TYPE != self.geometry.cell_type {
            Err(Error::MismatchedCellType {
                grid: self.geometry.cell_type,
                requested: T::CELL_TYPE,
            })?
        }
        if tile_number >= self.geometry.tile_count() {
            Err(Error::TileOutOfRange(tile_number, self.geometry.tile_count()))?
        }
        let width = self.geometry.tile_width as usize;
        let height = self.geometry.tile_height as usize;

        let Some(entry) = self.index.lookup(tile_number) else {
            debug!("tile {tile_number} has no data");
            return Ok(DecodedTile::filled(tile_number, width, height, nodata, TileStatus::Absent));
        };
        let record = match self.loader.load_tile(entry) {
            Ok(record) => record,
            Err(err) => {
                warn!("tile {tile_number}: could not read {entry:?}: {err}; filling with nodata");
                return Ok(DecodedTile::filled(tile_number, width, height, nodata, TileStatus::Failed));
            }
        };
        T::decode_record(tile_number, &record, width, height, nodata)
    }

    pub fn into_data(self) -> R {
        self.loader.into_inner()
    }
}
