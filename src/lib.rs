//! Reader for ARC/INFO binary grid coverages, the tiled raster format stored
//! as a directory of `hdr.adf`, `dblbnd.adf`, `sta.adf`, `w001001x.adf` and
//! `w001001.adf` files.
//!
//! [`BinaryGrid`] opens a coverage and decodes single tiles; [`EsriGridReader`]
//! maps rows, columns and map coordinates onto those tiles.
mod ccitt;
pub mod config;
pub mod decoder;
pub mod error;
pub mod grid;
pub mod header;
pub mod reader;
pub mod tile_header;
pub mod tile_index;
pub mod tile_loader;

pub use config::ReaderConfig;
pub use decoder::{Cell, DecodedTile, FLOAT_NODATA, INT_NODATA, TileStatus, TileType};
pub use error::Error;
pub use grid::BinaryGrid;
pub use header::{CellType, GridBounds, GridGeometry, GridHeader, GridStatistics};
pub use reader::EsriGridReader;

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read, Seek, SeekFrom};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use crate::tile_index::{FILE_MAGIC, TileIndexEntry, TileIndexTable};
    use crate::*;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// An integer tile record, padded to a whole number of words.
    fn int_record(tile_type: u8, min: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut body = vec![tile_type, min.len() as u8];
        body.extend_from_slice(min);
        body.extend_from_slice(payload);
        if body.len() % 2 == 1 {
            body.push(0);
        }
        let mut record = ((body.len() / 2) as u16).to_be_bytes().to_vec();
        record.extend(body);
        record
    }

    fn float_record(values: &[f32]) -> Vec<u8> {
        let mut record = ((values.len() * 2) as u16).to_be_bytes().to_vec();
        for value in values {
            record.extend_from_slice(&value.to_be_bytes());
        }
        record
    }

    /// Lays the records out in a data file and builds the matching index.
    fn data_file(records: &[Option<Vec<u8>>]) -> (Vec<u8>, TileIndexTable) {
        let mut data = vec![0u8; 100];
        data[..4].copy_from_slice(&FILE_MAGIC);
        let mut entries = Vec::new();
        for record in records {
            match record {
                Some(record) => {
                    entries.push(TileIndexEntry {
                        byte_offset: data.len() as u32,
                        byte_size: (record.len() - 2) as u32,
                    });
                    data.extend_from_slice(record);
                }
                None => entries.push(TileIndexEntry {
                    byte_offset: 0,
                    byte_size: 0,
                }),
            }
        }
        (data, TileIndexTable::from_entries(entries))
    }

    /// 8 columns by 4 rows of 10 unit cells in 4x2 cell tiles.
    fn int_header() -> GridHeader {
        GridHeader {
            cell_type: CellType::Integer,
            compressed: true,
            pixel_size_x: 10.0,
            pixel_size_y: 10.0,
            ref_x: 0.0,
            ref_y: 40.0,
            tiles_per_row: 2,
            tiles_per_column: 2,
            tile_width: 4,
            tile_height: 2,
        }
    }

    fn int_records() -> Vec<Option<Vec<u8>>> {
        vec![
            Some(int_record(0x00, &[5], &[])),
            Some(int_record(0x08, &[100], &[0, 1, 2, 3, 4, 5, 6, 7])),
            None,
            Some(int_record(0xF8, &[], &[3, 1, 5, 2])),
        ]
    }

    // Expected cells, top row first.
    const N: i32 = INT_NODATA;
    const INT_CELLS: [[i32; 8]; 4] = [
        [5, 5, 5, 5, 100, 101, 102, 103],
        [5, 5, 5, 5, 104, 105, 106, 107],
        [N, N, N, N, 1, 1, 1, 2],
        [N, N, N, N, 2, 2, 2, 2],
    ];

    fn int_grid() -> BinaryGrid<Cursor<Vec<u8>>> {
        let (data, index) = data_file(&int_records());
        let bounds = GridBounds::new(0.0, 0.0, 80.0, 40.0).unwrap();
        BinaryGrid::from_parts(int_header(), bounds, None, index, Cursor::new(data)).unwrap()
    }

    fn int_reader() -> EsriGridReader<Cursor<Vec<u8>>> {
        EsriGridReader::from_grid(int_grid(), ReaderConfig::default())
    }

    fn float_reader() -> EsriGridReader<Cursor<Vec<u8>>> {
        let header = GridHeader {
            cell_type: CellType::Float,
            tiles_per_row: 1,
            tiles_per_column: 1,
            tile_width: 2,
            tile_height: 2,
            ..int_header()
        };
        let (data, index) = data_file(&[Some(float_record(&[1.5, -f32::MAX, 2.25, 0.0]))]);
        let bounds = GridBounds::new(0.0, 0.0, 20.0, 20.0).unwrap();
        let grid = BinaryGrid::from_parts(header, bounds, None, index, Cursor::new(data)).unwrap();
        EsriGridReader::from_grid(grid, ReaderConfig::default().with_float_nodata(-9999.0))
    }

    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        bytes_read: Arc<AtomicUsize>,
    }
    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.bytes_read.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }
    impl Seek for CountingReader {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_get_index() {
        init_logger();
        let mut grid = int_reader();
        assert_eq!(grid.num_rows(), 4);
        assert_eq!(grid.num_cols(), 8);
        for (row, cells) in INT_CELLS.iter().enumerate() {
            for (col, &expected) in cells.iter().enumerate() {
                assert_eq!(grid.get_index(row, col).unwrap(), f64::from(expected), "cell ({row}, {col})");
            }
        }
        assert_eq!(grid.get_index(2, 0).unwrap(), grid.no_data_value());

        // Check the bounds
        assert!(grid.get_index(0, grid.num_cols() - 1).is_ok());
        assert!(grid.get_index(grid.num_rows() - 1, 0).is_ok());
        assert!(matches!(grid.get_index(0, 8), Err(Error::OutOfBounds(0, 8))));
        assert!(grid.get_index(4, 0).is_err());
    }

    #[test]
    fn test_cache_off_matches_cache_on() {
        let mut cached = int_reader();
        let mut uncached = EsriGridReader::from_grid(int_grid(), ReaderConfig::default().with_cache_tiles(false));
        for row in 0..4 {
            for col in 0..8 {
                assert_eq!(cached.get_index(row, col).unwrap(), uncached.get_index(row, col).unwrap());
            }
        }
        cached.clear_cache();
        assert_eq!(cached.get_index(1, 5).unwrap(), 105.0);
    }

    #[test]
    fn test_stored_nodata_uses_configured_value() {
        let header = GridHeader {
            tiles_per_row: 1,
            tiles_per_column: 1,
            tile_width: 2,
            tile_height: 2,
            ..int_header()
        };
        let mut payload = Vec::new();
        for value in [INT_NODATA, 7, 7, 7] {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        let (data, index) = data_file(&[Some(int_record(0x20, &[], &payload))]);
        let bounds = GridBounds::new(0.0, 0.0, 20.0, 20.0).unwrap();
        let grid = BinaryGrid::from_parts(header, bounds, None, index, Cursor::new(data)).unwrap();
        let mut grid = EsriGridReader::from_grid(grid, ReaderConfig::default().with_int_nodata(-9999));
        assert_eq!(grid.no_data_value(), -9999.0);
        assert_eq!(grid.get_index(0, 0).unwrap(), -9999.0);
        assert_eq!(grid.get_index(1, 1).unwrap(), 7.0);
        assert_eq!(grid.get_interpolate(10.0, 10.0), Some(-9999.0));
    }

    #[test]
    fn test_tile_count_overflow_is_corruption() {
        let header = GridHeader {
            tiles_per_row: 70_000,
            tiles_per_column: 70_000,
            ..int_header()
        };
        let (data, index) = data_file(&int_records());
        let bounds = GridBounds::new(0.0, 0.0, 80.0, 40.0).unwrap();
        let result = BinaryGrid::from_parts(header, bounds, None, index, Cursor::new(data));
        assert!(result.is_err_and(|err| err.is_format_corruption()));
    }

    #[test]
    fn test_configured_nodata() {
        let mut grid = EsriGridReader::from_grid(int_grid(), ReaderConfig::default().with_int_nodata(-9999));
        assert_eq!(grid.no_data_value(), -9999.0);
        assert_eq!(grid.get_index(3, 3).unwrap(), -9999.0);
        assert_eq!(grid.get_index(3, 4).unwrap(), 2.0);
    }

    #[test]
    fn test_get() {
        let mut grid = int_reader();
        assert_eq!(grid.get(5.0, 35.0), Some(5.0));
        assert_eq!(grid.get(45.0, 35.0), Some(100.0));
        assert_eq!(grid.get(75.0, 5.0), Some(2.0));
        assert_eq!(grid.get(15.0, 15.0), Some(f64::from(INT_NODATA)));

        // Check the bounds
        let (min_x, min_y, max_x, max_y) = (grid.min_x(), grid.min_y(), grid.max_x(), grid.max_y());
        let cell_size = grid.cell_size();
        assert_eq!(grid.get(min_x, max_y), Some(5.0));
        assert_eq!(grid.get(max_x, max_y), Some(103.0));
        assert_eq!(grid.get(max_x, min_y), Some(2.0));
        assert!(grid.get(min_x - cell_size, min_y).is_none());
        assert!(grid.get(max_x + cell_size, max_y).is_none());
        assert!(grid.get(max_x, max_y + cell_size).is_none());
    }

    #[test]
    fn test_index_of() {
        let grid = int_reader();
        assert_eq!(grid.index_of(grid.min_x(), grid.max_y()), Some((0, 0)));
        assert_eq!(grid.index_of(grid.max_x(), grid.min_y()), Some((3, 7)));
        assert_eq!(grid.index_of(45.0, 35.0), Some((0, 4)));
        assert_eq!(grid.index_pos(0, 4), Some((45.0, 35.0)));
        assert_eq!(grid.index_pos(4, 0), None);
        assert_eq!(grid.index_of(f64::NAN, 35.0), None);
    }

    #[test]
    fn test_non_finite_coordinates() {
        let mut grid = int_reader();
        assert!(grid.get(f64::NAN, 35.0).is_none());
        assert!(grid.get(45.0, f64::NAN).is_none());
        assert!(grid.get_interpolate(f64::NAN, f64::NAN).is_none());
        assert!(grid.get(f64::NEG_INFINITY, 35.0).is_none());
    }

    #[test]
    fn test_get_interp() {
        let mut grid = int_reader();
        // On a cell centre
        assert_eq!(grid.get_interpolate(45.0, 35.0), Some(100.0));
        // Halfway between four centres
        assert_eq!(grid.get_interpolate(50.0, 30.0), Some(102.5));
        // A quarter of the way from the centre of (0, 4) towards (1, 5)
        let expected = 100.0 * 0.5625 + 101.0 * 0.1875 + 104.0 * 0.1875 + 105.0 * 0.0625;
        assert_eq!(grid.get_interpolate(47.5, 32.5), Some(expected));
        // Corners clamp to the corner cell
        assert_eq!(grid.get_interpolate(0.0, 40.0), Some(5.0));
        assert_eq!(grid.get_interpolate(80.0, 0.0), Some(2.0));
        // Any nodata neighbour gives nodata
        assert_eq!(grid.get_interpolate(15.0, 20.0), Some(f64::from(INT_NODATA)));
        assert!(grid.get_interpolate(-1.0, 20.0).is_none());
        assert!(grid.get_interpolate(20.0, 41.0).is_none());
    }

    #[test]
    fn test_read_block() {
        let mut grid = int_reader();
        let block = grid.read_block(1, 2, 2, 4).unwrap();
        assert_eq!(block, vec![5.0, 5.0, 104.0, 105.0, f64::from(N), f64::from(N), 1.0, 1.0]);
        assert_eq!(grid.read_block(0, 0, 4, 8).unwrap().len(), 32);
        assert!(matches!(grid.read_block(3, 0, 2, 1), Err(Error::OutOfBounds(5, 1))));
        assert!(grid.read_block(0, 7, 1, 2).is_err());
        assert!(grid.read_block(0, 0, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_iter() {
        let grid = int_reader();
        let grid_size = grid.num_rows() * grid.num_cols();
        let mut num_elements = 0;
        let mut expected_pos = (0, 0);
        for cell in grid {
            let (row, col, value) = cell.unwrap();
            assert_eq!((row, col), expected_pos);
            assert_eq!(value, f64::from(INT_CELLS[row][col]));
            num_elements += 1;
            expected_pos = if col == 7 { (row + 1, 0) } else { (row, col + 1) };
        }
        assert_eq!(grid_size, num_elements);
    }

    #[test]
    fn test_iter_halts_on_corrupt_tile() {
        let mut records = int_records();
        records[3] = Some(int_record(0x08, &[1, 2, 3, 4, 5], &[0; 8]));
        let (data, index) = data_file(&records);
        let bounds = GridBounds::new(0.0, 0.0, 80.0, 40.0).unwrap();
        let grid = BinaryGrid::from_parts(int_header(), bounds, None, index, Cursor::new(data)).unwrap();
        let cells: Vec<_> = EsriGridReader::from_grid(grid, ReaderConfig::default())
            .into_iter()
            .collect();
        // The first tile row decodes, then the corrupt tile ends the scan.
        assert_eq!(cells.len(), 17);
        assert!(cells[..16].iter().all(Result::is_ok));
        assert!(matches!(cells[16], Err(Error::BadMinFieldSize(5))));
    }

    #[test]
    fn test_corrupt_tile_is_an_error() {
        let mut records = int_records();
        records[1] = Some(int_record(0x08, &[0, 0, 0, 0, 0, 0], &[0; 8]));
        let (data, index) = data_file(&records);
        let bounds = GridBounds::new(0.0, 0.0, 80.0, 40.0).unwrap();
        let grid = BinaryGrid::from_parts(int_header(), bounds, None, index, Cursor::new(data)).unwrap();
        let mut reader = EsriGridReader::from_grid(grid, ReaderConfig::default());
        let err = reader.get_index(0, 4).unwrap_err();
        assert!(err.is_format_corruption());
        assert_eq!(reader.get_index(0, 0).unwrap(), 5.0);
        assert!(reader.get(45.0, 35.0).is_none());
    }

    #[test]
    fn test_absent_tile_reads_nothing() {
        init_logger();
        let (data, index) = data_file(&int_records());
        let bytes_read = Arc::new(AtomicUsize::new(0));
        let data = CountingReader {
            inner: Cursor::new(data),
            bytes_read: Arc::clone(&bytes_read),
        };
        let bounds = GridBounds::new(0.0, 0.0, 80.0, 40.0).unwrap();
        let grid = BinaryGrid::from_parts(int_header(), bounds, None, index, data).unwrap();

        let before = bytes_read.load(Ordering::SeqCst);
        let tile = grid.decode_tile(2, -1i32).unwrap();
        assert_eq!(bytes_read.load(Ordering::SeqCst), before);
        assert_eq!(tile.status, TileStatus::Absent);
        assert_eq!(tile.cells, vec![-1; 8]);

        let tile = grid.decode_tile(3, -1i32).unwrap();
        assert!(bytes_read.load(Ordering::SeqCst) > before);
        assert_eq!(tile.status, TileStatus::Decoded);
        assert_eq!(tile.cells, vec![1, 1, 1, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_unreadable_tile_is_nodata() {
        init_logger();
        let (data, _) = data_file(&int_records());
        let mut entries = vec![
            TileIndexEntry {
                byte_offset: 0,
                byte_size: 0,
            };
            4
        ];
        entries[0] = TileIndexEntry {
            byte_offset: 100,
            byte_size: 4,
        };
        entries[1] = TileIndexEntry {
            byte_offset: 10_000,
            byte_size: 20,
        };
        let bounds = GridBounds::new(0.0, 0.0, 80.0, 40.0).unwrap();
        let grid = BinaryGrid::from_parts(int_header(), bounds, None, TileIndexTable::from_entries(entries), Cursor::new(data)).unwrap();
        let tile = grid.decode_tile(1, INT_NODATA).unwrap();
        assert_eq!(tile.status, TileStatus::Failed);
        assert!(tile.cells.iter().all(|&v| v == INT_NODATA));
        assert_eq!(grid.decode_tile(0, INT_NODATA).unwrap().cells, vec![5; 8]);
    }

    #[test]
    fn test_decode_tile_checks() {
        let grid = int_grid();
        assert!(matches!(
            grid.decode_tile(0, 0.0f32),
            Err(Error::MismatchedCellType {
                grid: CellType::Integer,
                requested: CellType::Float
            })
        ));
        assert!(matches!(grid.decode_tile(4, 0i32), Err(Error::TileOutOfRange(4, 4))));
        let tile = grid.decode_tile(1, 0i32).unwrap();
        assert_eq!(tile.get(1, 3), Some(107));
        assert_eq!(tile.get(2, 0), None);
    }

    #[test]
    fn test_bad_data_file_magic() {
        let (mut data, index) = data_file(&int_records());
        data[3] = 0x0B;
        let bounds = GridBounds::new(0.0, 0.0, 80.0, 40.0).unwrap();
        let result = BinaryGrid::from_parts(int_header(), bounds, None, index, Cursor::new(data));
        assert!(matches!(result, Err(Error::BadMagic { file: "w001001.adf" })));
    }

    #[test]
    fn test_float_grid() {
        let mut grid = float_reader();
        assert_eq!(grid.no_data_value(), -9999.0);
        assert_eq!(grid.get_index(0, 0).unwrap(), 1.5);
        assert_eq!(grid.get_index(0, 1).unwrap(), -9999.0);
        assert_eq!(grid.get_index(1, 0).unwrap(), 2.25);
        assert_eq!(grid.get_index(1, 1).unwrap(), 0.0);
        assert_eq!(grid.get(15.0, 5.0), Some(0.0));
        assert_eq!(grid.get_interpolate(10.0, 10.0), Some(-9999.0));
        assert!(matches!(
            grid.grid().decode_tile(0, 0i32),
            Err(Error::MismatchedCellType { .. })
        ));
    }

    #[test]
    fn test_concurrent_decode() {
        let grid = Arc::new(int_grid());
        let expected: Vec<_> = (0..4).map(|n| grid.decode_tile(n, INT_NODATA).unwrap()).collect();
        let expected = Arc::new(expected);
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let grid = Arc::clone(&grid);
                let expected = Arc::clone(&expected);
                thread::spawn(move || {
                    for j in 0..100u32 {
                        let n = (i + j) % 4;
                        let tile = grid.decode_tile(n, INT_NODATA).unwrap();
                        assert_eq!(tile, expected[n as usize]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_open_directory() {
        init_logger();
        let dir = std::env::temp_dir().join(format!("arcinfo_grid_open_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let (data, index) = data_file(&int_records());
        let bounds = GridBounds::new(0.0, 0.0, 80.0, 40.0).unwrap();
        let mut statistics = Vec::new();
        for value in [1.0f64, 107.0, 40.5, 12.25] {
            statistics.extend_from_slice(&value.to_be_bytes());
        }
        std::fs::write(dir.join("hdr.adf"), int_header().to_bytes()).unwrap();
        std::fs::write(dir.join("dblbnd.adf"), bounds.to_bytes()).unwrap();
        std::fs::write(dir.join("sta.adf"), statistics).unwrap();
        std::fs::write(dir.join("w001001x.adf"), index.to_bytes()).unwrap();
        // Some coverages carry upper case file names.
        std::fs::write(dir.join("W001001.ADF"), data).unwrap();

        let mut grid = EsriGridReader::open(&dir).unwrap();
        assert_eq!(grid.grid().header(), &int_header());
        assert_eq!(grid.grid().statistics().map(|s| s.max), Some(107.0));
        assert_eq!(grid.grid().tile_index().len(), 4);
        assert_eq!(grid.get_index(1, 7).unwrap(), 107.0);
        assert_eq!(grid.get_index(2, 0).unwrap(), f64::from(INT_NODATA));

        std::fs::remove_file(dir.join("sta.adf")).unwrap();
        let grid = BinaryGrid::open(&dir).unwrap();
        assert!(grid.statistics().is_none());

        std::fs::remove_file(dir.join("hdr.adf")).unwrap();
        assert!(matches!(BinaryGrid::open(&dir), Err(Error::Io(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
