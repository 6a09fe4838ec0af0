use std::io::{Read, Seek, SeekFrom};

use parking_lot::Mutex;

use crate::error::Error;
use crate::tile_index::TileIndexEntry;

/// Size of the word count that opens every tile record.
pub const RECORD_PREFIX_LEN: usize = 2;

/// Positioned reads of tile records from the raster data file, `w001001.adf`.
///
/// The handle is shared between decode threads; each read seeks and reads
/// under one lock so concurrent requests cannot interleave their seeks.
pub struct TileByteLoader<R> {
    data: Mutex<R>,
}
impl<R: Read + Seek> TileByteLoader<R> {
    pub fn new(data: R) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    /// Reads the record of one tile, including its two byte size prefix.
    pub fn load_tile(&self, entry: TileIndexEntry) -> Result<Vec<u8>, Error> {
        let length = entry.byte_size as usize + RECORD_PREFIX_LEN;
        self.positioned_read(u64::from(entry.byte_offset), length)
    }

    pub fn positioned_read(&self, offset: u64, length: usize) -> Result<Vec<u8>, Error> {
        let mut buffer = vec![0u8; length];
        let mut data = self.data.lock();
        data.seek(SeekFrom::Start(offset))?;
        data.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub fn into_inner(self) -> R {
        self.data.into_inner()
    }
}
