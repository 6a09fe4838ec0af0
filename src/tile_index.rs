use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::error::Error;

/// Both `w001001x.adf` and `w001001.adf` open with a 100 byte header.
pub const FILE_HEADER_LEN: u64 = 100;
pub const FILE_MAGIC: [u8; 4] = [0x00, 0x00, 0x27, 0x0A];
const OFFSET_FILE_LENGTH: u64 = 24;
const RECORD_LEN: u64 = 8;

/// Location of one tile record inside the raster data file, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileIndexEntry {
    pub byte_offset: u32,
    pub byte_size: u32,
}

/// Tile number to record location, read once from `w001001x.adf`.
#[derive(Debug, Clone, Default)]
pub struct TileIndexTable {
    entries: Vec<TileIndexEntry>,
}
impl TileIndexTable {
    pub fn from_entries(entries: Vec<TileIndexEntry>) -> Self {
        Self { entries }
    }

    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> Result<Self, Error> {
        reader.rewind()?;
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != FILE_MAGIC {
            Err(Error::BadMagic { file: "w001001x.adf" })?
        }

        reader.seek(SeekFrom::Start(OFFSET_FILE_LENGTH))?;
        let length_words = reader.read_i32::<BigEndian>()?;
        let length = i64::from(length_words) * 2;
        if length < FILE_HEADER_LEN as i64 {
            Err(Error::Corrupt(format!(
                "tile index declares {length} bytes, shorter than its header"
            )))?
        }
        let record_count = (length as u64 - FILE_HEADER_LEN) / RECORD_LEN;
        let stream_len = reader.seek(SeekFrom::End(0))?;
        if length as u64 > stream_len {
            Err(Error::Corrupt(format!(
                "tile index declares {length} bytes but holds {stream_len}"
            )))?
        }

        reader.seek(SeekFrom::Start(FILE_HEADER_LEN))?;
        let mut raw = vec![0u8; (record_count * RECORD_LEN) as usize];
        reader.read_exact(&mut raw).map_err(|err| {
            Error::Corrupt(format!(
                "tile index declares {record_count} records but is truncated: {err}"
            ))
        })?;

        let entries = raw
            .chunks_exact(RECORD_LEN as usize)
            .enumerate()
            .map(|(tile, record)| -> Result<TileIndexEntry, Error> {
                let offset = BigEndian::read_i32(&record[..4]);
                let size = BigEndian::read_i32(&record[4..]);
                if offset < 0 || size < 0 {
                    Err(Error::Corrupt(format!(
                        "tile {tile} has offset {offset} and size {size}"
                    )))?
                }
                // Both fields count 16 bit words.
                Ok(TileIndexEntry {
                    byte_offset: offset as u32 * 2,
                    byte_size: size as u32 * 2,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self { entries })
    }

    /// Where the record of `tile_number` lives, or nothing if no data was written for it.
    pub fn lookup(&self, tile_number: u32) -> Option<TileIndexEntry> {
        self.entries
            .get(tile_number as usize)
            .copied()
            .filter(|entry| entry.byte_size > 0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the table into the `w001001x.adf` layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let length = FILE_HEADER_LEN as usize + self.entries.len() * RECORD_LEN as usize;
        let mut data = vec![0u8; length];
        data[..4].copy_from_slice(&FILE_MAGIC);
        BigEndian::write_u32(&mut data[OFFSET_FILE_LENGTH as usize..], (length / 2) as u32);
        for (entry, record) in self
            .entries
            .iter()
            .zip(data[FILE_HEADER_LEN as usize..].chunks_exact_mut(RECORD_LEN as usize))
        {
            BigEndian::write_u32(&mut record[..4], entry.byte_offset / 2);
            BigEndian::write_u32(&mut record[4..], entry.byte_size / 2);
        }
        data
    }
}
