use byteorder::{BigEndian, ByteOrder};

use crate::error::Error;

const OFFSET_TILE_TYPE: usize = 2;
const OFFSET_MIN_SIZE: usize = 3;
const OFFSET_MIN: usize = 4;
const MAX_MIN_SIZE: u8 = 4;

/// The prefix of an integer tile record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileHeader {
    /// Record length in 16 bit words, as stored. Informational only.
    pub record_size: i16,
    pub tile_type: u8,
    pub min_field_size: u8,
    /// Baseline added to most encoded cell values.
    pub min: i32,
}

/// Parses the tile record prefix and returns it along with the offset of the payload.
///
/// A min field wider than four bytes means the data file itself is unreadable
/// and is reported as [`Error::BadMinFieldSize`].
pub fn parse_tile_header(bytes: &[u8]) -> Result<(TileHeader, usize), Error> {
    if bytes.len() < OFFSET_MIN {
        Err(Error::TruncatedTile(bytes.len(), OFFSET_MIN))?
    }
    let record_size = BigEndian::read_i16(bytes);
    let tile_type = bytes[OFFSET_TILE_TYPE];
    let min_field_size = bytes[OFFSET_MIN_SIZE];
    if min_field_size > MAX_MIN_SIZE {
        Err(Error::BadMinFieldSize(min_field_size))?
    }

    let data_offset = OFFSET_MIN + min_field_size as usize;
    let min_bytes = bytes
        .get(OFFSET_MIN..data_offset)
        .ok_or(Error::TruncatedTile(bytes.len(), data_offset))?;

    let header = TileHeader {
        record_size,
        tile_type,
        min_field_size,
        min: read_min(min_bytes),
    };
    Ok((header, data_offset))
}

/// Widens a big-endian two's complement integer of 0 to 4 bytes.
fn read_min(bytes: &[u8]) -> i32 {
    match bytes.len() {
        0 => 0,
        4 => BigEndian::read_i32(bytes),
        n => {
            let unsigned = bytes.iter().fold(0i64, |acc, &b| acc * 256 + i64::from(b));
            if bytes[0] > 127 {
                (unsigned - (1i64 << (8 * n))) as i32
            } else {
                unsigned as i32
            }
        }
    }
}
