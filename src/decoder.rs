use std::fmt::Debug;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};

use crate::ccitt;
use crate::error::Error;
use crate::header::CellType;
use crate::tile_header::{TileHeader, parse_tile_header};
use crate::tile_loader::RECORD_PREFIX_LEN;

/// Nodata sentinel ESRI writes for integer grids.
pub const INT_NODATA: i32 = -2_147_483_647;
/// Nodata sentinel ESRI writes for float grids.
pub const FLOAT_NODATA: f32 = -f32::MAX;

/// Encoding of the cells of one integer tile, identified by the tile type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileType {
    Const,
    Raw1Bit,
    Raw4Bit,
    Raw8Bit,
    Raw16Bit,
    Raw32Bit,
    Literal16Bit,
    Literal8Bit,
    RunMin,
    Rle32Bit,
    Rle16Bit,
    Rle8Bit,
    Rle4Bit,
    Ccitt,
}
impl TileType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Const),
            0x01 => Some(Self::Raw1Bit),
            0x04 => Some(Self::Raw4Bit),
            0x08 => Some(Self::Raw8Bit),
            0x10 => Some(Self::Raw16Bit),
            0x20 => Some(Self::Raw32Bit),
            0xCF => Some(Self::Literal16Bit),
            0xD7 => Some(Self::Literal8Bit),
            0xDF => Some(Self::RunMin),
            0xE0 => Some(Self::Rle32Bit),
            0xF0 => Some(Self::Rle16Bit),
            0xF8 => Some(Self::Rle8Bit),
            0xFC => Some(Self::Rle4Bit),
            0xFF => Some(Self::Ccitt),
            _ => None,
        }
    }
    pub fn code(self) -> u8 {
        match self {
            Self::Const => 0x00,
            Self::Raw1Bit => 0x01,
            Self::Raw4Bit => 0x04,
            Self::Raw8Bit => 0x08,
            Self::Raw16Bit => 0x10,
            Self::Raw32Bit => 0x20,
            Self::Literal16Bit => 0xCF,
            Self::Literal8Bit => 0xD7,
            Self::RunMin => 0xDF,
            Self::Rle32Bit => 0xE0,
            Self::Rle16Bit => 0xF0,
            Self::Rle8Bit => 0xF8,
            Self::Rle4Bit => 0xFC,
            Self::Ccitt => 0xFF,
        }
    }
}

/// How the cells of a [`DecodedTile`] came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    Decoded,
    /// The index holds no record for the tile.
    Absent,
    /// The payload ran out early; the remaining cells are nodata.
    Partial,
    Unsupported(u8),
    /// The record could not be read or decoded; every cell is nodata.
    Failed,
}

/// The cells of one tile in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTile<T> {
    pub tile_number: u32,
    pub width: usize,
    pub height: usize,
    pub cells: Vec<T>,
    pub status: TileStatus,
}
impl<T: Copy> DecodedTile<T> {
    pub fn filled(tile_number: u32, width: usize, height: usize, value: T, status: TileStatus) -> Self {
        Self {
            tile_number,
            width,
            height,
            cells: vec![value; width * height],
            status,
        }
    }
    /// Value of the cell at `row`, `col` within the tile.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(self.cells[row * self.width + col])
    }
}

/// Cell types a grid can hold. Each one knows how to decode its tile records.
pub trait Cell: num_traits::NumCast + Copy + PartialEq + Debug + Send + Sync + 'static {
    const CELL_TYPE: CellType;

    /// Decodes a tile record, prefix included.
    ///
    /// # Errors
    /// Only when the record shows the grid file itself is corrupt.
    fn decode_record(
        tile_number: u32,
        record: &[u8],
        width: usize,
        height: usize,
        nodata: Self,
    ) -> Result<DecodedTile<Self>, Error>;
}
impl Cell for i32 {
    const CELL_TYPE: CellType = CellType::Integer;

    fn decode_record(
        tile_number: u32,
        record: &[u8],
        width: usize,
        height: usize,
        nodata: Self,
    ) -> Result<DecodedTile<Self>, Error> {
        decode_int_tile(tile_number, record, width, height, nodata)
    }
}
impl Cell for f32 {
    const CELL_TYPE: CellType = CellType::Float;

    fn decode_record(
        tile_number: u32,
        record: &[u8],
        width: usize,
        height: usize,
        nodata: Self,
    ) -> Result<DecodedTile<Self>, Error> {
        Ok(decode_float_tile(tile_number, record, width, height, nodata))
    }
}

/// Decodes an integer tile record.
///
/// Every failure that concerns only this tile gives a tile of `nodata`. The one
/// error returned is [`Error::BadMinFieldSize`].
pub fn decode_int_tile(
    tile_number: u32,
    record: &[u8],
    width: usize,
    height: usize,
    nodata: i32,
) -> Result<DecodedTile<i32>, Error> {
    let (header, data_offset) = match parse_tile_header(record) {
        Ok(parsed) => parsed,
        Err(err) if err.is_format_corruption() => return Err(err),
        Err(err) => {
            warn!("tile {tile_number}: {err}; filling with nodata");
            return Ok(DecodedTile::filled(tile_number, width, height, nodata, TileStatus::Failed));
        }
    };
    let expected_size = (record.len() - RECORD_PREFIX_LEN) / 2;
    if header.record_size as usize != expected_size {
        debug!(
            "tile {tile_number}: record size field is {} words, index says {expected_size}",
            header.record_size
        );
    }

    let (cells, status) = decode_int_payload(&header, &record[data_offset..], width, height, nodata);
    match status {
        TileStatus::Unsupported(code) => {
            warn!("tile {tile_number}: {}; filling with nodata", Error::UnsupportedTileType(code))
        }
        TileStatus::Failed => warn!("tile {tile_number}: payload is invalid; filling with nodata"),
        _ => {}
    }
    Ok(DecodedTile {
        tile_number,
        width,
        height,
        cells,
        status,
    })
}

/// Expands the bytes following a tile header into `width * height` cells.
///
/// Decoding stops at the last cell whatever payload remains. Stored ESRI
/// nodata cells become `nodata`.
pub fn decode_int_payload(
    header: &TileHeader,
    payload: &[u8],
    width: usize,
    height: usize,
    nodata: i32,
) -> (Vec<i32>, TileStatus) {
    let mut cells = vec![nodata; width * height];
    let Some(tile_type) = TileType::from_code(header.tile_type) else {
        return (cells, TileStatus::Unsupported(header.tile_type));
    };

    let mut out = CellWriter::new(&mut cells);
    let min = header.min;
    let mut failure = None;
    match tile_type {
        TileType::Const => out.push_run(usize::MAX, min),
        TileType::Raw1Bit => decode_raw_1bit(payload, min, &mut out),
        TileType::Raw4Bit => decode_raw_4bit(payload, min, &mut out),
        TileType::Raw8Bit => decode_raw(payload, 1, |v| i32::from(v[0] as i8), min, &mut out),
        TileType::Raw16Bit => {
            decode_raw(payload, 2, |v| i32::from(BigEndian::read_i16(v)), min, &mut out)
        }
        TileType::Raw32Bit => decode_raw(payload, 4, BigEndian::read_i32, min, &mut out),
        TileType::Literal16Bit => decode_literal_runs(
            payload,
            2,
            |v| i32::from(BigEndian::read_i16(v)),
            min,
            nodata,
            &mut out,
        ),
        TileType::Literal8Bit => {
            decode_literal_runs(payload, 1, |v| i32::from(v[0]), min, nodata, &mut out)
        }
        TileType::RunMin => decode_run_min(payload, min, nodata, &mut out),
        TileType::Rle32Bit => decode_rle(payload, 4, BigEndian::read_i32, min, &mut out),
        TileType::Rle16Bit => {
            decode_rle(payload, 2, |v| i32::from(BigEndian::read_i16(v)), min, &mut out)
        }
        TileType::Rle8Bit | TileType::Rle4Bit => {
            decode_rle(payload, 1, |v| i32::from(v[0]), min, &mut out)
        }
        TileType::Ccitt => failure = decode_ccitt(payload, width, height, min, &mut out).err(),
    }

    let written = out.written();
    let status = match failure {
        None if written == cells.len() => TileStatus::Decoded,
        None => {
            debug!("{}", Error::PartialTile(written, cells.len()));
            TileStatus::Partial
        }
        Some(err) => {
            debug!("{tile_type:?} tile: {err}");
            cells.fill(nodata);
            TileStatus::Failed
        }
    };
    if nodata != INT_NODATA {
        for cell in cells.iter_mut().filter(|cell| **cell == INT_NODATA) {
            *cell = nodata;
        }
    }
    (cells, status)
}

/// Decodes a float tile record: one big-endian `f32` per cell after the size prefix.
///
/// Stored ESRI nodata cells become `nodata`. A record too short for the tile
/// gives a tile of `nodata`.
pub fn decode_float_tile(
    tile_number: u32,
    record: &[u8],
    width: usize,
    height: usize,
    nodata: f32,
) -> DecodedTile<f32> {
    let count = width * height;
    let payload = record.get(RECORD_PREFIX_LEN..).unwrap_or_default();
    if payload.len() < count * 4 {
        warn!(
            "tile {tile_number}: {}; filling with nodata",
            Error::PartialTile(payload.len() / 4, count)
        );
        return DecodedTile::filled(tile_number, width, height, nodata, TileStatus::Failed);
    }

    let mut cells = vec![0f32; count];
    BigEndian::read_f32_into(&payload[..count * 4], &mut cells);
    for cell in cells.iter_mut().filter(|cell| **cell == FLOAT_NODATA) {
        *cell = nodata;
    }
    DecodedTile {
        tile_number,
        width,
        height,
        cells,
        status: TileStatus::Decoded,
    }
}

/// Appends cells to a tile without ever running past its end.
struct CellWriter<'a> {
    cells: &'a mut [i32],
    position: usize,
}
impl<'a> CellWriter<'a> {
    fn new(cells: &'a mut [i32]) -> Self {
        Self { cells, position: 0 }
    }
    fn is_full(&self) -> bool {
        self.position >= self.cells.len()
    }
    fn written(&self) -> usize {
        self.position
    }
    fn push(&mut self, value: i32) {
        if let Some(cell) = self.cells.get_mut(self.position) {
            *cell = value;
            self.position += 1;
        }
    }
    fn push_run(&mut self, count: usize, value: i32) {
        let end = self.position.saturating_add(count).min(self.cells.len());
        self.cells[self.position..end].fill(value);
        self.position = end;
    }
}

fn decode_raw_1bit(payload: &[u8], min: i32, out: &mut CellWriter<'_>) {
    for byte in payload {
        for shift in (0..8).rev() {
            if out.is_full() {
                return;
            }
            out.push(i32::from((byte >> shift) & 1).wrapping_add(min));
        }
    }
}

fn decode_raw_4bit(payload: &[u8], min: i32, out: &mut CellWriter<'_>) {
    for byte in payload {
        if out.is_full() {
            return;
        }
        out.push(i32::from(byte >> 4).wrapping_add(min));
        out.push(i32::from(byte & 0x0F).wrapping_add(min));
    }
}

fn decode_raw(
    payload: &[u8],
    width: usize,
    read: impl Fn(&[u8]) -> i32,
    min: i32,
    out: &mut CellWriter<'_>,
) {
    for value in payload.chunks_exact(width) {
        if out.is_full() {
            return;
        }
        out.push(read(value).wrapping_add(min));
    }
}

/// `(count, value)` pairs; each run is clipped at the end of the tile.
fn decode_rle(
    payload: &[u8],
    width: usize,
    read: impl Fn(&[u8]) -> i32,
    min: i32,
    out: &mut CellWriter<'_>,
) {
    for pair in payload.chunks_exact(1 + width) {
        if out.is_full() {
            return;
        }
        out.push_run(usize::from(pair[0]), read(&pair[1..]).wrapping_add(min));
    }
}

/// Marker bytes below 128 introduce that many literal values, the others a run
/// of `256 - marker` nodata cells.
fn decode_literal_runs(
    payload: &[u8],
    width: usize,
    read: impl Fn(&[u8]) -> i32,
    min: i32,
    nodata: i32,
    out: &mut CellWriter<'_>,
) {
    let mut rest = payload;
    while let Some((&marker, tail)) = rest.split_first() {
        if out.is_full() {
            return;
        }
        if marker < 128 {
            let len = usize::from(marker) * width;
            let Some(literals) = tail.get(..len) else {
                return;
            };
            decode_raw(literals, width, &read, min, out);
            rest = &tail[len..];
        } else {
            out.push_run(256 - usize::from(marker), nodata);
            rest = tail;
        }
    }
}

fn decode_run_min(payload: &[u8], min: i32, nodata: i32, out: &mut CellWriter<'_>) {
    for &code in payload {
        if out.is_full() {
            return;
        }
        if code < 128 {
            out.push_run(usize::from(code), min);
        } else {
            out.push_run(256 - usize::from(code), nodata);
        }
    }
}

fn decode_ccitt(
    payload: &[u8],
    width: usize,
    height: usize,
    min: i32,
    out: &mut CellWriter<'_>,
) -> Result<(), Error> {
    let bitmap = ccitt::decode_g4(payload, width, height)?;
    let black = min.wrapping_add(1);
    for index in 0..width * height {
        out.push(if ccitt::is_black(&bitmap, index) { black } else { min });
    }
    Ok(())
}
