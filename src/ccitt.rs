//! CCITT Group 4 (T.6) bitmap decoding.
//!
//! Bits are read most significant first. The first reference line is an
//! imaginary all-white line and no EOL codes separate the coded lines.
//! The output bitmap is packed row after row with no padding between rows,
//! most significant bit first, and a set bit marks a black pixel.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::Error;

const WHITE_CODES: &[(&str, u16)] = &[
    ("00110101", 0),
    ("000111", 1),
    ("0111", 2),
    ("1000", 3),
    ("1011", 4),
    ("1100", 5),
    ("1110", 6),
    ("1111", 7),
    ("10011", 8),
    ("10100", 9),
    ("00111", 10),
    ("01000", 11),
    ("001000", 12),
    ("000011", 13),
    ("110100", 14),
    ("110101", 15),
    ("101010", 16),
    ("101011", 17),
    ("0100111", 18),
    ("0001100", 19),
    ("0001000", 20),
    ("0010111", 21),
    ("0000011", 22),
    ("0000100", 23),
    ("0101000", 24),
    ("0101011", 25),
    ("0010011", 26),
    ("0100100", 27),
    ("0011000", 28),
    ("00000010", 29),
    ("00000011", 30),
    ("00011010", 31),
    ("00011011", 32),
    ("00010010", 33),
    ("00010011", 34),
    ("00010100", 35),
    ("00010101", 36),
    ("00010110", 37),
    ("00010111", 38),
    ("00101000", 39),
    ("00101001", 40),
    ("00101010", 41),
    ("00101011", 42),
    ("00101100", 43),
    ("00101101", 44),
    ("00000100", 45),
    ("00000101", 46),
    ("00001010", 47),
    ("00001011", 48),
    ("01010010", 49),
    ("01010011", 50),
    ("01010100", 51),
    ("01010101", 52),
    ("00100100", 53),
    ("00100101", 54),
    ("01011000", 55),
    ("01011001", 56),
    ("01011010", 57),
    ("01011011", 58),
    ("01001010", 59),
    ("01001011", 60),
    ("00110010", 61),
    ("00110011", 62),
    ("00110100", 63),
    ("11011", 64),
    ("10010", 128),
    ("010111", 192),
    ("0110111", 256),
    ("00110110", 320),
    ("00110111", 384),
    ("01100100", 448),
    ("01100101", 512),
    ("01101000", 576),
    ("01100111", 640),
    ("011001100", 704),
    ("011001101", 768),
    ("011010010", 832),
    ("011010011", 896),
    ("011010100", 960),
    ("011010101", 1024),
    ("011010110", 1088),
    ("011010111", 1152),
    ("011011000", 1216),
    ("011011001", 1280),
    ("011011010", 1344),
    ("011011011", 1408),
    ("010011000", 1472),
    ("010011001", 1536),
    ("010011010", 1600),
    ("011000", 1664),
    ("010011011", 1728),
];

const BLACK_CODES: &[(&str, u16)] = &[
    ("0000110111", 0),
    ("010", 1),
    ("11", 2),
    ("10", 3),
    ("011", 4),
    ("0011", 5),
    ("0010", 6),
    ("00011", 7),
    ("000101", 8),
    ("000100", 9),
    ("0000100", 10),
    ("0000101", 11),
    ("0000111", 12),
    ("00000100", 13),
    ("00000111", 14),
    ("000011000", 15),
    ("0000010111", 16),
    ("0000011000", 17),
    ("0000001000", 18),
    ("00001100111", 19),
    ("00001101000", 20),
    ("00001101100", 21),
    ("00000110111", 22),
    ("00000101000", 23),
    ("00000010111", 24),
    ("00000011000", 25),
    ("000011001010", 26),
    ("000011001011", 27),
    ("000011001100", 28),
    ("000011001101", 29),
    ("000001101000", 30),
    ("000001101001", 31),
    ("000001101010", 32),
    ("000001101011", 33),
    ("000011010010", 34),
    ("000011010011", 35),
    ("000011010100", 36),
    ("000011010101", 37),
    ("000011010110", 38),
    ("000011010111", 39),
    ("000001101100", 40),
    ("000001101101", 41),
    ("000011011010", 42),
    ("000011011011", 43),
    ("000001010100", 44),
    ("000001010101", 45),
    ("000001010110", 46),
    ("000001010111", 47),
    ("000001100100", 48),
    ("000001100101", 49),
    ("000001010010", 50),
    ("000001010011", 51),
    ("000000100100", 52),
    ("000000110111", 53),
    ("000000111000", 54),
    ("000000100111", 55),
    ("000000101000", 56),
    ("000001011000", 57),
    ("000001011001", 58),
    ("000000101011", 59),
    ("000000101100", 60),
    ("000001011010", 61),
    ("000001100110", 62),
    ("000001100111", 63),
    ("0000001111", 64),
    ("000011001000", 128),
    ("000011001001", 192),
    ("000001011011", 256),
    ("000000110011", 320),
    ("000000110100", 384),
    ("000000110101", 448),
    ("0000001101100", 512),
    ("0000001101101", 576),
    ("0000001001010", 640),
    ("0000001001011", 704),
    ("0000001001100", 768),
    ("0000001001101", 832),
    ("0000001110010", 896),
    ("0000001110011", 960),
    ("0000001110100", 1024),
    ("0000001110101", 1088),
    ("0000001110110", 1152),
    ("0000001110111", 1216),
    ("0000001010010", 1280),
    ("0000001010011", 1344),
    ("0000001010100", 1408),
    ("0000001010101", 1472),
    ("0000001011010", 1536),
    ("0000001011011", 1600),
    ("0000001100100", 1664),
    ("0000001100101", 1728),
];

/// Make-up codes shared by both colours.
const EXTENDED_MAKEUP_CODES: &[(&str, u16)] = &[
    ("00000001000", 1792),
    ("00000001100", 1856),
    ("00000001101", 1920),
    ("000000010010", 1984),
    ("000000010011", 2048),
    ("000000010100", 2112),
    ("000000010101", 2176),
    ("000000010110", 2240),
    ("000000010111", 2304),
    ("000000011100", 2368),
    ("000000011101", 2432),
    ("000000011110", 2496),
    ("000000011111", 2560),
];

const MAX_CODE_LEN: u8 = 13;

/// Run lengths keyed by (code length, code bits).
type RunTable = HashMap<(u8, u16), u16>;

struct RunTables {
    white: RunTable,
    black: RunTable,
}

fn run_tables() -> &'static RunTables {
    static TABLES: OnceLock<RunTables> = OnceLock::new();
    TABLES.get_or_init(|| RunTables {
        white: build_table(WHITE_CODES),
        black: build_table(BLACK_CODES),
    })
}

fn build_table(codes: &[(&str, u16)]) -> RunTable {
    codes
        .iter()
        .chain(EXTENDED_MAKEUP_CODES)
        .map(|&(bits, run)| {
            let code = bits
                .bytes()
                .fold(0u16, |acc, bit| (acc << 1) | u16::from(bit == b'1'));
            ((bits.len() as u8, code), run)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Pass,
    Horizontal,
    Vertical(i8),
}

struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}
impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn read_bit(&mut self) -> Result<u16, Error> {
        let byte = self
            .data
            .get(self.position / 8)
            .ok_or(Error::Ccitt("data ended before the last line"))?;
        let bit = (byte >> (7 - self.position % 8)) & 1;
        self.position += 1;
        Ok(u16::from(bit))
    }

    fn read_mode(&mut self) -> Result<Mode, Error> {
        let mut code = 0u16;
        for len in 1..=12u8 {
            code = (code << 1) | self.read_bit()?;
            let mode = match (len, code) {
                (1, 0b1) => Mode::Vertical(0),
                (3, 0b011) => Mode::Vertical(1),
                (3, 0b010) => Mode::Vertical(-1),
                (3, 0b001) => Mode::Horizontal,
                (4, 0b0001) => Mode::Pass,
                (6, 0b000011) => Mode::Vertical(2),
                (6, 0b000010) => Mode::Vertical(-2),
                (7, 0b0000011) => Mode::Vertical(3),
                (7, 0b0000010) => Mode::Vertical(-3),
                (7, 0b0000001) => return Err(Error::Ccitt("extension codes are not supported")),
                (12, 0b1) => return Err(Error::Ccitt("end of block before the last line")),
                _ => continue,
            };
            return Ok(mode);
        }
        Err(Error::Ccitt("invalid mode code"))
    }

    /// Reads make-up codes until a terminating code and returns the total run.
    fn read_run(&mut self, white: bool) -> Result<usize, Error> {
        let tables = run_tables();
        let table = if white { &tables.white } else { &tables.black };
        let mut total = 0usize;
        loop {
            let run = self.read_code(table)?;
            total += usize::from(run);
            if run < 64 {
                return Ok(total);
            }
        }
    }

    fn read_code(&mut self, table: &RunTable) -> Result<u16, Error> {
        let mut code = 0u16;
        for len in 1..=MAX_CODE_LEN {
            code = (code << 1) | self.read_bit()?;
            if let Some(&run) = table.get(&(len, code)) {
                return Ok(run);
            }
        }
        Err(Error::Ccitt("invalid run length code"))
    }
}

/// Finds b1 and b2 on the reference line for the current a0 and colour.
fn reference_changes(
    reference: &[usize],
    a0: Option<usize>,
    white: bool,
    width: usize,
) -> (usize, usize) {
    // Even positions turn the line black, odd positions turn it white again.
    let mut i = if white { 0 } else { 1 };
    while i < reference.len() {
        if a0.is_none_or(|a0| reference[i] > a0) {
            break;
        }
        i += 2;
    }
    let b1 = reference.get(i).copied().unwrap_or(width);
    let b2 = reference.get(i + 1).copied().unwrap_or(width);
    (b1, b2)
}

/// Drops zero length runs so the line can serve as the next reference line.
fn normalize(changes: Vec<usize>) -> Vec<usize> {
    let mut line: Vec<usize> = Vec::with_capacity(changes.len());
    for position in changes {
        if line.last() == Some(&position) {
            line.pop();
        } else {
            line.push(position);
        }
    }
    line
}

fn decode_line(
    reader: &mut BitReader<'_>,
    reference: &[usize],
    width: usize,
) -> Result<Vec<usize>, Error> {
    let mut changes = Vec::new();
    let mut a0: Option<usize> = None;
    let mut white = true;
    loop {
        let position = a0.unwrap_or(0);
        if a0.is_some() && position >= width {
            break;
        }
        match reader.read_mode()? {
            Mode::Pass => {
                let (_, b2) = reference_changes(reference, a0, white, width);
                a0 = Some(b2);
            }
            Mode::Horizontal => {
                let a1 = position + reader.read_run(white)?;
                let a2 = a1 + reader.read_run(!white)?;
                if a2 > width {
                    Err(Error::Ccitt("horizontal run past the end of the line"))?
                }
                changes.push(a1);
                changes.push(a2);
                a0 = Some(a2);
            }
            Mode::Vertical(delta) => {
                let (b1, _) = reference_changes(reference, a0, white, width);
                let a1 = b1 as isize + isize::from(delta);
                if a1 < position as isize || a1 > width as isize {
                    Err(Error::Ccitt("vertical mode moved outside the line"))?
                }
                changes.push(a1 as usize);
                a0 = Some(a1 as usize);
                white = !white;
            }
        }
    }
    Ok(normalize(changes))
}

/// Decodes a Group 4 stream of `height` lines of `width` pixels into a packed bitmap.
pub fn decode_g4(data: &[u8], width: usize, height: usize) -> Result<Vec<u8>, Error> {
    let mut bitmap = vec![0u8; (width * height).div_ceil(8)];
    let mut reader = BitReader::new(data);
    let mut reference: Vec<usize> = Vec::new();
    for row in 0..height {
        let line = decode_line(&mut reader, &reference, width)?;
        let row_start = row * width;
        for run in line.chunks(2) {
            let start = run[0].min(width);
            let end = run.get(1).copied().unwrap_or(width).min(width);
            for pixel in row_start + start..row_start + end {
                bitmap[pixel / 8] |= 0x80 >> (pixel % 8);
            }
        }
        reference = line;
    }
    Ok(bitmap)
}

/// Whether pixel `index` of a bitmap from [`decode_g4`] is black.
pub fn is_black(bitmap: &[u8], index: usize) -> bool {
    bitmap[index / 8] & (0x80 >> (index % 8)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixels(bitmap: &[u8], count: usize) -> Vec<u8> {
        (0..count).map(|i| u8::from(is_black(bitmap, i))).collect()
    }

    #[test]
    fn test_tables_are_prefix_free() {
        for codes in [WHITE_CODES, BLACK_CODES] {
            let all: Vec<&str> = codes
                .iter()
                .chain(EXTENDED_MAKEUP_CODES)
                .map(|(bits, _)| *bits)
                .collect();
            for (i, a) in all.iter().enumerate() {
                for (j, b) in all.iter().enumerate() {
                    assert!(i == j || !b.starts_with(a), "{a} is a prefix of {b}");
                }
            }
        }
    }

    #[test]
    fn test_all_white() {
        // One V0 code per line against the blank reference line.
        let bitmap = decode_g4(&[0b1100_0000], 8, 2).unwrap();
        assert_eq!(pixels(&bitmap, 16), vec![0; 16]);
    }

    #[test]
    fn test_horizontal_then_vertical() {
        // Line 1: H, white 4, black 4. Line 2: V0, V0.
        let bitmap = decode_g4(&[0x36, 0xF0], 8, 2).unwrap();
        assert_eq!(
            pixels(&bitmap, 16),
            vec![0, 0, 0, 0, 1, 1, 1, 1, 0, 0, 0, 0, 1, 1, 1, 1]
        );
    }

    #[test]
    fn test_pass_mode() {
        // Line 1: H, white 2, black 2, V0. Line 2: P, V0.
        let bitmap = decode_g4(&[0x2F, 0xC6], 8, 2).unwrap();
        assert_eq!(
            pixels(&bitmap, 16),
            vec![0, 0, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_makeup_codes() {
        // H, white 64 + 6, black 10.
        let bitmap = decode_g4(&[0x3B, 0xE0, 0x80], 80, 1).unwrap();
        let expected: Vec<u8> = (0..80).map(|i| u8::from(i >= 70)).collect();
        assert_eq!(pixels(&bitmap, 80), expected);
    }

    #[test]
    fn test_invalid_streams() {
        assert!(decode_g4(&[0x00, 0x00], 8, 1).is_err());
        // V0 for the first line, then the data runs out.
        assert!(decode_g4(&[0b1000_0000], 8, 2).is_err());
        assert!(decode_g4(&[], 8, 1).is_err());
        // H, white 7, black 4 overruns an 8 pixel line.
        assert!(decode_g4(&[0b0011_1110, 0b1100_0000], 8, 1).is_err());
    }
}
