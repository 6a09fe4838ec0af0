use crate::decoder::{FLOAT_NODATA, INT_NODATA};

/// Options for an [`EsriGridReader`](crate::reader::EsriGridReader).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderConfig {
    /// Written to integer cells that hold no data.
    pub int_nodata: i32,
    /// Written to float cells that hold no data.
    pub float_nodata: f32,
    /// Keep decoded tiles for later lookups.
    pub cache_tiles: bool,
}
impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            int_nodata: INT_NODATA,
            float_nodata: FLOAT_NODATA,
            cache_tiles: true,
        }
    }
}
impl ReaderConfig {
    pub fn with_int_nodata(mut self, nodata: i32) -> Self {
        self.int_nodata = nodata;
        self
    }
    pub fn with_float_nodata(mut self, nodata: f32) -> Self {
        self.float_nodata = nodata;
        self
    }
    pub fn with_cache_tiles(mut self, cache_tiles: bool) -> Self {
        self.cache_tiles = cache_tiles;
        self
    }
}
