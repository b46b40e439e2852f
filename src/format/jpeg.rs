//! Abbreviated JPEG stream handling.
//!
//! Aperio SVS (and some generic pyramidal TIFF writers) store tiles as
//! abbreviated JPEG streams: the quantization and Huffman tables live once in
//! the `JPEGTables` tag and every tile jumps straight from SOI to its scan.
//! Such a tile is made decodable by splicing it after the tables:
//! `tables − EOI` + `tile − SOI`.

use bytes::{Bytes, BytesMut};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const MARKER_DQT: u8 = 0xDB;
const MARKER_DHT: u8 = 0xC4;
const MARKER_SOS: u8 = 0xDA;

/// Whether a stream defines its own tables before the first scan.
///
/// Walks marker segments from SOI to SOS; a stream without DQT or DHT before
/// SOS is abbreviated.
pub fn has_own_tables(data: &[u8]) -> bool {
    if data.len() < 4 || data[..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return false;
        }
        let marker = data[pos + 1];
        match marker {
            // Fill bytes
            0xFF => pos += 1,
            MARKER_DQT | MARKER_DHT => return true,
            MARKER_SOS => return false,
            _ => {
                let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                pos += 2 + length;
            }
        }
    }
    false
}

/// Splice shared tables in front of an abbreviated tile.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    let tables = tables.strip_suffix(&EOI).unwrap_or(tables);
    let tile = tile.strip_prefix(&SOI).unwrap_or(tile);

    let mut merged = BytesMut::with_capacity(tables.len() + tile.len());
    merged.extend_from_slice(tables);
    merged.extend_from_slice(tile);
    merged.freeze()
}

/// Return a stream a standard decoder can read, merging tables when the tile
/// needs them.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: Bytes) -> Bytes {
    match tables {
        Some(tables) if !tables.is_empty() && !has_own_tables(&tile) => {
            merge_jpeg_tables(tables, &tile)
        }
        _ => tile,
    }
}
