//! Slide opening by content sniffing.
//!
//! The first bytes of the file decide the decoder: TIFF and BigTIFF magic
//! (either byte order) go to [`TiffSlide`], everything else is handed to the
//! `image` crate and held as a single-level [`MemorySlide`].

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::SlideError;
use crate::io::{LocalFileReader, RangeReader};

use super::{MemorySlide, SlideDecoder, TiffSlide};

/// Number of bytes inspected to identify a container.
const MAGIC_BYTES: usize = 4;

/// Returns `true` if the bytes start with a TIFF or BigTIFF header.
pub fn is_tiff_magic(bytes: &[u8]) -> bool {
    matches!(
        bytes,
        [b'I', b'I', 42, 0, ..] | [b'I', b'I', 43, 0, ..] | [b'M', b'M', 0, 42, ..] | [b'M', b'M', 0, 43, ..]
    )
}

/// Open a slide file with the decoder matching its content.
///
/// `tile_cache` sets the decoded-tile cache capacity of TIFF slides and is
/// ignored for raster images.
pub async fn open_slide(
    path: impl AsRef<Path>,
    tile_cache: usize,
) -> Result<Arc<dyn SlideDecoder>, SlideError> {
    let path = path.as_ref();
    let reader = LocalFileReader::open(path).await?;

    let sniff_len = (reader.size() as usize).min(MAGIC_BYTES);
    let magic = reader.read_exact_at(0, sniff_len).await?;

    if is_tiff_magic(&magic) {
        debug!(path = %path.display(), "Opening as tiled TIFF");
        let slide = TiffSlide::from_reader(reader).await?.with_tile_cache(tile_cache);
        return Ok(Arc::new(slide));
    }

    debug!(path = %path.display(), "Opening as raster image");
    drop(reader);
    let slide = MemorySlide::open(path)?;
    Ok(Arc::new(slide))
}
