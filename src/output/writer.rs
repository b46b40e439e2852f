//! Tile files and the JSON-lines manifest.
//!
//! Layout of an output directory:
//!
//! ```text
//! out/
//! ├── manifest.jsonl          one JSON object per written tile
//! ├── L0_x0_y0.jpg
//! ├── L0_x0_y0_mask.png       single-label mask (class ids)
//! ├── L0_x256_y0.jpg
//! ├── L0_x256_y0_mask_1.png   multi-label mask, one file per class id
//! └── ...
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::annotation::LabelMask;
use crate::error::OutputError;
use crate::tile::TileRecord;

use super::encoder::TileEncoder;

/// Manifest file name inside the output directory.
pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub level: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub content_width: u32,
    pub content_height: u32,
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masks: Vec<String>,
}

/// Writes tile records into an output directory.
///
/// Safe to share between workers; manifest lines are appended under a lock.
pub struct TileWriter {
    directory: PathBuf,
    encoder: TileEncoder,
    manifest: Mutex<File>,
}

impl TileWriter {
    /// Create the directory if needed and start a fresh manifest.
    pub async fn create(directory: impl AsRef<Path>, encoder: TileEncoder) -> Result<Self, OutputError> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| io_error(&directory, source))?;

        let manifest_path = directory.join(MANIFEST_FILE);
        let manifest = File::create(&manifest_path)
            .await
            .map_err(|source| io_error(&manifest_path, source))?;

        Ok(Self {
            directory,
            encoder,
            manifest: Mutex::new(manifest),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(MANIFEST_FILE)
    }

    /// Encode and write one tile (and its mask), then append its manifest line.
    pub async fn write(&self, record: &TileRecord) -> Result<ManifestEntry, OutputError> {
        let stem = record.coordinate.stem();
        let file = format!("{}.{}", stem, self.encoder.format().extension());
        self.write_file(&file, &self.encoder.encode(&record.pixels)?).await?;

        let mut masks = Vec::new();
        match &record.mask {
            Some(LabelMask::Single(mask)) => {
                let name = format!("{}_mask.png", stem);
                self.write_file(&name, &self.encoder.encode_mask(mask)?).await?;
                masks.push(name);
            }
            Some(LabelMask::Multi(channels)) => {
                for (i, channel) in channels.iter().enumerate() {
                    let name = format!("{}_mask_{}.png", stem, i + 1);
                    self.write_file(&name, &self.encoder.encode_mask(channel)?).await?;
                    masks.push(name);
                }
            }
            None => {}
        }

        let entry = ManifestEntry {
            file,
            level: record.coordinate.level,
            x: record.coordinate.x,
            y: record.coordinate.y,
            width: record.pixels.width(),
            height: record.pixels.height(),
            content_width: record.content_width,
            content_height: record.content_height,
            label: record.label.clone(),
            masks,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.manifest
            .lock()
            .await
            .write_all(line.as_bytes())
            .await
            .map_err(|source| io_error(&self.manifest_path(), source))?;

        debug!(file = %entry.file, label = ?entry.label, "Wrote tile");
        Ok(entry)
    }

    /// Flush the manifest to disk.
    pub async fn finish(&self) -> Result<(), OutputError> {
        self.manifest
            .lock()
            .await
            .flush()
            .await
            .map_err(|source| io_error(&self.manifest_path(), source))
    }

    async fn write_file(&self, name: &str, data: &[u8]) -> Result<(), OutputError> {
        let path = self.directory.join(name);
        tokio::fs::write(&path, data)
            .await
            .map_err(|source| io_error(&path, source))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> OutputError {
    OutputError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Parse a manifest file back into entries.
pub async fn read_manifest(path: impl AsRef<Path>) -> Result<Vec<ManifestEntry>, OutputError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| io_error(path, source))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(OutputError::from))
        .collect()
}
