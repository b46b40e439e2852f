//! TIFF header, IFD and tag value parsing.
//!
//! Handles classic TIFF (32-bit offsets, 12-byte entries) and BigTIFF
//! (64-bit offsets, 20-byte entries) in either byte order. Only the handful
//! of tags the tiling decoder needs are named; everything else is carried
//! along as raw entries and ignored.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

/// Number of bytes to read up front: enough for a BigTIFF header.
pub const HEADER_READ_SIZE: usize = 16;

// =============================================================================
// Tags
// =============================================================================

/// TIFF tag IDs used by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Tag {
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    Compression = 259,
    ImageDescription = 270,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    JpegTables = 347,
}

/// Compression value for "new-style" JPEG.
pub const COMPRESSION_JPEG: u16 = 7;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order declared by the first two bytes of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II"
    LittleEndian,
    /// "MM"
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse the header from the first bytes of the file.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < 8 {
            return Err(TiffError::FileTooSmall {
                required: 8,
                actual: bytes.len() as u64,
            });
        }

        let byte_order = match [bytes[0], bytes[1]] {
            [b'I', b'I'] => ByteOrder::LittleEndian,
            [b'M', b'M'] => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(u16::from_le_bytes([bytes[0], bytes[1]]))),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..4]) {
            42 => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            43 => {
                if bytes.len() < 16 {
                    return Err(TiffError::FileTooSmall {
                        required: 16,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidTagValue {
                        tag: "BigTIFF offset size",
                        message: format!("expected 8, got {}", offset_size),
                    });
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            version => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(Self {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    #[inline]
    fn entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    #[inline]
    fn count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Width of offsets and of the inline value field.
    #[inline]
    fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

// =============================================================================
// IFD entries
// =============================================================================

/// Size in bytes of one value of a TIFF field type.
fn field_type_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 6 | 7 => Some(1), // BYTE, ASCII, SBYTE, UNDEFINED
        3 | 8 => Some(2),         // SHORT, SSHORT
        4 | 9 | 13 => Some(4),    // LONG, SLONG, IFD
        5 | 10 | 12 => Some(8),   // RATIONAL, SRATIONAL, DOUBLE
        11 => Some(4),            // FLOAT
        16 | 17 | 18 => Some(8),  // LONG8, SLONG8, IFD8
        _ => None,
    }
}

/// One raw IFD entry.
///
/// `value_field` holds the inline value bytes (or the offset to them), exactly
/// as stored in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u64,
    pub(crate) value_field: [u8; 8],
}

impl IfdEntry {
    /// Total size of the value in bytes, if the field type is known.
    pub fn byte_len(&self) -> Option<u64> {
        field_type_size(self.field_type).and_then(|s| (s as u64).checked_mul(self.count))
    }

    fn is_inline(&self, header: &TiffHeader) -> bool {
        self.byte_len()
            .is_some_and(|len| len <= header.offset_size() as u64)
    }

    fn value_offset(&self, header: &TiffHeader) -> u64 {
        header.read_offset(&self.value_field)
    }
}

/// A parsed Image File Directory.
#[derive(Debug, Clone)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Read the IFD at `offset`.
    pub async fn read<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        offset: u64,
    ) -> Result<Self, TiffError> {
        let count_size = header.count_size();
        let count_bytes = reader.read_exact_at(offset, count_size).await?;
        let entry_count = if header.is_bigtiff {
            header.byte_order.read_u64(&count_bytes)
        } else {
            header.byte_order.read_u16(&count_bytes) as u64
        };

        let body_len = (entry_count as usize)
            .checked_mul(header.entry_size())
            .and_then(|n| n.checked_add(header.offset_size()))
            .ok_or(TiffError::InvalidIfdOffset(offset))?;
        let body = reader
            .read_exact_at(offset + count_size as u64, body_len)
            .await?;

        Ok(Self::parse(&body, entry_count as usize, header))
    }

    /// Parse `entry_count` entries followed by the next-IFD offset.
    fn parse(body: &[u8], entry_count: usize, header: &TiffHeader) -> Self {
        let order = header.byte_order;
        let entry_size = header.entry_size();
        let offset_size = header.offset_size();

        let entries = (0..entry_count)
            .map(|i| {
                let e = &body[i * entry_size..(i + 1) * entry_size];
                let count = if header.is_bigtiff {
                    order.read_u64(&e[4..12])
                } else {
                    order.read_u32(&e[4..8]) as u64
                };
                let mut value_field = [0u8; 8];
                value_field[..offset_size].copy_from_slice(&e[entry_size - offset_size..]);
                IfdEntry {
                    tag: order.read_u16(&e[0..2]),
                    field_type: order.read_u16(&e[2..4]),
                    count,
                    value_field,
                }
            })
            .collect();

        let next = &body[entry_count * entry_size..entry_count * entry_size + offset_size];
        Self {
            entries,
            next_ifd_offset: header.read_offset(next),
        }
    }

    /// Find an entry by tag.
    pub fn entry(&self, tag: Tag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag as u16)
    }

    /// Read a single unsigned value stored inline (the common case for
    /// dimensions, tile sizes and compression).
    pub fn inline_unsigned(&self, tag: Tag, header: &TiffHeader) -> Option<u64> {
        let entry = self.entry(tag)?;
        if entry.count == 0 || !entry.is_inline(header) {
            return None;
        }
        let order = header.byte_order;
        match entry.field_type {
            1 => Some(entry.value_field[0] as u64),
            3 => Some(order.read_u16(&entry.value_field) as u64),
            4 => Some(order.read_u32(&entry.value_field) as u64),
            16 => Some(order.read_u64(&entry.value_field)),
            _ => None,
        }
    }
}

// =============================================================================
// Value reading
// =============================================================================

/// Read the raw value bytes of an entry, inline or from its offset.
pub async fn read_entry_bytes<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
) -> Result<Bytes, TiffError> {
    let len = entry
        .byte_len()
        .ok_or_else(|| TiffError::InvalidTagValue {
            tag: "entry",
            message: format!("unknown field type {}", entry.field_type),
        })?;

    if entry.is_inline(header) {
        return Ok(Bytes::copy_from_slice(&entry.value_field[..len as usize]));
    }

    let bytes = reader
        .read_exact_at(entry.value_offset(header), len as usize)
        .await?;
    Ok(bytes)
}

/// Read an array of SHORT, LONG or LONG8 values as u64.
///
/// The whole array is fetched in one range read.
pub async fn read_unsigned_array<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
    tag: &'static str,
) -> Result<Vec<u64>, TiffError> {
    let bytes = read_entry_bytes(reader, header, entry).await?;
    let order = header.byte_order;

    let values = match entry.field_type {
        3 => bytes.chunks_exact(2).map(|c| order.read_u16(c) as u64).collect(),
        4 => bytes.chunks_exact(4).map(|c| order.read_u32(c) as u64).collect(),
        16 => bytes.chunks_exact(8).map(|c| order.read_u64(c)).collect(),
        other => {
            return Err(TiffError::InvalidTagValue {
                tag,
                message: format!("expected SHORT, LONG or LONG8, got field type {}", other),
            })
        }
    };
    Ok(values)
}

/// Read an ASCII value, trimming the trailing NUL.
pub async fn read_ascii<R: RangeReader + ?Sized>(
    reader: &R,
    header: &TiffHeader,
    entry: &IfdEntry,
) -> Result<String, TiffError> {
    let bytes = read_entry_bytes(reader, header, entry).await?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_end_matches('\0').to_string())
}

// =============================================================================
// Tests
// =============================================================================
