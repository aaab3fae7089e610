use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::debug;

use crate::{ReserveError, Result};

pub const FILE_HEADER_LEN: usize = 32;
pub const MARKER_LEN: usize = 5;

// The decompressed size is stored twice in the file header.
const SIZE_FIELDS: [usize; 2] = [8, 24];

/// A population container split into its file header, the short marker that
/// opens the inflated stream, and the payload the value tree is parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompressedContainer {
    pub file_header: [u8; FILE_HEADER_LEN],
    pub marker: [u8; MARKER_LEN],
    pub data: Vec<u8>,
    original_len: usize,
}

impl DecompressedContainer {
    pub fn new(file_header: [u8; FILE_HEADER_LEN], marker: [u8; MARKER_LEN], data: Vec<u8>) -> Self {
        let original_len = MARKER_LEN + data.len();
        Self {
            file_header,
            marker,
            data,
            original_len,
        }
    }

    pub fn decompress(raw: &[u8]) -> Result<Self> {
        if raw.len() < FILE_HEADER_LEN {
            return Err(ReserveError::Decompression(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "container is {} bytes, shorter than its {FILE_HEADER_LEN}-byte header",
                    raw.len()
                ),
            )));
        }

        let mut file_header = [0u8; FILE_HEADER_LEN];
        file_header.copy_from_slice(&raw[..FILE_HEADER_LEN]);

        let mut decoder = ZlibDecoder::new(&raw[FILE_HEADER_LEN..]);
        let mut inflated = Vec::new();
        decoder
            .read_to_end(&mut inflated)
            .map_err(ReserveError::Decompression)?;

        if inflated.len() < MARKER_LEN {
            return Err(ReserveError::Decompression(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("inflated stream is only {} bytes", inflated.len()),
            )));
        }

        let mut marker = [0u8; MARKER_LEN];
        marker.copy_from_slice(&inflated[..MARKER_LEN]);
        let original_len = inflated.len();
        let data = inflated.split_off(MARKER_LEN);

        Ok(Self {
            file_header,
            marker,
            data,
            original_len,
        })
    }

    /// Rebuilds the compressed file. The header's size fields are rewritten
    /// only when the payload length changed since decompression.
    pub fn recompress(&self) -> Result<Vec<u8>> {
        let mut inflated = Vec::with_capacity(MARKER_LEN + self.data.len());
        inflated.extend_from_slice(&self.marker);
        inflated.extend_from_slice(&self.data);

        let mut header = self.file_header;
        if inflated.len() != self.original_len {
            debug!(
                original = self.original_len,
                new = inflated.len(),
                change = inflated.len() as i64 - self.original_len as i64,
                "decompressed size changed"
            );
            let size = (inflated.len() as u32).to_le_bytes();
            for pos in SIZE_FIELDS {
                header[pos..pos + 4].copy_from_slice(&size);
            }
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&inflated)?;
        let compressed = encoder.finish()?;

        let mut out = Vec::with_capacity(FILE_HEADER_LEN + compressed.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// The two decompressed-size fields as currently stored in the header.
    pub fn decompressed_size_fields(&self) -> [u32; 2] {
        SIZE_FIELDS.map(|pos| {
            u32::from_le_bytes([
                self.file_header[pos],
                self.file_header[pos + 1],
                self.file_header[pos + 2],
                self.file_header[pos + 3],
            ])
        })
    }

    /// Length of marker plus payload when the container was decompressed.
    pub fn original_len(&self) -> usize {
        self.original_len
    }

    /// Same header and marker with `data` as the payload. The header's size
    /// fields are still measured against this container's original length,
    /// so they follow the new payload on recompress.
    pub fn with_payload(&self, data: Vec<u8>) -> Self {
        Self {
            file_header: self.file_header,
            marker: self.marker,
            data,
            original_len: self.original_len,
        }
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "reading container");
        let raw = fs::read(path)?;
        Self::decompress(&raw)
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = self.recompress()?;
        fs::write(path, bytes)?;
        debug!(path = %path.display(), "saved container");
        Ok(())
    }
}
