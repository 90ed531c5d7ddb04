//! Message body framing.
//!
//! A message header declares `(compressed_size, uncompressed_size,
//! is_compressed)`. An uncompressed body is a zero-copy view into the
//! input; a compressed body is inflated into a buffer owned by the
//! `MessageBody`, and must expand to exactly the declared size.

use crate::error::{WireError, WireResult};
use crate::input::InputCursor;
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::io::{Read, Write};
use tracing::error;

/// A contiguous, uncompressed message body.
///
/// Owns its decompression buffer when the body arrived compressed.
#[derive(Debug)]
pub struct MessageBody<'a> {
    bytes: Cow<'a, [u8]>,
}

impl<'a> MessageBody<'a> {
    /// Frames a body off the post-header cursor.
    ///
    /// Advances the cursor by `compressed_size` when compressed, by
    /// `uncompressed_size` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `BodyTooShort` when the declared size exceeds the
    /// available bytes and `Decompression` when inflation fails or does
    /// not produce exactly `uncompressed_size` bytes. Both are logged at
    /// error level.
    pub fn parse(
        cursor: &mut InputCursor<'a>,
        compressed_size: usize,
        uncompressed_size: usize,
        is_compressed: bool,
    ) -> WireResult<Self> {
        if is_compressed {
            if cursor.len() < compressed_size {
                error!(
                    "compressed message body is bigger ({}) than available bytes ({})",
                    compressed_size,
                    cursor.len()
                );
                return Err(WireError::BodyTooShort {
                    declared: compressed_size,
                    available: cursor.len(),
                });
            }
            let raw = cursor.take(compressed_size)?;
            let inflated = inflate_exact(raw, uncompressed_size)?;
            Ok(Self {
                bytes: Cow::Owned(inflated),
            })
        } else {
            if cursor.len() < uncompressed_size {
                error!(
                    "message body is bigger ({}) than available bytes ({})",
                    uncompressed_size,
                    cursor.len()
                );
                return Err(WireError::BodyTooShort {
                    declared: uncompressed_size,
                    available: cursor.len(),
                });
            }
            Ok(Self {
                bytes: Cow::Borrowed(cursor.take(uncompressed_size)?),
            })
        }
    }

    /// Returns the uncompressed body bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

/// Inflates `input`, requiring exactly `expected` output bytes.
fn inflate_exact(input: &[u8], expected: usize) -> WireResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    let decoder = ZlibDecoder::new(input);
    // Read one byte past the declared size so oversized output is caught
    // without inflating unbounded data.
    decoder
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| {
            error!("error decompressing message body: {e}");
            WireError::decompression(e.to_string())
        })?;
    if out.len() != expected {
        error!(
            "error decompressing message body: expected {} bytes, inflated {}",
            expected,
            out.len()
        );
        return Err(WireError::decompression(format!(
            "expected {} bytes, inflated {}",
            expected,
            out.len()
        )));
    }
    Ok(out)
}

/// Deflates a body for the compressed wire form.
///
/// # Errors
///
/// Returns `Decompression` if the encoder fails (not expected for
/// in-memory sinks).
pub fn compress_body(bytes: &[u8]) -> WireResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|()| encoder.finish())
        .map_err(|e| WireError::decompression(e.to_string()))
}
