//! Compressor Module
//!
//! zlib framing for entity payloads.

use std::io::{self, Write};

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

/// Deflates `value` into a zlib stream.
pub fn compress(value: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(value.len() / 2), Compression::default());
    encoder.write_all(value)?;
    encoder.finish()
}

/// Inflates a complete zlib stream, or returns `None` if `value` is not one.
///
/// Truncated streams count as invalid.
pub fn try_decompress(value: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = Decompress::new(true);
    let mut out = Vec::with_capacity(value.len() * 2 + 64);

    loop {
        let consumed = decoder.total_in() as usize;
        let status = decoder
            .decompress_vec(&value[consumed..], &mut out, FlushDecompress::Finish)
            .ok()?;

        match status {
            Status::StreamEnd => return Some(out),
            Status::Ok | Status::BufError => {
                if out.len() < out.capacity() {
                    // input exhausted before the end of the stream
                    return None;
                }
                out.reserve(out.capacity().max(64));
            }
        }
    }
}

/// Inflates `value`, falling back to the input when it is not valid zlib.
pub fn decompress(value: &[u8]) -> Vec<u8> {
    try_decompress(value).unwrap_or_else(|| value.to_vec())
}
