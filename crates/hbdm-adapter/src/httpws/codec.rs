//! Inbound frame decompression
//!
//! Both channels gzip every frame they send; outbound frames are plain JSON.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::error::StreamError;

/// Gunzip one inbound frame
pub fn decompress(frame: &[u8]) -> Result<Vec<u8>, StreamError> {
    let mut decoder = GzDecoder::new(frame);
    let mut out = Vec::with_capacity(frame.len() * 4);
    decoder.read_to_end(&mut out).map_err(StreamError::Codec)?;
    Ok(out)
}
