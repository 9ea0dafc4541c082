//! Payload compression for the UDP transport

use crate::config::CompressionMode;
use crate::{GelfError, Result};

#[cfg(feature = "compression")]
use flate2::{write::ZlibEncoder, Compression};
#[cfg(feature = "compression")]
use std::io::Write;

/// Compress `payload` according to `mode`
pub fn compress(mode: CompressionMode, payload: Vec<u8>) -> Result<Vec<u8>> {
    match mode {
        CompressionMode::None => Ok(payload),
        CompressionMode::Deflate => deflate(&payload),
    }
}

#[cfg(feature = "compression")]
fn deflate(payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

/// Fallback implementation when the compression feature is not enabled
#[cfg(not(feature = "compression"))]
fn deflate(_payload: &[u8]) -> Result<Vec<u8>> {
    Err(GelfError::Config(
        "Deflate support not compiled in. Enable 'compression' feature.".to_string(),
    ))
}

/// Inflate a zlib payload produced by [`compress`]
#[cfg(feature = "compression")]
pub fn inflate(payload: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    let mut out = Vec::new();
    ZlibDecoder::new(payload)
        .read_to_end(&mut out)
        .map_err(|e| GelfError::Validation(format!("payload is not valid zlib data: {}", e)))?;
    Ok(out)
}
