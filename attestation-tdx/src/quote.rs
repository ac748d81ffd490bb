//! TDX quote structural validation and measurement extraction.

use crate::types::TdxMeasurements;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

/// Smallest quote that still contains the full RTMR block.
pub const MIN_QUOTE_SIZE: usize = 560;

/// Quote version this stack understands (TDX v4).
pub const QUOTE_VERSION: u16 = 4;

/// TDX Quote v4 layout (little-endian):
///
/// ```text
/// [0, 2)      u16 version (= 4)
/// [2, 48)     remaining quote header
/// [48, ..)    TD report body
///   [176, 224)  MRTD (48 bytes)
///   [368, 560)  RTMR0..RTMR3 (4 x 48 bytes)
/// ```
const QUOTE_HEADER_SIZE: usize = 48;
const MRTD_OFFSET: usize = QUOTE_HEADER_SIZE + 128; // 176
const RTMR_OFFSET: usize = QUOTE_HEADER_SIZE + 320; // 368
const REGISTER_SIZE: usize = 48;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("invalid_format: {0}")]
    InvalidFormat(String),

    #[error("invalid_quote_length: {actual} bytes (minimum {expected})")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid_quote_version: {0}")]
    UnsupportedVersion(u16),
}

/// Check length and version without touching the rest of the quote.
pub fn precheck(quote: &[u8]) -> Result<(), QuoteError> {
    if quote.len() < MIN_QUOTE_SIZE {
        return Err(QuoteError::InvalidLength {
            expected: MIN_QUOTE_SIZE,
            actual: quote.len(),
        });
    }

    let version = u16::from_le_bytes([quote[0], quote[1]]);
    if version != QUOTE_VERSION {
        return Err(QuoteError::UnsupportedVersion(version));
    }

    Ok(())
}

/// Extract `{mrtd, rtmr0..3}` from a raw quote, rendered lowercase hex.
pub fn extract_measurements(quote: &[u8]) -> Result<TdxMeasurements, QuoteError> {
    precheck(quote)?;

    let register = |offset: usize| hex::encode(&quote[offset..offset + REGISTER_SIZE]);

    Ok(TdxMeasurements {
        mrtd: register(MRTD_OFFSET),
        rtmr0: register(RTMR_OFFSET),
        rtmr1: register(RTMR_OFFSET + REGISTER_SIZE),
        rtmr2: register(RTMR_OFFSET + 2 * REGISTER_SIZE),
        rtmr3: register(RTMR_OFFSET + 3 * REGISTER_SIZE),
    })
}

/// Decode a base64 quote and extract its measurements.
pub fn extract_from_base64(quote_b64: &str) -> Result<TdxMeasurements, QuoteError> {
    let quote = decode(quote_b64)?;
    extract_measurements(&quote)
}

/// Decode a base64-encoded quote.
pub fn decode(quote_b64: &str) -> Result<Vec<u8>, QuoteError> {
    BASE64
        .decode(quote_b64)
        .map_err(|e| QuoteError::InvalidFormat(format!("invalid base64 quote: {e}")))
}
