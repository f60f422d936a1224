//! Transport-wrapper repair for fetched PDF payloads.
//!
//! Steps run in order: gzip unwrap, envelope stripping, passthrough. Each
//! step only runs when the buffer does not already start with the PDF magic.

use super::types::{DeliveryMode, IngestError, Repair};
use flate2::read::GzDecoder;
use std::io::Read;
use tracing::{debug, warn};

pub const PDF_MAGIC: &[u8] = b"%PDF-";
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone)]
pub struct Normalized {
    pub bytes: Vec<u8>,
    pub delivery: DeliveryMode,
    pub repairs: Vec<Repair>,
}

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Offset of the first `magic` starting within the first `window` bytes.
pub fn find_magic(haystack: &[u8], magic: &[u8], window: usize) -> Option<usize> {
    if magic.is_empty() {
        return None;
    }
    haystack
        .windows(magic.len())
        .take(window)
        .position(|w| w == magic)
}

pub fn normalize(
    mut bytes: Vec<u8>,
    max_bytes: u64,
    search_window: usize,
) -> Result<Normalized, IngestError> {
    let mut repairs = Vec::new();

    if is_gzip(&bytes) {
        match gunzip(&bytes, max_bytes)? {
            Some(inflated) => {
                debug!(
                    compressed = bytes.len(),
                    inflated = inflated.len(),
                    "unwrapped gzip payload"
                );
                repairs.push(Repair::GzipUnwrapped {
                    compressed_bytes: bytes.len(),
                });
                bytes = inflated;
            }
            None => warn!("payload has gzip magic but does not inflate; keeping raw bytes"),
        }
    }

    if !bytes.starts_with(PDF_MAGIC) {
        if let Some(offset) = find_magic(&bytes, PDF_MAGIC, search_window) {
            debug!(offset, "stripping envelope before PDF header");
            bytes.drain(..offset);
            repairs.push(Repair::EnvelopeStripped { offset });
        }
    }

    let delivery = if !bytes.starts_with(PDF_MAGIC) {
        warn!(
            bytes = bytes.len(),
            "payload does not start with PDF magic; delivering inline"
        );
        repairs.push(Repair::Passthrough);
        DeliveryMode::InlineBase64
    } else if repairs.is_empty() {
        DeliveryMode::ByReference
    } else {
        DeliveryMode::InlineBase64
    };

    Ok(Normalized {
        bytes,
        delivery,
        repairs,
    })
}

/// Inflates at most `max_bytes`. `Ok(None)` means the stream is corrupt.
fn gunzip(bytes: &[u8], max_bytes: u64) -> Result<Option<Vec<u8>>, IngestError> {
    let mut out = Vec::new();
    let mut decoder = GzDecoder::new(bytes).take(max_bytes.saturating_add(1));
    if let Err(e) = decoder.read_to_end(&mut out) {
        debug!(error = %e, "gzip inflate failed");
        return Ok(None);
    }
    if out.len() as u64 > max_bytes {
        return Err(IngestError::PayloadTooLarge {
            limit: max_bytes,
            declared: None,
        });
    }
    Ok(Some(out))
}
