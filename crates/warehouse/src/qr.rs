//! QR label payloads for physical batch tracking.
//!
//! Every batch gets a printed label. The primary payload is a small JSON
//! document scanned by the warehouse app; `granary://batch/{id}` is the
//! low-tech fallback that fits in any barcode field. Both resolve to the
//! batch id. Everything else on the label is display data frozen at print
//! time; the batch row stays the source of truth for the live balance.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use granary_core::{BatchId, Crop, DomainError, DomainResult};

/// URI scheme of the fallback scan payload.
pub const SCAN_URI_PREFIX: &str = "granary://batch/";

/// The JSON document embedded in a batch QR label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrToken {
    pub batch_id: BatchId,
    pub batch_code: String,
    pub crop: Crop,
    /// Display name of the source (farmer, supplier, or opening stock).
    pub source: String,
    /// Bag count at creation time, not the live balance.
    pub bags: i64,
    pub date: NaiveDate,
    /// Deep link the scanning app opens.
    pub scan_url: String,
}

impl QrToken {
    pub fn encode(&self) -> DomainResult<String> {
        serde_json::to_string(self)
            .map_err(|e| DomainError::storage(format!("failed to encode QR token: {e}")))
    }

    /// Fallback payload for plain barcode printers.
    pub fn uri(batch_id: BatchId) -> String {
        format!("{SCAN_URI_PREFIX}{batch_id}")
    }
}

/// Build the scan deep link for a batch under the configured base URL.
pub fn scan_url(base_url: &str, batch_id: BatchId) -> String {
    format!("{}/batch/{}", base_url.trim_end_matches('/'), batch_id)
}

/// Extract the batch id from a scanned payload.
///
/// Accepts both label formats: the JSON document and the URI fallback.
pub fn parse_scan(token: &str) -> DomainResult<BatchId> {
    let trimmed = token.trim();
    if let Some(id) = trimmed.strip_prefix(SCAN_URI_PREFIX) {
        return id.parse();
    }
    if trimmed.starts_with('{') {
        let decoded: QrToken = serde_json::from_str(trimmed)
            .map_err(|e| DomainError::validation(format!("unreadable QR payload: {e}")))?;
        return Ok(decoded.batch_id);
    }
    Err(DomainError::validation(
        "scan payload is neither a QR document nor a batch URI",
    ))
}
