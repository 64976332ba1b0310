use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Canonical internal trade shape, regardless of which payload version the
/// bot wrote. Downstream logic never branches on version again.
///
/// `broadcast_status = None` means "undeterminable" (malformed or pre-receipt
/// payload); it is distinct from `Some(false)` (broadcast and reverted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTrade {
    pub block_number: u64,
    pub broadcast_hash: Option<String>,
    pub broadcast_status: Option<bool>,
    pub gas_used: u64,
    pub profit_delta_bps: f64,
    pub timestamp_ms: u64,
}

impl CanonicalTrade {
    fn undeterminable() -> Self {
        Self {
            block_number: 0,
            broadcast_hash: None,
            broadcast_status: None,
            gas_used: 0,
            profit_delta_bps: 0.0,
            timestamp_ms: 0,
        }
    }
}

/// Maps a raw trade `values` blob into the canonical shape. Version detection
/// is an explicit discriminant check: a `data` wrapper means V2, a flat
/// `payload` means V1 legacy. Anything else is undeterminable.
///
/// Never fails: a corrupt record must not blank the whole dashboard, so the
/// caller always gets a canonical shape back.
pub fn normalize(raw: &JsonValue) -> CanonicalTrade {
    if let Some(data) = raw.get("data") {
        return normalize_v2(data);
    }
    if let Some(payload) = raw.get("payload") {
        return normalize_v1(payload);
    }
    CanonicalTrade::undeterminable()
}

/// True iff the trade broadcast a receipt and its status flag is true.
/// `None` (undeterminable) and `Some(false)` both count as not successful.
pub fn is_successful(values: &CanonicalTrade) -> bool {
    values.broadcast_status == Some(true)
}

// V2 (current): { "data": { "blockNumber", "broadcast": { "hash", "status" },
//                           "gasUsed", "profitDeltaBps", "timestampMs" } }
fn normalize_v2(data: &JsonValue) -> CanonicalTrade {
    if !data.is_object() {
        return CanonicalTrade::undeterminable();
    }
    let broadcast = data.get("broadcast");
    CanonicalTrade {
        block_number: get_u64(data, "blockNumber"),
        broadcast_hash: broadcast
            .and_then(|b| b.get("hash"))
            .and_then(|h| h.as_str())
            .map(|h| h.to_string()),
        broadcast_status: broadcast.and_then(|b| b.get("status")).and_then(|s| s.as_bool()),
        gas_used: get_u64(data, "gasUsed"),
        profit_delta_bps: get_f64(data, "profitDeltaBps"),
        timestamp_ms: get_u64(data, "timestampMs"),
    }
}

// V1 (legacy, flat): { "payload": { "blockNumber", "txHash", "txStatus",
//                                   "gasUsed", "profitBps", "ts" } }
// `ts` is seconds since epoch.
fn normalize_v1(payload: &JsonValue) -> CanonicalTrade {
    if !payload.is_object() {
        return CanonicalTrade::undeterminable();
    }
    CanonicalTrade {
        block_number: get_u64(payload, "blockNumber"),
        broadcast_hash: payload
            .get("txHash")
            .and_then(|h| h.as_str())
            .map(|h| h.to_string()),
        broadcast_status: payload.get("txStatus").and_then(|s| s.as_bool()),
        gas_used: get_u64(payload, "gasUsed"),
        profit_delta_bps: get_f64(payload, "profitBps"),
        timestamp_ms: get_u64(payload, "ts").saturating_mul(1_000),
    }
}

fn get_u64(v: &JsonValue, key: &str) -> u64 {
    v.get(key).and_then(|x| x.as_u64()).unwrap_or(0)
}

fn get_f64(v: &JsonValue, key: &str) -> f64 {
    v.get(key).and_then(|x| x.as_f64()).unwrap_or(0.0)
}
