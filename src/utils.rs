use chrono::Utc;

/// Seconds since epoch as a float, the timestamp unit used across the
/// SQLite tables and the API.
pub fn now_ts() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1_000.0
}
