use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One deployed bot parameter-set. `values` is the raw JSON blob written by
/// the operator (rpc endpoints, token pair, thresholds, ...); it is parsed
/// into a typed shape only at the aggregation boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub id: String,
    pub chain_id: u64,
    pub values: JsonValue,
    pub created_ts: f64,
}

/// One running (or stopped) execution of a configuration.
/// `ended_ts = None` means currently active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub configuration_id: String,
    pub started_ts: f64,
    pub ended_ts: Option<f64>,
    pub created_ts: f64,
}

/// One executed (or attempted) swap. `values` is the versioned payload
/// (V1 legacy flat `payload`, V2 `data`-wrapped); see `trade_values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub instance_id: String,
    pub values: JsonValue,
    pub created_ts: f64,
}

/// Append-only observed price sample tied to an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub id: i64,
    pub instance_id: String,
    pub value: f64,
    pub created_ts: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceWithTrades {
    #[serde(flatten)]
    pub instance: Instance,
    pub trades: Vec<Trade>,
}

/// The flat shape the strategy aggregator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationWithInstances {
    #[serde(flatten)]
    pub configuration: Configuration,
    pub instances: Vec<InstanceWithTrades>,
}
