use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    error::MalformedRecord,
    model::ConfigurationWithInstances,
    trade_values::{is_successful, normalize},
};

/// Typed view of a configuration's embedded JSON blob. Only the fields the
/// grouping logic needs; the rest of the blob (rpc endpoints, thresholds,
/// wallet key) stays opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedConfiguration {
    pub base_symbol: String,
    pub quote_symbol: String,
    pub chain_id: u64,
}

impl ParsedConfiguration {
    /// Case-normalized grouping key, e.g. "WETH/USDC".
    pub fn pair_key(&self) -> String {
        format!(
            "{}/{}",
            self.base_symbol.to_uppercase(),
            self.quote_symbol.to_uppercase()
        )
    }
}

/// Explicit parse-and-validate of the blob, never an unchecked cast.
pub fn parse_configuration(
    id: &str,
    raw: &JsonValue,
) -> Result<ParsedConfiguration, MalformedRecord> {
    let malformed = |reason: &str| MalformedRecord {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let obj = raw.as_object().ok_or_else(|| malformed("values is not an object"))?;

    let symbol = |key: &str| -> Result<String, MalformedRecord> {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed(&format!("missing or empty {key}")))
    };

    let base_symbol = symbol("base_symbol")?;
    let quote_symbol = symbol("quote_symbol")?;
    let chain_id = obj
        .get("chain_id")
        .and_then(|v| v.as_u64())
        .filter(|c| *c > 0)
        .ok_or_else(|| malformed("missing or invalid chain_id"))?;

    Ok(ParsedConfiguration {
        base_symbol,
        quote_symbol,
        chain_id,
    })
}

/// PnL on the strategy view-model is acknowledged as not yet computed. An
/// explicit sentinel avoids shipping a silently-wrong zero to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Pnl {
    NotComputed,
    Computed { value: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainGroup {
    pub chain_id: u64,
    pub configurations: Vec<ConfigurationWithInstances>,
}

/// Derived grouping of all configurations sharing a token pair, across
/// chains. Rebuilt from the flat fetch on every aggregation call; carries no
/// identity beyond the pair key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub pair: String,
    pub chains: Vec<ChainGroup>,
    pub instances_count: usize,
    pub trades_count: usize,
    pub pnl: Pnl,
}

/// Aggregation output plus the diagnostics for records that were excluded.
/// Aggregation is total over partially-invalid input: one corrupt blob must
/// not break the page render, so malformed configurations are reported here
/// rather than thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationReport {
    pub strategies: Vec<Strategy>,
    pub skipped: Vec<SkippedConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedConfiguration {
    pub id: String,
    pub reason: String,
}

/// Groups configurations into the pair -> chain -> configuration -> instance
/// -> trades tree. Pure and synchronous; strategy order follows first-seen
/// order of the pair key in the input, chain buckets follow first-seen order
/// within a strategy, and configurations/instances keep input order.
pub fn group_by_strategies(configurations: &[ConfigurationWithInstances]) -> AggregationReport {
    let mut strategies: Vec<Strategy> = Vec::new();
    let mut by_pair: HashMap<String, usize> = HashMap::new();
    let mut skipped: Vec<SkippedConfiguration> = Vec::new();

    for cfg in configurations {
        let parsed = match parse_configuration(&cfg.configuration.id, &cfg.configuration.values) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("strategy.skip id={} reason={}", e.id, e.reason);
                skipped.push(SkippedConfiguration {
                    id: e.id,
                    reason: e.reason,
                });
                continue;
            }
        };

        let pair = parsed.pair_key();
        let idx = *by_pair.entry(pair.clone()).or_insert_with(|| {
            strategies.push(Strategy {
                pair,
                chains: Vec::new(),
                instances_count: 0,
                trades_count: 0,
                pnl: Pnl::NotComputed,
            });
            strategies.len() - 1
        });
        let strategy = &mut strategies[idx];

        let chain_idx = match strategy
            .chains
            .iter()
            .position(|c| c.chain_id == parsed.chain_id)
        {
            Some(i) => i,
            None => {
                strategy.chains.push(ChainGroup {
                    chain_id: parsed.chain_id,
                    configurations: Vec::new(),
                });
                strategy.chains.len() - 1
            }
        };

        strategy.instances_count += cfg.instances.len();
        for inst in &cfg.instances {
            strategy.trades_count += inst
                .trades
                .iter()
                .filter(|t| is_successful(&normalize(&t.values)))
                .count();
        }

        // Failed/indeterminate trades stay in the tree; only the count
        // excludes them.
        strategy.chains[chain_idx].configurations.push(cfg.clone());
    }

    AggregationReport { strategies, skipped }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    CreatedAt,
    Chain,
    Pair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

/// Stable sort over a small enumerated set of keys; ties preserve original
/// relative order. Configurations whose blob fails to parse sort after all
/// parseable ones under the `Pair` key.
pub fn sort_configurations(
    mut configs: Vec<ConfigurationWithInstances>,
    key: SortKey,
    direction: Direction,
) -> Vec<ConfigurationWithInstances> {
    use std::cmp::Ordering;

    configs.sort_by(|a, b| {
        let ord = match key {
            SortKey::CreatedAt => a
                .configuration
                .created_ts
                .partial_cmp(&b.configuration.created_ts)
                .unwrap_or(Ordering::Equal),
            SortKey::Chain => a.configuration.chain_id.cmp(&b.configuration.chain_id),
            SortKey::Pair => {
                let pa = parse_configuration(&a.configuration.id, &a.configuration.values)
                    .ok()
                    .map(|p| p.pair_key());
                let pb = parse_configuration(&b.configuration.id, &b.configuration.values)
                    .ok()
                    .map(|p| p.pair_key());
                match (pa, pb) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        };
        match direction {
            Direction::Asc => ord,
            // reverse() keeps Equal as Equal, so the sort stays stable.
            Direction::Desc => ord.reverse(),
        }
    });
    configs
}

/// Zero or more equality filters combined with AND semantics. An empty set
/// matches everything. Symbol comparisons are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyFilters {
    pub chain_id: Option<u64>,
    pub base_symbol: Option<String>,
    pub quote_symbol: Option<String>,
}

impl StrategyFilters {
    pub fn is_empty(&self) -> bool {
        self.chain_id.is_none() && self.base_symbol.is_none() && self.quote_symbol.is_none()
    }
}

pub fn matches_filters(record: &ConfigurationWithInstances, filters: &StrategyFilters) -> bool {
    if filters.is_empty() {
        return true;
    }
    if let Some(chain) = filters.chain_id {
        if record.configuration.chain_id != chain {
            return false;
        }
    }
    if filters.base_symbol.is_some() || filters.quote_symbol.is_some() {
        let Ok(parsed) = parse_configuration(&record.configuration.id, &record.configuration.values)
        else {
            return false;
        };
        if let Some(base) = &filters.base_symbol {
            if !parsed.base_symbol.eq_ignore_ascii_case(base) {
                return false;
            }
        }
        if let Some(quote) = &filters.quote_symbol {
            if !parsed.quote_symbol.eq_ignore_ascii_case(quote) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Configuration, Instance, InstanceWithTrades, Trade};
    use serde_json::json;

    fn cfg_values(base: &str, quote: &str, chain: u64) -> JsonValue {
        json!({
            "base_symbol": base,
            "quote_symbol": quote,
            "chain_id": chain,
            "rpc_url": "https://rpc.example.com",
            "threshold_bps": 25
        })
    }

    fn trade(id: &str, instance: &str, successful: Option<bool>) -> Trade {
        let values = match successful {
            Some(status) => json!({
                "data": {
                    "blockNumber": 1u64,
                    "broadcast": { "hash": "0x1", "status": status },
                    "gasUsed": 100u64,
                    "profitDeltaBps": 1.0,
                    "timestampMs": 1u64
                }
            }),
            None => json!({ "garbage": true }),
        };
        Trade {
            id: id.to_string(),
            instance_id: instance.to_string(),
            values,
            created_ts: 0.0,
        }
    }

    fn config(
        id: &str,
        chain: u64,
        values: JsonValue,
        created_ts: f64,
        instances: Vec<InstanceWithTrades>,
    ) -> ConfigurationWithInstances {
        ConfigurationWithInstances {
            configuration: Configuration {
                id: id.to_string(),
                chain_id: chain,
                values,
                created_ts,
            },
            instances,
        }
    }

    fn instance(id: &str, cfg: &str, trades: Vec<Trade>) -> InstanceWithTrades {
        InstanceWithTrades {
            instance: Instance {
                id: id.to_string(),
                configuration_id: cfg.to_string(),
                started_ts: 0.0,
                ended_ts: None,
                created_ts: 0.0,
            },
            trades,
        }
    }

    #[test]
    fn parse_configuration_happy_path() {
        let p = parse_configuration("c1", &cfg_values("weth", "usdc", 1)).unwrap();
        assert_eq!(p.base_symbol, "weth");
        assert_eq!(p.pair_key(), "WETH/USDC");
        assert_eq!(p.chain_id, 1);
    }

    #[test]
    fn parse_configuration_rejects_bad_blobs() {
        assert!(parse_configuration("c", &json!("string")).is_err());
        assert!(parse_configuration("c", &json!({ "base_symbol": "WETH" })).is_err());
        assert!(parse_configuration(
            "c",
            &json!({ "base_symbol": "", "quote_symbol": "USDC", "chain_id": 1 })
        )
        .is_err());
        assert!(parse_configuration(
            "c",
            &json!({ "base_symbol": "WETH", "quote_symbol": "USDC", "chain_id": 0 })
        )
        .is_err());
    }

    // Scenario from the dashboard's core contract: two WETH/USDC configs on
    // different chains collapse into one strategy with two chain buckets.
    #[test]
    fn groups_same_pair_across_chains() {
        let input = vec![
            config(
                "c1",
                1,
                cfg_values("WETH", "USDC", 1),
                10.0,
                vec![
                    instance("i1", "c1", vec![trade("t1", "i1", Some(true))]),
                    instance("i2", "c1", vec![trade("t2", "i2", Some(false))]),
                ],
            ),
            config(
                "c2",
                8453,
                cfg_values("weth", "usdc", 8453),
                11.0,
                vec![instance("i3", "c2", vec![trade("t3", "i3", Some(true))])],
            ),
        ];

        let report = group_by_strategies(&input);
        assert!(report.skipped.is_empty());
        assert_eq!(report.strategies.len(), 1);

        let s = &report.strategies[0];
        assert_eq!(s.pair, "WETH/USDC");
        assert_eq!(s.chains.len(), 2);
        assert_eq!(s.chains[0].chain_id, 1);
        assert_eq!(s.chains[1].chain_id, 8453);
        assert_eq!(s.instances_count, 3);
        assert_eq!(s.trades_count, 2);
        assert_eq!(s.pnl, Pnl::NotComputed);
    }

    #[test]
    fn indeterminate_trades_never_increment_the_count() {
        let input = vec![config(
            "c1",
            1,
            cfg_values("WETH", "USDC", 1),
            0.0,
            vec![instance(
                "i1",
                "c1",
                vec![
                    trade("t1", "i1", None),
                    trade("t2", "i1", Some(false)),
                    trade("t3", "i1", Some(true)),
                ],
            )],
        )];
        let report = group_by_strategies(&input);
        assert_eq!(report.strategies[0].trades_count, 1);
        // The failed/indeterminate trades are still present in the tree.
        assert_eq!(
            report.strategies[0].chains[0].configurations[0].instances[0]
                .trades
                .len(),
            3
        );
    }

    #[test]
    fn malformed_configuration_is_excluded_not_thrown() {
        let input = vec![
            config("c1", 1, cfg_values("WETH", "USDC", 1), 0.0, vec![]),
            config("c2", 1, json!({ "oops": [] }), 0.0, vec![]),
            config("c3", 137, cfg_values("WBTC", "USDT", 137), 0.0, vec![]),
        ];
        let report = group_by_strategies(&input);
        assert_eq!(report.strategies.len(), 2);
        assert_eq!(report.strategies[0].pair, "WETH/USDC");
        assert_eq!(report.strategies[1].pair, "WBTC/USDT");
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, "c2");
    }

    #[test]
    fn every_configuration_lands_in_exactly_one_chain_bucket() {
        let input = vec![
            config("c1", 1, cfg_values("WETH", "USDC", 1), 0.0, vec![instance("i1", "c1", vec![])]),
            config("c2", 1, cfg_values("WETH", "USDC", 1), 0.0, vec![instance("i2", "c2", vec![])]),
            config("c3", 10, cfg_values("OP", "USDC", 10), 0.0, vec![]),
        ];
        let report = group_by_strategies(&input);

        let placed: usize = report
            .strategies
            .iter()
            .flat_map(|s| &s.chains)
            .map(|c| c.configurations.len())
            .sum();
        assert_eq!(placed, 3);

        let total_instances: usize = report.strategies.iter().map(|s| s.instances_count).sum();
        assert_eq!(total_instances, 2);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let input = vec![
            config(
                "c1",
                1,
                cfg_values("WETH", "USDC", 1),
                0.0,
                vec![instance("i1", "c1", vec![trade("t1", "i1", Some(true))])],
            ),
            config("c2", 137, cfg_values("MATIC", "USDC", 137), 1.0, vec![]),
        ];
        let a = group_by_strategies(&input);
        let b = group_by_strategies(&input);
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }

    #[test]
    fn sort_by_chain_is_stable() {
        let configs = vec![
            config("a", 1, cfg_values("WETH", "USDC", 1), 3.0, vec![]),
            config("b", 1, cfg_values("WBTC", "USDC", 1), 1.0, vec![]),
            config("c", 137, cfg_values("MATIC", "USDC", 137), 2.0, vec![]),
            config("d", 1, cfg_values("ARB", "USDC", 1), 2.0, vec![]),
        ];
        let sorted = sort_configurations(configs, SortKey::Chain, Direction::Asc);
        let ids: Vec<&str> = sorted.iter().map(|c| c.configuration.id.as_str()).collect();
        // Equal chain ids preserve original relative order.
        assert_eq!(ids, vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn sort_by_created_desc() {
        let configs = vec![
            config("a", 1, cfg_values("WETH", "USDC", 1), 1.0, vec![]),
            config("b", 1, cfg_values("WETH", "USDC", 1), 3.0, vec![]),
            config("c", 1, cfg_values("WETH", "USDC", 1), 2.0, vec![]),
        ];
        let sorted = sort_configurations(configs, SortKey::CreatedAt, Direction::Desc);
        let ids: Vec<&str> = sorted.iter().map(|c| c.configuration.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn sort_by_pair_puts_unparseable_last() {
        let configs = vec![
            config("bad", 1, json!({}), 0.0, vec![]),
            config("b", 1, cfg_values("WBTC", "USDC", 1), 0.0, vec![]),
            config("a", 1, cfg_values("ARB", "USDC", 1), 0.0, vec![]),
        ];
        let sorted = sort_configurations(configs, SortKey::Pair, Direction::Asc);
        let ids: Vec<&str> = sorted.iter().map(|c| c.configuration.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "bad"]);
    }

    #[test]
    fn empty_filter_set_matches_everything() {
        let c = config("c1", 1, json!({ "broken": true }), 0.0, vec![]);
        assert!(matches_filters(&c, &StrategyFilters::default()));
    }

    #[test]
    fn filters_combine_with_and_semantics() {
        let c = config("c1", 1, cfg_values("WETH", "USDC", 1), 0.0, vec![]);

        let f = StrategyFilters {
            chain_id: Some(1),
            base_symbol: Some("weth".into()),
            quote_symbol: None,
        };
        assert!(matches_filters(&c, &f));

        let f = StrategyFilters {
            chain_id: Some(1),
            base_symbol: Some("WBTC".into()),
            quote_symbol: None,
        };
        assert!(!matches_filters(&c, &f));

        let f = StrategyFilters {
            chain_id: Some(137),
            base_symbol: None,
            quote_symbol: None,
        };
        assert!(!matches_filters(&c, &f));
    }

    #[test]
    fn symbol_filter_on_unparseable_record_never_matches() {
        let c = config("c1", 1, json!({}), 0.0, vec![]);
        let f = StrategyFilters {
            chain_id: None,
            base_symbol: Some("WETH".into()),
            quote_symbol: None,
        };
        assert!(!matches_filters(&c, &f));
    }
}
