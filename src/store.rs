use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;

use crate::model::{
    Configuration, ConfigurationWithInstances, Instance, InstanceWithTrades, PricePoint, Trade,
};

#[derive(Clone)]
pub struct SqliteStore {
    path: String,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            anyhow::bail!("SQLITE_PATH is empty");
        }
        if path != ":memory:" && !path.starts_with("file:") {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create sqlite parent dir for {path}"))?;
            }
        }

        // rusqlite::Connection is not Send/Sync. We keep only a path here and
        // open short-lived connections per operation. WAL keeps this fast
        // enough for dashboard reads and bot ingestion writes.
        Ok(Self {
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn open_conn(&self) -> Result<Connection> {
        let conn =
            Connection::open(&self.path).with_context(|| format!("open sqlite {}", self.path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(conn)
    }

    pub fn init_db(&self) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS configurations (
  id TEXT PRIMARY KEY,
  chain_id INTEGER NOT NULL,
  values_json TEXT NOT NULL,
  created_ts REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS instances (
  id TEXT PRIMARY KEY,
  configuration_id TEXT NOT NULL,
  started_ts REAL NOT NULL,
  ended_ts REAL,
  created_ts REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_instances_configuration ON instances(configuration_id, created_ts);

CREATE TABLE IF NOT EXISTS trades (
  id TEXT PRIMARY KEY,
  instance_id TEXT NOT NULL,
  values_json TEXT NOT NULL,
  created_ts REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_instance ON trades(instance_id, created_ts);

CREATE TABLE IF NOT EXISTS prices (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  instance_id TEXT NOT NULL,
  value REAL NOT NULL,
  created_ts REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_prices_instance ON prices(instance_id, created_ts);

CREATE TABLE IF NOT EXISTS runtime_status (
  component TEXT PRIMARY KEY,
  ts REAL,
  level TEXT,
  message TEXT,
  detail TEXT
);
"#,
        )?;
        Ok(())
    }

    // ---- Ingestion writes ----

    pub fn insert_configuration(
        &self,
        id: &str,
        chain_id: u64,
        values: &JsonValue,
        created_ts: f64,
    ) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            "INSERT INTO configurations(id, chain_id, values_json, created_ts) VALUES(?,?,?,?)",
            params![id, chain_id as i64, serde_json::to_string(values)?, created_ts],
        )?;
        Ok(())
    }

    pub fn insert_instance(
        &self,
        id: &str,
        configuration_id: &str,
        started_ts: f64,
        created_ts: f64,
    ) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            r#"
INSERT INTO instances(id, configuration_id, started_ts, ended_ts, created_ts)
VALUES(?,?,?,NULL,?)
"#,
            params![id, configuration_id, started_ts, created_ts],
        )?;
        Ok(())
    }

    /// Returns false when no such instance exists.
    pub fn end_instance(&self, id: &str, ended_ts: f64) -> Result<bool> {
        let conn = self.open_conn()?;
        let changed = conn.execute(
            "UPDATE instances SET ended_ts=? WHERE id=?",
            params![ended_ts, id],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_trade(
        &self,
        id: &str,
        instance_id: &str,
        values: &JsonValue,
        created_ts: f64,
    ) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            "INSERT INTO trades(id, instance_id, values_json, created_ts) VALUES(?,?,?,?)",
            params![id, instance_id, serde_json::to_string(values)?, created_ts],
        )?;
        Ok(())
    }

    pub fn insert_price(&self, instance_id: &str, value: f64, created_ts: f64) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            "INSERT INTO prices(instance_id, value, created_ts) VALUES(?,?,?)",
            params![instance_id, value, created_ts],
        )?;
        Ok(())
    }

    // ---- Dashboard reads ----

    pub fn fetch_configuration(&self, id: &str) -> Result<Option<Configuration>> {
        let conn = self.open_conn()?;
        let row = conn
            .query_row(
                "SELECT id, chain_id, values_json, created_ts FROM configurations WHERE id=?",
                params![id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, f64>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(id, chain_id, values_json, created_ts)| Configuration {
            id,
            chain_id: chain_id as u64,
            values: parse_values(&values_json),
            created_ts,
        }))
    }

    pub fn fetch_instance(&self, id: &str) -> Result<Option<Instance>> {
        let conn = self.open_conn()?;
        let row = conn
            .query_row(
                "SELECT id, configuration_id, started_ts, ended_ts, created_ts FROM instances WHERE id=?",
                params![id],
                map_instance_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Instances still running (`ended_ts IS NULL`), oldest first. The fast
    /// poll tier only needs these, not the full nested tree.
    pub fn fetch_active_instances(&self) -> Result<Vec<Instance>> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT id, configuration_id, started_ts, ended_ts, created_ts
FROM instances
WHERE ended_ts IS NULL
ORDER BY created_ts ASC, id ASC
"#,
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            out.push(map_instance_row(r)?);
        }
        Ok(out)
    }

    /// The flat list the strategy aggregator consumes: configurations in
    /// creation order, each with its instances and their trades nested in.
    pub fn fetch_configurations_with_instances(
        &self,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<ConfigurationWithInstances>> {
        let conn = self.open_conn()?;

        let mut stmt = conn.prepare(
            r#"
SELECT id, chain_id, values_json, created_ts
FROM configurations
ORDER BY created_ts ASC, id ASC
LIMIT ? OFFSET ?
"#,
        )?;
        let mut rows = stmt.query(params![limit as i64, skip as i64])?;
        let mut configs: Vec<Configuration> = Vec::new();
        while let Some(r) = rows.next()? {
            configs.push(Configuration {
                id: r.get::<_, String>(0)?,
                chain_id: r.get::<_, i64>(1)? as u64,
                values: parse_values(&r.get::<_, String>(2)?),
                created_ts: r.get::<_, f64>(3)?,
            });
        }

        let mut inst_stmt = conn.prepare(
            r#"
SELECT id, configuration_id, started_ts, ended_ts, created_ts
FROM instances
WHERE configuration_id = ?
ORDER BY created_ts ASC, id ASC
"#,
        )?;
        let mut trade_stmt = conn.prepare(
            r#"
SELECT id, instance_id, values_json, created_ts
FROM trades
WHERE instance_id = ?
ORDER BY created_ts ASC, id ASC
"#,
        )?;

        let mut out = Vec::with_capacity(configs.len());
        for configuration in configs {
            let mut instances = Vec::new();
            let mut inst_rows = inst_stmt.query(params![configuration.id])?;
            while let Some(r) = inst_rows.next()? {
                let instance = map_instance_row(r)?;
                let mut trades = Vec::new();
                let mut trade_rows = trade_stmt.query(params![instance.id])?;
                while let Some(t) = trade_rows.next()? {
                    trades.push(map_trade_row(t)?);
                }
                instances.push(InstanceWithTrades { instance, trades });
            }
            out.push(ConfigurationWithInstances {
                configuration,
                instances,
            });
        }
        Ok(out)
    }

    pub fn fetch_trades_by_instance(&self, instance_id: &str, limit: usize) -> Result<Vec<Trade>> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT id, instance_id, values_json, created_ts
FROM trades
WHERE instance_id = ?
ORDER BY created_ts DESC
LIMIT ?
"#,
        )?;
        let mut rows = stmt.query(params![instance_id, limit as i64])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            out.push(map_trade_row(r)?);
        }
        Ok(out)
    }

    pub fn fetch_trades_by_configuration(
        &self,
        configuration_id: &str,
        limit: usize,
    ) -> Result<Vec<Trade>> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT t.id, t.instance_id, t.values_json, t.created_ts
FROM trades t
JOIN instances i ON i.id = t.instance_id
WHERE i.configuration_id = ?
ORDER BY t.created_ts DESC
LIMIT ?
"#,
        )?;
        let mut rows = stmt.query(params![configuration_id, limit as i64])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            out.push(map_trade_row(r)?);
        }
        Ok(out)
    }

    pub fn fetch_prices(&self, instance_id: &str, limit: usize) -> Result<Vec<PricePoint>> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT id, instance_id, value, created_ts
FROM prices
WHERE instance_id = ?
ORDER BY created_ts DESC
LIMIT ?
"#,
        )?;
        let mut rows = stmt.query(params![instance_id, limit as i64])?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            out.push(PricePoint {
                id: r.get::<_, i64>(0)?,
                instance_id: r.get::<_, String>(1)?,
                value: r.get::<_, f64>(2)?,
                created_ts: r.get::<_, f64>(3)?,
            });
        }
        Ok(out)
    }

    // ---- Health telemetry ----

    pub fn upsert_runtime_status(
        &self,
        component: &str,
        level: &str,
        message: &str,
        detail: Option<&str>,
        ts: f64,
    ) -> Result<()> {
        let conn = self.open_conn()?;
        conn.execute(
            r#"
INSERT INTO runtime_status(component, ts, level, message, detail)
VALUES(?,?,?,?,?)
ON CONFLICT(component) DO UPDATE SET
  ts=excluded.ts,
  level=excluded.level,
  message=excluded.message,
  detail=excluded.detail
"#,
            params![component, ts, level, message, detail],
        )?;
        Ok(())
    }

    pub fn fetch_runtime_statuses(&self) -> Result<JsonValue> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(
            "SELECT component, ts, level, message, detail FROM runtime_status ORDER BY ts DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = serde_json::Map::new();
        while let Some(r) = rows.next()? {
            let component: String = r.get(0)?;
            let ts: f64 = r.get(1)?;
            let level: String = r.get(2)?;
            let message: String = r.get(3)?;
            let detail: Option<String> = r.get(4)?;
            out.insert(
                component.clone(),
                serde_json::json!({
                    "component": component,
                    "ts": ts,
                    "level": level,
                    "message": message,
                    "detail": detail.unwrap_or_default(),
                }),
            );
        }
        Ok(JsonValue::Object(out))
    }
}

// Corrupt stored JSON becomes Null rather than failing the whole fetch; the
// aggregator then reports the record as malformed.
fn parse_values(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or(JsonValue::Null)
}

fn map_instance_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Instance> {
    Ok(Instance {
        id: r.get::<_, String>(0)?,
        configuration_id: r.get::<_, String>(1)?,
        started_ts: r.get::<_, f64>(2)?,
        ended_ts: r.get::<_, Option<f64>>(3)?,
        created_ts: r.get::<_, f64>(4)?,
    })
}

fn map_trade_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: r.get::<_, String>(0)?,
        instance_id: r.get::<_, String>(1)?,
        values: parse_values(&r.get::<_, String>(2)?),
        created_ts: r.get::<_, f64>(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TempStore {
        store: SqliteStore,
        path: std::path::PathBuf,
    }

    impl TempStore {
        fn new() -> Self {
            let path =
                std::env::temp_dir().join(format!("dexwatch-test-{}.sqlite", uuid::Uuid::new_v4()));
            let store = SqliteStore::new(path.to_str().unwrap()).unwrap();
            store.init_db().unwrap();
            Self { store, path }
        }
    }

    impl Drop for TempStore {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
            let _ = std::fs::remove_file(self.path.with_extension("sqlite-wal"));
            let _ = std::fs::remove_file(self.path.with_extension("sqlite-shm"));
        }
    }

    fn cfg_values() -> JsonValue {
        json!({ "base_symbol": "WETH", "quote_symbol": "USDC", "chain_id": 1 })
    }

    #[test]
    fn nested_fetch_preserves_input_order() {
        let t = TempStore::new();
        let s = &t.store;

        s.insert_configuration("c1", 1, &cfg_values(), 10.0).unwrap();
        s.insert_configuration("c2", 8453, &cfg_values(), 20.0).unwrap();
        s.insert_instance("i1", "c1", 11.0, 11.0).unwrap();
        s.insert_instance("i2", "c1", 12.0, 12.0).unwrap();
        s.insert_trade("t1", "i1", &json!({ "payload": {} }), 11.5).unwrap();
        s.insert_trade("t2", "i2", &json!({ "data": {} }), 12.5).unwrap();

        let configs = s.fetch_configurations_with_instances(100, 0).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].configuration.id, "c1");
        assert_eq!(configs[0].instances.len(), 2);
        assert_eq!(configs[0].instances[0].instance.id, "i1");
        assert_eq!(configs[0].instances[0].trades.len(), 1);
        assert_eq!(configs[1].configuration.id, "c2");
        assert!(configs[1].instances.is_empty());
    }

    #[test]
    fn limit_and_skip_page_through_configurations() {
        let t = TempStore::new();
        for i in 0..5 {
            t.store
                .insert_configuration(&format!("c{i}"), 1, &cfg_values(), i as f64)
                .unwrap();
        }
        let page = t.store.fetch_configurations_with_instances(2, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].configuration.id, "c2");
        assert_eq!(page[1].configuration.id, "c3");
    }

    #[test]
    fn end_instance_sets_ended_ts() {
        let t = TempStore::new();
        t.store.insert_configuration("c1", 1, &cfg_values(), 0.0).unwrap();
        t.store.insert_instance("i1", "c1", 1.0, 1.0).unwrap();

        assert!(t.store.end_instance("i1", 99.0).unwrap());
        let inst = t.store.fetch_instance("i1").unwrap().unwrap();
        assert_eq!(inst.ended_ts, Some(99.0));

        assert!(!t.store.end_instance("missing", 99.0).unwrap());
    }

    #[test]
    fn active_instances_excludes_ended() {
        let t = TempStore::new();
        t.store.insert_configuration("c1", 1, &cfg_values(), 0.0).unwrap();
        t.store.insert_instance("i1", "c1", 1.0, 1.0).unwrap();
        t.store.insert_instance("i2", "c1", 2.0, 2.0).unwrap();
        t.store.end_instance("i1", 9.0).unwrap();

        let active = t.store.fetch_active_instances().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "i2");
    }

    #[test]
    fn trades_fetch_by_configuration_joins_instances() {
        let t = TempStore::new();
        t.store.insert_configuration("c1", 1, &cfg_values(), 0.0).unwrap();
        t.store.insert_instance("i1", "c1", 1.0, 1.0).unwrap();
        t.store.insert_instance("i2", "c1", 2.0, 2.0).unwrap();
        t.store.insert_trade("t1", "i1", &json!({}), 3.0).unwrap();
        t.store.insert_trade("t2", "i2", &json!({}), 4.0).unwrap();

        let trades = t.store.fetch_trades_by_configuration("c1", 10).unwrap();
        assert_eq!(trades.len(), 2);
        // Newest first.
        assert_eq!(trades[0].id, "t2");

        let by_instance = t.store.fetch_trades_by_instance("i1", 10).unwrap();
        assert_eq!(by_instance.len(), 1);
    }

    #[test]
    fn corrupt_values_json_becomes_null_not_an_error() {
        let t = TempStore::new();
        let conn = t.store.open_conn().unwrap();
        conn.execute(
            "INSERT INTO configurations(id, chain_id, values_json, created_ts) VALUES('bad', 1, '{not json', 0.0)",
            [],
        )
        .unwrap();

        let configs = t.store.fetch_configurations_with_instances(10, 0).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].configuration.values, JsonValue::Null);
    }

    #[test]
    fn prices_and_runtime_status_roundtrip() {
        let t = TempStore::new();
        t.store.insert_price("i1", 1.25, 1.0).unwrap();
        t.store.insert_price("i1", 1.30, 2.0).unwrap();
        let prices = t.store.fetch_prices("i1", 10).unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].value, 1.30);

        t.store
            .upsert_runtime_status("poller.net_worth", "ok", "refreshed 2 wallets", None, 5.0)
            .unwrap();
        t.store
            .upsert_runtime_status("poller.net_worth", "error", "refresh_failed", Some("504"), 6.0)
            .unwrap();
        let statuses = t.store.fetch_runtime_statuses().unwrap();
        let s = statuses.get("poller.net_worth").unwrap();
        assert_eq!(s.get("level").unwrap(), "error");
        assert_eq!(s.get("ts").unwrap().as_f64().unwrap(), 6.0);
    }
}
