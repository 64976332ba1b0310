use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    cache::MirrorCache,
    config::Settings,
    error::UpstreamError,
    strategy::{
        group_by_strategies, matches_filters, sort_configurations, Direction, SortKey,
        StrategyFilters,
    },
    store::SqliteStore,
    trade_values::{is_successful, normalize},
    upstream::{CandleClient, NetWorthClient, OrderbookClient},
    utils::now_ts,
};

pub const SUPPORTED_CANDLE_SECONDS: [u64; 6] = [300, 900, 3_600, 14_400, 86_400, 604_800];
pub const SUPPORTED_CHAIN_IDS: [u64; 6] = [1, 10, 56, 137, 8453, 42161];

#[derive(Clone)]
pub struct DashboardState {
    pub settings: Settings,
    pub store: SqliteStore,
    pub cache: MirrorCache,
    pub candles: CandleClient,
    pub net_worth: NetWorthClient,
    pub orderbook: OrderbookClient,
}

pub async fn serve(state: DashboardState) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(index))
        .route("/api/summary", get(api_summary))
        .route("/api/health", get(api_health))
        .route("/api/strategies-data", get(api_strategies_data))
        .route("/api/strategies", get(api_strategies))
        .route("/api/configurations/{id}", get(api_configuration))
        .route("/api/trades", get(api_trades))
        .route("/api/prices", get(api_prices))
        .route("/api/candles", get(api_candles))
        .route("/api/net-worth", get(api_net_worth))
        .route("/api/orderbook", get(api_orderbook))
        .route("/api/configurations", post(api_create_configuration))
        .route("/api/instances", post(api_create_instance))
        .route("/api/instances/{id}/stop", post(api_stop_instance))
        .route("/api/trades", post(api_create_trade))
        .route("/api/prices", post(api_create_price))
        .layer(cors)
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", state.settings.http_host, state.settings.http_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("http addr parse: {e}"))?;

    log::info!("dashboard.start url=http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("dashboard.shutdown signal=ctrl_c");
        })
        .await?;
    Ok(())
}

// ---- Error plumbing: every failure leaves as a JSON { "error": ... } body. ----

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

fn store_error(e: anyhow::Error) -> Response {
    log::error!("store.error {e}");
    error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub fn upstream_status(e: &UpstreamError) -> StatusCode {
    match e {
        UpstreamError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        UpstreamError::Http { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        UpstreamError::Network { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn upstream_error(e: UpstreamError) -> Response {
    error_json(upstream_status(&e), e.to_string())
}

// ---- Request validation ----

pub fn validate_seconds(seconds: u64) -> Result<(), String> {
    if SUPPORTED_CANDLE_SECONDS.contains(&seconds) {
        Ok(())
    } else {
        Err(format!(
            "Invalid seconds value. Supported values: {}",
            SUPPORTED_CANDLE_SECONDS
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }
}

pub fn validate_chain_id(chain_id: u64) -> Result<(), String> {
    if SUPPORTED_CHAIN_IDS.contains(&chain_id) {
        Ok(())
    } else {
        Err(format!(
            "Unsupported chain id. Supported chains: {}",
            SUPPORTED_CHAIN_IDS
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }
}

pub fn validate_address(address: &str) -> Result<(), String> {
    let rest = address
        .strip_prefix("0x")
        .ok_or_else(|| "Invalid address. Expected 0x-prefixed 40-char hex address".to_string())?;
    if rest.len() == 40 && rest.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err("Invalid address. Expected 0x-prefixed 40-char hex address".to_string())
    }
}

// ---- Read handlers ----

/// Per-instance view of the fast-tier mirrors: the recent-trade snapshot plus
/// price series statistics. Instances that have only one of the two mirrors
/// still appear.
fn activity_snapshot(cache: &MirrorCache) -> Vec<JsonValue> {
    let mut ids: Vec<String> = cache
        .keys()
        .into_iter()
        .filter_map(|k| k.strip_prefix("trades:").map(str::to_string))
        .collect();
    for key in cache.series_keys() {
        if let Some(id) = key.strip_prefix("price:") {
            if !ids.iter().any(|x| x == id) {
                ids.push(id.to_string());
            }
        }
    }
    ids.sort();

    ids.into_iter()
        .map(|id| {
            let trades = cache.get(&format!("trades:{id}"));
            let price_key = format!("price:{id}");
            let series = cache.series(&price_key);
            serde_json::json!({
                "instance_id": id,
                "trades": trades.as_ref().map(|e| e.value.clone()),
                "trades_updated_ts": trades.as_ref().map(|e| e.updated_ts),
                "stale": trades.as_ref().map(|e| e.stale).unwrap_or(false),
                "price_last": series.last().map(|s| s.value),
                "price_moving_average": cache.moving_average(&price_key, 12),
                "price_volatility": cache.volatility(&price_key, 12),
                "price_series": series,
            })
        })
        .collect()
}

async fn api_summary(State(st): State<DashboardState>) -> impl IntoResponse {
    let ts = now_ts();
    let health = st
        .store
        .fetch_runtime_statuses()
        .unwrap_or_else(|_| serde_json::json!({}));
    let blocking = health
        .as_object()
        .map(|m| {
            m.values()
                .filter(|v| v.get("level").and_then(|x| x.as_str()) == Some("error"))
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let strategies = st.cache.get("strategies");

    let mut wallets = Vec::new();
    for key in st.cache.keys() {
        if !key.starts_with("net_worth:") {
            continue;
        }
        if let Some(entry) = st.cache.get(&key) {
            wallets.push(serde_json::json!({
                "key": key,
                "net_worth": entry.value,
                "updated_ts": entry.updated_ts,
                "stale": entry.stale,
                "moving_average": st.cache.moving_average(&key, 12),
                "volatility": st.cache.volatility(&key, 12),
                "series": st.cache.series(&key),
            }));
        }
    }

    Json(serde_json::json!({
        "ts": ts,
        "strategies": strategies,
        "wallets": wallets,
        "activity": activity_snapshot(&st.cache),
        "health": {
            "components": health,
            "blocking": blocking,
        }
    }))
}

async fn api_health(State(st): State<DashboardState>) -> impl IntoResponse {
    let health = st
        .store
        .fetch_runtime_statuses()
        .unwrap_or_else(|_| serde_json::json!({}));
    Json(serde_json::json!({ "ts": now_ts(), "components": health }))
}

#[derive(Deserialize)]
struct PageQ {
    limit: Option<usize>,
    skip: Option<usize>,
}

async fn api_strategies_data(
    State(st): State<DashboardState>,
    Query(q): Query<PageQ>,
) -> Response {
    let limit = q.limit.unwrap_or(100).min(1_000);
    let skip = q.skip.unwrap_or(0);
    match st.store.fetch_configurations_with_instances(limit, skip) {
        Ok(configurations) => {
            Json(serde_json::json!({ "configurations": configurations })).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct StrategiesQ {
    chain_id: Option<u64>,
    base: Option<String>,
    quote: Option<String>,
    sort: Option<SortKey>,
    direction: Option<Direction>,
    limit: Option<usize>,
    skip: Option<usize>,
}

async fn api_strategies(
    State(st): State<DashboardState>,
    Query(q): Query<StrategiesQ>,
) -> Response {
    let limit = q.limit.unwrap_or(1_000).min(1_000);
    let skip = q.skip.unwrap_or(0);
    let configs = match st.store.fetch_configurations_with_instances(limit, skip) {
        Ok(c) => c,
        Err(e) => return store_error(e),
    };

    let filters = StrategyFilters {
        chain_id: q.chain_id,
        base_symbol: q.base,
        quote_symbol: q.quote,
    };
    let mut filtered: Vec<_> = configs
        .into_iter()
        .filter(|c| matches_filters(c, &filters))
        .collect();

    if let Some(key) = q.sort {
        filtered = sort_configurations(filtered, key, q.direction.unwrap_or(Direction::Asc));
    }

    Json(group_by_strategies(&filtered)).into_response()
}

async fn api_configuration(
    State(st): State<DashboardState>,
    Path(id): Path<String>,
) -> Response {
    match st.store.fetch_configuration(&id) {
        Ok(Some(cfg)) => Json(cfg).into_response(),
        Ok(None) => error_json(StatusCode::NOT_FOUND, "configuration not found"),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct TradesQ {
    configuration_id: Option<String>,
    instance_id: Option<String>,
    limit: Option<usize>,
}

async fn api_trades(State(st): State<DashboardState>, Query(q): Query<TradesQ>) -> Response {
    let limit = q.limit.unwrap_or(50).min(500);
    let trades = match (&q.configuration_id, &q.instance_id) {
        (None, None) => {
            return error_json(
                StatusCode::BAD_REQUEST,
                "configuration_id or instance_id is required",
            )
        }
        (_, Some(instance_id)) => st.store.fetch_trades_by_instance(instance_id, limit),
        (Some(configuration_id), None) => {
            st.store.fetch_trades_by_configuration(configuration_id, limit)
        }
    };

    match trades {
        Ok(rows) => {
            let trades: Vec<JsonValue> = rows
                .into_iter()
                .map(|t| {
                    let canonical = normalize(&t.values);
                    let successful = is_successful(&canonical);
                    serde_json::json!({
                        "id": t.id,
                        "instance_id": t.instance_id,
                        "created_ts": t.created_ts,
                        "values": t.values,
                        "canonical": canonical,
                        "successful": successful,
                    })
                })
                .collect();
            Json(serde_json::json!({ "trades": trades })).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct PricesQ {
    instance_id: String,
    limit: Option<usize>,
}

async fn api_prices(State(st): State<DashboardState>, Query(q): Query<PricesQ>) -> Response {
    let limit = q.limit.unwrap_or(100).min(1_000);
    match st.store.fetch_prices(&q.instance_id, limit) {
        Ok(prices) => Json(serde_json::json!({ "prices": prices })).into_response(),
        Err(e) => store_error(e),
    }
}

// ---- Upstream proxies ----

#[derive(Deserialize)]
struct CandlesQ {
    pair: Option<String>,
    seconds: Option<u64>,
    limit: Option<usize>,
}

async fn api_candles(State(st): State<DashboardState>, Query(q): Query<CandlesQ>) -> Response {
    let Some(pair) = q.pair.filter(|p| !p.trim().is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "pair is required");
    };
    let Some(seconds) = q.seconds else {
        return error_json(StatusCode::BAD_REQUEST, "seconds is required");
    };
    if let Err(msg) = validate_seconds(seconds) {
        return error_json(StatusCode::BAD_REQUEST, msg);
    }
    let limit = q.limit.unwrap_or(200).min(1_000);
    match st.candles.fetch(&pair, seconds, limit).await {
        Ok(candles) => Json(serde_json::json!({ "candles": candles })).into_response(),
        Err(e) => upstream_error(e),
    }
}

#[derive(Deserialize)]
struct NetWorthQ {
    address: Option<String>,
    chain_id: Option<u64>,
}

async fn api_net_worth(State(st): State<DashboardState>, Query(q): Query<NetWorthQ>) -> Response {
    let Some(address) = q.address else {
        return error_json(StatusCode::BAD_REQUEST, "address is required");
    };
    let Some(chain_id) = q.chain_id else {
        return error_json(StatusCode::BAD_REQUEST, "chain_id is required");
    };
    if let Err(msg) = validate_address(&address) {
        return error_json(StatusCode::BAD_REQUEST, msg);
    }
    if let Err(msg) = validate_chain_id(chain_id) {
        return error_json(StatusCode::BAD_REQUEST, msg);
    }
    match st.net_worth.fetch(&address, chain_id).await {
        Ok(net) => Json(net).into_response(),
        Err(e) => upstream_error(e),
    }
}

#[derive(Deserialize)]
struct OrderbookQ {
    base: Option<String>,
    quote: Option<String>,
    chain_id: Option<u64>,
}

async fn api_orderbook(State(st): State<DashboardState>, Query(q): Query<OrderbookQ>) -> Response {
    let (Some(base), Some(quote)) = (
        q.base.filter(|s| !s.trim().is_empty()),
        q.quote.filter(|s| !s.trim().is_empty()),
    ) else {
        return error_json(StatusCode::BAD_REQUEST, "base and quote are required");
    };
    let Some(chain_id) = q.chain_id else {
        return error_json(StatusCode::BAD_REQUEST, "chain_id is required");
    };
    if let Err(msg) = validate_chain_id(chain_id) {
        return error_json(StatusCode::BAD_REQUEST, msg);
    }
    match st.orderbook.fetch_quote(&base, &quote, chain_id).await {
        Ok(quote) => Json(quote).into_response(),
        Err(e) => upstream_error(e),
    }
}

// ---- Ingestion writes (bot processes report in) ----

#[derive(Deserialize)]
struct CreateConfigurationBody {
    chain_id: u64,
    values: JsonValue,
}

async fn api_create_configuration(
    State(st): State<DashboardState>,
    Json(body): Json<CreateConfigurationBody>,
) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    match st
        .store
        .insert_configuration(&id, body.chain_id, &body.values, now_ts())
    {
        Ok(()) => Json(serde_json::json!({ "id": id })).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct CreateInstanceBody {
    configuration_id: String,
}

async fn api_create_instance(
    State(st): State<DashboardState>,
    Json(body): Json<CreateInstanceBody>,
) -> Response {
    match st.store.fetch_configuration(&body.configuration_id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "configuration not found"),
        Err(e) => return store_error(e),
    }
    let id = uuid::Uuid::new_v4().to_string();
    let ts = now_ts();
    match st.store.insert_instance(&id, &body.configuration_id, ts, ts) {
        Ok(()) => Json(serde_json::json!({ "id": id })).into_response(),
        Err(e) => store_error(e),
    }
}

async fn api_stop_instance(State(st): State<DashboardState>, Path(id): Path<String>) -> Response {
    match st.store.end_instance(&id, now_ts()) {
        Ok(true) => Json(serde_json::json!({ "ok": true })).into_response(),
        Ok(false) => error_json(StatusCode::NOT_FOUND, "instance not found"),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct CreateTradeBody {
    instance_id: String,
    values: JsonValue,
}

async fn api_create_trade(
    State(st): State<DashboardState>,
    Json(body): Json<CreateTradeBody>,
) -> Response {
    match st.store.fetch_instance(&body.instance_id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "instance not found"),
        Err(e) => return store_error(e),
    }
    let id = uuid::Uuid::new_v4().to_string();
    match st.store.insert_trade(&id, &body.instance_id, &body.values, now_ts()) {
        Ok(()) => Json(serde_json::json!({ "id": id })).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct CreatePriceBody {
    instance_id: String,
    value: f64,
}

async fn api_create_price(
    State(st): State<DashboardState>,
    Json(body): Json<CreatePriceBody>,
) -> Response {
    match st.store.insert_price(&body.instance_id, body.value, now_ts()) {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => store_error(e),
    }
}

// ---- Index page (single file, no build step; layout is not the point) ----

async fn index(State(st): State<DashboardState>) -> impl IntoResponse {
    Html(render_index_html(
        &st.settings.http_host,
        st.settings.http_port,
        st.store.path(),
    ))
}

fn render_index_html(host: &str, port: u16, sqlite_path: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>dexwatch • Strategy Monitor</title>
    <style>
      body {{ margin: 0; font-family: ui-sans-serif, system-ui, sans-serif; background: #0b1220; color: rgba(255,255,255,0.92); }}
      .wrap {{ max-width: 1100px; margin: 0 auto; padding: 24px 16px; }}
      .muted {{ color: rgba(255,255,255,0.6); font-size: 12px; }}
      .mono {{ font-family: ui-monospace, Menlo, monospace; }}
      .card {{ border: 1px solid rgba(255,255,255,0.12); border-radius: 12px; background: rgba(255,255,255,0.05); margin-top: 14px; }}
      .card .hd {{ padding: 10px 14px; border-bottom: 1px solid rgba(255,255,255,0.08); font-weight: 700; }}
      .card .bd {{ padding: 10px 14px; }}
      table {{ width: 100%; border-collapse: collapse; }}
      th, td {{ padding: 8px; border-bottom: 1px solid rgba(255,255,255,0.07); text-align: left; font-size: 13px; }}
      th {{ color: rgba(255,255,255,0.6); font-size: 12px; }}
      .good {{ color: #33d17a; }}
      .bad {{ color: #ff4d4d; }}
    </style>
  </head>
  <body>
    <div class="wrap">
      <div>
        <b>dexwatch</b> <span class="muted">• {host}:{port} • sqlite <span class="mono">{sqlite_path}</span> • status <b id="statusText">starting…</b></span>
      </div>

      <div class="card">
        <div class="hd">Strategies</div>
        <div class="bd">
          <table>
            <thead><tr><th>Pair</th><th>Chains</th><th>Configs</th><th>Instances</th><th>Trades (ok)</th><th>PnL</th></tr></thead>
            <tbody id="strategyRows"></tbody>
          </table>
          <div class="muted" id="skippedNote"></div>
        </div>
      </div>

      <div class="card">
        <div class="hd">Active instances</div>
        <div class="bd">
          <table>
            <thead><tr><th>Instance</th><th>Last price</th><th>MA(12)</th><th>Vol(12)</th><th>Recent trades</th><th>Fresh</th></tr></thead>
            <tbody id="activityRows"></tbody>
          </table>
        </div>
      </div>

      <div class="card">
        <div class="hd">Wallets (AUM)</div>
        <div class="bd">
          <table>
            <thead><tr><th>Wallet</th><th>Net worth</th><th>MA(12)</th><th>Vol(12)</th><th>Fresh</th></tr></thead>
            <tbody id="walletRows"></tbody>
          </table>
        </div>
      </div>

      <div class="card">
        <div class="hd">Health</div>
        <div class="bd">
          <table>
            <thead><tr><th>Component</th><th>Level</th><th>Message</th><th>Detail</th></tr></thead>
            <tbody id="healthRows"></tbody>
          </table>
        </div>
      </div>
    </div>

    <script>
      const esc = (s) => (s ?? "--").toString()
        .replaceAll("&","&amp;").replaceAll("<","&lt;").replaceAll(">","&gt;");
      const num = (x, d=2) => (x === null || x === undefined || !Number.isFinite(Number(x))) ? "--" : Number(x).toFixed(d);

      async function refresh() {{
        try {{
          const r = await fetch("/api/summary", {{ cache: "no-store" }});
          if (!r.ok) throw new Error(`summary -> ${{r.status}}`);
          const s = await r.json();

          const report = s.strategies?.value ?? {{ strategies: [], skipped: [] }};
          const tb = document.getElementById("strategyRows");
          tb.innerHTML = "";
          for (const st of report.strategies) {{
            const configs = st.chains.reduce((n, c) => n + c.configurations.length, 0);
            const pnl = st.pnl?.state === "computed" ? num(st.pnl.value) : "not computed";
            const tr = document.createElement("tr");
            tr.innerHTML = `<td><b>${{esc(st.pair)}}</b></td>
              <td>${{st.chains.map((c) => c.chain_id).join(", ")}}</td>
              <td>${{configs}}</td><td>${{st.instances_count}}</td>
              <td>${{st.trades_count}}</td><td class="muted">${{pnl}}</td>`;
            tb.appendChild(tr);
          }}
          document.getElementById("skippedNote").textContent =
            report.skipped.length ? `${{report.skipped.length}} configuration(s) skipped as malformed` : "";

          const ab = document.getElementById("activityRows");
          ab.innerHTML = "";
          for (const a of s.activity ?? []) {{
            const tr = document.createElement("tr");
            tr.innerHTML = `<td class="mono">${{esc(a.instance_id)}}</td>
              <td>${{num(a.price_last, 6)}}</td>
              <td>${{num(a.price_moving_average, 6)}}</td><td>${{num(a.price_volatility, 6)}}</td>
              <td>${{(a.trades ?? []).length}}</td>
              <td class="${{a.stale ? "bad" : "good"}}">${{a.stale ? "stale" : "fresh"}}</td>`;
            ab.appendChild(tr);
          }}

          const wb = document.getElementById("walletRows");
          wb.innerHTML = "";
          for (const w of s.wallets ?? []) {{
            const tr = document.createElement("tr");
            tr.innerHTML = `<td class="mono">${{esc(w.key)}}</td>
              <td>$${{num(w.net_worth?.total_usd)}}</td>
              <td>${{num(w.moving_average)}}</td><td>${{num(w.volatility, 4)}}</td>
              <td class="${{w.stale ? "bad" : "good"}}">${{w.stale ? "stale" : "fresh"}}</td>`;
            wb.appendChild(tr);
          }}

          const hb = document.getElementById("healthRows");
          hb.innerHTML = "";
          for (const c of Object.values(s.health?.components ?? {{}})) {{
            const cls = c.level === "ok" ? "good" : "bad";
            const tr = document.createElement("tr");
            tr.innerHTML = `<td class="mono">${{esc(c.component)}}</td>
              <td class="${{cls}}">${{esc(c.level)}}</td>
              <td>${{esc(c.message)}}</td><td class="mono muted">${{esc(c.detail)}}</td>`;
            hb.appendChild(tr);
          }}

          const el = document.getElementById("statusText");
          el.textContent = "live";
          el.className = "good";
        }} catch (e) {{
          const el = document.getElementById("statusText");
          el.textContent = "disconnected";
          el.className = "bad";
        }}
      }}

      refresh();
      setInterval(refresh, 5000);
    </script>
  </body>
</html>"#,
        host = host,
        port = port,
        sqlite_path = sqlite_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_allow_list() {
        for s in SUPPORTED_CANDLE_SECONDS {
            assert!(validate_seconds(s).is_ok());
        }
        let err = validate_seconds(123).unwrap_err();
        assert_eq!(
            err,
            "Invalid seconds value. Supported values: 300, 900, 3600, 14400, 86400, 604800"
        );
    }

    #[test]
    fn chain_allow_list() {
        assert!(validate_chain_id(1).is_ok());
        assert!(validate_chain_id(8453).is_ok());
        let err = validate_chain_id(999).unwrap_err();
        assert!(err.starts_with("Unsupported chain id."));
    }

    #[test]
    fn address_pattern() {
        assert!(validate_address(&format!("0x{}", "a".repeat(40))).is_ok());
        assert!(validate_address(&format!("0x{}", "A1".repeat(20))).is_ok());
        assert!(validate_address("deadbeef").is_err());
        assert!(validate_address(&format!("0x{}", "a".repeat(39))).is_err());
        assert!(validate_address(&format!("0x{}", "g".repeat(40))).is_err());
    }

    #[test]
    fn summary_activity_serves_fast_tier_mirrors() {
        let cache = MirrorCache::new(10);
        let g = cache.begin_refresh();
        cache.store_fresh(
            "trades:i1",
            g,
            serde_json::json!([{ "id": "t1" }]),
            50.0,
        );
        cache.push_sample("price:i1", 1.0, 10.0);
        cache.push_sample("price:i1", 2.0, 11.0);
        // An instance with price samples but no trade mirror yet.
        cache.push_sample("price:i2", 3.0, 5.0);
        // Unrelated keys stay out of the activity view.
        let g = cache.begin_refresh();
        cache.store_fresh("net_worth:0xabc:1", g, serde_json::json!({}), 1.0);

        let rows = activity_snapshot(&cache);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["instance_id"], "i1");
        assert_eq!(rows[0]["trades"][0]["id"], "t1");
        assert_eq!(rows[0]["price_last"], 11.0);
        assert_eq!(rows[0]["price_moving_average"], 10.5);
        assert_eq!(rows[1]["instance_id"], "i2");
        assert!(rows[1]["trades"].is_null());
        assert_eq!(rows[1]["price_last"], 5.0);
    }

    #[test]
    fn strategies_query_accepts_paging_and_sort() {
        let q: StrategiesQ = serde_json::from_value(serde_json::json!({
            "chain_id": 1,
            "sort": "created_at",
            "direction": "desc",
            "limit": 5,
            "skip": 2
        }))
        .unwrap();
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.skip, Some(2));
        assert_eq!(q.sort, Some(SortKey::CreatedAt));
        assert_eq!(q.direction, Some(Direction::Desc));
        assert_eq!(q.chain_id, Some(1));
    }

    #[test]
    fn upstream_errors_map_to_proxied_statuses() {
        assert_eq!(
            upstream_status(&UpstreamError::Timeout { upstream: "candle provider" }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            upstream_status(&UpstreamError::Http { upstream: "x", status: 429 }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            upstream_status(&UpstreamError::Network {
                upstream: "x",
                message: "refused".into()
            }),
            StatusCode::BAD_GATEWAY
        );
    }
}
