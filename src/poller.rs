use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;

use crate::{
    cache::MirrorCache,
    config::Settings,
    store::SqliteStore,
    strategy::group_by_strategies,
    upstream::NetWorthClient,
    utils::now_ts,
};

/// Effective delay before the next poll: the tier interval doubled per
/// consecutive failure, capped, then spread with uniform jitter so a fleet of
/// pollers does not hammer an upstream in lockstep.
pub fn next_delay(
    interval: Duration,
    consecutive_failures: u32,
    cap: Duration,
    jitter_frac: f64,
    rng: &mut impl Rng,
) -> Duration {
    let backed_off = interval
        .saturating_mul(1u32 << consecutive_failures.min(16))
        .min(cap)
        .max(interval.min(cap));
    if jitter_frac <= 0.0 {
        return backed_off;
    }
    let jitter = rng.random_range(-jitter_frac..=jitter_frac);
    Duration::from_secs_f64((backed_off.as_secs_f64() * (1.0 + jitter)).max(0.0))
}

/// One repeating task per resource tier. The loop awaits its own refresh
/// before scheduling the next one, so there is at most one outstanding
/// request per key at any time.
async fn run_poll_loop<F, Fut>(
    component: &'static str,
    store: SqliteStore,
    interval: Duration,
    cap: Duration,
    jitter_frac: f64,
    mut refresh: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut failures: u32 = 0;
    loop {
        match refresh().await {
            Ok(msg) => {
                failures = 0;
                store
                    .upsert_runtime_status(component, "ok", &msg, None, now_ts())
                    .ok();
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                log::warn!("{component}.refresh_failed failures={failures} err={e}");
                store
                    .upsert_runtime_status(
                        component,
                        "error",
                        "refresh_failed",
                        Some(&e.to_string()),
                        now_ts(),
                    )
                    .ok();
            }
        }

        let delay = next_delay(interval, failures, cap, jitter_frac, &mut rand::rng());
        tokio::time::sleep(delay).await;
    }
}

pub fn spawn_all(
    settings: Settings,
    store: SqliteStore,
    cache: MirrorCache,
    net_worth: NetWorthClient,
) {
    let cap = Duration::from_secs(settings.poll_backoff_cap_secs);
    let jitter = settings.poll_jitter_frac;

    // Fast tier: trade/price mirrors per active instance.
    {
        let store = store.clone();
        let status_store = store.clone();
        let cache = cache.clone();
        let interval = Duration::from_secs(settings.poll_fast_secs);
        tokio::spawn(async move {
            run_poll_loop("poller.activity", status_store, interval, cap, jitter, move || {
                let store = store.clone();
                let cache = cache.clone();
                async move { refresh_activity(&store, &cache) }
            })
            .await;
        });
    }

    // Medium tier: configurations + aggregated strategy tree.
    {
        let store = store.clone();
        let status_store = store.clone();
        let cache = cache.clone();
        let interval = Duration::from_secs(settings.poll_medium_secs);
        tokio::spawn(async move {
            run_poll_loop("poller.strategies", status_store, interval, cap, jitter, move || {
                let store = store.clone();
                let cache = cache.clone();
                async move { refresh_strategies(&store, &cache) }
            })
            .await;
        });
    }

    // Slow tier: wallet net worth (AUM) from the external service.
    if !settings.watch_wallets.is_empty() {
        let status_store = store.clone();
        let cache = cache.clone();
        let wallets = settings.watch_wallets.clone();
        let interval = Duration::from_secs(settings.poll_slow_secs);
        tokio::spawn(async move {
            run_poll_loop("poller.net_worth", status_store, interval, cap, jitter, move || {
                let cache = cache.clone();
                let net_worth = net_worth.clone();
                let wallets = wallets.clone();
                async move { refresh_net_worth(&net_worth, &cache, &wallets).await }
            })
            .await;
        });
    }

    log::info!(
        "pollers.start fast={}s medium={}s slow={}s wallets={}",
        settings.poll_fast_secs,
        settings.poll_medium_secs,
        settings.poll_slow_secs,
        settings.watch_wallets.len()
    );
}

fn refresh_activity(store: &SqliteStore, cache: &MirrorCache) -> Result<String> {
    let instances = store.fetch_active_instances()?;
    for inst in &instances {
        if let Some(p) = store.fetch_prices(&inst.id, 1)?.first() {
            cache.push_sample(&format!("price:{}", inst.id), p.created_ts, p.value);
        }

        let trades = store.fetch_trades_by_instance(&inst.id, 25)?;
        let generation = cache.begin_refresh();
        cache.store_fresh(
            &format!("trades:{}", inst.id),
            generation,
            serde_json::to_value(&trades)?,
            now_ts(),
        );
    }
    Ok(format!("mirrored {} active instances", instances.len()))
}

fn refresh_strategies(store: &SqliteStore, cache: &MirrorCache) -> Result<String> {
    let configs = store.fetch_configurations_with_instances(1_000, 0)?;
    let report = group_by_strategies(&configs);
    let strategies = report.strategies.len();
    let skipped = report.skipped.len();

    let generation = cache.begin_refresh();
    cache.store_fresh(
        "strategies",
        generation,
        serde_json::to_value(&report)?,
        now_ts(),
    );

    Ok(format!("aggregated {strategies} strategies ({skipped} skipped)"))
}

async fn refresh_net_worth(
    client: &NetWorthClient,
    cache: &MirrorCache,
    wallets: &[crate::config::WatchedWallet],
) -> Result<String> {
    let mut ok = 0usize;
    let mut failed = 0usize;
    for w in wallets {
        let key = format!("net_worth:{}:{}", w.address, w.chain_id);
        let generation = cache.begin_refresh();
        match client.fetch(&w.address, w.chain_id).await {
            Ok(net) => {
                let ts = now_ts();
                cache.push_sample(&key, ts, net.total_usd);
                cache.store_fresh(&key, generation, serde_json::to_value(&net)?, ts);
                ok += 1;
            }
            Err(e) => {
                // Keep the last known good value on screen; just flag it.
                log::warn!("net_worth.refresh_failed wallet={} err={}", w.address, e);
                cache.mark_stale(&key);
                failed += 1;
            }
        }
    }
    if ok == 0 && failed > 0 {
        anyhow::bail!("all {failed} wallet refreshes failed");
    }
    Ok(format!("refreshed {ok}/{} wallets", wallets.len()))
}
