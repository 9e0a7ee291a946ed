//! The trading loop: catalog, analyse, trade, mirror.
//!
//! Once per minute (during the second half of the minute, so the bar
//! about to close is nearly complete) the bot walks its champion assets,
//! filters out hostile market conditions, evaluates the asset's champion
//! strategy, and — on a signal — spawns a trade sequence. Sequences run
//! under a semaphore so the number of concurrently open trades is
//! bounded, and each one applies the martingale progression until it
//! resolves. Results are tallied locally and mirrored to the backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::client::ExnovaClient;
use crate::config::TradingConfig;
use crate::martingale::{Martingale, Step};
use crate::mirror::{BotStatus, MirrorClient, TradeSignal};
use crate::protocol::option::{Direction, OrderOutcome};
use crate::strategy::{self, StrategyKind, StrategyParams};

/// Candles fetched per backtest pass.
const CATALOG_CANDLES: u32 = 300;

/// Candles fetched per live analysis pass.
const ANALYSIS_CANDLES: u32 = 200;

/// Minimum hit rate (percent) for a strategy to become champion.
const MIN_ASSERTIVENESS: f64 = 70.0;

/// Backtest signals below this count are statistically meaningless.
const MIN_BACKTEST_SIGNALS: u32 = 5;

/// Consecutive losses that suspend an asset.
const SUSPENSION_LOSSES: u32 = 2;

/// How long a suspended asset sits out.
const SUSPENSION: Duration = Duration::from_secs(30 * 60);

/// Win/loss tally shared between the loop and its trade tasks.
#[derive(Debug, Default)]
pub struct Scoreboard {
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    /// Wins recovered at each gale level.
    pub gale_wins: HashMap<u32, u64>,
    pub profit: Decimal,
    consecutive_losses: HashMap<String, u32>,
    /// Asset → unix second when the suspension lifts.
    suspended_until: HashMap<String, i64>,
}

impl Scoreboard {
    fn record_win(&mut self, asset: &str, level: u32, profit: Decimal) {
        self.wins += 1;
        self.profit += profit;
        if level > 0 {
            *self.gale_wins.entry(level).or_default() += 1;
        }
        self.consecutive_losses.insert(asset.to_string(), 0);
    }

    fn record_loss(&mut self, asset: &str, now: i64, loss: Decimal) -> bool {
        self.losses += 1;
        self.profit += loss;
        let streak = self
            .consecutive_losses
            .entry(asset.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
        if *streak >= SUSPENSION_LOSSES {
            self.suspended_until
                .insert(asset.to_string(), now + SUSPENSION.as_secs() as i64);
            return true;
        }
        false
    }

    fn is_suspended(&mut self, asset: &str, now: i64) -> bool {
        match self.suspended_until.get(asset) {
            Some(&until) if now < until => true,
            Some(_) => {
                self.suspended_until.remove(asset);
                info!(asset, "asset reactivated after suspension");
                false
            }
            None => false,
        }
    }
}

/// The execution loop.
pub struct Bot {
    client: ExnovaClient,
    config: TradingConfig,
    params: StrategyParams,
    mirror: Option<MirrorClient>,
    state: Arc<Mutex<Scoreboard>>,
    trade_permits: Arc<Semaphore>,
    champions: HashMap<String, StrategyKind>,
}

impl Bot {
    #[must_use]
    pub fn new(
        client: ExnovaClient,
        config: TradingConfig,
        mirror: Option<MirrorClient>,
    ) -> Self {
        let trade_permits = Arc::new(Semaphore::new(config.max_concurrent_trades));
        Self {
            client,
            config,
            params: StrategyParams::default(),
            mirror,
            state: Arc::new(Mutex::new(Scoreboard::default())),
            trade_permits,
            champions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn scoreboard(&self) -> Arc<Mutex<Scoreboard>> {
        self.state.clone()
    }

    /// Backtests every strategy against every open asset and keeps the
    /// best performer per asset, when one clears the assertiveness floor.
    pub async fn catalog(&mut self) {
        info!("cataloging strategies over open assets");
        let open = self.client.open_assets();
        if open.is_empty() {
            warn!("no open assets to catalog");
            return;
        }

        let mut champions = HashMap::new();
        for (asset, _) in open {
            let now = self.client.server_time();
            let candles = match self.client.get_candles(&asset, 60, CATALOG_CANDLES, now).await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(%asset, error = %e, "skipping asset, history unavailable");
                    continue;
                }
            };
            if candles.len() < 150 {
                warn!(%asset, bars = candles.len(), "insufficient history");
                continue;
            }

            if let Some((kind, hit_rate)) = best_strategy(&candles, &self.params) {
                if hit_rate >= MIN_ASSERTIVENESS {
                    info!(%asset, strategy = kind.name(), hit_rate, "champion selected");
                    champions.insert(asset, kind);
                } else {
                    info!(%asset, hit_rate, "no strategy met the assertiveness floor");
                }
            }
        }

        info!(assets = champions.len(), "cataloging finished");
        self.champions = champions;
    }

    /// Runs the analysis loop until the task is cancelled or the
    /// connection terminally fails.
    pub async fn run(&mut self) -> crate::Result<()> {
        if self.champions.is_empty() {
            self.catalog().await;
        }

        let mut last_analysed_minute: i64 = -1;
        loop {
            if matches!(
                self.client.status(),
                crate::client::session::ConnectionStatus::Failed
            ) {
                return Err(crate::ExnovaError::ConnectionFailed);
            }

            let now = self.client.server_time();
            let minute = now.div_euclid(60);
            let second = now.rem_euclid(60);

            if second >= 30 && minute != last_analysed_minute {
                last_analysed_minute = minute;
                if self.remote_paused().await {
                    info!("remote config is paused, skipping cycle");
                } else {
                    self.analyse_cycle(now).await;
                }
            }

            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Whether the dashboard has paused the bot. No backend configured
    /// means nothing can pause us.
    async fn remote_paused(&self) -> bool {
        match &self.mirror {
            Some(mirror) => mirror.fetch_config().await.status == BotStatus::Paused,
            None => false,
        }
    }

    /// One analysis pass over the champion assets.
    async fn analyse_cycle(&self, now: i64) {
        for (asset, kind) in &self.champions {
            if self.trade_permits.available_permits() == 0 {
                break;
            }
            if self.state.lock().expect("scoreboard lock").is_suspended(asset, now) {
                continue;
            }

            let payout = self.client.asset_payout(asset).unwrap_or(0.0);
            if payout < self.config.min_payout {
                continue;
            }

            let candles = match self.client.get_candles(asset, 60, ANALYSIS_CANDLES, now).await {
                Ok(candles) if candles.len() >= 30 => candles,
                Ok(_) => continue,
                Err(e) => {
                    // Unknown assets and timeouts are skip conditions.
                    warn!(%asset, error = %e, "analysis skipped");
                    continue;
                }
            };

            if strategy::is_consolidating(&candles, &self.params)
                || strategy::is_exhausted(&candles, &self.params)
            {
                continue;
            }

            let Some(direction) = kind.evaluate(&candles, &self.params) else {
                continue;
            };

            let Ok(permit) = self.trade_permits.clone().try_acquire_owned() else {
                continue;
            };

            let entry_at = (now.div_euclid(60) + 1) * 60;
            info!(
                %asset,
                strategy = kind.name(),
                direction = direction.as_str(),
                entry_at,
                "signal confirmed"
            );
            self.mirror_log("INFO", &format!("signal: {asset} {}", direction.as_str()));

            let task = TradeTask {
                client: self.client.clone(),
                mirror: self.mirror.clone(),
                state: self.state.clone(),
                plan: Martingale::from_config(&self.config),
                expiration_minutes: self.config.expiration_minutes,
                asset: asset.clone(),
                strategy: *kind,
                direction,
                entry_at,
            };
            tokio::spawn(async move {
                task.run().await;
                drop(permit);
            });
        }
    }

    /// Fire-and-forget mirror log write.
    fn mirror_log(&self, level: &'static str, message: &str) {
        if let Some(mirror) = self.mirror.clone() {
            let message = message.to_string();
            tokio::spawn(async move {
                if let Err(e) = mirror.insert_log(level, &message).await {
                    warn!(error = %e, "mirror log write failed");
                }
            });
        }
    }
}

/// Scores every strategy against the history and returns the best one
/// with its hit rate (percent). Pure backtest: a signal wins when the
/// next bar closes in its direction.
#[must_use]
pub fn best_strategy(
    candles: &[crate::protocol::candle::Candle],
    params: &StrategyParams,
) -> Option<(StrategyKind, f64)> {
    let mut best: Option<(StrategyKind, f64)> = None;

    for kind in StrategyKind::ALL {
        let mut wins: u32 = 0;
        let mut total: u32 = 0;
        for i in 120..candles.len().saturating_sub(1) {
            let window = &candles[..i];
            let Some(direction) = kind.evaluate(window, params) else {
                continue;
            };
            total += 1;
            let signal_close = window[window.len() - 1].close;
            let next_close = candles[i].close;
            let won = match direction {
                Direction::Call => next_close > signal_close,
                Direction::Put => next_close < signal_close,
            };
            if won {
                wins += 1;
            }
        }

        if total > MIN_BACKTEST_SIGNALS {
            let hit_rate = f64::from(wins) / f64::from(total) * 100.0;
            if best.is_none_or(|(_, rate)| hit_rate > rate) {
                best = Some((kind, hit_rate));
            }
        }
    }

    best
}

/// One trade sequence: principal entry plus martingale recoveries.
struct TradeTask {
    client: ExnovaClient,
    mirror: Option<MirrorClient>,
    state: Arc<Mutex<Scoreboard>>,
    plan: Martingale,
    expiration_minutes: u32,
    asset: String,
    strategy: StrategyKind,
    direction: Direction,
    entry_at: i64,
}

impl TradeTask {
    async fn run(self) {
        // Line the entry up with the minute boundary, leading by a few
        // seconds so the order is on the book when the bar opens.
        let lead = self.entry_at - self.client.server_time() - 5;
        if lead > 0 {
            tokio::time::sleep(Duration::from_secs(lead as u64)).await;
        }
        if self.client.server_time() > self.entry_at + 10 {
            warn!(asset = %self.asset, "entry window missed, abandoning signal");
            return;
        }

        let signal_id = self.insert_signal().await;

        let mut level: u32 = 0;
        let final_outcome = loop {
            let stake = self.plan.stake_for(level);
            info!(
                asset = %self.asset,
                level,
                %stake,
                direction = self.direction.as_str(),
                "placing entry"
            );

            let order_id = match self
                .client
                .place_order(stake, &self.asset, self.direction, self.expiration_minutes)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    error!(asset = %self.asset, level, error = %e, "entry failed");
                    break None;
                }
            };

            let result = match self.client.poll_order_result(order_id).await {
                Ok(result) => result,
                Err(e) => {
                    error!(asset = %self.asset, order_id, error = %e, "result poll failed");
                    break None;
                }
            };

            let now = self.client.server_time();
            match result.outcome {
                OrderOutcome::Win => {
                    info!(asset = %self.asset, level, profit = %result.profit, "WIN");
                    self.state
                        .lock()
                        .expect("scoreboard lock")
                        .record_win(&self.asset, level, result.profit);
                }
                OrderOutcome::Loss => {
                    warn!(asset = %self.asset, level, loss = %result.profit, "LOSS");
                    let suspended = self
                        .state
                        .lock()
                        .expect("scoreboard lock")
                        .record_loss(&self.asset, now, result.profit);
                    if suspended {
                        warn!(asset = %self.asset, "asset suspended after consecutive losses");
                    }
                }
                OrderOutcome::Draw => {
                    info!(asset = %self.asset, level, "DRAW");
                    self.state.lock().expect("scoreboard lock").draws += 1;
                }
                OrderOutcome::Timeout => {
                    warn!(asset = %self.asset, order_id, "settlement timed out");
                }
            }

            match self.plan.next(level, result.outcome) {
                Step::Enter { level: next } => level = next,
                Step::Done { outcome } => break Some(outcome),
            }
        };

        let result_label = final_outcome.map_or("error", OrderOutcome::as_str);
        info!(
            asset = %self.asset,
            strategy = self.strategy.name(),
            result = result_label,
            "trade sequence finished"
        );
        self.update_signal(signal_id, result_label).await;
    }

    async fn insert_signal(&self) -> Option<i64> {
        let mirror = self.mirror.as_ref()?;
        let entry_time = format_entry_time(self.entry_at);
        let signal = TradeSignal {
            pair: self.asset.clone(),
            strategy: self.strategy.name().to_string(),
            direction: self.direction.as_str().to_string(),
            entry_time,
            gale_level: 0,
            result: None,
        };
        match mirror.insert_signal(&signal).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "mirror signal insert failed");
                None
            }
        }
    }

    async fn update_signal(&self, signal_id: Option<i64>, result: &str) {
        if let (Some(mirror), Some(id)) = (&self.mirror, signal_id)
            && let Err(e) = mirror.update_signal_result(id, result).await
        {
            warn!(error = %e, "mirror signal update failed");
        }
    }
}

/// `HH:MM` in UTC for a unix timestamp.
fn format_entry_time(timestamp: i64) -> String {
    let seconds_of_day = timestamp.rem_euclid(86_400);
    format!("{:02}:{:02}", seconds_of_day / 3600, (seconds_of_day % 3600) / 60)
}
