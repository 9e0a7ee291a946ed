//! Async client for the Exnova WebSocket trading API.
//!
//! This module is organized by concern:
//! - [`transport`] - the socket, envelope serialization, frame dispatch
//! - [`session`] - explicit connection/authentication state
//! - [`router`] - typed mailboxes and the bounded-wait primitive
//! - [`subscription`] - push-feed registry replayed across reconnects
//! - `connection` - reconnect loop with backoff and a retry budget
//!
//! [`ExnovaClient`] is the blocking-style facade the trading logic
//! consumes: every operation composes mailbox waits with an explicit
//! upper bound, so nothing here can stall an unattended bot forever.

mod connection;
pub mod router;
pub mod session;
pub mod subscription;
pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::ExnovaError;
use crate::Result;
use crate::auth::{self, LoginOutcome};
use crate::config::ExnovaConfig;
use crate::protocol::candle::{Candle, validate_candles};
use crate::protocol::instrument::AssetRegistry;
use crate::protocol::mood::MOOD_INSTRUMENT;
use crate::protocol::option::{
    Direction, OpenOptionBody, OrderResult, PlacementResult, expiration_timestamp,
};
use crate::protocol::profile::{AccountMode, BalanceEntry, Profile};
use crate::protocol::{SendMessageBody, outbound};

use connection::ConnectionManager;
use router::Router;
use session::{ConnectionStatus, Session};
use subscription::{INSTRUMENT_TYPES, Subscription, SubscriptionSet};
use transport::Transport;

/// Bound on the `ssid` activation handshake.
pub(crate) const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Bound on candle/profile/balances-style lookups.
pub(crate) const LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Bound on order placement acknowledgement.
pub(crate) const PLACEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on order settlement polling.
pub(crate) const RESULT_TIMEOUT: Duration = Duration::from_secs(70);

/// Bound on the bulk asset-registry refresh.
pub(crate) const REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the whole connect sequence (login, activation, registry,
/// default balance).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared state behind the facade. One instance per client; every
/// component receives it explicitly, so several clients coexist in one
/// process without hidden coupling.
pub(crate) struct ClientInner {
    pub(crate) config: ExnovaConfig,
    pub(crate) http: reqwest::Client,
    pub(crate) transport: Transport,
    pub(crate) router: Router,
    pub(crate) session: Session,
    pub(crate) subscriptions: Mutex<SubscriptionSet>,
    pub(crate) assets: RwLock<AssetRegistry>,
    ready_tx: watch::Sender<bool>,
    request_seq: AtomicU64,
}

impl ClientInner {
    fn new(config: ExnovaConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let (ready_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            http,
            transport: Transport::new(),
            router: Router::new(),
            session: Session::new(),
            subscriptions: Mutex::new(SubscriptionSet::default()),
            assets: RwLock::new(AssetRegistry::default()),
            ready_tx,
            request_seq: AtomicU64::new(1),
        })
    }

    /// Fresh request id; the sequence makes correlation collision-free
    /// within one process lifetime.
    pub(crate) fn next_request_id(&self, prefix: &str) -> String {
        let seq = self.request_seq.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}_{seq}")
    }

    pub(crate) fn mark_ready(&self, ready: bool) {
        self.ready_tx.send_replace(ready);
    }

    /// Sends a channel request, dropping it when the session is not
    /// authenticated. Callers keep waiting on their mailbox and time out
    /// on their own bound, which is the documented behavior while the
    /// connection is being restored.
    pub(crate) async fn send_authenticated(
        &self,
        name: &str,
        msg: serde_json::Value,
        request_id: Option<String>,
    ) -> bool {
        if !self.session.is_authenticated() {
            tracing::debug!(name, "session not authenticated, request dropped");
            return false;
        }
        self.transport.send(name, msg, request_id).await
    }

    /// Waits until the connect sequence has fully restored state.
    pub(crate) async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.ready_tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.session.status() == ConnectionStatus::Failed {
                return Err(ExnovaError::ConnectionFailed);
            }
            if *rx.borrow_and_update() {
                return Ok(());
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Err(_) => return Err(ExnovaError::ConnectionTimeout),
                Ok(Err(_)) => return Err(ExnovaError::ConnectionTimeout),
                Ok(Ok(())) => {}
            }
        }
    }

    /// Requests the bulk init payload and replaces the registry
    /// wholesale. Returns the number of symbols known afterwards.
    pub(crate) async fn refresh_assets(&self) -> Result<usize> {
        self.router.initialization.reset_latest();
        self.send_authenticated(outbound::GET_INIT_ALL, serde_json::json!({}), None)
            .await;
        let init = self
            .router
            .initialization
            .wait_latest(REGISTRY_TIMEOUT, "asset registry refresh")
            .await?;
        let registry = AssetRegistry::from_initialization(&init);
        let count = registry.len();
        *self.assets.write().expect("assets lock") = registry;
        info!(assets = count, "asset registry refreshed");
        Ok(count)
    }

    /// Requests and waits for the profile. One in-flight request per
    /// family: the latest slot is cleared first so a stale push cannot
    /// satisfy this call.
    pub(crate) async fn fetch_profile(&self) -> Result<Profile> {
        self.router.profile.reset_latest();
        self.send_authenticated(outbound::GET_PROFILE, serde_json::json!({}), None)
            .await;
        self.router.profile.wait_latest(LOOKUP_TIMEOUT, "profile").await
    }
}

/// The synchronous-style facade over the Exnova connection.
///
/// Cheap to clone; all clones share one connection and one session.
#[derive(Clone)]
pub struct ExnovaClient {
    inner: Arc<ClientInner>,
    shutdown_tx: watch::Sender<bool>,
    manager: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl ExnovaClient {
    /// Creates a client. No network traffic until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: ExnovaConfig) -> Result<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ClientInner::new(config)?),
            shutdown_tx,
            manager: Arc::new(Mutex::new(None)),
        })
    }

    /// Performs the credential login and stores the session id when one
    /// is issued. Two-factor accounts receive
    /// [`LoginOutcome::VerificationRequired`] and complete the exchange
    /// with [`confirm_code`](Self::confirm_code).
    ///
    /// # Errors
    ///
    /// [`ExnovaError::Auth`] on rejection, [`ExnovaError::Http`] on
    /// network failure. Not retried internally.
    pub async fn login(&self) -> Result<LoginOutcome> {
        let config = &self.inner.config;
        let outcome = auth::login(
            &self.inner.http,
            &config.https_url(),
            &config.email,
            &config.password,
        )
        .await?;
        if let LoginOutcome::Session(ssid) = &outcome {
            self.inner.session.set_ssid(Some(ssid.clone()));
        }
        Ok(outcome)
    }

    /// Seeds a previously issued session id, skipping the credential
    /// login on the next [`connect`](Self::connect).
    pub fn restore_session(&self, ssid: impl Into<String>) {
        self.inner.session.set_ssid(Some(ssid.into()));
    }

    /// Completes a two-factor challenge and stores the session id.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::Auth`] when the code is rejected.
    pub async fn confirm_code(&self, code: &str, token: &str) -> Result<()> {
        let config = &self.inner.config;
        let ssid =
            auth::confirm_code(&self.inner.http, &config.https_url(), code, token).await?;
        self.inner.session.set_ssid(Some(ssid));
        Ok(())
    }

    /// Connects: logs in when no session is stored, starts the connection
    /// manager, and blocks until the session is authenticated, the asset
    /// registry is populated, and the default balance id is known.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::Auth`] for rejected credentials (including pending
    /// two-factor verification), [`ExnovaError::ConnectionTimeout`] when
    /// activation does not complete, [`ExnovaError::ConnectionFailed`]
    /// when the reconnect budget is already exhausted. Callers retry the
    /// whole sequence; nothing here retries silently.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.session.ssid().is_none() {
            match self.login().await? {
                LoginOutcome::Session(_) => {}
                LoginOutcome::VerificationRequired { method, .. } => {
                    return Err(ExnovaError::Auth(format!(
                        "two-step verification ({method}) required, complete it with confirm_code"
                    )));
                }
            }
        }

        self.spawn_manager();
        self.inner.wait_ready(CONNECT_TIMEOUT).await
    }

    /// Starts the connection manager task unless one is already running.
    fn spawn_manager(&self) {
        let mut guard = self.manager.lock().expect("manager lock");
        let running = guard.as_ref().is_some_and(|handle| !handle.is_finished());
        if running {
            return;
        }
        // A fresh manager clears any terminal state from a previous run
        // before ready-waiters can observe it.
        if self.inner.session.status() == ConnectionStatus::Failed {
            self.inner.session.set_status(ConnectionStatus::Disconnected);
        }
        self.shutdown_tx.send_replace(false);
        let manager = ConnectionManager::new(self.inner.clone(), self.shutdown_tx.subscribe());
        *guard = Some(tokio::spawn(manager.run()));
    }

    /// Shuts the connection down and waits for the manager to exit.
    pub async fn close(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.manager.lock().expect("manager lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.transport.clear().await;
        self.inner.mark_ready(false);
    }

    /// Whether the session is currently authenticated.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.session.is_authenticated()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.session.status()
    }

    /// Observable status transitions, for operator surfaces.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.session.subscribe()
    }

    /// Latest server clock (unix seconds); falls back to the local clock
    /// until the first `timeSync` arrives.
    #[must_use]
    pub fn server_time(&self) -> i64 {
        if self.inner.router.has_server_time() {
            self.inner.router.server_time()
        } else {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or_default()
        }
    }

    /// Resolves a symbol to its broker id. `None` means unknown or not
    /// yet loaded — a recoverable skip condition, never a fatal one.
    #[must_use]
    pub fn resolve_asset_id(&self, symbol: &str) -> Option<u32> {
        self.inner.assets.read().expect("assets lock").resolve(symbol)
    }

    /// Open symbols with their best payout percentage (0–100).
    #[must_use]
    pub fn open_assets(&self) -> Vec<(String, f64)> {
        self.inner
            .assets
            .read()
            .expect("assets lock")
            .open_assets()
            .into_iter()
            .map(|(symbol, payout)| (symbol, payout * 100.0))
            .collect()
    }

    /// Best open payout percentage for a symbol.
    #[must_use]
    pub fn asset_payout(&self, symbol: &str) -> Option<f64> {
        self.inner
            .assets
            .read()
            .expect("assets lock")
            .get(symbol)
            .and_then(|record| record.best_payout())
            .map(|payout| payout * 100.0)
    }

    /// Re-fetches the bulk init payload and swaps the registry.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::RequestTimeout`] after the 30 s registry bound.
    pub async fn refresh_assets(&self) -> Result<usize> {
        self.inner.refresh_assets().await
    }

    /// Fetches historical candles for `symbol`.
    ///
    /// An unknown symbol fails before any wire traffic. Malformed bars
    /// (range not covering the body) are dropped before the data reaches
    /// strategy code.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::UnknownAsset`] or
    /// [`ExnovaError::RequestTimeout`] after the 15 s bound.
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval_secs: u32,
        count: u32,
        end_time: i64,
    ) -> Result<Vec<Candle>> {
        let active_id = self
            .resolve_asset_id(symbol)
            .ok_or_else(|| ExnovaError::UnknownAsset(symbol.to_string()))?;

        let request_id = self.inner.next_request_id("candles");
        let message = SendMessageBody {
            name: "get-candles",
            version: "2.0",
            body: serde_json::json!({
                "active_id": active_id,
                "size": interval_secs,
                "to": end_time,
                "count": count,
            }),
        };
        self.inner
            .send_authenticated(
                outbound::SEND_MESSAGE,
                serde_json::to_value(&message)?,
                Some(request_id.clone()),
            )
            .await;

        let raw = self
            .inner
            .router
            .candles
            .wait_correlated(&request_id, LOOKUP_TIMEOUT, "get_candles")
            .await?;
        let candles = validate_candles(&raw);
        if candles.len() < raw.len() {
            warn!(
                symbol,
                dropped = raw.len() - candles.len(),
                "dropped malformed candles"
            );
        }
        Ok(candles)
    }

    /// Places a binary option and waits for the broker's acknowledgement.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::UnknownAsset`] before any wire traffic,
    /// [`ExnovaError::OrderRejected`] with the broker's message (resolves
    /// as soon as the rejection arrives, well under the bound), or
    /// [`ExnovaError::RequestTimeout`] after 10 s.
    pub async fn place_order(
        &self,
        amount: Decimal,
        symbol: &str,
        direction: Direction,
        expiration_minutes: u32,
    ) -> Result<u64> {
        let active_id = self
            .resolve_asset_id(symbol)
            .ok_or_else(|| ExnovaError::UnknownAsset(symbol.to_string()))?;
        let balance_id = self
            .inner
            .session
            .balance_id()
            .ok_or_else(|| ExnovaError::OrderRejected("no active balance selected".into()))?;
        let price = amount
            .to_f64()
            .ok_or_else(|| ExnovaError::OrderRejected("stake not representable".into()))?;

        let body = OpenOptionBody {
            user_balance_id: balance_id,
            active_id,
            option_type_id: if expiration_minutes == 1 { 3 } else { 1 },
            direction,
            expired: expiration_timestamp(self.server_time(), expiration_minutes),
            price,
        };

        let request_id = self.inner.next_request_id("buy");
        self.inner
            .send_authenticated(
                outbound::SEND_MESSAGE,
                serde_json::to_value(body.into_message())?,
                Some(request_id.clone()),
            )
            .await;

        match self
            .inner
            .router
            .placements
            .wait_correlated(&request_id, PLACEMENT_TIMEOUT, "place_order")
            .await?
        {
            PlacementResult::Accepted { id } => {
                info!(symbol, order_id = id, direction = direction.as_str(), "order placed");
                Ok(id)
            }
            PlacementResult::Rejected { message } => {
                warn!(symbol, %message, "order rejected");
                Err(ExnovaError::OrderRejected(message))
            }
        }
    }

    /// Waits for an order's settlement, bounded by 70 s.
    ///
    /// A timeout is a result (`outcome = Timeout`, profit 0), not an
    /// error: the settlement may still arrive later and a subsequent call
    /// will pick it up — including across a reconnect, since settlements
    /// survive transient-state clearing.
    ///
    /// # Errors
    ///
    /// None in practice; the signature keeps the facade uniform.
    pub async fn poll_order_result(&self, order_id: u64) -> Result<OrderResult> {
        match self
            .inner
            .router
            .closed_options
            .wait_key(&order_id, RESULT_TIMEOUT, "poll_order_result")
            .await
        {
            Ok(closed) => Ok(OrderResult {
                outcome: closed.outcome(),
                profit: closed.profit(),
            }),
            Err(ExnovaError::RequestTimeout(_)) => {
                warn!(order_id, "order result not observed within bound");
                Ok(OrderResult::timed_out())
            }
            Err(e) => Err(e),
        }
    }

    /// Switches the active balance to `mode`, moving the position-change
    /// subscriptions from the old balance id to the new one.
    ///
    /// The replay registry is updated before the wire messages go out, so
    /// a reconnect during the switch replays the new set and no state is
    /// lost between the two subscriptions.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::RequestTimeout`] when the profile lookup expires;
    /// [`ExnovaError::Config`] when the profile has no balance for `mode`.
    pub async fn change_balance(&self, mode: AccountMode) -> Result<()> {
        let profile = self.inner.fetch_profile().await?;
        let new_id = profile.balance_id_for(mode).ok_or_else(|| {
            ExnovaError::Config(format!("no {} balance on this account", mode.as_str()))
        })?;

        let previous = self.inner.session.balance_id();
        if previous == Some(new_id) {
            return Ok(());
        }

        let (removed, added) = {
            let mut set = self.inner.subscriptions.lock().expect("subscriptions lock");
            let removed = match previous {
                Some(old_id) => set.remove_position_changes(old_id),
                None => Vec::new(),
            };
            let mut added = Vec::new();
            for instrument_type in INSTRUMENT_TYPES {
                let subscription = Subscription::PositionChanges {
                    balance_id: new_id,
                    instrument_type,
                };
                if set.add(subscription.clone()) {
                    added.push(subscription);
                }
            }
            (removed, added)
        };

        for subscription in &removed {
            self.inner
                .send_authenticated(
                    Subscription::unsubscribe_name(),
                    subscription.message(),
                    None,
                )
                .await;
        }
        for subscription in &added {
            self.inner
                .send_authenticated(Subscription::subscribe_name(), subscription.message(), None)
                .await;
        }

        self.inner.session.set_balance_id(new_id);
        info!(mode = mode.as_str(), balance_id = new_id, "balance switched");
        Ok(())
    }

    /// The authenticated profile (name, currency, balances).
    ///
    /// # Errors
    ///
    /// [`ExnovaError::RequestTimeout`] after the 15 s bound.
    pub async fn get_profile(&self) -> Result<Profile> {
        self.inner.fetch_profile().await
    }

    /// All balance rows for the account.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::RequestTimeout`] after the 15 s bound.
    pub async fn get_balances(&self) -> Result<Vec<BalanceEntry>> {
        self.inner.router.balances.reset_latest();
        self.inner
            .send_authenticated(outbound::GET_BALANCES, serde_json::json!({}), None)
            .await;
        self.inner
            .router
            .balances
            .wait_latest(LOOKUP_TIMEOUT, "balances")
            .await
    }

    /// Amount of the active balance.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::RequestTimeout`] on lookup expiry;
    /// [`ExnovaError::Config`] when no balance is active.
    pub async fn get_balance(&self) -> Result<Decimal> {
        let balance_id = self
            .inner
            .session
            .balance_id()
            .ok_or_else(|| ExnovaError::Config("no active balance selected".into()))?;
        let balances = self.get_balances().await?;
        balances
            .iter()
            .find(|entry| entry.id == balance_id)
            .map(|entry| entry.amount)
            .ok_or_else(|| ExnovaError::Config("active balance missing from balances".into()))
    }

    /// Resets the practice balance to its training default.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::RequestTimeout`] after the 15 s bound.
    pub async fn reset_practice_balance(&self) -> Result<bool> {
        self.inner.router.training_reset.reset_latest();
        self.inner
            .send_authenticated(
                outbound::TRAINING_BALANCE_RESET,
                serde_json::json!({}),
                None,
            )
            .await;
        self.inner
            .router
            .training_reset
            .wait_latest(LOOKUP_TIMEOUT, "training balance reset")
            .await
    }

    /// Starts a live candle stream; registered for replay on reconnect.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::UnknownAsset`] when the symbol is not registered.
    pub async fn start_candle_stream(&self, symbol: &str, interval_secs: u32) -> Result<()> {
        let active_id = self
            .resolve_asset_id(symbol)
            .ok_or_else(|| ExnovaError::UnknownAsset(symbol.to_string()))?;
        let subscription = Subscription::CandleStream {
            active_id,
            size: interval_secs,
        };
        self.subscribe(subscription).await;
        Ok(())
    }

    /// Stops a live candle stream and removes it from the replay set.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::UnknownAsset`] when the symbol is not registered.
    pub async fn stop_candle_stream(&self, symbol: &str, interval_secs: u32) -> Result<()> {
        let active_id = self
            .resolve_asset_id(symbol)
            .ok_or_else(|| ExnovaError::UnknownAsset(symbol.to_string()))?;
        let subscription = Subscription::CandleStream {
            active_id,
            size: interval_secs,
        };
        self.unsubscribe(subscription).await;
        Ok(())
    }

    /// Latest live bar for a stream, validated.
    #[must_use]
    pub fn latest_live_candle(&self, symbol: &str, interval_secs: u32) -> Option<Candle> {
        let active_id = self.resolve_asset_id(symbol)?;
        self.inner
            .router
            .live_candles
            .get(&(active_id, interval_secs))
            .and_then(|bar| bar.validate())
    }

    /// Starts the traders-mood stream for a symbol.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::UnknownAsset`] when the symbol is not registered.
    pub async fn start_mood_stream(&self, symbol: &str) -> Result<()> {
        let active_id = self
            .resolve_asset_id(symbol)
            .ok_or_else(|| ExnovaError::UnknownAsset(symbol.to_string()))?;
        self.subscribe(Subscription::MoodStream {
            active_id,
            instrument: MOOD_INSTRUMENT,
        })
        .await;
        Ok(())
    }

    /// Stops the traders-mood stream for a symbol.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::UnknownAsset`] when the symbol is not registered.
    pub async fn stop_mood_stream(&self, symbol: &str) -> Result<()> {
        let active_id = self
            .resolve_asset_id(symbol)
            .ok_or_else(|| ExnovaError::UnknownAsset(symbol.to_string()))?;
        self.unsubscribe(Subscription::MoodStream {
            active_id,
            instrument: MOOD_INSTRUMENT,
        })
        .await;
        Ok(())
    }

    /// Latest mood value for a symbol (fraction positioned higher).
    #[must_use]
    pub fn traders_mood(&self, symbol: &str) -> Option<f64> {
        let active_id = self.resolve_asset_id(symbol)?;
        self.inner
            .router
            .mood
            .get(&active_id)
            .map(|mood| mood.value)
    }

    /// Registers a subscription and sends it when newly added.
    async fn subscribe(&self, subscription: Subscription) {
        let added = self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .add(subscription.clone());
        if added {
            self.inner
                .send_authenticated(Subscription::subscribe_name(), subscription.message(), None)
                .await;
        }
    }

    /// Removes a subscription and sends the unsubscribe when it existed.
    async fn unsubscribe(&self, subscription: Subscription) {
        let removed = self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .remove(&subscription);
        if removed {
            self.inner
                .send_authenticated(
                    Subscription::unsubscribe_name(),
                    subscription.message(),
                    None,
                )
                .await;
        }
    }
}
