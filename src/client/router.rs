//! Request router and channel registry.
//!
//! Each inbound message family gets a typed mailbox. The transport's read
//! loop stores payloads and signals waiters; facade operations block on a
//! mailbox with an explicit deadline. Waits are condition-signalled via
//! [`Notify`] — the I/O task never blocks, and waiters never spin.
//!
//! Two mailbox shapes cover the protocol:
//! - [`Mailbox`]: one "latest" slot plus a `request_id → payload` map for
//!   RPC-style exchanges (candle fetches, placements) that must not
//!   cross-talk between concurrent callers.
//! - [`KeyedMailbox`]: a map keyed by a domain id for unsolicited pushes
//!   (settlements by option id, mood by asset id, live candles by stream).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::ExnovaError;
use crate::Result;
use crate::protocol::InboundMessage;
use crate::protocol::candle::{LiveCandle, RawCandle};
use crate::protocol::instrument::InitializationData;
use crate::protocol::mood::TradersMood;
use crate::protocol::option::{OptionClosed, PlacementResult};
use crate::protocol::profile::{BalanceEntry, PositionChanged, Profile};

/// A typed mailbox for one message family.
#[derive(Debug)]
pub struct Mailbox<T> {
    state: Mutex<MailboxState<T>>,
    notify: Notify,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(MailboxState::default()),
            notify: Notify::new(),
        }
    }
}

#[derive(Debug)]
struct MailboxState<T> {
    latest: Option<T>,
    correlated: HashMap<String, T>,
}

impl<T> Default for MailboxState<T> {
    fn default() -> Self {
        Self {
            latest: None,
            correlated: HashMap::new(),
        }
    }
}

impl<T: Clone> Mailbox<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an uncorrelated payload in the "latest" slot.
    pub fn put(&self, value: T) {
        self.state.lock().expect("mailbox lock").latest = Some(value);
        self.notify.notify_waiters();
    }

    /// Stores a payload keyed by its request id.
    pub fn put_correlated(&self, request_id: &str, value: T) {
        self.state
            .lock()
            .expect("mailbox lock")
            .correlated
            .insert(request_id.to_string(), value);
        self.notify.notify_waiters();
    }

    /// Clears the latest slot; called before issuing a request on an
    /// uncorrelated family so the answer cannot be a stale push.
    pub fn reset_latest(&self) {
        self.state.lock().expect("mailbox lock").latest = None;
    }

    /// Drops all stored state (reconnect housekeeping) and wakes waiters
    /// so they re-check against their own deadlines.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("mailbox lock");
        state.latest = None;
        state.correlated.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    /// Current latest value, if any.
    #[must_use]
    pub fn latest(&self) -> Option<T> {
        self.state.lock().expect("mailbox lock").latest.clone()
    }

    /// Waits for the latest slot to hold a value, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::RequestTimeout`] tagged with `operation` on expiry.
    pub async fn wait_latest(&self, timeout: Duration, operation: &'static str) -> Result<T> {
        self.wait_until(timeout, operation, |state| state.latest.clone())
            .await
    }

    /// Waits for the payload correlated with `request_id`, consuming it.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::RequestTimeout`] tagged with `operation` on expiry.
    pub async fn wait_correlated(
        &self,
        request_id: &str,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<T> {
        self.wait_until(timeout, operation, |state| {
            state.correlated.remove(request_id)
        })
        .await
    }

    async fn wait_until<U>(
        &self,
        timeout: Duration,
        operation: &'static str,
        mut extract: impl FnMut(&mut MailboxState<T>) -> Option<U>,
    ) -> Result<U> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking state so a store between
            // the check and the await cannot be missed.
            notified.as_mut().enable();

            if let Some(value) = extract(&mut self.state.lock().expect("mailbox lock")) {
                return Ok(value);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ExnovaError::RequestTimeout(operation));
            }
        }
    }
}

/// A mailbox for pushes keyed by a domain id rather than a request id.
#[derive(Debug)]
pub struct KeyedMailbox<K, T> {
    entries: Mutex<HashMap<K, T>>,
    notify: Notify,
}

impl<K, T> Default for KeyedMailbox<K, T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, T: Clone> KeyedMailbox<K, T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: K, value: T) {
        self.entries.lock().expect("mailbox lock").insert(key, value);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<T> {
        self.entries.lock().expect("mailbox lock").get(key).cloned()
    }

    /// Removes and returns the entry for `key`.
    #[must_use]
    pub fn take(&self, key: &K) -> Option<T> {
        self.entries.lock().expect("mailbox lock").remove(key)
    }

    pub fn clear(&self) {
        self.entries.lock().expect("mailbox lock").clear();
        self.notify.notify_waiters();
    }

    /// Waits for an entry under `key`, consuming it.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::RequestTimeout`] tagged with `operation` on expiry.
    pub async fn wait_key(
        &self,
        key: &K,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.entries.lock().expect("mailbox lock").remove(key) {
                return Ok(value);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ExnovaError::RequestTimeout(operation));
            }
        }
    }
}

/// All mailboxes, created once at client construction.
#[derive(Debug, Default)]
pub struct Router {
    pub profile: Mailbox<Profile>,
    pub balances: Mailbox<Vec<BalanceEntry>>,
    pub initialization: Mailbox<InitializationData>,
    /// Correlated by request id: concurrent candle fetches cannot
    /// observe each other's data.
    pub candles: Mailbox<Vec<RawCandle>>,
    /// Correlated by request id: placement results and rejections.
    pub placements: Mailbox<PlacementResult>,
    /// Settlements keyed by option id.
    pub closed_options: KeyedMailbox<u64, OptionClosed>,
    /// Mood keyed by asset id.
    pub mood: KeyedMailbox<u32, TradersMood>,
    /// Live bars keyed by `(active_id, size)`.
    pub live_candles: KeyedMailbox<(u32, u32), LiveCandle>,
    pub positions: Mailbox<PositionChanged>,
    pub training_reset: Mailbox<bool>,
    /// Server clock in milliseconds, from `timeSync`.
    server_time_ms: AtomicI64,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes one decoded message into its mailbox. Bounded work: a map
    /// insert plus a notify; safe to call from the read loop.
    pub fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::TimeSync(ms) => {
                self.server_time_ms.store(ms, Ordering::Relaxed);
            }
            InboundMessage::Profile(profile) => self.profile.put(profile),
            InboundMessage::Balances(balances) => self.balances.put(balances),
            InboundMessage::Initialization(data) => self.initialization.put(data),
            InboundMessage::Candles {
                request_id,
                candles,
            } => match request_id {
                Some(id) => self.candles.put_correlated(&id, candles),
                None => self.candles.put(candles),
            },
            InboundMessage::Placement { request_id, result } => match request_id {
                Some(id) => self.placements.put_correlated(&id, result),
                None => self.placements.put(result),
            },
            InboundMessage::OptionOpened(_) => {
                // The placement result already carries the id; the opened
                // push adds nothing the client consumes.
            }
            InboundMessage::OptionClosed(closed) => {
                self.closed_options.put(closed.id, closed);
            }
            InboundMessage::CandleGenerated(bar) => {
                self.live_candles.put((bar.active_id, bar.size), bar);
            }
            InboundMessage::TradersMood(mood) => self.mood.put(mood.asset_id, mood),
            InboundMessage::PositionChanged(position) => self.positions.put(position),
            InboundMessage::TrainingBalanceReset { is_successful } => {
                self.training_reset.put(is_successful);
            }
            InboundMessage::Unknown => {}
        }
    }

    /// Latest server clock, unix seconds. Zero until the first `timeSync`.
    #[must_use]
    pub fn server_time(&self) -> i64 {
        self.server_time_ms.load(Ordering::Relaxed) / 1000
    }

    #[must_use]
    pub fn has_server_time(&self) -> bool {
        self.server_time_ms.load(Ordering::Relaxed) != 0
    }

    /// Clears per-request state on reconnect. Stream mailboxes (closed
    /// options, mood, live candles) survive: their consumers correlate by
    /// domain key and must still see settlements that arrive after the
    /// new connection is up.
    pub fn clear_transient(&self) {
        self.profile.clear();
        self.balances.clear();
        self.initialization.clear();
        self.candles.clear();
        self.placements.clear();
        self.positions.clear();
        self.training_reset.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::protocol::option::WinStatus;

    fn decode(raw: &str) -> InboundMessage {
        let envelope: crate::protocol::InboundEnvelope = serde_json::from_str(raw).unwrap();
        InboundMessage::decode(envelope).unwrap()
    }

    #[tokio::test]
    async fn dispatch_populates_only_the_named_mailbox() {
        let router = Router::new();
        router.dispatch(decode(
            r#"{"name":"profile","msg":{"name":"T","balances":[]}}"#,
        ));

        assert!(router.profile.latest().is_some());
        assert!(router.balances.latest().is_none());
        assert!(router.initialization.latest().is_none());
        assert!(router.candles.latest().is_none());
        assert!(router.positions.latest().is_none());
    }

    #[tokio::test]
    async fn correlated_candles_do_not_cross_talk() {
        let router = Router::new();
        router.dispatch(decode(
            r#"{"name":"candles","request_id":"a","msg":{"candles":[
                {"from":1,"to":2,"open":1.0,"close":1.1,"min":0.9,"max":1.2}]}}"#,
        ));
        router.dispatch(decode(
            r#"{"name":"candles","request_id":"b","msg":{"candles":[]}}"#,
        ));

        let a = router
            .candles
            .wait_correlated("a", Duration::from_millis(50), "candles")
            .await
            .unwrap();
        let b = router
            .candles
            .wait_correlated("b", Duration::from_millis(50), "candles")
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn wait_times_out_within_its_bound() {
        let router = Router::new();
        let started = Instant::now();
        let result = router
            .profile
            .wait_latest(Duration::from_millis(50), "profile")
            .await;
        assert!(matches!(result, Err(ExnovaError::RequestTimeout("profile"))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn wait_wakes_on_concurrent_dispatch() {
        let router = std::sync::Arc::new(Router::new());
        let waiter = {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .closed_options
                    .wait_key(&42, Duration::from_secs(5), "order result")
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        router.dispatch(decode(
            r#"{"name":"socket-option-closed","msg":{"id":42,"win":"win","sum":10.0,"win_amount":18.0}}"#,
        ));

        let closed = waiter.await.unwrap().unwrap();
        assert_eq!(closed.win, WinStatus::Win);
    }

    #[tokio::test]
    async fn clear_transient_keeps_settlements() {
        let router = Router::new();
        router.dispatch(decode(
            r#"{"name":"socket-option-closed","msg":{"id":7,"win":"equal","sum":5.0}}"#,
        ));
        router.dispatch(decode(
            r#"{"name":"profile","msg":{"balances":[]}}"#,
        ));

        router.clear_transient();

        assert!(router.profile.latest().is_none());
        assert!(router.closed_options.get(&7).is_some());
    }

    #[tokio::test]
    async fn keyed_wait_consumes_the_entry() {
        let router = Router::new();
        router.dispatch(decode(
            r#"{"name":"socket-option-closed","msg":{"id":9,"win":"loose","sum":3.0}}"#,
        ));

        let first = router
            .closed_options
            .wait_key(&9, Duration::from_millis(50), "order result")
            .await;
        assert!(first.is_ok());
        assert!(router.closed_options.get(&9).is_none());
    }

    #[tokio::test]
    async fn live_candles_key_by_stream() {
        let router = Router::new();
        router.dispatch(decode(
            r#"{"name":"candle-generated","msg":
                {"active_id":1,"size":60,"from":0,"open":1.0,"close":1.1,"min":0.9,"max":1.2}}"#,
        ));
        router.dispatch(decode(
            r#"{"name":"candle-generated","msg":
                {"active_id":1,"size":300,"from":0,"open":2.0,"close":2.1,"min":1.9,"max":2.2}}"#,
        ));

        assert!((router.live_candles.get(&(1, 60)).unwrap().open - 1.0).abs() < 1e-12);
        assert!((router.live_candles.get(&(1, 300)).unwrap().open - 2.0).abs() < 1e-12);
    }
}
