//! Connection lifecycle management.
//!
//! [`ConnectionManager`] owns the reconnect loop: (re)login, WebSocket
//! connect, `ssid` activation, state restoration (asset registry, default
//! balance), replay of active subscriptions, and supervision of the
//! reader task. Backoff is exponential and the retry budget is bounded;
//! exhausting it parks the session in the terminal `Failed` state instead
//! of looping forever.
//!
//! The reader is spawned as soon as the socket opens, before activation:
//! every wait in the activation/restore sequence is satisfied by frames
//! the reader dispatches, so it must already be pumping.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tungstenite::Message as WsMessage;

use crate::auth::{self, LoginOutcome};
use crate::protocol::outbound;

use super::ACTIVATION_TIMEOUT;
use super::ClientInner;
use super::session::ConnectionStatus;
use super::subscription::Subscription;
use super::transport::{self, WsReader, handle_text_frame};

/// Initial backoff duration between reconnection attempts.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum backoff duration between reconnection attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Why a connection ended.
enum DisconnectReason {
    /// The connection was lost or errored.
    ConnectionError,
    /// The client is shutting down.
    Shutdown,
}

/// Manages the connection lifecycle including reconnection with
/// exponential backoff and a bounded retry budget.
pub(super) struct ConnectionManager {
    inner: Arc<ClientInner>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionManager {
    pub(super) fn new(inner: Arc<ClientInner>, shutdown: watch::Receiver<bool>) -> Self {
        Self { inner, shutdown }
    }

    /// Runs the connection loop until shutdown or budget exhaustion.
    pub(super) async fn run(mut self) {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempts: u32 = 0;
        let budget = self.inner.config.max_reconnect_attempts;

        loop {
            if *self.shutdown.borrow() {
                self.inner.session.set_status(ConnectionStatus::Disconnected);
                return;
            }

            self.inner.session.set_status(ConnectionStatus::Connecting);

            match self.connect_socket().await {
                Ok(read) => {
                    // The reader must pump before activation: the waits
                    // below resolve on frames it dispatches.
                    let reader = tokio::spawn(reader_task(read, self.inner.clone()));

                    match self.activate_and_restore().await {
                        Ok(()) => {
                            attempts = 0;
                            backoff = INITIAL_BACKOFF;
                            self.inner.mark_ready(true);
                            info!("connected, authenticated and resubscribed");

                            let reason = self.await_disconnect(reader).await;

                            self.inner.mark_ready(false);
                            self.teardown().await;

                            match reason {
                                DisconnectReason::Shutdown => {
                                    info!("connection manager shutting down");
                                    return;
                                }
                                DisconnectReason::ConnectionError => {
                                    attempts += 1;
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "activation failed");
                            reader.abort();
                            self.teardown().await;
                            attempts += 1;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "connection attempt failed");
                    self.teardown().await;
                    attempts += 1;
                }
            }

            if budget != 0 && attempts >= budget {
                error!(attempts, "reconnect budget exhausted, giving up");
                self.inner.session.set_status(ConnectionStatus::Failed);
                // Wake ready-waiters so they observe the terminal state.
                self.inner.mark_ready(false);
                return;
            }

            info!(backoff_secs = backoff.as_secs(), "backing off before retry");
            if !self.sleep_or_shutdown(backoff).await {
                self.inner.session.set_status(ConnectionStatus::Disconnected);
                return;
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Obtains an ssid and opens the socket; the writer is installed and
    /// the session moves to `Connected`.
    async fn connect_socket(&self) -> crate::Result<WsReader> {
        let ssid = self.ensure_ssid().await?;

        let url = self.inner.config.wss_url();
        info!(url = %url, "connecting to WebSocket");
        let (write, read) = transport::connect(&url).await?;
        self.inner.transport.install(write).await;
        self.inner.session.set_status(ConnectionStatus::Connected);

        // The handshake frame itself; the ack is awaited in
        // activate_and_restore once the reader pumps.
        self.inner
            .transport
            .send(outbound::SSID, serde_json::Value::String(ssid), None)
            .await;

        Ok(read)
    }

    /// Waits for the activation ack, then rebuilds shared state.
    async fn activate_and_restore(&self) -> crate::Result<()> {
        if let Err(e) = self
            .inner
            .session
            .wait_for_status(ACTIVATION_TIMEOUT, |s| s == ConnectionStatus::Authenticated)
            .await
        {
            // A stale ssid is the usual cause; force a fresh login next try.
            self.inner.session.set_ssid(None);
            return Err(e);
        }

        self.restore_state().await
    }

    /// Reuses the stored ssid or performs a fresh credential login.
    async fn ensure_ssid(&self) -> crate::Result<String> {
        if let Some(ssid) = self.inner.session.ssid() {
            return Ok(ssid);
        }

        let config = &self.inner.config;
        match auth::login(
            &self.inner.http,
            &config.https_url(),
            &config.email,
            &config.password,
        )
        .await?
        {
            LoginOutcome::Session(ssid) => {
                self.inner.session.set_ssid(Some(ssid.clone()));
                Ok(ssid)
            }
            LoginOutcome::VerificationRequired { method, .. } => {
                // Unattended reconnects cannot answer a second factor.
                Err(crate::ExnovaError::Auth(format!(
                    "two-step verification ({method}) required, cannot complete unattended"
                )))
            }
        }
    }

    /// Rebuilds shared state the connection lost: the asset registry, the
    /// default balance id, and every registered subscription.
    async fn restore_state(&self) -> crate::Result<()> {
        self.inner.refresh_assets().await?;

        // Default balance id: callers must be able to issue balance-scoped
        // requests as soon as connect() returns.
        if self.inner.session.balance_id().is_none() {
            let profile = self.inner.fetch_profile().await?;
            let default_id = profile
                .balance_id
                .or_else(|| profile.balances.first().map(|b| b.id));
            match default_id {
                Some(id) => self.inner.session.set_balance_id(id),
                None => warn!("profile carried no balances, balance id unresolved"),
            }
        }

        self.replay_subscriptions().await;
        Ok(())
    }

    /// Replays every registered subscription exactly once. A dropped send
    /// is retried once for that entry alone, without blocking the rest.
    async fn replay_subscriptions(&self) {
        let snapshot = self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .snapshot();
        if snapshot.is_empty() {
            return;
        }

        let mut retry = Vec::new();
        for subscription in &snapshot {
            if !self
                .inner
                .transport
                .send(Subscription::subscribe_name(), subscription.message(), None)
                .await
            {
                retry.push(subscription);
            }
        }
        for subscription in retry {
            warn!(?subscription, "retrying subscription replay");
            self.inner
                .transport
                .send(Subscription::subscribe_name(), subscription.message(), None)
                .await;
        }
        info!(count = snapshot.len(), "subscriptions replayed");
    }

    /// Supervises the reader until it dies (connection lost) or shutdown.
    async fn await_disconnect(&mut self, mut reader: JoinHandle<()>) -> DisconnectReason {
        loop {
            tokio::select! {
                _ = &mut reader => {
                    return DisconnectReason::ConnectionError;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        reader.abort();
                        return DisconnectReason::Shutdown;
                    }
                }
            }
        }
    }

    /// Clears per-connection state after any disconnect.
    async fn teardown(&self) {
        self.inner.transport.clear().await;
        self.inner.router.clear_transient();
        self.inner.session.set_status(ConnectionStatus::Disconnected);
    }

    /// Sleeps for `duration` unless shutdown fires first. Returns whether
    /// the manager should keep running.
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            changed = self.shutdown.changed() => {
                changed.is_ok() && !*self.shutdown.borrow()
            }
        }
    }
}

/// The single I/O task: reads frames and dispatches each one with bounded
/// work (decode plus a mailbox store). Returns when the connection dies.
async fn reader_task(mut read: WsReader, inner: Arc<ClientInner>) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                handle_text_frame(&text, &inner.router, &inner.session);
            }
            Ok(WsMessage::Close(_)) => {
                warn!("server closed the connection");
                return;
            }
            Ok(_) => {} // Binary/Ping/Pong frames
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                return;
            }
        }
    }
    warn!("WebSocket stream ended");
}
