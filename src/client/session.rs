//! Explicit session state.
//!
//! One [`Session`] object per client instance carries the connection
//! status, the ssid obtained from the login endpoint, and the active
//! balance id. Every component that needs connection state receives this
//! object; there are no process-wide flags, so multiple client instances
//! coexist in one process without cross-talk.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::ExnovaError;
use crate::Result;

/// Connection lifecycle states, observable through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    /// Socket is open; the `ssid` handshake has not completed yet.
    Connected,
    /// Handshake acknowledged; channel requests may be issued.
    Authenticated,
    /// Reconnect budget exhausted; terminal until a fresh `connect()`.
    Failed,
}

/// Shared session state. Mutated by the connection manager and the
/// transport; read by the facade before issuing requests.
#[derive(Debug)]
pub struct Session {
    status_tx: watch::Sender<ConnectionStatus>,
    ssid: Mutex<Option<String>>,
    /// Active balance id; zero means "not yet resolved".
    balance_id: AtomicU64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            status_tx,
            ssid: Mutex::new(None),
            balance_id: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        // send_replace never fails; the sender owns at least one receiver slot.
        self.status_tx.send_replace(status);
    }

    /// A fresh receiver for status transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status() == ConnectionStatus::Authenticated
    }

    #[must_use]
    pub fn ssid(&self) -> Option<String> {
        self.ssid.lock().expect("session lock").clone()
    }

    pub fn set_ssid(&self, ssid: Option<String>) {
        *self.ssid.lock().expect("session lock") = ssid;
    }

    /// Active balance id, once
    /// [`change_balance`](crate::client::ExnovaClient::change_balance)
    /// or the connect sequence has resolved one.
    #[must_use]
    pub fn balance_id(&self) -> Option<u64> {
        match self.balance_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn set_balance_id(&self, id: u64) {
        self.balance_id.store(id, Ordering::Release);
    }

    /// Waits until the status satisfies `predicate`, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`ExnovaError::ConnectionTimeout`] on expiry;
    /// [`ExnovaError::ConnectionFailed`] when the session reaches
    /// [`ConnectionStatus::Failed`] first.
    pub async fn wait_for_status(
        &self,
        timeout: Duration,
        predicate: impl Fn(ConnectionStatus) -> bool,
    ) -> Result<()> {
        let mut rx = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let status = *rx.borrow_and_update();
            if predicate(status) {
                return Ok(());
            }
            if status == ConnectionStatus::Failed {
                return Err(ExnovaError::ConnectionFailed);
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Err(_) => return Err(ExnovaError::ConnectionTimeout),
                Ok(Err(_)) => return Err(ExnovaError::ConnectionTimeout),
                Ok(Ok(())) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn starts_disconnected_without_balance() {
        let session = Session::new();
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert_eq!(session.balance_id(), None);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn wait_for_status_resolves_on_transition() {
        let session = Arc::new(Session::new());
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .wait_for_status(Duration::from_secs(5), |s| {
                        s == ConnectionStatus::Authenticated
                    })
                    .await
            })
        };

        session.set_status(ConnectionStatus::Connecting);
        session.set_status(ConnectionStatus::Connected);
        session.set_status(ConnectionStatus::Authenticated);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn wait_for_status_times_out() {
        let session = Session::new();
        let result = session
            .wait_for_status(Duration::from_millis(30), |s| {
                s == ConnectionStatus::Authenticated
            })
            .await;
        assert!(matches!(result, Err(ExnovaError::ConnectionTimeout)));
    }

    #[tokio::test]
    async fn wait_for_status_surfaces_terminal_failure() {
        let session = Arc::new(Session::new());
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .wait_for_status(Duration::from_secs(5), |s| {
                        s == ConnectionStatus::Authenticated
                    })
                    .await
            })
        };

        session.set_status(ConnectionStatus::Failed);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ExnovaError::ConnectionFailed)
        ));
    }

    #[tokio::test]
    async fn balance_id_round_trips() {
        let session = Session::new();
        session.set_balance_id(77);
        assert_eq!(session.balance_id(), Some(77));
    }
}
