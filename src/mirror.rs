//! Backend mirror: remote config, logs, and trade signals.
//!
//! The companion dashboard reads its state from a hosted Postgres
//! (Supabase) instance; the bot mirrors into it through the REST
//! interface. Everything here is best-effort by contract: a mirror
//! failure is the dashboard's problem, never the trading loop's — the
//! bot logs the error and carries on. The one read path, the remote bot
//! config, fails *safe*: when it cannot be fetched the bot behaves as if
//! it were paused.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Result;
use crate::config::SupabaseConfig;

/// Remote on/off switch for the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BotStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
}

/// The single remote config row (`bot_config`, id 1).
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfigRow {
    pub status: BotStatus,
    #[serde(default)]
    pub entry_value: Option<Decimal>,
    #[serde(default)]
    pub use_martingale: Option<bool>,
    #[serde(default)]
    pub mg_levels: Option<u32>,
    #[serde(default)]
    pub mg_factor: Option<Decimal>,
}

impl BotConfigRow {
    /// The fail-safe row used when the backend is unreachable.
    #[must_use]
    pub fn paused() -> Self {
        Self {
            status: BotStatus::Paused,
            entry_value: None,
            use_martingale: None,
            mg_levels: None,
            mg_factor: None,
        }
    }
}

/// A row in `trade_signals`.
#[derive(Debug, Clone, Serialize)]
pub struct TradeSignal {
    pub pair: String,
    pub strategy: String,
    /// `call` or `put`.
    pub direction: String,
    /// Entry window, `HH:MM`.
    pub entry_time: String,
    pub gale_level: u32,
    /// Terminal result; `None` while the trade is open.
    pub result: Option<String>,
}

/// REST client for the mirror tables.
#[derive(Debug, Clone)]
pub struct MirrorClient {
    http: reqwest::Client,
    base_url: String,
    key: String,
}

impl MirrorClient {
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: &SupabaseConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            key: config.key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/{path}", self.base_url))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    /// Fetches the remote bot config; unreachable backend reads as paused.
    pub async fn fetch_config(&self) -> BotConfigRow {
        match self.try_fetch_config().await {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "failed to fetch remote config, assuming paused");
                BotConfigRow::paused()
            }
        }
    }

    async fn try_fetch_config(&self) -> Result<BotConfigRow> {
        let rows: Vec<BotConfigRow> = self
            .request(reqwest::Method::GET, "bot_config?id=eq.1&select=*")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows.into_iter().next().unwrap_or_else(BotConfigRow::paused))
    }

    /// Inserts one log row.
    ///
    /// # Errors
    ///
    /// HTTP failure; callers log and continue.
    pub async fn insert_log(&self, level: &str, message: &str) -> Result<()> {
        self.request(reqwest::Method::POST, "bot_logs")
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({
                "level": level.to_uppercase(),
                "message": message,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Inserts a trade signal and returns its generated id.
    ///
    /// # Errors
    ///
    /// HTTP failure; callers log and continue without a signal id.
    pub async fn insert_signal(&self, signal: &TradeSignal) -> Result<Option<i64>> {
        #[derive(Deserialize)]
        struct Inserted {
            id: i64,
        }

        let rows: Vec<Inserted> = self
            .request(reqwest::Method::POST, "trade_signals")
            .header("Prefer", "return=representation")
            .json(signal)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows.first().map(|row| row.id))
    }

    /// Updates a signal row with its terminal result.
    ///
    /// # Errors
    ///
    /// HTTP failure; callers log and continue.
    pub async fn update_signal_result(&self, signal_id: i64, result: &str) -> Result<()> {
        self.request(
            reqwest::Method::PATCH,
            &format!("trade_signals?id=eq.{signal_id}"),
        )
        .header("Prefer", "return=minimal")
        .json(&serde_json::json!({ "result": result }))
        .send()
        .await?
        .error_for_status()?;
        Ok(())
    }
}
