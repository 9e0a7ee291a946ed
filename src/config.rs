//! Application configuration loaded from environment variables.
//!
//! Credentials **must** be provided via environment variables (or the
//! system keychain, see [`crate::credentials`]):
//! - `EXNOVA_EMAIL` — account email for the login endpoint
//! - `EXNOVA_PASSWORD` — account password
//!
//! Everything else is optional and defaulted. All values are validated
//! here so the client and the bot never see an out-of-range setting.

use rust_decimal::Decimal;

use crate::ExnovaError;
use crate::protocol::profile::AccountMode;

/// Default broker host. Override with `EXNOVA_HOST`.
const DEFAULT_HOST: &str = "exnova.com";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub exnova: ExnovaConfig,
    pub trading: TradingConfig,
    /// Backend mirror settings; `None` disables mirroring entirely.
    pub supabase: Option<SupabaseConfig>,
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct ExnovaConfig {
    pub host: String,
    pub email: String,
    pub password: String,
    /// Full WebSocket URL override; defaults to the host-derived endpoint.
    pub websocket_url: Option<String>,
    /// Reconnect attempts before the connection manager gives up.
    pub max_reconnect_attempts: u32,
}

impl ExnovaConfig {
    /// HTTPS base URL for the REST endpoints.
    #[must_use]
    pub fn https_url(&self) -> String {
        format!("https://{}/api", self.host)
    }

    /// WebSocket URL for the trading endpoint.
    #[must_use]
    pub fn wss_url(&self) -> String {
        self.websocket_url
            .clone()
            .unwrap_or_else(|| format!("wss://{}/echo/websocket", self.host))
    }
}

/// Bot trading parameters.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub account: AccountMode,
    /// Base stake per entry, in account currency.
    pub stake: Decimal,
    pub expiration_minutes: u32,
    /// Minimum payout percentage (0–100) required to trade an asset.
    pub min_payout: f64,
    pub martingale: bool,
    pub martingale_levels: u32,
    pub martingale_factor: Decimal,
    /// Upper bound on concurrently open trade sequences.
    pub max_concurrent_trades: usize,
}

/// Backend mirror (Supabase) settings.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`ExnovaError::Config`] if credentials are missing, a numeric
/// variable fails to parse, or a value is out of its documented range.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let email = non_empty_var("EXNOVA_EMAIL")
        .ok_or_else(|| ExnovaError::Config("EXNOVA_EMAIL is not set".into()))?;
    let password = non_empty_var("EXNOVA_PASSWORD")
        .ok_or_else(|| ExnovaError::Config("EXNOVA_PASSWORD is not set".into()))?;
    let host = non_empty_var("EXNOVA_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
    let websocket_url = non_empty_var("EXNOVA_WEBSOCKET_URL");

    let account = match non_empty_var("EXNOVA_ACCOUNT").as_deref() {
        None => AccountMode::Practice,
        Some(raw) => raw
            .parse()
            .map_err(|()| ExnovaError::Config(format!("EXNOVA_ACCOUNT: unknown mode {raw:?}")))?,
    };

    let stake = parse_var("EXNOVA_STAKE", Decimal::ONE)?;
    if stake <= Decimal::ZERO {
        return Err(ExnovaError::Config("EXNOVA_STAKE must be positive".into()));
    }

    let expiration_minutes: u32 = parse_var("EXNOVA_EXPIRATION_MINUTES", 1)?;
    if !(1..=60).contains(&expiration_minutes) {
        return Err(ExnovaError::Config(
            "EXNOVA_EXPIRATION_MINUTES must be between 1 and 60".into(),
        ));
    }

    let min_payout: f64 = parse_var("EXNOVA_MIN_PAYOUT", 80.0)?;
    if !(0.0..=100.0).contains(&min_payout) {
        return Err(ExnovaError::Config(
            "EXNOVA_MIN_PAYOUT must be between 0 and 100".into(),
        ));
    }

    let martingale = match non_empty_var("EXNOVA_MARTINGALE").as_deref() {
        None => true,
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                return Err(ExnovaError::Config(format!(
                    "EXNOVA_MARTINGALE: expected true/false, got {raw:?}"
                )));
            }
        },
    };

    let martingale_levels: u32 = parse_var("EXNOVA_MARTINGALE_LEVELS", 2)?;
    if martingale_levels > 10 {
        return Err(ExnovaError::Config(
            "EXNOVA_MARTINGALE_LEVELS must be at most 10".into(),
        ));
    }

    let martingale_factor: Decimal = parse_var("EXNOVA_MARTINGALE_FACTOR", Decimal::TWO)?;
    if martingale_factor < Decimal::ONE {
        return Err(ExnovaError::Config(
            "EXNOVA_MARTINGALE_FACTOR must be at least 1".into(),
        ));
    }

    let max_reconnect_attempts: u32 = parse_var("EXNOVA_MAX_RECONNECT_ATTEMPTS", 10)?;
    let max_concurrent_trades: usize = parse_var("EXNOVA_MAX_CONCURRENT_TRADES", 1)?;
    if max_concurrent_trades == 0 {
        return Err(ExnovaError::Config(
            "EXNOVA_MAX_CONCURRENT_TRADES must be at least 1".into(),
        ));
    }

    let supabase = match (non_empty_var("SUPABASE_URL"), non_empty_var("SUPABASE_KEY")) {
        (Some(url), Some(key)) => Some(SupabaseConfig { url, key }),
        (Some(_), None) => {
            return Err(ExnovaError::Config(
                "SUPABASE_URL is set but SUPABASE_KEY is missing".into(),
            ));
        }
        (None, Some(_)) => {
            return Err(ExnovaError::Config(
                "SUPABASE_KEY is set but SUPABASE_URL is missing".into(),
            ));
        }
        (None, None) => None,
    };

    Ok(AppConfig {
        exnova: ExnovaConfig {
            host,
            email,
            password,
            websocket_url,
            max_reconnect_attempts,
        },
        trading: TradingConfig {
            account,
            stake,
            expiration_minutes,
            min_payout,
            martingale,
            martingale_levels,
            martingale_factor,
            max_concurrent_trades,
        },
        supabase,
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Parses an environment variable into `T`, falling back to `default`
/// when unset or empty.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> crate::Result<T> {
    match non_empty_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ExnovaError::Config(format!("{name}: invalid value {raw:?}"))),
    }
}
