//! Binary option placement and settlement models.
//!
//! Placement is an RPC-style exchange: a `sendMessage` envelope carrying
//! the `binary-options.open-option` body goes out with a fresh request id,
//! and the broker answers on the `option` message with the same request id
//! (either the option id or a rejection message). Settlement arrives later,
//! unsolicited, on `socket-option-closed` keyed by the option id.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::SendMessageBody;

/// Trade direction, serialized lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }

    /// The opposite direction (used when inverting after a gale).
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Call => Self::Put,
            Self::Put => Self::Call,
        }
    }
}

/// Body of a `binary-options.open-option` request.
#[derive(Debug, Clone, Serialize)]
pub struct OpenOptionBody {
    pub user_balance_id: u64,
    pub active_id: u32,
    /// `3` for one-minute turbo expirations, `1` otherwise.
    pub option_type_id: u32,
    pub direction: Direction,
    /// Expiration timestamp, unix seconds.
    pub expired: i64,
    pub price: f64,
}

impl OpenOptionBody {
    /// Wraps the body in its versioned `sendMessage` payload.
    #[must_use]
    pub fn into_message(self) -> SendMessageBody {
        SendMessageBody {
            name: "binary-options.open-option",
            version: "2.0",
            body: serde_json::json!(self),
        }
    }
}

/// Computes the expiration timestamp for an order entered at `now`
/// (unix seconds) with the given duration in minutes.
///
/// Expirations land on minute boundaries; when the current minute has
/// less than 30 seconds left, the entry rolls over to the next boundary.
#[must_use]
pub fn expiration_timestamp(now: i64, minutes: u32) -> i64 {
    let mut boundary = now - now.rem_euclid(60) + 60;
    if boundary - now < 30 {
        boundary += 60;
    }
    boundary + i64::from(minutes.saturating_sub(1)) * 60
}

/// Result of a placement request, correlated by request id on the
/// `option` message.
#[derive(Debug, Clone)]
pub enum PlacementResult {
    Accepted { id: u64 },
    Rejected { message: String },
}

impl PlacementResult {
    /// Decodes the `option` payload: an accepted placement carries `id`,
    /// a rejection carries `message`.
    #[must_use]
    pub fn from_msg(msg: &serde_json::Value) -> Self {
        if let Some(id) = msg.get("id").and_then(serde_json::Value::as_u64) {
            return Self::Accepted { id };
        }
        let message = msg
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("placement refused")
            .to_string();
        Self::Rejected { message }
    }
}

/// A `socket-option-opened` push confirming the option is live.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionOpened {
    pub id: u64,
    #[serde(default)]
    pub active_id: Option<u32>,
    #[serde(default)]
    pub exp_time: Option<i64>,
}

/// Settlement state carried on `socket-option-closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinStatus {
    Win,
    /// The broker's spelling for a losing option.
    Loose,
    Equal,
}

/// A `socket-option-closed` push, keyed by the option id.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionClosed {
    pub id: u64,
    pub win: WinStatus,
    /// Stake that was committed.
    pub sum: Decimal,
    /// Gross amount returned on a win (stake plus payout).
    #[serde(default)]
    pub win_amount: Option<Decimal>,
}

impl OptionClosed {
    /// Signed profit: `win_amount − sum` on a win, `−sum` on a loss,
    /// zero on a push.
    #[must_use]
    pub fn profit(&self) -> Decimal {
        match self.win {
            WinStatus::Win => self.win_amount.unwrap_or_default() - self.sum,
            WinStatus::Loose => -self.sum,
            WinStatus::Equal => Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn outcome(&self) -> OrderOutcome {
        match self.win {
            WinStatus::Win => OrderOutcome::Win,
            WinStatus::Loose => OrderOutcome::Loss,
            WinStatus::Equal => OrderOutcome::Draw,
        }
    }
}

/// Terminal outcome of a placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    Win,
    Loss,
    Draw,
    /// No settlement observed within the polling bound.
    Timeout,
}

impl OrderOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Draw => "draw",
            Self::Timeout => "timeout",
        }
    }
}

/// Outcome plus signed profit, as returned by
/// [`poll_order_result`](crate::client::ExnovaClient::poll_order_result).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderResult {
    pub outcome: OrderOutcome,
    pub profit: Decimal,
}

impl OrderResult {
    /// The documented timeout value: `("timeout", 0)`.
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            outcome: OrderOutcome::Timeout,
            profit: Decimal::ZERO,
        }
    }
}
