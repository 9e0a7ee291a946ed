//! Profile, balance, and portfolio message models.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Account modes selectable with
/// [`change_balance`](crate::client::ExnovaClient::change_balance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountMode {
    Real,
    Practice,
    Tournament,
}

impl AccountMode {
    /// Broker-side balance type code (`1` real, `4` practice, `2` tournament).
    #[must_use]
    pub fn type_code(self) -> u8 {
        match self {
            Self::Real => 1,
            Self::Practice => 4,
            Self::Tournament => 2,
        }
    }

    /// Reverse mapping from the broker's balance type code.
    #[must_use]
    pub fn from_type_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Real),
            4 => Some(Self::Practice),
            2 => Some(Self::Tournament),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Real => "REAL",
            Self::Practice => "PRACTICE",
            Self::Tournament => "TOURNAMENT",
        }
    }
}

impl std::str::FromStr for AccountMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REAL" => Ok(Self::Real),
            "PRACTICE" => Ok(Self::Practice),
            "TOURNAMENT" => Ok(Self::Tournament),
            _ => Err(()),
        }
    }
}

/// The authenticated user's profile, pushed on the `profile` message.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Display symbol of the account currency (e.g. `$`).
    #[serde(default = "default_currency_char")]
    pub currency_char: String,
    #[serde(default)]
    pub is_verified: Option<bool>,
    /// Balance id the broker considers active for this session.
    #[serde(default)]
    pub balance_id: Option<u64>,
    #[serde(default)]
    pub balances: Vec<BalanceEntry>,
}

fn default_currency_char() -> String {
    "$".to_string()
}

impl Profile {
    /// Finds the balance id for the requested account mode.
    #[must_use]
    pub fn balance_id_for(&self, mode: AccountMode) -> Option<u64> {
        self.balances
            .iter()
            .find(|b| b.kind == mode.type_code())
            .map(|b| b.id)
    }
}

/// One balance row, as pushed inside `profile` or `balances` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceEntry {
    pub id: u64,
    /// Balance type code: `1` real, `4` practice, `2` tournament.
    #[serde(rename = "type")]
    pub kind: u8,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: String,
}

/// A `portfolio.position-changed` push. Only the balance scope is
/// interesting to this client; the full position body stays raw.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionChanged {
    #[serde(default)]
    pub user_balance_id: Option<u64>,
    #[serde(default)]
    pub instrument_type: Option<String>,
    #[serde(flatten)]
    pub raw: serde_json::Map<String, serde_json::Value>,
}
