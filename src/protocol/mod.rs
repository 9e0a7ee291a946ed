//! Typed models for the Exnova WebSocket protocol.
//!
//! Every frame on the wire is a JSON envelope: outbound
//! `{name, msg, request_id?}`, inbound `{name, request_id?, msg, status?}`.
//! The `msg` payload is decoded exactly once, at the transport boundary,
//! into an [`InboundMessage`] variant so the rest of the client operates
//! on typed structures rather than untyped key lookups.

pub mod candle;
pub mod instrument;
pub mod mood;
pub mod option;
pub mod profile;

use serde::{Deserialize, Serialize};
use tracing::debug;

use candle::{LiveCandle, RawCandle};
use instrument::InitializationData;
use mood::TradersMood;
use option::{OptionClosed, OptionOpened, PlacementResult};
use profile::{BalanceEntry, PositionChanged, Profile};

/// Outbound request names.
pub mod outbound {
    pub const SSID: &str = "ssid";
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const SUBSCRIBE_MESSAGE: &str = "subscribeMessage";
    pub const UNSUBSCRIBE_MESSAGE: &str = "unsubscribeMessage";
    pub const GET_PROFILE: &str = "get-profile";
    pub const GET_BALANCES: &str = "get-balances";
    pub const GET_INIT_ALL: &str = "get-api-option-init-all";
    pub const TRAINING_BALANCE_RESET: &str = "training-balance-reset";
}

/// Inbound message names.
pub mod inbound {
    pub const TIME_SYNC: &str = "timeSync";
    pub const PROFILE: &str = "profile";
    pub const BALANCES: &str = "balances";
    pub const CANDLES: &str = "candles";
    pub const OPTION: &str = "option";
    pub const SOCKET_OPTION_OPENED: &str = "socket-option-opened";
    pub const SOCKET_OPTION_CLOSED: &str = "socket-option-closed";
    pub const CANDLE_GENERATED: &str = "candle-generated";
    pub const TRADERS_MOOD_CHANGED: &str = "traders-mood-changed";
    pub const POSITION_CHANGED: &str = "position-changed";
    pub const INIT_ALL_RESULT: &str = "api-option-init-all-result";
    /// v2 alias for the bulk registry payload; routed to the same mailbox.
    pub const INITIALIZATION_DATA: &str = "initialization-data";
    pub const TRAINING_BALANCE_RESET: &str = "training-balance-reset";
}

/// An outbound envelope, serialized verbatim onto the wire.
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope<'a> {
    pub name: &'a str,
    pub msg: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// A raw inbound envelope, before payload decoding.
#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    pub name: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub msg: serde_json::Value,
    #[serde(default)]
    pub status: Option<u16>,
}

/// Body of a `sendMessage` request: `{name, version, body}`.
#[derive(Debug, Serialize)]
pub struct SendMessageBody {
    pub name: &'static str,
    pub version: &'static str,
    pub body: serde_json::Value,
}

/// One inbound frame, decoded into its typed payload.
#[derive(Debug)]
pub enum InboundMessage {
    /// Server clock push; doubles as the liveness/activation signal.
    TimeSync(i64),
    Profile(Profile),
    Balances(Vec<BalanceEntry>),
    Candles {
        request_id: Option<String>,
        candles: Vec<RawCandle>,
    },
    /// Result of an option placement, correlated by request id.
    Placement {
        request_id: Option<String>,
        result: PlacementResult,
    },
    OptionOpened(OptionOpened),
    OptionClosed(OptionClosed),
    CandleGenerated(LiveCandle),
    TradersMood(TradersMood),
    PositionChanged(PositionChanged),
    Initialization(InitializationData),
    TrainingBalanceReset { is_successful: bool },
    /// A name this client does not handle; logged and ignored.
    Unknown,
}

impl InboundMessage {
    /// Decodes an envelope's payload according to its message name.
    ///
    /// # Errors
    ///
    /// Returns [`ExnovaError::Json`](crate::ExnovaError::Json) when the
    /// payload does not match the documented shape for its name. The
    /// transport logs and skips such frames; they never kill the read loop.
    pub fn decode(envelope: InboundEnvelope) -> crate::Result<Self> {
        let InboundEnvelope {
            name,
            request_id,
            msg,
            ..
        } = envelope;

        let message = match name.as_str() {
            inbound::TIME_SYNC => Self::TimeSync(decode_time_sync(&msg)),
            inbound::PROFILE => Self::Profile(serde_json::from_value(msg)?),
            inbound::BALANCES => Self::Balances(serde_json::from_value(msg)?),
            inbound::CANDLES => {
                let payload: candle::CandlesPayload = serde_json::from_value(msg)?;
                Self::Candles {
                    request_id,
                    candles: payload.candles,
                }
            }
            inbound::OPTION => Self::Placement {
                request_id,
                result: PlacementResult::from_msg(&msg),
            },
            inbound::SOCKET_OPTION_OPENED => Self::OptionOpened(serde_json::from_value(msg)?),
            inbound::SOCKET_OPTION_CLOSED => Self::OptionClosed(serde_json::from_value(msg)?),
            inbound::CANDLE_GENERATED => Self::CandleGenerated(serde_json::from_value(msg)?),
            inbound::TRADERS_MOOD_CHANGED => Self::TradersMood(serde_json::from_value(msg)?),
            inbound::POSITION_CHANGED => Self::PositionChanged(serde_json::from_value(msg)?),
            inbound::INIT_ALL_RESULT | inbound::INITIALIZATION_DATA => {
                Self::Initialization(serde_json::from_value(msg)?)
            }
            inbound::TRAINING_BALANCE_RESET => {
                let is_successful = msg
                    .get("isSuccessful")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                Self::TrainingBalanceReset { is_successful }
            }
            other => {
                debug!(name = other, "unhandled inbound message");
                Self::Unknown
            }
        };

        Ok(message)
    }
}

/// The `timeSync` payload is a bare millisecond timestamp.
fn decode_time_sync(msg: &serde_json::Value) -> i64 {
    msg.as_i64().unwrap_or_default()
}
