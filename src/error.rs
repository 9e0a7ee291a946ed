//! Crate-level error types.
//!
//! [`ExnovaError`] unifies every error source (configuration, HTTP login,
//! WebSocket, JSON, broker-side rejections) behind a single enum so callers
//! can match on the variant they care about while still using the `?`
//! operator for easy propagation.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ExnovaError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum ExnovaError {
    /// A configuration value is missing, empty, or out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An HTTP request (login, backend mirror) failed at the transport level.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The login endpoint rejected the credentials or the verification code.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The session activation handshake did not complete within its bound.
    #[error("connection timeout: session activation did not complete")]
    ConnectionTimeout,

    /// A request-scoped wait exceeded its bound. Callers treat this as
    /// "no answer this cycle", not as a fatal condition.
    #[error("request timeout: {0}")]
    RequestTimeout(&'static str),

    /// The symbol is not present in the asset registry (closed market or
    /// stale registry). Recoverable: skip the instrument.
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    /// The broker refused an order placement with an explicit message.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// The reconnect budget is exhausted; the connection is terminally down
    /// until a fresh connect.
    #[error("connection failed: reconnect budget exhausted")]
    ConnectionFailed,
}
