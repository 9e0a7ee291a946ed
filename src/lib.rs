//! Exnova binary-options client library.
//!
//! Provides a typed async client for the Exnova WebSocket trading API
//! (session handshake, candle history, option placement, result polling,
//! balance management) plus the supporting pieces of the trading bot:
//! candlestick strategies, martingale staking, and a hosted-backend mirror.

pub mod auth;
pub mod bot;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod martingale;
pub mod mirror;
pub mod protocol;
pub mod strategy;

pub use client::ExnovaClient;
pub use error::{ExnovaError, Result};
