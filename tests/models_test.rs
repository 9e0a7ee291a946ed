//! Decode tests for the Exnova wire protocol models.

use rust_decimal_macros::dec;

use exnova::protocol::option::{OrderOutcome, PlacementResult, WinStatus};
use exnova::protocol::profile::AccountMode;
use exnova::protocol::{InboundEnvelope, InboundMessage};

const PROFILE_JSON: &str = include_str!("fixtures/profile.json");
const CANDLES_JSON: &str = include_str!("fixtures/candles.json");
const OPTION_REJECTED_JSON: &str = include_str!("fixtures/option_rejected.json");
const OPTION_CLOSED_WIN_JSON: &str = include_str!("fixtures/option_closed_win.json");
const INIT_ALL_JSON: &str = include_str!("fixtures/init_all.json");

fn decode(raw: &str) -> InboundMessage {
    let envelope: InboundEnvelope = serde_json::from_str(raw).expect("envelope parses");
    InboundMessage::decode(envelope).expect("payload decodes")
}

#[test]
fn profile_decodes_with_balances() {
    let InboundMessage::Profile(profile) = decode(PROFILE_JSON) else {
        panic!("expected a profile message");
    };

    assert_eq!(profile.name.as_deref(), Some("Ada Trader"));
    assert_eq!(profile.currency_char, "R$");
    assert_eq!(profile.balance_id, Some(11));
    assert_eq!(profile.balances.len(), 3);
    assert_eq!(profile.balances[0].amount, dec!(152.4));

    assert_eq!(profile.balance_id_for(AccountMode::Real), Some(10));
    assert_eq!(profile.balance_id_for(AccountMode::Practice), Some(11));
    assert_eq!(profile.balance_id_for(AccountMode::Tournament), Some(12));
}

#[test]
fn candles_decode_and_validation_drops_malformed_bars() {
    let InboundMessage::Candles {
        request_id,
        candles,
    } = decode(CANDLES_JSON)
    else {
        panic!("expected a candles message");
    };

    assert_eq!(request_id.as_deref(), Some("candles_42"));
    assert_eq!(candles.len(), 3);

    // The third bar's range does not cover its body and must be dropped.
    let valid = exnova::protocol::candle::validate_candles(&candles);
    assert_eq!(valid.len(), 2);
    assert_eq!(valid[0].from, 1_754_550_000);
    assert!((valid[0].high - 1.1023).abs() < 1e-12);
    assert!((valid[1].low - 1.1007).abs() < 1e-12);
}

#[test]
fn rejected_placement_keeps_request_id_and_message() {
    let InboundMessage::Placement { request_id, result } = decode(OPTION_REJECTED_JSON) else {
        panic!("expected a placement message");
    };

    assert_eq!(request_id.as_deref(), Some("buy_7"));
    match result {
        PlacementResult::Rejected { message } => {
            assert_eq!(message, "Active is not available for purchase");
        }
        PlacementResult::Accepted { .. } => panic!("expected a rejection"),
    }
}

#[test]
fn closed_option_decodes_and_computes_profit() {
    let InboundMessage::OptionClosed(closed) = decode(OPTION_CLOSED_WIN_JSON) else {
        panic!("expected a closed-option message");
    };

    assert_eq!(closed.id, 991_234);
    assert_eq!(closed.win, WinStatus::Win);
    assert_eq!(closed.profit(), dec!(8.7));
    assert_eq!(closed.outcome(), OrderOutcome::Win);
}

#[test]
fn init_all_builds_the_registry() {
    let InboundMessage::Initialization(data) = decode(INIT_ALL_JSON) else {
        panic!("expected an initialization message");
    };

    let registry = exnova::protocol::instrument::AssetRegistry::from_initialization(&data);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.resolve("EURUSD"), Some(1));
    assert_eq!(registry.resolve("GBPJPY"), Some(5));

    let open = registry.open_assets();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].0, "EURUSD");
    // turbo side: (100 - 13) / 100
    assert!((open[0].1 - 0.87).abs() < 1e-9);
}
