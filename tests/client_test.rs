//! Client behavior tests against an in-process mock broker.
//!
//! The mock speaks just enough of the wire protocol to drive the full
//! client lifecycle: ssid activation, registry refresh, candle fetches,
//! order placement/settlement, subscriptions, and reconnection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tungstenite::Message;

use exnova::ExnovaError;
use exnova::client::ExnovaClient;
use exnova::config::ExnovaConfig;
use exnova::protocol::option::{Direction, OrderOutcome};
use exnova::protocol::profile::AccountMode;

/// Frames observed by the mock, tagged with their connection index.
#[derive(Debug, Default)]
struct Observed {
    connections: usize,
    frames: Vec<(usize, Value)>,
}

/// A minimal in-process broker.
struct MockBroker {
    addr: SocketAddr,
    observed: Arc<Mutex<Observed>>,
    kill: Arc<Notify>,
}

type OutSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>;

impl MockBroker {
    async fn spawn(settle_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let observed: Arc<Mutex<Observed>> = Arc::default();
        let kill: Arc<Notify> = Arc::default();
        let out_slot: OutSlot = Arc::default();
        let order_seq = Arc::new(AtomicU64::new(1000));

        {
            let observed = observed.clone();
            let kill = kill.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    let index = {
                        let mut guard = observed.lock().unwrap();
                        guard.connections += 1;
                        guard.connections - 1
                    };
                    tokio::spawn(serve_connection(
                        ws,
                        index,
                        observed.clone(),
                        kill.clone(),
                        out_slot.clone(),
                        order_seq.clone(),
                        settle_delay,
                    ));
                }
            });
        }

        Self {
            addr,
            observed,
            kill,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    fn connections(&self) -> usize {
        self.observed.lock().unwrap().connections
    }

    fn frames(&self) -> Vec<(usize, Value)> {
        self.observed.lock().unwrap().frames.clone()
    }

    /// Drops the current connection, simulating transport loss.
    fn kill_current(&self) {
        self.kill.notify_waiters();
    }

    async fn wait_connections(&self, at_least: usize, within: Duration) {
        let deadline = Instant::now() + within;
        while self.connections() < at_least {
            assert!(
                Instant::now() < deadline,
                "broker never saw {at_least} connections"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Frames on one connection matching an envelope name and, for
    /// `sendMessage`/subscription envelopes, an inner message name.
    fn count(&self, connection: usize, envelope_name: &str, inner_name: Option<&str>) -> usize {
        self.frames()
            .iter()
            .filter(|(index, frame)| {
                *index == connection
                    && frame["name"] == envelope_name
                    && inner_name.is_none_or(|inner| frame["msg"]["name"] == inner)
            })
            .count()
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    index: usize,
    observed: Arc<Mutex<Observed>>,
    kill: Arc<Notify>,
    out_slot: OutSlot,
    order_seq: Arc<AtomicU64>,
    settle_delay: Duration,
) {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    *out_slot.lock().unwrap() = Some(out_tx.clone());

    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sink.send(message).await.is_err() {
                return;
            }
        }
    });

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(Ok(Message::Text(text))) = frame else {
                    return;
                };
                let Ok(envelope) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                observed.lock().unwrap().frames.push((index, envelope.clone()));

                let (responses, settle) = respond(&envelope, &order_seq);
                for response in responses {
                    let _ = out_tx.send(Message::Text(response.to_string().into()));
                }
                if let Some((order_id, price)) = settle {
                    schedule_settlement(out_slot.clone(), order_id, price, settle_delay);
                }
            }
            () = kill.notified() => {
                return;
            }
        }
    }
}

/// Canned responses per request name.
fn respond(envelope: &Value, order_seq: &AtomicU64) -> (Vec<Value>, Option<(u64, f64)>) {
    let name = envelope["name"].as_str().unwrap_or_default();
    match name {
        "ssid" => (
            vec![json!({"name": "timeSync", "msg": 1_754_550_000_000_i64})],
            None,
        ),
        "get-api-option-init-all" => (
            vec![json!({
                "name": "api-option-init-all-result",
                "msg": {
                    "binary": {"actives": {
                        "1": {"name": "front.EURUSD", "enabled": true, "is_suspended": false,
                              "option": {"profit": {"commission": 15.0}}}
                    }},
                    "turbo": {"actives": {
                        "1": {"name": "front.EURUSD", "enabled": true, "is_suspended": false,
                              "option": {"profit": {"commission": 13.0}}}
                    }}
                }
            })],
            None,
        ),
        "get-profile" => (
            vec![json!({
                "name": "profile",
                "msg": {
                    "name": "Mock Trader",
                    "currency_char": "$",
                    "balance_id": 11,
                    "balances": [
                        {"id": 10, "type": 1, "amount": 152.4, "currency": "USD"},
                        {"id": 11, "type": 4, "amount": 10000.0, "currency": "USD"}
                    ]
                }
            })],
            None,
        ),
        "get-balances" => (
            vec![json!({
                "name": "balances",
                "msg": [
                    {"id": 10, "type": 1, "amount": 152.4, "currency": "USD"},
                    {"id": 11, "type": 4, "amount": 10000.0, "currency": "USD"}
                ]
            })],
            None,
        ),
        "sendMessage" => {
            let request_id = envelope["request_id"].clone();
            match envelope["msg"]["name"].as_str().unwrap_or_default() {
                "get-candles" => {
                    let count = envelope["msg"]["body"]["count"].as_u64().unwrap_or(10);
                    let to = envelope["msg"]["body"]["to"].as_i64().unwrap_or(0);
                    let bars: Vec<Value> = (0..count)
                        .map(|i| {
                            let base = 1.1 + i as f64 * 1e-4;
                            let from = to - (count as i64 - i as i64) * 60;
                            json!({
                                "from": from, "to": from + 60,
                                "open": base, "close": base + 5e-5,
                                "min": base - 1e-4, "max": base + 2e-4
                            })
                        })
                        .collect();
                    (
                        vec![json!({
                            "name": "candles",
                            "request_id": request_id,
                            "msg": {"candles": bars}
                        })],
                        None,
                    )
                }
                "binary-options.open-option" => {
                    let price = envelope["msg"]["body"]["price"].as_f64().unwrap_or(0.0);
                    if price >= 100.0 {
                        (
                            vec![json!({
                                "name": "option",
                                "request_id": request_id,
                                "status": 4103,
                                "msg": {"message": "not enough money"}
                            })],
                            None,
                        )
                    } else {
                        let order_id = order_seq.fetch_add(1, Ordering::Relaxed);
                        (
                            vec![json!({
                                "name": "option",
                                "request_id": request_id,
                                "msg": {"id": order_id}
                            })],
                            Some((order_id, price)),
                        )
                    }
                }
                _ => (Vec::new(), None),
            }
        }
        "training-balance-reset" => (
            vec![json!({"name": "training-balance-reset", "msg": {"isSuccessful": true}})],
            None,
        ),
        _ => (Vec::new(), None),
    }
}

/// Sends the closed-option push after the delay, retrying against the
/// current connection so a settlement can land after a reconnect.
fn schedule_settlement(out_slot: OutSlot, order_id: u64, price: f64, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // Round to cents so the JSON number survives the f64 round trip.
        let win_amount = (price * 187.0).round() / 100.0;
        let frame = json!({
            "name": "socket-option-closed",
            "msg": {
                "id": order_id,
                "win": "win",
                "sum": price,
                "win_amount": win_amount
            }
        });
        for _ in 0..60 {
            let sender = out_slot.lock().unwrap().clone();
            if let Some(tx) = sender
                && tx.send(Message::Text(frame.to_string().into())).is_ok()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    });
}

fn test_config(url: String) -> ExnovaConfig {
    ExnovaConfig {
        host: "mock.invalid".to_string(),
        email: "trader@example.com".to_string(),
        password: "hunter2".to_string(),
        websocket_url: Some(url),
        max_reconnect_attempts: 10,
    }
}

async fn connected_client(broker: &MockBroker) -> ExnovaClient {
    let client = ExnovaClient::new(test_config(broker.url())).expect("client");
    client.restore_session("mock-ssid");
    client.connect().await.expect("connect");
    client
}

#[tokio::test]
async fn connect_populates_registry_and_balance() {
    let broker = MockBroker::spawn(Duration::from_millis(100)).await;
    let client = connected_client(&broker).await;

    assert!(client.is_connected());
    assert_eq!(client.resolve_asset_id("EURUSD"), Some(1));
    assert!(!client.open_assets().is_empty());

    // Balance-scoped calls work immediately after connect().
    let balance = client.get_balance().await.expect("balance");
    assert_eq!(balance, dec!(10000.0));

    client.close().await;
}

#[tokio::test]
async fn unknown_asset_fails_without_wire_traffic() {
    let broker = MockBroker::spawn(Duration::from_millis(100)).await;
    let client = connected_client(&broker).await;

    let result = client.get_candles("XAGUSD", 60, 50, 1_754_550_000).await;
    assert!(matches!(result, Err(ExnovaError::UnknownAsset(_))));
    assert_eq!(broker.count(0, "sendMessage", Some("get-candles")), 0);

    // A known asset does reach the wire and comes back validated.
    let candles = client
        .get_candles("EURUSD", 60, 50, 1_754_550_000)
        .await
        .expect("candles");
    assert_eq!(candles.len(), 50);
    assert_eq!(broker.count(0, "sendMessage", Some("get-candles")), 1);

    client.close().await;
}

#[tokio::test]
async fn rejection_resolves_well_under_the_placement_bound() {
    let broker = MockBroker::spawn(Duration::from_millis(100)).await;
    let client = connected_client(&broker).await;

    let started = Instant::now();
    let result = client
        .place_order(dec!(150), "EURUSD", Direction::Call, 1)
        .await;
    match result {
        Err(ExnovaError::OrderRejected(message)) => assert_eq!(message, "not enough money"),
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));

    client.close().await;
}

#[tokio::test]
async fn placement_and_settlement_round_trip() {
    let broker = MockBroker::spawn(Duration::from_millis(100)).await;
    let client = connected_client(&broker).await;

    let order_id = client
        .place_order(dec!(10), "EURUSD", Direction::Call, 1)
        .await
        .expect("placement");

    let result = client.poll_order_result(order_id).await.expect("result");
    assert_eq!(result.outcome, OrderOutcome::Win);
    assert_eq!(result.profit, dec!(8.7));

    client.close().await;
}

#[tokio::test]
async fn reconnect_replays_subscriptions_once_and_settlement_still_lands() {
    // Settlement lands well after the reconnect completes.
    let broker = MockBroker::spawn(Duration::from_secs(4)).await;
    let client = connected_client(&broker).await;

    client
        .start_candle_stream("EURUSD", 60)
        .await
        .expect("stream");
    assert_eq!(broker.count(0, "subscribeMessage", Some("candle-generated")), 1);

    let order_id = client
        .place_order(dec!(10), "EURUSD", Direction::Call, 1)
        .await
        .expect("placement");
    let poll = {
        let client = client.clone();
        tokio::spawn(async move { client.poll_order_result(order_id).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    broker.kill_current();
    broker.wait_connections(2, Duration::from_secs(15)).await;

    // Wait until the replayed connection is fully restored.
    let deadline = Instant::now() + Duration::from_secs(10);
    while broker.count(1, "subscribeMessage", Some("candle-generated")) < 1 {
        assert!(Instant::now() < deadline, "subscription was never replayed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Exactly once: no duplicates on the new connection.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(broker.count(1, "subscribeMessage", Some("candle-generated")), 1);
    // The new connection refreshed the registry.
    assert!(broker.count(1, "get-api-option-init-all", None) >= 1);

    // The settlement pushed after the reconnect still resolves the poll.
    let result = poll.await.expect("join").expect("result");
    assert_eq!(result.outcome, OrderOutcome::Win);
    assert_eq!(result.profit, dec!(8.7));

    client.close().await;
}

#[tokio::test]
async fn balance_switch_swaps_position_subscriptions() {
    let broker = MockBroker::spawn(Duration::from_millis(100)).await;
    let client = connected_client(&broker).await;

    client
        .change_balance(AccountMode::Real)
        .await
        .expect("switch to real");

    let sub_real = broker
        .frames()
        .iter()
        .filter(|(_, frame)| {
            frame["name"] == "subscribeMessage"
                && frame["msg"]["name"] == "portfolio.position-changed"
                && frame["msg"]["body"]["user_balance_id"] == 10
        })
        .count();
    assert_eq!(sub_real, 7);

    client
        .change_balance(AccountMode::Practice)
        .await
        .expect("switch to practice");

    let unsub_real = broker
        .frames()
        .iter()
        .filter(|(_, frame)| {
            frame["name"] == "unsubscribeMessage"
                && frame["msg"]["name"] == "portfolio.position-changed"
                && frame["msg"]["body"]["user_balance_id"] == 10
        })
        .count();
    let sub_practice = broker
        .frames()
        .iter()
        .filter(|(_, frame)| {
            frame["name"] == "subscribeMessage"
                && frame["msg"]["name"] == "portfolio.position-changed"
                && frame["msg"]["body"]["user_balance_id"] == 11
        })
        .count();
    assert_eq!(unsub_real, 7);
    assert_eq!(sub_practice, 7);

    client.close().await;
}

#[tokio::test]
async fn practice_balance_reset_round_trips() {
    let broker = MockBroker::spawn(Duration::from_millis(100)).await;
    let client = connected_client(&broker).await;

    assert!(client.reset_practice_balance().await.expect("reset"));

    client.close().await;
}
