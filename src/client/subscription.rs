//! Push-feed subscriptions and their replay registry.
//!
//! A [`Subscription`] is a value describing one standing push feed. The
//! client keeps the set of feeds that *should* be active; the connection
//! manager replays the whole set after every reconnect so downstream
//! consumers observe no semantic gap beyond the reconnect latency.

use serde_json::json;

use crate::protocol::outbound;

/// Instrument types covered by portfolio subscriptions.
pub const INSTRUMENT_TYPES: [&str; 7] = [
    "cfd",
    "forex",
    "crypto",
    "blitz-option",
    "digital-option",
    "turbo-option",
    "binary-option",
];

/// One standing push feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// Live bars for an asset at one interval.
    CandleStream { active_id: u32, size: u32 },
    /// Trader sentiment for an asset.
    MoodStream {
        active_id: u32,
        instrument: &'static str,
    },
    /// Position changes scoped to a balance and instrument type.
    PositionChanges {
        balance_id: u64,
        instrument_type: &'static str,
    },
}

impl Subscription {
    /// The `subscribeMessage`/`unsubscribeMessage` payload for this feed.
    #[must_use]
    pub fn message(&self) -> serde_json::Value {
        match self {
            Self::CandleStream { active_id, size } => json!({
                "name": "candle-generated",
                "params": { "routingFilters": { "active_id": active_id, "size": size } }
            }),
            Self::MoodStream {
                active_id,
                instrument,
            } => json!({
                "name": "traders-mood-changed",
                "params": { "routingFilters": { "instrument": instrument, "asset_id": active_id } }
            }),
            Self::PositionChanges {
                balance_id,
                instrument_type,
            } => json!({
                "name": "portfolio.position-changed",
                "body": { "instrument_type": instrument_type, "user_balance_id": balance_id }
            }),
        }
    }

    /// Outbound envelope name that starts this feed.
    #[must_use]
    pub fn subscribe_name() -> &'static str {
        outbound::SUBSCRIBE_MESSAGE
    }

    /// Outbound envelope name that stops this feed.
    #[must_use]
    pub fn unsubscribe_name() -> &'static str {
        outbound::UNSUBSCRIBE_MESSAGE
    }
}

/// The set of feeds that should be active. Mutated by facade callers,
/// read (replayed) by the connection manager; the caller holds the lock
/// for the whole add/remove or replay, never both sides at once.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Adds a feed if not already present. Returns whether it was added.
    pub fn add(&mut self, subscription: Subscription) -> bool {
        if self.entries.contains(&subscription) {
            return false;
        }
        self.entries.push(subscription);
        true
    }

    /// Removes a feed. Returns whether it was present.
    pub fn remove(&mut self, subscription: &Subscription) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry != subscription);
        self.entries.len() != before
    }

    /// Removes every position-change feed for `balance_id`, returning them.
    pub fn remove_position_changes(&mut self, balance_id: u64) -> Vec<Subscription> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|entry| {
                matches!(entry, Subscription::PositionChanges { balance_id: id, .. } if *id == balance_id)
            });
        self.entries = kept;
        removed
    }

    /// Snapshot for replay.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candle_stream_body_is_wire_exact() {
        let sub = Subscription::CandleStream {
            active_id: 76,
            size: 60,
        };
        let msg = sub.message();
        assert_eq!(msg["name"], "candle-generated");
        assert_eq!(msg["params"]["routingFilters"]["active_id"], 76);
        assert_eq!(msg["params"]["routingFilters"]["size"], 60);
    }

    #[test]
    fn mood_stream_body_is_wire_exact() {
        let sub = Subscription::MoodStream {
            active_id: 5,
            instrument: "turbo-option",
        };
        let msg = sub.message();
        assert_eq!(msg["name"], "traders-mood-changed");
        assert_eq!(msg["params"]["routingFilters"]["instrument"], "turbo-option");
        assert_eq!(msg["params"]["routingFilters"]["asset_id"], 5);
    }

    #[test]
    fn position_changes_body_is_wire_exact() {
        let sub = Subscription::PositionChanges {
            balance_id: 11,
            instrument_type: "binary-option",
        };
        let msg = sub.message();
        assert_eq!(msg["name"], "portfolio.position-changed");
        assert_eq!(msg["body"]["instrument_type"], "binary-option");
        assert_eq!(msg["body"]["user_balance_id"], 11);
    }

    #[test]
    fn set_deduplicates_entries() {
        let mut set = SubscriptionSet::default();
        let sub = Subscription::CandleStream {
            active_id: 1,
            size: 60,
        };
        assert!(set.add(sub.clone()));
        assert!(!set.add(sub.clone()));
        assert_eq!(set.len(), 1);
        assert!(set.remove(&sub));
        assert!(set.is_empty());
    }

    #[test]
    fn removing_a_balance_takes_all_its_position_feeds() {
        let mut set = SubscriptionSet::default();
        for instrument_type in INSTRUMENT_TYPES {
            set.add(Subscription::PositionChanges {
                balance_id: 10,
                instrument_type,
            });
        }
        set.add(Subscription::CandleStream {
            active_id: 1,
            size: 60,
        });

        let removed = set.remove_position_changes(10);
        assert_eq!(removed.len(), INSTRUMENT_TYPES.len());
        assert_eq!(set.len(), 1);
    }
}
