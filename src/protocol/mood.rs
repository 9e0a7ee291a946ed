//! Traders-mood stream models.

use serde::Deserialize;

/// A `traders-mood-changed` push: the fraction of traders positioned
/// higher on an asset (0.0–1.0).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TradersMood {
    pub asset_id: u32,
    pub value: f64,
}

/// Instrument scope used when subscribing to the mood feed.
pub const MOOD_INSTRUMENT: &str = "turbo-option";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mood_deserializes() {
        let mood: TradersMood =
            serde_json::from_str(r#"{"asset_id": 76, "value": 0.63}"#).unwrap();
        assert_eq!(mood.asset_id, 76);
        assert!((mood.value - 0.63).abs() < 1e-12);
    }
}
