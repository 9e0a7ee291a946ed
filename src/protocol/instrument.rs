//! Bulk initialization payload and the asset registry built from it.
//!
//! The broker answers `get-api-option-init-all` with every binary and
//! turbo active it knows: internal numeric id, qualified name, open state,
//! and commission. The registry is the symbol → id mapping almost every
//! facade operation consults; it is always replaced wholesale, never
//! patched, so readers cannot observe a partially-updated mapping.

use std::collections::HashMap;

use serde::Deserialize;

/// Payload of the bulk init response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializationData {
    #[serde(default)]
    pub binary: InitGroup,
    #[serde(default)]
    pub turbo: InitGroup,
}

/// One instrument family inside the init payload, keyed by active id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitGroup {
    #[serde(default)]
    pub actives: HashMap<String, ActiveInfo>,
}

/// A single active as the broker describes it.
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveInfo {
    /// Qualified name, e.g. `"front.EURUSD"`. The symbol is the suffix.
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub is_suspended: bool,
    #[serde(default)]
    pub option: OptionMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionMeta {
    #[serde(default)]
    pub profit: ProfitMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfitMeta {
    /// Broker commission percentage; payout is `(100 − commission) / 100`.
    #[serde(default)]
    pub commission: f64,
}

impl ActiveInfo {
    /// Strips the `front.` style prefix from the qualified name.
    #[must_use]
    pub fn symbol(&self) -> &str {
        self.name
            .split_once('.')
            .map_or(self.name.as_str(), |(_, suffix)| suffix)
    }

    /// Open means enabled and not suspended.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.enabled && !self.is_suspended
    }

    /// Payout as a fraction of the stake (0.0–1.0).
    #[must_use]
    pub fn payout(&self) -> f64 {
        (100.0 - self.option.profit.commission) / 100.0
    }
}

/// Market state of one instrument family for a symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSide {
    pub open: bool,
    pub payout: f64,
}

/// Registry entry for one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetRecord {
    pub id: u32,
    pub binary: Option<MarketSide>,
    pub turbo: Option<MarketSide>,
}

impl AssetRecord {
    /// Open when any family is tradable.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.binary.is_some_and(|s| s.open) || self.turbo.is_some_and(|s| s.open)
    }

    /// Best payout among the open families, if any.
    #[must_use]
    pub fn best_payout(&self) -> Option<f64> {
        [self.turbo, self.binary]
            .into_iter()
            .flatten()
            .filter(|side| side.open)
            .map(|side| side.payout)
            .max_by(f64::total_cmp)
    }
}

/// Symbol → broker id mapping with open/payout state.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    by_symbol: HashMap<String, AssetRecord>,
}

impl AssetRegistry {
    /// Builds a fresh registry from a bulk init payload.
    #[must_use]
    pub fn from_initialization(data: &InitializationData) -> Self {
        let mut by_symbol: HashMap<String, AssetRecord> = HashMap::new();

        let mut absorb = |group: &InitGroup, turbo: bool| {
            for (id, active) in &group.actives {
                let Ok(id) = id.parse::<u32>() else {
                    continue;
                };
                let record = by_symbol.entry(active.symbol().to_string()).or_default();
                record.id = id;
                let side = MarketSide {
                    open: active.is_open(),
                    payout: active.payout(),
                };
                if turbo {
                    record.turbo = Some(side);
                } else {
                    record.binary = Some(side);
                }
            }
        };

        absorb(&data.binary, false);
        absorb(&data.turbo, true);

        Self { by_symbol }
    }

    /// Looks up the broker id for a symbol.
    #[must_use]
    pub fn resolve(&self, symbol: &str) -> Option<u32> {
        self.by_symbol.get(symbol).map(|record| record.id)
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&AssetRecord> {
        self.by_symbol.get(symbol)
    }

    /// Symbols currently open for trading, with their best payout.
    #[must_use]
    pub fn open_assets(&self) -> Vec<(String, f64)> {
        let mut open: Vec<(String, f64)> = self
            .by_symbol
            .iter()
            .filter(|(_, record)| record.is_open())
            .filter_map(|(symbol, record)| {
                record.best_payout().map(|payout| (symbol.clone(), payout))
            })
            .collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));
        open
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }
}
