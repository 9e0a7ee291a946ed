//! Martingale staking progression.
//!
//! Deterministic arithmetic over the outcome history of one trade
//! sequence: a loss multiplies the next stake by the configured factor
//! until the level budget is spent, a win ends the sequence, a draw
//! repeats the current stake without consuming a level.

use rust_decimal::Decimal;

use crate::protocol::option::OrderOutcome;

/// Staking plan for one signal.
#[derive(Debug, Clone, Copy)]
pub struct Martingale {
    base_stake: Decimal,
    factor: Decimal,
    /// Number of recovery entries after the principal one.
    levels: u32,
}

/// Where the sequence stands after an outcome is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Place the next entry at this level (0 = principal entry).
    Enter { level: u32 },
    /// The sequence is over.
    Done { outcome: OrderOutcome },
}

impl Martingale {
    /// A plan with no recovery levels places exactly one entry.
    #[must_use]
    pub fn new(base_stake: Decimal, factor: Decimal, levels: u32) -> Self {
        Self {
            base_stake,
            factor,
            levels,
        }
    }

    /// Plan from the bot configuration; disabling martingale zeroes the
    /// level budget.
    #[must_use]
    pub fn from_config(config: &crate::config::TradingConfig) -> Self {
        let levels = if config.martingale {
            config.martingale_levels
        } else {
            0
        };
        Self::new(config.stake, config.martingale_factor, levels)
    }

    /// Stake for a given level: `base × factor^level`.
    #[must_use]
    pub fn stake_for(&self, level: u32) -> Decimal {
        let mut stake = self.base_stake;
        for _ in 0..level {
            stake *= self.factor;
        }
        stake
    }

    #[must_use]
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Applies one entry's outcome at `level` and decides what happens next.
    ///
    /// Wins and draws end the sequence with their outcome; a timeout ends
    /// it too (the result is unknowable, re-entering would be blind). A
    /// loss advances to the next level while budget remains, otherwise the
    /// sequence ends as a loss.
    #[must_use]
    pub fn next(&self, level: u32, outcome: OrderOutcome) -> Step {
        match outcome {
            OrderOutcome::Win => Step::Done {
                outcome: OrderOutcome::Win,
            },
            OrderOutcome::Draw => Step::Done {
                outcome: OrderOutcome::Draw,
            },
            OrderOutcome::Timeout => Step::Done {
                outcome: OrderOutcome::Timeout,
            },
            OrderOutcome::Loss => {
                if level < self.levels {
                    Step::Enter { level: level + 1 }
                } else {
                    Step::Done {
                        outcome: OrderOutcome::Loss,
                    }
                }
            }
        }
    }

    /// Total exposure if every level is entered and lost.
    #[must_use]
    pub fn worst_case_exposure(&self) -> Decimal {
        (0..=self.levels).map(|level| self.stake_for(level)).sum()
    }
}
