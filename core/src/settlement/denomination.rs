//! Denomination splitting
//!
//! Decomposes a transfer amount into fixed-size pool denominations with
//! greedy change-making. A set whose smallest value is 1 represents every
//! amount exactly; any other set can leave a remainder, which is rejected
//! rather than dropped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mintbridge_config::DEFAULT_DENOMINATIONS;

/// Upper bound on legs per transfer
pub const MAX_LEGS: u64 = 4096;

/// Largest float that still converts to an exact integer
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("amount {amount} leaves remainder {remainder} with the configured denominations")]
    Unrepresentable { amount: u64, remainder: u64 },
    #[error("invalid denomination set: {0}")]
    InvalidSet(String),
}

/// Canonical denominations, held in descending order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct DenominationSet {
    values: Vec<u64>,
}

impl DenominationSet {
    pub fn new(values: impl IntoIterator<Item = u64>) -> Result<Self, SplitError> {
        let mut values: Vec<u64> = values.into_iter().collect();
        if values.is_empty() {
            return Err(SplitError::InvalidSet("no denominations".into()));
        }
        if values.contains(&0) {
            return Err(SplitError::InvalidSet("zero denomination".into()));
        }

        values.sort_unstable_by(|a, b| b.cmp(a));
        if let Some(pair) = values.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(SplitError::InvalidSet(format!(
                "duplicate denomination {}",
                pair[0]
            )));
        }
        Ok(Self { values })
    }

    /// Descending
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn ascending(&self) -> Vec<u64> {
        self.values.iter().rev().copied().collect()
    }

    pub fn smallest(&self) -> u64 {
        self.values.last().copied().unwrap_or(1)
    }

    pub fn contains(&self, denomination: u64) -> bool {
        self.values.contains(&denomination)
    }

    /// Greedy splitting is exact for every amount
    pub fn is_complete(&self) -> bool {
        self.smallest() == 1
    }

    /// Number of legs `split(amount)` would produce, without allocating them
    pub fn leg_count(&self, amount: u64) -> u64 {
        let mut remaining = amount;
        let mut count = 0u64;
        for &d in &self.values {
            count += remaining / d;
            remaining %= d;
        }
        count
    }

    /// Greedy split, refusing amounts that need more than [`MAX_LEGS`] legs
    pub fn split(&self, amount: u64) -> Result<Vec<u64>, SplitError> {
        self.split_with_limit(amount, MAX_LEGS)
    }

    /// Greedy split. The leg count is checked before anything is allocated.
    pub fn split_with_limit(&self, amount: u64, max_legs: u64) -> Result<Vec<u64>, SplitError> {
        let leg_count = self.leg_count(amount);
        if leg_count > max_legs {
            return Err(SplitError::InvalidAmount(format!(
                "amount {amount} needs {leg_count} legs, limit is {max_legs}"
            )));
        }

        let mut remaining = amount;
        let mut legs = Vec::with_capacity(leg_count as usize);

        for &d in &self.values {
            let copies = remaining / d;
            legs.extend(std::iter::repeat_n(d, copies as usize));
            remaining -= copies * d;
            if remaining == 0 {
                break;
            }
        }

        if remaining != 0 {
            return Err(SplitError::Unrepresentable { amount, remainder: remaining });
        }
        Ok(legs)
    }
}

impl Default for DenominationSet {
    fn default() -> Self {
        let mut values = DEFAULT_DENOMINATIONS.to_vec();
        values.sort_unstable_by(|a, b| b.cmp(a));
        Self { values }
    }
}

impl TryFrom<Vec<u64>> for DenominationSet {
    type Error = SplitError;

    fn try_from(values: Vec<u64>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<DenominationSet> for Vec<u64> {
    fn from(set: DenominationSet) -> Self {
        set.values
    }
}

/// Read a JSON amount, accepting only non-negative whole numbers.
///
/// Floats such as `1000.0` or `1e3` are accepted when they are integral and
/// small enough to be exact.
pub fn parse_amount(value: &serde_json::Number) -> Result<u64, SplitError> {
    if let Some(amount) = value.as_u64() {
        return Ok(amount);
    }
    if value.as_i64().is_some() {
        return Err(SplitError::InvalidAmount(format!("{value} is negative")));
    }

    let float = value
        .as_f64()
        .ok_or_else(|| SplitError::InvalidAmount(format!("{value} is not a number")))?;
    if float < 0.0 {
        return Err(SplitError::InvalidAmount(format!("{value} is negative")));
    }
    if float.fract() != 0.0 {
        return Err(SplitError::InvalidAmount(format!("{value} is not a whole number")));
    }
    if float > MAX_EXACT_FLOAT {
        return Err(SplitError::InvalidAmount(format!(
            "{value} is too large to represent exactly"
        )));
    }
    Ok(float as u64)
}
