//! Deposit confirmation state machine
//!
//! State IDs are stored as SMALLINT and ordered, so "forward only" is a
//! plain integer comparison in SQL as well as in memory.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deposit lifecycle: CONFIRMING -> CONFIRMED -> SWEPT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum DepositStatus {
    /// Observed on chain, below the chain's confirmation requirement
    Confirming = 10,

    /// Confirmation requirement met; eligible for sweep
    Confirmed = 20,

    /// Terminal: funds consolidated into the treasury
    Swept = 30,
}

impl DepositStatus {
    /// Status implied by a confirmation count
    #[inline]
    pub fn for_confirmations(confirmations: u64, required: u64) -> Self {
        if confirmations >= required {
            DepositStatus::Confirmed
        } else {
            DepositStatus::Confirming
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositStatus::Swept)
    }

    /// Only forward moves (or staying put) are legal
    #[inline]
    pub fn can_advance_to(&self, next: DepositStatus) -> bool {
        next >= *self
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            10 => Some(DepositStatus::Confirming),
            20 => Some(DepositStatus::Confirmed),
            30 => Some(DepositStatus::Swept),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Confirming => "confirming",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::Swept => "swept",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for DepositStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        DepositStatus::from_id(value).ok_or(())
    }
}
