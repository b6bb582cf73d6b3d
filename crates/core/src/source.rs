//! Provenance of an inventory batch.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Where a batch's grain came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// Opening stock recorded during warehouse genesis.
    Genesis,
    FarmerDelivery,
    Purchase,
    Transfer,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Genesis => "GENESIS",
            SourceType::FarmerDelivery => "FARMER_DELIVERY",
            SourceType::Purchase => "PURCHASE",
            SourceType::Transfer => "TRANSFER",
        }
    }
}

impl core::fmt::Display for SourceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GENESIS" => Ok(SourceType::Genesis),
            "FARMER_DELIVERY" => Ok(SourceType::FarmerDelivery),
            "PURCHASE" => Ok(SourceType::Purchase),
            "TRANSFER" => Ok(SourceType::Transfer),
            other => Err(DomainError::validation(format!(
                "unknown source type '{other}'"
            ))),
        }
    }
}
