//! Crop (commodity) type stocked in warehouses.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Commodity stocked and dispatched in whole bags.
///
/// Closed enum with a stable lowercase wire form; adding a crop is a new
/// variant plus its wire string (compatible with stored event payloads).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crop {
    Maize,
    Beans,
    Rice,
    Sorghum,
    Millet,
    Soybeans,
}

impl Crop {
    /// Stable lowercase wire form (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Crop::Maize => "maize",
            Crop::Beans => "beans",
            Crop::Rice => "rice",
            Crop::Sorghum => "sorghum",
            Crop::Millet => "millet",
            Crop::Soybeans => "soybeans",
        }
    }

    /// Uppercase segment used in batch codes.
    pub fn code(&self) -> &'static str {
        match self {
            Crop::Maize => "MAIZE",
            Crop::Beans => "BEANS",
            Crop::Rice => "RICE",
            Crop::Sorghum => "SORGHUM",
            Crop::Millet => "MILLET",
            Crop::Soybeans => "SOYBEANS",
        }
    }
}

impl core::fmt::Display for Crop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Crop {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maize" => Ok(Crop::Maize),
            "beans" => Ok(Crop::Beans),
            "rice" => Ok(Crop::Rice),
            "sorghum" => Ok(Crop::Sorghum),
            "millet" => Ok(Crop::Millet),
            "soybeans" => Ok(Crop::Soybeans),
            other => Err(DomainError::validation(format!("unknown crop '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_round_trips() {
        for crop in [
            Crop::Maize,
            Crop::Beans,
            Crop::Rice,
            Crop::Sorghum,
            Crop::Millet,
            Crop::Soybeans,
        ] {
            assert_eq!(crop.as_str().parse::<Crop>().unwrap(), crop);
        }
    }

    #[test]
    fn serde_matches_as_str() {
        let json = serde_json::to_string(&Crop::Sorghum).unwrap();
        assert_eq!(json, "\"sorghum\"");
        let back: Crop = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Crop::Sorghum);
    }

    #[test]
    fn unknown_crop_is_a_validation_error() {
        let err = "quinoa".parse::<Crop>().unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("quinoa")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
