// 1.0: all the primitives live here. nothing in the ledger works without these types.
// IDs, sides, odds, timestamps. each is a newtype so the compiler catches type mixups.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WagerId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for WagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// feed identifiers arrive as opaque strings, so these wrap String rather than integers
macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(EventId);
string_id!(MarketId);
string_id!(SelectionId);

// Back = profit when the selection happens. Lay = profit when it does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Back,
    Lay,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Back => Side::Lay,
            Side::Lay => Side::Back,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Back => f.write_str("BACK"),
            Side::Lay => f.write_str("LAY"),
        }
    }
}

// 1.1: decimal odds. 2.0 pays even money. anything at or below 1.0 can never pay out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Odds(Decimal);

impl Odds {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ONE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ONE);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    // profit per unit staked: 2.5 odds -> 1.5
    pub fn net_multiplier(&self) -> Decimal {
        self.0 - Decimal::ONE
    }
}

impl fmt::Display for Odds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn odds_reject_non_paying_prices() {
        assert!(Odds::new(dec!(1.0)).is_none());
        assert!(Odds::new(dec!(0.5)).is_none());
        assert_eq!(Odds::new(dec!(2.5)).unwrap().net_multiplier(), dec!(1.5));
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Back.opposite(), Side::Lay);
        assert_eq!(Side::Lay.opposite(), Side::Back);
    }

    #[test]
    fn string_ids_display_raw_value() {
        let market = MarketId::new("1.2345");
        assert_eq!(market.to_string(), "1.2345");
        assert_eq!(SelectionId::from("home").as_str(), "home");
    }

    #[test]
    fn side_serializes_uppercase() {
        let json = serde_json::to_string(&Side::Lay).unwrap();
        assert_eq!(json, "\"LAY\"");
    }
}
