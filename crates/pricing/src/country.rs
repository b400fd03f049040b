use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PricingError;

/// ISO-4217 currencies the marketplace sells in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Pen,
    Clp,
    Ars,
    Uyu,
    Ves,
}

/// How a converted amount is rounded for display and charging.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rounding {
    /// Two decimal places.
    Cents,
    /// Nearest whole unit; fractional units are not used in practice.
    WholeUnits,
}

impl Currency {
    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Pen => "PEN",
            Currency::Clp => "CLP",
            Currency::Ars => "ARS",
            Currency::Uyu => "UYU",
            Currency::Ves => "VES",
        }
    }

    pub fn rounding(self) -> Rounding {
        match self {
            Currency::Clp | Currency::Ars => Rounding::WholeUnits,
            Currency::Usd | Currency::Pen | Currency::Uyu | Currency::Ves => Rounding::Cents,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Closed set of markets. Each maps to exactly one currency.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Country {
    Peru,
    Chile,
    Argentina,
    Uruguay,
    Venezuela,
    #[default]
    #[serde(alias = "internacional")]
    International,
}

impl Country {
    pub const ALL: [Country; 6] = [
        Country::Peru,
        Country::Chile,
        Country::Argentina,
        Country::Uruguay,
        Country::Venezuela,
        Country::International,
    ];

    pub fn currency(self) -> Currency {
        match self {
            Country::Peru => Currency::Pen,
            Country::Chile => Currency::Clp,
            Country::Argentina => Currency::Ars,
            Country::Uruguay => Currency::Uyu,
            Country::Venezuela => Currency::Ves,
            Country::International => Currency::Usd,
        }
    }

    pub fn is_domestic(self) -> bool {
        self != Country::International
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Country::Peru => "peru",
            Country::Chile => "chile",
            Country::Argentina => "argentina",
            Country::Uruguay => "uruguay",
            Country::Venezuela => "venezuela",
            Country::International => "international",
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Country {
    type Err = PricingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "peru" => Ok(Country::Peru),
            "chile" => Ok(Country::Chile),
            "argentina" => Ok(Country::Argentina),
            "uruguay" => Ok(Country::Uruguay),
            "venezuela" => Ok(Country::Venezuela),
            "international" | "internacional" => Ok(Country::International),
            _ => Err(PricingError::InvalidCountry(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively_with_legacy_spelling() {
        assert_eq!("  Peru ".parse::<Country>().unwrap(), Country::Peru);
        assert_eq!("INTERNACIONAL".parse::<Country>().unwrap(), Country::International);
        assert!(matches!(
            "mexico".parse::<Country>(),
            Err(PricingError::InvalidCountry(c)) if c == "mexico"
        ));
    }

    #[test]
    fn every_country_has_one_currency() {
        let currencies: Vec<_> = Country::ALL.iter().map(|c| c.currency()).collect();
        assert_eq!(
            currencies,
            vec![
                Currency::Pen,
                Currency::Clp,
                Currency::Ars,
                Currency::Uyu,
                Currency::Ves,
                Currency::Usd
            ]
        );
    }

    #[test]
    fn whole_unit_currencies() {
        assert_eq!(Currency::Clp.rounding(), Rounding::WholeUnits);
        assert_eq!(Currency::Ars.rounding(), Rounding::WholeUnits);
        assert_eq!(Currency::Pen.rounding(), Rounding::Cents);
    }
}
