use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::country::Country;
use crate::error::PricingError;

/// Units of local currency per 1 USD.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ExchangeRate(f64);

impl ExchangeRate {
    pub fn new(value: f64) -> Result<Self, PricingError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(PricingError::InvalidRate(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for ExchangeRate {
    type Error = PricingError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExchangeRate> for f64 {
    fn from(value: ExchangeRate) -> Self {
        value.0
    }
}

/// Exchange rates keyed by market, injected from configuration.
///
/// The international market is always priced at the USD base; an
/// `International` entry in the table is ignored by the pricing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable(BTreeMap<Country, ExchangeRate>);

impl RateTable {
    /// A table with no domestic markets (only the international price).
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with_rate(mut self, country: Country, rate: f64) -> Result<Self, PricingError> {
        self.0.insert(country, ExchangeRate::new(rate)?);
        Ok(self)
    }

    pub fn insert(&mut self, country: Country, rate: ExchangeRate) -> Option<ExchangeRate> {
        self.0.insert(country, rate)
    }

    pub fn get(&self, country: Country) -> Option<ExchangeRate> {
        self.0.get(&country).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Country, ExchangeRate)> + '_ {
        self.0.iter().map(|(c, r)| (*c, *r))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for RateTable {
    /// Published rates as of 2026-01-10.
    fn default() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(Country::Peru, ExchangeRate(3.36));
        rates.insert(Country::Chile, ExchangeRate(894.0));
        rates.insert(Country::Argentina, ExchangeRate(1505.0));
        rates.insert(Country::Uruguay, ExchangeRate(38.9));
        rates.insert(Country::Venezuela, ExchangeRate(50.0));
        Self(rates)
    }
}
