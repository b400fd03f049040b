//! Price derivation: one USD base price → one price per market.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::country::{Country, Currency, Rounding};
use crate::error::PricingError;
use crate::money::{Amount, round_to_i64};
use crate::rates::{ExchangeRate, RateTable};

/// A derived price in a market's currency.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Amount,
    pub currency: Currency,
}

/// Derived prices keyed by market. Read-only to callers; rebuilt by
/// [`derive_prices`] whenever the base price, the free flag or the rates change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable(BTreeMap<Country, Price>);

impl PriceTable {
    pub fn get(&self, country: Country) -> Option<Price> {
        self.0.get(&country).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Country, Price)> + '_ {
        self.0.iter().map(|(c, p)| (*c, *p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Derive every market price from a USD base price.
///
/// - `is_free` forces every amount to zero.
/// - The international entry is the base price as-is.
/// - Other markets convert with the table's rate and round per currency.
pub fn derive_prices(
    base_usd: Amount,
    is_free: bool,
    rates: &RateTable,
) -> Result<PriceTable, PricingError> {
    if base_usd.is_negative() {
        return Err(PricingError::InvalidPrice(base_usd));
    }

    let mut prices = BTreeMap::new();
    prices.insert(
        Country::International,
        Price {
            amount: if is_free { Amount::ZERO } else { base_usd },
            currency: Currency::Usd,
        },
    );

    for (country, rate) in rates.iter().filter(|(c, _)| c.is_domestic()) {
        let currency = country.currency();
        let amount = if is_free {
            Amount::ZERO
        } else {
            convert(base_usd, rate, currency.rounding())?
        };
        prices.insert(country, Price { amount, currency });
    }

    Ok(PriceTable(prices))
}

fn convert(base: Amount, rate: ExchangeRate, rounding: Rounding) -> Result<Amount, PricingError> {
    let raw_cents = base.cents() as f64 * rate.value();
    // Decimal rates such as 38.9 are inexact in binary; nudge exact halves up.
    let nudge = 1e-7;
    let converted = match rounding {
        Rounding::Cents => round_to_i64(raw_cents + nudge).map(Amount::from_cents),
        Rounding::WholeUnits => {
            round_to_i64(raw_cents / 100.0 + nudge).and_then(Amount::checked_from_units)
        }
    };
    converted.ok_or_else(|| {
        PricingError::InvalidAmount(format!("{base} at rate {} is out of range", rate.value()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peru_only() -> RateTable {
        RateTable::empty().with_rate(Country::Peru, 3.36).unwrap()
    }

    #[test]
    fn two_decimal_currency_rounds_to_cents() {
        let prices = derive_prices(Amount::from_cents(4999), false, &peru_only()).unwrap();

        let peru = prices.get(Country::Peru).unwrap();
        assert_eq!(peru.amount, Amount::from_cents(16797));
        assert_eq!(peru.currency, Currency::Pen);

        let intl = prices.get(Country::International).unwrap();
        assert_eq!(intl.amount, Amount::from_cents(4999));
        assert_eq!(intl.currency, Currency::Usd);
    }

    #[test]
    fn whole_unit_currencies_drop_fractions() {
        let prices = derive_prices(Amount::from_cents(4999), false, &RateTable::default()).unwrap();

        // 49.99 * 894 = 44691.06
        assert_eq!(prices.get(Country::Chile).unwrap().amount, Amount::from_cents(4_469_100));
        // 49.99 * 1505 = 75234.95
        assert_eq!(prices.get(Country::Argentina).unwrap().amount, Amount::from_cents(7_523_500));
        // 49.99 * 38.9 = 1944.611
        assert_eq!(prices.get(Country::Uruguay).unwrap().amount, Amount::from_cents(194461));
        assert_eq!(prices.len(), 6);
    }

    #[test]
    fn free_products_price_at_zero_everywhere() {
        let prices = derive_prices(Amount::from_cents(9900), true, &RateTable::default()).unwrap();
        assert!(prices.iter().all(|(_, p)| p.amount.is_zero()));
        assert_eq!(prices.get(Country::Chile).unwrap().currency, Currency::Clp);
    }

    #[test]
    fn negative_base_is_rejected() {
        let err = derive_prices(Amount::from_cents(-1), false, &peru_only()).unwrap_err();
        assert_eq!(err, PricingError::InvalidPrice(Amount::from_cents(-1)));
    }

    #[test]
    fn out_of_range_conversions_are_errors() {
        let base = Amount::from_cents(i64::MAX / 1000);
        let err = derive_prices(base, false, &RateTable::default()).unwrap_err();
        assert!(matches!(err, PricingError::InvalidAmount(_)));

        // Free products never convert, so any base is accepted.
        assert!(derive_prices(base, true, &RateTable::default()).is_ok());
    }

    #[test]
    fn international_rate_in_table_is_ignored() {
        let rates = RateTable::empty()
            .with_rate(Country::International, 2.0)
            .unwrap();
        let prices = derive_prices(Amount::from_cents(1000), false, &rates).unwrap();
        assert_eq!(prices.get(Country::International).unwrap().amount, Amount::from_cents(1000));
        assert_eq!(prices.len(), 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn rate_table() -> impl Strategy<Value = RateTable> {
            prop::collection::vec((0usize..5, 0.01f64..5000.0), 0..5).prop_map(|entries| {
                let mut table = RateTable::empty();
                for (idx, rate) in entries {
                    let country = Country::ALL[idx];
                    table.insert(country, ExchangeRate::new(rate).unwrap());
                }
                table
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 512,
                ..ProptestConfig::default()
            })]

            /// Property: same inputs always produce the same table.
            #[test]
            fn derivation_is_deterministic(
                base in 0i64..10_000_000,
                is_free in any::<bool>(),
                rates in rate_table(),
            ) {
                let a = derive_prices(Amount::from_cents(base), is_free, &rates).unwrap();
                let b = derive_prices(Amount::from_cents(base), is_free, &rates).unwrap();
                prop_assert_eq!(a, b);
            }

            /// Property: free products derive zero in every market.
            #[test]
            fn free_is_always_zero(base in 0i64..10_000_000, rates in rate_table()) {
                let prices = derive_prices(Amount::from_cents(base), true, &rates).unwrap();
                prop_assert_eq!(prices.len(), rates.len() + 1);
                for (_, price) in prices.iter() {
                    prop_assert!(price.amount.is_zero());
                }
            }

            /// Property: whole-unit currencies never carry a fractional part.
            #[test]
            fn whole_unit_prices_are_integral(base in 0i64..10_000_000, rate in 0.01f64..5000.0) {
                let rates = RateTable::empty().with_rate(Country::Chile, rate).unwrap();
                let prices = derive_prices(Amount::from_cents(base), false, &rates).unwrap();
                prop_assert_eq!(prices.get(Country::Chile).unwrap().amount.cents() % 100, 0);
            }
        }
    }
}
