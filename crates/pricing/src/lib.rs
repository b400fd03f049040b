//! Multi-currency pricing.
//!
//! Every sellable product carries a single USD base price. Local prices for
//! each supported market are derived from it through an injected
//! [`RateTable`]; they are never authored directly.

pub mod country;
pub mod engine;
pub mod error;
pub mod money;
pub mod rates;

pub use country::{Country, Currency, Rounding};
pub use engine::{Price, PriceTable, derive_prices};
pub use error::PricingError;
pub use money::Amount;
pub use rates::{ExchangeRate, RateTable};
